//! Engine configuration from environment variables.
//!
//! Controls the default network, storage location and the tunable
//! thresholds used by session pairing and gas estimation.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Network key activated on startup
    pub default_network: String,
    /// Base directory for the keyed store
    pub storage_dir: PathBuf,
    /// Pairing proposals unacknowledged past this are rejected
    pub proposal_timeout: Duration,
    /// Amounts above this (in whole native units) add gas complexity
    pub large_amount_threshold: f64,
    /// Auto-lock timeout persisted with the wallet record, in seconds
    pub lock_timeout_secs: u64,
}

impl EngineConfig {
    /// Load configuration from environment variables.
    ///
    /// - `WALLET_NETWORK`: default network key (default "ethereum")
    /// - `WALLET_STORAGE_DIR`: keyed-store directory (default "./wallet-data")
    /// - `WALLET_PROPOSAL_TIMEOUT_SECS`: pairing ack timeout (default 300)
    /// - `WALLET_LARGE_AMOUNT_THRESHOLD`: gas complexity threshold (default 1000)
    pub fn from_env() -> Self {
        let default_network = env::var("WALLET_NETWORK")
            .unwrap_or_else(|_| "ethereum".to_string())
            .to_lowercase();
        log::info!("Default network: {}", default_network);

        let storage_dir = env::var("WALLET_STORAGE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./wallet-data"));

        let proposal_timeout = env::var("WALLET_PROPOSAL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        let large_amount_threshold = env::var("WALLET_LARGE_AMOUNT_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(1000.0);

        Self {
            default_network,
            storage_dir,
            proposal_timeout,
            large_amount_threshold,
            lock_timeout_secs: 900,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_network: "ethereum".to_string(),
            storage_dir: PathBuf::from("./wallet-data"),
            proposal_timeout: Duration::from_secs(300),
            large_amount_threshold: 1000.0,
            lock_timeout_secs: 900,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_network_is_ethereum() {
        let config = EngineConfig::default();
        assert_eq!(config.default_network, "ethereum");
        assert_eq!(config.proposal_timeout, Duration::from_secs(300));
    }
}
