//! Persisted record shapes. Everything is plain serde; key material is
//! only ever present as the encrypted vault blob inside `WalletData`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::account::{Account, Address};
use crate::backup::{Backup, PasswordVerifier};
use crate::network::Network;
use crate::session::Session;
use crate::tx::HistoryEntry;

/// The main wallet record: public account metadata, the encrypted vault
/// holding every secret, the password verifier and the lock timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletData {
    pub accounts: Vec<Account>,
    pub vault: Option<Backup>,
    pub verifier: Option<PasswordVerifier>,
    pub lock_timeout_secs: u64,
    pub active_network: String,
}

impl Default for WalletData {
    fn default() -> Self {
        Self {
            accounts: Vec::new(),
            vault: None,
            verifier: None,
            lock_timeout_secs: 900,
            active_network: "ethereum".to_string(),
        }
    }
}

/// Origin-keyed session metadata for reconnection surfaces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DappConnections {
    pub sessions: HashMap<String, Session>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxHistoryRecord {
    pub by_address: HashMap<Address, Vec<HistoryEntry>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HiddenWallets {
    pub addresses: Vec<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Preferences {
    pub language: String,
    pub currency: String,
    pub show_testnets: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            currency: "usd".to_string(),
            show_testnets: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomNetworks {
    pub networks: Vec<Network>,
}
