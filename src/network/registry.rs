//! Chain configuration registry: built-in popular and test networks,
//! plus custom entries added at runtime.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Network {
    /// Unique lowercase canonical name, e.g. "ethereum"
    pub key: String,
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: String,
    pub symbol: String,
    pub explorer: Option<String>,
    #[serde(default)]
    pub testnet: bool,
    #[serde(default)]
    pub custom: bool,
}

impl Network {
    fn builtin(
        key: &str,
        name: &str,
        chain_id: u64,
        rpc_url: &str,
        symbol: &str,
        explorer: &str,
        testnet: bool,
    ) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            chain_id,
            rpc_url: rpc_url.to_string(),
            symbol: symbol.to_string(),
            explorer: Some(explorer.to_string()),
            testnet,
            custom: false,
        }
    }
}

fn builtin_networks() -> Vec<Network> {
    vec![
        Network::builtin("ethereum", "Ethereum", 1, "https://eth.llamarpc.com", "ETH", "https://etherscan.io", false),
        Network::builtin("polygon", "Polygon", 137, "https://polygon.llamarpc.com", "MATIC", "https://polygonscan.com", false),
        Network::builtin("bsc", "BNB Smart Chain", 56, "https://bsc.publicnode.com", "BNB", "https://bscscan.com", false),
        Network::builtin("optimism", "Optimism", 10, "https://optimism.publicnode.com", "ETH", "https://optimistic.etherscan.io", false),
        Network::builtin("arbitrum", "Arbitrum One", 42161, "https://arbitrum.llamarpc.com", "ETH", "https://arbiscan.io", false),
        Network::builtin("sepolia", "Sepolia", 11155111, "https://rpc.sepolia.org", "ETH", "https://sepolia.etherscan.io", true),
        Network::builtin("goerli", "Goerli", 5, "https://goerli.infura.io/v3/", "ETH", "https://goerli.etherscan.io", true),
        Network::builtin("mumbai", "Mumbai", 80001, "https://rpc-mumbai.maticvigil.com", "MATIC", "https://mumbai.polygonscan.com", true),
        Network::builtin("bsc-testnet", "BSC Testnet", 97, "https://bsc-testnet.publicnode.com", "BNB", "https://testnet.bscscan.com", true),
        Network::builtin("optimism-goerli", "Optimism Goerli", 420, "https://goerli.optimism.io", "ETH", "https://goerli-optimism.etherscan.io", true),
        Network::builtin("arbitrum-goerli", "Arbitrum Goerli", 421613, "https://goerli-rollup.arbitrum.io/rpc", "ETH", "https://goerli.arbiscan.io", true),
    ]
}

/// Keyed table of chain configurations. Key uniqueness is enforced by the
/// map itself; chain-id uniqueness is deliberately NOT enforced, since
/// rollups may share a chain id with their L1 in custom setups.
pub struct NetworkRegistry {
    networks: RwLock<BTreeMap<String, Network>>,
}

impl NetworkRegistry {
    /// Registry seeded with the built-in popular and test networks.
    pub fn new() -> Self {
        let mut networks = BTreeMap::new();
        for network in builtin_networks() {
            networks.insert(network.key.clone(), network);
        }
        Self {
            networks: RwLock::new(networks),
        }
    }

    /// Register a network. The key is canonicalized to lowercase with
    /// whitespace collapsed to hyphens. Duplicate keys overwrite the
    /// previous entry (last-write-wins).
    pub fn register(&self, mut network: Network) -> Result<Network, EngineError> {
        if network.chain_id == 0 {
            return Err(EngineError::InvalidNetwork("chain id is required".to_string()));
        }
        if network.rpc_url.trim().is_empty() {
            return Err(EngineError::InvalidNetwork("at least one RPC URL is required".to_string()));
        }
        if network.symbol.trim().is_empty() {
            return Err(EngineError::InvalidNetwork("native symbol is required".to_string()));
        }
        if network.name.trim().is_empty() {
            return Err(EngineError::InvalidNetwork("network name is required".to_string()));
        }

        network.key = canonical_key(if network.key.trim().is_empty() {
            &network.name
        } else {
            &network.key
        });

        let mut networks = self.networks.write().expect("registry lock poisoned");
        if networks.contains_key(&network.key) {
            log::warn!("overwriting existing network entry '{}'", network.key);
        }
        networks.insert(network.key.clone(), network.clone());
        Ok(network)
    }

    pub fn get(&self, key: &str) -> Result<Network, EngineError> {
        let networks = self.networks.read().expect("registry lock poisoned");
        networks
            .get(&canonical_key(key))
            .cloned()
            .ok_or_else(|| EngineError::NetworkNotFound(key.to_string()))
    }

    /// Find a network by its chain id. If several share the id (rollup
    /// and L1), the first by key order wins.
    pub fn find_by_chain_id(&self, chain_id: u64) -> Option<Network> {
        let networks = self.networks.read().expect("registry lock poisoned");
        networks.values().find(|n| n.chain_id == chain_id).cloned()
    }

    pub fn list_popular(&self) -> Vec<Network> {
        self.filtered(|n| !n.testnet && !n.custom)
    }

    pub fn list_testnets(&self) -> Vec<Network> {
        self.filtered(|n| n.testnet)
    }

    pub fn list_custom(&self) -> Vec<Network> {
        self.filtered(|n| n.custom)
    }

    pub fn list_all(&self) -> Vec<Network> {
        self.filtered(|_| true)
    }

    fn filtered(&self, predicate: impl Fn(&Network) -> bool) -> Vec<Network> {
        let networks = self.networks.read().expect("registry lock poisoned");
        networks.values().filter(|n| predicate(n)).cloned().collect()
    }
}

impl Default for NetworkRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn canonical_key(raw: &str) -> String {
    raw.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(key: &str, chain_id: u64, rpc: &str) -> Network {
        Network {
            key: key.to_string(),
            name: key.to_string(),
            chain_id,
            rpc_url: rpc.to_string(),
            symbol: "ETH".to_string(),
            explorer: None,
            testnet: false,
            custom: true,
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let registry = NetworkRegistry::new();
        let network = custom("base", 8453, "https://mainnet.base.org");
        let registered = registry.register(network.clone()).unwrap();
        assert_eq!(registry.get("base").unwrap(), registered);
        assert_eq!(registry.get("base").unwrap().chain_id, 8453);
    }

    #[test]
    fn duplicate_key_is_last_write_wins() {
        let registry = NetworkRegistry::new();
        registry.register(custom("base", 8453, "https://mainnet.base.org")).unwrap();
        registry.register(custom("base", 8453, "https://base.llamarpc.com")).unwrap();
        assert_eq!(registry.get("base").unwrap().rpc_url, "https://base.llamarpc.com");
        assert_eq!(registry.list_custom().len(), 1);
    }

    #[test]
    fn register_rejects_missing_fields() {
        let registry = NetworkRegistry::new();
        let mut no_chain = custom("x", 0, "https://x");
        no_chain.chain_id = 0;
        assert!(matches!(registry.register(no_chain), Err(EngineError::InvalidNetwork(_))));

        let no_rpc = custom("x", 1, "  ");
        assert!(matches!(registry.register(no_rpc), Err(EngineError::InvalidNetwork(_))));

        let mut no_symbol = custom("x", 1, "https://x");
        no_symbol.symbol = String::new();
        assert!(matches!(registry.register(no_symbol), Err(EngineError::InvalidNetwork(_))));
    }

    #[test]
    fn chain_id_duplicates_are_allowed() {
        let registry = NetworkRegistry::new();
        // An L2 sharing its settlement layer's chain id is legal.
        registry.register(custom("fork-of-mainnet", 1, "https://fork.example")).unwrap();
        assert!(registry.get("fork-of-mainnet").is_ok());
        assert!(registry.get("ethereum").is_ok());
    }

    #[test]
    fn key_is_canonicalized_from_name() {
        let registry = NetworkRegistry::new();
        let mut network = custom("", 8453, "https://mainnet.base.org");
        network.name = "Base Mainnet".to_string();
        let registered = registry.register(network).unwrap();
        assert_eq!(registered.key, "base-mainnet");
    }

    #[test]
    fn builtin_lists_are_partitioned() {
        let registry = NetworkRegistry::new();
        assert_eq!(registry.list_popular().len(), 5);
        assert_eq!(registry.list_testnets().len(), 6);
        assert!(registry.list_custom().is_empty());
    }
}
