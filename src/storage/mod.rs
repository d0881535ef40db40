//! Flat keyed JSON store over a base directory. One file per logical
//! record, pretty-printed for inspectability.

pub mod models;

use std::fs;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StorageError;

pub use models::{
    CustomNetworks, DappConnections, HiddenWallets, Preferences, TxHistoryRecord, WalletData,
};

pub const WALLET_DATA: &str = "wallet_data";
pub const DAPP_CONNECTIONS: &str = "dapp_connections";
pub const TX_HISTORY: &str = "tx_history";
pub const HIDDEN_WALLETS: &str = "hidden_wallets";
pub const PREFERENCES: &str = "preferences";
pub const CUSTOM_NETWORKS: &str = "custom_networks";

#[derive(Clone)]
pub struct Storage {
    base_path: PathBuf,
}

impl Storage {
    pub fn new() -> Self {
        Self {
            base_path: PathBuf::from("./wallet-data"),
        }
    }

    /// Custom base directory, used by tests.
    pub fn new_with_base_dir(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_dir(&self) -> &PathBuf {
        &self.base_path
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", key))
    }

    /// Write a record under its key, creating the base directory on
    /// first use.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        fs::create_dir_all(&self.base_path)?;
        let json = serde_json::to_string_pretty(value)?;
        fs::write(self.record_path(key), json)?;
        Ok(())
    }

    /// Load a record by key; a missing file is `RecordNotFound`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<T, StorageError> {
        let path = self.record_path(key);
        if !path.exists() {
            return Err(StorageError::RecordNotFound(key.to_string()));
        }
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Load a record, falling back to its default when absent.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, StorageError> {
        match self.load(key) {
            Ok(value) => Ok(value),
            Err(StorageError::RecordNotFound(_)) => Ok(T::default()),
            Err(e) => Err(e),
        }
    }

    pub fn exists(&self, key: &str) -> bool {
        self.record_path(key).exists()
    }

    pub fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.record_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Remove every record. Used on wallet reset.
    pub fn clear(&self) -> Result<(), StorageError> {
        if !self.base_path.exists() {
            return Ok(());
        }
        log::warn!("clearing storage directory: {:?}", self.base_path);
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::new()
    }
}
