//! Account records and the signing gate.
//!
//! The store is the exclusive owner of key material for the process
//! lifetime. Nothing crossing its boundary carries a seed: callers get
//! addresses, metadata and signatures. Signing is serialized per
//! address so two concurrent signs can never interleave on one key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use zeroize::Zeroizing;

use crate::account::keys::{
    personal_message_hash, sign_digest, sign_message_bytes, Address, KeyMaterial, SeedSource,
};
use crate::error::EngineError;

/// Public account metadata. Key material never appears here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub address: Address,
    pub display_name: String,
    pub network_keys: Vec<String>,
    pub hidden: bool,
    /// Non-deletable default account created with the wallet.
    pub system: bool,
    pub created_at: DateTime<Utc>,
}

/// What a payload handed to `sign` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignKind {
    /// A 32-byte transaction digest; returns r || s || recovery-id.
    TransactionDigest,
    /// Arbitrary bytes, hashed with the EIP-191 prefix; returns
    /// r || s || v with v in {27, 28}.
    PersonalMessage,
    /// JSON-encoded typed data; structurally validated before hashing.
    TypedData,
}

pub(crate) struct AccountEntry {
    account: Account,
    material: KeyMaterial,
}

/// Snapshot row handed to the backup vault. Carries the secret; lives
/// only for the duration of an encrypt call.
pub(crate) struct SnapshotEntry {
    pub address: Address,
    pub display_name: String,
    pub network_keys: Vec<String>,
    pub hidden: bool,
    pub system: bool,
    pub secret: Zeroizing<Vec<u8>>,
}

pub struct AccountStore {
    entries: RwLock<Vec<AccountEntry>>,
    sign_locks: StdMutex<HashMap<Address, Arc<AsyncMutex<()>>>>,
}

impl AccountStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            sign_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Create or import an account. Absent `source` means fresh entropy.
    /// The first account in the store becomes the system account.
    pub fn create(
        &self,
        source: Option<SeedSource>,
        display_name: &str,
        network_keys: Vec<String>,
    ) -> Result<Account, EngineError> {
        let material = match source {
            Some(source) => KeyMaterial::parse(source)?,
            None => KeyMaterial::generate()?,
        };
        let address = material.derive_address()?;

        let network_keys = if network_keys.is_empty() {
            vec!["ethereum".to_string()]
        } else {
            network_keys
        };

        let mut entries = self.entries.write().expect("account store lock poisoned");
        if entries.iter().any(|e| e.account.address == address) {
            return Err(EngineError::AccountExists(address.to_string()));
        }

        let account = Account {
            address: address.clone(),
            display_name: display_name.to_string(),
            network_keys,
            hidden: false,
            system: entries.is_empty(),
            created_at: Utc::now(),
        };
        entries.push(AccountEntry {
            account: account.clone(),
            material,
        });
        log::info!("account created: {}", address);
        Ok(account)
    }

    pub fn get(&self, address: &Address) -> Result<Account, EngineError> {
        let entries = self.entries.read().expect("account store lock poisoned");
        entries
            .iter()
            .find(|e| &e.account.address == address)
            .map(|e| e.account.clone())
            .ok_or_else(|| EngineError::AccountNotFound(address.to_string()))
    }

    pub fn list(&self) -> Vec<Account> {
        let entries = self.entries.read().expect("account store lock poisoned");
        entries.iter().map(|e| e.account.clone()).collect()
    }

    pub fn list_visible(&self) -> Vec<Account> {
        self.list().into_iter().filter(|a| !a.hidden).collect()
    }

    pub fn list_hidden(&self) -> Vec<Account> {
        self.list().into_iter().filter(|a| a.hidden).collect()
    }

    /// First visible account; the one sessions and fallback namespaces use.
    pub fn primary(&self) -> Option<Account> {
        self.list_visible().into_iter().next()
    }

    pub fn hide(&self, address: &Address) -> Result<(), EngineError> {
        self.update(address, |account| account.hidden = true)
    }

    pub fn show(&self, address: &Address) -> Result<(), EngineError> {
        self.update(address, |account| account.hidden = false)
    }

    pub fn rename(&self, address: &Address, name: &str) -> Result<(), EngineError> {
        let name = name.to_string();
        self.update(address, move |account| account.display_name = name.clone())
    }

    /// Associate an additional network with the account, once.
    pub fn associate_network(&self, address: &Address, key: &str) -> Result<(), EngineError> {
        let key = key.to_lowercase();
        self.update(address, move |account| {
            if !account.network_keys.contains(&key) {
                account.network_keys.push(key.clone());
            }
        })
    }

    pub fn delete(&self, address: &Address) -> Result<(), EngineError> {
        let mut entries = self.entries.write().expect("account store lock poisoned");
        let index = entries
            .iter()
            .position(|e| &e.account.address == address)
            .ok_or_else(|| EngineError::AccountNotFound(address.to_string()))?;
        if entries.len() == 1 {
            return Err(EngineError::LastAccount);
        }
        if entries[index].account.system {
            return Err(EngineError::SystemAccount);
        }
        entries.remove(index);
        self.sign_locks
            .lock()
            .expect("sign lock table poisoned")
            .remove(address);
        log::info!("account deleted: {}", address);
        Ok(())
    }

    /// Drop every account and its key material.
    pub fn clear(&self) {
        self.entries.write().expect("account store lock poisoned").clear();
        self.sign_locks.lock().expect("sign lock table poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("account store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sign a payload with the account's key. The only outward path that
    /// touches key material; it returns signatures, never the seed.
    /// Concurrent calls for the same address queue behind one another.
    pub async fn sign(
        &self,
        address: &Address,
        payload: &[u8],
        kind: SignKind,
    ) -> Result<Vec<u8>, EngineError> {
        let lock = self.sign_lock(address)?;
        let _guard = lock.lock().await;

        // Key handle is rebuilt under the guard; the read lock is not
        // held across the signing computation.
        let key = {
            let entries = self.entries.read().expect("account store lock poisoned");
            let entry = entries
                .iter()
                .find(|e| &e.account.address == address)
                .ok_or_else(|| EngineError::AccountNotFound(address.to_string()))?;
            entry.material.signing_key()?
        };

        match kind {
            SignKind::TransactionDigest => {
                let digest: [u8; 32] = payload
                    .try_into()
                    .map_err(|_| EngineError::Internal("transaction digest must be 32 bytes".to_string()))?;
                let (signature, recovery) = sign_digest(&key, &digest)?;
                let mut out = signature.to_bytes().to_vec();
                out.push(recovery.to_byte());
                Ok(out)
            }
            SignKind::PersonalMessage => {
                let digest = personal_message_hash(payload);
                sign_message_bytes(&key, &digest)
            }
            SignKind::TypedData => {
                let value: Value = serde_json::from_slice(payload)
                    .map_err(|e| EngineError::Internal(format!("typed data is not JSON: {}", e)))?;
                validate_typed_data(&value)?;
                let digest = crate::account::keys::keccak256(payload);
                sign_message_bytes(&key, &digest)
            }
        }
    }

    /// Reveal the recovery phrase for a mnemonic-backed account. An
    /// explicit user action, never part of any session-serviced method.
    pub fn export_mnemonic(&self, address: &Address) -> Result<Option<String>, EngineError> {
        let entries = self.entries.read().expect("account store lock poisoned");
        let entry = entries
            .iter()
            .find(|e| &e.account.address == address)
            .ok_or_else(|| EngineError::AccountNotFound(address.to_string()))?;
        Ok(entry.material.mnemonic_phrase())
    }

    pub(crate) fn snapshot(&self) -> Vec<SnapshotEntry> {
        let entries = self.entries.read().expect("account store lock poisoned");
        entries
            .iter()
            .map(|e| SnapshotEntry {
                address: e.account.address.clone(),
                display_name: e.account.display_name.clone(),
                network_keys: e.account.network_keys.clone(),
                hidden: e.account.hidden,
                system: e.account.system,
                secret: e.material.export_secret(),
            })
            .collect()
    }

    /// Replace the whole store. Used by backup restore after every entry
    /// has decrypted and re-derived; a partial replacement never happens.
    pub(crate) fn replace_all(&self, incoming: Vec<AccountEntry>) {
        let mut entries = self.entries.write().expect("account store lock poisoned");
        *entries = incoming;
        self.sign_locks.lock().expect("sign lock table poisoned").clear();
    }

    pub(crate) fn entry_from_parts(
        material: KeyMaterial,
        account: Account,
    ) -> Result<AccountEntry, EngineError> {
        let derived = material.derive_address()?;
        if derived != account.address {
            return Err(EngineError::InvalidSeed(format!(
                "restored secret derives {} but record claims {}",
                derived, account.address
            )));
        }
        Ok(AccountEntry { account, material })
    }

    fn update(
        &self,
        address: &Address,
        mutate: impl Fn(&mut Account),
    ) -> Result<(), EngineError> {
        let mut entries = self.entries.write().expect("account store lock poisoned");
        let entry = entries
            .iter_mut()
            .find(|e| &e.account.address == address)
            .ok_or_else(|| EngineError::AccountNotFound(address.to_string()))?;
        mutate(&mut entry.account);
        Ok(())
    }

    fn sign_lock(&self, address: &Address) -> Result<Arc<AsyncMutex<()>>, EngineError> {
        // Existence check up front so an unknown address fails before
        // a lock entry is minted for it.
        {
            let entries = self.entries.read().expect("account store lock poisoned");
            if !entries.iter().any(|e| &e.account.address == address) {
                return Err(EngineError::AccountNotFound(address.to_string()));
            }
        }
        let mut locks = self.sign_locks.lock().expect("sign lock table poisoned");
        Ok(locks
            .entry(address.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }
}

impl Default for AccountStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Structural validation for typed-data payloads: a domain with name,
/// version and chainId, and a types map of field arrays, each field
/// carrying name and type.
pub fn validate_typed_data(value: &Value) -> Result<(), EngineError> {
    let domain = value
        .get("domain")
        .and_then(Value::as_object)
        .ok_or_else(|| EngineError::UnsupportedMethod("typed data missing domain".to_string()))?;
    for field in ["name", "version", "chainId"] {
        if !domain.contains_key(field) {
            return Err(EngineError::UnsupportedMethod(format!(
                "typed data domain missing required field: {}",
                field
            )));
        }
    }

    let types = value
        .get("types")
        .and_then(Value::as_object)
        .ok_or_else(|| EngineError::UnsupportedMethod("typed data missing types".to_string()))?;
    for (type_name, fields) in types {
        let fields = fields.as_array().ok_or_else(|| {
            EngineError::UnsupportedMethod(format!("invalid fields for type: {}", type_name))
        })?;
        for field in fields {
            let ok = field.get("name").map(|v| v.is_string()).unwrap_or(false)
                && field.get("type").map(|v| v.is_string()).unwrap_or(false);
            if !ok {
                return Err(EngineError::UnsupportedMethod(format!(
                    "invalid field in type {}",
                    type_name
                )));
            }
        }
    }
    Ok(())
}
