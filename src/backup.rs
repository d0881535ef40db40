//! Encrypted wallet backups.
//!
//! The snapshot is serialized, encrypted with AES-256-GCM under a
//! PBKDF2-derived key and stored as one opaque blob. Decryption fails
//! closed: an integrity-tag mismatch yields `DecryptionFailure` and
//! never partial plaintext. The password itself is never persisted;
//! only a verifier derived under its own salt.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use chrono::{DateTime, Utc};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::account::{Account, AccountStore, Address, KeyMaterial, SeedSource};
use crate::error::EngineError;
use crate::events::{EventBus, WalletEvent};

const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;

/// An encrypted wallet snapshot. Every field is serializable; nothing
/// here is sensitive on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub ciphertext: String,
    pub iv: String,
    pub salt: String,
    pub created_at: DateTime<Utc>,
}

/// Stored in place of the password: a key derived under a salt that is
/// independent of the backup salt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordVerifier {
    pub salt: String,
    pub hash: String,
}

#[derive(Serialize, Deserialize)]
struct BackupRecord {
    address: Address,
    display_name: String,
    network_keys: Vec<String>,
    hidden: bool,
    system: bool,
    secret: String,
}

fn derive_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, key.as_mut());
    key
}

/// Derive a verifier for later password checks.
pub fn verifier_for(password: &str) -> PasswordVerifier {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let key = derive_key(password, &salt);
    PasswordVerifier {
        salt: hex::encode(salt),
        hash: hex::encode(key.as_ref()),
    }
}

pub fn verify_password(password: &str, verifier: &PasswordVerifier) -> bool {
    let Ok(salt) = hex::decode(&verifier.salt) else {
        return false;
    };
    let key = derive_key(password, &salt);
    hex::encode(key.as_ref()) == verifier.hash
}

pub struct BackupVault;

impl BackupVault {
    /// Snapshot every account and encrypt the serialization under the
    /// password. Fresh salt and nonce per backup.
    pub fn create(
        accounts: &AccountStore,
        password: &str,
        events: &EventBus,
    ) -> Result<Backup, EngineError> {
        let records: Vec<BackupRecord> = accounts
            .snapshot()
            .into_iter()
            .map(|entry| {
                let secret = String::from_utf8(entry.secret.to_vec())
                    .map_err(|_| EngineError::Internal("non-utf8 secret".to_string()))?;
                Ok(BackupRecord {
                    address: entry.address,
                    display_name: entry.display_name,
                    network_keys: entry.network_keys,
                    hidden: entry.hidden,
                    system: entry.system,
                    secret,
                })
            })
            .collect::<Result<_, EngineError>>()?;

        let plaintext = Zeroizing::new(
            serde_json::to_vec(&records)
                .map_err(|e| EngineError::Internal(format!("snapshot serialization: {}", e)))?,
        );

        let mut salt = [0u8; SALT_LEN];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let key = derive_key(password, &salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| EngineError::Internal("encryption failed".to_string()))?;

        let backup = Backup {
            ciphertext: hex::encode(ciphertext),
            iv: hex::encode(nonce),
            salt: hex::encode(salt),
            created_at: Utc::now(),
        };
        events.publish(WalletEvent::BackupCreated {
            created_at: backup.created_at.timestamp(),
        });
        log::info!("backup created for {} accounts", records.len());
        Ok(backup)
    }

    /// Decrypt and re-validate every record, then replace the store in
    /// one step. Any failure leaves the existing store untouched.
    pub fn restore(
        accounts: &AccountStore,
        backup: &Backup,
        password: &str,
    ) -> Result<usize, EngineError> {
        let salt = hex::decode(&backup.salt).map_err(|_| EngineError::DecryptionFailure)?;
        let nonce = hex::decode(&backup.iv).map_err(|_| EngineError::DecryptionFailure)?;
        let ciphertext =
            hex::decode(&backup.ciphertext).map_err(|_| EngineError::DecryptionFailure)?;
        if nonce.len() != NONCE_LEN {
            return Err(EngineError::DecryptionFailure);
        }

        let key = derive_key(password, &salt);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_ref()));
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                .map_err(|_| EngineError::DecryptionFailure)?,
        );

        let records: Vec<BackupRecord> =
            serde_json::from_slice(&plaintext).map_err(|_| EngineError::DecryptionFailure)?;

        // Every entry must parse and re-derive before anything changes.
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            let source = if record.secret.contains(' ') {
                SeedSource::Mnemonic(record.secret.clone())
            } else {
                SeedSource::PrivateKey(record.secret.clone())
            };
            let material = KeyMaterial::parse(source)?;
            let account = Account {
                address: record.address,
                display_name: record.display_name,
                network_keys: record.network_keys,
                hidden: record.hidden,
                system: record.system,
                created_at: Utc::now(),
            };
            entries.push(AccountStore::entry_from_parts(material, account)?);
        }

        let count = entries.len();
        accounts.replace_all(entries);
        log::info!("backup restored, {} accounts", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn store_with_account() -> AccountStore {
        let store = AccountStore::new();
        store
            .create(Some(SeedSource::Mnemonic(TEST_MNEMONIC.to_string())), "Main", vec![])
            .unwrap();
        store
    }

    #[test]
    fn round_trip_restores_accounts() {
        let store = store_with_account();
        let events = EventBus::new();
        let backup = BackupVault::create(&store, "hunter2", &events).unwrap();

        let fresh = AccountStore::new();
        let count = BackupVault::restore(&fresh, &backup, "hunter2").unwrap();
        assert_eq!(count, 1);
        let restored = fresh.list();
        assert_eq!(restored[0].address.as_str(), "0x9858effd232b4033e47d90003d41ec34ecaeda94");
        assert!(restored[0].system);
    }

    #[test]
    fn wrong_password_fails_closed_and_leaves_store_alone() {
        let store = store_with_account();
        let events = EventBus::new();
        let backup = BackupVault::create(&store, "correct", &events).unwrap();

        let target = AccountStore::new();
        target.create(None, "Existing", vec![]).unwrap();
        let before = target.list();

        let result = BackupVault::restore(&target, &backup, "wrong");
        assert!(matches!(result, Err(EngineError::DecryptionFailure)));
        assert_eq!(target.list(), before);
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let store = store_with_account();
        let events = EventBus::new();
        let mut backup = BackupVault::create(&store, "pw", &events).unwrap();
        let mut bytes = hex::decode(&backup.ciphertext).unwrap();
        bytes[0] ^= 0xff;
        backup.ciphertext = hex::encode(bytes);

        let fresh = AccountStore::new();
        assert!(matches!(
            BackupVault::restore(&fresh, &backup, "pw"),
            Err(EngineError::DecryptionFailure)
        ));
    }

    #[test]
    fn backups_never_repeat_salt_or_nonce() {
        let store = store_with_account();
        let events = EventBus::new();
        let a = BackupVault::create(&store, "pw", &events).unwrap();
        let b = BackupVault::create(&store, "pw", &events).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
    }

    #[test]
    fn password_verifier_round_trip() {
        let verifier = verifier_for("open sesame");
        assert!(verify_password("open sesame", &verifier));
        assert!(!verify_password("close sesame", &verifier));
    }

    #[test]
    fn backup_event_is_published() {
        let store = store_with_account();
        let events = EventBus::new();
        let mut rx = events.subscribe();
        BackupVault::create(&store, "pw", &events).unwrap();
        assert!(matches!(rx.try_recv(), Ok(WalletEvent::BackupCreated { .. })));
    }
}
