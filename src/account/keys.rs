//! Key material: seed validation, BIP-44 derivation and the signing
//! primitives. Nothing here leaves the account store except addresses
//! and signatures.

use std::fmt;
use std::str::FromStr;

use bip32::{DerivationPath, XPrv};
use bip39::Mnemonic;
use k256::ecdsa::{RecoveryId, Signature, SigningKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::error::EngineError;

/// Default derivation path for the first external account.
pub const DEFAULT_DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

/// Lowercase 0x-prefixed 20-byte address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn from_bytes(bytes: &[u8; 20]) -> Self {
        Address(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> [u8; 20] {
        let mut out = [0u8; 20];
        // Constructed only from validated hex; decode cannot fail.
        if let Ok(bytes) = hex::decode(&self.0[2..]) {
            out.copy_from_slice(&bytes);
        }
        out
    }
}

impl FromStr for Address {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let digits = lower
            .strip_prefix("0x")
            .ok_or_else(|| EngineError::InvalidAddress(s.to_string()))?;
        if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(EngineError::InvalidAddress(s.to_string()));
        }
        Ok(Address(lower))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// User-supplied seed input, validated before any account is created.
#[derive(Debug, Clone)]
pub enum SeedSource {
    /// BIP-39 phrase; word-list membership and checksum are verified.
    Mnemonic(String),
    /// 32-byte hex private key, with or without 0x prefix.
    PrivateKey(String),
}

/// Owned key material. Exclusively held by the account store.
pub enum KeyMaterial {
    Mnemonic(Mnemonic),
    Raw(Zeroizing<[u8; 32]>),
}

impl KeyMaterial {
    /// Generate fresh 128-bit entropy and wrap it in a 12-word mnemonic.
    pub fn generate() -> Result<Self, EngineError> {
        use rand::RngCore;
        let mut entropy = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut entropy);
        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| EngineError::InvalidSeed(e.to_string()))?;
        Ok(KeyMaterial::Mnemonic(mnemonic))
    }

    /// Validate a user-supplied seed. Fails before anything is stored.
    pub fn parse(source: SeedSource) -> Result<Self, EngineError> {
        match source {
            SeedSource::Mnemonic(words) => {
                let mnemonic = Mnemonic::parse(words.trim())
                    .map_err(|e| EngineError::InvalidSeed(format!("invalid mnemonic: {}", e)))?;
                Ok(KeyMaterial::Mnemonic(mnemonic))
            }
            SeedSource::PrivateKey(raw) => {
                let stripped = raw.trim().strip_prefix("0x").unwrap_or(raw.trim()).to_string();
                if stripped.len() != 64 {
                    return Err(EngineError::InvalidSeed(format!(
                        "private key must be 32 bytes, got {} hex chars",
                        stripped.len()
                    )));
                }
                let bytes = hex::decode(&stripped)
                    .map_err(|e| EngineError::InvalidSeed(format!("invalid hex: {}", e)))?;
                let mut key = Zeroizing::new([0u8; 32]);
                key.copy_from_slice(&bytes);
                // Reject keys outside the curve order up front.
                SigningKey::from_slice(key.as_ref())
                    .map_err(|e| EngineError::InvalidSeed(e.to_string()))?;
                Ok(KeyMaterial::Raw(key))
            }
        }
    }

    /// The secp256k1 signing key for this material. For mnemonics this
    /// derives the default BIP-44 account; re-derivation is deterministic.
    pub fn signing_key(&self) -> Result<SigningKey, EngineError> {
        match self {
            KeyMaterial::Mnemonic(mnemonic) => {
                let seed = mnemonic.to_seed("");
                let path: DerivationPath = DEFAULT_DERIVATION_PATH
                    .parse()
                    .map_err(|e| EngineError::Internal(format!("bad derivation path: {}", e)))?;
                let child = XPrv::derive_from_path(seed, &path)
                    .map_err(|e| EngineError::InvalidSeed(e.to_string()))?;
                Ok(child.private_key().clone())
            }
            KeyMaterial::Raw(bytes) => SigningKey::from_slice(bytes.as_ref())
                .map_err(|e| EngineError::InvalidSeed(e.to_string())),
        }
    }

    /// Derive the public address. Pure: the same seed always yields the
    /// same address.
    pub fn derive_address(&self) -> Result<Address, EngineError> {
        Ok(address_of(&self.signing_key()?))
    }

    /// The recovery phrase, when this material is mnemonic-backed.
    pub fn mnemonic_phrase(&self) -> Option<String> {
        match self {
            KeyMaterial::Mnemonic(m) => Some(m.to_string()),
            KeyMaterial::Raw(_) => None,
        }
    }

    /// Serialized secret for the encrypted vault blob. Only the backup
    /// path calls this; the bytes go straight into AES-GCM.
    pub fn export_secret(&self) -> Zeroizing<Vec<u8>> {
        match self {
            KeyMaterial::Mnemonic(m) => Zeroizing::new(m.to_string().into_bytes()),
            KeyMaterial::Raw(bytes) => {
                Zeroizing::new(format!("0x{}", hex::encode(bytes.as_ref())).into_bytes())
            }
        }
    }
}

/// keccak256(uncompressed pubkey without the 0x04 tag), last 20 bytes.
pub fn address_of(key: &SigningKey) -> Address {
    let public = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&public.as_bytes()[1..]);
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&hash[12..]);
    Address::from_bytes(&addr)
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// EIP-191 personal-message digest: prefix, length, then the payload.
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut prefixed = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    prefixed.extend_from_slice(message);
    keccak256(&prefixed)
}

/// Sign a 32-byte digest, returning (r, s, recovery id).
pub fn sign_digest(key: &SigningKey, digest: &[u8; 32]) -> Result<(Signature, RecoveryId), EngineError> {
    key.sign_prehash_recoverable(digest)
        .map_err(|e| EngineError::Internal(format!("signing failed: {}", e)))
}

/// 65-byte r || s || v signature with v in {27, 28}, the message-signing
/// convention.
pub fn sign_message_bytes(key: &SigningKey, digest: &[u8; 32]) -> Result<Vec<u8>, EngineError> {
    let (signature, recovery) = sign_digest(key, digest)?;
    let mut out = signature.to_bytes().to_vec();
    out.push(27 + recovery.to_byte());
    Ok(out)
}
