//! wallet-engine: a multi-chain, non-custodial wallet core.
//!
//! The engine owns account key material, the network registry and
//! provider routing, dApp session pairing with per-origin permissions,
//! transaction construction with fee estimation, and encrypted backups.
//! It exposes no UI; collaborating layers drive it through
//! [`engine::WalletEngine`] and observe it through [`events::EventBus`].

pub mod account;
pub mod backup;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod network;
pub mod session;
pub mod storage;
pub mod tx;

pub use account::{Account, AccountStore, Address, SeedSource, SignKind};
pub use backup::{Backup, BackupVault, PasswordVerifier};
pub use config::EngineConfig;
pub use engine::WalletEngine;
pub use error::{EngineError, StorageError};
pub use events::{EventBus, WalletEvent};
pub use network::{Network, NetworkRegistry, ProviderRouter};
pub use session::{
    PermissionScope, PermissionStore, Session, SessionManager, SessionProposal, SessionTransport,
};
pub use tx::{FeeEstimate, FeeSpeed, TransactionBuilder, TransferParams, TxHistory};
