pub mod keys;
pub mod store;

pub use keys::{Address, KeyMaterial, SeedSource, DEFAULT_DERIVATION_PATH};
pub use store::{Account, AccountStore, SignKind};
