pub mod provider;
pub mod registry;

pub use provider::{CallRequest, FeeData, ProviderRouter, RpcClient, Versioned};
pub use registry::{Network, NetworkRegistry};
