pub mod manager;
pub mod methods;
pub mod permissions;

pub use manager::{
    Namespace, ProposalScope, Session, SessionManager, SessionProposal, SessionTransport,
};
pub use methods::{RpcMethod, SESSION_EVENTS, SESSION_METHODS};
pub use permissions::{PermissionScope, PermissionStore};
