use thiserror::Error;

/// Stable numeric codes used in protocol-level error replies.
pub const CODE_PERMISSION_DENIED: i64 = 4001;
pub const CODE_UNSUPPORTED_METHOD: i64 = 4200;
pub const CODE_INTERNAL: i64 = 5000;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid seed: {0}")]
    InvalidSeed(String),

    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Insufficient balance: have {available} wei, need {required} wei")]
    InsufficientBalance { available: u128, required: u128 },

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("Gas estimation failed: {0}")]
    GasEstimation(String),

    #[error("Session proposal rejected (code {code}): {reason}")]
    ProposalRejected { code: i64, reason: String },

    #[error("Decryption failed")]
    DecryptionFailure,

    #[error("Cannot delete the last remaining account")]
    LastAccount,

    #[error("Cannot delete a system account")]
    SystemAccount,

    #[error("Result discarded: network version {seen} superseded by {current}")]
    StaleNetworkVersion { seen: u64, current: u64 },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    RecordNotFound(String),
}

impl EngineError {
    /// Map to the stable code carried in a session-level error reply.
    /// Every engine failure crossing the session boundary gets a code;
    /// nothing is thrown uncaught at the remote peer.
    pub fn protocol_code(&self) -> i64 {
        match self {
            EngineError::PermissionDenied => CODE_PERMISSION_DENIED,
            EngineError::UnsupportedMethod(_) => CODE_UNSUPPORTED_METHOD,
            _ => CODE_INTERNAL,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Rpc(e.to_string())
    }
}
