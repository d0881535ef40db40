pub mod builder;
pub mod fee;
pub mod history;
pub mod rlp;

pub use builder::{
    EstimateFailure, GasLimitEstimate, TransactionBuilder, TransferParams, DEFAULT_NATIVE_GAS,
    DEFAULT_TOKEN_GAS,
};
pub use fee::{FeeEstimate, FeeParams, FeeSpeed};
pub use history::{HistoryEntry, HistoryFilter, TxHistory, TxStatus, HISTORY_CAP};
