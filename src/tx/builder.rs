//! Transaction construction: fee tiers, buffered gas limits and the
//! build -> sign -> submit pipeline.
//!
//! The pipeline is strict: inputs are validated before any network
//! call, the balance check reads a fresh balance, the nonce is fetched
//! at send time, and a broadcast is never retried. Retrying a signed
//! transaction with a new nonce risks double submission.

use std::sync::Arc;
use std::time::Duration;

use crate::account::{AccountStore, Address, SignKind};
use crate::error::EngineError;
use crate::events::{EventBus, WalletEvent};
use crate::network::{CallRequest, ProviderRouter};
use crate::tx::fee::{fallback_tiers, tiers_from_market, FeeEstimate, FeeParams, FeeSpeed};
use crate::tx::history::{HistoryEntry, TxHistory, TxStatus};
use crate::tx::rlp::{Eip1559Tx, LegacyTx};

/// Conservative defaults when the raw estimate itself fails.
pub const DEFAULT_NATIVE_GAS: u64 = 21_000;
pub const DEFAULT_TOKEN_GAS: u64 = 65_000;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(4);
const RECEIPT_POLL_ATTEMPTS: u32 = 30;

/// Why a raw gas estimate failed, classified from the node's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateFailure {
    /// The call would revert; the default limit will not save it.
    Revert,
    InsufficientFunds,
    Network,
}

pub fn classify_estimate_failure(message: &str) -> EstimateFailure {
    let lower = message.to_lowercase();
    if lower.contains("revert") || lower.contains("execution reverted") {
        EstimateFailure::Revert
    } else if lower.contains("insufficient funds") || lower.contains("insufficient balance") {
        EstimateFailure::InsufficientFunds
    } else {
        EstimateFailure::Network
    }
}

/// Complexity score for the buffer law: 1.0 base, +0.5 for non-native
/// transfers, +0.2 above the large-amount threshold.
pub fn complexity(token: bool, amount: f64, threshold: f64) -> f64 {
    let mut score = 1.0;
    if token {
        score += 0.5;
    }
    if amount > threshold {
        score += 0.2;
    }
    score
}

/// Buffer percentage: floor(10 + complexity * 5), clamped to [10, 25].
pub fn buffer_pct(complexity: f64) -> u64 {
    ((10.0 + complexity * 5.0).floor() as u64).clamp(10, 25)
}

pub fn buffered_limit(raw: u64, pct: u64) -> u64 {
    raw * (100 + pct) / 100
}

#[derive(Debug, Clone, PartialEq)]
pub struct GasLimitEstimate {
    pub limit: u64,
    /// The node's raw estimate, absent when the default was substituted.
    pub raw: Option<u64>,
    pub buffer_pct: u64,
    pub failure: Option<EstimateFailure>,
}

/// Inputs to a transfer. `amount` is the display-unit quantity used for
/// the large-amount complexity bump; `value_wei` is what moves on chain.
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub from: Address,
    pub to: Address,
    pub amount: f64,
    pub value_wei: u128,
    pub data: Vec<u8>,
    pub token: bool,
    pub speed: FeeSpeed,
}

pub struct TransactionBuilder {
    router: Arc<ProviderRouter>,
    accounts: Arc<AccountStore>,
    history: Arc<TxHistory>,
    events: Arc<EventBus>,
    large_amount_threshold: f64,
}

impl TransactionBuilder {
    pub fn new(
        router: Arc<ProviderRouter>,
        accounts: Arc<AccountStore>,
        history: Arc<TxHistory>,
        events: Arc<EventBus>,
        large_amount_threshold: f64,
    ) -> Self {
        Self {
            router,
            accounts,
            history,
            events,
            large_amount_threshold,
        }
    }

    /// Fetch fee-market data once and scale it into three tiers. A
    /// failed market query substitutes the fixed fallback table and
    /// warns through the event bus instead of aborting.
    pub async fn estimate_fee(&self) -> Result<FeeEstimate, EngineError> {
        let (client, version) = self.router.checkout();
        let market = client.fee_data().await;
        self.router.confirm(version)?;

        match market {
            Ok(data) => match tiers_from_market(&data) {
                Some(estimate) => Ok(estimate),
                None => Ok(self.substitute_fallback("fee market returned no usable values")),
            },
            Err(e) => Ok(self.substitute_fallback(&e.to_string())),
        }
    }

    fn substitute_fallback(&self, reason: &str) -> FeeEstimate {
        log::warn!("fee estimation failed, using fallback table: {}", reason);
        self.events.publish(WalletEvent::GasEstimationFailed {
            reason: reason.to_string(),
        });
        fallback_tiers()
    }

    /// Query the node for a raw gas estimate and apply the complexity
    /// buffer. A failed raw estimate substitutes the conservative
    /// default and carries the classified reason; the transaction is
    /// never sent with a silently guessed limit.
    pub async fn estimate_gas_limit(
        &self,
        params: &TransferParams,
    ) -> Result<GasLimitEstimate, EngineError> {
        let score = complexity(params.token, params.amount, self.large_amount_threshold);
        let pct = buffer_pct(score);

        let (client, version) = self.router.checkout();
        let request = CallRequest {
            from: Some(params.from.to_string()),
            to: Some(params.to.to_string()),
            value: Some(params.value_wei),
            data: if params.data.is_empty() {
                None
            } else {
                Some(params.data.clone())
            },
        };
        let raw = client.estimate_gas(&request).await;
        self.router.confirm(version)?;

        match raw {
            Ok(raw) => Ok(GasLimitEstimate {
                limit: buffered_limit(raw, pct),
                raw: Some(raw),
                buffer_pct: pct,
                failure: None,
            }),
            Err(e) => {
                let failure = classify_estimate_failure(&e.to_string());
                let default = if params.token {
                    DEFAULT_TOKEN_GAS
                } else {
                    DEFAULT_NATIVE_GAS
                };
                log::warn!(
                    "gas estimate failed ({:?}), defaulting to {}: {}",
                    failure,
                    default,
                    e
                );
                Ok(GasLimitEstimate {
                    limit: default,
                    raw: None,
                    buffer_pct: pct,
                    failure: Some(failure),
                })
            }
        }
    }

    /// The full pipeline: validate, check a fresh balance, estimate,
    /// sign through the account store and broadcast exactly once.
    pub async fn send(&self, params: TransferParams) -> Result<HistoryEntry, EngineError> {
        let prepared = self.prepare(&params).await?;

        // The network must not have moved between estimation and
        // broadcast; a stale build carries the wrong chain id and fees.
        self.router.confirm(prepared.version)?;
        let hash = prepared.client.send_raw_transaction(&prepared.raw).await?;

        let entry = HistoryEntry {
            hash: hash.clone(),
            from: params.from.clone(),
            to: params.to.clone(),
            value_wei: params.value_wei,
            network_key: prepared.network_key,
            status: TxStatus::Submitted,
            timestamp: chrono::Utc::now(),
        };
        self.history.record(&params.from, entry.clone());
        self.events.publish(WalletEvent::TransactionSubmitted {
            hash,
            from: params.from.to_string(),
        });
        Ok(entry)
    }

    /// Build and sign without broadcasting; the raw encoding goes back
    /// to the caller.
    pub async fn sign_transfer(&self, params: TransferParams) -> Result<String, EngineError> {
        let prepared = self.prepare(&params).await?;
        self.router.confirm(prepared.version)?;
        Ok(format!("0x{}", hex::encode(prepared.raw)))
    }

    async fn prepare(&self, params: &TransferParams) -> Result<PreparedTx, EngineError> {
        if params.value_wei == 0 && params.data.is_empty() {
            return Err(EngineError::Internal("nothing to send".to_string()));
        }
        self.accounts.get(&params.from)?;

        let active = self.router.get_active();
        let (client, version) = self.router.checkout();

        let fees = self.estimate_fee().await?;
        let fee_params = fees.tier(params.speed).clone();
        let gas = self.estimate_gas_limit(params).await?;
        if gas.failure == Some(EstimateFailure::Revert) {
            return Err(EngineError::GasEstimation(
                "transaction would revert".to_string(),
            ));
        }

        let max_gas_price = match &fee_params {
            FeeParams::Legacy { gas_price } => *gas_price,
            FeeParams::Priority { max_fee_per_gas, .. } => *max_fee_per_gas,
        };
        let balance = client.get_balance(params.from.as_str()).await?;
        let required = params
            .value_wei
            .saturating_add(max_gas_price.saturating_mul(gas.limit as u128));
        if balance < required {
            return Err(EngineError::InsufficientBalance {
                available: balance,
                required,
            });
        }

        let nonce = client.get_transaction_count(params.from.as_str()).await?;
        let chain_id = active.value.chain_id;

        let (digest, build) = match fee_params {
            FeeParams::Legacy { gas_price } => {
                let tx = LegacyTx {
                    nonce,
                    gas_price,
                    gas_limit: gas.limit,
                    to: params.to.to_bytes(),
                    value: params.value_wei,
                    data: params.data.clone(),
                    chain_id,
                };
                (tx.signing_digest(), Build::Legacy(tx))
            }
            FeeParams::Priority {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let tx = Eip1559Tx {
                    chain_id,
                    nonce,
                    max_priority_fee_per_gas,
                    max_fee_per_gas,
                    gas_limit: gas.limit,
                    to: params.to.to_bytes(),
                    value: params.value_wei,
                    data: params.data.clone(),
                };
                (tx.signing_digest(), Build::Priority(tx))
            }
        };

        let signature = self
            .accounts
            .sign(&params.from, &digest, SignKind::TransactionDigest)
            .await?;
        let (r, s, recid) = split_signature(&signature)?;
        let raw = match build {
            Build::Legacy(tx) => tx.into_signed(&r, &s, recid),
            Build::Priority(tx) => tx.into_signed(&r, &s, recid),
        };

        Ok(PreparedTx {
            raw,
            client,
            version,
            network_key: active.value.key,
        })
    }

    /// Poll for the receipt of a submitted transaction, updating history
    /// and publishing the terminal event.
    pub async fn wait_for_receipt(&self, from: &Address, hash: &str) -> Result<TxStatus, EngineError> {
        let (client, version) = self.router.checkout();
        for _ in 0..RECEIPT_POLL_ATTEMPTS {
            if let Some(receipt) = client.get_transaction_receipt(hash).await? {
                self.router.confirm(version)?;
                let ok = receipt
                    .get("status")
                    .and_then(|s| s.as_str())
                    .map(|s| s == "0x1")
                    .unwrap_or(false);
                let status = if ok { TxStatus::Confirmed } else { TxStatus::Failed };
                self.history.set_status(from, hash, status);
                match status {
                    TxStatus::Confirmed => self.events.publish(WalletEvent::TransactionConfirmed {
                        hash: hash.to_string(),
                    }),
                    _ => self.events.publish(WalletEvent::TransactionFailed {
                        hash: hash.to_string(),
                        reason: "reverted on chain".to_string(),
                    }),
                }
                return Ok(status);
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
        Err(EngineError::Rpc(format!("receipt for {} not found in time", hash)))
    }
}

enum Build {
    Legacy(LegacyTx),
    Priority(Eip1559Tx),
}

struct PreparedTx {
    raw: Vec<u8>,
    client: crate::network::RpcClient,
    version: u64,
    network_key: String,
}

fn split_signature(signature: &[u8]) -> Result<([u8; 32], [u8; 32], u8), EngineError> {
    if signature.len() != 65 {
        return Err(EngineError::Internal(format!(
            "expected 65-byte signature, got {}",
            signature.len()
        )));
    }
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&signature[..32]);
    s.copy_from_slice(&signature[32..64]);
    Ok((r, s, signature[64]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_scores() {
        assert_eq!(complexity(false, 1.0, 1000.0), 1.0);
        assert_eq!(complexity(true, 1.0, 1000.0), 1.5);
        assert_eq!(complexity(false, 5000.0, 1000.0), 1.2);
        assert_eq!(complexity(true, 5000.0, 1000.0), 1.7);
        // At the threshold exactly, no bump.
        assert_eq!(complexity(false, 1000.0, 1000.0), 1.0);
    }

    #[test]
    fn buffer_law_at_boundary_complexities() {
        // Native small transfer: c = 1.0, pct = 15.
        assert_eq!(buffer_pct(1.0), 15);
        assert_eq!(buffered_limit(21_000, 15), 24_150);

        // Token large transfer: c = 1.7, pct = floor(18.5) = 18.
        assert_eq!(buffer_pct(1.7), 18);
        assert_eq!(buffered_limit(60_000, 18), 70_800);
    }

    #[test]
    fn buffer_pct_is_clamped() {
        assert_eq!(buffer_pct(0.0), 10);
        assert_eq!(buffer_pct(4.0), 25);
    }

    #[test]
    fn estimate_failure_classification() {
        assert_eq!(
            classify_estimate_failure("execution reverted: ERC20 transfer"),
            EstimateFailure::Revert
        );
        assert_eq!(
            classify_estimate_failure("insufficient funds for gas * price + value"),
            EstimateFailure::InsufficientFunds
        );
        assert_eq!(
            classify_estimate_failure("connection refused"),
            EstimateFailure::Network
        );
    }

    #[test]
    fn signature_split_enforces_length() {
        assert!(split_signature(&[0u8; 64]).is_err());
        let (r, s, v) = split_signature(&[1u8; 65]).unwrap();
        assert_eq!(r, [1u8; 32]);
        assert_eq!(s, [1u8; 32]);
        assert_eq!(v, 1);
    }
}
