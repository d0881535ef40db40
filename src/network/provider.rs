//! Live RPC connection handling: a JSON-RPC client over HTTP and the
//! router that swaps it atomically when the active network changes.
//!
//! Every checkout of the client is tagged with the router version it was
//! made under. A result that completes after a network switch fails its
//! `confirm` and must be discarded: fee and nonce values are
//! network-specific, so applying a stale result would corrupt state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde_json::{json, Value};

use crate::error::EngineError;
use crate::network::registry::{Network, NetworkRegistry};

/// A value produced under a specific router version.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub value: T,
    pub version: u64,
}

/// Raw fee-market data for the active network. `max_fee_per_gas` and
/// `max_priority_fee_per_gas` are present only on priority-fee markets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeeData {
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
}

impl FeeData {
    pub fn has_priority_market(&self) -> bool {
        self.max_fee_per_gas.is_some() && self.max_priority_fee_per_gas.is_some()
    }
}

/// Outward call parameters for gas estimation and contract reads.
#[derive(Debug, Clone, Default)]
pub struct CallRequest {
    pub from: Option<String>,
    pub to: Option<String>,
    pub value: Option<u128>,
    pub data: Option<Vec<u8>>,
}

impl CallRequest {
    fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        if let Some(from) = &self.from {
            obj.insert("from".to_string(), json!(from));
        }
        if let Some(to) = &self.to {
            obj.insert("to".to_string(), json!(to));
        }
        if let Some(value) = self.value {
            obj.insert("value".to_string(), json!(format!("{:#x}", value)));
        }
        if let Some(data) = &self.data {
            obj.insert("data".to_string(), json!(format!("0x{}", hex::encode(data))));
        }
        Value::Object(obj)
    }
}

/// JSON-RPC client bound to one endpoint.
#[derive(Clone)]
pub struct RpcClient {
    http: reqwest::Client,
    url: String,
}

impl RpcClient {
    pub fn new(url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn call(&self, method: &str, params: Value) -> Result<Value, EngineError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1,
        });
        log::debug!("rpc -> {} {}", self.url, method);
        let response: Value = self.http.post(&self.url).json(&body).send().await?.json().await?;

        if let Some(err) = response.get("error").filter(|e| !e.is_null()) {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown RPC error");
            return Err(EngineError::Rpc(format!("{}: {}", method, message)));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| EngineError::Rpc(format!("{}: missing result", method)))
    }

    pub async fn get_balance(&self, address: &str) -> Result<u128, EngineError> {
        let result = self.call("eth_getBalance", json!([address, "latest"])).await?;
        parse_hex_u128(&result)
    }

    pub async fn get_transaction_count(&self, address: &str) -> Result<u64, EngineError> {
        let result = self
            .call("eth_getTransactionCount", json!([address, "latest"]))
            .await?;
        Ok(parse_hex_u128(&result)? as u64)
    }

    /// Fee-market query. Probes the priority-fee market first; a network
    /// that rejects `eth_maxPriorityFeePerGas` is treated as legacy.
    pub async fn fee_data(&self) -> Result<FeeData, EngineError> {
        let gas_price = parse_hex_u128(&self.call("eth_gasPrice", json!([])).await?)?;

        match self.call("eth_maxPriorityFeePerGas", json!([])).await {
            Ok(result) => {
                let priority = parse_hex_u128(&result)?;
                Ok(FeeData {
                    gas_price: Some(gas_price),
                    max_fee_per_gas: Some(gas_price),
                    max_priority_fee_per_gas: Some(priority),
                })
            }
            Err(_) => Ok(FeeData {
                gas_price: Some(gas_price),
                ..Default::default()
            }),
        }
    }

    pub async fn estimate_gas(&self, request: &CallRequest) -> Result<u64, EngineError> {
        let result = self.call("eth_estimateGas", json!([request.to_json()])).await?;
        Ok(parse_hex_u128(&result)? as u64)
    }

    pub async fn eth_call(&self, request: &CallRequest) -> Result<Value, EngineError> {
        self.call("eth_call", json!([request.to_json(), "latest"])).await
    }

    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, EngineError> {
        let result = self
            .call("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(raw))]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| EngineError::Rpc("eth_sendRawTransaction: non-string result".to_string()))
    }

    pub async fn get_transaction_receipt(&self, hash: &str) -> Result<Option<Value>, EngineError> {
        let result = self.call("eth_getTransactionReceipt", json!([hash])).await?;
        Ok(if result.is_null() { None } else { Some(result) })
    }
}

pub fn parse_hex_u128(value: &Value) -> Result<u128, EngineError> {
    let s = value
        .as_str()
        .ok_or_else(|| EngineError::Rpc(format!("expected hex string, got {}", value)))?;
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    if stripped.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(stripped, 16)
        .map_err(|e| EngineError::Rpc(format!("bad hex quantity '{}': {}", s, e)))
}

struct ActiveProvider {
    network: Network,
    client: RpcClient,
}

/// Resolves the active network to a live RPC handle behind a version
/// counter. Switches are atomic: version bump and handle swap happen
/// under one write lock, and no lock is held across a network call.
pub struct ProviderRouter {
    active: RwLock<ActiveProvider>,
    version: AtomicU64,
}

impl ProviderRouter {
    pub fn new(registry: &NetworkRegistry, initial_key: &str) -> Result<Self, EngineError> {
        let network = registry.get(initial_key)?;
        let client = RpcClient::new(network.rpc_url.clone());
        Ok(Self {
            active: RwLock::new(ActiveProvider { network, client }),
            version: AtomicU64::new(0),
        })
    }

    /// Swap the live handle to `key`'s network. Returns the new active
    /// network tagged with the new version.
    pub fn set_active(&self, registry: &NetworkRegistry, key: &str) -> Result<Versioned<Network>, EngineError> {
        let network = registry.get(key)?;
        let client = RpcClient::new(network.rpc_url.clone());

        let mut active = self.active.write().expect("router lock poisoned");
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        active.network = network.clone();
        active.client = client;
        log::info!("active network switched to '{}' (version {})", network.key, version);

        Ok(Versioned { value: network, version })
    }

    /// Current network plus its version token.
    pub fn get_active(&self) -> Versioned<Network> {
        let active = self.active.read().expect("router lock poisoned");
        Versioned {
            value: active.network.clone(),
            version: self.version.load(Ordering::SeqCst),
        }
    }

    /// Checkout a client handle for an outward call, tagged with the
    /// version it was issued under.
    pub fn checkout(&self) -> (RpcClient, u64) {
        let active = self.active.read().expect("router lock poisoned");
        (active.client.clone(), self.version.load(Ordering::SeqCst))
    }

    /// Confirm a result obtained under `seen`. Failing this means the
    /// network changed mid-flight and the result must be discarded;
    /// callers drop it silently, logging at debug.
    pub fn confirm(&self, seen: u64) -> Result<(), EngineError> {
        let current = self.version.load(Ordering::SeqCst);
        if seen == current {
            Ok(())
        } else {
            log::debug!("discarding stale result: version {} superseded by {}", seen, current);
            Err(EngineError::StaleNetworkVersion { seen, current })
        }
    }
}
