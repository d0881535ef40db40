/// Shared test infrastructure for engine integration tests:
/// temp-directory engine setup and a recording session transport.
use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;
use wallet_engine::session::Namespace;
use wallet_engine::{EngineConfig, EngineError, SessionTransport, WalletEngine};

pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub const TEST_ADDRESS: &str = "0x9858effd232b4033e47d90003d41ec34ecaeda94";

/// Engine over a temp directory with automatic cleanup.
pub struct TestEnvironment {
    pub temp_dir: TempDir,
    pub engine: WalletEngine,
}

impl TestEnvironment {
    pub fn new() -> anyhow::Result<Self> {
        let _ = env_logger::builder().is_test(true).try_init();
        let temp_dir = TempDir::new()?;
        let config = EngineConfig {
            storage_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        };
        let engine = WalletEngine::new(config)?;
        Ok(Self { temp_dir, engine })
    }

    /// A second engine over the same directory, as after a restart.
    pub fn reopen(&self) -> anyhow::Result<WalletEngine> {
        let config = EngineConfig {
            storage_dir: self.temp_dir.path().to_path_buf(),
            ..Default::default()
        };
        Ok(WalletEngine::new(config)?)
    }
}

/// In-process JSON-RPC endpoint with canned chain responses, standing
/// in for a node so the send pipeline can run end to end.
pub struct MockRpcServer {
    pub url: String,
}

impl MockRpcServer {
    pub async fn start() -> anyhow::Result<Self> {
        let app = Router::new().route("/", post(Self::handle));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Ok(Self { url })
    }

    async fn handle(Json(body): Json<Value>) -> Json<Value> {
        let method = body.get("method").and_then(Value::as_str).unwrap_or("");
        let result = match method {
            "eth_gasPrice" => json!("0x4a817c800"),            // 20 gwei
            "eth_maxPriorityFeePerGas" => json!("0x3b9aca00"), // 1 gwei
            "eth_estimateGas" => json!("0x5208"),
            "eth_getBalance" => json!("0x56bc75e2d63100000"), // 100 ETH
            "eth_getTransactionCount" => json!("0x0"),
            "eth_sendRawTransaction" => {
                json!(format!("0x{}", "11".repeat(32)))
            }
            "eth_getTransactionReceipt" => json!({ "status": "0x1" }),
            other => {
                return Json(json!({
                    "jsonrpc": "2.0",
                    "id": body.get("id").cloned().unwrap_or(json!(1)),
                    "error": { "code": -32601, "message": format!("unknown method {}", other) },
                }));
            }
        };
        Json(json!({
            "jsonrpc": "2.0",
            "id": body.get("id").cloned().unwrap_or(json!(1)),
            "result": result,
        }))
    }
}

/// Records every outward protocol call; approvals acknowledge
/// immediately unless `ack_ok` is cleared.
pub struct MockTransport {
    pub ack_ok: bool,
    pub approvals: Mutex<Vec<String>>,
    pub rejections: Mutex<Vec<(String, i64, String)>>,
    pub replies: Mutex<Vec<(u64, Result<Value, (i64, String)>)>>,
    pub emitted: Mutex<Vec<(String, String, Value)>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            ack_ok: true,
            approvals: Mutex::new(Vec::new()),
            rejections: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            emitted: Mutex::new(Vec::new()),
        }
    }

    pub fn last_reply(&self) -> (u64, Result<Value, (i64, String)>) {
        self.replies.lock().unwrap().last().cloned().expect("no reply recorded")
    }

    pub fn reply_count(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

#[async_trait]
impl SessionTransport for MockTransport {
    async fn approve_proposal(
        &self,
        proposal_id: &str,
        _namespaces: &BTreeMap<String, Namespace>,
    ) -> Result<(), EngineError> {
        self.approvals.lock().unwrap().push(proposal_id.to_string());
        if self.ack_ok {
            Ok(())
        } else {
            Err(EngineError::Rpc("relay unreachable".to_string()))
        }
    }

    async fn reject_proposal(&self, proposal_id: &str, code: i64, reason: &str) {
        self.rejections
            .lock()
            .unwrap()
            .push((proposal_id.to_string(), code, reason.to_string()));
    }

    async fn respond(&self, _topic: &str, request_id: u64, result: Result<Value, (i64, String)>) {
        self.replies.lock().unwrap().push((request_id, result));
    }

    async fn emit_event(&self, topic: &str, event: &str, data: Value) {
        self.emitted
            .lock()
            .unwrap()
            .push((topic.to_string(), event.to_string(), data));
    }
}
