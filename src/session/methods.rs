//! The dApp-facing method surface: parsing inbound JSON-RPC calls into
//! typed requests and the scope each one requires.

use serde_json::Value;

use crate::error::EngineError;
use crate::session::permissions::PermissionScope;

/// A parsed session request. Anything outside this set is rejected as
/// unsupported before it reaches a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMethod {
    RequestAccounts,
    Accounts,
    ChainId,
    SendTransaction(Value),
    SignTransaction(Value),
    Sign { address: String, data: String },
    PersonalSign { data: String, address: String },
    SignTypedData { address: String, payload: Value },
    SwitchChain { chain_id: u64 },
    AddChain(Value),
    WatchAsset(Value),
    RequestPermissions(Value),
    GetPermissions,
}

impl RpcMethod {
    /// Parse `method` and `params` into a typed request.
    pub fn parse(method: &str, params: &Value) -> Result<Self, EngineError> {
        let param = |i: usize| params.get(i).cloned().unwrap_or(Value::Null);
        let str_param = |i: usize| -> Result<String, EngineError> {
            params
                .get(i)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| EngineError::Internal(format!("{}: missing param {}", method, i)))
        };

        match method {
            "eth_requestAccounts" => Ok(RpcMethod::RequestAccounts),
            "eth_accounts" => Ok(RpcMethod::Accounts),
            "eth_chainId" => Ok(RpcMethod::ChainId),
            "eth_sendTransaction" => Ok(RpcMethod::SendTransaction(param(0))),
            "eth_signTransaction" => Ok(RpcMethod::SignTransaction(param(0))),
            // eth_sign takes (address, data); personal_sign takes (data, address).
            "eth_sign" => Ok(RpcMethod::Sign {
                address: str_param(0)?,
                data: str_param(1)?,
            }),
            "personal_sign" => Ok(RpcMethod::PersonalSign {
                data: str_param(0)?,
                address: str_param(1)?,
            }),
            "eth_signTypedData" | "eth_signTypedData_v4" => Ok(RpcMethod::SignTypedData {
                address: str_param(0)?,
                payload: match param(1) {
                    Value::String(s) => serde_json::from_str(&s)
                        .map_err(|e| EngineError::Internal(format!("typed data: {}", e)))?,
                    other => other,
                },
            }),
            "wallet_switchEthereumChain" => {
                let chain_hex = param(0)
                    .get("chainId")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        EngineError::Internal("wallet_switchEthereumChain: missing chainId".to_string())
                    })?;
                let stripped = chain_hex.strip_prefix("0x").unwrap_or(&chain_hex);
                let chain_id = u64::from_str_radix(stripped, 16)
                    .map_err(|e| EngineError::Internal(format!("bad chainId '{}': {}", chain_hex, e)))?;
                Ok(RpcMethod::SwitchChain { chain_id })
            }
            "wallet_addEthereumChain" => Ok(RpcMethod::AddChain(param(0))),
            "wallet_watchAsset" => Ok(RpcMethod::WatchAsset(params.clone())),
            "wallet_requestPermissions" => Ok(RpcMethod::RequestPermissions(param(0))),
            "wallet_getPermissions" => Ok(RpcMethod::GetPermissions),
            other => Err(EngineError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Scope gate for each method. Signing and chain-mutating calls need
    /// Full; the read surface rides on the session's implicit Basic.
    pub fn required_scope(&self) -> PermissionScope {
        match self {
            RpcMethod::SendTransaction(_)
            | RpcMethod::SignTransaction(_)
            | RpcMethod::Sign { .. }
            | RpcMethod::PersonalSign { .. }
            | RpcMethod::SignTypedData { .. }
            | RpcMethod::AddChain(_)
            | RpcMethod::WatchAsset(_) => PermissionScope::Full,
            RpcMethod::RequestAccounts
            | RpcMethod::Accounts
            | RpcMethod::ChainId
            | RpcMethod::SwitchChain { .. }
            | RpcMethod::RequestPermissions(_)
            | RpcMethod::GetPermissions => PermissionScope::Basic,
        }
    }
}

/// Method names advertised in session namespaces.
pub const SESSION_METHODS: &[&str] = &[
    "eth_sendTransaction",
    "eth_signTransaction",
    "eth_sign",
    "personal_sign",
    "eth_signTypedData",
];

/// Event names advertised in session namespaces.
pub const SESSION_EVENTS: &[&str] = &["chainChanged", "accountsChanged"];

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_method_is_unsupported() {
        let err = RpcMethod::parse("eth_coinbase", &json!([])).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedMethod(m) if m == "eth_coinbase"));
    }

    #[test]
    fn personal_sign_param_order() {
        let parsed = RpcMethod::parse("personal_sign", &json!(["0xdeadbeef", "0xabc0000000000000000000000000000000000abc"])).unwrap();
        assert_eq!(
            parsed,
            RpcMethod::PersonalSign {
                data: "0xdeadbeef".to_string(),
                address: "0xabc0000000000000000000000000000000000abc".to_string(),
            }
        );
    }

    #[test]
    fn switch_chain_parses_hex_chain_id() {
        let parsed =
            RpcMethod::parse("wallet_switchEthereumChain", &json!([{ "chainId": "0x89" }])).unwrap();
        assert_eq!(parsed, RpcMethod::SwitchChain { chain_id: 137 });
    }

    #[test]
    fn typed_data_accepts_stringified_payload() {
        let payload = json!({ "domain": {}, "types": {} });
        let parsed = RpcMethod::parse(
            "eth_signTypedData_v4",
            &json!(["0xabc0000000000000000000000000000000000abc", payload.to_string()]),
        )
        .unwrap();
        assert_eq!(
            parsed,
            RpcMethod::SignTypedData {
                address: "0xabc0000000000000000000000000000000000abc".to_string(),
                payload,
            }
        );
    }

    #[test]
    fn scope_table_gates_signing_behind_full() {
        for method in ["eth_sendTransaction", "eth_sign", "personal_sign", "wallet_watchAsset"] {
            let parsed = RpcMethod::parse(method, &json!(["0x0", "0x0"])).unwrap();
            assert_eq!(parsed.required_scope(), PermissionScope::Full, "{}", method);
        }
        for method in ["eth_accounts", "eth_chainId", "wallet_getPermissions"] {
            let parsed = RpcMethod::parse(method, &json!([])).unwrap();
            assert_eq!(parsed.required_scope(), PermissionScope::Basic, "{}", method);
        }
    }
}
