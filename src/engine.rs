//! The engine value that owns all wallet state.
//!
//! Collaborating layers (UI, transport adapters) hold a `WalletEngine`
//! and go through its contract; nothing here is global. State mutations
//! publish on the event bus and persist through the keyed store.

use std::str::FromStr;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::account::{Account, AccountStore, Address, SeedSource, SignKind};
use crate::backup::{self, Backup, BackupVault};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EventBus, WalletEvent};
use crate::network::{Network, NetworkRegistry, ProviderRouter, Versioned};
use crate::session::{
    PermissionScope, PermissionStore, RpcMethod, SessionManager, SessionProposal, SessionTransport,
};
use crate::storage::{
    models::WalletData, CustomNetworks, HiddenWallets, Preferences, Storage, TxHistoryRecord,
    CUSTOM_NETWORKS, HIDDEN_WALLETS, PREFERENCES, TX_HISTORY, WALLET_DATA,
};
use crate::tx::{
    FeeSpeed, HistoryEntry, TransactionBuilder, TransferParams, TxHistory, TxStatus,
};

pub struct WalletEngine {
    config: EngineConfig,
    storage: Storage,
    accounts: Arc<AccountStore>,
    registry: Arc<NetworkRegistry>,
    router: Arc<ProviderRouter>,
    sessions: Arc<SessionManager>,
    permissions: Arc<PermissionStore>,
    history: Arc<TxHistory>,
    events: Arc<EventBus>,
    builder: TransactionBuilder,
}

impl WalletEngine {
    /// Bring the engine up from persisted state. Custom networks and
    /// history are reloaded; key material stays encrypted until unlock.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let storage = Storage::new_with_base_dir(config.storage_dir.clone());
        let registry = Arc::new(NetworkRegistry::new());

        let custom: CustomNetworks = storage.load_or_default(CUSTOM_NETWORKS)?;
        for network in custom.networks {
            registry.register(network)?;
        }

        let wallet_data: WalletData = storage.load_or_default(WALLET_DATA)?;
        let initial = if registry.get(&wallet_data.active_network).is_ok() {
            wallet_data.active_network.clone()
        } else {
            config.default_network.clone()
        };
        let router = Arc::new(ProviderRouter::new(&registry, &initial)?);

        let history = Arc::new(TxHistory::new());
        let persisted: TxHistoryRecord = storage.load_or_default(TX_HISTORY)?;
        history.import(persisted.by_address);

        let accounts = Arc::new(AccountStore::new());
        let events = Arc::new(EventBus::new());
        let builder = TransactionBuilder::new(
            router.clone(),
            accounts.clone(),
            history.clone(),
            events.clone(),
            config.large_amount_threshold,
        );

        log::info!("engine up, active network '{}'", initial);
        Ok(Self {
            sessions: Arc::new(SessionManager::new(config.proposal_timeout)),
            permissions: Arc::new(PermissionStore::new()),
            config,
            storage,
            accounts,
            registry,
            router,
            history,
            events,
            builder,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn networks(&self) -> &NetworkRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn permissions(&self) -> &PermissionStore {
        &self.permissions
    }

    pub fn transactions(&self) -> &TransactionBuilder {
        &self.builder
    }

    pub fn history(&self) -> &TxHistory {
        &self.history
    }

    // ---- accounts ----

    pub fn create_account(
        &self,
        source: Option<SeedSource>,
        display_name: &str,
        network_keys: Vec<String>,
    ) -> Result<Account, EngineError> {
        let account = self.accounts.create(source, display_name, network_keys)?;
        self.events.publish(WalletEvent::AccountCreated {
            address: account.address.to_string(),
        });
        self.persist_public_state()?;
        Ok(account)
    }

    pub fn list_accounts(&self) -> Vec<Account> {
        self.accounts.list()
    }

    pub fn list_visible_accounts(&self) -> Vec<Account> {
        self.accounts.list_visible()
    }

    pub fn hide_account(&self, address: &Address) -> Result<(), EngineError> {
        self.accounts.hide(address)?;
        self.events.publish(WalletEvent::AccountUpdated {
            address: address.to_string(),
        });
        self.persist_public_state()
    }

    pub fn show_account(&self, address: &Address) -> Result<(), EngineError> {
        self.accounts.show(address)?;
        self.events.publish(WalletEvent::AccountUpdated {
            address: address.to_string(),
        });
        self.persist_public_state()
    }

    pub fn rename_account(&self, address: &Address, name: &str) -> Result<(), EngineError> {
        self.accounts.rename(address, name)?;
        self.events.publish(WalletEvent::AccountUpdated {
            address: address.to_string(),
        });
        self.persist_public_state()
    }

    pub fn delete_account(&self, address: &Address) -> Result<(), EngineError> {
        self.accounts.delete(address)?;
        self.events.publish(WalletEvent::AccountDeleted {
            address: address.to_string(),
        });
        self.persist_public_state()
    }

    /// Associate an account with another network it can be used on.
    pub fn associate_network(&self, address: &Address, key: &str) -> Result<(), EngineError> {
        self.registry.get(key)?;
        self.accounts.associate_network(address, key)?;
        self.events.publish(WalletEvent::AccountUpdated {
            address: address.to_string(),
        });
        self.persist_public_state()
    }

    pub fn export_mnemonic(&self, address: &Address) -> Result<Option<String>, EngineError> {
        self.accounts.export_mnemonic(address)
    }

    // ---- vault & lifecycle ----

    /// Encrypt the account store under `password` and persist it as the
    /// wallet's vault, alongside a fresh password verifier.
    pub fn save_vault(&self, password: &str) -> Result<Backup, EngineError> {
        let vault = BackupVault::create(&self.accounts, password, &self.events)?;
        let mut data: WalletData = self.storage.load_or_default(WALLET_DATA)?;
        data.accounts = self.accounts.list();
        data.vault = Some(vault.clone());
        data.verifier = Some(backup::verifier_for(password));
        data.lock_timeout_secs = self.config.lock_timeout_secs;
        data.active_network = self.router.get_active().value.key;
        self.storage.save(WALLET_DATA, &data)?;
        Ok(vault)
    }

    /// Verify the password and decrypt the persisted vault into the
    /// account store.
    pub fn unlock(&self, password: &str) -> Result<usize, EngineError> {
        let data: WalletData = self.storage.load_or_default(WALLET_DATA)?;
        if let Some(verifier) = &data.verifier {
            if !backup::verify_password(password, verifier) {
                return Err(EngineError::DecryptionFailure);
            }
        }
        let vault = data
            .vault
            .ok_or_else(|| EngineError::Storage(crate::error::StorageError::RecordNotFound(
                "vault".to_string(),
            )))?;
        BackupVault::restore(&self.accounts, &vault, password)
    }

    /// Restore accounts from an externally held backup blob.
    pub fn restore_backup(&self, backup: &Backup, password: &str) -> Result<usize, EngineError> {
        let count = BackupVault::restore(&self.accounts, backup, password)?;
        self.persist_public_state()?;
        Ok(count)
    }

    /// Drop every in-memory secret and session. Persisted records,
    /// including the encrypted vault, stay on disk.
    pub fn logout(&self) {
        self.accounts.clear();
        self.sessions.clear();
        self.events.reset();
        log::info!("engine locked, in-memory state cleared");
    }

    /// Full reset: logout plus removal of all persisted records.
    pub fn reset(&self) -> Result<(), EngineError> {
        self.logout();
        self.history.clear();
        self.storage.clear()?;
        Ok(())
    }

    // ---- networks ----

    pub fn add_network(&self, network: Network) -> Result<Network, EngineError> {
        let registered = self.registry.register(network)?;
        if registered.custom {
            let custom = CustomNetworks {
                networks: self.registry.list_custom(),
            };
            self.storage.save(CUSTOM_NETWORKS, &custom)?;
        }
        self.events.publish(WalletEvent::NetworkRegistered {
            key: registered.key.clone(),
        });
        Ok(registered)
    }

    /// Switch the active network, persist the choice and notify both
    /// the bus and, when a transport is given, every active session.
    pub async fn switch_network(
        &self,
        key: &str,
        transport: Option<&dyn SessionTransport>,
    ) -> Result<Versioned<Network>, EngineError> {
        let switched = self.router.set_active(&self.registry, key)?;
        self.events.publish(WalletEvent::NetworkSwitched {
            key: switched.value.key.clone(),
            version: switched.version,
        });

        let mut data: WalletData = self.storage.load_or_default(WALLET_DATA)?;
        data.active_network = switched.value.key.clone();
        self.storage.save(WALLET_DATA, &data)?;

        if let Some(transport) = transport {
            self.sessions
                .notify_chain_changed(switched.value.chain_id, transport, &self.events)
                .await;
        }
        Ok(switched)
    }

    pub fn active_network(&self) -> Versioned<Network> {
        self.router.get_active()
    }

    // ---- preferences ----

    pub fn preferences(&self) -> Result<Preferences, EngineError> {
        Ok(self.storage.load_or_default(PREFERENCES)?)
    }

    pub fn set_preferences(&self, prefs: &Preferences) -> Result<(), EngineError> {
        Ok(self.storage.save(PREFERENCES, prefs)?)
    }

    // ---- transactions ----

    /// Send a transfer initiated from the wallet itself. The history
    /// record is persisted as soon as the broadcast succeeds, so it
    /// survives a restart even if the receipt is never polled.
    pub async fn send(&self, params: TransferParams) -> Result<HistoryEntry, EngineError> {
        let entry = self.builder.send(params).await?;
        self.persist_history()?;
        Ok(entry)
    }

    /// Poll a submitted transaction to a terminal status and persist
    /// the updated record.
    pub async fn wait_for_receipt(
        &self,
        from: &Address,
        hash: &str,
    ) -> Result<TxStatus, EngineError> {
        let status = self.builder.wait_for_receipt(from, hash).await?;
        self.persist_history()?;
        Ok(status)
    }

    // ---- sessions ----

    pub fn pair(&self, uri: &str) -> Result<String, EngineError> {
        SessionManager::parse_pairing_uri(uri)
    }

    pub fn handle_proposal(&self, proposal: SessionProposal) {
        self.sessions.handle_proposal(proposal);
    }

    pub async fn approve_session(
        &self,
        proposal_id: &str,
        transport: &dyn SessionTransport,
    ) -> Result<crate::session::Session, EngineError> {
        let session = self
            .sessions
            .approve(proposal_id, &self.accounts, &self.permissions, transport, &self.events)
            .await?;
        self.persist_sessions()?;
        Ok(session)
    }

    pub async fn reject_session(
        &self,
        proposal_id: &str,
        code: i64,
        reason: &str,
        transport: &dyn SessionTransport,
    ) -> Result<(), EngineError> {
        self.sessions.reject(proposal_id, code, reason, transport).await
    }

    pub fn disconnect_session(&self, topic: &str) -> Result<(), EngineError> {
        self.sessions.disconnect(topic, &self.permissions, &self.events);
        self.persist_sessions()
    }

    /// Service one inbound session request end to end: permission gate,
    /// dispatch, single reply.
    pub async fn handle_session_request(
        &self,
        topic: &str,
        request_id: u64,
        method: &str,
        params: &Value,
        transport: &dyn SessionTransport,
    ) {
        let origin = self.sessions.get(topic).map(|s| s.origin).unwrap_or_default();
        self.sessions
            .handle_request(
                topic,
                request_id,
                method,
                params,
                &self.permissions,
                transport,
                |request| self.dispatch(&origin, request, transport),
            )
            .await;
    }

    /// Handler behind the method table. Runs only after the session and
    /// permission gates have passed.
    async fn dispatch(
        &self,
        origin: &str,
        request: RpcMethod,
        transport: &dyn SessionTransport,
    ) -> Result<Value, EngineError> {
        match request {
            RpcMethod::RequestAccounts | RpcMethod::Accounts => {
                let addresses: Vec<String> = self
                    .accounts
                    .list_visible()
                    .into_iter()
                    .map(|a| a.address.to_string())
                    .collect();
                Ok(json!(addresses))
            }
            RpcMethod::ChainId => {
                let active = self.router.get_active();
                Ok(json!(format!("{:#x}", active.value.chain_id)))
            }
            RpcMethod::SendTransaction(params) => {
                let transfer = self.parse_transfer(&params)?;
                let entry = self.send(transfer).await?;
                Ok(json!(entry.hash))
            }
            RpcMethod::SignTransaction(params) => {
                let transfer = self.parse_transfer(&params)?;
                let raw = self.builder.sign_transfer(transfer).await?;
                Ok(json!(raw))
            }
            RpcMethod::Sign { address, data } | RpcMethod::PersonalSign { data, address } => {
                let address = Address::from_str(&address)?;
                let message = decode_message(&data);
                let signature = self
                    .accounts
                    .sign(&address, &message, SignKind::PersonalMessage)
                    .await?;
                Ok(json!(format!("0x{}", hex::encode(signature))))
            }
            RpcMethod::SignTypedData { address, payload } => {
                let address = Address::from_str(&address)?;
                let bytes = serde_json::to_vec(&payload)
                    .map_err(|e| EngineError::Internal(e.to_string()))?;
                let signature = self.accounts.sign(&address, &bytes, SignKind::TypedData).await?;
                Ok(json!(format!("0x{}", hex::encode(signature))))
            }
            RpcMethod::SwitchChain { chain_id } => {
                let network = self
                    .registry
                    .find_by_chain_id(chain_id)
                    .ok_or_else(|| EngineError::NetworkNotFound(format!("chain {}", chain_id)))?;
                self.switch_network(&network.key, Some(transport)).await?;
                Ok(Value::Null)
            }
            RpcMethod::AddChain(params) => {
                let network = parse_chain_params(&params)?;
                self.add_network(network)?;
                Ok(Value::Null)
            }
            RpcMethod::WatchAsset(_) => Ok(Value::Bool(true)),
            RpcMethod::RequestPermissions(params) => {
                // eth_accounts is satisfied by the session's implicit
                // Basic; anything else goes through the upgrade flow.
                let wants_more = params
                    .as_object()
                    .map(|o| o.keys().any(|k| k != "eth_accounts"))
                    .unwrap_or(false);
                if wants_more && !self.permissions.has(origin, &PermissionScope::Full) {
                    let (_, rx) =
                        self.permissions
                            .request_upgrade(origin, PermissionScope::Full, &self.events);
                    PermissionStore::await_upgrade(rx).await?;
                }
                Ok(json!(self.permissions.scopes_for(origin)))
            }
            RpcMethod::GetPermissions => Ok(json!(self.permissions.scopes_for(origin))),
        }
    }

    fn parse_transfer(&self, params: &Value) -> Result<TransferParams, EngineError> {
        let from = match params.get("from").and_then(Value::as_str) {
            Some(s) => Address::from_str(s)?,
            None => self
                .accounts
                .primary()
                .map(|a| a.address)
                .ok_or_else(|| EngineError::AccountNotFound("no visible account".to_string()))?,
        };
        let to = params
            .get("to")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::InvalidAddress("missing recipient".to_string()))
            .and_then(Address::from_str)?;
        let value_wei = match params.get("value").and_then(Value::as_str) {
            Some(hex) => crate::network::provider::parse_hex_u128(&json!(hex))?,
            None => 0,
        };
        let data = match params.get("data").and_then(Value::as_str) {
            Some(hex) => hex::decode(hex.strip_prefix("0x").unwrap_or(hex))
                .map_err(|e| EngineError::Internal(format!("bad calldata: {}", e)))?,
            None => Vec::new(),
        };
        let token = !data.is_empty();
        Ok(TransferParams {
            from,
            to,
            amount: value_wei as f64 / 1e18,
            value_wei,
            data,
            token,
            speed: FeeSpeed::Normal,
        })
    }

    // ---- persistence ----

    fn persist_public_state(&self) -> Result<(), EngineError> {
        let mut data: WalletData = self.storage.load_or_default(WALLET_DATA)?;
        data.accounts = self.accounts.list();
        data.active_network = self.router.get_active().value.key;
        self.storage.save(WALLET_DATA, &data)?;

        let hidden = HiddenWallets {
            addresses: self
                .accounts
                .list_hidden()
                .into_iter()
                .map(|a| a.address)
                .collect(),
        };
        self.storage.save(HIDDEN_WALLETS, &hidden)?;
        Ok(())
    }

    fn persist_sessions(&self) -> Result<(), EngineError> {
        let connections = crate::storage::DappConnections {
            sessions: self
                .sessions
                .list_active()
                .into_iter()
                .map(|s| (s.origin.clone(), s))
                .collect(),
        };
        self.storage.save(crate::storage::DAPP_CONNECTIONS, &connections)?;
        Ok(())
    }

    fn persist_history(&self) -> Result<(), EngineError> {
        let record = TxHistoryRecord {
            by_address: self.history.export(),
        };
        self.storage.save(TX_HISTORY, &record)?;
        Ok(())
    }
}

/// personal_sign data is usually 0x-hex; anything else is taken as the
/// literal message bytes.
fn decode_message(data: &str) -> Vec<u8> {
    if let Some(stripped) = data.strip_prefix("0x") {
        if let Ok(bytes) = hex::decode(stripped) {
            return bytes;
        }
    }
    data.as_bytes().to_vec()
}

fn parse_chain_params(params: &Value) -> Result<Network, EngineError> {
    let chain_hex = params
        .get("chainId")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::InvalidNetwork("missing chainId".to_string()))?;
    let chain_id = u64::from_str_radix(chain_hex.strip_prefix("0x").unwrap_or(chain_hex), 16)
        .map_err(|e| EngineError::InvalidNetwork(format!("bad chainId: {}", e)))?;
    let name = params
        .get("chainName")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let rpc_url = params
        .get("rpcUrls")
        .and_then(Value::as_array)
        .and_then(|urls| urls.first())
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let symbol = params
        .get("nativeCurrency")
        .and_then(|c| c.get("symbol"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let explorer = params
        .get("blockExplorerUrls")
        .and_then(Value::as_array)
        .and_then(|urls| urls.first())
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(Network {
        key: String::new(),
        name,
        chain_id,
        rpc_url,
        symbol,
        explorer,
        testnet: false,
        custom: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_engine() -> (TempDir, WalletEngine) {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            storage_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        (dir, WalletEngine::new(config).unwrap())
    }

    #[test]
    fn engine_starts_on_default_network() {
        let (_dir, engine) = test_engine();
        assert_eq!(engine.active_network().value.key, "ethereum");
    }

    #[test]
    fn chain_params_parse_add_chain_request() {
        let params = json!({
            "chainId": "0x2105",
            "chainName": "Base",
            "rpcUrls": ["https://mainnet.base.org"],
            "nativeCurrency": { "name": "Ether", "symbol": "ETH", "decimals": 18 },
            "blockExplorerUrls": ["https://basescan.org"],
        });
        let network = parse_chain_params(&params).unwrap();
        assert_eq!(network.chain_id, 8453);
        assert_eq!(network.rpc_url, "https://mainnet.base.org");
        assert!(network.custom);
    }

    #[test]
    fn message_decoding_prefers_hex() {
        assert_eq!(decode_message("0x68656c6c6f"), b"hello");
        assert_eq!(decode_message("plain text"), b"plain text");
        // Malformed hex falls back to literal bytes.
        assert_eq!(decode_message("0xzz"), b"0xzz");
    }
}
