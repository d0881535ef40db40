//! Per-origin permission records.
//!
//! An origin that holds an active session implicitly has Basic scope.
//! Full and named Custom scopes are only ever granted through the
//! explicit upgrade flow, which parks the requesting call on a oneshot
//! until the user resolves it.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::EngineError;
use crate::events::{EventBus, WalletEvent};

/// What a dApp is allowed to ask the wallet to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "name", rename_all = "snake_case")]
pub enum PermissionScope {
    /// Read-only surface: accounts, chain id, balances.
    Basic,
    /// Signing and state-changing operations.
    Full,
    /// A named capability outside the two tiers.
    Custom(String),
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct OriginGrants {
    connected: bool,
    full: bool,
    custom: HashSet<String>,
}

struct PendingUpgrade {
    origin: String,
    scope: PermissionScope,
    reply: oneshot::Sender<bool>,
}

pub struct PermissionStore {
    grants: RwLock<HashMap<String, OriginGrants>>,
    pending: Mutex<HashMap<String, PendingUpgrade>>,
}

impl PermissionStore {
    pub fn new() -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Mark an origin as connected. Basic scope follows from this alone.
    pub fn connect(&self, origin: &str) {
        let mut grants = self.grants.write().expect("permission lock poisoned");
        grants.entry(origin.to_string()).or_default().connected = true;
    }

    /// Tear down every grant for the origin in one step. Idempotent.
    pub fn revoke_all(&self, origin: &str) {
        let mut grants = self.grants.write().expect("permission lock poisoned");
        grants.remove(origin);
    }

    pub fn revoke(&self, origin: &str, scope: &PermissionScope) {
        let mut grants = self.grants.write().expect("permission lock poisoned");
        if let Some(entry) = grants.get_mut(origin) {
            match scope {
                PermissionScope::Basic => entry.connected = false,
                PermissionScope::Full => entry.full = false,
                PermissionScope::Custom(name) => {
                    entry.custom.remove(name);
                }
            }
        }
    }

    /// Whether `origin` holds `scope`. Answers uniformly for known and
    /// unknown origins so callers cannot enumerate which origins exist.
    pub fn has(&self, origin: &str, scope: &PermissionScope) -> bool {
        let grants = self.grants.read().expect("permission lock poisoned");
        let Some(entry) = grants.get(origin) else {
            return false;
        };
        match scope {
            // Full subsumes Basic, so a direct Full grant answers Basic too.
            PermissionScope::Basic => entry.connected || entry.full,
            PermissionScope::Full => entry.full,
            PermissionScope::Custom(name) => entry.custom.contains(name),
        }
    }

    /// Grant without the interactive flow. Used when the user acts
    /// directly in the wallet UI rather than through a dApp request.
    pub fn grant(&self, origin: &str, scope: PermissionScope) {
        let mut grants = self.grants.write().expect("permission lock poisoned");
        let entry = grants.entry(origin.to_string()).or_default();
        match scope {
            PermissionScope::Basic => entry.connected = true,
            PermissionScope::Full => entry.full = true,
            PermissionScope::Custom(name) => {
                entry.custom.insert(name);
            }
        }
        log::info!("permission granted for origin {}", origin);
    }

    pub fn scopes_for(&self, origin: &str) -> Vec<PermissionScope> {
        let grants = self.grants.read().expect("permission lock poisoned");
        let Some(entry) = grants.get(origin) else {
            return Vec::new();
        };
        let mut scopes = Vec::new();
        if entry.connected {
            scopes.push(PermissionScope::Basic);
        }
        if entry.full {
            scopes.push(PermissionScope::Full);
        }
        let mut custom: Vec<_> = entry.custom.iter().cloned().collect();
        custom.sort();
        scopes.extend(custom.into_iter().map(PermissionScope::Custom));
        scopes
    }

    /// Start an upgrade request. The returned future resolves when the
    /// user approves or denies; denial and a dropped prompt both yield
    /// `PermissionDenied`.
    pub fn request_upgrade(
        &self,
        origin: &str,
        scope: PermissionScope,
        events: &EventBus,
    ) -> (String, oneshot::Receiver<bool>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending lock poisoned").insert(
            id.clone(),
            PendingUpgrade {
                origin: origin.to_string(),
                scope: scope.clone(),
                reply: tx,
            },
        );
        events.publish(WalletEvent::PermissionRequested {
            id: id.clone(),
            origin: origin.to_string(),
            scope: format!("{:?}", scope),
        });
        (id, rx)
    }

    /// Resolve a pending upgrade by id. On approval the grant is applied
    /// before the waiting request is released, so the request observes
    /// its new scope.
    pub fn resolve_request(
        &self,
        id: &str,
        approved: bool,
        events: &EventBus,
    ) -> Result<(), EngineError> {
        let pending = self
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(id)
            .ok_or_else(|| EngineError::SessionNotFound(format!("permission request {}", id)))?;

        if approved {
            self.grant(&pending.origin, pending.scope.clone());
            events.publish(WalletEvent::PermissionGranted {
                origin: pending.origin.clone(),
                scope: format!("{:?}", pending.scope),
            });
        }
        // Receiver may have given up already; that is not an error here.
        let _ = pending.reply.send(approved);
        Ok(())
    }

    /// Await an upgrade outcome, mapping denial and abandonment to the
    /// protocol's permission error.
    pub async fn await_upgrade(rx: oneshot::Receiver<bool>) -> Result<(), EngineError> {
        match rx.await {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(EngineError::PermissionDenied),
        }
    }
}

impl Default for PermissionStore {
    fn default() -> Self {
        Self::new()
    }
}
