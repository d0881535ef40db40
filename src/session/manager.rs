//! dApp session pairing and request servicing.
//!
//! A proposal moves Idle -> Proposed -> Approved -> Active, or to
//! Rejected. Active sessions service requests strictly in arrival order
//! per topic, and every request produces exactly one reply carrying its
//! request id, even when the handler fails internally.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

use crate::account::AccountStore;
use crate::error::{EngineError, CODE_INTERNAL};
use crate::events::{EventBus, WalletEvent};
use crate::session::methods::{RpcMethod, SESSION_EVENTS, SESSION_METHODS};
use crate::session::permissions::PermissionStore;

/// A chain-scoped capability grant inside a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub accounts: Vec<String>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

/// A capability request inside a proposal, keyed by namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProposalScope {
    pub chains: Vec<String>,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub events: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SessionProposal {
    pub id: String,
    pub origin: String,
    pub topic: String,
    pub required: BTreeMap<String, ProposalScope>,
    pub optional: BTreeMap<String, ProposalScope>,
}

/// An established pairing. Presence in the manager's session table is
/// what makes a session active; pending proposals live in their own
/// table and disconnection removes the entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub origin: String,
    pub topic: String,
    pub namespaces: BTreeMap<String, Namespace>,
    pub connected_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// Outward half of the pairing protocol. The engine participates in the
/// transport, it does not implement it.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn approve_proposal(
        &self,
        proposal_id: &str,
        namespaces: &BTreeMap<String, Namespace>,
    ) -> Result<(), EngineError>;

    async fn reject_proposal(&self, proposal_id: &str, code: i64, reason: &str);

    /// Deliver the single reply for a request id.
    async fn respond(&self, topic: &str, request_id: u64, result: Result<Value, (i64, String)>);

    async fn emit_event(&self, topic: &str, event: &str, data: Value);
}

struct PendingProposal {
    proposal: SessionProposal,
    received_at: Instant,
}

pub struct SessionManager {
    proposals: StdMutex<HashMap<String, PendingProposal>>,
    sessions: RwLock<HashMap<String, Session>>,
    topic_locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    proposal_timeout: Duration,
}

impl SessionManager {
    pub fn new(proposal_timeout: Duration) -> Self {
        Self {
            proposals: StdMutex::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            topic_locks: StdMutex::new(HashMap::new()),
            proposal_timeout,
        }
    }

    /// Validate a pairing URI and extract its topic. The URI body is
    /// otherwise opaque; the relay owns its meaning.
    pub fn parse_pairing_uri(uri: &str) -> Result<String, EngineError> {
        let body = uri
            .strip_prefix("wc:")
            .ok_or_else(|| EngineError::Internal(format!("not a pairing URI: {}", uri)))?;
        let topic = body.split('@').next().unwrap_or("");
        if topic.is_empty() {
            return Err(EngineError::Internal("pairing URI has no topic".to_string()));
        }
        Ok(topic.to_string())
    }

    /// Record an inbound proposal; it sits in Proposed until approved,
    /// rejected, or expired.
    pub fn handle_proposal(&self, proposal: SessionProposal) {
        log::info!("session proposal {} from {}", proposal.id, proposal.origin);
        self.proposals.lock().expect("proposal lock poisoned").insert(
            proposal.id.clone(),
            PendingProposal {
                proposal,
                received_at: Instant::now(),
            },
        );
    }

    /// Resolve namespaces for a proposal: required scopes first, optional
    /// merged only where the key is still absent, and a single-chain
    /// eip155:1 namespace synthesized from the primary account when
    /// nothing else resolves. The fallback is policy, kept so a bare
    /// proposal can still pair.
    fn resolve_namespaces(
        &self,
        proposal: &SessionProposal,
        accounts: &AccountStore,
    ) -> BTreeMap<String, Namespace> {
        let visible = accounts.list_visible();
        let mut namespaces = BTreeMap::new();

        for (key, scope) in proposal.required.iter().chain(proposal.optional.iter()) {
            if namespaces.contains_key(key) || !key.starts_with("eip155") {
                continue;
            }
            let mut tuples = Vec::new();
            for chain in &scope.chains {
                for account in &visible {
                    tuples.push(format!("{}:{}", chain, account.address));
                }
            }
            if tuples.is_empty() {
                continue;
            }
            let methods = if scope.methods.is_empty() {
                SESSION_METHODS.iter().map(|m| m.to_string()).collect()
            } else {
                scope.methods.clone()
            };
            let events = if scope.events.is_empty() {
                SESSION_EVENTS.iter().map(|e| e.to_string()).collect()
            } else {
                scope.events.clone()
            };
            namespaces.insert(
                key.clone(),
                Namespace {
                    accounts: tuples,
                    methods,
                    events,
                },
            );
        }

        if namespaces.is_empty() {
            if let Some(primary) = accounts.primary() {
                log::warn!(
                    "proposal {} resolved no namespaces, falling back to eip155:1",
                    proposal.id
                );
                namespaces.insert(
                    "eip155".to_string(),
                    Namespace {
                        accounts: vec![format!("eip155:1:{}", primary.address)],
                        methods: SESSION_METHODS.iter().map(|m| m.to_string()).collect(),
                        events: SESSION_EVENTS.iter().map(|e| e.to_string()).collect(),
                    },
                );
            }
        }
        namespaces
    }

    /// Approve a pending proposal: resolve namespaces, send them through
    /// the transport and wait for acknowledgment. An ack failure or
    /// timeout tears the pairing down and forwards a structured
    /// rejection to the proposer.
    pub async fn approve(
        &self,
        proposal_id: &str,
        accounts: &AccountStore,
        permissions: &PermissionStore,
        transport: &dyn SessionTransport,
        events: &EventBus,
    ) -> Result<Session, EngineError> {
        let pending = self
            .proposals
            .lock()
            .expect("proposal lock poisoned")
            .remove(proposal_id)
            .ok_or_else(|| EngineError::SessionNotFound(proposal_id.to_string()))?;

        if pending.received_at.elapsed() > self.proposal_timeout {
            log::info!("proposal {} expired before approval", proposal_id);
            return Err(EngineError::ProposalRejected {
                code: CODE_INTERNAL,
                reason: "proposal expired".to_string(),
            });
        }

        let proposal = pending.proposal;
        let namespaces = self.resolve_namespaces(&proposal, accounts);
        if namespaces.is_empty() {
            transport
                .reject_proposal(proposal_id, CODE_INTERNAL, "no accounts available")
                .await;
            return Err(EngineError::ProposalRejected {
                code: CODE_INTERNAL,
                reason: "no accounts available".to_string(),
            });
        }

        let ack = tokio::time::timeout(
            self.proposal_timeout,
            transport.approve_proposal(proposal_id, &namespaces),
        )
        .await;
        match ack {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let reason = e.to_string();
                transport.reject_proposal(proposal_id, CODE_INTERNAL, &reason).await;
                return Err(EngineError::ProposalRejected {
                    code: CODE_INTERNAL,
                    reason,
                });
            }
            Err(_) => {
                transport
                    .reject_proposal(proposal_id, CODE_INTERNAL, "acknowledgment timed out")
                    .await;
                return Err(EngineError::ProposalRejected {
                    code: CODE_INTERNAL,
                    reason: "acknowledgment timed out".to_string(),
                });
            }
        }

        let now = Utc::now();
        let session = Session {
            origin: proposal.origin.clone(),
            topic: proposal.topic.clone(),
            namespaces,
            connected_at: now,
            last_active: now,
        };
        self.sessions
            .write()
            .expect("session lock poisoned")
            .insert(session.topic.clone(), session.clone());
        permissions.connect(&session.origin);
        events.publish(WalletEvent::SessionConnected {
            origin: session.origin.clone(),
            topic: session.topic.clone(),
        });
        log::info!("session active: {} ({})", session.origin, session.topic);
        Ok(session)
    }

    /// Reject a pending proposal outright.
    pub async fn reject(
        &self,
        proposal_id: &str,
        code: i64,
        reason: &str,
        transport: &dyn SessionTransport,
    ) -> Result<(), EngineError> {
        let removed = self
            .proposals
            .lock()
            .expect("proposal lock poisoned")
            .remove(proposal_id);
        if removed.is_none() {
            return Err(EngineError::SessionNotFound(proposal_id.to_string()));
        }
        transport.reject_proposal(proposal_id, code, reason).await;
        Ok(())
    }

    /// Sweep proposals past the timeout. Called opportunistically; a
    /// stale proposal also rejects lazily at approval time.
    pub fn expire_stale_proposals(&self) -> usize {
        let mut proposals = self.proposals.lock().expect("proposal lock poisoned");
        let before = proposals.len();
        proposals.retain(|id, pending| {
            let keep = pending.received_at.elapsed() <= self.proposal_timeout;
            if !keep {
                log::info!("proposal {} expired", id);
            }
            keep
        });
        before - proposals.len()
    }

    /// Service one inbound request on an active session. Permission is
    /// checked before `dispatch` runs, so a denied request never reaches
    /// signing. Exactly one reply goes out regardless of outcome.
    pub async fn handle_request<F, Fut>(
        &self,
        topic: &str,
        request_id: u64,
        method: &str,
        params: &Value,
        permissions: &PermissionStore,
        transport: &dyn SessionTransport,
        dispatch: F,
    ) where
        F: FnOnce(RpcMethod) -> Fut,
        Fut: Future<Output = Result<Value, EngineError>>,
    {
        let lock = self.topic_lock(topic);
        let _guard = lock.lock().await;

        let outcome = self
            .authorize_and_dispatch(topic, method, params, permissions, dispatch)
            .await;
        let reply = outcome.map_err(|e| {
            log::warn!("request {} on {} failed: {}", request_id, topic, e);
            (e.protocol_code(), e.to_string())
        });
        transport.respond(topic, request_id, reply).await;
    }

    async fn authorize_and_dispatch<F, Fut>(
        &self,
        topic: &str,
        method: &str,
        params: &Value,
        permissions: &PermissionStore,
        dispatch: F,
    ) -> Result<Value, EngineError>
    where
        F: FnOnce(RpcMethod) -> Fut,
        Fut: Future<Output = Result<Value, EngineError>>,
    {
        let origin = {
            let mut sessions = self.sessions.write().expect("session lock poisoned");
            let session = sessions
                .get_mut(topic)
                .ok_or_else(|| EngineError::SessionNotFound(topic.to_string()))?;
            session.last_active = Utc::now();
            session.origin.clone()
        };

        let request = RpcMethod::parse(method, params)?;
        if !permissions.has(&origin, &request.required_scope()) {
            return Err(EngineError::PermissionDenied);
        }
        dispatch(request).await
    }

    /// Forward a chain change to every active session and the bus.
    pub async fn notify_chain_changed(
        &self,
        chain_id: u64,
        transport: &dyn SessionTransport,
        events: &EventBus,
    ) {
        let topics = self.active_topics();
        join_all(topics.iter().map(|topic| {
            transport.emit_event(topic, "chainChanged", Value::from(format!("{:#x}", chain_id)))
        }))
        .await;
        events.publish(WalletEvent::ChainChanged { chain_id });
    }

    /// Forward an account-set change to every active session and the bus.
    pub async fn notify_accounts_changed(
        &self,
        addresses: Vec<String>,
        transport: &dyn SessionTransport,
        events: &EventBus,
    ) {
        let topics = self.active_topics();
        join_all(
            topics
                .iter()
                .map(|topic| transport.emit_event(topic, "accountsChanged", serde_json::json!(addresses))),
        )
        .await;
        events.publish(WalletEvent::AccountsChanged { addresses });
    }

    /// Tear down a session and the origin's permissions. Idempotent;
    /// disconnecting an unknown topic is a no-op.
    pub fn disconnect(&self, topic: &str, permissions: &PermissionStore, events: &EventBus) {
        let removed = self
            .sessions
            .write()
            .expect("session lock poisoned")
            .remove(topic);
        self.topic_locks
            .lock()
            .expect("topic lock table poisoned")
            .remove(topic);
        if let Some(session) = removed {
            permissions.revoke_all(&session.origin);
            events.publish(WalletEvent::SessionDisconnected {
                origin: session.origin.clone(),
            });
            log::info!("session disconnected: {} ({})", session.origin, topic);
        } else {
            log::debug!("disconnect for unknown topic {}, ignoring", topic);
        }
    }

    pub fn get(&self, topic: &str) -> Option<Session> {
        self.sessions
            .read()
            .expect("session lock poisoned")
            .get(topic)
            .cloned()
    }

    pub fn list_active(&self) -> Vec<Session> {
        self.sessions
            .read()
            .expect("session lock poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn pending_proposals(&self) -> usize {
        self.proposals.lock().expect("proposal lock poisoned").len()
    }

    /// Drop every session and proposal without transport traffic. Used
    /// on logout.
    pub fn clear(&self) {
        self.sessions.write().expect("session lock poisoned").clear();
        self.proposals.lock().expect("proposal lock poisoned").clear();
        self.topic_locks.lock().expect("topic lock table poisoned").clear();
    }

    fn active_topics(&self) -> Vec<String> {
        self.sessions
            .read()
            .expect("session lock poisoned")
            .values()
            .map(|s| s.topic.clone())
            .collect()
    }

    fn topic_lock(&self, topic: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.topic_locks.lock().expect("topic lock table poisoned");
        locks
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
