//! Permission service
//!
//! A tool that needs approval calls [`PermissionService::request`], which
//! publishes a `permission_request` event and parks on a oneshot until a
//! client answers through [`PermissionService::grant`].

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::error::{HearthError, Result};
use crate::events::EventQueue;
use crate::proto::{
    EventKind, EventPayload, PermissionAction, PermissionGrant, PermissionNotification,
    PermissionRequest,
};

/// What a tool is asking to do
#[derive(Debug, Clone)]
pub struct NewPermissionRequest {
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub action: String,
    pub description: String,
    pub params: Value,
    pub path: PathBuf,
}

struct Pending {
    request: PermissionRequest,
    reply: oneshot::Sender<bool>,
}

pub struct PermissionService {
    events: EventQueue,
    pending: Mutex<HashMap<String, Pending>>,
    /// `tool` or `tool:action` entries that never prompt
    allowed_tools: Vec<String>,
    auto_approved_sessions: RwLock<HashSet<String>>,
    /// (session, tool, action, path) approved with `allow_session`
    session_grants: RwLock<HashSet<(String, String, String, PathBuf)>>,
    skip: AtomicBool,
}

impl PermissionService {
    pub fn new(events: EventQueue, allowed_tools: Vec<String>, skip: bool) -> Self {
        Self {
            events,
            pending: Mutex::new(HashMap::new()),
            allowed_tools,
            auto_approved_sessions: RwLock::new(HashSet::new()),
            session_grants: RwLock::new(HashSet::new()),
            skip: AtomicBool::new(skip),
        }
    }

    pub fn skip(&self) -> bool {
        self.skip.load(Ordering::SeqCst)
    }

    pub fn set_skip(&self, skip: bool) {
        info!(skip, "Permission prompts {}", if skip { "disabled" } else { "enabled" });
        self.skip.store(skip, Ordering::SeqCst);
    }

    /// Every later request from `session_id` is allowed without prompting.
    pub fn auto_approve_session(&self, session_id: &str) {
        self.auto_approved_sessions
            .write()
            .insert(session_id.to_string());
    }

    fn preapproved(&self, req: &NewPermissionRequest) -> bool {
        if self.skip() {
            return true;
        }
        if self.auto_approved_sessions.read().contains(&req.session_id) {
            return true;
        }
        let scoped = format!("{}:{}", req.tool_name, req.action);
        if self
            .allowed_tools
            .iter()
            .any(|t| *t == req.tool_name || *t == scoped)
        {
            return true;
        }
        self.session_grants.read().contains(&(
            req.session_id.clone(),
            req.tool_name.clone(),
            req.action.clone(),
            req.path.clone(),
        ))
    }

    /// Wait for a decision. `Err(PermissionDenied)` on deny, or when the
    /// request is dropped without an answer.
    pub async fn request(&self, req: NewPermissionRequest) -> Result<()> {
        if self.preapproved(&req) {
            debug!(tool = %req.tool_name, action = %req.action, "Permission pre-approved");
            return Ok(());
        }

        let request = PermissionRequest {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: req.session_id,
            tool_call_id: req.tool_call_id,
            tool_name: req.tool_name,
            action: req.action,
            description: req.description,
            params: req.params,
            path: req.path,
        };

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            pending.retain(|_, p| !p.reply.is_closed());
            pending.insert(
                request.id.clone(),
                Pending {
                    request: request.clone(),
                    reply: tx,
                },
            );
        }

        info!(id = %request.id, tool = %request.tool_name, "Permission requested");
        self.events
            .publish(EventKind::Created, EventPayload::PermissionRequest(request));

        match rx.await {
            Ok(true) => Ok(()),
            _ => Err(HearthError::PermissionDenied),
        }
    }

    /// Answer a pending request
    pub fn grant(&self, grant: PermissionGrant) -> Result<()> {
        let pending = self
            .pending
            .lock()
            .remove(&grant.request_id)
            .ok_or_else(|| HearthError::PermissionRequestNotFound(grant.request_id.clone()))?;

        let granted = match grant.action {
            PermissionAction::Allow => true,
            PermissionAction::AllowSession => {
                let r = &pending.request;
                self.session_grants.write().insert((
                    r.session_id.clone(),
                    r.tool_name.clone(),
                    r.action.clone(),
                    r.path.clone(),
                ));
                true
            }
            PermissionAction::Deny => false,
        };

        info!(id = %grant.request_id, granted, "Permission answered");
        self.events.publish(
            EventKind::Updated,
            EventPayload::PermissionNotification(PermissionNotification {
                tool_call_id: pending.request.tool_call_id.clone(),
                granted,
                denied: !granted,
            }),
        );

        // Requester may have been cancelled meanwhile
        let _ = pending.reply.send(granted);
        Ok(())
    }

    /// Requests still waiting for an answer
    pub fn pending(&self) -> Vec<PermissionRequest> {
        self.pending
            .lock()
            .values()
            .filter(|p| !p.reply.is_closed())
            .map(|p| p.request.clone())
            .collect()
    }

    /// Deny everything `session_id` is waiting on
    pub fn deny_session(&self, session_id: &str) {
        self.pending
            .lock()
            .retain(|_, p| p.request.session_id != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn request(session: &str, tool: &str) -> NewPermissionRequest {
        NewPermissionRequest {
            session_id: session.into(),
            tool_call_id: "call-1".into(),
            tool_name: tool.into(),
            action: "execute".into(),
            description: "run something".into(),
            params: Value::Null,
            path: PathBuf::from("/work"),
        }
    }

    async fn next_request(rx: &mut crate::events::EventReceiver) -> PermissionRequest {
        loop {
            if let EventPayload::PermissionRequest(r) = rx.recv().await.unwrap().payload {
                return r;
            }
        }
    }

    #[tokio::test]
    async fn grant_allows_and_notifies() {
        let events = EventQueue::new();
        let svc = Arc::new(PermissionService::new(events.clone(), vec![], false));
        let mut rx = events.subscribe();

        let waiter = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.request(request("s1", "bash")).await })
        };

        let req = next_request(&mut rx).await;
        assert_eq!(svc.pending().len(), 1);
        svc.grant(PermissionGrant {
            request_id: req.id,
            action: PermissionAction::Allow,
        })
        .unwrap();

        assert!(waiter.await.unwrap().is_ok());
        match rx.recv().await.unwrap().payload {
            EventPayload::PermissionNotification(n) => {
                assert!(n.granted);
                assert_eq!(n.tool_call_id, "call-1");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn deny_returns_permission_denied() {
        let events = EventQueue::new();
        let svc = Arc::new(PermissionService::new(events.clone(), vec![], false));
        let mut rx = events.subscribe();

        let waiter = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.request(request("s1", "bash")).await })
        };
        let req = next_request(&mut rx).await;
        svc.grant(PermissionGrant {
            request_id: req.id,
            action: PermissionAction::Deny,
        })
        .unwrap();

        assert!(matches!(
            waiter.await.unwrap(),
            Err(HearthError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn allow_session_remembers_the_grant() {
        let events = EventQueue::new();
        let svc = Arc::new(PermissionService::new(events.clone(), vec![], false));
        let mut rx = events.subscribe();

        let waiter = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.request(request("s1", "bash")).await })
        };
        let req = next_request(&mut rx).await;
        svc.grant(PermissionGrant {
            request_id: req.id,
            action: PermissionAction::AllowSession,
        })
        .unwrap();
        waiter.await.unwrap().unwrap();

        // Same session, tool, action and path: no prompt
        svc.request(request("s1", "bash")).await.unwrap();
        assert!(svc.pending().is_empty());
    }

    #[tokio::test]
    async fn skip_and_allow_lists_short_circuit() {
        let svc = PermissionService::new(EventQueue::new(), vec!["read".into()], false);
        svc.request(request("s1", "read")).await.unwrap();

        svc.auto_approve_session("s2");
        svc.request(request("s2", "bash")).await.unwrap();

        svc.set_skip(true);
        assert!(svc.skip());
        svc.request(request("s3", "bash")).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let svc = PermissionService::new(EventQueue::new(), vec![], false);
        let err = svc
            .grant(PermissionGrant {
                request_id: "nope".into(),
                action: PermissionAction::Allow,
            })
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn deny_session_releases_waiters() {
        let events = EventQueue::new();
        let svc = Arc::new(PermissionService::new(events.clone(), vec![], false));
        let mut rx = events.subscribe();

        let waiter = {
            let svc = svc.clone();
            tokio::spawn(async move { svc.request(request("s1", "bash")).await })
        };
        next_request(&mut rx).await;
        svc.deny_session("s1");
        assert!(matches!(
            waiter.await.unwrap(),
            Err(HearthError::PermissionDenied)
        ));
    }
}
