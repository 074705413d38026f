//! Agent front end for one instance
//!
//! - Per-session prompt queue: a prompt sent while the session is busy waits
//!   its turn instead of interleaving with the running one
//! - Cancellation token per session, also releasing pending permission prompts
//! - `UserPromptSubmit` hook gates every prompt before it is queued
//! - The model sits behind [`TurnRunner`]; tool calls go through
//!   [`ToolExecutor`]

mod executor;
mod runner;

pub use executor::{ToolCall, ToolExecutor};
pub use runner::{TurnRequest, TurnRunner, UnconfiguredRunner, UNCONFIGURED_REPLY};

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{HearthError, Result};
use crate::events::EventQueue;
use crate::hooks::{HookContext, HookEventType, HookExecutor};
use crate::mcp::{sync_tools, McpManager};
use crate::permission::PermissionService;
use crate::process::BackgroundManager;
use crate::proto::{
    AgentEvent, AgentEventType, AgentInfo, AgentMessage, AgentSession, EventKind, EventPayload,
    MessageRole,
};
use crate::session::{title_from_prompt, SessionStore};
use crate::tools::{ToolContext, ToolRegistry};

/// Shared services the agent needs
pub struct AgentServices {
    pub sessions: Arc<dyn SessionStore>,
    pub tools: Arc<ToolRegistry>,
    pub mcp: Arc<McpManager>,
    pub permissions: Arc<PermissionService>,
    pub background: BackgroundManager,
    pub hooks: HookExecutor,
    pub events: EventQueue,
    pub runner: Arc<dyn TurnRunner>,
}

#[derive(Default)]
struct SessionState {
    busy: bool,
    queue: VecDeque<AgentMessage>,
    cancel: CancellationToken,
}

pub struct Agent {
    working_dir: PathBuf,
    services: AgentServices,
    sessions: Mutex<HashMap<String, SessionState>>,
}

impl Agent {
    pub fn new(working_dir: impl Into<PathBuf>, services: AgentServices) -> Arc<Self> {
        Arc::new(Self {
            working_dir: working_dir.into(),
            services,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    fn publish(
        &self,
        event_type: AgentEventType,
        session_id: &str,
        message: Option<String>,
        error: Option<String>,
    ) {
        self.services.events.publish(
            EventKind::Updated,
            EventPayload::Agent(AgentEvent {
                event_type,
                session_id: session_id.to_string(),
                message,
                error,
            }),
        );
    }

    /// Queue a prompt. Runs immediately when the session is idle.
    ///
    /// A failing `UserPromptSubmit` hook rejects the prompt.
    pub async fn send(self: &Arc<Self>, message: AgentMessage) -> Result<()> {
        self.services.sessions.get(&message.session_id).await?;

        if self.services.hooks.has_hooks(HookEventType::UserPromptSubmit) {
            let ctx = HookContext::new(HookEventType::UserPromptSubmit, &self.working_dir)
                .with_session(&message.session_id)
                .with_prompt(&message.prompt);
            self.services
                .hooks
                .execute(HookEventType::UserPromptSubmit, &ctx, &CancellationToken::new())
                .await?;
        }

        let cancel = {
            let mut sessions = self.sessions.lock();
            let state = sessions.entry(message.session_id.clone()).or_default();
            if state.busy {
                info!(session = %message.session_id, queued = state.queue.len() + 1, "Session busy, prompt queued");
                state.queue.push_back(message);
                return Ok(());
            }
            state.busy = true;
            state.cancel = CancellationToken::new();
            state.cancel.clone()
        };

        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_session(message, cancel).await });
        Ok(())
    }

    async fn run_session(self: Arc<Self>, first: AgentMessage, first_cancel: CancellationToken) {
        let session_id = first.session_id.clone();
        let mut message = first;
        let mut cancel = first_cancel;

        loop {
            self.run_turn(&message, &cancel).await;

            let next = {
                let mut sessions = self.sessions.lock();
                let Some(state) = sessions.get_mut(&session_id) else {
                    break;
                };
                match state.queue.pop_front() {
                    Some(next) => {
                        if state.cancel.is_cancelled() {
                            state.cancel = CancellationToken::new();
                        }
                        cancel = state.cancel.clone();
                        Some(next)
                    }
                    None => {
                        state.busy = false;
                        None
                    }
                }
            };

            match next {
                Some(next) => message = next,
                None => break,
            }
        }

        self.publish(AgentEventType::Idle, &session_id, None, None);
    }

    async fn run_turn(&self, message: &AgentMessage, cancel: &CancellationToken) {
        let sid = message.session_id.as_str();
        let services = &self.services;
        self.publish(AgentEventType::Started, sid, Some(message.prompt.clone()), None);

        if let Err(e) = services
            .sessions
            .add_message(sid, MessageRole::User, &message.prompt, None)
            .await
        {
            self.publish(AgentEventType::Error, sid, None, Some(e.to_string()));
            return;
        }

        if let Ok(mut session) = services.sessions.get(sid).await {
            if session.title.is_empty() {
                session.title = title_from_prompt(&message.prompt);
                if let Err(e) = services.sessions.save(session).await {
                    warn!(session = %sid, "Failed to set session title: {}", e);
                }
            }
        }

        sync_tools(&services.tools, &services.mcp).await;

        let ctx = ToolContext::new(&self.working_dir, services.background.clone())
            .with_call(sid, "")
            .with_permissions(Arc::clone(&services.permissions))
            .with_cancel(cancel.clone());
        let executor = ToolExecutor::new(
            Arc::clone(&services.tools),
            services.hooks.clone(),
            Arc::clone(&services.sessions),
            ctx,
        );

        let request = TurnRequest {
            session_id: sid.to_string(),
            prompt: message.prompt.clone(),
            attachments: message.attachments.clone(),
            history: services.sessions.messages(sid).await.unwrap_or_default(),
            tools: executor.definitions().await,
        };

        let outcome = tokio::select! {
            res = services.runner.run_turn(request, &executor) => Some(res),
            _ = cancel.cancelled() => None,
        };

        match outcome {
            Some(Ok(reply)) => {
                if let Err(e) = services
                    .sessions
                    .add_message(sid, MessageRole::Assistant, &reply, None)
                    .await
                {
                    warn!(session = %sid, "Failed to record reply: {}", e);
                }
                self.publish(AgentEventType::Response, sid, Some(reply), None);
            }
            Some(Err(e)) => {
                warn!(session = %sid, "Turn failed: {:#}", e);
                self.publish(AgentEventType::Error, sid, None, Some(format!("{:#}", e)));
            }
            None => {
                info!(session = %sid, "Turn cancelled");
                self.publish(AgentEventType::Cancelled, sid, None, None);
            }
        }

        if services.hooks.has_hooks(HookEventType::Stop) {
            let ctx = HookContext::new(HookEventType::Stop, &self.working_dir).with_session(sid);
            if let Err(e) = services
                .hooks
                .execute(HookEventType::Stop, &ctx, &CancellationToken::new())
                .await
            {
                warn!(session = %sid, "Stop hook failed: {}", e);
            }
        }
    }

    /// Cancel the running turn and drop queued prompts. Returns whether a
    /// turn was running.
    pub fn cancel(&self, session_id: &str) -> bool {
        let was_busy = {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(session_id) {
                Some(state) => {
                    state.queue.clear();
                    if state.busy {
                        state.cancel.cancel();
                    }
                    state.busy
                }
                None => false,
            }
        };
        self.services.permissions.deny_session(session_id);
        if was_busy {
            info!(session = %session_id, "Session cancelled");
        }
        was_busy
    }

    /// Cancel every session (instance shutdown)
    pub fn cancel_all(&self) {
        let ids: Vec<String> = self.sessions.lock().keys().cloned().collect();
        for id in ids {
            self.cancel(&id);
        }
    }

    pub fn is_session_busy(&self, session_id: &str) -> bool {
        self.sessions
            .lock()
            .get(session_id)
            .is_some_and(|s| s.busy)
    }

    pub fn queued_prompts(&self, session_id: &str) -> Vec<String> {
        self.sessions
            .lock()
            .get(session_id)
            .map(|s| s.queue.iter().map(|m| m.prompt.clone()).collect())
            .unwrap_or_default()
    }

    pub fn clear_queue(&self, session_id: &str) {
        if let Some(state) = self.sessions.lock().get_mut(session_id) {
            state.queue.clear();
        }
    }

    pub fn info(&self) -> AgentInfo {
        let sessions = self.sessions.lock();
        AgentInfo {
            is_busy: sessions.values().any(|s| s.busy),
            is_ready: true,
            queued: sessions.values().map(|s| s.queue.len()).sum(),
        }
    }

    pub async fn session(&self, session_id: &str) -> Result<AgentSession> {
        let session = self.services.sessions.get(session_id).await?;
        let (is_busy, queued) = self
            .sessions
            .lock()
            .get(session_id)
            .map(|s| (s.busy, s.queue.len()))
            .unwrap_or((false, 0));
        Ok(AgentSession {
            session,
            is_busy,
            queued,
        })
    }

    /// Ask the runner for a summary and store it on the session
    pub async fn summarize(&self, session_id: &str) -> Result<String> {
        let services = &self.services;
        services.sessions.get(session_id).await?;
        if self.is_session_busy(session_id) {
            return Err(HearthError::SessionBusy(session_id.to_string()));
        }

        if services.hooks.has_hooks(HookEventType::PreCompact) {
            let ctx =
                HookContext::new(HookEventType::PreCompact, &self.working_dir).with_session(session_id);
            services
                .hooks
                .execute(HookEventType::PreCompact, &ctx, &CancellationToken::new())
                .await?;
        }

        let messages = services.sessions.messages(session_id).await?;
        let summary = services.runner.summarize(session_id, &messages).await?;

        let mut session = services.sessions.get(session_id).await?;
        session.summary = Some(summary.clone());
        services.sessions.save(session).await?;

        info!(session = %session_id, "Session summarized");
        self.publish(AgentEventType::Summarize, session_id, Some(summary.clone()), None);
        Ok(summary)
    }
}
