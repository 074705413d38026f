//! Session and message store
//!
//! The runtime only needs create/get/list/save plus message and file
//! history appends. The in-memory store below is what instances use unless
//! a persistent one is plugged in.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::{HearthError, Result};
use crate::events::EventQueue;
use crate::proto::{EventKind, EventPayload, HistoryFile, Message, MessageRole, Session};

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, title: &str) -> Result<Session>;
    async fn get(&self, id: &str) -> Result<Session>;
    /// Most recently updated first
    async fn list(&self) -> Result<Vec<Session>>;
    async fn save(&self, session: Session) -> Result<Session>;

    async fn add_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        tool_name: Option<&str>,
    ) -> Result<Message>;
    async fn messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// Record a new version of `path` for the session
    async fn add_file_version(&self, session_id: &str, path: &str, content: &str)
        -> Result<HistoryFile>;
    async fn history(&self, session_id: &str) -> Result<Vec<HistoryFile>>;
}

/// Title from the first line of a prompt, cut at a word boundary
pub fn title_from_prompt(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or("").trim();
    if first_line.chars().count() <= 50 {
        return first_line.to_string();
    }

    let first_50: String = first_line.chars().take(50).collect();
    if let Some(last_space) = first_50.rfind(char::is_whitespace) {
        let char_idx = first_50[..last_space].chars().count();
        if char_idx > 20 {
            let prefix: String = first_line.chars().take(char_idx).collect();
            return format!("{}...", prefix.trim_end());
        }
    }

    let truncated: String = first_line.chars().take(47).collect();
    format!("{}...", truncated)
}

#[derive(Default)]
struct Tables {
    sessions: HashMap<String, Session>,
    messages: HashMap<String, Vec<Message>>,
    files: HashMap<String, Vec<HistoryFile>>,
}

pub struct MemorySessionStore {
    tables: RwLock<Tables>,
    events: EventQueue,
}

impl MemorySessionStore {
    pub fn new(events: EventQueue) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            events,
        }
    }

    fn touch(&self, session_id: &str, messages: Option<usize>) -> Result<Session> {
        let session = {
            let mut tables = self.tables.write();
            let session = tables
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| HearthError::SessionNotFound(session_id.to_string()))?;
            session.updated_at = Utc::now();
            if let Some(count) = messages {
                session.message_count = count;
            }
            session.clone()
        };
        self.events
            .publish(EventKind::Updated, EventPayload::Session(session.clone()));
        Ok(session)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, title: &str) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.to_string(),
            message_count: 0,
            summary: None,
            created_at: now,
            updated_at: now,
        };
        self.tables
            .write()
            .sessions
            .insert(session.id.clone(), session.clone());
        tracing::debug!(id = %session.id, "Session created");
        self.events
            .publish(EventKind::Created, EventPayload::Session(session.clone()));
        Ok(session)
    }

    async fn get(&self, id: &str) -> Result<Session> {
        self.tables
            .read()
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| HearthError::SessionNotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Session>> {
        let mut sessions: Vec<Session> = self.tables.read().sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn save(&self, mut session: Session) -> Result<Session> {
        {
            let mut tables = self.tables.write();
            let existing = tables
                .sessions
                .get_mut(&session.id)
                .ok_or_else(|| HearthError::SessionNotFound(session.id.clone()))?;
            session.created_at = existing.created_at;
            session.updated_at = Utc::now();
            *existing = session.clone();
        }
        self.events
            .publish(EventKind::Updated, EventPayload::Session(session.clone()));
        Ok(session)
    }

    async fn add_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        tool_name: Option<&str>,
    ) -> Result<Message> {
        let message = Message {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            tool_name: tool_name.map(str::to_string),
            created_at: Utc::now(),
        };
        let count = {
            let mut tables = self.tables.write();
            if !tables.sessions.contains_key(session_id) {
                return Err(HearthError::SessionNotFound(session_id.to_string()));
            }
            let list = tables.messages.entry(session_id.to_string()).or_default();
            list.push(message.clone());
            list.len()
        };
        self.events
            .publish(EventKind::Created, EventPayload::Message(message.clone()));
        self.touch(session_id, Some(count))?;
        Ok(message)
    }

    async fn messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let tables = self.tables.read();
        if !tables.sessions.contains_key(session_id) {
            return Err(HearthError::SessionNotFound(session_id.to_string()));
        }
        Ok(tables.messages.get(session_id).cloned().unwrap_or_default())
    }

    async fn add_file_version(
        &self,
        session_id: &str,
        path: &str,
        content: &str,
    ) -> Result<HistoryFile> {
        let file = {
            let mut tables = self.tables.write();
            if !tables.sessions.contains_key(session_id) {
                return Err(HearthError::SessionNotFound(session_id.to_string()));
            }
            let files = tables.files.entry(session_id.to_string()).or_default();
            let version = files
                .iter()
                .filter(|f| f.path == path)
                .map(|f| f.version)
                .max()
                .map_or(0, |v| v + 1);
            let file = HistoryFile {
                id: uuid::Uuid::new_v4().to_string(),
                session_id: session_id.to_string(),
                path: path.to_string(),
                content: content.to_string(),
                version,
                created_at: Utc::now(),
            };
            files.push(file.clone());
            file
        };
        self.events
            .publish(EventKind::Created, EventPayload::File(file.clone()));
        Ok(file)
    }

    async fn history(&self, session_id: &str) -> Result<Vec<HistoryFile>> {
        let tables = self.tables.read();
        if !tables.sessions.contains_key(session_id) {
            return Err(HearthError::SessionNotFound(session_id.to_string()));
        }
        Ok(tables.files.get(session_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn messages_update_session_and_publish() {
        let events = EventQueue::new();
        let store = MemorySessionStore::new(events.clone());
        let session = store.create("first").await.unwrap();
        let mut rx = events.subscribe();

        store
            .add_message(&session.id, MessageRole::User, "hello", None)
            .await
            .unwrap();

        let msgs = store.messages(&session.id).await.unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(store.get(&session.id).await.unwrap().message_count, 1);

        assert!(matches!(
            rx.recv().await.unwrap().payload,
            EventPayload::Message(_)
        ));
        assert!(matches!(
            rx.recv().await.unwrap().payload,
            EventPayload::Session(_)
        ));
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let store = MemorySessionStore::new(EventQueue::new());
        assert!(store.get("missing").await.unwrap_err().is_not_found());
        assert!(store
            .add_message("missing", MessageRole::User, "x", None)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store.history("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn file_versions_increment_per_path() {
        let store = MemorySessionStore::new(EventQueue::new());
        let s = store.create("edit").await.unwrap();
        store.add_file_version(&s.id, "a.rs", "v0").await.unwrap();
        store.add_file_version(&s.id, "b.rs", "v0").await.unwrap();
        let again = store.add_file_version(&s.id, "a.rs", "v1").await.unwrap();
        assert_eq!(again.version, 1);
        assert_eq!(store.history(&s.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn save_keeps_creation_time() {
        let store = MemorySessionStore::new(EventQueue::new());
        let s = store.create("t").await.unwrap();
        let mut edited = s.clone();
        edited.summary = Some("short".into());
        edited.created_at = Utc::now() + chrono::Duration::days(1);
        let saved = store.save(edited).await.unwrap();
        assert_eq!(saved.created_at, s.created_at);
        assert_eq!(saved.summary.as_deref(), Some("short"));
    }

    #[test]
    fn titles_are_trimmed_at_word_boundaries() {
        assert_eq!(title_from_prompt("fix the build\nmore"), "fix the build");
        let long = "please refactor the background process manager so that it reaps tasks";
        let title = title_from_prompt(long);
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= 53);
    }
}
