//! Session state for the "chat with your repo" feature.
//!
//! The retrieval pipeline itself (file loading, embedding, vector index,
//! LLM) lives in an external provider behind the [`RepoRetrieval`] trait;
//! this module only manages the session-scoped conversation history, with an
//! explicit lifecycle: created on demand, cleared on reset, removed on end.

use crate::github::RepoId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// A source file handed to the provider for indexing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Document {
    pub path: String,
    pub text: String,
}

/// Opaque handle to an index built by the provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexHandle(pub String);

#[derive(Clone, Debug, Serialize)]
pub struct Answer {
    pub text: String,
}

/// Retrieval capability implemented by an external embedding/LLM provider.
#[async_trait]
pub trait RepoRetrieval: Send + Sync {
    async fn index(&self, documents: Vec<Document>) -> anyhow::Result<IndexHandle>;
    async fn query(&self, index: &IndexHandle, text: &str) -> anyhow::Result<Answer>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub repo: Option<RepoId>,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
    /// Handle to the provider-built index for this session, once indexing
    /// has happened.
    #[serde(skip)]
    pub index: Option<IndexHandle>,
}

/// Process-level store of chat sessions, keyed by session id. Scoped state
/// with an explicit lifecycle rather than ambient globals.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<Mutex<HashMap<Uuid, ChatSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, repo: Option<RepoId>) -> ChatSession {
        let session = ChatSession {
            id: Uuid::new_v4(),
            repo,
            created_at: Utc::now(),
            messages: Vec::new(),
            index: None,
        };
        self.inner
            .lock()
            .expect("session lock poisoned")
            .insert(session.id, session.clone());
        session
    }

    pub fn get(&self, id: Uuid) -> Option<ChatSession> {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .get(&id)
            .cloned()
    }

    /// Records the index handle for a session; `false` when the session
    /// does not exist.
    pub fn set_index(&self, id: Uuid, index: IndexHandle) -> bool {
        let mut sessions = self.inner.lock().expect("session lock poisoned");
        match sessions.get_mut(&id) {
            Some(session) => {
                session.index = Some(index);
                true
            }
            None => false,
        }
    }

    /// Appends a message; returns `None` when the session does not exist.
    pub fn append(&self, id: Uuid, role: Role, content: impl Into<String>) -> Option<ChatMessage> {
        let message = ChatMessage {
            role,
            content: content.into(),
            at: Utc::now(),
        };
        let mut sessions = self.inner.lock().expect("session lock poisoned");
        let session = sessions.get_mut(&id)?;
        session.messages.push(message.clone());
        Some(message)
    }

    /// Clears the history but keeps the session alive.
    pub fn reset(&self, id: Uuid) -> bool {
        let mut sessions = self.inner.lock().expect("session lock poisoned");
        match sessions.get_mut(&id) {
            Some(session) => {
                session.messages.clear();
                true
            }
            None => false,
        }
    }

    /// Ends the session, dropping its state entirely.
    pub fn end(&self, id: Uuid) -> bool {
        self.inner
            .lock()
            .expect("session lock poisoned")
            .remove(&id)
            .is_some()
    }
}
