//! Session buffer and recent-conversation repository
//!
//! One bounded in-memory buffer per active conversation; drained at session
//! end and handed to the consolidation pipeline. Durable persistence goes
//! through [`SessionStore`], which takes whole message sets in single
//! batched inserts.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::constants::DEFAULT_SESSION_CAPACITY;
use crate::errors::Result;

/// Speaker of a session message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single timestamped message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    pub fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded per-conversation message buffer.
///
/// Length and turn counts are answered under the lock without copying the
/// underlying deque; `messages()` is the only copying accessor.
pub struct SessionBuffer {
    messages: Mutex<VecDeque<SessionMessage>>,
    capacity: usize,
    /// Times the full-copy accessor ran; cheap queries must not move it
    copies: AtomicU64,
}

impl SessionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(2),
            copies: AtomicU64::new(0),
        }
    }

    /// Append a message, evicting the oldest past capacity
    pub fn push(&self, message: SessionMessage) {
        let mut messages = self.messages.lock();
        if messages.len() >= self.capacity {
            messages.pop_front();
        }
        messages.push_back(message);
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Conversation turns (user+assistant pairs), computed without copying
    pub fn turn_count(&self) -> usize {
        self.messages.lock().len() / 2
    }

    /// Clone out the full message set
    pub fn messages(&self) -> Vec<SessionMessage> {
        self.copies.fetch_add(1, Ordering::Relaxed);
        self.messages.lock().iter().cloned().collect()
    }

    /// Empty the buffer, returning its contents in order
    pub fn drain(&self) -> Vec<SessionMessage> {
        self.messages.lock().drain(..).collect()
    }

    /// Number of full-copy reads so far
    pub fn copy_count(&self) -> u64 {
        self.copies.load(Ordering::Relaxed)
    }
}

impl Default for SessionBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY)
    }
}

/// Compact view of a persisted session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub message_count: usize,
    /// First user message, truncated
    pub preview: String,
    pub archived: bool,
}

/// Combined session statistics, produced by one aggregate query
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub archived_sessions: usize,
    pub total_messages: usize,
}

/// Contract for durable session storage
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a full message set as one batched multi-row insert
    async fn save_session(&self, session_id: Uuid, messages: &[SessionMessage]) -> Result<usize>;

    /// Persist and mark archived, one batched insert
    async fn archive_session(&self, session_id: Uuid, messages: &[SessionMessage])
        -> Result<usize>;

    /// Most recent session summaries, newest first.
    ///
    /// Ordering comes from the storage layer; callers never re-sort.
    async fn recent_summaries(&self, limit: usize) -> Result<Vec<SessionSummary>>;

    /// One combined aggregate, never several sequential counts
    async fn get_stats(&self) -> Result<SessionStats>;
}

struct StoredSession {
    summary: SessionSummary,
    messages: Vec<SessionMessage>,
}

/// In-memory reference session store, insertion-ordered
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<Vec<StoredSession>>,
    /// Insert call counter, for batch-discipline assertions
    pub insert_calls: AtomicU64,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn store(&self, session_id: Uuid, messages: &[SessionMessage], archived: bool) -> usize {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        let preview = messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.chars().take(80).collect())
            .unwrap_or_default();
        let summary = SessionSummary {
            session_id,
            started_at: messages.first().map(|m| m.timestamp).unwrap_or(now),
            ended_at: messages.last().map(|m| m.timestamp).unwrap_or(now),
            message_count: messages.len(),
            preview,
            archived,
        };
        let count = messages.len();
        self.sessions.write().push(StoredSession {
            summary,
            messages: messages.to_vec(),
        });
        debug!(%session_id, count, archived, "MEM session persisted");
        count
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save_session(&self, session_id: Uuid, messages: &[SessionMessage]) -> Result<usize> {
        Ok(self.store(session_id, messages, false))
    }

    async fn archive_session(
        &self,
        session_id: Uuid,
        messages: &[SessionMessage],
    ) -> Result<usize> {
        Ok(self.store(session_id, messages, true))
    }

    async fn recent_summaries(&self, limit: usize) -> Result<Vec<SessionSummary>> {
        // Insertion order is chronological; newest-first is a reverse walk
        let sessions = self.sessions.read();
        Ok(sessions
            .iter()
            .rev()
            .take(limit)
            .map(|s| s.summary.clone())
            .collect())
    }

    async fn get_stats(&self) -> Result<SessionStats> {
        let sessions = self.sessions.read();
        let mut stats = SessionStats::default();
        for session in sessions.iter() {
            stats.total_sessions += 1;
            if session.summary.archived {
                stats.archived_sessions += 1;
            }
            stats.total_messages += session.messages.len();
        }
        Ok(stats)
    }
}
