//! Keyed local persistence with overflow rotation.
//!
//! Two layers: [`StateStore`] is the raw keyed string store (file-backed,
//! in-memory, or host-supplied), and [`SessionStore`] is the session-aware
//! layer on top — it truncates history, strips attachment bodies, and
//! recovers from quota exhaustion by rotating to a much smaller history
//! suffix before giving up.
//!
//! The error taxonomy matters: [`StoreError::QuotaExceeded`] drives the
//! rotation path, anything else is a plain backend failure.

pub mod file;

pub use file::FileStore;

use crate::notice::{Notice, NoticeSink};
use crate::session::{Message, Session};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Messages kept on a normal save.
pub const DEFAULT_MAX_HISTORY: usize = 100;
/// Messages kept when recovering from a quota failure.
pub const DEFAULT_ROTATION_SIZE: usize = 20;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend refused the write for capacity reasons. Recoverable by
    /// rotating to a smaller record.
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Raw keyed persistence. Writes are synchronous from the caller's
/// perspective; two distinct keys must never collide.
pub trait StateStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Shared handles delegate, so a backend can be observed from outside the
/// component that owns it.
impl<S: StateStore + ?Sized> StateStore for std::sync::Arc<S> {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).read(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).write(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

/// In-memory backend with an optional byte budget, for tests and for hosts
/// that persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    byte_budget: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes larger than `bytes` with [`StoreError::QuotaExceeded`].
    pub fn with_byte_budget(bytes: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            byte_budget: Some(bytes),
        }
    }
}

impl StateStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(budget) = self.byte_budget {
            if value.len() > budget {
                return Err(StoreError::QuotaExceeded);
            }
        }
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Session-aware persistence: truncation, attachment stripping, rotation on
/// quota exhaustion, defensive load.
pub struct SessionStore<S> {
    backend: S,
    max_history: usize,
    rotation_size: usize,
}

impl<S: StateStore> SessionStore<S> {
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            max_history: DEFAULT_MAX_HISTORY,
            rotation_size: DEFAULT_ROTATION_SIZE,
        }
    }

    /// Override the history caps. `rotation_size` is clamped below
    /// `max_history`.
    pub fn with_limits(mut self, max_history: usize, rotation_size: usize) -> Self {
        self.max_history = max_history.max(1);
        self.rotation_size = rotation_size.clamp(1, self.max_history);
        self
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    /// Persist `session` under `key`.
    ///
    /// History is truncated to the most recent `max_history` entries and
    /// attachment bodies are stripped before serializing. A quota failure is
    /// retried once with only the most recent `rotation_size` entries (and a
    /// "history trimmed" notice); if the reduced write also fails, a hard
    /// storage-full error notice is emitted and the failure returned. The
    /// in-memory session is never modified — only durability is at stake.
    pub fn save(
        &self,
        key: &str,
        session: &Session,
        sink: &dyn NoticeSink,
    ) -> Result<(), StoreError> {
        let record = serialize_tail(session, self.max_history)?;

        match self.backend.write(key, &record) {
            Ok(()) => Ok(()),
            Err(StoreError::QuotaExceeded) => {
                tracing::warn!(key, "storage quota exceeded, rotating chat history");
                let reduced = serialize_tail(session, self.rotation_size)?;
                match self.backend.write(key, &reduced) {
                    Ok(()) => {
                        sink.notify(Notice::warning("Chat history trimmed to save space."));
                        Ok(())
                    }
                    Err(err) => {
                        tracing::error!(key, "reduced write failed after rotation: {err}");
                        sink.notify(Notice::error("Storage full. Consider clearing the chat."));
                        Err(err)
                    }
                }
            }
            Err(err) => {
                tracing::error!(key, "session save failed: {err}");
                sink.notify(Notice::error("Failed to save state to local storage."));
                Err(err)
            }
        }
    }

    /// Load the session stored under `key`, or the empty default.
    ///
    /// Parsing is defensive: a record that is not an object, or any absent
    /// or malformed field, degrades to its type-appropriate empty default;
    /// malformed individual history entries are skipped rather than
    /// discarding the whole log.
    pub fn load(&self, key: &str, sink: &dyn NoticeSink) -> Session {
        match self.backend.read(key) {
            Ok(Some(raw)) => parse_record(&raw, sink),
            Ok(None) => Session::default(),
            Err(err) => {
                tracing::warn!(key, "session load failed: {err}");
                sink.notify(Notice::warning("Failed to load saved state."));
                Session::default()
            }
        }
    }

    /// Drop the persisted record for `key`, if any.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.backend.remove(key)
    }
}

/// Serialize the durable form of `session`, keeping only the most recent
/// `keep` history entries with attachment bodies replaced by their lengths.
fn serialize_tail(session: &Session, keep: usize) -> Result<String, StoreError> {
    let start = session.chat_history.len().saturating_sub(keep);
    let record = Session {
        chat_history: session.chat_history[start..]
            .iter()
            .map(Message::with_stripped_attachments)
            .collect(),
        current_code: session.current_code.clone(),
        send_on_enter: session.send_on_enter,
        is_code_user_modified: session.is_code_user_modified,
        previous_response_id: session.previous_response_id.clone(),
    };
    serde_json::to_string(&record).map_err(|e| StoreError::Backend(e.to_string()))
}

fn parse_record(raw: &str, sink: &dyn NoticeSink) -> Session {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!("stored session is not valid JSON: {err}");
            sink.notify(Notice::warning("Failed to load saved state."));
            return Session::default();
        }
    };

    let mut session = Session::default();

    if let Some(items) = value.get("chatHistory").and_then(Value::as_array) {
        for item in items {
            match serde_json::from_value::<Message>(item.clone()) {
                Ok(message) => session.chat_history.push(message),
                Err(err) => tracing::debug!("skipping malformed history entry: {err}"),
            }
        }
    }
    session.current_code = value
        .get("currentCode")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    session.send_on_enter = value
        .get("sendOnEnter")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    session.is_code_user_modified = value
        .get("isCodeUserModified")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    session.previous_response_id = value
        .get("previousResponseId")
        .and_then(Value::as_str)
        .map(str::to_string);

    session
}
