//! Session orchestration — builds requests, drives the retrying transport,
//! decodes replies, and keeps the durable session current.
//!
//! The orchestrator owns the [`Session`] value and composes the three core
//! pieces: transport, decoder, store. Everything user-visible goes through
//! the notice sink; rendering is the host's job.
//!
//! Concurrency model: one logical thread, suspension only at the remote
//! call, the retry backoff, and the debounced save. Overlapping sends are
//! gated by a plain boolean — a documented best-effort guard, not a lock —
//! and an issued call cannot be cancelled, only ignored.

use crate::config::{AssistantConfig, Config};
use crate::decode;
use crate::notice::{Notice, NoticeSink};
use crate::session::{now_rfc3339, rfc3339_from_unix_seconds, Attachment, Message, Session};
use crate::store::{SessionStore, StateStore};
use crate::transport::{RetryingTransport, ServiceCall, ServiceRequest};
use anyhow::Context;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Wire shape of a prompt turn.
#[derive(Debug, Serialize)]
struct PromptPayload<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachments: Option<&'a [Attachment]>,
}

pub struct SessionOrchestrator<C, S> {
    session: Session,
    transport: RetryingTransport<C>,
    store: SessionStore<S>,
    sink: Arc<dyn NoticeSink>,
    assistant: AssistantConfig,
    storage_key: String,
    user_id: Option<String>,
    max_attachment_bytes: u64,
    save_debounce: Duration,
    pending_attachments: Vec<Attachment>,
    in_flight: bool,
    code_dirty_since: Option<Instant>,
}

impl<C: ServiceCall, S: StateStore> SessionOrchestrator<C, S> {
    /// Compose the core around a remote-call primitive and a raw store.
    ///
    /// The storage key is derived from `user_id` so distinct identities
    /// never share a record; the previously persisted session (if any) is
    /// loaded immediately.
    pub fn new(
        call: C,
        backend: S,
        config: &Config,
        user_id: Option<String>,
        sink: Arc<dyn NoticeSink>,
    ) -> Self {
        let transport = RetryingTransport::new(call, config.reliability.policy());
        let store = SessionStore::new(backend)
            .with_limits(config.storage.max_history, config.storage.rotation_size);

        let storage_key = match &user_id {
            Some(id) => format!("{}_{}", config.storage.key_prefix, id),
            None => config.storage.key_prefix.clone(),
        };
        let session = store.load(&storage_key, sink.as_ref());

        Self {
            session,
            transport,
            store,
            sink,
            assistant: config.assistant.clone(),
            storage_key,
            user_id,
            max_attachment_bytes: config.attachments.max_file_bytes,
            save_debounce: Duration::from_millis(config.storage.save_debounce_ms),
            pending_attachments: Vec::new(),
            in_flight: false,
            code_dirty_since: None,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn pending_attachments(&self) -> &[Attachment] {
        &self.pending_attachments
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    // ── Prompt turn ──────────────────────────────────────────────

    /// Send a prompt (plus any staged attachments) to the assistant.
    ///
    /// A blank prompt with nothing staged is a no-op, as is a send while one
    /// is already in flight. Transport exhaustion does not propagate: the
    /// turn is recorded as an assistant error entry and an error notice, and
    /// the session still persists. `Err` is returned only when the request
    /// itself cannot be built.
    pub async fn send_prompt(&mut self, prompt: &str) -> anyhow::Result<()> {
        let prompt = prompt.trim();
        if prompt.is_empty() && self.pending_attachments.is_empty() {
            return Ok(());
        }
        if self.in_flight {
            self.sink
                .notify(Notice::warning("A request is already in flight."));
            return Ok(());
        }

        self.in_flight = true;
        let result = self.send_prompt_inner(prompt).await;
        self.in_flight = false;
        self.save();
        result
    }

    async fn send_prompt_inner(&mut self, prompt: &str) -> anyhow::Result<()> {
        let attachments = std::mem::take(&mut self.pending_attachments);
        let code = (self.session.is_code_user_modified && !self.session.current_code.is_empty())
            .then(|| self.session.current_code.clone());

        self.session.chat_history.push(Message::User {
            content: prompt.to_string(),
            code: code.clone(),
            attachments: attachments.clone(),
            timestamp: now_rfc3339(),
        });
        self.save();

        let payload = serde_json::to_value(PromptPayload {
            prompt,
            user_id: self.user_id.as_deref(),
            previous_response_id: self.session.previous_response_id.as_deref(),
            code: code.as_deref(),
            attachments: (!attachments.is_empty()).then_some(attachments.as_slice()),
        })
        .context("serializing prompt payload")?;

        let request = ServiceRequest::new(
            self.assistant.domain.clone(),
            self.assistant.send_operation.clone(),
            payload,
        );

        let sink = Arc::clone(&self.sink);
        let result = self.transport.call(&request, sink.as_ref()).await;

        match result {
            Ok(response) => {
                let decoded = decode::decode(&response, sink.as_ref());
                if !decoded.code.is_empty() {
                    self.session.current_code = decoded.code.clone();
                    self.session.is_code_user_modified = false;
                }
                if let Some(id) = response.get("previous_response_id").and_then(Value::as_str) {
                    self.session.previous_response_id = Some(id.to_string());
                }
                self.session
                    .chat_history
                    .push(Message::assistant(decoded.text, decoded.code));
            }
            Err(err) => {
                let text = format!("Error: {err:#}");
                tracing::error!("prompt delivery failed after retries: {err:#}");
                sink.notify(Notice::error(text.clone()));
                self.session.chat_history.push(Message::assistant(text, ""));
            }
        }

        Ok(())
    }

    // ── Clear ────────────────────────────────────────────────────

    /// Drop the conversation on both sides.
    ///
    /// The remote drop is fire-and-forget and best-effort: a failure only
    /// produces a warning notice. Local state is always reset and persisted.
    pub async fn clear(&mut self) {
        let sink = Arc::clone(&self.sink);

        let mut payload = serde_json::Map::new();
        if let Some(id) = &self.user_id {
            payload.insert("user_id".into(), Value::String(id.clone()));
        }
        let request = ServiceRequest::fire_and_forget(
            self.assistant.domain.clone(),
            self.assistant.clear_operation.clone(),
            Value::Object(payload),
        );

        if let Err(err) = self.transport.call(&request, sink.as_ref()).await {
            tracing::warn!("failed to clear assistant-side memory: {err:#}");
            sink.notify(Notice::warning(
                "Could not clear assistant memory. Cleared local state only.",
            ));
        }

        self.session.reset();
        self.pending_attachments.clear();
        self.code_dirty_since = None;
        self.save();
    }

    // ── History sync ─────────────────────────────────────────────

    /// Replace the local log with the server-side transcript.
    ///
    /// Assistant entries are re-run through the decode cascade (the server
    /// stores them in raw form); the most recent assistant code is adopted
    /// into the editor state. Returns the number of messages received.
    pub async fn sync_history(&mut self) -> anyhow::Result<usize> {
        let sink = Arc::clone(&self.sink);

        let mut payload = serde_json::Map::new();
        payload.insert("mode".into(), Value::String("code".into()));
        payload.insert("limit".into(), Value::from(self.assistant.sync_limit));
        if let Some(id) = &self.user_id {
            payload.insert("user_id".into(), Value::String(id.clone()));
        }
        let request = ServiceRequest::new(
            self.assistant.domain.clone(),
            self.assistant.sync_operation.clone(),
            Value::Object(payload),
        );

        let response = match self.transport.call(&request, sink.as_ref()).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!("history sync failed: {err:#}");
                sink.notify(Notice::error("Failed to sync chat history from the server."));
                return Err(err);
            }
        };

        let Some(entries) = response.get("messages").and_then(Value::as_array) else {
            return Ok(0);
        };

        let mut history = Vec::with_capacity(entries.len());
        for entry in entries {
            let timestamp = entry
                .get("timestamp")
                .and_then(Value::as_f64)
                .map(rfc3339_from_unix_seconds)
                .unwrap_or_else(now_rfc3339);

            if entry.get("role").and_then(Value::as_str) == Some("user") {
                history.push(Message::User {
                    content: entry
                        .get("content")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    code: None,
                    attachments: Vec::new(),
                    timestamp,
                });
            } else {
                let raw = entry.get("content").cloned().unwrap_or(Value::Null);
                let decoded = decode::decode(&raw, sink.as_ref());
                history.push(Message::Assistant {
                    text: decoded.text,
                    code: decoded.code,
                    timestamp,
                });
            }
        }

        let count = history.len();
        self.session.chat_history = history;
        if let Some(code) = self.session.last_assistant_code().map(str::to_string) {
            self.session.current_code = code;
            self.session.is_code_user_modified = false;
        }
        self.save();
        sink.notify(Notice::success(format!("Synced {count} messages.")));

        Ok(count)
    }

    // ── Attachments ──────────────────────────────────────────────

    /// Stage an attachment for the next send. Oversized files are rejected
    /// with an error notice.
    pub fn add_attachment(&mut self, attachment: Attachment) -> bool {
        if attachment.byte_len() > self.max_attachment_bytes {
            self.sink.notify(Notice::error(format!(
                "File is too large: {} (max {} KB)",
                attachment.filename,
                self.max_attachment_bytes / 1024
            )));
            return false;
        }
        self.pending_attachments.push(attachment);
        true
    }

    pub fn remove_attachment(&mut self, index: usize) -> Option<Attachment> {
        (index < self.pending_attachments.len()).then(|| self.pending_attachments.remove(index))
    }

    // ── Editor state ─────────────────────────────────────────────

    /// Record an editor buffer change and mark it user-modified. The write
    /// to storage is deferred; see [`Self::flush_pending_save`].
    pub fn edit_code(&mut self, code: impl Into<String>) {
        let code = code.into();
        if code == self.session.current_code {
            return;
        }
        self.session.current_code = code;
        self.session.is_code_user_modified = true;
        self.code_dirty_since = Some(Instant::now());
    }

    pub fn has_pending_save(&self) -> bool {
        self.code_dirty_since.is_some()
    }

    /// Suspend until the debounce deadline after the most recent edit, then
    /// persist once. A burst of edits moves the deadline, so the burst
    /// collapses into a single write. No-op when nothing is dirty.
    pub async fn flush_pending_save(&mut self) {
        let Some(since) = self.code_dirty_since else {
            return;
        };
        tokio::time::sleep_until(since + self.save_debounce).await;
        self.code_dirty_since = None;
        self.save();
    }

    /// Copy the code carried by a logged message back into the editor.
    pub fn adopt_code_from_history(&mut self, index: usize) -> bool {
        let Some(code) = self
            .session
            .chat_history
            .get(index)
            .and_then(Message::code)
            .map(str::to_string)
        else {
            return false;
        };
        self.session.current_code = code;
        self.session.is_code_user_modified = false;
        true
    }

    /// Empty the editor buffer without persisting.
    pub fn clear_editor(&mut self) {
        self.session.current_code.clear();
        self.session.is_code_user_modified = false;
    }

    pub fn toggle_send_on_enter(&mut self) {
        self.session.send_on_enter = !self.session.send_on_enter;
        self.save();
    }

    fn save(&self) {
        if let Err(err) = self
            .store
            .save(&self.storage_key, &self.session, self.sink.as_ref())
        {
            // Already surfaced through the sink; durability is lost, the
            // live session is not.
            tracing::debug!("session persistence failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notice::{CollectingSink, Severity};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticCall(Value);

    #[async_trait]
    impl ServiceCall for StaticCall {
        async fn invoke(&self, _request: &ServiceRequest) -> anyhow::Result<Value> {
            Ok(self.0.clone())
        }
    }

    fn orchestrator(
        response: Value,
        sink: Arc<CollectingSink>,
    ) -> SessionOrchestrator<StaticCall, MemoryStore> {
        SessionOrchestrator::new(
            StaticCall(response),
            MemoryStore::new(),
            &Config::default(),
            Some("user-1".into()),
            sink,
        )
    }

    #[test]
    fn storage_key_includes_identity() {
        let sink = Arc::new(CollectingSink::new());
        let orch = orchestrator(json!({}), sink);
        assert_eq!(orch.storage_key(), "codedock_session_user-1");
    }

    #[tokio::test]
    async fn blank_prompt_with_no_attachments_is_a_no_op() {
        let sink = Arc::new(CollectingSink::new());
        let mut orch = orchestrator(json!({}), Arc::clone(&sink));

        orch.send_prompt("   ").await.unwrap();
        assert!(orch.session().chat_history.is_empty());
        assert_eq!(sink.count(), 0);
    }

    #[tokio::test]
    async fn oversized_attachment_is_rejected() {
        let sink = Arc::new(CollectingSink::new());
        let mut orch = orchestrator(json!({}), Arc::clone(&sink));

        let huge = Attachment::new("huge.log", "x".repeat(200_000));
        assert!(!orch.add_attachment(huge));
        assert!(orch.pending_attachments().is_empty());

        let notices = sink.snapshot();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].severity, Severity::Error);
        assert!(notices[0].message.contains("huge.log"));

        assert!(orch.add_attachment(Attachment::new("small.txt", "ok")));
        assert_eq!(orch.pending_attachments().len(), 1);
        assert!(orch.remove_attachment(0).is_some());
        assert!(orch.remove_attachment(0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_save_coalesces_edits() {
        let sink = Arc::new(CollectingSink::new());
        let mut orch = orchestrator(json!({}), Arc::clone(&sink));

        orch.edit_code("rev 1");
        orch.edit_code("rev 2");
        assert!(orch.has_pending_save());
        assert!(orch.session().is_code_user_modified);

        let started = Instant::now();
        orch.flush_pending_save().await;
        assert_eq!(started.elapsed(), Duration::from_millis(500));
        assert!(!orch.has_pending_save());

        // The persisted record carries the final revision only.
        let stored = orch
            .store
            .load(&orch.storage_key, sink.as_ref());
        assert_eq!(stored.current_code, "rev 2");
    }

    #[tokio::test]
    async fn flush_without_edit_does_nothing() {
        let sink = Arc::new(CollectingSink::new());
        let mut orch = orchestrator(json!({}), sink);
        orch.flush_pending_save().await;
        assert!(!orch.has_pending_save());
    }

    #[test]
    fn adopt_code_from_history_resets_user_modified() {
        let sink = Arc::new(CollectingSink::new());
        let mut orch = orchestrator(json!({}), sink);

        orch.session.chat_history.push(Message::assistant("here", "code_v1"));
        orch.edit_code("user scribbles");

        assert!(orch.adopt_code_from_history(0));
        assert_eq!(orch.session().current_code, "code_v1");
        assert!(!orch.session().is_code_user_modified);

        // Entries without code are not adoptable.
        orch.session.chat_history.push(Message::user("question"));
        assert!(!orch.adopt_code_from_history(1));
    }

    #[test]
    fn clear_editor_keeps_history() {
        let sink = Arc::new(CollectingSink::new());
        let mut orch = orchestrator(json!({}), sink);

        orch.session.chat_history.push(Message::user("hello"));
        orch.edit_code("draft");
        orch.clear_editor();

        assert!(orch.session().current_code.is_empty());
        assert!(!orch.session().is_code_user_modified);
        assert_eq!(orch.session().chat_history.len(), 1);
    }
}
