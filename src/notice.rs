//! Advisory notices — the side-channel the core components use to report
//! degraded-but-recovered conditions (retries, decode fallbacks, trimmed
//! history) without turning them into errors.
//!
//! Only exhaustion of every recovery strategy propagates as a real error;
//! everything before that arrives here. The host decides how (and whether)
//! to surface notices; [`LogSink`] is the default and just forwards to
//! `tracing`.

use parking_lot::Mutex;

/// How loudly a notice should be surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// A single advisory message for the host to display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
}

impl Notice {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            message: message.into(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

/// Receiver for advisory notices.
///
/// Implementations must tolerate being called from any component at any
/// point in a turn; emitting a notice must never fail.
pub trait NoticeSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

/// Default sink — forwards notices to `tracing` at a matching level.
pub struct LogSink;

impl NoticeSink for LogSink {
    fn notify(&self, notice: Notice) {
        match notice.severity {
            Severity::Info | Severity::Success => tracing::info!("{}", notice.message),
            Severity::Warning => tracing::warn!("{}", notice.message),
            Severity::Error => tracing::error!("{}", notice.message),
        }
    }
}

/// Sink that records every notice, for assertions in tests and for hosts
/// that render notices themselves.
#[derive(Default)]
pub struct CollectingSink {
    notices: Mutex<Vec<Notice>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notices received so far, in order.
    pub fn drain(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock())
    }

    pub fn snapshot(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.notices.lock().len()
    }
}

impl NoticeSink for CollectingSink {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}
