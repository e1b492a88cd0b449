#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::uninlined_format_args
)]

//! Resilient session core for a remote code-generation assistant.
//!
//! The host supplies the remote-call primitive and (optionally) a storage
//! backend; this crate supplies everything between a user action and a
//! durable, decoded conversation turn: bounded retry, cascading response
//! decoding, and quota-tolerant session persistence.

pub mod config;
pub mod decode;
pub mod notice;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod transport;

pub use config::Config;
pub use decode::{decode, decode_str, Decoded};
pub use notice::{CollectingSink, LogSink, Notice, NoticeSink, Severity};
pub use orchestrator::SessionOrchestrator;
pub use session::{Attachment, Message, Session};
pub use store::{FileStore, MemoryStore, SessionStore, StateStore, StoreError};
pub use transport::{RetryPolicy, RetryingTransport, ServiceCall, ServiceRequest};
