//! Session state — the per-identity aggregate of conversation and editor
//! state, plus the message and attachment types that make up the log.

pub mod types;

pub use types::*;
