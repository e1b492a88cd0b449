//! Configuration — the session core's tunables, loadable from TOML.
//!
//! Every field has a serde default so a partial (or missing) config file
//! yields a fully usable configuration.

use crate::transport::RetryPolicy;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub assistant: AssistantConfig,

    #[serde(default)]
    pub reliability: ReliabilityConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub attachments: AttachmentsConfig,
}

/// Where prompts go: the remote domain and its operation names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssistantConfig {
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default = "default_send_operation")]
    pub send_operation: String,
    #[serde(default = "default_clear_operation")]
    pub clear_operation: String,
    #[serde(default = "default_sync_operation")]
    pub sync_operation: String,
    /// How many server-side messages a history sync requests.
    #[serde(default = "default_sync_limit")]
    pub sync_limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReliabilityConfig {
    /// Attempts per remote call before the failure propagates.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay (ms); the n-th retry waits `base * n`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl ReliabilityConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageConfig {
    /// Prefix for per-identity storage keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Messages kept on a normal save.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Messages kept when recovering from a quota failure.
    #[serde(default = "default_rotation_size")]
    pub rotation_size: usize,
    /// Quiet period after a code edit before the session is persisted.
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentsConfig {
    /// Largest accepted attachment body, in bytes.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Load from a TOML file, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("using default config: {err:#}");
                Self::default()
            }
        }
    }

    /// Platform config path (`<config dir>/config.toml`), if determinable.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "codedock")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

fn default_domain() -> String {
    "conversation".to_string()
}
fn default_send_operation() -> String {
    "send_prompt".to_string()
}
fn default_clear_operation() -> String {
    "clear_memory".to_string()
}
fn default_sync_operation() -> String {
    "sync_history".to_string()
}
fn default_sync_limit() -> u32 {
    50
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_key_prefix() -> String {
    "codedock_session".to_string()
}
fn default_max_history() -> usize {
    100
}
fn default_rotation_size() -> usize {
    20
}
fn default_save_debounce_ms() -> u64 {
    500
}
fn default_max_file_bytes() -> u64 {
    102_400
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            send_operation: default_send_operation(),
            clear_operation: default_clear_operation(),
            sync_operation: default_sync_operation(),
            sync_limit: default_sync_limit(),
        }
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            max_history: default_max_history(),
            rotation_size: default_rotation_size(),
            save_debounce_ms: default_save_debounce_ms(),
        }
    }
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
        }
    }
}
