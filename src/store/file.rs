//! File-backed [`StateStore`] — one JSON record per key under a directory.
//!
//! Keys come from external identities and may contain arbitrary characters;
//! they are percent-encoded into filenames so distinct identities can never
//! collide on disk. An optional byte budget makes capacity exhaustion an
//! explicit, testable condition instead of an eventual disk-full surprise.

use super::{StateStore, StoreError};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

pub struct FileStore {
    dir: PathBuf,
    byte_budget: Option<u64>,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            byte_budget: None,
        }
    }

    /// Reject writes larger than `bytes` with [`StoreError::QuotaExceeded`].
    pub fn with_byte_budget(mut self, bytes: u64) -> Self {
        self.byte_budget = Some(bytes);
        self
    }

    /// Platform data directory for this crate, if one can be determined.
    pub fn default_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "codedock")
            .map(|dirs| dirs.data_dir().to_path_buf())
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }
}

impl StateStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Backend(format!(
                "reading record for key {key}: {err}"
            ))),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(budget) = self.byte_budget {
            if value.len() as u64 > budget {
                return Err(StoreError::QuotaExceeded);
            }
        }

        fs::create_dir_all(&self.dir).map_err(|err| {
            StoreError::Backend(format!("creating store directory {}: {err}", self.dir.display()))
        })?;

        fs::write(self.path_for(key), value).map_err(|err| match err.kind() {
            ErrorKind::StorageFull | ErrorKind::QuotaExceeded | ErrorKind::FileTooLarge => {
                StoreError::QuotaExceeded
            }
            _ => StoreError::Backend(format!("writing record for key {key}: {err}")),
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Backend(format!(
                "removing record for key {key}: {err}"
            ))),
        }
    }
}

/// Percent-encode every byte outside `[A-Za-z0-9._-]`. Injective, so two
/// distinct keys always map to two distinct filenames.
fn sanitize_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-' => {
                out.push(byte as char);
            }
            other => {
                out.push('%');
                out.push_str(&format!("{other:02X}"));
            }
        }
    }
    out
}
