//! Atomic JSON file persistence
//!
//! Durable writes follow the temp + fsync + rename discipline: the new
//! content lands in `<file>.tmp`, is flushed, then renamed over the target
//! so readers never observe a partial file.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::StateResult;

/// A typed JSON document persisted atomically at a fixed path
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, or `default` when the file does not exist yet
    pub fn load_or<T: DeserializeOwned>(&self, default: impl FnOnce() -> T) -> StateResult<T> {
        if !self.path.exists() {
            return Ok(default());
        }
        let bytes = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Persist the document atomically
    pub fn store<T: Serialize>(&self, value: &T) -> StateResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec_pretty(value)?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
