// src/state/mod.rs
//! JSON state files. Both are rewritten wholesale; last writer wins.

pub mod digest_state;
pub mod fetch_state;

pub use digest_state::{DigestState, DigestStateStore, TrendSnapshot};
pub use fetch_state::{AttemptStatus, FetchState, FetchStateFile, FetchStateStore, Validator};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::Path;

/// Read a JSON file, falling back to `T::default()` when it is missing or corrupt.
pub(crate) fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    match fs::read_to_string(path) {
        Ok(s) => match serde_json::from_str(&s) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "state file unreadable, starting fresh");
                T::default()
            }
        },
        Err(_) => T::default(),
    }
}

/// Write via a sibling temp file and rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state dir {}", parent.display()))?;
        }
    }
    let json = serde_json::to_vec_pretty(value).context("serializing state")?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
