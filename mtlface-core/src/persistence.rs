//! Crash-safe storage for weight files and checkpoint manifests.
//!
//! Every write lands in a `<name>.partial` sibling and is renamed into place,
//! so a rank killed mid-save never leaves a truncated safetensors file or
//! manifest behind.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crate::error::{MtlError, Result};

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}

/// Replace `path` with `bytes`, creating parent directories.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let partial = partial_path(path);
    std::fs::write(&partial, bytes)?;
    if let Err(e) = std::fs::rename(&partial, path) {
        let _ = std::fs::remove_file(&partial);
        return Err(e.into());
    }
    Ok(())
}

/// Serialize a manifest as pretty JSON and write it atomically.
pub fn write_manifest<T: Serialize>(path: &Path, manifest: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(manifest)?;
    write_atomic(path, &json)
}

/// Read a manifest; `Ok(None)` when none has been written yet.
pub fn read_manifest<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| MtlError::checkpoint(format!("corrupt manifest {}: {e}", path.display())))
}
