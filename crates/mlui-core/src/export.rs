//! Serialized model artifacts on disk.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::backend::{Backend, BackendError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    Binary,
}

impl ExportFormat {
    pub fn name(self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Binary => "bin",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, ExportError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "bin" | "binary" => Ok(ExportFormat::Binary),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("unsupported export format `{0}` (expected json or bin)")]
    UnsupportedFormat(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// What was written by [`export`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportReceipt {
    pub path: PathBuf,
    pub format: ExportFormat,
    pub bytes: u64,
    /// SHA-256 of the file contents, lowercase hex.
    pub digest: String,
    pub exported_at: DateTime<Utc>,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Serialize `trained` and write it to `path`.
///
/// The bytes go to a temporary file in the destination directory which is
/// then renamed over `path`, so a failed export never leaves a partial file.
pub fn export<B: Backend>(
    backend: &B,
    trained: &B::Trained,
    path: &Path,
    format: ExportFormat,
) -> Result<ExportReceipt, ExportError> {
    let bytes = backend.serialize(trained, format)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(io_error(path))?;

    let mut tmp = NamedTempFile::new_in(&dir).map_err(io_error(path))?;
    tmp.write_all(&bytes).map_err(io_error(path))?;
    tmp.as_file().sync_all().map_err(io_error(path))?;
    tmp.persist(path).map_err(|e| io_error(path)(e.error))?;

    Ok(ExportReceipt {
        path: path.to_path_buf(),
        format,
        bytes: bytes.len() as u64,
        digest: hex::encode(Sha256::digest(&bytes)),
        exported_at: Utc::now(),
    })
}

/// Read an artifact written by [`export`] back through the backend.
pub fn load_artifact<B: Backend>(
    backend: &B,
    path: &Path,
    format: ExportFormat,
) -> Result<B::Trained, ExportError> {
    let bytes = fs::read(path).map_err(io_error(path))?;
    Ok(backend.load(&bytes, format)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::ScriptedBackend;

    #[test]
    fn test_format_names() {
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("BIN".parse::<ExportFormat>().unwrap(), ExportFormat::Binary);
        assert!(matches!(
            "onnx".parse::<ExportFormat>(),
            Err(ExportError::UnsupportedFormat(name)) if name == "onnx"
        ));
    }

    #[test]
    fn test_export_writes_file_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");
        let backend = ScriptedBackend::new();
        let receipt = export(&backend, &backend.trained(2), &path, ExportFormat::Json).unwrap();

        let written = fs::read(&path).unwrap();
        assert_eq!(receipt.bytes, written.len() as u64);
        assert_eq!(receipt.digest, hex::encode(Sha256::digest(&written)));
        assert_eq!(receipt.digest.len(), 64);

        let loaded = load_artifact(&backend, &path, ExportFormat::Json).unwrap();
        assert_eq!(loaded, backend.trained(2));
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory in the way of the destination makes the rename fail.
        let path = dir.path().join("model.json");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), b"x").unwrap();

        let backend = ScriptedBackend::new();
        let err = export(&backend, &backend.trained(1), &path, ExportFormat::Json).unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("model.json")]);
    }

    #[test]
    fn test_unsupported_backend_format() {
        let backend = ScriptedBackend::new();
        let dir = tempfile::tempdir().unwrap();
        let err = export(
            &backend,
            &backend.trained(1),
            &dir.path().join("m.bin"),
            ExportFormat::Binary,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ExportError::Backend(BackendError::UnsupportedFormat(_))
        ));
        assert!(!dir.path().join("m.bin").exists());
    }
}
