//! JSON file storage for the target list.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::models::Target;
use super::{validate_targets, RegistryError};

/// Target file error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid target file: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] RegistryError),
}

/// Reads and writes a JSON array of targets.
#[derive(Debug, Clone)]
pub struct TargetStore {
    path: PathBuf,
}

impl TargetStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load targets. A missing file is an empty list.
    pub fn load(&self) -> Result<Vec<Target>, StoreError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if data.trim().is_empty() {
            return Ok(Vec::new());
        }

        let targets: Vec<Target> = serde_json::from_str(&data)?;
        validate_targets(&targets)?;
        Ok(targets)
    }

    /// Save targets, replacing the file atomically.
    pub fn save(&self, targets: &[Target]) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(targets)?;
        let tmp = self.path.with_extension("json.tmp");

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(&tmp, json).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}
