//! Target registry module.
//!
//! Holds the ordered target list the scheduler snapshots each tick, plus the
//! JSON file store used by the binary.

mod models;
mod store;

pub use models::*;
pub use store::*;

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

/// Target list validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate target id: {0}")]
    DuplicateId(String),
    #[error("target id must not be empty")]
    EmptyId,
}

/// Check that ids are present and unique.
pub fn validate_targets(targets: &[Target]) -> Result<(), RegistryError> {
    let mut seen = HashSet::with_capacity(targets.len());
    for target in targets {
        if target.id.is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if !seen.insert(target.id.as_str()) {
            return Err(RegistryError::DuplicateId(target.id.clone()));
        }
    }
    Ok(())
}

/// Thread-safe, snapshot-oriented target list.
///
/// Readers get an `Arc` of the whole list; a replace never mutates a snapshot
/// someone else is still holding.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: RwLock<Arc<Vec<Target>>>,
}

impl TargetRegistry {
    pub fn new(targets: Vec<Target>) -> Result<Self, RegistryError> {
        validate_targets(&targets)?;
        Ok(Self {
            targets: RwLock::new(Arc::new(targets)),
        })
    }

    /// Current list. Cheap: one `Arc` clone.
    pub fn snapshot(&self) -> Arc<Vec<Target>> {
        self.targets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the list, returning the previous one.
    pub fn replace(&self, targets: Vec<Target>) -> Result<Arc<Vec<Target>>, RegistryError> {
        validate_targets(&targets)?;
        let mut guard = self.targets.write().unwrap_or_else(PoisonError::into_inner);
        Ok(std::mem::replace(&mut *guard, Arc::new(targets)))
    }

    pub fn get(&self, id: &str) -> Option<Target> {
        self.snapshot().iter().find(|t| t.id == id).cloned()
    }

    pub fn endpoint_of(&self, id: &str) -> Option<Endpoint> {
        self.snapshot()
            .iter()
            .find(|t| t.id == id)
            .map(Target::endpoint)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot().iter().any(|t| t.id == id)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
