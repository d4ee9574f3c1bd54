//! Where host units come from and where patched units go

use rustc_hash::FxHashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// File extension of a unit stored on disk
pub const UNIT_EXTENSION: &str = "unit";

/// Errors raised by a unit source or sink
#[derive(Debug, Error)]
pub enum SourceError {
    /// Reading a unit failed
    #[error("Failed to read unit '{id}': {source}")]
    Io {
        id: String,
        #[source]
        source: std::io::Error,
    },

    /// Id cannot name a unit
    #[error("Invalid unit id: '{0}'")]
    InvalidId(String),

    /// Host refused a patched unit
    #[error("Host rejected unit '{id}': {reason}")]
    Rejected { id: String, reason: String },
}

/// Supplies the original bytes of host units
pub trait UnitSource: Send + Sync {
    /// Raw bytes for `id`, or `None` when the host has no such unit
    fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>, SourceError>;
}

/// Receives finished units on behalf of the host
pub trait UnitSink {
    fn define(&self, id: &str, bytes: Arc<[u8]>) -> Result<(), SourceError>;
}

impl<F> UnitSink for F
where
    F: Fn(&str, Arc<[u8]>) -> Result<(), SourceError>,
{
    fn define(&self, id: &str, bytes: Arc<[u8]>) -> Result<(), SourceError> {
        self(id, bytes)
    }
}

/// Units held in memory, keyed by id
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    units: FxHashMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, bytes: Vec<u8>) {
        self.units.insert(id.into(), bytes);
    }

    pub fn with_unit(mut self, id: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.insert(id, bytes);
        self
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl UnitSource for MemorySource {
    fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>, SourceError> {
        Ok(self.units.get(id).cloned())
    }
}

/// Units stored as `<root>/<id>.unit`, where `id` may contain `/`
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File a unit id maps to; ids may not leave the root
    pub fn unit_path(&self, id: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(id);
        let valid = !id.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(SourceError::InvalidId(id.to_string()));
        }
        let mut path = self.root.join(relative);
        path.as_mut_os_string().push(".");
        path.as_mut_os_string().push(UNIT_EXTENSION);
        Ok(path)
    }
}

impl UnitSource for DirectorySource {
    fn fetch(&self, id: &str) -> Result<Option<Vec<u8>>, SourceError> {
        let path = self.unit_path(id)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(SourceError::Io {
                id: id.to_string(),
                source,
            }),
        }
    }
}
