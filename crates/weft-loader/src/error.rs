//! Loader error type
//!
//! Every failure is fatal to the run; nothing here is retried. After the first
//! patch-phase failure the pipeline answers every request with
//! [`LoaderError::Aborted`].

use crate::config::ConfigError;
use crate::source::SourceError;
use thiserror::Error;
use weft_bundle::{DiscoveryError, ManifestError, ResolverError, SemverError};
use weft_unit::{MappingError, PatchError};

/// Errors that abort a loader run
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Loader configuration could not be read
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Mapping table failed to load
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// A bundle manifest is invalid
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Bundle directory could not be scanned
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Bundle set does not resolve
    #[error("Resolution failed: {0}")]
    Resolver(#[from] ResolverError),

    /// A patch could not be applied
    #[error("Patch failed: {0}")]
    Patch(#[from] PatchError),

    /// Host unit source or sink failed
    #[error("Unit source error: {0}")]
    Source(#[from] SourceError),

    /// Host has no unit with this id
    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    /// Host version could not be determined
    #[error("Cannot determine host version: {message}")]
    HostVersion {
        message: String,
        #[source]
        source: Option<SemverError>,
    },

    /// A worker thread died
    #[error("Worker failed: {0}")]
    Worker(String),

    /// An earlier failure ended the run
    #[error("Run aborted by an earlier failure: {reason}")]
    Aborted {
        /// Unit whose transformation failed, if the failure was tied to one
        unit: Option<String>,
        reason: String,
    },
}
