//! Locating bundles on disk
//!
//! Every immediate subdirectory of the bundle directory that holds a
//! `bundle.toml` is one bundle. Directories without a manifest are skipped.

use crate::manifest::{BundleDescriptor, ManifestError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// File name of a bundle manifest
pub const MANIFEST_FILE: &str = "bundle.toml";

/// Errors that can occur while scanning for bundles
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Directory could not be listed
    #[error("Failed to scan bundle directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A manifest failed to parse
    #[error("Invalid bundle manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: ManifestError,
    },
}

/// A bundle found on disk
#[derive(Debug, Clone)]
pub struct DiscoveredBundle {
    /// Directory holding the bundle
    pub root: PathBuf,
    pub descriptor: BundleDescriptor,
}

/// Read `<dir>/*/bundle.toml`, in directory-name order
///
/// A missing directory holds no bundles.
pub fn discover_bundles(dir: &Path) -> Result<Vec<DiscoveredBundle>, DiscoveryError> {
    if !dir.exists() {
        debug!(dir = %dir.display(), "bundle directory does not exist");
        return Ok(Vec::new());
    }

    let io_error = |source: std::io::Error| DiscoveryError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut roots = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let entry = entry.map_err(io_error)?;
        let root = entry.path();
        if root.is_dir() && root.join(MANIFEST_FILE).is_file() {
            roots.push(root);
        }
    }
    roots.sort();

    let mut bundles = Vec::with_capacity(roots.len());
    for root in roots {
        let manifest = root.join(MANIFEST_FILE);
        let descriptor =
            BundleDescriptor::from_file(&manifest).map_err(|source| DiscoveryError::Manifest {
                path: manifest.clone(),
                source,
            })?;
        debug!(
            id = descriptor.id(),
            version = %descriptor.version(),
            root = %root.display(),
            "discovered bundle"
        );
        bundles.push(DiscoveredBundle { root, descriptor });
    }

    info!(dir = %dir.display(), count = bundles.len(), "bundle discovery finished");
    Ok(bundles)
}
