//! Weft bundle library
//!
//! This crate provides everything needed to decide which bundles load and in
//! which order:
//! - Semver version parsing and constraint matching
//! - Bundle manifest parsing (bundle.toml)
//! - Bundle discovery on disk
//! - Dependency resolution

pub mod discovery;
pub mod manifest;
pub mod resolver;
pub mod semver;

pub use discovery::{discover_bundles, DiscoveredBundle, DiscoveryError, MANIFEST_FILE};
pub use manifest::{is_valid_bundle_id, BundleDescriptor, Conflict, Dependency, ManifestError};
pub use resolver::{DependencyResolver, ResolvedBundles, ResolverError};
pub use semver::{Constraint, PartialVersion, SemverError, Version, VersionReq};
