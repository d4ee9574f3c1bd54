//! Bundle manifest parsing (bundle.toml)
//!
//! A manifest names a bundle, its version and entry point, the bundles it
//! depends on or conflicts with, and the patches it applies to host units.

use crate::semver::{SemverError, Version, VersionReq};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use weft_unit::PatchDeclaration;

/// Errors that can occur during manifest parsing
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Failed to read manifest file
    #[error("Failed to read manifest file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse manifest: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid manifest: {0}")]
    ValidationError(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Version or constraint that does not parse
    #[error("Invalid {context}: {source}")]
    InvalidVersion {
        context: String,
        #[source]
        source: SemverError,
    },

    /// Bundle lists itself as a dependency
    #[error("Bundle '{0}' depends on itself")]
    SelfDependency(String),
}

/// A declared dependency on another bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub id: String,
    pub req: VersionReq,
    /// Optional dependencies are dropped when absent or unsatisfied
    pub optional: bool,
}

/// A bundle that must not be loaded alongside this one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub id: String,
    /// Versions of `id` that conflict
    pub req: VersionReq,
}

/// Parsed, validated bundle manifest
#[derive(Debug, Clone, PartialEq)]
pub struct BundleDescriptor {
    id: String,
    version: Version,
    name: Option<String>,
    description: Option<String>,
    authors: Vec<String>,
    entrypoint: Option<String>,
    dependencies: Vec<Dependency>,
    conflicts: Vec<Conflict>,
    patches: Vec<PatchDeclaration>,
}

#[derive(Deserialize)]
struct RawManifest {
    bundle: Option<RawBundle>,
    #[serde(default)]
    depends: BTreeMap<String, RawDependency>,
    #[serde(default)]
    recommends: BTreeMap<String, RawDependency>,
    #[serde(default)]
    patches: Vec<PatchDeclaration>,
}

#[derive(Deserialize)]
struct RawBundle {
    id: Option<String>,
    version: Option<String>,
    entrypoint: Option<String>,
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    authors: Vec<String>,
    conflicts: Option<RawConflicts>,
}

/// `conflicts = ["a", "b"]` or `conflicts = { a = "<2.0.0" }`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawConflicts {
    List(Vec<String>),
    Map(BTreeMap<String, String>),
}

/// `id = "^1.0"` or `id = { version = "^1.0", optional = true }`
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Simple(String),
    Detailed {
        version: Option<String>,
        #[serde(default)]
        optional: bool,
    },
}

impl RawDependency {
    fn version(&self) -> &str {
        match self {
            RawDependency::Simple(v) => v,
            RawDependency::Detailed { version, .. } => version.as_deref().unwrap_or("*"),
        }
    }
}

impl BundleDescriptor {
    /// Start a descriptor without a manifest (built-in bundles)
    pub fn new(id: impl Into<String>, version: Version) -> Result<Self, ManifestError> {
        let id = id.into();
        validate_id(&id, "bundle id")?;
        Ok(Self {
            id,
            version,
            name: None,
            description: None,
            authors: Vec::new(),
            entrypoint: None,
            dependencies: Vec::new(),
            conflicts: Vec::new(),
            patches: Vec::new(),
        })
    }

    /// Parse a manifest from raw bytes
    pub fn read(bytes: &[u8]) -> Result<Self, ManifestError> {
        let content = std::str::from_utf8(bytes)
            .map_err(|e| ManifestError::ValidationError(format!("manifest is not UTF-8: {}", e)))?;
        Self::from_str(content)
    }

    /// Parse a manifest from a file
    pub fn from_file(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read(path)?;
        Self::read(&content)
    }

    /// Parse a manifest from a string
    pub fn from_str(content: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = toml::from_str(content)?;
        let bundle = raw
            .bundle
            .ok_or_else(|| ManifestError::MissingField("bundle".to_string()))?;

        let id = bundle
            .id
            .ok_or_else(|| ManifestError::MissingField("bundle.id".to_string()))?;
        let version = bundle
            .version
            .ok_or_else(|| ManifestError::MissingField("bundle.version".to_string()))?;
        let version = Version::parse(&version).map_err(|source| ManifestError::InvalidVersion {
            context: format!("version of bundle '{}'", id),
            source,
        })?;

        let mut descriptor = Self::new(id, version)?;
        descriptor.name = bundle.name;
        descriptor.description = bundle.description;
        descriptor.authors = bundle.authors;
        descriptor.entrypoint = bundle.entrypoint;

        let required = raw.depends.iter().map(|(id, dep)| {
            let optional = matches!(dep, RawDependency::Detailed { optional: true, .. });
            (id, dep, optional)
        });
        let recommended = raw.recommends.iter().map(|(id, dep)| (id, dep, true));
        for (dep_id, dep, optional) in required.chain(recommended) {
            let req = parse_req(dep.version(), &descriptor.id, dep_id)?;
            descriptor = descriptor.with_dependency(dep_id.clone(), req, optional)?;
        }

        match bundle.conflicts {
            Some(RawConflicts::List(ids)) => {
                for conflict_id in ids {
                    descriptor = descriptor.with_conflict(conflict_id, VersionReq::any())?;
                }
            }
            Some(RawConflicts::Map(entries)) => {
                for (conflict_id, req) in entries {
                    let req = parse_req(&req, &descriptor.id, &conflict_id)?;
                    descriptor = descriptor.with_conflict(conflict_id, req)?;
                }
            }
            None => {}
        }

        for patch in raw.patches {
            descriptor = descriptor.with_patch(patch);
        }

        Ok(descriptor)
    }

    /// Add a dependency, merging with an earlier entry for the same id
    pub fn with_dependency(
        mut self,
        id: impl Into<String>,
        req: VersionReq,
        optional: bool,
    ) -> Result<Self, ManifestError> {
        let id = id.into();
        validate_id(&id, "dependency id")?;
        if id == self.id {
            return Err(ManifestError::SelfDependency(id));
        }

        match self.dependencies.iter_mut().find(|d| d.id == id) {
            // Contradictions are left for the resolver to report.
            Some(existing) => {
                existing.req = existing.req.intersect(&req);
                existing.optional = existing.optional && optional;
            }
            None => self.dependencies.push(Dependency { id, req, optional }),
        }
        Ok(self)
    }

    /// Declare a conflict with another bundle
    pub fn with_conflict(
        mut self,
        id: impl Into<String>,
        req: VersionReq,
    ) -> Result<Self, ManifestError> {
        let id = id.into();
        validate_id(&id, "conflict id")?;
        if id == self.id {
            return Err(ManifestError::ValidationError(format!(
                "Bundle '{}' conflicts with itself",
                id
            )));
        }
        self.conflicts.push(Conflict { id, req });
        Ok(self)
    }

    /// Add a patch declaration
    pub fn with_patch(mut self, patch: PatchDeclaration) -> Self {
        self.patches.push(patch);
        self
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the entry point unit
    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Display name, falling back to the id
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn authors(&self) -> &[String] {
        &self.authors
    }

    /// Unit the bundle's code starts from
    pub fn entrypoint(&self) -> Option<&str> {
        self.entrypoint.as_deref()
    }

    /// Dependencies in declaration order: `depends` before `recommends`
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn patches(&self) -> &[PatchDeclaration] {
        &self.patches
    }
}

fn parse_req(text: &str, bundle: &str, target: &str) -> Result<VersionReq, ManifestError> {
    VersionReq::parse(text).map_err(|source| ManifestError::InvalidVersion {
        context: format!("constraint on '{}' in bundle '{}'", target, bundle),
        source,
    })
}

fn validate_id(id: &str, what: &str) -> Result<(), ManifestError> {
    if is_valid_bundle_id(id) {
        Ok(())
    } else {
        Err(ManifestError::ValidationError(format!(
            "Invalid {}: '{}'. Must start with a letter or digit and contain only \
             alphanumeric characters, hyphens, and underscores",
            what, id
        )))
    }
}

/// Validate a bundle id (alphanumeric start, then alphanumerics, hyphens, underscores)
pub fn is_valid_bundle_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        }
        _ => false,
    }
}
