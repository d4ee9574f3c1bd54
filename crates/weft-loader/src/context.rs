//! Run context: everything decided once before any unit is patched
//!
//! The context is built from the configuration, the mapping table and the
//! discovered bundles, and is then shared read-only by every worker.

use crate::config::{LoaderConfig, Namespace};
use crate::error::LoaderError;
use crate::host::{builtin_bundles, lookup_host_version, HostInfo};
use crate::source::UnitSource;
use rustc_hash::FxHashMap;
use tracing::{debug, info, info_span};
use weft_bundle::{BundleDescriptor, DependencyResolver, ResolvedBundles};
use weft_unit::{Direction, MappingTable, PatchDeclaration, PatchSession};

/// A declaration routed to the unit it targets
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    /// Bundle the declaration belongs to
    pub bundle: String,
    pub decl: PatchDeclaration,
}

/// Resolved state of one loader run
#[derive(Debug)]
pub struct LoaderContext {
    config: LoaderConfig,
    mappings: MappingTable,
    host: HostInfo,
    bundles: ResolvedBundles,
    /// Canonical unit id to its declarations, in load order
    routes: FxHashMap<String, Vec<Route>>,
}

impl LoaderContext {
    /// Look up the host version, resolve the bundle set and route patches
    pub fn initialize(
        config: LoaderConfig,
        mappings: MappingTable,
        discovered: Vec<BundleDescriptor>,
        source: &dyn UnitSource,
    ) -> Result<Self, LoaderError> {
        let _span = info_span!("initialize", host = %config.host.id).entered();

        let host = match &config.host.version {
            Some(raw) => HostInfo::configured(raw)?,
            None => read_host_info(&config, &mappings, source)?,
        };
        info!(host = %config.host.id, version = %host, "host identified");

        let mut bundles = builtin_bundles(&config, &host)?;
        bundles.extend(discovered);
        let bundles = DependencyResolver::new(bundles)?.resolve()?;
        info!(
            count = bundles.len(),
            order = %bundles.ids().collect::<Vec<_>>().join(", "),
            "bundles resolved"
        );

        let mut routes: FxHashMap<String, Vec<Route>> = FxHashMap::default();
        for (bundle, decl) in bundles.patches() {
            debug!(bundle, patch = %decl, "routing patch");
            routes.entry(decl.target.clone()).or_default().push(Route {
                bundle: bundle.to_string(),
                decl: decl.clone(),
            });
        }

        Ok(Self {
            config,
            mappings,
            host,
            bundles,
            routes,
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn mappings(&self) -> &MappingTable {
        &self.mappings
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    /// Bundles in load order
    pub fn bundles(&self) -> &ResolvedBundles {
        &self.bundles
    }

    /// Namespace that patch targets and delivered units are named in
    pub fn unit_namespace(&self) -> Namespace {
        if self.config.loader.remap_units {
            Namespace::Intermediate
        } else {
            Namespace::Obfuscated
        }
    }

    /// Namespace the host names its requests in
    pub fn request_namespace(&self) -> Namespace {
        self.config.loader.request_namespace
    }

    /// Declarations targeting `unit`, in load order
    pub fn routes_for(&self, unit: &str) -> &[Route] {
        self.routes.get(unit).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every unit some declaration targets, sorted
    pub fn targeted_units(&self) -> Vec<&str> {
        let mut units: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        units.sort_unstable();
        units
    }

    /// Name `id` (given in `namespace`) in the unit namespace
    pub fn canonical_id(&self, id: &str, namespace: Namespace) -> String {
        let target = self.unit_namespace();
        if namespace == target {
            id.to_string()
        } else {
            self.mappings.map_class(id, target.direction()).to_string()
        }
    }

    /// Name the host stores a canonical unit under
    pub fn source_id(&self, canonical: &str) -> String {
        match self.unit_namespace() {
            Namespace::Obfuscated => canonical.to_string(),
            Namespace::Intermediate => self
                .mappings
                .map_class(canonical, Direction::ToObfuscated)
                .to_string(),
        }
    }
}

/// Fetch the entry unit and read the version constant off it
fn read_host_info(
    config: &LoaderConfig,
    mappings: &MappingTable,
    source: &dyn UnitSource,
) -> Result<HostInfo, LoaderError> {
    let entry = &config.host.entrypoint;
    let stored = if config.loader.remap_units {
        mappings.map_class(entry, Direction::ToObfuscated)
    } else {
        entry.as_str()
    };

    let raw = source
        .fetch(stored)?
        .ok_or_else(|| LoaderError::UnitNotFound(entry.clone()))?;
    let mut session = PatchSession::new(stored, raw);
    session.parse()?;
    if config.loader.remap_units {
        session.remap(mappings, Direction::ToIntermediate)?;
    }
    match session.unit() {
        Some(unit) => lookup_host_version(unit),
        None => Err(LoaderError::UnitNotFound(entry.clone())),
    }
}
