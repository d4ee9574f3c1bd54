//! Transform pipeline
//!
//! Every unit the host asks for passes through here: fetched under its
//! obfuscated name, remapped, patched by each routed declaration in load
//! order, finalized and cached. Concurrent requests for the same unit wait on
//! a single transformation.
//!
//! The first failed transformation ends the run. From then on every request
//! fails with [`LoaderError::Aborted`] without touching the source.

use crate::config::{LoaderConfig, Namespace};
use crate::context::LoaderContext;
use crate::error::LoaderError;
use crate::pool::WorkerPool;
use crate::source::{UnitSink, UnitSource};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, info_span};
use weft_bundle::discover_bundles;
use weft_unit::{Direction, MappingTable, PatchSession};

type CachedUnit = Arc<OnceCell<Arc<[u8]>>>;

/// First failure of a run
#[derive(Debug, Clone)]
struct Abort {
    unit: Option<String>,
    reason: String,
}

/// Patches host units on request
pub struct Pipeline {
    context: Arc<LoaderContext>,
    source: Arc<dyn UnitSource>,
    /// Canonical id to finished bytes
    cache: DashMap<String, CachedUnit>,
    aborted: OnceCell<Abort>,
}

impl Pipeline {
    pub fn new(context: Arc<LoaderContext>, source: Arc<dyn UnitSource>) -> Self {
        Self {
            context,
            source,
            cache: DashMap::new(),
            aborted: OnceCell::new(),
        }
    }

    /// Discover bundles under `bundle_dir`, build the run context and open a pipeline
    pub fn start(
        config: LoaderConfig,
        mappings: MappingTable,
        bundle_dir: &Path,
        source: Arc<dyn UnitSource>,
    ) -> Result<Self, LoaderError> {
        let discovered = discover_bundles(bundle_dir)?
            .into_iter()
            .map(|b| b.descriptor)
            .collect();
        let context = LoaderContext::initialize(config, mappings, discovered, source.as_ref())?;
        Ok(Self::new(Arc::new(context), source))
    }

    pub fn context(&self) -> &LoaderContext {
        &self.context
    }

    /// Whether a failure has ended the run
    pub fn is_aborted(&self) -> bool {
        self.aborted.get().is_some()
    }

    /// Finished bytes for `id`, named in `namespace`
    pub fn load(&self, id: &str, namespace: Namespace) -> Result<Arc<[u8]>, LoaderError> {
        self.check_aborted()?;
        let canonical = self.context.canonical_id(id, namespace);
        let cell = self
            .cache
            .entry(canonical.clone())
            .or_default()
            .value()
            .clone();
        cell.get_or_try_init(|| {
            // A waiter may retry after another thread's failure.
            self.check_aborted()?;
            self.transform(&canonical)
        })
        .cloned()
        .map_err(|e| self.fail(&canonical, e))
    }

    /// Finished bytes for `id`, named in the configured request namespace
    pub fn request(&self, id: &str) -> Result<Arc<[u8]>, LoaderError> {
        self.load(id, self.context.request_namespace())
    }

    /// Load `id` and hand it to the host under its canonical name
    pub fn deliver(
        &self,
        id: &str,
        namespace: Namespace,
        sink: &dyn UnitSink,
    ) -> Result<(), LoaderError> {
        self.check_aborted()?;
        let canonical = self.context.canonical_id(id, namespace);
        let bytes = self.load(&canonical, self.context.unit_namespace())?;
        sink.define(&canonical, bytes)?;
        Ok(())
    }

    /// [`deliver`](Self::deliver) with `id` in the configured request namespace
    pub fn deliver_requested(&self, id: &str, sink: &dyn UnitSink) -> Result<(), LoaderError> {
        self.deliver(id, self.context.request_namespace(), sink)
    }

    /// Patch every unit some declaration targets; returns how many were patched
    pub fn prepare(&self) -> Result<usize, LoaderError> {
        self.check_aborted()?;
        let _span = info_span!("prepare").entered();
        let namespace = self.context.unit_namespace();
        let units: Vec<String> = self
            .context
            .targeted_units()
            .into_iter()
            .map(str::to_string)
            .collect();

        let pool = WorkerPool::new(self.context.config().loader.workers);
        let patched = pool
            .run(units, |id| self.load(id, namespace).map(|bytes| bytes.len()))
            .map_err(|e| self.record(None, e))?;
        info!(units = patched.len(), workers = pool.worker_count(), "units prepared");
        Ok(patched.len())
    }

    /// Whether `id` has already been transformed
    pub fn is_cached(&self, id: &str, namespace: Namespace) -> bool {
        let canonical = self.context.canonical_id(id, namespace);
        self.cache
            .get(&canonical)
            .is_some_and(|cell| cell.get().is_some())
    }

    /// Number of transformed units
    pub fn cached_count(&self) -> usize {
        self.cache
            .iter()
            .filter(|entry| entry.value().get().is_some())
            .count()
    }

    fn check_aborted(&self) -> Result<(), LoaderError> {
        match self.aborted.get() {
            Some(abort) => Err(LoaderError::Aborted {
                unit: abort.unit.clone(),
                reason: abort.reason.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Decide whether a failed load ends the run
    ///
    /// A unit the host does not have is only fatal when bundles patch it.
    fn fail(&self, canonical: &str, error: LoaderError) -> LoaderError {
        match error {
            LoaderError::UnitNotFound(_) if self.context.routes_for(canonical).is_empty() => error,
            error => self.record(Some(canonical), error),
        }
    }

    /// Keep the first failure of the run
    fn record(&self, unit: Option<&str>, error: LoaderError) -> LoaderError {
        if matches!(error, LoaderError::Aborted { .. }) {
            return error;
        }
        let abort = Abort {
            unit: unit.map(str::to_string),
            reason: error.to_string(),
        };
        if self.aborted.set(abort).is_ok() {
            error!(unit = unit.unwrap_or("-"), error = %error, "run aborted");
        }
        error
    }

    fn transform(&self, canonical: &str) -> Result<Arc<[u8]>, LoaderError> {
        let _span = info_span!("patch_unit", unit = %canonical).entered();
        let stored = self.context.source_id(canonical);
        let raw = self
            .source
            .fetch(&stored)?
            .ok_or_else(|| LoaderError::UnitNotFound(canonical.to_string()))?;

        let mut session = PatchSession::new(stored, raw);
        session.parse()?;
        if self.context.config().loader.remap_units {
            session.remap(self.context.mappings(), Direction::ToIntermediate)?;
        }

        let routes = self.context.routes_for(canonical);
        for route in routes {
            session.apply(&route.bundle, &route.decl, self.context.bundles())?;
        }

        let bytes = session.finalize()?;
        debug!(unit = %canonical, patches = routes.len(), size = bytes.len(), "unit finalized");
        Ok(bytes)
    }
}
