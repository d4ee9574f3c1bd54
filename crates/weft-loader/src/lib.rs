//! Weft loader
//!
//! Ties the bundle and unit crates together for one run:
//! 1. Read the loader configuration and the mapping table
//! 2. Identify the host version from its entry unit
//! 3. Discover and resolve bundles, with the host and loader as built-ins
//! 4. Patch host units on request, or eagerly across a worker pool
//!
//! The first failed patch ends the run; later requests fail with
//! [`LoaderError::Aborted`].
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use weft_loader::{DirectorySource, LoaderConfig, Namespace, Pipeline};
//! use weft_unit::MappingTable;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LoaderConfig::from_file(Path::new("weft.toml"))?;
//! let mappings = MappingTable::from_file(Path::new("mappings.tsv"))?;
//! let source = Arc::new(DirectorySource::new("host/units"));
//!
//! let pipeline = Pipeline::start(config, mappings, Path::new("bundles"), source)?;
//! pipeline.prepare()?;
//! let bytes = pipeline.load("main/MainApp", Namespace::Intermediate)?;
//! // Named in whichever namespace `loader.request_namespace` selects
//! let entry = pipeline.request("main/MainApp")?;
//! # let _ = (bytes, entry);
//! # Ok(())
//! # }
//! ```
//!
//! Logging goes through `tracing`; installing a subscriber is up to the host.

pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod pool;
pub mod source;

pub use config::{
    ConfigError, HookSettings, HostSettings, LoaderConfig, LoaderSettings, Namespace,
    TitleSettings, LOADER_BUNDLE_ID,
};
pub use context::{LoaderContext, Route};
pub use error::LoaderError;
pub use host::{
    builtin_bundles, entry_hook, lookup_host_version, normalize_version, title_banner,
    title_suffix, HostInfo, LOADER_NAME,
};
pub use pipeline::Pipeline;
pub use pool::WorkerPool;
pub use source::{DirectorySource, MemorySource, SourceError, UnitSink, UnitSource};
