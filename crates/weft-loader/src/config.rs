//! Loader configuration (weft.toml)
//!
//! ```toml
//! [loader]
//! workers = 4
//! remap_units = true
//! request_namespace = "intermediate"
//!
//! [host]
//! id = "host"
//! entrypoint = "main/MainApp"
//!
//! [hook]
//! method = "main([Ljava/lang/String;)V"
//! before = "gameManaging/GameManager.init()V"
//! call = "weft/Hooks.init(Ljava/lang/Object;)V"
//!
//! [title]
//! unit = "basics/DisplayManager"
//! method = "createDisplay()V"
//! anchor = "org/lwjgl/opengl/Display.setTitle(Ljava/lang/String;)V"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use weft_bundle::is_valid_bundle_id;
use weft_unit::{Direction, InvokeKind, MemberRef, QualifiedRef};

/// Id of the bundle that stands for the loader itself
pub const LOADER_BUNDLE_ID: &str = "weft";

/// Errors that can occur while reading the configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid config: {0}")]
    ValidationError(String),
}

/// Naming scheme a unit id is written in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    /// Names as shipped in the host
    Obfuscated,
    /// Stable names from the mapping table
    #[default]
    Intermediate,
}

impl Namespace {
    /// Direction that translates a name into this namespace
    pub fn direction(self) -> Direction {
        match self {
            Namespace::Obfuscated => Direction::ToObfuscated,
            Namespace::Intermediate => Direction::ToIntermediate,
        }
    }
}

/// Complete loader configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub loader: LoaderSettings,
    pub host: HostSettings,
    /// Entry-point hook; absent means no hook is installed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook: Option<HookSettings>,

    /// Window title banner; absent leaves the title alone
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<TitleSettings>,
}

/// Pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSettings {
    /// Patch workers; 0 means one per CPU core
    pub workers: usize,

    /// Rewrite host units into the intermediate scheme before patching
    pub remap_units: bool,

    /// Namespace the host uses when requesting units
    pub request_namespace: Namespace,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            workers: 0,
            remap_units: true,
            request_namespace: Namespace::Intermediate,
        }
    }
}

/// Host application settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Bundle id bundles use to depend on the host
    pub id: String,

    /// Entry unit; carries the version string and receives the hook
    pub entrypoint: String,

    /// Host version; looked up from the entry unit when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            id: "host".to_string(),
            entrypoint: "main/MainApp".to_string(),
            version: None,
        }
    }
}

/// Call inserted into the host's startup method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookSettings {
    /// Method of the entry unit to patch
    pub method: MemberRef,

    /// Call the hook runs right before
    pub before: QualifiedRef,

    /// Static method receiving the constructed entry instance
    pub call: QualifiedRef,

    /// Dispatch kind of the anchor call
    #[serde(default = "static_invoke")]
    pub invoke: InvokeKind,
}

/// Host and loader versions appended to the window title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TitleSettings {
    /// Unit that sets the title
    pub unit: String,

    /// Method of `unit` that sets the title
    pub method: MemberRef,

    /// Title setter taking the title string
    pub anchor: QualifiedRef,

    /// Dispatch kind of the anchor call
    #[serde(default = "static_invoke")]
    pub invoke: InvokeKind,
}

fn static_invoke() -> InvokeKind {
    InvokeKind::Static
}

impl LoaderConfig {
    /// Parse a config from a file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a config from a string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: LoaderConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_bundle_id(&self.host.id) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid host id: {}",
                self.host.id
            )));
        }
        if self.host.id == LOADER_BUNDLE_ID {
            return Err(ConfigError::ValidationError(format!(
                "Host id '{}' is reserved for the loader",
                LOADER_BUNDLE_ID
            )));
        }
        if self.host.entrypoint.is_empty() {
            return Err(ConfigError::ValidationError(
                "Host entrypoint cannot be empty".to_string(),
            ));
        }
        if let Some(hook) = &self.hook {
            if !hook.method.is_method()
                || !hook.before.member.is_method()
                || !hook.call.member.is_method()
            {
                return Err(ConfigError::ValidationError(
                    "Hook method, anchor and call must all be method signatures".to_string(),
                ));
            }
            if hook.call.member.descriptor != "(Ljava/lang/Object;)V" {
                return Err(ConfigError::ValidationError(format!(
                    "Hook call {} must take the entry instance: (Ljava/lang/Object;)V",
                    hook.call
                )));
            }
        }
        if let Some(title) = &self.title {
            if title.unit.is_empty() || !title.method.is_method() {
                return Err(ConfigError::ValidationError(
                    "Title needs a unit and a method signature".to_string(),
                ));
            }
            if title.anchor.member.descriptor != "(Ljava/lang/String;)V" {
                return Err(ConfigError::ValidationError(format!(
                    "Title anchor {} must take the title: (Ljava/lang/String;)V",
                    title.anchor
                )));
            }
        }
        Ok(())
    }

    /// Effective number of patch workers
    ///
    /// If workers is 0, defaults to the number of CPU cores
    pub fn worker_count(&self) -> usize {
        if self.loader.workers == 0 {
            num_cpus::get()
        } else {
            self.loader.workers
        }
    }
}
