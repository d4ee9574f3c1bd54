//! What the loader knows about the host application
//!
//! The host advertises its version through a string constant on its entry
//! unit. That version, together with the loader's own, becomes a built-in
//! bundle so extension bundles can declare `host = ">=1.7.0"`.

use crate::config::{LoaderConfig, LOADER_BUNDLE_ID};
use crate::error::LoaderError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use tracing::debug;
use weft_bundle::{BundleDescriptor, SemverError, Version};
use weft_unit::unit::access;
use weft_unit::{ClassUnit, Insn, InvokeKind, MemberRef, PatchDeclaration, PatchOp};

/// Field on the entry unit holding the version string
pub const VERSION_FIELD: &str = "VERSION_STRING";

/// Descriptor of [`VERSION_FIELD`]
pub const STRING_DESCRIPTOR: &str = "Ljava/lang/String;";

const VERSION_PREFIX: &str = "Version ";

/// Host release spellings and their semver forms; first match wins
static RELEASE_SUFFIXES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"^([\w.-]+)rc(\d+)$", "${1}-rc.${2}"),
        (r"^([\w.-]+)a$", "${1}-alpha"),
        (r"^([\w.-]+)b$", "${1}-beta"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

/// Host version as read from its entry unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInfo {
    /// Normalized version
    pub version: Version,
    /// Version string as the host spells it
    pub raw_version: String,
    /// Class-format version of the entry unit; 0 when not read from a unit
    pub class_version: u32,
}

impl fmt::Display for HostInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.version, self.raw_version)
    }
}

impl HostInfo {
    /// Version given explicitly in the configuration
    pub fn configured(raw: &str) -> Result<Self, LoaderError> {
        Ok(Self {
            version: parse_host_version(raw)?,
            raw_version: raw.to_string(),
            class_version: 0,
        })
    }
}

/// Read the host version from the entry unit's `VERSION_STRING` constant
pub fn lookup_host_version(unit: &ClassUnit) -> Result<HostInfo, LoaderError> {
    let member = MemberRef::new(VERSION_FIELD, STRING_DESCRIPTOR);
    let field = unit.field(&member).ok_or_else(|| LoaderError::HostVersion {
        message: format!("{} has no field {}", unit.name, member),
        source: None,
    })?;

    let required = access::PUBLIC | access::STATIC | access::FINAL;
    if field.access & required != required {
        return Err(LoaderError::HostVersion {
            message: format!("{}.{} is not a public static final constant", unit.name, member),
            source: None,
        });
    }

    let text = field
        .constant
        .as_ref()
        .and_then(|c| c.as_str())
        .ok_or_else(|| LoaderError::HostVersion {
            message: format!("{}.{} has no string value", unit.name, member),
            source: None,
        })?;

    let raw_version = text.replacen(VERSION_PREFIX, "", 1);
    let version = parse_host_version(&raw_version)?;
    debug!(unit = %unit.name, raw = %raw_version, version = %version, "found host version");

    Ok(HostInfo {
        version,
        raw_version,
        class_version: unit.class_version,
    })
}

fn parse_host_version(raw: &str) -> Result<Version, LoaderError> {
    normalize_version(raw).map_err(|source| LoaderError::HostVersion {
        message: format!("'{}' is not a recognizable version", raw),
        source: Some(source),
    })
}

/// Turn a host release name into a semver version
///
/// `1.7rc2` becomes `1.7.0-rc.2`, `1.7a` becomes `1.7.0-alpha` and `1.7b`
/// becomes `1.7.0-beta`. Missing minor or patch numbers are taken as zero.
pub fn normalize_version(raw: &str) -> Result<Version, SemverError> {
    let raw = raw.trim();
    let mut text = raw.to_string();
    for (pattern, replacement) in RELEASE_SUFFIXES.iter() {
        if pattern.is_match(raw) {
            text = pattern.replace(raw, *replacement).into_owned();
            break;
        }
    }

    let (core, suffix) = match text.find(['-', '+']) {
        Some(at) => text.split_at(at),
        None => (text.as_str(), ""),
    };
    let padding = match core.split('.').count() {
        1 => ".0.0",
        2 => ".0",
        _ => "",
    };
    Version::parse(&format!("{}{}{}", core, padding, suffix))
}

/// Display name of the loader, as shown in the window title
pub const LOADER_NAME: &str = "Weft";

const STRING_CONCAT: &str = "(Ljava/lang/String;)Ljava/lang/String;";

/// Bundles present in every run: the host itself and the loader
pub fn builtin_bundles(
    config: &LoaderConfig,
    host: &HostInfo,
) -> Result<Vec<BundleDescriptor>, LoaderError> {
    let host_bundle = BundleDescriptor::new(config.host.id.clone(), host.version.clone())?
        .with_name("Host application")
        .with_entrypoint(config.host.entrypoint.clone());

    let loader_version = Version::parse(env!("CARGO_PKG_VERSION")).map_err(|source| {
        LoaderError::HostVersion {
            message: "loader version is not semver".to_string(),
            source: Some(source),
        }
    })?;
    let mut loader_bundle =
        BundleDescriptor::new(LOADER_BUNDLE_ID, loader_version)?.with_name(LOADER_NAME);
    for patch in entry_hook(config).into_iter().chain(title_banner(config, host)) {
        loader_bundle = loader_bundle.with_patch(patch);
    }

    Ok(vec![host_bundle, loader_bundle])
}

/// Declaration that starts the loader from inside the host's entry method
///
/// Constructs the entry unit and passes it to the configured hook right
/// before the anchor call.
pub fn entry_hook(config: &LoaderConfig) -> Option<PatchDeclaration> {
    let hook = config.hook.as_ref()?;
    let entry = config.host.entrypoint.as_str();

    Some(PatchDeclaration {
        target: entry.to_string(),
        op: PatchOp::InsertBefore {
            method: hook.method.clone(),
            anchor: hook.before.clone(),
            invoke: Some(hook.invoke),
            code: vec![
                Insn::New {
                    class: entry.to_string(),
                },
                Insn::Dup,
                Insn::invoke(InvokeKind::Special, entry, "<init>", "()V"),
                Insn::invoke(
                    InvokeKind::Static,
                    hook.call.owner.as_str(),
                    hook.call.member.name.as_str(),
                    hook.call.member.descriptor.as_str(),
                ),
            ],
        },
    })
}

/// Suffix appended to the host's window title
pub fn title_suffix(host: &HostInfo) -> String {
    format!(
        " {} - {} {}",
        host.raw_version,
        LOADER_NAME,
        env!("CARGO_PKG_VERSION")
    )
}

/// Declaration that appends [`title_suffix`] to the title passed to the setter
pub fn title_banner(config: &LoaderConfig, host: &HostInfo) -> Option<PatchDeclaration> {
    let title = config.title.as_ref()?;

    Some(PatchDeclaration {
        target: title.unit.clone(),
        op: PatchOp::InsertBefore {
            method: title.method.clone(),
            anchor: title.anchor.clone(),
            invoke: Some(title.invoke),
            code: vec![
                Insn::ConstStr {
                    value: title_suffix(host),
                },
                Insn::invoke(InvokeKind::Virtual, "java/lang/String", "concat", STRING_CONCAT),
            ],
        },
    })
}
