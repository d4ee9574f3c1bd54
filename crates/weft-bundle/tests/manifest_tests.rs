//! Integration tests for bundle manifest parsing
//!
//! Tests the BundleDescriptor reader with realistic bundle.toml files.

use weft_bundle::{BundleDescriptor, ManifestError, Version};
use weft_unit::PatchOp;

#[test]
fn test_minimal_manifest() {
    let toml = r#"
[bundle]
id = "minimal"
version = "1.0.0"
"#;

    let bundle = BundleDescriptor::from_str(toml).unwrap();
    assert_eq!(bundle.id(), "minimal");
    assert_eq!(bundle.version(), &Version::new(1, 0, 0));
    assert_eq!(bundle.name(), "minimal");
    assert!(bundle.entrypoint().is_none());
    assert!(bundle.dependencies().is_empty());
    assert!(bundle.conflicts().is_empty());
    assert!(bundle.patches().is_empty());
}

#[test]
fn test_full_manifest() {
    let toml = r#"
[bundle]
id = "better-ui"
version = "1.2.0-beta.1"
entrypoint = "betterui/Main"
name = "Better UI"
description = "Nicer menus"
authors = ["Alice"]
conflicts = { old-ui = "<2.0.0" }
homepage = "https://example.com"

[depends]
host = ">=1.7.0"
core-lib = { version = "^1.0", optional = true }

[recommends]
extras = "*"

[[patches]]
target = "world/World"
kind = "widen-access"
member = "tick()V"

[[patches]]
target = "menu/Menu"
kind = "redirect-call"
from = "menu/Menu.draw()V"
to = "betterui/Hooks.draw(Lmenu/Menu;)V"
invoke = "static"
"#;

    let bundle = BundleDescriptor::from_str(toml).unwrap();
    assert_eq!(bundle.name(), "Better UI");
    assert_eq!(bundle.description(), Some("Nicer menus"));
    assert_eq!(bundle.authors(), ["Alice".to_string()]);
    assert_eq!(bundle.entrypoint(), Some("betterui/Main"));
    assert_eq!(bundle.version().prerelease.as_deref(), Some("beta.1"));

    let deps: Vec<_> = bundle
        .dependencies()
        .iter()
        .map(|d| (d.id.as_str(), d.req.to_string(), d.optional))
        .collect();
    assert_eq!(
        deps,
        [
            ("core-lib", "^1.0".to_string(), true),
            ("host", ">=1.7.0".to_string(), false),
            ("extras", "*".to_string(), true),
        ]
    );

    assert_eq!(bundle.conflicts().len(), 1);
    assert_eq!(bundle.conflicts()[0].id, "old-ui");
    assert!(bundle.conflicts()[0].req.matches(&Version::new(1, 9, 0)));

    assert_eq!(bundle.patches().len(), 2);
    assert!(matches!(bundle.patches()[1].op, PatchOp::RedirectCall { .. }));
}

#[test]
fn test_conflict_list() {
    let toml = r#"
[bundle]
id = "a"
version = "1.0.0"
conflicts = ["b", "c"]
"#;
    let bundle = BundleDescriptor::from_str(toml).unwrap();
    let ids: Vec<_> = bundle.conflicts().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["b", "c"]);
}

#[test]
fn test_duplicate_dependency_merged() {
    let toml = r#"
[bundle]
id = "a"
version = "1.0.0"

[depends]
lib = ">=1.2.0"

[recommends]
lib = "<2.0.0"
"#;
    let bundle = BundleDescriptor::from_str(toml).unwrap();
    assert_eq!(bundle.dependencies().len(), 1);
    let lib = &bundle.dependencies()[0];
    assert_eq!(lib.req.to_string(), ">=1.2.0, <2.0.0");
    assert!(!lib.optional);
}

#[test]
fn test_contradiction_not_detected_here() {
    let toml = r#"
[bundle]
id = "a"
version = "1.0.0"

[depends]
lib = ">=2.0.0"

[recommends]
lib = "<1.0.0"
"#;
    let bundle = BundleDescriptor::from_str(toml).unwrap();
    assert!(!bundle.dependencies()[0].req.is_satisfiable());
}

#[test]
fn test_missing_fields() {
    let missing_id = "[bundle]\nversion = \"1.0.0\"\n";
    assert!(matches!(
        BundleDescriptor::from_str(missing_id),
        Err(ManifestError::MissingField(f)) if f == "bundle.id"
    ));

    let missing_version = "[bundle]\nid = \"a\"\n";
    assert!(matches!(
        BundleDescriptor::from_str(missing_version),
        Err(ManifestError::MissingField(f)) if f == "bundle.version"
    ));

    assert!(matches!(
        BundleDescriptor::from_str("[depends]\nhost = \"*\"\n"),
        Err(ManifestError::MissingField(f)) if f == "bundle"
    ));
}

#[test]
fn test_invalid_values() {
    let bad_id = "[bundle]\nid = \"bad id\"\nversion = \"1.0.0\"\n";
    assert!(matches!(
        BundleDescriptor::from_str(bad_id),
        Err(ManifestError::ValidationError(_))
    ));

    let bad_version = "[bundle]\nid = \"a\"\nversion = \"1.0\"\n";
    assert!(matches!(
        BundleDescriptor::from_str(bad_version),
        Err(ManifestError::InvalidVersion { .. })
    ));

    let bad_constraint = "[bundle]\nid = \"a\"\nversion = \"1.0.0\"\n[depends]\nb = \">>1\"\n";
    assert!(matches!(
        BundleDescriptor::from_str(bad_constraint),
        Err(ManifestError::InvalidVersion { .. })
    ));

    let self_dep = "[bundle]\nid = \"a\"\nversion = \"1.0.0\"\n[depends]\na = \"*\"\n";
    assert!(matches!(
        BundleDescriptor::from_str(self_dep),
        Err(ManifestError::SelfDependency(_))
    ));

    assert!(matches!(
        BundleDescriptor::from_str("[bundle\n"),
        Err(ManifestError::ParseError(_))
    ));
}

#[test]
fn test_unknown_patch_kind_rejected() {
    let toml = r#"
[bundle]
id = "a"
version = "1.0.0"

[[patches]]
target = "world/World"
kind = "rewrite-everything"
"#;
    assert!(matches!(
        BundleDescriptor::from_str(toml),
        Err(ManifestError::ParseError(_))
    ));
}

#[test]
fn test_read_bytes() {
    let bundle = BundleDescriptor::read(b"[bundle]\nid = \"a\"\nversion = \"0.1.0\"\n").unwrap();
    assert_eq!(bundle.version(), &Version::new(0, 1, 0));
}
