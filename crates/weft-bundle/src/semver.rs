//! Semantic versions and version constraints
//!
//! Versions follow `MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`. Constraints may
//! use partial versions (`>=1.2`, `^1`), and a requirement is a
//! comma-separated conjunction of constraints.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use thiserror::Error;

/// Errors that can occur during semver parsing
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SemverError {
    /// Invalid version format
    #[error("Invalid version format: {0}")]
    InvalidVersion(String),

    /// Invalid constraint format
    #[error("Invalid constraint format: {0}")]
    InvalidConstraint(String),

    /// Invalid pre-release or build identifier
    #[error("Invalid pre-release tag: {0}")]
    InvalidPrerelease(String),
}

/// Semantic version (MAJOR.MINOR.PATCH)
///
/// Build metadata is kept for display but ignored by ordering and equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

/// A version that may omit its minor and patch components
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialVersion {
    pub major: u64,
    pub minor: Option<u64>,
    pub patch: Option<u64>,
    pub prerelease: Option<String>,
}

/// Version constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Exact version (=1.2.3 or 1.2.3); `=1.2` matches any 1.2.x
    Exact(PartialVersion),

    /// Caret range (^1.2.3 → >=1.2.3 <2.0.0)
    Caret(PartialVersion),

    /// Tilde range (~1.2.3 → >=1.2.3 <1.3.0)
    Tilde(PartialVersion),

    /// Greater than (>1.2.3)
    GreaterThan(PartialVersion),

    /// Greater than or equal (>=1.2.3)
    GreaterThanOrEqual(PartialVersion),

    /// Less than (<1.2.3)
    LessThan(PartialVersion),

    /// Less than or equal (<=1.2.3)
    LessThanOrEqual(PartialVersion),

    /// Wildcard (1.2.*, 1.*)
    Wildcard(u64, Option<u64>),

    /// Any version (*)
    Any,
}

/// Conjunction of constraints (`>=1.2.0, <2.0.0`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionReq {
    constraints: Vec<Constraint>,
}

/// One end of the interval a constraint admits
#[derive(Debug, Clone, PartialEq, Eq)]
enum Bound {
    Unbounded,
    Inclusive(Version),
    Exclusive(Version),
}

fn parse_numeric(part: &str, what: &str, input: &str) -> Result<u64, SemverError> {
    let valid = !part.is_empty()
        && part.bytes().all(|b| b.is_ascii_digit())
        && (part == "0" || !part.starts_with('0'));
    if !valid {
        return Err(SemverError::InvalidVersion(format!(
            "Invalid {} version '{}' in '{}'",
            what, part, input
        )));
    }
    part.parse().map_err(|_| {
        SemverError::InvalidVersion(format!("{} version out of range in '{}'", what, input))
    })
}

fn validate_identifiers(tag: &str) -> Result<(), SemverError> {
    let valid = tag.split('.').all(|ident| {
        !ident.is_empty()
            && ident
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-')
    });
    if valid {
        Ok(())
    } else {
        Err(SemverError::InvalidPrerelease(tag.to_string()))
    }
}

/// Split `core[-pre][+build]`
fn split_version(s: &str) -> Result<(&str, Option<&str>, Option<&str>), SemverError> {
    let (version_part, build) = match s.split_once('+') {
        Some((v, b)) => {
            validate_identifiers(b)?;
            (v, Some(b))
        }
        None => (s, None),
    };

    let (core, prerelease) = match version_part.split_once('-') {
        Some((v, p)) => {
            validate_identifiers(p)?;
            (v, Some(p))
        }
        None => (version_part, None),
    };

    Ok((core, prerelease, build))
}

impl Version {
    /// Parse a version string
    pub fn parse(s: &str) -> Result<Self, SemverError> {
        let s = s.trim();
        let (core, prerelease, build) = split_version(s)?;

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(SemverError::InvalidVersion(format!(
                "Expected MAJOR.MINOR.PATCH, got '{}'",
                s
            )));
        }

        Ok(Version {
            major: parse_numeric(parts[0], "major", s)?,
            minor: parse_numeric(parts[1], "minor", s)?,
            patch: parse_numeric(parts[2], "patch", s)?,
            prerelease: prerelease.map(str::to_string),
            build: build.map(str::to_string),
        })
    }

    /// Create a new version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    /// Attach a pre-release tag
    pub fn with_prerelease(mut self, tag: impl Into<String>) -> Self {
        self.prerelease = Some(tag.into());
        self
    }

    /// Check if this is a prerelease version
    pub fn is_prerelease(&self) -> bool {
        self.prerelease.is_some()
    }

    /// Next major version; `None` past `u64::MAX`
    pub fn bump_major(&self) -> Option<Self> {
        self.major.checked_add(1).map(|major| Version::new(major, 0, 0))
    }

    /// Next minor version, carrying into major on overflow
    pub fn bump_minor(&self) -> Option<Self> {
        match self.minor.checked_add(1) {
            Some(minor) => Some(Version::new(self.major, minor, 0)),
            None => self.bump_major(),
        }
    }

    /// Next patch version, carrying into minor on overflow
    pub fn bump_patch(&self) -> Option<Self> {
        match self.patch.checked_add(1) {
            Some(patch) => Some(Version::new(self.major, self.minor, patch)),
            None => self.bump_minor(),
        }
    }

    /// Greatest possible version
    fn max_release() -> Self {
        Version::new(u64::MAX, u64::MAX, u64::MAX)
    }

    /// Smallest version with this numeric core, below every pre-release of it
    ///
    /// Only used as an exclusive upper bound so that `^1.2` rejects `2.0.0-rc.1`.
    fn core_floor(self) -> Self {
        self.with_prerelease(String::new())
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        if let Some(ref build) = self.build {
            write!(f, "+{}", build)?;
        }
        Ok(())
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.major.hash(state);
        self.minor.hash(state);
        self.patch.hash(state);
        self.prerelease.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                // A release sorts after any of its pre-releases
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl std::str::FromStr for Version {
    type Err = SemverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = SemverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(value: Version) -> Self {
        value.to_string()
    }
}

impl PartialVersion {
    /// Parse `1`, `1.2`, `1.2.3` or `1.2.3-pre`
    pub fn parse(s: &str) -> Result<Self, SemverError> {
        let s = s.trim();
        let (core, prerelease, _build) = split_version(s)?;

        let parts: Vec<&str> = core.split('.').collect();
        if parts.is_empty() || parts.len() > 3 {
            return Err(SemverError::InvalidVersion(format!(
                "Expected MAJOR[.MINOR[.PATCH]], got '{}'",
                s
            )));
        }
        if prerelease.is_some() && parts.len() != 3 {
            return Err(SemverError::InvalidVersion(format!(
                "Pre-release tag needs a full version: '{}'",
                s
            )));
        }

        Ok(PartialVersion {
            major: parse_numeric(parts[0], "major", s)?,
            minor: parts
                .get(1)
                .map(|p| parse_numeric(p, "minor", s))
                .transpose()?,
            patch: parts
                .get(2)
                .map(|p| parse_numeric(p, "patch", s))
                .transpose()?,
            prerelease: prerelease.map(str::to_string),
        })
    }

    /// Missing components filled with zero
    pub fn floor(&self) -> Version {
        Version {
            major: self.major,
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            prerelease: self.prerelease.clone(),
            build: None,
        }
    }

    fn is_complete(&self) -> bool {
        self.minor.is_some() && self.patch.is_some()
    }

    /// First version past everything this partial version covers
    ///
    /// `None` when nothing lies past it.
    fn ceiling(&self) -> Option<Version> {
        let floor = self.floor();
        match (self.minor, self.patch) {
            (None, _) => floor.bump_major(),
            (Some(_), None) => floor.bump_minor(),
            (Some(_), Some(_)) => floor.bump_patch(),
        }
    }
}

impl fmt::Display for PartialVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{}", minor)?;
        }
        if let Some(patch) = self.patch {
            write!(f, ".{}", patch)?;
        }
        if let Some(ref pre) = self.prerelease {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl From<Version> for PartialVersion {
    fn from(v: Version) -> Self {
        PartialVersion {
            major: v.major,
            minor: Some(v.minor),
            patch: Some(v.patch),
            prerelease: v.prerelease,
        }
    }
}

impl Constraint {
    /// Parse a constraint string
    pub fn parse(s: &str) -> Result<Self, SemverError> {
        let s = s.trim();

        if s.is_empty() {
            return Err(SemverError::InvalidConstraint("empty constraint".to_string()));
        }

        if s == "*" {
            return Ok(Constraint::Any);
        }

        // Two-character operators first
        let operators: [(&str, fn(PartialVersion) -> Constraint); 7] = [
            (">=", Constraint::GreaterThanOrEqual),
            ("<=", Constraint::LessThanOrEqual),
            (">", Constraint::GreaterThan),
            ("<", Constraint::LessThan),
            ("^", Constraint::Caret),
            ("~", Constraint::Tilde),
            ("=", Constraint::Exact),
        ];
        for (op, make) in operators {
            if let Some(rest) = s.strip_prefix(op) {
                return Ok(make(PartialVersion::parse(rest)?));
            }
        }

        // Check for wildcards
        if s.contains('*') {
            return Self::parse_wildcard(s);
        }

        // Default: exact version
        Ok(Constraint::Exact(PartialVersion::parse(s)?))
    }

    /// Parse wildcard constraint (1.2.*, 1.*)
    fn parse_wildcard(s: &str) -> Result<Self, SemverError> {
        let invalid = || SemverError::InvalidConstraint(format!("Invalid wildcard: {}", s));
        let parts: Vec<&str> = s.split('.').collect();

        match parts.as_slice() {
            [major, "*"] => Ok(Constraint::Wildcard(
                parse_numeric(major, "major", s).map_err(|_| invalid())?,
                None,
            )),
            [major, minor, "*"] => Ok(Constraint::Wildcard(
                parse_numeric(major, "major", s).map_err(|_| invalid())?,
                Some(parse_numeric(minor, "minor", s).map_err(|_| invalid())?),
            )),
            _ => Err(invalid()),
        }
    }

    /// Interval of versions this constraint admits
    fn bounds(&self) -> (Bound, Bound) {
        use Bound::*;

        match self {
            Constraint::Any => (Unbounded, Unbounded),

            Constraint::Exact(p) if p.is_complete() => (Inclusive(p.floor()), Inclusive(p.floor())),
            Constraint::Exact(p) => (Inclusive(p.floor()), below(p.ceiling())),

            Constraint::Caret(p) => {
                // ^1.2.3 := >=1.2.3 <2.0.0
                // ^0.2.3 := >=0.2.3 <0.3.0
                // ^0.0.3 := >=0.0.3 <0.0.4
                let floor = p.floor();
                let upper = match (p.major, p.minor, p.patch) {
                    (0, Some(0), Some(_)) => floor.bump_patch(),
                    (0, Some(_), _) => floor.bump_minor(),
                    _ => floor.bump_major(),
                };
                (Inclusive(floor), below(upper))
            }

            Constraint::Tilde(p) => {
                // ~1.2.3 := >=1.2.3 <1.3.0, ~1 := >=1.0.0 <2.0.0
                let floor = p.floor();
                let upper = match p.minor {
                    Some(_) => floor.bump_minor(),
                    None => floor.bump_major(),
                };
                (Inclusive(floor), below(upper))
            }

            Constraint::GreaterThan(p) if p.is_complete() => (Exclusive(p.floor()), Unbounded),
            Constraint::GreaterThan(p) => match p.ceiling() {
                Some(ceiling) => (Inclusive(ceiling), Unbounded),
                None => (Exclusive(Version::max_release()), Unbounded),
            },
            Constraint::GreaterThanOrEqual(p) => (Inclusive(p.floor()), Unbounded),
            Constraint::LessThan(p) if p.is_complete() => (Unbounded, Exclusive(p.floor())),
            Constraint::LessThan(p) => (Unbounded, Exclusive(p.floor().core_floor())),
            Constraint::LessThanOrEqual(p) if p.is_complete() => (Unbounded, Inclusive(p.floor())),
            Constraint::LessThanOrEqual(p) => (Unbounded, below(p.ceiling())),

            Constraint::Wildcard(major, None) => {
                let floor = Version::new(*major, 0, 0);
                let upper = floor.bump_major();
                (Inclusive(floor), below(upper))
            }
            Constraint::Wildcard(major, Some(minor)) => {
                let floor = Version::new(*major, *minor, 0);
                let upper = floor.bump_minor();
                (Inclusive(floor), below(upper))
            }
        }
    }

    /// Check if a version satisfies this constraint
    pub fn matches(&self, version: &Version) -> bool {
        let (lower, upper) = self.bounds();
        let above = match &lower {
            Bound::Unbounded => true,
            Bound::Inclusive(v) => version >= v,
            Bound::Exclusive(v) => version > v,
        };
        let below = match &upper {
            Bound::Unbounded => true,
            Bound::Inclusive(v) => version <= v,
            Bound::Exclusive(v) => version < v,
        };
        above && below
    }

    /// Get the minimum version that satisfies this constraint
    pub fn min_version(&self) -> Option<Version> {
        match self.bounds().0 {
            Bound::Inclusive(v) => Some(v),
            Bound::Exclusive(v) => v.bump_patch(),
            Bound::Unbounded => None,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Any => write!(f, "*"),
            Constraint::Exact(v) => write!(f, "={}", v),
            Constraint::Caret(v) => write!(f, "^{}", v),
            Constraint::Tilde(v) => write!(f, "~{}", v),
            Constraint::GreaterThan(v) => write!(f, ">{}", v),
            Constraint::GreaterThanOrEqual(v) => write!(f, ">={}", v),
            Constraint::LessThan(v) => write!(f, "<{}", v),
            Constraint::LessThanOrEqual(v) => write!(f, "<={}", v),
            Constraint::Wildcard(major, Some(minor)) => write!(f, "{}.{}.*", major, minor),
            Constraint::Wildcard(major, None) => write!(f, "{}.*", major),
        }
    }
}

impl VersionReq {
    /// Requirement satisfied by every version
    pub fn any() -> Self {
        VersionReq {
            constraints: vec![Constraint::Any],
        }
    }

    /// Requirement satisfied by exactly `version`
    pub fn exact(version: &Version) -> Self {
        VersionReq {
            constraints: vec![Constraint::Exact(version.clone().into())],
        }
    }

    /// Parse a comma-separated list of constraints
    pub fn parse(s: &str) -> Result<Self, SemverError> {
        let constraints = s
            .split(',')
            .map(Constraint::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(VersionReq { constraints })
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Check that `version` satisfies every constraint
    pub fn matches(&self, version: &Version) -> bool {
        self.constraints.iter().all(|c| c.matches(version))
    }

    /// Requirement satisfied only by versions satisfying both
    pub fn intersect(&self, other: &VersionReq) -> VersionReq {
        let mut constraints: Vec<Constraint> = self
            .constraints
            .iter()
            .filter(|c| **c != Constraint::Any)
            .cloned()
            .collect();
        for c in &other.constraints {
            if *c != Constraint::Any && !constraints.contains(c) {
                constraints.push(c.clone());
            }
        }
        if constraints.is_empty() {
            constraints.push(Constraint::Any);
        }
        VersionReq { constraints }
    }

    /// Whether some version could satisfy every constraint at once
    pub fn is_satisfiable(&self) -> bool {
        let mut lower = Bound::Unbounded;
        let mut upper = Bound::Unbounded;

        for (lo, hi) in self.constraints.iter().map(Constraint::bounds) {
            if tighter_lower(&lo, &lower) {
                lower = lo;
            }
            if tighter_upper(&hi, &upper) {
                upper = hi;
            }
        }

        match (&lower, &upper) {
            (Bound::Exclusive(lo), Bound::Unbounded) => *lo < Version::max_release(),
            (Bound::Unbounded, _) | (_, Bound::Unbounded) => true,
            (Bound::Inclusive(lo), Bound::Inclusive(hi)) => lo <= hi,
            (Bound::Inclusive(lo), Bound::Exclusive(hi))
            | (Bound::Exclusive(lo), Bound::Inclusive(hi))
            | (Bound::Exclusive(lo), Bound::Exclusive(hi)) => lo < hi,
        }
    }
}

/// Exclusive upper bound below `upper` and all its pre-releases
fn below(upper: Option<Version>) -> Bound {
    match upper {
        Some(v) => Bound::Exclusive(v.core_floor()),
        None => Bound::Unbounded,
    }
}

fn tighter_lower(candidate: &Bound, current: &Bound) -> bool {
    match (candidate, current) {
        (Bound::Unbounded, _) => false,
        (_, Bound::Unbounded) => true,
        (Bound::Inclusive(a), Bound::Inclusive(b)) | (Bound::Exclusive(a), Bound::Exclusive(b)) => {
            a > b
        }
        (Bound::Exclusive(a), Bound::Inclusive(b)) => a >= b,
        (Bound::Inclusive(a), Bound::Exclusive(b)) => a > b,
    }
}

fn tighter_upper(candidate: &Bound, current: &Bound) -> bool {
    match (candidate, current) {
        (Bound::Unbounded, _) => false,
        (_, Bound::Unbounded) => true,
        (Bound::Inclusive(a), Bound::Inclusive(b)) | (Bound::Exclusive(a), Bound::Exclusive(b)) => {
            a < b
        }
        (Bound::Exclusive(a), Bound::Inclusive(b)) => a <= b,
        (Bound::Inclusive(a), Bound::Exclusive(b)) => a < b,
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.constraints.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for VersionReq {
    type Err = SemverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionReq::parse(s)
    }
}

impl TryFrom<String> for VersionReq {
    type Error = SemverError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VersionReq::parse(&value)
    }
}

impl From<VersionReq> for String {
    fn from(value: VersionReq) -> Self {
        value.to_string()
    }
}
