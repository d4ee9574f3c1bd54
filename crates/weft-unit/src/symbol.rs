//! Symbolic references to units and their members
//!
//! Unit names are internal names (`world/World`). Members are identified by
//! name plus descriptor: methods as `tick()V`, fields as `age:I`. A reference
//! qualified with its owner uses a dot: `world/World.tick()V`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors produced when parsing symbol text
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SymbolError {
    /// Member signature without a descriptor
    #[error("Invalid member signature '{0}': expected name(args)ret or name:descriptor")]
    InvalidMember(String),

    /// Qualified reference without an owner
    #[error("Invalid qualified reference '{0}': expected owner.member")]
    InvalidReference(String),
}

/// A member signature: name plus descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MemberRef {
    pub name: String,
    pub descriptor: String,
}

impl MemberRef {
    /// Create a member reference
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Parse `name(args)ret` or `name:descriptor`
    pub fn parse(s: &str) -> Result<Self, SymbolError> {
        let s = s.trim();
        let (name, descriptor) = if let Some(pos) = s.find('(') {
            (&s[..pos], &s[pos..])
        } else if let Some(pos) = s.find(':') {
            (&s[..pos], &s[pos + 1..])
        } else {
            return Err(SymbolError::InvalidMember(s.to_string()));
        };

        if name.is_empty() || descriptor.is_empty() || name.contains(['.', ' ']) {
            return Err(SymbolError::InvalidMember(s.to_string()));
        }

        Ok(Self::new(name, descriptor))
    }

    /// Whether this signature names a method
    pub fn is_method(&self) -> bool {
        self.descriptor.starts_with('(')
    }
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_method() {
            write!(f, "{}{}", self.name, self.descriptor)
        } else {
            write!(f, "{}:{}", self.name, self.descriptor)
        }
    }
}

impl TryFrom<String> for MemberRef {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MemberRef> for String {
    fn from(value: MemberRef) -> Self {
        value.to_string()
    }
}

/// A member reference qualified with its owning unit
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QualifiedRef {
    pub owner: String,
    pub member: MemberRef,
}

impl QualifiedRef {
    /// Create a qualified reference
    pub fn new(owner: impl Into<String>, member: MemberRef) -> Self {
        Self {
            owner: owner.into(),
            member,
        }
    }

    /// Parse `owner.name(args)ret` or `owner.name:descriptor`
    pub fn parse(s: &str) -> Result<Self, SymbolError> {
        let s = s.trim();
        // Owners never contain dots; descriptors may not appear before the split.
        let head_end = s.find(['(', ':']).unwrap_or(s.len());
        let dot = s[..head_end]
            .rfind('.')
            .ok_or_else(|| SymbolError::InvalidReference(s.to_string()))?;
        let owner = &s[..dot];
        if owner.is_empty() {
            return Err(SymbolError::InvalidReference(s.to_string()));
        }
        let member = MemberRef::parse(&s[dot + 1..])?;
        Ok(Self::new(owner, member))
    }

    /// Whether an invocation or field operand refers to this member
    pub fn matches(&self, owner: &str, name: &str, descriptor: &str) -> bool {
        self.owner == owner && self.member.name == name && self.member.descriptor == descriptor
    }
}

impl fmt::Display for QualifiedRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.owner, self.member)
    }
}

impl TryFrom<String> for QualifiedRef {
    type Error = SymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<QualifiedRef> for String {
    fn from(value: QualifiedRef) -> Self {
        value.to_string()
    }
}

/// Rewrite every class name embedded in a type descriptor
///
/// Class types appear as `L<name>;`; everything else is copied through. Class
/// names for which `map` returns `None` are kept as they are.
pub fn map_descriptor_classes<'a, F>(descriptor: &str, mut map: F) -> String
where
    F: FnMut(&str) -> Option<&'a str>,
{
    let mut out = String::with_capacity(descriptor.len());
    let mut rest = descriptor;

    while let Some(start) = rest.find('L') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find(';') {
            Some(end) => {
                let class = &after[..end];
                out.push('L');
                out.push_str(map(class).unwrap_or(class));
                out.push(';');
                rest = &after[end + 1..];
            }
            None => {
                // Not a well-formed class type; leave the tail untouched.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
