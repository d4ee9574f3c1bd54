//! Symbolic name mapping between the obfuscated and intermediate schemes
//!
//! The mapping source is tab-separated text, one entry per row:
//!
//! ```text
//! # kind   obfuscated   intermediate    signature
//! class    a            world/World
//! method   a.b          tick            ()V
//! field    a.c          age             I
//! ```
//!
//! Member rows qualify the obfuscated name with its obfuscated owner; the
//! intermediate owner is derived from the class rows. Signatures are written in
//! the obfuscated scheme and translated through the class rows for the reverse
//! direction. The table is immutable once loaded and safe to share between
//! threads.

use crate::symbol::{map_descriptor_classes, MemberRef, QualifiedRef};
use rustc_hash::FxHashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a mapping source
#[derive(Debug, Error)]
pub enum MappingError {
    /// Failed to read the mapping file
    #[error("Failed to read mapping file: {0}")]
    Io(#[from] std::io::Error),

    /// Row with the wrong number of columns
    #[error("line {line}: expected 4 tab-separated columns, found {found}")]
    ColumnCount { line: usize, found: usize },

    /// Unrecognized symbol kind
    #[error("line {line}: unknown symbol kind '{kind}'")]
    UnknownKind { line: usize, kind: String },

    /// Row that is structurally wrong for its kind
    #[error("line {line}: {message}")]
    InvalidRow { line: usize, message: String },

    /// Same key mapped to two different names
    #[error("line {line}: {kind} '{key}' maps to both '{first}' and '{second}'")]
    Conflict {
        line: usize,
        kind: SymbolKind,
        key: String,
        first: String,
        second: String,
    },
}

/// Kind of symbol a mapping entry names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Class,
    Method,
    Field,
}

impl SymbolKind {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "class" => Some(SymbolKind::Class),
            "method" => Some(SymbolKind::Method),
            "field" => Some(SymbolKind::Field),
            _ => None,
        }
    }
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SymbolKind::Class => "class",
            SymbolKind::Method => "method",
            SymbolKind::Field => "field",
        })
    }
}

/// Translation direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Obfuscated names to intermediate names
    ToIntermediate,
    /// Intermediate names to obfuscated names
    ToObfuscated,
}

impl Direction {
    /// The opposite direction
    pub fn reverse(self) -> Self {
        match self {
            Direction::ToIntermediate => Direction::ToObfuscated,
            Direction::ToObfuscated => Direction::ToIntermediate,
        }
    }

    fn index(self) -> usize {
        match self {
            Direction::ToIntermediate => 0,
            Direction::ToObfuscated => 1,
        }
    }
}

/// One row of the mapping source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingEntry {
    pub kind: SymbolKind,
    /// Obfuscated name (`owner.name` for members)
    pub obfuscated: String,
    /// Intermediate name (bare for members)
    pub intermediate: String,
    /// Obfuscated-scheme descriptor; empty for classes
    pub signature: String,
}

/// Bidirectional symbol table
#[derive(Debug, Default)]
pub struct MappingTable {
    entries: Vec<MappingEntry>,
    /// Indexed by [`Direction::index`]
    classes: [FxHashMap<String, String>; 2],
    methods: [FxHashMap<String, String>; 2],
    fields: [FxHashMap<String, String>; 2],
}

fn member_key(owner: &str, name: &str, descriptor: &str) -> String {
    let mut key = String::with_capacity(owner.len() + name.len() + descriptor.len() + 2);
    key.push_str(owner);
    key.push('.');
    key.push_str(name);
    key.push(' ');
    key.push_str(descriptor);
    key
}

fn insert_unique(
    map: &mut FxHashMap<String, String>,
    line: usize,
    kind: SymbolKind,
    key: String,
    value: &str,
) -> Result<(), MappingError> {
    match map.get(&key) {
        Some(existing) if existing != value => Err(MappingError::Conflict {
            line,
            kind,
            key,
            first: existing.clone(),
            second: value.to_string(),
        }),
        Some(_) => Ok(()),
        None => {
            map.insert(key, value.to_string());
            Ok(())
        }
    }
}

impl MappingTable {
    /// An empty table; every translation is the identity
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load a table from a file
    pub fn from_file(path: &Path) -> Result<Self, MappingError> {
        let content = std::fs::read_to_string(path)?;
        Self::load(&content)
    }

    /// Load a table from mapping source text
    pub fn load(source: &str) -> Result<Self, MappingError> {
        let mut table = Self::default();
        let mut members = Vec::new();

        for (index, raw) in source.lines().enumerate() {
            let line = index + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let columns: Vec<&str> = raw.trim_end_matches('\r').split('\t').collect();
            if columns.len() != 4 {
                return Err(MappingError::ColumnCount {
                    line,
                    found: columns.len(),
                });
            }
            let [kind, obfuscated, intermediate, signature] =
                [columns[0], columns[1], columns[2], columns[3]].map(str::trim);

            let kind = SymbolKind::parse(kind).ok_or_else(|| MappingError::UnknownKind {
                line,
                kind: kind.to_string(),
            })?;
            if obfuscated.is_empty() || intermediate.is_empty() {
                return Err(MappingError::InvalidRow {
                    line,
                    message: "names must not be empty".to_string(),
                });
            }

            let entry = MappingEntry {
                kind,
                obfuscated: obfuscated.to_string(),
                intermediate: intermediate.to_string(),
                signature: signature.to_string(),
            };

            match kind {
                SymbolKind::Class => {
                    if !entry.signature.is_empty() {
                        return Err(MappingError::InvalidRow {
                            line,
                            message: "class rows take no signature".to_string(),
                        });
                    }
                    table.insert_class(line, &entry)?;
                }
                SymbolKind::Method | SymbolKind::Field => {
                    if entry.signature.is_empty() {
                        return Err(MappingError::InvalidRow {
                            line,
                            message: format!("{} rows need a signature", kind),
                        });
                    }
                    if kind == SymbolKind::Method && !entry.signature.starts_with('(') {
                        return Err(MappingError::InvalidRow {
                            line,
                            message: format!("'{}' is not a method descriptor", entry.signature),
                        });
                    }
                    // Members are indexed once every class row is known.
                    members.push((line, entry.clone()));
                }
            }

            table.entries.push(entry);
        }

        for (line, entry) in &members {
            table.insert_member(*line, entry)?;
        }

        Ok(table)
    }

    fn insert_class(&mut self, line: usize, entry: &MappingEntry) -> Result<(), MappingError> {
        let [forward, backward] = &mut self.classes;
        insert_unique(
            forward,
            line,
            SymbolKind::Class,
            entry.obfuscated.clone(),
            &entry.intermediate,
        )?;
        insert_unique(
            backward,
            line,
            SymbolKind::Class,
            entry.intermediate.clone(),
            &entry.obfuscated,
        )
    }

    fn insert_member(&mut self, line: usize, entry: &MappingEntry) -> Result<(), MappingError> {
        let (owner, name) = entry
            .obfuscated
            .split_once('.')
            .filter(|(owner, name)| !owner.is_empty() && !name.is_empty())
            .ok_or_else(|| MappingError::InvalidRow {
                line,
                message: format!(
                    "member name '{}' must be qualified as owner.name",
                    entry.obfuscated
                ),
            })?;

        let inter_owner = self
            .map_class(owner, Direction::ToIntermediate)
            .to_string();
        let inter_signature = self.map_descriptor(&entry.signature, Direction::ToIntermediate);

        let maps = match entry.kind {
            SymbolKind::Method => &mut self.methods,
            _ => &mut self.fields,
        };
        let [forward, backward] = maps;
        insert_unique(
            forward,
            line,
            entry.kind,
            member_key(owner, name, &entry.signature),
            &entry.intermediate,
        )?;
        insert_unique(
            backward,
            line,
            entry.kind,
            member_key(&inter_owner, &entry.intermediate, &inter_signature),
            name,
        )
    }

    /// All rows in source order
    pub fn entries(&self) -> &[MappingEntry] {
        &self.entries
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no rows
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mapped class name, if the class is in the table
    pub fn lookup_class(&self, name: &str, direction: Direction) -> Option<&str> {
        self.classes[direction.index()].get(name).map(String::as_str)
    }

    /// Translate a class name, falling back to the input
    pub fn map_class<'a>(&'a self, name: &'a str, direction: Direction) -> &'a str {
        self.lookup_class(name, direction).unwrap_or(name)
    }

    /// Translate a method name; `owner` and `descriptor` are in the source scheme
    pub fn map_method<'a>(
        &'a self,
        owner: &str,
        name: &'a str,
        descriptor: &str,
        direction: Direction,
    ) -> &'a str {
        self.methods[direction.index()]
            .get(&member_key(owner, name, descriptor))
            .map(String::as_str)
            .unwrap_or(name)
    }

    /// Translate a field name; `owner` and `descriptor` are in the source scheme
    pub fn map_field<'a>(
        &'a self,
        owner: &str,
        name: &'a str,
        descriptor: &str,
        direction: Direction,
    ) -> &'a str {
        self.fields[direction.index()]
            .get(&member_key(owner, name, descriptor))
            .map(String::as_str)
            .unwrap_or(name)
    }

    /// Translate every class name inside a descriptor
    pub fn map_descriptor(&self, descriptor: &str, direction: Direction) -> String {
        map_descriptor_classes(descriptor, |class| self.lookup_class(class, direction))
    }

    /// Translate a name of the given kind
    ///
    /// Classes are plain internal names. Members are qualified with their owner
    /// and carry their descriptor (`a.b()V`, `a.c:I`); the result uses the same
    /// form in the other scheme. Names that are not in the table come back
    /// unchanged.
    pub fn translate(&self, name: &str, kind: SymbolKind, direction: Direction) -> String {
        match kind {
            SymbolKind::Class => self.map_class(name, direction).to_string(),
            SymbolKind::Method | SymbolKind::Field => {
                let Ok(reference) = QualifiedRef::parse(name) else {
                    return name.to_string();
                };
                let MemberRef {
                    name: member,
                    descriptor,
                } = &reference.member;

                let map = match kind {
                    SymbolKind::Method => &self.methods,
                    _ => &self.fields,
                };
                match map[direction.index()].get(&member_key(&reference.owner, member, descriptor))
                {
                    Some(mapped) => QualifiedRef::new(
                        self.map_class(&reference.owner, direction),
                        MemberRef::new(mapped.clone(), self.map_descriptor(descriptor, direction)),
                    )
                    .to_string(),
                    None => name.to_string(),
                }
            }
        }
    }
}
