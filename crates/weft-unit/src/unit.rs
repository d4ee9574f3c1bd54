//! Code unit binary format
//!
//! A code unit is one compiled class of the host: its name, access flags,
//! fields and methods with their instruction streams.

use crate::encoder::{DecodeError, UnitReader, UnitWriter};
use crate::opcode::Insn;
use crate::symbol::MemberRef;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Magic number for code unit files: "WEFT"
pub const MAGIC: [u8; 4] = *b"WEFT";

/// Current unit format version
pub const FORMAT_VERSION: u32 = 1;

/// Size of the fixed header: magic + format + flags + checksum
pub const HEADER_LEN: usize = 16;

/// Access flag bits
pub mod access {
    pub const PUBLIC: u32 = 0x0001;
    pub const PRIVATE: u32 = 0x0002;
    pub const PROTECTED: u32 = 0x0004;
    pub const STATIC: u32 = 0x0008;
    pub const FINAL: u32 = 0x0010;
    pub const SYNTHETIC: u32 = 0x1000;

    /// Bits that select visibility
    pub const VISIBILITY_MASK: u32 = PUBLIC | PRIVATE | PROTECTED;
}

/// Unit flags
pub mod flags {
    /// Unit has been rewritten by the loader
    pub const PATCHED: u32 = 1 << 0;
}

/// Unit encoding/decoding errors
#[derive(Debug, Error)]
pub enum UnitError {
    /// Decode error
    #[error("Decode error: {0}")]
    DecodeError(#[from] DecodeError),

    /// Invalid magic number
    #[error("Invalid magic number: expected WEFT, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported format version
    #[error("Unsupported unit format: {0} (current: {FORMAT_VERSION})")]
    UnsupportedFormat(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Bytes left after the last section
    #[error("{0} trailing bytes after unit data")]
    TrailingBytes(usize),

    /// Two members share a signature
    #[error("Duplicate member {0}")]
    DuplicateMember(String),

    /// Branch pointing outside its method body
    #[error("Jump target {target} out of range in {method} ({len} instructions)")]
    InvalidJumpTarget {
        method: String,
        target: u32,
        len: usize,
    },
}

/// Member and unit visibility, ordered from most to least restrictive
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Package,
    Protected,
    #[default]
    Public,
}

impl Visibility {
    /// Visibility encoded in an access flag word
    pub fn from_access(flags: u32) -> Self {
        if flags & access::PUBLIC != 0 {
            Visibility::Public
        } else if flags & access::PROTECTED != 0 {
            Visibility::Protected
        } else if flags & access::PRIVATE != 0 {
            Visibility::Private
        } else {
            Visibility::Package
        }
    }

    /// Replace the visibility bits of `flags` with this visibility
    pub fn apply(self, flags: u32) -> u32 {
        let bits = match self {
            Visibility::Private => access::PRIVATE,
            Visibility::Package => 0,
            Visibility::Protected => access::PROTECTED,
            Visibility::Public => access::PUBLIC,
        };
        (flags & !access::VISIBILITY_MASK) | bits
    }
}

/// Constant value attached to a field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Constant {
    Int(i64),
    Str(String),
}

impl Constant {
    fn encode(&self, writer: &mut UnitWriter) {
        match self {
            Constant::Int(v) => {
                writer.emit_u8(1);
                writer.emit_i64(*v);
            }
            Constant::Str(s) => {
                writer.emit_u8(2);
                writer.emit_str(s);
            }
        }
    }

    fn decode(reader: &mut UnitReader<'_>) -> Result<Option<Self>, DecodeError> {
        let offset = reader.position();
        match reader.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(Constant::Int(reader.read_i64()?))),
            2 => Ok(Some(Constant::Str(reader.read_string()?))),
            tag => Err(DecodeError::InvalidTag {
                what: "constant",
                tag,
                offset,
            }),
        }
    }

    /// String value, if this is a string constant
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Constant::Str(s) => Some(s),
            Constant::Int(_) => None,
        }
    }
}

/// Field definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Access flags
    pub access: u32,
    /// Field name
    pub name: String,
    /// Type descriptor
    pub descriptor: String,
    /// Constant initializer
    pub constant: Option<Constant>,
}

impl FieldDef {
    /// Signature of this field
    pub fn signature(&self) -> MemberRef {
        MemberRef::new(self.name.clone(), self.descriptor.clone())
    }

    fn encode(&self, writer: &mut UnitWriter) {
        writer.emit_u32(self.access);
        writer.emit_str(&self.name);
        writer.emit_str(&self.descriptor);
        match &self.constant {
            Some(c) => c.encode(writer),
            None => writer.emit_u8(0),
        }
    }

    fn decode(reader: &mut UnitReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            access: reader.read_u32()?,
            name: reader.read_string()?,
            descriptor: reader.read_string()?,
            constant: Constant::decode(reader)?,
        })
    }
}

/// Method definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDef {
    /// Access flags
    pub access: u32,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub descriptor: String,
    /// Instruction stream
    pub code: Vec<Insn>,
}

impl MethodDef {
    /// Signature of this method
    pub fn signature(&self) -> MemberRef {
        MemberRef::new(self.name.clone(), self.descriptor.clone())
    }

    fn encode(&self, writer: &mut UnitWriter) {
        writer.emit_u32(self.access);
        writer.emit_str(&self.name);
        writer.emit_str(&self.descriptor);
        writer.emit_u32(self.code.len() as u32);
        for insn in &self.code {
            insn.encode(writer);
        }
    }

    fn decode(reader: &mut UnitReader<'_>) -> Result<Self, DecodeError> {
        let access = reader.read_u32()?;
        let name = reader.read_string()?;
        let descriptor = reader.read_string()?;

        let count = reader.read_u32()? as usize;
        // Every instruction takes at least one byte.
        let mut code = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            code.push(Insn::decode(reader)?);
        }

        Ok(Self {
            access,
            name,
            descriptor,
            code,
        })
    }
}

/// Structural view of one compiled unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassUnit {
    /// Unit flags
    pub flags: u32,
    /// Internal name (`world/World`)
    pub name: String,
    /// Super class internal name
    pub super_name: Option<String>,
    /// Access flags of the unit itself
    pub access: u32,
    /// Host compiler's class-format version
    pub class_version: u32,
    /// Field definitions
    pub fields: Vec<FieldDef>,
    /// Method definitions
    pub methods: Vec<MethodDef>,
}

impl ClassUnit {
    /// Create an empty public unit
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            flags: 0,
            name: name.into(),
            super_name: None,
            access: access::PUBLIC,
            class_version: 0,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Look up a field by signature
    pub fn field(&self, member: &MemberRef) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name == member.name && f.descriptor == member.descriptor)
    }

    /// Look up a method by signature
    pub fn method(&self, member: &MemberRef) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.name == member.name && m.descriptor == member.descriptor)
    }

    /// Mutable method lookup
    pub fn method_mut(&mut self, member: &MemberRef) -> Option<&mut MethodDef> {
        self.methods
            .iter_mut()
            .find(|m| m.name == member.name && m.descriptor == member.descriptor)
    }

    /// Mutable access flags of a member, whichever kind it is
    pub fn member_access_mut(&mut self, member: &MemberRef) -> Option<&mut u32> {
        if member.is_method() {
            self.method_mut(member).map(|m| &mut m.access)
        } else {
            self.fields
                .iter_mut()
                .find(|f| f.name == member.name && f.descriptor == member.descriptor)
                .map(|f| &mut f.access)
        }
    }

    /// Whether a field or method with this signature exists
    pub fn has_member(&self, member: &MemberRef) -> bool {
        if member.is_method() {
            self.method(member).is_some()
        } else {
            self.field(member).is_some()
        }
    }

    /// Structural checks that decoding alone cannot catch
    pub fn validate(&self) -> Result<(), UnitError> {
        let mut seen = FxHashSet::default();
        let signatures = self
            .fields
            .iter()
            .map(FieldDef::signature)
            .chain(self.methods.iter().map(MethodDef::signature));
        for sig in signatures {
            if !seen.insert(sig.clone()) {
                return Err(UnitError::DuplicateMember(sig.to_string()));
            }
        }

        for method in &self.methods {
            for insn in &method.code {
                if let Some(target) = insn.jump_target() {
                    if target as usize >= method.code.len() {
                        return Err(UnitError::InvalidJumpTarget {
                            method: method.signature().to_string(),
                            target,
                            len: method.code.len(),
                        });
                    }
                }
            }
        }

        Ok(())
    }

    /// Encode the unit to binary form
    ///
    /// Format:
    /// - Header: magic (4 bytes) + format (u32) + flags (u32) + checksum (u32)
    /// - Name, optional super name, access flags, class-format version
    /// - Field table
    /// - Method table with instruction streams
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = UnitWriter::new();

        writer.emit_bytes(&MAGIC);
        writer.emit_u32(FORMAT_VERSION);
        writer.emit_u32(self.flags);
        let checksum_offset = writer.offset();
        writer.emit_u32(0);

        writer.emit_str(&self.name);
        writer.emit_opt_str(self.super_name.as_deref());
        writer.emit_u32(self.access);
        writer.emit_u32(self.class_version);

        writer.emit_u32(self.fields.len() as u32);
        for field in &self.fields {
            field.encode(&mut writer);
        }

        writer.emit_u32(self.methods.len() as u32);
        for method in &self.methods {
            method.encode(&mut writer);
        }

        // CRC32 of everything after the header
        let checksum = crc32fast::hash(&writer.buffer()[HEADER_LEN..]);
        writer.patch_u32(checksum_offset, checksum);

        writer.into_bytes()
    }

    /// Decode and validate a unit
    pub fn decode(data: &[u8]) -> Result<Self, UnitError> {
        let mut reader = UnitReader::new(data);

        let magic = reader.read_array::<4>()?;
        if magic != MAGIC {
            return Err(UnitError::InvalidMagic(magic));
        }

        let format = reader.read_u32()?;
        if format != FORMAT_VERSION {
            return Err(UnitError::UnsupportedFormat(format));
        }

        let flags = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;

        let calculated_checksum = crc32fast::hash(&data[HEADER_LEN..]);
        if stored_checksum != calculated_checksum {
            return Err(UnitError::ChecksumMismatch {
                expected: stored_checksum,
                actual: calculated_checksum,
            });
        }

        let name = reader.read_string()?;
        let super_name = reader.read_opt_string()?;
        let access = reader.read_u32()?;
        let class_version = reader.read_u32()?;

        let field_count = reader.read_u32()? as usize;
        let mut fields = Vec::with_capacity(field_count.min(reader.remaining()));
        for _ in 0..field_count {
            fields.push(FieldDef::decode(&mut reader)?);
        }

        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count.min(reader.remaining()));
        for _ in 0..method_count {
            methods.push(MethodDef::decode(&mut reader)?);
        }

        if reader.has_more() {
            return Err(UnitError::TrailingBytes(reader.remaining()));
        }

        let unit = Self {
            flags,
            name,
            super_name,
            access,
            class_version,
            fields,
            methods,
        };
        unit.validate()?;
        Ok(unit)
    }
}
