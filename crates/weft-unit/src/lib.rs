//! Weft code unit library
//!
//! This crate holds everything that touches a single compiled host unit:
//! - Binary unit format (encoding, decoding, checksums)
//! - Instruction set
//! - Member signatures and qualified references
//! - Obfuscated/intermediate mapping table and unit remapping
//! - Declarative patches and the patch session that applies them

pub mod applier;
pub mod encoder;
pub mod mapping;
pub mod opcode;
pub mod patch;
pub mod remap;
pub mod symbol;
pub mod unit;

pub use applier::{BundleRelations, PatchError, PatchSession, Stage, Unrelated};
pub use encoder::{DecodeError, UnitReader, UnitWriter};
pub use mapping::{Direction, MappingEntry, MappingError, MappingTable, SymbolKind};
pub use opcode::{FieldOp, Insn, InvokeKind, Opcode};
pub use patch::{PatchDeclaration, PatchOp};
pub use remap::{remap_insn, remap_unit};
pub use symbol::{map_descriptor_classes, MemberRef, QualifiedRef, SymbolError};
pub use unit::{ClassUnit, Constant, FieldDef, MethodDef, UnitError, Visibility};
