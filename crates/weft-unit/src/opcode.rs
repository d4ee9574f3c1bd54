//! Instruction set of a code unit method body
//!
//! Method bodies are small stack-machine programs. Only the instructions the
//! loader needs to reason about carry symbolic operands: invocations, field
//! accesses and allocations reference other units by name, which is what the
//! mapping layer rewrites and what call redirection matches against.

use crate::encoder::{DecodeError, UnitReader, UnitWriter};
use serde::{Deserialize, Serialize};

/// Opcode byte values
///
/// - 0x00-0x0F: Stack manipulation & constants
/// - 0x10-0x1F: Local variables
/// - 0x90-0x9F: Control flow
/// - 0xA0-0xAF: Invocations
/// - 0xB0-0xBF: Object operations
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Swap top two stack values
    Swap = 0x03,
    /// Push null constant
    ConstNull = 0x04,
    /// Push 64-bit integer constant (operand: i64)
    ConstInt = 0x07,
    /// Push string constant (operand: string)
    ConstStr = 0x09,

    /// Load local variable (operand: u16 index)
    LoadLocal = 0x10,
    /// Store local variable (operand: u16 index)
    StoreLocal = 0x11,

    /// Unconditional jump (operand: u32 instruction index)
    Jump = 0x90,
    /// Jump if top of stack is false (operand: u32 instruction index)
    JumpIfFalse = 0x91,
    /// Return without value
    Return = 0x98,
    /// Return top of stack
    ReturnValue = 0x99,

    /// Static invocation (operands: owner, name, descriptor)
    InvokeStatic = 0xA0,
    /// Virtual invocation (operands: owner, name, descriptor)
    InvokeVirtual = 0xA1,
    /// Special invocation: constructors, private and super calls
    InvokeSpecial = 0xA2,
    /// Interface invocation (operands: owner, name, descriptor)
    InvokeInterface = 0xA3,

    /// Read instance field (operands: owner, name, descriptor)
    GetField = 0xB0,
    /// Write instance field (operands: owner, name, descriptor)
    PutField = 0xB1,
    /// Read static field (operands: owner, name, descriptor)
    GetStatic = 0xB2,
    /// Write static field (operands: owner, name, descriptor)
    PutStatic = 0xB3,
    /// Allocate an instance (operand: class name)
    New = 0xB8,
}

impl Opcode {
    /// Convert a byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x03 => Some(Self::Swap),
            0x04 => Some(Self::ConstNull),
            0x07 => Some(Self::ConstInt),
            0x09 => Some(Self::ConstStr),
            0x10 => Some(Self::LoadLocal),
            0x11 => Some(Self::StoreLocal),
            0x90 => Some(Self::Jump),
            0x91 => Some(Self::JumpIfFalse),
            0x98 => Some(Self::Return),
            0x99 => Some(Self::ReturnValue),
            0xA0 => Some(Self::InvokeStatic),
            0xA1 => Some(Self::InvokeVirtual),
            0xA2 => Some(Self::InvokeSpecial),
            0xA3 => Some(Self::InvokeInterface),
            0xB0 => Some(Self::GetField),
            0xB1 => Some(Self::PutField),
            0xB2 => Some(Self::GetStatic),
            0xB3 => Some(Self::PutStatic),
            0xB8 => Some(Self::New),
            _ => None,
        }
    }

    /// Convert the opcode to its byte value
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::Swap => "SWAP",
            Self::ConstNull => "CONST_NULL",
            Self::ConstInt => "CONST_INT",
            Self::ConstStr => "CONST_STR",
            Self::LoadLocal => "LOAD_LOCAL",
            Self::StoreLocal => "STORE_LOCAL",
            Self::Jump => "JUMP",
            Self::JumpIfFalse => "JUMP_IF_FALSE",
            Self::Return => "RETURN",
            Self::ReturnValue => "RETURN_VALUE",
            Self::InvokeStatic => "INVOKE_STATIC",
            Self::InvokeVirtual => "INVOKE_VIRTUAL",
            Self::InvokeSpecial => "INVOKE_SPECIAL",
            Self::InvokeInterface => "INVOKE_INTERFACE",
            Self::GetField => "GET_FIELD",
            Self::PutField => "PUT_FIELD",
            Self::GetStatic => "GET_STATIC",
            Self::PutStatic => "PUT_STATIC",
            Self::New => "NEW",
        }
    }
}

/// Dispatch kind of an invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvokeKind {
    Static,
    Virtual,
    Special,
    Interface,
}

impl InvokeKind {
    fn opcode(self) -> Opcode {
        match self {
            InvokeKind::Static => Opcode::InvokeStatic,
            InvokeKind::Virtual => Opcode::InvokeVirtual,
            InvokeKind::Special => Opcode::InvokeSpecial,
            InvokeKind::Interface => Opcode::InvokeInterface,
        }
    }
}

/// Field access kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOp {
    Get,
    Put,
    GetStatic,
    PutStatic,
}

impl FieldOp {
    fn opcode(self) -> Opcode {
        match self {
            FieldOp::Get => Opcode::GetField,
            FieldOp::Put => Opcode::PutField,
            FieldOp::GetStatic => Opcode::GetStatic,
            FieldOp::PutStatic => Opcode::PutStatic,
        }
    }
}

/// A decoded instruction with its operands
///
/// Jump targets are instruction indices within the same method body, not byte
/// offsets, so inserting instructions only requires shifting indices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Insn {
    Nop,
    Pop,
    Dup,
    Swap,
    ConstNull,
    ConstInt {
        value: i64,
    },
    ConstStr {
        value: String,
    },
    LoadLocal {
        index: u16,
    },
    StoreLocal {
        index: u16,
    },
    Jump {
        target: u32,
    },
    JumpIfFalse {
        target: u32,
    },
    Return,
    ReturnValue,
    Invoke {
        kind: InvokeKind,
        owner: String,
        name: String,
        descriptor: String,
    },
    Field {
        kind: FieldOp,
        owner: String,
        name: String,
        descriptor: String,
    },
    New {
        class: String,
    },
}

impl Insn {
    /// Opcode of this instruction
    pub fn opcode(&self) -> Opcode {
        match self {
            Insn::Nop => Opcode::Nop,
            Insn::Pop => Opcode::Pop,
            Insn::Dup => Opcode::Dup,
            Insn::Swap => Opcode::Swap,
            Insn::ConstNull => Opcode::ConstNull,
            Insn::ConstInt { .. } => Opcode::ConstInt,
            Insn::ConstStr { .. } => Opcode::ConstStr,
            Insn::LoadLocal { .. } => Opcode::LoadLocal,
            Insn::StoreLocal { .. } => Opcode::StoreLocal,
            Insn::Jump { .. } => Opcode::Jump,
            Insn::JumpIfFalse { .. } => Opcode::JumpIfFalse,
            Insn::Return => Opcode::Return,
            Insn::ReturnValue => Opcode::ReturnValue,
            Insn::Invoke { kind, .. } => kind.opcode(),
            Insn::Field { kind, .. } => kind.opcode(),
            Insn::New { .. } => Opcode::New,
        }
    }

    /// Build an invocation instruction
    pub fn invoke(kind: InvokeKind, owner: &str, name: &str, descriptor: &str) -> Self {
        Insn::Invoke {
            kind,
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    /// Jump target, if this is a branch
    pub fn jump_target(&self) -> Option<u32> {
        match self {
            Insn::Jump { target } | Insn::JumpIfFalse { target } => Some(*target),
            _ => None,
        }
    }

    /// Mutable jump target, if this is a branch
    pub fn jump_target_mut(&mut self) -> Option<&mut u32> {
        match self {
            Insn::Jump { target } | Insn::JumpIfFalse { target } => Some(target),
            _ => None,
        }
    }

    /// Encode the instruction
    pub fn encode(&self, writer: &mut UnitWriter) {
        writer.emit_u8(self.opcode().to_u8());
        match self {
            Insn::ConstInt { value } => writer.emit_i64(*value),
            Insn::ConstStr { value } => writer.emit_str(value),
            Insn::LoadLocal { index } | Insn::StoreLocal { index } => writer.emit_u16(*index),
            Insn::Jump { target } | Insn::JumpIfFalse { target } => writer.emit_u32(*target),
            Insn::Invoke {
                owner,
                name,
                descriptor,
                ..
            }
            | Insn::Field {
                owner,
                name,
                descriptor,
                ..
            } => {
                writer.emit_str(owner);
                writer.emit_str(name);
                writer.emit_str(descriptor);
            }
            Insn::New { class } => writer.emit_str(class),
            Insn::Nop
            | Insn::Pop
            | Insn::Dup
            | Insn::Swap
            | Insn::ConstNull
            | Insn::Return
            | Insn::ReturnValue => {}
        }
    }

    /// Decode one instruction
    pub fn decode(reader: &mut UnitReader<'_>) -> Result<Self, DecodeError> {
        let offset = reader.position();
        let byte = reader.read_u8()?;
        let opcode = Opcode::from_u8(byte).ok_or(DecodeError::InvalidOpcode(byte, offset))?;

        let insn = match opcode {
            Opcode::Nop => Insn::Nop,
            Opcode::Pop => Insn::Pop,
            Opcode::Dup => Insn::Dup,
            Opcode::Swap => Insn::Swap,
            Opcode::ConstNull => Insn::ConstNull,
            Opcode::ConstInt => Insn::ConstInt {
                value: reader.read_i64()?,
            },
            Opcode::ConstStr => Insn::ConstStr {
                value: reader.read_string()?,
            },
            Opcode::LoadLocal => Insn::LoadLocal {
                index: reader.read_u16()?,
            },
            Opcode::StoreLocal => Insn::StoreLocal {
                index: reader.read_u16()?,
            },
            Opcode::Jump => Insn::Jump {
                target: reader.read_u32()?,
            },
            Opcode::JumpIfFalse => Insn::JumpIfFalse {
                target: reader.read_u32()?,
            },
            Opcode::Return => Insn::Return,
            Opcode::ReturnValue => Insn::ReturnValue,
            Opcode::InvokeStatic
            | Opcode::InvokeVirtual
            | Opcode::InvokeSpecial
            | Opcode::InvokeInterface => {
                let kind = match opcode {
                    Opcode::InvokeStatic => InvokeKind::Static,
                    Opcode::InvokeVirtual => InvokeKind::Virtual,
                    Opcode::InvokeSpecial => InvokeKind::Special,
                    _ => InvokeKind::Interface,
                };
                Insn::Invoke {
                    kind,
                    owner: reader.read_string()?,
                    name: reader.read_string()?,
                    descriptor: reader.read_string()?,
                }
            }
            Opcode::GetField | Opcode::PutField | Opcode::GetStatic | Opcode::PutStatic => {
                let kind = match opcode {
                    Opcode::GetField => FieldOp::Get,
                    Opcode::PutField => FieldOp::Put,
                    Opcode::GetStatic => FieldOp::GetStatic,
                    _ => FieldOp::PutStatic,
                };
                Insn::Field {
                    kind,
                    owner: reader.read_string()?,
                    name: reader.read_string()?,
                    descriptor: reader.read_string()?,
                }
            }
            Opcode::New => Insn::New {
                class: reader.read_string()?,
            },
        };

        Ok(insn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_mapping() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_u8(byte) {
                assert_eq!(op.to_u8(), byte, "{}", op.name());
            }
        }
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_invoke_encoding_layout() {
        let insn = Insn::invoke(InvokeKind::Static, "a", "b", "()V");
        let mut writer = UnitWriter::new();
        insn.encode(&mut writer);
        let bytes = writer.into_bytes();

        assert_eq!(bytes[0], Opcode::InvokeStatic.to_u8());
        // opcode + three length-prefixed strings
        assert_eq!(bytes.len(), 1 + (4 + 1) + (4 + 1) + (4 + 3));

        let mut reader = UnitReader::new(&bytes);
        assert_eq!(Insn::decode(&mut reader).unwrap(), insn);
    }

    #[test]
    fn test_unknown_opcode() {
        let mut reader = UnitReader::new(&[0x55]);
        assert!(matches!(
            Insn::decode(&mut reader),
            Err(DecodeError::InvalidOpcode(0x55, 0))
        ));
    }

    #[test]
    fn test_jump_target_accessors() {
        let mut insn = Insn::JumpIfFalse { target: 3 };
        assert_eq!(insn.jump_target(), Some(3));
        *insn.jump_target_mut().unwrap() += 2;
        assert_eq!(insn.jump_target(), Some(5));
        assert_eq!(Insn::Return.jump_target(), None);
    }

    #[test]
    fn test_deserialize_from_toml() {
        #[derive(Deserialize)]
        struct Body {
            code: Vec<Insn>,
        }

        let body: Body = toml::from_str(
            r#"
code = [
    { op = "load_local", index = 0 },
    { op = "invoke", kind = "static", owner = "hooks/Hooks", name = "onTick", descriptor = "(I)V" },
    { op = "return" },
]
"#,
        )
        .unwrap();

        assert_eq!(body.code.len(), 3);
        assert_eq!(body.code[0], Insn::LoadLocal { index: 0 });
        assert_eq!(
            body.code[1],
            Insn::invoke(InvokeKind::Static, "hooks/Hooks", "onTick", "(I)V")
        );
        assert_eq!(body.code[2], Insn::Return);
    }
}
