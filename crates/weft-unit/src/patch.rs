//! Declarative patch descriptions
//!
//! Declarations are plain data read from bundle manifests. The applier matches
//! over [`PatchOp`] exhaustively; adding an operation kind means adding a
//! variant here and an arm there.

use crate::opcode::{Insn, InvokeKind};
use crate::symbol::{MemberRef, QualifiedRef};
use crate::unit::{Constant, Visibility};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One patch against one code unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchDeclaration {
    /// Internal name of the unit to patch
    pub target: String,

    /// Operation and payload
    #[serde(flatten)]
    pub op: PatchOp,
}

/// Patch operation kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PatchOp {
    /// Relax the visibility of a member, or of the unit itself when `member`
    /// is absent
    WidenAccess {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        member: Option<MemberRef>,
        #[serde(default)]
        access: Visibility,
        /// Also drop the final flag
        #[serde(default)]
        mutable: bool,
    },

    /// Add a method
    InjectMethod {
        member: MemberRef,
        #[serde(default)]
        access: Visibility,
        #[serde(default, rename = "static")]
        is_static: bool,
        code: Vec<Insn>,
    },

    /// Add a field
    InjectField {
        member: MemberRef,
        #[serde(default)]
        access: Visibility,
        #[serde(default, rename = "static")]
        is_static: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        constant: Option<Constant>,
    },

    /// Point call sites of `from` at `to`
    RedirectCall {
        /// Only rewrite call sites inside this method
        #[serde(default, skip_serializing_if = "Option::is_none")]
        method: Option<MemberRef>,
        from: QualifiedRef,
        to: QualifiedRef,
        /// Dispatch kind of the new call; unchanged when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invoke: Option<InvokeKind>,
    },

    /// Insert instructions right before the first call to `anchor` in `method`
    InsertBefore {
        method: MemberRef,
        anchor: QualifiedRef,
        /// Only match anchor calls of this dispatch kind
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invoke: Option<InvokeKind>,
        code: Vec<Insn>,
    },
}

impl PatchOp {
    /// Manifest name of the operation kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            PatchOp::WidenAccess { .. } => "widen-access",
            PatchOp::InjectMethod { .. } => "inject-method",
            PatchOp::InjectField { .. } => "inject-field",
            PatchOp::RedirectCall { .. } => "redirect-call",
            PatchOp::InsertBefore { .. } => "insert-before",
        }
    }
}

impl fmt::Display for PatchDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.op.kind_name(), self.target)?;
        match &self.op {
            PatchOp::WidenAccess {
                member: Some(member),
                ..
            }
            | PatchOp::InjectMethod { member, .. }
            | PatchOp::InjectField { member, .. } => write!(f, ".{}", member),
            PatchOp::WidenAccess { member: None, .. } => Ok(()),
            PatchOp::RedirectCall { from, to, .. } => write!(f, " {} -> {}", from, to),
            PatchOp::InsertBefore { method, anchor, .. } => {
                write!(f, ".{} before {}", method, anchor)
            }
        }
    }
}
