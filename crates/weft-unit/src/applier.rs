//! Patch application
//!
//! A [`PatchSession`] owns one code unit from raw bytes to finalized bytes:
//!
//! ```text
//! Unloaded --parse--> Parsed --apply--> Patched(1) --apply--> ... --finalize--> Finalized
//! ```
//!
//! Declarations are applied one at a time in the order the caller supplies,
//! which must be the resolved bundle order.

use crate::mapping::{Direction, MappingTable};
use crate::opcode::{Insn, InvokeKind};
use crate::patch::{PatchDeclaration, PatchOp};
use crate::remap::remap_unit;
use crate::symbol::{MemberRef, QualifiedRef};
use crate::unit::{access, flags, ClassUnit, FieldDef, MethodDef, UnitError, Visibility};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Dependency relation between bundles, as computed by the resolver
pub trait BundleRelations {
    /// Whether `dependent` depends on `dependency`, directly or transitively
    fn depends_on(&self, dependent: &str, dependency: &str) -> bool;
}

/// Relation in which no bundle depends on any other
#[derive(Debug, Clone, Copy, Default)]
pub struct Unrelated;

impl BundleRelations for Unrelated {
    fn depends_on(&self, _dependent: &str, _dependency: &str) -> bool {
        false
    }
}

impl<F> BundleRelations for F
where
    F: Fn(&str, &str) -> bool,
{
    fn depends_on(&self, dependent: &str, dependency: &str) -> bool {
        self(dependent, dependency)
    }
}

/// Lifecycle stage of a code unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unloaded,
    Parsed,
    /// Number of declarations applied so far
    Patched(usize),
    Finalized,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Unloaded => write!(f, "unloaded"),
            Stage::Parsed => write!(f, "parsed"),
            Stage::Patched(n) => write!(f, "patched({})", n),
            Stage::Finalized => write!(f, "finalized"),
        }
    }
}

/// Patch application errors
#[derive(Debug, Error)]
pub enum PatchError {
    /// Raw bytes are not a valid code unit
    #[error("Malformed unit '{unit}': {source}")]
    MalformedUnit {
        unit: String,
        #[source]
        source: UnitError,
    },

    /// Injected member collides with one the bundle may not override
    #[error("Bundle '{bundle}' cannot inject {unit}.{member}: already defined by {existing}")]
    MemberConflict {
        unit: String,
        member: String,
        bundle: String,
        existing: String,
    },

    /// Declaration refers to something the unit does not contain
    #[error("Bundle '{bundle}' patch on '{unit}': {what} not found")]
    TargetNotFound {
        unit: String,
        bundle: String,
        what: String,
    },

    /// Declaration routed to the wrong unit
    #[error("Declaration for '{target}' applied to unit '{unit}'")]
    WrongTarget { unit: String, target: String },

    /// Injected or inserted code branches outside itself
    #[error(
        "Bundle '{bundle}' supplied invalid code for {unit}.{member}: \
         jump target {target} out of range"
    )]
    InvalidCode {
        unit: String,
        bundle: String,
        member: String,
        target: u32,
    },

    /// Operation not allowed in the current stage
    #[error("Cannot {operation} unit '{unit}' in stage {stage}")]
    InvalidStage {
        unit: String,
        operation: &'static str,
        stage: Stage,
    },
}

/// One code unit being patched
#[derive(Debug)]
pub struct PatchSession {
    id: String,
    raw: Vec<u8>,
    unit: Option<ClassUnit>,
    stage: Stage,
    /// Members added by bundles, keyed by signature, valued by bundle id
    injected: FxHashMap<MemberRef, String>,
}

impl PatchSession {
    /// Start a session over the host's raw bytes for `id`
    pub fn new(id: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            raw,
            unit: None,
            stage: Stage::Unloaded,
            injected: FxHashMap::default(),
        }
    }

    /// Identifier the session was opened with
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Structural view, once parsed and until finalized
    pub fn unit(&self) -> Option<&ClassUnit> {
        self.unit.as_ref()
    }

    /// Name of the unit as declarations must target it
    pub fn unit_name(&self) -> &str {
        self.unit.as_ref().map_or(self.id.as_str(), |u| u.name.as_str())
    }

    /// Decode the raw bytes
    pub fn parse(&mut self) -> Result<&ClassUnit, PatchError> {
        self.expect_stage("parse", |s| s == Stage::Unloaded)?;

        let unit = ClassUnit::decode(&self.raw).map_err(|source| PatchError::MalformedUnit {
            unit: self.id.clone(),
            source,
        })?;
        self.raw = Vec::new();
        self.stage = Stage::Parsed;
        Ok(self.unit.insert(unit))
    }

    /// Translate every name in the unit; only before any patch is applied
    pub fn remap(&mut self, table: &MappingTable, direction: Direction) -> Result<(), PatchError> {
        self.expect_stage("remap", |s| s == Stage::Parsed)?;
        if let Some(unit) = self.unit.as_mut() {
            remap_unit(unit, table, direction);
        }
        Ok(())
    }

    /// Apply one declaration on behalf of `bundle`
    pub fn apply(
        &mut self,
        bundle: &str,
        decl: &PatchDeclaration,
        relations: &dyn BundleRelations,
    ) -> Result<(), PatchError> {
        self.expect_stage("patch", |s| matches!(s, Stage::Parsed | Stage::Patched(_)))?;
        let applied = match self.stage {
            Stage::Patched(n) => n,
            _ => 0,
        };

        let Some(unit) = self.unit.as_mut() else {
            return Err(self.stage_error("patch"));
        };
        if decl.target != unit.name {
            return Err(PatchError::WrongTarget {
                unit: unit.name.clone(),
                target: decl.target.clone(),
            });
        }

        match &decl.op {
            PatchOp::WidenAccess {
                member,
                access: visibility,
                mutable,
            } => widen_access(unit, bundle, member.as_ref(), *visibility, *mutable)?,
            PatchOp::InjectMethod {
                member,
                access: visibility,
                is_static,
                code,
            } => {
                check_jumps(unit, bundle, member, code, code.len())?;
                let method = MethodDef {
                    access: member_flags(*visibility, *is_static),
                    name: member.name.clone(),
                    descriptor: member.descriptor.clone(),
                    code: code.clone(),
                };
                check_injection(unit, &self.injected, bundle, member, relations)?;
                match unit.method_mut(member) {
                    Some(existing) => *existing = method,
                    None => unit.methods.push(method),
                }
                self.injected.insert(member.clone(), bundle.to_string());
            }
            PatchOp::InjectField {
                member,
                access: visibility,
                is_static,
                constant,
            } => {
                let field = FieldDef {
                    access: member_flags(*visibility, *is_static),
                    name: member.name.clone(),
                    descriptor: member.descriptor.clone(),
                    constant: constant.clone(),
                };
                check_injection(unit, &self.injected, bundle, member, relations)?;
                match unit
                    .fields
                    .iter_mut()
                    .find(|f| f.name == member.name && f.descriptor == member.descriptor)
                {
                    Some(existing) => *existing = field,
                    None => unit.fields.push(field),
                }
                self.injected.insert(member.clone(), bundle.to_string());
            }
            PatchOp::RedirectCall {
                method,
                from,
                to,
                invoke,
            } => redirect_call(unit, bundle, method.as_ref(), from, to, *invoke)?,
            PatchOp::InsertBefore {
                method,
                anchor,
                invoke,
                code,
            } => insert_before(unit, bundle, method, anchor, *invoke, code)?,
        }

        debug!(unit = %unit.name, bundle, patch = decl.op.kind_name(), "applied patch");
        self.stage = Stage::Patched(applied + 1);
        Ok(())
    }

    /// Serialize the unit; allowed exactly once
    pub fn finalize(&mut self) -> Result<Arc<[u8]>, PatchError> {
        self.expect_stage("finalize", |s| matches!(s, Stage::Parsed | Stage::Patched(_)))?;
        let Some(mut unit) = self.unit.take() else {
            return Err(self.stage_error("finalize"));
        };

        if let Stage::Patched(_) = self.stage {
            unit.flags |= flags::PATCHED;
        }
        self.stage = Stage::Finalized;
        Ok(Arc::from(unit.encode()))
    }

    fn expect_stage(
        &self,
        operation: &'static str,
        allowed: impl Fn(Stage) -> bool,
    ) -> Result<(), PatchError> {
        if allowed(self.stage) {
            Ok(())
        } else {
            Err(self.stage_error(operation))
        }
    }

    fn stage_error(&self, operation: &'static str) -> PatchError {
        PatchError::InvalidStage {
            unit: self.id.clone(),
            operation,
            stage: self.stage,
        }
    }
}

fn member_flags(visibility: Visibility, is_static: bool) -> u32 {
    let flags = visibility.apply(0);
    if is_static {
        flags | access::STATIC
    } else {
        flags
    }
}

fn not_found(unit: &ClassUnit, bundle: &str, what: impl fmt::Display) -> PatchError {
    PatchError::TargetNotFound {
        unit: unit.name.clone(),
        bundle: bundle.to_string(),
        what: what.to_string(),
    }
}

fn widen_access(
    unit: &mut ClassUnit,
    bundle: &str,
    member: Option<&MemberRef>,
    visibility: Visibility,
    mutable: bool,
) -> Result<(), PatchError> {
    if let Some(member) = member {
        if !unit.has_member(member) {
            return Err(not_found(unit, bundle, format_args!("member {}", member)));
        }
    }
    let bits = match member.and_then(|m| unit.member_access_mut(m)) {
        Some(bits) => bits,
        None => &mut unit.access,
    };

    // Never narrows: an already wider member is left alone.
    if Visibility::from_access(*bits) < visibility {
        *bits = visibility.apply(*bits);
    }
    if mutable {
        *bits &= !access::FINAL;
    }
    Ok(())
}

fn check_injection(
    unit: &ClassUnit,
    injected: &FxHashMap<MemberRef, String>,
    bundle: &str,
    member: &MemberRef,
    relations: &dyn BundleRelations,
) -> Result<(), PatchError> {
    if !unit.has_member(member) {
        return Ok(());
    }

    let existing = match injected.get(member) {
        Some(owner) if owner != bundle && relations.depends_on(bundle, owner) => return Ok(()),
        Some(owner) => format!("bundle '{}'", owner),
        None => "the host".to_string(),
    };
    Err(PatchError::MemberConflict {
        unit: unit.name.clone(),
        member: member.to_string(),
        bundle: bundle.to_string(),
        existing,
    })
}

fn check_jumps(
    unit: &ClassUnit,
    bundle: &str,
    member: &MemberRef,
    code: &[Insn],
    len: usize,
) -> Result<(), PatchError> {
    match code
        .iter()
        .filter_map(Insn::jump_target)
        .find(|&t| t as usize >= len)
    {
        Some(target) => Err(PatchError::InvalidCode {
            unit: unit.name.clone(),
            bundle: bundle.to_string(),
            member: member.to_string(),
            target,
        }),
        None => Ok(()),
    }
}

fn redirect_call(
    unit: &mut ClassUnit,
    bundle: &str,
    method: Option<&MemberRef>,
    from: &QualifiedRef,
    to: &QualifiedRef,
    invoke: Option<InvokeKind>,
) -> Result<(), PatchError> {
    if let Some(method) = method {
        if unit.method(method).is_none() {
            return Err(not_found(unit, bundle, format_args!("method {}", method)));
        }
    }

    let mut rewritten = 0usize;
    let scope = unit
        .methods
        .iter_mut()
        .filter(|m| {
            method.map_or(true, |sig| m.name == sig.name && m.descriptor == sig.descriptor)
        });
    for body in scope {
        for insn in &mut body.code {
            if let Insn::Invoke {
                kind,
                owner,
                name,
                descriptor,
            } = insn
            {
                if from.matches(owner, name, descriptor) {
                    *owner = to.owner.clone();
                    *name = to.member.name.clone();
                    *descriptor = to.member.descriptor.clone();
                    if let Some(new_kind) = invoke {
                        *kind = new_kind;
                    }
                    rewritten += 1;
                }
            }
        }
    }

    if rewritten == 0 {
        return Err(not_found(unit, bundle, format_args!("call site {}", from)));
    }
    debug!(unit = %unit.name, from = %from, to = %to, sites = rewritten, "redirected calls");
    Ok(())
}

fn insert_before(
    unit: &mut ClassUnit,
    bundle: &str,
    method: &MemberRef,
    anchor: &QualifiedRef,
    invoke: Option<InvokeKind>,
    code: &[Insn],
) -> Result<(), PatchError> {
    check_jumps(unit, bundle, method, code, code.len())?;

    let Some(index) = unit.method(method).and_then(|body| {
        body.code.iter().position(|insn| match insn {
            Insn::Invoke {
                kind,
                owner,
                name,
                descriptor,
            } => invoke.map_or(true, |k| k == *kind) && anchor.matches(owner, name, descriptor),
            _ => false,
        })
    }) else {
        return Err(if unit.has_member(method) {
            not_found(unit, bundle, format_args!("call site {} in {}", anchor, method))
        } else {
            not_found(unit, bundle, format_args!("method {}", method))
        });
    };

    let Some(body) = unit.method_mut(method) else {
        return Err(not_found(unit, bundle, format_args!("method {}", method)));
    };

    let shift = code.len() as u32;
    let at = index as u32;
    // Branches to the anchor now land on the inserted code.
    for insn in &mut body.code {
        if let Some(target) = insn.jump_target_mut() {
            if *target > at {
                *target += shift;
            }
        }
    }
    let inserted = code.iter().cloned().map(|mut insn| {
        if let Some(target) = insn.jump_target_mut() {
            *target += at;
        }
        insn
    });
    body.code.splice(index..index, inserted);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_unit() -> ClassUnit {
        let mut unit = ClassUnit::new("world/World");
        unit.fields.push(FieldDef {
            access: access::PRIVATE | access::FINAL,
            name: "age".to_string(),
            descriptor: "I".to_string(),
            constant: None,
        });
        unit.methods.push(MethodDef {
            access: access::PRIVATE,
            name: "tick".to_string(),
            descriptor: "()V".to_string(),
            code: vec![
                Insn::JumpIfFalse { target: 2 },
                Insn::invoke(InvokeKind::Virtual, "world/Entity", "update", "()V"),
                Insn::invoke(InvokeKind::Static, "world/Clock", "advance", "()V"),
                Insn::Return,
            ],
        });
        unit
    }

    fn session() -> PatchSession {
        let mut session = PatchSession::new("world/World", host_unit().encode());
        session.parse().unwrap();
        session
    }

    fn decl(op: PatchOp) -> PatchDeclaration {
        PatchDeclaration {
            target: "world/World".to_string(),
            op,
        }
    }

    fn widen(member: &str) -> PatchDeclaration {
        decl(PatchOp::WidenAccess {
            member: Some(MemberRef::parse(member).unwrap()),
            access: Visibility::Public,
            mutable: false,
        })
    }

    fn inject_method(name: &str, value: i64) -> PatchDeclaration {
        decl(PatchOp::InjectMethod {
            member: MemberRef::new(name, "()J"),
            access: Visibility::Public,
            is_static: false,
            code: vec![Insn::ConstInt { value }, Insn::ReturnValue],
        })
    }

    #[test]
    fn test_stage_transitions() {
        let mut session = PatchSession::new("world/World", host_unit().encode());
        assert_eq!(session.stage(), Stage::Unloaded);
        assert!(matches!(
            session.finalize(),
            Err(PatchError::InvalidStage { .. })
        ));

        session.parse().unwrap();
        assert_eq!(session.stage(), Stage::Parsed);

        session.apply("a", &widen("tick()V"), &Unrelated).unwrap();
        session.apply("b", &widen("age:I"), &Unrelated).unwrap();
        assert_eq!(session.stage(), Stage::Patched(2));

        let bytes = session.finalize().unwrap();
        assert_eq!(session.stage(), Stage::Finalized);
        let unit = ClassUnit::decode(&bytes).unwrap();
        assert_eq!(unit.flags & flags::PATCHED, flags::PATCHED);

        assert!(matches!(
            session.finalize(),
            Err(PatchError::InvalidStage { stage: Stage::Finalized, .. })
        ));
        assert!(matches!(
            session.apply("a", &widen("tick()V"), &Unrelated),
            Err(PatchError::InvalidStage { .. })
        ));
    }

    #[test]
    fn test_malformed_unit() {
        let mut bytes = host_unit().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let mut session = PatchSession::new("world/World", bytes);
        assert!(matches!(
            session.parse(),
            Err(PatchError::MalformedUnit { .. })
        ));
        assert_eq!(session.stage(), Stage::Unloaded);
    }

    #[test]
    fn test_widen_access_idempotent() {
        let mut once = session();
        once.apply("a", &widen("tick()V"), &Unrelated).unwrap();
        let once = once.finalize().unwrap();

        let mut twice = session();
        twice.apply("a", &widen("tick()V"), &Unrelated).unwrap();
        twice.apply("a", &widen("tick()V"), &Unrelated).unwrap();
        let twice = twice.finalize().unwrap();

        assert_eq!(once, twice);
        let unit = ClassUnit::decode(&once).unwrap();
        let tick = unit.method(&MemberRef::new("tick", "()V")).unwrap();
        assert_eq!(Visibility::from_access(tick.access), Visibility::Public);
    }

    #[test]
    fn test_widen_access_never_narrows() {
        let mut session = session();
        session.apply("a", &widen("tick()V"), &Unrelated).unwrap();
        session
            .apply(
                "b",
                &decl(PatchOp::WidenAccess {
                    member: Some(MemberRef::new("tick", "()V")),
                    access: Visibility::Protected,
                    mutable: false,
                }),
                &Unrelated,
            )
            .unwrap();
        let tick = session.unit().unwrap().method(&MemberRef::new("tick", "()V")).unwrap();
        assert_eq!(Visibility::from_access(tick.access), Visibility::Public);
    }

    #[test]
    fn test_widen_access_mutable_and_unit() {
        let mut session = session();
        session
            .apply(
                "a",
                &decl(PatchOp::WidenAccess {
                    member: Some(MemberRef::new("age", "I")),
                    access: Visibility::Public,
                    mutable: true,
                }),
                &Unrelated,
            )
            .unwrap();
        let age = session.unit().unwrap().field(&MemberRef::new("age", "I")).unwrap();
        assert_eq!(age.access, access::PUBLIC);

        let mut unit = host_unit();
        unit.access = access::FINAL;
        let mut session = PatchSession::new("world/World", unit.encode());
        session.parse().unwrap();
        session
            .apply(
                "a",
                &decl(PatchOp::WidenAccess {
                    member: None,
                    access: Visibility::Public,
                    mutable: true,
                }),
                &Unrelated,
            )
            .unwrap();
        assert_eq!(session.unit().unwrap().access, access::PUBLIC);
    }

    #[test]
    fn test_widen_unknown_member() {
        let mut session = session();
        let err = session.apply("a", &widen("missing()V"), &Unrelated).unwrap_err();
        assert!(matches!(err, PatchError::TargetNotFound { .. }));
        assert_eq!(session.stage(), Stage::Parsed);
    }

    #[test]
    fn test_inject_conflict_without_relation() {
        let mut session = session();
        session.apply("a", &inject_method("size", 1), &Unrelated).unwrap();
        let err = session
            .apply("b", &inject_method("size", 2), &Unrelated)
            .unwrap_err();
        match err {
            PatchError::MemberConflict {
                bundle, existing, ..
            } => {
                assert_eq!(bundle, "b");
                assert_eq!(existing, "bundle 'a'");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_inject_override_with_dependency() {
        let b_depends_on_a =
            |dependent: &str, dependency: &str| dependent == "b" && dependency == "a";

        let mut session = session();
        session.apply("a", &inject_method("size", 1), &b_depends_on_a).unwrap();
        session.apply("b", &inject_method("size", 2), &b_depends_on_a).unwrap();
        let unit = ClassUnit::decode(&session.finalize().unwrap()).unwrap();

        let size = unit.method(&MemberRef::new("size", "()J")).unwrap();
        assert_eq!(size.code[0], Insn::ConstInt { value: 2 });
        assert_eq!(unit.methods.len(), 2);
    }

    #[test]
    fn test_inject_over_host_member() {
        let mut session = session();
        let err = session
            .apply(
                "a",
                &decl(PatchOp::InjectField {
                    member: MemberRef::new("age", "I"),
                    access: Visibility::Public,
                    is_static: false,
                    constant: None,
                }),
                &|_: &str, _: &str| true,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            PatchError::MemberConflict { existing, .. } if existing == "the host"
        ));
    }

    #[test]
    fn test_inject_same_bundle_twice() {
        let mut session = session();
        session.apply("a", &inject_method("size", 1), &Unrelated).unwrap();
        assert!(matches!(
            session.apply("a", &inject_method("size", 1), &Unrelated),
            Err(PatchError::MemberConflict { .. })
        ));
    }

    #[test]
    fn test_inject_invalid_code() {
        let mut session = session();
        let err = session
            .apply(
                "a",
                &decl(PatchOp::InjectMethod {
                    member: MemberRef::new("loop", "()V"),
                    access: Visibility::Public,
                    is_static: true,
                    code: vec![Insn::Jump { target: 5 }],
                }),
                &Unrelated,
            )
            .unwrap_err();
        assert!(matches!(err, PatchError::InvalidCode { target: 5, .. }));
    }

    #[test]
    fn test_redirect_call() {
        let mut session = session();
        session
            .apply(
                "a",
                &decl(PatchOp::RedirectCall {
                    method: Some(MemberRef::new("tick", "()V")),
                    from: QualifiedRef::parse("world/Entity.update()V").unwrap(),
                    to: QualifiedRef::parse("hooks/Hooks.update(Lworld/Entity;)V").unwrap(),
                    invoke: Some(InvokeKind::Static),
                }),
                &Unrelated,
            )
            .unwrap();

        let tick = session.unit().unwrap().method(&MemberRef::new("tick", "()V")).unwrap();
        assert_eq!(
            tick.code[1],
            Insn::invoke(InvokeKind::Static, "hooks/Hooks", "update", "(Lworld/Entity;)V")
        );
    }

    #[test]
    fn test_redirect_without_match() {
        let mut session = session();
        let err = session
            .apply(
                "a",
                &decl(PatchOp::RedirectCall {
                    method: None,
                    from: QualifiedRef::parse("world/Entity.remove()V").unwrap(),
                    to: QualifiedRef::parse("hooks/Hooks.remove()V").unwrap(),
                    invoke: None,
                }),
                &Unrelated,
            )
            .unwrap_err();
        assert!(matches!(err, PatchError::TargetNotFound { .. }));
    }

    #[test]
    fn test_insert_before_shifts_jumps() {
        let mut session = session();
        session
            .apply(
                "a",
                &decl(PatchOp::InsertBefore {
                    method: MemberRef::new("tick", "()V"),
                    anchor: QualifiedRef::parse("world/Clock.advance()V").unwrap(),
                    invoke: None,
                    code: vec![
                        Insn::JumpIfFalse { target: 1 },
                        Insn::invoke(InvokeKind::Static, "hooks/Hooks", "beforeAdvance", "()V"),
                    ],
                }),
                &Unrelated,
            )
            .unwrap();

        let tick = session.unit().unwrap().method(&MemberRef::new("tick", "()V")).unwrap();
        assert_eq!(tick.code.len(), 6);
        // Existing branch to the anchor lands on the inserted code.
        assert_eq!(tick.code[0], Insn::JumpIfFalse { target: 2 });
        assert_eq!(tick.code[2], Insn::JumpIfFalse { target: 3 });
        assert_eq!(
            tick.code[4],
            Insn::invoke(InvokeKind::Static, "world/Clock", "advance", "()V")
        );
        session.unit().unwrap().validate().unwrap();
    }

    #[test]
    fn test_insert_before_missing_anchor() {
        let mut session = session();
        let err = session
            .apply(
                "a",
                &decl(PatchOp::InsertBefore {
                    method: MemberRef::new("tick", "()V"),
                    anchor: QualifiedRef::parse("world/Clock.stop()V").unwrap(),
                    invoke: None,
                    code: vec![Insn::Nop],
                }),
                &Unrelated,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            PatchError::TargetNotFound { what, .. } if what.starts_with("call site")
        ));
    }

    #[test]
    fn test_insert_before_filters_invoke_kind() {
        let mut unit = host_unit();
        unit.methods.push(MethodDef {
            access: access::PUBLIC,
            name: "spin".to_string(),
            descriptor: "()V".to_string(),
            code: vec![
                Insn::invoke(InvokeKind::Virtual, "world/Clock", "advance", "()V"),
                Insn::invoke(InvokeKind::Static, "world/Clock", "advance", "()V"),
                Insn::Return,
            ],
        });
        let spin = MemberRef::new("spin", "()V");
        let before_static = |invoke| {
            decl(PatchOp::InsertBefore {
                method: spin.clone(),
                anchor: QualifiedRef::parse("world/Clock.advance()V").unwrap(),
                invoke,
                code: vec![Insn::Nop],
            })
        };

        let mut session = PatchSession::new("world/World", unit.encode());
        session.parse().unwrap();
        session
            .apply("a", &before_static(Some(InvokeKind::Static)), &Unrelated)
            .unwrap();
        let code = &session.unit().unwrap().method(&spin).unwrap().code;
        assert_eq!(code[1], Insn::Nop);
        assert_eq!(code[2], Insn::invoke(InvokeKind::Static, "world/Clock", "advance", "()V"));

        let err = session
            .apply("a", &before_static(Some(InvokeKind::Interface)), &Unrelated)
            .unwrap_err();
        assert!(matches!(err, PatchError::TargetNotFound { .. }));
    }

    #[test]
    fn test_wrong_target() {
        let mut session = session();
        let mut declaration = widen("tick()V");
        declaration.target = "world/Entity".to_string();
        assert!(matches!(
            session.apply("a", &declaration, &Unrelated),
            Err(PatchError::WrongTarget { .. })
        ));
    }

    #[test]
    fn test_remap_only_before_patching() {
        let table = MappingTable::load("class\tworld/World\tlevel/Level\t\n").unwrap();
        let mut session = session();
        session.remap(&table, Direction::ToIntermediate).unwrap();
        assert_eq!(session.unit_name(), "level/Level");

        let mut declaration = widen("tick()V");
        declaration.target = "level/Level".to_string();
        session.apply("a", &declaration, &Unrelated).unwrap();
        assert!(matches!(
            session.remap(&table, Direction::ToIntermediate),
            Err(PatchError::InvalidStage { .. })
        ));
    }
}
