//! Rewriting a unit from one naming scheme into the other

use crate::mapping::{Direction, MappingTable};
use crate::opcode::Insn;
use crate::unit::ClassUnit;

/// Translate every symbolic name in `unit`
///
/// Member lookups use the owner and descriptor as they appear in the source
/// scheme, so all names are resolved before any of them is replaced.
pub fn remap_unit(unit: &mut ClassUnit, table: &MappingTable, direction: Direction) {
    if table.is_empty() {
        return;
    }

    let owner = unit.name.clone();

    for field in &mut unit.fields {
        let name = table
            .map_field(&owner, &field.name, &field.descriptor, direction)
            .to_string();
        field.descriptor = table.map_descriptor(&field.descriptor, direction);
        field.name = name;
    }

    for method in &mut unit.methods {
        let name = table
            .map_method(&owner, &method.name, &method.descriptor, direction)
            .to_string();
        method.descriptor = table.map_descriptor(&method.descriptor, direction);
        method.name = name;

        for insn in &mut method.code {
            remap_insn(insn, table, direction);
        }
    }

    unit.name = table.map_class(&owner, direction).to_string();
    if let Some(super_name) = &mut unit.super_name {
        *super_name = table.map_class(super_name, direction).to_string();
    }
}

/// Translate the symbolic operands of one instruction
pub fn remap_insn(insn: &mut Insn, table: &MappingTable, direction: Direction) {
    match insn {
        Insn::Invoke {
            owner,
            name,
            descriptor,
            ..
        } => {
            *name = table
                .map_method(owner, name, descriptor, direction)
                .to_string();
            *descriptor = table.map_descriptor(descriptor, direction);
            *owner = table.map_class(owner, direction).to_string();
        }
        Insn::Field {
            owner,
            name,
            descriptor,
            ..
        } => {
            *name = table
                .map_field(owner, name, descriptor, direction)
                .to_string();
            *descriptor = table.map_descriptor(descriptor, direction);
            *owner = table.map_class(owner, direction).to_string();
        }
        Insn::New { class } => {
            *class = table.map_class(class, direction).to_string();
        }
        _ => {}
    }
}
