//! `ModuleInfo`: the aggregate the translator hands to the cache (`getShader`)
//! alongside the translated SPIR-V-shaped module, so `C9` has something to
//! key invalidation and descriptor-set layout on besides raw words.
//!
//! Grounded on `original_source/.../gcn-shader/src/ModuleInfo.cpp`'s
//! `collectModuleInfo`/`collectFunctionInfo`: walk every `OpFunction` in the
//! SPIR-V function region, and for each, recursively resolve which global
//! variables it (transitively, through calls) reads and/or writes.

use indexmap::IndexMap;

use gpu_types::Access;

use crate::dialect::spirv;
use crate::ir::{Context, InstId, Op};

fn combine_access(a: Access, b: Access) -> Access {
    match (a.is_read() || b.is_read(), a.is_write() || b.is_write()) {
        (true, true) => Access::ReadWrite,
        (true, false) => Access::Read,
        (false, true) => Access::Write,
        (false, false) => Access::Read,
    }
}

/// One function's resource-access footprint: its parameters (in
/// declaration order) and every global `OpVariable` it touches, directly
/// or via a callee.
#[derive(Default, Clone, Debug)]
pub struct FunctionInfo {
    pub parameters: Vec<Access>,
    pub variables: IndexMap<InstId, Access>,
}

/// The whole module's resource-access map, one `FunctionInfo` per
/// `OpFunction` instruction, keyed by that instruction's id so a caller
/// that already has the entry point's `InstId` can look it up directly.
#[derive(Default, Clone, Debug)]
pub struct ModuleInfo {
    pub functions: IndexMap<InstId, FunctionInfo>,
}

/// Computes (and memoizes into `module_info.functions`) the access
/// footprint of `function`, recursing into callees first so a caller's
/// `OpFunctionCall` site can merge in the callee's already-computed
/// footprint. Matches `collectFunctionInfo`'s memoized recursion.
pub fn collect_function_info<'a>(
    ctx: &Context,
    module_info: &'a mut ModuleInfo,
    function: InstId,
) -> &'a FunctionInfo {
    if module_info.functions.contains_key(&function) {
        return &module_info.functions[&function];
    }
    module_info.functions.insert(function, FunctionInfo::default());

    let mut result = FunctionInfo::default();
    let mut param_index: IndexMap<InstId, usize> = IndexMap::new();

    let Some(block) = ctx.inst(function).block else {
        module_info.functions.insert(function, result);
        return &module_info.functions[&function];
    };

    let mut track_access = |result: &mut FunctionInfo, pointer: InstId, access: Access| {
        if let Some(&index) = param_index.get(&pointer) {
            let current = result.parameters[index];
            result.parameters[index] = combine_access(current, access);
            return;
        }
        if matches!(ctx.inst(pointer).op, Op::Spirv(spirv::Op::Variable)) {
            let entry = result.variables.entry(pointer).or_insert(access);
            *entry = combine_access(*entry, access);
        }
    };

    for inst in ctx.block_instructions(block) {
        if inst == function {
            continue;
        }
        let data = ctx.inst(inst);
        match data.op {
            Op::Spirv(spirv::Op::FunctionParameter) => {
                param_index.insert(inst, result.parameters.len());
                result.parameters.push(Access::Read);
            }
            Op::Spirv(spirv::Op::Load) => {
                if let Some(pointer) = data.operands.first().and_then(|o| o.as_value()) {
                    track_access(&mut result, pointer, Access::Read);
                }
            }
            Op::Spirv(spirv::Op::Store) => {
                if let Some(pointer) = data.operands.first().and_then(|o| o.as_value()) {
                    track_access(&mut result, pointer, Access::Write);
                }
            }
            Op::Builtin(crate::dialect::builtin::Op::FunctionCall) => {
                let Some(callee) = data.operands.first().and_then(|o| o.as_value()) else {
                    continue;
                };
                let callee_info = collect_function_info(ctx, module_info, callee).clone();
                for (i, access) in callee_info.parameters.iter().enumerate() {
                    if let Some(arg) = data.operands.get(i + 1).and_then(|o| o.as_value()) {
                        track_access(&mut result, arg, *access);
                    }
                }
                for (&global, &access) in &callee_info.variables {
                    track_access(&mut result, global, access);
                }
            }
            _ => {}
        }
    }

    module_info.functions.insert(function, result);
    &module_info.functions[&function]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Location, Operand};
    use smallvec::smallvec;

    #[test]
    fn load_and_store_are_tracked_as_read_write() {
        let mut ctx = Context::new();
        let loc = ctx.intern_location(Location::Unknown);
        let block = ctx.create_block();

        let func = ctx.create_instruction(loc, Op::Builtin(crate::dialect::builtin::Op::Label), smallvec![]);
        ctx.add_child(block, func);
        let var = ctx.create_instruction(loc, Op::Spirv(spirv::Op::Variable), smallvec![]);
        ctx.add_child(block, var);
        let load = ctx.create_instruction(loc, Op::Spirv(spirv::Op::Load), smallvec![Operand::Value(var)]);
        ctx.add_child(block, load);
        let store = ctx.create_instruction(loc, Op::Spirv(spirv::Op::Store), smallvec![Operand::Value(var), Operand::Value(load)]);
        ctx.add_child(block, store);

        let mut module_info = ModuleInfo::default();
        let info = collect_function_info(&ctx, &mut module_info, func);
        assert_eq!(info.variables.get(&var), Some(&Access::ReadWrite));
    }
}
