//! GCN binary + environment descriptor → SPIR-V-shaped IR.
//!
//! Grounded on `original_source/.../gcn-shader` as a whole: `decode`
//! (worked `SOP2` slice of the GCN-to-IR lowering), `combine` (the
//! instruction-combining optimizer from `opt.cpp`), and `module_info` (the
//! per-function resource-access aggregate from `ModuleInfo.cpp`). `C9`
//! caches the `TranslatedShader` this module produces, not raw SPIR-V
//! words, so invalidation can reason about which buffers/images a compiled
//! shader touches without re-decoding it.

mod combine;
mod decode;
mod module_info;

pub use combine::combine_instructions;
pub use decode::{decode_sop2, emit_sop2, translate_sop2_block, DecodeError, Sop2Instruction};
pub use module_info::{collect_function_info, FunctionInfo, ModuleInfo};

use crate::analysis::cfg::build_cfg;
use crate::analysis::dom::build_dom_tree;
use crate::ir::{BlockId, Context, InstId};

/// The GPU pipeline stage a shader binary is translated for, matching the
/// environment descriptor's `stage` field (`original_source/...`'s
/// `ShaderStage`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
    Compute,
}

/// Where in the guest's user-SGPR window each shader resource (buffer,
/// image, sampler) is bound, the minimal slice of the environment
/// descriptor this translator needs; a full implementation also carries
/// vertex-fetch and export-format tables, left for the resource cache's
/// `getShader` caller to supply alongside this descriptor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Environment {
    pub stage: Option<Stage>,
    pub user_sgpr_count: u8,
}

/// The output of one shader translation: the IR module (rooted at
/// `entry_block`) plus its resource-access footprint.
pub struct TranslatedShader {
    pub entry_block: BlockId,
    pub entry: InstId,
    pub module_info: ModuleInfo,
}

/// Runs the instruction combiner to a fixed point over `entry_block`,
/// matching the original's `optimize` caller loop (`while (optimize(...))`)
/// — each call to `combine_instructions` either strictly shrinks the
/// instruction count or leaves it unchanged, so this terminates.
pub fn optimize(ctx: &mut Context, entry_block: BlockId) {
    loop {
        let cfg = build_cfg(ctx, entry_block, &[], None);
        let dom = build_dom_tree(&cfg);
        let preorder = cfg.preorder().to_vec();
        if combine_instructions(ctx, &preorder, &dom) == 0 {
            break;
        }
    }
}

/// Translates one already-decoded entry function into its final form: runs
/// the instruction combiner to a fixed point, then collects its resource
/// footprint for the cache to key on.
pub fn finish_translation(ctx: &mut Context, entry_block: BlockId, entry: InstId) -> TranslatedShader {
    optimize(ctx, entry_block);
    let mut module_info = ModuleInfo::default();
    collect_function_info(ctx, &mut module_info, entry);
    TranslatedShader {
        entry_block,
        entry,
        module_info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::builtin;
    use crate::ir::{Location, Op, Operand};
    use smallvec::smallvec;

    #[test]
    fn optimize_removes_duplicate_constants() {
        let mut ctx = Context::new();
        let loc = ctx.intern_location(Location::Unknown);
        let entry_block = ctx.create_block();
        let label = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec![]);
        ctx.add_child(entry_block, label);
        let a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![Operand::Int32(9)]);
        ctx.add_child(entry_block, a);
        let b = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![Operand::Int32(9)]);
        ctx.add_child(entry_block, b);
        let add = ctx.create_instruction(loc, Op::Builtin(builtin::Op::IAdd), smallvec![Operand::Value(a), Operand::Value(b)]);
        ctx.add_child(entry_block, add);
        let ret = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Return), smallvec![]);
        ctx.add_child(entry_block, ret);

        optimize(&mut ctx, entry_block);
        assert_eq!(ctx.inst(add).operands[0], Operand::Value(a));
        assert_eq!(ctx.inst(add).operands[1], Operand::Value(a));
    }
}
