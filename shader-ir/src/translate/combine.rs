//! Instruction combiner: common-subexpression elimination over pure
//! instructions, run to a fixed point by the caller.
//!
//! Grounded on `original_source/.../gcn-shader/src/opt.cpp`'s
//! `combineInstructions`: walk blocks in dominance preorder; for every
//! side-effect-free instruction, look up the per-opcode bucket of
//! previously-seen instructions with identical operands. If one is found
//! that dominates the current instruction, replace all uses of the current
//! instruction with it and erase the current instruction; otherwise record
//! it in the bucket for later instructions to match against.

use rustc_hash::FxHashMap;

use crate::analysis::dom::DomTree;
use crate::ir::{Context, InstId, Op};

/// Runs one combining pass over every block reachable from `preorder`,
/// which must already be ordered so that a block's dominator-tree parent
/// is visited before its children (the `Cfg::preorder` field produced by
/// `build_cfg` satisfies this since it is a preorder DFS over successors,
/// and dominance preorder is always a refinement of any CFG preorder DFS).
///
/// Returns the number of instructions removed; termination is guaranteed
/// since each pass either removes at least one instruction or removes none
/// (callers loop `while combine_instructions(..) != 0`).
pub fn combine_instructions(ctx: &mut Context, preorder: &[InstId], dom: &DomTree) -> usize {
    let mut buckets: FxHashMap<Op, Vec<InstId>> = FxHashMap::default();
    let mut changes = 0usize;

    for &label in preorder {
        let Some(block) = ctx.inst(label).block else {
            continue;
        };
        let insts: Vec<InstId> = ctx.block_instructions(block).collect();

        for inst in insts {
            if inst == label {
                continue;
            }
            let op = ctx.inst(inst).op;
            if op.is_terminator() || !op.is_without_side_effects() {
                continue;
            }

            let bucket = buckets.entry(op).or_default();
            let found = bucket.iter().copied().find(|&prev| {
                operands_equal(ctx, prev, inst) && dom.dominates(dominator_label(ctx, prev), label)
            });

            match found {
                Some(prev) => {
                    ctx.replace_all_uses_with(inst, prev);
                    ctx.remove_instruction(inst);
                    changes += 1;
                }
                None => bucket.push(inst),
            }
        }
    }

    changes
}

fn operands_equal(ctx: &Context, a: InstId, b: InstId) -> bool {
    ctx.inst(a).operands == ctx.inst(b).operands
}

/// The label of the block containing `inst`, used as the dominance query
/// key since `DomTree` is built over block labels, not individual
/// instructions.
fn dominator_label(ctx: &Context, inst: InstId) -> InstId {
    let block = ctx.inst(inst).block.expect("instruction must be attached to a block");
    ctx.block_instructions(block)
        .next()
        .expect("block must start with a label instruction")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg::build_cfg;
    use crate::analysis::dom::build_dom_tree;
    use crate::dialect::builtin;
    use crate::ir::{Location, Operand};
    use smallvec::smallvec;

    #[test]
    fn duplicate_pure_instruction_is_combined() {
        let mut ctx = Context::new();
        let loc = ctx.intern_location(Location::Unknown);
        let entry = ctx.create_block();
        let label = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec![]);
        ctx.add_child(entry, label);

        let a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![Operand::Int32(7)]);
        ctx.add_child(entry, a);
        let b = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![Operand::Int32(7)]);
        ctx.add_child(entry, b);
        let user = ctx.create_instruction(loc, Op::Builtin(builtin::Op::IAdd), smallvec![Operand::Value(a), Operand::Value(b)]);
        ctx.add_child(entry, user);
        let ret = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Return), smallvec![]);
        ctx.add_child(entry, ret);

        let cfg = build_cfg(&ctx, entry, &[], None);
        let dom = build_dom_tree(&cfg);
        let changes = combine_instructions(&mut ctx, cfg.preorder(), &dom);

        assert_eq!(changes, 1);
        assert_eq!(ctx.inst(user).operands[0], Operand::Value(a));
        assert_eq!(ctx.inst(user).operands[1], Operand::Value(a));
    }

    #[test]
    fn distinct_operands_are_not_combined() {
        let mut ctx = Context::new();
        let loc = ctx.intern_location(Location::Unknown);
        let entry = ctx.create_block();
        let label = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec![]);
        ctx.add_child(entry, label);
        let a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![Operand::Int32(1)]);
        ctx.add_child(entry, a);
        let b = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![Operand::Int32(2)]);
        ctx.add_child(entry, b);
        let ret = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Return), smallvec![]);
        ctx.add_child(entry, ret);

        let cfg = build_cfg(&ctx, entry, &[], None);
        let dom = build_dom_tree(&cfg);
        let changes = combine_instructions(&mut ctx, cfg.preorder(), &dom);
        assert_eq!(changes, 0);
    }
}
