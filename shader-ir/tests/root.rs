//! Integration tests covering cross-module properties: CFG determinism,
//! dominance correctness, SSA use-list integrity, clone idempotence,
//! instruction-combiner monotonicity, and memory-SSA soundness.

use shader_ir::analysis::{build_cfg, build_dom_tree, build_memory_ssa, build_post_dom_tree};
use shader_ir::dialect::{builtin, spirv};
use shader_ir::translate::optimize;
use shader_ir::{CloneMap, Context, Location, Op, Operand};

fn build_diamond(ctx: &mut Context) -> (shader_ir::BlockId, shader_ir::InstId, shader_ir::InstId, shader_ir::InstId, shader_ir::InstId) {
    let loc = ctx.intern_location(Location::Unknown);
    let entry_block = ctx.create_block();
    let then_block = ctx.create_block();
    let else_block = ctx.create_block();
    let merge_block = ctx.create_block();

    let entry_label = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec::smallvec![]);
    let then_label = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec::smallvec![]);
    let else_label = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec::smallvec![]);
    let merge_label = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec::smallvec![]);

    ctx.add_child(entry_block, entry_label);
    ctx.add_child(then_block, then_label);
    ctx.add_child(else_block, else_label);
    ctx.add_child(merge_block, merge_label);

    let cond = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantBool), smallvec::smallvec![Operand::Bool(true)]);
    let branch_cond = ctx.create_instruction(
        loc,
        Op::Builtin(builtin::Op::BranchConditional),
        smallvec::smallvec![Operand::Value(cond), Operand::Value(then_label), Operand::Value(else_label)],
    );
    ctx.add_child(entry_block, branch_cond);

    let branch_then = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Branch), smallvec::smallvec![Operand::Value(merge_label)]);
    ctx.add_child(then_block, branch_then);
    let branch_else = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Branch), smallvec::smallvec![Operand::Value(merge_label)]);
    ctx.add_child(else_block, branch_else);

    (entry_block, entry_label, then_label, else_label, merge_label)
}

/// Property 2: CFG determinism.
#[test]
fn cfg_construction_is_deterministic() {
    let mut ctx = Context::new();
    let (entry_block, ..) = build_diamond(&mut ctx);

    let cfg1 = build_cfg(&ctx, entry_block, &[], None);
    let cfg2 = build_cfg(&ctx, entry_block, &[], None);

    assert_eq!(cfg1.preorder(), cfg2.preorder());
    assert_eq!(cfg1.postorder(), cfg2.postorder());
    for label in cfg1.labels() {
        assert_eq!(
            cfg1.node(label).unwrap().successors,
            cfg2.node(label).unwrap().successors
        );
    }
}

/// Property 3 / Scenario D: dominance and post-dominance on a diamond CFG.
#[test]
fn diamond_dominance_and_post_dominance_match_scenario_d() {
    let mut ctx = Context::new();
    let (entry_block, entry_label, then_label, else_label, merge_label) = build_diamond(&mut ctx);
    let cfg = build_cfg(&ctx, entry_block, &[], None);

    let dom = build_dom_tree(&cfg);
    assert_eq!(dom.idom(entry_label), None);
    assert_eq!(dom.idom(then_label), Some(entry_label));
    assert_eq!(dom.idom(else_label), Some(entry_label));
    assert_eq!(dom.idom(merge_label), Some(entry_label));

    let post_dom = build_post_dom_tree(&cfg);
    assert!(post_dom.dominates(merge_label, entry_label));
    assert!(post_dom.dominates(merge_label, then_label));
    assert!(post_dom.dominates(merge_label, else_label));
}

/// Property 4: SSA use-list integrity after create/replace/remove.
#[test]
fn use_list_tracks_every_operand_reference() {
    let mut ctx = Context::new();
    let loc = ctx.intern_location(Location::Unknown);
    let a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec::smallvec![Operand::Int32(1)]);
    let b = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec::smallvec![Operand::Int32(2)]);
    let add1 = ctx.create_instruction(loc, Op::Builtin(builtin::Op::IAdd), smallvec::smallvec![Operand::Value(a), Operand::Value(a)]);
    let add2 = ctx.create_instruction(loc, Op::Builtin(builtin::Op::IAdd), smallvec::smallvec![Operand::Value(a), Operand::Value(b)]);

    assert_eq!(ctx.inst(a).uses().len(), 3);

    ctx.replace_all_uses_with(a, b);
    assert_eq!(ctx.inst(a).uses().len(), 0);
    assert_eq!(ctx.inst(b).uses().len(), 3);
    assert_eq!(ctx.inst(add1).operands[0], Operand::Value(b));
    assert_eq!(ctx.inst(add1).operands[1], Operand::Value(b));
    assert_eq!(ctx.inst(add2).operands[0], Operand::Value(b));

    let block = ctx.create_block();
    ctx.add_child(block, b);
    ctx.add_child(block, add1);
    ctx.add_child(block, add2);
    ctx.remove_instruction(add1);
    // add1 no longer uses b, but add2 still does.
    assert_eq!(ctx.inst(b).uses().len(), 2);
}

/// Property 5: clone idempotence — cloning the same subtree through two
/// independent `CloneMap`s yields isomorphic, non-interfering clones (each
/// map's clone shares the sub-structure of the original, and the two
/// clones don't alias each other's instructions).
#[test]
fn cloning_through_independent_maps_yields_isomorphic_clones() {
    let mut ctx = Context::new();
    let loc = ctx.intern_location(Location::Unknown);
    let a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec::smallvec![Operand::Int32(5)]);
    let add = ctx.create_instruction(loc, Op::Builtin(builtin::Op::IAdd), smallvec::smallvec![Operand::Value(a), Operand::Value(a)]);

    let mut map1 = CloneMap::default();
    let cloned1 = map1.get_or_clone(&mut ctx, add);

    let mut map2 = CloneMap::default();
    let cloned2 = map2.get_or_clone(&mut ctx, add);

    assert_eq!(ctx.inst(cloned1).op, ctx.inst(cloned2).op);
    assert_eq!(ctx.inst(cloned1).operands.len(), ctx.inst(cloned2).operands.len());
    assert_eq!(ctx.inst(cloned1).operands[0], ctx.inst(cloned1).operands[1]);
    assert_ne!(cloned1, cloned2);
}

/// Property 6 / Scenario F: the instruction combiner never increases
/// instruction count, and a second run makes no further change.
#[test]
fn combiner_is_monotonic_and_idempotent() {
    let mut ctx = Context::new();
    let loc = ctx.intern_location(Location::Unknown);
    let entry_block = ctx.create_block();
    let label = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec::smallvec![]);
    ctx.add_child(entry_block, label);

    let x = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec::smallvec![Operand::Int32(41)]);
    ctx.add_child(entry_block, x);
    let one_a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec::smallvec![Operand::Int32(1)]);
    ctx.add_child(entry_block, one_a);
    let add_a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::IAdd), smallvec::smallvec![Operand::Value(x), Operand::Value(one_a)]);
    ctx.add_child(entry_block, add_a);

    let one_b = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec::smallvec![Operand::Int32(1)]);
    ctx.add_child(entry_block, one_b);
    let add_b = ctx.create_instruction(loc, Op::Builtin(builtin::Op::IAdd), smallvec::smallvec![Operand::Value(x), Operand::Value(one_b)]);
    ctx.add_child(entry_block, add_b);

    let ret = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Return), smallvec::smallvec![]);
    ctx.add_child(entry_block, ret);

    let before = ctx.instruction_count();
    optimize(&mut ctx, entry_block);
    let after_first = ctx.instruction_count();
    assert!(after_first <= before);

    optimize(&mut ctx, entry_block);
    let after_second = ctx.instruction_count();
    assert_eq!(after_first, after_second);

    assert_eq!(ctx.inst(add_a).operands[1], ctx.inst(add_b).operands[1]);
}

/// Property 7: memory-SSA soundness — the Def reaching a load either
/// dominates the load or is a Phi.
#[test]
fn memory_ssa_def_reaching_load_dominates_or_is_phi() {
    let mut ctx = Context::new();
    let (entry_block, entry_label, then_label, else_label, merge_label) = build_diamond(&mut ctx);
    let loc = ctx.intern_location(Location::Unknown);

    let pointer = ctx.create_instruction(loc, Op::Spirv(spirv::Op::Variable), smallvec::smallvec![]);
    ctx.insert_after(entry_label, pointer);

    let value = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec::smallvec![Operand::Int32(1)]);
    ctx.insert_after(pointer, value);
    let store = ctx.create_instruction(loc, Op::Spirv(spirv::Op::Store), smallvec::smallvec![Operand::Value(pointer), Operand::Value(value)]);
    ctx.insert_after(then_label, store);

    let load = ctx.create_instruction(loc, Op::Spirv(spirv::Op::Load), smallvec::smallvec![Operand::Value(pointer)]);
    ctx.insert_after(merge_label, load);

    let cfg = build_cfg(&ctx, entry_block, &[], None);
    let dom = build_dom_tree(&cfg);
    let ssa = build_memory_ssa(&mut ctx, &cfg, &dom, &[pointer]);

    let def = ssa.get_def(load).expect("load must resolve to a reaching definition");
    let reaches_via_dominance = dom.dominates(def, load);
    let reaches_via_phi = matches!(
        ctx.inst(def).op,
        Op::MemSsa(shader_ir::dialect::memssa::Op::Phi | shader_ir::dialect::memssa::Op::Var)
    );
    assert!(reaches_via_dominance || reaches_via_phi);

    let _ = else_label;
}
