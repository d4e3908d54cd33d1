use rustc_hash::{FxHashMap, FxHashSet};

use crate::dialect::memssa;
use crate::ir::{BlockId, Context, InstId, Op};

use super::cfg::Cfg;
use super::dom::DomTree;

/// The memory-SSA shadow graph built for one function: every load/store of
/// a tracked pointer gets an entry recording which `memssa`-dialect `Def`/
/// `Phi`/`Use` instruction represents its reaching definition. Grounded on
/// `original_source/.../analyze.hpp`'s `MemorySSA{variableToVar, userDefs,
/// getVar/getDef/getDefInst}`.
pub struct MemorySsa {
    variable_to_var: FxHashMap<InstId, InstId>,
    user_defs: FxHashMap<InstId, InstId>,
}

impl MemorySsa {
    pub fn get_var(&self, pointer: InstId) -> Option<InstId> {
        self.variable_to_var.get(&pointer).copied()
    }

    pub fn get_def(&self, user: InstId) -> Option<InstId> {
        self.user_defs.get(&user).copied()
    }

    pub fn get_def_inst(&self, user: InstId) -> Option<InstId> {
        self.get_def(user)
    }
}

/// One instruction (load or store) that touches a tracked pointer.
struct MemoryAccess {
    inst: InstId,
    block: BlockId,
    label: InstId,
    pointer: InstId,
    is_store: bool,
}

/// Builds memory SSA for the instructions reachable from `cfg`, tracking
/// every pointer in `tracked_pointers` (typically every `Variable`
/// instruction in the function, one per decomposed pointer-path
/// component — see `DefWrapper::addVariable` in the original). Phi
/// placement uses the standard iterated-dominance-frontier construction
/// over `dom`.
pub fn build_memory_ssa(
    ctx: &mut Context,
    cfg: &Cfg,
    dom: &DomTree,
    tracked_pointers: &[InstId],
) -> MemorySsa {
    let accesses = collect_memory_accesses(ctx, cfg, tracked_pointers);
    let frontier = dominance_frontier(cfg, dom);

    let mut variable_to_var = FxHashMap::default();
    let mut user_defs = FxHashMap::default();
    let loc = accesses
        .first()
        .map(|a| ctx.inst(a.inst).location)
        .unwrap_or_else(|| ctx.intern_location(crate::ir::Location::Unknown));

    for &pointer in tracked_pointers {
        let var = ctx.create_instruction(loc, Op::MemSsa(memssa::Op::Var), smallvec::smallvec![]);
        variable_to_var.insert(pointer, var);

        let def_blocks: FxHashSet<InstId> = accesses
            .iter()
            .filter(|a| a.pointer == pointer && a.is_store)
            .map(|a| a.label)
            .collect();

        let phi_blocks = iterated_dominance_frontier(&frontier, &def_blocks);

        let mut phis: FxHashMap<InstId, InstId> = FxHashMap::default();
        for &block_label in &phi_blocks {
            let phi = ctx.create_instruction(loc, Op::MemSsa(memssa::Op::Phi), smallvec::smallvec![]);
            phis.insert(block_label, phi);
        }

        rename_pointer(
            ctx,
            cfg,
            dom,
            pointer,
            var,
            &accesses,
            &phis,
            &mut user_defs,
            cfg.entry(),
            &mut Vec::new(),
        );
    }

    MemorySsa {
        variable_to_var,
        user_defs,
    }
}

fn collect_memory_accesses(
    ctx: &Context,
    cfg: &Cfg,
    tracked_pointers: &[InstId],
) -> Vec<MemoryAccess> {
    let tracked: FxHashSet<InstId> = tracked_pointers.iter().copied().collect();
    let mut accesses = Vec::new();
    for label in cfg.labels() {
        let Some(block) = ctx.inst(label).block else {
            continue;
        };
        for inst in ctx.block_instructions(block) {
            let data = ctx.inst(inst);
            let pointer = match data.op {
                Op::Spirv(crate::dialect::spirv::Op::Load) => data.operands.first().and_then(|o| o.as_value()),
                Op::Spirv(crate::dialect::spirv::Op::Store) => data.operands.first().and_then(|o| o.as_value()),
                _ => None,
            };
            let Some(pointer) = pointer else { continue };
            if !tracked.contains(&pointer) {
                continue;
            }
            accesses.push(MemoryAccess {
                inst,
                block,
                label,
                pointer,
                is_store: matches!(data.op, Op::Spirv(crate::dialect::spirv::Op::Store)),
            });
        }
    }
    accesses
}

fn dominance_frontier(cfg: &Cfg, dom: &DomTree) -> FxHashMap<InstId, FxHashSet<InstId>> {
    let mut df: FxHashMap<InstId, FxHashSet<InstId>> = FxHashMap::default();
    for label in cfg.labels() {
        let node = cfg.node(label).unwrap();
        if node.predecessors.len() < 2 {
            continue;
        }
        for &pred in &node.predecessors {
            let mut runner = pred;
            while Some(runner) != dom.idom(label) {
                df.entry(runner).or_default().insert(label);
                match dom.idom(runner) {
                    Some(next) => runner = next,
                    None => break,
                }
            }
        }
    }
    df
}

fn iterated_dominance_frontier(
    frontier: &FxHashMap<InstId, FxHashSet<InstId>>,
    def_blocks: &FxHashSet<InstId>,
) -> FxHashSet<InstId> {
    let mut result = FxHashSet::default();
    let mut worklist: Vec<InstId> = def_blocks.iter().copied().collect();
    let mut queued: FxHashSet<InstId> = def_blocks.clone();

    while let Some(block) = worklist.pop() {
        for &frontier_block in frontier.get(&block).into_iter().flatten() {
            if result.insert(frontier_block) && queued.insert(frontier_block) {
                worklist.push(frontier_block);
            }
        }
    }
    result
}

#[allow(clippy::too_many_arguments)]
fn rename_pointer(
    ctx: &mut Context,
    cfg: &Cfg,
    dom: &DomTree,
    pointer: InstId,
    var: InstId,
    accesses: &[MemoryAccess],
    phis: &FxHashMap<InstId, InstId>,
    user_defs: &mut FxHashMap<InstId, InstId>,
    block_label: InstId,
    stack: &mut Vec<InstId>,
) {
    let pushed_by_phi = if let Some(&phi) = phis.get(&block_label) {
        stack.push(phi);
        true
    } else {
        false
    };

    let mut pushes_in_block = 0usize;
    for access in accesses.iter().filter(|a| a.label == block_label && a.pointer == pointer) {
        if access.is_store {
            let loc = ctx.inst(access.inst).location;
            let value = ctx.inst(access.inst).operands.get(1).cloned().unwrap_or(crate::ir::Operand::Null);
            let def = ctx.create_instruction(loc, Op::MemSsa(memssa::Op::Def), smallvec::smallvec![value]);
            stack.push(def);
            pushes_in_block += 1;
            user_defs.insert(access.inst, def);
        } else {
            let current = *stack.last().unwrap_or(&var);
            user_defs.insert(access.inst, current);
        }
    }

    if let Some(node) = cfg.node(block_label) {
        for &succ in &node.successors {
            if let Some(&phi) = phis.get(&succ) {
                let incoming = *stack.last().unwrap_or(&var);
                ctx.inst_mut(phi).operands.push(crate::ir::Operand::Value(incoming));
            }
        }
    }

    let children: Vec<InstId> = cfg
        .labels()
        .filter(|&l| dom.idom(l) == Some(block_label))
        .collect();
    for child in children {
        rename_pointer(ctx, cfg, dom, pointer, var, accesses, phis, user_defs, child, stack);
    }

    for _ in 0..pushes_in_block {
        stack.pop();
    }
    if pushed_by_phi {
        stack.pop();
    }
}
