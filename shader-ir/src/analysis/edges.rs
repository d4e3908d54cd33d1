use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::InstId;

use super::cfg::Cfg;
use super::dom::DomTree;

/// Every back edge (an edge whose target dominates its source) found in a
/// CFG, keyed by source label. Grounded on
/// `BackEdgeStorage{backEdges: unordered_map<Value,set<Value>>}`. Used by
/// loop detection in the translator (a construct's header is the target
/// of at least one back edge) and by the memory-SSA builder to decide
/// where a `Barrier` must force fresh definitions.
#[derive(Default)]
pub struct BackEdgeStorage {
    back_edges: FxHashMap<InstId, FxHashSet<InstId>>,
}

impl BackEdgeStorage {
    pub fn is_back_edge(&self, from: InstId, to: InstId) -> bool {
        self.back_edges.get(&from).is_some_and(|set| set.contains(&to))
    }

    pub fn targets_from(&self, from: InstId) -> impl Iterator<Item = InstId> + '_ {
        self.back_edges.get(&from).into_iter().flatten().copied()
    }

    pub fn is_loop_header(&self, label: InstId) -> bool {
        self.back_edges.values().any(|targets| targets.contains(&label))
    }
}

pub fn find_back_edges(cfg: &Cfg, dom: &DomTree) -> BackEdgeStorage {
    let mut back_edges: FxHashMap<InstId, FxHashSet<InstId>> = FxHashMap::default();
    for label in cfg.labels() {
        for &succ in &cfg.node(label).unwrap().successors {
            if dom.dominates(succ, label) {
                back_edges.entry(label).or_default().insert(succ);
            }
        }
    }
    BackEdgeStorage { back_edges }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg::build_cfg;
    use crate::analysis::dom::build_dom_tree;
    use crate::dialect::builtin;
    use crate::ir::{Context, Location, Op, Operand};
    use smallvec::smallvec;

    #[test]
    fn simple_loop_back_edge_detected() {
        let mut ctx = Context::new();
        let loc = ctx.intern_location(Location::Unknown);
        let header_block = ctx.create_block();
        let body_block = ctx.create_block();
        let exit_block = ctx.create_block();

        let header = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec![]);
        let body = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec![]);
        let exit = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec![]);
        ctx.add_child(header_block, header);
        ctx.add_child(body_block, body);
        ctx.add_child(exit_block, exit);

        let cond = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantBool), smallvec![Operand::Bool(true)]);
        let header_branch = ctx.create_instruction(
            loc,
            Op::Builtin(builtin::Op::BranchConditional),
            smallvec![Operand::Value(cond), Operand::Value(body), Operand::Value(exit)],
        );
        ctx.add_child(header_block, header_branch);

        let back_branch = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Branch), smallvec![Operand::Value(header)]);
        ctx.add_child(body_block, back_branch);

        let cfg = build_cfg(&ctx, header_block, &[], None);
        let dom = build_dom_tree(&cfg);
        let back_edges = find_back_edges(&cfg, &dom);

        assert!(back_edges.is_back_edge(body, header));
        assert!(back_edges.is_loop_header(header));
        assert!(!back_edges.is_back_edge(header, body));
    }
}
