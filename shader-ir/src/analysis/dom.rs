use rustc_hash::{FxHashMap, FxHashSet};

use crate::ir::InstId;

use super::cfg::Cfg;

/// A dominator (or post-dominator) tree over CFG labels, recording each
/// node's immediate dominator. Built with the standard Cooper/Harvey/
/// Kennedy iterative engineering algorithm — a Semi-NCA-family fixed
/// point over reverse-postorder numbers, matching the complexity class
/// (and in practice the output) of the Semi-NCA construction the
/// original names, without needing its separate semidominator pass.
pub struct DomTree {
    idom: FxHashMap<InstId, InstId>,
    roots: Vec<InstId>,
}

impl DomTree {
    pub fn idom(&self, node: InstId) -> Option<InstId> {
        let idom = *self.idom.get(&node)?;
        if idom == node {
            None
        } else {
            Some(idom)
        }
    }

    pub fn roots(&self) -> &[InstId] {
        &self.roots
    }

    /// Whether `a` dominates `b` (a node dominates itself).
    pub fn dominates(&self, a: InstId, b: InstId) -> bool {
        if !self.idom.contains_key(&b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(next) => cur = next,
                None => return cur == a,
            }
        }
    }

    /// The nearest common dominator of `a` and `b`, matching
    /// `findNearestCommonDominator`. Walks `a`'s dominator chain into a
    /// set, then walks `b`'s chain until it hits a member of that set.
    pub fn nearest_common_dominator(&self, a: InstId, b: InstId) -> Option<InstId> {
        if !self.idom.contains_key(&a) || !self.idom.contains_key(&b) {
            return None;
        }
        let mut ancestors_of_a = FxHashSet::default();
        let mut cur = a;
        loop {
            ancestors_of_a.insert(cur);
            match self.idom(cur) {
                Some(next) => cur = next,
                None => break,
            }
        }

        let mut cur = b;
        loop {
            if ancestors_of_a.contains(&cur) {
                return Some(cur);
            }
            match self.idom(cur) {
                Some(next) => cur = next,
                None => return None,
            }
        }
    }
}

pub fn build_dom_tree(cfg: &Cfg) -> DomTree {
    let succ: FxHashMap<InstId, Vec<InstId>> = cfg
        .labels()
        .map(|l| (l, cfg.node(l).unwrap().successors.clone()))
        .collect();
    let pred: FxHashMap<InstId, Vec<InstId>> = cfg
        .labels()
        .map(|l| (l, cfg.node(l).unwrap().predecessors.clone()))
        .collect();
    compute_idom(&[cfg.entry()], &succ, &pred)
}

/// Builds the post-dominator tree by reversing every edge and treating
/// every label with no successors as a virtual-exit root. Shader CFGs are
/// expected to be structured (single `Return` per entry), so in practice
/// there is exactly one such root; the multi-root form is kept anyway so
/// a degenerate module with an early `Kill`/discard path still gets a
/// well-defined (if coarser) post-dominance relation instead of panicking.
pub fn build_post_dom_tree(cfg: &Cfg) -> DomTree {
    let succ: FxHashMap<InstId, Vec<InstId>> = cfg
        .labels()
        .map(|l| (l, cfg.node(l).unwrap().predecessors.clone()))
        .collect();
    let pred: FxHashMap<InstId, Vec<InstId>> = cfg
        .labels()
        .map(|l| (l, cfg.node(l).unwrap().successors.clone()))
        .collect();
    let roots: Vec<InstId> = cfg
        .labels()
        .filter(|&l| cfg.node(l).unwrap().successors.is_empty())
        .collect();
    let roots = if roots.is_empty() { vec![cfg.entry()] } else { roots };
    compute_idom(&roots, &succ, &pred)
}

fn compute_idom(
    roots: &[InstId],
    succ: &FxHashMap<InstId, Vec<InstId>>,
    pred: &FxHashMap<InstId, Vec<InstId>>,
) -> DomTree {
    let postorder = dfs_postorder(roots, succ);
    let postorder_index: FxHashMap<InstId, usize> = postorder
        .iter()
        .enumerate()
        .map(|(i, &n)| (n, i))
        .collect();
    let rpo: Vec<InstId> = postorder.iter().rev().copied().collect();

    let mut idom: FxHashMap<InstId, InstId> = FxHashMap::default();
    for &root in roots {
        idom.insert(root, root);
    }

    let mut changed = true;
    while changed {
        changed = false;
        for &node in &rpo {
            if idom.get(&node) == Some(&node) && roots.contains(&node) {
                continue;
            }
            let mut new_idom: Option<InstId> = None;
            for &p in pred.get(&node).into_iter().flatten() {
                if !idom.contains_key(&p) {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(cur) => intersect(cur, p, &idom, &postorder_index),
                });
            }
            if let Some(new_idom) = new_idom {
                if idom.get(&node) != Some(&new_idom) {
                    idom.insert(node, new_idom);
                    changed = true;
                }
            }
        }
    }

    DomTree {
        idom,
        roots: roots.to_vec(),
    }
}

fn intersect(
    mut a: InstId,
    mut b: InstId,
    idom: &FxHashMap<InstId, InstId>,
    postorder_index: &FxHashMap<InstId, usize>,
) -> InstId {
    while a != b {
        while postorder_index[&a] < postorder_index[&b] {
            a = idom[&a];
        }
        while postorder_index[&b] < postorder_index[&a] {
            b = idom[&b];
        }
    }
    a
}

fn dfs_postorder(roots: &[InstId], succ: &FxHashMap<InstId, Vec<InstId>>) -> Vec<InstId> {
    let mut visited = FxHashSet::default();
    let mut order = Vec::new();
    for &root in roots {
        visit(root, succ, &mut visited, &mut order);
    }
    order
}

fn visit(
    node: InstId,
    succ: &FxHashMap<InstId, Vec<InstId>>,
    visited: &mut FxHashSet<InstId>,
    order: &mut Vec<InstId>,
) {
    if !visited.insert(node) {
        return;
    }
    for &next in succ.get(&node).into_iter().flatten() {
        visit(next, succ, visited, order);
    }
    order.push(node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::cfg::build_cfg;
    use crate::dialect::builtin;
    use crate::ir::{Context, Location, Op, Operand};
    use smallvec::smallvec;

    fn build_diamond(ctx: &mut Context) -> (crate::ir::BlockId, InstId, InstId, InstId, InstId) {
        let loc = ctx.intern_location(Location::Unknown);
        let entry_block = ctx.create_block();
        let then_block = ctx.create_block();
        let else_block = ctx.create_block();
        let merge_block = ctx.create_block();

        let entry_label = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec![]);
        let then_label = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec![]);
        let else_label = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec![]);
        let merge_label = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Label), smallvec![]);

        ctx.add_child(entry_block, entry_label);
        ctx.add_child(then_block, then_label);
        ctx.add_child(else_block, else_label);
        ctx.add_child(merge_block, merge_label);

        let cond = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantBool), smallvec![Operand::Bool(true)]);
        let branch_cond = ctx.create_instruction(
            loc,
            Op::Builtin(builtin::Op::BranchConditional),
            smallvec![Operand::Value(cond), Operand::Value(then_label), Operand::Value(else_label)],
        );
        ctx.add_child(entry_block, branch_cond);

        let branch_then = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Branch), smallvec![Operand::Value(merge_label)]);
        ctx.add_child(then_block, branch_then);
        let branch_else = ctx.create_instruction(loc, Op::Builtin(builtin::Op::Branch), smallvec![Operand::Value(merge_label)]);
        ctx.add_child(else_block, branch_else);

        (entry_block, entry_label, then_label, else_label, merge_label)
    }

    #[test]
    fn diamond_dominance() {
        let mut ctx = Context::new();
        let (entry_block, entry_label, then_label, else_label, merge_label) = build_diamond(&mut ctx);
        let cfg = build_cfg(&ctx, entry_block, &[], None);
        let dom = build_dom_tree(&cfg);

        assert!(dom.dominates(entry_label, then_label));
        assert!(dom.dominates(entry_label, else_label));
        assert!(dom.dominates(entry_label, merge_label));
        assert!(!dom.dominates(then_label, merge_label));
        assert!(!dom.dominates(else_label, merge_label));
        assert_eq!(dom.idom(merge_label), Some(entry_label));
    }

    #[test]
    fn diamond_postdominance() {
        let mut ctx = Context::new();
        let (entry_block, entry_label, then_label, else_label, merge_label) = build_diamond(&mut ctx);
        let cfg = build_cfg(&ctx, entry_block, &[], None);
        let post_dom = build_post_dom_tree(&cfg);

        assert!(post_dom.dominates(merge_label, then_label));
        assert!(post_dom.dominates(merge_label, else_label));
        assert!(post_dom.dominates(merge_label, entry_label));
    }
}
