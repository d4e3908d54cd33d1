use rustc_hash::FxHashMap;

use crate::ir::{BlockId, Context, InstId, Op};

/// One basic block in a constructed control-flow graph. `label` is the
/// block's leading `Label` instruction, used as the node's identity —
/// matching the original's `CFG::Node` keyed by `ir::Value` label.
#[derive(Clone, Debug, Default)]
pub struct Node {
    pub label: Option<InstId>,
    pub terminator: Option<InstId>,
    pub predecessors: Vec<InstId>,
    pub successors: Vec<InstId>,
}

impl Node {
    pub fn add_edge(&mut self, to: &mut Node, to_label: InstId, from_label: InstId) {
        self.successors.push(to_label);
        to.predecessors.push(from_label);
    }
}

/// A control-flow graph over a block's instruction stream, keyed by label
/// instruction id. Grounded on `original_source/.../analyze.hpp`'s
/// `CFG{mNodes, mPreorderNodes, mPostorderNodes, mEntryNode}`.
pub struct Cfg {
    nodes: FxHashMap<InstId, Node>,
    entry: InstId,
    preorder: Vec<InstId>,
    postorder: Vec<InstId>,
}

impl Cfg {
    pub fn entry(&self) -> InstId {
        self.entry
    }

    pub fn node(&self, label: InstId) -> Option<&Node> {
        self.nodes.get(&label)
    }

    pub fn preorder(&self) -> &[InstId] {
        &self.preorder
    }

    pub fn postorder(&self) -> &[InstId] {
        &self.postorder
    }

    pub fn labels(&self) -> impl Iterator<Item = InstId> + '_ {
        self.nodes.keys().copied()
    }

    fn get_or_create_node(&mut self, label: InstId) -> &mut Node {
        self.nodes.entry(label).or_insert_with(|| Node {
            label: Some(label),
            ..Default::default()
        })
    }
}

/// Builds a CFG starting at `entry_block`, stopping at any label found in
/// `stop_labels` (used when building the restricted view of a single
/// `Construct`) and treating `continue_label`, if given, as looping back
/// to the construct's header rather than falling through.
///
/// Mirrors `buildCFG(firstInstruction, exitLabels, continueLabel)`: walks
/// each block until its terminator, records successor edges from
/// `Branch`/`BranchConditional`, and recurses into not-yet-visited
/// successor blocks.
pub fn build_cfg(
    ctx: &Context,
    entry_block: BlockId,
    stop_labels: &[InstId],
    continue_label: Option<InstId>,
) -> Cfg {
    let entry_label = ctx
        .block_instructions(entry_block)
        .next()
        .expect("entry block must contain at least a label instruction");

    let mut cfg = Cfg {
        nodes: FxHashMap::default(),
        entry: entry_label,
        preorder: Vec::new(),
        postorder: Vec::new(),
    };

    let mut worklist = vec![(entry_block, entry_label)];
    let mut visited = rustc_hash::FxHashSet::default();
    visited.insert(entry_label);

    while let Some((block, label)) = worklist.pop() {
        if stop_labels.contains(&label) && label != entry_label {
            cfg.get_or_create_node(label);
            continue;
        }

        let mut terminator = None;
        let mut successors: Vec<InstId> = Vec::new();
        for inst in ctx.block_instructions(block) {
            if ctx.inst(inst).op.is_terminator() {
                terminator = Some(inst);
                successors = successor_labels(ctx, inst, continue_label, entry_label);
                break;
            }
        }

        cfg.get_or_create_node(label).terminator = terminator;

        for &succ_label in &successors {
            cfg.get_or_create_node(label).successors.push(succ_label);
            cfg.get_or_create_node(succ_label).predecessors.push(label);

            if !visited.contains(&succ_label) && !stop_labels.contains(&succ_label) {
                visited.insert(succ_label);
                if let Some(succ_block) = ctx.inst(succ_label).block {
                    worklist.push((succ_block, succ_label));
                }
            }
        }
    }

    let (preorder, postorder) = order_nodes(&cfg);
    cfg.preorder = preorder;
    cfg.postorder = postorder;
    cfg
}

fn successor_labels(
    ctx: &Context,
    terminator: InstId,
    continue_label: Option<InstId>,
    _entry_label: InstId,
) -> Vec<InstId> {
    let inst = ctx.inst(terminator);
    if !matches!(
        inst.op,
        Op::Builtin(crate::dialect::builtin::Op::Branch)
            | Op::Builtin(crate::dialect::builtin::Op::BranchConditional)
    ) {
        return Vec::new();
    }
    inst.operands
        .iter()
        .filter_map(|operand| operand.as_value())
        .map(|target| {
            if Some(target) == continue_label {
                continue_label.unwrap()
            } else {
                target
            }
        })
        .collect()
}

fn order_nodes(cfg: &Cfg) -> (Vec<InstId>, Vec<InstId>) {
    let mut preorder = Vec::new();
    let mut postorder = Vec::new();
    let mut visited = rustc_hash::FxHashSet::default();

    fn visit(
        cfg: &Cfg,
        node: InstId,
        visited: &mut rustc_hash::FxHashSet<InstId>,
        preorder: &mut Vec<InstId>,
        postorder: &mut Vec<InstId>,
    ) {
        if !visited.insert(node) {
            return;
        }
        preorder.push(node);
        if let Some(n) = cfg.node(node) {
            for &succ in &n.successors {
                visit(cfg, succ, visited, preorder, postorder);
            }
        }
        postorder.push(node);
    }

    visit(cfg, cfg.entry, &mut visited, &mut preorder, &mut postorder);
    (preorder, postorder)
}
