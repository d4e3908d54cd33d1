use smallvec::SmallVec;

use super::instruction::Op;
use super::location::{Location, LocationId, LocationTable};
use super::name_storage::NameStorage;
use super::operand::{Operand, OperandList};

/// Handle to an instruction inside a `Context`'s append-only arena.
///
/// Instructions are never freed individually; a `Context` lives for the
/// lifetime of one shader translation and is dropped whole. This mirrors
/// the original's `forward_list<unique_ptr<NodeImpl>>` ownership model
/// without needing the indirection of a boxed allocation per node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstructId(pub(crate) u32);

/// One use of a result-producing instruction by another instruction's
/// operand list. The def-use list (`Instruction::uses`) is the
/// authoritative source for `replace_all_uses_with`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValueUse {
    pub user: InstId,
    pub operand_index: u32,
}

pub struct Instruction {
    pub location: LocationId,
    pub op: Op,
    pub operands: OperandList,
    pub block: Option<BlockId>,
    pub prev: Option<InstId>,
    pub next: Option<InstId>,
    uses: SmallVec<[ValueUse; 4]>,
}

impl Instruction {
    pub fn uses(&self) -> &[ValueUse] {
        &self.uses
    }
}

/// A region-like container of instructions in program order, `RegionLikeImpl`
/// in the original: tracks only its first/last child, relying on the
/// instructions' own intrusive `prev`/`next` links for everything between.
#[derive(Default, Clone, Copy)]
pub struct Block {
    pub first: Option<InstId>,
    pub last: Option<InstId>,
}

/// A structured control region (`if`/`loop`) whose header and merge
/// instructions are its operands 0 and 1, matching `ConstructImpl`.
pub struct Construct {
    pub block: BlockId,
    pub parent: Option<ConstructId>,
    pub children: Vec<ConstructId>,
    pub header: InstId,
    pub merge: InstId,
    pub loop_body: Option<ConstructId>,
    pub loop_continue: Option<ConstructId>,
}

/// Owns every instruction, block, construct, and interned location that
/// make up one shader translation unit. Nothing outside `Context` holds a
/// node directly — everything is a `Copy` handle into one of these arenas,
/// the Rust-idiomatic alternative to the original's pointer graph.
#[derive(Default)]
pub struct Context {
    instructions: Vec<Instruction>,
    blocks: Vec<Block>,
    constructs: Vec<Construct>,
    locations: LocationTable,
    names: NameStorage,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern_location(&mut self, location: Location) -> LocationId {
        self.locations.intern(location)
    }

    pub fn location_of(&self, id: InstId) -> &Location {
        self.locations.get(self.instructions[id.0 as usize].location)
    }

    pub fn names(&self) -> &NameStorage {
        &self.names
    }

    pub fn names_mut(&mut self) -> &mut NameStorage {
        &mut self.names
    }

    /// Appends a new instruction to the arena (unattached to any block)
    /// and wires up def-use edges for every `Operand::Value` it carries.
    pub fn create_instruction(
        &mut self,
        location: LocationId,
        op: Op,
        operands: OperandList,
    ) -> InstId {
        let id = InstId(self.instructions.len() as u32);
        for (index, operand) in operands.iter().enumerate() {
            if let Operand::Value(used) = operand {
                self.add_use(*used, id, index as u32);
            }
        }
        self.instructions.push(Instruction {
            location,
            op,
            operands,
            block: None,
            prev: None,
            next: None,
            uses: SmallVec::new(),
        });
        id
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        &self.instructions[id.0 as usize]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Instruction {
        &mut self.instructions[id.0 as usize]
    }

    fn add_use(&mut self, used: InstId, user: InstId, operand_index: u32) {
        self.instructions[used.0 as usize]
            .uses
            .push(ValueUse { user, operand_index });
    }

    fn remove_use(&mut self, used: InstId, user: InstId, operand_index: u32) {
        let uses = &mut self.instructions[used.0 as usize].uses;
        if let Some(pos) = uses
            .iter()
            .position(|u| u.user == user && u.operand_index == operand_index)
        {
            uses.swap_remove(pos);
        }
    }

    /// Replaces every use of `old` with `new` across the whole arena,
    /// matching `ValueImpl::replaceAllUsesWith`. Used by the instruction
    /// combiner and by constant folding once a value has been reduced.
    pub fn replace_all_uses_with(&mut self, old: InstId, new: InstId) {
        if old == new {
            return;
        }
        let uses: SmallVec<[ValueUse; 4]> = self.instructions[old.0 as usize].uses.clone();
        for use_ in &uses {
            self.instructions[use_.user.0 as usize].operands[use_.operand_index as usize] =
                Operand::Value(new);
            self.add_use(new, use_.user, use_.operand_index);
        }
        self.instructions[old.0 as usize].uses.clear();
    }

    /// Like `replace_all_uses_with`, but only where `predicate` accepts the
    /// using instruction — mirrors `replaceUsesIf`, used when a rewrite
    /// must avoid touching uses inside a region being deleted.
    pub fn replace_uses_if(
        &mut self,
        old: InstId,
        new: InstId,
        mut predicate: impl FnMut(&Instruction) -> bool,
    ) {
        if old == new {
            return;
        }
        let uses: SmallVec<[ValueUse; 4]> = self.instructions[old.0 as usize].uses.clone();
        for use_ in &uses {
            if !predicate(&self.instructions[use_.user.0 as usize]) {
                continue;
            }
            self.instructions[use_.user.0 as usize].operands[use_.operand_index as usize] =
                Operand::Value(new);
            self.remove_use(old, use_.user, use_.operand_index);
            self.add_use(new, use_.user, use_.operand_index);
        }
    }

    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    /// Appends `inst` to the end of `block`'s instruction list, matching
    /// `RegionLikeImpl::addChild`.
    pub fn add_child(&mut self, block: BlockId, inst: InstId) {
        let last = self.blocks[block.0 as usize].last;
        self.instructions[inst.0 as usize].block = Some(block);
        self.instructions[inst.0 as usize].prev = last;
        if let Some(last) = last {
            self.instructions[last.0 as usize].next = Some(inst);
        } else {
            self.blocks[block.0 as usize].first = Some(inst);
        }
        self.blocks[block.0 as usize].last = Some(inst);
    }

    /// Inserts `inst` immediately after `after` in `after`'s block,
    /// matching `RegionLikeImpl::insertAfter`. Used by the instruction
    /// combiner to splice in replacement instructions in place.
    pub fn insert_after(&mut self, after: InstId, inst: InstId) {
        let block = self.instructions[after.0 as usize]
            .block
            .expect("insert_after target must already be attached to a block");
        let next = self.instructions[after.0 as usize].next;
        self.instructions[inst.0 as usize].block = Some(block);
        self.instructions[inst.0 as usize].prev = Some(after);
        self.instructions[inst.0 as usize].next = next;
        self.instructions[after.0 as usize].next = Some(inst);
        match next {
            Some(next) => self.instructions[next.0 as usize].prev = Some(inst),
            None => self.blocks[block.0 as usize].last = Some(inst),
        }
    }

    /// Inserts `inst` at the front of `block`, matching
    /// `RegionLikeImpl::prependChild`. Used to hoist `Var`/allocation
    /// instructions to a block's head.
    pub fn prepend_child(&mut self, block: BlockId, inst: InstId) {
        let first = self.blocks[block.0 as usize].first;
        self.instructions[inst.0 as usize].block = Some(block);
        self.instructions[inst.0 as usize].next = first;
        self.instructions[inst.0 as usize].prev = None;
        if let Some(first) = first {
            self.instructions[first.0 as usize].prev = Some(inst);
        } else {
            self.blocks[block.0 as usize].last = Some(inst);
        }
        self.blocks[block.0 as usize].first = Some(inst);
    }

    /// Iterates a block's instructions in program order.
    pub fn block_instructions(&self, block: BlockId) -> BlockIter<'_> {
        BlockIter {
            ctx: self,
            next: self.blocks[block.0 as usize].first,
        }
    }

    pub fn create_construct(
        &mut self,
        block: BlockId,
        parent: Option<ConstructId>,
        header: InstId,
        merge: InstId,
    ) -> ConstructId {
        let id = ConstructId(self.constructs.len() as u32);
        self.constructs.push(Construct {
            block,
            parent,
            children: Vec::new(),
            header,
            merge,
            loop_body: None,
            loop_continue: None,
        });
        if let Some(parent) = parent {
            self.constructs[parent.0 as usize].children.push(id);
        }
        id
    }

    pub fn construct(&self, id: ConstructId) -> &Construct {
        &self.constructs[id.0 as usize]
    }

    pub fn construct_mut(&mut self, id: ConstructId) -> &mut Construct {
        &mut self.constructs[id.0 as usize]
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    /// Unlinks `inst` from its block's instruction list, matching
    /// `NodeImpl::remove`. The instruction's own def-use edges to operands
    /// it references are severed too; the arena slot itself is never
    /// reclaimed (`InstId`s stay valid forever, they just stop appearing in
    /// any block). Callers must have already retargeted `inst`'s uses (e.g.
    /// via `replace_all_uses_with`) — removing an instruction that still
    /// has uses would leave dangling operands.
    pub fn remove_instruction(&mut self, inst: InstId) {
        let (block, prev, next) = {
            let data = &self.instructions[inst.0 as usize];
            (data.block, data.prev, data.next)
        };

        match prev {
            Some(prev) => self.instructions[prev.0 as usize].next = next,
            None => {
                if let Some(block) = block {
                    self.blocks[block.0 as usize].first = next;
                }
            }
        }
        match next {
            Some(next) => self.instructions[next.0 as usize].prev = prev,
            None => {
                if let Some(block) = block {
                    self.blocks[block.0 as usize].last = prev;
                }
            }
        }

        let operands = self.instructions[inst.0 as usize].operands.clone();
        for (index, operand) in operands.iter().enumerate() {
            if let Operand::Value(used) = operand {
                self.remove_use(*used, inst, index as u32);
            }
        }

        self.instructions[inst.0 as usize].block = None;
        self.instructions[inst.0 as usize].prev = None;
        self.instructions[inst.0 as usize].next = None;
    }
}

pub struct BlockIter<'a> {
    ctx: &'a Context,
    next: Option<InstId>,
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = InstId;

    fn next(&mut self) -> Option<InstId> {
        let current = self.next?;
        self.next = self.ctx.inst(current).next;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::builtin;
    use smallvec::smallvec;

    #[test]
    fn append_and_iterate_block() {
        let mut ctx = Context::new();
        let loc = ctx.intern_location(Location::Unknown);
        let block = ctx.create_block();
        let a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![Operand::Int32(1)]);
        let b = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![Operand::Int32(2)]);
        ctx.add_child(block, a);
        ctx.add_child(block, b);
        let ids: Vec<_> = ctx.block_instructions(block).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn replace_all_uses_with_rewrites_operands_and_use_lists() {
        let mut ctx = Context::new();
        let loc = ctx.intern_location(Location::Unknown);
        let a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![Operand::Int32(1)]);
        let b = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![Operand::Int32(2)]);
        let add = ctx.create_instruction(
            loc,
            Op::Builtin(builtin::Op::IAdd),
            smallvec![Operand::Value(a), Operand::Value(a)],
        );
        assert_eq!(ctx.inst(a).uses().len(), 2);
        ctx.replace_all_uses_with(a, b);
        assert_eq!(ctx.inst(a).uses().len(), 0);
        assert_eq!(ctx.inst(b).uses().len(), 2);
        assert_eq!(ctx.inst(add).operands[0], Operand::Value(b));
        assert_eq!(ctx.inst(add).operands[1], Operand::Value(b));
    }

    #[test]
    fn insert_after_splices_into_block() {
        let mut ctx = Context::new();
        let loc = ctx.intern_location(Location::Unknown);
        let block = ctx.create_block();
        let a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![]);
        let c = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![]);
        ctx.add_child(block, a);
        ctx.add_child(block, c);
        let b = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![]);
        ctx.insert_after(a, b);
        let ids: Vec<_> = ctx.block_instructions(block).collect();
        assert_eq!(ids, vec![a, b, c]);
    }

    #[test]
    fn remove_instruction_unlinks_and_clears_uses() {
        let mut ctx = Context::new();
        let loc = ctx.intern_location(Location::Unknown);
        let block = ctx.create_block();
        let a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![]);
        let b = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![Operand::Value(a)]);
        let c = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![]);
        ctx.add_child(block, a);
        ctx.add_child(block, b);
        ctx.add_child(block, c);

        ctx.remove_instruction(b);
        let ids: Vec<_> = ctx.block_instructions(block).collect();
        assert_eq!(ids, vec![a, c]);
        assert_eq!(ctx.inst(a).uses().len(), 0);
    }
}
