use rustc_hash::FxHashMap;

use super::context::{Context, InstId};
use super::operand::Operand;

/// Tracks instruction-to-clone mappings across one cloning pass, so that
/// operands referencing an already-cloned instruction are rewritten to
/// point at its clone rather than the original. Mirrors the original's
/// `CloneMap{overrides, getOrClone}`.
///
/// Used by the instruction combiner's speculative rewrites (clone a
/// candidate subtree, fold it, and only commit if the result is cheaper)
/// and by loop unrolling / inlining in the translator.
#[derive(Default)]
pub struct CloneMap {
    overrides: FxHashMap<InstId, InstId>,
}

impl CloneMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicitly pins `from` to map to `to`, without cloning anything.
    /// Used to seed block-parameter substitutions before cloning a loop
    /// body.
    pub fn set_override(&mut self, from: InstId, to: InstId) {
        self.overrides.insert(from, to);
    }

    /// Returns the clone of `inst` under this map, creating one (and
    /// recursively cloning any `Operand::Value` it references that hasn't
    /// been cloned yet) if it doesn't already exist.
    ///
    /// `inst` must not yet be attached to a block — callers insert the
    /// returned clone into its destination block themselves, matching the
    /// original's "clone first, splice after" protocol.
    pub fn get_or_clone(&mut self, ctx: &mut Context, inst: InstId) -> InstId {
        if let Some(existing) = self.overrides.get(&inst) {
            return *existing;
        }
        let location = ctx.inst(inst).location;
        let op = ctx.inst(inst).op;
        let operands = ctx.inst(inst).operands.clone();
        let cloned_operands = operands
            .into_iter()
            .map(|operand| match operand {
                Operand::Value(referenced) => Operand::Value(self.get_or_clone(ctx, referenced)),
                other => other,
            })
            .collect();
        let clone = ctx.create_instruction(location, op, cloned_operands);
        self.overrides.insert(inst, clone);
        clone
    }

    pub fn get(&self, inst: InstId) -> Option<InstId> {
        self.overrides.get(&inst).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::builtin;
    use crate::ir::{Location, Op};
    use smallvec::smallvec;

    #[test]
    fn clone_is_idempotent_within_one_map() {
        let mut ctx = Context::new();
        let loc = ctx.intern_location(Location::Unknown);
        let a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![Operand::Int32(1)]);
        let add = ctx.create_instruction(
            loc,
            Op::Builtin(builtin::Op::IAdd),
            smallvec![Operand::Value(a), Operand::Value(a)],
        );

        let mut map = CloneMap::new();
        let first = map.get_or_clone(&mut ctx, add);
        let second = map.get_or_clone(&mut ctx, add);
        assert_eq!(first, second);

        // cloning `add` should have cloned `a` exactly once and reused it
        // for both operands.
        assert_eq!(ctx.inst(first).operands[0], ctx.inst(first).operands[1]);
        assert_ne!(ctx.inst(first).operands[0].as_value(), Some(a));
    }
}
