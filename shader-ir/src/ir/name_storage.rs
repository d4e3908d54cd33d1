use rustc_hash::{FxHashMap, FxHashSet};

use super::context::InstId;

/// Deterministic, deduplicated instruction naming for IR printing and
/// diagnostics. Grounded on `original_source/.../ir/NameStorage.hpp`:
/// a set of names in use plus a node-to-name map, falling back to a
/// sequential integer name (`%7`) when nothing was ever assigned.
#[derive(Default)]
pub struct NameStorage {
    names: FxHashSet<String>,
    node_to_name: FxHashMap<InstId, String>,
}

impl NameStorage {
    /// Assigns `name` to `inst`, appending a numeric suffix if it's
    /// already taken by a different instruction.
    pub fn set_unique_name_of(&mut self, inst: InstId, name: &str) {
        if !self.names.contains(name) {
            self.names.insert(name.to_string());
            self.node_to_name.insert(inst, name.to_string());
            return;
        }
        let mut suffix = 1u32;
        loop {
            let candidate = format!("{name}.{suffix}");
            if !self.names.contains(&candidate) {
                self.names.insert(candidate.clone());
                self.node_to_name.insert(inst, candidate);
                return;
            }
            suffix += 1;
        }
    }

    /// Assigns `name` verbatim, without uniqueness checking. Used when the
    /// caller already guarantees uniqueness (e.g. a GCN SGPR/VGPR register
    /// name, one per register slot).
    pub fn set_name_of(&mut self, inst: InstId, name: &str) {
        self.names.insert(name.to_string());
        self.node_to_name.insert(inst, name.to_string());
    }

    pub fn try_get_name_of(&self, inst: InstId) -> Option<&str> {
        self.node_to_name.get(&inst).map(String::as_str)
    }

    /// Returns the instruction's assigned name, or a sequential fallback
    /// of the form `%<index>` derived from its handle.
    pub fn get_name_of(&self, inst: InstId) -> String {
        match self.try_get_name_of(inst) {
            Some(name) => name.to_string(),
            None => format!("%{}", inst.0),
        }
    }

    pub fn clear(&mut self) {
        self.names.clear();
        self.node_to_name.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::context::Context;
    use crate::dialect::builtin;
    use crate::ir::{Location, Op};
    use smallvec::smallvec;

    #[test]
    fn duplicate_names_get_unique_suffix() {
        let mut ctx = Context::new();
        let loc = ctx.intern_location(Location::Unknown);
        let a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![]);
        let b = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![]);
        ctx.names_mut().set_unique_name_of(a, "v");
        ctx.names_mut().set_unique_name_of(b, "v");
        assert_eq!(ctx.names().get_name_of(a), "v");
        assert_eq!(ctx.names().get_name_of(b), "v.1");
    }

    #[test]
    fn unnamed_falls_back_to_sequential() {
        let mut ctx = Context::new();
        let loc = ctx.intern_location(Location::Unknown);
        let a = ctx.create_instruction(loc, Op::Builtin(builtin::Op::ConstantInt), smallvec![]);
        assert_eq!(ctx.names().get_name_of(a), format!("%{}", a_index(a)));
    }

    fn a_index(id: InstId) -> u32 {
        // InstId's field is crate-private; rebuild via Debug to avoid
        // depending on internals from the test.
        format!("{id:?}")
            .trim_start_matches("InstId(")
            .trim_end_matches(')')
            .parse()
            .unwrap()
    }
}
