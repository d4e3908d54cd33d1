use std::any::{Any, TypeId};

use rustc_hash::FxHashMap;

use crate::ir::{BlockId, ConstructId, Context};

use super::cfg::{build_cfg, Cfg};
use super::dom::{build_dom_tree, build_post_dom_tree, DomTree};
use super::edges::{find_back_edges, BackEdgeStorage};

/// A type-erased, invalidatable cache of derived analyses, keyed by the
/// analysis's Rust type. Mirrors `AnalysisStorage`'s `void*` + deleter +
/// invalid-flag storage without needing unsafe code: `Box<dyn Any>` gives
/// us the type-erased slot, and `TypeId` gives us the key a C++
/// `typeid()` would.
#[derive(Default)]
pub struct AnalysisStorage {
    entries: FxHashMap<TypeId, Box<dyn Any>>,
}

impl AnalysisStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached analysis of type `T`, building it with `build`
    /// on first access.
    pub fn get<T: Any>(&mut self, build: impl FnOnce() -> T) -> &T {
        self.entries
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(build()))
            .downcast_ref::<T>()
            .expect("analysis cache slot type mismatch")
    }

    pub fn invalidate<T: Any>(&mut self) {
        self.entries.remove(&TypeId::of::<T>());
    }

    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }
}

/// Per-`Construct` analysis caches, since a module may translate several
/// independent constructs (function bodies, inlined loop bodies) without
/// wanting their CFG/dominance results to collide. Mirrors the original's
/// `Construct::analysis` field, hoisted out of the IR's `Construct` node
/// itself since nothing about dominance is part of the node graph proper.
#[derive(Default)]
pub struct ConstructAnalyses {
    per_construct: FxHashMap<ConstructId, AnalysisStorage>,
}

impl ConstructAnalyses {
    pub fn new() -> Self {
        Self::default()
    }

    fn storage(&mut self, construct: ConstructId) -> &mut AnalysisStorage {
        self.per_construct.entry(construct).or_default()
    }

    pub fn get_cfg<'a>(&'a mut self, ctx: &Context, construct: ConstructId, entry: BlockId) -> &'a Cfg {
        self.storage(construct)
            .get(|| build_cfg(ctx, entry, &[], None))
    }

    /// The CFG view with the construct's loop-continue edge folded into a
    /// plain back-edge rather than left as a `continue`-labeled jump,
    /// matching `getCfgWithoutContinue` — used by the instruction
    /// combiner, which doesn't care about the distinction.
    pub fn get_cfg_without_continue<'a>(
        &'a mut self,
        ctx: &Context,
        construct: ConstructId,
        entry: BlockId,
        continue_label: Option<crate::ir::InstId>,
    ) -> &'a Cfg {
        self.storage(construct)
            .get(|| build_cfg(ctx, entry, &[], continue_label))
    }

    pub fn get_dom_tree<'a>(&'a mut self, ctx: &Context, construct: ConstructId, entry: BlockId) -> &'a DomTree {
        let cfg = build_cfg(ctx, entry, &[], None);
        self.storage(construct).get(|| build_dom_tree(&cfg))
    }

    pub fn get_post_dom_tree<'a>(&'a mut self, ctx: &Context, construct: ConstructId, entry: BlockId) -> &'a DomTree {
        let cfg = build_cfg(ctx, entry, &[], None);
        self.storage(construct).get(|| build_post_dom_tree(&cfg))
    }

    pub fn get_back_edge_storage<'a>(&'a mut self, ctx: &Context, construct: ConstructId, entry: BlockId) -> &'a BackEdgeStorage {
        let cfg = build_cfg(ctx, entry, &[], None);
        let dom = build_dom_tree(&cfg);
        self.storage(construct).get(|| find_back_edges(&cfg, &dom))
    }

    pub fn invalidate(&mut self, construct: ConstructId) {
        self.per_construct.remove(&construct);
    }

    pub fn invalidate_all(&mut self) {
        self.per_construct.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_cache_builds_once() {
        let mut storage = AnalysisStorage::new();
        let mut builds = 0;
        {
            let _ = storage.get(|| {
                builds += 1;
                42i32
            });
        }
        let _ = storage.get(|| {
            builds += 1;
            42i32
        });
        assert_eq!(builds, 1);
    }

    #[test]
    fn invalidate_forces_rebuild() {
        let mut storage = AnalysisStorage::new();
        let mut builds = 0;
        let _ = storage.get(|| {
            builds += 1;
            1u8
        });
        storage.invalidate::<u8>();
        let _ = storage.get(|| {
            builds += 1;
            2u8
        });
        assert_eq!(builds, 2);
    }
}
