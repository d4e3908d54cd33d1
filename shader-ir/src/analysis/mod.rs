//! Derived control-flow and data-flow analyses over an `ir::Context`.
//!
//! Nothing in this module mutates the IR; each analysis is a pure function
//! of a `Context` snapshot (plus, for the dominance-dependent ones, a
//! previously built `Cfg`), and `storage::ConstructAnalyses` is the cache
//! that remembers the results until something invalidates them.

pub mod cfg;
pub mod dom;
pub mod edges;
pub mod memssa;
pub mod storage;

pub use cfg::{build_cfg, Cfg, Node};
pub use dom::{build_dom_tree, build_post_dom_tree, DomTree};
pub use edges::{find_back_edges, BackEdgeStorage};
pub use memssa::{build_memory_ssa, MemorySsa};
pub use storage::{AnalysisStorage, ConstructAnalyses};
