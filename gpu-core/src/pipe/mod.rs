//! PM4 ring processing: the fixed-function graphics pipe (`GraphicsPipe`,
//! three DE rings plus one CE ring) and the compute pipe (`ComputePipe`,
//! `COMPUTE_QUEUE_COUNT` independently-bound queues). Grounded on
//! `original_source/rpcsx-gpu2/Pipe.hpp`/`Pipe.cpp`; see each submodule's
//! doc comment for the exact correspondence.

mod compute;
mod graphics;
mod opcode;
mod queue;

pub use compute::ComputePipe;
pub use graphics::{CompareFn, GraphicsPipe, PipeEvent};
pub use opcode::Opcode;
pub use queue::{Packet, Queue};
