//! The compute pipe: `COMPUTE_QUEUE_COUNT` independently-scheduled
//! queues, each with `COMPUTE_RINGS_PER_QUEUE` indirect-buffer levels.
//!
//! Grounded on `original_source/rpcsx-gpu2/Pipe.cpp`'s `ComputePipe`
//! constructor and `processAllRings`/`processRing`: the handler table is
//! almost entirely `unknownPacket`, with only `IT_NOP` and `IT_SET_SH_REG`
//! overridden — a real compute dispatch arrives through a `GraphicsPipe`
//! DE ring's `DISPATCH_DIRECT`/`DISPATCH_INDIRECT` (`graphics.rs`), not
//! through a `ComputePipe`'s own ring, so this type's job is purely
//! binding shader/resource state (`SET_SH_REG`) for whichever dispatch
//! targets its `vmId`. `mapQueue` binds a ring to a `vmId`; per
//! `SPEC_FULL.md`'s C10 supplement this is invoked from the device-level
//! `MAP_QUEUES`/`UNMAP_QUEUES` opcodes (`pm4::DeviceOpcode`), not from a
//! packet flowing through the ring itself.

use std::sync::Arc;

use gpu_types::{COMPUTE_QUEUE_COUNT, COMPUTE_RINGS_PER_QUEUE};

use crate::error::Fatal;
use crate::pipe::opcode::Opcode;
use crate::pipe::queue::{Packet, Queue};
use crate::process::GuestMemory;
use crate::register_file::ShaderConfig;

pub struct ComputePipe {
    pub index: usize,
    pub scheduler: Arc<gpu_hal::Scheduler>,
    pub queues: [[Option<Queue>; COMPUTE_RINGS_PER_QUEUE]; COMPUTE_QUEUE_COUNT],
    pub compute_config: ShaderConfig,
}

impl ComputePipe {
    pub fn new(index: usize) -> Self {
        ComputePipe {
            index,
            scheduler: Arc::new(gpu_hal::Scheduler::new(index as u32)),
            queues: Default::default(),
            compute_config: ShaderConfig::new(),
        }
    }

    /// `ComputePipe::mapQueue`: binds ring `ring` of queue `queue_id` to
    /// `queue`, replacing whatever was previously bound there.
    pub fn map_queue(&mut self, queue_id: usize, ring: usize, queue: Queue) {
        self.queues[queue_id][ring] = Some(queue);
    }

    pub fn unmap_queue(&mut self, queue_id: usize, ring: usize) {
        self.queues[queue_id][ring] = None;
    }

    /// Drains every bound ring once each, matching `processAllRings`'s
    /// round-robin. Returns whether any ring made progress.
    pub fn process_all_rings(&mut self, mem: &dyn GuestMemory) -> Result<bool, Fatal> {
        let mut progressed = false;
        for queue_id in 0..COMPUTE_QUEUE_COUNT {
            for ring in 0..COMPUTE_RINGS_PER_QUEUE {
                if self.queues[queue_id][ring].is_some() {
                    progressed |= self.process_ring(queue_id, ring, mem)?;
                }
            }
        }
        Ok(progressed)
    }

    fn process_ring(&mut self, queue_id: usize, ring: usize, mem: &dyn GuestMemory) -> Result<bool, Fatal> {
        let mut progressed = false;
        loop {
            let queue = match self.queues[queue_id][ring] {
                Some(q) => q,
                None => break,
            };
            let Some((packet, len)) = queue.peek(mem)? else {
                break;
            };
            match packet {
                Packet::Nop => {
                    self.queues[queue_id][ring].as_mut().unwrap().advance(len);
                }
                Packet::Command { opcode, body } => {
                    self.dispatch(opcode, &body)?;
                    self.queues[queue_id][ring].as_mut().unwrap().advance(len);
                }
            }
            progressed = true;
        }
        Ok(progressed)
    }

    fn dispatch(&mut self, opcode: u8, body: &[u32]) -> Result<(), Fatal> {
        match Opcode::from_u8(opcode) {
            Some(Opcode::Nop) => Ok(()),
            Some(Opcode::SetShReg) => self.set_sh_reg(body),
            _ => Err(self.unknown_packet(opcode)),
        }
    }

    fn set_sh_reg(&mut self, body: &[u32]) -> Result<(), Fatal> {
        let base = self.compute_config.bank.base();
        for (i, &value) in body.iter().enumerate().skip(1) {
            let offset = base + body[0] + (i as u32 - 1);
            self.compute_config
                .bank
                .write(offset, value)
                .map_err(|_| Fatal::RingProtocolViolation {
                    ring: "compute",
                    packet_offset: offset,
                    reason: "SET_SH_REG offset outside the compute config bank",
                })?;
        }
        Ok(())
    }

    fn unknown_packet(&self, opcode: u8) -> Fatal {
        Fatal::RingProtocolViolation {
            ring: "compute",
            packet_offset: u32::from(opcode),
            reason: "unhandled compute-ring opcode",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm4;
    use crate::process::sim::SimGuestMemory;

    fn seed_ring(mem: &SimGuestMemory, vm_id: u8, opcode: u8, body: &[u32]) -> u32 {
        let mut words = Vec::new();
        pm4::encode_packet(opcode, body, &mut words);
        for (i, word) in words.iter().enumerate() {
            mem.seed(vm_id, i as u64 * 4, &word.to_le_bytes());
        }
        words.len() as u32
    }

    #[test]
    fn set_sh_reg_writes_into_the_compute_config_bank() {
        let mem = SimGuestMemory::new();
        // 0x207 is `ShaderConfig`'s bank-relative offset for
        // `NUM_THREAD_X`; `Y`/`Z` follow it contiguously at 0x208/0x209.
        let size = seed_ring(&mem, 0, Opcode::SetShReg as u8, &[0x207, 8, 4, 1]);
        let mut pipe = ComputePipe::new(0);
        pipe.map_queue(0, 0, Queue::from_range(0, 0, size, 0));
        pipe.process_all_rings(&mem).unwrap();
        assert_eq!(pipe.compute_config.num_threads().unwrap(), (8, 4, 1));
    }

    #[test]
    fn unbound_opcode_is_a_fatal_ring_protocol_violation() {
        let mem = SimGuestMemory::new();
        let size = seed_ring(&mem, 0, Opcode::DrawPreamble as u8, &[1]);
        let mut pipe = ComputePipe::new(0);
        pipe.map_queue(0, 0, Queue::from_range(0, 0, size, 0));
        assert!(matches!(
            pipe.process_all_rings(&mem),
            Err(Fatal::RingProtocolViolation { .. })
        ));
    }

    #[test]
    fn unmap_queue_stops_the_ring_from_being_drained() {
        let mem = SimGuestMemory::new();
        let size = seed_ring(&mem, 0, Opcode::Nop as u8, &[1]);
        let mut pipe = ComputePipe::new(0);
        pipe.map_queue(3, 1, Queue::from_range(0, 0, size, 0));
        pipe.unmap_queue(3, 1);
        assert_eq!(pipe.process_all_rings(&mem).unwrap(), false);
    }
}
