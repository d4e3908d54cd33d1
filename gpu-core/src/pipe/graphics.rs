//! The fixed-function graphics pipe: three draw-engine (DE) rings plus
//! one constant-engine (CE) ring, sharing one register file.
//!
//! Grounded on `original_source/rpcsx-gpu2/Pipe.cpp`'s `GraphicsPipe`
//! constructor (which opcode each ring's handler table dispatches) and
//! its `drawPreamble`/`contextControl`/`waitRegMem`/`acquireMem`/
//! `dmaData`/... bodies, plus the free `compare` function `waitRegMem`
//! calls. Every handler that would originally record a Vulkan draw or
//! dispatch call instead appends a [`PipeEvent`] to `GraphicsPipe::trace`:
//! there is no live Vulkan device in this crate's test environment, and
//! the resource cache (`cache.rs`) — not this module — is what would
//! translate a recorded event into real `vkCmdDraw*`/`vkCmdDispatch*`
//! calls against a `Tag`.

use std::sync::Arc;

use gpu_types::{register_offsets, GFX_INDIRECT_LEVELS};

use crate::error::Fatal;
use crate::pipe::opcode::Opcode;
use crate::pipe::queue::{Packet, Queue};
use crate::process::GuestMemory;
use crate::register_file::{OutOfBank, RegisterFile};

/// Result of dispatching one DE packet. `NotReady` is the only outcome
/// that leaves the ring's `rptr` untouched — see [`Queue::peek`]'s doc
/// comment and spec.md §4.9's ring state machine ("a handler returning
/// false freezes the ring at that packet; the pipe proceeds to the next
/// ring and revisits").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PacketOutcome {
    Done,
    NotReady,
}

/// A notable side effect of processing one packet, recorded instead of
/// issued against a real Vulkan command buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum PipeEvent {
    Draw { index_count: u32, instance_count: u32 },
    DrawIndirect { args_address: u64 },
    DispatchDirect { x: u32, y: u32, z: u32 },
    DispatchIndirect { args_address: u64 },
    EventWriteEop { address: u64, value: u64 },
    ReleaseMem { address: u64, value: u64 },
}

/// Compare codes `WAIT_REG_MEM` selects among, matching `Pipe.cpp`'s free
/// `compare(cmpFn, poll, mask, ref)` function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareFn {
    Always,
    Less,
    LessEqual,
    Equal,
    NotEqual,
    GreaterEqual,
    Greater,
}

impl CompareFn {
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(CompareFn::Always),
            1 => Some(CompareFn::Less),
            2 => Some(CompareFn::LessEqual),
            3 => Some(CompareFn::Equal),
            4 => Some(CompareFn::NotEqual),
            5 => Some(CompareFn::GreaterEqual),
            6 => Some(CompareFn::Greater),
            _ => None,
        }
    }

    /// Both operands are masked before comparing, matching the
    /// original's `(poll & mask) <cmp> (ref & mask)`.
    pub fn eval(self, poll: u32, mask: u32, reference: u32) -> bool {
        let lhs = poll & mask;
        let rhs = reference & mask;
        match self {
            CompareFn::Always => true,
            CompareFn::Less => lhs < rhs,
            CompareFn::LessEqual => lhs <= rhs,
            CompareFn::Equal => lhs == rhs,
            CompareFn::NotEqual => lhs != rhs,
            CompareFn::GreaterEqual => lhs >= rhs,
            CompareFn::Greater => lhs > rhs,
        }
    }
}

fn out_of_bank(_: OutOfBank) -> Fatal {
    Fatal::RingProtocolViolation {
        ring: "gfx",
        packet_offset: 0,
        reason: "SET_*_REG offset outside every known bank",
    }
}

/// Combines a packet's `[lo, hi]` dword pair at `body[index]`/`body[index
/// + 1]` into a 64-bit guest address, matching how every address-carrying
/// DE opcode packs its pointer argument.
fn address_from_pair(body: &[u32], index: usize) -> u64 {
    let lo = u64::from(body.get(index).copied().unwrap_or(0));
    let hi = u64::from(body.get(index + 1).copied().unwrap_or(0));
    (hi << 32) | lo
}

pub struct GraphicsPipe {
    pub index: usize,
    pub scheduler: Arc<gpu_hal::Scheduler>,

    pub ce_counter: u64,
    pub de_counter: u64,

    pub gds_partition_bases: [u64; 2],
    pub ce_partition_bases: [u64; 2],

    pub vgt_index_base: u64,
    pub vgt_index_buffer_size: u32,
    pub predicate: bool,

    pub constant_memory: Box<[u32; (48 * 1024) / 4]>,
    pub registers: RegisterFile,

    pub de_queues: [Option<Queue>; 3],
    pub ce_queue: Option<Queue>,

    /// Side effects recorded in place of real Vulkan commands; see the
    /// module doc.
    pub trace: Vec<PipeEvent>,
}

impl GraphicsPipe {
    pub fn new(index: usize) -> Self {
        GraphicsPipe {
            index,
            scheduler: Arc::new(gpu_hal::Scheduler::new(index as u32)),
            ce_counter: 0,
            de_counter: 0,
            gds_partition_bases: [0; 2],
            ce_partition_bases: [0; 2],
            vgt_index_base: 0,
            vgt_index_buffer_size: 0,
            predicate: true,
            constant_memory: Box::new([0; (48 * 1024) / 4]),
            registers: RegisterFile::new(),
            de_queues: [None, None, None],
            ce_queue: None,
            trace: Vec::new(),
        }
    }

    pub fn set_de_queue(&mut self, queue: Queue, ring: usize) {
        self.de_queues[ring] = Some(queue);
    }

    pub fn set_ce_queue(&mut self, queue: Queue) {
        self.ce_queue = Some(queue);
    }

    /// Drains every non-empty ring once, CE first so a DE ring's
    /// `WAIT_ON_CE_COUNTER` sees an up-to-date `ce_counter` (matching the
    /// original's constant-engine-runs-ahead-of-the-draw-engine model),
    /// then every DE ring. Returns whether any ring made progress.
    pub fn process_all_rings(&mut self, mem: &dyn GuestMemory) -> Result<bool, Fatal> {
        let mut progressed = false;
        if self.ce_queue.is_some() {
            progressed |= self.process_ce_ring(mem)?;
        }
        for ring in 0..self.de_queues.len() {
            if self.de_queues[ring].is_some() {
                progressed |= self.process_de_ring(ring, mem, 0)?;
            }
        }
        Ok(progressed)
    }

    /// Drains this DE ring until it empties, hits the indirect-nesting
    /// limit, or a handler isn't ready yet (`WAIT_REG_MEM`): in the last
    /// case the packet is left unconsumed and the loop simply stops,
    /// exactly the Idle/Running freeze spec.md §4.9 describes — the
    /// pipe's outer `process_all_rings` loop revisits this ring on its
    /// next pass rather than treating the stall as an error.
    fn process_de_ring(&mut self, ring: usize, mem: &dyn GuestMemory, depth: u32) -> Result<bool, Fatal> {
        if depth as usize >= GFX_INDIRECT_LEVELS {
            return Err(Fatal::IndirectNestingExceeded {
                max_depth: GFX_INDIRECT_LEVELS as u32,
            });
        }
        let mut progressed = false;
        loop {
            let queue = match self.de_queues[ring] {
                Some(q) => q,
                None => break,
            };
            let Some((packet, len)) = queue.peek(mem)? else {
                break;
            };
            match packet {
                Packet::Nop => {
                    self.de_queues[ring].as_mut().unwrap().advance(len);
                    progressed = true;
                }
                Packet::Command { opcode, body } => match self.dispatch_de(ring, opcode, &body, mem, depth)? {
                    PacketOutcome::NotReady => break,
                    PacketOutcome::Done => {
                        self.de_queues[ring].as_mut().unwrap().advance(len);
                        progressed = true;
                    }
                },
            }
        }
        Ok(progressed)
    }

    fn process_ce_ring(&mut self, mem: &dyn GuestMemory) -> Result<bool, Fatal> {
        let mut progressed = false;
        loop {
            let queue = match self.ce_queue {
                Some(q) => q,
                None => break,
            };
            let Some((packet, len)) = queue.peek(mem)? else {
                break;
            };
            match packet {
                Packet::Nop => {
                    self.ce_queue.as_mut().unwrap().advance(len);
                }
                Packet::Command { opcode, body } => {
                    self.dispatch_ce(opcode, &body, mem)?;
                    self.ce_queue.as_mut().unwrap().advance(len);
                }
            }
            progressed = true;
        }
        Ok(progressed)
    }

    fn write_reg_block(&mut self, bank_base: u32, body: &[u32]) -> Result<(), Fatal> {
        let Some((&relative, values)) = body.split_first() else {
            return Ok(());
        };
        for (i, &value) in values.iter().enumerate() {
            self.registers
                .write(bank_base + relative + i as u32, value)
                .map_err(out_of_bank)?;
        }
        Ok(())
    }

    fn dispatch_de(
        &mut self,
        ring: usize,
        opcode: u8,
        body: &[u32],
        mem: &dyn GuestMemory,
        depth: u32,
    ) -> Result<PacketOutcome, Fatal> {
        let op = Opcode::from_u8(opcode).ok_or(Fatal::RingProtocolViolation {
            ring: "gfx-de",
            packet_offset: 0,
            reason: "unknown DE opcode",
        })?;
        let outcome = match op {
            Opcode::Nop | Opcode::DrawPreamble | Opcode::ContextControl | Opcode::MemSemaphore | Opcode::PfpSyncMe | Opcode::AcquireMem | Opcode::EventWrite | Opcode::EventWriteEos => {
                PacketOutcome::Done
            }
            Opcode::ClearState => {
                self.registers = RegisterFile::new();
                PacketOutcome::Done
            }
            Opcode::SetBase => {
                self.draw_index_indir_patch_base_or_store(body);
                PacketOutcome::Done
            }
            Opcode::IndexBufferSize => {
                self.vgt_index_buffer_size = body.first().copied().unwrap_or(0);
                PacketOutcome::Done
            }
            Opcode::IndexBase => {
                self.vgt_index_base = address_from_pair(body, 0);
                PacketOutcome::Done
            }
            Opcode::IndexType => {
                self.registers
                    .write(register_offsets::UCONFIG + 0x243, body.first().copied().unwrap_or(0))
                    .map_err(out_of_bank)?;
                PacketOutcome::Done
            }
            Opcode::SetPredication => {
                self.predicate = body.first().copied().unwrap_or(0) != 0;
                PacketOutcome::Done
            }
            Opcode::SetConfigReg => {
                self.write_reg_block(register_offsets::CONFIG, body)?;
                PacketOutcome::Done
            }
            Opcode::SetContextReg => {
                self.write_reg_block(register_offsets::CONTEXT, body)?;
                PacketOutcome::Done
            }
            Opcode::SetShReg => {
                self.write_reg_block(register_offsets::SHADER_CONFIG, body)?;
                PacketOutcome::Done
            }
            Opcode::SetUconfigReg => {
                self.write_reg_block(register_offsets::UCONFIG, body)?;
                PacketOutcome::Done
            }
            Opcode::NumInstances => {
                self.registers
                    .write(register_offsets::UCONFIG + 0x24d, body.first().copied().unwrap_or(1))
                    .map_err(out_of_bank)?;
                PacketOutcome::Done
            }
            Opcode::DrawIndexAuto | Opcode::DrawIndex2 | Opcode::DrawIndexOffset2 | Opcode::DrawIndexMultiAuto => {
                if self.predicate {
                    let index_count = self.registers.uconfig.num_indices().unwrap_or(0);
                    let instance_count = self.registers.uconfig.num_instances().unwrap_or(1).max(1);
                    self.trace.push(PipeEvent::Draw { index_count, instance_count });
                }
                PacketOutcome::Done
            }
            Opcode::DrawIndirect | Opcode::DrawIndexIndirect => {
                if self.predicate {
                    self.trace.push(PipeEvent::DrawIndirect {
                        args_address: address_from_pair(body, 0),
                    });
                }
                PacketOutcome::Done
            }
            Opcode::DispatchDirect => {
                let x = body.first().copied().unwrap_or(1);
                let y = body.get(1).copied().unwrap_or(1);
                let z = body.get(2).copied().unwrap_or(1);
                self.trace.push(PipeEvent::DispatchDirect { x, y, z });
                PacketOutcome::Done
            }
            Opcode::DispatchIndirect => {
                self.trace.push(PipeEvent::DispatchIndirect {
                    args_address: address_from_pair(body, 0),
                });
                PacketOutcome::Done
            }
            Opcode::WriteData => {
                self.write_data(ring, body, mem);
                PacketOutcome::Done
            }
            Opcode::WaitRegMem => self.wait_reg_mem(ring, body, mem)?,
            Opcode::IndirectBuffer => self.indirect_buffer(ring, body, mem, depth)?,
            Opcode::CondWrite => {
                self.cond_write(ring, body, mem);
                PacketOutcome::Done
            }
            Opcode::EventWriteEop => {
                let vm_id = self.de_queues[ring].map(|q| q.vm_id).unwrap_or(0);
                let address = address_from_pair(body, 1);
                let value = u64::from(body.get(3).copied().unwrap_or(0));
                if address != 0 {
                    mem.write_or_drop(vm_id, address, &(value as u32).to_le_bytes());
                }
                self.trace.push(PipeEvent::EventWriteEop { address, value });
                PacketOutcome::Done
            }
            Opcode::ReleaseMem => {
                let vm_id = self.de_queues[ring].map(|q| q.vm_id).unwrap_or(0);
                let address = address_from_pair(body, 1);
                let value = u64::from(body.get(3).copied().unwrap_or(0));
                if address != 0 {
                    mem.write_or_drop(vm_id, address, &(value as u32).to_le_bytes());
                }
                self.trace.push(PipeEvent::ReleaseMem { address, value });
                PacketOutcome::Done
            }
            Opcode::DmaData => {
                self.dma_data(body, mem, ring);
                PacketOutcome::Done
            }
            Opcode::IncrementDeCounter => {
                self.de_counter += 1;
                PacketOutcome::Done
            }
            Opcode::WaitOnCeCounter => {
                // The CE ring is fully drained ahead of every DE ring each
                // `process_all_rings` pass (see its doc comment), so by
                // the time a DE ring reaches this opcode the invariant the
                // original spins on already holds.
                debug_assert!(self.ce_counter >= self.de_counter);
                PacketOutcome::Done
            }
            Opcode::SetCeDeCounters => {
                self.ce_counter = u64::from(body.first().copied().unwrap_or(0));
                self.de_counter = u64::from(body.get(1).copied().unwrap_or(0));
                PacketOutcome::Done
            }
            Opcode::WaitOnDeCounterDiff | Opcode::IncrementCeCounter | Opcode::LoadConstRam | Opcode::WriteConstRam | Opcode::DumpConstRam => {
                return Err(Fatal::RingProtocolViolation {
                    ring: "gfx-de",
                    packet_offset: 0,
                    reason: "CE-only opcode issued on a DE ring",
                });
            }
        };
        Ok(outcome)
    }

    fn dispatch_ce(&mut self, opcode: u8, body: &[u32], mem: &dyn GuestMemory) -> Result<(), Fatal> {
        let op = Opcode::from_u8(opcode).ok_or(Fatal::RingProtocolViolation {
            ring: "gfx-ce",
            packet_offset: 0,
            reason: "unknown CE opcode",
        })?;
        match op {
            Opcode::Nop => Ok(()),
            Opcode::WaitOnDeCounterDiff => {
                let diff = u64::from(body.first().copied().unwrap_or(0));
                debug_assert!(self.de_counter >= diff || diff == 0);
                Ok(())
            }
            Opcode::IncrementCeCounter => {
                self.ce_counter += 1;
                Ok(())
            }
            Opcode::LoadConstRam => {
                let address = address_from_pair(body, 0);
                let dword_offset = body.get(2).copied().unwrap_or(0) as usize;
                let dword_count = body.get(3).copied().unwrap_or(0) as usize;
                let vm_id = self.ce_queue.map(|q| q.vm_id).unwrap_or(0);
                for i in 0..dword_count {
                    let Some(slot) = self.constant_memory.get_mut(dword_offset + i) else {
                        break;
                    };
                    let mut bytes = [0u8; 4];
                    mem.read_zero_filled(vm_id, address + i as u64 * 4, &mut bytes);
                    *slot = u32::from_le_bytes(bytes);
                }
                Ok(())
            }
            Opcode::WriteConstRam => {
                let dword_offset = body.first().copied().unwrap_or(0) as usize;
                for (i, &value) in body.iter().skip(1).enumerate() {
                    if let Some(slot) = self.constant_memory.get_mut(dword_offset + i) {
                        *slot = value;
                    }
                }
                Ok(())
            }
            Opcode::DumpConstRam => Ok(()),
            _ => Err(Fatal::RingProtocolViolation {
                ring: "gfx-ce",
                packet_offset: 0,
                reason: "DE-only opcode issued on the CE ring",
            }),
        }
    }

    fn draw_index_indir_patch_base_or_store(&mut self, body: &[u32]) {
        // `SET_BASE` selects among a handful of base-address registers by
        // a small selector in `body[0]`; only the two this crate's
        // `dmaData`/indirect-draw handling consults are kept.
        match body.first().copied().unwrap_or(0) {
            0 => self.gds_partition_bases[0] = address_from_pair(body, 1),
            1 => self.gds_partition_bases[1] = address_from_pair(body, 1),
            _ => {}
        }
    }

    fn write_data(&self, ring: usize, body: &[u32], mem: &dyn GuestMemory) {
        let Some((&_control, rest)) = body.split_first() else {
            return;
        };
        let Some((&address_lo, rest)) = rest.split_first() else {
            return;
        };
        let Some((&address_hi, values)) = rest.split_first() else {
            return;
        };
        let address = (u64::from(address_hi) << 32) | u64::from(address_lo);
        let vm_id = self.de_queues[ring].map(|q| q.vm_id).unwrap_or(0);
        for (i, &value) in values.iter().enumerate() {
            mem.write_or_drop(vm_id, address + i as u64 * 4, &value.to_le_bytes());
        }
    }

    /// `WAIT_REG_MEM` is a suspension point, not a failure: spec.md §4.9
    /// says a handler returning false "freezes the ring at that packet;
    /// the pipe proceeds to the next ring and revisits", and §5 lists
    /// this polling as the non-blocking yield-and-resume case (Scenario
    /// B). Matches `original_source/rpcsx-gpu2/Pipe.cpp`'s `waitRegMem`,
    /// which returns the `compare(...)` result directly for `processRing`
    /// to act on rather than throwing when it's false.
    fn wait_reg_mem(&self, ring: usize, body: &[u32], mem: &dyn GuestMemory) -> Result<PacketOutcome, Fatal> {
        let engine_and_fn = body.first().copied().unwrap_or(0);
        // Bit 4 selecting a memory poll over a register poll is this
        // crate's own convention (Open Question 3, `opcode.rs`'s doc
        // comment) — no upstream `WAIT_REG_MEM` bit layout is available
        // to copy from in the retrieved pack.
        let is_memory_poll = engine_and_fn & 0x10 != 0;
        let cmp = CompareFn::from_u32(engine_and_fn & 0x7).ok_or(Fatal::RingProtocolViolation {
            ring: "gfx-de",
            packet_offset: 0,
            reason: "WAIT_REG_MEM with an unknown compare function",
        })?;
        let address = address_from_pair(body, 1);
        let reference = body.get(3).copied().unwrap_or(0);
        let mask = body.get(4).copied().unwrap_or(u32::MAX);
        let poll = if is_memory_poll {
            let vm_id = self.de_queues[ring].map(|q| q.vm_id).unwrap_or(0);
            let mut bytes = [0u8; 4];
            mem.read_zero_filled(vm_id, address, &mut bytes);
            u32::from_le_bytes(bytes)
        } else {
            self.registers.read(address as u32).unwrap_or(0)
        };
        if cmp.eval(poll, mask, reference) {
            Ok(PacketOutcome::Done)
        } else {
            Ok(PacketOutcome::NotReady)
        }
    }

    fn cond_write(&self, ring: usize, body: &[u32], mem: &dyn GuestMemory) {
        let engine_and_fn = body.first().copied().unwrap_or(0);
        let is_memory_poll = engine_and_fn & 0x10 != 0;
        let Some(cmp) = CompareFn::from_u32(engine_and_fn & 0x7) else {
            return;
        };
        let poll_address = address_from_pair(body, 1);
        let reference = body.get(3).copied().unwrap_or(0);
        let mask = body.get(4).copied().unwrap_or(u32::MAX);
        let write_address = address_from_pair(body, 5);
        let write_value = body.get(7).copied().unwrap_or(0);

        let vm_id = self.de_queues[ring].map(|q| q.vm_id).unwrap_or(0);
        let poll = if is_memory_poll {
            let mut bytes = [0u8; 4];
            mem.read_zero_filled(vm_id, poll_address, &mut bytes);
            u32::from_le_bytes(bytes)
        } else {
            self.registers.read(poll_address as u32).unwrap_or(0)
        };
        if cmp.eval(poll, mask, reference) {
            mem.write_or_drop(vm_id, write_address, &write_value.to_le_bytes());
        }
    }

    fn dma_data(&self, body: &[u32], mem: &dyn GuestMemory, ring: usize) {
        let src = address_from_pair(body, 0);
        let dst = address_from_pair(body, 2);
        let size = body.get(4).copied().unwrap_or(0) as usize;
        let vm_id = self.de_queues[ring].map(|q| q.vm_id).unwrap_or(0);
        let mut buffer = vec![0u8; size];
        mem.read_zero_filled(vm_id, src, &mut buffer);
        mem.write_or_drop(vm_id, dst, &buffer);
    }

    /// `INDIRECT_BUFFER` switches the ring to a new range and drains it
    /// inline (spec.md §4.9). If that inner ring itself stalls on a
    /// `WAIT_REG_MEM` before draining, the indirect buffer as a whole is
    /// `NotReady`: the outer ring's `rptr` must stay at this packet so a
    /// later revisit re-enters the indirect buffer rather than skipping
    /// past it. The inner ring's own progress isn't preserved across such
    /// a stall — it restarts from its base address on the next revisit,
    /// since nothing here persists a suspended nested `Queue` — only the
    /// top-level stall in Scenario B needs to resume exactly where it
    /// left off.
    fn indirect_buffer(&mut self, ring: usize, body: &[u32], mem: &dyn GuestMemory, depth: u32) -> Result<PacketOutcome, Fatal> {
        let address = address_from_pair(body, 0);
        let size_dwords = body.get(2).copied().unwrap_or(0);
        let vm_id = self.de_queues[ring].map(|q| q.vm_id).unwrap_or(0);

        let outer = self.de_queues[ring];
        self.de_queues[ring] = Some(Queue::from_range(vm_id, address, size_dwords, depth as u8 + 1));
        let drain_result = self.process_de_ring(ring, mem, depth + 1);
        let inner_drained = self.de_queues[ring].map(|q| q.is_empty()).unwrap_or(true);
        self.de_queues[ring] = outer;
        drain_result?;
        if inner_drained {
            Ok(PacketOutcome::Done)
        } else {
            Ok(PacketOutcome::NotReady)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm4;
    use crate::process::sim::SimGuestMemory;

    fn seed_ring(mem: &SimGuestMemory, vm_id: u8, packets: &[(u8, &[u32])]) -> u32 {
        let mut words = Vec::new();
        for &(opcode, body) in packets {
            pm4::encode_packet(opcode, body, &mut words);
        }
        for (i, word) in words.iter().enumerate() {
            mem.seed(vm_id, i as u64 * 4, &word.to_le_bytes());
        }
        words.len() as u32
    }

    #[test]
    fn draw_index_auto_records_a_draw_event_from_uconfig() {
        let mem = SimGuestMemory::new();
        let size = seed_ring(
            &mem,
            0,
            &[
                (Opcode::SetUconfigReg as u8, &[0x24c, 36, 2]),
                (Opcode::DrawIndexAuto as u8, &[0]),
            ],
        );
        let mut pipe = GraphicsPipe::new(0);
        pipe.set_de_queue(Queue::from_range(0, 0, size, 0), 0);
        pipe.process_all_rings(&mem).unwrap();
        assert_eq!(
            pipe.trace,
            vec![PipeEvent::Draw { index_count: 36, instance_count: 2 }]
        );
    }

    #[test]
    fn set_predication_false_suppresses_the_draw() {
        let mem = SimGuestMemory::new();
        let size = seed_ring(
            &mem,
            0,
            &[
                (Opcode::SetPredication as u8, &[0]),
                (Opcode::DrawIndexAuto as u8, &[0]),
            ],
        );
        let mut pipe = GraphicsPipe::new(0);
        pipe.set_de_queue(Queue::from_range(0, 0, size, 0), 0);
        pipe.process_all_rings(&mem).unwrap();
        assert!(pipe.trace.is_empty());
    }

    #[test]
    fn wait_reg_mem_register_poll_succeeds_when_condition_holds() {
        let mem = SimGuestMemory::new();
        let index_offset = register_offsets::UCONFIG + 0x24c;
        let size = seed_ring(
            &mem,
            0,
            &[
                (Opcode::SetUconfigReg as u8, &[0x24c, 7]),
                (Opcode::WaitRegMem as u8, &[0x3, index_offset, 0, 7, 0xffff_ffff]),
            ],
        );
        let mut pipe = GraphicsPipe::new(0);
        pipe.set_de_queue(Queue::from_range(0, 0, size, 0), 0);
        pipe.process_all_rings(&mem).unwrap();
    }

    /// Scenario B: a poll address holds `0x1`; `WAIT_REG_MEM(func=EQ,
    /// ref=0x2, mask=0xF)` doesn't hold yet, so the ring freezes at that
    /// packet instead of erroring — `rptr` stays put and the pass reports
    /// no progress. Writing `0x2` to the polled address makes the same
    /// packet succeed on the next pass.
    #[test]
    fn wait_reg_mem_freezes_the_ring_until_its_poll_condition_holds() {
        let mem = SimGuestMemory::new();
        let poll_address = 0x9000u64;
        mem.seed(0, poll_address, &1u32.to_le_bytes());
        let size = seed_ring(
            &mem,
            0,
            &[(
                Opcode::WaitRegMem as u8,
                &[0x10 | 0x3, poll_address as u32, (poll_address >> 32) as u32, 2, 0xF],
            )],
        );
        let mut pipe = GraphicsPipe::new(0);
        pipe.set_de_queue(Queue::from_range(0, 0, size, 0), 0);

        assert_eq!(pipe.process_all_rings(&mem).unwrap(), false);
        assert_eq!(pipe.de_queues[0].unwrap().rptr, 0);
        assert!(!pipe.de_queues[0].unwrap().is_empty());

        mem.seed(0, poll_address, &2u32.to_le_bytes());
        assert_eq!(pipe.process_all_rings(&mem).unwrap(), true);
        assert!(pipe.de_queues[0].unwrap().is_empty());
    }

    #[test]
    fn indirect_buffer_nesting_past_the_limit_is_fatal() {
        let mem = SimGuestMemory::new();
        // A ring that contains only an `INDIRECT_BUFFER` packet pointing
        // at itself recurses forever; it must hit the depth limit rather
        // than overflow the stack.
        let mut words = Vec::new();
        pm4::encode_packet(Opcode::IndirectBuffer as u8, &[0, 0, 1], &mut words);
        for (i, word) in words.iter().enumerate() {
            mem.seed(0, i as u64 * 4, &word.to_le_bytes());
        }
        let mut pipe = GraphicsPipe::new(0);
        pipe.set_de_queue(Queue::from_range(0, 0, words.len() as u32, 0), 0);
        assert!(matches!(
            pipe.process_all_rings(&mem),
            Err(Fatal::IndirectNestingExceeded { .. })
        ));
    }

    #[test]
    fn dma_data_copies_bytes_between_guest_addresses() {
        let mem = SimGuestMemory::new();
        mem.seed(0, 0x2000, &[1, 2, 3, 4]);
        let size = seed_ring(&mem, 0, &[(Opcode::DmaData as u8, &[0x2000, 0, 0x3000, 0, 4])]);
        let mut pipe = GraphicsPipe::new(0);
        pipe.set_de_queue(Queue::from_range(0, 0, size, 0), 0);
        pipe.process_all_rings(&mem).unwrap();
        let mut out = [0u8; 4];
        mem.read(0, 0x3000, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn write_const_ram_round_trips_through_constant_memory() {
        let mem = SimGuestMemory::new();
        let mut ce_words = Vec::new();
        pm4::encode_packet(Opcode::WriteConstRam as u8, &[4, 11, 22], &mut ce_words);
        for (i, word) in ce_words.iter().enumerate() {
            mem.seed(0, 0x10000 + i as u64 * 4, &word.to_le_bytes());
        }
        let mut pipe = GraphicsPipe::new(0);
        pipe.set_ce_queue(Queue::from_range(0, 0x10000, ce_words.len() as u32, 0));
        pipe.process_all_rings(&mem).unwrap();
        assert_eq!(pipe.constant_memory[4], 11);
        assert_eq!(pipe.constant_memory[5], 22);
    }

    #[test]
    fn de_only_opcode_on_the_ce_ring_is_rejected() {
        let mem = SimGuestMemory::new();
        let mut ce_words = Vec::new();
        pm4::encode_packet(Opcode::DrawPreamble as u8, &[1], &mut ce_words);
        for (i, word) in ce_words.iter().enumerate() {
            mem.seed(0, i as u64 * 4, &word.to_le_bytes());
        }
        let mut pipe = GraphicsPipe::new(0);
        pipe.set_ce_queue(Queue::from_range(0, 0, ce_words.len() as u32, 0));
        assert!(matches!(pipe.process_all_rings(&mem), Err(Fatal::RingProtocolViolation { .. })));
    }
}
