//! Ring cursor shared by [`super::compute::ComputePipe`] and
//! [`super::graphics::GraphicsPipe`].
//!
//! Grounded on `original_source/rpcsx-gpu2/Pipe.hpp`'s `Queue` (`vmId`,
//! `indirectLevel`, `base`, `size`, `rptr`, `wptr`) and its
//! `createFromRange` constructor. The original addresses ring memory
//! through a host-mapped `std::uint32_t*`; this crate has no real guest
//! process to map, so a `Queue` instead carries the guest address that
//! pointer would have resolved to, and every dword access goes through
//! [`crate::process::GuestMemory`].

use smallvec::SmallVec;

use crate::error::Fatal;
use crate::pm4::{self, PacketType};
use crate::process::GuestMemory;

/// One ring (or indirect-buffer level): a `[base, base + size)` guest
/// dword range with independent read/write cursors.
#[derive(Clone, Copy, Debug)]
pub struct Queue {
    pub vm_id: u8,
    pub indirect_level: u8,
    pub base: u64,
    pub size_dwords: u32,
    pub rptr: u32,
    pub wptr: u32,
}

impl Queue {
    /// Matches `Queue::createFromRange`: `wptr` starts at the end of the
    /// range (the whole range is already written), `rptr` at its start.
    pub fn from_range(vm_id: u8, base: u64, size_dwords: u32, indirect_level: u8) -> Self {
        Queue {
            vm_id,
            indirect_level,
            base,
            size_dwords,
            rptr: 0,
            wptr: size_dwords,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rptr == self.wptr
    }

    fn dword_address(&self, index: u32) -> u64 {
        self.base + u64::from(index % self.size_dwords.max(1)) * 4
    }

    fn read_dword(&self, mem: &dyn GuestMemory, index: u32) -> u32 {
        let mut bytes = [0u8; 4];
        mem.read_zero_filled(self.vm_id, self.dword_address(index), &mut bytes);
        u32::from_le_bytes(bytes)
    }

    /// Decodes the packet at `rptr` without consuming it. `None` once the
    /// ring is drained. The returned `u32` is the packet's total length in
    /// dwords (header included) — pass it to [`Queue::advance`] once the
    /// caller has actually dispatched the packet.
    ///
    /// Split from a single combined pop so a handler that isn't ready yet
    /// (`WAIT_REG_MEM` polling a condition that doesn't hold) can leave
    /// `rptr` exactly where it is: spec.md §4.9's ring state machine
    /// freezes the ring at the unready packet rather than skipping past
    /// it, matching `original_source/rpcsx-gpu2/Pipe.cpp`'s `processRing`,
    /// which only does `queue.rptr += len` after its handler returns
    /// `true`.
    pub fn peek(&self, mem: &dyn GuestMemory) -> Result<Option<(Packet, u32)>, Fatal> {
        if self.is_empty() {
            return Ok(None);
        }
        let offset = self.rptr;
        let header = self.read_dword(mem, offset);
        let packet = pm4::decode_header(header).map_err(|_| Fatal::RingProtocolViolation {
            ring: "pipe",
            packet_offset: offset,
            reason: "unknown packet type",
        })?;
        match packet {
            PacketType::Nop => Ok(Some((Packet::Nop, 1))),
            PacketType::Command { opcode, count } => {
                let mut body = SmallVec::new();
                for i in 0..count {
                    body.push(self.read_dword(mem, offset + 1 + u32::from(i)));
                }
                Ok(Some((Packet::Command { opcode, body }, 1 + u32::from(count))))
            }
        }
    }

    /// Commits a packet already returned by [`Queue::peek`]: advances
    /// `rptr` past it. `len` is the dword count `peek` returned alongside
    /// the packet.
    pub fn advance(&mut self, len: u32) {
        self.rptr = self.rptr.wrapping_add(len);
    }
}

/// A packet decoded by [`Queue::peek`], not yet committed.
#[derive(Clone, Debug)]
pub enum Packet {
    /// A type-2 single-dword filler; the caller should just advance and
    /// continue, there is nothing to dispatch.
    Nop,
    Command { opcode: u8, body: SmallVec<[u32; 16]> },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::sim::SimGuestMemory;

    fn seed_packet(mem: &SimGuestMemory, vm_id: u8, address: u64, opcode: u8, body: &[u32]) -> u64 {
        let mut words = Vec::new();
        pm4::encode_packet(opcode, body, &mut words);
        for (i, word) in words.iter().enumerate() {
            mem.seed(vm_id, address + i as u64 * 4, &word.to_le_bytes());
        }
        address + words.len() as u64 * 4
    }

    #[test]
    fn peek_decodes_a_command_then_drains_to_empty() {
        let mem = SimGuestMemory::new();
        let end = seed_packet(&mem, 0, 0, 0x20, &[1, 2, 3]);
        let size = ((end - 0) / 4) as u32;
        let mut queue = Queue::from_range(0, 0, size, 0);

        let (packet, len) = queue.peek(&mem).unwrap().unwrap();
        let Packet::Command { opcode, body } = packet else {
            panic!("expected a command packet");
        };
        assert_eq!(opcode, 0x20);
        assert_eq!(&body[..], &[1, 2, 3]);
        queue.advance(len);
        assert!(queue.is_empty());
        assert!(queue.peek(&mem).unwrap().is_none());
    }

    #[test]
    fn peek_does_not_consume_the_packet() {
        let mem = SimGuestMemory::new();
        let end = seed_packet(&mem, 0, 0, 0x20, &[1, 2, 3]);
        let size = ((end - 0) / 4) as u32;
        let queue = Queue::from_range(0, 0, size, 0);

        // Calling `peek` twice without an intervening `advance` must
        // yield the same packet both times — this is what lets a
        // not-ready `WAIT_REG_MEM` re-present the same packet next pass.
        assert!(matches!(queue.peek(&mem).unwrap(), Some((Packet::Command { .. }, _))));
        assert!(matches!(queue.peek(&mem).unwrap(), Some((Packet::Command { .. }, _))));
        assert_eq!(queue.rptr, 0);
    }

    #[test]
    fn peek_reports_a_nop_filler_dword_without_a_command() {
        let mem = SimGuestMemory::new();
        mem.seed(0, 0, &(2u32 << 30).to_le_bytes());
        let mut queue = Queue::from_range(0, 0, 1, 0);
        let (packet, len) = queue.peek(&mem).unwrap().unwrap();
        assert!(matches!(packet, Packet::Nop));
        queue.advance(len);
        assert!(queue.is_empty());
    }
}
