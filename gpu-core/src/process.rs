//! Guest process (VM slot) table and the guest-memory access surface the
//! rest of the engine routes through.
//!
//! Grounded on spec.md §3's "Process / VM slot" data model and §6's guest
//! memory mapping formula. The host window/PUP-install/fd-ownership side
//! of a guest process is out of scope (spec.md §1); this module only keeps
//! what the cache, pipes, and flip pipeline need: the vmId a pid maps to,
//! the per-vm interval map of mapped ranges, and the ten flip-eligible
//! buffer slots `IT_FLIP`'s `bufferIndex` indexes into.

use gpu_types::{DataFormat, MemoryProtection, TileMode, MAX_PROCESS_COUNT};

use crate::error::GuestMemoryFault;
use crate::interval_map::IntervalMap;

/// Number of presentable buffer slots a process can register, matching
/// `IT_FLIP`'s single-byte `bufferIndex` payload field space as used by
/// the flip pipeline (`buffer-attributes[10]`/`buffers[10]` in spec.md §3).
pub const BUFFER_SLOT_COUNT: usize = 10;

/// One `vmTable` entry: the payload spec.md §3 names `{memoryType, prot,
/// offset, baseAddress}`, recorded by `IT_MAP_MEMORY` and consulted by
/// every guest address translation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmMapping {
    /// Opaque memory-kind tag (system RAM vs. a `dmemIndex`-selected
    /// video-memory pool); the engine never branches on its value, only
    /// threads it through `IT_MAP_MEMORY`'s payload, so it stays a raw
    /// `u32` rather than a closed enum.
    pub memory_type: u32,
    pub prot: MemoryProtection,
    pub offset: u64,
    pub base_address: u64,
}

/// A presentable buffer's surface description, registered by the guest
/// before the first `IT_FLIP` that references its slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferAttribute {
    pub width: u32,
    pub height: u32,
    pub format: DataFormat,
    pub tile_mode: TileMode,
    pub pitch: u32,
}

/// One guest process's VM slot: its `vmId`, the interval map of mapped
/// guest address ranges, and its flip-eligible buffer registrations.
/// Matches spec.md §3's `{pid, fd, buffer-attributes[10], buffers[10],
/// vmTable}`; `fd` is kept as an opaque handle since this crate never
/// opens or closes it (`MAP_PROCESS`/`UNMAP_PROCESS` own that lifecycle
/// outside the GPU core).
pub struct Process {
    pub pid: u32,
    pub vm_id: u8,
    pub fd: i32,
    pub vm_table: IntervalMap<VmMapping>,
    pub buffer_attributes: [Option<BufferAttribute>; BUFFER_SLOT_COUNT],
    pub buffers: [Option<u64>; BUFFER_SLOT_COUNT],
}

impl Process {
    fn new(pid: u32, vm_id: u8, fd: i32) -> Self {
        Process {
            pid,
            vm_id,
            fd,
            vm_table: IntervalMap::new(),
            buffer_attributes: [None; BUFFER_SLOT_COUNT],
            buffers: [None; BUFFER_SLOT_COUNT],
        }
    }

    pub fn set_buffer(&mut self, index: usize, address: u64, attribute: BufferAttribute) {
        self.buffers[index] = Some(address);
        self.buffer_attributes[index] = Some(attribute);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ProcessTableError {
    #[error("process table exhausted ({MAX_PROCESS_COUNT} slots in use)")]
    SlotsExhausted,
    #[error("pid {0} is not mapped to any vm slot")]
    UnknownPid(u32),
}

/// `kMaxProcessCount` VM slots, indexed by `pid`. Matches `Device`'s
/// `MAP_PROCESS`/`UNMAP_PROCESS` handlers: mapping assigns the lowest free
/// `vmId`, unmapping frees it for reuse by a later `MAP_PROCESS`.
#[derive(Default)]
pub struct ProcessTable {
    slots: [Option<Process>; MAX_PROCESS_COUNT],
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable {
            slots: Default::default(),
        }
    }

    /// `IT_MAP_PROCESS`: assigns `pid` the lowest free `vmId`.
    pub fn map_process(&mut self, pid: u32, fd: i32) -> Result<u8, ProcessTableError> {
        let vm_id = self
            .slots
            .iter()
            .position(|slot| slot.is_none())
            .ok_or(ProcessTableError::SlotsExhausted)? as u8;
        self.slots[vm_id as usize] = Some(Process::new(pid, vm_id, fd));
        Ok(vm_id)
    }

    /// `IT_UNMAP_PROCESS`: the caller (`Device`) must have already drained
    /// every pipe referencing this `vmId` before calling this, per spec.md
    /// §3's process lifecycle note.
    pub fn unmap_process(&mut self, pid: u32) -> Result<(), ProcessTableError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|p| p.pid == pid))
            .ok_or(ProcessTableError::UnknownPid(pid))?;
        *slot = None;
        Ok(())
    }

    pub fn by_pid(&self, pid: u32) -> Option<&Process> {
        self.slots.iter().flatten().find(|p| p.pid == pid)
    }

    pub fn by_pid_mut(&mut self, pid: u32) -> Option<&mut Process> {
        self.slots.iter_mut().flatten().find(|p| p.pid == pid)
    }

    pub fn by_vm_id(&self, vm_id: u8) -> Option<&Process> {
        self.slots.get(vm_id as usize)?.as_ref()
    }

    pub fn by_vm_id_mut(&mut self, vm_id: u8) -> Option<&mut Process> {
        self.slots.get_mut(vm_id as usize)?.as_mut()
    }

    /// `IT_MAP_MEMORY`.
    pub fn map_memory(
        &mut self,
        pid: u32,
        address: u64,
        size: u64,
        mapping: VmMapping,
    ) -> Result<(), ProcessTableError> {
        let process = self
            .by_pid_mut(pid)
            .ok_or(ProcessTableError::UnknownPid(pid))?;
        process.vm_table.insert(address, address + size, mapping);
        Ok(())
    }

    /// `IT_UNMAP_MEMORY`.
    pub fn unmap_memory(&mut self, pid: u32, address: u64, size: u64) -> Result<(), ProcessTableError> {
        let process = self
            .by_pid_mut(pid)
            .ok_or(ProcessTableError::UnknownPid(pid))?;
        process.vm_table.remove_range(address, address + size);
        Ok(())
    }

    /// `IT_PROTECT_MEMORY`: updates the protection bits of every mapping
    /// overlapping `[address, address+size)` without disturbing their
    /// `memoryType`/`offset`/`baseAddress`. Per spec.md §1's non-goal, this
    /// is the full extent of guest memory protection this engine models.
    pub fn protect_memory(
        &mut self,
        pid: u32,
        address: u64,
        size: u64,
        prot: MemoryProtection,
    ) -> Result<(), ProcessTableError> {
        let process = self
            .by_pid_mut(pid)
            .ok_or(ProcessTableError::UnknownPid(pid))?;
        let touched: Vec<(u64, u64, VmMapping)> = process
            .vm_table
            .overlapping(address, address + size)
            .map(|(s, e, m)| (s, e, *m))
            .collect();
        for (s, e, mut mapping) in touched {
            mapping.prot = prot;
            process.vm_table.insert(s, e, mapping);
        }
        Ok(())
    }
}

/// Guest memory access, abstracted so the cache and pipes don't need a
/// concrete host-mapping strategy. A real embedder backs this with the
/// actual shared memory the guest process was handed; §6's `(vmId << 40)
/// | a` formula is the real implementation's pointer arithmetic, not
/// something this trait needs to expose since callers only ever deal in
/// `(vmId, guest address)` pairs.
///
/// Per spec.md §7, a fault (address outside every mapped range) is logged
/// and handled by direction rather than propagated as fatal: reads return
/// zero-filled data, writes are dropped. This trait surfaces the fault to
/// the caller instead of silently eating it, so callers (the cache) can
/// still bump wherever they track "this read came from unmapped memory"
/// if they choose to; `read_zero_filled`/`write_or_drop` below are the
/// spec-prescribed helpers most callers actually want.
pub trait GuestMemory {
    fn read(&self, vm_id: u8, address: u64, out: &mut [u8]) -> Result<(), GuestMemoryFault>;
    fn write(&self, vm_id: u8, address: u64, data: &[u8]) -> Result<(), GuestMemoryFault>;

    fn read_u32(&self, vm_id: u8, address: u64) -> Result<u32, GuestMemoryFault> {
        let mut bytes = [0u8; 4];
        self.read(vm_id, address, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    fn write_u32(&self, vm_id: u8, address: u64, value: u32) -> Result<(), GuestMemoryFault> {
        self.write(vm_id, address, &value.to_le_bytes())
    }

    /// Reads `out.len()` bytes, zero-filling on a fault rather than
    /// propagating it — the read-side half of spec.md §7's guest-memory
    /// fault handling.
    fn read_zero_filled(&self, vm_id: u8, address: u64, out: &mut [u8]) {
        if self.read(vm_id, address, out).is_err() {
            out.fill(0);
        }
    }

    /// Writes `data`, silently dropping it on a fault — the write-side
    /// half of spec.md §7's guest-memory fault handling.
    fn write_or_drop(&self, vm_id: u8, address: u64, data: &[u8]) {
        let _ = self.write(vm_id, address, data);
    }
}

/// A `GuestMemory` test double backed by a sparse byte map, keyed by the
/// same `(vmId << 40) | address` composition spec.md §6 prescribes for
/// the real pointer arithmetic, so tests can exercise cross-vm isolation
/// without mmap-ing real guest pages. Public (rather than `#[cfg(test)]`)
/// so `gpu-core`'s `tests/` integration suite can drive a `Device`/
/// `GraphicsPipe` without a real mapped process, same as this crate's own
/// inline unit tests do.
#[doc(hidden)]
pub mod sim {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct SimGuestMemory {
        bytes: Mutex<HashMap<u64, u8>>,
        faulting: Mutex<Vec<(u64, u64)>>,
    }

    impl SimGuestMemory {
        pub fn new() -> Self {
            Self::default()
        }

        fn key(vm_id: u8, address: u64) -> u64 {
            ((vm_id as u64) << 40) | address
        }

        pub fn seed(&self, vm_id: u8, address: u64, data: &[u8]) {
            let mut bytes = self.bytes.lock();
            for (i, &b) in data.iter().enumerate() {
                bytes.insert(Self::key(vm_id, address + i as u64), b);
            }
        }

        /// Marks `[address, address+len)` as unmapped for `vm_id`, so reads
        /// through it fault instead of silently returning zero bytes that
        /// happen to already be absent from the map.
        pub fn mark_unmapped(&self, vm_id: u8, address: u64, len: u64) {
            self.faulting.lock().push((Self::key(vm_id, address), len));
        }

        fn is_faulting(&self, vm_id: u8, address: u64, len: u64) -> bool {
            let start = Self::key(vm_id, address);
            self.faulting
                .lock()
                .iter()
                .any(|&(fault_start, fault_len)| {
                    start < fault_start + fault_len && fault_start < start + len
                })
        }
    }

    impl GuestMemory for SimGuestMemory {
        fn read(&self, vm_id: u8, address: u64, out: &mut [u8]) -> Result<(), GuestMemoryFault> {
            if self.is_faulting(vm_id, address, out.len() as u64) {
                return Err(GuestMemoryFault::new(address, out.len() as u32, gpu_types::Access::Read).log());
            }
            let bytes = self.bytes.lock();
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = *bytes.get(&Self::key(vm_id, address + i as u64)).unwrap_or(&0);
            }
            Ok(())
        }

        fn write(&self, vm_id: u8, address: u64, data: &[u8]) -> Result<(), GuestMemoryFault> {
            if self.is_faulting(vm_id, address, data.len() as u64) {
                return Err(GuestMemoryFault::new(address, data.len() as u32, gpu_types::Access::Write).log());
            }
            let mut bytes = self.bytes.lock();
            for (i, &b) in data.iter().enumerate() {
                bytes.insert(Self::key(vm_id, address + i as u64), b);
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::sim::SimGuestMemory;
    use super::*;

    #[test]
    fn map_process_assigns_lowest_free_vm_id() {
        let mut table = ProcessTable::new();
        assert_eq!(table.map_process(100, 3).unwrap(), 0);
        assert_eq!(table.map_process(101, 4).unwrap(), 1);
        table.unmap_process(100).unwrap();
        assert_eq!(table.map_process(102, 5).unwrap(), 0);
    }

    #[test]
    fn map_process_exhaustion_is_reported() {
        let mut table = ProcessTable::new();
        for pid in 0..MAX_PROCESS_COUNT as u32 {
            table.map_process(pid, 0).unwrap();
        }
        assert_eq!(
            table.map_process(MAX_PROCESS_COUNT as u32, 0),
            Err(ProcessTableError::SlotsExhausted)
        );
    }

    #[test]
    fn unmap_process_frees_vm_table() {
        let mut table = ProcessTable::new();
        table.map_process(7, 0).unwrap();
        table
            .map_memory(7, 0x1000, 0x1000, VmMapping {
                memory_type: 0,
                prot: MemoryProtection::READ,
                offset: 0,
                base_address: 0,
            })
            .unwrap();
        table.unmap_process(7).unwrap();
        assert_eq!(table.by_pid(7), None);
    }

    #[test]
    fn protect_memory_updates_existing_mappings_only() {
        let mut table = ProcessTable::new();
        table.map_process(1, 0).unwrap();
        table
            .map_memory(1, 0x0, 0x1000, VmMapping {
                memory_type: 0,
                prot: MemoryProtection::READ,
                offset: 0,
                base_address: 0,
            })
            .unwrap();
        table
            .protect_memory(1, 0x0, 0x1000, MemoryProtection::READ | MemoryProtection::WRITE)
            .unwrap();
        let process = table.by_pid(1).unwrap();
        let (_, _, mapping) = process.vm_table.overlapping(0, 0x1000).next().unwrap();
        assert!(mapping.prot.contains(MemoryProtection::WRITE));
    }

    #[test]
    fn sim_guest_memory_round_trips_across_vm_ids() {
        let memory = SimGuestMemory::new();
        memory.seed(0, 0x1000, &[1, 2, 3, 4]);
        memory.seed(1, 0x1000, &[9, 9, 9, 9]);
        assert_eq!(memory.read_u32(0, 0x1000).unwrap(), u32::from_le_bytes([1, 2, 3, 4]));
        assert_eq!(memory.read_u32(1, 0x1000).unwrap(), 0x09090909);
    }

    #[test]
    fn faulting_range_zero_fills_on_read_and_drops_on_write() {
        let memory = SimGuestMemory::new();
        memory.mark_unmapped(0, 0x2000, 4);
        let mut out = [0xffu8; 4];
        memory.read_zero_filled(0, 0x2000, &mut out);
        assert_eq!(out, [0, 0, 0, 0]);
        memory.write_or_drop(0, 0x2000, &[1, 2, 3, 4]);
        let mut out2 = [0xffu8; 4];
        memory.read(0, 0x2000, &mut out2).unwrap_err();
    }
}
