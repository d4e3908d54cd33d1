//! The device: owns every VM slot's resources, the GFX/compute pipe fleet,
//! and the two device-scoped main rings that carry the custom
//! `pm4::DeviceOpcode` packets (`IT_FLIP`/`IT_MAP_MEMORY`/`IT_UNMAP_MEMORY`/
//! `IT_PROTECT_MEMORY`/`IT_UNMAP_PROCESS`, plus this crate's
//! `MapQueues`/`UnmapQueues` supplement).
//!
//! Grounded on spec.md §4.10 and `original_source/rpcsx-gpu2/Device.hpp`/
//! `Device.cpp`: `kMaxProcessCount` VM slots, `kGfxPipeCount` GFX pipes,
//! `kComputePipeCount` compute pipes, one resource cache per VM slot, and
//! "two main GFX rings" fed custom opcodes the device interprets directly
//! rather than handing to a pipe's register-bank dispatch table.
//! `IT_MAP_PROCESS` stays a direct host call (`map_process`, below) rather
//! than a ring opcode — see `pm4::DeviceOpcode`'s doc comment and
//! `process.rs`'s `ProcessTable::map_process`.
//!
//! Like `cache.rs`, resource construction here is generic over
//! `cache::Backend` rather than a live `gpu_hal::Device` — this crate's
//! tests never stand up a real Vulkan instance.

use gpu_types::{MemoryProtection, COMPUTE_PIPE_COUNT, GFX_PIPE_COUNT, MAX_PROCESS_COUNT};

use crate::cache::{Backend, Cache};
use crate::error::Fatal;
use crate::pipe::{ComputePipe, GraphicsPipe, Packet, Queue};
use crate::pm4::DeviceOpcode;
use crate::process::{BufferAttribute, GuestMemory, ProcessTable, ProcessTableError, VmMapping};

/// Number of device-owned main rings a guest submission stream can target,
/// matching spec.md §4.10's "two main GFX rings".
pub const MAIN_RING_COUNT: usize = 2;

/// A notable device-scoped side effect, recorded the same way
/// [`crate::pipe::PipeEvent`] records a GFX-pipe side effect — there is no
/// live swapchain/present surface in this crate's test environment, so a
/// `Flip` is observed here rather than by inspecting a presented image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceEvent {
    Flip { pid: u32, buffer_index: u8, arg: u64 },
    QueueMapped { compute_pipe: usize, queue_id: usize, ring: usize },
    QueueUnmapped { compute_pipe: usize, queue_id: usize, ring: usize },
}

/// Top-level orchestrator: `kMaxProcessCount` VM slots, `kGfxPipeCount` GFX
/// pipes, `kComputePipeCount` compute pipes, one cache per VM slot, and the
/// two device-scoped main rings.
pub struct Device<B: Backend> {
    processes: ProcessTable,
    gfx_pipes: Vec<GraphicsPipe>,
    compute_pipes: Vec<ComputePipe>,
    /// One cache per VM slot, matching `Device::caches[kMaxProcessCount]`.
    caches: Vec<Cache<B>>,
    main_rings: [Option<Queue>; MAIN_RING_COUNT],
    trace: Vec<DeviceEvent>,
}

impl<B: Backend> Device<B> {
    pub fn new(make_backend: impl Fn(u8) -> B) -> Self {
        Device {
            processes: ProcessTable::new(),
            gfx_pipes: (0..GFX_PIPE_COUNT).map(GraphicsPipe::new).collect(),
            compute_pipes: (0..COMPUTE_PIPE_COUNT).map(ComputePipe::new).collect(),
            caches: (0..MAX_PROCESS_COUNT as u8)
                .map(|vm_id| Cache::new(vm_id, make_backend(vm_id)))
                .collect(),
            main_rings: [None, None],
            trace: Vec::new(),
        }
    }

    pub fn gfx_pipe(&self, index: usize) -> &GraphicsPipe {
        &self.gfx_pipes[index]
    }

    pub fn gfx_pipe_mut(&mut self, index: usize) -> &mut GraphicsPipe {
        &mut self.gfx_pipes[index]
    }

    pub fn compute_pipe(&self, index: usize) -> &ComputePipe {
        &self.compute_pipes[index]
    }

    pub fn compute_pipe_mut(&mut self, index: usize) -> &mut ComputePipe {
        &mut self.compute_pipes[index]
    }

    pub fn cache(&self, vm_id: u8) -> &Cache<B> {
        &self.caches[vm_id as usize]
    }

    pub fn trace(&self) -> &[DeviceEvent] {
        &self.trace
    }

    /// Binds one of the two device-scoped main rings to `queue`, ahead of
    /// it carrying its first `pm4::DeviceOpcode` packet.
    pub fn set_main_ring(&mut self, index: usize, queue: Queue) {
        self.main_rings[index] = Some(queue);
    }

    /// `Device::mapProcess`: called directly by the host install/launch
    /// path, not decoded off a ring — see `pm4::DeviceOpcode`'s doc comment.
    pub fn map_process(&mut self, pid: u32, fd: i32) -> Result<u8, ProcessTableError> {
        self.processes.map_process(pid, fd)
    }

    /// Registers a presentable buffer slot's surface description, ahead of
    /// the first `IT_FLIP` that references it. Matches the
    /// `buffer-attributes[10]`/`buffers[10]` slot table spec.md §3 names.
    pub fn register_buffer(
        &mut self,
        pid: u32,
        index: usize,
        address: u64,
        attribute: BufferAttribute,
    ) -> Result<(), ProcessTableError> {
        let process = self
            .processes
            .by_pid_mut(pid)
            .ok_or(ProcessTableError::UnknownPid(pid))?;
        process.set_buffer(index, address, attribute);
        Ok(())
    }

    /// Drains one device-owned main ring once, dispatching every
    /// `pm4::DeviceOpcode` packet it yields. Returns whether it made
    /// progress, matching the per-ring draining contract `pipe::graphics`
    /// and `pipe::compute` already use.
    pub fn process_main_ring(&mut self, index: usize, mem: &dyn GuestMemory) -> Result<bool, Fatal> {
        let mut progressed = false;
        loop {
            let queue = match self.main_rings[index] {
                Some(q) => q,
                None => break,
            };
            let Some((packet, len)) = queue.peek(mem)? else {
                break;
            };
            match packet {
                Packet::Nop => {
                    self.main_rings[index].as_mut().unwrap().advance(len);
                }
                Packet::Command { opcode, body } => {
                    self.dispatch_device_opcode(opcode, &body, mem)?;
                    self.main_rings[index].as_mut().unwrap().advance(len);
                }
            }
            progressed = true;
        }
        Ok(progressed)
    }

    fn dispatch_device_opcode(&mut self, opcode: u8, body: &[u32], mem: &dyn GuestMemory) -> Result<(), Fatal> {
        let op = DeviceOpcode::from_u8(opcode).ok_or(Fatal::RingProtocolViolation {
            ring: "device-main",
            packet_offset: 0,
            reason: "unknown device opcode",
        })?;
        match op {
            // IT_FLIP: bufferIndex, dataLo, dataHi, pid.
            DeviceOpcode::Flip => {
                let buffer_index = body.first().copied().unwrap_or(0) as u8;
                let arg = address_from_pair(body, 1);
                let pid = body.get(3).copied().unwrap_or(0);
                self.trace.push(DeviceEvent::Flip { pid, buffer_index, arg });
                Ok(())
            }
            // IT_MAP_MEMORY: pid, addrLo, addrHi, sizeLo, sizeHi, memType,
            // dmemIndex, prot, offsetLo, offsetHi.
            DeviceOpcode::MapMemory => {
                let pid = body.first().copied().unwrap_or(0);
                let address = address_from_pair(body, 1);
                let size = address_from_pair(body, 3);
                let memory_type = body.get(5).copied().unwrap_or(0);
                let prot = MemoryProtection::from_bits_truncate(body.get(7).copied().unwrap_or(0));
                let offset = address_from_pair(body, 8);
                let mapping = VmMapping {
                    memory_type,
                    prot,
                    offset,
                    base_address: address,
                };
                self.processes
                    .map_memory(pid, address, size, mapping)
                    .map_err(process_table_error)
            }
            // IT_UNMAP_MEMORY: pid, addrLo, addrHi, sizeLo, sizeHi.
            DeviceOpcode::UnmapMemory => {
                let pid = body.first().copied().unwrap_or(0);
                let address = address_from_pair(body, 1);
                let size = address_from_pair(body, 3);
                let vm_id = self.processes.by_pid(pid).map(|p| p.vm_id);
                self.processes
                    .unmap_memory(pid, address, size)
                    .map_err(process_table_error)?;
                if let Some(vm_id) = vm_id {
                    self.caches[vm_id as usize].invalidate(address, size);
                }
                Ok(())
            }
            // IT_PROTECT_MEMORY: pid, addrLo, addrHi, sizeLo, sizeHi, prot.
            DeviceOpcode::ProtectMemory => {
                let pid = body.first().copied().unwrap_or(0);
                let address = address_from_pair(body, 1);
                let size = address_from_pair(body, 3);
                let prot = MemoryProtection::from_bits_truncate(body.get(5).copied().unwrap_or(0));
                self.processes
                    .protect_memory(pid, address, size, prot)
                    .map_err(process_table_error)
            }
            // IT_UNMAP_PROCESS: pid.
            DeviceOpcode::UnmapProcess => {
                let pid = body.first().copied().unwrap_or(0);
                self.unmap_process_vm(pid, mem)
            }
            // MapQueues (supplement): computePipe, queueId, ring, vmId,
            // baseLo, baseHi, sizeDwords.
            DeviceOpcode::MapQueues => {
                let compute_pipe = body.first().copied().unwrap_or(0) as usize;
                let queue_id = body.get(1).copied().unwrap_or(0) as usize;
                let ring = body.get(2).copied().unwrap_or(0) as usize;
                let vm_id = body.get(3).copied().unwrap_or(0) as u8;
                let base = address_from_pair(body, 4);
                let size_dwords = body.get(6).copied().unwrap_or(0);
                if let Some(pipe) = self.compute_pipes.get_mut(compute_pipe) {
                    pipe.map_queue(queue_id, ring, Queue::from_range(vm_id, base, size_dwords, ring as u8));
                    self.trace.push(DeviceEvent::QueueMapped { compute_pipe, queue_id, ring });
                }
                Ok(())
            }
            // UnmapQueues (supplement): computePipe, queueId, ring.
            DeviceOpcode::UnmapQueues => {
                let compute_pipe = body.first().copied().unwrap_or(0) as usize;
                let queue_id = body.get(1).copied().unwrap_or(0) as usize;
                let ring = body.get(2).copied().unwrap_or(0) as usize;
                if let Some(pipe) = self.compute_pipes.get_mut(compute_pipe) {
                    pipe.unmap_queue(queue_id, ring);
                    self.trace.push(DeviceEvent::QueueUnmapped { compute_pipe, queue_id, ring });
                }
                Ok(())
            }
        }
    }

    /// `IT_UNMAP_PROCESS`: drains every pipe referencing `pid`'s `vmId`
    /// before tearing its slot down, per spec.md §3's process lifecycle
    /// note ("drains all pipes referencing the vmId").
    fn unmap_process_vm(&mut self, pid: u32, mem: &dyn GuestMemory) -> Result<(), Fatal> {
        let vm_id = match self.processes.by_pid(pid) {
            Some(process) => process.vm_id,
            None => return Ok(()),
        };
        self.drain_pipes_for_vm(vm_id, mem)?;
        self.caches[vm_id as usize].invalidate_all();
        let _ = self.processes.unmap_process(pid);
        Ok(())
    }

    fn drain_pipes_for_vm(&mut self, vm_id: u8, mem: &dyn GuestMemory) -> Result<(), Fatal> {
        for pipe in &mut self.gfx_pipes {
            let references = pipe.de_queues.iter().flatten().any(|q| q.vm_id == vm_id)
                || pipe.ce_queue.is_some_and(|q| q.vm_id == vm_id);
            if references {
                while pipe.process_all_rings(mem)? {}
                pipe.scheduler.wait();
            }
        }
        for pipe in &mut self.compute_pipes {
            let references = pipe
                .queues
                .iter()
                .flatten()
                .flatten()
                .any(|q| q.vm_id == vm_id);
            if references {
                while pipe.process_all_rings(mem)? {}
                pipe.scheduler.wait();
            }
        }
        Ok(())
    }

    /// `Device::waitForIdle`: drains every main ring and every pipe's
    /// queued work, then blocks on each pipe's scheduler.
    pub fn wait_for_idle(&mut self, mem: &dyn GuestMemory) -> Result<(), Fatal> {
        for index in 0..MAIN_RING_COUNT {
            while self.process_main_ring(index, mem)? {}
        }
        for pipe in &mut self.gfx_pipes {
            while pipe.process_all_rings(mem)? {}
            pipe.scheduler.wait();
        }
        for pipe in &mut self.compute_pipes {
            while pipe.process_all_rings(mem)? {}
            pipe.scheduler.wait();
        }
        Ok(())
    }
}

fn address_from_pair(body: &[u32], index: usize) -> u64 {
    let lo = u64::from(body.get(index).copied().unwrap_or(0));
    let hi = u64::from(body.get(index + 1).copied().unwrap_or(0));
    (hi << 32) | lo
}

fn process_table_error(err: ProcessTableError) -> Fatal {
    Fatal::RingProtocolViolation {
        ring: "device-main",
        packet_offset: 0,
        reason: match err {
            ProcessTableError::SlotsExhausted => "process table exhausted",
            ProcessTableError::UnknownPid(_) => "unknown pid referenced by device opcode",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pm4;
    use crate::process::sim::SimGuestMemory;
    use gpu_types::DataFormat;

    #[derive(Clone)]
    struct UnitBackend;

    impl Backend for UnitBackend {
        type Buffer = ();
        type Image = ();
        type ImageView = ();
        type Sampler = ();

        fn create_buffer(&self, _size: u64) -> Self::Buffer {}
        fn create_image(&self, _key: &crate::cache::ImageKey) -> Self::Image {}
        fn create_image_view(&self, _image: &Self::Image, _key: &crate::cache::ImageViewKey) -> Self::ImageView {}
        fn create_sampler(&self, _key: &crate::cache::SamplerKey) -> Self::Sampler {}
    }

    fn seed_ring(mem: &SimGuestMemory, vm_id: u8, packets: &[(u8, &[u32])]) -> u32 {
        let mut words = Vec::new();
        for (opcode, body) in packets {
            pm4::encode_packet(*opcode, body, &mut words);
        }
        for (i, word) in words.iter().enumerate() {
            mem.seed(vm_id, i as u64 * 4, &word.to_le_bytes());
        }
        words.len() as u32
    }

    #[test]
    fn map_memory_then_unmap_memory_clears_the_vm_table() {
        let mem = SimGuestMemory::new();
        let mut device = Device::new(|_| UnitBackend);
        device.map_process(42, 3).unwrap();

        let size = seed_ring(&mem, 0, &[
            (DeviceOpcode::MapMemory as u8, &[42, 0x1000, 0, 0x1000, 0, 0, 0, MemoryProtection::READ.bits(), 0, 0]),
            (DeviceOpcode::UnmapMemory as u8, &[42, 0x1000, 0, 0x1000, 0]),
        ]);
        device.set_main_ring(0, Queue::from_range(0, 0, size, 0));
        device.process_main_ring(0, &mem).unwrap();

        let process = device.processes.by_pid(42).unwrap();
        assert!(process.vm_table.overlapping(0x1000, 0x2000).next().is_none());
    }

    #[test]
    fn protect_memory_updates_an_existing_mapping() {
        let mem = SimGuestMemory::new();
        let mut device = Device::new(|_| UnitBackend);
        device.map_process(1, 0).unwrap();

        let size = seed_ring(&mem, 0, &[
            (DeviceOpcode::MapMemory as u8, &[1, 0, 0, 0x1000, 0, 0, 0, MemoryProtection::READ.bits(), 0, 0]),
            (
                DeviceOpcode::ProtectMemory as u8,
                &[1, 0, 0, 0x1000, 0, (MemoryProtection::READ | MemoryProtection::WRITE).bits()],
            ),
        ]);
        device.set_main_ring(0, Queue::from_range(0, 0, size, 0));
        device.process_main_ring(0, &mem).unwrap();

        let process = device.processes.by_pid(1).unwrap();
        let (_, _, mapping) = process.vm_table.overlapping(0, 0x1000).next().unwrap();
        assert!(mapping.prot.contains(MemoryProtection::WRITE));
    }

    #[test]
    fn flip_is_recorded_in_the_trace() {
        let mem = SimGuestMemory::new();
        let mut device = Device::new(|_| UnitBackend);
        device.map_process(7, 0).unwrap();
        device
            .register_buffer(7, 2, 0x4000, BufferAttribute {
                width: 1920,
                height: 1080,
                format: DataFormat::R8G8B8A8,
                tile_mode: gpu_types::TileMode::linear(),
                pitch: 1920 * 4,
            })
            .unwrap();

        let size = seed_ring(&mem, 0, &[(DeviceOpcode::Flip as u8, &[2, 0xdead_beef, 0, 7])]);
        device.set_main_ring(0, Queue::from_range(0, 0, size, 0));
        device.process_main_ring(0, &mem).unwrap();

        assert_eq!(
            device.trace(),
            &[DeviceEvent::Flip { pid: 7, buffer_index: 2, arg: 0xdead_beef }]
        );
    }

    #[test]
    fn map_queues_binds_a_compute_pipe_ring() {
        let mem = SimGuestMemory::new();
        let mut device = Device::new(|_| UnitBackend);

        let size = seed_ring(&mem, 0, &[(DeviceOpcode::MapQueues as u8, &[3, 1, 0, 5, 0x8000, 0, 64])]);
        device.set_main_ring(0, Queue::from_range(0, 0, size, 0));
        device.process_main_ring(0, &mem).unwrap();

        let queue = device.compute_pipe(3).queues[1][0].unwrap();
        assert_eq!(queue.vm_id, 5);
        assert_eq!(queue.base, 0x8000);

        let size = seed_ring(&mem, 0, &[(DeviceOpcode::UnmapQueues as u8, &[3, 1, 0])]);
        device.set_main_ring(0, Queue::from_range(0, 0, size, 0));
        device.process_main_ring(0, &mem).unwrap();
        assert!(device.compute_pipe(3).queues[1][0].is_none());
    }

    #[test]
    fn unmap_process_drains_referencing_gfx_pipes_before_tearing_down() {
        let mem = SimGuestMemory::new();
        let mut device = Device::new(|_| UnitBackend);
        device.map_process(9, 0).unwrap();

        let mut nop_words = Vec::new();
        pm4::encode_packet(crate::pipe::Opcode::Nop as u8, &[0], &mut nop_words);
        for (i, word) in nop_words.iter().enumerate() {
            mem.seed(0, 0x9000 + i as u64 * 4, &word.to_le_bytes());
        }
        device
            .gfx_pipe_mut(0)
            .set_de_queue(Queue::from_range(0, 0x9000, nop_words.len() as u32, 0), 0);

        let size = seed_ring(&mem, 0, &[(DeviceOpcode::UnmapProcess as u8, &[9])]);
        device.set_main_ring(0, Queue::from_range(0, 0, size, 0));
        device.process_main_ring(0, &mem).unwrap();

        assert!(device.gfx_pipe(0).de_queues[0].unwrap().is_empty());
        assert!(device.processes.by_pid(9).is_none());
    }

    #[test]
    fn wait_for_idle_drains_every_ring_and_pipe() {
        let mem = SimGuestMemory::new();
        let mut device = Device::new(|_| UnitBackend);
        device.map_process(1, 0).unwrap();

        let size = seed_ring(&mem, 0, &[
            (DeviceOpcode::MapMemory as u8, &[1, 0, 0, 0x1000, 0, 0, 0, MemoryProtection::READ.bits(), 0, 0]),
        ]);
        device.set_main_ring(0, Queue::from_range(0, 0, size, 0));

        device.wait_for_idle(&mem).unwrap();
        assert_eq!(device.process_main_ring(0, &mem).unwrap(), false);
    }
}
