//! Structured register banks for a GFX/compute pipe.
//!
//! Grounded on `original_source/rpcsx/gpu/Registers.hpp`'s `Registers`
//! struct: five dword-addressed banks (`Config`, `ShaderConfig`,
//! `Context`, `UConfig`, `Counters`), each starting at the dword offset
//! `gpu_types::register_offsets` already records. The original expresses
//! every individual field as a bitfield `Register<Offset, T>` over a
//! shared 0xf000-dword array; this crate keeps the bank boundaries and
//! offsets faithfully but represents each bank as a plain dword array
//! with typed accessors only for the fields the implemented opcodes
//! (`pipe.rs`) actually read — `SET_*_REG` bank writes are otherwise
//! opaque dword pokes, matching spec.md §3's "Register file" data
//! model ("a flat array of dwords partitioned into named banks").

use gpu_types::register_offsets;

/// One failure mode for a register write: the target dword index falls
/// outside every known bank's extent. Per spec.md §3/§6 this is a
/// ring-protocol violation (fatal), since a well-formed guest program
/// never addresses outside the banks the original hardware defines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("register offset {0:#x} is outside every known bank")]
pub struct OutOfBank(pub u32);

const CONFIG_LEN: usize = 0x700;
const SHADER_CONFIG_LEN: usize = 0x200;
const CONTEXT_LEN: usize = 0x400;
const UCONFIG_LEN: usize = 0x500;
const COUNTERS_LEN: usize = 0x1000;

/// A single bank's storage: a dword array addressed relative to the
/// bank's base offset, with bounds-checked read/write.
#[derive(Clone)]
pub struct Bank<const LEN: usize> {
    base: u32,
    words: Box<[u32; LEN]>,
}

impl<const LEN: usize> Bank<LEN> {
    fn new(base: u32) -> Self {
        Bank {
            base,
            words: Box::new([0; LEN]),
        }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn read(&self, absolute_offset: u32) -> Result<u32, OutOfBank> {
        let index = self.index(absolute_offset)?;
        Ok(self.words[index])
    }

    pub fn write(&mut self, absolute_offset: u32, value: u32) -> Result<(), OutOfBank> {
        let index = self.index(absolute_offset)?;
        self.words[index] = value;
        Ok(())
    }

    fn index(&self, absolute_offset: u32) -> Result<usize, OutOfBank> {
        absolute_offset
            .checked_sub(self.base)
            .filter(|&relative| (relative as usize) < LEN)
            .map(|relative| relative as usize)
            .ok_or(OutOfBank(absolute_offset))
    }
}

/// `Registers::Config` — `CP`/`VGT` ring-pointer and resource-descriptor
/// scratch fields, at `register_offsets::CONFIG`.
pub struct Config {
    pub bank: Bank<CONFIG_LEN>,
}

impl Config {
    fn new() -> Self {
        Config {
            bank: Bank::new(register_offsets::CONFIG),
        }
    }

    /// `sqBufRsrcWords` at relative dword `0x3c0`, a 4-dword V# buffer
    /// resource descriptor.
    pub fn buffer_resource_words(&self) -> Result<[u32; 4], OutOfBank> {
        let base = self.bank.base() + 0x3c0;
        let mut words = [0u32; 4];
        for (i, word) in words.iter_mut().enumerate() {
            *word = self.bank.read(base + i as u32)?;
        }
        Ok(words)
    }
}

/// `Registers::ShaderConfig` — per-stage `SPI_SHADER_PGM_*` program
/// base/resource words, at `register_offsets::SHADER_CONFIG`. The
/// original overlays all five graphics stages plus `ComputeConfig` on
/// the same dword range via a `union`; this type exposes the compute
/// sub-bank directly since `ComputePipe`'s `SET_SH_REG` handler only
/// ever targets it.
pub struct ShaderConfig {
    pub bank: Bank<SHADER_CONFIG_LEN>,
}

/// Relative dword offsets within `ShaderConfig` matching
/// `Registers::ComputeConfig`'s layout (base `0x200` within the shared
/// `ShaderConfig` union, per `Registers.hpp`).
mod compute_config_offset {
    pub const DISPATCH_INITIATOR: u32 = 0x200;
    pub const NUM_THREAD_X: u32 = 0x207;
    pub const NUM_THREAD_Y: u32 = 0x208;
    pub const NUM_THREAD_Z: u32 = 0x209;
    pub const ADDRESS_LO: u32 = 0x20c;
    pub const ADDRESS_HI: u32 = 0x20d;
    pub const USER_DATA: u32 = 0x239;
    pub const USER_DATA_COUNT: u32 = 16;
}

impl ShaderConfig {
    pub fn new() -> Self {
        ShaderConfig {
            bank: Bank::new(register_offsets::SHADER_CONFIG),
        }
    }

    pub fn dispatch_initiator(&self) -> Result<u32, OutOfBank> {
        self.bank
            .read(self.bank.base() + compute_config_offset::DISPATCH_INITIATOR)
    }

    pub fn num_threads(&self) -> Result<(u32, u32, u32), OutOfBank> {
        let base = self.bank.base();
        Ok((
            self.bank.read(base + compute_config_offset::NUM_THREAD_X)?,
            self.bank.read(base + compute_config_offset::NUM_THREAD_Y)?,
            self.bank.read(base + compute_config_offset::NUM_THREAD_Z)?,
        ))
    }

    /// Shader program address, combining the low/high dword pair the
    /// original stores as a single `std::uint64_t address` field.
    pub fn shader_address(&self) -> Result<u64, OutOfBank> {
        let base = self.bank.base();
        let lo = self.bank.read(base + compute_config_offset::ADDRESS_LO)? as u64;
        let hi = self.bank.read(base + compute_config_offset::ADDRESS_HI)? as u64;
        Ok((hi << 32) | lo)
    }

    pub fn user_data(&self) -> Result<[u32; compute_config_offset::USER_DATA_COUNT as usize], OutOfBank> {
        let base = self.bank.base() + compute_config_offset::USER_DATA;
        let mut out = [0u32; compute_config_offset::USER_DATA_COUNT as usize];
        for (i, word) in out.iter_mut().enumerate() {
            *word = self.bank.read(base + i as u32)?;
        }
        Ok(out)
    }
}

/// `Registers::Context` — per-draw pipeline state (`CB_*`, `DB_*`,
/// `PA_*`, `VGT_*`), at `register_offsets::CONTEXT`.
pub struct Context {
    pub bank: Bank<CONTEXT_LEN>,
}

mod context_offset {
    pub const VGT_DRAW_INITIATOR: u32 = 0x1fc;
    pub const VGT_NUM_INDICES_ALIAS: u32 = 0x24c;
}

impl Context {
    fn new() -> Self {
        Context {
            bank: Bank::new(register_offsets::CONTEXT),
        }
    }

    pub fn draw_initiator(&self) -> Result<u32, OutOfBank> {
        self.bank
            .read(self.bank.base() + context_offset::VGT_DRAW_INITIATOR)
    }

    /// Present for parity with `UConfig::vgtNumIndices` — the original
    /// stores the index count in `UConfig`, not `Context`; kept here only
    /// as a documented non-alias to avoid a future reader assuming this
    /// bank mirrors it. Deliberately unused; see `UConfig::num_indices`.
    #[allow(dead_code)]
    const _VGT_NUM_INDICES_IS_IN_UCONFIG: u32 = context_offset::VGT_NUM_INDICES_ALIAS;
}

/// `Registers::UConfig` — draw-call parameters that live outside a
/// context roll (`VGT_PRIMITIVE_TYPE`, `VGT_INDEX_TYPE`,
/// `VGT_NUM_INDICES`, `VGT_NUM_INSTANCES`), at `register_offsets::UCONFIG`.
pub struct UConfig {
    pub bank: Bank<UCONFIG_LEN>,
}

mod uconfig_offset {
    pub const PRIMITIVE_TYPE: u32 = 0x242;
    pub const INDEX_TYPE: u32 = 0x243;
    pub const NUM_INDICES: u32 = 0x24c;
    pub const NUM_INSTANCES: u32 = 0x24d;
}

impl UConfig {
    fn new() -> Self {
        UConfig {
            bank: Bank::new(register_offsets::UCONFIG),
        }
    }

    pub fn primitive_type_raw(&self) -> Result<u32, OutOfBank> {
        self.bank
            .read(self.bank.base() + uconfig_offset::PRIMITIVE_TYPE)
    }

    pub fn index_type_raw(&self) -> Result<u32, OutOfBank> {
        self.bank.read(self.bank.base() + uconfig_offset::INDEX_TYPE)
    }

    pub fn num_indices(&self) -> Result<u32, OutOfBank> {
        self.bank
            .read(self.bank.base() + uconfig_offset::NUM_INDICES)
    }

    pub fn num_instances(&self) -> Result<u32, OutOfBank> {
        self.bank
            .read(self.bank.base() + uconfig_offset::NUM_INSTANCES)
    }
}

/// `Registers::Counters` — performance-counter scratch, at
/// `register_offsets::COUNTERS`. No field is read by any implemented
/// opcode; kept as an opaque bank so `SET_*_REG` writes targeting it
/// round-trip rather than being rejected as out-of-bank.
pub struct Counters {
    pub bank: Bank<COUNTERS_LEN>,
}

impl Counters {
    fn new() -> Self {
        Counters {
            bank: Bank::new(register_offsets::COUNTERS),
        }
    }
}

/// A pipe's full register file: the five banks a `SET_CONFIG_REG`/
/// `SET_SH_REG`/`SET_CONTEXT_REG`/`SET_UCONFIG_REG` opcode selects among
/// by comparing the target dword offset against each bank's base.
pub struct RegisterFile {
    pub config: Config,
    pub shader_config: ShaderConfig,
    pub context: Context,
    pub uconfig: UConfig,
    pub counters: Counters,
}

impl RegisterFile {
    pub fn new() -> Self {
        RegisterFile {
            config: Config::new(),
            shader_config: ShaderConfig::new(),
            context: Context::new(),
            uconfig: UConfig::new(),
            counters: Counters::new(),
        }
    }

    /// Writes `value` at absolute dword `offset`, dispatching to
    /// whichever bank's extent contains it. Matches the original's
    /// `SET_*_REG` handlers, which differ from each other only in which
    /// bank's base they add the packet's relative offset to before
    /// writing — collapsed here into one dispatch since the bank
    /// boundaries never overlap.
    pub fn write(&mut self, offset: u32, value: u32) -> Result<(), OutOfBank> {
        if self.config.bank.write(offset, value).is_ok() {
            return Ok(());
        }
        if self.shader_config.bank.write(offset, value).is_ok() {
            return Ok(());
        }
        if self.context.bank.write(offset, value).is_ok() {
            return Ok(());
        }
        if self.uconfig.bank.write(offset, value).is_ok() {
            return Ok(());
        }
        if self.counters.bank.write(offset, value).is_ok() {
            return Ok(());
        }
        Err(OutOfBank(offset))
    }

    pub fn read(&self, offset: u32) -> Result<u32, OutOfBank> {
        for bank in [
            self.config.bank.read(offset),
            self.shader_config.bank.read(offset),
            self.context.bank.read(offset),
            self.uconfig.bank.read(offset),
            self.counters.bank.read(offset),
        ] {
            if let Ok(value) = bank {
                return Ok(value);
            }
        }
        Err(OutOfBank(offset))
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}
