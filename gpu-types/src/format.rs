//! Surface and index formats shared between the tiler, the resource cache,
//! and the shader translator's image/buffer descriptor types.
//!
//! Field shapes are grounded on `Cache.hpp`'s `ImageKey`/`SamplerKey`
//! (`dfmt`, `nfmt`, `tileMode`) and on the tiler's `SurfaceInfo` tile-mode
//! classification.

/// Micro tile mode: how a single tile's texels are swizzled internally.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MicroTileMode {
    Display,
    Thin,
    Depth,
    Rotated,
    Thick,
}

/// Macro tile mode: how tiles are grouped across banks/pipes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MacroTileMode {
    TileMode0,
    TileMode1,
    TileMode2,
    TileMode3,
    TileMode4,
    TileMode5,
    TileMode6,
    TileMode7,
}

/// Whether a surface is laid out linearly or tiled, and if tiled, in which
/// dimensionality the tiler's compute shaders must walk it.
///
/// The variant a `TileMode` resolves to is what selects among the tiler's
/// six compute shaders (linear/1D/2D x tile/detile).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArrayMode {
    Linear,
    Tiled1D,
    Tiled2D,
}

/// Surface tiling mode, as stored in a PM4 `TILE_MODE` field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileMode {
    pub array_mode: ArrayMode,
    pub micro_tile_mode: MicroTileMode,
    pub macro_tile_mode: MacroTileMode,
}

impl TileMode {
    pub const fn linear() -> Self {
        Self {
            array_mode: ArrayMode::Linear,
            micro_tile_mode: MicroTileMode::Display,
            macro_tile_mode: MacroTileMode::TileMode0,
        }
    }

    /// The dimensionality the tiler must use to walk this surface.
    pub fn array_mode(&self) -> ArrayMode {
        self.array_mode
    }
}

/// Per-channel data format (bit layout), independent of the numeric
/// interpretation applied by `NumericFormat`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum DataFormat {
    Invalid,
    R8,
    R8G8,
    R8G8B8A8,
    R16,
    R16G16,
    R16G16B16A16,
    R32,
    R32G32,
    R32G32B32,
    R32G32B32A32,
    Bc1,
    Bc2,
    Bc3,
    Bc4,
    Bc5,
    Bc7,
}

impl DataFormat {
    /// Size in bytes of one texel, or `None` for block-compressed formats
    /// where the tiler must reason in blocks rather than texels.
    pub fn texel_size(&self) -> Option<u32> {
        match self {
            DataFormat::Invalid => None,
            DataFormat::R8 => Some(1),
            DataFormat::R8G8 => Some(2),
            DataFormat::R8G8B8A8 => Some(4),
            DataFormat::R16 => Some(2),
            DataFormat::R16G16 => Some(4),
            DataFormat::R16G16B16A16 => Some(8),
            DataFormat::R32 => Some(4),
            DataFormat::R32G32 => Some(8),
            DataFormat::R32G32B32 => Some(12),
            DataFormat::R32G32B32A32 => Some(16),
            DataFormat::Bc1 | DataFormat::Bc2 | DataFormat::Bc3 | DataFormat::Bc4
            | DataFormat::Bc5 | DataFormat::Bc7 => None,
        }
    }
}

/// Numeric interpretation applied on top of a `DataFormat`'s bit layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumericFormat {
    Unorm,
    Snorm,
    Uint,
    Sint,
    Float,
    Srgb,
}

/// GCN primitive topology, as read from `VGT_PRIMITIVE_TYPE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
    TriangleFan,
    Patch,
}

/// Index buffer element width, as read from `VGT_DMA_INDEX_TYPE`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    U32,
}

impl IndexType {
    pub fn size(self) -> u32 {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }
}
