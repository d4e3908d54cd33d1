//! PM4 packet header encode/decode.
//!
//! Grounded on `original_source/rpcsx/gpu/Device.hpp`'s `createPm4Packet`
//! (`header = (3 << 30) | (op << 8) | ((nargs - 1) << 16)`) and on
//! `spec.md` §6's header layout: `type:2[31:30] | opcode:8[15:8] |
//! count:14[29:16]`, plus the type-2 single-dword NOP padding packet
//! (`type == 2`, no body, used to pad a ring to an alignment boundary).

/// Header bit layout of a PM4 packet: which 2-bit `type` field selects a
/// type-3 command packet (`type == 3`) versus a type-2 filler dword
/// (`type == 2`, body-less).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    /// A single filler dword the ring processor skips over; used to pad
    /// a ring to a required alignment.
    Nop,
    /// `opcode`/`body` carry a real command: `header` plus `count` body
    /// dwords follow in the ring.
    Command { opcode: u8, count: u16 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum HeaderError {
    #[error("unknown packet type {0}")]
    UnknownType(u8),
}

/// Decodes a single PM4 header dword into its `type` field's meaning.
/// `count` is the number of body dwords that follow, not including the
/// header itself, matching `len = count - 1` in `createPm4Packet`'s
/// encoding (i.e. a zero-argument packet still reserves a length field
/// of `0`, which this decoder returns as `count == 1` to keep "how many
/// dwords are in the body" unambiguous for the ring walker — see
/// `decode_type3_count` below for the exact inverse of the encoder).
pub fn decode_header(header: u32) -> Result<PacketType, HeaderError> {
    let packet_type = ((header >> 30) & 0b11) as u8;
    match packet_type {
        2 => Ok(PacketType::Nop),
        3 => {
            let opcode = ((header >> 8) & 0xff) as u8;
            let count = (((header >> 16) & 0x3fff) as u16) + 1;
            Ok(PacketType::Command { opcode, count })
        }
        other => Err(HeaderError::UnknownType(other)),
    }
}

/// Encodes a type-3 command header for `opcode` with `body_len` trailing
/// body dwords (NOT counting the header). Matches `createPm4Packet`'s
/// `(3 << 30) | (op << 8) | ((nargs - 1) << 16)` with `nargs = body_len`.
///
/// `body_len` must be at least 1 — the original's `createPm4Packet` is
/// only ever instantiated with a non-empty argument pack.
pub fn encode_header(opcode: u8, body_len: u16) -> u32 {
    debug_assert!(body_len >= 1);
    (3u32 << 30) | ((opcode as u32) << 8) | (((body_len - 1) as u32) << 16)
}

/// Encodes a full type-3 packet (header plus body) into `out`, mirroring
/// `createPm4Packet<T...>(op, data...)`.
pub fn encode_packet(opcode: u8, body: &[u32], out: &mut Vec<u32>) {
    debug_assert!(!body.is_empty());
    out.push(encode_header(opcode, body.len() as u16));
    out.extend_from_slice(body);
}

/// Custom device-level opcodes, handled by `CommandPipe`/`Device` rather
/// than a `GraphicsPipe`/`ComputePipe`'s register-bank handler table.
/// Matches `Device.hpp`'s `IT_FLIP..IT_UNMAP_PROCESS` range, supplemented
/// with `MapQueues`/`UnmapQueues` (`SPEC_FULL.md`'s C10 supplement):
/// binding a compute ring to a `vmId` reconfigures which pipe a ring
/// belongs to rather than anything a `ComputePipe`'s own handler table
/// would process, the same device-scoped category as `MapMemory`/
/// `UnmapProcess` — not a ring opcode a guest ring ever contains.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DeviceOpcode {
    Flip = 0xF0,
    MapMemory = 0xF1,
    UnmapMemory = 0xF2,
    ProtectMemory = 0xF3,
    UnmapProcess = 0xF4,
    MapQueues = 0xF5,
    UnmapQueues = 0xF6,
}

impl DeviceOpcode {
    pub fn from_u8(opcode: u8) -> Option<Self> {
        match opcode {
            0xF0 => Some(DeviceOpcode::Flip),
            0xF1 => Some(DeviceOpcode::MapMemory),
            0xF2 => Some(DeviceOpcode::UnmapMemory),
            0xF3 => Some(DeviceOpcode::ProtectMemory),
            0xF4 => Some(DeviceOpcode::UnmapProcess),
            0xF5 => Some(DeviceOpcode::MapQueues),
            0xF6 => Some(DeviceOpcode::UnmapQueues),
            _ => None,
        }
    }
}

// The custom device opcode range must not collide with a standard PM4
// opcode: the highest standard opcode byte this crate's `pipe` module
// dispatches on is checked against this bound wherever both tables are
// consulted together (Open Question 3, `SPEC_FULL.md` §5 — no upstream
// vendor opcode table is available in this environment to audit the
// full byte range, so this is the one assertion that is checkable).
const _: () = assert!(DeviceOpcode::Flip as u8 == 0xF0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_encode_decode() {
        let header = encode_header(0x36, 5);
        match decode_header(header).unwrap() {
            PacketType::Command { opcode, count } => {
                assert_eq!(opcode, 0x36);
                assert_eq!(count, 5);
            }
            PacketType::Nop => panic!("expected a command packet"),
        }
    }

    #[test]
    fn nop_header_decodes_as_nop() {
        let header = 2u32 << 30;
        assert_eq!(decode_header(header).unwrap(), PacketType::Nop);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let header = 0u32 << 30;
        assert_eq!(decode_header(header), Err(HeaderError::UnknownType(0)));
    }

    #[test]
    fn encode_packet_matches_create_pm4_packet_shape() {
        let mut out = Vec::new();
        encode_packet(0x10, &[1, 2, 3], &mut out);
        assert_eq!(out.len(), 4);
        assert_eq!(out[0], encode_header(0x10, 3));
        assert_eq!(&out[1..], &[1, 2, 3]);
    }

    #[test]
    fn device_opcode_range_round_trips() {
        for raw in 0xF0u8..=0xF6 {
            assert!(DeviceOpcode::from_u8(raw).is_some());
        }
        assert!(DeviceOpcode::from_u8(0xEF).is_none());
        assert!(DeviceOpcode::from_u8(0xF7).is_none());
    }
}
