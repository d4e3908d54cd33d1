//! Internal PM4 ring-opcode byte assignment.
//!
//! Grounded on the handler names `GraphicsPipe`/`ComputePipe` register in
//! `original_source/rpcsx-gpu2/Pipe.cpp`'s constructors (the DE roster:
//! `setBase, clearState, indexBufferSize, dispatchDirect,
//! dispatchIndirect, setPredication, drawIndirect, drawIndexIndirect,
//! indexBase, drawIndex2, contextControl, indexType, drawIndexAuto,
//! numInstances, drawIndexMultiAuto, drawIndexOffset2, drawPreamble,
//! writeData, memSemaphore, waitRegMem, indirectBuffer, pfpSyncMe,
//! condWrite, eventWrite, eventWriteEop, eventWriteEos, releaseMem,
//! dmaData, acquireMem, setConfigReg, setContextReg, setShReg,
//! setUConfigReg, incrementDeCounter, waitOnCeCounter, setCeDeCounters`;
//! the CE roster: `waitOnDeCounterDiff, incrementCeCounter, loadConstRam,
//! writeConstRam, dumpConstRam`). The retrieved pack doesn't carry an
//! upstream `gnm`/PM4 opcode-value header to copy the real byte
//! assignment from (Open Question 3, `SPEC_FULL.md` §5), so the values
//! below are this crate's own assignment, reserved below
//! `pm4::DeviceOpcode`'s `0xF0` floor (see the `const _` assertion in
//! `pm4.rs`).

macro_rules! opcodes {
    ($($name:ident = $value:expr),+ $(,)?) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $value),+
        }

        impl Opcode {
            pub fn from_u8(raw: u8) -> Option<Self> {
                match raw {
                    $($value => Some(Opcode::$name),)+
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Nop = 0x00,
    SetBase = 0x01,
    ClearState = 0x02,
    IndexBufferSize = 0x03,
    DispatchDirect = 0x04,
    DispatchIndirect = 0x05,
    SetPredication = 0x06,
    DrawIndirect = 0x07,
    DrawIndexIndirect = 0x08,
    IndexBase = 0x09,
    DrawIndex2 = 0x0a,
    ContextControl = 0x0b,
    IndexType = 0x0c,
    DrawIndexAuto = 0x0d,
    NumInstances = 0x0e,
    DrawIndexMultiAuto = 0x0f,
    DrawIndexOffset2 = 0x10,
    DrawPreamble = 0x11,
    WriteData = 0x12,
    MemSemaphore = 0x13,
    WaitRegMem = 0x14,
    IndirectBuffer = 0x15,
    PfpSyncMe = 0x16,
    CondWrite = 0x17,
    EventWrite = 0x18,
    EventWriteEop = 0x19,
    EventWriteEos = 0x1a,
    ReleaseMem = 0x1b,
    DmaData = 0x1c,
    AcquireMem = 0x1d,
    SetConfigReg = 0x1e,
    SetContextReg = 0x1f,
    SetShReg = 0x20,
    SetUconfigReg = 0x21,
    IncrementDeCounter = 0x22,
    WaitOnCeCounter = 0x23,
    SetCeDeCounters = 0x24,
    WaitOnDeCounterDiff = 0x25,
    IncrementCeCounter = 0x26,
    LoadConstRam = 0x27,
    WriteConstRam = 0x28,
    DumpConstRam = 0x29,
}

const _: () = assert!((Opcode::DumpConstRam as u8) < 0xf0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_opcode_round_trips_through_from_u8() {
        let all = [
            Opcode::Nop,
            Opcode::SetBase,
            Opcode::ClearState,
            Opcode::IndexBufferSize,
            Opcode::DispatchDirect,
            Opcode::DispatchIndirect,
            Opcode::SetPredication,
            Opcode::DrawIndirect,
            Opcode::DrawIndexIndirect,
            Opcode::IndexBase,
            Opcode::DrawIndex2,
            Opcode::ContextControl,
            Opcode::IndexType,
            Opcode::DrawIndexAuto,
            Opcode::NumInstances,
            Opcode::DrawIndexMultiAuto,
            Opcode::DrawIndexOffset2,
            Opcode::DrawPreamble,
            Opcode::WriteData,
            Opcode::MemSemaphore,
            Opcode::WaitRegMem,
            Opcode::IndirectBuffer,
            Opcode::PfpSyncMe,
            Opcode::CondWrite,
            Opcode::EventWrite,
            Opcode::EventWriteEop,
            Opcode::EventWriteEos,
            Opcode::ReleaseMem,
            Opcode::DmaData,
            Opcode::AcquireMem,
            Opcode::SetConfigReg,
            Opcode::SetContextReg,
            Opcode::SetShReg,
            Opcode::SetUconfigReg,
            Opcode::IncrementDeCounter,
            Opcode::WaitOnCeCounter,
            Opcode::SetCeDeCounters,
            Opcode::WaitOnDeCounterDiff,
            Opcode::IncrementCeCounter,
            Opcode::LoadConstRam,
            Opcode::WriteConstRam,
            Opcode::DumpConstRam,
        ];
        for op in all {
            assert_eq!(Opcode::from_u8(op as u8), Some(op));
        }
    }

    #[test]
    fn unassigned_byte_is_none() {
        assert_eq!(Opcode::from_u8(0x2a), None);
        assert_eq!(Opcode::from_u8(0xf0), None);
    }
}
