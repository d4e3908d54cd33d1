use bitflags::bitflags;

/// Intended access direction for a cache lookup (`Cache::getBuffer`,
/// `getImage`, etc.). Determines whether the cache must track a
/// last-writer tag for the requested range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
    ReadWrite,
}

impl Access {
    pub fn is_read(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    pub fn is_write(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

bitflags! {
    /// Guest memory protection bits, as tracked per-VM by the device's
    /// `protectMemory`/`unmapMemory` calls. Deliberately coarse: full
    /// guest memory protection semantics (e.g. per-page fault routing)
    /// are out of scope.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryProtection: u32 {
        const READ = 0b001;
        const WRITE = 0b010;
        const EXECUTE = 0b100;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_is_both() {
        assert!(Access::ReadWrite.is_read());
        assert!(Access::ReadWrite.is_write());
        assert!(!Access::Read.is_write());
    }

    #[test]
    fn protection_bits_combine() {
        let rw = MemoryProtection::READ | MemoryProtection::WRITE;
        assert!(rw.contains(MemoryProtection::READ));
        assert!(!rw.contains(MemoryProtection::EXECUTE));
    }
}
