//! Per-page permission flags. Grounded on `NoAxiom/kernel/src/mm/permission.rs`.

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PagePermission: u8 {
        /// page has been mapped and zero-filled / loaded
        const INIT     = 1 << 0;
        const READ     = 1 << 1;
        const WRITE    = 1 << 2;
        const EXEC     = 1 << 3;
        /// set on the first write to the page (spec.md §3)
        const MODIFIED = 1 << 4;
    }
}

impl PagePermission {
    pub fn readable(self) -> bool {
        self.contains(Self::READ)
    }
    pub fn writable(self) -> bool {
        self.contains(Self::WRITE)
    }
    pub fn executable(self) -> bool {
        self.contains(Self::EXEC)
    }
    pub fn initialized(self) -> bool {
        self.contains(Self::INIT)
    }
}
