//! Guest-side flag bit values, and guest<->host translation.
//!
//! spec.md §6: "host↔guest translation must use these [exact bit
//! values], never host header constants." Grounded on the teacher's
//! `mm::permission::MapPermission` bitflags style.

use bitflags::bitflags;

bitflags! {
    /// CLONE_* flags, Linux i386 ABI bit values
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CloneFlags: u32 {
        const CLONE_VM             = 0x0000_0100;
        const CLONE_FS             = 0x0000_0200;
        const CLONE_FILES          = 0x0000_0400;
        const CLONE_SIGHAND        = 0x0000_0800;
        const CLONE_PTRACE         = 0x0000_2000;
        const CLONE_VFORK          = 0x0000_4000;
        const CLONE_PARENT         = 0x0000_8000;
        const CLONE_THREAD         = 0x0001_0000;
        const CLONE_NEWNS          = 0x0002_0000;
        const CLONE_SYSVSEM        = 0x0004_0000;
        const CLONE_SETTLS         = 0x0008_0000;
        const CLONE_PARENT_SETTID  = 0x0010_0000;
        const CLONE_CHILD_CLEARTID = 0x0020_0000;
        const CLONE_DETACHED       = 0x0040_0000;
        const CLONE_UNTRACED       = 0x0080_0000;
        const CLONE_CHILD_SETTID   = 0x0100_0000;
    }
}

bitflags! {
    /// mmap PROT_* flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MmapProt: u32 {
        const PROT_READ  = 0x1;
        const PROT_WRITE = 0x2;
        const PROT_EXEC  = 0x4;
    }
}

bitflags! {
    /// mmap MAP_* flags
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MmapFlags: u32 {
        const MAP_SHARED    = 0x01;
        const MAP_PRIVATE   = 0x02;
        const MAP_FIXED     = 0x10;
        const MAP_ANONYMOUS = 0x20;
    }
}

bitflags! {
    /// open(2) O_* flags, Linux i386 ABI bit values
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const O_RDONLY    = 0x0000;
        const O_WRONLY    = 0x0001;
        const O_RDWR      = 0x0002;
        const O_CREAT     = 0x0040;
        const O_EXCL      = 0x0080;
        const O_TRUNC     = 0x0200;
        const O_APPEND    = 0x0400;
        const O_NONBLOCK  = 0x0800;
        const O_DIRECTORY = 0x1_0000;
        const O_CLOEXEC   = 0x8_0000;
    }
}

impl OpenFlags {
    pub fn access_mode(self) -> u32 {
        self.bits() & 0x3
    }
}

/// RLIMIT_* resource indices, Linux ABI values
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum RlimitResource {
    Cpu = 0,
    Fsize = 1,
    Data = 2,
    Stack = 3,
    Core = 4,
    Rss = 5,
    Nproc = 6,
    Nofile = 7,
    Memlock = 8,
    As = 9,
}

impl TryFrom<u32> for RlimitResource {
    type Error = crate::errno::Errno;
    fn try_from(v: u32) -> Result<Self, Self::Error> {
        use RlimitResource::*;
        Ok(match v {
            0 => Cpu,
            1 => Fsize,
            2 => Data,
            3 => Stack,
            4 => Core,
            5 => Rss,
            6 => Nproc,
            7 => Nofile,
            8 => Memlock,
            9 => As,
            _ => return Err(crate::errno::Errno::EINVAL),
        })
    }
}

impl From<MmapProt> for crate::mm::perm::PagePermission {
    /// `r`/`w`/`x` -> init|read, init|write, init|exec (spec.md §4.4)
    fn from(prot: MmapProt) -> Self {
        let mut perm = crate::mm::perm::PagePermission::INIT;
        if prot.contains(MmapProt::PROT_READ) {
            perm |= crate::mm::perm::PagePermission::READ;
        }
        if prot.contains(MmapProt::PROT_WRITE) {
            perm |= crate::mm::perm::PagePermission::WRITE;
        }
        if prot.contains(MmapProt::PROT_EXEC) {
            perm |= crate::mm::perm::PagePermission::EXEC;
        }
        perm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_vm_requires_fs_files_sighand() {
        let f = CloneFlags::CLONE_VM | CloneFlags::CLONE_FS | CloneFlags::CLONE_FILES | CloneFlags::CLONE_SIGHAND;
        assert!(f.contains(CloneFlags::CLONE_VM));
    }

    #[test]
    fn prot_to_permission() {
        let perm: crate::mm::perm::PagePermission = (MmapProt::PROT_READ | MmapProt::PROT_WRITE).into();
        assert!(perm.readable());
        assert!(perm.writable());
        assert!(!perm.executable());
    }

    #[test]
    fn open_flags_access_mode() {
        assert_eq!((OpenFlags::O_WRONLY | OpenFlags::O_CREAT).access_mode(), 1);
    }
}
