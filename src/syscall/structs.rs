//! Guest<->host struct translation for the handlers that carry packed
//! ABI structures (spec.md §4.4: "translates pointers and structures
//! from guest to host representation (paying attention to endian/
//! packing of guest `struct stat64`, `rlimit`, `utsname`, user-desc for
//! TLS, timespec)"). Every layout below is the Linux i386 ABI layout,
//! written by hand field-by-field rather than derived, since the host
//! may be running on a different architecture with a different
//! `libc::stat`/`rlimit` layout -- spec.md §6 "host<->guest translation
//! must use these [exact bit values], never host header constants".

use crate::errno::Errno;
use crate::mm::address::VirtAddr;
use crate::mm::memory_set::{MemorySet, SysResultUnit};
use crate::signal::sig_action::SigAction;
use crate::signal::sig_set::SigSet;

/// Linux i386 `struct stat64` (96 bytes), serialized field-by-field
/// from a host `nix::sys::stat::FileStat`.
pub fn write_stat64(mem: &mut MemorySet, addr: VirtAddr, st: &nix::sys::stat::FileStat) -> SysResultUnit {
    let mut buf = [0u8; 96];
    let put64 = |buf: &mut [u8; 96], off: usize, v: u64| buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
    let put32 = |buf: &mut [u8; 96], off: usize, v: u32| buf[off..off + 4].copy_from_slice(&v.to_le_bytes());

    put64(&mut buf, 0, st.st_dev as u64);
    put32(&mut buf, 12, st.st_ino as u32); // __st_ino (32-bit truncated inode)
    put32(&mut buf, 16, st.st_mode as u32);
    put32(&mut buf, 20, st.st_nlink as u32);
    put32(&mut buf, 24, st.st_uid as u32);
    put32(&mut buf, 28, st.st_gid as u32);
    put64(&mut buf, 32, st.st_rdev as u64);
    put64(&mut buf, 44, st.st_size as u64);
    put32(&mut buf, 52, st.st_blksize as u32);
    put64(&mut buf, 56, st.st_blocks as u64);
    put32(&mut buf, 64, st.st_atime as u32);
    put32(&mut buf, 68, st.st_atime_nsec as u32);
    put32(&mut buf, 72, st.st_mtime as u32);
    put32(&mut buf, 76, st.st_mtime_nsec as u32);
    put32(&mut buf, 80, st.st_ctime as u32);
    put32(&mut buf, 84, st.st_ctime_nsec as u32);
    put64(&mut buf, 88, st.st_ino as u64); // full 64-bit st_ino at the tail

    mem.write(addr, &buf)
}

/// Linux i386 `struct rlimit` (two 32-bit longs); `RLIM_INFINITY` is
/// `u32::MAX` on this ABI.
pub fn write_rlimit(mem: &mut MemorySet, addr: VirtAddr, cur: u32, max: u32) -> SysResultUnit {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&cur.to_le_bytes());
    buf[4..8].copy_from_slice(&max.to_le_bytes());
    mem.write(addr, &buf)
}

/// Linux `struct new_utsname`: six 65-byte NUL-padded fields.
pub fn write_utsname(mem: &mut MemorySet, addr: VirtAddr, machine: &str) -> SysResultUnit {
    let fields: [&str; 6] = ["Linux", "emusim-guest", "5.15.0-emusim", "#1 SMP", machine, ""];
    let mut buf = [0u8; 65 * 6];
    for (i, f) in fields.iter().enumerate() {
        let bytes = f.as_bytes();
        let n = bytes.len().min(64);
        let off = i * 65;
        buf[off..off + n].copy_from_slice(&bytes[..n]);
    }
    mem.write(addr, &buf)
}

/// Linux i386 `struct timespec`: two 32-bit longs, seconds then
/// nanoseconds.
pub fn read_timespec(mem: &MemorySet, addr: VirtAddr) -> Result<(u32, u32), Errno> {
    let bytes = mem.read(addr, 8)?;
    let sec = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let nsec = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    Ok((sec, nsec))
}

pub fn write_timespec(mem: &mut MemorySet, addr: VirtAddr, sec: u32, nsec: u32) -> SysResultUnit {
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&sec.to_le_bytes());
    buf[4..8].copy_from_slice(&nsec.to_le_bytes());
    mem.write(addr, &buf)
}

/// Linux i386 `struct user_desc` (`set_thread_area`/`CLONE_SETTLS`):
/// entry_number, base_addr, limit, then a packed bitfield word this
/// simulator ignores (spec.md §4.4 only requires base/limit and the
/// forced entry number 6).
pub fn read_user_desc(mem: &MemorySet, addr: VirtAddr) -> Result<(u32, u32, u32), Errno> {
    let bytes = mem.read(addr, 12)?;
    let entry_number = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let base_addr = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    let limit = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    Ok((entry_number, base_addr, limit))
}

pub fn write_user_desc_entry_number(mem: &mut MemorySet, addr: VirtAddr, entry_number: u32) -> SysResultUnit {
    mem.write(addr, &entry_number.to_le_bytes())
}

/// a guest `struct sigaction` as this simulator lays it out: handler,
/// mask, flags, restorer (20 bytes). The real glibc/kernel layout
/// differs by libc version and isn't load-bearing for anything spec.md
/// names, so this is a self-consistent simplification rather than a
/// copy of any one ABI.
pub fn read_sigaction(mem: &MemorySet, addr: VirtAddr) -> Result<SigAction, Errno> {
    let bytes = mem.read(addr, 20)?;
    let handler = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
    let mask_lo = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as u64;
    let mask_hi = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as u64;
    let flags = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
    let restorer = u32::from_le_bytes(bytes[16..20].try_into().unwrap());
    Ok(SigAction {
        entry: VirtAddr(handler),
        flags,
        restorer: VirtAddr(restorer),
        mask_during_handler: SigSet::from_bits(mask_lo | (mask_hi << 32)),
    })
}

pub fn write_sigaction(mem: &mut MemorySet, addr: VirtAddr, action: &SigAction) -> SysResultUnit {
    let mut buf = [0u8; 20];
    let bits = action.mask_during_handler.bits();
    buf[0..4].copy_from_slice(&action.entry.0.to_le_bytes());
    buf[4..8].copy_from_slice(&(bits as u32).to_le_bytes());
    buf[8..12].copy_from_slice(&((bits >> 32) as u32).to_le_bytes());
    buf[12..16].copy_from_slice(&action.flags.to_le_bytes());
    buf[16..20].copy_from_slice(&action.restorer.0.to_le_bytes());
    mem.write(addr, &buf)
}

/// an 8-byte `sigset_t` (64 signal bits), the `rt_sigprocmask` wire format
pub fn read_sigmask(mem: &MemorySet, addr: VirtAddr) -> Result<SigSet, Errno> {
    let bytes = mem.read(addr, 8)?;
    let lo = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as u64;
    let hi = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as u64;
    Ok(SigSet::from_bits(lo | (hi << 32)))
}

pub fn write_sigmask(mem: &mut MemorySet, addr: VirtAddr, mask: SigSet) -> SysResultUnit {
    let bits = mask.bits();
    let mut buf = [0u8; 8];
    buf[0..4].copy_from_slice(&(bits as u32).to_le_bytes());
    buf[4..8].copy_from_slice(&((bits >> 32) as u32).to_le_bytes());
    mem.write(addr, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::perm::PagePermission;

    #[test]
    fn timespec_round_trip() {
        let mut mem = MemorySet::new();
        mem.map(VirtAddr(0x1000), VirtAddr(0x2000), PagePermission::READ | PagePermission::WRITE, None);
        write_timespec(&mut mem, VirtAddr(0x1000), 3, 500).unwrap();
        assert_eq!(read_timespec(&mem, VirtAddr(0x1000)).unwrap(), (3, 500));
    }

    #[test]
    fn utsname_fields_are_nul_padded() {
        let mut mem = MemorySet::new();
        mem.map(VirtAddr(0x1000), VirtAddr(0x2000), PagePermission::READ | PagePermission::WRITE, None);
        write_utsname(&mut mem, VirtAddr(0x1000), "mips").unwrap();
        let raw = mem.read(VirtAddr(0x1000), 65).unwrap();
        assert!(raw.starts_with(b"Linux\0"));
    }

    #[test]
    fn rlimit_infinity_round_trips() {
        let mut mem = MemorySet::new();
        mem.map(VirtAddr(0x1000), VirtAddr(0x2000), PagePermission::READ | PagePermission::WRITE, None);
        write_rlimit(&mut mem, VirtAddr(0x1000), u32::MAX, u32::MAX).unwrap();
        let raw = mem.read(VirtAddr(0x1000), 8).unwrap();
        assert_eq!(u32::from_le_bytes(raw[0..4].try_into().unwrap()), u32::MAX);
    }

    #[test]
    fn sigaction_round_trips_mask_and_handler() {
        let mut mem = MemorySet::new();
        mem.map(VirtAddr(0x1000), VirtAddr(0x2000), PagePermission::READ | PagePermission::WRITE, None);
        let mut mask = SigSet::empty();
        mask.enable(crate::signal::sig_set::Signal::SIGUSR1);
        let action = SigAction { entry: VirtAddr(0x4000), flags: 1, restorer: VirtAddr(0x4100), mask_during_handler: mask };
        write_sigaction(&mut mem, VirtAddr(0x1000), &action).unwrap();
        let back = read_sigaction(&mem, VirtAddr(0x1000)).unwrap();
        assert_eq!(back.entry, action.entry);
        assert_eq!(back.restorer, action.restorer);
        assert!(back.mask_during_handler.contains_signal(crate::signal::sig_set::Signal::SIGUSR1));
    }

    #[test]
    fn sigmask_round_trips() {
        let mut mem = MemorySet::new();
        mem.map(VirtAddr(0x1000), VirtAddr(0x2000), PagePermission::READ | PagePermission::WRITE, None);
        let mut mask = SigSet::empty();
        mask.enable(crate::signal::sig_set::Signal::SIGTERM);
        write_sigmask(&mut mem, VirtAddr(0x1000), mask).unwrap();
        let back = read_sigmask(&mem, VirtAddr(0x1000)).unwrap();
        assert!(back.contains_signal(crate::signal::sig_set::Signal::SIGTERM));
    }
}
