//! Memory-management syscalls. Grounded on `NoAxiom/kernel/src/syscall/
//! mm.rs`'s brk/mmap/munmap/mprotect split, retargeted at the flat
//! `MemorySet` this simulator uses instead of the teacher's page-table
//! walker.

use std::os::fd::BorrowedFd;

use crate::env::Environment;
use crate::errno::Errno;
use crate::flags::{MmapFlags, MmapProt};
use crate::mm::address::VirtAddr;
use crate::mm::perm::PagePermission;
use crate::syscall::fs::host_fd;
use crate::syscall::{Outcome, SysResult};
use crate::task::context::Pid;

pub fn sys_brk(env: &mut Environment, pid: Pid, addr: u32) -> SysResult {
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    let new_brk = mem.lock().unwrap().brk(VirtAddr(addr));
    Ok(Outcome::Value(new_brk.0 as i64))
}

/// `mmap`/`mmap2`. `is_mmap2` only changes the unit of `args[5]` (the
/// file offset, pages instead of bytes). Non-anonymous maps read the
/// backing file in page-sized chunks into VM at the chosen address
/// with *init* permission (spec.md §4.4 "Memory map").
pub fn sys_mmap(env: &mut Environment, pid: Pid, args: [u32; 6], is_mmap2: bool) -> SysResult {
    let [hint, len, prot_bits, flags_bits, fd, off] = args;
    let flags = MmapFlags::from_bits_truncate(flags_bits);
    let prot = MmapProt::from_bits_truncate(prot_bits);
    let perm: PagePermission = prot.into();

    let file_data = if flags.contains(MmapFlags::MAP_ANONYMOUS) {
        None
    } else {
        let (raw_fd, _) = host_fd(env, pid, fd)?;
        let byte_off = if is_mmap2 { off as i64 * crate::config::PAGE_SIZE as i64 } else { off as i64 };
        nix::unistd::lseek(raw_fd, byte_off, nix::unistd::Whence::SeekSet).map_err(Errno::from)?;
        let mut buf = vec![0u8; len as usize];
        let fd_borrow = unsafe { BorrowedFd::borrow_raw(raw_fd) };
        let n = nix::unistd::read(fd_borrow, &mut buf).map_err(Errno::from)?;
        buf.truncate(n);
        Some(buf)
    };

    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    let mut mem = mem.lock().unwrap();

    let aligned_len = (len + crate::config::PAGE_SIZE as u32 - 1) & !(crate::config::PAGE_SIZE as u32 - 1);
    let base = if flags.contains(MmapFlags::MAP_FIXED) {
        let fixed = VirtAddr(hint);
        mem.unmap(fixed, fixed + aligned_len);
        fixed
    } else {
        let hint_addr = if hint == 0 { None } else { Some(VirtAddr(hint)) };
        mem.reserve(hint_addr, aligned_len)
    };
    let end = base + aligned_len;
    mem.map(base, end, perm, file_data.as_deref());
    Ok(Outcome::Value(base.0 as i64))
}

fn align_range(addr: u32, len: u32) -> (VirtAddr, VirtAddr) {
    let page = crate::config::PAGE_SIZE as u32;
    let start = addr & !(page - 1);
    let end = (addr + len + page - 1) & !(page - 1);
    (VirtAddr(start), VirtAddr(end))
}

pub fn sys_munmap(env: &mut Environment, pid: Pid, addr: u32, len: u32) -> SysResult {
    let (start, end) = align_range(addr, len);
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    mem.lock().unwrap().unmap(start, end);
    Ok(Outcome::Value(0))
}

pub fn sys_mprotect(env: &mut Environment, pid: Pid, addr: u32, len: u32, prot_bits: u32) -> SysResult {
    let prot = MmapProt::from_bits_truncate(prot_bits);
    let perm: PagePermission = prot.into();
    let (start, end) = align_range(addr, len);
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    mem.lock().unwrap().protect(start, end, perm)?;
    Ok(Outcome::Value(0))
}
