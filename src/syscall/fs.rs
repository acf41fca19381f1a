//! File-descriptor syscalls. Grounded on
//! `NoAxiom/kernel/src/syscall/fs.rs` and `.../io.rs`'s role (translate
//! a guest fd operation into a host one through the fd table), split
//! here into the handlers spec.md §4.4 lists as "required handlers".

use std::os::fd::BorrowedFd;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::env::Environment;
use crate::errno::Errno;
use crate::fd::table::{FdEntry, FdKind};
use crate::fd::virtualfs;
use crate::flags::OpenFlags;
use crate::mm::address::VirtAddr;
use crate::syscall::structs::write_stat64;
use crate::syscall::{Outcome, SysResult};
use crate::task::context::Pid;
use crate::task::state::TaskState;
use crate::task::wakeup::WakeupCause;

fn borrow(fd: i32) -> BorrowedFd<'static> {
    unsafe { BorrowedFd::borrow_raw(fd) }
}

pub(crate) fn host_fd(env: &Environment, pid: Pid, fd: u32) -> Result<(i32, bool), Errno> {
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let table = ctx.fd_table.lock().unwrap();
    let entry = table.get(fd)?;
    Ok((entry.host_fd, entry.flags & OpenFlags::O_NONBLOCK.bits() != 0))
}

/// `read(fd, buf, count)`: perform it now if the descriptor is ready
/// or non-blocking, else suspend with the read wakeup cause (spec.md
/// §4.4 suspension contract).
pub fn sys_read(env: &mut Environment, pid: Pid, fd: u32, buf: u32, len: u32) -> SysResult {
    let (host_fd, nonblock) = host_fd(env, pid, fd)?;
    let mut fds = [PollFd::new(borrow(host_fd), PollFlags::POLLIN)];
    let ready = poll(&mut fds, PollTimeout::ZERO).map(|n| n > 0).unwrap_or(true);

    if !ready && !nonblock {
        let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
        ctx.suspend(
            TaskState::READ,
            WakeupCause::Read { host_fd, buf: VirtAddr(buf), len },
        );
        return Ok(Outcome::Suspended);
    }

    let mut scratch = vec![0u8; len as usize];
    let n = nix::unistd::read(borrow(host_fd), &mut scratch).map_err(Errno::from)?;
    let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    mem.lock().unwrap().write(VirtAddr(buf), &scratch[..n])?;
    Ok(Outcome::Value(n as i64))
}

/// `write(fd, buf, count)`: mirrors `sys_read`'s readiness check.
pub fn sys_write(env: &mut Environment, pid: Pid, fd: u32, buf: u32, len: u32) -> SysResult {
    let (host_fd, _nonblock) = host_fd(env, pid, fd)?;
    let mut fds = [PollFd::new(borrow(host_fd), PollFlags::POLLOUT)];
    let ready = poll(&mut fds, PollTimeout::ZERO).map(|n| n > 0).unwrap_or(true);

    if !ready {
        let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
        ctx.suspend(
            TaskState::WRITE,
            WakeupCause::Write { host_fd, buf: VirtAddr(buf), len },
        );
        return Ok(Outcome::Suspended);
    }

    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    let data = mem.lock().unwrap().read(VirtAddr(buf), len as usize)?;
    let n = nix::unistd::write(borrow(host_fd), &data).map_err(Errno::from)?;
    Ok(Outcome::Value(n as i64))
}

/// `open(path, flags, mode)`. A path under `/proc/` first tries a
/// synthesized virtual file (spec.md §4.4 "Virtual files") before
/// falling through to a real host `open`.
pub fn sys_open(env: &mut Environment, pid: Pid, path_ptr: u32, flags_bits: u32, _mode: u32) -> SysResult {
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    let path = mem.lock().unwrap().read_cstr(VirtAddr(path_ptr))?;
    let flags = OpenFlags::from_bits_truncate(flags_bits);

    if let Some(rendered) = virtual_file_content(env, pid, &path) {
        let (host_fd, vpath) = virtualfs::materialize(&rendered).map_err(|_| Errno::EIO)?;
        let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
        let fd = ctx.fd_table.lock().unwrap().insert(FdEntry {
            kind: FdKind::Virtual,
            host_fd,
            path: vpath,
            flags: flags_bits,
        });
        return Ok(Outcome::Value(fd as i64));
    }

    let oflags = nix::fcntl::OFlag::from_bits_truncate(flags_bits as i32);
    let mode = nix::sys::stat::Mode::from_bits_truncate(0o644);
    let host_fd = nix::fcntl::open(path.as_str(), oflags, mode).map_err(Errno::from)?;
    let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
    let fd = ctx.fd_table.lock().unwrap().insert(FdEntry {
        kind: FdKind::Regular,
        host_fd,
        path,
        flags: flags_bits,
    });
    Ok(Outcome::Value(fd as i64))
}

fn virtual_file_content(env: &Environment, pid: Pid, path: &str) -> Option<String> {
    if !path.starts_with("/proc/") {
        return None;
    }
    match path {
        "/proc/self/maps" => {
            let ctx = env.contexts.get(pid)?;
            let mem = ctx.memory.lock().unwrap();
            Some(virtualfs::render_self_maps(&mem))
        }
        "/proc/cpuinfo" => Some(virtualfs::render_cpuinfo()),
        _ => None,
    }
}

pub fn sys_close(env: &mut Environment, pid: Pid, fd: u32) -> SysResult {
    let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
    let entry = ctx.fd_table.lock().unwrap().close(fd)?;
    if !matches!(entry.kind, FdKind::StdIo) {
        unsafe { libc::close(entry.host_fd) };
    }
    Ok(Outcome::Value(0))
}

pub fn sys_access(env: &mut Environment, pid: Pid, path_ptr: u32, mode: u32) -> SysResult {
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    let path = mem.lock().unwrap().read_cstr(VirtAddr(path_ptr))?;
    let amode = nix::unistd::AccessFlags::from_bits_truncate(mode as i32);
    nix::unistd::access(path.as_str(), amode).map_err(Errno::from)?;
    Ok(Outcome::Value(0))
}

pub fn sys_unlink(env: &mut Environment, pid: Pid, path_ptr: u32) -> SysResult {
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    let path = mem.lock().unwrap().read_cstr(VirtAddr(path_ptr))?;
    nix::unistd::unlink(path.as_str()).map_err(Errno::from)?;
    Ok(Outcome::Value(0))
}

pub fn sys_fstat64(env: &mut Environment, pid: Pid, fd: u32, statbuf: u32) -> SysResult {
    let (host_fd, _) = host_fd(env, pid, fd)?;
    let st = nix::sys::stat::fstat(host_fd).map_err(Errno::from)?;
    let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    write_stat64(&mut mem.lock().unwrap(), VirtAddr(statbuf), &st)?;
    Ok(Outcome::Value(0))
}
