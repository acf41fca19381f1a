//! Process/thread lifecycle syscalls. Grounded on
//! `NoAxiom/kernel/src/syscall/process.rs`'s clone/exit/waitpid split,
//! retargeted at `task::fork::clone_context` and `task::exit::{exit_
//! context, exit_group, try_reap}` which already implement the
//! resource-sharing and zombie-reaping semantics spec.md §4.4 mandates.

use crate::env::Environment;
use crate::errno::Errno;
use crate::flags::{CloneFlags, RlimitResource};
use crate::mm::address::VirtAddr;
use crate::syscall::structs::{read_user_desc, write_rlimit};
use crate::syscall::{Outcome, SysResult};
use crate::task::context::{Pid, TlsSegment};
use crate::task::exit::{exit_context, exit_group, try_reap};
use crate::task::fork::{clone_context, CloneRequest};
use crate::task::state::TaskState;
use crate::task::wakeup::WakeupCause;

pub fn sys_clone(env: &mut Environment, pid: Pid, args: [u32; 6]) -> SysResult {
    let [flags_bits, new_sp, parent_tid_ptr, tls_ptr, child_tid_ptr, _unused5] = args;
    let flags = CloneFlags::from_bits_truncate(flags_bits);

    // CLONE_SETTLS installs the segment described by the `user_desc` at
    // `tls_ptr` into the child, not the caller's own TLS (spec.md §4.4).
    let tls = if flags.contains(CloneFlags::CLONE_SETTLS) {
        let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
        let mem = ctx.memory.clone();
        let (_entry_number, base, limit) = read_user_desc(&mem.lock().unwrap(), VirtAddr(tls_ptr))?;
        Some(TlsSegment { base, limit })
    } else {
        None
    };

    let req = CloneRequest {
        flags,
        new_sp: if new_sp == 0 { None } else { Some(VirtAddr(new_sp)) },
        parent_tid_ptr: if parent_tid_ptr == 0 { None } else { Some(VirtAddr(parent_tid_ptr)) },
        child_tid_ptr: if child_tid_ptr == 0 { None } else { Some(VirtAddr(child_tid_ptr)) },
        tls,
    };

    let child = clone_context(&mut env.contexts, pid, req).map_err(|_| Errno::ENOMEM)?;
    Ok(Outcome::Value(child as i64))
}

pub fn sys_exit(env: &mut Environment, pid: Pid, code: u32) -> SysResult {
    exit_context(&mut env.contexts, &mut env.futex, pid, code as i32);
    Ok(Outcome::Value(0))
}

pub fn sys_exit_group(env: &mut Environment, pid: Pid, code: u32) -> SysResult {
    exit_group(&mut env.contexts, &mut env.futex, pid, code as i32);
    Ok(Outcome::Value(0))
}

/// `waitpid(pid, status_ptr, options)`: reap immediately if a matching
/// zombie already exists, else suspend until one appears (spec.md
/// §4.4 suspension contract).
pub fn sys_waitpid(env: &mut Environment, pid: Pid, wanted: u32, status_ptr: u32) -> SysResult {
    let wanted = if (wanted as i32) <= 0 { None } else { Some(wanted) };
    let status_addr = if status_ptr == 0 { None } else { Some(VirtAddr(status_ptr)) };

    if let Some(child) = try_reap(&mut env.contexts, pid, wanted, status_addr) {
        return Ok(Outcome::Value(child as i64));
    }

    let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
    ctx.suspend(
        TaskState::WAITPID,
        WakeupCause::Waitpid { wakeup_pid: wanted, status_ptr: status_addr },
    );
    Ok(Outcome::Suspended)
}

pub fn sys_getrlimit(env: &mut Environment, pid: Pid, resource: u32, rlim_ptr: u32) -> SysResult {
    let resource = RlimitResource::try_from(resource).map_err(|_| Errno::EINVAL)?;
    let (cur, max) = match resource {
        RlimitResource::Stack => (crate::config::USER_STACK_SIZE as u32, crate::config::USER_STACK_SIZE as u32),
        RlimitResource::Nofile => (1024, 1024),
        RlimitResource::As => (u32::MAX, u32::MAX),
        RlimitResource::Cpu
        | RlimitResource::Fsize
        | RlimitResource::Data
        | RlimitResource::Core
        | RlimitResource::Rss
        | RlimitResource::Nproc
        | RlimitResource::Memlock => (u32::MAX, u32::MAX),
    };
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    write_rlimit(&mut mem.lock().unwrap(), VirtAddr(rlim_ptr), cur, max)?;
    Ok(Outcome::Value(0))
}

pub fn sys_set_tid_address(env: &mut Environment, pid: Pid, addr: u32) -> SysResult {
    let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
    ctx.clear_child_tid = if addr == 0 { None } else { Some(VirtAddr(addr)) };
    Ok(Outcome::Value(pid as i64))
}

/// robust futex lists are not exercised by any scenario spec.md lists
/// (SPEC_FULL.md Non-goals); acknowledge and discard.
pub fn sys_set_robust_list(_env: &mut Environment, _pid: Pid, _head_ptr: u32, _len: u32) -> SysResult {
    Ok(Outcome::Value(0))
}
