//! The CX per-tick wakeup-predicate table of spec.md §4.2. One
//! function per wakeup cause, matched against `WakeupCause` recorded on
//! the suspended context; `try_wake` is the entry point `Environment::
//! poll_suspended` calls for every suspended pid each tick.

use std::os::fd::BorrowedFd;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::env::Environment;
use crate::mm::address::VirtAddr;
use crate::task::context::Pid;
use crate::task::exit::try_reap;
use crate::task::futex::FUTEX_BITSET_MATCH_ANY;
use crate::task::state::TaskState;
use crate::task::wakeup::WakeupCause;

/// borrow a raw fd for one poll/read/write call; the fd's lifetime is
/// owned by the guest's `FdTable`, not by this borrow.
fn borrow(fd: i32) -> BorrowedFd<'static> {
    unsafe { BorrowedFd::borrow_raw(fd) }
}

/// evaluate `pid`'s wakeup predicate; if satisfied, perform the wakeup
/// action (write the deferred I/O, reap the zombie, etc.), set the
/// return register, and report `true` so the caller moves it back to
/// `running`. A context with any unblocked pending signal preempts
/// every other cause (spec.md §4.2 table, last row).
pub fn try_wake(env: &mut Environment, pid: Pid) -> bool {
    if signal_preempts(env, pid) {
        crate::task::signal_dispatch::deliver_pending(env, pid);
        return true;
    }

    let Some(cause) = env.contexts.get(pid).and_then(|c| c.wakeup) else { return false };
    match cause {
        WakeupCause::Read { host_fd, buf, len } => try_wake_read(env, pid, host_fd, buf, len),
        WakeupCause::Write { host_fd, buf, len } => try_wake_write(env, pid, host_fd, buf, len),
        WakeupCause::Nanosleep { deadline_ns } => try_wake_nanosleep(env, pid, deadline_ns),
        WakeupCause::Futex { addr, bitset, sleep_epoch, timeout_deadline_ns } => {
            try_wake_futex(env, pid, addr, bitset, sleep_epoch, timeout_deadline_ns)
        }
        WakeupCause::Waitpid { wakeup_pid, status_ptr } => try_wake_waitpid(env, pid, wakeup_pid, status_ptr),
    }
}

fn signal_preempts(env: &mut Environment, pid: Pid) -> bool {
    let Some(ctx) = env.contexts.get(pid) else { return false };
    if !ctx.state.contains(TaskState::SUSPENDED) {
        return false;
    }
    ctx.sig_manager.has_pending_signals(ctx.blocked)
}

fn is_nonblocking(env: &Environment, pid: Pid, host_fd: i32) -> bool {
    let Some(ctx) = env.contexts.get(pid) else { return false };
    let table = ctx.fd_table.lock().unwrap();
    table
        .entries_iter()
        .find(|e| e.host_fd == host_fd)
        .map(|e| e.flags & crate::flags::OpenFlags::O_NONBLOCK.bits() != 0)
        .unwrap_or(false)
}

fn try_wake_read(env: &mut Environment, pid: Pid, host_fd: i32, buf: VirtAddr, len: u32) -> bool {
    let nonblock = is_nonblocking(env, pid, host_fd);
    let mut fds = [PollFd::new(borrow(host_fd), PollFlags::POLLIN)];
    let ready = poll(&mut fds, PollTimeout::ZERO).map(|n| n > 0).unwrap_or(true);
    if !ready && !nonblock {
        return false;
    }

    let mut scratch = vec![0u8; len as usize];
    let n = nix::unistd::read(borrow(host_fd), &mut scratch).unwrap_or(0);
    let Some(ctx) = env.contexts.get_mut(pid) else { return true };
    if n > 0 {
        let mem = ctx.memory.clone();
        let _ = mem.lock().unwrap().write(buf, &scratch[..n]);
    }
    ctx.regs.set_ret(n as u32);
    true
}

fn try_wake_write(env: &mut Environment, pid: Pid, host_fd: i32, buf: VirtAddr, len: u32) -> bool {
    let mut fds = [PollFd::new(borrow(host_fd), PollFlags::POLLOUT)];
    let ready = poll(&mut fds, PollTimeout::ZERO).map(|n| n > 0).unwrap_or(true);
    if !ready {
        return false;
    }

    let Some(ctx) = env.contexts.get_mut(pid) else { return true };
    let mem = ctx.memory.clone();
    let data = mem.lock().unwrap().read(buf, len as usize).unwrap_or_default();
    let n = nix::unistd::write(borrow(host_fd), &data).unwrap_or(0);
    ctx.regs.set_ret(n as u32);
    true
}

/// spec.md §9 open question: "Nanosleep wakeup rounds down microseconds."
/// the deadline is stored in nanoseconds but compared against the
/// simulated clock truncated to microsecond granularity, preserving
/// that rounding rather than "fixing" it.
fn try_wake_nanosleep(env: &mut Environment, pid: Pid, deadline_ns: u64) -> bool {
    let now_us = env.events.now();
    if now_us * 1000 < (deadline_ns / 1000) * 1000 {
        return false;
    }
    if let Some(ctx) = env.contexts.get_mut(pid) {
        ctx.regs.set_ret(0);
    }
    true
}

/// the actual wake decision lives in `FutexTable::wake`, called from
/// the `futex` syscall handler (WAKE/WAKE_BITSET/CMP_REQUEUE/WAKE_OP);
/// once that removes this pid from the waiter list, the wait is over.
/// A `timeout_deadline_ns` races that removal: if the simulated clock
/// passes it first, this cancels the wait itself and returns -ETIMEDOUT
/// (spec.md §9 open question: futex WAIT timeout is implemented, not
/// failed), using the same microsecond-truncation as nanosleep wakeup.
fn try_wake_futex(
    env: &mut Environment,
    pid: Pid,
    addr: VirtAddr,
    bitset: u32,
    sleep_epoch: u64,
    timeout_deadline_ns: Option<u64>,
) -> bool {
    let _ = (bitset, sleep_epoch);
    if !env.futex.is_waiting(pid) {
        if let Some(ctx) = env.contexts.get_mut(pid) {
            ctx.regs.set_ret(0);
        }
        return true;
    }

    if let Some(deadline_ns) = timeout_deadline_ns {
        let now_us = env.events.now();
        if now_us * 1000 >= (deadline_ns / 1000) * 1000 {
            env.futex.cancel_wait(pid, addr);
            if let Some(ctx) = env.contexts.get_mut(pid) {
                ctx.regs.set_ret_signed(-(crate::errno::Errno::ETIMEDOUT as i32));
            }
            return true;
        }
    }

    false
}

fn try_wake_waitpid(env: &mut Environment, pid: Pid, wanted: Option<u32>, status_ptr: Option<VirtAddr>) -> bool {
    match try_reap(&mut env.contexts, pid, wanted, status_ptr) {
        Some(child) => {
            if let Some(ctx) = env.contexts.get_mut(pid) {
                ctx.regs.set_ret(child);
            }
            true
        }
        None => false,
    }
}
