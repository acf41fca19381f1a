//! Signal-control syscalls. Grounded on
//! `NoAxiom/kernel/src/syscall/signal.rs`'s rt_sigaction/rt_sigprocmask
//! split, retargeted at `SigActionTable`/`SigMask` and the synthetic
//! call frame `signal::delivery` builds (spec.md §4.4 "rt_sigaction
//! installs/reads a handler record... rt_sigprocmask adds/removes/
//! replaces the blocked set... rt_sigreturn restores from the frame").

use crate::env::Environment;
use crate::errno::Errno;
use crate::mm::address::VirtAddr;
use crate::signal::delivery::pop_signal_frame;
use crate::syscall::structs::{read_sigaction, read_sigmask, write_sigaction, write_sigmask};
use crate::syscall::{Outcome, SysResult};
use crate::task::context::Pid;
use crate::task::state::TaskState;

const SIG_BLOCK: u32 = 0;
const SIG_UNBLOCK: u32 = 1;
const SIG_SETMASK: u32 = 2;

/// `rt_sigaction(signum, act, oldact)`: read the old handler record
/// before installing the new one, matching the Linux ABI's atomicity
/// (an `oldact` pointer must see the state before the update, never
/// the state after it replaces itself).
pub fn sys_rt_sigaction(env: &mut Environment, pid: Pid, signum: u32, act_ptr: u32, oldact_ptr: u32) -> SysResult {
    if signum == 0 || signum > 64 {
        return Err(Errno::EINVAL);
    }
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let sig_actions = ctx.sig_actions.clone();
    let mem = ctx.memory.clone();

    if oldact_ptr != 0 {
        let old = sig_actions.lock().unwrap().get(signum as u8);
        write_sigaction(&mut mem.lock().unwrap(), VirtAddr(oldact_ptr), &old)?;
    }
    if act_ptr != 0 {
        let new = read_sigaction(&mem.lock().unwrap(), VirtAddr(act_ptr))?;
        sig_actions.lock().unwrap().set(signum as u8, new);
    }
    Ok(Outcome::Value(0))
}

/// `rt_sigprocmask(how, set, oldset)`: `how` is only consulted when
/// `set` is non-null, per the Linux ABI ("if set is NULL, then the
/// signal mask is unchanged... but the current value of the mask is
/// nevertheless returned in oldset").
pub fn sys_rt_sigprocmask(env: &mut Environment, pid: Pid, how: u32, set_ptr: u32, oldset_ptr: u32) -> SysResult {
    let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();

    if oldset_ptr != 0 {
        write_sigmask(&mut mem.lock().unwrap(), VirtAddr(oldset_ptr), ctx.blocked)?;
    }
    if set_ptr != 0 {
        let new = read_sigmask(&mem.lock().unwrap(), VirtAddr(set_ptr))?;
        ctx.blocked = match how {
            SIG_BLOCK => ctx.blocked | new,
            SIG_UNBLOCK => {
                let mut b = ctx.blocked;
                b.remove(new);
                b
            }
            SIG_SETMASK => new,
            _ => return Err(Errno::EINVAL),
        };
    }
    Ok(Outcome::Value(0))
}

/// `rt_sigreturn()`: pop the frame `signal::delivery::push_signal_frame`
/// built, at the stack pointer the handler (and its restorer trampoline)
/// left behind. Returns `Outcome::Handled` since the popped frame already
/// carries the correct return register value -- dispatch must not
/// overwrite it.
pub fn sys_rt_sigreturn(env: &mut Environment, pid: Pid) -> SysResult {
    let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    let frame_sp = VirtAddr(ctx.regs.sp());
    let restored_mask = {
        let mem = mem.lock().unwrap();
        pop_signal_frame(&mem, &mut ctx.regs, frame_sp)
    };
    ctx.blocked = restored_mask;
    ctx.state.remove(TaskState::SIGNAL_HANDLER_ACTIVE);
    Ok(Outcome::Handled)
}
