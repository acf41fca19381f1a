//! Syscall translator (SC). Dispatches by the number the instruction
//! executor finds in the ABI return-register slot to a per-category
//! handler module, following the split of
//! `NoAxiom/kernel/src/syscall/{fs,mm,process,signal,time,futex,
//! system}.rs` into this hosted process simulator's equivalent. A
//! handler either completes synchronously (`Outcome::Value`) or has
//! already suspended the context itself per the suspension contract
//! (spec.md §4.4) and returns `Outcome::Suspended`.

pub mod fs;
pub mod futex_syscall;
pub mod mm;
pub mod numbers;
pub mod process;
pub mod signal;
pub mod structs;
pub mod system;
pub mod time;

use crate::env::Environment;
use crate::errno::{Errno, SimError};
use crate::task::context::Pid;

pub enum Outcome {
    /// the value to write into the ABI return register
    Value(i64),
    /// the handler already suspended the context; its return register
    /// will be set when CX's per-tick poll resolves the wakeup cause
    Suspended,
    /// the handler already fully restored the context's register file
    /// itself (`rt_sigreturn`) — dispatch must not touch the return
    /// register or the running/suspended list membership
    Handled,
}

pub type SysResult = Result<Outcome, Errno>;

/// dispatch `nr` with `args` for `pid`, writing the result into its
/// return register unless the handler suspended it. Unimplemented
/// syscall numbers are a fatal error (spec.md §7/§9: "this spec
/// explicitly requires them to fail noisily rather than returning 0").
pub fn dispatch(env: &mut Environment, pid: Pid, nr: u32, args: [u32; 6]) -> Result<(), SimError> {
    log::trace!("syscall pid={pid} nr={nr} args={args:?}");
    use numbers::*;

    let result = match nr {
        NR_READ => fs::sys_read(env, pid, args[0], args[1], args[2]),
        NR_WRITE => fs::sys_write(env, pid, args[0], args[1], args[2]),
        NR_OPEN => fs::sys_open(env, pid, args[0], args[1], args[2]),
        NR_CLOSE => fs::sys_close(env, pid, args[0]),
        NR_ACCESS => fs::sys_access(env, pid, args[0], args[1]),
        NR_UNLINK => fs::sys_unlink(env, pid, args[0]),
        NR_FSTAT64 => fs::sys_fstat64(env, pid, args[0], args[1]),

        NR_BRK => mm::sys_brk(env, pid, args[0]),
        NR_MMAP => mm::sys_mmap(env, pid, args, false),
        NR_MMAP2 => mm::sys_mmap(env, pid, args, true),
        NR_MUNMAP => mm::sys_munmap(env, pid, args[0], args[1]),
        NR_MPROTECT => mm::sys_mprotect(env, pid, args[0], args[1], args[2]),

        NR_CLONE => process::sys_clone(env, pid, args),
        NR_EXIT => process::sys_exit(env, pid, args[0]),
        NR_EXIT_GROUP => process::sys_exit_group(env, pid, args[0]),
        NR_WAITPID => process::sys_waitpid(env, pid, args[0], args[1]),
        NR_GETRLIMIT => process::sys_getrlimit(env, pid, args[0], args[1]),
        NR_SET_TID_ADDRESS => process::sys_set_tid_address(env, pid, args[0]),
        NR_SET_ROBUST_LIST => process::sys_set_robust_list(env, pid, args[0], args[1]),

        NR_RT_SIGACTION => signal::sys_rt_sigaction(env, pid, args[0], args[1], args[2]),
        NR_RT_SIGPROCMASK => signal::sys_rt_sigprocmask(env, pid, args[0], args[1], args[2]),
        NR_RT_SIGRETURN => signal::sys_rt_sigreturn(env, pid),

        NR_TIME => time::sys_time(env, pid, args[0]),
        NR_NANOSLEEP => time::sys_nanosleep(env, pid, args[0], args[1]),

        NR_FUTEX => futex_syscall::sys_futex(env, pid, args),

        NR_UNAME => system::sys_uname(env, pid, args[0]),
        NR_SET_THREAD_AREA => system::sys_set_thread_area(env, pid, args[0]),

        other => {
            return Err(SimError::UnimplementedSyscall { name: numbers::name_of(other), no: other as usize });
        }
    };

    match result {
        Ok(Outcome::Value(v)) => {
            if let Some(ctx) = env.contexts.get_mut(pid) {
                ctx.regs.set_ret_signed(v as i32);
            }
        }
        Ok(Outcome::Suspended) => {
            env.contexts.move_to_suspended(pid);
        }
        Ok(Outcome::Handled) => {}
        Err(errno) => {
            if let Some(ctx) = env.contexts.get_mut(pid) {
                ctx.regs.set_ret_signed(-(errno as i32));
            }
        }
    }
    Ok(())
}
