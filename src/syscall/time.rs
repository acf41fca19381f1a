//! Time syscalls. Grounded on `NoAxiom/kernel/src/syscall/time.rs`'s
//! `time`/`nanosleep` split, with `nanosleep` retargeted at the CX
//! suspend/wakeup contract instead of a real blocking sleep (spec.md
//! §4.4 "nanosleep suspends until the simulated clock reaches the
//! requested deadline").

use nix::time::{clock_gettime, ClockId};

use crate::env::Environment;
use crate::errno::Errno;
use crate::mm::address::VirtAddr;
use crate::mm::user_ptr::UserPtr;
use crate::syscall::structs::{read_timespec, write_timespec};
use crate::syscall::{Outcome, SysResult};
use crate::task::context::Pid;
use crate::task::state::TaskState;
use crate::task::wakeup::WakeupCause;

pub fn sys_time(env: &mut Environment, pid: Pid, tloc_ptr: u32) -> SysResult {
    let now = clock_gettime(ClockId::CLOCK_REALTIME).map_err(Errno::from)?;
    let secs = now.tv_sec() as u32;
    if tloc_ptr != 0 {
        let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
        let mem = ctx.memory.clone();
        UserPtr::<u32>::new(VirtAddr(tloc_ptr)).write(&mut mem.lock().unwrap(), secs)?;
    }
    Ok(Outcome::Value(secs as i64))
}

/// suspend until the simulated clock passes `req`'s deadline (spec.md
/// §9 open question: nanosleep wakeup rounds down to microsecond
/// granularity rather than honoring sub-microsecond requests exactly).
pub fn sys_nanosleep(env: &mut Environment, pid: Pid, req_ptr: u32, _rem_ptr: u32) -> SysResult {
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    let (sec, nsec) = read_timespec(&mem.lock().unwrap(), VirtAddr(req_ptr))?;
    let deadline_ns = env.events.now() * 1000 + sec as u64 * 1_000_000_000 + nsec as u64;

    let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
    ctx.suspend(TaskState::NANOSLEEP, WakeupCause::Nanosleep { deadline_ns });
    Ok(Outcome::Suspended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::perm::PagePermission;

    #[test]
    fn write_timespec_round_trips_for_tloc() {
        let mut mem = crate::mm::memory_set::MemorySet::new();
        mem.map(VirtAddr(0x1000), VirtAddr(0x2000), PagePermission::READ | PagePermission::WRITE, None);
        write_timespec(&mut mem, VirtAddr(0x1000), 42, 0).unwrap();
        assert_eq!(read_timespec(&mem, VirtAddr(0x1000)).unwrap().0, 42);
    }
}
