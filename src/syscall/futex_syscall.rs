//! `futex(2)`. The teacher's `NoAxiom/kernel/src/task/futex.rs` stubs
//! `wake`/`requeue_waiters` with `todo!()`; this module is the syscall
//! front-end over the completed `task::futex::FutexTable` state machine
//! (spec.md §4.4 "futex" op table, P8).

use crate::env::Environment;
use crate::errno::Errno;
use crate::mm::address::VirtAddr;
use crate::mm::user_ptr::UserPtr;
use crate::syscall::structs::read_timespec;
use crate::syscall::{Outcome, SysResult};
use crate::task::context::Pid;
use crate::task::futex::{apply_wake_op, eval_wake_op_cmp, WakeOpArith, WakeOpCmp, FUTEX_BITSET_MATCH_ANY};
use crate::task::state::TaskState;
use crate::task::wakeup::WakeupCause;

const FUTEX_WAIT: u32 = 0;
const FUTEX_WAKE: u32 = 1;
const FUTEX_REQUEUE: u32 = 3;
const FUTEX_CMP_REQUEUE: u32 = 4;
const FUTEX_WAKE_OP: u32 = 5;
const FUTEX_WAIT_BITSET: u32 = 9;
const FUTEX_WAKE_BITSET: u32 = 10;
const FUTEX_PRIVATE_FLAG: u32 = 128;
const FUTEX_CLOCK_REALTIME: u32 = 256;

fn read_word(env: &Environment, pid: Pid, addr: VirtAddr) -> Result<u32, Errno> {
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    UserPtr::<u32>::new(addr).read(&mem.lock().unwrap())
}

fn write_word(env: &Environment, pid: Pid, addr: VirtAddr, val: u32) -> Result<(), Errno> {
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    UserPtr::<u32>::new(addr).write(&mut mem.lock().unwrap(), val)
}

/// sign-extend the 12-bit oparg/cmparg fields the Linux `FUTEX_OP`
/// encoding packs into `val3` for `FUTEX_WAKE_OP`.
fn sext12(v: u32) -> i32 {
    let v = v & 0xfff;
    if v & 0x800 != 0 {
        (v as i32) - 0x1000
    } else {
        v as i32
    }
}

pub fn sys_futex(env: &mut Environment, pid: Pid, args: [u32; 6]) -> SysResult {
    let [addr1_raw, op_raw, val1, val2_raw, addr2_raw, val3] = args;
    let op = op_raw & !(FUTEX_PRIVATE_FLAG | FUTEX_CLOCK_REALTIME);
    let addr1 = VirtAddr(addr1_raw);
    let addr2 = VirtAddr(addr2_raw);

    match op {
        FUTEX_WAIT | FUTEX_WAIT_BITSET => {
            let current = read_word(env, pid, addr1)?;
            if current != val1 {
                return Err(Errno::EAGAIN);
            }
            let bitset = if op == FUTEX_WAIT_BITSET { val3 } else { FUTEX_BITSET_MATCH_ANY };
            let timeout_deadline_ns = if val2_raw != 0 {
                let mem = env.contexts.get(pid).ok_or(Errno::ESRCH)?.memory.clone();
                let (sec, nsec) = read_timespec(&mem.lock().unwrap(), VirtAddr(val2_raw))?;
                Some(env.events.now() * 1000 + sec as u64 * 1_000_000_000 + nsec as u64)
            } else {
                None
            };
            let sleep_epoch = env.futex.begin_wait(pid, addr1, bitset);
            let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
            ctx.suspend(
                TaskState::FUTEX,
                WakeupCause::Futex { addr: addr1, bitset, sleep_epoch, timeout_deadline_ns },
            );
            Ok(Outcome::Suspended)
        }

        FUTEX_WAKE | FUTEX_WAKE_BITSET => {
            let bitset = if op == FUTEX_WAKE_BITSET { val3 } else { FUTEX_BITSET_MATCH_ANY };
            let woken = env.futex.wake(addr1, val1, bitset);
            Ok(Outcome::Value(woken.len() as i64))
        }

        FUTEX_REQUEUE => {
            let woken = env.futex.wake(addr1, val1, FUTEX_BITSET_MATCH_ANY);
            let moved = env.futex.requeue(addr1, addr2, val2_raw);
            Ok(Outcome::Value((woken.len() + moved) as i64))
        }

        FUTEX_CMP_REQUEUE => {
            let current = read_word(env, pid, addr1)?;
            if current != val3 {
                return Err(Errno::EAGAIN);
            }
            let woken = env.futex.wake(addr1, val1, FUTEX_BITSET_MATCH_ANY);
            let moved = env.futex.requeue(addr1, addr2, val2_raw);
            Ok(Outcome::Value((woken.len() + moved) as i64))
        }

        FUTEX_WAKE_OP => {
            let packed = val3;
            let op_bits = (packed >> 28) & 0xf;
            let cmp_bits = (packed >> 24) & 0xf;
            let oparg = sext12(packed >> 12);
            let cmparg = sext12(packed);

            let arith = match op_bits & 0x7 {
                0 => WakeOpArith::Set,
                1 => WakeOpArith::Add,
                2 => WakeOpArith::Or,
                3 => WakeOpArith::And,
                4 => WakeOpArith::Xor,
                _ => return Err(Errno::ENOSYS),
            };
            let cmp = match cmp_bits {
                0 => WakeOpCmp::Eq,
                1 => WakeOpCmp::Ne,
                2 => WakeOpCmp::Lt,
                3 => WakeOpCmp::Le,
                4 => WakeOpCmp::Gt,
                5 => WakeOpCmp::Ge,
                _ => return Err(Errno::ENOSYS),
            };
            // FUTEX_OP_OPARG_SHIFT: oparg names a shift amount rather than
            // a literal operand
            let oparg = if op_bits & 0x8 != 0 { 1u32.wrapping_shl(oparg as u32 & 0x1f) } else { oparg as u32 };

            let old = read_word(env, pid, addr2)?;
            let (new_val, old_val) = apply_wake_op(arith, old, oparg);
            write_word(env, pid, addr2, new_val)?;

            let mut woken = env.futex.wake(addr1, val1, FUTEX_BITSET_MATCH_ANY).len();
            if eval_wake_op_cmp(cmp, old_val as i32, cmparg) {
                woken += env.futex.wake(addr2, val2_raw, FUTEX_BITSET_MATCH_ANY).len();
            }
            Ok(Outcome::Value(woken as i64))
        }

        _ => Err(Errno::ENOSYS),
    }
}
