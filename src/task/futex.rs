//! Futex wait/wake table. The teacher's
//! `NoAxiom/kernel/src/task/futex.rs` leaves `wake`/`requeue_waiters`
//! and `FutexFuture::poll` as `todo!()`; this spec requires a working
//! implementation (spec.md §4.4 `futex` semantics, P8), so this module
//! keeps the teacher's "map address to a set of waiters" shape but
//! completes the state machine: WAIT/WAIT_BITSET, WAKE/WAKE_BITSET,
//! CMP_REQUEUE, WAKE_OP.

use std::collections::BTreeMap;

use crate::errno::{Errno, SysResult};
use crate::mm::address::VirtAddr;
use crate::task::context::Pid;

#[derive(Clone, Copy, Debug)]
struct Waiter {
    pid: Pid,
    bitset: u32,
    sleep_epoch: u64,
}

/// global table of addr -> waiters, plus the monotonic sleep-epoch
/// counter spec.md §3 names as context wakeup metadata and §9 as
/// "global simulator state"
#[derive(Default)]
pub struct FutexTable {
    waiters: BTreeMap<u32, Vec<Waiter>>,
    epoch: u64,
}

pub const FUTEX_BITSET_MATCH_ANY: u32 = u32::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WakeOpCmp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WakeOpArith {
    Set,
    Add,
    Or,
    And,
    Xor,
}

impl FutexTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    /// record a waiter on `addr`; returns its sleep epoch, used as the
    /// context's wakeup-cause tiebreak (spec.md §4.2 futex poll: "sleep
    /// epoch ≤ wake epoch")
    pub fn begin_wait(&mut self, pid: Pid, addr: VirtAddr, bitset: u32) -> u64 {
        let epoch = self.next_epoch();
        self.waiters.entry(addr.0).or_default().push(Waiter { pid, bitset, sleep_epoch: epoch });
        epoch
    }

    /// drop a waiter without waking it (group-exit cancellation, spec.md §5)
    pub fn cancel_wait(&mut self, pid: Pid, addr: VirtAddr) {
        if let Some(list) = self.waiters.get_mut(&addr.0) {
            list.retain(|w| w.pid != pid);
        }
    }

    /// WAKE / WAKE_BITSET: wake up to `max_count` waiters on `addr` whose
    /// bitset intersects `bitset`, preferring lower sleep epochs first
    pub fn wake(&mut self, addr: VirtAddr, max_count: u32, bitset: u32) -> Vec<Pid> {
        let Some(list) = self.waiters.get_mut(&addr.0) else { return Vec::new() };
        let mut eligible: Vec<usize> =
            (0..list.len()).filter(|&i| list[i].bitset & bitset != 0).collect();
        eligible.sort_by_key(|&i| list[i].sleep_epoch);
        eligible.truncate(max_count as usize);

        let mut woken = Vec::with_capacity(eligible.len());
        for &i in eligible.iter().rev() {
            woken.push(list.remove(i).pid);
        }
        woken.reverse();
        woken
    }

    /// true while `pid` is still recorded as a waiter on any address;
    /// used by the CX per-tick poll (spec.md §4.2 "futex" row) to tell
    /// a still-blocked wait from one a concurrent `WAKE` already resolved
    pub fn is_waiting(&self, pid: Pid) -> bool {
        self.waiters.values().any(|list| list.iter().any(|w| w.pid == pid))
    }

    /// CMP_REQUEUE: move the waiters left behind by a limited wake from
    /// `addr1` to `addr2`, up to `requeue_count`
    pub fn requeue(&mut self, addr1: VirtAddr, addr2: VirtAddr, requeue_count: u32) -> usize {
        let Some(list) = self.waiters.get_mut(&addr1.0) else { return 0 };
        let n = (requeue_count as usize).min(list.len());
        let moved: Vec<Waiter> = list.drain(0..n).collect();
        let count = moved.len();
        self.waiters.entry(addr2.0).or_default().extend(moved);
        count
    }
}

/// apply a WAKE_OP arithmetic update to the current value, returning
/// (new_value, old_value)
pub fn apply_wake_op(arith: WakeOpArith, current: u32, operand: u32) -> (u32, u32) {
    let old = current;
    let new = match arith {
        WakeOpArith::Set => operand,
        WakeOpArith::Add => current.wrapping_add(operand),
        WakeOpArith::Or => current | operand,
        WakeOpArith::And => current & operand,
        WakeOpArith::Xor => current ^ operand,
    };
    (new, old)
}

pub fn eval_wake_op_cmp(cmp: WakeOpCmp, old_value: i32, cmp_arg: i32) -> bool {
    match cmp {
        WakeOpCmp::Eq => old_value == cmp_arg,
        WakeOpCmp::Ne => old_value != cmp_arg,
        WakeOpCmp::Lt => old_value < cmp_arg,
        WakeOpCmp::Le => old_value <= cmp_arg,
        WakeOpCmp::Gt => old_value > cmp_arg,
        WakeOpCmp::Ge => old_value >= cmp_arg,
    }
}

pub fn check_word_matches(actual: u32, expected: u32) -> SysResult<()> {
    if actual != expected {
        return Err(Errno::EAGAIN);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wake_prefers_lower_sleep_epoch() {
        let mut table = FutexTable::new();
        let addr = VirtAddr(0x2000);
        table.begin_wait(1, addr, FUTEX_BITSET_MATCH_ANY);
        table.begin_wait(2, addr, FUTEX_BITSET_MATCH_ANY);
        table.begin_wait(3, addr, FUTEX_BITSET_MATCH_ANY);

        let woken = table.wake(addr, 2, FUTEX_BITSET_MATCH_ANY);
        assert_eq!(woken, vec![1, 2]);
        assert_eq!(table.wake(addr, 10, FUTEX_BITSET_MATCH_ANY), vec![3]);
    }

    #[test]
    fn wake_bitset_only_matches_intersection() {
        let mut table = FutexTable::new();
        let addr = VirtAddr(0x3000);
        table.begin_wait(1, addr, 0b0001);
        table.begin_wait(2, addr, 0b0010);

        let woken = table.wake(addr, 10, 0b0010);
        assert_eq!(woken, vec![2]);
    }

    #[test]
    fn requeue_moves_remaining_waiters() {
        let mut table = FutexTable::new();
        let a1 = VirtAddr(0x1000);
        let a2 = VirtAddr(0x4000);
        table.begin_wait(1, a1, FUTEX_BITSET_MATCH_ANY);
        table.begin_wait(2, a1, FUTEX_BITSET_MATCH_ANY);
        table.begin_wait(3, a1, FUTEX_BITSET_MATCH_ANY);

        let woken = table.wake(a1, 1, FUTEX_BITSET_MATCH_ANY);
        assert_eq!(woken, vec![1]);
        let moved = table.requeue(a1, a2, 10);
        assert_eq!(moved, 2);
        assert_eq!(table.wake(a2, 10, FUTEX_BITSET_MATCH_ANY), vec![2, 3]);
    }

    #[test]
    fn wake_op_arithmetic_and_compare() {
        let (new, old) = apply_wake_op(WakeOpArith::Add, 5, 3);
        assert_eq!((new, old), (8, 5));
        assert!(eval_wake_op_cmp(WakeOpCmp::Gt, old as i32, 2));
    }
}
