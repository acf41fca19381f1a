//! Wakeup metadata recorded on a suspended context. Grounded on
//! spec.md §3 Context attributes ("wakeup metadata (futex
//! address+bitset, sleep epoch, file descriptor, events mask, wake
//! deadline, waited-for pid)") and on the per-tick poll table in §4.2.

use crate::mm::address::VirtAddr;

#[derive(Clone, Copy, Debug)]
pub enum WakeupCause {
    Read { host_fd: i32, buf: VirtAddr, len: u32 },
    Write { host_fd: i32, buf: VirtAddr, len: u32 },
    Nanosleep { deadline_ns: u64 },
    Futex { addr: VirtAddr, bitset: u32, sleep_epoch: u64, timeout_deadline_ns: Option<u64> },
    Waitpid { wakeup_pid: Option<u32>, status_ptr: VirtAddr },
}
