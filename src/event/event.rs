//! A scheduled event: {kind, stack pointer, fire-time} (spec.md §3
//! "Event"). Grounded on the expire+payload shape of
//! `NoAxiom/kernel/src/time/timer.rs::Timer`, generalized from a single
//! waker callback to the kinds this simulator's event kernel drives.

use crate::task::context::Pid;

#[derive(Clone, Copy, Debug)]
pub enum EventKind {
    /// re-poll a suspended context's wakeup cause (nanosleep deadline,
    /// or a periodic check while blocked on I/O/futex/waitpid)
    Wakeup { pid: Pid },
    /// a pending coherence-engine continuation, identified by its
    /// access-stack frame index (spec.md §3 "Access stack")
    CoherenceContinuation { frame: usize },
}

#[derive(Clone, Copy, Debug)]
pub struct Event {
    pub kind: EventKind,
    pub fire_time: u64,
    /// insertion order, used to break ties deterministically
    /// (spec.md §3 "Event": "ties broken by insertion order")
    pub(crate) seq: u64,
}
