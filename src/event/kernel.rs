//! Event simulator kernel (ES): a monotonic clock plus a priority queue
//! of scheduled events, firing in increasing `fire_time` order with
//! insertion-order tiebreak (spec.md §3 "Event", §4.1 "Leaves first:
//! ES → ..."). Grounded on the binary-heap scheduling shape of
//! `NoAxiom/kernel/src/time/timer.rs::TimerManager`, generalized from a
//! single waker-callback payload to the `Event` enum this simulator
//! needs (P10: event queue monotonicity).

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::event::event::{Event, EventKind};

#[derive(PartialEq, Eq)]
struct HeapKey {
    fire_time: u64,
    seq: u64,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.fire_time, self.seq).cmp(&(other.fire_time, other.seq))
    }
}
impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

pub struct EventKernel {
    now: u64,
    queue: BinaryHeap<Reverse<HeapKey>>,
    events: std::collections::HashMap<u64, Event>,
    next_seq: u64,
}

impl EventKernel {
    pub fn new() -> Self {
        Self { now: 0, queue: BinaryHeap::new(), events: std::collections::HashMap::new(), next_seq: 0 }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// a microsecond clock usable as a base for timeout arithmetic
    /// (spec.md §4.1 "real_time()"). `now` already advances in
    /// microsecond units for this purpose -- nanosleep/futex deadlines
    /// are computed as `real_time() * 1000 + requested_ns` -- so this
    /// is an alias rather than a second clock source.
    pub fn real_time(&self) -> u64 {
        self.now
    }

    /// schedule `kind` to fire at `fire_time`; if `fire_time <= now` it
    /// fires on the next `pop_ready` call
    pub fn schedule(&mut self, kind: EventKind, fire_time: u64) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let fire_time = fire_time.max(self.now);
        self.events.insert(seq, Event { kind, fire_time, seq });
        self.queue.push(Reverse(HeapKey { fire_time, seq }));
        seq
    }

    /// cancel a previously scheduled event before it fires (group-exit
    /// cancellation, spec.md §5)
    pub fn cancel(&mut self, seq: u64) {
        self.events.remove(&seq);
    }

    /// pop and return every event whose fire_time <= now, advancing the
    /// clock to the earliest remaining fire_time if the queue becomes
    /// idle before any running context makes progress. P10: an event
    /// drained at time t1 never schedules a predecessor before t0<t1
    /// that fires before the remaining t1 events, since `schedule`
    /// clamps new fire times to `>= now`.
    pub fn pop_ready(&mut self) -> Vec<Event> {
        let mut ready = Vec::new();
        while let Some(Reverse(key)) = self.queue.peek() {
            if key.fire_time > self.now {
                break;
            }
            let Reverse(key) = self.queue.pop().unwrap();
            if let Some(ev) = self.events.remove(&key.seq) {
                ready.push(ev);
            }
        }
        ready
    }

    /// advance `now` by one tick (one guest instruction per running
    /// context, per spec.md §4.1 "Data flow")
    pub fn tick(&mut self) {
        self.now += 1;
    }

    /// jump directly to the next scheduled fire_time, for when every
    /// running context is blocked and nothing would otherwise progress
    pub fn advance_to_next(&mut self) -> Option<u64> {
        let next = self.queue.peek().map(|Reverse(k)| k.fire_time)?;
        if next > self.now {
            self.now = next;
        }
        Some(self.now)
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for EventKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_time_then_insertion_order() {
        let mut es = EventKernel::new();
        es.schedule(EventKind::Wakeup { pid: 1 }, 5);
        es.schedule(EventKind::Wakeup { pid: 2 }, 2);
        es.schedule(EventKind::Wakeup { pid: 3 }, 2);

        es.advance_to_next();
        let ready = es.pop_ready();
        let pids: Vec<_> = ready
            .iter()
            .map(|e| match e.kind {
                EventKind::Wakeup { pid } => pid,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(pids, vec![2, 3]);

        es.advance_to_next();
        let ready = es.pop_ready();
        assert_eq!(ready.len(), 1);
    }

    #[test]
    fn cancel_removes_before_fire() {
        let mut es = EventKernel::new();
        let seq = es.schedule(EventKind::Wakeup { pid: 1 }, 1);
        es.cancel(seq);
        es.advance_to_next();
        assert!(es.pop_ready().is_empty());
    }

    #[test]
    fn schedule_never_fires_before_now_p10() {
        let mut es = EventKernel::new();
        es.schedule(EventKind::Wakeup { pid: 1 }, 10);
        es.advance_to_next();
        es.pop_ready();
        // a later schedule call with an earlier nominal fire_time is
        // clamped to `now`, never resurrecting a time before it
        es.schedule(EventKind::Wakeup { pid: 2 }, 0);
        assert_eq!(es.pop_ready().len(), 1);
    }
}
