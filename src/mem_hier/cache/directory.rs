//! Per-block directory metadata. Grounded on spec.md §3 "Directory":
//! attached to a module, one record per set × way × sub-block of
//! granularity `min_block_size`. A FIFO lock serializes conflicting
//! accesses to the same block (§4.5); non-blocking callers fail
//! instead of enqueueing (§4.6 "Error and retry").

use std::collections::VecDeque;

use crate::mem_hier::cache::access_stack::{AccessId, NodeId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirLockError {
    Locked,
}

#[derive(Default, Clone, Debug)]
pub struct DirLock {
    holder: Option<AccessId>,
    waiters: VecDeque<AccessId>,
}

impl DirLock {
    pub fn is_free(&self) -> bool {
        self.holder.is_none()
    }

    /// non-blocking acquire: fail immediately rather than enqueue
    /// (spec.md §4.5 "non-blocking callers receive error instead of enqueueing")
    pub fn try_acquire(&mut self, access: AccessId) -> Result<(), DirLockError> {
        if self.holder.is_some() {
            return Err(DirLockError::Locked);
        }
        self.holder = Some(access);
        Ok(())
    }

    /// blocking acquire: enqueue FIFO if held
    pub fn acquire_or_enqueue(&mut self, access: AccessId) -> bool {
        if self.holder.is_none() {
            self.holder = Some(access);
            true
        } else {
            self.waiters.push_back(access);
            false
        }
    }

    /// release the lock, handing it to the next FIFO waiter if any;
    /// returns the access that now holds it, if any
    pub fn release(&mut self, access: AccessId) -> Option<AccessId> {
        if self.holder == Some(access) {
            self.holder = self.waiters.pop_front();
        }
        self.holder
    }
}

/// one sub-block's sharer/owner record (spec.md §3 "Directory")
#[derive(Clone, Debug, Default)]
pub struct DirEntry {
    /// bitmask over upper-level node ids
    pub sharers: u64,
    pub owner: Option<NodeId>,
    pub lock: DirLock,
}

impl DirEntry {
    pub fn add_sharer(&mut self, node: NodeId) {
        self.sharers |= 1 << node;
    }
    pub fn remove_sharer(&mut self, node: NodeId) {
        self.sharers &= !(1 << node);
    }
    pub fn is_sharer(&self, node: NodeId) -> bool {
        self.sharers & (1 << node) != 0
    }
    pub fn sharer_count(&self) -> u32 {
        self.sharers.count_ones()
    }
    pub fn sharer_nodes(&self) -> Vec<NodeId> {
        (0..64).filter(|&n| self.is_sharer(n)).collect()
    }
    pub fn clear(&mut self) {
        self.sharers = 0;
        self.owner = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_fifo_among_waiters() {
        let mut lock = DirLock::default();
        assert!(lock.acquire_or_enqueue(1));
        assert!(!lock.acquire_or_enqueue(2));
        assert!(!lock.acquire_or_enqueue(3));
        assert_eq!(lock.release(1), Some(2));
        assert_eq!(lock.release(2), Some(3));
    }

    #[test]
    fn try_acquire_fails_when_held() {
        let mut lock = DirLock::default();
        lock.try_acquire(1).unwrap();
        assert_eq!(lock.try_acquire(2), Err(DirLockError::Locked));
    }

    #[test]
    fn sharer_bitmask_round_trip() {
        let mut entry = DirEntry::default();
        entry.add_sharer(0);
        entry.add_sharer(1);
        assert_eq!(entry.sharer_count(), 2);
        entry.remove_sharer(0);
        assert!(!entry.is_sharer(0));
        assert!(entry.is_sharer(1));
    }
}
