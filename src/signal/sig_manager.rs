//! Pending-signal queue for a context. Adapted closely from
//! `NoAxiom/kernel/src/signal/sig_manager.rs`: even if a signal is
//! masked, it stays queued and is delivered once unmasked.

use std::collections::VecDeque;

use crate::signal::sig_info::SigInfo;
use crate::signal::sig_set::{SigMask, SigSet, Signal};

pub struct SigManager {
    pub queue: VecDeque<SigInfo>,
    pub pending_set: SigSet,
}

impl SigManager {
    pub fn new() -> Self {
        Self { queue: VecDeque::new(), pending_set: SigSet::empty() }
    }

    pub fn push(&mut self, sig_info: SigInfo) {
        if !self.pending_set.contains_signal(sig_info.signal) {
            self.pending_set.enable(sig_info.signal);
            self.queue.push_back(sig_info);
        }
    }

    pub fn pop_with_mask(&mut self, mask: SigMask) -> Option<SigInfo> {
        let accept_set = self.pending_set & !mask;
        if accept_set.is_empty() {
            return None;
        }
        for i in 0..self.queue.len() {
            if accept_set.contains_signal(self.queue[i].signal) {
                let _ = self.pending_set.disable(self.queue[i].signal).inspect_err(|_| {
                    log::error!("disable signal failed, signal: {:?}", self.queue[i].signal);
                });
                return self.queue.remove(i);
            }
        }
        log::error!("[pop_with_mask] signal not found");
        None
    }

    pub fn has_pending_signals(&self, mask: SigMask) -> bool {
        !((!mask & self.pending_set).is_empty())
    }

    /// used by `wait4`/`waitpid`: a zombie child's SIGCHLD must not
    /// linger once reaped
    pub fn remove_sigchld(&mut self) {
        if self.pending_set.contains(SigSet::SIGCHLD) {
            self.pending_set.remove(SigSet::SIGCHLD);
            self.queue.retain(|si| si.signal != Signal::SIGCHLD);
        }
    }
}

impl Default for SigManager {
    fn default() -> Self {
        Self::new()
    }
}
