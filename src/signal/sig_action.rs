//! Per-signal handler record. Grounded on
//! `NoAxiom/kernel/src/signal/sig_action.rs`'s role (spec.md §3
//! "Signal table": "A fixed 64-entry mapping from signal number to
//! handler record").

use crate::mm::address::VirtAddr;
use crate::signal::sig_set::SigSet;

pub const SIG_DFL: u32 = 0;
pub const SIG_IGN: u32 = 1;

#[derive(Copy, Clone, Debug)]
pub struct SigAction {
    pub entry: VirtAddr,
    pub flags: u32,
    pub restorer: VirtAddr,
    pub mask_during_handler: SigSet,
}

impl Default for SigAction {
    fn default() -> Self {
        Self {
            entry: VirtAddr(SIG_DFL),
            flags: 0,
            restorer: VirtAddr(0),
            mask_during_handler: SigSet::empty(),
        }
    }
}

impl SigAction {
    pub fn is_default(&self) -> bool {
        self.entry.0 == SIG_DFL
    }
    pub fn is_ignored(&self) -> bool {
        self.entry.0 == SIG_IGN
    }
    pub fn is_installed(&self) -> bool {
        !self.is_default() && !self.is_ignored()
    }
}

/// a fixed 64-entry table shared among a thread group
/// (spec.md §3 "shared signal-handler table")
#[derive(Clone)]
pub struct SigActionTable {
    table: [SigAction; 64],
}

impl SigActionTable {
    pub fn new() -> Self {
        Self { table: [SigAction::default(); 64] }
    }

    pub fn get(&self, num: u8) -> SigAction {
        self.table[(num as usize - 1).min(63)]
    }

    pub fn set(&mut self, num: u8, action: SigAction) {
        self.table[(num as usize - 1).min(63)] = action;
    }
}

impl Default for SigActionTable {
    fn default() -> Self {
        Self::new()
    }
}
