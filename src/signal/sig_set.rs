//! 64-entry signal numbering and bitmask sets. Grounded on
//! `NoAxiom/kernel/src/signal/sig_set.rs`'s role, generalized to the
//! Linux i386 numbering spec.md §7 references.

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Signal {
    SIGHUP = 1,
    SIGINT = 2,
    SIGQUIT = 3,
    SIGILL = 4,
    SIGTRAP = 5,
    SIGABRT = 6,
    SIGBUS = 7,
    SIGFPE = 8,
    SIGKILL = 9,
    SIGUSR1 = 10,
    SIGSEGV = 11,
    SIGUSR2 = 12,
    SIGPIPE = 13,
    SIGALRM = 14,
    SIGTERM = 15,
    SIGCHLD = 17,
    SIGCONT = 18,
    SIGSTOP = 19,
    SIGTSTP = 20,
}

impl Signal {
    pub fn from_num(n: u8) -> Option<Signal> {
        use Signal::*;
        Some(match n {
            1 => SIGHUP,
            2 => SIGINT,
            3 => SIGQUIT,
            4 => SIGILL,
            5 => SIGTRAP,
            6 => SIGABRT,
            7 => SIGBUS,
            8 => SIGFPE,
            9 => SIGKILL,
            10 => SIGUSR1,
            11 => SIGSEGV,
            12 => SIGUSR2,
            13 => SIGPIPE,
            14 => SIGALRM,
            15 => SIGTERM,
            17 => SIGCHLD,
            18 => SIGCONT,
            19 => SIGSTOP,
            20 => SIGTSTP,
            _ => return None,
        })
    }
}

/// a fixed 64-bit mask over signal numbers 1..=64 (spec.md §3 "Signal table")
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SigSet(u64);

impl SigSet {
    pub const SIGCHLD: SigSet = SigSet(1 << (Signal::SIGCHLD as u8 - 1));

    pub fn empty() -> Self {
        SigSet(0)
    }

    pub fn all() -> Self {
        SigSet(u64::MAX)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains_signal(self, sig: Signal) -> bool {
        self.0 & (1 << (sig as u8 - 1)) != 0
    }

    pub fn contains(self, other: SigSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn enable(&mut self, sig: Signal) {
        self.0 |= 1 << (sig as u8 - 1);
    }

    /// disable returns an error if the signal was already clear, mirroring
    /// the teacher's fallible `disable` (used so `SigManager::pop_with_mask`
    /// can log an inconsistency rather than silently succeed)
    pub fn disable(&mut self, sig: Signal) -> Result<(), ()> {
        let bit = 1u64 << (sig as u8 - 1);
        if self.0 & bit == 0 {
            return Err(());
        }
        self.0 &= !bit;
        Ok(())
    }

    pub fn remove(&mut self, other: SigSet) {
        self.0 &= !other.0;
    }

    /// raw bitmask, for persisting a mask outside the process (e.g. a
    /// signal-delivery frame saved in guest memory)
    pub fn bits(self) -> u64 {
        self.0
    }
    pub fn from_bits(bits: u64) -> Self {
        SigSet(bits)
    }
}

impl core::ops::BitOr for SigSet {
    type Output = SigSet;
    fn bitor(self, rhs: SigSet) -> SigSet {
        SigSet(self.0 | rhs.0)
    }
}
impl core::ops::BitAnd for SigSet {
    type Output = SigSet;
    fn bitand(self, rhs: SigSet) -> SigSet {
        SigSet(self.0 & rhs.0)
    }
}
impl core::ops::Not for SigSet {
    type Output = SigSet;
    fn not(self) -> SigSet {
        SigSet(!self.0)
    }
}

pub type SigMask = SigSet;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enable_disable_round_trip() {
        let mut s = SigSet::empty();
        s.enable(Signal::SIGUSR1);
        assert!(s.contains_signal(Signal::SIGUSR1));
        s.disable(Signal::SIGUSR1).unwrap();
        assert!(!s.contains_signal(Signal::SIGUSR1));
    }

    #[test]
    fn disable_absent_signal_errors() {
        let mut s = SigSet::empty();
        assert!(s.disable(Signal::SIGUSR1).is_err());
    }
}
