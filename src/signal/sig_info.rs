//! A queued, pending signal instance. Grounded on
//! `NoAxiom/kernel/src/signal/sig_info.rs`.

use crate::signal::sig_set::Signal;

#[derive(Copy, Clone, Debug)]
pub struct SigInfo {
    pub signal: Signal,
    pub sender_pid: u32,
}
