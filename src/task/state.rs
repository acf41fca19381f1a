//! Context state bitmap. Grounded on the role of
//! `NoAxiom/kernel/src/task/status.rs::TaskStatus`, generalized from a
//! single enum to a bitmap because a suspended context must also carry
//! which wakeup cause it's suspended on (spec.md §3 Context invariant
//! (b): "suspended ⇒ exactly one wakeup-cause bit is set").

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TaskState: u32 {
        const RUNNING                  = 1 << 0;
        const SPEC_MODE                = 1 << 1;
        const SUSPENDED                = 1 << 2;
        const SIGNAL_HANDLER_ACTIVE    = 1 << 3;
        const SYSCALL_CALLBACK_PENDING = 1 << 4;
        const READ                     = 1 << 5;
        const WRITE                    = 1 << 6;
        const WAITPID                  = 1 << 7;
        const NANOSLEEP                = 1 << 8;
        const FUTEX                    = 1 << 9;
        const ZOMBIE                   = 1 << 10;
        const FINISHED                 = 1 << 11;
    }
}

impl TaskState {
    pub const WAKEUP_CAUSES: TaskState = TaskState::from_bits_truncate(
        Self::READ.bits()
            | Self::WRITE.bits()
            | Self::WAITPID.bits()
            | Self::NANOSLEEP.bits()
            | Self::FUTEX.bits(),
    );

    pub fn wakeup_cause(self) -> Option<TaskState> {
        let cause = self & Self::WAKEUP_CAUSES;
        if cause.bits().count_ones() == 1 {
            Some(cause)
        } else {
            None
        }
    }
}

impl Default for TaskState {
    fn default() -> Self {
        TaskState::RUNNING
    }
}
