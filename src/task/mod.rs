pub mod context;
pub mod exit;
pub mod fork;
pub mod futex;
pub mod manager;
pub mod regs;
pub mod signal_dispatch;
pub mod state;
pub mod wakeup;
pub mod wakeup_poll;

pub use context::{Context, Pid};
pub use manager::ContextManager;
pub use state::TaskState;
