pub mod delivery;
pub mod sig_action;
pub mod sig_info;
pub mod sig_manager;
pub mod sig_set;

pub use sig_action::{SigAction, SigActionTable, SIG_DFL, SIG_IGN};
pub use sig_info::SigInfo;
pub use sig_manager::SigManager;
pub use sig_set::{SigMask, SigSet, Signal};
