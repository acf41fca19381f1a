pub mod event;
pub mod kernel;

pub use event::{Event, EventKind};
pub use kernel::EventKernel;
