pub mod address;
pub mod memory_set;
pub mod mirror;
pub mod page;
pub mod perm;
pub mod user_ptr;

pub use address::{VirtAddr, VirtPageNum};
pub use memory_set::{MemorySet, SharedMemory};
pub use perm::PagePermission;
