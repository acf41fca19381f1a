pub mod access_stack;
pub mod directory;
pub mod module;

pub use access_stack::{AccessId, AccessKind, AccessStack, Frame, NodeId};
pub use directory::{DirEntry, DirLock, DirLockError};
pub use module::{CacheModule, Line, ModuleBacking, ModuleStats, MoesiState};
