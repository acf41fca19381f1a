pub mod link;

pub use link::{Link, Message, MessageKind};
