//! Access-stack arena: one heap-allocated frame per in-flight
//! coherence request, linked to its caller by a plain index rather than
//! a pointer (spec.md §3 "Access stack", §9 "Access stacks as linked
//! parent frames": "implementors should use arena allocation indexed by
//! access-id, with the parent link a plain index"). Grounded on the
//! recycled-index allocator shape of
//! `NoAxiom/kernel/src/task/tid_allocator.rs::TidAllocator`.

use crate::mem_hier::cache::module::MoesiState;

pub type AccessId = usize;
pub type NodeId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Load,
    Store,
    NcStore,
}

/// a per-request record threaded through every coherence event
/// (spec.md §3 "Access stack")
#[derive(Clone, Debug)]
pub struct Frame {
    pub caller: NodeId,
    pub kind: AccessKind,
    pub module: NodeId,
    pub target_module: Option<NodeId>,
    pub address: u32,
    pub tag: u32,
    pub set: usize,
    pub way: usize,
    pub state_read: MoesiState,
    pub dir_lock_holder: bool,
    pub parent: Option<AccessId>,
    pub shared: bool,
    pub error: bool,
    pub eviction: bool,
    pub writeback: bool,
    pub pending_children: u32,
    pub reply_size: u32,
    pub except_node: Option<NodeId>,
    /// original set/way/tag when this frame is an eviction sub-flow at
    /// the lower module
    pub eviction_source: Option<(usize, usize, u32)>,
    pub retries: u32,
}

impl Frame {
    pub fn new(caller: NodeId, kind: AccessKind, module: NodeId, address: u32, parent: Option<AccessId>) -> Self {
        Self {
            caller,
            kind,
            module,
            target_module: None,
            address,
            tag: 0,
            set: 0,
            way: 0,
            state_read: MoesiState::I,
            dir_lock_holder: false,
            parent,
            shared: false,
            error: false,
            eviction: false,
            writeback: false,
            pending_children: 0,
            reply_size: 0,
            except_node: None,
            eviction_source: None,
            retries: 0,
        }
    }
}

/// arena of in-flight access frames, indices recycled on completion
#[derive(Default)]
pub struct AccessStack {
    frames: Vec<Option<Frame>>,
    recycled: Vec<AccessId>,
}

impl AccessStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, frame: Frame) -> AccessId {
        if let Some(id) = self.recycled.pop() {
            self.frames[id] = Some(frame);
            id
        } else {
            self.frames.push(Some(frame));
            self.frames.len() - 1
        }
    }

    pub fn get(&self, id: AccessId) -> &Frame {
        self.frames[id].as_ref().expect("access stack: stale frame id")
    }
    pub fn get_mut(&mut self, id: AccessId) -> &mut Frame {
        self.frames[id].as_mut().expect("access stack: stale frame id")
    }

    /// reclaim the arena slot once the initiator completes (spec.md §9)
    pub fn free(&mut self, id: AccessId) {
        if self.frames[id].is_some() {
            self.frames[id] = None;
            self.recycled.push(id);
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.frames.iter().filter(|f| f.is_some()).count()
    }
}
