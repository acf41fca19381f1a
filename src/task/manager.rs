//! Context manager: bookkeeping for the four primary context lists
//! spec.md §3 Context invariant (a) names ({running, suspended, zombie,
//! finished}). Grounded on the role of
//! `NoAxiom/kernel/src/task/manager.rs::TaskManager` (an id-keyed
//! registry) generalized to also own list membership, since this
//! simulator is single-threaded and has no scheduler to delegate
//! runnability to.
//!
//! The *how* a suspended context becomes ready again (host fd poll,
//! elapsed simulated time, futex wake, zombie child) is decided by the
//! caller each tick; this manager only enforces that a context belongs
//! to exactly one list at a time and performs the list transition.

use std::collections::{BTreeMap, VecDeque};

use crate::task::context::{Context, Pid};
use crate::task::state::TaskState;

pub struct ContextManager {
    contexts: BTreeMap<Pid, Context>,
    running: VecDeque<Pid>,
    suspended: Vec<Pid>,
    zombie: Vec<Pid>,
    finished: Vec<Pid>,
    next_pid: Pid,
}

impl ContextManager {
    pub fn new() -> Self {
        Self {
            contexts: BTreeMap::new(),
            running: VecDeque::new(),
            suspended: Vec::new(),
            zombie: Vec::new(),
            finished: Vec::new(),
            next_pid: crate::config::INIT_PROCESS_ID,
        }
    }

    pub fn alloc_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// register a freshly constructed context as runnable
    pub fn spawn(&mut self, ctx: Context) {
        let pid = ctx.pid;
        self.contexts.insert(pid, ctx);
        self.running.push_back(pid);
    }

    pub fn get(&self, pid: Pid) -> Option<&Context> {
        self.contexts.get(&pid)
    }
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Context> {
        self.contexts.get_mut(&pid)
    }

    pub fn running(&self) -> impl Iterator<Item = Pid> + '_ {
        self.running.iter().copied()
    }
    pub fn suspended(&self) -> impl Iterator<Item = Pid> + '_ {
        self.suspended.iter().copied()
    }
    pub fn zombies(&self) -> impl Iterator<Item = Pid> + '_ {
        self.zombie.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty() && self.suspended.is_empty() && self.zombie.is_empty()
    }

    /// move a running context to suspended; the context's own state bits
    /// must already carry SUSPENDED + exactly one cause (`Context::suspend`)
    pub fn move_to_suspended(&mut self, pid: Pid) {
        self.running.retain(|&p| p != pid);
        if !self.suspended.contains(&pid) {
            self.suspended.push(pid);
        }
    }

    /// move a suspended (ready) context back to running
    pub fn wake(&mut self, pid: Pid) {
        self.suspended.retain(|&p| p != pid);
        if let Some(ctx) = self.contexts.get_mut(&pid) {
            ctx.resume();
        }
        if !self.running.contains(&pid) {
            self.running.push_back(pid);
        }
    }

    /// move a running or suspended context to zombie (spec.md §4.2
    /// "Context termination")
    pub fn move_to_zombie(&mut self, pid: Pid, exit_code: i32) {
        self.running.retain(|&p| p != pid);
        self.suspended.retain(|&p| p != pid);
        if let Some(ctx) = self.contexts.get_mut(&pid) {
            ctx.state.remove(TaskState::RUNNING | TaskState::SUSPENDED | TaskState::WAKEUP_CAUSES);
            ctx.state.insert(TaskState::ZOMBIE);
            ctx.exit_code = Some(exit_code);
        }
        if !self.zombie.contains(&pid) {
            self.zombie.push(pid);
        }
    }

    /// reap a zombie whose exit status has been reported to its group
    /// parent: move to finished and drop its context (releasing shared
    /// resources via the last `Arc` reference going out of scope)
    pub fn reap(&mut self, pid: Pid) -> Option<Context> {
        self.zombie.retain(|&p| p != pid);
        self.finished.push(pid);
        self.contexts.remove(&pid)
    }

    pub fn children_of(&self, parent: Pid) -> Vec<Pid> {
        self.contexts
            .values()
            .filter(|c| c.group_parent == Some(parent))
            .map(|c| c.pid)
            .collect()
    }

    pub fn zombie_child_of(&self, parent: Pid, wanted: Option<u32>) -> Option<Pid> {
        self.zombie
            .iter()
            .copied()
            .find(|&pid| {
                let ctx = &self.contexts[&pid];
                ctx.group_parent == Some(parent) && wanted.map_or(true, |w| w == pid)
            })
    }
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd::table::FdTable;
    use crate::loader::elf::Machine;
    use crate::loader::LoaderMeta;
    use crate::mm::address::VirtAddr;
    use crate::mm::memory_set::MemorySet;
    use crate::signal::sig_action::SigActionTable;
    use crate::task::wakeup::WakeupCause;
    use std::sync::{Arc, Mutex};

    fn dummy_loader() -> Arc<LoaderMeta> {
        Arc::new(LoaderMeta {
            argv: vec![],
            envp: vec![],
            interp_path: None,
            cwd: "/".into(),
            stdin_path: None,
            stdout_path: None,
            stack_base: VirtAddr(0),
            stack_top: VirtAddr(0x8000_0000),
            stack_size: 0x80_0000,
            environ_base: VirtAddr(0),
            lowest_addr: VirtAddr(0x400000),
            entry: VirtAddr(0x400000),
            interp_entry: None,
            phdr_base: VirtAddr(0),
            phdr_count: 0,
            random_addr: VirtAddr(0),
            machine: Machine::Mips,
        })
    }

    fn spawn_dummy(mgr: &mut ContextManager) -> Pid {
        let pid = mgr.alloc_pid();
        let ctx = Context::new(
            pid,
            MemorySet::new().into_shared(),
            FdTable::new_with_std_io().into_shared(),
            Arc::new(Mutex::new(SigActionTable::new())),
            dummy_loader(),
            VirtAddr(0x400000),
            VirtAddr(0x7fff_fff0),
        );
        mgr.spawn(ctx);
        pid
    }

    #[test]
    fn suspend_then_wake_round_trip() {
        let mut mgr = ContextManager::new();
        let pid = spawn_dummy(&mut mgr);
        assert_eq!(mgr.running().collect::<Vec<_>>(), vec![pid]);

        mgr.get_mut(pid).unwrap().suspend(TaskState::NANOSLEEP, WakeupCause::Nanosleep { deadline_ns: 5 });
        mgr.move_to_suspended(pid);
        assert!(mgr.running().next().is_none());
        assert_eq!(mgr.suspended().collect::<Vec<_>>(), vec![pid]);

        mgr.wake(pid);
        assert_eq!(mgr.running().collect::<Vec<_>>(), vec![pid]);
        assert!(mgr.get(pid).unwrap().state.contains(TaskState::RUNNING));
    }

    #[test]
    fn zombie_then_reap_removes_context() {
        let mut mgr = ContextManager::new();
        let pid = spawn_dummy(&mut mgr);
        mgr.move_to_zombie(pid, 0);
        assert_eq!(mgr.zombies().collect::<Vec<_>>(), vec![pid]);
        let reaped = mgr.reap(pid);
        assert!(reaped.is_some());
        assert!(mgr.get(pid).is_none());
    }
}
