//! Context termination. Grounded on
//! `NoAxiom/kernel/src/task/exit.rs::Task::exit_handler`: clear the
//! child tid and wake a futex waiter on it, deliver SIGCHLD to the
//! group parent, move to zombie; reaping (the `finished` transition)
//! happens when the parent's `waitpid` observes the zombie
//! (spec.md §4.2 "Context termination").

use crate::mm::address::VirtAddr;
use crate::mm::user_ptr::UserPtr;
use crate::signal::sig_info::SigInfo;
use crate::signal::sig_set::Signal;
use crate::task::context::Pid;
use crate::task::futex::{FutexTable, FUTEX_BITSET_MATCH_ANY};
use crate::task::manager::ContextManager;

/// `exit` / `exit_group` / a fatal fault: move `pid` to zombie, clear
/// its child-tid address (waking one futex waiter there), and post
/// SIGCHLD to its group parent if it is a group leader.
pub fn exit_context(mgr: &mut ContextManager, futex: &mut FutexTable, pid: Pid, exit_code: i32) {
    let (clear_tid, group_parent, is_leader) = {
        let ctx = mgr.get(pid).expect("exit: context missing");
        (ctx.clear_child_tid, ctx.group_parent, ctx.group_parent != Some(pid))
    };

    if let Some(tid_addr) = clear_tid {
        if let Some(ctx) = mgr.get(pid) {
            let mem = ctx.memory.clone();
            let _ = UserPtr::<u32>::new(tid_addr).write(&mut mem.lock().unwrap(), 0);
        }
        futex.wake(tid_addr, 1, FUTEX_BITSET_MATCH_ANY);
    }

    mgr.move_to_zombie(pid, exit_code);

    // group leaders report to their parent via SIGCHLD; thread-group
    // members (group_parent == self) are reaped silently by the leader
    if is_leader {
        if let Some(parent) = group_parent {
            if let Some(parent_ctx) = mgr.get_mut(parent) {
                parent_ctx.sig_manager.push(SigInfo { signal: Signal::SIGCHLD, sender_pid: pid });
            }
        }
    }
}

/// `exit_group`: terminate every context sharing this group (thread
/// group members), not just the caller
pub fn exit_group(mgr: &mut ContextManager, futex: &mut FutexTable, leader_pid: Pid, exit_code: i32) {
    let members: Vec<Pid> = mgr
        .running()
        .chain(mgr.suspended())
        .filter(|&pid| {
            pid == leader_pid || mgr.get(pid).map_or(false, |c| c.group_parent == Some(leader_pid))
        })
        .collect();
    for pid in members {
        exit_context(mgr, futex, pid, exit_code);
    }
}

/// `waitpid`: if a zombie child matching `wanted` exists, write its
/// exit code to `status_ptr` and reap it, returning its pid
pub fn try_reap(mgr: &mut ContextManager, parent: Pid, wanted: Option<u32>, status_ptr: Option<VirtAddr>) -> Option<Pid> {
    let child = mgr.zombie_child_of(parent, wanted)?;
    let exit_code = mgr.get(child).and_then(|c| c.exit_code).unwrap_or(0);
    if let Some(ptr) = status_ptr {
        if let Some(parent_ctx) = mgr.get(parent) {
            let mem = parent_ctx.memory.clone();
            let _ = UserPtr::<u32>::new(ptr).write(&mut mem.lock().unwrap(), (exit_code as u32) << 8);
        }
    }
    if let Some(parent_ctx) = mgr.get_mut(parent) {
        parent_ctx.sig_manager.remove_sigchld();
    }
    mgr.reap(child);
    Some(child)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd::table::FdTable;
    use crate::loader::elf::Machine;
    use crate::loader::LoaderMeta;
    use crate::mm::memory_set::MemorySet;
    use crate::signal::sig_action::SigActionTable;
    use std::sync::{Arc, Mutex};

    fn loader() -> Arc<LoaderMeta> {
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

    fn spawn(mgr: &mut ContextManager, group_parent: Option<Pid>) -> Pid {
        let pid = mgr.alloc_pid();
        let mut ctx = crate::task::context::Context::new(
            pid,
            MemorySet::new().into_shared(),
            FdTable::new_with_std_io().into_shared(),
            Arc::new(Mutex::new(SigActionTable::new())),
            loader(),
            VirtAddr(0x400000),
            VirtAddr(0x7fff_fff0),
        );
        ctx.group_parent = group_parent;
        mgr.spawn(ctx);
        pid
    }

    #[test]
    fn exit_delivers_sigchld_to_parent() {
        let mut mgr = ContextManager::new();
        let parent = spawn(&mut mgr, None);
        let child = spawn(&mut mgr, Some(parent));
        let mut futex = FutexTable::new();

        exit_context(&mut mgr, &mut futex, child, 7);
        assert!(mgr.get(parent).unwrap().sig_manager.has_pending_signals(crate::signal::sig_set::SigSet::empty()));
        assert_eq!(mgr.zombies().collect::<Vec<_>>(), vec![child]);
    }

    #[test]
    fn waitpid_reaps_matching_zombie() {
        let mut mgr = ContextManager::new();
        let parent = spawn(&mut mgr, None);
        let child = spawn(&mut mgr, Some(parent));
        let mut futex = FutexTable::new();
        exit_context(&mut mgr, &mut futex, child, 3);

        let reaped = try_reap(&mut mgr, parent, Some(child), None);
        assert_eq!(reaped, Some(child));
        assert!(mgr.get(child).is_none());
    }
}
