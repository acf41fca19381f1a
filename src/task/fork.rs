//! `clone` semantics. Grounded on the resource-sharing decisions in
//! `NoAxiom/kernel/src/task/fork.rs::Task::fork` (share vs. deep-clone
//! memory/fd-table/signal-handlers by flag), generalized to the exact
//! CLONE_* combination rules spec.md §4.4 mandates.

use std::sync::{Arc, Mutex};

use crate::errno::SimError;
use crate::flags::CloneFlags;
use crate::mm::address::VirtAddr;
use crate::mm::user_ptr::UserPtr;
use crate::task::context::{Context, Pid, TlsSegment};
use crate::task::manager::ContextManager;

pub struct CloneRequest {
    pub flags: CloneFlags,
    pub new_sp: Option<VirtAddr>,
    pub parent_tid_ptr: Option<VirtAddr>,
    pub child_tid_ptr: Option<VirtAddr>,
    pub tls: Option<TlsSegment>,
}

/// the fixed TLS segment index `CLONE_SETTLS` installs into
/// (spec.md §4.4 "entry number is forced to 6")
pub const CLONE_SETTLS_ENTRY: u32 = 6;

/// clone `parent_pid` into a new context per `req`, registering it with
/// `mgr`. Returns the child pid, or a fatal error if CLONE_VM is set
/// without its required companions.
pub fn clone_context(mgr: &mut ContextManager, parent_pid: Pid, req: CloneRequest) -> Result<Pid, SimError> {
    let required_with_vm =
        CloneFlags::CLONE_FS | CloneFlags::CLONE_FILES | CloneFlags::CLONE_SIGHAND;
    if req.flags.contains(CloneFlags::CLONE_VM) && !req.flags.contains(required_with_vm) {
        return Err(SimError::UnsupportedFlag {
            syscall: "clone",
            detail: "CLONE_VM requires CLONE_FS|CLONE_FILES|CLONE_SIGHAND".to_string(),
        });
    }

    let child_pid = mgr.alloc_pid();

    let (memory, fd_table, sig_actions, loader, parent_sp) = {
        let parent = mgr.get(parent_pid).expect("clone: parent context missing");
        let memory = if req.flags.contains(CloneFlags::CLONE_VM) {
            parent.memory.clone()
        } else {
            parent.memory.lock().unwrap().fork().into_shared()
        };
        let fd_table = if req.flags.contains(CloneFlags::CLONE_FILES) {
            parent.fd_table.clone()
        } else {
            parent.fd_table.lock().unwrap().fork().into_shared()
        };
        let sig_actions = if req.flags.contains(CloneFlags::CLONE_SIGHAND) {
            parent.sig_actions.clone()
        } else {
            Arc::new(Mutex::new(parent.sig_actions.lock().unwrap().clone()))
        };
        (memory, fd_table, sig_actions, parent.loader.clone(), parent.regs.sp())
    };

    let child_sp = req.new_sp.map(|a| a.0).unwrap_or(parent_sp);
    let entry = mgr.get(parent_pid).unwrap().regs.pc;
    let mut child = Context::new(
        child_pid,
        memory,
        fd_table,
        sig_actions,
        loader,
        VirtAddr(entry),
        VirtAddr(child_sp),
    );
    child.regs = mgr.get(parent_pid).unwrap().regs;
    child.regs.set_sp(child_sp);
    child.regs.set_ret(0); // child's return-register = 0 (spec.md §4.4)

    child.group_parent = if req.flags.contains(CloneFlags::CLONE_THREAD) {
        Some(mgr.get(parent_pid).unwrap().group_parent.unwrap_or(parent_pid))
    } else if req.flags.contains(CloneFlags::CLONE_PARENT) {
        mgr.get(parent_pid).unwrap().group_parent
    } else {
        Some(parent_pid)
    };
    child.exit_signal = if req.flags.contains(CloneFlags::CLONE_THREAD) { None } else { Some(17) }; // SIGCHLD

    if req.flags.contains(CloneFlags::CLONE_CHILD_CLEARTID) {
        child.clear_child_tid = req.child_tid_ptr;
    }
    if let Some(tls) = req.tls {
        if req.flags.contains(CloneFlags::CLONE_SETTLS) {
            child.tls = tls;
        }
    }

    if req.flags.contains(CloneFlags::CLONE_PARENT_SETTID) {
        if let Some(ptr) = req.parent_tid_ptr {
            let parent = mgr.get_mut(parent_pid).unwrap();
            let mem = parent.memory.clone();
            let _ = UserPtr::<u32>::new(ptr).write(&mut mem.lock().unwrap(), child_pid);
        }
    }
    if req.flags.contains(CloneFlags::CLONE_CHILD_SETTID) {
        if let Some(ptr) = req.child_tid_ptr {
            let _ = UserPtr::<u32>::new(ptr).write(&mut child.memory.lock().unwrap(), child_pid);
        }
    }

    mgr.spawn(child);
    // parent returns the child pid (spec.md §4.4); caller writes this
    // into the parent's return register.
    Ok(child_pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd::table::FdTable;
    use crate::loader::elf::Machine;
    use crate::loader::LoaderMeta;
    use crate::mm::memory_set::MemorySet;
    use crate::signal::sig_action::SigActionTable;

    fn seeded_manager() -> (ContextManager, Pid) {
        let mut mgr = ContextManager::new();
        let pid = mgr.alloc_pid();
        let loader = Arc::new(LoaderMeta {
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
        });
        let ctx = Context::new(
            pid,
            MemorySet::new().into_shared(),
            FdTable::new_with_std_io().into_shared(),
            Arc::new(Mutex::new(SigActionTable::new())),
            loader,
            VirtAddr(0x400000),
            VirtAddr(0x7fff_fff0),
        );
        mgr.spawn(ctx);
        (mgr, pid)
    }

    #[test]
    fn clone_vm_without_companions_is_fatal() {
        let (mut mgr, parent) = seeded_manager();
        let req = CloneRequest {
            flags: CloneFlags::CLONE_VM,
            new_sp: None,
            parent_tid_ptr: None,
            child_tid_ptr: None,
            tls: None,
        };
        assert!(clone_context(&mut mgr, parent, req).is_err());
    }

    #[test]
    fn clone_vm_shares_memory_p7() {
        let (mut mgr, parent) = seeded_manager();
        let req = CloneRequest {
            flags: CloneFlags::CLONE_VM | CloneFlags::CLONE_FS | CloneFlags::CLONE_FILES | CloneFlags::CLONE_SIGHAND,
            new_sp: None,
            parent_tid_ptr: None,
            child_tid_ptr: None,
            tls: None,
        };
        let child = clone_context(&mut mgr, parent, req).unwrap();
        mgr.get(child).unwrap().memory.lock().unwrap().map(
            VirtAddr(0x9000),
            VirtAddr(0xa000),
            crate::mm::perm::PagePermission::READ | crate::mm::perm::PagePermission::WRITE,
            None,
        );
        mgr.get(child).unwrap().memory.lock().unwrap().write(VirtAddr(0x9000), &[42]).unwrap();
        assert_eq!(mgr.get(parent).unwrap().memory.lock().unwrap().read(VirtAddr(0x9000), 1).unwrap(), vec![42]);
    }

    #[test]
    fn clone_child_returns_zero() {
        let (mut mgr, parent) = seeded_manager();
        let req = CloneRequest {
            flags: CloneFlags::empty(),
            new_sp: None,
            parent_tid_ptr: None,
            child_tid_ptr: None,
            tls: None,
        };
        let child = clone_context(&mut mgr, parent, req).unwrap();
        assert_eq!(mgr.get(child).unwrap().regs.ret(), 0);
    }
}
