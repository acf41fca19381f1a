//! Guest thread context. Grounded on the attribute list in spec.md §3
//! "Context" and on the field layout of `NoAxiom/kernel/src/task/tcb.rs`
//! / `pcb.rs`: per-task state inline, cross-task state behind shared
//! ownership.

use std::sync::Arc;

use std::sync::Mutex;

use crate::fd::table::SharedFdTable;
use crate::loader::LoaderMeta;
use crate::mm::address::VirtAddr;
use crate::mm::memory_set::SharedMemory;
use crate::mm::mirror::SpeculativeMirror;
use crate::signal::sig_action::SigActionTable;
use crate::signal::sig_manager::SigManager;
use crate::signal::sig_set::SigMask;
use crate::task::regs::Registers;
use crate::task::state::TaskState;
use crate::task::wakeup::WakeupCause;

pub type Pid = u32;

/// glibc TLS segment installed by `CLONE_SETTLS` / `set_thread_area`
#[derive(Clone, Copy, Debug, Default)]
pub struct TlsSegment {
    pub base: u32,
    pub limit: u32,
}

pub struct Context {
    pub pid: Pid,
    pub memory: SharedMemory,
    /// exclusively owned per context (spec.md §5 "Resource policy")
    pub mirror: SpeculativeMirror,
    pub regs: Registers,
    pub blocked: SigMask,
    pub sig_manager: SigManager,
    pub sig_actions: Arc<Mutex<SigActionTable>>,
    pub fd_table: SharedFdTable,
    pub loader: Arc<LoaderMeta>,

    pub last_insn_addr: VirtAddr,
    pub current_insn_addr: VirtAddr,
    pub target_insn_addr: VirtAddr,
    pub last_effective_addr: VirtAddr,

    pub state: TaskState,
    pub group_parent: Option<Pid>,
    pub exit_signal: Option<u8>,
    pub clear_child_tid: Option<VirtAddr>,
    pub wakeup: Option<WakeupCause>,
    pub tls: TlsSegment,

    pub exit_code: Option<i32>,
}

impl Context {
    pub fn new(
        pid: Pid,
        memory: SharedMemory,
        fd_table: SharedFdTable,
        sig_actions: Arc<Mutex<SigActionTable>>,
        loader: Arc<LoaderMeta>,
        entry: VirtAddr,
        sp: VirtAddr,
    ) -> Self {
        Self {
            pid,
            memory,
            mirror: SpeculativeMirror::new(),
            regs: Registers::new(entry.0, sp.0),
            blocked: SigMask::empty(),
            sig_manager: SigManager::new(),
            sig_actions,
            fd_table,
            loader,
            last_insn_addr: entry,
            current_insn_addr: entry,
            target_insn_addr: entry,
            last_effective_addr: VirtAddr(0),
            state: TaskState::RUNNING,
            group_parent: None,
            exit_signal: None,
            clear_child_tid: None,
            wakeup: None,
            tls: TlsSegment::default(),
            exit_code: None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.state.contains(TaskState::SUSPENDED)
    }

    pub fn is_zombie(&self) -> bool {
        self.state.contains(TaskState::ZOMBIE)
    }

    pub fn is_finished(&self) -> bool {
        self.state.contains(TaskState::FINISHED)
    }

    /// suspend with a single wakeup cause, per spec.md §3 Context
    /// invariant (b)
    pub fn suspend(&mut self, cause_bit: TaskState, cause: WakeupCause) {
        self.state.remove(TaskState::RUNNING);
        self.state.insert(TaskState::SUSPENDED | cause_bit);
        self.wakeup = Some(cause);
    }

    /// clear suspension and any cause bit, returning to running
    pub fn resume(&mut self) {
        self.state.remove(TaskState::SUSPENDED | TaskState::WAKEUP_CAUSES);
        self.state.insert(TaskState::RUNNING);
        self.wakeup = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd::table::FdTable;
    use crate::loader::elf::Machine;
    use crate::mm::memory_set::MemorySet;

    fn dummy_loader() -> LoaderMeta {
        LoaderMeta {
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
        }
    }

    #[test]
    fn suspend_then_resume_clears_cause() {
        let mut ctx = Context::new(
            1,
            MemorySet::new().into_shared(),
            FdTable::new_with_std_io().into_shared(),
            Arc::new(Mutex::new(SigActionTable::new())),
            Arc::new(dummy_loader()),
            VirtAddr(0x400000),
            VirtAddr(0x7fff_fff0),
        );
        ctx.suspend(TaskState::NANOSLEEP, WakeupCause::Nanosleep { deadline_ns: 10 });
        assert!(ctx.is_suspended());
        assert_eq!(ctx.state.wakeup_cause(), Some(TaskState::NANOSLEEP));

        ctx.resume();
        assert!(!ctx.is_suspended());
        assert!(ctx.state.contains(TaskState::RUNNING));
    }
}
