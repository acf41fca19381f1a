//! Entry point: load a guest ELF binary and run it to completion on
//! the event-driven simulator core (spec.md §1-§2 "Data flow"). The
//! CLI surface itself is out of scope (spec.md §1 "command-line
//! parsing ... is out of scope"), so argument handling here is the
//! minimum needed to point the loader at a binary and hand it argv
//! before handing off to `Environment::run_until_idle`.

mod config;
mod env;
mod errno;
mod event;
mod fd;
mod flags;
mod isa;
mod loader;
mod mem_hier;
mod mm;
mod signal;
mod syscall;
mod task;

use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use env::Environment;
use errno::SimError;
use fd::table::FdTable;
use loader::load_program;
use signal::sig_action::SigActionTable;
use task::context::Context;

fn spawn_init(env: &mut Environment, path: &str, argv: Vec<String>) -> Result<(), SimError> {
    let envp: Vec<String> = std::env::vars().map(|(k, v)| format!("{k}={v}")).collect();
    let program = load_program(path, argv, envp)?;

    let pid = env.contexts.alloc_pid();
    let entry = program.meta.entry;
    let sp = program.entry_sp;
    let mut ctx = Context::new(
        pid,
        program.memory.into_shared(),
        FdTable::new_with_std_io().into_shared(),
        Arc::new(Mutex::new(SigActionTable::new())),
        Arc::new(program.meta),
        entry,
        sp,
    );
    ctx.group_parent = Some(pid);
    env.contexts.spawn(ctx);
    Ok(())
}

fn fatal(e: SimError) -> ! {
    eprintln!("emusim: fatal: {e}");
    std::process::exit(1);
}

fn main() -> ExitCode {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let Some(path) = args.next() else {
        eprintln!("usage: emusim <guest-elf> [args...]");
        return ExitCode::from(2);
    };
    let mut argv = vec![path.clone()];
    argv.extend(args);

    let mut env = Environment::new();
    if let Err(e) = spawn_init(&mut env, &path, argv) {
        fatal(e);
    }

    match env.run_until_idle() {
        Ok(code) => ExitCode::from((code & 0xff) as u8),
        Err(e) => fatal(e),
    }
}

/// End-to-end scenario tests (spec.md §8): each assembles a full
/// `Environment` by hand (no ELF on disk to load) and drives it
/// through `run_until_idle`/the syscall dispatcher directly, the way
/// `main` does. Kept here rather than under `tests/` since the crate
/// has no `[lib]` target for an external harness to link against.
#[cfg(test)]
mod scenario_tests {
    use std::os::fd::IntoRawFd;
    use std::sync::{Arc, Mutex};

    use fd::table::{FdEntry, FdKind, FdTable};
    use loader::elf::Machine;
    use loader::LoaderMeta;
    use mm::address::VirtAddr;
    use mm::memory_set::MemorySet;
    use mm::perm::PagePermission;
    use signal::sig_action::SigActionTable;
    use task::context::Context;
    use task::futex::FUTEX_BITSET_MATCH_ANY;

    use super::*;

    const OP_ADDIU: u32 = 0x09;
    const OP_ORI: u32 = 0x0d;
    const FN_SYSCALL: u32 = 0x0c;

    fn addiu(rt: u32, imm: u32) -> u32 {
        (OP_ADDIU << 26) | (rt << 16) | (imm & 0xffff)
    }
    fn ori(rt: u32, imm: u32) -> u32 {
        (OP_ORI << 26) | (rt << 16) | (imm & 0xffff)
    }
    fn syscall_insn() -> u32 {
        FN_SYSCALL
    }

    fn dummy_loader(entry: VirtAddr) -> LoaderMeta {
        LoaderMeta {
            argv: vec![],
            envp: vec![],
            interp_path: None,
            cwd: "/".into(),
            stdin_path: None,
            stdout_path: None,
            stack_base: VirtAddr(0),
            stack_top: VirtAddr(0x2000),
            stack_size: 0x1000,
            environ_base: VirtAddr(0),
            lowest_addr: VirtAddr(0x1000),
            entry,
            interp_entry: None,
            phdr_base: VirtAddr(0),
            phdr_count: 0,
            random_addr: VirtAddr(0),
            machine: Machine::Mips,
        }
    }

    fn spawn_context(env: &mut Environment, mem: MemorySet, fd_table: FdTable, entry: VirtAddr, sp: VirtAddr) -> task::context::Pid {
        let pid = env.contexts.alloc_pid();
        let mut ctx = Context::new(
            pid,
            mem.into_shared(),
            fd_table.into_shared(),
            Arc::new(Mutex::new(SigActionTable::new())),
            Arc::new(dummy_loader(entry)),
            entry,
            sp,
        );
        ctx.group_parent = Some(pid);
        env.contexts.spawn(ctx);
        pid
    }

    /// scenario 1: a hand-assembled MIPS program writes "hi\n" to fd 1
    /// and exits 0; the simulator's own exit code mirrors the init
    /// context's exit status.
    #[test]
    fn hello_world_writes_and_exits() {
        let mut mem = MemorySet::new();
        mem.map(VirtAddr(0x1000), VirtAddr(0x3000), PagePermission::READ | PagePermission::WRITE | PagePermission::EXEC, None);
        mem.write(VirtAddr(0x1100), b"hi\n").unwrap();

        let mut pc = 0x1000u32;
        let mut put = |mem: &mut MemorySet, word: u32| {
            mem.write(VirtAddr(pc), &word.to_le_bytes()).unwrap();
            pc += 4;
        };
        put(&mut mem, addiu(4, 1)); // $a0 = 1 (stdout)
        put(&mut mem, ori(5, 0x1100)); // $a1 = &"hi\n"
        put(&mut mem, addiu(6, 3)); // $a2 = 3
        put(&mut mem, addiu(2, 4)); // $v0 = NR_WRITE
        put(&mut mem, syscall_insn());
        put(&mut mem, addiu(4, 0)); // $a0 = 0 (exit code)
        put(&mut mem, addiu(2, 1)); // $v0 = NR_EXIT
        put(&mut mem, syscall_insn());

        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        let mut fd_table = FdTable::new_with_std_io();
        fd_table.close(1).unwrap();
        let inserted = fd_table.insert(FdEntry {
            kind: FdKind::Pipe,
            host_fd: write_fd.into_raw_fd(),
            path: "<pipe>".into(),
            flags: 0,
        });
        assert_eq!(inserted, 1);

        let mut env = Environment::new();
        let pid = spawn_context(&mut env, mem, fd_table, VirtAddr(0x1000), VirtAddr(0x2ff0));
        assert_eq!(pid, crate::config::INIT_PROCESS_ID);

        let code = env.run_until_idle().unwrap();
        assert_eq!(code, 0);

        let mut out = [0u8; 3];
        nix::unistd::read(&read_fd, &mut out).unwrap();
        assert_eq!(&out, b"hi\n");
    }

    /// scenario 2: the heap grows on request and shrinks back, driven
    /// straight through the syscall dispatcher rather than real ISA
    /// execution (brk has no interesting instruction-level behavior).
    #[test]
    fn brk_grows_and_shrinks_heap() {
        let mut mem = MemorySet::new();
        mem.map(VirtAddr(0x1000), VirtAddr(0x2000), PagePermission::READ | PagePermission::WRITE, None);

        let mut env = Environment::new();
        let pid = spawn_context(&mut env, mem, FdTable::new_with_std_io(), VirtAddr(0x1000), VirtAddr(0x1ff0));

        syscall::dispatch(&mut env, pid, syscall::numbers::NR_BRK, [0x2000, 0, 0, 0, 0, 0]).unwrap();
        let grown = env.contexts.get(pid).unwrap().regs.ret();
        assert_eq!(grown, 0x2000);

        syscall::dispatch(&mut env, pid, syscall::numbers::NR_BRK, [0x3000, 0, 0, 0, 0, 0]).unwrap();
        let after_grow = env.contexts.get(pid).unwrap().regs.ret();
        assert_eq!(after_grow, 0x3000);

        syscall::dispatch(&mut env, pid, syscall::numbers::NR_BRK, [0x2000, 0, 0, 0, 0, 0]).unwrap();
        let after_shrink = env.contexts.get(pid).unwrap().regs.ret();
        assert_eq!(after_shrink, 0x2000);
    }

    /// scenario 3: a `CLONE_VM` child shares the parent's address space
    /// and the two synchronize through a futex word rather than racing
    /// an unmodeled atomic instruction (the supported MIPS subset has
    /// no LL/SC) -- the parent writes the shared counter then wakes the
    /// waiter, which observes the write through the same `MemorySet`.
    #[test]
    fn clone_shares_memory_and_futex_wakes_waiter() {
        let mut mem = MemorySet::new();
        mem.map(VirtAddr(0x1000), VirtAddr(0x3000), PagePermission::READ | PagePermission::WRITE | PagePermission::EXEC, None);
        mem.write(VirtAddr(0x2000), &0u32.to_le_bytes()).unwrap();

        let mut env = Environment::new();
        let parent = spawn_context(&mut env, mem, FdTable::new_with_std_io(), VirtAddr(0x1000), VirtAddr(0x2ff0));

        let clone_flags = (flags::CloneFlags::CLONE_VM
            | flags::CloneFlags::CLONE_FS
            | flags::CloneFlags::CLONE_FILES
            | flags::CloneFlags::CLONE_SIGHAND)
            .bits();
        let outcome = syscall::process::sys_clone(&mut env, parent, [clone_flags, 0x2ff0, 0, 0, 0, 0]).unwrap();
        let child = match outcome {
            syscall::Outcome::Value(pid) => pid as task::context::Pid,
            _ => panic!("clone did not complete synchronously"),
        };
        assert_ne!(child, parent);

        // child waits for the counter to become non-zero
        let wait = syscall::futex_syscall::sys_futex(&mut env, child, [0x2000, 0, 0, 0, 0, 0]);
        assert!(matches!(wait, Ok(syscall::Outcome::Suspended)));
        assert!(env.contexts.get(child).unwrap().is_suspended());

        env.poll_suspended();
        assert!(env.contexts.get(child).unwrap().is_suspended(), "no writer yet, waiter must stay parked");

        // parent updates the shared word and wakes the waiter
        {
            let mem = env.contexts.get(parent).unwrap().memory.clone();
            mem.lock().unwrap().write(VirtAddr(0x2000), &7u32.to_le_bytes()).unwrap();
        }
        let woken = env.futex.wake(VirtAddr(0x2000), 1, FUTEX_BITSET_MATCH_ANY);
        assert_eq!(woken, vec![child]);

        env.poll_suspended();
        let child_ctx = env.contexts.get(child).unwrap();
        assert!(!child_ctx.is_suspended());
        let seen = child_ctx.memory.clone();
        let word = seen.lock().unwrap().read(VirtAddr(0x2000), 4).unwrap();
        assert_eq!(u32::from_le_bytes(word.try_into().unwrap()), 7, "CLONE_VM child must see the parent's write");
    }

    /// scenario 4: a blocked `read` stays suspended until data actually
    /// arrives on the underlying descriptor, then the per-tick poll
    /// delivers it and resumes the context.
    #[test]
    fn blocking_read_wakes_once_data_arrives() {
        let mut mem = MemorySet::new();
        mem.map(VirtAddr(0x1000), VirtAddr(0x3000), PagePermission::READ | PagePermission::WRITE | PagePermission::EXEC, None);

        let (read_fd, write_fd) = nix::unistd::pipe().unwrap();
        let mut fd_table = FdTable::new_with_std_io();
        let inserted = fd_table.insert(FdEntry {
            kind: FdKind::Pipe,
            host_fd: read_fd.into_raw_fd(),
            path: "<pipe>".into(),
            flags: 0,
        });

        let mut env = Environment::new();
        let pid = spawn_context(&mut env, mem, fd_table, VirtAddr(0x1000), VirtAddr(0x2ff0));

        let buf_addr = 0x1800u32;
        let outcome = syscall::fs::sys_read(&mut env, pid, inserted, buf_addr, 5).unwrap();
        assert!(matches!(outcome, syscall::Outcome::Suspended));
        assert!(env.contexts.get(pid).unwrap().is_suspended());

        env.poll_suspended();
        assert!(env.contexts.get(pid).unwrap().is_suspended(), "nothing written yet");

        nix::unistd::write(&write_fd, b"abc").unwrap();
        env.poll_suspended();

        let ctx = env.contexts.get(pid).unwrap();
        assert!(!ctx.is_suspended());
        assert_eq!(ctx.regs.ret(), 3);
        let mem = ctx.memory.clone();
        let bytes = mem.lock().unwrap().read(VirtAddr(buf_addr), 3).unwrap();
        assert_eq!(&bytes, b"abc");
    }
}
