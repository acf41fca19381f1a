//! Miscellaneous identity/TLS syscalls. Grounded on
//! `NoAxiom/kernel/src/syscall/system.rs`'s `uname` handling, extended
//! with `set_thread_area` per spec.md §4.4 ("entry number is forced
//! to 6, matching `CLONE_SETTLS`'s fixed slot").

use crate::env::Environment;
use crate::errno::Errno;
use crate::loader::elf::Machine;
use crate::mm::address::VirtAddr;
use crate::syscall::structs::{read_user_desc, write_user_desc_entry_number, write_utsname};
use crate::syscall::{Outcome, SysResult};
use crate::task::context::{Pid, TlsSegment};
use crate::task::fork::CLONE_SETTLS_ENTRY;

pub fn sys_uname(env: &mut Environment, pid: Pid, buf_ptr: u32) -> SysResult {
    let ctx = env.contexts.get(pid).ok_or(Errno::ESRCH)?;
    let machine = match ctx.loader.machine {
        Machine::Mips => "mips",
        Machine::X86 => "i686",
    };
    let mem = ctx.memory.clone();
    write_utsname(&mut mem.lock().unwrap(), VirtAddr(buf_ptr), machine)?;
    Ok(Outcome::Value(0))
}

/// install a TLS segment directly (rather than through `CLONE_SETTLS`);
/// the entry number is always forced to the fixed slot this simulator
/// uses, and the guest's `user_desc` is updated in place so its caller
/// (glibc's `__set_thread_area`) sees the number it must reload %gs with.
pub fn sys_set_thread_area(env: &mut Environment, pid: Pid, user_desc_ptr: u32) -> SysResult {
    let ctx = env.contexts.get_mut(pid).ok_or(Errno::ESRCH)?;
    let mem = ctx.memory.clone();
    let (_entry_number, base_addr, limit) = read_user_desc(&mem.lock().unwrap(), VirtAddr(user_desc_ptr))?;
    ctx.tls = TlsSegment { base: base_addr, limit };
    write_user_desc_entry_number(&mut mem.lock().unwrap(), VirtAddr(user_desc_ptr), CLONE_SETTLS_ENTRY)?;
    Ok(Outcome::Value(0))
}
