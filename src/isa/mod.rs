//! Instruction executor (IX). Per-ISA static dispatch tables map a
//! decoded opcode to a per-opcode execution routine (spec.md §4.3);
//! both supported ISAs share the same register file and VM access
//! surface (`task::regs::Registers`, `mm::memory_set::MemorySet`), so
//! only the decode/execute tables themselves are ISA-specific. Grounded
//! on spec.md §4.3 and §9 "Per-opcode dispatch table" directly — the
//! teacher runs natively on its host architecture and has no userspace
//! ISA interpreter to imitate.

pub mod mips;
pub mod x86;

use crate::loader::elf::Machine;
use crate::mm::address::VirtAddr;
use crate::signal::sig_set::Signal;
use crate::task::context::Context;
use crate::task::state::TaskState;

/// a fault surfaced by instruction execution (spec.md §4.3: "Illegal
/// opcodes, unaligned speculative accesses, and arithmetic faults
/// surface as a fatal error unless the corresponding guest signal
/// handler is installed"). `BadAddress` is a supplementary case spec.md
/// doesn't name explicitly but a real loader/executor needs: a
/// non-speculative access to an unmapped or permission-denied page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    IllegalOpcode(u32),
    UnalignedSpeculative(u32),
    Arithmetic,
    BadAddress(u32),
}

impl Fault {
    /// the guest signal a real kernel would raise for this fault, used
    /// by the environment to decide between signal delivery and a fatal
    /// `SimError::GuestFault` (spec.md §4.3).
    pub fn signal(self) -> Signal {
        match self {
            Fault::IllegalOpcode(_) => Signal::SIGILL,
            Fault::UnalignedSpeculative(_) | Fault::BadAddress(_) => Signal::SIGBUS,
            Fault::Arithmetic => Signal::SIGFPE,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// one instruction executed, PC and target_pc advanced
    Continue,
    /// a `syscall`/`int 0x80` trap was decoded; the environment should
    /// now read `ctx.regs.syscall_num()`/`syscall_args()` and dispatch
    Syscall,
    Fault(Fault),
}

pub fn step(ctx: &mut Context) -> StepOutcome {
    match ctx.loader.machine {
        Machine::Mips => mips::step(ctx),
        Machine::X86 => x86::step(ctx),
    }
}

/// read through the speculative mirror when `SPEC_MODE` is set, else
/// straight from the base address space (spec.md §4.3 "In speculative
/// mode, VM writes go to the speculative mirror").
pub(crate) fn mem_read(ctx: &mut Context, addr: VirtAddr, len: usize) -> Result<Vec<u8>, Fault> {
    let mem = ctx.memory.lock().unwrap();
    let result = if ctx.state.contains(TaskState::SPEC_MODE) {
        ctx.mirror.read(&mem, addr, len)
    } else {
        mem.read(addr, len)
    };
    result.map_err(|_| Fault::BadAddress(addr.0))
}

pub(crate) fn mem_write(ctx: &mut Context, addr: VirtAddr, data: &[u8]) -> Result<(), Fault> {
    let result = if ctx.state.contains(TaskState::SPEC_MODE) {
        let mem = ctx.memory.lock().unwrap();
        ctx.mirror.write(&mem, addr, data)
    } else {
        let mut mem = ctx.memory.lock().unwrap();
        mem.write(addr, data)
    };
    result.map_err(|_| Fault::BadAddress(addr.0))
}

pub(crate) fn fetch_word(ctx: &mut Context, addr: VirtAddr) -> Result<u32, Fault> {
    let bytes = mem_read(ctx, addr, 4)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}
