//! Synthetic signal-handler call frame construction and restore.
//! Grounded on the stack-building style of `loader::stack::build_stack`
//! and on spec.md §4.2: "push a signal-return trampoline address and a
//! saved-state record onto the guest stack, set PC to the handler
//! entry, OR the handler's mask into the blocked set. The `sigreturn`
//! syscall restores from the frame."

use crate::mm::address::VirtAddr;
use crate::mm::memory_set::MemorySet;
use crate::signal::sig_action::SigAction;
use crate::signal::sig_info::SigInfo;
use crate::signal::sig_set::SigMask;
use crate::task::regs::Registers;

/// Saved on the guest stack immediately below the handler's frame so
/// `sigreturn` can recover it without any side-channel state.
/// 32 gprs + pc + target_pc + hi + lo (4 words) + mask (2 words) + restorer (1 word)
fn frame_size() -> u32 {
    (32 + 4 + 2 + 1) * 4
}

/// Construct a signal-delivery frame on `sp`, mutate `regs` to enter
/// the handler, and return the new stack pointer. `old_mask` is the
/// mask in effect before the handler's own `mask_during_handler` is
/// applied; it is saved in the frame so `sigreturn` restores it.
pub fn push_signal_frame(
    mem: &mut MemorySet,
    regs: &mut Registers,
    action: &SigAction,
    info: &SigInfo,
    old_mask: SigMask,
) -> VirtAddr {
    let mut sp = regs.sp() & !0xf;
    sp -= frame_size();
    let frame_base = sp;

    for (i, v) in regs.gpr.iter().enumerate() {
        mem.write(VirtAddr(frame_base + (i as u32) * 4), &v.to_le_bytes()).expect("sigframe write");
    }
    let tail = frame_base + 32 * 4;
    mem.write(VirtAddr(tail), &regs.pc.to_le_bytes()).expect("sigframe write");
    mem.write(VirtAddr(tail + 4), &regs.target_pc.to_le_bytes()).expect("sigframe write");
    mem.write(VirtAddr(tail + 8), &regs.hi.to_le_bytes()).expect("sigframe write");
    mem.write(VirtAddr(tail + 12), &regs.lo.to_le_bytes()).expect("sigframe write");
    mem.write(VirtAddr(tail + 16), &old_mask.bits().to_le_bytes()).expect("sigframe write");
    mem.write(VirtAddr(tail + 24), &action.restorer.0.to_le_bytes()).expect("sigframe write");

    regs.set_sp(sp);
    regs.pc = action.entry.0;
    regs.target_pc = action.entry.0;
    regs.gpr[4] = info.signal as u32; // $a0: signal number, per the Linux handler ABI

    VirtAddr(sp)
}

/// Undo `push_signal_frame`: read the saved register file and mask back
/// out of guest memory at `frame_sp`, returning the restored mask.
pub fn pop_signal_frame(mem: &MemorySet, regs: &mut Registers, frame_sp: VirtAddr) -> SigMask {
    let frame_base = frame_sp.0;
    for i in 0..32 {
        let bytes = mem.read(VirtAddr(frame_base + (i as u32) * 4), 4).expect("sigframe read");
        regs.gpr[i] = u32::from_le_bytes(bytes.try_into().unwrap());
    }
    let tail = frame_base + 32 * 4;
    let rd = |mem: &MemorySet, off: u32| -> u32 {
        let bytes = mem.read(VirtAddr(tail + off), 4).expect("sigframe read");
        u32::from_le_bytes(bytes.try_into().unwrap())
    };
    regs.pc = rd(mem, 0);
    regs.target_pc = rd(mem, 4);
    regs.hi = rd(mem, 8);
    regs.lo = rd(mem, 12);
    let mask_lo = rd(mem, 16) as u64;
    let mask_hi = rd(mem, 20) as u64;
    SigMask::from_bits(mask_lo | (mask_hi << 32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::perm::PagePermission;
    use crate::signal::sig_action::SIG_DFL;
    use crate::signal::sig_set::{SigSet, Signal};

    fn stacked_mem() -> (MemorySet, VirtAddr) {
        let mut mem = MemorySet::new();
        let top = VirtAddr(0x8000_0000);
        let base = VirtAddr(top.0 - 0x1000);
        mem.map(base, top, PagePermission::READ | PagePermission::WRITE, None);
        (mem, top)
    }

    #[test]
    fn push_then_pop_restores_registers() {
        let (mut mem, top) = stacked_mem();
        let mut regs = Registers::new(0x1000, top.0 - 64);
        regs.gpr[5] = 0xdead_beef;
        let original_pc = regs.pc;

        let mut action = SigAction::default();
        action.entry = VirtAddr(0x2000);
        let info = SigInfo { signal: Signal::SIGUSR1, sender_pid: 1 };
        let mut mask = SigSet::empty();
        mask.enable(Signal::SIGINT);

        let frame_sp = push_signal_frame(&mut mem, &mut regs, &action, &info, mask);
        assert_eq!(regs.pc, 0x2000);
        assert_eq!(regs.gpr[4], Signal::SIGUSR1 as u32);

        let restored_mask = pop_signal_frame(&mem, &mut regs, frame_sp);
        assert_eq!(regs.pc, original_pc);
        assert_eq!(regs.gpr[5], 0xdead_beef);
        assert!(restored_mask.contains_signal(Signal::SIGINT));
    }

    #[test]
    fn default_action_entry_is_sig_dfl() {
        assert_eq!(SigAction::default().entry.0, SIG_DFL);
    }
}
