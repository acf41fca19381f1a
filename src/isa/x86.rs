//! i686 decode/execute. Variable-length decode over a minimal subset:
//! register-direct and base[+disp8/disp32] addressing only (no SIB
//! byte, no disp32-only mode) — full x86 addressing is out of
//! proportion to the hard engineering core this crate targets (spec.md
//! §1), and guest binaries built for this simulator can avoid both
//! encodings. Condition codes live in `Registers::flags`
//! (`task::regs::Registers`) since MIPS has no analogous state.

use crate::isa::{mem_read, mem_write, Fault, StepOutcome};
use crate::mm::address::VirtAddr;
use crate::task::context::Context;

/// eax,ecx,edx,ebx,esp,ebp,esi,edi -> shared gpr slots. eax and esp
/// keep the same slots MIPS uses for $v0/$sp so syscall plumbing
/// (`Registers::ret`/`sp`/`syscall_args`) works unmodified for both ISAs.
const X86_REG: [usize; 8] = [2, 1, 3, 4, 29, 5, 6, 7];

const FLAG_ZF: u32 = 1 << 0;
const FLAG_SF: u32 = 1 << 1;
const FLAG_OF: u32 = 1 << 2;

enum Next {
    Continue(VirtAddr, VirtAddr),
    Syscall(VirtAddr),
}

#[derive(Clone, Copy)]
enum RmOperand {
    Reg(usize),
    Mem(VirtAddr),
}

#[derive(Clone, Copy)]
enum AluOp {
    Add,
    Or,
    And,
    Sub,
    Xor,
    Cmp,
}

pub fn step(ctx: &mut Context) -> StepOutcome {
    match exec_one(ctx) {
        Ok(Next::Continue(next, target)) => {
            ctx.last_insn_addr = ctx.current_insn_addr;
            ctx.regs.pc = next.0;
            ctx.regs.target_pc = target.0;
            ctx.current_insn_addr = next;
            ctx.target_insn_addr = target;
            StepOutcome::Continue
        }
        Ok(Next::Syscall(after)) => {
            ctx.last_insn_addr = ctx.current_insn_addr;
            ctx.regs.pc = after.0;
            ctx.regs.target_pc = after.0;
            ctx.current_insn_addr = after;
            ctx.target_insn_addr = after;
            StepOutcome::Syscall
        }
        Err(f) => StepOutcome::Fault(f),
    }
}

fn fetch_u8(ctx: &mut Context, addr: VirtAddr) -> Result<(u8, VirtAddr), Fault> {
    let bytes = mem_read(ctx, addr, 1)?;
    Ok((bytes[0], addr + 1))
}

fn fetch_u32(ctx: &mut Context, addr: VirtAddr) -> Result<(u32, VirtAddr), Fault> {
    let bytes = mem_read(ctx, addr, 4)?;
    Ok((u32::from_le_bytes(bytes.try_into().unwrap()), addr + 4))
}

struct ModRm {
    md: u8,
    reg: usize,
    rm: usize,
}

fn decode_modrm(ctx: &mut Context, addr: VirtAddr) -> Result<(ModRm, RmOperand, VirtAddr), Fault> {
    let (byte, mut cursor) = fetch_u8(ctx, addr)?;
    let md = byte >> 6;
    let reg = X86_REG[((byte >> 3) & 0x7) as usize];
    let rm_field = (byte & 0x7) as usize;

    if md == 0b11 {
        return Ok((ModRm { md, reg, rm: rm_field }, RmOperand::Reg(X86_REG[rm_field]), cursor));
    }

    if rm_field == 4 {
        // SIB byte addressing not supported in this decoder
        return Err(Fault::IllegalOpcode(addr.0));
    }
    if md == 0b00 && rm_field == 5 {
        // disp32-only (no base register) not supported
        return Err(Fault::IllegalOpcode(addr.0));
    }

    let base = ctx.regs.gpr[X86_REG[rm_field]];
    let (effective, next_cursor) = match md {
        0b00 => (base, cursor),
        0b01 => {
            let (disp, c) = fetch_u8(ctx, cursor)?;
            (base.wrapping_add(disp as i8 as i32 as u32), c)
        }
        0b10 => {
            let (disp, c) = fetch_u32(ctx, cursor)?;
            (base.wrapping_add(disp), c)
        }
        _ => unreachable!(),
    };
    cursor = next_cursor;
    Ok((ModRm { md, reg, rm: rm_field }, RmOperand::Mem(VirtAddr(effective)), cursor))
}

fn read_rm(ctx: &mut Context, op: RmOperand) -> Result<u32, Fault> {
    match op {
        RmOperand::Reg(slot) => Ok(ctx.regs.gpr[slot]),
        RmOperand::Mem(addr) => {
            ctx.last_effective_addr = addr;
            let bytes = mem_read(ctx, addr, 4)?;
            Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
        }
    }
}

fn write_rm(ctx: &mut Context, op: RmOperand, val: u32) -> Result<(), Fault> {
    match op {
        RmOperand::Reg(slot) => {
            ctx.regs.gpr[slot] = val;
            Ok(())
        }
        RmOperand::Mem(addr) => {
            ctx.last_effective_addr = addr;
            mem_write(ctx, addr, &val.to_le_bytes())
        }
    }
}

fn alu(ctx: &mut Context, op: AluOp, a: u32, b: u32) -> u32 {
    let (result, of) = match op {
        AluOp::Add => a.overflowing_add(b),
        AluOp::Sub | AluOp::Cmp => a.overflowing_sub(b),
        AluOp::Or => (a | b, false),
        AluOp::And => (a & b, false),
        AluOp::Xor => (a ^ b, false),
    };
    let of = match op {
        AluOp::Add | AluOp::Sub | AluOp::Cmp => {
            let sa = (a as i32).is_negative();
            let sb = (b as i32).is_negative();
            let sr = (result as i32).is_negative();
            match op {
                AluOp::Add => sa == sb && sr != sa,
                _ => sa != sb && sr != sa,
            }
        }
        _ => of,
    };
    let mut flags = 0u32;
    if result == 0 {
        flags |= FLAG_ZF;
    }
    if (result as i32) < 0 {
        flags |= FLAG_SF;
    }
    if of {
        flags |= FLAG_OF;
    }
    ctx.regs.flags = flags;
    result
}

fn condition(flags: u32, cc: u8) -> bool {
    let zf = flags & FLAG_ZF != 0;
    let sf = flags & FLAG_SF != 0;
    let of = flags & FLAG_OF != 0;
    match cc {
        0x4 => zf,        // JE/JZ
        0x5 => !zf,       // JNE/JNZ
        0xC => sf != of,  // JL
        0xD => sf == of,  // JGE
        0xE => zf || (sf != of), // JLE
        0xF => !zf && (sf == of), // JG
        _ => false,
    }
}

fn op_for_rm_r(opcode: u8) -> Option<AluOp> {
    match opcode {
        0x01 => Some(AluOp::Add),
        0x09 => Some(AluOp::Or),
        0x21 => Some(AluOp::And),
        0x29 => Some(AluOp::Sub),
        0x31 => Some(AluOp::Xor),
        0x39 => Some(AluOp::Cmp),
        _ => None,
    }
}

fn op_for_r_rm(opcode: u8) -> Option<AluOp> {
    match opcode {
        0x03 => Some(AluOp::Add),
        0x0b => Some(AluOp::Or),
        0x23 => Some(AluOp::And),
        0x2b => Some(AluOp::Sub),
        0x33 => Some(AluOp::Xor),
        0x3b => Some(AluOp::Cmp),
        _ => None,
    }
}

fn group1_op(reg_field: usize) -> Option<AluOp> {
    match reg_field {
        0 => Some(AluOp::Add),
        1 => Some(AluOp::Or),
        4 => Some(AluOp::And),
        5 => Some(AluOp::Sub),
        6 => Some(AluOp::Xor),
        7 => Some(AluOp::Cmp),
        _ => None, // ADC/SBB (2/3) unmodeled
    }
}

fn exec_one(ctx: &mut Context) -> Result<Next, Fault> {
    let start = ctx.current_insn_addr;
    let (opcode, mut cursor) = fetch_u8(ctx, start)?;

    match opcode {
        0x90 => Ok(Next::Continue(cursor, cursor)),

        0xB8..=0xBF => {
            let (imm, c) = fetch_u32(ctx, cursor)?;
            cursor = c;
            ctx.regs.gpr[X86_REG[(opcode - 0xB8) as usize]] = imm;
            Ok(Next::Continue(cursor, cursor))
        }

        0x50..=0x57 => {
            let slot = X86_REG[(opcode - 0x50) as usize];
            let val = ctx.regs.gpr[slot];
            let sp = ctx.regs.sp().wrapping_sub(4);
            ctx.regs.set_sp(sp);
            mem_write(ctx, VirtAddr(sp), &val.to_le_bytes())?;
            Ok(Next::Continue(cursor, cursor))
        }

        0x58..=0x5F => {
            let sp = ctx.regs.sp();
            let bytes = mem_read(ctx, VirtAddr(sp), 4)?;
            ctx.regs.set_sp(sp.wrapping_add(4));
            ctx.regs.gpr[X86_REG[(opcode - 0x58) as usize]] = u32::from_le_bytes(bytes.try_into().unwrap());
            Ok(Next::Continue(cursor, cursor))
        }

        0x89 => {
            let (modrm, rm_op, c) = decode_modrm(ctx, cursor)?;
            cursor = c;
            write_rm(ctx, rm_op, ctx.regs.gpr[modrm.reg])?;
            Ok(Next::Continue(cursor, cursor))
        }

        0x8B => {
            let (modrm, rm_op, c) = decode_modrm(ctx, cursor)?;
            cursor = c;
            let val = read_rm(ctx, rm_op)?;
            ctx.regs.gpr[modrm.reg] = val;
            Ok(Next::Continue(cursor, cursor))
        }

        op if op_for_rm_r(op).is_some() => {
            let alu_op = op_for_rm_r(op).unwrap();
            let (modrm, rm_op, c) = decode_modrm(ctx, cursor)?;
            cursor = c;
            let a = read_rm(ctx, rm_op)?;
            let b = ctx.regs.gpr[modrm.reg];
            let result = alu(ctx, alu_op, a, b);
            if !matches!(alu_op, AluOp::Cmp) {
                write_rm(ctx, rm_op, result)?;
            }
            Ok(Next::Continue(cursor, cursor))
        }

        op if op_for_r_rm(op).is_some() => {
            let alu_op = op_for_r_rm(op).unwrap();
            let (modrm, rm_op, c) = decode_modrm(ctx, cursor)?;
            cursor = c;
            let a = ctx.regs.gpr[modrm.reg];
            let b = read_rm(ctx, rm_op)?;
            let result = alu(ctx, alu_op, a, b);
            if !matches!(alu_op, AluOp::Cmp) {
                ctx.regs.gpr[modrm.reg] = result;
            }
            Ok(Next::Continue(cursor, cursor))
        }

        0x83 => {
            let (modrm, rm_op, c) = decode_modrm(ctx, cursor)?;
            let (imm, c2) = fetch_u8(ctx, c)?;
            cursor = c2;
            let alu_op = group1_op(modrm.reg).ok_or(Fault::IllegalOpcode(start.0))?;
            let a = read_rm(ctx, rm_op)?;
            let result = alu(ctx, alu_op, a, imm as i8 as i32 as u32);
            if !matches!(alu_op, AluOp::Cmp) {
                write_rm(ctx, rm_op, result)?;
            }
            Ok(Next::Continue(cursor, cursor))
        }

        0x81 => {
            let (modrm, rm_op, c) = decode_modrm(ctx, cursor)?;
            let (imm, c2) = fetch_u32(ctx, c)?;
            cursor = c2;
            let alu_op = group1_op(modrm.reg).ok_or(Fault::IllegalOpcode(start.0))?;
            let a = read_rm(ctx, rm_op)?;
            let result = alu(ctx, alu_op, a, imm);
            if !matches!(alu_op, AluOp::Cmp) {
                write_rm(ctx, rm_op, result)?;
            }
            Ok(Next::Continue(cursor, cursor))
        }

        0x40..=0x47 => {
            let slot = X86_REG[(opcode - 0x40) as usize];
            let val = ctx.regs.gpr[slot];
            ctx.regs.gpr[slot] = alu(ctx, AluOp::Add, val, 1);
            Ok(Next::Continue(cursor, cursor))
        }
        0x48..=0x4F => {
            let slot = X86_REG[(opcode - 0x48) as usize];
            let val = ctx.regs.gpr[slot];
            ctx.regs.gpr[slot] = alu(ctx, AluOp::Sub, val, 1);
            Ok(Next::Continue(cursor, cursor))
        }

        0xEB => {
            let (rel, c) = fetch_u8(ctx, cursor)?;
            cursor = c;
            let target = VirtAddr(cursor.0.wrapping_add(rel as i8 as i32 as u32));
            Ok(Next::Continue(target, target))
        }
        0xE9 => {
            let (rel, c) = fetch_u32(ctx, cursor)?;
            cursor = c;
            let target = VirtAddr(cursor.0.wrapping_add(rel));
            Ok(Next::Continue(target, target))
        }
        0xE8 => {
            let (rel, c) = fetch_u32(ctx, cursor)?;
            cursor = c;
            let ret_addr = cursor;
            let sp = ctx.regs.sp().wrapping_sub(4);
            ctx.regs.set_sp(sp);
            mem_write(ctx, VirtAddr(sp), &ret_addr.0.to_le_bytes())?;
            let target = VirtAddr(cursor.0.wrapping_add(rel));
            Ok(Next::Continue(target, target))
        }
        0xC3 => {
            let sp = ctx.regs.sp();
            let bytes = mem_read(ctx, VirtAddr(sp), 4)?;
            ctx.regs.set_sp(sp.wrapping_add(4));
            let target = VirtAddr(u32::from_le_bytes(bytes.try_into().unwrap()));
            Ok(Next::Continue(target, target))
        }

        0x70..=0x7F => {
            let (rel, c) = fetch_u8(ctx, cursor)?;
            cursor = c;
            let target = VirtAddr(cursor.0.wrapping_add(rel as i8 as i32 as u32));
            let taken = condition(ctx.regs.flags, opcode - 0x70);
            let next = if taken { target } else { cursor };
            Ok(Next::Continue(next, target))
        }

        0xCD => {
            let (vector, c) = fetch_u8(ctx, cursor)?;
            cursor = c;
            if vector != 0x80 {
                return Err(Fault::IllegalOpcode(start.0));
            }
            Ok(Next::Syscall(cursor))
        }

        _ => Err(Fault::IllegalOpcode(start.0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd::table::FdTable;
    use crate::loader::elf::Machine;
    use crate::loader::LoaderMeta;
    use crate::mm::memory_set::MemorySet;
    use crate::mm::perm::PagePermission;
    use crate::signal::sig_action::SigActionTable;
    use crate::task::context::Context;
    use std::sync::{Arc, Mutex};

    fn mk_context() -> Context {
        let mut mem = MemorySet::new();
        mem.map(VirtAddr(0x1000), VirtAddr(0x3000), PagePermission::READ | PagePermission::WRITE | PagePermission::EXEC, None);
        let loader = LoaderMeta {
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
            entry: VirtAddr(0x1000),
            interp_entry: None,
            phdr_base: VirtAddr(0),
            phdr_count: 0,
            random_addr: VirtAddr(0),
            machine: Machine::X86,
        };
        Context::new(
            1,
            mem.into_shared(),
            FdTable::new_with_std_io().into_shared(),
            Arc::new(Mutex::new(SigActionTable::new())),
            Arc::new(loader),
            VirtAddr(0x1000),
            VirtAddr(0x1ff0),
        )
    }

    fn put_bytes(ctx: &mut Context, addr: u32, bytes: &[u8]) {
        let mem = ctx.memory.clone();
        mem.lock().unwrap().write(VirtAddr(addr), bytes).unwrap();
    }

    #[test]
    fn mov_imm_then_inc() {
        let mut ctx = mk_context();
        put_bytes(&mut ctx, 0x1000, &[0xB8, 0x05, 0x00, 0x00, 0x00]); // mov eax, 5
        put_bytes(&mut ctx, 0x1005, &[0x40]); // inc eax
        assert_eq!(step(&mut ctx), StepOutcome::Continue);
        assert_eq!(ctx.regs.ret(), 5);
        assert_eq!(step(&mut ctx), StepOutcome::Continue);
        assert_eq!(ctx.regs.ret(), 6);
    }

    #[test]
    fn push_pop_round_trips() {
        let mut ctx = mk_context();
        ctx.regs.gpr[X86_REG[0]] = 0xdead_beef; // eax
        put_bytes(&mut ctx, 0x1000, &[0x50]); // push eax
        put_bytes(&mut ctx, 0x1001, &[0x59]); // pop ecx
        assert_eq!(step(&mut ctx), StepOutcome::Continue);
        assert_eq!(step(&mut ctx), StepOutcome::Continue);
        assert_eq!(ctx.regs.gpr[X86_REG[1]], 0xdead_beef);
    }

    #[test]
    fn cmp_then_jcc_sets_target_even_when_not_taken() {
        let mut ctx = mk_context();
        ctx.regs.gpr[X86_REG[0]] = 5; // eax
        // cmp eax, eax (modrm mod=11 reg=eax rm=eax) -> opcode 0x39
        put_bytes(&mut ctx, 0x1000, &[0x39, 0xC0]);
        // je +4
        put_bytes(&mut ctx, 0x1002, &[0x74, 0x04]);
        assert_eq!(step(&mut ctx), StepOutcome::Continue);
        assert_ne!(ctx.regs.flags & FLAG_ZF, 0);
        assert_eq!(step(&mut ctx), StepOutcome::Continue);
        let fallthrough = 0x1004u32;
        assert_eq!(ctx.regs.pc, fallthrough + 4);
        assert_eq!(ctx.regs.target_pc, fallthrough + 4);
    }

    #[test]
    fn int_0x80_traps_as_syscall() {
        let mut ctx = mk_context();
        ctx.regs.gpr[X86_REG[0]] = 42; // eax = syscall number
        put_bytes(&mut ctx, 0x1000, &[0xCD, 0x80]);
        assert_eq!(step(&mut ctx), StepOutcome::Syscall);
        assert_eq!(ctx.regs.syscall_num(), 42);
        assert_eq!(ctx.regs.pc, 0x1002);
    }

    #[test]
    fn unsupported_sib_byte_faults() {
        let mut ctx = mk_context();
        // mov eax, [ebx + esi] -> modrm mod=00 rm=4 (SIB) -- unsupported
        put_bytes(&mut ctx, 0x1000, &[0x8B, 0x04, 0x1E]);
        assert_eq!(step(&mut ctx), StepOutcome::Fault(Fault::IllegalOpcode(0x1001)));
    }

    #[test]
    fn call_then_ret_round_trips_stack() {
        let mut ctx = mk_context();
        // call +0 (to the very next instruction, a nop at 0x1005)
        put_bytes(&mut ctx, 0x1000, &[0xE8, 0x00, 0x00, 0x00, 0x00]);
        put_bytes(&mut ctx, 0x1005, &[0xC3]); // ret
        assert_eq!(step(&mut ctx), StepOutcome::Continue);
        assert_eq!(ctx.regs.pc, 0x1005);
        assert_eq!(step(&mut ctx), StepOutcome::Continue);
        assert_eq!(ctx.regs.pc, 0x1005); // returned to the call's own fallthrough
    }
}
