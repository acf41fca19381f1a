//! MIPS32 (mipsel) decode/execute. Word-at-a-time dispatch: SPECIAL
//! (opcode 0) and REGIMM (opcode 1) indirect through `funct`/`rt`; every
//! other opcode maps directly, the shape spec.md §4.3/§9 call for.
//! No branch-delay slot is modeled (spec.md §1 Non-goals excludes
//! pipeline-accurate timing): a branch's target is computed and stored
//! in `target_pc` whether or not it's taken, per §4.3, and `pc` advances
//! straight to whichever of `pc+4`/`target_pc` the branch resolves to.

use crate::isa::{fetch_word, mem_read, mem_write, Fault, StepOutcome};
use crate::mm::address::VirtAddr;
use crate::task::context::Context;

const OP_SPECIAL: u32 = 0x00;
const OP_REGIMM: u32 = 0x01;
const OP_J: u32 = 0x02;
const OP_JAL: u32 = 0x03;
const OP_BEQ: u32 = 0x04;
const OP_BNE: u32 = 0x05;
const OP_BLEZ: u32 = 0x06;
const OP_BGTZ: u32 = 0x07;
const OP_ADDI: u32 = 0x08;
const OP_ADDIU: u32 = 0x09;
const OP_SLTI: u32 = 0x0a;
const OP_SLTIU: u32 = 0x0b;
const OP_ANDI: u32 = 0x0c;
const OP_ORI: u32 = 0x0d;
const OP_XORI: u32 = 0x0e;
const OP_LUI: u32 = 0x0f;
const OP_LB: u32 = 0x20;
const OP_LH: u32 = 0x21;
const OP_LW: u32 = 0x23;
const OP_LBU: u32 = 0x24;
const OP_LHU: u32 = 0x25;
const OP_SB: u32 = 0x28;
const OP_SH: u32 = 0x29;
const OP_SW: u32 = 0x2b;

const FN_SLL: u32 = 0x00;
const FN_SRL: u32 = 0x02;
const FN_SRA: u32 = 0x03;
const FN_SLLV: u32 = 0x04;
const FN_SRLV: u32 = 0x06;
const FN_SRAV: u32 = 0x07;
const FN_JR: u32 = 0x08;
const FN_JALR: u32 = 0x09;
const FN_SYSCALL: u32 = 0x0c;
const FN_BREAK: u32 = 0x0d;
const FN_MFHI: u32 = 0x10;
const FN_MTHI: u32 = 0x11;
const FN_MFLO: u32 = 0x12;
const FN_MTLO: u32 = 0x13;
const FN_MULT: u32 = 0x18;
const FN_MULTU: u32 = 0x19;
const FN_DIV: u32 = 0x1a;
const FN_DIVU: u32 = 0x1b;
const FN_ADD: u32 = 0x20;
const FN_ADDU: u32 = 0x21;
const FN_SUB: u32 = 0x22;
const FN_SUBU: u32 = 0x23;
const FN_AND: u32 = 0x24;
const FN_OR: u32 = 0x25;
const FN_XOR: u32 = 0x26;
const FN_NOR: u32 = 0x27;
const FN_SLT: u32 = 0x2a;
const FN_SLTU: u32 = 0x2b;

struct Decoded {
    opcode: u32,
    rs: usize,
    rt: usize,
    rd: usize,
    shamt: u32,
    funct: u32,
    imm: u16,
    target: u32,
}

fn decode(word: u32) -> Decoded {
    Decoded {
        opcode: (word >> 26) & 0x3f,
        rs: ((word >> 21) & 0x1f) as usize,
        rt: ((word >> 16) & 0x1f) as usize,
        rd: ((word >> 11) & 0x1f) as usize,
        shamt: (word >> 6) & 0x1f,
        funct: word & 0x3f,
        imm: (word & 0xffff) as u16,
        target: word & 0x3ff_ffff,
    }
}

pub fn step(ctx: &mut Context) -> StepOutcome {
    let pc = ctx.current_insn_addr;
    if pc.0 & 0x3 != 0 {
        return StepOutcome::Fault(Fault::BadAddress(pc.0));
    }
    let word = match fetch_word(ctx, pc) {
        Ok(w) => w,
        Err(f) => return StepOutcome::Fault(f),
    };
    execute(ctx, decode(word))
}

fn set_reg(ctx: &mut Context, idx: usize, val: u32) {
    if idx != 0 {
        ctx.regs.gpr[idx] = val;
    }
}

fn sign_ext(imm: u16) -> i32 {
    imm as i16 as i32
}

fn execute(ctx: &mut Context, d: Decoded) -> StepOutcome {
    let pc = ctx.current_insn_addr.0;
    let next_seq = pc.wrapping_add(4);
    let mut next_pc = next_seq;
    let mut target_pc = next_seq;

    macro_rules! reg {
        ($i:expr) => {
            ctx.regs.gpr[$i]
        };
    }

    match d.opcode {
        OP_SPECIAL => match d.funct {
            FN_SLL => set_reg(ctx, d.rd, reg!(d.rt) << d.shamt),
            FN_SRL => set_reg(ctx, d.rd, reg!(d.rt) >> d.shamt),
            FN_SRA => set_reg(ctx, d.rd, ((reg!(d.rt) as i32) >> d.shamt) as u32),
            FN_SLLV => set_reg(ctx, d.rd, reg!(d.rt) << (reg!(d.rs) & 0x1f)),
            FN_SRLV => set_reg(ctx, d.rd, reg!(d.rt) >> (reg!(d.rs) & 0x1f)),
            FN_SRAV => set_reg(ctx, d.rd, ((reg!(d.rt) as i32) >> (reg!(d.rs) & 0x1f)) as u32),
            FN_JR => {
                target_pc = reg!(d.rs);
                next_pc = target_pc;
            }
            FN_JALR => {
                target_pc = reg!(d.rs);
                set_reg(ctx, d.rd, next_seq);
                next_pc = target_pc;
            }
            FN_SYSCALL => {
                ctx.last_insn_addr = ctx.current_insn_addr;
                ctx.regs.pc = next_seq;
                ctx.regs.target_pc = next_seq;
                ctx.current_insn_addr = VirtAddr(next_seq);
                ctx.target_insn_addr = VirtAddr(next_seq);
                return StepOutcome::Syscall;
            }
            FN_BREAK => return StepOutcome::Fault(Fault::IllegalOpcode(pc)),
            FN_MFHI => set_reg(ctx, d.rd, ctx.regs.hi),
            FN_MTHI => ctx.regs.hi = reg!(d.rs),
            FN_MFLO => set_reg(ctx, d.rd, ctx.regs.lo),
            FN_MTLO => ctx.regs.lo = reg!(d.rs),
            FN_MULT => {
                let prod = (reg!(d.rs) as i32 as i64) * (reg!(d.rt) as i32 as i64);
                ctx.regs.lo = prod as u32;
                ctx.regs.hi = (prod >> 32) as u32;
            }
            FN_MULTU => {
                let prod = (reg!(d.rs) as u64) * (reg!(d.rt) as u64);
                ctx.regs.lo = prod as u32;
                ctx.regs.hi = (prod >> 32) as u32;
            }
            FN_DIV => {
                let rt = reg!(d.rt) as i32;
                if rt == 0 {
                    return StepOutcome::Fault(Fault::Arithmetic);
                }
                ctx.regs.lo = ((reg!(d.rs) as i32).wrapping_div(rt)) as u32;
                ctx.regs.hi = ((reg!(d.rs) as i32).wrapping_rem(rt)) as u32;
            }
            FN_DIVU => {
                let rt = reg!(d.rt);
                if rt == 0 {
                    return StepOutcome::Fault(Fault::Arithmetic);
                }
                ctx.regs.lo = reg!(d.rs) / rt;
                ctx.regs.hi = reg!(d.rs) % rt;
            }
            FN_ADD => {
                let (res, overflow) = (reg!(d.rs) as i32).overflowing_add(reg!(d.rt) as i32);
                if overflow {
                    return StepOutcome::Fault(Fault::Arithmetic);
                }
                set_reg(ctx, d.rd, res as u32);
            }
            FN_ADDU => set_reg(ctx, d.rd, reg!(d.rs).wrapping_add(reg!(d.rt))),
            FN_SUB => {
                let (res, overflow) = (reg!(d.rs) as i32).overflowing_sub(reg!(d.rt) as i32);
                if overflow {
                    return StepOutcome::Fault(Fault::Arithmetic);
                }
                set_reg(ctx, d.rd, res as u32);
            }
            FN_SUBU => set_reg(ctx, d.rd, reg!(d.rs).wrapping_sub(reg!(d.rt))),
            FN_AND => set_reg(ctx, d.rd, reg!(d.rs) & reg!(d.rt)),
            FN_OR => set_reg(ctx, d.rd, reg!(d.rs) | reg!(d.rt)),
            FN_XOR => set_reg(ctx, d.rd, reg!(d.rs) ^ reg!(d.rt)),
            FN_NOR => set_reg(ctx, d.rd, !(reg!(d.rs) | reg!(d.rt))),
            FN_SLT => set_reg(ctx, d.rd, ((reg!(d.rs) as i32) < (reg!(d.rt) as i32)) as u32),
            FN_SLTU => set_reg(ctx, d.rd, (reg!(d.rs) < reg!(d.rt)) as u32),
            _ => return StepOutcome::Fault(Fault::IllegalOpcode(pc)),
        },
        OP_REGIMM => {
            target_pc = next_seq.wrapping_add((sign_ext(d.imm) << 2) as u32);
            let taken = match d.rt {
                0x00 => (reg!(d.rs) as i32) < 0,  // BLTZ
                0x01 => (reg!(d.rs) as i32) >= 0, // BGEZ
                _ => return StepOutcome::Fault(Fault::IllegalOpcode(pc)),
            };
            if taken {
                next_pc = target_pc;
            }
        }
        OP_J => {
            target_pc = (next_seq & 0xf000_0000) | (d.target << 2);
            next_pc = target_pc;
        }
        OP_JAL => {
            target_pc = (next_seq & 0xf000_0000) | (d.target << 2);
            set_reg(ctx, 31, next_seq);
            next_pc = target_pc;
        }
        OP_BEQ => {
            target_pc = next_seq.wrapping_add((sign_ext(d.imm) << 2) as u32);
            if reg!(d.rs) == reg!(d.rt) {
                next_pc = target_pc;
            }
        }
        OP_BNE => {
            target_pc = next_seq.wrapping_add((sign_ext(d.imm) << 2) as u32);
            if reg!(d.rs) != reg!(d.rt) {
                next_pc = target_pc;
            }
        }
        OP_BLEZ => {
            target_pc = next_seq.wrapping_add((sign_ext(d.imm) << 2) as u32);
            if (reg!(d.rs) as i32) <= 0 {
                next_pc = target_pc;
            }
        }
        OP_BGTZ => {
            target_pc = next_seq.wrapping_add((sign_ext(d.imm) << 2) as u32);
            if (reg!(d.rs) as i32) > 0 {
                next_pc = target_pc;
            }
        }
        OP_ADDI => {
            let (res, overflow) = (reg!(d.rs) as i32).overflowing_add(sign_ext(d.imm));
            if overflow {
                return StepOutcome::Fault(Fault::Arithmetic);
            }
            set_reg(ctx, d.rt, res as u32);
        }
        OP_ADDIU => set_reg(ctx, d.rt, reg!(d.rs).wrapping_add(sign_ext(d.imm) as u32)),
        OP_SLTI => set_reg(ctx, d.rt, ((reg!(d.rs) as i32) < sign_ext(d.imm)) as u32),
        OP_SLTIU => set_reg(ctx, d.rt, (reg!(d.rs) < (sign_ext(d.imm) as u32)) as u32),
        OP_ANDI => set_reg(ctx, d.rt, reg!(d.rs) & d.imm as u32),
        OP_ORI => set_reg(ctx, d.rt, reg!(d.rs) | d.imm as u32),
        OP_XORI => set_reg(ctx, d.rt, reg!(d.rs) ^ d.imm as u32),
        OP_LUI => set_reg(ctx, d.rt, (d.imm as u32) << 16),
        OP_LB | OP_LH | OP_LW | OP_LBU | OP_LHU => {
            let addr = VirtAddr(reg!(d.rs).wrapping_add(sign_ext(d.imm) as u32));
            ctx.last_effective_addr = addr;
            let len = match d.opcode {
                OP_LB | OP_LBU => 1,
                OP_LH | OP_LHU => 2,
                _ => 4,
            };
            let bytes = match mem_read(ctx, addr, len) {
                Ok(b) => b,
                Err(f) => return StepOutcome::Fault(f),
            };
            let val: u32 = match d.opcode {
                OP_LB => bytes[0] as i8 as i32 as u32,
                OP_LBU => bytes[0] as u32,
                OP_LH => i16::from_le_bytes([bytes[0], bytes[1]]) as i32 as u32,
                OP_LHU => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
                _ => u32::from_le_bytes(bytes.try_into().unwrap()),
            };
            set_reg(ctx, d.rt, val);
        }
        OP_SB | OP_SH | OP_SW => {
            let addr = VirtAddr(reg!(d.rs).wrapping_add(sign_ext(d.imm) as u32));
            ctx.last_effective_addr = addr;
            let val = reg!(d.rt);
            let bytes: Vec<u8> = match d.opcode {
                OP_SB => vec![val as u8],
                OP_SH => (val as u16).to_le_bytes().to_vec(),
                _ => val.to_le_bytes().to_vec(),
            };
            if let Err(f) = mem_write(ctx, addr, &bytes) {
                return StepOutcome::Fault(f);
            }
        }
        _ => return StepOutcome::Fault(Fault::IllegalOpcode(pc)),
    }

    ctx.last_insn_addr = ctx.current_insn_addr;
    ctx.regs.pc = next_pc;
    ctx.regs.target_pc = target_pc;
    ctx.current_insn_addr = VirtAddr(next_pc);
    ctx.target_insn_addr = VirtAddr(target_pc);
    StepOutcome::Continue
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
            machine: Machine::Mips,
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

    fn put_word(ctx: &mut Context, addr: u32, word: u32) {
        let mem = ctx.memory.clone();
        mem.lock().unwrap().write(VirtAddr(addr), &word.to_le_bytes()).unwrap();
    }

    #[test]
    fn addiu_then_branch_sets_target_even_when_not_taken() {
        let mut ctx = mk_context();
        // addiu $t0, $zero, 5   -> opcode 0x09, rs=0, rt=8, imm=5
        put_word(&mut ctx, 0x1000, (0x09 << 26) | (0 << 21) | (8 << 16) | 5);
        // beq $t0, $zero, 4     -> opcode 0x04, rs=8, rt=0, imm=1
        put_word(&mut ctx, 0x1004, (0x04 << 26) | (8 << 21) | (0 << 16) | 1);

        assert_eq!(step(&mut ctx), StepOutcome::Continue);
        assert_eq!(ctx.regs.gpr[8], 5);

        assert_eq!(step(&mut ctx), StepOutcome::Continue);
        // not taken ($t0 != 0): pc advances straight, but target_pc still
        // records the not-taken branch target (spec.md §4.3)
        assert_eq!(ctx.regs.pc, 0x1008);
        assert_eq!(ctx.regs.target_pc, 0x1008 + 4);
    }

    #[test]
    fn syscall_traps_with_args_in_place() {
        let mut ctx = mk_context();
        ctx.regs.gpr[2] = 42; // $v0 = syscall number
        ctx.regs.gpr[4] = 7; // $a0
        put_word(&mut ctx, 0x1000, (0x00 << 26) | FN_SYSCALL);
        assert_eq!(step(&mut ctx), StepOutcome::Syscall);
        assert_eq!(ctx.regs.syscall_num(), 42);
        assert_eq!(ctx.regs.syscall_args()[0], 7);
        assert_eq!(ctx.regs.pc, 0x1004);
    }

    #[test]
    fn store_then_load_round_trips_through_vm() {
        let mut ctx = mk_context();
        ctx.regs.gpr[1] = 0x2000; // base
        ctx.regs.gpr[2] = 0xCAFEBABEu32 as u32;
        // sw $2, 0($1)
        put_word(&mut ctx, 0x1000, (OP_SW << 26) | (1 << 21) | (2 << 16));
        // lw $3, 0($1)
        put_word(&mut ctx, 0x1004, (OP_LW << 26) | (1 << 21) | (3 << 16));
        assert_eq!(step(&mut ctx), StepOutcome::Continue);
        assert_eq!(step(&mut ctx), StepOutcome::Continue);
        assert_eq!(ctx.regs.gpr[3], 0xCAFEBABE);
    }

    #[test]
    fn illegal_opcode_faults() {
        let mut ctx = mk_context();
        put_word(&mut ctx, 0x1000, 0x3f << 26); // unused opcode 0x3f
        assert_eq!(step(&mut ctx), StepOutcome::Fault(Fault::IllegalOpcode(0x1000)));
    }

    #[test]
    fn divide_by_zero_faults() {
        let mut ctx = mk_context();
        ctx.regs.gpr[1] = 10;
        ctx.regs.gpr[2] = 0;
        put_word(&mut ctx, 0x1000, (0 << 26) | (1 << 21) | (2 << 16) | FN_DIV);
        assert_eq!(step(&mut ctx), StepOutcome::Fault(Fault::Arithmetic));
    }
}
