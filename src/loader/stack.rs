//! Guest initial-stack construction. Grounded on
//! `NoAxiom/kernel/src/task/execve.rs::init_user_stack`, generalized
//! from the teacher's 64-bit native layout to the 32-bit guest layout
//! spec.md §6 mandates:
//! `[argc, argv.., NULL, envp.., NULL, auxv.., AT_NULL, strings, random]`.

use crate::config::AT_RANDOM_BYTES;
use crate::loader::auxv::{AuxEntry, AT_NULL, AT_RANDOM};
use crate::mm::address::VirtAddr;
use crate::mm::memory_set::MemorySet;
use crate::mm::perm::PagePermission;

pub struct StackLayout {
    pub sp: VirtAddr,
    pub argc: u32,
    pub argv_base: VirtAddr,
    pub envp_base: VirtAddr,
}

fn align16(sp: u32) -> u32 {
    sp & !0xf
}

/// push argv/envp/platform/random-bytes/auxv onto a pre-mapped stack
/// region and return the final stack pointer, per the layout above.
pub fn build_stack(
    mem: &mut MemorySet,
    stack_top: VirtAddr,
    args: &[String],
    envs: &[String],
    mut auxv: Vec<AuxEntry>,
    platform: &str,
) -> StackLayout {
    let mut sp = stack_top.0;

    let mut envp = vec![0u32; envs.len()];
    for (i, e) in envs.iter().enumerate() {
        sp -= e.len() as u32 + 1;
        let mut bytes = e.as_bytes().to_vec();
        bytes.push(0);
        mem.write(VirtAddr(sp), &bytes).expect("stack write");
        envp[i] = sp;
    }
    sp = align16(sp);

    let mut argv = vec![0u32; args.len()];
    for (i, a) in args.iter().enumerate() {
        sp -= a.len() as u32 + 1;
        let mut bytes = a.as_bytes().to_vec();
        bytes.push(0);
        mem.write(VirtAddr(sp), &bytes).expect("stack write");
        argv[i] = sp;
    }
    sp = align16(sp);

    sp -= platform.len() as u32 + 1;
    sp = align16(sp);
    let mut plat_bytes = platform.as_bytes().to_vec();
    plat_bytes.push(0);
    mem.write(VirtAddr(sp), &plat_bytes).expect("stack write");

    sp -= AT_RANDOM_BYTES as u32;
    let random_addr = sp;
    mem.write(VirtAddr(sp), &[0u8; AT_RANDOM_BYTES]).expect("stack write");
    auxv.push(AuxEntry(AT_RANDOM, random_addr));
    auxv.push(AuxEntry(AT_NULL, 0));
    sp = align16(sp);

    let auxv_bytes = auxv.len() * 8;
    sp -= auxv_bytes as u32;
    for (i, AuxEntry(k, v)) in auxv.iter().enumerate() {
        let off = (i * 8) as u32;
        mem.write(VirtAddr(sp + off), &k.to_le_bytes()).unwrap();
        mem.write(VirtAddr(sp + off + 4), &v.to_le_bytes()).unwrap();
    }

    let envp_bytes = (envp.len() + 1) * 4;
    sp -= envp_bytes as u32;
    let envp_base = sp;
    for (i, e) in envp.iter().enumerate() {
        mem.write(VirtAddr(envp_base + (i as u32) * 4), &e.to_le_bytes()).unwrap();
    }
    mem.write(VirtAddr(envp_base + (envp.len() as u32) * 4), &0u32.to_le_bytes()).unwrap();

    let argv_bytes = (argv.len() + 1) * 4;
    sp -= argv_bytes as u32;
    let argv_base = sp;
    for (i, a) in argv.iter().enumerate() {
        mem.write(VirtAddr(argv_base + (i as u32) * 4), &a.to_le_bytes()).unwrap();
    }
    mem.write(VirtAddr(argv_base + (argv.len() as u32) * 4), &0u32.to_le_bytes()).unwrap();

    sp -= 4;
    mem.write(VirtAddr(sp), &(args.len() as u32).to_le_bytes()).unwrap();

    StackLayout {
        sp: VirtAddr(sp),
        argc: args.len() as u32,
        argv_base: VirtAddr(argv_base),
        envp_base: VirtAddr(envp_base),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::USER_STACK_SIZE;

    #[test]
    fn stack_layout_has_argc_at_sp() {
        let mut mem = MemorySet::new();
        let top = VirtAddr(0x8000_0000);
        let base = VirtAddr(top.0 - USER_STACK_SIZE as u32);
        mem.map(base, top, PagePermission::READ | PagePermission::WRITE, None);

        let layout = build_stack(
            &mut mem,
            top,
            &["prog".to_string(), "arg1".to_string()],
            &["PATH=/bin".to_string()],
            vec![],
            "mips",
        );
        let argc = mem.read(layout.sp, 4).unwrap();
        assert_eq!(u32::from_le_bytes(argc.try_into().unwrap()), 2);
        assert!(layout.argv_base.0 > layout.sp.0);
    }
}
