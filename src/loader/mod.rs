//! Program loader: ties ELF parsing (elf.rs) and stack construction
//! (stack.rs) together into the `Loader` metadata record spec.md §3
//! describes. Shared among a process's clones (spec.md §3 "Context").

pub mod auxv;
pub mod elf;
pub mod stack;

use std::fs;

use crate::config::{AT_RANDOM_BYTES, USER_STACK_SIZE};
use crate::errno::SimError;
use crate::loader::auxv::*;
use crate::loader::elf::{load_image, load_interpreter, Machine};
use crate::mm::address::VirtAddr;
use crate::mm::memory_set::MemorySet;
use crate::mm::perm::PagePermission;

/// once-per-program-image metadata (spec.md §3 "Loader")
pub struct LoaderMeta {
    pub argv: Vec<String>,
    pub envp: Vec<String>,
    pub interp_path: Option<String>,
    pub cwd: String,
    pub stdin_path: Option<String>,
    pub stdout_path: Option<String>,
    pub stack_base: VirtAddr,
    pub stack_top: VirtAddr,
    pub stack_size: u32,
    pub environ_base: VirtAddr,
    pub lowest_addr: VirtAddr,
    pub entry: VirtAddr,
    pub interp_entry: Option<VirtAddr>,
    pub phdr_base: VirtAddr,
    pub phdr_count: u32,
    pub random_addr: VirtAddr,
    pub machine: Machine,
}

pub struct LoadedProgram {
    pub memory: MemorySet,
    pub meta: LoaderMeta,
    pub entry_sp: VirtAddr,
}

/// load `path` as the guest's initial image: map PT_LOAD segments, map
/// its interpreter (if PT_INTERP is present) at the fixed high base,
/// build the stack with argv/envp/auxv, and map the heap just above
/// the highest loaded address.
pub fn load_program(path: &str, argv: Vec<String>, envp: Vec<String>) -> Result<LoadedProgram, SimError> {
    let bytes = fs::read(path).map_err(|e| SimError::Loader(format!("{path}: {e}")))?;
    let (mut mem, info) = load_image(&bytes, 0)?;

    let interp_entry = match &info.interp_path {
        Some(interp_path) => {
            let interp_bytes = fs::read(interp_path).map_err(|e| SimError::Loader(format!("{interp_path}: {e}")))?;
            Some(load_interpreter(&interp_bytes, &mut mem)?.entry)
        }
        None => None,
    };

    let stack_top = VirtAddr(0x8000_0000);
    let stack_base = VirtAddr(stack_top.0 - USER_STACK_SIZE as u32);
    mem.map(stack_base, stack_top, PagePermission::READ | PagePermission::WRITE, None);

    let heap_base = VirtAddr((info.highest_addr.0 + 0xfff) & !0xfff);
    mem.init_heap(heap_base);

    let platform = match info.machine {
        Machine::Mips => "mips",
        Machine::X86 => "i686",
    };

    let mut auxv = vec![
        AuxEntry(AT_PHDR, info.phdr_addr.0),
        AuxEntry(AT_PHENT, info.ph_entry_size),
        AuxEntry(AT_PHNUM, info.ph_count),
        AuxEntry(AT_PAGESZ, 4096),
        AuxEntry(AT_BASE, 0),
        AuxEntry(AT_ENTRY, info.entry.0),
        AuxEntry(AT_UID, 0),
        AuxEntry(AT_EUID, 0),
        AuxEntry(AT_GID, 0),
        AuxEntry(AT_EGID, 0),
    ];
    if let Some(e) = interp_entry {
        auxv.push(AuxEntry(AT_BASE, e.0));
    }

    let layout = stack::build_stack(&mut mem, stack_top, &argv, &envp, auxv, platform);

    let meta = LoaderMeta {
        argv,
        envp,
        interp_path: info.interp_path,
        cwd: std::env::current_dir().map(|p| p.display().to_string()).unwrap_or_default(),
        stdin_path: None,
        stdout_path: None,
        stack_base,
        stack_top,
        stack_size: USER_STACK_SIZE as u32,
        environ_base: layout.envp_base,
        lowest_addr: info.lowest_addr,
        entry: interp_entry.unwrap_or(info.entry),
        interp_entry,
        phdr_base: info.phdr_addr,
        phdr_count: info.ph_count,
        random_addr: VirtAddr(layout.sp.0.saturating_sub(AT_RANDOM_BYTES as u32)),
        machine: info.machine,
    };

    Ok(LoadedProgram { memory: mem, meta, entry_sp: layout.sp })
}
