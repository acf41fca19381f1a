//! ELF loading. Grounded on `NoAxiom/kernel/src/mm/memory_set.rs::new_from_elf`
//! (xmas_elf usage, PT_LOAD mapping), generalized to also honor
//! PT_INTERP/PT_PHDR/PT_NOTE/PT_GNU_STACK per spec.md §6.

use xmas_elf::program::Type as PhType;
use xmas_elf::ElfFile;

use crate::config::{INTERP_BASE, PAGE_SIZE};
use crate::errno::SimError;
use crate::mm::address::VirtAddr;
use crate::mm::memory_set::MemorySet;
use crate::mm::perm::PagePermission;

const EM_MIPS: u16 = 8;
const EM_386: u16 = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Machine {
    Mips,
    X86,
}

/// result of mapping one ELF image (the main binary, or its interpreter)
pub struct LoadedImage {
    pub entry: VirtAddr,
    pub lowest_addr: VirtAddr,
    pub highest_addr: VirtAddr,
    pub phdr_addr: VirtAddr,
    pub ph_entry_size: u32,
    pub ph_count: u32,
    pub interp_path: Option<String>,
    pub machine: Machine,
}

fn perm_from_flags(flags: xmas_elf::program::Flags) -> PagePermission {
    let mut perm = PagePermission::INIT;
    if flags.is_read() {
        perm |= PagePermission::READ;
    }
    if flags.is_write() {
        perm |= PagePermission::WRITE;
    }
    if flags.is_execute() {
        perm |= PagePermission::EXEC;
    }
    perm
}

fn machine_of(e_machine: u16) -> Result<Machine, SimError> {
    match e_machine {
        EM_MIPS => Ok(Machine::Mips),
        EM_386 => Ok(Machine::X86),
        other => Err(SimError::Loader(format!("unsupported e_machine {other}"))),
    }
}

/// map every `PT_LOAD` segment of `bytes` into `mem` at `load_bias` above
/// each segment's own `p_vaddr`; returns the image's layout metadata.
///
/// honors `PT_LOAD`, `PT_INTERP`, `PT_PHDR`, `PT_NOTE`, `PT_GNU_STACK`
/// (the last two are read but impose no mapping of their own, matching
/// their meaning for a userspace loader: NOTE is informational, and
/// GNU_STACK only toggles stack executability, which this spec's
/// fixed non-executable stack already satisfies).
pub fn load_image(bytes: &[u8], load_bias: u32) -> Result<(MemorySet, LoadedImage), SimError> {
    let elf = ElfFile::new(bytes).map_err(|e| SimError::Loader(e.to_string()))?;
    let magic = elf.header.pt1.magic;
    if magic != [0x7f, 0x45, 0x4c, 0x46] {
        return Err(SimError::Loader("bad ELF magic".into()));
    }
    let machine = machine_of(elf.header.pt2.machine().as_machine() as u16)?;

    let mut mem = MemorySet::new();
    let mut lowest = u32::MAX;
    let mut highest = 0u32;
    let mut interp_path = None;
    let mut phdr_addr = VirtAddr(0);
    let ph_count = elf.header.pt2.ph_count() as u32;
    let ph_entry_size = elf.header.pt2.ph_entry_size() as u32;

    for i in 0..ph_count {
        let ph = elf.program_header(i as u16).map_err(|e| SimError::Loader(e.to_string()))?;
        match ph.get_type() {
            Ok(PhType::Load) => {
                let vaddr = load_bias.wrapping_add(ph.virtual_addr() as u32);
                let start = VirtAddr(vaddr & !((PAGE_SIZE as u32) - 1));
                let end = VirtAddr(
                    (vaddr.wrapping_add(ph.mem_size() as u32) + PAGE_SIZE as u32 - 1)
                        & !((PAGE_SIZE as u32) - 1),
                );
                let perm = perm_from_flags(ph.flags());
                let file_off = ph.offset() as usize;
                let file_sz = ph.file_size() as usize;
                let seg_data = &bytes[file_off..file_off + file_sz];
                mem.map(start, end, perm, None);
                mem.write(VirtAddr(vaddr), seg_data)
                    .map_err(|e| SimError::Loader(format!("segment write failed: {e:?}")))?;
                lowest = lowest.min(start.0);
                highest = highest.max(end.0);
            }
            Ok(PhType::Interp) => {
                let off = ph.offset() as usize;
                let sz = ph.file_size() as usize;
                let s = String::from_utf8_lossy(&bytes[off..off + sz.saturating_sub(1)]).into_owned();
                interp_path = Some(s);
            }
            Ok(PhType::Phdr) => {
                phdr_addr = VirtAddr(load_bias.wrapping_add(ph.virtual_addr() as u32));
            }
            // PT_NOTE, PT_GNU_STACK (OS-specific): honored by being read
            // and otherwise ignored, per spec.md §6.
            _ => {}
        }
    }

    if phdr_addr.0 == 0 {
        // no PT_PHDR segment; the table still lives in the file image at e_phoff
        phdr_addr = VirtAddr(load_bias.wrapping_add(elf.header.pt2.ph_offset() as u32));
    }

    Ok((
        mem,
        LoadedImage {
            entry: VirtAddr(load_bias.wrapping_add(elf.header.pt2.entry_point() as u32)),
            lowest_addr: VirtAddr(lowest),
            highest_addr: VirtAddr(highest),
            phdr_addr,
            ph_entry_size,
            ph_count,
            interp_path,
            machine,
        },
    ))
}

/// merge an interpreter image's pages into an already-loaded main image's
/// `MemorySet`, loaded at the fixed high base (spec.md §6)
pub fn load_interpreter(bytes: &[u8], main: &mut MemorySet) -> Result<LoadedImage, SimError> {
    let (interp_mem, info) = load_image(bytes, INTERP_BASE)?;
    merge(main, interp_mem);
    Ok(info)
}

fn merge(dst: &mut MemorySet, src: MemorySet) {
    // pages never overlap between a main image and its interpreter at
    // INTERP_BASE by construction, so a page-by-page copy is exact
    for vpn in src.mapped_vpns() {
        let addr = vpn.addr();
        if let Some(perm) = src.perm_at(addr) {
            let data = src.read(addr, PAGE_SIZE).unwrap_or_default();
            dst.map(addr, addr + PAGE_SIZE as u32, perm, Some(&data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A hand-built minimal 32-bit MIPS ELF with a single PT_LOAD segment
    // covering the whole file, entry point at the segment's start.
    fn tiny_mips_elf() -> Vec<u8> {
        let mut buf = vec![0u8; 0x1000];
        buf[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        buf[4] = 1; // ELFCLASS32
        buf[5] = 1; // little endian
        buf[6] = 1; // EV_CURRENT
        let e_type: u16 = 2; // ET_EXEC
        let e_machine: u16 = EM_MIPS;
        let e_version: u32 = 1;
        let e_entry: u32 = 0x400000;
        let e_phoff: u32 = 52;
        let e_shoff: u32 = 0;
        let e_flags: u32 = 0;
        let e_ehsize: u16 = 52;
        let e_phentsize: u16 = 32;
        let e_phnum: u16 = 1;
        let e_shentsize: u16 = 0;
        let e_shnum: u16 = 0;
        let e_shstrndx: u16 = 0;
        buf[16..18].copy_from_slice(&e_type.to_le_bytes());
        buf[18..20].copy_from_slice(&e_machine.to_le_bytes());
        buf[20..24].copy_from_slice(&e_version.to_le_bytes());
        buf[24..28].copy_from_slice(&e_entry.to_le_bytes());
        buf[28..32].copy_from_slice(&e_phoff.to_le_bytes());
        buf[32..36].copy_from_slice(&e_shoff.to_le_bytes());
        buf[36..40].copy_from_slice(&e_flags.to_le_bytes());
        buf[40..42].copy_from_slice(&e_ehsize.to_le_bytes());
        buf[42..44].copy_from_slice(&e_phentsize.to_le_bytes());
        buf[44..46].copy_from_slice(&e_phnum.to_le_bytes());
        buf[46..48].copy_from_slice(&e_shentsize.to_le_bytes());
        buf[48..50].copy_from_slice(&e_shnum.to_le_bytes());
        buf[50..52].copy_from_slice(&e_shstrndx.to_le_bytes());

        // one PT_LOAD program header at offset 52
        let p_type: u32 = 1; // PT_LOAD
        let p_offset: u32 = 0;
        let p_vaddr: u32 = 0x400000;
        let p_paddr: u32 = 0x400000;
        let p_filesz: u32 = 0x1000;
        let p_memsz: u32 = 0x1000;
        let p_flags: u32 = 5; // R+X
        let p_align: u32 = 0x1000;
        let ph = &mut buf[52..84];
        ph[0..4].copy_from_slice(&p_type.to_le_bytes());
        ph[4..8].copy_from_slice(&p_offset.to_le_bytes());
        ph[8..12].copy_from_slice(&p_vaddr.to_le_bytes());
        ph[12..16].copy_from_slice(&p_paddr.to_le_bytes());
        ph[16..20].copy_from_slice(&p_filesz.to_le_bytes());
        ph[20..24].copy_from_slice(&p_memsz.to_le_bytes());
        ph[24..28].copy_from_slice(&p_flags.to_le_bytes());
        ph[28..32].copy_from_slice(&p_align.to_le_bytes());
        buf
    }

    #[test]
    fn loads_single_segment_mips_binary() {
        let bytes = tiny_mips_elf();
        let (mem, info) = load_image(&bytes, 0).expect("load");
        assert_eq!(info.machine, Machine::Mips);
        assert_eq!(info.entry, VirtAddr(0x400000));
        assert!(mem.is_mapped(VirtAddr(0x400000)));
    }
}
