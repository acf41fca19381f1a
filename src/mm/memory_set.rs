//! Sparse guest virtual memory. Grounded on
//! `NoAxiom/kernel/src/mm/memory_set.rs`, generalized from a single
//! ELF-backed `MemorySet` to the full map/unmap/protect/reserve/brk
//! surface spec.md §3 requires, plus fork-time cloning and shared
//! ownership across contexts (spec.md §3 "Memory may be shared...").

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::config::{MMAP_BASE, PAGE_SIZE, USER_HEAP_SIZE_INIT};
use crate::errno::Errno;
use crate::mm::address::{VirtAddr, VirtPageNum};
use crate::mm::page::Page;
use crate::mm::perm::PagePermission;

/// shared handle to a guest address space; last `Arc` drop releases pages
pub type SharedMemory = Arc<Mutex<MemorySet>>;

pub struct MemorySet {
    pages: BTreeMap<VirtPageNum, Page>,
    /// heap break cursor (spec.md §3 "heap break")
    pub heap_base: VirtAddr,
    pub heap_brk: VirtAddr,
    heap_limit: VirtAddr,
    /// next hint for downward mmap search (spec.md §4.4)
    mmap_cursor: VirtAddr,
}

impl MemorySet {
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
            heap_base: VirtAddr(0),
            heap_brk: VirtAddr(0),
            heap_limit: VirtAddr(0),
            mmap_cursor: VirtAddr(MMAP_BASE),
        }
    }

    pub fn into_shared(self) -> SharedMemory {
        Arc::new(Mutex::new(self))
    }

    /// deep-clone the mapping structure and pages (spec.md §3 "cloned at fork")
    pub fn fork(&self) -> MemorySet {
        MemorySet {
            pages: self.pages.clone(),
            heap_base: self.heap_base,
            heap_brk: self.heap_brk,
            heap_limit: self.heap_limit,
            mmap_cursor: self.mmap_cursor,
        }
    }

    pub fn init_heap(&mut self, base: VirtAddr) {
        self.heap_base = base;
        self.heap_brk = base;
        self.heap_limit = base + USER_HEAP_SIZE_INIT as u32;
    }

    /// map a page-aligned [start, end) range with the given permission;
    /// `data` if present is copied in page-sized chunks starting at `start`
    /// (spec.md §4.4 "On file-backed maps, read the file... using init permission")
    pub fn map(&mut self, start: VirtAddr, end: VirtAddr, perm: PagePermission, data: Option<&[u8]>) {
        assert!(start.is_aligned() && end.is_aligned());
        let vpn_start = start.floor().0;
        let vpn_end = end.floor().0;
        for vpn in vpn_start..vpn_end {
            let mut page = Page::new(perm | PagePermission::INIT);
            if let Some(d) = data {
                let off = ((vpn - vpn_start) as usize) * PAGE_SIZE;
                if off < d.len() {
                    let n = (d.len() - off).min(PAGE_SIZE);
                    page.bytes[..n].copy_from_slice(&d[off..off + n]);
                }
            }
            self.pages.insert(VirtPageNum(vpn), page);
        }
    }

    pub fn unmap(&mut self, start: VirtAddr, end: VirtAddr) {
        assert!(start.is_aligned() && end.is_aligned());
        for vpn in start.floor().0..end.floor().0 {
            self.pages.remove(&VirtPageNum(vpn));
        }
    }

    /// change permission over an existing range; MODIFIED is preserved
    /// (SPEC_FULL.md §4 "Page permission transitions... must preserve
    /// the modified bit")
    pub fn protect(&mut self, start: VirtAddr, end: VirtAddr, perm: PagePermission) -> SysResultUnit {
        assert!(start.is_aligned() && end.is_aligned());
        for vpn in start.floor().0..end.floor().0 {
            let page = self.pages.get_mut(&VirtPageNum(vpn)).ok_or(Errno::ENOMEM)?;
            let modified = page.perm & PagePermission::MODIFIED;
            page.perm = perm | PagePermission::INIT | modified;
        }
        Ok(())
    }

    /// find `len` contiguous unmapped bytes, searching downward from `hint`
    /// if given, else from the internal cursor; falls back to the global
    /// base if the hint range is occupied (spec.md §4.4)
    pub fn reserve(&mut self, hint: Option<VirtAddr>, len: u32) -> VirtAddr {
        let aligned_len = align_up(len);
        let mut candidate = hint.unwrap_or(self.mmap_cursor);
        loop {
            if self.range_is_free(candidate, candidate + aligned_len) {
                if hint.is_none() || !self.range_is_free(hint.unwrap(), hint.unwrap() + aligned_len) {
                    self.mmap_cursor = candidate - aligned_len;
                }
                return candidate;
            }
            candidate = candidate - (PAGE_SIZE as u32);
            if candidate.0 < PAGE_SIZE as u32 * 16 {
                candidate = VirtAddr(MMAP_BASE);
                break;
            }
        }
        candidate
    }

    fn range_is_free(&self, start: VirtAddr, end: VirtAddr) -> bool {
        (start.floor().0..end.floor().0).all(|vpn| !self.pages.contains_key(&VirtPageNum(vpn)))
    }

    pub fn is_mapped(&self, addr: VirtAddr) -> bool {
        self.pages.contains_key(&addr.floor())
    }

    /// all currently-mapped page numbers, in ascending order
    pub fn mapped_vpns(&self) -> Vec<VirtPageNum> {
        self.pages.keys().copied().collect()
    }

    pub fn perm_at(&self, addr: VirtAddr) -> Option<PagePermission> {
        self.pages.get(&addr.floor()).map(|p| p.perm)
    }

    /// read a byte range, possibly spanning pages; unmapped bytes fault
    pub fn read(&self, addr: VirtAddr, len: usize) -> SysResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut cur = addr;
        let mut remaining = len;
        while remaining > 0 {
            let page = self.pages.get(&cur.floor()).ok_or(Errno::EFAULT)?;
            let off = cur.offset();
            let n = (PAGE_SIZE - off).min(remaining);
            out.extend_from_slice(&page.bytes[off..off + n]);
            cur = cur + n as u32;
            remaining -= n;
        }
        Ok(out)
    }

    /// write a byte range, possibly spanning pages, marking touched pages MODIFIED
    pub fn write(&mut self, addr: VirtAddr, data: &[u8]) -> SysResultUnit {
        let mut cur = addr;
        let mut remaining = data.len();
        let mut src_off = 0usize;
        while remaining > 0 {
            let page = self.pages.get_mut(&cur.floor()).ok_or(Errno::EFAULT)?;
            if !page.perm.writable() {
                return Err(Errno::EFAULT);
            }
            let off = cur.offset();
            let n = (PAGE_SIZE - off).min(remaining);
            page.bytes[off..off + n].copy_from_slice(&data[src_off..src_off + n]);
            page.mark_modified();
            cur = cur + n as u32;
            src_off += n;
            remaining -= n;
        }
        Ok(())
    }

    /// read a NUL-terminated string starting at `addr`
    pub fn read_cstr(&self, addr: VirtAddr) -> SysResult<String> {
        let mut out = Vec::new();
        let mut cur = addr;
        loop {
            let page = self.pages.get(&cur.floor()).ok_or(Errno::EFAULT)?;
            let b = page.bytes[cur.offset()];
            if b == 0 {
                break;
            }
            out.push(b);
            cur = cur + 1;
            if out.len() > 1 << 20 {
                return Err(Errno::ENAMETOOLONG);
            }
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// `brk` semantics: 0 queries the current break; otherwise grow/shrink
    /// and lazily map/unmap the delta (spec.md §3 "heap break")
    pub fn brk(&mut self, requested: VirtAddr) -> VirtAddr {
        if requested.0 == 0 || requested == self.heap_base {
            return self.heap_brk;
        }
        let new_brk = requested;
        let old_end = self.heap_brk.ceil().addr();
        let new_end = new_brk.ceil().addr();
        if new_end.0 > old_end.0 {
            self.map(old_end, new_end, PagePermission::READ | PagePermission::WRITE, None);
        } else if new_end.0 < old_end.0 {
            self.unmap(new_end, old_end);
        }
        self.heap_brk = new_brk;
        new_brk
    }
}

impl Default for MemorySet {
    fn default() -> Self {
        Self::new()
    }
}

fn align_up(len: u32) -> u32 {
    let page = PAGE_SIZE as u32;
    (len + page - 1) & !(page - 1)
}

pub type SysResult<T> = Result<T, Errno>;
pub type SysResultUnit = Result<(), Errno>;

#[cfg(test)]
mod tests {
    use super::*;

    fn perm_rw() -> PagePermission {
        PagePermission::READ | PagePermission::WRITE
    }

    #[test]
    fn map_write_read_round_trip() {
        let mut ms = MemorySet::new();
        ms.map(VirtAddr(0x1000), VirtAddr(0x3000), perm_rw(), None);
        ms.write(VirtAddr(0x1500), &[1, 2, 3, 4]).unwrap();
        let data = ms.read(VirtAddr(0x1500), 4).unwrap();
        assert_eq!(data, vec![1, 2, 3, 4]);
        assert!(ms.perm_at(VirtAddr(0x1500)).unwrap().contains(PagePermission::MODIFIED));
    }

    #[test]
    fn write_spans_pages() {
        let mut ms = MemorySet::new();
        ms.map(VirtAddr(0x1000), VirtAddr(0x3000), perm_rw(), None);
        let data = vec![7u8; PAGE_SIZE + 16];
        ms.write(VirtAddr(0x1000 + PAGE_SIZE as u32 - 8), &data).unwrap();
        let back = ms.read(VirtAddr(0x1000 + PAGE_SIZE as u32 - 8), data.len()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn unmap_then_remap_reuses_range() {
        let mut ms = MemorySet::new();
        let start = VirtAddr(0x4000);
        let end = VirtAddr(0x5000);
        ms.map(start, end, perm_rw(), None);
        ms.unmap(start, end);
        assert!(!ms.is_mapped(start));
        ms.map(start, end, perm_rw(), None);
        assert!(ms.is_mapped(start));
    }

    #[test]
    fn brk_grow_then_query_then_shrink() {
        // P5: brk(x); brk(0) returns the aligned new break
        let mut ms = MemorySet::new();
        ms.init_heap(VirtAddr(0x1_0000));
        let x = ms.heap_brk;
        let grown = ms.brk(x + 0x3000);
        assert_eq!(grown, x + 0x3000);
        assert_eq!(ms.brk(VirtAddr(0)), x + 0x3000);

        ms.write(x + 0x2fff, &[0xAA]).unwrap();
        assert_eq!(ms.read(x + 0x2fff, 1).unwrap(), vec![0xAA]);

        let shrunk = ms.brk(x);
        assert_eq!(shrunk, x);
    }

    #[test]
    fn protect_preserves_modified_bit() {
        let mut ms = MemorySet::new();
        ms.map(VirtAddr(0x1000), VirtAddr(0x2000), perm_rw(), None);
        ms.write(VirtAddr(0x1000), &[1]).unwrap();
        ms.protect(VirtAddr(0x1000), VirtAddr(0x2000), PagePermission::READ).unwrap();
        let perm = ms.perm_at(VirtAddr(0x1000)).unwrap();
        assert!(perm.contains(PagePermission::MODIFIED));
        assert!(!perm.writable());
    }

    #[test]
    fn fork_deep_clones_pages() {
        let mut ms = MemorySet::new();
        ms.map(VirtAddr(0x1000), VirtAddr(0x2000), perm_rw(), None);
        ms.write(VirtAddr(0x1000), &[9]).unwrap();
        let mut cloned = ms.fork();
        cloned.write(VirtAddr(0x1000), &[10]).unwrap();
        assert_eq!(ms.read(VirtAddr(0x1000), 1).unwrap(), vec![9]);
        assert_eq!(cloned.read(VirtAddr(0x1000), 1).unwrap(), vec![10]);
    }

    #[test]
    fn read_cstr_stops_at_nul() {
        let mut ms = MemorySet::new();
        ms.map(VirtAddr(0x1000), VirtAddr(0x2000), perm_rw(), None);
        ms.write(VirtAddr(0x1000), b"hi\0garbage").unwrap();
        assert_eq!(ms.read_cstr(VirtAddr(0x1000)).unwrap(), "hi");
    }
}
