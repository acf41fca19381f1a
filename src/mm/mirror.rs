//! Speculative memory overlay (spec.md §3 "speculative mirror", §9
//! "Speculative memory"). Hit the overlay first on reads; buffer
//! writes into it; discard without touching the base image on abort.

use std::collections::HashMap;

use crate::config::PAGE_SIZE;
use crate::mm::address::{VirtAddr, VirtPageNum};
use crate::mm::memory_set::{MemorySet, SysResult, SysResultUnit};

#[derive(Default)]
pub struct SpeculativeMirror {
    dirtied: HashMap<VirtPageNum, [u8; PAGE_SIZE]>,
}

impl SpeculativeMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        !self.dirtied.is_empty()
    }

    /// discard all buffered writes without touching the base image
    pub fn discard(&mut self) {
        self.dirtied.clear();
    }

    pub fn read(&self, base: &MemorySet, addr: VirtAddr, len: usize) -> SysResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut cur = addr;
        let mut remaining = len;
        while remaining > 0 {
            let off = cur.offset();
            let n = (PAGE_SIZE - off).min(remaining);
            if let Some(page) = self.dirtied.get(&cur.floor()) {
                out.extend_from_slice(&page[off..off + n]);
            } else {
                out.extend_from_slice(&base.read(cur, n)?);
            }
            cur = cur + n as u32;
            remaining -= n;
        }
        Ok(out)
    }

    /// buffer a write into the mirror, copy-on-first-touch from `base`
    pub fn write(&mut self, base: &MemorySet, addr: VirtAddr, data: &[u8]) -> SysResultUnit {
        let mut cur = addr;
        let mut remaining = data.len();
        let mut src_off = 0usize;
        while remaining > 0 {
            let vpn = cur.floor();
            if !self.dirtied.contains_key(&vpn) {
                let mut buf = [0u8; PAGE_SIZE];
                let page_base = vpn.addr();
                if base.is_mapped(page_base) {
                    buf.copy_from_slice(&base.read(page_base, PAGE_SIZE)?);
                }
                self.dirtied.insert(vpn, buf);
            }
            let off = cur.offset();
            let n = (PAGE_SIZE - off).min(remaining);
            let page = self.dirtied.get_mut(&vpn).unwrap();
            page[off..off + n].copy_from_slice(&data[src_off..src_off + n]);
            cur = cur + n as u32;
            src_off += n;
            remaining -= n;
        }
        Ok(())
    }

    /// commit buffered pages into the base image and clear the overlay
    pub fn commit(&mut self, base: &mut MemorySet) -> SysResultUnit {
        for (vpn, buf) in self.dirtied.drain() {
            base.write(vpn.addr(), &buf)?;
        }
        Ok(())
    }
}
