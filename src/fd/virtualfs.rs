//! Synthesized `/proc/*` content (spec.md §4.4 "Virtual files").
//!
//! Backed by a host temp file deleted on close, per spec.md §3
//! "File descriptor table" (`kind ∈ {..., virtual, ...}`).

use std::io::Write;

use tempfile::NamedTempFile;

use crate::mm::memory_set::MemorySet;

/// render `/proc/self/maps` from the live `MemorySet`'s mapped ranges
pub fn render_self_maps(mem: &MemorySet) -> String {
    let mut vpns = mem.mapped_vpns();
    vpns.sort();
    let mut out = String::new();
    let mut run_start: Option<u32> = None;
    let mut prev: Option<u32> = None;
    for vpn in vpns {
        let addr = vpn.addr().0;
        match (run_start, prev) {
            (None, _) => {
                run_start = Some(addr);
            }
            (Some(_), Some(p)) if addr != p + 4096 => {
                out.push_str(&format!("{:08x}-{:08x} r-xp 00000000 00:00 0\n", run_start.unwrap(), p + 4096));
                run_start = Some(addr);
            }
            _ => {}
        }
        prev = Some(addr);
    }
    if let (Some(s), Some(p)) = (run_start, prev) {
        out.push_str(&format!("{:08x}-{:08x} r-xp 00000000 00:00 0\n", s, p + 4096));
    }
    out
}

pub fn render_cpuinfo() -> String {
    "processor\t: 0\nvendor_id\t: emusim\ncpu family\t: 0\nmodel\t\t: 0\nmodel name\t: emulated guest CPU\n".to_string()
}

/// materialize synthesized content into a host temp file and return
/// its fd and path for the FdTable entry
pub fn materialize(content: &str) -> std::io::Result<(i32, String)> {
    let mut f = NamedTempFile::new()?;
    f.write_all(content.as_bytes())?;
    let (file, path) = f.keep().map_err(|e| e.error)?;
    use std::os::unix::io::IntoRawFd;
    Ok((file.into_raw_fd(), path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::address::VirtAddr;
    use crate::mm::perm::PagePermission;

    #[test]
    fn cpuinfo_mentions_processor() {
        assert!(render_cpuinfo().contains("processor"));
    }

    #[test]
    fn self_maps_covers_mapped_range() {
        let mut mem = MemorySet::new();
        mem.map(VirtAddr(0x1000), VirtAddr(0x4000), PagePermission::READ, None);
        let maps = render_self_maps(&mem);
        assert!(maps.contains("00001000-00004000"));
    }
}
