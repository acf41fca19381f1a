//! A cache level or main memory node. Grounded on spec.md §3 "Cache
//! module" and §4.5 "Cache + directory (CD)": set-associative tags
//! with LRU replacement; *access-block*/*replace-block* touch only LRU
//! bookkeeping and tag arrays and never drive messages.

use crate::mem_hier::cache::directory::DirEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoesiState {
    M,
    O,
    E,
    S,
    I,
}

impl MoesiState {
    pub fn is_valid(self) -> bool {
        self != MoesiState::I
    }
    pub fn is_dirty(self) -> bool {
        matches!(self, MoesiState::M | MoesiState::O)
    }
}

#[derive(Clone, Debug)]
pub struct Line {
    pub tag: Option<u32>,
    /// tag of a fill in progress; distinguishes "reserved but not yet
    /// valid" (spec.md GLOSSARY "Transient tag")
    pub transient_tag: Option<u32>,
    pub state: MoesiState,
    pub data: Vec<u8>,
    pub sub_dirs: Vec<DirEntry>,
}

impl Line {
    fn new(block_size: usize, sub_block_count: usize) -> Self {
        Self {
            tag: None,
            transient_tag: None,
            state: MoesiState::I,
            data: vec![0u8; block_size],
            sub_dirs: vec![DirEntry::default(); sub_block_count],
        }
    }
}

pub struct CacheSet {
    pub ways: Vec<Line>,
    /// way indices, front = most-recently-used
    lru: Vec<usize>,
}

impl CacheSet {
    fn new(associativity: usize, block_size: usize, sub_block_count: usize) -> Self {
        Self {
            ways: (0..associativity).map(|_| Line::new(block_size, sub_block_count)).collect(),
            lru: (0..associativity).collect(),
        }
    }

    /// promote `way` to most-recently-used; never drives messages
    /// (spec.md §4.5 "access-block")
    pub fn access_block(&mut self, way: usize) {
        self.lru.retain(|&w| w != way);
        self.lru.insert(0, way);
    }

    /// the least-recently-used way, for a miss's victim selection
    /// (spec.md §4.5 "replace-block")
    pub fn lru_victim(&self) -> usize {
        *self.lru.last().unwrap()
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ModuleStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub retries: u64,
}

pub enum ModuleBacking {
    Cache { sets: Vec<CacheSet> },
    /// main memory: infinite backing store, materializes blocks as E on
    /// demand (spec.md §4.5 "Main-memory modules always materialize the
    /// block as E on demand")
    MainMemory { store: std::collections::HashMap<u32, Vec<u8>> },
}

pub struct CacheModule {
    pub name: String,
    pub block_size: u32,
    pub associativity: usize,
    pub set_count: usize,
    pub min_block_size: u32,
    pub latency: u64,
    pub backing: ModuleBacking,
    /// index of the single module directly below, if any
    pub lower: Option<usize>,
    /// indices of the modules directly above (nearer-CPU); a directory
    /// sharer/owner `NodeId` is this module's position in this list
    /// (spec.md §3 "Directory": "sharer bitmask over upper-level nodes")
    pub uppers: Vec<usize>,
    pub stats: ModuleStats,
}

impl CacheModule {
    pub fn new_cache(name: &str, block_size: u32, associativity: usize, set_count: usize, min_block_size: u32, latency: u64) -> Self {
        let sub_block_count = (block_size / min_block_size).max(1) as usize;
        let sets = (0..set_count).map(|_| CacheSet::new(associativity, block_size as usize, sub_block_count)).collect();
        Self {
            name: name.to_string(),
            block_size,
            associativity,
            set_count,
            min_block_size,
            latency,
            backing: ModuleBacking::Cache { sets },
            lower: None,
            uppers: Vec::new(),
            stats: ModuleStats::default(),
        }
    }

    pub fn new_main_memory(name: &str, block_size: u32, latency: u64) -> Self {
        Self {
            name: name.to_string(),
            block_size,
            associativity: 0,
            set_count: 0,
            min_block_size: block_size,
            latency,
            backing: ModuleBacking::MainMemory { store: std::collections::HashMap::new() },
            lower: None,
            uppers: Vec::new(),
            stats: ModuleStats::default(),
        }
    }

    pub fn is_main_memory(&self) -> bool {
        matches!(self.backing, ModuleBacking::MainMemory { .. })
    }

    /// decompose an address into (set, tag) for this module's geometry
    pub fn addr_to_set_tag(&self, addr: u32) -> (usize, u32) {
        let offset_bits = self.block_size.trailing_zeros();
        let set_bits = self.set_count.max(1).trailing_zeros();
        let set = ((addr >> offset_bits) as usize) & (self.set_count.max(1) - 1);
        let tag = addr >> (offset_bits + set_bits);
        (set, tag)
    }

    pub fn block_base(&self, addr: u32) -> u32 {
        addr & !(self.block_size - 1)
    }

    /// find a resident way for (set, tag); None on miss
    pub fn find_way(&self, set: usize, tag: u32) -> Option<usize> {
        match &self.backing {
            ModuleBacking::Cache { sets } => {
                sets[set].ways.iter().position(|l| l.state.is_valid() && l.tag == Some(tag))
            }
            ModuleBacking::MainMemory { .. } => None,
        }
    }

    pub fn line_mut(&mut self, set: usize, way: usize) -> &mut Line {
        match &mut self.backing {
            ModuleBacking::Cache { sets } => &mut sets[set].ways[way],
            ModuleBacking::MainMemory { .. } => unreachable!("main memory has no set/way lines"),
        }
    }
    pub fn line(&self, set: usize, way: usize) -> &Line {
        match &self.backing {
            ModuleBacking::Cache { sets } => &sets[set].ways[way],
            ModuleBacking::MainMemory { .. } => unreachable!("main memory has no set/way lines"),
        }
    }

    pub fn access_block(&mut self, set: usize, way: usize) {
        if let ModuleBacking::Cache { sets } = &mut self.backing {
            sets[set].access_block(way);
        }
    }
    pub fn lru_victim(&self, set: usize) -> usize {
        match &self.backing {
            ModuleBacking::Cache { sets } => sets[set].lru_victim(),
            ModuleBacking::MainMemory { .. } => 0,
        }
    }

    /// main memory: materialize a block on demand, always as E
    pub fn main_memory_read(&mut self, block_addr: u32) -> Vec<u8> {
        match &mut self.backing {
            ModuleBacking::MainMemory { store } => store.entry(block_addr).or_insert_with(|| vec![0u8; self.block_size as usize]).clone(),
            ModuleBacking::Cache { .. } => unreachable!(),
        }
    }
    pub fn main_memory_write(&mut self, block_addr: u32, data: Vec<u8>) {
        if let ModuleBacking::MainMemory { store } = &mut self.backing {
            store.insert(block_addr, data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_associative_addr_decomposition() {
        let m = CacheModule::new_cache("L1", 64, 2, 4, 64, 1);
        let (set0, tag0) = m.addr_to_set_tag(0x1000);
        let (set1, _) = m.addr_to_set_tag(0x1000 + 64 * 4);
        assert_eq!(set0, set1); // same set, 4 sets apart wraps around
        assert_ne!(tag0, m.addr_to_set_tag(0x2000).1);
    }

    #[test]
    fn lru_promotes_on_access_and_evicts_oldest() {
        let mut m = CacheModule::new_cache("L1", 64, 2, 1, 64, 1);
        assert_eq!(m.lru_victim(0), 0);
        m.access_block(0, 0);
        assert_eq!(m.lru_victim(0), 1);
        m.access_block(0, 1);
        assert_eq!(m.lru_victim(0), 0);
    }
}
