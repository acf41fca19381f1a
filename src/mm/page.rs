//! A single host-resident 4 KiB guest page.

use crate::config::PAGE_SIZE;
use crate::mm::perm::PagePermission;

#[derive(Clone)]
pub struct Page {
    pub bytes: Box<[u8; PAGE_SIZE]>,
    pub perm: PagePermission,
}

impl Page {
    pub fn new(perm: PagePermission) -> Self {
        Self {
            bytes: Box::new([0u8; PAGE_SIZE]),
            perm,
        }
    }

    pub fn mark_modified(&mut self) {
        self.perm |= PagePermission::MODIFIED;
    }
}
