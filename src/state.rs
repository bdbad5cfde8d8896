//! Array-wide state: the disks under protection plus the knobs the scan
//! observes.

use crate::disk::Disk;
use crate::filter::Filters;

/// Default parity block size, 256 KiB.
pub const DEFAULT_BLOCK_SIZE: u64 = 256 * 1024;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub block_size: u64,
    /// Use the path as primary file identity instead of the inode.
    /// For filesystems whose inodes are not stable across remounts.
    pub find_by_name: bool,
    /// Accept files that regressed to zero size under the same name.
    pub force_zero: bool,
    /// Accept disks whose previously recorded entries all vanished.
    pub force_empty: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            block_size: DEFAULT_BLOCK_SIZE,
            find_by_name: false,
            force_zero: false,
            force_empty: false,
        }
    }
}

pub struct State {
    pub opts: ScanOptions,
    pub filters: Filters,
    pub disks: Vec<Disk>,
    /// Set whenever the catalog is mutated; the owner serializes the
    /// content file when this is up.
    pub need_write: bool,
}

impl State {
    pub fn new(opts: ScanOptions, filters: Filters) -> Self {
        State {
            opts,
            filters,
            disks: Vec::new(),
            need_write: false,
        }
    }

    pub fn add_disk(&mut self, disk: Disk) {
        self.disks.push(disk);
    }
}
