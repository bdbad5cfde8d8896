//! Catalog entry descriptors: files, links, and recorded empty dirs.

use std::path::{Path, PathBuf};

use smallvec::SmallVec;

use crate::block::{self, Block};

/// Stored nanosecond mtime meaning "unknown". Catalogs written by older
/// versions carry this; any live value is accepted and upgraded in place.
pub const NSEC_INVALID: i32 = -1;

/// A regular file under protection. Identified by (sub-path, inode); the
/// block vector maps block index to parity slot.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub sub: PathBuf,
    pub size: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: i32,
    pub inode: u64,
    /// Transient per-scan flag: set when the entry is found alive on
    /// disk, cleared at scan start. Entries still unset at sweep time
    /// are removed.
    pub present: bool,
    pub blocks: SmallVec<[Block; 2]>,
}

impl FileEntry {
    /// A freshly discovered file with all blocks awaiting slot
    /// allocation.
    pub fn new(
        block_size: u64,
        sub: PathBuf,
        size: u64,
        mtime_sec: i64,
        mtime_nsec: i32,
        inode: u64,
    ) -> Self {
        let nblocks = block::block_count(size, block_size) as usize;
        let mut blocks = SmallVec::with_capacity(nblocks);
        blocks.extend(std::iter::repeat_with(Block::unallocated).take(nblocks));
        FileEntry {
            sub,
            size,
            mtime_sec,
            mtime_nsec,
            inode,
            present: false,
            blocks,
        }
    }

    pub fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Symlink,
    /// An extra directory entry aliasing a file already in the catalog;
    /// `target` is the canonical file's sub-path.
    Hardlink,
}

/// A symlink, or the non-canonical name of a hardlinked file.
#[derive(Debug, Clone)]
pub struct LinkEntry {
    pub sub: PathBuf,
    pub target: PathBuf,
    pub kind: LinkKind,
    pub present: bool,
}

impl LinkEntry {
    pub fn new(sub: PathBuf, target: PathBuf, kind: LinkKind) -> Self {
        LinkEntry {
            sub,
            target,
            kind,
            present: false,
        }
    }
}

/// A directory with no recorded children. Non-empty directories are
/// implicit in their files, but an empty one must be remembered or the
/// tree shape cannot be recovered.
#[derive(Debug, Clone)]
pub struct EmptyDirEntry {
    pub sub: PathBuf,
    pub present: bool,
}

impl EmptyDirEntry {
    pub fn new(sub: impl Into<PathBuf>) -> Self {
        EmptyDirEntry {
            sub: sub.into(),
            present: false,
        }
    }
}

/// Byte-wise path comparison helper; catalog identity is byte-faithful.
pub fn same_sub(a: &Path, b: &Path) -> bool {
    a.as_os_str() == b.as_os_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockState, POS_UNALLOCATED};

    #[test]
    fn new_file_sizes_block_vector() {
        let f = FileEntry::new(1024, "a/b".into(), 2500, 1000, 0, 42);
        assert_eq!(f.block_count(), 3);
        assert!(f
            .blocks
            .iter()
            .all(|b| b.parity_pos == POS_UNALLOCATED && b.state == BlockState::New));
        assert!(!f.present);
    }

    #[test]
    fn zero_size_file_has_no_blocks() {
        let f = FileEntry::new(1024, "empty".into(), 0, 1000, 0, 43);
        assert_eq!(f.block_count(), 0);
    }
}
