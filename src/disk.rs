//! Per-disk catalog: entry stores, the path/inode indexes, and the
//! parity slot array.
//!
//! Entries live in arenas so an index stays valid (and detectably stale)
//! across removals; the scan removes files mid-walk and sweeps the rest
//! afterwards, so list snapshots must tolerate holes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use generational_arena::{Arena, Index};

use crate::block::{BlockPos, BlockState, DeletedBlock, ZERO_HASH};
use crate::entry::{EmptyDirEntry, FileEntry, LinkEntry};
use crate::error::ScanError;

/// Occupant of one parity slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Empty,
    /// Owned by block `block` of the live file at `file`.
    Live { file: Index, block: u32 },
    /// Owned by a tombstone.
    Tomb(Index),
}

impl Slot {
    pub fn is_live(&self) -> bool {
        matches!(self, Slot::Live { .. })
    }
}

pub struct Disk {
    pub name: String,
    /// Filesystem root of the protected tree.
    pub dir: PathBuf,

    files: Arena<FileEntry>,
    file_list: Vec<Index>,
    by_path: HashMap<PathBuf, Index>,
    by_inode: HashMap<u64, Index>,

    links: Arena<LinkEntry>,
    link_list: Vec<Index>,
    link_by_path: HashMap<PathBuf, Index>,

    dirs: Arena<EmptyDirEntry>,
    dir_list: Vec<Index>,
    dir_by_path: HashMap<PathBuf, Index>,

    tombs: Arena<DeletedBlock>,
    block_arr: Vec<Slot>,
    /// Lowest slot index that may be free. Allowed to lag during a scan;
    /// after the insert phase every empty slot is at or above it.
    pub first_free_block: BlockPos,
}

impl Disk {
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Disk {
            name: name.into(),
            dir: dir.into(),
            files: Arena::new(),
            file_list: Vec::new(),
            by_path: HashMap::new(),
            by_inode: HashMap::new(),
            links: Arena::new(),
            link_list: Vec::new(),
            link_by_path: HashMap::new(),
            dirs: Arena::new(),
            dir_list: Vec::new(),
            dir_by_path: HashMap::new(),
            tombs: Arena::new(),
            block_arr: Vec::new(),
            first_free_block: 0,
        }
    }

    // --- hydration (what the content-file loader feeds us) ---

    /// Register a file loaded from a content file. Its blocks carry
    /// their prior slot assignments, which are claimed in the block
    /// array.
    pub fn load_file(&mut self, file: FileEntry) -> Result<Index, ScanError> {
        for b in &file.blocks {
            if b.state == BlockState::Deleted {
                return Err(ScanError::inconsistency(format!(
                    "loaded file '{}' carries a deleted block",
                    file.sub.display()
                )));
            }
        }
        let id = self.files.insert(file);
        let file = &self.files[id];
        let mut claims = Vec::with_capacity(file.blocks.len());
        for (i, b) in file.blocks.iter().enumerate() {
            claims.push((b.parity_pos, i as u32));
        }
        let sub = file.sub.clone();
        let inode = file.inode;
        for (pos, i) in claims {
            self.claim_slot(pos, Slot::Live { file: id, block: i })?;
        }
        self.by_path.insert(sub, id);
        self.by_inode.insert(inode, id);
        self.file_list.push(id);
        Ok(id)
    }

    /// Register a tombstone loaded from a content file.
    pub fn load_deleted(&mut self, pos: BlockPos, hash: crate::block::Hash) -> Result<Index, ScanError> {
        let id = self.tombs.insert(DeletedBlock::new(pos, hash));
        self.claim_slot(pos, Slot::Tomb(id))?;
        Ok(id)
    }

    pub fn load_link(&mut self, link: LinkEntry) -> Index {
        let sub = link.sub.clone();
        let id = self.links.insert(link);
        self.link_by_path.insert(sub, id);
        self.link_list.push(id);
        id
    }

    pub fn load_dir(&mut self, dir: EmptyDirEntry) -> Index {
        let sub = dir.sub.clone();
        let id = self.dirs.insert(dir);
        self.dir_by_path.insert(sub, id);
        self.dir_list.push(id);
        id
    }

    fn claim_slot(&mut self, pos: BlockPos, slot: Slot) -> Result<(), ScanError> {
        let pos = pos as usize;
        if pos >= self.block_arr.len() {
            self.block_arr.resize(pos + 1, Slot::Empty);
        }
        if self.block_arr[pos] != Slot::Empty {
            return Err(ScanError::inconsistency(format!(
                "slot {pos} claimed twice on disk '{}'",
                self.name
            )));
        }
        self.block_arr[pos] = slot;
        Ok(())
    }

    // --- lookups ---

    pub fn find_file_by_path(&self, sub: &Path) -> Option<Index> {
        self.by_path.get(sub).copied()
    }

    pub fn find_file_by_inode(&self, inode: u64) -> Option<Index> {
        self.by_inode.get(&inode).copied()
    }

    pub fn find_link(&self, sub: &Path) -> Option<Index> {
        self.link_by_path.get(sub).copied()
    }

    pub fn find_dir(&self, sub: &Path) -> Option<Index> {
        self.dir_by_path.get(sub).copied()
    }

    pub fn file(&self, id: Index) -> Option<&FileEntry> {
        self.files.get(id)
    }

    pub fn file_mut(&mut self, id: Index) -> Option<&mut FileEntry> {
        self.files.get_mut(id)
    }

    pub fn link(&self, id: Index) -> Option<&LinkEntry> {
        self.links.get(id)
    }

    pub fn link_mut(&mut self, id: Index) -> Option<&mut LinkEntry> {
        self.links.get_mut(id)
    }

    pub fn dir(&self, id: Index) -> Option<&EmptyDirEntry> {
        self.dirs.get(id)
    }

    pub fn dir_mut(&mut self, id: Index) -> Option<&mut EmptyDirEntry> {
        self.dirs.get_mut(id)
    }

    pub fn slot(&self, pos: BlockPos) -> Slot {
        self.block_arr
            .get(pos as usize)
            .copied()
            .unwrap_or(Slot::Empty)
    }

    pub fn slot_count(&self) -> usize {
        self.block_arr.len()
    }

    pub fn tomb(&self, id: Index) -> Option<&DeletedBlock> {
        self.tombs.get(id)
    }

    pub fn tomb_count(&self) -> usize {
        self.tombs.len()
    }

    /// Snapshot of the file list; may contain indexes already removed
    /// mid-scan, which no longer resolve.
    pub fn file_ids(&self) -> Vec<Index> {
        self.file_list.clone()
    }

    pub fn link_ids(&self) -> Vec<Index> {
        self.link_list.clone()
    }

    pub fn dir_ids(&self) -> Vec<Index> {
        self.dir_list.clone()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    // --- index maintenance ---

    /// Re-key a file under a new sub-path (rename detected).
    pub fn reindex_file_path(&mut self, id: Index, new_sub: PathBuf) -> Result<(), ScanError> {
        let file = self
            .files
            .get_mut(id)
            .ok_or_else(|| ScanError::inconsistency("reindex of a removed file"))?;
        let old = std::mem::replace(&mut file.sub, new_sub.clone());
        if self.by_path.get(&old) == Some(&id) {
            self.by_path.remove(&old);
        }
        self.by_path.insert(new_sub, id);
        Ok(())
    }

    /// Re-key a file under a new inode (rewrite with identical metadata).
    pub fn reindex_file_inode(&mut self, id: Index, new_inode: u64) -> Result<(), ScanError> {
        let file = self
            .files
            .get_mut(id)
            .ok_or_else(|| ScanError::inconsistency("reindex of a removed file"))?;
        let old = std::mem::replace(&mut file.inode, new_inode);
        if self.by_inode.get(&old) == Some(&id) {
            self.by_inode.remove(&old);
        }
        self.by_inode.insert(new_inode, id);
        Ok(())
    }

    /// Add a new file to the stores and indexes. Slot allocation and the
    /// file-list append happen later, in `attach_file_blocks`, once all
    /// removals for the disk are done.
    pub fn add_file(&mut self, file: FileEntry) -> Index {
        let sub = file.sub.clone();
        let inode = file.inode;
        let id = self.files.insert(file);
        self.by_path.insert(sub, id);
        self.by_inode.insert(inode, id);
        id
    }

    // --- removal (tombstoning) ---

    /// Remove a file, tombstoning every slot it owned.
    ///
    /// A `Blk` block's hash is still what the parity covers, so the
    /// tombstone keeps it. `Chg`/`New` blocks come from an aborted sync:
    /// the parity may or may not have been rewritten for them, so the
    /// tombstone gets a zero hash to record that indeterminacy.
    pub fn remove_file(&mut self, id: Index) -> Result<(), ScanError> {
        let file = self
            .files
            .remove(id)
            .ok_or_else(|| ScanError::inconsistency("removal of a removed file"))?;

        for b in &file.blocks {
            let hash = match b.state {
                BlockState::Blk => b.hash,
                BlockState::Chg | BlockState::New => ZERO_HASH,
                BlockState::Deleted => {
                    return Err(ScanError::inconsistency(format!(
                        "block {} of file '{}' in state {:?} at removal",
                        b.parity_pos,
                        file.sub.display(),
                        b.state
                    )))
                }
            };
            let pos = b.parity_pos;
            if self.first_free_block > pos {
                self.first_free_block = pos;
            }
            let tid = self.tombs.insert(DeletedBlock::new(pos, hash));
            let slot = self.block_arr.get_mut(pos as usize).ok_or_else(|| {
                ScanError::inconsistency(format!(
                    "file '{}' owns slot {pos} outside the block array",
                    file.sub.display()
                ))
            })?;
            *slot = Slot::Tomb(tid);
        }

        if self.by_path.get(&file.sub) == Some(&id) {
            self.by_path.remove(&file.sub);
        }
        if self.by_inode.get(&file.inode) == Some(&id) {
            self.by_inode.remove(&file.inode);
        }
        Ok(())
    }

    pub fn remove_link(&mut self, id: Index) -> Result<(), ScanError> {
        let link = self
            .links
            .remove(id)
            .ok_or_else(|| ScanError::inconsistency("removal of a removed link"))?;
        if self.link_by_path.get(&link.sub) == Some(&id) {
            self.link_by_path.remove(&link.sub);
        }
        Ok(())
    }

    pub fn remove_dir(&mut self, id: Index) -> Result<(), ScanError> {
        let dir = self
            .dirs
            .remove(id)
            .ok_or_else(|| ScanError::inconsistency("removal of a removed dir"))?;
        if self.dir_by_path.get(&dir.sub) == Some(&id) {
            self.dir_by_path.remove(&dir.sub);
        }
        Ok(())
    }

    // --- insertion (slot allocation) ---

    /// Allocate parity slots for a staged file. Must run only after all
    /// removals for this disk: reuse of freed slots depends on the
    /// tombstones being in place.
    ///
    /// A block landing on an empty slot starts as `New`. A block landing
    /// on a tombstone starts as `Chg` and inherits the tombstone's hash:
    /// the slot's on-parity content is still consistent with that hash,
    /// so a later sync can update parity incrementally instead of from
    /// scratch. The tombstone is consumed.
    pub fn attach_file_blocks(&mut self, id: Index) -> Result<(), ScanError> {
        let mut pos = self.first_free_block as usize;
        let mut max = self.block_arr.len();

        let file = self
            .files
            .get_mut(id)
            .ok_or_else(|| ScanError::inconsistency("slot allocation for a removed file"))?;
        let nblocks = file.blocks.len();

        for i in 0..nblocks {
            while pos < max && self.block_arr[pos].is_live() {
                pos += 1;
            }
            if pos == max {
                self.block_arr.push(Slot::Empty);
                max += 1;
            }

            let b = &mut file.blocks[i];
            b.parity_pos = pos as BlockPos;
            match self.block_arr[pos] {
                Slot::Empty => {
                    b.state = BlockState::New;
                    b.hash = ZERO_HASH;
                }
                Slot::Tomb(tid) => {
                    let tomb = self.tombs.remove(tid).ok_or_else(|| {
                        ScanError::inconsistency(format!("slot {pos} holds a stale tombstone"))
                    })?;
                    b.state = BlockState::Chg;
                    b.hash = tomb.block.hash;
                }
                Slot::Live { .. } => {
                    return Err(ScanError::inconsistency(format!(
                        "slot {pos} already live during allocation"
                    )))
                }
            }
            self.block_arr[pos] = Slot::Live {
                file: id,
                block: i as u32,
            };
            pos += 1;
        }

        if nblocks > 0 {
            self.first_free_block = pos as BlockPos;
        }
        self.file_list.push(id);
        Ok(())
    }

    pub fn insert_link(&mut self, link: LinkEntry) -> Index {
        self.load_link(link)
    }

    pub fn insert_dir(&mut self, dir: EmptyDirEntry) -> Index {
        self.load_dir(dir)
    }

    // --- per-scan maintenance ---

    /// Clear the transient PRESENT flag on every entry.
    pub fn clear_present(&mut self) {
        for (_, f) in self.files.iter_mut() {
            f.present = false;
        }
        for (_, l) in self.links.iter_mut() {
            l.present = false;
        }
        for (_, d) in self.dirs.iter_mut() {
            d.present = false;
        }
    }

    /// Drop list entries whose arena slot was removed during the scan.
    pub fn compact_lists(&mut self) {
        let files = &self.files;
        self.file_list.retain(|&id| files.get(id).is_some());
        let links = &self.links;
        self.link_list.retain(|&id| links.get(id).is_some());
        let dirs = &self.dirs;
        self.dir_list.retain(|&id| dirs.get(id).is_some());
    }

    /// Verify slot ownership: every slot is empty, points at a live
    /// file block that points back, or holds an attached tombstone.
    pub fn check_slots(&self) -> Result<(), String> {
        let mut seen_tombs = 0usize;
        for (pos, slot) in self.block_arr.iter().enumerate() {
            match *slot {
                Slot::Empty => {}
                Slot::Live { file, block } => {
                    let f = self
                        .files
                        .get(file)
                        .ok_or_else(|| format!("slot {pos} owned by a removed file"))?;
                    let b = f
                        .blocks
                        .get(block as usize)
                        .ok_or_else(|| format!("slot {pos} points past file '{}'", f.sub.display()))?;
                    if b.parity_pos as usize != pos {
                        return Err(format!(
                            "slot {pos} owned by block at {}",
                            b.parity_pos
                        ));
                    }
                    if b.state == BlockState::Deleted {
                        return Err(format!("live slot {pos} in deleted state"));
                    }
                }
                Slot::Tomb(tid) => {
                    seen_tombs += 1;
                    let t = self
                        .tombs
                        .get(tid)
                        .ok_or_else(|| format!("slot {pos} holds a removed tombstone"))?;
                    if t.block.parity_pos as usize != pos {
                        return Err(format!(
                            "slot {pos} holds tombstone for {}",
                            t.block.parity_pos
                        ));
                    }
                    if t.block.state != BlockState::Deleted {
                        return Err(format!("tombstone at {pos} not in deleted state"));
                    }
                }
            }
        }
        if seen_tombs != self.tombs.len() {
            return Err(format!(
                "{} tombstones stored but {} attached to slots",
                self.tombs.len(),
                seen_tombs
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{Block, Hash, HASH_SIZE, POS_UNALLOCATED};
    use crate::entry::FileEntry;
    use smallvec::smallvec;

    const BS: u64 = 1024;

    fn hash(b: u8) -> Hash {
        [b; HASH_SIZE]
    }

    fn loaded_file(sub: &str, inode: u64, blocks: Vec<(u32, BlockState, Hash)>) -> FileEntry {
        let mut f = FileEntry::new(BS, sub.into(), blocks.len() as u64 * BS, 1000, 0, inode);
        f.blocks = blocks
            .into_iter()
            .map(|(pos, state, h)| Block::new(pos, state, h))
            .collect();
        f
    }

    #[test]
    fn load_claims_slots() {
        let mut d = Disk::new("d1", "/tmp/x");
        let id = d
            .load_file(loaded_file("a", 100, vec![(0, BlockState::Blk, hash(1))]))
            .unwrap();
        assert_eq!(d.slot(0), Slot::Live { file: id, block: 0 });
        assert_eq!(d.find_file_by_path(Path::new("a")), Some(id));
        assert_eq!(d.find_file_by_inode(100), Some(id));
        d.check_slots().unwrap();
    }

    #[test]
    fn load_rejects_double_claim() {
        let mut d = Disk::new("d1", "/tmp/x");
        d.load_file(loaded_file("a", 100, vec![(0, BlockState::Blk, hash(1))]))
            .unwrap();
        let err = d
            .load_file(loaded_file("b", 101, vec![(0, BlockState::Blk, hash(2))]))
            .unwrap_err();
        assert!(matches!(err, ScanError::Inconsistency(_)));
    }

    #[test]
    fn remove_blk_keeps_hash() {
        let mut d = Disk::new("d1", "/tmp/x");
        let id = d
            .load_file(loaded_file("a", 100, vec![(0, BlockState::Blk, hash(7))]))
            .unwrap();
        d.remove_file(id).unwrap();
        let Slot::Tomb(tid) = d.slot(0) else {
            panic!("slot 0 not tombstoned");
        };
        assert_eq!(d.tomb(tid).unwrap().block.hash, hash(7));
        assert!(d.find_file_by_path(Path::new("a")).is_none());
        assert!(d.find_file_by_inode(100).is_none());
        d.check_slots().unwrap();
    }

    #[test]
    fn remove_chg_and_new_zero_hash() {
        for state in [BlockState::Chg, BlockState::New] {
            let mut d = Disk::new("d1", "/tmp/x");
            let id = d
                .load_file(loaded_file("a", 100, vec![(0, state, hash(7))]))
                .unwrap();
            d.remove_file(id).unwrap();
            let Slot::Tomb(tid) = d.slot(0) else {
                panic!("slot 0 not tombstoned");
            };
            assert_eq!(d.tomb(tid).unwrap().block.hash, ZERO_HASH);
        }
    }

    #[test]
    fn remove_lowers_first_free_hint() {
        let mut d = Disk::new("d1", "/tmp/x");
        let id = d
            .load_file(loaded_file("a", 100, vec![(3, BlockState::Blk, hash(1))]))
            .unwrap();
        d.first_free_block = 9;
        d.remove_file(id).unwrap();
        assert_eq!(d.first_free_block, 3);
    }

    #[test]
    fn attach_on_empty_array_uses_new_state() {
        let mut d = Disk::new("d1", "/tmp/x");
        let mut f = FileEntry::new(BS, "a".into(), 2 * BS, 1000, 0, 100);
        f.present = true;
        let id = d.add_file(f);
        d.attach_file_blocks(id).unwrap();
        let f = d.file(id).unwrap();
        assert_eq!(f.blocks[0].parity_pos, 0);
        assert_eq!(f.blocks[1].parity_pos, 1);
        assert!(f.blocks.iter().all(|b| b.state == BlockState::New));
        assert_eq!(d.first_free_block, 2);
        d.check_slots().unwrap();
    }

    #[test]
    fn attach_over_tombstone_inherits_hash() {
        let mut d = Disk::new("d1", "/tmp/x");
        let old = d
            .load_file(loaded_file("a", 100, vec![(0, BlockState::Blk, hash(9))]))
            .unwrap();
        d.remove_file(old).unwrap();
        assert_eq!(d.tomb_count(), 1);

        let id = d.add_file(FileEntry::new(BS, "b".into(), BS, 2000, 0, 101));
        d.attach_file_blocks(id).unwrap();
        let f = d.file(id).unwrap();
        assert_eq!(f.blocks[0].parity_pos, 0);
        assert_eq!(f.blocks[0].state, BlockState::Chg);
        assert_eq!(f.blocks[0].hash, hash(9));
        // tombstone consumed
        assert_eq!(d.tomb_count(), 0);
        d.check_slots().unwrap();
    }

    #[test]
    fn loaded_tombstone_feeds_later_insert() {
        let mut d = Disk::new("d1", "/tmp/x");
        d.load_deleted(0, hash(5)).unwrap();
        d.check_slots().unwrap();

        let id = d.add_file(FileEntry::new(BS, "n".into(), BS, 100, 0, 1));
        d.attach_file_blocks(id).unwrap();
        let f = d.file(id).unwrap();
        assert_eq!(f.blocks[0].state, BlockState::Chg);
        assert_eq!(f.blocks[0].hash, hash(5));
        assert_eq!(d.tomb_count(), 0);
        d.check_slots().unwrap();
    }

    #[test]
    fn attach_skips_live_slots() {
        let mut d = Disk::new("d1", "/tmp/x");
        d.load_file(loaded_file("keep", 100, vec![(1, BlockState::Blk, hash(1))]))
            .unwrap();
        let id = d.add_file(FileEntry::new(BS, "new".into(), 2 * BS, 2000, 0, 101));
        d.attach_file_blocks(id).unwrap();
        let f = d.file(id).unwrap();
        assert_eq!(f.blocks[0].parity_pos, 0);
        assert_eq!(f.blocks[1].parity_pos, 2);
        assert_eq!(d.first_free_block, 3);
        d.check_slots().unwrap();
    }

    #[test]
    fn zero_block_file_leaves_hint_alone() {
        let mut d = Disk::new("d1", "/tmp/x");
        let id = d.add_file(FileEntry::new(BS, "empty".into(), 0, 2000, 0, 101));
        d.attach_file_blocks(id).unwrap();
        assert_eq!(d.first_free_block, 0);
        assert_eq!(d.slot_count(), 0);
    }

    #[test]
    fn two_phase_reuse_preserves_occupied_set() {
        let mut d = Disk::new("d1", "/tmp/x");
        let mut ids = Vec::new();
        for i in 0..5u64 {
            let f = loaded_file(
                &format!("f{i}"),
                100 + i,
                vec![(i as u32, BlockState::Blk, hash(i as u8))],
            );
            ids.push(d.load_file(f).unwrap());
        }
        let occupied_before: Vec<usize> = (0..d.slot_count())
            .filter(|&p| d.slot(p as u32) != Slot::Empty)
            .collect();

        // remove everything, then insert the same number of one-block files
        for id in ids {
            d.remove_file(id).unwrap();
        }
        for i in 0..5u64 {
            let id = d.add_file(FileEntry::new(BS, format!("g{i}").into(), BS, 3000, 0, 200 + i));
            d.attach_file_blocks(id).unwrap();
        }

        let occupied_after: Vec<usize> = (0..d.slot_count())
            .filter(|&p| d.slot(p as u32) != Slot::Empty)
            .collect();
        assert_eq!(occupied_before, occupied_after);
        assert_eq!(d.tomb_count(), 0);
        d.check_slots().unwrap();
    }

    #[test]
    fn remove_rejects_deleted_state() {
        let mut d = Disk::new("d1", "/tmp/x");
        let mut f = FileEntry::new(BS, "a".into(), BS, 1000, 0, 100);
        f.blocks = smallvec![Block::new(POS_UNALLOCATED, BlockState::Deleted, hash(1))];
        let id = d.files.insert(f);
        let err = d.remove_file(id).unwrap_err();
        assert!(matches!(err, ScanError::Inconsistency(_)));
    }

    #[test]
    fn compact_drops_stale_list_entries() {
        let mut d = Disk::new("d1", "/tmp/x");
        let a = d
            .load_file(loaded_file("a", 100, vec![(0, BlockState::Blk, hash(1))]))
            .unwrap();
        d.load_file(loaded_file("b", 101, vec![(1, BlockState::Blk, hash(2))]))
            .unwrap();
        d.remove_file(a).unwrap();
        assert_eq!(d.file_ids().len(), 2);
        d.compact_lists();
        assert_eq!(d.file_ids().len(), 1);
    }
}
