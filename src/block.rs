//! Parity-slot value objects.
//!
//! A disk's parity coverage is tracked per slot. Each live file block is
//! pinned to one slot; a removed block leaves a tombstone behind so the
//! slot's on-parity content stays interpretable until the slot is reused.

pub const HASH_SIZE: usize = 16;

pub type Hash = [u8; HASH_SIZE];

pub const ZERO_HASH: Hash = [0; HASH_SIZE];

/// Slot index inside a disk's block array. Parity files are addressed by
/// the same index, so the k-th parity block covers slot k on every disk.
pub type BlockPos = u32;

/// Sentinel for a block that has not been through slot allocation yet.
pub const POS_UNALLOCATED: BlockPos = BlockPos::MAX;

/// Lifecycle stage of a slot's content.
///
/// `Blk` means the parity on disk was computed from exactly this hash.
/// `Chg` and `New` are in-flight states: the block is live but parity
/// either covers an older hash (`Chg`, which carries it) or nothing yet
/// (`New`). `Deleted` only ever appears inside a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Blk,
    Chg,
    New,
    Deleted,
}

/// One block of a file: its slot assignment, state, and data hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub parity_pos: BlockPos,
    pub state: BlockState,
    pub hash: Hash,
}

impl Block {
    /// A block waiting for slot allocation.
    pub fn unallocated() -> Self {
        Block {
            parity_pos: POS_UNALLOCATED,
            state: BlockState::New,
            hash: ZERO_HASH,
        }
    }

    pub fn new(parity_pos: BlockPos, state: BlockState, hash: Hash) -> Self {
        Block {
            parity_pos,
            state,
            hash,
        }
    }
}

/// Tombstone for a slot whose owning file was removed. Keeps the
/// pre-deletion hash (or a zero hash when the old parity coverage was
/// uncertain) so a later sync can still diff the slot incrementally.
#[derive(Debug, Clone)]
pub struct DeletedBlock {
    pub block: Block,
}

impl DeletedBlock {
    pub fn new(parity_pos: BlockPos, hash: Hash) -> Self {
        DeletedBlock {
            block: Block::new(parity_pos, BlockState::Deleted, hash),
        }
    }
}

/// Number of slots a file of `size` bytes occupies.
pub fn block_count(size: u64, block_size: u64) -> u32 {
    debug_assert!(block_size > 0);
    (size.div_ceil(block_size)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_count_rounds_up() {
        assert_eq!(block_count(0, 1024), 0);
        assert_eq!(block_count(1, 1024), 1);
        assert_eq!(block_count(1024, 1024), 1);
        assert_eq!(block_count(1025, 1024), 2);
        assert_eq!(block_count(10 * 1024, 1024), 10);
    }

    #[test]
    fn unallocated_block_is_new() {
        let b = Block::unallocated();
        assert_eq!(b.state, BlockState::New);
        assert_eq!(b.parity_pos, POS_UNALLOCATED);
        assert_eq!(b.hash, ZERO_HASH);
    }
}
