use crate::fs::{FsError, Result};
use crate::io::{BlockNumber, BlockStorage, BLOCK_SIZE};
use log::debug;

/// The bitmap occupies the final blocks of every image.
pub const BITMAP_BLOCKS: usize = 5;
const BITMAP_BYTES: usize = BITMAP_BLOCKS * BLOCK_SIZE;
/// The largest image a bitmap can describe, one bit per block.
pub const MAX_BLOCKS: usize = BITMAP_BYTES * 8;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum State {
    Free,
    Used,
}

/// Stores one bit per block on the image. Bit `k` of byte `i` (least significant
/// first) tracks block `8 * i + k`.
#[derive(Clone, PartialEq)]
pub struct Bitmap {
    bits: Vec<u8>,
}

impl Bitmap {
    pub fn new() -> Self {
        Self {
            bits: vec![0; BITMAP_BYTES],
        }
    }

    /// Reads a bitmap from a buffer of exactly the bitmap region's size. Passing a
    /// slice of any other size will result in a panic.
    pub fn parse(buf: &[u8]) -> Self {
        assert_eq!(buf.len(), BITMAP_BYTES, "Length of buffer to parse must equal bitmap size.");
        Self { bits: buf.to_vec() }
    }

    pub fn serialize(&self) -> &[u8] {
        &self.bits
    }

    pub fn get(&self, blocknr: BlockNumber) -> State {
        assert!(blocknr < MAX_BLOCKS);
        match (self.bits[blocknr / 8] >> (blocknr % 8)) & 0b1 {
            0 => State::Free,
            _ => State::Used,
        }
    }

    pub fn set_reserved(&mut self, blocknr: BlockNumber) {
        assert!(blocknr < MAX_BLOCKS);
        self.bits[blocknr / 8] |= 0b1 << (blocknr % 8);
    }

    pub fn set_free(&mut self, blocknr: BlockNumber) {
        assert!(blocknr < MAX_BLOCKS);
        self.bits[blocknr / 8] &= !(0b1 << (blocknr % 8));
    }
}

/// Hands out data and directory blocks from the on-disk bitmap.
///
/// The bitmap is cached in memory and written back in full after every change. Block
/// 0 (the root directory) and the bitmap region itself are never handed out, so the
/// allocatable range is `1..bitmap_start`.
pub struct BlockAllocator {
    bitmap: Bitmap,
    /// First block of the bitmap region; everything from here to the end of the disk
    /// is reserved.
    bitmap_start: BlockNumber,
}

impl BlockAllocator {
    /// An allocator for a fresh disk of `block_count` blocks with only the reserved
    /// blocks marked.
    pub fn new(block_count: usize) -> Result<Self> {
        let bitmap_start = Self::bitmap_start(block_count)?;
        let mut alloc = Self {
            bitmap: Bitmap::new(),
            bitmap_start,
        };
        alloc.mark_reserved();
        Ok(alloc)
    }

    /// Loads the bitmap region of `dev`. The second value is true when the reserved
    /// blocks were not marked on disk and had to be marked in memory, as happens with
    /// a zero-filled image that was never formatted.
    pub fn load<T: BlockStorage>(dev: &mut T) -> Result<(Self, bool)> {
        let bitmap_start = Self::bitmap_start(dev.block_count())?;
        let mut buf = vec![0; BITMAP_BYTES];
        for (i, chunk) in buf.chunks_mut(BLOCK_SIZE).enumerate() {
            dev.read_block(bitmap_start + i, chunk)?;
        }
        let mut alloc = Self {
            bitmap: Bitmap::parse(&buf),
            bitmap_start,
        };
        let repaired = alloc.mark_reserved();
        Ok((alloc, repaired))
    }

    fn bitmap_start(block_count: usize) -> Result<BlockNumber> {
        // Root, the bitmap, and at least one usable block.
        if block_count < BITMAP_BLOCKS + 2 || block_count > MAX_BLOCKS {
            return Err(FsError::InvalidArgument(format!(
                "disk of {} blocks, must hold between {} and {} blocks",
                block_count,
                BITMAP_BLOCKS + 2,
                MAX_BLOCKS
            )));
        }
        Ok(block_count - BITMAP_BLOCKS)
    }

    fn mark_reserved(&mut self) -> bool {
        let mut changed = false;
        for blocknr in std::iter::once(0).chain(self.bitmap_start..self.block_count()) {
            if self.bitmap.get(blocknr) == State::Free {
                self.bitmap.set_reserved(blocknr);
                changed = true;
            }
        }
        changed
    }

    pub fn block_count(&self) -> usize {
        self.bitmap_start + BITMAP_BLOCKS
    }

    /// True for blocks the allocator never hands out.
    pub fn is_reserved(&self, blocknr: BlockNumber) -> bool {
        blocknr == 0 || blocknr >= self.bitmap_start
    }

    pub fn state(&self, blocknr: BlockNumber) -> State {
        self.bitmap.get(blocknr)
    }

    /// Iterates over the currently free blocks, lowest first.
    pub fn free_blocks(&self) -> NextAvailableAllocation<'_> {
        NextAvailableAllocation {
            marker: 1,
            bitmap: &self.bitmap,
            cap: self.bitmap_start,
        }
    }

    pub fn free_count(&self) -> usize {
        self.free_blocks().count()
    }

    /// Marks the lowest free block as used and persists the bitmap before returning
    /// it, so a crash afterwards can only leak the block.
    pub fn find_and_mark_free_block<T: BlockStorage>(&mut self, dev: &mut T) -> Result<BlockNumber> {
        let blocknr = self.free_blocks().next().ok_or(FsError::OutOfSpace)?;
        self.bitmap.set_reserved(blocknr);
        self.persist(dev)?;
        debug!("allocated block {}", blocknr);
        Ok(blocknr)
    }

    /// Returns a block to the free pool. Releasing a free block again is a no-op.
    pub fn release_block<T: BlockStorage>(&mut self, dev: &mut T, blocknr: BlockNumber) -> Result<()> {
        if self.is_reserved(blocknr) {
            return Err(FsError::Corrupt(format!(
                "refusing to release reserved block {}",
                blocknr
            )));
        }
        self.bitmap.set_free(blocknr);
        self.persist(dev)?;
        debug!("released block {}", blocknr);
        Ok(())
    }

    /// Writes the whole bitmap region back to disk.
    pub fn persist<T: BlockStorage>(&self, dev: &mut T) -> Result<()> {
        for (i, chunk) in self.bitmap.serialize().chunks(BLOCK_SIZE).enumerate() {
            dev.write_block(self.bitmap_start + i, chunk)?;
        }
        Ok(())
    }
}

/// Implements a naive block allocation policy for new data block requirements. Each
/// call to the iterator returns the next free block above the previous one, so the
/// first item is always the lowest free block on disk.
pub struct NextAvailableAllocation<'a> {
    /// Keeps track of the next starting place for looking for available blocks.
    marker: BlockNumber,
    bitmap: &'a Bitmap,
    /// One past the highest allocatable block.
    cap: BlockNumber,
}

impl Iterator for NextAvailableAllocation<'_> {
    type Item = BlockNumber;

    fn next(&mut self) -> Option<Self::Item> {
        while self.marker < self.cap {
            let candidate = self.marker;
            self.marker += 1;
            if let State::Free = self.bitmap.get(candidate) {
                return Some(candidate);
            }
        }
        None
    }
}
