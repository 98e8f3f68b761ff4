use crate::alloc::{BlockAllocator, BITMAP_BLOCKS};
use crate::dir::DirectoryTable;
use crate::fs::{FsError, Result};
use crate::io::{BlockNumber, BlockStorage, BLOCK_SIZE};
use crate::name::{self, MAX_FILENAME};

use log::info;
use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

/// The root directory always lives in the first block.
pub const ROOT_BLOCK: BlockNumber = 0;

const RECORD_SIZE: usize = MAX_FILENAME + 1 + 8;
/// How many subdirectories fit in the root block after the count field.
pub const MAX_DIRS_IN_ROOT: usize = (BLOCK_SIZE - 4) / RECORD_SIZE;
const PADDING: usize = BLOCK_SIZE - 4 - MAX_DIRS_IN_ROOT * RECORD_SIZE;

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
struct DirectoryRecord {
    /// NUL padded directory name.
    name: [u8; MAX_FILENAME + 1],
    /// Block holding the directory's file table.
    start_block: U64<LittleEndian>,
}

/// On-disk image of block 0. Only the first `count` records are live.
#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
struct RootBlock {
    count: U32<LittleEndian>,
    directories: [DirectoryRecord; MAX_DIRS_IN_ROOT],
    padding: [u8; PADDING],
}

const _: () = assert!(std::mem::size_of::<DirectoryRecord>() == RECORD_SIZE);
const _: () = assert!(std::mem::size_of::<RootBlock>() == BLOCK_SIZE);

/// Maps subdirectory names to the block holding each directory's file table.
///
/// Entries are appended in creation order and never removed; lookups are a linear
/// scan where the first exact match wins.
pub struct RootDirectory {
    block: RootBlock,
}

impl RootDirectory {
    pub fn new() -> Self {
        Self {
            block: RootBlock::new_zeroed(),
        }
    }

    pub fn load<T: BlockStorage>(dev: &mut T) -> Result<Self> {
        let raw = dev.read(ROOT_BLOCK)?;
        let block = RootBlock::read_from(&raw[..])
            .ok_or_else(|| FsError::Corrupt("root block has the wrong size".to_string()))?;
        let root = Self { block };

        let count = root.block.count.get() as usize;
        if count > MAX_DIRS_IN_ROOT {
            return Err(FsError::Corrupt(format!(
                "root directory claims {} entries, at most {} fit",
                count, MAX_DIRS_IN_ROOT
            )));
        }
        // Tables live strictly between the root block and the bitmap.
        let bitmap_start = dev.block_count().saturating_sub(BITMAP_BLOCKS);
        for record in root.live() {
            let start = record.start_block.get() as usize;
            if start == ROOT_BLOCK || start >= bitmap_start {
                return Err(FsError::Corrupt(format!(
                    "directory {:?} points at block {}",
                    name::decode(&record.name),
                    start
                )));
            }
        }
        Ok(root)
    }

    pub fn store<T: BlockStorage>(&self, dev: &mut T) -> Result<()> {
        dev.write_block(ROOT_BLOCK, self.block.as_bytes())?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.block.count.get() as usize
    }

    fn live(&self) -> &[DirectoryRecord] {
        &self.block.directories[..self.len()]
    }

    pub fn find_directory(&self, dir: &str) -> Option<BlockNumber> {
        self.live()
            .iter()
            .find(|record| name::matches(&record.name, dir))
            .map(|record| record.start_block.get() as BlockNumber)
    }

    /// Directory names in table order.
    pub fn names(&self) -> Vec<String> {
        self.live().iter().map(|record| name::decode(&record.name)).collect()
    }

    /// `(name, table block)` for every directory.
    pub fn locations(&self) -> Vec<(String, BlockNumber)> {
        self.live()
            .iter()
            .map(|record| {
                (
                    name::decode(&record.name),
                    record.start_block.get() as BlockNumber,
                )
            })
            .collect()
    }

    /// Creates an empty directory named `dir` and returns its table block.
    ///
    /// The table block is allocated and written before the root entry pointing at it,
    /// so an interrupted call leaves at worst an unreferenced block.
    pub fn add_directory<T: BlockStorage>(
        &mut self,
        dev: &mut T,
        alloc: &mut BlockAllocator,
        dir: &str,
    ) -> Result<BlockNumber> {
        if self.find_directory(dir).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let slot = self.len();
        if slot >= MAX_DIRS_IN_ROOT {
            return Err(FsError::TableFull);
        }

        let location = alloc.find_and_mark_free_block(dev)?;
        DirectoryTable::create(dev, location)?;

        self.block.directories[slot] = DirectoryRecord {
            name: name::encode(dir),
            start_block: U64::new(location as u64),
        };
        self.block.count.set(slot as u32 + 1);
        if let Err(e) = self.store(dev) {
            self.block.count.set(slot as u32);
            return Err(e);
        }

        info!("created directory {:?} at block {}", dir, location);
        Ok(location)
    }
}
