use crate::fs::{FsError, Result};
use crate::io::{BlockNumber, BlockStorage, BLOCK_SIZE};
use crate::name::{self, MAX_EXTENSION, MAX_FILENAME};

use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

const RECORD_SIZE: usize = (MAX_FILENAME + 1) + (MAX_EXTENSION + 1) + 8 + 8;
/// How many files fit in a directory block after the count field.
pub const MAX_FILES_IN_DIR: usize = (BLOCK_SIZE - 4) / RECORD_SIZE;
const PADDING: usize = BLOCK_SIZE - 4 - MAX_FILES_IN_DIR * RECORD_SIZE;

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
struct FileRecord {
    name: [u8; MAX_FILENAME + 1],
    ext: [u8; MAX_EXTENSION + 1],
    /// File length in bytes.
    size: U64<LittleEndian>,
    /// First block of the data chain, 0 while the file holds no data.
    start_block: U64<LittleEndian>,
}

impl FileRecord {
    fn is(&self, file: &str, ext: &str) -> bool {
        name::matches(&self.name, file) && name::matches(&self.ext, ext)
    }
}

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
struct DirectoryBlock {
    count: U32<LittleEndian>,
    files: [FileRecord; MAX_FILES_IN_DIR],
    padding: [u8; PADDING],
}

const _: () = assert!(std::mem::size_of::<FileRecord>() == RECORD_SIZE);
const _: () = assert!(std::mem::size_of::<DirectoryBlock>() == BLOCK_SIZE);

/// A decoded file record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    /// Empty when the file has no extension.
    pub extension: String,
    pub size: u64,
    /// 0 while no data block is assigned.
    pub start_block: BlockNumber,
}

impl FileEntry {
    /// `name` or `name.ext`, as shown in directory listings.
    pub fn display_name(&self) -> String {
        if self.extension.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.name, self.extension)
        }
    }
}

impl From<&FileRecord> for FileEntry {
    fn from(record: &FileRecord) -> Self {
        FileEntry {
            name: name::decode(&record.name),
            extension: name::decode(&record.ext),
            size: record.size.get(),
            start_block: record.start_block.get() as BlockNumber,
        }
    }
}

/// The file table of one subdirectory, a single block holding up to
/// `MAX_FILES_IN_DIR` records. The first `count` slots are live; removal shifts the
/// later records down so that stays true.
///
/// Every mutation writes the block back before returning.
pub struct DirectoryTable {
    location: BlockNumber,
    block: DirectoryBlock,
}

impl DirectoryTable {
    /// Writes an empty table to `location`.
    pub fn create<T: BlockStorage>(dev: &mut T, location: BlockNumber) -> Result<Self> {
        let table = Self {
            location,
            block: DirectoryBlock::new_zeroed(),
        };
        table.store(dev)?;
        Ok(table)
    }

    pub fn load<T: BlockStorage>(dev: &mut T, location: BlockNumber) -> Result<Self> {
        let raw = dev.read(location)?;
        let block = DirectoryBlock::read_from(&raw[..]).ok_or_else(|| {
            FsError::Corrupt(format!("directory block {} has the wrong size", location))
        })?;
        let count = block.count.get() as usize;
        if count > MAX_FILES_IN_DIR {
            return Err(FsError::Corrupt(format!(
                "directory block {} claims {} files, at most {} fit",
                location, count, MAX_FILES_IN_DIR
            )));
        }
        Ok(Self { location, block })
    }

    pub fn store<T: BlockStorage>(&self, dev: &mut T) -> Result<()> {
        dev.write_block(self.location, self.block.as_bytes())?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.block.count.get() as usize
    }

    fn live(&self) -> &[FileRecord] {
        &self.block.files[..self.len()]
    }

    fn position(&self, file: &str, ext: &str) -> Option<usize> {
        self.live().iter().position(|record| record.is(file, ext))
    }

    fn slot_mut(&mut self, file: &str, ext: &str) -> Result<&mut FileRecord> {
        let index = self.position(file, ext).ok_or(FsError::NotFound)?;
        Ok(&mut self.block.files[index])
    }

    /// Live entries in slot order.
    pub fn entries(&self) -> Vec<FileEntry> {
        self.live().iter().map(FileEntry::from).collect()
    }

    pub fn find_file(&self, file: &str, ext: &str) -> Option<FileEntry> {
        self.position(file, ext)
            .map(|index| FileEntry::from(&self.block.files[index]))
    }

    /// Appends an empty file with no data blocks.
    pub fn add_file<T: BlockStorage>(&mut self, dev: &mut T, file: &str, ext: &str) -> Result<FileEntry> {
        if self.position(file, ext).is_some() {
            return Err(FsError::AlreadyExists);
        }
        let slot = self.len();
        if slot >= MAX_FILES_IN_DIR {
            return Err(FsError::TableFull);
        }
        let record = FileRecord {
            name: name::encode(file),
            ext: name::encode(ext),
            size: U64::new(0),
            start_block: U64::new(0),
        };
        self.block.files[slot] = record;
        self.block.count.set(slot as u32 + 1);
        self.store(dev)?;
        Ok(FileEntry::from(&record))
    }

    pub fn update_size<T: BlockStorage>(&mut self, dev: &mut T, file: &str, ext: &str, size: u64) -> Result<()> {
        self.slot_mut(file, ext)?.size.set(size);
        self.store(dev)
    }

    pub fn update_start_block<T: BlockStorage>(
        &mut self,
        dev: &mut T,
        file: &str,
        ext: &str,
        start_block: BlockNumber,
    ) -> Result<()> {
        self.slot_mut(file, ext)?.start_block.set(start_block as u64);
        self.store(dev)
    }

    /// Drops the record, shifting later records down one slot. The caller owns the
    /// returned entry's data chain from here on.
    pub fn remove_file<T: BlockStorage>(&mut self, dev: &mut T, file: &str, ext: &str) -> Result<FileEntry> {
        let index = self.position(file, ext).ok_or(FsError::NotFound)?;
        let removed = FileEntry::from(&self.block.files[index]);
        let len = self.len();
        self.block.files.copy_within(index + 1..len, index);
        self.block.files[len - 1] = FileRecord::new_zeroed();
        self.block.count.set(len as u32 - 1);
        self.store(dev)?;
        Ok(removed)
    }
}
