use crate::alloc::BlockAllocator;
use crate::data;
use crate::dir::{DirectoryTable, FileEntry};
use crate::io::BlockStorage;
use crate::path::{self, Resolved, Target};
use crate::root::RootDirectory;

use log::{info, warn};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("found no file or directory at path")]
    NotFound,
    #[error("invalid path {0}")]
    InvalidPath(String),
    #[error("an entry with that name already exists")]
    AlreadyExists,
    #[error("no free blocks left on disk")]
    OutOfSpace,
    #[error("directory table is full")]
    TableFull,
    #[error("offset {offset} is past the end of a {size} byte file")]
    InvalidOffset { offset: u64, size: u64 },
    #[error("operation not permitted")]
    PermissionDenied,
    #[error("path names a directory")]
    IsDirectory,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("corrupt file system: {0}")]
    Corrupt(String),
    #[error("disk access failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FsError>;

/// What `get_attributes` reports about a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub is_directory: bool,
    /// Byte length for files, 0 for directories.
    pub size: u64,
}

/// A two level file system on a single block device.
///
/// # Layout
/// ==========================================================================
/// | Root directory | Directory tables and file data ... | Bitmap (5 blocks) |
/// ==========================================================================
///
/// The root table and the bitmap are cached and written through on every change.
/// Directory tables are read from disk on each operation. The device must not be
/// shared with another instance while this one is alive.
pub struct DiskFs<T: BlockStorage> {
    dev: T,
    root: RootDirectory,
    alloc: BlockAllocator,
}

impl<T: BlockStorage> DiskFs<T> {
    /// Initializes an empty file system onto owned block storage.
    pub fn create(mut dev: T) -> Result<Self> {
        let alloc = BlockAllocator::new(dev.block_count())?;
        let root = RootDirectory::new();
        root.store(&mut dev)?;
        alloc.persist(&mut dev)?;
        dev.sync_disk()?;
        info!(
            "formatted {} block disk, {} blocks free",
            dev.block_count(),
            alloc.free_count()
        );

        Ok(DiskFs { dev, root, alloc })
    }

    /// Mounts an existing disk. A zero-filled disk opens as an empty file system.
    pub fn open(mut dev: T) -> Result<Self> {
        let (alloc, repaired) = BlockAllocator::load(&mut dev)?;
        if repaired {
            warn!("reserved blocks were not marked in the bitmap, marking them now");
            alloc.persist(&mut dev)?;
        }
        let root = RootDirectory::load(&mut dev)?;
        info!(
            "opened {} block disk with {} directories, {} blocks free",
            dev.block_count(),
            root.len(),
            alloc.free_count()
        );

        Ok(DiskFs { dev, root, alloc })
    }

    fn resolve(&mut self, path: &str) -> Result<Resolved> {
        let target = path::parse(path)?;
        path::resolve(&mut self.dev, &self.root, target)
    }

    pub fn get_attributes(&mut self, path: &str) -> Result<Attributes> {
        match self.resolve(path)? {
            Resolved::Root | Resolved::Directory { .. } => Ok(Attributes {
                is_directory: true,
                size: 0,
            }),
            Resolved::File { entry, .. } => Ok(Attributes {
                is_directory: false,
                size: entry.size,
            }),
        }
    }

    /// Directory names at the root, or `name`/`name.ext` entries in a subdirectory.
    pub fn list_directory(&mut self, path: &str) -> Result<Vec<String>> {
        match self.resolve(path)? {
            Resolved::Root => Ok(self.root.names()),
            Resolved::Directory { location, .. } => {
                let table = DirectoryTable::load(&mut self.dev, location)?;
                Ok(table.entries().iter().map(|e| e.display_name()).collect())
            }
            Resolved::File { .. } => Err(FsError::NotFound),
        }
    }

    pub fn create_directory(&mut self, path: &str) -> Result<()> {
        match path::parse(path)? {
            Target::Directory(name) => {
                self.root
                    .add_directory(&mut self.dev, &mut self.alloc, &name)?;
                Ok(())
            }
            Target::Root => Err(FsError::AlreadyExists),
            // Directories only exist directly under root.
            Target::File { .. } => Err(FsError::PermissionDenied),
        }
    }

    /// Directory removal is not supported: an existing directory is left in place with
    /// its blocks still allocated.
    pub fn remove_directory(&mut self, path: &str) -> Result<()> {
        match self.resolve(path)? {
            Resolved::Directory { name, .. } => {
                warn!("ignoring removal of directory {:?}", name);
                Ok(())
            }
            Resolved::Root => Err(FsError::PermissionDenied),
            Resolved::File { .. } => Err(FsError::InvalidPath(format!(
                "{:?} is not a directory",
                path
            ))),
        }
    }

    /// Creates an empty file in an existing subdirectory.
    pub fn create_file(&mut self, path: &str) -> Result<()> {
        match path::parse(path)? {
            Target::File { dir, name, ext } => {
                let location = self.root.find_directory(&dir).ok_or(FsError::NotFound)?;
                let mut table = DirectoryTable::load(&mut self.dev, location)?;
                table.add_file(&mut self.dev, &name, &ext)?;
                info!("created file {}", path);
                Ok(())
            }
            Target::Directory(_) => Err(FsError::PermissionDenied),
            Target::Root => Err(FsError::AlreadyExists),
        }
    }

    /// Deletes a file and returns its blocks to the free pool.
    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        let (mut table, entry) = self.file(path)?;
        // Drop the data first so the record never names released blocks.
        data::truncate(&mut self.dev, &mut self.alloc, &mut table, &entry, 0)?;
        table.remove_file(&mut self.dev, &entry.name, &entry.extension)?;
        info!("removed file {}", path);
        Ok(())
    }

    fn file(&mut self, path: &str) -> Result<(DirectoryTable, FileEntry)> {
        match self.resolve(path)? {
            Resolved::File { table, entry } => Ok((table, entry)),
            Resolved::Root | Resolved::Directory { .. } => Err(FsError::IsDirectory),
        }
    }

    /// Reads up to `size` bytes at `offset`. The result is shorter than `size` only at
    /// the end of the file.
    pub fn read_file(&mut self, path: &str, size: usize, offset: u64) -> Result<Vec<u8>> {
        let (_, entry) = self.file(path)?;
        if offset > entry.size {
            return Err(FsError::InvalidOffset {
                offset,
                size: entry.size,
            });
        }
        let len = size.min((entry.size - offset) as usize);
        let mut buf = vec![0; len];
        let n = data::read(
            &mut self.dev,
            &self.alloc,
            entry.start_block,
            entry.size,
            offset,
            &mut buf,
        )?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Writes `buf` at `offset`, which may be at most the current file size.
    pub fn write_file(&mut self, path: &str, buf: &[u8], offset: u64) -> Result<usize> {
        let (mut table, entry) = self.file(path)?;
        data::write(&mut self.dev, &mut self.alloc, &mut table, &entry, buf, offset)
    }

    /// Shrinks a file to `size` bytes.
    pub fn truncate_file(&mut self, path: &str, size: u64) -> Result<()> {
        let (mut table, entry) = self.file(path)?;
        data::truncate(&mut self.dev, &mut self.alloc, &mut table, &entry, size)
    }

    /// Number of blocks still available for directories and file data.
    pub fn free_blocks(&self) -> usize {
        self.alloc.free_count()
    }

    pub fn block_count(&self) -> usize {
        self.dev.block_count()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.dev.sync_disk()?;
        Ok(())
    }

    /// Returns ownership of the block device, e.g. to reopen it.
    pub fn into_device(self) -> T {
        self.dev
    }

    pub(crate) fn parts(&mut self) -> (&mut T, &RootDirectory, &mut BlockAllocator) {
        (&mut self.dev, &self.root, &mut self.alloc)
    }

    #[cfg(test)]
    pub(crate) fn table_location(&self, dir: &str) -> Option<crate::io::BlockNumber> {
        self.root.find_directory(dir)
    }
}
