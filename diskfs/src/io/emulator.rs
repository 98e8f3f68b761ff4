use super::block::{BlockNumber, BlockStorage, BLOCK_SIZE};
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::{BufWriter, ErrorKind, SeekFrom};
use std::path::Path;

/// Emulates block disk storage in userspace using a file as block storage. The
/// file is treated as a flat array of `BLOCK_SIZE` blocks.
pub struct FileBlockEmulator {
    /// The file must be a fixed-size file some exact multiple of the size of a block.
    fd: File,
    /// The total number of blocks available in the file store.
    block_count: usize,
}

impl FileBlockEmulator {
    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }

    fn check_range(&self, blocknr: BlockNumber) -> std::io::Result<()> {
        if blocknr >= self.block_count {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "block {} out of range for a {} block disk",
                    blocknr, self.block_count
                ),
            ));
        }
        Ok(())
    }
}

impl BlockStorage for FileBlockEmulator {
    fn open_disk<P: AsRef<Path>>(dest: P) -> std::io::Result<Self>
    where
        Self: std::marker::Sized,
    {
        // Return error if the file does not exist rather than create one.
        let file = OpenOptions::new().read(true).write(true).open(dest)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 || len % BLOCK_SIZE != 0 {
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                format!("disk length {} is not a multiple of {}", len, BLOCK_SIZE),
            ));
        }

        Ok(FileBlockEmulator {
            fd: file,
            block_count: len / BLOCK_SIZE,
        })
    }

    fn block_count(&self) -> usize {
        self.block_count
    }

    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        if buf.len() < BLOCK_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                "buffer does not contain enough space to read block",
            ));
        }
        self.fd
            .seek(SeekFrom::Start((blocknr * BLOCK_SIZE) as u64))?;
        self.fd.read_exact(&mut buf[..BLOCK_SIZE])
    }

    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
        self.check_range(blocknr)?;
        if buf.len() != BLOCK_SIZE {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("expected a {} byte block, got {} bytes", BLOCK_SIZE, buf.len()),
            ));
        }
        self.fd
            .seek(SeekFrom::Start((blocknr * BLOCK_SIZE) as u64))?;
        self.fd.write_all(buf)
    }

    fn sync_disk(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}

pub struct FileBlockEmulatorBuilder {
    fd: File,
    block_count: usize,
    clear: bool,
}

impl From<File> for FileBlockEmulatorBuilder {
    fn from(fd: File) -> Self {
        FileBlockEmulatorBuilder {
            fd,
            // Zero means "size the disk from the file" when the medium is kept.
            block_count: 0,
            clear: true,
        }
    }
}

impl FileBlockEmulatorBuilder {
    /// Sets the number of desired blocks in the block store device.
    pub fn with_block_count(mut self, blocks: usize) -> Self {
        self.block_count = blocks;
        self
    }

    /// Whether the medium is zeroed during `build`. Defaults to true; pass false to
    /// adopt a previously initialized disk as-is.
    pub fn clear_medium(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    /// This builder assumes ownership of the file descriptor used and, unless told
    /// otherwise, does destructive things to prepare the file for use.
    pub fn build(mut self) -> std::io::Result<FileBlockEmulator> {
        if self.clear {
            if self.block_count == 0 {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    "a cleared disk needs a non-zero block count",
                ));
            }
            self.zero_blocks()?;
        } else {
            let available = self.fd.metadata()?.len() as usize / BLOCK_SIZE;
            if self.block_count == 0 {
                self.block_count = available;
            }
            if self.block_count == 0 || self.block_count > available {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidData,
                    format!(
                        "medium holds {} blocks, {} requested",
                        available, self.block_count
                    ),
                ));
            }
        }
        Ok(FileBlockEmulator {
            fd: self.fd,
            block_count: self.block_count,
        })
    }

    fn zero_blocks(&mut self) -> std::io::Result<()> {
        self.fd.set_len(0)?;
        self.fd.seek(SeekFrom::Start(0))?;
        let mut bfd = BufWriter::new(&self.fd);
        // Zero out the "disk", buffering each write to prevent excessive syscalls.
        let zeroes = [0x00; BLOCK_SIZE];
        for _ in 0..self.block_count {
            bfd.write_all(&zeroes)?;
        }
        bfd.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(blocks: usize) -> FileBlockEmulator {
        let fs_block = tempfile::tempfile().unwrap();
        FileBlockEmulatorBuilder::from(fs_block)
            .with_block_count(blocks)
            .build()
            .expect("failed to allocate file block")
    }

    #[test]
    fn file_emulator_allocates_correct_num_bytes() {
        let mut disk_emu = disk(4);
        disk_emu.sync_disk().unwrap();
        assert_eq!(disk_emu.block_count(), 4);
        assert_eq!(
            disk_emu.into_file().metadata().unwrap().len(),
            4 * BLOCK_SIZE as u64
        );
    }

    #[test]
    fn can_read_and_write_blocks() {
        let mut disk_emu = disk(4);

        // Allocate a block with a non-zero character.
        let block = vec![0x55; BLOCK_SIZE];
        disk_emu.write_block(2, &block).unwrap();
        disk_emu.sync_disk().unwrap();

        // Read a different block.
        assert_eq!(disk_emu.read(3).unwrap(), [0x00; BLOCK_SIZE]);
        // Read the block with data.
        assert_eq!(disk_emu.read(2).unwrap(), [0x55; BLOCK_SIZE]);
    }

    #[test]
    fn can_read_and_write_start_and_end_blocks() {
        let mut disk_emu = disk(2);

        disk_emu.write_block(0, &[0x11; BLOCK_SIZE]).unwrap();
        disk_emu.write_block(1, &[0x22; BLOCK_SIZE]).unwrap();

        assert_eq!(disk_emu.read(0).unwrap(), [0x11; BLOCK_SIZE]);
        assert_eq!(disk_emu.read(1).unwrap(), [0x22; BLOCK_SIZE]);
    }

    #[test]
    fn access_beyond_range_is_an_error() {
        let mut disk_emu = disk(1);

        let wresult = disk_emu.write_block(1, &[0x55; BLOCK_SIZE]);
        assert_eq!(wresult.unwrap_err().kind(), ErrorKind::InvalidInput);
        assert!(disk_emu.read(1).is_err());
    }

    #[test]
    fn partial_block_writes_are_rejected() {
        let mut disk_emu = disk(1);

        let result = disk_emu.write_block(0, &[0x55; BLOCK_SIZE / 2]);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn kept_medium_is_sized_from_the_file() {
        let tf = tempfile::NamedTempFile::new().unwrap();
        let mut first = FileBlockEmulatorBuilder::from(tf.reopen().unwrap())
            .with_block_count(8)
            .build()
            .unwrap();
        first.write_block(7, &[0x7f; BLOCK_SIZE]).unwrap();
        first.sync_disk().unwrap();

        let mut reopened = FileBlockEmulatorBuilder::from(tf.reopen().unwrap())
            .clear_medium(false)
            .build()
            .unwrap();
        assert_eq!(reopened.block_count(), 8);
        assert_eq!(reopened.read(7).unwrap(), [0x7f; BLOCK_SIZE]);

        let mut by_path = FileBlockEmulator::open_disk(tf.path()).unwrap();
        assert_eq!(by_path.block_count(), 8);
        assert_eq!(by_path.read(7).unwrap(), [0x7f; BLOCK_SIZE]);
    }

    #[test]
    fn open_disk_rejects_ragged_files() {
        let mut tf = tempfile::NamedTempFile::new().unwrap();
        tf.write_all(&[0; BLOCK_SIZE + 1]).unwrap();
        tf.flush().unwrap();

        let err = FileBlockEmulator::open_disk(tf.path()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
