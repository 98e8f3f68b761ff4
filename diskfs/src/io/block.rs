use std::path::Path;

/// Every block on the image, metadata or data, is exactly this many bytes.
pub const BLOCK_SIZE: usize = 512;

/// The block number to access ranging from 0 (the first block) to n - 1 (the last
/// block) where n is number of blocks available.
pub type BlockNumber = usize;

/// A single block worth of bytes.
pub type Block = [u8; BLOCK_SIZE];

/// Block addressed access to a backing store. This is the only I/O boundary of the
/// file system; nothing above it computes a byte offset other than
/// `blocknr * BLOCK_SIZE`.
///
/// Implementations assume exclusive ownership of the medium. Two instances writing
/// the same image is not supported and is not detected.
pub trait BlockStorage {
    /// Opens a disk at the specified path, sizing it from the file length. This
    /// method does not validate the storage blocks, it is up for clients to ensure
    /// disks are appropriately initialized.
    fn open_disk<P: AsRef<Path>>(path: P) -> std::io::Result<Self>
    where
        Self: std::marker::Sized;
    /// The number of addressable blocks.
    fn block_count(&self) -> usize;
    /// Reads disk block number into provided buffer.
    ///
    /// # Errors
    ///
    /// Attempting to read a block out of range, or into a buffer smaller than a
    /// block, will return an error.
    fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes provided buffer into the specified block number.
    ///
    /// # Errors
    ///
    /// Attempting to write a block out of range, or a buffer that is not exactly
    /// one block long, will return an error.
    fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()>;
    /// Flush any buffered disk IO from memory. This is useful if it must guaranteed
    /// the disk writes actually occurred, for instance, if being re-read from
    /// disk.
    fn sync_disk(&mut self) -> std::io::Result<()>;

    /// Reads a whole block into a fresh array.
    fn read(&mut self, blocknr: BlockNumber) -> std::io::Result<Block> {
        let mut block = [0; BLOCK_SIZE];
        self.read_block(blocknr, &mut block)?;
        Ok(block)
    }
}
