//! Byte-range reads and writes over a file's chain of data blocks.
//!
//! Each data block carries `PAYLOAD_SIZE` bytes of file content followed by the
//! little-endian index of the next block in the chain, 0 marking the end. A file of
//! `size` bytes owns exactly `blocks_for(size)` blocks; the directory record holds
//! the first one.

use crate::alloc::BlockAllocator;
use crate::dir::{DirectoryTable, FileEntry};
use crate::fs::{FsError, Result};
use crate::io::{BlockNumber, BlockStorage, BLOCK_SIZE};

use log::{debug, warn};
use zerocopy::byteorder::{LittleEndian, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

const NEXT_POINTER_SIZE: usize = 8;
/// File content bytes per block.
pub const PAYLOAD_SIZE: usize = BLOCK_SIZE - NEXT_POINTER_SIZE;

#[repr(C)]
#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy)]
struct DataBlock {
    payload: [u8; PAYLOAD_SIZE],
    next: U64<LittleEndian>,
}

const _: () = assert!(std::mem::size_of::<DataBlock>() == BLOCK_SIZE);

impl DataBlock {
    fn load<T: BlockStorage>(dev: &mut T, blocknr: BlockNumber) -> Result<Self> {
        let raw = dev.read(blocknr)?;
        DataBlock::read_from(&raw[..])
            .ok_or_else(|| FsError::Corrupt(format!("data block {} has the wrong size", blocknr)))
    }

    fn store<T: BlockStorage>(&self, dev: &mut T, blocknr: BlockNumber) -> Result<()> {
        dev.write_block(blocknr, self.as_bytes())?;
        Ok(())
    }

    fn next(&self) -> BlockNumber {
        self.next.get() as BlockNumber
    }
}

/// Number of blocks a file of `size` bytes occupies.
pub fn blocks_for(size: u64) -> usize {
    ((size + PAYLOAD_SIZE as u64 - 1) / PAYLOAD_SIZE as u64) as usize
}

fn check_pointer(alloc: &BlockAllocator, from: BlockNumber, to: BlockNumber) -> Result<()> {
    if alloc.is_reserved(to) || to >= alloc.block_count() {
        return Err(FsError::Corrupt(format!(
            "block {} links to invalid block {}",
            from, to
        )));
    }
    Ok(())
}

/// The first `len` blocks of the chain starting at `start`. Every pointer followed is
/// validated, and a chain shorter than `len` is corrupt.
pub fn chain<T: BlockStorage>(
    dev: &mut T,
    alloc: &BlockAllocator,
    start: BlockNumber,
    len: usize,
) -> Result<Vec<BlockNumber>> {
    let mut blocks = Vec::with_capacity(len);
    if len == 0 {
        return Ok(blocks);
    }
    check_pointer(alloc, 0, start)?;
    let mut current = start;
    loop {
        blocks.push(current);
        if blocks.len() == len {
            return Ok(blocks);
        }
        let next = DataBlock::load(dev, current)?.next();
        if next == 0 {
            return Err(FsError::Corrupt(format!(
                "chain from block {} ends after {} of {} blocks",
                start,
                blocks.len(),
                len
            )));
        }
        check_pointer(alloc, current, next)?;
        current = next;
    }
}

/// Copies up to `buf.len()` bytes starting at `offset` out of a `size` byte file whose
/// chain starts at `start`. Returns the number of bytes copied, which is short only at
/// the end of the file.
pub fn read<T: BlockStorage>(
    dev: &mut T,
    alloc: &BlockAllocator,
    start: BlockNumber,
    size: u64,
    offset: u64,
    buf: &mut [u8],
) -> Result<usize> {
    if offset > size {
        return Err(FsError::InvalidOffset { offset, size });
    }
    let wanted = ((size - offset) as usize).min(buf.len());
    if wanted == 0 {
        return Ok(0);
    }

    let first = (offset / PAYLOAD_SIZE as u64) as usize;
    let mut skip = (offset % PAYLOAD_SIZE as u64) as usize;
    let blocks = chain(dev, alloc, start, blocks_for(offset + wanted as u64))?;

    let mut copied = 0;
    for &blocknr in &blocks[first..] {
        let block = DataBlock::load(dev, blocknr)?;
        let n = (PAYLOAD_SIZE - skip).min(wanted - copied);
        buf[copied..copied + n].copy_from_slice(&block.payload[skip..skip + n]);
        copied += n;
        skip = 0;
    }
    debug_assert_eq!(copied, wanted);
    Ok(copied)
}

/// Returns block `index` of the file, appending a fresh zeroed block when `index` is
/// one past the end of `blocks`. The new block is marked in the bitmap and written
/// before anything points at it.
fn block_at<T: BlockStorage>(
    dev: &mut T,
    alloc: &mut BlockAllocator,
    table: &mut DirectoryTable,
    entry: &FileEntry,
    blocks: &mut Vec<BlockNumber>,
    index: usize,
) -> Result<BlockNumber> {
    if let Some(&blocknr) = blocks.get(index) {
        return Ok(blocknr);
    }
    debug_assert_eq!(index, blocks.len());

    let fresh = alloc.find_and_mark_free_block(dev)?;
    if let Err(e) = DataBlock::new_zeroed().store(dev, fresh) {
        // Nothing links to it yet.
        if let Err(release) = alloc.release_block(dev, fresh) {
            warn!("block {} stays marked after a failed write: {}", fresh, release);
        }
        return Err(e);
    }
    match blocks.last() {
        Some(&tail) => {
            let mut block = DataBlock::load(dev, tail)?;
            block.next.set(fresh as u64);
            block.store(dev, tail)?;
        }
        None => table.update_start_block(dev, &entry.name, &entry.extension, fresh)?,
    }
    debug!(
        "extended {} with block {} at position {}",
        entry.display_name(),
        fresh,
        index
    );
    blocks.push(fresh);
    Ok(fresh)
}

/// Unlinks `blocks[keep..]` from the chain, then returns them to the free pool.
fn cut_chain<T: BlockStorage>(
    dev: &mut T,
    alloc: &mut BlockAllocator,
    table: &mut DirectoryTable,
    entry: &FileEntry,
    blocks: &[BlockNumber],
    keep: usize,
) -> Result<()> {
    if keep >= blocks.len() {
        return Ok(());
    }
    if keep == 0 {
        table.update_start_block(dev, &entry.name, &entry.extension, 0)?;
    } else {
        let tail = blocks[keep - 1];
        let mut block = DataBlock::load(dev, tail)?;
        block.next.set(0);
        block.store(dev, tail)?;
    }
    for &blocknr in &blocks[keep..] {
        alloc.release_block(dev, blocknr)?;
    }
    debug!(
        "released {} blocks from {}",
        blocks.len() - keep,
        entry.display_name()
    );
    Ok(())
}

/// Writes `buf` into the file at `offset`, growing the chain as needed, and records
/// the new size in `table`.
///
/// Writes past the end of the file are refused; `offset == size` appends. When a
/// write fails part way, for lack of space or on a disk error, the size covers
/// exactly the bytes written, blocks linked past that size are released, and the
/// error is returned.
pub fn write<T: BlockStorage>(
    dev: &mut T,
    alloc: &mut BlockAllocator,
    table: &mut DirectoryTable,
    entry: &FileEntry,
    buf: &[u8],
    offset: u64,
) -> Result<usize> {
    if offset > entry.size {
        return Err(FsError::InvalidOffset {
            offset,
            size: entry.size,
        });
    }
    if buf.is_empty() {
        return Ok(0);
    }

    let mut blocks = chain(dev, alloc, entry.start_block, blocks_for(entry.size))?;
    let mut index = (offset / PAYLOAD_SIZE as u64) as usize;
    let mut skip = (offset % PAYLOAD_SIZE as u64) as usize;
    let mut written = 0;
    let mut outcome = Ok(());

    while written < buf.len() {
        let mut step = |blocks: &mut Vec<BlockNumber>| -> Result<usize> {
            let blocknr = block_at(dev, alloc, table, entry, blocks, index)?;
            let mut block = DataBlock::load(dev, blocknr)?;
            let n = (PAYLOAD_SIZE - skip).min(buf.len() - written);
            block.payload[skip..skip + n].copy_from_slice(&buf[written..written + n]);
            block.store(dev, blocknr)?;
            Ok(n)
        };
        match step(&mut blocks) {
            Ok(n) => {
                written += n;
                index += 1;
                skip = 0;
            }
            Err(e) => {
                outcome = Err(e);
                break;
            }
        }
    }

    let end = offset + written as u64;
    let mut recorded = entry.size;
    if end > entry.size {
        match table.update_size(dev, &entry.name, &entry.extension, end) {
            Ok(()) => recorded = end,
            Err(e) => outcome = outcome.and(Err(e)),
        }
    }
    match outcome {
        Ok(()) => Ok(written),
        Err(e) => {
            warn!(
                "write to {} stopped after {} of {} bytes: {}",
                entry.display_name(),
                written,
                buf.len(),
                e
            );
            // A block linked past the recorded size would be overwritten by the next
            // append's link and lost.
            if let Err(cleanup) = cut_chain(dev, alloc, table, entry, &blocks, blocks_for(recorded)) {
                warn!(
                    "could not release unused blocks of {}: {}",
                    entry.display_name(),
                    cleanup
                );
            }
            Err(e)
        }
    }
}

/// Shrinks the file to `new_size` bytes, releasing every block past the new end. The
/// size is lowered before the chain is cut, so the recorded size never reaches past
/// the chain and no pointer ever names a free block.
pub fn truncate<T: BlockStorage>(
    dev: &mut T,
    alloc: &mut BlockAllocator,
    table: &mut DirectoryTable,
    entry: &FileEntry,
    new_size: u64,
) -> Result<()> {
    if new_size > entry.size {
        return Err(FsError::InvalidOffset {
            offset: new_size,
            size: entry.size,
        });
    }
    let blocks = chain(dev, alloc, entry.start_block, blocks_for(entry.size))?;
    table.update_size(dev, &entry.name, &entry.extension, new_size)?;
    cut_chain(dev, alloc, table, entry, &blocks, blocks_for(new_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::State;
    use crate::io::{FileBlockEmulator, FileBlockEmulatorBuilder};

    /// Fails the write that comes after `writes_left` more writes to `fail_block`.
    struct FlakyDisk {
        inner: FileBlockEmulator,
        fail_block: BlockNumber,
        writes_left: usize,
    }

    impl BlockStorage for FlakyDisk {
        fn open_disk<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<Self> {
            Ok(FlakyDisk {
                inner: FileBlockEmulator::open_disk(path)?,
                fail_block: usize::MAX,
                writes_left: 0,
            })
        }

        fn block_count(&self) -> usize {
            self.inner.block_count()
        }

        fn read_block(&mut self, blocknr: BlockNumber, buf: &mut [u8]) -> std::io::Result<()> {
            self.inner.read_block(blocknr, buf)
        }

        fn write_block(&mut self, blocknr: BlockNumber, buf: &[u8]) -> std::io::Result<()> {
            if blocknr == self.fail_block {
                if self.writes_left == 0 {
                    return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk fault"));
                }
                self.writes_left -= 1;
            }
            self.inner.write_block(blocknr, buf)
        }

        fn sync_disk(&mut self) -> std::io::Result<()> {
            self.inner.sync_disk()
        }
    }

    struct Fixture<T: BlockStorage = FileBlockEmulator> {
        dev: T,
        alloc: BlockAllocator,
        table: DirectoryTable,
    }

    impl Fixture {
        /// Switches to a disk that fails once `fail_block` has taken `writes_left`
        /// more writes.
        fn failing_at(self, fail_block: BlockNumber, writes_left: usize) -> Fixture<FlakyDisk> {
            Fixture {
                dev: FlakyDisk {
                    inner: self.dev,
                    fail_block,
                    writes_left,
                },
                alloc: self.alloc,
                table: self.table,
            }
        }

        fn new(blocks: usize) -> Self {
            let mut dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
                .with_block_count(blocks)
                .build()
                .expect("Could not initialize disk emulator.");
            let mut alloc = BlockAllocator::new(blocks).unwrap();
            let location = alloc.find_and_mark_free_block(&mut dev).unwrap();
            let mut table = DirectoryTable::create(&mut dev, location).unwrap();
            table.add_file(&mut dev, "file", "bin").unwrap();
            Fixture { dev, alloc, table }
        }
    }

    impl<T: BlockStorage> Fixture<T> {
        fn entry(&self) -> FileEntry {
            self.table.find_file("file", "bin").unwrap()
        }

        fn write(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
            let entry = self.entry();
            write(&mut self.dev, &mut self.alloc, &mut self.table, &entry, buf, offset)
        }

        fn read(&mut self, len: usize, offset: u64) -> Result<Vec<u8>> {
            let entry = self.entry();
            let mut buf = vec![0; len];
            let n = read(&mut self.dev, &self.alloc, entry.start_block, entry.size, offset, &mut buf)?;
            buf.truncate(n);
            Ok(buf)
        }

        fn truncate(&mut self, size: u64) -> Result<()> {
            let entry = self.entry();
            truncate(&mut self.dev, &mut self.alloc, &mut self.table, &entry, size)
        }

        fn chain(&mut self) -> Vec<BlockNumber> {
            let entry = self.entry();
            chain(&mut self.dev, &self.alloc, entry.start_block, blocks_for(entry.size)).unwrap()
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn block_counts_round_up() {
        assert_eq!(blocks_for(0), 0);
        assert_eq!(blocks_for(1), 1);
        assert_eq!(blocks_for(PAYLOAD_SIZE as u64), 1);
        assert_eq!(blocks_for(PAYLOAD_SIZE as u64 + 1), 2);
        assert_eq!(blocks_for(600), 2);
    }

    #[test]
    fn first_write_assigns_the_start_block() {
        let mut fx = Fixture::new(32);

        assert_eq!(fx.write(b"hello", 0).unwrap(), 5);
        let entry = fx.entry();
        assert_eq!(entry.size, 5);
        assert_eq!(entry.start_block, 2);
        assert_eq!(fx.read(5, 0).unwrap(), b"hello");
    }

    #[test]
    fn multi_block_writes_are_chained() {
        let mut fx = Fixture::new(32);
        let data = pattern(600);

        assert_eq!(fx.write(&data, 0).unwrap(), 600);
        let blocks = fx.chain();
        assert_eq!(blocks, vec![2, 3]);
        for &blocknr in &blocks {
            assert_eq!(fx.alloc.state(blocknr), State::Used);
        }
        assert_eq!(fx.read(600, 0).unwrap(), data);
        // Reads that start inside the second block.
        assert_eq!(fx.read(50, 550).unwrap(), &data[550..600]);
        // Reads are clamped at the end of the file.
        assert_eq!(fx.read(100, 590).unwrap(), &data[590..]);
        assert!(fx.read(10, 600).unwrap().is_empty());
    }

    #[test]
    fn appends_grow_the_chain_at_block_boundaries() {
        let mut fx = Fixture::new(32);
        let data = pattern(PAYLOAD_SIZE * 2 + 10);

        fx.write(&data[..PAYLOAD_SIZE], 0).unwrap();
        assert_eq!(fx.chain().len(), 1);
        fx.write(&data[PAYLOAD_SIZE..], PAYLOAD_SIZE as u64).unwrap();
        assert_eq!(fx.chain().len(), 3);
        assert_eq!(fx.read(data.len(), 0).unwrap(), data);
    }

    #[test]
    fn overwrites_in_place_keep_size_and_blocks() {
        let mut fx = Fixture::new(32);
        fx.write(&[b'a'; 600], 0).unwrap();
        let before = fx.chain();

        fx.write(&[b'b'; 20], 500).unwrap();
        assert_eq!(fx.entry().size, 600);
        assert_eq!(fx.chain(), before);

        let contents = fx.read(600, 0).unwrap();
        assert!(contents[..500].iter().all(|&b| b == b'a'));
        assert!(contents[500..520].iter().all(|&b| b == b'b'));
        assert!(contents[520..].iter().all(|&b| b == b'a'));
    }

    #[test]
    fn offsets_past_the_end_are_rejected() {
        let mut fx = Fixture::new(32);
        fx.write(b"abc", 0).unwrap();

        assert!(matches!(
            fx.write(b"x", 4),
            Err(FsError::InvalidOffset { offset: 4, size: 3 })
        ));
        assert!(matches!(fx.read(1, 4), Err(FsError::InvalidOffset { .. })));
        assert!(matches!(fx.truncate(4), Err(FsError::InvalidOffset { .. })));
    }

    #[test]
    fn running_out_of_space_keeps_the_written_prefix() {
        // Root, one directory block, two data blocks and the bitmap.
        let mut fx = Fixture::new(9);
        let data = pattern(PAYLOAD_SIZE * 3);

        assert!(matches!(fx.write(&data, 0), Err(FsError::OutOfSpace)));
        let entry = fx.entry();
        assert_eq!(entry.size, PAYLOAD_SIZE as u64 * 2);
        assert_eq!(fx.chain(), vec![2, 3]);
        assert_eq!(fx.read(data.len(), 0).unwrap(), &data[..PAYLOAD_SIZE * 2]);
    }

    #[test]
    fn out_of_space_on_an_empty_file_changes_nothing() {
        let mut fx = Fixture::new(8);
        // Take the last free block.
        fx.alloc.find_and_mark_free_block(&mut fx.dev).unwrap();

        assert!(matches!(fx.write(b"data", 0), Err(FsError::OutOfSpace)));
        let entry = fx.entry();
        assert_eq!((entry.size, entry.start_block), (0, 0));
    }

    #[test]
    fn disk_error_mid_write_keeps_the_written_prefix() {
        // Block 2 takes the first chunk; the second chunk fails on block 3 after it was
        // zeroed and linked.
        let mut fx = Fixture::new(32).failing_at(3, 1);
        let free = fx.alloc.free_count();
        let data = pattern(1000);

        assert!(matches!(fx.write(&data, 0), Err(FsError::Io(_))));
        let entry = fx.entry();
        assert_eq!((entry.size, entry.start_block), (PAYLOAD_SIZE as u64, 2));
        assert_eq!(fx.chain(), vec![2]);
        assert_eq!(DataBlock::load(&mut fx.dev, 2).unwrap().next(), 0);
        assert_eq!(fx.alloc.state(3), State::Free);
        assert_eq!(fx.alloc.free_count(), free - 1);
        assert_eq!(fx.read(data.len(), 0).unwrap(), &data[..PAYLOAD_SIZE]);

        // Once the disk recovers the append picks up where the write stopped.
        fx.dev.fail_block = usize::MAX;
        fx.write(&data[PAYLOAD_SIZE..], PAYLOAD_SIZE as u64).unwrap();
        assert_eq!(fx.chain(), vec![2, 3]);
        assert_eq!(fx.alloc.free_count(), free - 2);
        assert_eq!(fx.read(data.len(), 0).unwrap(), data);
    }

    #[test]
    fn disk_error_on_the_first_block_leaves_the_file_empty() {
        let mut fx = Fixture::new(32).failing_at(2, 0);
        let free = fx.alloc.free_count();

        assert!(matches!(fx.write(b"data", 0), Err(FsError::Io(_))));
        let entry = fx.entry();
        assert_eq!((entry.size, entry.start_block), (0, 0));
        assert_eq!(fx.alloc.state(2), State::Free);
        assert_eq!(fx.alloc.free_count(), free);
    }

    #[test]
    fn truncation_releases_the_tail() {
        let mut fx = Fixture::new(32);
        let data = pattern(PAYLOAD_SIZE * 3);
        fx.write(&data, 0).unwrap();
        let free = fx.alloc.free_count();
        let blocks = fx.chain();

        fx.truncate(PAYLOAD_SIZE as u64 + 1).unwrap();
        assert_eq!(fx.alloc.free_count(), free + 1);
        assert_eq!(fx.alloc.state(blocks[2]), State::Free);
        assert_eq!(fx.chain(), &blocks[..2]);
        assert_eq!(fx.read(data.len(), 0).unwrap(), &data[..PAYLOAD_SIZE + 1]);

        // The freed block is reused by the next growth.
        fx.write(&data[PAYLOAD_SIZE + 1..], PAYLOAD_SIZE as u64 + 1).unwrap();
        assert_eq!(fx.chain(), blocks);
        assert_eq!(fx.read(data.len(), 0).unwrap(), data);
    }

    #[test]
    fn truncation_to_zero_releases_everything() {
        let mut fx = Fixture::new(32);
        fx.write(&pattern(1500), 0).unwrap();
        let free = fx.alloc.free_count();

        fx.truncate(0).unwrap();
        let entry = fx.entry();
        assert_eq!((entry.size, entry.start_block), (0, 0));
        assert_eq!(fx.alloc.free_count(), free + 3);
    }

    #[test]
    fn broken_chains_are_reported_as_corrupt() {
        let mut fx = Fixture::new(32);
        fx.write(&pattern(600), 0).unwrap();
        let blocks = fx.chain();

        // Point the first block at the bitmap region.
        let mut block = DataBlock::load(&mut fx.dev, blocks[0]).unwrap();
        block.next.set(31);
        block.store(&mut fx.dev, blocks[0]).unwrap();
        assert!(matches!(fx.read(600, 0), Err(FsError::Corrupt(_))));

        // Or end it early.
        block.next.set(0);
        block.store(&mut fx.dev, blocks[0]).unwrap();
        assert!(matches!(fx.read(600, 0), Err(FsError::Corrupt(_))));
    }
}
