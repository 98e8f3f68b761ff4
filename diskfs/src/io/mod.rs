mod block;
mod emulator;

pub use block::{Block, BlockNumber, BlockStorage, BLOCK_SIZE};
pub use emulator::{FileBlockEmulator, FileBlockEmulatorBuilder};
