//! A small two level file system stored in a single disk image of 512 byte blocks.
//!
//! Block 0 holds the root directory, which maps up to 29 directory names to the block
//! holding each directory's file table. A file table holds up to 17 files with 8.3
//! names, each pointing at the first block of a chain of data blocks. The last five
//! blocks of the image are a bitmap with one bit per block.
//!
//! ```no_run
//! use diskfs::io::FileBlockEmulatorBuilder;
//! use diskfs::DiskFs;
//!
//! let dev = FileBlockEmulatorBuilder::from(tempfile::tempfile().unwrap())
//!     .with_block_count(10240)
//!     .build()
//!     .unwrap();
//! let mut fs = DiskFs::create(dev).unwrap();
//! fs.create_directory("/docs").unwrap();
//! fs.create_file("/docs/notes.txt").unwrap();
//! fs.write_file("/docs/notes.txt", b"hello", 0).unwrap();
//! assert_eq!(fs.read_file("/docs/notes.txt", 5, 0).unwrap(), b"hello");
//! ```

mod alloc;
mod check;
mod data;
mod dir;
mod fs;
pub mod io;
mod name;
mod path;
mod root;

pub use crate::alloc::{BITMAP_BLOCKS, MAX_BLOCKS};
pub use crate::check::CheckReport;
pub use crate::data::PAYLOAD_SIZE;
pub use crate::dir::MAX_FILES_IN_DIR;
pub use crate::fs::{Attributes, DiskFs, FsError, Result};
pub use crate::name::{MAX_EXTENSION, MAX_FILENAME};
pub use crate::path::{parse as parse_path, Target};
pub use crate::root::MAX_DIRS_IN_ROOT;
