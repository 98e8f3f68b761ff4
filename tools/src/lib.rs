//! Command line helpers shared by the `mkdisk` and `diskctl` binaries.

pub mod logger;

use std::fmt::Display;
use std::process;

/// Prints `err` and exits with a failure status.
pub fn exit_with<E: Display>(context: &str, err: E) -> ! {
    eprintln!("{}: {}", context, err);
    process::exit(1)
}
