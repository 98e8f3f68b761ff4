use crate::dir::{DirectoryTable, FileEntry};
use crate::fs::{FsError, Result};
use crate::io::{BlockNumber, BlockStorage};
use crate::name::{MAX_EXTENSION, MAX_FILENAME};
use crate::root::RootDirectory;

/// What a path names, before anything on disk is consulted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Root,
    Directory(String),
    File {
        dir: String,
        name: String,
        /// Empty when the path has no extension.
        ext: String,
    },
}

/// What a path names after walking the tables.
pub enum Resolved {
    Root,
    Directory {
        name: String,
        location: BlockNumber,
    },
    File {
        table: DirectoryTable,
        entry: FileEntry,
    },
}

fn invalid(path: &str, reason: &str) -> FsError {
    FsError::InvalidPath(format!("{:?}: {}", path, reason))
}

fn check_len(path: &str, component: &str, max: usize, what: &str) -> Result<()> {
    if component.is_empty() {
        return Err(invalid(path, &format!("empty {}", what)));
    }
    if component.len() > max {
        return Err(invalid(
            path,
            &format!("{} {:?} is longer than {} bytes", what, component, max),
        ));
    }
    Ok(())
}

/// Parses `/`, `/dir`, `/dir/`, `/dir/file` and `/dir/file.ext`.
///
/// Oversized components are rejected rather than truncated, so two different paths
/// can never name the same entry.
pub fn parse(path: &str) -> Result<Target> {
    if path.contains('\0') {
        return Err(invalid(path, "contains a NUL byte"));
    }
    let rest = path
        .strip_prefix('/')
        .ok_or_else(|| invalid(path, "must start with \"/\""))?;
    if rest.is_empty() {
        return Ok(Target::Root);
    }

    let parts: Vec<&str> = rest.split('/').collect();
    let (dir, file) = match parts.as_slice() {
        [dir] | [dir, ""] => (*dir, None),
        [dir, file] => (*dir, Some(*file)),
        _ => return Err(invalid(path, "only two levels are supported")),
    };

    if dir == "." || dir == ".." {
        return Err(invalid(path, "relative components are not supported"));
    }
    check_len(path, dir, MAX_FILENAME, "directory name")?;
    if dir.contains('.') {
        // A dotted name directly under root is a file, which only subdirectories hold.
        return Err(invalid(path, "files must live in a subdirectory"));
    }

    let file = match file {
        None => return Ok(Target::Directory(dir.to_string())),
        Some(file) => file,
    };
    let (name, ext) = match file.find('.') {
        Some(dot) => {
            let ext = &file[dot + 1..];
            check_len(path, ext, MAX_EXTENSION, "extension")?;
            if ext.contains('.') {
                return Err(invalid(path, "extension contains \".\""));
            }
            (&file[..dot], ext)
        }
        None => (file, ""),
    };
    check_len(path, name, MAX_FILENAME, "file name")?;

    Ok(Target::File {
        dir: dir.to_string(),
        name: name.to_string(),
        ext: ext.to_string(),
    })
}

/// Walks the root table and, for files, the directory's table. Fails with
/// `NotFound` at the first level where the lookup misses.
pub fn resolve<T: BlockStorage>(dev: &mut T, root: &RootDirectory, target: Target) -> Result<Resolved> {
    match target {
        Target::Root => Ok(Resolved::Root),
        Target::Directory(name) => {
            let location = root.find_directory(&name).ok_or(FsError::NotFound)?;
            Ok(Resolved::Directory { name, location })
        }
        Target::File { dir, name, ext } => {
            let location = root.find_directory(&dir).ok_or(FsError::NotFound)?;
            let table = DirectoryTable::load(dev, location)?;
            let entry = table.find_file(&name, &ext).ok_or(FsError::NotFound)?;
            Ok(Resolved::File { table, entry })
        }
    }
}
