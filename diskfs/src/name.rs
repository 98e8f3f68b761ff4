//! Fixed-width, NUL-padded name fields as stored in the directory tables.

/// Longest directory or file name, in bytes.
pub const MAX_FILENAME: usize = 8;
/// Longest file extension, in bytes.
pub const MAX_EXTENSION: usize = 3;

/// Packs `name` into an `N` byte field, leaving at least one trailing NUL. Names
/// are validated by the path parser before they get here.
pub(crate) fn encode<const N: usize>(name: &str) -> [u8; N] {
    debug_assert!(name.len() < N, "name {:?} does not fit a {} byte field", name, N);
    let mut field = [0; N];
    let len = name.len().min(N - 1);
    field[..len].copy_from_slice(&name.as_bytes()[..len]);
    field
}

/// The bytes before the first NUL.
pub(crate) fn trimmed(field: &[u8]) -> &[u8] {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

pub(crate) fn decode(field: &[u8]) -> String {
    String::from_utf8_lossy(trimmed(field)).into_owned()
}

pub(crate) fn matches(field: &[u8], name: &str) -> bool {
    trimmed(field) == name.as_bytes()
}
