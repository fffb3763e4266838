use std::fmt;

/// Byte order of the multi-byte values in the debug sections.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endian::Little => f.write_str("little-endian"),
            Endian::Big => f.write_str("big-endian"),
        }
    }
}

/// Byte offset into one of the debug sections.
pub type SectionOffset = u64;

/// Joins a possibly relative `name` onto `dir`.
///
/// Absolute names (POSIX root, UNC/backslash root or a drive letter) are returned unchanged,
/// as is `name` when `dir` is empty.
pub fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() || is_absolute(name) {
        return name.to_string();
    }
    if name.is_empty() {
        return dir.to_string();
    }
    if dir.ends_with('/') || dir.ends_with('\\') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

pub fn is_absolute(path: &str) -> bool {
    let bytes = path.as_bytes();
    match bytes {
        [b'/', ..] | [b'\\', ..] => true,
        [drive, b':', ..] => drive.is_ascii_alphabetic(),
        _ => false,
    }
}
