//! DICOM Part-10 container signature check.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;

/// Length of the opaque preamble before the magic code.
pub const PREAMBLE_LENGTH: u64 = 128;

/// The magic code following the preamble.
pub const MAGIC_CODE: &[u8; 4] = b"DICM";

/// Check whether the file at `path` starts like a DICOM Part-10 file:
/// a 128 byte preamble followed by `DICM`.
///
/// Any I/O failure makes this return `false`.
/// Passing the check does not mean that the data set itself can be read.
pub fn is_valid_container(path: impl AsRef<Path>) -> bool {
    match File::open(path.as_ref()) {
        Ok(file) => has_magic_code(file),
        Err(_) => false,
    }
}

/// Same check as [`is_valid_container`], on bytes already in memory.
pub fn has_dicm_signature(bytes: &[u8]) -> bool {
    has_magic_code(Cursor::new(bytes))
}

fn has_magic_code<R: Read + Seek>(mut source: R) -> bool {
    let len = match source.seek(SeekFrom::End(0)) {
        Ok(len) => len,
        Err(_) => return false,
    };
    if len < PREAMBLE_LENGTH + MAGIC_CODE.len() as u64 {
        return false;
    }
    if source.seek(SeekFrom::Start(PREAMBLE_LENGTH)).is_err() {
        return false;
    }
    let mut magic = [0u8; 4];
    match source.read_exact(&mut magic) {
        Ok(()) => &magic == MAGIC_CODE,
        Err(_) => false,
    }
}
