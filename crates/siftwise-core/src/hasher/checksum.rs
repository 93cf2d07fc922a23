use std::fs::File;
use std::io;
use std::path::Path;

/// BLAKE3 digest of a file's full content, hex encoded.
///
/// Used to verify destinations after apply and before undo.
pub fn file_checksum(file: &Path) -> io::Result<String> {
    let mut f = File::open(file)?;
    let mut hasher = blake3::Hasher::new();
    io::copy(&mut f, &mut hasher)?;
    Ok(hasher.finalize().to_hex().to_string())
}

/// True when `file` exists and its checksum equals `expected`.
pub fn matches_checksum(file: &Path, expected: &str) -> bool {
    match file_checksum(file) {
        Ok(actual) => actual == expected,
        Err(_) => false,
    }
}
