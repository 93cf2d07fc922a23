use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;
use twox_hash::XxHash64;

const FINGERPRINT_LENGTH: usize = 1024; // 1KB
const HEAD_LENGTH: usize = 16;

/// Leading-bytes signature of a file: the first few bytes verbatim plus
/// an XxHash64 over the first KiB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub head: Vec<u8>,
    pub hash: u64,
}

pub fn fingerprint_file(file: &Path) -> io::Result<Fingerprint> {
    let data = read_portion(file)?;
    Ok(Fingerprint {
        head: data.iter().take(HEAD_LENGTH).copied().collect(),
        hash: hash_data(&data),
    })
}

/// Streaming XxHash64 over the full content.
pub fn content_hash(file: &Path) -> io::Result<u64> {
    let mut f = File::open(file)?;
    let mut hasher = XxHash64::with_seed(0);
    let mut buffer = vec![0u8; 64 * 1024];
    loop {
        let n = f.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.write(&buffer[..n]);
    }
    Ok(hasher.finish())
}

fn read_portion(file: &Path) -> io::Result<Vec<u8>> {
    let f = File::open(file)?;
    let mut buffer = Vec::with_capacity(FINGERPRINT_LENGTH);
    f.take(FINGERPRINT_LENGTH as u64).read_to_end(&mut buffer)?;
    Ok(buffer)
}

pub fn hash_data(data: &[u8]) -> u64 {
    let mut hasher = XxHash64::with_seed(0);
    hasher.write(data);
    hasher.finish()
}
