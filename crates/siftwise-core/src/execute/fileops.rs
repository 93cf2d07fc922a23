use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use tracing::debug;

use crate::hasher::checksum::file_checksum;

fn is_cross_device(err: &io::Error) -> bool {
    match err.raw_os_error() {
        // EXDEV
        #[cfg(unix)]
        Some(18) => true,
        // ERROR_NOT_SAME_DEVICE
        #[cfg(windows)]
        Some(17) => true,
        _ => false,
    }
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

fn occupied(dst: &Path) -> io::Error {
    io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("destination already exists: {}", dst.display()),
    )
}

/// Copy `src` to a new file at `dst`. Fails if `dst` exists.
pub fn copy_new(src: &Path, dst: &Path) -> io::Result<u64> {
    ensure_parent(dst)?;
    let mut reader = File::open(src)?;
    let mut writer = match OpenOptions::new().write(true).create_new(true).open(dst) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(occupied(dst)),
        Err(e) => return Err(e),
    };
    let copied = match io::copy(&mut reader, &mut writer).and_then(|n| writer.sync_all().map(|_| n)) {
        Ok(n) => n,
        Err(e) => {
            drop(writer);
            // remove the partial copy
            let _ = fs::remove_file(dst);
            return Err(e);
        }
    };
    if let Ok(modified) = fs::metadata(src).and_then(|m| m.modified()) {
        let _ = File::options()
            .write(true)
            .open(dst)
            .and_then(|f| f.set_modified(modified));
    }
    Ok(copied)
}

/// Move `src` to `dst` without overwriting. Across devices the file is copied,
/// verified and only then removed from the source.
pub fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if dst.exists() {
        return Err(occupied(dst));
    }
    ensure_parent(dst)?;
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!("Cross-device move {} -> {}", src.display(), dst.display());
            copy_new(src, dst)?;
            let (before, after) = (file_checksum(src)?, file_checksum(dst)?);
            if before != after {
                let _ = fs::remove_file(dst);
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("copy of {} did not verify", src.display()),
                ));
            }
            fs::remove_file(src)
        }
        Err(e) => Err(e),
    }
}
