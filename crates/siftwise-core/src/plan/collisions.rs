use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::model::{Action, MappingEntry};
use crate::scanner::record::extension_of;

pub const CAP_EXCEEDED_REASON: &str = "collision cap exceeded";

/// Give every target-holding entry a unique destination.
///
/// Entries are visited in source path order. Paths in `reserved` and files
/// already present on disk are never handed out. A colliding target gets
/// `suffix` (with `{n}` replaced by 1..=cap) inserted before its extension; an
/// entry that runs out of attempts is turned into a residual Skip.
///
/// Returns how many entries exceeded the cap.
pub fn resolve_collisions(
    entries: &mut [MappingEntry],
    reserved: &BTreeSet<PathBuf>,
    suffix: &str,
    cap: u32,
) -> usize {
    entries.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    let mut taken: BTreeSet<PathBuf> = reserved.clone();
    let mut exceeded = 0;

    for entry in entries.iter_mut() {
        if !entry.action.holds_target() {
            continue;
        }
        let target = match entry.target_path.take() {
            Some(t) => t,
            None => continue,
        };
        match claim(&target, &taken, suffix, cap) {
            Some(free) => {
                taken.insert(free.clone());
                entry.target_path = Some(free);
            }
            None => {
                warn!(
                    "No free target for {} after {} attempts",
                    entry.source_path.display(),
                    cap
                );
                entry.action = Action::Skip;
                entry.is_residual = true;
                entry.reason = CAP_EXCEEDED_REASON.to_string();
                exceeded += 1;
            }
        }
    }
    exceeded
}

fn claim(target: &Path, taken: &BTreeSet<PathBuf>, suffix: &str, cap: u32) -> Option<PathBuf> {
    let free = |p: &Path| !taken.contains(p) && !p.exists();
    if free(target) {
        return Some(target.to_path_buf());
    }
    (1..=cap)
        .map(|n| with_suffix(target, suffix, n))
        .find(|candidate| free(candidate))
}

/// `doc.txt` -> `doc (1).txt`; compound archive extensions stay whole.
pub fn with_suffix(path: &Path, suffix: &str, n: u32) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tag = suffix.replace("{n}", &n.to_string());
    let ext = extension_of(path);
    let split = name
        .len()
        .checked_sub(ext.len() + 1)
        .filter(|&at| !ext.is_empty() && at > 0 && name.is_char_boundary(at));
    let renamed = match split {
        Some(at) => format!("{}{}{}", &name[..at], tag, &name[at..]),
        None => format!("{}{}", name, tag),
    };
    path.with_file_name(renamed)
}

/// Suffix a directory name without treating any dot as an extension.
pub fn with_dir_suffix(dir: &Path, suffix: &str, n: u32) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!("{}{}", name, suffix.replace("{n}", &n.to_string())))
}
