use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::Error;

/// A file captured during a scan. Immutable for the pass that captured it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub modified: i64,
    /// Lowercase, without the leading dot; compound archive extensions stay whole.
    pub extension: String,
    /// Leading bytes of the file, used for signature sniffing.
    pub head: Vec<u8>,
    /// XxHash64 of the first KiB.
    pub fingerprint: u64,
    pub content_hash: Option<u64>,
}

impl FileRecord {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// File name without the extension as recorded in `extension`.
    pub fn stem(&self) -> String {
        let name = self.file_name();
        if self.extension.is_empty() {
            return name;
        }
        let suffix_len = self.extension.len() + 1;
        if name.len() > suffix_len && name.is_char_boundary(name.len() - suffix_len) {
            name[..name.len() - suffix_len].to_string()
        } else {
            name
        }
    }
}

/// A file that could not be read during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorSignal {
    pub detector: String,
    pub label: String,
    pub confidence: f64,
    pub evidence: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Action {
    Move,
    Copy,
    Skip,
    Suggest,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Move => "Move",
            Action::Copy => "Copy",
            Action::Skip => "Skip",
            Action::Suggest => "Suggest",
        }
    }

    /// Actions the execution engine acts upon.
    pub fn is_transfer(&self) -> bool {
        matches!(self, Action::Move | Action::Copy)
    }

    /// Actions that reserve a destination path.
    pub fn holds_target(&self) -> bool {
        !matches!(self, Action::Skip)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "move" | "mv" => Ok(Action::Move),
            "copy" | "cp" => Ok(Action::Copy),
            "skip" | "ignore" => Ok(Action::Skip),
            "suggest" | "review" => Ok(Action::Suggest),
            other => Err(Error::Other(format!("unknown action '{}'", other))),
        }
    }
}

/// Final decision of the classification stage for one file in one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub path: PathBuf,
    pub label: String,
    pub confidence: f64,
    pub signals: Vec<DetectorSignal>,
    pub rule_override: bool,
    pub rule_id: Option<String>,
    pub rule_action: Option<Action>,
}

impl Classification {
    pub fn unlabeled(path: PathBuf, signals: Vec<DetectorSignal>) -> Self {
        Self {
            path,
            label: String::new(),
            confidence: 0.0,
            signals,
            rule_override: false,
            rule_id: None,
            rule_action: None,
        }
    }

    /// Pinned files stay where they are and keep their directory from being moved as a unit.
    pub fn is_pinned(&self) -> bool {
        self.rule_action == Some(Action::Skip)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub source_path: PathBuf,
    pub label: String,
    pub confidence: f64,
    pub action: Action,
    pub target_path: Option<PathBuf>,
    pub is_residual: bool,
    pub rule_id: Option<String>,
    pub reason: String,
    pub pass_id: u32,
}

impl MappingEntry {
    pub fn residual(source_path: PathBuf, label: String, confidence: f64, reason: String, pass_id: u32) -> Self {
        Self {
            source_path,
            label,
            confidence,
            action: Action::Skip,
            target_path: None,
            is_residual: true,
            rule_id: None,
            reason,
            pass_id,
        }
    }
}

/// The live plan: exactly one entry per source path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapping {
    entries: BTreeMap<PathBuf, MappingEntry>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = MappingEntry>) -> Self {
        let mut mapping = Self::new();
        for entry in entries {
            mapping.replace(entry);
        }
        mapping
    }

    /// Insert or fully replace the entry for its source path. Returns the previous entry.
    pub fn replace(&mut self, entry: MappingEntry) -> Option<MappingEntry> {
        self.entries.insert(entry.source_path.clone(), entry)
    }

    pub fn get(&self, source: &Path) -> Option<&MappingEntry> {
        self.entries.get(source)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MappingEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn residual_count(&self) -> usize {
        self.entries.values().filter(|e| e.is_residual).count()
    }

    pub fn max_pass_id(&self) -> u32 {
        self.entries.values().map(|e| e.pass_id).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(path: &str, ext: &str) -> FileRecord {
        FileRecord {
            path: PathBuf::from(path),
            size: 1,
            modified: 0,
            extension: ext.to_string(),
            head: Vec::new(),
            fingerprint: 0,
            content_hash: None,
        }
    }

    #[test]
    fn test_stem_strips_compound_extension() {
        assert_eq!(record("/a/backup.tar.gz", "tar.gz").stem(), "backup");
        assert_eq!(record("/a/notes.txt", "txt").stem(), "notes");
        assert_eq!(record("/a/Makefile", "").stem(), "Makefile");
    }

    #[test]
    fn test_action_parse_and_display() {
        assert_eq!("mv".parse::<Action>().unwrap(), Action::Move);
        assert_eq!("Suggest".parse::<Action>().unwrap(), Action::Suggest);
        assert!("delete".parse::<Action>().is_err());
        assert_eq!(Action::Copy.to_string(), "Copy");
    }

    #[test]
    fn test_mapping_replace_keeps_one_entry_per_path() {
        let mut mapping = Mapping::new();
        let first = MappingEntry::residual("/src/a".into(), String::new(), 0.0, "no label".into(), 1);
        let mut second = first.clone();
        second.pass_id = 2;
        assert!(mapping.replace(first).is_none());
        assert!(mapping.replace(second).is_some());
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.max_pass_id(), 2);
    }
}
