use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::model::{Mapping, MappingEntry};
use crate::storage::HistoryRecord;

/// Source paths still flagged residual, in path order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResidualSet {
    paths: Vec<PathBuf>,
}

impl ResidualSet {
    pub fn from_mapping(mapping: &Mapping) -> Self {
        Self {
            paths: mapping
                .iter()
                .filter(|e| e.is_residual)
                .map(|e| e.source_path.clone())
                .collect(),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.binary_search_by(|p| p.as_path().cmp(path)).is_ok()
    }
}

/// Entries that are no longer residual.
pub fn resolved(mapping: &Mapping) -> impl Iterator<Item = &MappingEntry> {
    mapping.iter().filter(|e| !e.is_residual)
}

/// Targets held by resolved entries; later passes may not claim them.
pub fn reserved_targets(mapping: &Mapping) -> BTreeSet<PathBuf> {
    resolved(mapping)
        .filter(|e| e.action.holds_target())
        .filter_map(|e| e.target_path.clone())
        .collect()
}

/// A later pass may only improve an entry that is still residual.
pub fn should_replace(old: &MappingEntry, new: &MappingEntry) -> bool {
    old.is_residual && (!new.is_residual || new.confidence > old.confidence)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub replaced: usize,
    pub newly_resolved: usize,
}

/// Merge one pass into the live mapping, recording every decision for audit.
pub fn merge_pass(mapping: &mut Mapping, candidates: Mapping, history: &mut Vec<HistoryRecord>) -> MergeStats {
    let mut stats = MergeStats::default();
    for candidate in candidates.iter() {
        let accepted = match mapping.get(&candidate.source_path) {
            Some(old) => should_replace(old, candidate),
            None => false,
        };
        history.push(history_record(candidate, accepted));
        if accepted {
            stats.replaced += 1;
            if !candidate.is_residual {
                stats.newly_resolved += 1;
            }
            mapping.replace(candidate.clone());
        }
    }
    stats
}

pub fn history_record(entry: &MappingEntry, accepted: bool) -> HistoryRecord {
    HistoryRecord {
        pass_id: entry.pass_id,
        source_path: entry.source_path.to_string_lossy().into_owned(),
        label: entry.label.clone(),
        confidence: entry.confidence,
        action: entry.action.as_str().to_string(),
        is_residual: entry.is_residual,
        accepted,
    }
}
