use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

use super::collisions::{resolve_collisions, with_dir_suffix, CAP_EXCEEDED_REASON};
use crate::analysis::{CohesionReport, Unit};
use crate::config::{AppConfig, PreserveMode, TransferMode};
use crate::model::{Action, Classification, Mapping, MappingEntry, ScanFailure};

const JUNK_FOLDERS: [&str; 10] = [
    "downloads",
    "desktop",
    "misc",
    "stuff",
    "old",
    "backup",
    "temp",
    "tmp",
    "new folder",
    "newfolder",
];

/// Decide whether relative source folders are kept below the label folder.
///
/// Smart mode turns preservation on when files sit on average at least two
/// folders deep and at least 55% of those folder names look meaningful.
pub fn resolve_preserve(mode: PreserveMode, scan_root: &Path, files: &[PathBuf]) -> bool {
    match mode {
        PreserveMode::On => true,
        PreserveMode::Off => false,
        PreserveMode::Smart => {
            let folder_lists: Vec<Vec<String>> = files
                .iter()
                .filter_map(|f| f.parent()?.strip_prefix(scan_root).ok().map(folder_names))
                .collect();
            if folder_lists.is_empty() {
                return false;
            }
            let total: usize = folder_lists.iter().map(Vec::len).sum();
            let avg_depth = total as f64 / folder_lists.len() as f64;
            let meaningful = folder_lists
                .iter()
                .flatten()
                .filter(|name| {
                    let lower = name.to_lowercase();
                    !lower.is_empty()
                        && !JUNK_FOLDERS.contains(&lower.as_str())
                        && !lower.chars().all(|c| c.is_ascii_digit())
                })
                .count();
            let density = meaningful as f64 / total.max(1) as f64;
            debug!("Smart preserve: avg depth {:.2}, density {:.2}", avg_depth, density);
            avg_depth >= 2.0 && density >= 0.55
        }
    }
}

fn folder_names(rel: &Path) -> Vec<String> {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Result of planning one pass.
#[derive(Debug, Default)]
pub struct PlanOutcome {
    pub mapping: Mapping,
    /// Destination directory of each intact unit, with its cohesion.
    pub unit_roots: BTreeMap<PathBuf, f64>,
    /// Entries that ran out of collision suffixes.
    pub collisions_exceeded: usize,
}

pub struct Planner<'a> {
    config: &'a AppConfig,
    scan_root: &'a Path,
    dest_root: &'a Path,
    preserve: bool,
}

impl<'a> Planner<'a> {
    pub fn new(config: &'a AppConfig, scan_root: &'a Path, dest_root: &'a Path, preserve: bool) -> Self {
        Self {
            config,
            scan_root,
            dest_root,
            preserve,
        }
    }

    pub fn dest_root(&self) -> &Path {
        self.dest_root
    }

    /// Destination folder for a label: configured, else the capitalized label.
    pub fn folder_for(&self, label: &str) -> PathBuf {
        match self.config.planner.label_folders.get(label) {
            Some(folder) => PathBuf::from(folder),
            None => {
                let mut chars = label.chars();
                match chars.next() {
                    Some(first) => PathBuf::from(first.to_uppercase().chain(chars).collect::<String>()),
                    None => PathBuf::from("Misc"),
                }
            }
        }
    }

    fn transfer_action(&self) -> Action {
        match self.config.planner.transfer {
            TransferMode::Move => Action::Move,
            TransferMode::Copy => Action::Copy,
        }
    }

    pub fn plan(
        &self,
        classifications: &[Classification],
        failures: &[ScanFailure],
        cohesion: &CohesionReport,
        reserved: &BTreeSet<PathBuf>,
        pass_id: u32,
    ) -> PlanOutcome {
        let unit_dirs = self.unit_destinations(cohesion, reserved);

        let mut entries: Vec<MappingEntry> = Vec::with_capacity(classifications.len() + failures.len());
        for failure in failures {
            entries.push(MappingEntry::residual(
                failure.path.clone(),
                String::new(),
                0.0,
                format!("unscannable: {}", failure.reason),
                pass_id,
            ));
        }
        // members of a unit that found no folder stay together: none of them move
        let mut stranded = 0;
        for c in classifications {
            let entry = match cohesion.unit_for(&c.path) {
                Some(unit) => match unit_dirs.get(&unit.dir) {
                    Some(dest) => self.decide(c, Some((unit, dest.as_path())), pass_id),
                    None => {
                        stranded += 1;
                        MappingEntry::residual(
                            c.path.clone(),
                            unit.label.clone(),
                            unit.cohesion,
                            CAP_EXCEEDED_REASON.to_string(),
                            pass_id,
                        )
                    }
                },
                None => self.decide(c, None, pass_id),
            };
            entries.push(entry);
        }

        let collisions_exceeded = stranded
            + resolve_collisions(
                &mut entries,
                reserved,
                &self.config.planner.collision_suffix,
                self.config.planner.collision_cap,
            );

        let unit_roots = cohesion
            .units()
            .filter_map(|u| unit_dirs.get(&u.dir).map(|dest| (dest.clone(), u.cohesion)))
            .collect();

        let mapping = Mapping::from_entries(entries);
        info!(
            "Planned {} entries ({} residual, {} collisions over cap)",
            mapping.len(),
            mapping.residual_count(),
            collisions_exceeded
        );
        PlanOutcome {
            mapping,
            unit_roots,
            collisions_exceeded,
        }
    }

    /// One destination directory per unit; units claiming the same node get a suffix.
    fn unit_destinations(&self, cohesion: &CohesionReport, reserved: &BTreeSet<PathBuf>) -> BTreeMap<PathBuf, PathBuf> {
        let suffix = &self.config.planner.collision_suffix;
        let mut claimed: BTreeSet<PathBuf> = BTreeSet::new();
        let mut destinations = BTreeMap::new();

        for unit in cohesion.units() {
            let name = match unit.dir.file_name() {
                Some(n) => n.to_owned(),
                None => continue,
            };
            let base = self.dest_root.join(self.folder_for(&unit.label)).join(name);
            let is_free = |p: &Path| !claimed.contains(p) && !reserved.iter().any(|r| r.starts_with(p));
            let chosen = if is_free(&base) {
                Some(base.clone())
            } else {
                (1..=self.config.planner.collision_cap)
                    .map(|n| with_dir_suffix(&base, suffix, n))
                    .find(|candidate| is_free(candidate))
            };
            match chosen {
                Some(dest) => {
                    claimed.insert(dest.clone());
                    destinations.insert(unit.dir.clone(), dest);
                }
                None => warn!(
                    "No free destination for unit {} after {} attempts",
                    unit.dir.display(),
                    self.config.planner.collision_cap
                ),
            }
        }
        destinations
    }

    fn decide(&self, c: &Classification, unit: Option<(&Unit, &Path)>, pass_id: u32) -> MappingEntry {
        let thresholds = &self.config.thresholds;
        let mut entry = MappingEntry {
            source_path: c.path.clone(),
            label: c.label.clone(),
            confidence: c.confidence,
            action: Action::Skip,
            target_path: None,
            is_residual: false,
            rule_id: c.rule_id.clone(),
            reason: String::new(),
            pass_id,
        };

        if let Some((unit, dest)) = unit {
            let rel = c.path.strip_prefix(&unit.dir).unwrap_or(&c.path);
            entry.label = unit.label.clone();
            entry.confidence = unit.cohesion;
            entry.action = self.transfer_action();
            entry.target_path = Some(dest.join(rel));
            entry.reason = format!(
                "intact unit '{}' (cohesion {:.2})",
                unit.dir.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
                unit.cohesion
            );
            return entry;
        }

        if let Some(action) = c.rule_action {
            entry.action = action;
            entry.reason = rule_reason(c);
            if action.holds_target() && !c.label.is_empty() {
                entry.target_path = Some(self.target_for(&c.path, &c.label));
            } else {
                entry.action = Action::Skip;
            }
            return entry;
        }

        if c.label.is_empty() {
            entry.is_residual = true;
            entry.reason = "no detector produced a label".to_string();
            return entry;
        }

        let evidence = top_evidence(c);
        if c.confidence >= thresholds.high {
            if self.config.planner.review_labels.contains(&c.label) {
                entry.action = Action::Suggest;
                entry.reason = format!("label '{}' is always reviewed; {}", c.label, evidence);
            } else {
                entry.action = self.transfer_action();
                entry.reason = evidence;
            }
            entry.target_path = Some(self.target_for(&c.path, &c.label));
        } else if c.confidence >= thresholds.low {
            entry.action = Action::Suggest;
            entry.reason = format!("confidence {:.2} needs review; {}", c.confidence, evidence);
            entry.target_path = Some(self.target_for(&c.path, &c.label));
        } else {
            entry.is_residual = true;
            entry.reason = format!(
                "confidence {:.2} below low threshold {:.2}",
                c.confidence, thresholds.low
            );
        }
        entry
    }

    fn target_for(&self, source: &Path, label: &str) -> PathBuf {
        let mut target = self.dest_root.join(self.folder_for(label));
        if self.preserve {
            if let Some(rel) = source.parent().and_then(|p| p.strip_prefix(self.scan_root).ok()) {
                target.push(rel);
            }
        }
        match source.file_name() {
            Some(name) => target.join(name),
            None => target,
        }
    }
}

fn rule_reason(c: &Classification) -> String {
    let id = c.rule_id.as_deref().unwrap_or("?");
    c.signals
        .iter()
        .find(|s| s.detector == "rule" && s.label == c.label)
        .map(|s| s.evidence.clone())
        .unwrap_or_else(|| format!("rule '{}' matched", id))
}

fn top_evidence(c: &Classification) -> String {
    c.signals
        .iter()
        .filter(|s| s.label == c.label)
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .map(|s| format!("{}: {}", s.detector, s.evidence))
        .unwrap_or_default()
}
