use ahash::AHashMap;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::config::CohesionConfig;
use crate::error::{Error, Result};
use crate::model::Classification;

/// A directory whose files move together under one label.
#[derive(Debug, Clone, PartialEq)]
pub struct Unit {
    pub dir: PathBuf,
    pub label: String,
    pub cohesion: f64,
    pub evidence: f64,
    /// Files in the whole subtree.
    pub file_count: usize,
}

#[derive(Debug, Default)]
pub struct CohesionReport {
    /// Outermost intact directories, keyed by source directory.
    units: BTreeMap<PathBuf, Unit>,
    /// File -> outermost intact ancestor.
    members: BTreeMap<PathBuf, PathBuf>,
    pub directories_evaluated: usize,
}

impl CohesionReport {
    pub fn unit_for(&self, file: &Path) -> Option<&Unit> {
        self.members.get(file).and_then(|dir| self.units.get(dir))
    }

    pub fn units(&self) -> impl Iterator<Item = &Unit> {
        self.units.values()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }
}

#[derive(Debug, Default)]
struct DirNode {
    files: Vec<usize>,
    children: BTreeSet<PathBuf>,
    pinned: bool,
}

#[derive(Debug, Clone)]
struct DirEval {
    /// Files this directory is judged on: its own plus those of non-intact children.
    counted: Vec<usize>,
    label: String,
    cohesion: f64,
    evidence: f64,
    intact: bool,
    file_count: usize,
}

/// Bottom-up cohesion analysis of every source directory below `scan_root`.
///
/// `pinned` lists files that must stay put or whose placement is already decided
/// elsewhere (unscannable files, entries resolved by an earlier pass); files pinned by a
/// Skip rule are taken from `classifications`. A directory holding a pinned file
/// anywhere in its subtree is never intact.
pub fn analyze(
    scan_root: &Path,
    classifications: &[Classification],
    pinned: &[PathBuf],
    config: &CohesionConfig,
    high_threshold: f64,
    cancel: &AtomicBool,
) -> Result<CohesionReport> {
    let mut nodes: BTreeMap<PathBuf, DirNode> = BTreeMap::new();

    for (idx, c) in classifications.iter().enumerate() {
        if let Some(parent) = unit_candidate(scan_root, &c.path) {
            register(&mut nodes, scan_root, parent);
            if let Some(node) = nodes.get_mut(parent) {
                node.files.push(idx);
            }
        }
    }

    let pinned_paths = pinned
        .iter()
        .map(PathBuf::as_path)
        .chain(classifications.iter().filter(|c| c.is_pinned()).map(|c| c.path.as_path()));
    for path in pinned_paths {
        for ancestor in path.ancestors().skip(1) {
            if let Some(node) = nodes.get_mut(ancestor) {
                node.pinned = true;
            }
        }
    }

    let mut levels: BTreeMap<usize, Vec<PathBuf>> = BTreeMap::new();
    for dir in nodes.keys() {
        levels.entry(depth_below(scan_root, dir)).or_default().push(dir.clone());
    }

    let mut done: AHashMap<PathBuf, DirEval> = AHashMap::with_capacity(nodes.len());
    for (depth, dirs) in levels.iter().rev() {
        if cancel.load(Ordering::Relaxed) {
            return Err(Error::Cancelled);
        }
        let evaluated: Vec<(PathBuf, DirEval)> = dirs
            .par_iter()
            .filter_map(|dir| {
                let node = nodes.get(dir)?;
                Some((
                    dir.clone(),
                    evaluate_dir(node, &done, classifications, config, high_threshold),
                ))
            })
            .collect();
        debug!("Cohesion level {}: {} directories", depth, evaluated.len());
        done.extend(evaluated);
    }

    let intact: BTreeSet<&Path> = done
        .iter()
        .filter(|(_, e)| e.intact)
        .map(|(dir, _)| dir.as_path())
        .collect();

    let mut report = CohesionReport {
        directories_evaluated: done.len(),
        ..CohesionReport::default()
    };
    for c in classifications {
        let outermost = c
            .path
            .ancestors()
            .skip(1)
            .filter(|a| intact.contains(a))
            .last();
        if let Some(dir) = outermost {
            report.members.insert(c.path.clone(), dir.to_path_buf());
            if !report.units.contains_key(dir) {
                if let Some(eval) = done.get(dir) {
                    report.units.insert(
                        dir.to_path_buf(),
                        Unit {
                            dir: dir.to_path_buf(),
                            label: eval.label.clone(),
                            cohesion: eval.cohesion,
                            evidence: eval.evidence,
                            file_count: eval.file_count,
                        },
                    );
                }
            }
        }
    }
    Ok(report)
}

/// Parent directory of `file` when it lies strictly below the scan root.
fn unit_candidate<'a>(scan_root: &Path, file: &'a Path) -> Option<&'a Path> {
    let parent = file.parent()?;
    (parent != scan_root && parent.starts_with(scan_root)).then_some(parent)
}

fn register(nodes: &mut BTreeMap<PathBuf, DirNode>, scan_root: &Path, dir: &Path) {
    let mut current = dir;
    while current != scan_root && current.starts_with(scan_root) {
        nodes.entry(current.to_path_buf()).or_default();
        match current.parent() {
            Some(parent) => {
                if parent != scan_root && parent.starts_with(scan_root) {
                    nodes
                        .entry(parent.to_path_buf())
                        .or_default()
                        .children
                        .insert(current.to_path_buf());
                }
                current = parent;
            }
            None => break,
        }
    }
}

fn depth_below(scan_root: &Path, dir: &Path) -> usize {
    dir.strip_prefix(scan_root)
        .map(|rel| rel.components().count())
        .unwrap_or(0)
}

fn evaluate_dir(
    node: &DirNode,
    done: &AHashMap<PathBuf, DirEval>,
    classifications: &[Classification],
    config: &CohesionConfig,
    high_threshold: f64,
) -> DirEval {
    let mut counted = node.files.clone();
    let mut file_count = node.files.len();
    let mut intact_children: Vec<&DirEval> = Vec::new();
    for child in &node.children {
        if let Some(eval) = done.get(child) {
            file_count += eval.file_count;
            if eval.intact {
                intact_children.push(eval);
            } else {
                counted.extend_from_slice(&eval.counted);
            }
        }
    }

    let label = majority_label(&counted, classifications);
    let total = counted.len();
    let (agreeing, strong) = counted.iter().fold((0usize, 0usize), |(agree, strong), &idx| {
        let c = &classifications[idx];
        if !label.is_empty() && c.label == label {
            (agree + 1, strong + usize::from(c.confidence >= high_threshold))
        } else {
            (agree, strong)
        }
    });
    let (cohesion, evidence) = if total == 0 {
        (0.0, 0.0)
    } else {
        (agreeing as f64 / total as f64, strong as f64 / total as f64)
    };

    let intact = !node.pinned
        && !label.is_empty()
        && total >= config.min_files
        && cohesion >= config.threshold
        && evidence >= config.min_evidence
        && intact_children.iter().all(|child| child.label == label);

    DirEval {
        counted,
        label,
        cohesion,
        evidence,
        intact,
        file_count,
    }
}

/// Most frequent non-empty label; ties go to the lexicographically smaller label.
fn majority_label(counted: &[usize], classifications: &[Classification]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for &idx in counted {
        let label = classifications[idx].label.as_str();
        if !label.is_empty() {
            *counts.entry(label).or_insert(0) += 1;
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (label, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Action;

    fn class(path: &str, label: &str, confidence: f64) -> Classification {
        Classification {
            path: PathBuf::from(path),
            label: label.to_string(),
            confidence,
            signals: Vec::new(),
            rule_override: false,
            rule_id: None,
            rule_action: None,
        }
    }

    fn run(classifications: &[Classification], pinned: &[PathBuf]) -> CohesionReport {
        analyze(
            Path::new("/scan"),
            classifications,
            pinned,
            &CohesionConfig::default(),
            0.85,
            &AtomicBool::new(false),
        )
        .unwrap()
    }

    #[test]
    fn test_weak_evidence_keeps_directory_split() {
        let classifications = vec![
            class("/scan/project/main.py", "code", 0.9),
            class("/scan/project/notes.txt", "documents", 0.3),
            class("/scan/project/readme.md", "code", 0.3),
        ];
        let report = run(&classifications, &[]);
        assert_eq!(report.unit_count(), 0);
        assert!(report.unit_for(Path::new("/scan/project/main.py")).is_none());
    }

    #[test]
    fn test_enough_evidence_makes_directory_a_unit() {
        let classifications = vec![
            class("/scan/project/main.py", "code", 0.9),
            class("/scan/project/notes.txt", "documents", 0.3),
            class("/scan/project/readme.md", "code", 0.3),
            class("/scan/project/requirements.txt", "code", 0.85),
        ];
        let report = run(&classifications, &[]);
        let unit = report.unit_for(Path::new("/scan/project/notes.txt")).unwrap();
        assert_eq!(unit.dir, PathBuf::from("/scan/project"));
        assert_eq!(unit.label, "code");
        assert!((unit.cohesion - 0.75).abs() < 1e-9);
        assert!((unit.evidence - 0.5).abs() < 1e-9);
        assert_eq!(unit.file_count, 4);
    }

    #[test]
    fn test_outermost_intact_directory_wins() {
        let classifications = vec![
            class("/scan/site/a.py", "code", 0.9),
            class("/scan/site/b.py", "code", 0.9),
            class("/scan/site/lib/c.py", "code", 0.9),
            class("/scan/site/lib/d.py", "code", 0.9),
        ];
        let report = run(&classifications, &[]);
        assert_eq!(report.unit_count(), 1);
        let unit = report.unit_for(Path::new("/scan/site/lib/c.py")).unwrap();
        assert_eq!(unit.dir, PathBuf::from("/scan/site"));
        assert_eq!(unit.file_count, 4);
    }

    #[test]
    fn test_pinned_file_blocks_every_ancestor() {
        let mut classifications = vec![
            class("/scan/site/a.py", "code", 0.9),
            class("/scan/site/b.py", "code", 0.9),
            class("/scan/site/lib/c.py", "code", 0.9),
            class("/scan/site/lib/d.py", "code", 0.9),
            class("/scan/site/lib/vault.kdbx", "credentials", 1.0),
        ];
        classifications[4].rule_action = Some(Action::Skip);
        classifications.sort_by(|a, b| a.path.cmp(&b.path));
        let report = run(&classifications, &[]);
        assert_eq!(report.unit_count(), 0);

        let classifications = vec![
            class("/scan/site/a.py", "code", 0.9),
            class("/scan/site/b.py", "code", 0.9),
        ];
        let report = run(&classifications, &[PathBuf::from("/scan/site/locked.bin")]);
        assert_eq!(report.unit_count(), 0);
    }

    #[test]
    fn test_child_with_other_label_blocks_parent() {
        let classifications = vec![
            class("/scan/mix/a.py", "code", 0.9),
            class("/scan/mix/b.py", "code", 0.9),
            class("/scan/mix/pics/c.png", "images", 0.9),
            class("/scan/mix/pics/d.png", "images", 0.9),
        ];
        let report = run(&classifications, &[]);
        assert_eq!(report.unit_count(), 1);
        assert!(report.unit_for(Path::new("/scan/mix/a.py")).is_none());
        assert_eq!(
            report.unit_for(Path::new("/scan/mix/pics/c.png")).unwrap().label,
            "images"
        );
    }

    #[test]
    fn test_files_at_scan_root_never_form_a_unit() {
        let classifications = vec![
            class("/scan/a.py", "code", 0.9),
            class("/scan/b.py", "code", 0.9),
        ];
        let report = run(&classifications, &[]);
        assert_eq!(report.unit_count(), 0);
    }
}
