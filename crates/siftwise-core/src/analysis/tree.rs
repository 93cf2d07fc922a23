use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};

use crate::model::Mapping;

/// Destination folder in the drafted structure (`TreePlan.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    /// Relative to the destination root, `/` separated; empty for the root.
    pub path: String,
    pub name: String,
    /// Shared label of every file below, if there is exactly one.
    pub label: Option<String>,
    pub file_count: usize,
    /// Set on intact unit roots only.
    pub cohesion: Option<f64>,
    pub intact: bool,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    pub fn find(&self, path: &str) -> Option<&TreeNode> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(path))
    }

    pub fn folder_count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::folder_count).sum::<usize>()
    }
}

#[derive(Default)]
struct Builder {
    children: BTreeMap<String, Builder>,
    labels: BTreeSet<String>,
    file_count: usize,
    cohesion: Option<f64>,
}

/// Build the destination hierarchy from the planned targets.
///
/// `unit_roots` maps destination directories of intact units to their cohesion.
pub fn build_tree(dest_root: &Path, mapping: &Mapping, unit_roots: &BTreeMap<PathBuf, f64>) -> TreeNode {
    let mut root = Builder::default();

    for entry in mapping.iter() {
        let target = match (&entry.target_path, entry.action.holds_target()) {
            (Some(target), true) => target,
            _ => continue,
        };
        let folders = match target.parent().and_then(|p| p.strip_prefix(dest_root).ok()) {
            Some(rel) => segments(rel),
            None => continue,
        };
        let mut node = &mut root;
        node.file_count += 1;
        node.labels.insert(entry.label.clone());
        for folder in folders {
            node = node.children.entry(folder).or_default();
            node.file_count += 1;
            node.labels.insert(entry.label.clone());
        }
    }

    for (dir, cohesion) in unit_roots {
        if let Ok(rel) = dir.strip_prefix(dest_root) {
            let mut node = Some(&mut root);
            for folder in segments(rel) {
                node = node.and_then(|n| n.children.get_mut(&folder));
            }
            if let Some(n) = node {
                n.cohesion = Some(*cohesion);
            }
        }
    }

    let name = dest_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    finish(name, String::new(), root)
}

fn finish(name: String, path: String, builder: Builder) -> TreeNode {
    let children = builder
        .children
        .into_iter()
        .map(|(child_name, child)| {
            let child_path = if path.is_empty() {
                child_name.clone()
            } else {
                format!("{}/{}", path, child_name)
            };
            finish(child_name, child_path, child)
        })
        .collect();
    let label = if builder.labels.len() == 1 {
        builder.labels.into_iter().next()
    } else {
        None
    };
    TreeNode {
        path,
        name,
        label,
        file_count: builder.file_count,
        intact: builder.cohesion.is_some(),
        cohesion: builder.cohesion,
        children,
    }
}

fn segments(rel: &Path) -> Vec<String> {
    rel.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

/// Indented outline of the tree, one folder per line.
pub fn render_outline(root: &TreeNode) -> String {
    let mut out = String::new();
    render_into(root, 0, &mut out);
    out
}

fn render_into(node: &TreeNode, depth: usize, out: &mut String) {
    let name = if node.name.is_empty() { "." } else { node.name.as_str() };
    out.push_str(&"  ".repeat(depth));
    out.push_str(&format!("- {} ({} files", name, node.file_count));
    if let Some(label) = &node.label {
        out.push_str(&format!(", {}", label));
    }
    if let Some(cohesion) = node.cohesion {
        out.push_str(&format!(", unit cohesion {:.2}", cohesion));
    }
    out.push_str(")\n");
    for child in &node.children {
        render_into(child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, MappingEntry};

    fn entry(src: &str, label: &str, action: Action, target: Option<&str>) -> MappingEntry {
        MappingEntry {
            source_path: PathBuf::from(src),
            label: label.to_string(),
            confidence: 0.9,
            action,
            target_path: target.map(PathBuf::from),
            is_residual: false,
            rule_id: None,
            reason: String::new(),
            pass_id: 1,
        }
    }

    #[test]
    fn test_tree_counts_and_labels() {
        let mapping = Mapping::from_entries(vec![
            entry("/s/a.py", "code", Action::Move, Some("/d/Code/proj/a.py")),
            entry("/s/b.py", "code", Action::Move, Some("/d/Code/proj/sub/b.py")),
            entry("/s/c.png", "images", Action::Suggest, Some("/d/Media/Images/c.png")),
            entry("/s/x.bin", "", Action::Skip, None),
        ]);
        let units = BTreeMap::from([(PathBuf::from("/d/Code/proj"), 0.75)]);
        let tree = build_tree(Path::new("/d"), &mapping, &units);

        assert_eq!(tree.file_count, 3);
        assert!(tree.label.is_none());
        let names: Vec<&str> = tree.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Code", "Media"]);

        let proj = tree.find("Code/proj").unwrap();
        assert!(proj.intact);
        assert_eq!(proj.cohesion, Some(0.75));
        assert_eq!(proj.file_count, 2);
        assert_eq!(proj.label.as_deref(), Some("code"));
        assert!(!tree.find("Code/proj/sub").unwrap().intact);

        let outline = render_outline(&tree);
        assert!(outline.contains("  - Code (2 files, code)"));
    }
}
