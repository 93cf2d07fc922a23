use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::analysis::TreeNode;
use crate::config::PreserveMode;
use crate::error::{Error, Result};
use crate::model::{Mapping, MappingEntry};
use crate::plan::preview::PreviewRow;
use crate::plan::refine::RefineSummary;

pub const SIFT_DIR: &str = ".sift";
pub const TREE_PLAN: &str = "TreePlan.json";
pub const MAPPING: &str = "Mapping.csv";
pub const PREVIEW_COUNTS: &str = "PreviewCounts.csv";
pub const RUN: &str = "Run.json";
pub const REFINE_SUMMARY: &str = "RefineSummary.json";
pub const DATABASE: &str = "sift.db";
pub const RULES: &str = "rules.toml";

/// Parameters of the draft that produced the current artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub scan_root: PathBuf,
    pub dest_root: PathBuf,
    pub preserve_mode: PreserveMode,
    /// Preserve mode after the smart heuristic ran.
    pub preserve: bool,
    pub use_rules: bool,
    pub pass_id: u32,
    pub files_scanned: usize,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct MappingRow {
    source_path: String,
    label: String,
    confidence: String,
    action: String,
    target_path: String,
    is_residual: bool,
    rule_id: String,
    reason: String,
    pass_id: u32,
}

impl From<&MappingEntry> for MappingRow {
    fn from(e: &MappingEntry) -> Self {
        MappingRow {
            source_path: e.source_path.to_string_lossy().into_owned(),
            label: e.label.clone(),
            confidence: format!("{:.4}", e.confidence),
            action: e.action.as_str().to_string(),
            target_path: e
                .target_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default(),
            is_residual: e.is_residual,
            rule_id: e.rule_id.clone().unwrap_or_default(),
            reason: e.reason.clone(),
            pass_id: e.pass_id,
        }
    }
}

impl TryFrom<MappingRow> for MappingEntry {
    type Error = Error;

    fn try_from(row: MappingRow) -> Result<Self> {
        let confidence = row
            .confidence
            .parse::<f64>()
            .map_err(|e| Error::Other(format!("bad confidence '{}': {}", row.confidence, e)))?;
        Ok(MappingEntry {
            source_path: PathBuf::from(row.source_path),
            label: row.label,
            confidence,
            action: row.action.parse()?,
            target_path: (!row.target_path.is_empty()).then(|| PathBuf::from(row.target_path)),
            is_residual: row.is_residual,
            rule_id: (!row.rule_id.is_empty()).then_some(row.rule_id),
            reason: row.reason,
            pass_id: row.pass_id,
        })
    }
}

/// The `<dest_root>/.sift` artifact directory.
#[derive(Debug, Clone)]
pub struct SiftDir {
    dir: PathBuf,
}

impl SiftDir {
    pub fn new(dest_root: &Path) -> Self {
        Self {
            dir: dest_root.join(SIFT_DIR),
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn exists(&self) -> bool {
        self.dir.is_dir()
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.file(DATABASE)
    }

    fn require(&self, name: &str) -> Result<PathBuf> {
        let path = self.file(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(Error::MissingArtifact(path))
        }
    }

    // ── Mapping ──────────────────────────────────────────────────

    pub fn write_mapping(&self, mapping: &Mapping) -> Result<PathBuf> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for entry in mapping.iter() {
            writer.serialize(MappingRow::from(entry))?;
        }
        if mapping.is_empty() {
            writer.write_record([
                "source_path",
                "label",
                "confidence",
                "action",
                "target_path",
                "is_residual",
                "rule_id",
                "reason",
                "pass_id",
            ])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Other(format!("could not flush mapping: {}", e)))?;
        self.write_atomic(MAPPING, &bytes)
    }

    pub fn read_mapping(&self) -> Result<Mapping> {
        let path = self.require(MAPPING)?;
        let mut reader = csv::Reader::from_path(&path)?;
        let mut entries = Vec::new();
        for row in reader.deserialize::<MappingRow>() {
            entries.push(MappingEntry::try_from(row?)?);
        }
        Ok(Mapping::from_entries(entries))
    }

    // ── Tree plan ────────────────────────────────────────────────

    pub fn write_tree_plan(&self, tree: &TreeNode) -> Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(tree)?;
        self.write_atomic(TREE_PLAN, &bytes)
    }

    pub fn read_tree_plan(&self) -> Result<TreeNode> {
        let path = self.require(TREE_PLAN)?;
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    // ── Preview counts ───────────────────────────────────────────

    pub fn write_preview(&self, rows: &[PreviewRow]) -> Result<PathBuf> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(["label", "action", "count"])?;
        for row in rows {
            writer.write_record([row.label.as_str(), row.action.as_str(), row.count.to_string().as_str()])?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| Error::Other(format!("could not flush preview: {}", e)))?;
        self.write_atomic(PREVIEW_COUNTS, &bytes)
    }

    // ── Run info / refinement summary ────────────────────────────

    pub fn write_run(&self, run: &RunInfo) -> Result<PathBuf> {
        self.write_atomic(RUN, &serde_json::to_vec_pretty(run)?)
    }

    pub fn read_run(&self) -> Result<RunInfo> {
        let path = self.require(RUN)?;
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    pub fn write_refine_summary(&self, summary: &RefineSummary) -> Result<PathBuf> {
        self.write_atomic(REFINE_SUMMARY, &serde_json::to_vec_pretty(summary)?)
    }

    pub fn read_refine_summary(&self) -> Result<RefineSummary> {
        let path = self.require(REFINE_SUMMARY)?;
        Ok(serde_json::from_slice(&fs::read(path)?)?)
    }

    /// Write through a temporary sibling and rename into place.
    pub fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        self.ensure()?;
        let path = self.file(name);
        let tmp = self.file(&format!(".{}.tmp", name));
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!("Wrote {}", path.display());
        Ok(path)
    }
}
