use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::analysis::{build_tree, render_outline, TreeNode};
use crate::classify::entities::{EntityExtractor, EntityFolder};
use crate::classify::rules::RuleSet;
use crate::config::{AppConfig, PreserveMode, TransferMode};
use crate::error::{Error, Result};
use crate::execute::{
    execute_mapping, undo_all, ExecutionReport, Journal, JournalStatus, RetryConfig, UndoReport,
};
use crate::model::{Action, Mapping};
use crate::plan::preview::{action_totals, preview_counts, PreviewRow};
use crate::plan::refine::{refine, RefineRequest, RefineSummary};
use crate::plan::residual::history_record;
use crate::plan::{resolve_preserve, run_pass, PassContext};
use crate::progress::{ProgressReporter, SilentReporter};
use crate::scanner;
use crate::state::artifacts::{RunInfo, SiftDir, REFINE_SUMMARY, RULES};
use crate::storage::{Database, HistoryRecord};

pub struct SiftEngine {
    config: AppConfig,
    reporter: Arc<dyn ProgressReporter>,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Default)]
pub struct DraftOptions {
    /// Overrides `planner.preserve`.
    pub preserve: Option<PreserveMode>,
    /// Skip the user rules file; builtin rules still follow `rules.use_builtin`.
    pub no_rules: bool,
}

#[derive(Debug)]
pub struct DraftResult {
    pub sift_dir: PathBuf,
    pub files_scanned: usize,
    pub unscannable: usize,
    pub units: usize,
    pub entries: usize,
    pub residuals: usize,
    pub preserve: bool,
    pub rules_loaded: usize,
    pub preview: Vec<PreviewRow>,
}

/// What `review_structure` could gather; missing pieces become warnings.
#[derive(Debug, Default)]
pub struct Review {
    pub outline: Option<String>,
    pub preview: Vec<PreviewRow>,
    pub totals: BTreeMap<Action, usize>,
    pub residuals: usize,
    pub run: Option<RunInfo>,
    pub refine: Option<RefineSummary>,
    /// Entities frequent enough among the planned files to deserve a folder.
    pub entity_folders: Vec<EntityFolder>,
    /// Journal sequences per current status; empty before the first execution.
    pub journal: BTreeMap<JournalStatus, usize>,
    pub warnings: Vec<String>,
}

impl SiftEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            reporter: Arc::new(SilentReporter),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Shared token; setting it stops analysis (the pass is discarded) or
    /// stops dispatching new file operations.
    pub fn cancel_token(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Scan `root`, classify, plan into `dest_root` and write the `.sift` artifacts.
    ///
    /// The source tree is never touched. Returns
    /// [`Error::PlanCollision`] after writing the artifacts when some targets
    /// could not be made unique.
    pub fn draft_structure(&self, root: &Path, dest_root: &Path, options: &DraftOptions) -> Result<DraftResult> {
        self.config.validate()?;
        let scan_root = match fs::canonicalize(root) {
            Ok(path) if path.is_dir() => path,
            Ok(path) => {
                return Err(Error::InvalidConfig(format!(
                    "scan root {} is not a directory",
                    path.display()
                )))
            }
            Err(e) => {
                return Err(Error::InvalidConfig(format!(
                    "scan root {}: {}",
                    root.display(),
                    e
                )))
            }
        };
        // a destination that does not exist yet cannot contain the scan root
        if let Ok(existing) = fs::canonicalize(dest_root) {
            if scan_root.starts_with(&existing) {
                return Err(Error::InvalidConfig(format!(
                    "destination root {} must not contain the scan root",
                    existing.display()
                )));
            }
        }
        fs::create_dir_all(dest_root)?;
        let dest_root = fs::canonicalize(dest_root)?;
        let sift = SiftDir::new(&dest_root);

        info!("Scanning {}...", scan_root.display());
        self.reporter.on_scan_start();
        let scan_start = Instant::now();
        let walk = scanner::collect_files(&scan_root, &self.config.ignore_patterns, &[dest_root.clone()])?;
        self.reporter.on_scan_complete(
            walk.files.len(),
            walk.failures.len(),
            scan_start.elapsed().as_secs_f64(),
        );

        let preserve_mode = options.preserve.unwrap_or(self.config.planner.preserve);
        let preserve = resolve_preserve(preserve_mode, &scan_root, &walk.files);
        let rules = self.load_rules(&dest_root, !options.no_rules)?;
        debug!("Preserve mode {:?} resolved to {}", preserve_mode, preserve);

        let reserved = BTreeSet::new();
        let ctx = PassContext {
            config: &self.config,
            scan_root: &scan_root,
            dest_root: &dest_root,
            preserve,
            rules: &rules,
            contextual: None,
            reserved: &reserved,
            held: &[],
            boost: None,
            pass_id: 1,
            cancel: &self.cancel,
        };
        let output = run_pass(ctx, &walk.files, &walk.failures, self.reporter.as_ref())?;
        let mapping = &output.plan.mapping;

        let tree = build_tree(&dest_root, mapping, &output.plan.unit_roots);
        let preview = preview_counts(mapping);
        sift.write_mapping(mapping)?;
        sift.write_tree_plan(&tree)?;
        sift.write_preview(&preview)?;
        sift.write_run(&RunInfo {
            scan_root: scan_root.clone(),
            dest_root: dest_root.clone(),
            preserve_mode,
            preserve,
            use_rules: !options.no_rules,
            pass_id: 1,
            files_scanned: output.records_scanned,
            created_at: chrono::Utc::now().to_rfc3339(),
        })?;
        self.write_history(&sift, mapping.iter().map(|e| history_record(e, true)).collect())?;

        info!(
            "Draft written to {}: {} entries, {} residual",
            sift.path().display(),
            mapping.len(),
            mapping.residual_count()
        );
        if output.plan.collisions_exceeded > 0 {
            return Err(Error::PlanCollision {
                count: output.plan.collisions_exceeded,
            });
        }

        Ok(DraftResult {
            sift_dir: sift.path().to_path_buf(),
            files_scanned: output.records_scanned,
            unscannable: output.unscannable,
            units: output.units,
            entries: mapping.len(),
            residuals: mapping.residual_count(),
            preserve,
            rules_loaded: rules.len(),
            preview,
        })
    }

    /// Gather the artifacts for display. Never fails: whatever cannot be read
    /// is reported as a warning.
    pub fn review_structure(&self, dest_root: &Path) -> Review {
        let sift = SiftDir::new(dest_root);
        let mut review = Review::default();
        if !sift.exists() {
            review
                .warnings
                .push(format!("no plan found in {}; run draft-structure first", sift.path().display()));
            return review;
        }

        match sift.read_tree_plan() {
            Ok(tree) => review.outline = Some(render_outline(&tree)),
            Err(e) => review.warnings.push(format!("tree plan unavailable: {}", e)),
        }
        match sift.read_mapping() {
            Ok(mapping) => {
                review.preview = preview_counts(&mapping);
                review.totals = action_totals(&mapping);
                review.residuals = mapping.residual_count();
                review.entity_folders = EntityExtractor::new(&self.config.entities).suggest_folders(
                    mapping.iter().map(|e| e.source_path.as_path()),
                    self.config.entities.min_folder_files,
                );
                let untargeted = mapping
                    .iter()
                    .filter(|e| e.action.holds_target() && e.target_path.is_none())
                    .count();
                if untargeted > 0 {
                    review
                        .warnings
                        .push(format!("{} entries have an action but no target path", untargeted));
                }
            }
            Err(e) => review.warnings.push(format!("mapping unavailable: {}", e)),
        }
        match sift.read_run() {
            Ok(run) => review.run = Some(run),
            Err(e) => review.warnings.push(format!("run info unavailable: {}", e)),
        }
        if sift.file(REFINE_SUMMARY).is_file() {
            match sift.read_refine_summary() {
                Ok(summary) => review.refine = Some(summary),
                Err(e) => review.warnings.push(format!("refinement summary unreadable: {}", e)),
            }
        }
        if sift.database_path().is_file() {
            match Journal::open(&sift.database_path()).and_then(|j| j.status_counts()) {
                Ok(counts) => review.journal = counts,
                Err(e) => review.warnings.push(format!("journal unreadable: {}", e)),
            }
        }
        review
    }

    /// Apply the Move/Copy entries of the current mapping through the journal.
    pub fn execute(&self, dest_root: &Path, what_if: bool) -> Result<ExecutionReport> {
        self.config.validate()?;
        let sift = SiftDir::new(dest_root);
        let mut mapping = sift.read_mapping()?;
        let journal = Journal::open(&sift.database_path())?;
        let retry = RetryConfig::from(&self.config.execution);

        let report = execute_mapping(
            &mut mapping,
            &journal,
            &retry,
            what_if,
            &self.cancel,
            self.reporter.as_ref(),
        )?;
        if !what_if && !report.failed.is_empty() {
            sift.write_mapping(&mapping)?;
            sift.write_preview(&preview_counts(&mapping))?;
            warn!("{} operations failed and were returned to the residual set", report.failed.len());
        }
        Ok(report)
    }

    /// Re-run classification over the residual set until it stops shrinking.
    pub fn refine_residuals(&self, dest_root: &Path, max_passes: Option<u32>) -> Result<RefineSummary> {
        self.config.validate()?;
        let sift = SiftDir::new(dest_root);
        let mut run = sift.read_run()?;
        let mut mapping = sift.read_mapping()?;
        let rules = self.load_rules(&run.dest_root, run.use_rules)?;

        let request = RefineRequest {
            base: &self.config,
            scan_root: &run.scan_root,
            dest_root: &run.dest_root,
            preserve: run.preserve,
            rules: &rules,
            max_passes: max_passes.unwrap_or(self.config.refinement.max_passes),
            cancel: &self.cancel,
        };
        let (summary, history) = refine(&request, &mut mapping, self.reporter.as_ref())?;

        if !summary.passes.is_empty() {
            let unit_roots = match sift.read_tree_plan() {
                Ok(tree) => unit_roots_of(&tree, &run.dest_root),
                Err(e) => {
                    warn!("Rebuilding tree plan without unit information: {}", e);
                    BTreeMap::new()
                }
            };
            sift.write_mapping(&mapping)?;
            sift.write_tree_plan(&build_tree(&run.dest_root, &mapping, &unit_roots))?;
            sift.write_preview(&preview_counts(&mapping))?;
            run.pass_id = mapping.max_pass_id();
            sift.write_run(&run)?;
        }
        sift.write_refine_summary(&summary)?;
        self.write_history(&sift, history)?;
        Ok(summary)
    }

    /// Turn Suggest entries (optionally only those of `label`) into the
    /// configured transfer action. Returns how many were promoted.
    pub fn promote_suggested(&self, dest_root: &Path, label: Option<&str>) -> Result<usize> {
        let sift = SiftDir::new(dest_root);
        let mapping = sift.read_mapping()?;
        let action = match self.config.planner.transfer {
            TransferMode::Move => Action::Move,
            TransferMode::Copy => Action::Copy,
        };

        let mut promoted = 0usize;
        let mut updated = Mapping::new();
        for entry in mapping.iter() {
            let mut entry = entry.clone();
            let selected = label.map_or(true, |l| entry.label == l);
            if entry.action == Action::Suggest && selected && entry.target_path.is_some() {
                entry.action = action;
                entry.is_residual = false;
                entry.reason = format!("{} (promoted)", entry.reason);
                promoted += 1;
            }
            updated.replace(entry);
        }

        if promoted > 0 {
            sift.write_mapping(&updated)?;
            sift.write_preview(&preview_counts(&updated))?;
        }
        info!("Promoted {} suggested entries", promoted);
        Ok(promoted)
    }

    /// Reverse every applied operation recorded in the journal.
    pub fn undo(&self, dest_root: &Path) -> Result<UndoReport> {
        let sift = SiftDir::new(dest_root);
        let db_path = sift.database_path();
        if !db_path.is_file() {
            return Err(Error::MissingArtifact(db_path));
        }
        let journal = Journal::open(&db_path)?;
        undo_all(
            &journal,
            &RetryConfig::from(&self.config.execution),
            &self.cancel,
            self.reporter.as_ref(),
        )
    }

    fn load_rules(&self, dest_root: &Path, use_file: bool) -> Result<RuleSet> {
        if !use_file {
            return RuleSet::resolve(self.config.rules.use_builtin, &[]);
        }
        let sift_rules = SiftDir::new(dest_root).file(RULES);
        let root_rules = dest_root.join(RULES);
        let mut candidates: Vec<&Path> = Vec::new();
        if let Some(path) = &self.config.rules.path {
            candidates.push(path.as_path());
        }
        candidates.push(&sift_rules);
        candidates.push(&root_rules);
        RuleSet::resolve(self.config.rules.use_builtin, &candidates)
    }

    fn write_history(&self, sift: &SiftDir, records: Vec<HistoryRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let db = Database::open(&sift.database_path())?;
        let written = db.insert_history_records(&records)?;
        debug!("Recorded {} classification history rows", written);
        Ok(())
    }
}

/// Intact unit roots recorded in a tree plan, as absolute destination paths.
fn unit_roots_of(tree: &TreeNode, dest_root: &Path) -> BTreeMap<PathBuf, f64> {
    let mut roots = BTreeMap::new();
    let mut stack = vec![tree];
    while let Some(node) = stack.pop() {
        if let (true, Some(cohesion)) = (node.intact, node.cohesion) {
            roots.insert(dest_root.join(&node.path), cohesion);
        }
        stack.extend(node.children.iter());
    }
    roots
}
