pub mod boost;
pub mod collisions;
pub mod planner;
pub mod preview;
pub mod refine;
pub mod residual;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::analysis;
use crate::classify::detectors::{ContextualDetector, Detector, DetectorRegistry};
use crate::classify::rules::RuleSet;
use crate::classify::Classifier;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::model::ScanFailure;
use crate::progress::ProgressReporter;
use crate::scanner::capture_records;
use boost::HistoryBoost;
pub use planner::{resolve_preserve, PlanOutcome, Planner};

/// Everything one detect -> classify -> cohesion -> plan pass needs.
pub struct PassContext<'a> {
    pub config: &'a AppConfig,
    pub scan_root: &'a Path,
    pub dest_root: &'a Path,
    pub preserve: bool,
    pub rules: &'a RuleSet,
    pub contextual: Option<ContextualDetector>,
    pub reserved: &'a BTreeSet<PathBuf>,
    /// Files outside this pass whose placement is already decided. Their
    /// directories cannot become units in this pass.
    pub held: &'a [PathBuf],
    /// Raises candidates that agree with earlier passes.
    pub boost: Option<&'a HistoryBoost<'a>>,
    pub pass_id: u32,
    pub cancel: &'a AtomicBool,
}

#[derive(Debug)]
pub struct PassOutput {
    pub plan: PlanOutcome,
    pub records_scanned: usize,
    pub unscannable: usize,
    pub units: usize,
}

/// Capture, classify and plan `paths`. Cancellation discards the whole pass.
pub fn run_pass(
    ctx: PassContext<'_>,
    paths: &[PathBuf],
    walk_failures: &[ScanFailure],
    reporter: &dyn ProgressReporter,
) -> Result<PassOutput> {
    let PassContext {
        config,
        scan_root,
        dest_root,
        preserve,
        rules,
        contextual,
        reserved,
        held,
        boost,
        pass_id,
        cancel,
    } = ctx;

    let (records, mut failures) = capture_records(paths, config.hashing.full_hash);
    failures.extend(walk_failures.iter().cloned());
    failures.sort_by(|a, b| a.path.cmp(&b.path));
    failures.dedup_by(|a, b| a.path == b.path);
    if cancel.load(Ordering::Relaxed) {
        return Err(Error::Cancelled);
    }

    let mut registry = DetectorRegistry::standard(Some(scan_root), config.detectors.token_depth)
        .map_err(|e| Error::Other(e.to_string()))?;
    if let Some(detector) = contextual.filter(|d| !d.is_empty()) {
        registry = registry.with_detector(Detector::Contextual(detector));
    }
    debug!(
        "Pass {}: {} detectors, {} rules, token depth {}",
        pass_id,
        registry.detectors().len(),
        rules.len(),
        config.detectors.token_depth
    );

    reporter.on_classify_start(records.len());
    let started = Instant::now();
    let classifier = Classifier::new(
        registry,
        rules.clone(),
        config.detectors.clone(),
        config.rules.confidence,
    );
    let mut classifications = classifier.classify_all(&records, cancel)?;
    reporter.on_classify_complete(classifications.len(), started.elapsed().as_secs_f64());

    let planner = Planner::new(config, scan_root, dest_root, preserve);
    if let Some(boost) = boost {
        boost.apply(&mut classifications, &planner);
    }

    let pinned: Vec<PathBuf> = failures
        .iter()
        .map(|f| f.path.clone())
        .chain(held.iter().cloned())
        .collect();
    let cohesion = analysis::analyze(
        scan_root,
        &classifications,
        &pinned,
        &config.cohesion,
        config.thresholds.high,
        cancel,
    )?;
    if cancel.load(Ordering::Relaxed) {
        return Err(Error::Cancelled);
    }

    let plan = planner.plan(&classifications, &failures, &cohesion, reserved, pass_id);
    reporter.on_plan_complete(plan.mapping.len(), plan.mapping.residual_count());
    info!(
        "Pass {}: {} files, {} unscannable, {} intact units",
        pass_id,
        records.len(),
        failures.len(),
        cohesion.unit_count()
    );

    Ok(PassOutput {
        records_scanned: records.len(),
        unscannable: failures.len(),
        units: cohesion.unit_count(),
        plan,
    })
}
