use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use super::boost::HistoryBoost;
use super::residual::{merge_pass, reserved_targets, resolved, ResidualSet};
use super::{run_pass, PassContext};
use crate::classify::detectors::ContextualDetector;
use crate::classify::entities::EntityExtractor;
use crate::classify::rules::RuleSet;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::model::Mapping;
use crate::progress::ProgressReporter;
use crate::storage::HistoryRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// A pass did not reduce the residual count.
    FixedPoint,
    /// Nothing left to refine.
    Exhausted,
    MaxPasses,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassSummary {
    pub pass_id: u32,
    pub residual_before: usize,
    pub residual_after: usize,
    pub replaced: usize,
    pub newly_resolved: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineSummary {
    pub initial_residuals: usize,
    pub final_residuals: usize,
    pub stop_reason: StopReason,
    pub passes: Vec<PassSummary>,
    pub finished_at: String,
}

pub struct RefineRequest<'a> {
    pub base: &'a AppConfig,
    pub scan_root: &'a Path,
    pub dest_root: &'a Path,
    pub preserve: bool,
    pub rules: &'a RuleSet,
    pub max_passes: u32,
    pub cancel: &'a AtomicBool,
}

/// Configuration for the `step`-th refinement pass: detectors look further up
/// the path and units need less evidence.
pub fn tightened_config(base: &AppConfig, step: u32) -> AppConfig {
    let mut config = base.clone();
    let step = step as usize;
    config.detectors.token_depth = base.detectors.token_depth + step * base.refinement.token_depth_step;
    config.cohesion.min_evidence =
        (base.cohesion.min_evidence - step as f64 * base.refinement.evidence_step).max(0.0);
    config
}

/// Re-run classification over the residual set until it stops shrinking.
///
/// Returns the summary and one history record per candidate decision.
pub fn refine(
    request: &RefineRequest<'_>,
    mapping: &mut Mapping,
    reporter: &dyn ProgressReporter,
) -> Result<(RefineSummary, Vec<HistoryRecord>)> {
    let initial_residuals = mapping.residual_count();
    let base_pass = mapping.max_pass_id();
    let mut passes = Vec::new();
    let mut history = Vec::new();
    let mut step = 0u32;

    let stop_reason = loop {
        let residuals = ResidualSet::from_mapping(mapping);
        if residuals.is_empty() {
            break StopReason::Exhausted;
        }
        if step >= request.max_passes {
            break StopReason::MaxPasses;
        }
        if request.cancel.load(Ordering::Relaxed) {
            break StopReason::Cancelled;
        }
        step += 1;
        let pass_id = base_pass + step;

        let config = tightened_config(request.base, step);
        let contextual = ContextualDetector::learn(
            resolved(mapping).map(|e| (e.source_path.as_path(), e.label.as_str(), e.confidence)),
        );
        let reserved = reserved_targets(mapping);
        let held: Vec<PathBuf> = resolved(mapping).map(|e| e.source_path.clone()).collect();
        let boost = config
            .refinement
            .history_boost
            .then(|| HistoryBoost::learn(mapping, EntityExtractor::new(&config.entities)));

        let ctx = PassContext {
            config: &config,
            scan_root: request.scan_root,
            dest_root: request.dest_root,
            preserve: request.preserve,
            rules: request.rules,
            contextual: Some(contextual),
            reserved: &reserved,
            held: &held,
            boost: boost.as_ref(),
            pass_id,
            cancel: request.cancel,
        };
        let output = match run_pass(ctx, residuals.paths(), &[], reporter) {
            Ok(output) => output,
            Err(Error::Cancelled) => {
                warn!("Refinement pass {} cancelled; discarding it", pass_id);
                break StopReason::Cancelled;
            }
            Err(e) => return Err(e),
        };
        if request.cancel.load(Ordering::Relaxed) {
            break StopReason::Cancelled;
        }

        let stats = merge_pass(mapping, output.plan.mapping, &mut history);
        let residual_after = mapping.residual_count();
        reporter.on_refine_pass(pass_id, residuals.len(), residual_after);
        info!(
            "Refinement pass {}: {} -> {} residuals ({} replaced)",
            pass_id,
            residuals.len(),
            residual_after,
            stats.replaced
        );
        passes.push(PassSummary {
            pass_id,
            residual_before: residuals.len(),
            residual_after,
            replaced: stats.replaced,
            newly_resolved: stats.newly_resolved,
        });

        if residual_after >= residuals.len() {
            break StopReason::FixedPoint;
        }
    };

    let summary = RefineSummary {
        initial_residuals,
        final_residuals: mapping.residual_count(),
        stop_reason,
        passes,
        finished_at: chrono::Utc::now().to_rfc3339(),
    };
    info!(
        "Refinement stopped ({:?}): {} -> {} residuals",
        summary.stop_reason, summary.initial_residuals, summary.final_residuals
    );
    Ok((summary, history))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tightened_config_steps() {
        let base = AppConfig::default();
        let second = tightened_config(&base, 2);
        assert_eq!(second.detectors.token_depth, 2);
        assert!((second.cohesion.min_evidence - 0.3).abs() < 1e-9);

        let far = tightened_config(&base, 50);
        assert_eq!(far.cohesion.min_evidence, 0.0);
        assert_eq!(base.detectors.token_depth, 0);
    }
}
