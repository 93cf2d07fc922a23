use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::DetectorConfig;
use crate::model::{Classification, DetectorSignal};

/// Combine detector signals into a single classification.
///
/// A label scores the best `confidence * trust` among its signals. The highest
/// score wins; ties go to the label whose scoring signal came from the detector
/// ranked earliest in `priority`, then to the lexicographically smaller label.
pub fn aggregate(path: PathBuf, mut signals: Vec<DetectorSignal>, config: &DetectorConfig) -> Classification {
    sort_signals(&mut signals, config);

    // label -> (score, best priority rank among signals reaching the score)
    let mut scores: BTreeMap<&str, (f64, usize)> = BTreeMap::new();
    for signal in signals.iter().filter(|s| !s.label.is_empty()) {
        let score = weighted(signal, config);
        let rank = priority_rank(&signal.detector, config);
        scores
            .entry(signal.label.as_str())
            .and_modify(|(best, best_rank)| {
                if score > *best {
                    *best = score;
                    *best_rank = rank;
                } else if score == *best {
                    *best_rank = (*best_rank).min(rank);
                }
            })
            .or_insert((score, rank));
    }

    let winner = scores
        .iter()
        .max_by(|(label_a, (score_a, rank_a)), (label_b, (score_b, rank_b))| {
            score_a
                .partial_cmp(score_b)
                .unwrap_or(Ordering::Equal)
                .then_with(|| rank_b.cmp(rank_a))
                .then_with(|| label_b.cmp(label_a))
        })
        .map(|(label, (score, _))| (label.to_string(), *score));

    match winner {
        Some((label, confidence)) => Classification {
            path,
            label,
            confidence,
            signals,
            rule_override: false,
            rule_id: None,
            rule_action: None,
        },
        None => Classification::unlabeled(path, signals),
    }
}

fn weighted(signal: &DetectorSignal, config: &DetectorConfig) -> f64 {
    let trust = config
        .trust
        .get(&signal.detector)
        .copied()
        .unwrap_or(1.0)
        .clamp(0.0, 1.0);
    (signal.confidence * trust).clamp(0.0, 1.0)
}

fn priority_rank(detector: &str, config: &DetectorConfig) -> usize {
    config
        .priority
        .iter()
        .position(|d| d == detector)
        .unwrap_or(config.priority.len())
}

/// Deterministic signal order: detector priority, then label, then evidence.
pub fn sort_signals(signals: &mut [DetectorSignal], config: &DetectorConfig) {
    signals.sort_by(|a, b| {
        priority_rank(&a.detector, config)
            .cmp(&priority_rank(&b.detector, config))
            .then_with(|| a.detector.cmp(&b.detector))
            .then_with(|| a.label.cmp(&b.label))
            .then_with(|| a.evidence.cmp(&b.evidence))
    });
}
