use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path};
use tracing::debug;

use super::planner::Planner;
use super::residual::resolved;
use crate::classify::entities::EntityExtractor;
use crate::model::{Classification, DetectorSignal, Mapping, MappingEntry};

pub const BOOST_CAP: f64 = 0.99;
const PREFIX_BOOST: f64 = 0.05;
const ENTITY_BOOST: f64 = 0.05;
const CONTINUITY_BOOST: f64 = 0.03;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Boost {
    pub amount: f64,
    pub reasons: Vec<&'static str>,
}

/// Confidence adjustments a refinement pass derives from the live mapping.
///
/// A candidate gains when it points at the same top-level folder as its previous
/// entry, when its entity or year was already filed under the same label, and
/// when its label is unchanged but more confident. Nothing is gained when both
/// the folder and the entity disagree. The result never exceeds [`BOOST_CAP`].
pub struct HistoryBoost<'a> {
    previous: &'a Mapping,
    extractor: EntityExtractor,
    /// Entity or year key -> labels of resolved files carrying it.
    entity_labels: BTreeMap<String, BTreeSet<String>>,
}

impl<'a> HistoryBoost<'a> {
    pub fn learn(previous: &'a Mapping, extractor: EntityExtractor) -> Self {
        let mut entity_labels: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for entry in resolved(previous).filter(|e| !e.label.is_empty()) {
            for key in extractor.extract(&entry.source_path).keys() {
                entity_labels.entry(key).or_default().insert(entry.label.clone());
            }
        }
        Self {
            previous,
            extractor,
            entity_labels,
        }
    }

    pub fn boost_for(&self, c: &Classification, planner: &Planner) -> Boost {
        let old = match self.previous.get(&c.path) {
            Some(old) => old,
            None => return Boost::default(),
        };
        if c.label.is_empty() || c.rule_override || c.rule_action.is_some() {
            return Boost::default();
        }

        let new_prefix = top_folder(&planner.folder_for(&c.label));
        let old_prefix = previous_prefix(old, planner);
        let prefix_match = new_prefix.is_some() && old_prefix == new_prefix;
        let prefix_changed = old_prefix.is_some() && new_prefix.is_some() && !prefix_match;

        let known: Vec<&BTreeSet<String>> = self
            .extractor
            .extract(&c.path)
            .keys()
            .iter()
            .filter_map(|key| self.entity_labels.get(key))
            .collect();
        let entity_match = known.iter().any(|labels| labels.contains(&c.label));
        let entity_changed = !known.is_empty() && !entity_match;

        let mut boost = Boost::default();
        if prefix_changed && entity_changed {
            return boost;
        }
        if prefix_match {
            boost.amount += PREFIX_BOOST;
            boost.reasons.push("same target folder as before");
        }
        if entity_match {
            boost.amount += ENTITY_BOOST;
            boost.reasons.push("entity already filed under this label");
        }
        if old.label == c.label && c.confidence > old.confidence {
            boost.amount += CONTINUITY_BOOST;
            boost.reasons.push("confidence rose under the same label");
        }
        boost
    }

    /// Raise the confidence of every candidate that agrees with history.
    /// Returns how many were raised.
    pub fn apply(&self, classifications: &mut [Classification], planner: &Planner) -> usize {
        let mut raised = 0;
        for c in classifications.iter_mut() {
            let boost = self.boost_for(c, planner);
            let boosted = (c.confidence + boost.amount).min(BOOST_CAP);
            if boosted <= c.confidence {
                continue;
            }
            c.signals.push(DetectorSignal {
                detector: "history".to_string(),
                label: c.label.clone(),
                confidence: boosted,
                evidence: format!("+{:.2} from earlier passes ({})", boost.amount, boost.reasons.join(", ")),
            });
            c.confidence = boosted;
            raised += 1;
        }
        debug!("History boost raised {} of {} candidates", raised, classifications.len());
        raised
    }
}

fn top_folder(folder: &Path) -> Option<String> {
    folder.components().find_map(|c| match c {
        Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
        _ => None,
    })
}

/// Top-level destination folder of the previous entry: its target when it had
/// one, else the folder its label maps to.
fn previous_prefix(old: &MappingEntry, planner: &Planner) -> Option<String> {
    match &old.target_path {
        Some(target) => target
            .strip_prefix(planner.dest_root())
            .ok()
            .and_then(top_folder),
        None if !old.label.is_empty() => top_folder(&planner.folder_for(&old.label)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, EntityConfig};
    use crate::model::Action;
    use std::path::PathBuf;

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

    fn filed(path: &str, label: &str) -> MappingEntry {
        MappingEntry {
            source_path: PathBuf::from(path),
            label: label.to_string(),
            confidence: 0.9,
            action: Action::Move,
            target_path: Some(PathBuf::from("/d/Finance").join(path.trim_start_matches("/s/"))),
            is_residual: false,
            rule_id: None,
            reason: String::new(),
            pass_id: 1,
        }
    }

    fn history() -> Mapping {
        Mapping::from_entries(vec![
            filed("/s/chase/card_2023.pdf", "finance"),
            MappingEntry::residual("/s/chase/notes.qqq".into(), "finance".into(), 0.4, "low".into(), 1),
            MappingEntry::residual("/s/chase/holiday.qqq".into(), "images".into(), 0.4, "low".into(), 1),
            MappingEntry::residual("/s/loose.qqq".into(), "misc".into(), 0.97, "low".into(), 1),
        ])
    }

    #[test]
    fn test_agreeing_candidate_gains_every_boost() {
        let config = AppConfig::default();
        let planner = Planner::new(&config, Path::new("/s"), Path::new("/d"), false);
        let mapping = history();
        let boost = HistoryBoost::learn(&mapping, EntityExtractor::new(&EntityConfig::default()));

        let mut candidates = vec![class("/s/chase/notes.qqq", "finance", 0.45)];
        assert_eq!(boost.apply(&mut candidates, &planner), 1);
        assert!((candidates[0].confidence - 0.58).abs() < 1e-9);
        assert_eq!(candidates[0].signals[0].detector, "history");
    }

    #[test]
    fn test_folder_and_entity_conflict_gains_nothing() {
        let config = AppConfig::default();
        let planner = Planner::new(&config, Path::new("/s"), Path::new("/d"), false);
        let mapping = history();
        let boost = HistoryBoost::learn(&mapping, EntityExtractor::new(&EntityConfig::default()));

        // was heading for Media, entity Chase only known as finance
        let c = class("/s/chase/holiday.qqq", "documents", 0.6);
        assert_eq!(boost.boost_for(&c, &planner), Boost::default());

        let unknown = class("/s/elsewhere.qqq", "documents", 0.6);
        assert_eq!(boost.boost_for(&unknown, &planner).amount, 0.0);
    }

    #[test]
    fn test_boost_is_capped() {
        let config = AppConfig::default();
        let planner = Planner::new(&config, Path::new("/s"), Path::new("/d"), false);
        let mapping = history();
        let boost = HistoryBoost::learn(&mapping, EntityExtractor::new(&EntityConfig::default()));

        let mut candidates = vec![class("/s/loose.qqq", "misc", 0.98)];
        boost.apply(&mut candidates, &planner);
        assert_eq!(candidates[0].confidence, BOOST_CAP);
    }
}
