pub mod aggregate;
pub mod detectors;
pub mod entities;
pub mod rules;
pub mod tokens;

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::DetectorConfig;
use crate::error::{Error, Result};
use crate::model::{Classification, DetectorSignal, FileRecord};
use aggregate::{aggregate, sort_signals};
use detectors::DetectorRegistry;
use rules::RuleSet;

/// Detectors, rules and aggregation for one pass. Shared read-only across workers.
pub struct Classifier {
    registry: DetectorRegistry,
    rules: RuleSet,
    detectors: DetectorConfig,
    rule_confidence: f64,
}

impl Classifier {
    pub fn new(
        registry: DetectorRegistry,
        rules: RuleSet,
        detectors: DetectorConfig,
        rule_confidence: f64,
    ) -> Self {
        Self {
            registry,
            rules,
            detectors,
            rule_confidence,
        }
    }

    pub fn classify(&self, record: &FileRecord) -> Classification {
        let mut signals = self.registry.evaluate(record);
        let verdict = self.rules.evaluate(record);

        if let Some(rule) = verdict.terminal {
            signals.push(rule_signal(&rule.label, 1.0, rule.evidence()));
            sort_signals(&mut signals, &self.detectors);
            return Classification {
                path: record.path.clone(),
                label: rule.label.clone(),
                confidence: 1.0,
                signals,
                rule_override: true,
                rule_id: Some(rule.id.clone()),
                rule_action: rule.action,
            };
        }

        if let Some(rule) = verdict.contributing {
            signals.push(rule_signal(&rule.label, self.rule_confidence, rule.evidence()));
        }

        let mut classification = aggregate(record.path.clone(), signals, &self.detectors);
        if let Some(rule) = verdict.contributing {
            if classification.label == rule.label {
                classification.rule_id = Some(rule.id.clone());
                classification.rule_action = rule.action;
            }
        }
        classification
    }

    /// Classify every record in parallel; output is sorted by path.
    pub fn classify_all(&self, records: &[FileRecord], cancel: &AtomicBool) -> Result<Vec<Classification>> {
        let mut classified: Vec<Classification> = records
            .par_iter()
            .map(|record| {
                if cancel.load(Ordering::Relaxed) {
                    return Err(Error::Cancelled);
                }
                Ok(self.classify(record))
            })
            .collect::<Result<Vec<_>>>()?;
        classified.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(classified)
    }
}

fn rule_signal(label: &str, confidence: f64, evidence: String) -> DetectorSignal {
    DetectorSignal {
        detector: "rule".to_string(),
        label: label.to_string(),
        confidence,
        evidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Action;
    use crate::scanner::record::extension_of;
    use std::path::{Path, PathBuf};

    fn record(path: &str) -> FileRecord {
        let path = PathBuf::from(path);
        FileRecord {
            extension: extension_of(&path),
            path,
            size: 4096,
            modified: 0,
            head: Vec::new(),
            fingerprint: 0,
            content_hash: None,
        }
    }

    fn classifier(rules: RuleSet) -> Classifier {
        Classifier::new(
            DetectorRegistry::standard(Some(Path::new("/r")), 0).unwrap(),
            rules,
            DetectorConfig::default(),
            0.95,
        )
    }

    #[test]
    fn test_terminal_rule_overrides_detectors() {
        let c = classifier(RuleSet::builtin()).classify(&record("/r/passwords.kdbx"));
        assert_eq!(c.label, "credentials");
        assert_eq!(c.confidence, 1.0);
        assert!(c.rule_override);
        assert!(c.is_pinned());
        assert!(c.signals.iter().any(|s| s.detector == "rule"));
    }

    #[test]
    fn test_non_terminal_rule_joins_the_pool() {
        let rules = RuleSet::from_toml_str(
            "[[rule]]\nid = \"py-data\"\nlabel = \"data\"\nextension = \"py\"\naction = \"copy\"\n",
        )
        .unwrap();
        let c = classifier(rules).classify(&record("/r/etl.py"));
        // rule 0.95 beats extension 0.90
        assert_eq!(c.label, "data");
        assert!(!c.rule_override);
        assert_eq!(c.rule_id.as_deref(), Some("py-data"));
        assert_eq!(c.rule_action, Some(Action::Copy));
    }

    #[test]
    fn test_classify_all_is_sorted_and_cancellable() {
        let c = classifier(RuleSet::empty());
        let records = vec![record("/r/b.txt"), record("/r/a.png")];
        let out = c.classify_all(&records, &AtomicBool::new(false)).unwrap();
        assert_eq!(out[0].path, PathBuf::from("/r/a.png"));
        assert_eq!(out[0].label, "images");

        let err = c.classify_all(&records, &AtomicBool::new(true)).unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
