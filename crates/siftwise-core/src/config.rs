use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub ignore_patterns: Vec<String>,
    pub thresholds: Thresholds,
    pub cohesion: CohesionConfig,
    pub detectors: DetectorConfig,
    pub rules: RulesConfig,
    pub planner: PlannerConfig,
    pub refinement: RefinementConfig,
    pub entities: EntityConfig,
    pub execution: ExecutionConfig,
    pub hashing: HashingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Thresholds {
    /// At or above: the file is moved without review.
    pub high: f64,
    /// Below: the file is skipped and becomes residual.
    pub low: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CohesionConfig {
    pub threshold: f64,
    /// Share of a directory's files that must agree with the majority at high confidence.
    pub min_evidence: f64,
    pub min_files: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Per-detector trust factor applied to signal confidence.
    pub trust: BTreeMap<String, f64>,
    /// Tie-break order, first wins.
    pub priority: Vec<String>,
    /// How many parent directory names the keyword detector tokenizes.
    pub token_depth: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RulesConfig {
    pub use_builtin: bool,
    pub path: Option<PathBuf>,
    /// Confidence of the signal a non-terminal rule contributes.
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    Move,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreserveMode {
    Off,
    On,
    Smart,
}

impl std::str::FromStr for PreserveMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(PreserveMode::Off),
            "on" => Ok(PreserveMode::On),
            "smart" => Ok(PreserveMode::Smart),
            other => Err(Error::InvalidConfig(format!(
                "unknown preserve mode '{}' (expected off, on or smart)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub transfer: TransferMode,
    pub preserve: PreserveMode,
    pub collision_cap: u32,
    /// Inserted before the extension of a colliding target; `{n}` is the attempt number.
    pub collision_suffix: String,
    pub label_folders: BTreeMap<String, String>,
    /// Labels that are only ever suggested, however confident.
    pub review_labels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefinementConfig {
    pub max_passes: u32,
    pub token_depth_step: usize,
    pub evidence_step: f64,
    /// Raise a candidate's confidence when it agrees with earlier passes.
    pub history_boost: bool,
}

/// Names recognised in paths on top of the built-in dictionaries.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EntityConfig {
    pub organizations: Vec<String>,
    pub people: Vec<String>,
    pub places: Vec<String>,
    /// An entity seen in at least this many files is suggested as a folder.
    pub min_folder_files: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HashingConfig {
    /// Also compute a full content hash for every scanned file.
    pub full_hash: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: vec![
                "**/.git/**".to_string(),
                "**/.sift/**".to_string(),
            ],
            thresholds: Thresholds::default(),
            cohesion: CohesionConfig::default(),
            detectors: DetectorConfig::default(),
            rules: RulesConfig::default(),
            planner: PlannerConfig::default(),
            refinement: RefinementConfig::default(),
            entities: EntityConfig::default(),
            execution: ExecutionConfig::default(),
            hashing: HashingConfig::default(),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: 0.85,
            low: 0.5,
        }
    }
}

impl Default for CohesionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.6,
            min_evidence: 0.5,
            min_files: 2,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let trust = [
            ("rule", 1.0),
            ("signature", 1.0),
            ("extension", 1.0),
            ("keyword", 0.95),
            ("contextual", 0.9),
            ("date_pattern", 0.9),
            ("size", 1.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let priority = [
            "rule",
            "signature",
            "extension",
            "keyword",
            "contextual",
            "date_pattern",
            "size",
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Self {
            trust,
            priority,
            token_depth: 0,
        }
    }
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            use_builtin: true,
            path: None,
            confidence: 0.95,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        let label_folders = [
            ("documents", "Documents"),
            ("spreadsheets", "Documents/Spreadsheets"),
            ("presentations", "Documents/Presentations"),
            ("reports", "Documents/Reports"),
            ("contracts", "Documents/Contracts"),
            ("resumes", "Documents/Resumes"),
            ("images", "Media/Images"),
            ("videos", "Media/Videos"),
            ("audio", "Media/Audio"),
            ("data", "Data"),
            ("archives", "Archives"),
            ("code", "Code"),
            ("configs", "Code/Configs"),
            ("executables", "Installers"),
            ("logs", "Logs"),
            ("finance", "Finance"),
            ("large_files", "LargeFiles"),
            ("empty_files", "EmptyFiles"),
            ("dated_files", "DatedFiles"),
            ("misc", "Misc"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        Self {
            transfer: TransferMode::Move,
            preserve: PreserveMode::Smart,
            collision_cap: 100,
            collision_suffix: " ({n})".to_string(),
            label_folders,
            review_labels: vec!["empty_files".to_string(), "large_files".to_string()],
        }
    }
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_passes: 3,
            token_depth_step: 1,
            evidence_step: 0.1,
            history_boost: true,
        }
    }
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            organizations: Vec::new(),
            people: Vec::new(),
            places: Vec::new(),
            min_folder_files: 3,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

impl Default for HashingConfig {
    fn default() -> Self {
        Self { full_hash: false }
    }
}

/// Load `Sift.toml` (or `path` when given) overlaid with `SIFT__*` environment variables.
pub fn load_configuration(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file_source = match path {
        Some(p) => ConfigFile::from(p).required(true),
        None => ConfigFile::with_name("Sift").required(false),
    };
    let builder = Config::builder()
        .add_source(file_source)
        .add_source(Environment::with_prefix("SIFT").separator("__"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), Error> {
        let t = &self.thresholds;
        if !in_unit_range(t.high) || !in_unit_range(t.low) {
            return Err(Error::InvalidConfig(format!(
                "thresholds must lie in [0, 1] (high={}, low={})",
                t.high, t.low
            )));
        }
        if t.high <= t.low {
            return Err(Error::InvalidConfig(format!(
                "high threshold {} must be greater than low threshold {}",
                t.high, t.low
            )));
        }
        if !in_unit_range(self.cohesion.threshold) || !in_unit_range(self.cohesion.min_evidence) {
            return Err(Error::InvalidConfig(
                "cohesion threshold and min_evidence must lie in [0, 1]".to_string(),
            ));
        }
        if self.cohesion.min_files == 0 {
            return Err(Error::InvalidConfig(
                "cohesion.min_files must be at least 1".to_string(),
            ));
        }
        for (detector, trust) in &self.detectors.trust {
            if !in_unit_range(*trust) {
                return Err(Error::InvalidConfig(format!(
                    "trust for detector '{}' must lie in [0, 1], got {}",
                    detector, trust
                )));
            }
        }
        if !in_unit_range(self.rules.confidence) {
            return Err(Error::InvalidConfig(
                "rules.confidence must lie in [0, 1]".to_string(),
            ));
        }
        if !self.planner.collision_suffix.contains("{n}") {
            return Err(Error::InvalidConfig(
                "planner.collision_suffix must contain the '{n}' placeholder".to_string(),
            ));
        }
        if self.planner.collision_suffix.contains('/') || self.planner.collision_suffix.contains('\\') {
            return Err(Error::InvalidConfig(
                "planner.collision_suffix must not contain path separators".to_string(),
            ));
        }
        if self.refinement.evidence_step < 0.0 {
            return Err(Error::InvalidConfig(
                "refinement.evidence_step must not be negative".to_string(),
            ));
        }
        if self.entities.min_folder_files == 0 {
            return Err(Error::InvalidConfig(
                "entities.min_folder_files must be at least 1".to_string(),
            ));
        }
        for pattern in &self.ignore_patterns {
            if let Err(e) = glob::Pattern::new(pattern) {
                return Err(Error::InvalidConfig(format!(
                    "invalid ignore pattern '{}': {}",
                    pattern, e
                )));
            }
        }
        Ok(())
    }

    /// Trust factor for a detector id; unknown detectors are fully trusted.
    pub fn trust_for(&self, detector: &str) -> f64 {
        self.detectors.trust.get(detector).copied().unwrap_or(1.0)
    }
}

fn in_unit_range(v: f64) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut config = AppConfig::default();
        config.thresholds.high = 0.4;
        config.thresholds.low = 0.6;
        let err = config.validate().unwrap_err();
        assert!(err.is_config_error());
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_suffix_requires_placeholder() {
        let mut config = AppConfig::default();
        config.planner.collision_suffix = "-dup".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_ignore_pattern_rejected() {
        let mut config = AppConfig::default();
        config.ignore_patterns.push("[".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_preserve_mode_parse() {
        assert_eq!("SMART".parse::<PreserveMode>().unwrap(), PreserveMode::Smart);
        assert!("sometimes".parse::<PreserveMode>().is_err());
    }

    #[test]
    fn test_load_configuration_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[thresholds]\nhigh = 0.9\nlow = 0.4\n\n[planner]\ntransfer = \"copy\"\n",
        )
        .unwrap();
        let config = load_configuration(Some(&path)).unwrap();
        assert_eq!(config.thresholds.high, 0.9);
        assert_eq!(config.thresholds.low, 0.4);
        assert_eq!(config.planner.transfer, TransferMode::Copy);
        // untouched sections keep their defaults
        assert_eq!(config.cohesion.min_files, 2);
    }
}
