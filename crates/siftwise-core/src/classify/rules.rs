use glob::Pattern;
use regex::Regex;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::model::{Action, FileRecord};

/// A rule as written in `rules.toml`:
///
/// ```toml
/// [[rule]]
/// id = "payroll"
/// glob = "**/ADP/**"
/// label = "finance"
/// priority = 10
/// terminal = true
/// action = "move"
/// ```
#[derive(Debug, Clone, Deserialize)]
struct RuleSpec {
    id: String,
    label: String,
    glob: Option<String>,
    regex: Option<String>,
    extension: Option<String>,
    min_size: Option<u64>,
    max_size: Option<u64>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    terminal: bool,
    action: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: String,
    pub label: String,
    glob: Option<Pattern>,
    regex: Option<Regex>,
    extension: Option<String>,
    min_size: Option<u64>,
    max_size: Option<u64>,
    pub priority: i64,
    pub terminal: bool,
    pub action: Option<Action>,
    pub reason: Option<String>,
}

impl Rule {
    fn compile(spec: RuleSpec) -> Result<Self> {
        let invalid = |what: String| Error::InvalidConfig(format!("rule '{}': {}", spec.id, what));

        let glob = spec
            .glob
            .as_deref()
            .map(Pattern::new)
            .transpose()
            .map_err(|e| invalid(format!("bad glob: {}", e)))?;
        let regex = spec
            .regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| invalid(format!("bad regex: {}", e)))?;
        let action = spec
            .action
            .as_deref()
            .map(str::parse::<Action>)
            .transpose()
            .map_err(|e| invalid(e.to_string()))?;
        let extension = spec
            .extension
            .as_deref()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase());

        if glob.is_none()
            && regex.is_none()
            && extension.is_none()
            && spec.min_size.is_none()
            && spec.max_size.is_none()
        {
            return Err(invalid("at least one matcher is required".to_string()));
        }
        if spec.label.trim().is_empty() {
            return Err(invalid("label must not be empty".to_string()));
        }

        Ok(Self {
            id: spec.id,
            label: spec.label,
            glob,
            regex,
            extension,
            min_size: spec.min_size,
            max_size: spec.max_size,
            priority: spec.priority,
            terminal: spec.terminal,
            action,
            reason: spec.reason,
        })
    }

    /// All configured matchers must agree.
    pub fn matches(&self, record: &FileRecord) -> bool {
        let path_text = record.path.to_string_lossy();
        if let Some(glob) = &self.glob {
            let name = record.file_name();
            if !glob.matches_path(&record.path) && !glob.matches(&name) {
                return false;
            }
        }
        if let Some(regex) = &self.regex {
            if !regex.is_match(&path_text) {
                return false;
            }
        }
        if let Some(ext) = &self.extension {
            if &record.extension != ext {
                return false;
            }
        }
        if self.min_size.map_or(false, |min| record.size < min) {
            return false;
        }
        if self.max_size.map_or(false, |max| record.size > max) {
            return false;
        }
        true
    }

    pub fn evidence(&self) -> String {
        match &self.reason {
            Some(reason) => format!("rule '{}': {}", self.id, reason),
            None => format!("rule '{}' matched", self.id),
        }
    }
}

/// Outcome of running the rule set over one file.
#[derive(Debug, Default, Clone, Copy)]
pub struct RuleVerdict<'a> {
    /// First matching non-terminal rule; contributes a signal.
    pub contributing: Option<&'a Rule>,
    /// First matching terminal rule; decides the classification outright.
    pub terminal: Option<&'a Rule>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Protective rules that keep credentials stores and OS metadata in place.
    pub fn builtin() -> Self {
        let specs = [
            ("builtin-kdbx", "credentials", None, Some("kdbx"), "password database"),
            ("builtin-keychain", "credentials", None, Some("keychain"), "keychain"),
            ("builtin-ds-store", "system", Some(".DS_Store"), None, "OS metadata"),
            ("builtin-thumbs-db", "system", Some("Thumbs.db"), None, "OS metadata"),
            ("builtin-desktop-ini", "system", Some("desktop.ini"), None, "OS metadata"),
        ];
        let rules = specs
            .into_iter()
            .map(|(id, label, name, ext, reason)| Rule {
                id: id.to_string(),
                label: label.to_string(),
                glob: name.and_then(|n| Pattern::new(&Pattern::escape(n)).ok()),
                regex: None,
                extension: ext.map(str::to_string),
                min_size: None,
                max_size: None,
                priority: 1000,
                terminal: true,
                action: Some(Action::Skip),
                reason: Some(reason.to_string()),
            })
            .collect();
        let mut set = Self { rules };
        set.sort();
        set
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: RuleFile = toml::from_str(text)?;
        let rules = file
            .rules
            .into_iter()
            .map(Rule::compile)
            .collect::<Result<Vec<_>>>()?;
        let mut set = Self { rules };
        set.sort();
        Ok(set)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let set = Self::from_toml_str(&text)?;
        info!("Loaded {} rules from {}", set.len(), path.display());
        Ok(set)
    }

    /// Builtins (if enabled) plus the first rules file found among `candidates`.
    pub fn resolve(use_builtin: bool, candidates: &[&Path]) -> Result<Self> {
        let mut set = if use_builtin { Self::builtin() } else { Self::empty() };
        if let Some(path) = candidates.iter().find(|p| p.is_file()) {
            set = set.merge(Self::load(path)?);
        } else {
            debug!("No rules file found");
        }
        Ok(set)
    }

    pub fn merge(mut self, other: RuleSet) -> Self {
        self.rules.extend(other.rules);
        self.sort();
        self
    }

    fn sort(&mut self) {
        self.rules
            .sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn evaluate(&self, record: &FileRecord) -> RuleVerdict<'_> {
        let mut verdict = RuleVerdict::default();
        for rule in &self.rules {
            if !rule.matches(record) {
                continue;
            }
            if rule.terminal {
                verdict.terminal = Some(rule);
                break;
            }
            if verdict.contributing.is_none() {
                verdict.contributing = Some(rule);
            }
        }
        verdict
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::record::extension_of;
    use std::path::PathBuf;

    fn record(path: &str, size: u64) -> FileRecord {
        let path = PathBuf::from(path);
        FileRecord {
            extension: extension_of(&path),
            path,
            size,
            modified: 0,
            head: Vec::new(),
            fingerprint: 0,
            content_hash: None,
        }
    }

    #[test]
    fn test_builtin_rules_pin_credentials_and_metadata() {
        let rules = RuleSet::builtin();
        let verdict = rules.evaluate(&record("/home/u/vault.KDBX", 10));
        let rule = verdict.terminal.unwrap();
        assert_eq!(rule.label, "credentials");
        assert_eq!(rule.action, Some(Action::Skip));

        assert!(rules.evaluate(&record("/home/u/pics/.DS_Store", 10)).terminal.is_some());
        assert!(rules.evaluate(&record("/home/u/notes.txt", 10)).terminal.is_none());
    }

    #[test]
    fn test_toml_rules_order_and_matchers() {
        let text = r#"
            [[rule]]
            id = "b-big-videos"
            label = "videos"
            extension = ".MP4"
            min_size = 1000
            priority = 5

            [[rule]]
            id = "a-payroll"
            label = "finance"
            glob = "**/ADP/**"
            priority = 5
            terminal = true
            action = "move"
        "#;
        let rules = RuleSet::from_toml_str(text).unwrap();
        let ids: Vec<&str> = rules.rules().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a-payroll", "b-big-videos"]);

        let verdict = rules.evaluate(&record("/data/ADP/stub.pdf", 10));
        assert_eq!(verdict.terminal.unwrap().action, Some(Action::Move));

        assert!(rules.evaluate(&record("/data/clip.mp4", 10)).contributing.is_none());
        let verdict = rules.evaluate(&record("/data/clip.mp4", 5000));
        assert_eq!(verdict.contributing.unwrap().id, "b-big-videos");
        assert!(verdict.terminal.is_none());
    }

    #[test]
    fn test_rule_without_matchers_is_rejected() {
        let err = RuleSet::from_toml_str("[[rule]]\nid = \"x\"\nlabel = \"y\"\n").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_bad_regex_is_rejected() {
        let err = RuleSet::from_toml_str("[[rule]]\nid = \"x\"\nlabel = \"y\"\nregex = \"(\"\n")
            .unwrap_err();
        assert!(err.is_config_error());
    }
}
