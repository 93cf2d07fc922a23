use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

use super::tokens::{token_matches, tokenize};
use crate::model::{DetectorSignal, FileRecord};

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("record {} has no file name", .0.display())]
    MissingFileName(PathBuf),

    #[error("invalid detector pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type DetectorResult = Result<Vec<DetectorSignal>, DetectorError>;

fn signal(detector: &str, label: &str, confidence: f64, evidence: impl Into<String>) -> DetectorSignal {
    DetectorSignal {
        detector: detector.to_string(),
        label: label.to_string(),
        confidence: confidence.clamp(0.0, 1.0),
        evidence: evidence.into(),
    }
}

// ── Extension ────────────────────────────────────────────────

const EXTENSION_TABLE: &[(&str, f64, &[&str])] = &[
    ("documents", 0.85, &["pdf", "doc", "docx", "txt", "rtf", "odt", "tex", "md", "rst"]),
    ("spreadsheets", 0.85, &["xlsx", "xls", "csv", "tsv", "ods"]),
    ("presentations", 0.85, &["ppt", "pptx", "key", "odp"]),
    (
        "code",
        0.90,
        &[
            "py", "js", "html", "css", "java", "cpp", "c", "h", "jsx", "ts", "tsx", "go", "rs",
            "rb", "php", "swift", "kt", "scala", "r", "m", "sh", "bat", "ps1", "yaml", "yml",
            "toml",
        ],
    ),
    ("data", 0.85, &["json", "xml", "db", "sql", "parquet", "feather", "hdf", "h5", "mat", "npy", "pkl"]),
    ("images", 0.90, &["jpg", "jpeg", "png", "gif", "bmp", "svg", "ico", "tiff", "webp", "raw", "psd", "ai"]),
    ("videos", 0.90, &["mp4", "avi", "mov", "wmv", "flv", "mkv", "webm", "m4v", "mpg", "mpeg"]),
    ("audio", 0.90, &["mp3", "wav", "flac", "aac", "ogg", "wma", "m4a", "opus", "aiff"]),
    ("archives", 0.95, &["zip", "tar", "gz", "rar", "7z", "bz2", "xz", "tar.gz", "tar.bz2", "tar.xz"]),
    ("executables", 0.85, &["exe", "msi", "app", "deb", "rpm", "dmg", "pkg", "appimage", "snap"]),
    ("configs", 0.75, &["ini", "cfg", "conf", "config", "env", "properties", "plist"]),
    ("logs", 0.70, &["log", "out", "err"]),
];

#[derive(Debug, Clone, Default)]
pub struct ExtensionDetector;

impl ExtensionDetector {
    fn evaluate(&self, record: &FileRecord) -> DetectorResult {
        if record.extension.is_empty() {
            return Ok(Vec::new());
        }
        for (label, confidence, extensions) in EXTENSION_TABLE {
            if extensions.contains(&record.extension.as_str()) {
                return Ok(vec![signal(
                    "extension",
                    label,
                    *confidence,
                    format!("matched .{} extension", record.extension),
                )]);
            }
        }
        Ok(vec![signal(
            "extension",
            "misc",
            0.25,
            format!("unknown extension .{}", record.extension),
        )])
    }
}

// ── Signature ────────────────────────────────────────────────

const SIGNATURES: &[(&[u8], &str, &str)] = &[
    (b"%PDF", "documents", "PDF"),
    (&[0x89, b'P', b'N', b'G'], "images", "PNG"),
    (&[0xFF, 0xD8, 0xFF], "images", "JPEG"),
    (b"GIF8", "images", "GIF"),
    (&[b'7', b'z', 0xBC, 0xAF, 0x27, 0x1C], "archives", "7z"),
    (b"PK\x03\x04", "archives", "ZIP"),
    (&[0x1F, 0x8B], "archives", "GZIP"),
    (&[0x7F, b'E', b'L', b'F'], "executables", "ELF"),
    (b"MZ", "executables", "PE"),
    (b"ID3", "audio", "MP3"),
    (b"OggS", "audio", "Ogg"),
    (b"fLaC", "audio", "FLAC"),
];

#[derive(Debug, Clone, Default)]
pub struct SignatureDetector;

impl SignatureDetector {
    fn evaluate(&self, record: &FileRecord) -> DetectorResult {
        Ok(SIGNATURES
            .iter()
            .find(|(magic, _, _)| record.head.starts_with(magic))
            .map(|(_, label, name)| signal("signature", label, 0.80, format!("{} signature", name)))
            .into_iter()
            .collect())
    }
}

// ── Keyword ──────────────────────────────────────────────────

const KEYWORD_GROUPS: &[(&str, f64, &[&str])] = &[
    (
        "finance",
        0.75,
        &[
            "invoice", "receipt", "tax", "1099", "w2", "paystub", "statement", "bill",
            "expense", "budget", "financial", "payment", "transaction",
        ],
    ),
    ("contracts", 0.80, &["contract", "agreement", "nda", "msa", "sow", "terms", "legal", "amendment", "addendum"]),
    ("presentations", 0.70, &["slides", "presentation", "deck", "pitch", "keynote", "powerpoint"]),
    ("reports", 0.65, &["report", "analysis", "summary", "review", "assessment", "evaluation", "findings"]),
    ("resumes", 0.85, &["resume", "cv", "curriculum", "vitae", "portfolio"]),
    ("personal", 0.60, &["personal", "private", "confidential", "diary", "journal"]),
    ("projects", 0.65, &["project", "proposal", "plan", "roadmap", "milestone", "deliverable", "scope"]),
    ("marketing", 0.70, &["marketing", "campaign", "advertising", "promotion", "brochure", "flyer", "newsletter"]),
    ("medical", 0.75, &["medical", "health", "prescription", "diagnosis", "treatment", "patient", "clinical"]),
    ("education", 0.70, &["course", "syllabus", "lecture", "homework", "assignment", "exam", "quiz", "study", "notes"]),
];

const EXACT_STEM_BOOST: f64 = 0.10;
const FOLDER_LEVEL_PENALTY: f64 = 0.10;

/// Filename and path token matching. Parent folders inside the scan root count
/// too, up to `token_depth` levels, each level costing some confidence.
#[derive(Debug, Clone)]
pub struct KeywordDetector {
    scan_root: Option<PathBuf>,
    token_depth: usize,
}

impl KeywordDetector {
    pub fn new(scan_root: Option<PathBuf>, token_depth: usize) -> Self {
        Self {
            scan_root,
            token_depth,
        }
    }

    fn evaluate(&self, record: &FileRecord) -> DetectorResult {
        let name = record.file_name();
        if name.is_empty() {
            return Err(DetectorError::MissingFileName(record.path.clone()));
        }

        let stem = record.stem().to_lowercase();
        let stem_tokens = tokenize(&stem);
        let mut best: Option<(f64, &str, String)> = None;
        let mut consider = |confidence: f64, label: &'static str, evidence: String| {
            if best.as_ref().map_or(true, |(c, _, _)| confidence > *c) {
                best = Some((confidence, label, evidence));
            }
        };

        for (label, base, keywords) in KEYWORD_GROUPS {
            for keyword in keywords.iter() {
                if stem_tokens.iter().any(|t| token_matches(t, keyword)) {
                    let mut confidence = *base;
                    if stem == *keyword {
                        confidence = (confidence + EXACT_STEM_BOOST).min(0.95);
                    }
                    consider(confidence, label, format!("contains '{}' in filename", keyword));
                }
            }
        }

        for (level, folder) in self.folder_names(&record.path).iter().enumerate() {
            let folder_tokens = tokenize(folder);
            let penalty = FOLDER_LEVEL_PENALTY * (level + 1) as f64;
            for (label, base, keywords) in KEYWORD_GROUPS {
                for keyword in keywords.iter() {
                    if folder_tokens.iter().any(|t| token_matches(t, keyword)) {
                        consider(
                            base - penalty,
                            label,
                            format!("folder '{}' matches '{}'", folder, keyword),
                        );
                    }
                }
            }
        }

        Ok(best
            .map(|(confidence, label, evidence)| signal("keyword", label, confidence, evidence))
            .into_iter()
            .collect())
    }

    /// Parent folder names, nearest first, bounded by depth and the scan root.
    fn folder_names(&self, path: &Path) -> Vec<String> {
        let mut names = Vec::new();
        let mut current = path.parent();
        while let Some(dir) = current {
            if names.len() >= self.token_depth {
                break;
            }
            if let Some(root) = &self.scan_root {
                if dir == root.as_path() || !dir.starts_with(root) {
                    break;
                }
            }
            match dir.file_name() {
                Some(name) => names.push(name.to_string_lossy().into_owned()),
                None => break,
            }
            current = dir.parent();
        }
        names
    }
}

// ── Date pattern ─────────────────────────────────────────────

const DATE_PATTERNS: &[(&str, &str, f64)] = &[
    (r"\d{4}[-_]\d{2}[-_]\d{2}", "YYYY-MM-DD", 0.50),
    (r"\d{2}[-_]\d{2}[-_]\d{4}", "MM-DD-YYYY", 0.50),
    (r"(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[-_]?\d{4}", "month-year", 0.45),
    (r"\d{4}[-_](jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)", "year-month", 0.45),
    (r"(q1|q2|q3|q4)[-_]?\d{4}", "quarter-year", 0.55),
    (r"\d{4}[-_](q1|q2|q3|q4)", "year-quarter", 0.55),
    (r"\d{8}", "YYYYMMDD", 0.45),
];

const FINANCIAL_TERMS: [&str; 3] = ["report", "statement", "invoice"];

#[derive(Debug, Clone)]
pub struct DatePatternDetector {
    patterns: Vec<(Regex, &'static str, f64)>,
}

impl DatePatternDetector {
    pub fn new() -> Result<Self, DetectorError> {
        let patterns = DATE_PATTERNS
            .iter()
            .map(|(pattern, description, confidence)| {
                Ok((Regex::new(pattern)?, *description, *confidence))
            })
            .collect::<Result<Vec<_>, DetectorError>>()?;
        Ok(Self { patterns })
    }

    fn evaluate(&self, record: &FileRecord) -> DetectorResult {
        let name = record.file_name().to_lowercase();
        for (regex, description, confidence) in &self.patterns {
            if regex.is_match(&name) {
                let (label, confidence) = if FINANCIAL_TERMS.iter().any(|t| name.contains(t)) {
                    ("finance", (confidence + 0.15).min(0.85))
                } else {
                    ("dated_files", *confidence)
                };
                return Ok(vec![signal(
                    "date_pattern",
                    label,
                    confidence,
                    format!("contains date in {}", description),
                )]);
            }
        }
        Ok(Vec::new())
    }
}

// ── Size ─────────────────────────────────────────────────────

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default)]
pub struct SizeDetector;

impl SizeDetector {
    fn evaluate(&self, record: &FileRecord) -> DetectorResult {
        let size = record.size;
        let found = if size == 0 {
            Some(("empty_files", 0.80, "empty file (0 bytes)".to_string()))
        } else if size < 100 {
            Some(("empty_files", 0.30, format!("nearly empty ({} bytes)", size)))
        } else if size > 500 * MIB {
            Some(("large_files", 0.80, format!("very large file ({:.1}MB)", size as f64 / MIB as f64)))
        } else if size > 100 * MIB {
            Some(("large_files", 0.60, format!("large file ({:.1}MB)", size as f64 / MIB as f64)))
        } else {
            None
        };
        Ok(found
            .map(|(label, confidence, evidence)| signal("size", label, confidence, evidence))
            .into_iter()
            .collect())
    }
}

// ── Contextual ───────────────────────────────────────────────

/// Learns from files that were already resolved: exact names, stems and
/// shared name tokens vote for the label those files received.
#[derive(Debug, Clone, Default)]
pub struct ContextualDetector {
    names: BTreeMap<String, (String, f64)>,
    stems: BTreeMap<String, (String, f64)>,
    tokens: BTreeMap<String, BTreeMap<String, usize>>,
}

impl ContextualDetector {
    pub fn learn<'a, I>(resolved: I) -> Self
    where
        I: IntoIterator<Item = (&'a Path, &'a str, f64)>,
    {
        let mut detector = Self::default();
        for (path, label, confidence) in resolved {
            if label.is_empty() {
                continue;
            }
            let name = match path.file_name() {
                Some(n) => n.to_string_lossy().to_lowercase(),
                None => continue,
            };
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default();

            remember(&mut detector.names, name.clone(), label, confidence);
            if !stem.is_empty() {
                remember(&mut detector.stems, stem, label, confidence);
            }
            for token in tokenize(&name).into_iter().filter(|t| t.len() >= 3) {
                *detector
                    .tokens
                    .entry(token)
                    .or_default()
                    .entry(label.to_string())
                    .or_insert(0) += 1;
            }
        }
        detector
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn evaluate(&self, record: &FileRecord) -> DetectorResult {
        let name = record.file_name().to_lowercase();
        if name.is_empty() {
            return Err(DetectorError::MissingFileName(record.path.clone()));
        }

        if let Some((label, confidence)) = self.names.get(&name) {
            return Ok(vec![signal(
                "contextual",
                label,
                (confidence * 0.9).min(0.85),
                format!("matches previously classified '{}'", name),
            )]);
        }

        let stem = record
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if let Some((label, confidence)) = self.stems.get(&stem) {
            return Ok(vec![signal(
                "contextual",
                label,
                (confidence * 0.8).min(0.75),
                format!("similar to previously classified '{}'", stem),
            )]);
        }

        let mut votes: BTreeMap<&str, usize> = BTreeMap::new();
        for token in tokenize(&name).iter().filter(|t| t.len() >= 3) {
            if let Some(labels) = self.tokens.get(token) {
                for (label, count) in labels {
                    *votes.entry(label.as_str()).or_insert(0) += count;
                }
            }
        }
        let mut best: Option<(&str, usize)> = None;
        for (label, count) in votes {
            if best.map_or(true, |(_, c)| count > c) {
                best = Some((label, count));
            }
        }
        Ok(best
            .filter(|(_, count)| *count >= 2)
            .map(|(label, count)| {
                signal(
                    "contextual",
                    label,
                    (0.55 + count as f64 * 0.05).min(0.75),
                    format!("pattern similarity to {} classified files", count),
                )
            })
            .into_iter()
            .collect())
    }
}

fn remember(map: &mut BTreeMap<String, (String, f64)>, key: String, label: &str, confidence: f64) {
    let replace = match map.get(&key) {
        None => true,
        Some((existing, c)) => confidence > *c || (confidence == *c && label < existing.as_str()),
    };
    if replace {
        map.insert(key, (label.to_string(), confidence));
    }
}

// ── Registry ─────────────────────────────────────────────────

/// Closed set of detector variants.
#[derive(Debug, Clone)]
pub enum Detector {
    Signature(SignatureDetector),
    Extension(ExtensionDetector),
    Keyword(KeywordDetector),
    DatePattern(DatePatternDetector),
    Size(SizeDetector),
    Contextual(ContextualDetector),
}

impl Detector {
    pub fn id(&self) -> &'static str {
        match self {
            Detector::Signature(_) => "signature",
            Detector::Extension(_) => "extension",
            Detector::Keyword(_) => "keyword",
            Detector::DatePattern(_) => "date_pattern",
            Detector::Size(_) => "size",
            Detector::Contextual(_) => "contextual",
        }
    }

    pub fn evaluate(&self, record: &FileRecord) -> DetectorResult {
        match self {
            Detector::Signature(d) => d.evaluate(record),
            Detector::Extension(d) => d.evaluate(record),
            Detector::Keyword(d) => d.evaluate(record),
            Detector::DatePattern(d) => d.evaluate(record),
            Detector::Size(d) => d.evaluate(record),
            Detector::Contextual(d) => d.evaluate(record),
        }
    }
}

/// Detectors built once per pass and shared read-only by all workers.
#[derive(Debug, Clone, Default)]
pub struct DetectorRegistry {
    detectors: Vec<Detector>,
}

impl DetectorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard(scan_root: Option<&Path>, token_depth: usize) -> Result<Self, DetectorError> {
        Ok(Self {
            detectors: vec![
                Detector::Signature(SignatureDetector),
                Detector::Extension(ExtensionDetector),
                Detector::Keyword(KeywordDetector::new(scan_root.map(Path::to_path_buf), token_depth)),
                Detector::DatePattern(DatePatternDetector::new()?),
                Detector::Size(SizeDetector),
            ],
        })
    }

    pub fn with_detector(mut self, detector: Detector) -> Self {
        self.detectors.push(detector);
        self
    }

    pub fn detectors(&self) -> &[Detector] {
        &self.detectors
    }

    /// Signals from every detector. A failing detector contributes nothing.
    pub fn evaluate(&self, record: &FileRecord) -> Vec<DetectorSignal> {
        let mut signals = Vec::new();
        for detector in &self.detectors {
            match detector.evaluate(record) {
                Ok(found) => signals.extend(found),
                Err(e) => warn!(
                    "Detector '{}' failed on {}: {}",
                    detector.id(),
                    record.path.display(),
                    e
                ),
            }
        }
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::record::extension_of;

    fn record(path: &str, size: u64, head: &[u8]) -> FileRecord {
        let path = PathBuf::from(path);
        FileRecord {
            extension: extension_of(&path),
            path,
            size,
            modified: 0,
            head: head.to_vec(),
            fingerprint: 0,
            content_hash: None,
        }
    }

    #[test]
    fn test_extension_known_and_unknown() {
        let d = ExtensionDetector;
        let s = d.evaluate(&record("/r/main.py", 10, b"")).unwrap();
        assert_eq!(s[0].label, "code");
        assert_eq!(s[0].confidence, 0.90);

        let s = d.evaluate(&record("/r/thing.qqq", 10, b"")).unwrap();
        assert_eq!(s[0].label, "misc");

        assert!(d.evaluate(&record("/r/Makefile", 10, b"")).unwrap().is_empty());
        let s = d.evaluate(&record("/r/site.tar.gz", 10, b"")).unwrap();
        assert_eq!(s[0].label, "archives");
    }

    #[test]
    fn test_signature_sniffs_magic_bytes() {
        let s = SignatureDetector
            .evaluate(&record("/r/scan", 200, &[0x89, b'P', b'N', b'G', 0x0D]))
            .unwrap();
        assert_eq!(s[0].label, "images");
        assert!(SignatureDetector.evaluate(&record("/r/t.txt", 5, b"hello")).unwrap().is_empty());
    }

    #[test]
    fn test_keyword_prefers_filename_and_respects_depth() {
        let shallow = KeywordDetector::new(Some(PathBuf::from("/root")), 0);
        assert!(shallow
            .evaluate(&record("/root/invoices/scan001.dat", 500, b""))
            .unwrap()
            .is_empty());

        let deep = KeywordDetector::new(Some(PathBuf::from("/root")), 1);
        let s = deep.evaluate(&record("/root/invoices/scan001.dat", 500, b"")).unwrap();
        assert_eq!(s[0].label, "finance");
        assert!((s[0].confidence - 0.65).abs() < 1e-9);

        let s = shallow.evaluate(&record("/root/resume.pdf", 500, b"")).unwrap();
        assert_eq!(s[0].label, "resumes");
        assert!((s[0].confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_never_reads_the_scan_root_name() {
        let d = KeywordDetector::new(Some(PathBuf::from("/invoices")), 3);
        assert!(d.evaluate(&record("/invoices/a.bin", 500, b"")).unwrap().is_empty());
    }

    #[test]
    fn test_date_pattern_labels() {
        let d = DatePatternDetector::new().unwrap();
        let s = d.evaluate(&record("/r/photo_2023-07-14.heic", 500, b"")).unwrap();
        assert_eq!(s[0].label, "dated_files");
        let s = d.evaluate(&record("/r/statement_2023-07-14.pdf", 500, b"")).unwrap();
        assert_eq!(s[0].label, "finance");
        assert!((s[0].confidence - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_size_buckets() {
        let s = SizeDetector.evaluate(&record("/r/e", 0, b"")).unwrap();
        assert_eq!(s[0].label, "empty_files");
        assert!(SizeDetector.evaluate(&record("/r/m", 4096, b"")).unwrap().is_empty());
        let s = SizeDetector.evaluate(&record("/r/big", 600 * MIB, b"")).unwrap();
        assert_eq!(s[0].label, "large_files");
    }

    #[test]
    fn test_contextual_learns_from_resolved_files() {
        let resolved = vec![
            (PathBuf::from("/r/budget_2021.xlsx"), "finance".to_string(), 0.9),
            (PathBuf::from("/r/budget_2022.xlsx"), "finance".to_string(), 0.9),
            (PathBuf::from("/r/holiday.jpg"), "images".to_string(), 0.9),
        ];
        let d = ContextualDetector::learn(
            resolved.iter().map(|(p, l, c)| (p.as_path(), l.as_str(), *c)),
        );

        let s = d.evaluate(&record("/other/holiday.jpg", 10, b"")).unwrap();
        assert_eq!(s[0].label, "images");
        assert!((s[0].confidence - 0.81).abs() < 1e-9);

        let s = d.evaluate(&record("/other/budget_draft.ods", 10, b"")).unwrap();
        assert_eq!(s[0].label, "finance");
        assert!((s[0].confidence - 0.65).abs() < 1e-9);

        assert!(d.evaluate(&record("/other/unrelated.bin", 10, b"")).unwrap().is_empty());
    }

    #[test]
    fn test_registry_collects_all_signals() {
        let registry = DetectorRegistry::standard(Some(Path::new("/r")), 0).unwrap();
        let signals = registry.evaluate(&record("/r/invoice.pdf", 2048, b"%PDF-1.7"));
        let detectors: Vec<&str> = signals.iter().map(|s| s.detector.as_str()).collect();
        assert_eq!(detectors, vec!["signature", "extension", "keyword"]);
    }
}
