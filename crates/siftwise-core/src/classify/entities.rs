use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use super::tokens::tokenize;
use crate::config::EntityConfig;

// ── Dictionaries ─────────────────────────────────────────────

const ORGANIZATIONS: &[&str] = &[
    // banks and payments
    "amazon", "apple", "irs", "chase", "amex", "american express", "bank of america", "bofa",
    "citi", "citibank", "wells fargo", "paypal", "venmo", "zelle", "stripe",
    // software and services
    "google", "microsoft", "netflix", "spotify", "github", "gitlab", "notion", "slack", "zoom",
    "dropbox", "uber", "lyft", "airbnb",
    // retail
    "home depot", "homedepot", "lowes", "costco", "walmart", "ebay", "etsy",
    // health and insurance
    "aetna", "cigna", "bcbs", "blue cross", "united healthcare", "kaiser", "anthem", "geico",
    "state farm", "allstate", "progressive",
    // utilities
    "comcast", "xfinity", "verizon", "att", "tmobile", "t mobile", "sprint",
];

const PEOPLE: &[&str] = &["client a", "client b", "clienta", "clientb", "project x", "projectx", "team alpha"];

const PLACES: &[&str] = &[
    "nyc", "new york", "new york city", "manhattan", "brooklyn", "queens", "orlando", "miami",
    "tampa", "jacksonville", "chicago", "boston", "philadelphia", "philly", "seattle", "portland",
    "san francisco", "sf", "bay area", "los angeles", "la", "san diego", "vegas", "las vegas",
    "reno", "denver", "austin", "houston", "dallas", "atlanta", "charlotte", "nashville", "quebec",
    "montreal", "toronto", "vancouver", "italy", "france", "spain", "uk", "england", "germany",
    "japan", "china", "mexico", "canada", "trip", "vacation", "travel",
];

/// Names shorter than three letters that still count, rendered upper case.
const ACRONYMS: &[&str] = &["irs", "nyc", "la", "sf", "uk", "us", "eu", "hr", "it", "pr", "qa"];

const JUNK: &[&str] = &[
    "copy", "copyof", "duplicate", "backup", "export", "scan", "scanned", "screenshot", "capture",
    "final", "draft", "temp", "temporary", "new", "old", "version", "revised", "updated", "misc",
    "miscellaneous", "untitled", "document", "file", "folder", "archive", "data", "info", "stuff",
    "desktop", "downloads", "documents", "pictures", "music", "videos", "jan", "feb", "mar",
    "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec", "receipt", "invoice",
    "statement", "bill", "payment", "transaction", "report", "summary", "total", "img", "image",
    "photo", "pic", "video", "audio",
];

const EARLIEST_YEAR: i32 = 1990;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Organization,
    Person,
    Place,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySource {
    Parent,
    FileName,
}

/// A named organization, person or place found in a path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    /// Display form: `Chase`, `NewYorkCity`, `IRS`.
    pub name: String,
    pub source: EntitySource,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathEntities {
    pub entity: Option<Entity>,
    pub year: Option<i32>,
}

impl PathEntities {
    /// Lowercase keys two files can share: the entity name and the year.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(2);
        if let Some(entity) = &self.entity {
            keys.push(entity.name.to_lowercase());
        }
        if let Some(year) = self.year {
            keys.push(year.to_string());
        }
        keys
    }
}

/// An entity common enough to deserve its own folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityFolder {
    pub name: String,
    pub kind: EntityKind,
    pub files: usize,
}

/// Dictionary-based extraction of entities and years from a file's name and
/// its parent folder name. Parent folder matches outrank file name matches.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    /// Space-joined tokens -> kind.
    dictionary: BTreeMap<String, EntityKind>,
    longest_phrase: usize,
    latest_year: i32,
}

impl EntityExtractor {
    pub fn new(config: &EntityConfig) -> Self {
        let mut extractor = Self {
            dictionary: BTreeMap::new(),
            longest_phrase: 1,
            latest_year: chrono::Utc::now().year() + 1,
        };
        let builtin = [
            (EntityKind::Organization, ORGANIZATIONS),
            (EntityKind::Person, PEOPLE),
            (EntityKind::Place, PLACES),
        ];
        for (kind, names) in builtin {
            for name in names.iter() {
                extractor.insert(name, kind);
            }
        }
        let extra = [
            (EntityKind::Organization, &config.organizations),
            (EntityKind::Person, &config.people),
            (EntityKind::Place, &config.places),
        ];
        for (kind, names) in extra {
            for name in names {
                extractor.insert(name, kind);
            }
        }
        extractor
    }

    fn insert(&mut self, name: &str, kind: EntityKind) {
        let tokens = tokenize(name);
        if tokens.is_empty() {
            return;
        }
        self.longest_phrase = self.longest_phrase.max(tokens.len());
        self.dictionary.entry(tokens.join(" ")).or_insert(kind);
    }

    pub fn extract(&self, path: &Path) -> PathEntities {
        let parent = path
            .parent()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned());
        let stem = path.file_stem().map(|s| s.to_string_lossy().into_owned());

        let mut best: Option<(f64, Entity)> = None;
        let mut year = None;
        for (source, component) in [(EntitySource::Parent, parent), (EntitySource::FileName, stem)] {
            let component = match component {
                Some(c) => c,
                None => continue,
            };
            let tokens = tokenize(&component);
            year = year.max(self.year_in(&tokens));
            for (phrase, kind) in self.matches(&tokens) {
                let score = score(source, kind);
                if best.as_ref().map_or(true, |(s, _)| score > *s) {
                    best = Some((
                        score,
                        Entity {
                            kind,
                            name: display_name(&phrase),
                            source,
                            confidence: (score / 3.0).min(1.0),
                        },
                    ));
                }
            }
        }
        PathEntities {
            entity: best.map(|(_, entity)| entity),
            year,
        }
    }

    /// Dictionary phrases in `tokens`, longest first.
    fn matches(&self, tokens: &[String]) -> Vec<(String, EntityKind)> {
        let mut found = Vec::new();
        for width in (1..=self.longest_phrase.min(tokens.len())).rev() {
            for window in tokens.windows(width) {
                if width == 1 && is_junk(&window[0]) {
                    continue;
                }
                let phrase = window.join(" ");
                if let Some(kind) = self.dictionary.get(&phrase) {
                    found.push((phrase, *kind));
                }
            }
        }
        found
    }

    fn year_in(&self, tokens: &[String]) -> Option<i32> {
        tokens
            .iter()
            .filter(|t| t.len() == 4 && t.chars().all(|c| c.is_ascii_digit()))
            .filter_map(|t| t.parse::<i32>().ok())
            .filter(|y| (EARLIEST_YEAR..=self.latest_year).contains(y))
            .max()
    }

    /// Entities seen in at least `min_files` of `paths`, most frequent first.
    pub fn suggest_folders<'a, I>(&self, paths: I, min_files: usize) -> Vec<EntityFolder>
    where
        I: IntoIterator<Item = &'a Path>,
    {
        let mut counts: BTreeMap<String, (EntityKind, usize)> = BTreeMap::new();
        for path in paths {
            if let Some(entity) = self.extract(path).entity {
                counts.entry(entity.name).or_insert((entity.kind, 0)).1 += 1;
            }
        }
        let mut folders: Vec<EntityFolder> = counts
            .into_iter()
            .filter(|(_, (_, files))| *files >= min_files)
            .map(|(name, (kind, files))| EntityFolder { name, kind, files })
            .collect();
        folders.sort_by(|a, b| b.files.cmp(&a.files).then_with(|| a.name.cmp(&b.name)));
        folders
    }
}

fn score(source: EntitySource, kind: EntityKind) -> f64 {
    match (source, kind) {
        (EntitySource::Parent, EntityKind::Place) => 1.8,
        (EntitySource::Parent, _) => 2.0,
        (EntitySource::FileName, EntityKind::Place) => 1.3,
        (EntitySource::FileName, _) => 1.5,
    }
}

fn is_junk(token: &str) -> bool {
    (token.len() < 3 && !ACRONYMS.contains(&token))
        || JUNK.contains(&token)
        || token.chars().all(|c| c.is_ascii_digit())
}

fn display_name(phrase: &str) -> String {
    if ACRONYMS.contains(&phrase) {
        return phrase.to_uppercase();
    }
    phrase
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
