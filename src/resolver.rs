//! University name resolution.
//!
//! The results feed, the surveys and the enrollment table all spell university
//! names differently ("Alma Mater Studiorum - Università di BOLOGNA", "Bologna",
//! "UNIVERSITA' DI BOLOGNA"). Names are normalized and matched in three tiers:
//! exact normalized name, curated aliases (with exclusion rules), then a
//! token match that ignores city names shared by several universities.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::error::{AnalyzerError, Result};
use crate::models::EnrollmentReference;

const BUILTIN_ENROLLMENTS: &str = include_str!("../data/enrollments.toml");
const BUILTIN_ALIASES: &str = include_str!("../data/university_aliases.toml");

/// Fuzzy-match tokens must be longer than this.
const MIN_TOKEN_LEN: usize = 4;

#[derive(Debug, Clone, Deserialize)]
pub struct AliasEntry {
    /// Enrollment table id this alias resolves to.
    pub id: String,
    pub aliases: Vec<String>,
    /// Substrings that veto this entry when present in the input.
    #[serde(default)]
    pub exclude_if: Vec<String>,
}

impl AliasEntry {
    fn matches(&self, normalized: &str) -> bool {
        if self.exclude_if.iter().any(|excl| normalized.contains(excl.as_str())) {
            return false;
        }
        self.aliases
            .iter()
            .any(|alias| alias == normalized || normalized.contains(alias.as_str()))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AliasTable {
    #[serde(default)]
    pub fuzzy_stopwords: Vec<String>,
    #[serde(default, rename = "alias")]
    pub entries: Vec<AliasEntry>,
}

impl AliasTable {
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN_ALIASES, "embedded university_aliases.toml")
    }

    pub fn from_toml(content: &str, origin: &str) -> Result<Self> {
        toml::from_str(content).map_err(|source| AnalyzerError::Reference {
            origin: origin.to_string(),
            source,
        })
    }
}

#[derive(Debug, Deserialize)]
struct EnrollmentFile {
    #[serde(default)]
    university: Vec<EnrollmentReference>,
}

pub fn builtin_enrollments() -> Result<Vec<EnrollmentReference>> {
    parse_enrollments(BUILTIN_ENROLLMENTS, "embedded enrollments.toml")
}

pub fn parse_enrollments(content: &str, origin: &str) -> Result<Vec<EnrollmentReference>> {
    let file: EnrollmentFile = toml::from_str(content).map_err(|source| AnalyzerError::Reference {
        origin: origin.to_string(),
        source,
    })?;
    Ok(file.university)
}

fn prefix_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"ALMA MATER STUDIORUM\s*[-–—]?\s*",
            r"UNIVERSITA DEGLI STUDI (DI |DEL |DELLA |DELL)?",
            r"UNIVERSITA (DI |DEL |DELLA |DELL)?",
        ]
        .iter()
        .map(|pattern| Regex::new(pattern).expect("prefix pattern is a valid regex"))
        .collect()
    })
}

const COMBINING_MARKS: RangeInclusive<char> = '\u{300}'..='\u{36f}';

/// Decompose and drop combining accents, so precomposed and decomposed input agree.
pub(crate) fn strip_accents(text: &str) -> String {
    text.nfd().filter(|c| !COMBINING_MARKS.contains(c)).collect()
}

/// Uppercase, accent-free, quote-free name with legal-form prefixes removed.
pub fn normalize_name(name: &str) -> String {
    // "Ã€" is how a mis-decoded "À" shows up in some survey exports.
    let upper = name.to_uppercase().replace("Ã€", "A");

    let folded: String = strip_accents(&upper)
        .chars()
        .filter(|c| !matches!(c, '\'' | '"' | '\\' | '\u{2019}' | '\u{201C}' | '\u{201D}'))
        .collect();

    let mut normalized = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    for pattern in prefix_patterns() {
        normalized = pattern.replace_all(&normalized, "").into_owned();
    }

    normalized.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tokens<'a>(normalized: &'a str, stopwords: &'a HashSet<String>) -> impl Iterator<Item = &'a str> {
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(move |word| word.chars().count() > MIN_TOKEN_LEN && !stopwords.contains(*word))
}

pub struct UniversityResolver {
    references: Vec<EnrollmentReference>,
    normalized: Vec<String>,
    aliases: Vec<AliasEntry>,
    stopwords: HashSet<String>,
}

impl UniversityResolver {
    pub fn new(references: Vec<EnrollmentReference>, table: AliasTable) -> Self {
        let normalized = references.iter().map(|r| normalize_name(&r.name)).collect();

        // Entries with exclusion rules disambiguate, so they get the first chance.
        let known: HashSet<&str> = references.iter().map(|r| r.id.as_str()).collect();
        let (mut aliases, generic): (Vec<AliasEntry>, Vec<AliasEntry>) = table
            .entries
            .into_iter()
            .filter(|entry| known.contains(entry.id.as_str()))
            .partition(|entry| !entry.exclude_if.is_empty());
        aliases.extend(generic);

        Self {
            references,
            normalized,
            aliases,
            stopwords: table.fuzzy_stopwords.into_iter().collect(),
        }
    }

    /// Resolver over the embedded enrollment and alias tables.
    pub fn builtin() -> Result<Self> {
        Ok(Self::new(builtin_enrollments()?, AliasTable::builtin()?))
    }

    pub fn references(&self) -> &[EnrollmentReference] {
        &self.references
    }

    pub fn reference(&self, id: &str) -> Option<&EnrollmentReference> {
        self.references.iter().find(|r| r.id == id)
    }

    /// Resolve a free-text university name to an enrollment table id.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return None;
        }

        if let Some(index) = self.normalized.iter().position(|n| *n == normalized) {
            return Some(self.references[index].id.as_str());
        }

        if let Some(entry) = self.aliases.iter().find(|entry| entry.matches(&normalized)) {
            return Some(entry.id.as_str());
        }

        let wanted: HashSet<&str> = tokens(&normalized, &self.stopwords).collect();
        if wanted.is_empty() {
            debug!(university = name, "no identifying tokens for fuzzy match");
            return None;
        }
        for (index, candidate) in self.normalized.iter().enumerate() {
            if tokens(candidate, &self.stopwords).any(|token| wanted.contains(token)) {
                return Some(self.references[index].id.as_str());
            }
        }

        debug!(university = name, "university not found in enrollment table");
        None
    }

    pub fn lookup(&self, name: &str) -> Option<&EnrollmentReference> {
        self.resolve(name).and_then(|id| self.reference(id))
    }

    /// Look up by feed id first, falling back to the name.
    pub fn lookup_university(&self, id: &str, name: &str) -> Option<&EnrollmentReference> {
        self.reference(id).or_else(|| self.lookup(name))
    }

    /// Sum of exam registrants over every university with a known count.
    pub fn total_exam_registrants(&self) -> u64 {
        self.references
            .iter()
            .filter_map(|r| r.exam_registrants())
            .map(u64::from)
            .sum()
    }
}

fn display_prefixes() -> &'static [(Regex, &'static str)] {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            (r"(?i)^Alma Mater Studiorum - Università di ", ""),
            (r"(?i)^Alma Mater Studiorum - ", ""),
            (r"(?i)^Università degli Studi di ", ""),
            (r"(?i)^Università degli Studi ", ""),
            (r"(?i)^Università del ", ""),
            (r"(?i)^Università della ", ""),
            (r"(?i)^Università di ", ""),
            (r"(?i)^Università Politecnica ", "Politecnica "),
            (r"(?i)^Università ", ""),
        ]
        .iter()
        .map(|(pattern, replacement)| {
            (Regex::new(pattern).expect("display pattern is a valid regex"), *replacement)
        })
        .collect()
    })
}

/// Short, title-cased name for reports: "Università degli Studi di ROMA \"Tor Vergata\""
/// becomes "Roma \"Tor Vergata\"".
pub fn display_name(name: &str) -> String {
    let mut stripped = name.trim().to_string();
    for (pattern, replacement) in display_prefixes() {
        stripped = pattern.replace(&stripped, *replacement).into_owned();
    }

    let mut formatted = String::with_capacity(stripped.len());
    let mut at_word_start = true;
    for c in stripped.chars() {
        if c.is_alphanumeric() {
            if at_word_start {
                formatted.extend(c.to_uppercase());
            } else {
                formatted.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            formatted.push(c);
            at_word_start = true;
        }
    }
    formatted
}
