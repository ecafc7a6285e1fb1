//! Provenance of a result, encoded by the label prefix.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

pub const INTERNAL_SURVEY_PREFIX: &str = "SRV-";
pub const UNIMI_SURVEY_PREFIX: &str = "UNIMI-";
pub const LOGICA_SURVEY_PREFIX: &str = "LOGI-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Source {
    Ministerial,
    InternalSurvey,
    UnimiSurvey,
    LogicaSurvey,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Ministerial,
        Source::InternalSurvey,
        Source::UnimiSurvey,
        Source::LogicaSurvey,
    ];

    /// Any label without a recognized survey prefix is ministerial.
    pub fn from_label(label: &str) -> Self {
        if label.starts_with(INTERNAL_SURVEY_PREFIX) {
            Source::InternalSurvey
        } else if label.starts_with(UNIMI_SURVEY_PREFIX) {
            Source::UnimiSurvey
        } else if label.starts_with(LOGICA_SURVEY_PREFIX) {
            Source::LogicaSurvey
        } else {
            Source::Ministerial
        }
    }

    pub fn is_survey(&self) -> bool {
        !matches!(self, Source::Ministerial)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Source::Ministerial => "dati ministeriali",
            Source::InternalSurvey => "sondaggio interno",
            Source::UnimiSurvey => "sondaggio UniMi",
            Source::LogicaSurvey => "Logica Test",
        }
    }
}

fn label_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(SRV-|UNIMI-|LOGI-)?[A-Z0-9]+$").expect("label pattern is a valid regex")
    })
}

/// Whether a label follows the `[prefix-]UPPERCASE_ALNUM` convention.
pub fn is_well_formed_label(label: &str) -> bool {
    label_pattern().is_match(label)
}
