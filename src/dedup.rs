//! Merging internal survey submissions into the results feed.
//!
//! Duplicate detection is best effort: a submission is dropped when its
//! respondent is already known by username, or when its three scores match a
//! Logica Test student at the same university to one decimal.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::{ExamRecord, Subject, UniversityInfo, UniversityRef};
use crate::source::{Source, INTERNAL_SURVEY_PREFIX};

/// Answers this close to zero mean the exam was not taken.
const NOT_TAKEN_EPSILON: f64 = 0.05;

/// Usernames this short are too ambiguous to match on.
const MIN_USERNAME_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveySubmission {
    pub id: String,
    pub university: String,
    #[serde(default)]
    pub physics: Option<f64>,
    #[serde(default)]
    pub chemistry: Option<f64>,
    #[serde(default)]
    pub biology: Option<f64>,
    #[serde(default)]
    pub username: Option<String>,
}

impl SurveySubmission {
    pub fn label(&self) -> String {
        format!("{}{}", INTERNAL_SURVEY_PREFIX, self.id.to_uppercase())
    }

    fn answer(&self, subject: Subject) -> Option<f64> {
        let score = match subject {
            Subject::Physics => self.physics,
            Subject::Chemistry => self.chemistry,
            Subject::Biology => self.biology,
        };
        score.filter(|score| score.abs() > NOT_TAKEN_EPSILON)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    UnknownUniversity { university: String },
    KnownUsername { username: String },
    MatchingScores { logica_label: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedSubmission {
    pub id: String,
    #[serde(flatten)]
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// Existing records followed by the accepted survey records.
    pub records: Vec<ExamRecord>,
    pub accepted: usize,
    pub skipped: Vec<SkippedSubmission>,
}

/// Lowercase alphanumeric form, or `None` when too short to be meaningful.
pub fn normalize_username(username: &str) -> Option<String> {
    let normalized: String = username
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    (normalized.len() > MIN_USERNAME_LEN).then_some(normalized)
}

/// Tenths of a point, rounded half away from zero.
fn tenths(score: f64) -> i64 {
    (score * 10.0).round() as i64
}

type ScoreKey = [Option<i64>; 3];

fn score_key(score: impl Fn(Subject) -> Option<f64>) -> ScoreKey {
    Subject::ALL.map(|subject| score(subject).map(tenths))
}

pub struct Deduplicator<'a> {
    universities: &'a [UniversityInfo],
    known_usernames: HashSet<String>,
    logica_scores: HashMap<(String, ScoreKey), String>,
}

impl<'a> Deduplicator<'a> {
    pub fn new<I, S>(existing: &[ExamRecord], universities: &'a [UniversityInfo], usernames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let known_usernames = usernames
            .into_iter()
            .filter_map(|username| normalize_username(username.as_ref()))
            .collect();

        let mut logica: HashMap<&str, (String, HashMap<Subject, f64>)> = HashMap::new();
        for record in existing.iter().filter(|r| r.source() == Source::LogicaSurvey) {
            logica
                .entry(record.label.as_str())
                .or_insert_with(|| (record.university.id.clone(), HashMap::new()))
                .1
                .insert(record.subject, record.score);
        }

        let logica_scores = logica
            .into_iter()
            .map(|(label, (university_id, scores))| {
                let key = score_key(|subject| scores.get(&subject).copied());
                ((university_id, key), label.to_string())
            })
            .collect();

        Self {
            universities,
            known_usernames,
            logica_scores,
        }
    }

    fn university(&self, name: &str) -> Option<&'a UniversityInfo> {
        self.universities.iter().find(|info| info.name == name)
    }

    /// Decide on one submission; accepted usernames become known for the rest of the batch.
    pub fn check(&mut self, submission: &SurveySubmission) -> Result<UniversityRef, SkipReason> {
        let info = self
            .university(&submission.university)
            .ok_or_else(|| SkipReason::UnknownUniversity {
                university: submission.university.clone(),
            })?;

        let username = submission.username.as_deref().and_then(normalize_username);
        if let Some(username) = &username {
            if self.known_usernames.contains(username) {
                return Err(SkipReason::KnownUsername {
                    username: username.clone(),
                });
            }
        }

        let key = score_key(|subject| submission.answer(subject));
        if let Some(label) = self.logica_scores.get(&(info.id.clone(), key)) {
            return Err(SkipReason::MatchingScores {
                logica_label: label.clone(),
            });
        }

        if let Some(username) = username {
            self.known_usernames.insert(username);
        }

        Ok(UniversityRef {
            name: info.name.clone(),
            id: info.id.clone(),
        })
    }

    pub fn merge(mut self, existing: Vec<ExamRecord>, submissions: &[SurveySubmission]) -> MergeOutcome {
        let mut outcome = MergeOutcome {
            records: existing,
            ..Default::default()
        };

        for submission in submissions {
            let university = match self.check(submission) {
                Ok(university) => university,
                Err(reason) => {
                    debug!(id = submission.id.as_str(), ?reason, "survey submission skipped");
                    outcome.skipped.push(SkippedSubmission {
                        id: submission.id.clone(),
                        reason,
                    });
                    continue;
                }
            };

            let label = submission.label();
            let records: Vec<ExamRecord> = Subject::ALL
                .iter()
                .filter_map(|subject| {
                    let score = submission.answer(*subject)?;
                    Some(ExamRecord {
                        label: label.clone(),
                        // Stored as published, with two decimals.
                        score: (score * 100.0).round() / 100.0,
                        subject: *subject,
                        university: university.clone(),
                        from_survey: true,
                    })
                })
                .collect();

            if records.is_empty() {
                warn!(id = submission.id.as_str(), "survey submission has no exam scores");
            }
            outcome.records.extend(records);
            outcome.accepted += 1;
        }

        info!(
            accepted = outcome.accepted,
            skipped = outcome.skipped.len(),
            "survey submissions merged"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn universities() -> Vec<UniversityInfo> {
        vec![
            UniversityInfo {
                name: "Università di PISA".to_string(),
                id: "24".to_string(),
                region: "Toscana".to_string(),
            },
            UniversityInfo {
                name: "Università degli Studi di PAVIA".to_string(),
                id: "22".to_string(),
                region: "Lombardia".to_string(),
            },
        ]
    }

    fn record(label: &str, subject: Subject, score: f64, university_id: &str) -> ExamRecord {
        ExamRecord {
            label: label.to_string(),
            score,
            subject,
            university: UniversityRef {
                name: String::new(),
                id: university_id.to_string(),
            },
            from_survey: true,
        }
    }

    fn logica_student() -> Vec<ExamRecord> {
        vec![
            record("LOGI-9F3A2C", Subject::Physics, 21.25, "24"),
            record("LOGI-9F3A2C", Subject::Chemistry, 18.0, "24"),
            record("LOGI-9F3A2C", Subject::Biology, 24.5, "24"),
        ]
    }

    fn submission(id: &str, university: &str, scores: [f64; 3], username: Option<&str>) -> SurveySubmission {
        SurveySubmission {
            id: id.to_string(),
            university: university.to_string(),
            physics: Some(scores[0]),
            chemistry: Some(scores[1]),
            biology: Some(scores[2]),
            username: username.map(str::to_string),
        }
    }

    #[test]
    fn normalizes_usernames() {
        assert_eq!(normalize_username("Mario.Rossi_99"), Some("mariorossi99".to_string()));
        assert_eq!(normalize_username("a.b!"), None);
        assert_eq!(normalize_username("abcd"), Some("abcd".to_string()));
    }

    #[test]
    fn accepted_submission_becomes_survey_records() {
        let universities = universities();
        let dedup = Deduplicator::new(&[], &universities, Vec::<String>::new());
        let outcome = dedup.merge(
            logica_student(),
            &[submission("nPq8xz", "Università di PISA", [20.333, 0.0, -1.5], None)],
        );

        assert_eq!(outcome.accepted, 1);
        assert_eq!(outcome.records.len(), 5);
        let added = &outcome.records[3..];
        assert_eq!(added[0].label, "SRV-NPQ8XZ");
        assert_eq!(added[0].subject, Subject::Physics);
        assert_eq!(added[0].to_row().score, "20.33");
        assert_eq!(added[1].subject, Subject::Biology);
        assert!(added.iter().all(|r| r.from_survey && r.university.id == "24"));
    }

    #[test]
    fn skips_known_usernames_including_earlier_in_batch() {
        let universities = universities();
        let dedup = Deduplicator::new(&[], &universities, ["Giulia_B"]);
        let outcome = dedup.merge(
            Vec::new(),
            &[
                submission("a1", "Università di PISA", [20.0, 20.0, 20.0], Some("giulia.b")),
                submission("a2", "Università di PISA", [22.0, 20.0, 20.0], Some("Luca1998")),
                submission("a3", "Università di PISA", [19.0, 20.0, 20.0], Some("luca-1998")),
            ],
        );

        assert_eq!(outcome.accepted, 1);
        assert_eq!(
            outcome.skipped,
            vec![
                SkippedSubmission {
                    id: "a1".to_string(),
                    reason: SkipReason::KnownUsername {
                        username: "giuliab".to_string()
                    },
                },
                SkippedSubmission {
                    id: "a3".to_string(),
                    reason: SkipReason::KnownUsername {
                        username: "luca1998".to_string()
                    },
                },
            ]
        );
    }

    #[test]
    fn skips_score_triple_matching_logica_student_at_same_university() {
        let universities = universities();
        let existing = logica_student();
        let dedup = Deduplicator::new(&existing, &universities, Vec::<String>::new());
        let outcome = dedup.merge(
            existing.clone(),
            &[
                submission("dup", "Università di PISA", [21.3, 18.0, 24.5], None),
                submission("elsewhere", "Università degli Studi di PAVIA", [21.25, 18.0, 24.5], None),
            ],
        );

        assert_eq!(outcome.accepted, 1);
        assert_eq!(
            outcome.skipped[0].reason,
            SkipReason::MatchingScores {
                logica_label: "LOGI-9F3A2C".to_string()
            }
        );
    }

    #[test]
    fn unknown_university_is_skipped() {
        let universities = universities();
        let mut dedup = Deduplicator::new(&[], &universities, Vec::<String>::new());
        let err = dedup
            .check(&submission("x", "Università di PISA ", [20.0, 20.0, 20.0], None))
            .unwrap_err();
        assert!(matches!(err, SkipReason::UnknownUniversity { .. }));
    }
}
