//! Feed loading from local files or the published URLs.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::dedup::SurveySubmission;
use crate::error::{AnalyzerError, Result};
use crate::models::{Config, DataSourceMode, ExamRecord, ResultRow, UniversityInfo};
use crate::resolver::{builtin_enrollments, parse_enrollments, AliasTable, UniversityResolver};
use crate::source::is_well_formed_label;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Both feeds, parsed.
#[derive(Debug, Clone, Default)]
pub struct FeedData {
    pub records: Vec<ExamRecord>,
    pub universities: Vec<UniversityInfo>,
}

fn read_file(path: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|source| AnalyzerError::Io {
        path: path.to_string(),
        source,
    })
}

fn parse_json<T: DeserializeOwned>(content: &str, origin: &str) -> Result<T> {
    serde_json::from_str(content).map_err(|source| AnalyzerError::Feed {
        origin: origin.to_string(),
        source,
    })
}

/// Rows with an unparseable score are dropped so the rest of the feed stays usable.
pub fn rows_to_records(rows: Vec<ResultRow>) -> Vec<ExamRecord> {
    let total = rows.len();
    let records: Vec<ExamRecord> = rows
        .into_iter()
        .filter_map(|row| match row.into_record() {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("{}", err);
                None
            }
        })
        .collect();

    if records.len() < total {
        warn!(skipped = total - records.len(), "result rows skipped");
    }

    let malformed = malformed_labels(&records);
    if !malformed.is_empty() {
        warn!(count = malformed.len(), labels = ?malformed, "labels without a recognized shape are treated as ministerial");
    }
    records
}

/// Distinct labels that do not follow the `[prefix-]UPPERCASE_ALNUM` convention.
pub fn malformed_labels(records: &[ExamRecord]) -> BTreeSet<&str> {
    records
        .iter()
        .map(|record| record.label.as_str())
        .filter(|label| !is_well_formed_label(label))
        .collect()
}

pub fn parse_results(content: &str, origin: &str) -> Result<Vec<ExamRecord>> {
    let rows: Vec<ResultRow> = parse_json(content, origin)?;
    Ok(rows_to_records(rows))
}

pub fn parse_universities(content: &str, origin: &str) -> Result<Vec<UniversityInfo>> {
    let universities: Vec<UniversityInfo> = parse_json(content, origin)?;
    Ok(universities.into_iter().map(UniversityInfo::normalized).collect())
}

pub fn load_results_file(path: &str) -> Result<Vec<ExamRecord>> {
    parse_results(&read_file(path)?, path)
}

pub fn load_universities_file(path: &str) -> Result<Vec<UniversityInfo>> {
    parse_universities(&read_file(path)?, path)
}

pub fn load_submissions_file(path: &str) -> Result<Vec<SurveySubmission>> {
    parse_json(&read_file(path)?, path)
}

/// One username per line; blank lines are ignored.
pub fn load_usernames_file(path: &str) -> Result<Vec<String>> {
    Ok(read_file(path)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Write records back in the published feed shape.
pub fn write_results_file(path: &str, records: &[ExamRecord]) -> Result<()> {
    let rows: Vec<ResultRow> = records.iter().map(ExamRecord::to_row).collect();
    let content = serde_json::to_string_pretty(&rows).map_err(|source| AnalyzerError::Feed {
        origin: path.to_string(),
        source,
    })?;

    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| AnalyzerError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    fs::write(path, content).map_err(|source| AnalyzerError::Io {
        path: path.to_string(),
        source,
    })
}

/// Resolver over the embedded reference tables, or the replacements named in the config.
pub fn load_resolver(config: &Config) -> Result<UniversityResolver> {
    let references = match &config.enrollment_table {
        Some(path) => parse_enrollments(&read_file(path)?, path)?,
        None => builtin_enrollments()?,
    };
    let aliases = match &config.alias_table {
        Some(path) => AliasTable::from_toml(&read_file(path)?, path)?,
        None => AliasTable::builtin()?,
    };
    info!(universities = references.len(), aliases = aliases.entries.len(), "reference data loaded");
    Ok(UniversityResolver::new(references, aliases))
}

pub struct FeedLoader {
    client: reqwest::Client,
}

impl Default for FeedLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedLoader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        println!("🌐 Fetching data from: {}", url);

        let fetch_error = |reason: String| AnalyzerError::Fetch {
            url: url.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .timeout(FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|err| fetch_error(err.to_string()))?;

        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP request failed with status: {}", response.status())));
        }

        response
            .text()
            .await
            .map_err(|err| fetch_error(format!("failed to read response body: {}", err)))
    }

    pub async fn fetch_results(&self, url: &str) -> Result<Vec<ExamRecord>> {
        parse_results(&self.fetch(url).await?, url)
    }

    pub async fn fetch_universities(&self, url: &str) -> Result<Vec<UniversityInfo>> {
        parse_universities(&self.fetch(url).await?, url)
    }

    /// Load both feeds from the location selected by `data_source_mode`.
    pub async fn load(&self, config: &Config) -> Result<FeedData> {
        config.validate()?;

        let data = match config.data_source_mode {
            DataSourceMode::Local => {
                let results = config.results_path.as_deref().unwrap_or_default();
                let universities = config.universities_path.as_deref().unwrap_or_default();
                println!("📁 Reading feeds from {} and {}", results, universities);
                FeedData {
                    records: load_results_file(results)?,
                    universities: load_universities_file(universities)?,
                }
            }
            DataSourceMode::Internet => {
                let results = config.results_url.as_deref().unwrap_or_default();
                let universities = config.universities_url.as_deref().unwrap_or_default();
                let (records, universities) =
                    tokio::try_join!(self.fetch_results(results), self.fetch_universities(universities))?;
                FeedData { records, universities }
            }
        };

        info!(
            records = data.records.len(),
            universities = data.universities.len(),
            "feeds loaded"
        );
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Subject;
    use crate::source::Source;
    use pretty_assertions::assert_eq;

    #[test]
    fn bad_scores_are_dropped_not_fatal() {
        let json = r#"[
            {"etichetta":"A1","punteggio":"22.5","materia":"fisica","universita":{"nome":"P","id":"24"}},
            {"etichetta":"A1","punteggio":"assente","materia":"chimica","universita":{"nome":"P","id":"24"}}
        ]"#;
        let records = parse_results(json, "inline").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject, Subject::Physics);
    }

    #[test]
    fn odd_labels_load_as_ministerial() {
        let json = r#"[
            {"etichetta":"srv-abc","punteggio":"22.5","materia":"fisica","universita":{"nome":"P","id":"24"}},
            {"etichetta":"XYZ-9","punteggio":"21.0","materia":"fisica","universita":{"nome":"P","id":"24"}},
            {"etichetta":"LOGI-7F","punteggio":"19.0","materia":"fisica","universita":{"nome":"P","id":"24"}}
        ]"#;
        let records = parse_results(json, "inline").unwrap();
        assert_eq!(records.len(), 3);

        let malformed: Vec<&str> = malformed_labels(&records).into_iter().collect();
        assert_eq!(malformed, vec!["XYZ-9", "srv-abc"]);
        assert_eq!(records[0].source(), Source::Ministerial);
        assert_eq!(records[2].source(), Source::LogicaSurvey);
    }

    #[test]
    fn malformed_feed_is_an_error() {
        let err = parse_results("{\"not\":\"a list\"}", "inline").unwrap_err();
        assert!(matches!(err, AnalyzerError::Feed { .. }));
    }

    #[test]
    fn universities_feed_region_is_repaired() {
        let json = r#"[{"nome":"Università degli Studi di PAVIA","id":"22","region":"Lomabrdia"}]"#;
        let universities = parse_universities(json, "inline").unwrap();
        assert_eq!(universities[0].region, "Lombardia");
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_results_file("/nonexistent/data.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/data.json"));
    }
}
