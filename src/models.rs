use serde::{Deserialize, Serialize};

use crate::error::{AnalyzerError, Result};
use crate::source::Source;

/// A score at or above this value rounds to the official pass mark of 18.
pub const PASS_THRESHOLD: f64 = 17.5;

/// Seats available nationally for this admission round.
pub const NATIONAL_SEATS: u32 = 19196;

pub const DEFAULT_RESULTS_URL: &str = "https://graduatoriasemestrefiltro.github.io/data.json";
pub const DEFAULT_UNIVERSITIES_URL: &str =
    "https://graduatoriasemestrefiltro.github.io/universities.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Data source configuration
    pub data_source_mode: DataSourceMode,
    pub results_path: Option<String>,
    pub universities_path: Option<String>,
    pub results_url: Option<String>,
    pub universities_url: Option<String>,
    // Replacements for the embedded reference tables
    pub enrollment_table: Option<String>,
    pub alias_table: Option<String>,
    // Pipeline toggles
    pub include_survey_data: bool,
    pub projection_method: ProjectionMethod,
    pub national_seats: u32,
    pub output_directory: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataSourceMode {
    #[serde(rename = "local")]
    Local,
    #[serde(rename = "internet")]
    Internet,
}

/// How sampled qualification rates are scaled to the national population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectionMethod {
    #[serde(rename = "national")]
    National,
    #[serde(rename = "per-university")]
    PerUniversity,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_source_mode: DataSourceMode::Local,
            results_path: Some("data-source/data.json".to_string()),
            universities_path: Some("data-source/universities.json".to_string()),
            results_url: Some(DEFAULT_RESULTS_URL.to_string()),
            universities_url: Some(DEFAULT_UNIVERSITIES_URL.to_string()),
            enrollment_table: None,
            alias_table: None,
            include_survey_data: true,
            projection_method: ProjectionMethod::PerUniversity,
            national_seats: NATIONAL_SEATS,
            output_directory: Some("output".to_string()),
        }
    }
}

impl Config {
    pub fn load_from_file(file_path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(file_path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, file_path: &str) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(file_path, content)?;
        Ok(())
    }

    /// Check that the selected data source mode has the locations it needs.
    pub fn validate(&self) -> Result<()> {
        if self.national_seats == 0 {
            return Err(AnalyzerError::InvalidConfig {
                field: "national_seats".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        let (results, universities, prefix) = match self.data_source_mode {
            DataSourceMode::Local => (&self.results_path, &self.universities_path, "path"),
            DataSourceMode::Internet => (&self.results_url, &self.universities_url, "url"),
        };

        if results.as_deref().map_or(true, str::is_empty) {
            return Err(AnalyzerError::InvalidConfig {
                field: format!("results_{}", prefix),
                reason: "required by the selected data_source_mode".to_string(),
            });
        }
        if universities.as_deref().map_or(true, str::is_empty) {
            return Err(AnalyzerError::InvalidConfig {
                field: format!("universities_{}", prefix),
                reason: "required by the selected data_source_mode".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Subject {
    #[serde(rename = "fisica")]
    Physics,
    #[serde(rename = "chimica")]
    Chemistry,
    #[serde(rename = "biologia")]
    Biology,
}

impl Subject {
    pub const ALL: [Subject; 3] = [Subject::Physics, Subject::Chemistry, Subject::Biology];

    pub fn feed_name(&self) -> &'static str {
        match self {
            Subject::Physics => "fisica",
            Subject::Chemistry => "chimica",
            Subject::Biology => "biologia",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UniversityRef {
    #[serde(rename = "nome")]
    pub name: String,
    pub id: String,
}

/// One row of the results feed, exactly as published.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    #[serde(rename = "etichetta")]
    pub label: String,
    #[serde(rename = "punteggio")]
    pub score: String,
    #[serde(rename = "materia")]
    pub subject: Subject,
    #[serde(default)]
    pub is_from_survey: bool,
    #[serde(rename = "universita")]
    pub university: UniversityRef,
}

impl ResultRow {
    pub fn numeric_score(&self) -> Option<f64> {
        self.score
            .trim()
            .replace(',', ".")
            .parse::<f64>()
            .ok()
            .filter(|score| score.is_finite())
    }

    pub fn into_record(self) -> Result<ExamRecord> {
        let score = self.numeric_score().ok_or_else(|| AnalyzerError::InvalidScore {
            label: self.label.clone(),
            value: self.score.clone(),
        })?;

        Ok(ExamRecord {
            label: self.label,
            score,
            subject: self.subject,
            university: self.university,
            from_survey: self.is_from_survey,
        })
    }
}

/// A single parsed exam result. At most one per (label, subject).
#[derive(Debug, Clone, PartialEq)]
pub struct ExamRecord {
    pub label: String,
    pub score: f64,
    pub subject: Subject,
    pub university: UniversityRef,
    pub from_survey: bool,
}

impl ExamRecord {
    pub fn to_row(&self) -> ResultRow {
        ResultRow {
            label: self.label.clone(),
            score: format!("{:.2}", self.score),
            subject: self.subject,
            is_from_survey: self.from_survey,
            university: self.university.clone(),
        }
    }

    pub fn source(&self) -> Source {
        Source::from_label(&self.label)
    }
}

/// University identity record from the universities feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversityInfo {
    #[serde(rename = "nome")]
    pub name: String,
    pub id: String,
    pub region: String,
}

impl UniversityInfo {
    /// Repair the known upstream typo in region names.
    pub fn normalized(mut self) -> Self {
        if self.region == "Lomabrdia" {
            self.region = "Lombardia".to_string();
        }
        self
    }
}

/// Static enrollment and seat-capacity reference row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentReference {
    pub id: String,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "iscrittiAppello")]
    pub exam_registrants: Option<u32>,
    #[serde(rename = "iscrittiCorso")]
    pub course_registrants: Option<u32>,
    #[serde(rename = "postiDisponibili")]
    pub available_seats: Option<u32>,
}

impl EnrollmentReference {
    /// Exam registrants, treating zero as missing.
    pub fn exam_registrants(&self) -> Option<u32> {
        self.exam_registrants.filter(|count| *count > 0)
    }

    pub fn available_seats(&self) -> Option<u32> {
        self.available_seats.filter(|count| *count > 0)
    }

    /// Course registrants per available seat; higher means more oversubscribed.
    pub fn attractiveness(&self) -> Option<f64> {
        match (self.course_registrants, self.available_seats()) {
            (Some(course), Some(seats)) => Some(course as f64 / seats as f64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Outcome {
    FullyQualified,
    PotentiallyQualified,
    NotQualified,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentAggregate {
    pub label: String,
    pub physics: Option<f64>,
    pub chemistry: Option<f64>,
    pub biology: Option<f64>,
    pub average: Option<f64>,
    pub completed_exam_count: u8,
    pub all_completed_passed: bool,
    pub fully_qualified: bool,
    pub university_name: String,
    pub university_id: String,
    pub is_from_survey: bool,
}

impl StudentAggregate {
    pub fn score(&self, subject: Subject) -> Option<f64> {
        match subject {
            Subject::Physics => self.physics,
            Subject::Chemistry => self.chemistry,
            Subject::Biology => self.biology,
        }
    }

    pub fn source(&self) -> Source {
        Source::from_label(&self.label)
    }

    /// Passed everything taken so far but has not completed all three exams.
    pub fn is_potentially_qualified(&self) -> bool {
        self.all_completed_passed && !self.fully_qualified
    }

    pub fn outcome(&self) -> Outcome {
        if self.fully_qualified {
            Outcome::FullyQualified
        } else if self.all_completed_passed {
            Outcome::PotentiallyQualified
        } else {
            Outcome::NotQualified
        }
    }
}

/// Exam counts per provenance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceBreakdown {
    pub ministerial: usize,
    pub internal_survey: usize,
    pub unimi_survey: usize,
    pub logica_survey: usize,
}

impl SourceBreakdown {
    pub fn add(&mut self, source: Source, count: usize) {
        match source {
            Source::Ministerial => self.ministerial += count,
            Source::InternalSurvey => self.internal_survey += count,
            Source::UnimiSurvey => self.unimi_survey += count,
            Source::LogicaSurvey => self.logica_survey += count,
        }
    }

    pub fn get(&self, source: Source) -> usize {
        match source {
            Source::Ministerial => self.ministerial,
            Source::InternalSurvey => self.internal_survey,
            Source::UnimiSurvey => self.unimi_survey,
            Source::LogicaSurvey => self.logica_survey,
        }
    }

    pub fn surveys(&self) -> usize {
        self.internal_survey + self.unimi_survey + self.logica_survey
    }

    pub fn total(&self) -> usize {
        self.ministerial + self.surveys()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniversityEntity {
    pub id: String,
    pub name: String,
    pub region: String,
    pub has_physics: bool,
    pub has_chemistry: bool,
    pub has_biology: bool,
    pub physics_count: usize,
    pub chemistry_count: usize,
    pub biology_count: usize,
    pub student_count: usize,
    pub average_of_student_averages: f64,
    pub fully_qualified_count: usize,
    pub potentially_qualified_count: usize,
    pub not_qualified_count: usize,
    pub source_breakdown: SourceBreakdown,
    pub is_from_survey: bool,
    pub coverage_percent: Option<f64>,
}

impl UniversityEntity {
    pub fn new(info: &UniversityInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            region: info.region.clone(),
            has_physics: false,
            has_chemistry: false,
            has_biology: false,
            physics_count: 0,
            chemistry_count: 0,
            biology_count: 0,
            student_count: 0,
            average_of_student_averages: 0.0,
            fully_qualified_count: 0,
            potentially_qualified_count: 0,
            not_qualified_count: 0,
            source_breakdown: SourceBreakdown::default(),
            is_from_survey: false,
            coverage_percent: None,
        }
    }

    /// Exams collected across the three subjects.
    pub fn exam_count(&self) -> usize {
        self.physics_count + self.chemistry_count + self.biology_count
    }

    pub fn has_all_subjects(&self) -> bool {
        self.has_physics && self.has_chemistry && self.has_biology
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionAggregate {
    pub name: String,
    pub university_count: usize,
    pub student_count: usize,
    pub average_score: f64,
    pub fully_qualified_count: usize,
    pub potentially_qualified_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalSummary {
    pub total_spots: u32,
    pub total_universities: usize,
    pub fully_qualified_count: usize,
    pub almost_qualified_count: usize,
    pub remaining_spots: i64,
    pub universities_with_official_data: usize,
    pub universities_complete: usize,
    pub universities_from_survey: usize,
    pub total_result_count: usize,
    pub unique_student_count: usize,
    pub average_of_averages: f64,
}
