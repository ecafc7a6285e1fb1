//! Whole-pipeline recomputation.
//!
//! A [`Snapshot`] is a pure function of the exam records, the universities
//! feed, the reference tables and [`PipelineOptions`]. It is rebuilt from
//! scratch on every refresh and never mutated afterwards.

use serde::Serialize;
use tracing::{debug, info};

use crate::aggregate::{aggregate_regions, aggregate_students, aggregate_universities, global_summary};
use crate::coverage::{CoverageBreakdown, CoverageEstimator};
use crate::models::{
    Config, ExamRecord, GlobalSummary, ProjectionMethod, RegionAggregate, StudentAggregate,
    UniversityEntity, UniversityInfo, NATIONAL_SEATS,
};
use crate::projection::{project, Projection};
use crate::resolver::UniversityResolver;
use crate::simulation::{AdmissionSimulator, NationalCutoff, UniversityCutoff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PipelineOptions {
    pub include_survey_data: bool,
    pub projection_method: ProjectionMethod,
    pub national_seats: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            include_survey_data: true,
            projection_method: ProjectionMethod::PerUniversity,
            national_seats: NATIONAL_SEATS,
        }
    }
}

impl From<&Config> for PipelineOptions {
    fn from(config: &Config) -> Self {
        Self {
            include_survey_data: config.include_survey_data,
            projection_method: config.projection_method,
            national_seats: config.national_seats,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub options: PipelineOptions,
    pub students: Vec<StudentAggregate>,
    pub universities: Vec<UniversityEntity>,
    pub regions: Vec<RegionAggregate>,
    pub summary: GlobalSummary,
    /// Projection with the configured method.
    pub projection: Projection,
    /// National-method projection, which drives the national cutoff.
    pub national_projection: Projection,
    pub national_cutoff: Option<NationalCutoff>,
    pub university_cutoffs: Vec<UniversityCutoff>,
}

fn is_survey_record(record: &ExamRecord) -> bool {
    record.from_survey || record.source().is_survey()
}

impl Snapshot {
    pub fn build(
        records: &[ExamRecord],
        universities: &[UniversityInfo],
        resolver: &UniversityResolver,
        options: PipelineOptions,
    ) -> Self {
        let included: Vec<ExamRecord> = if options.include_survey_data {
            records.to_vec()
        } else {
            records.iter().filter(|r| !is_survey_record(r)).cloned().collect()
        };
        debug!(
            total = records.len(),
            included = included.len(),
            "records selected for aggregation"
        );

        let students = aggregate_students(&included);
        let mut entities = aggregate_universities(&students, universities);
        CoverageEstimator::new(resolver).apply(&mut entities);
        let regions = aggregate_regions(&entities);
        let summary = global_summary(included.len(), &students, &entities, options.national_seats);

        let projection = project(&students, options.projection_method, resolver);
        let national_projection = project(&students, ProjectionMethod::National, resolver);

        let simulator = AdmissionSimulator::new(&students, resolver);
        let national_cutoff = simulator.national_cutoff(&national_projection, options.national_seats);
        let university_cutoffs = simulator.all_university_cutoffs();

        info!(
            students = students.len(),
            universities = entities.len(),
            fully_qualified = summary.fully_qualified_count,
            "snapshot built"
        );

        Self {
            options,
            students,
            universities: entities,
            regions,
            summary,
            projection,
            national_projection,
            national_cutoff,
            university_cutoffs,
        }
    }

    /// Simulator over this snapshot's students, for on-demand candidate checks.
    pub fn simulator<'a>(&self, resolver: &'a UniversityResolver) -> AdmissionSimulator<'a> {
        AdmissionSimulator::new(&self.students, resolver)
    }

    pub fn university(&self, id: &str) -> Option<&UniversityEntity> {
        self.universities.iter().find(|u| u.id == id)
    }

    pub fn cutoff(&self, university_id: &str) -> Option<&UniversityCutoff> {
        self.university_cutoffs.iter().find(|c| c.university_id == university_id)
    }

    pub fn coverage_breakdown(&self, resolver: &UniversityResolver, university_id: &str) -> Option<CoverageBreakdown> {
        let entity = self.university(university_id)?;
        CoverageEstimator::new(resolver).breakdown(entity)
    }
}
