//! How much of each university's expected exam volume the collected data covers.

use serde::Serialize;

use crate::models::{EnrollmentReference, UniversityEntity};
use crate::resolver::UniversityResolver;
use crate::source::Source;

/// Every registrant sits three exams.
pub const EXAMS_PER_STUDENT: u64 = 3;

/// Below this share of expected exams, official data is too thin to report in exam units.
pub const MINISTERIAL_COVERAGE_THRESHOLD: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CoverageUnit {
    Exams,
    Students,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceShare {
    pub source: Source,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageBreakdown {
    pub unit: CoverageUnit,
    pub expected: u64,
    pub collected: u64,
    pub uncovered: u64,
    pub ministerial_coverage_percent: f64,
    /// Non-empty sources, largest share first.
    pub sources: Vec<SourceShare>,
}

pub fn expected_exam_count(reference: &EnrollmentReference) -> u64 {
    reference
        .exam_registrants()
        .map(|count| count as u64 * EXAMS_PER_STUDENT)
        .unwrap_or(0)
}

/// Collected exams as a percentage of expected exams, capped at 100.
pub fn coverage_percent(entity: &UniversityEntity, reference: &EnrollmentReference) -> f64 {
    let expected = expected_exam_count(reference);
    if expected == 0 {
        return 0.0;
    }
    (entity.exam_count() as f64 / expected as f64 * 100.0).min(100.0)
}

/// Share of expected exams backed by ministerial records.
pub fn ministerial_coverage_percent(entity: &UniversityEntity, reference: &EnrollmentReference) -> f64 {
    let expected = expected_exam_count(reference);
    if expected == 0 {
        return 0.0;
    }
    entity.source_breakdown.ministerial as f64 / expected as f64 * 100.0
}

pub struct CoverageEstimator<'a> {
    resolver: &'a UniversityResolver,
}

impl<'a> CoverageEstimator<'a> {
    pub fn new(resolver: &'a UniversityResolver) -> Self {
        Self { resolver }
    }

    /// A reference row without exam registrants carries no enrollment data.
    fn reference(&self, entity: &UniversityEntity) -> Option<&'a EnrollmentReference> {
        self.resolver
            .lookup_university(&entity.id, &entity.name)
            .filter(|reference| reference.exam_registrants().is_some())
    }

    /// `None` when the university has no enrollment reference or no registrant count.
    pub fn coverage(&self, entity: &UniversityEntity) -> Option<f64> {
        self.reference(entity).map(|reference| coverage_percent(entity, reference))
    }

    pub fn apply(&self, entities: &mut [UniversityEntity]) {
        for entity in entities.iter_mut() {
            entity.coverage_percent = self.coverage(entity);
        }
    }

    /// Per-source coverage, in exam units when official data is substantial,
    /// otherwise converted to students to avoid double-counting overlaps.
    pub fn breakdown(&self, entity: &UniversityEntity) -> Option<CoverageBreakdown> {
        let reference = self.reference(entity)?;
        let expected_exams = expected_exam_count(reference);
        let ministerial_coverage = ministerial_coverage_percent(entity, reference);

        let unit = if ministerial_coverage >= MINISTERIAL_COVERAGE_THRESHOLD {
            CoverageUnit::Exams
        } else {
            CoverageUnit::Students
        };

        let total_exams = entity.exam_count();
        let students_per_exam = if total_exams > 0 {
            entity.student_count as f64 / total_exams as f64
        } else {
            0.0
        };
        let scale = |exams: usize| -> usize {
            match unit {
                CoverageUnit::Exams => exams,
                CoverageUnit::Students => (exams as f64 * students_per_exam).round() as usize,
            }
        };

        let (expected, collected) = match unit {
            CoverageUnit::Exams => (expected_exams, total_exams as u64),
            CoverageUnit::Students => (expected_exams / EXAMS_PER_STUDENT, entity.student_count as u64),
        };

        let mut sources: Vec<SourceShare> = Source::ALL
            .iter()
            .map(|source| {
                let count = scale(entity.source_breakdown.get(*source));
                let percentage = if expected > 0 {
                    count as f64 / expected as f64 * 100.0
                } else {
                    0.0
                };
                SourceShare {
                    source: *source,
                    count,
                    percentage,
                }
            })
            .filter(|share| share.count > 0)
            .collect();
        sources.sort_by(|a, b| {
            b.percentage
                .partial_cmp(&a.percentage)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Some(CoverageBreakdown {
            unit,
            expected,
            collected,
            uncovered: expected.saturating_sub(collected),
            ministerial_coverage_percent: ministerial_coverage,
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceBreakdown, UniversityInfo};
    use crate::resolver::{AliasTable, UniversityResolver};
    use pretty_assertions::assert_eq;

    fn resolver() -> UniversityResolver {
        let references = vec![
            EnrollmentReference {
                id: "24".to_string(),
                name: "Università di PISA".to_string(),
                exam_registrants: Some(100),
                course_registrants: Some(150),
                available_seats: Some(40),
            },
            EnrollmentReference {
                id: "99".to_string(),
                name: "Università di NESSUNO".to_string(),
                exam_registrants: None,
                course_registrants: None,
                available_seats: None,
            },
        ];
        UniversityResolver::new(references, AliasTable::default())
    }

    fn entity(id: &str, name: &str, breakdown: SourceBreakdown, students: usize) -> UniversityEntity {
        let mut entity = UniversityEntity::new(&UniversityInfo {
            name: name.to_string(),
            id: id.to_string(),
            region: "Toscana".to_string(),
        });
        entity.source_breakdown = breakdown;
        entity.physics_count = breakdown.total();
        entity.student_count = students;
        entity
    }

    #[test]
    fn coverage_is_capped_and_none_without_reference() {
        let resolver = resolver();
        let estimator = CoverageEstimator::new(&resolver);

        let partial = entity("24", "Università di PISA", SourceBreakdown { ministerial: 60, ..Default::default() }, 30);
        assert!((estimator.coverage(&partial).unwrap() - 20.0).abs() < 1e-9);

        let overfull = entity("24", "Università di PISA", SourceBreakdown { ministerial: 500, ..Default::default() }, 200);
        assert_eq!(estimator.coverage(&overfull), Some(100.0));

        let unknown = entity("77", "Università di ALTROVE", SourceBreakdown::default(), 0);
        assert_eq!(estimator.coverage(&unknown), None);

        let no_registrants = entity("99", "Università di NESSUNO", SourceBreakdown::default(), 0);
        assert_eq!(estimator.coverage(&no_registrants), None);
        assert_eq!(estimator.breakdown(&no_registrants), None);

        let empty = entity("24", "Università di PISA", SourceBreakdown::default(), 0);
        assert_eq!(estimator.coverage(&empty), Some(0.0));
    }

    #[test]
    fn thin_official_data_switches_to_student_units() {
        let resolver = resolver();
        let estimator = CoverageEstimator::new(&resolver);
        // 300 expected exams; 6 ministerial exams is 2%.
        let uni = entity(
            "24",
            "Università di PISA",
            SourceBreakdown {
                ministerial: 6,
                internal_survey: 54,
                ..Default::default()
            },
            20,
        );
        let breakdown = estimator.breakdown(&uni).unwrap();

        assert_eq!(breakdown.unit, CoverageUnit::Students);
        assert_eq!(breakdown.expected, 100);
        assert_eq!(breakdown.collected, 20);
        assert_eq!(breakdown.uncovered, 80);
        assert_eq!(breakdown.sources[0].source, Source::InternalSurvey);
        assert_eq!(breakdown.sources[0].count, 18);
        assert_eq!(breakdown.sources[1].count, 2);
    }

    #[test]
    fn substantial_official_data_stays_in_exam_units() {
        let resolver = resolver();
        let estimator = CoverageEstimator::new(&resolver);
        let uni = entity(
            "24",
            "Università di PISA",
            SourceBreakdown {
                ministerial: 30,
                logica_survey: 9,
                ..Default::default()
            },
            15,
        );
        let breakdown = estimator.breakdown(&uni).unwrap();

        assert_eq!(breakdown.unit, CoverageUnit::Exams);
        assert_eq!(breakdown.expected, 300);
        assert_eq!(breakdown.collected, 39);
        assert!((breakdown.ministerial_coverage_percent - 10.0).abs() < 1e-9);
        assert_eq!(breakdown.sources.len(), 2);
    }
}
