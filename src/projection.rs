//! Scales sampled qualification rates up to the national population.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use tracing::debug;

use crate::models::{ProjectionMethod, StudentAggregate};
use crate::resolver::UniversityResolver;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Projection {
    pub estimated_qualified: u64,
    pub estimated_potential: u64,
    pub estimated_total_students: u64,
    /// Universities whose counts were scaled with enrollment data.
    pub covered_universities: usize,
}

impl Projection {
    /// Everyone who passed every exam taken so far, projected.
    pub fn estimated_eligible(&self) -> u64 {
        self.estimated_qualified + self.estimated_potential
    }
}

#[derive(Debug, Default)]
struct Tally {
    students: u64,
    qualified: u64,
    potential: u64,
}

impl Tally {
    fn add(&mut self, student: &StudentAggregate) {
        self.students += 1;
        if student.fully_qualified {
            self.qualified += 1;
        } else if student.all_completed_passed {
            self.potential += 1;
        }
    }
}

fn scale(count: u64, ratio: f64) -> u64 {
    (count as f64 * ratio).round() as u64
}

pub fn project(
    students: &[StudentAggregate],
    method: ProjectionMethod,
    resolver: &UniversityResolver,
) -> Projection {
    match method {
        ProjectionMethod::National => project_national(students, resolver.total_exam_registrants()),
        ProjectionMethod::PerUniversity => project_per_university(students, resolver),
    }
}

/// Apply the sample's national rates to every exam registrant.
pub fn project_national(students: &[StudentAggregate], total_registrants: u64) -> Projection {
    let mut tally = Tally::default();
    let mut universities = HashSet::new();
    for student in students {
        tally.add(student);
        universities.insert(student.university_name.as_str());
    }

    if tally.students == 0 {
        return Projection::default();
    }
    if total_registrants == 0 {
        debug!("no enrollment totals available, returning observed counts");
        return Projection {
            estimated_qualified: tally.qualified,
            estimated_potential: tally.potential,
            estimated_total_students: tally.students,
            covered_universities: 0,
        };
    }

    let qualified_rate = tally.qualified as f64 / tally.students as f64;
    let potential_rate = tally.potential as f64 / tally.students as f64;

    Projection {
        estimated_qualified: scale(total_registrants, qualified_rate),
        estimated_potential: scale(total_registrants, potential_rate),
        estimated_total_students: total_registrants,
        covered_universities: universities.len(),
    }
}

/// Scale each university by its own enrollment-to-sample ratio. Universities
/// without a reference row contribute their raw counts.
pub fn project_per_university(students: &[StudentAggregate], resolver: &UniversityResolver) -> Projection {
    // Keyed by reference id when resolvable so differently spelled names
    // of the same university are scaled together.
    let mut by_university: BTreeMap<(bool, String), (Tally, Option<u32>)> = BTreeMap::new();
    for student in students {
        let reference = resolver.lookup_university(&student.university_id, &student.university_name);
        let key = match reference {
            Some(reference) => (true, reference.id.clone()),
            None => (false, student.university_name.clone()),
        };
        let entry = by_university
            .entry(key)
            .or_insert_with(|| (Tally::default(), reference.and_then(|r| r.exam_registrants())));
        entry.0.add(student);
    }

    let mut projection = Projection::default();
    for ((_, university), (tally, enrollment)) in &by_university {
        match enrollment {
            Some(enrollment) if tally.students > 0 => {
                let ratio = *enrollment as f64 / tally.students as f64;
                projection.estimated_qualified += scale(tally.qualified, ratio);
                projection.estimated_potential += scale(tally.potential, ratio);
                projection.estimated_total_students += u64::from(*enrollment);
                projection.covered_universities += 1;
            }
            _ => {
                debug!(university = university.as_str(), "no enrollment data, using observed counts");
                projection.estimated_qualified += tally.qualified;
                projection.estimated_potential += tally.potential;
                projection.estimated_total_students += tally.students;
            }
        }
    }

    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrollmentReference;
    use crate::resolver::AliasTable;
    use pretty_assertions::assert_eq;

    fn student(label: &str, university: (&str, &str), passed: bool, complete: bool) -> StudentAggregate {
        StudentAggregate {
            label: label.to_string(),
            physics: Some(if passed { 20.0 } else { 10.0 }),
            chemistry: if complete { Some(20.0) } else { None },
            biology: if complete { Some(20.0) } else { None },
            average: Some(20.0),
            completed_exam_count: if complete { 3 } else { 1 },
            all_completed_passed: passed,
            fully_qualified: passed && complete,
            university_name: university.1.to_string(),
            university_id: university.0.to_string(),
            is_from_survey: false,
        }
    }

    fn resolver() -> UniversityResolver {
        let reference = |id: &str, name: &str, registrants: Option<u32>| EnrollmentReference {
            id: id.to_string(),
            name: name.to_string(),
            exam_registrants: registrants,
            course_registrants: None,
            available_seats: None,
        };
        UniversityResolver::new(
            vec![
                reference("24", "Università di PISA", Some(100)),
                reference("22", "Università degli Studi di PAVIA", Some(300)),
            ],
            AliasTable::default(),
        )
    }

    const PISA: (&str, &str) = ("24", "Università di PISA");
    const PAVIA: (&str, &str) = ("22", "Università degli Studi di PAVIA");
    const ELSEWHERE: (&str, &str) = ("XX", "Università di ALTROVE");

    #[test]
    fn national_method_applies_sample_rates() {
        let students = vec![
            student("A", PISA, true, true),
            student("B", PISA, true, false),
            student("C", PAVIA, false, true),
            student("D", PAVIA, true, true),
        ];
        let projection = project(&students, ProjectionMethod::National, &resolver());

        assert_eq!(projection.estimated_qualified, 200);
        assert_eq!(projection.estimated_potential, 100);
        assert_eq!(projection.estimated_total_students, 400);
        assert_eq!(projection.estimated_eligible(), 300);
    }

    #[test]
    fn national_method_without_students_is_zero() {
        assert_eq!(project(&[], ProjectionMethod::National, &resolver()), Projection::default());
    }

    #[test]
    fn national_method_without_enrollment_returns_observed_counts() {
        let students = vec![student("A", PISA, true, true), student("B", PISA, true, false)];
        let projection = project_national(&students, 0);
        assert_eq!(projection.estimated_qualified, 1);
        assert_eq!(projection.estimated_potential, 1);
        assert_eq!(projection.estimated_total_students, 2);
    }

    #[test]
    fn per_university_method_scales_each_university() {
        let students = vec![
            student("A", PISA, true, true),
            student("B", PISA, false, true),
            student("C", PAVIA, true, false),
            student("D", ELSEWHERE, true, true),
            student("E", ELSEWHERE, true, false),
        ];
        let projection = project(&students, ProjectionMethod::PerUniversity, &resolver());

        // Pisa: 1 of 2 qualified scaled to 100 registrants -> 50.
        // Pavia: 1 of 1 potential scaled to 300 -> 300.
        // Elsewhere has no reference and contributes 1 + 1 raw.
        assert_eq!(projection.estimated_qualified, 51);
        assert_eq!(projection.estimated_potential, 301);
        assert_eq!(projection.estimated_total_students, 402);
        assert_eq!(projection.covered_universities, 2);
    }

    #[test]
    fn per_university_groups_by_resolved_reference() {
        let students = vec![
            student("A", PISA, true, true),
            student("B", ("", "UNIVERSITA' DI PISA"), true, true),
        ];
        let projection = project(&students, ProjectionMethod::PerUniversity, &resolver());
        assert_eq!(projection.estimated_qualified, 100);
        assert_eq!(projection.covered_universities, 1);
    }
}
