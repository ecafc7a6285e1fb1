use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::models::{
    ExamRecord, GlobalSummary, Outcome, RegionAggregate, StudentAggregate, Subject,
    UniversityEntity, UniversityInfo, PASS_THRESHOLD,
};
use crate::resolver::strip_accents;

/// Fold per-exam records into one aggregate per student label.
/// Output keeps the order in which labels were first seen.
pub fn aggregate_students(records: &[ExamRecord]) -> Vec<StudentAggregate> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut students: Vec<StudentAggregate> = Vec::new();

    for record in records {
        let slot = *index.entry(record.label.as_str()).or_insert_with(|| {
            students.push(StudentAggregate {
                label: record.label.clone(),
                physics: None,
                chemistry: None,
                biology: None,
                average: None,
                completed_exam_count: 0,
                all_completed_passed: true,
                fully_qualified: false,
                university_name: record.university.name.clone(),
                university_id: record.university.id.clone(),
                is_from_survey: false,
            });
            students.len() - 1
        });

        let student = &mut students[slot];
        let score_slot = match record.subject {
            Subject::Physics => &mut student.physics,
            Subject::Chemistry => &mut student.chemistry,
            Subject::Biology => &mut student.biology,
        };
        if score_slot.is_some() {
            debug!(label = %record.label, subject = ?record.subject, "duplicate subject, keeping the latest score");
        }
        *score_slot = Some(record.score);

        // A failed exam stays failed even if a later duplicate overwrites it.
        if record.score < PASS_THRESHOLD {
            student.all_completed_passed = false;
        }
        student.university_name = record.university.name.clone();
        student.university_id = record.university.id.clone();
        if record.from_survey {
            student.is_from_survey = true;
        }
    }

    for student in students.iter_mut() {
        let scores: Vec<f64> = Subject::ALL.iter().filter_map(|s| student.score(*s)).collect();
        student.completed_exam_count = scores.len() as u8;
        student.average = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        };
        student.fully_qualified = student.completed_exam_count == 3 && student.all_completed_passed;
    }

    students
}

/// Accent- and case-insensitive ordering, close enough to Italian collation for names.
pub fn italian_cmp(a: &str, b: &str) -> Ordering {
    let key = |s: &str| strip_accents(&s.to_uppercase());
    key(a).cmp(&key(b)).then_with(|| a.cmp(b))
}

/// One entity per known university, folded with the students that belong to it.
pub fn aggregate_universities(
    students: &[StudentAggregate],
    universities: &[UniversityInfo],
) -> Vec<UniversityEntity> {
    let mut entities: Vec<UniversityEntity> = universities
        .iter()
        .cloned()
        .map(|info| UniversityEntity::new(&info.normalized()))
        .collect();

    let by_id: HashMap<String, usize> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| (e.id.clone(), i))
        .collect();
    let by_name: HashMap<String, usize> = entities
        .iter()
        .enumerate()
        .map(|(i, e)| (e.name.clone(), i))
        .collect();

    let mut survey_exams: Vec<usize> = vec![0; entities.len()];
    let mut unmatched = 0usize;

    for student in students {
        let Some(&slot) = by_id
            .get(&student.university_id)
            .or_else(|| by_name.get(&student.university_name))
        else {
            unmatched += 1;
            continue;
        };
        let Some(average) = student.average else {
            continue;
        };

        let entity = &mut entities[slot];

        // Mean of student means: each student weighs the same regardless of exams taken.
        let count = entity.student_count as f64;
        entity.average_of_student_averages =
            (entity.average_of_student_averages * count + average) / (count + 1.0);
        entity.student_count += 1;

        if student.physics.is_some() {
            entity.has_physics = true;
            entity.physics_count += 1;
        }
        if student.chemistry.is_some() {
            entity.has_chemistry = true;
            entity.chemistry_count += 1;
        }
        if student.biology.is_some() {
            entity.has_biology = true;
            entity.biology_count += 1;
        }

        match student.outcome() {
            Outcome::FullyQualified => entity.fully_qualified_count += 1,
            Outcome::PotentiallyQualified => entity.potentially_qualified_count += 1,
            Outcome::NotQualified => entity.not_qualified_count += 1,
        }

        let exams = student.completed_exam_count as usize;
        entity.source_breakdown.add(student.source(), exams);
        if student.is_from_survey {
            survey_exams[slot] += exams;
        }
    }

    if unmatched > 0 {
        warn!(unmatched, "students whose university is missing from the universities feed");
    }

    for (entity, survey) in entities.iter_mut().zip(survey_exams) {
        let exams = entity.exam_count();
        entity.is_from_survey = exams > 0 && survey as f64 / exams as f64 >= 0.5;
    }

    entities.sort_by(|a, b| match (a.student_count > 0, b.student_count > 0) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (true, true) => b
            .average_of_student_averages
            .partial_cmp(&a.average_of_student_averages)
            .unwrap_or(Ordering::Equal),
        (false, false) => italian_cmp(&a.region, &b.region).then_with(|| italian_cmp(&a.name, &b.name)),
    });

    entities
}

/// Fold universities with data into per-region totals, in order of first appearance.
pub fn aggregate_regions(universities: &[UniversityEntity]) -> Vec<RegionAggregate> {
    let mut regions: Vec<RegionAggregate> = Vec::new();

    for uni in universities.iter().filter(|u| u.student_count > 0) {
        let region = match regions.iter().position(|r| r.name == uni.region) {
            Some(i) => &mut regions[i],
            None => {
                regions.push(RegionAggregate {
                    name: uni.region.clone(),
                    university_count: 0,
                    student_count: 0,
                    average_score: 0.0,
                    fully_qualified_count: 0,
                    potentially_qualified_count: 0,
                });
                let last = regions.len() - 1;
                &mut regions[last]
            }
        };

        let existing = region.student_count as f64;
        let added = uni.student_count as f64;
        region.average_score =
            (region.average_score * existing + uni.average_of_student_averages * added) / (existing + added);
        region.university_count += 1;
        region.student_count += uni.student_count;
        region.fully_qualified_count += uni.fully_qualified_count;
        region.potentially_qualified_count += uni.potentially_qualified_count;
    }

    regions
}

pub fn global_summary(
    result_count: usize,
    students: &[StudentAggregate],
    universities: &[UniversityEntity],
    total_spots: u32,
) -> GlobalSummary {
    let fully_qualified_count = students.iter().filter(|s| s.fully_qualified).count();
    let almost_qualified_count = students.iter().filter(|s| s.is_potentially_qualified()).count();

    let averages: Vec<f64> = students.iter().filter_map(|s| s.average).collect();
    let average_of_averages = if averages.is_empty() {
        0.0
    } else {
        averages.iter().sum::<f64>() / averages.len() as f64
    };

    GlobalSummary {
        total_spots,
        total_universities: universities.len(),
        fully_qualified_count,
        almost_qualified_count,
        remaining_spots: total_spots as i64 - fully_qualified_count as i64,
        universities_with_official_data: universities
            .iter()
            .filter(|u| u.student_count > 0 && !u.is_from_survey)
            .count(),
        universities_complete: universities
            .iter()
            .filter(|u| u.has_all_subjects() && !u.is_from_survey)
            .count(),
        universities_from_survey: universities
            .iter()
            .filter(|u| u.student_count > 0 && u.is_from_survey)
            .count(),
        total_result_count: result_count,
        unique_student_count: students.len(),
        average_of_averages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UniversityRef;
    use pretty_assertions::assert_eq;

    fn record(label: &str, subject: Subject, score: f64, uni: &str) -> ExamRecord {
        ExamRecord {
            label: label.to_string(),
            score,
            subject,
            university: UniversityRef {
                name: format!("Università {}", uni),
                id: uni.to_string(),
            },
            from_survey: label.starts_with("SRV-"),
        }
    }

    fn info(id: &str, region: &str) -> UniversityInfo {
        UniversityInfo {
            name: format!("Università {}", id),
            id: id.to_string(),
            region: region.to_string(),
        }
    }

    #[test]
    fn averages_only_completed_subjects() {
        let students = aggregate_students(&[
            record("A1", Subject::Physics, 20.0, "01"),
            record("A1", Subject::Biology, 16.0, "01"),
        ]);
        let student = &students[0];

        assert_eq!(student.average, Some(18.0));
        assert_eq!(student.completed_exam_count, 2);
        assert_eq!(student.chemistry, None);
        // 16 is below the 17.5 pass mark.
        assert!(!student.all_completed_passed);
        assert!(!student.fully_qualified);
    }

    #[test]
    fn seventeen_and_a_half_counts_as_passing() {
        let students = aggregate_students(&[
            record("B2", Subject::Physics, 17.5, "01"),
            record("B2", Subject::Chemistry, 24.0, "01"),
            record("B2", Subject::Biology, 30.0, "01"),
        ]);
        assert!(students[0].all_completed_passed);
        assert!(students[0].fully_qualified);
        assert_eq!(students[0].outcome(), Outcome::FullyQualified);
    }

    #[test]
    fn fully_qualified_iff_three_passed_exams() {
        let records = vec![
            record("C1", Subject::Physics, 20.0, "01"),
            record("C1", Subject::Chemistry, 21.0, "01"),
            record("C2", Subject::Physics, 10.0, "01"),
            record("C2", Subject::Chemistry, 21.0, "01"),
            record("C2", Subject::Biology, 22.0, "01"),
            record("C3", Subject::Physics, 18.0, "02"),
            record("C3", Subject::Chemistry, 19.0, "02"),
            record("C3", Subject::Biology, 25.0, "02"),
        ];
        for student in aggregate_students(&records) {
            assert_eq!(
                student.fully_qualified,
                student.completed_exam_count == 3 && student.all_completed_passed
            );
        }
    }

    #[test]
    fn keeps_first_seen_order_and_survey_flag() {
        let students = aggregate_students(&[
            record("Z9", Subject::Physics, 20.0, "01"),
            record("SRV-A", Subject::Physics, 20.0, "02"),
            record("Z9", Subject::Chemistry, 20.0, "01"),
        ]);
        let labels: Vec<&str> = students.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["Z9", "SRV-A"]);
        assert!(!students[0].is_from_survey);
        assert!(students[1].is_from_survey);
    }

    #[test]
    fn duplicate_subject_keeps_latest_score_but_remembers_failure() {
        let students = aggregate_students(&[
            record("D1", Subject::Physics, 12.0, "01"),
            record("D1", Subject::Physics, 26.0, "01"),
        ]);
        assert_eq!(students[0].physics, Some(26.0));
        assert_eq!(students[0].completed_exam_count, 1);
        assert!(!students[0].all_completed_passed);
    }

    #[test]
    fn aggregation_is_idempotent() {
        let records = vec![
            record("E1", Subject::Physics, 20.0, "01"),
            record("E1", Subject::Biology, 23.0, "01"),
            record("E2", Subject::Chemistry, 15.0, "02"),
        ];
        let unis = vec![info("01", "Marche"), info("02", "Puglia")];

        let first = aggregate_students(&records);
        let second = aggregate_students(&records);
        assert_eq!(first, second);
        assert_eq!(aggregate_universities(&first, &unis), aggregate_universities(&second, &unis));
    }

    #[test]
    fn university_average_is_mean_of_student_means() {
        let students = aggregate_students(&[
            record("F1", Subject::Physics, 30.0, "01"),
            record("F1", Subject::Chemistry, 30.0, "01"),
            record("F1", Subject::Biology, 30.0, "01"),
            record("F2", Subject::Physics, 18.0, "01"),
        ]);
        let unis = aggregate_universities(&students, &[info("01", "Marche")]);

        assert_eq!(unis[0].student_count, 2);
        assert_eq!(unis[0].average_of_student_averages, 24.0);
        assert_eq!(unis[0].exam_count(), 4);
        assert_eq!(unis[0].physics_count, 2);
        assert!(unis[0].has_all_subjects());
        assert_eq!(unis[0].fully_qualified_count, 1);
        assert_eq!(unis[0].potentially_qualified_count, 1);
    }

    #[test]
    fn empty_universities_sort_last_by_region_then_name() {
        let students = aggregate_students(&[
            record("G1", Subject::Physics, 20.0, "03"),
            record("G2", Subject::Physics, 28.0, "04"),
        ]);
        let unis = aggregate_universities(
            &students,
            &[
                info("01", "Veneto"),
                info("02", "Abruzzo"),
                info("03", "Lazio"),
                info("04", "Lazio"),
                info("05", "Émilia"),
            ],
        );
        let order: Vec<&str> = unis.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(order, vec!["04", "03", "02", "05", "01"]);
    }

    #[test]
    fn survey_majority_flags_university() {
        let students = aggregate_students(&[
            record("SRV-1", Subject::Physics, 20.0, "01"),
            record("SRV-1", Subject::Chemistry, 20.0, "01"),
            record("M1", Subject::Physics, 20.0, "01"),
            record("M2", Subject::Physics, 20.0, "02"),
            record("M2", Subject::Chemistry, 20.0, "02"),
            record("SRV-2", Subject::Physics, 20.0, "02"),
        ]);
        let unis = aggregate_universities(&students, &[info("01", "Marche"), info("02", "Puglia")]);
        let get = |id: &str| unis.iter().find(|u| u.id == id).unwrap();

        assert!(get("01").is_from_survey);
        assert!(!get("02").is_from_survey);
        assert_eq!(get("01").source_breakdown.internal_survey, 2);
        assert_eq!(get("01").source_breakdown.ministerial, 1);
    }

    #[test]
    fn regions_weight_by_student_count_and_skip_empty() {
        let students = aggregate_students(&[
            record("H1", Subject::Physics, 30.0, "01"),
            record("H2", Subject::Physics, 20.0, "02"),
            record("H3", Subject::Physics, 20.0, "02"),
        ]);
        let unis = aggregate_universities(
            &students,
            &[info("01", "Lazio"), info("02", "Lazio"), info("03", "Sicilia")],
        );
        let regions = aggregate_regions(&unis);

        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].university_count, 2);
        assert_eq!(regions[0].student_count, 3);
        assert!((regions[0].average_score - 70.0 / 3.0).abs() < 1e-9);
        assert_eq!(regions[0].fully_qualified_count, 0);
        assert_eq!(regions[0].potentially_qualified_count, 3);
    }

    #[test]
    fn summary_counts_official_and_survey_universities() {
        let records = vec![
            record("K1", Subject::Physics, 20.0, "01"),
            record("K1", Subject::Chemistry, 20.0, "01"),
            record("K1", Subject::Biology, 20.0, "01"),
            record("SRV-K", Subject::Physics, 10.0, "02"),
        ];
        let students = aggregate_students(&records);
        let unis = aggregate_universities(
            &students,
            &[info("01", "Marche"), info("02", "Puglia"), info("03", "Lazio")],
        );
        let summary = global_summary(records.len(), &students, &unis, 100);

        assert_eq!(summary.total_universities, 3);
        assert_eq!(summary.fully_qualified_count, 1);
        assert_eq!(summary.almost_qualified_count, 0);
        assert_eq!(summary.remaining_spots, 99);
        assert_eq!(summary.universities_with_official_data, 1);
        assert_eq!(summary.universities_complete, 1);
        assert_eq!(summary.universities_from_survey, 1);
        assert_eq!(summary.total_result_count, 4);
        assert_eq!(summary.unique_student_count, 2);
        assert_eq!(summary.average_of_averages, 15.0);
    }
}
