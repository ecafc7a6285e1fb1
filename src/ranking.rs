use std::cmp::Ordering;

use serde::Serialize;

use crate::models::{Outcome, StudentAggregate, Subject};

/// Lowest and highest integer bucket of the score distribution.
pub const DISTRIBUTION_RANGE: std::ops::RangeInclusive<i32> = -3..=31;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedStudent<'a> {
    /// 1-based.
    pub position: usize,
    pub score: f64,
    pub student: &'a StudentAggregate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreView {
    Average,
    Subject(Subject),
}

impl ScoreView {
    fn score(&self, student: &StudentAggregate) -> Option<f64> {
        match self {
            ScoreView::Average => student.average,
            ScoreView::Subject(subject) => student.score(*subject),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DistributionBucket {
    pub score: i32,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub fully_qualified: usize,
    pub potentially_qualified: usize,
    pub not_qualified: usize,
}

/// Matches a student by university id or by its name as published.
fn at_university(student: &StudentAggregate, university: Option<&str>) -> bool {
    university.map_or(true, |wanted| student.university_id == wanted || student.university_name == wanted)
}

/// Students with a score for `view`, best first, ties broken by label.
pub fn rank<'a>(
    students: &'a [StudentAggregate],
    view: ScoreView,
    university: Option<&str>,
) -> Vec<RankedStudent<'a>> {
    let mut scored: Vec<(f64, &StudentAggregate)> = students
        .iter()
        .filter(|student| at_university(student, university))
        .filter_map(|student| Some((view.score(student)?, student)))
        .collect();

    scored.sort_by(|(a, sa), (b, sb)| {
        b.partial_cmp(a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| sa.label.cmp(&sb.label))
    });

    scored
        .into_iter()
        .enumerate()
        .map(|(index, (score, student))| RankedStudent {
            position: index + 1,
            score,
            student,
        })
        .collect()
}

pub fn general_ranking<'a>(students: &'a [StudentAggregate], university: Option<&str>) -> Vec<RankedStudent<'a>> {
    rank(students, ScoreView::Average, university)
}

pub fn subject_ranking<'a>(
    students: &'a [StudentAggregate],
    subject: Subject,
    university: Option<&str>,
) -> Vec<RankedStudent<'a>> {
    rank(students, ScoreView::Subject(subject), university)
}

/// Count of scores per integer bucket, rounded half away from zero. Scores
/// outside the range are not counted.
pub fn score_distribution(
    students: &[StudentAggregate],
    view: ScoreView,
    university: Option<&str>,
) -> Vec<DistributionBucket> {
    let mut buckets: Vec<DistributionBucket> = DISTRIBUTION_RANGE
        .map(|score| DistributionBucket { score, count: 0 })
        .collect();
    let lowest = *DISTRIBUTION_RANGE.start();

    for score in students
        .iter()
        .filter(|student| at_university(student, university))
        .filter_map(|student| view.score(student))
    {
        let bucket = score.round() as i32;
        if DISTRIBUTION_RANGE.contains(&bucket) {
            buckets[(bucket - lowest) as usize].count += 1;
        }
    }

    buckets
}

pub fn outcome_counts(students: &[StudentAggregate], university: Option<&str>) -> OutcomeCounts {
    students
        .iter()
        .filter(|student| at_university(student, university))
        .fold(OutcomeCounts::default(), |mut counts, student| {
            match student.outcome() {
                Outcome::FullyQualified => counts.fully_qualified += 1,
                Outcome::PotentiallyQualified => counts.potentially_qualified += 1,
                Outcome::NotQualified => counts.not_qualified += 1,
            }
            counts
        })
}
