//! Admission cutoff simulation.
//!
//! Works entirely in sample space: real seat counts are scaled down by each
//! university's sampling rate, then eligible students are assigned to their
//! own university in score order. Students who find it full are "displaced"
//! and compete elsewhere, either spread by attractiveness (realistic) or all
//! at once against a single university (worst case).

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{StudentAggregate, PASS_THRESHOLD};
use crate::projection::Projection;
use crate::resolver::UniversityResolver;

/// Official minimum average; projected cutoffs below it are flagged, not clamped.
pub const MINIMUM_ADMISSION_AVERAGE: f64 = 18.0;

/// Upper bound on redistribution rounds.
pub const MAX_CASCADE_ROUNDS: usize = 10;

/// Attractiveness used when a university has no course or seat data.
const DEFAULT_ATTRACTIVENESS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStatus {
    Unlikely,
    AtRisk,
    Guaranteed,
}

impl AdmissionStatus {
    pub fn description(&self) -> &'static str {
        match self {
            AdmissionStatus::Unlikely => "unlikely",
            AdmissionStatus::AtRisk => "at risk",
            AdmissionStatus::Guaranteed => "guaranteed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NationalCutoff {
    pub minimum_average: f64,
    pub minimum_total: f64,
    pub estimated_eligible: u64,
    pub actual_eligible: usize,
    /// 1-based rank in the sorted eligible sample.
    pub cutoff_position: usize,
    pub below_official_minimum: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniversityCutoff {
    pub university_id: String,
    pub university_name: String,
    pub real_seats: u32,
    pub scaled_seats: u32,
    pub first_choice_applicants: usize,
    /// Students displaced elsewhere who end up contending for this university.
    pub displaced_competitors: usize,
    pub cascade_assigned: u32,
    pub realistic_cutoff: Option<f64>,
    pub worst_case_cutoff: Option<f64>,
}

impl UniversityCutoff {
    pub fn realistic_total(&self) -> Option<f64> {
        self.realistic_cutoff.map(|average| average * 3.0)
    }

    pub fn worst_case_total(&self) -> Option<f64> {
        self.worst_case_cutoff.map(|average| average * 3.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateAssessment {
    pub university_id: String,
    pub global_position: usize,
    pub university_position: usize,
    pub displaced_above: usize,
    pub scaled_seats: u32,
    pub real_seats: u32,
    pub status: AdmissionStatus,
    pub cutoff: Option<UniversityCutoff>,
}

#[derive(Debug, Clone, Copy)]
struct Applicant<'a> {
    average: f64,
    university_id: Option<&'a str>,
}

fn descending(a: &f64, b: &f64) -> Ordering {
    b.partial_cmp(a).unwrap_or(Ordering::Equal)
}

/// Outcome of assigning every applicant to their own university.
#[derive(Debug, Clone, Default)]
pub struct FirstChoicePass<'a> {
    pub remaining: BTreeMap<&'a str, u32>,
    pub displaced: usize,
    /// Displaced count per first-choice university.
    pub displaced_from: BTreeMap<&'a str, usize>,
    /// `(score, displaced so far)` in descending score order.
    curve: Vec<(f64, usize)>,
}

impl FirstChoicePass<'_> {
    /// Displaced students whose first choice was some other university.
    pub fn displaced_elsewhere(&self, university_id: &str) -> usize {
        self.displaced - self.displaced_from.get(university_id).copied().unwrap_or(0)
    }

    /// Displaced students with a strictly higher score.
    pub fn displaced_above(&self, score: f64) -> usize {
        self.curve
            .iter()
            .take_while(|(entry, _)| *entry > score)
            .last()
            .map(|(_, displaced)| *displaced)
            .unwrap_or(0)
    }
}

fn first_choice_pass<'a>(sorted: &[Applicant<'a>], scaled: &BTreeMap<&'a str, u32>) -> FirstChoicePass<'a> {
    let mut pass = FirstChoicePass {
        remaining: scaled.clone(),
        ..Default::default()
    };

    for applicant in sorted {
        let Some(id) = applicant.university_id else {
            continue;
        };
        let Some(seats) = pass.remaining.get_mut(id) else {
            continue;
        };
        if *seats > 0 {
            *seats -= 1;
        } else {
            pass.displaced += 1;
            *pass.displaced_from.entry(id).or_insert(0) += 1;
        }
        pass.curve.push((applicant.average, pass.displaced));
    }

    pass
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeOutcome {
    pub assigned_to_target: u32,
    /// Displaced students whose share points at the target, counted before
    /// capacity caps and never more than were displaced.
    pub target_demand: usize,
    pub still_displaced: usize,
    pub rounds: usize,
}

/// Spread displaced students over universities with free seats, proportionally to
/// attractiveness among those still available. Overflow moves to the next round.
///
/// The target keeps its attractiveness share even when full, so a popular
/// university still sees the pressure of students it cannot take. Once no seats
/// are left anywhere, every remaining student contends for the target.
pub fn cascade(
    displaced: usize,
    remaining: &mut BTreeMap<&str, u32>,
    attractiveness: &BTreeMap<&str, f64>,
    target: &str,
) -> CascadeOutcome {
    let attractiveness_of = |id: &str| attractiveness.get(id).copied().unwrap_or(DEFAULT_ATTRACTIVENESS);
    let mut outcome = CascadeOutcome {
        still_displaced: displaced,
        ..Default::default()
    };

    while outcome.still_displaced > 0 && outcome.rounds < MAX_CASCADE_ROUNDS {
        let available: Vec<&str> = remaining
            .iter()
            .filter(|(_, seats)| **seats > 0)
            .map(|(id, _)| *id)
            .collect();
        let current = outcome.still_displaced;
        if available.is_empty() {
            outcome.target_demand += current;
            break;
        }

        let total_attractiveness: f64 = available.iter().map(|id| attractiveness_of(*id)).sum();
        let target_share = if available.iter().any(|id| *id == target) {
            attractiveness_of(target) / total_attractiveness
        } else {
            attractiveness_of(target) / (total_attractiveness + attractiveness_of(target))
        };
        outcome.target_demand += (current as f64 * target_share).round() as usize;

        let mut wanted: Vec<(&str, usize)> = available
            .iter()
            .map(|id| {
                let share = attractiveness_of(*id) / total_attractiveness;
                (*id, (current as f64 * share).round() as usize)
            })
            .collect();

        let distributed: usize = wanted.iter().map(|(_, count)| count).sum();
        if distributed < current {
            // Missing course data ranks below any known attractiveness here.
            let known = |id: &str| attractiveness.get(id).copied().unwrap_or(0.0);
            let most_attractive = wanted
                .iter()
                .enumerate()
                .fold(0, |best, (index, (id, _))| {
                    if known(*id) > known(wanted[best].0) {
                        index
                    } else {
                        best
                    }
                });
            wanted[most_attractive].1 += current - distributed;
        }

        let mut left = current;
        let mut overflow = 0;
        for (id, count) in wanted {
            let count = count.min(left);
            left -= count;
            let Some(seats) = remaining.get_mut(id) else {
                continue;
            };
            let assigned = (count as u32).min(*seats);
            *seats -= assigned;
            if id == target {
                outcome.assigned_to_target += assigned;
            }
            overflow += count - assigned as usize;
        }

        outcome.rounds += 1;
        let next = overflow + left;
        if next == current {
            break;
        }
        outcome.still_displaced = next;
    }

    outcome.target_demand = outcome.target_demand.min(displaced);
    outcome
}

/// Lowest score that still fits when every displaced student above it competes
/// for this university.
fn worst_case_cutoff(first_choice: &[f64], scaled_seats: u32, pass: &FirstChoicePass) -> Option<f64> {
    if scaled_seats == 0 || first_choice.is_empty() {
        return None;
    }

    for (index, score) in first_choice.iter().enumerate() {
        let competitors = index + pass.displaced_above(*score);
        if competitors >= scaled_seats as usize {
            return Some(if index > 0 { first_choice[index - 1] } else { *score });
        }
    }

    first_choice.last().copied()
}

/// Admission rate applied as a fractional index into the first-choice list.
fn realistic_cutoff(first_choice: &[f64], scaled_seats: u32, competitors: usize) -> Option<f64> {
    let applicants = first_choice.len();
    if scaled_seats == 0 || applicants == 0 || competitors == 0 {
        return None;
    }

    let seats = scaled_seats as usize;
    // ceil(min(1, seats / competitors) * applicants)
    let index = if seats >= competitors {
        applicants
    } else {
        (seats * applicants).div_ceil(competitors)
    };

    Some(first_choice[index.clamp(1, applicants) - 1])
}

pub struct AdmissionSimulator<'a> {
    resolver: &'a UniversityResolver,
    /// Eligible students, best average first.
    applicants: Vec<Applicant<'a>>,
    attractiveness: BTreeMap<&'a str, f64>,
}

impl<'a> AdmissionSimulator<'a> {
    pub fn new(students: &[StudentAggregate], resolver: &'a UniversityResolver) -> Self {
        let mut applicants: Vec<Applicant<'a>> = students
            .iter()
            .filter(|student| student.all_completed_passed)
            .filter_map(|student| {
                let average = student.average?;
                let university_id = resolver
                    .reference(&student.university_id)
                    .map(|reference| reference.id.as_str())
                    .or_else(|| resolver.resolve(&student.university_name));
                Some(Applicant { average, university_id })
            })
            .collect();
        applicants.sort_by(|a, b| descending(&a.average, &b.average));

        let unresolved = applicants.iter().filter(|a| a.university_id.is_none()).count();
        if unresolved > 0 {
            warn!(unresolved, "eligible students without enrollment data are left out of seat simulation");
        }

        let attractiveness = resolver
            .references()
            .iter()
            .filter_map(|reference| Some((reference.id.as_str(), reference.attractiveness()?)))
            .collect();

        Self {
            resolver,
            applicants,
            attractiveness,
        }
    }

    pub fn eligible_count(&self) -> usize {
        self.applicants.len()
    }

    /// Minimum average for the national seat pool, assuming the sample is representative.
    pub fn national_cutoff(&self, projection: &Projection, total_seats: u32) -> Option<NationalCutoff> {
        let actual = self.applicants.len();
        if actual == 0 {
            return None;
        }

        let ratio = projection.estimated_eligible() as f64 / actual as f64;
        if ratio <= 0.0 {
            return None;
        }

        let position = ((total_seats as f64 / ratio).ceil() as usize).max(1);
        let minimum = if actual >= position {
            self.applicants[position - 1].average
        } else {
            self.applicants[actual - 1].average
        };
        debug!(position, ratio, minimum, "national cutoff");

        Some(NationalCutoff {
            minimum_average: minimum,
            minimum_total: minimum * 3.0,
            estimated_eligible: projection.estimated_eligible(),
            actual_eligible: actual,
            cutoff_position: position,
            below_official_minimum: minimum < MINIMUM_ADMISSION_AVERAGE,
        })
    }

    fn sample_counts(applicants: &[Applicant<'a>]) -> BTreeMap<&'a str, u32> {
        let mut counts = BTreeMap::new();
        for id in applicants.iter().filter_map(|a| a.university_id) {
            *counts.entry(id).or_insert(0) += 1;
        }
        counts
    }

    /// Real seats scaled by each university's sampling rate.
    fn scaled_seats(&self, counts: &BTreeMap<&'a str, u32>) -> BTreeMap<&'a str, u32> {
        self.resolver
            .references()
            .iter()
            .filter_map(|reference| {
                let seats = reference.available_seats()?;
                let registrants = reference.exam_registrants()?;
                let sample = counts.get(reference.id.as_str()).copied().unwrap_or(0);
                let scaled = (seats as f64 * sample as f64 / registrants as f64).round() as u32;
                Some((reference.id.as_str(), scaled))
            })
            .collect()
    }

    pub fn university_cutoff(&self, university_id: &str) -> Option<UniversityCutoff> {
        let reference = self.resolver.reference(university_id)?;
        let real_seats = reference.available_seats()?;
        reference.exam_registrants()?;
        let target = reference.id.as_str();

        let first_choice: Vec<f64> = self
            .applicants
            .iter()
            .filter(|a| a.university_id == Some(target))
            .map(|a| a.average)
            .collect();
        if first_choice.is_empty() {
            return None;
        }

        let scaled = self.scaled_seats(&Self::sample_counts(&self.applicants));
        let scaled_seats = scaled.get(target).copied().unwrap_or(0);

        let pass = first_choice_pass(&self.applicants, &scaled);
        let worst_case = worst_case_cutoff(&first_choice, scaled_seats, &pass);

        // The target's own overflow is already among its first-choice applicants.
        let mut remaining = pass.remaining.clone();
        let outcome = cascade(pass.displaced_elsewhere(target), &mut remaining, &self.attractiveness, target);
        let competitors = first_choice.len() + outcome.target_demand;
        let realistic = realistic_cutoff(&first_choice, scaled_seats, competitors);
        debug!(target, competitors, rounds = outcome.rounds, "realistic cutoff");

        Some(UniversityCutoff {
            university_id: reference.id.clone(),
            university_name: reference.name.clone(),
            real_seats,
            scaled_seats,
            first_choice_applicants: first_choice.len(),
            displaced_competitors: outcome.target_demand,
            cascade_assigned: outcome.assigned_to_target,
            realistic_cutoff: realistic,
            worst_case_cutoff: worst_case,
        })
    }

    /// Cutoffs for every university that can be simulated.
    pub fn all_university_cutoffs(&self) -> Vec<UniversityCutoff> {
        self.resolver
            .references()
            .iter()
            .filter_map(|reference| self.university_cutoff(&reference.id))
            .collect()
    }

    /// Place a hypothetical student with `average` at `university` (id or name).
    pub fn assess_candidate(&self, average: f64, university: &str) -> Option<CandidateAssessment> {
        let reference = self.resolver.lookup_university(university, university)?;
        let real_seats = reference.available_seats()?;
        reference.exam_registrants()?;
        let target = reference.id.as_str();

        if average < PASS_THRESHOLD {
            debug!(average, "candidate average is below the pass threshold");
        }

        // Ties go to the sampled students.
        let position = self.applicants.partition_point(|a| a.average >= average);
        let mut applicants = self.applicants.clone();
        applicants.insert(
            position,
            Applicant {
                average,
                university_id: Some(target),
            },
        );

        let scaled = self.scaled_seats(&Self::sample_counts(&applicants));
        let scaled_seats = scaled.get(target).copied().unwrap_or(0);

        let ahead = &applicants[..position];
        let university_position = ahead.iter().filter(|a| a.university_id == Some(target)).count() + 1;
        let displaced_above = first_choice_pass(ahead, &scaled).displaced;

        let status = if university_position - 1 >= scaled_seats as usize {
            AdmissionStatus::Unlikely
        } else if university_position - 1 + displaced_above >= scaled_seats as usize {
            AdmissionStatus::AtRisk
        } else {
            AdmissionStatus::Guaranteed
        };

        Some(CandidateAssessment {
            university_id: reference.id.clone(),
            global_position: position + 1,
            university_position,
            displaced_above,
            scaled_seats,
            real_seats,
            status,
            cutoff: self.university_cutoff(target),
        })
    }
}
