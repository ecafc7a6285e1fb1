//! CSV and plain-text report writers.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use csv::Writer;

use crate::coverage::CoverageUnit;
use crate::pipeline::Snapshot;
use crate::models::Subject;
use crate::ranking::{general_ranking, outcome_counts, score_distribution, subject_ranking, OutcomeCounts, ScoreView};
use crate::resolver::{display_name, UniversityResolver};
use crate::simulation::MINIMUM_ADMISSION_AVERAGE;

pub const STUDENTS_CSV: &str = "students.csv";
pub const UNIVERSITIES_CSV: &str = "universities.csv";
pub const REGIONS_CSV: &str = "regions.csv";
pub const CUTOFFS_CSV: &str = "cutoffs.csv";
pub const DISTRIBUTION_CSV: &str = "distribution.csv";
pub const SUMMARY_TXT: &str = "summary.txt";

fn optional(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

/// Remove the files a previous run wrote. Anything else in the directory is left alone.
pub fn clean_output_directory(output_dir: &str) -> Result<()> {
    let output_path = Path::new(output_dir);

    if !output_path.exists() {
        return Ok(());
    }

    println!("🧹 Cleaning previous results...");

    for item in [STUDENTS_CSV, UNIVERSITIES_CSV, REGIONS_CSV, CUTOFFS_CSV, DISTRIBUTION_CSV, SUMMARY_TXT] {
        let item_path = output_path.join(item);
        if item_path.is_file() {
            fs::remove_file(&item_path)
                .with_context(|| format!("Failed to remove {}", item_path.display()))?;
            println!("   🗑️  Removed file: {}", item);
        }
    }

    println!("   ✅ Output directory cleaned");
    Ok(())
}

pub fn generate_students_csv(snapshot: &Snapshot, output_dir: &str) -> Result<()> {
    let csv_path = Path::new(output_dir).join(STUDENTS_CSV);
    let mut writer = Writer::from_path(&csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;

    writer.write_record([
        "Position",
        "Label",
        "University",
        "Physics",
        "Chemistry",
        "Biology",
        "Average",
        "Physics Rank",
        "Chemistry Rank",
        "Biology Rank",
        "Completed Exams",
        "Outcome",
        "Source",
    ])?;

    let subject_positions: Vec<HashMap<&str, usize>> = Subject::ALL
        .iter()
        .map(|subject| {
            subject_ranking(&snapshot.students, *subject, None)
                .into_iter()
                .map(|entry| (entry.student.label.as_str(), entry.position))
                .collect()
        })
        .collect();
    let subject_position = |index: usize, label: &str| {
        subject_positions[index]
            .get(label)
            .map(|position| position.to_string())
            .unwrap_or_default()
    };

    for entry in general_ranking(&snapshot.students, None) {
        let student = entry.student;
        writer.write_record([
            entry.position.to_string(),
            student.label.clone(),
            display_name(&student.university_name),
            optional(student.physics),
            optional(student.chemistry),
            optional(student.biology),
            format!("{:.2}", entry.score),
            subject_position(0, &student.label),
            subject_position(1, &student.label),
            subject_position(2, &student.label),
            student.completed_exam_count.to_string(),
            format!("{:?}", student.outcome()),
            student.source().description().to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn generate_universities_csv(snapshot: &Snapshot, resolver: &UniversityResolver, output_dir: &str) -> Result<()> {
    let csv_path = Path::new(output_dir).join(UNIVERSITIES_CSV);
    let mut writer = Writer::from_path(&csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;

    writer.write_record([
        "ID",
        "University",
        "Region",
        "Students",
        "Average",
        "Fully Qualified",
        "Potentially Qualified",
        "Not Qualified",
        "Ministerial Exams",
        "Survey Exams",
        "From Survey",
        "Coverage %",
        "Coverage Unit",
        "Uncovered",
    ])?;

    for university in &snapshot.universities {
        let breakdown = snapshot.coverage_breakdown(resolver, &university.id);
        let average = if university.student_count > 0 {
            format!("{:.2}", university.average_of_student_averages)
        } else {
            String::new()
        };

        writer.write_record([
            university.id.clone(),
            display_name(&university.name),
            university.region.clone(),
            university.student_count.to_string(),
            average,
            university.fully_qualified_count.to_string(),
            university.potentially_qualified_count.to_string(),
            university.not_qualified_count.to_string(),
            university.source_breakdown.ministerial.to_string(),
            university.source_breakdown.surveys().to_string(),
            university.is_from_survey.to_string(),
            optional(university.coverage_percent),
            breakdown
                .as_ref()
                .map(|b| match b.unit {
                    CoverageUnit::Exams => "exams".to_string(),
                    CoverageUnit::Students => "students".to_string(),
                })
                .unwrap_or_default(),
            breakdown.map(|b| b.uncovered.to_string()).unwrap_or_default(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn generate_regions_csv(snapshot: &Snapshot, output_dir: &str) -> Result<()> {
    let csv_path = Path::new(output_dir).join(REGIONS_CSV);
    let mut writer = Writer::from_path(&csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;

    writer.write_record([
        "Region",
        "Universities",
        "Students",
        "Average",
        "Fully Qualified",
        "Potentially Qualified",
    ])?;

    for region in &snapshot.regions {
        writer.write_record([
            region.name.clone(),
            region.university_count.to_string(),
            region.student_count.to_string(),
            format!("{:.2}", region.average_score),
            region.fully_qualified_count.to_string(),
            region.potentially_qualified_count.to_string(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn generate_cutoffs_csv(snapshot: &Snapshot, output_dir: &str) -> Result<()> {
    let csv_path = Path::new(output_dir).join(CUTOFFS_CSV);
    let mut writer = Writer::from_path(&csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;

    writer.write_record([
        "ID",
        "University",
        "Seats",
        "Scaled Seats",
        "First Choice Applicants",
        "Displaced Competitors",
        "Realistic Average",
        "Realistic Total",
        "Worst Case Average",
        "Worst Case Total",
    ])?;

    for cutoff in &snapshot.university_cutoffs {
        writer.write_record([
            cutoff.university_id.clone(),
            display_name(&cutoff.university_name),
            cutoff.real_seats.to_string(),
            cutoff.scaled_seats.to_string(),
            cutoff.first_choice_applicants.to_string(),
            cutoff.displaced_competitors.to_string(),
            optional(cutoff.realistic_cutoff),
            optional(cutoff.realistic_total()),
            optional(cutoff.worst_case_cutoff),
            optional(cutoff.worst_case_total()),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Students per integer score bucket, for the average and each subject.
pub fn generate_distribution_csv(snapshot: &Snapshot, output_dir: &str) -> Result<()> {
    let csv_path = Path::new(output_dir).join(DISTRIBUTION_CSV);
    let mut writer = Writer::from_path(&csv_path)
        .with_context(|| format!("Failed to create {}", csv_path.display()))?;

    writer.write_record(["Score", "Average", "Physics", "Chemistry", "Biology"])?;

    let views = [
        ScoreView::Average,
        ScoreView::Subject(Subject::Physics),
        ScoreView::Subject(Subject::Chemistry),
        ScoreView::Subject(Subject::Biology),
    ];
    let columns: Vec<_> = views
        .iter()
        .map(|view| score_distribution(&snapshot.students, *view, None))
        .collect();

    for (row, bucket) in columns[0].iter().enumerate() {
        let mut record = vec![bucket.score.to_string()];
        record.extend(columns.iter().map(|column| column[row].count.to_string()));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn format_outcomes(counts: &OutcomeCounts) -> String {
    format!(
        "{} fully qualified, {} potentially qualified, {} not qualified",
        counts.fully_qualified, counts.potentially_qualified, counts.not_qualified
    )
}

/// Human-readable summary; every projected figure is an estimate.
pub fn render_summary(snapshot: &Snapshot) -> String {
    let summary = &snapshot.summary;
    let mut content = String::new();
    content.push_str("Admission Results Summary (estimates)\n");
    content.push_str("=====================================\n\n");

    content.push_str(&format!(
        "Total seats: {}\n\
        Universities: {}\n\
        Results collected: {}\n\
        Unique students: {}\n\
        Average of averages: {:.2}\n\
        Fully qualified: {}\n\
        Potentially qualified: {}\n\
        Remaining seats: {}\n\
        Universities with official data: {}\n\
        Universities with all subjects: {}\n\
        Universities from survey: {}\n\n",
        summary.total_spots,
        summary.total_universities,
        summary.total_result_count,
        summary.unique_student_count,
        summary.average_of_averages,
        summary.fully_qualified_count,
        summary.almost_qualified_count,
        summary.remaining_spots,
        summary.universities_with_official_data,
        summary.universities_complete,
        summary.universities_from_survey,
    ));

    content.push_str(&format!(
        "Outcomes: {}\n\n",
        format_outcomes(&outcome_counts(&snapshot.students, None))
    ));

    let projection = &snapshot.projection;
    content.push_str(&format!(
        "Projection ({:?}):\n\
        Estimated qualified: {}\n\
        Estimated potentially qualified: {}\n\
        Estimated students: {}\n\
        Universities with enrollment data: {}\n\n",
        snapshot.options.projection_method,
        projection.estimated_qualified,
        projection.estimated_potential,
        projection.estimated_total_students,
        projection.covered_universities,
    ));

    match &snapshot.national_cutoff {
        Some(cutoff) => {
            content.push_str(&format!(
                "National minimum average: {:.2} (total {:.2})\n\
                Cutoff position in sample: {} of {} (estimated eligible: {})\n",
                cutoff.minimum_average,
                cutoff.minimum_total,
                cutoff.cutoff_position,
                cutoff.actual_eligible,
                cutoff.estimated_eligible,
            ));
            if cutoff.below_official_minimum {
                content.push_str(&format!(
                    "Note: the actual minimum is {:.0} regardless of projection.\n",
                    MINIMUM_ADMISSION_AVERAGE
                ));
            }
        }
        None => content.push_str("National minimum average: not enough data\n"),
    }

    content
}

pub fn generate_summary_report(snapshot: &Snapshot, output_dir: &str) -> Result<()> {
    let path = Path::new(output_dir).join(SUMMARY_TXT);
    fs::write(&path, render_summary(snapshot)).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Clean the output directory and write every report into it.
pub fn write_reports(snapshot: &Snapshot, resolver: &UniversityResolver, output_dir: &str) -> Result<()> {
    fs::create_dir_all(output_dir).with_context(|| format!("Failed to create {}", output_dir))?;
    clean_output_directory(output_dir)?;

    generate_students_csv(snapshot, output_dir)?;
    generate_universities_csv(snapshot, resolver, output_dir)?;
    generate_regions_csv(snapshot, output_dir)?;
    generate_cutoffs_csv(snapshot, output_dir)?;
    generate_distribution_csv(snapshot, output_dir)?;
    generate_summary_report(snapshot, output_dir)?;
    Ok(())
}
