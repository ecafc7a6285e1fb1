use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::Path;

use graduatoria_analyzer::dedup::Deduplicator;
use graduatoria_analyzer::loader::{self, FeedLoader};
use graduatoria_analyzer::models::Config;
use graduatoria_analyzer::ranking::outcome_counts;
use graduatoria_analyzer::report::{self, format_outcomes};
use graduatoria_analyzer::resolver::display_name;
use graduatoria_analyzer::simulation::UniversityCutoff;
use graduatoria_analyzer::{PipelineOptions, Snapshot, UniversityResolver};

fn cli() -> Command {
    Command::new("graduatoria-analyzer")
        .version("1.0")
        .about("Aggregates filter-semester exam results and estimates admission cutoffs")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.toml")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Show debug diagnostics")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only show errors")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose")
                .global(true),
        )
        .subcommand(Command::new("report").about("Write CSV reports and a summary (default)"))
        .subcommand(
            Command::new("simulate")
                .about("Estimate admission status for one hypothetical candidate")
                .arg(
                    Arg::new("average")
                        .long("average")
                        .value_name("SCORE")
                        .help("Candidate average over the three exams")
                        .value_parser(clap::value_parser!(f64))
                        .required(true),
                )
                .arg(
                    Arg::new("university")
                        .long("university")
                        .value_name("NAME")
                        .help("University name or id")
                        .required(true),
                ),
        )
        .subcommand(
            Command::new("cutoffs")
                .about("Print national and per-university minimum averages")
                .arg(
                    Arg::new("university")
                        .long("university")
                        .value_name("ID")
                        .help("Only this university"),
                ),
        )
        .subcommand(
            Command::new("merge-survey")
                .about("Merge internal survey submissions into the results feed")
                .arg(
                    Arg::new("submissions")
                        .long("submissions")
                        .value_name("FILE")
                        .help("JSON list of survey submissions")
                        .required(true),
                )
                .arg(
                    Arg::new("usernames")
                        .long("usernames")
                        .value_name("FILE")
                        .help("Already recorded usernames, one per line"),
                )
                .arg(
                    Arg::new("out")
                        .long("out")
                        .value_name("FILE")
                        .help("Merged results feed to write")
                        .required(true),
                ),
        )
}

fn init_tracing(quiet: bool, verbose: bool) -> Result<()> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("GRADUATORIA_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|error| anyhow::anyhow!("failed to initialize tracing subscriber: {error}"))?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(matches.get_flag("quiet"), matches.get_flag("verbose"))?;

    let config_file = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("config.toml");

    // Load or create configuration
    let config = if Path::new(config_file).exists() {
        println!("📋 Loading configuration from: {}", config_file);
        Config::load_from_file(config_file)
            .with_context(|| format!("Failed to load configuration from {}", config_file))?
    } else {
        println!("📝 Creating default configuration file: {}", config_file);
        let default_config = Config::default();
        default_config.save_to_file(config_file)?;
        println!("⚠️  Review {} (data source, projection method) and run again.", config_file);
        return Ok(());
    };
    config.validate()?;

    match matches.subcommand() {
        Some(("simulate", sub)) => run_simulate(&config, sub).await,
        Some(("cutoffs", sub)) => run_cutoffs(&config, sub).await,
        Some(("merge-survey", sub)) => run_merge_survey(&config, sub).await,
        _ => run_report(&config).await,
    }
}

async fn build_snapshot(config: &Config) -> Result<(Snapshot, UniversityResolver)> {
    let resolver = loader::load_resolver(config)?;
    let feeds = FeedLoader::new()
        .load(config)
        .await
        .context("Could not load the results feeds; check the data source and try again")?;

    let snapshot = Snapshot::build(
        &feeds.records,
        &feeds.universities,
        &resolver,
        PipelineOptions::from(config),
    );
    Ok((snapshot, resolver))
}

async fn run_report(config: &Config) -> Result<()> {
    let output_dir = config.output_directory.as_deref().unwrap_or("output");
    let (snapshot, resolver) = build_snapshot(config).await?;

    println!("📄 Output directory: {} (cleaned)", output_dir);
    report::write_reports(&snapshot, &resolver, output_dir)?;

    print_summary(&snapshot);
    println!("\n✅ Reports written to {}", output_dir);
    Ok(())
}

fn print_summary(snapshot: &Snapshot) {
    let summary = &snapshot.summary;

    println!("\n📊 SUMMARY (estimates)");
    println!("======================\n");
    println!(
        "🎓 {} students, {} results, {} universities",
        summary.unique_student_count, summary.total_result_count, summary.total_universities
    );
    println!(
        "✅ Fully qualified: {}   🟡 Potentially qualified: {}   🪑 Remaining seats: {}",
        summary.fully_qualified_count, summary.almost_qualified_count, summary.remaining_spots
    );
    println!("📈 Average of averages: {:.2}", summary.average_of_averages);
    println!("🧮 Outcomes: {}", format_outcomes(&outcome_counts(&snapshot.students, None)));

    println!("\n🗺️  Regions (by students):");
    let mut regions: Vec<_> = snapshot.regions.iter().collect();
    regions.sort_by(|a, b| b.student_count.cmp(&a.student_count));
    for region in regions {
        println!(
            "   {} - {} students at {} universities (avg: {:.2}, qualified: {})",
            region.name,
            region.student_count,
            region.university_count,
            region.average_score,
            region.fully_qualified_count
        );
    }

    let projection = &snapshot.projection;
    println!("\n🔮 Projection ({:?}):", snapshot.options.projection_method);
    println!(
        "   {} qualified, {} potentially qualified out of {} students",
        projection.estimated_qualified, projection.estimated_potential, projection.estimated_total_students
    );

    print_national_cutoff(snapshot);
}

fn print_national_cutoff(snapshot: &Snapshot) {
    match &snapshot.national_cutoff {
        Some(cutoff) => {
            println!(
                "\n🏁 National minimum average: {:.2} (total {:.2})",
                cutoff.minimum_average, cutoff.minimum_total
            );
            if cutoff.below_official_minimum {
                println!("   ⚠️  Projection is below 18; the actual minimum is 18 regardless");
            }
        }
        None => println!("\n🏁 National minimum average: not enough data"),
    }
}

fn print_cutoff(cutoff: &UniversityCutoff) {
    let show = |value: Option<f64>| value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "n/a".to_string());
    println!(
        "   {} - realistic: {}, worst case: {} ({} seats, {} scaled, {} first-choice applicants, {} displaced competitors)",
        display_name(&cutoff.university_name),
        show(cutoff.realistic_cutoff),
        show(cutoff.worst_case_cutoff),
        cutoff.real_seats,
        cutoff.scaled_seats,
        cutoff.first_choice_applicants,
        cutoff.displaced_competitors
    );
}

async fn run_cutoffs(config: &Config, matches: &ArgMatches) -> Result<()> {
    let (snapshot, _) = build_snapshot(config).await?;
    print_national_cutoff(&snapshot);

    println!("\n🏛️  Per-university minimum averages:");
    match matches.get_one::<String>("university") {
        Some(id) => {
            match snapshot.cutoff(id) {
                Some(cutoff) => print_cutoff(cutoff),
                None => println!("   ❓ No seat data or no eligible students for university {}", id),
            }
            println!("   Sampled students: {}", format_outcomes(&outcome_counts(&snapshot.students, Some(id))));
        }
        None => snapshot.university_cutoffs.iter().for_each(print_cutoff),
    }
    Ok(())
}

async fn run_simulate(config: &Config, matches: &ArgMatches) -> Result<()> {
    let average = matches
        .get_one::<f64>("average")
        .copied()
        .context("--average is required")?;
    let university = matches
        .get_one::<String>("university")
        .context("--university is required")?;

    let (snapshot, resolver) = build_snapshot(config).await?;
    let simulator = snapshot.simulator(&resolver);

    let Some(assessment) = simulator.assess_candidate(average, university) else {
        println!("❓ No seat or enrollment data for {}; cannot simulate", university);
        return Ok(());
    };

    println!("\n🎯 Candidate with average {:.2}", average);
    println!("   Global position: {}", assessment.global_position);
    println!("   Position at university: {}", assessment.university_position);
    println!("   Displaced competitors above: {}", assessment.displaced_above);
    println!(
        "   Seats: {} real, {} scaled to the sample",
        assessment.real_seats, assessment.scaled_seats
    );
    println!("   Status: {}", assessment.status.description());
    if let Some(cutoff) = &assessment.cutoff {
        print_cutoff(cutoff);
    }
    Ok(())
}

async fn run_merge_survey(config: &Config, matches: &ArgMatches) -> Result<()> {
    let submissions_file = matches
        .get_one::<String>("submissions")
        .context("--submissions is required")?;
    let out_file = matches.get_one::<String>("out").context("--out is required")?;

    let feeds = FeedLoader::new().load(config).await?;
    let submissions = loader::load_submissions_file(submissions_file)?;
    let usernames = match matches.get_one::<String>("usernames") {
        Some(path) => loader::load_usernames_file(path)?,
        None => Vec::new(),
    };

    println!("📥 {} survey submissions, {} known usernames", submissions.len(), usernames.len());

    let outcome = Deduplicator::new(&feeds.records, &feeds.universities, &usernames)
        .merge(feeds.records.clone(), &submissions);

    for skipped in &outcome.skipped {
        println!("   🔄 Skipped {}: {:?}", skipped.id, skipped.reason);
    }

    loader::write_results_file(out_file, &outcome.records)?;
    println!(
        "✅ Accepted {} submissions, skipped {}; wrote {} results to {}",
        outcome.accepted,
        outcome.skipped.len(),
        outcome.records.len(),
        out_file
    );
    Ok(())
}
