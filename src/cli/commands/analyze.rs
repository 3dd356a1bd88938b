use anyhow::{Context, Result};
use console::{Emoji, style};
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::llm::{BackendKind, BackendRegistry};
use crate::models::{Query, Sentiment};
use crate::pipeline::{AnalysisReport, Pipeline};

static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
static ROBOT: Emoji<'_, '_> = Emoji("🤖 ", "");
static LINK: Emoji<'_, '_> = Emoji("🔗 ", "");
static TAG: Emoji<'_, '_> = Emoji("🏷️  ", "");
static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");
static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK] ");
static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "[!] ");

const SUMMARY_ROWS: usize = 10;

pub struct AnalyzeArgs {
    pub question: String,
    pub context: String,
    pub backends: Vec<BackendKind>,
    pub output: Option<PathBuf>,
    pub timeout: Option<u64>,
    pub deadline: Option<u64>,
    pub check_urls: bool,
}

pub async fn run(args: AnalyzeArgs) -> Result<()> {
    let started = Instant::now();

    println!();
    println!("{}", style(" SourceLens - Analysis ").bold().reverse());
    println!();

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(timeout) = args.timeout {
        config.pipeline.request_timeout_secs = timeout;
    }
    if let Some(deadline) = args.deadline {
        config.pipeline.deadline_secs = deadline;
    }
    if args.check_urls {
        config.pipeline.check_reachability = true;
    }

    let registry = if args.backends.is_empty() {
        BackendRegistry::from_config(&config)
    } else {
        BackendRegistry::from_config_filtered(&config, &args.backends)
    };

    println!(
        "{}Question: {}",
        LOOKING_GLASS,
        style(&args.question).cyan().bold()
    );
    if !args.context.is_empty() {
        println!("  {} Context: {}", style("→").cyan(), style(&args.context).cyan());
    }
    if registry.is_empty() {
        println!("{}Backends: {}", ROBOT, style("none available").red());
    } else {
        println!(
            "{}Backends ({}): {}",
            ROBOT,
            registry.len(),
            style(
                registry
                    .describe()
                    .iter()
                    .map(|b| format!("{} ({})", b.id, b.model))
                    .collect::<Vec<_>>()
                    .join(", ")
            )
            .green()
        );
    }
    println!();

    let pipeline = Pipeline::new(registry, &config.pipeline);
    let query = Query::new(args.question, args.context);

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message("Querying backends, extracting sources and rating sentiment...");

    let result = pipeline.run(&query).await;
    spinner.finish_and_clear();
    let report = result?;

    print_summary(&report);

    if let Some(path) = &args.output {
        crate::export::export_json(&report, path)?;
        println!();
        println!("{}Report written to {}", CHECK, style(path.display()).cyan());
    }

    println!();
    println!(
        "{}Done in {}",
        SPARKLE,
        style(HumanDuration(started.elapsed())).green().bold()
    );

    Ok(())
}

fn print_summary(report: &AnalysisReport) {
    println!(
        "{}{} of {} backend(s) answered",
        CHECK,
        style(report.backends_used.len()).green().bold(),
        report.backends_attempted.len()
    );
    for failure in &report.failures {
        println!(
            "  {}{} ({:?}): {}",
            WARN,
            style(&failure.backend).yellow(),
            failure.stage,
            style(&failure.message).dim()
        );
    }

    println!();
    println!(
        "{}Sources: {} ({} exploitable, {} domains)",
        LINK,
        style(report.sources.len()).green().bold(),
        style(report.statistics.urls.exploitable).green(),
        report.statistics.urls.unique_domains
    );
    for source in report.sources.iter().take(SUMMARY_ROWS) {
        let verdict = report
            .source_consensus
            .get(&source.url)
            .map(|c| sentiment_label(c.winning_sentiment, c.consensus_score))
            .unwrap_or_default();
        println!(
            "  {} {} {} {}",
            style("•").cyan(),
            source.url,
            style(format!("[{}]", source.backends.len())).dim(),
            verdict
        );
    }
    if report.sources.len() > SUMMARY_ROWS {
        println!("  {}", style(format!("... and {} more", report.sources.len() - SUMMARY_ROWS)).dim());
    }

    println!();
    println!(
        "{}Brands: {}",
        TAG,
        style(report.entities.len()).green().bold()
    );
    for entity in report.entities.iter().take(SUMMARY_ROWS) {
        let verdict = report
            .entity_consensus
            .get(&entity.canonical_name)
            .map(|c| sentiment_label(c.winning_sentiment, c.consensus_score))
            .unwrap_or_default();
        println!(
            "  {} {} {} {}",
            style("•").cyan(),
            style(&entity.display_name).bold(),
            style(format!("[{} backend(s), {} mention(s)]", entity.backends.len(), entity.mention_count)).dim(),
            verdict
        );
    }
    if report.entities.len() > SUMMARY_ROWS {
        println!("  {}", style(format!("... and {} more", report.entities.len() - SUMMARY_ROWS)).dim());
    }
}

fn sentiment_label(sentiment: Sentiment, score: f64) -> String {
    let text = format!("{} {:.0}%", sentiment, score * 100.0);
    match sentiment {
        Sentiment::Positive => style(text).green().to_string(),
        Sentiment::Neutral => style(text).yellow().to_string(),
        Sentiment::Negative => style(text).red().to_string(),
    }
}
