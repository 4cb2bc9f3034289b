use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use bandmate::analyzer::AnalysisReport;
use bandmate::composer::BarCount;
use bandmate::config::AppConfig;
use bandmate::library::GrooveStore;
use bandmate::matcher::GrooveMatch;
use bandmate::payload;
use bandmate::playback::TransportInfo;
use bandmate::session::{Session, SessionOptions};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(name = "bandmate", version, about = "Match drum grooves to audio clips and sequence them")]
struct Cli {
    /// Groove library root (overrides config and default locations)
    #[arg(long, global = true)]
    grooves: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the categories and grooves in the library
    Scan,

    /// Detect tempo and onsets in a WAV clip and rank matching grooves
    Analyze {
        /// Audio file to analyze
        file: PathBuf,

        /// Number of matches to show (0 = all; defaults to config max_matches)
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the note events a groove produces, block by block
    Preview {
        category: String,
        groove: String,

        /// Preview tempo (defaults to config preview_bpm)
        #[arg(long)]
        bpm: Option<f64>,

        /// How many beats to run for
        #[arg(long, default_value = "8")]
        beats: f64,

        /// Stop at the end of the groove instead of looping
        #[arg(long)]
        no_loop: bool,
    },

    /// Build a composition from CATEGORY/GROOVE[:BARS] items
    Compose {
        /// Items in order, e.g. Rock/basic:2 Fills/crash:all
        #[arg(required = true)]
        items: Vec<String>,

        /// Write the composition to the export directory
        #[arg(long)]
        export: bool,
    },

    /// Copy a groove to the export directory and print its drag payload
    Export { category: String, groove: String },

    /// Remove old exported MIDI files
    Clean {
        /// Maximum age in minutes (defaults to config export_max_age_minutes)
        #[arg(long)]
        max_age_minutes: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = AppConfig::load();

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.resolve_workers())
        .build_global()
        .context("Failed to configure worker pool")?;

    match cli.command {
        Commands::Scan => {
            let (store, _) = open_library(cli.grooves, &config)?;
            let categories = store.categories();
            if categories.is_empty() {
                let root = store.root().unwrap_or_default();
                println!("No grooves found in {}.", root.display());
                return Ok(());
            }
            for category in &categories {
                println!("{} ({})", category.name, category.grooves.len());
                for groove in &category.grooves {
                    println!("  {}", groove.name);
                }
            }
        }

        Commands::Analyze { file, limit, json } => {
            let (_, session) = open_library(cli.grooves, &config)?;
            let (report, matches) = analyze(&session, &file)?;
            let limit = limit.unwrap_or(config.max_matches);
            let shown = if limit > 0 { &matches[..limit.min(matches.len())] } else { &matches[..] };

            if json {
                let out = serde_json::json!({ "report": report, "matches": shown });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                print_report(&report);
                println!();
                print_matches(shown);
            }
        }

        Commands::Preview { category, groove, bpm, beats, no_loop } => {
            let (store, session) = open_library(cli.grooves, &config)?;
            let (c, g) = find_groove(&store, &category, &groove)?;
            session.set_preview_bpm(bpm.unwrap_or(config.preview_bpm));
            session.set_looping(!no_loop);
            if !session.play_groove(c, g) {
                bail!("Could not load groove {}/{}", category, groove);
            }
            run_preview(&session, &config, beats);
        }

        Commands::Compose { items, export } => {
            let (store, session) = open_library(cli.grooves, &config)?;
            for spec in &items {
                let (path, bars) = parse_item(spec)?;
                let (category, groove) = path
                    .split_once('/')
                    .with_context(|| format!("Expected CATEGORY/GROOVE, got '{}'", path))?;
                let (c, g) = find_groove(&store, category, groove)?;
                session
                    .append(c, g, bars)
                    .with_context(|| format!("Failed to add {}", spec))?;
            }

            let composition = session.composition();
            println!("{:<4} {:<30} {:>8} {:>8}", "#", "Groove", "Start", "Beats");
            for (i, item) in composition.items().iter().enumerate() {
                let name = format!("{}/{}", item.groove.category, item.groove.name);
                println!(
                    "{:<4} {:<30} {:>8.2} {:>8.2}",
                    i + 1,
                    truncate(&name, 30),
                    item.start_beat,
                    item.length_in_beats
                );
            }
            println!("Total: {} beats", composition.total_length_in_beats());

            if export {
                let payload = payload::drag_composition(&session).context("Export failed")?;
                println!("Exported to {}", payload.file().display());
            }
        }

        Commands::Export { category, groove } => {
            let (store, session) = open_library(cli.grooves, &config)?;
            let (c, g) = find_groove(&store, &category, &groove)?;
            let payload = payload::drag_groove(&session, c, g).context("Export failed")?;
            println!("{}", payload.to_json()?);
        }

        Commands::Clean { max_age_minutes } => {
            let dir = config.resolve_export_dir();
            let minutes = max_age_minutes.unwrap_or(config.export_max_age_minutes);
            let removed = bandmate::composer::export::cleanup_old_exports(
                &dir,
                Duration::from_secs(minutes * 60),
            )
            .context("Cleanup failed")?;
            println!(
                "Removed {} exports older than {} minutes from {}",
                removed,
                minutes,
                dir.display()
            );
        }
    }

    Ok(())
}

/// Scan the groove library and start a session on it.
fn open_library(grooves: Option<PathBuf>, config: &AppConfig) -> Result<(Arc<GrooveStore>, Session)> {
    // Resolve groove library: CLI > config > default locations
    let grooves_dir = grooves
        .or_else(|| config.resolve_grooves_dir())
        .context("No groove library found. Pass --grooves or set grooves_dir in config.")?;
    log::info!("Groove library: {}", grooves_dir.display());

    let store = Arc::new(GrooveStore::new());
    store
        .scan(&grooves_dir)
        .with_context(|| format!("Failed to scan {}", grooves_dir.display()))?;
    let session = Session::new(Arc::clone(&store), SessionOptions::from_config(config));
    Ok((store, session))
}

fn find_groove(store: &GrooveStore, category: &str, groove: &str) -> Result<(usize, usize)> {
    store
        .find(category, groove)
        .with_context(|| format!("No groove '{}' in category '{}'", groove, category))
}

/// Split `Category/groove[:bars]`.
fn parse_item(spec: &str) -> Result<(&str, BarCount)> {
    match spec.rsplit_once(':') {
        Some((path, bars)) => {
            let bars = bars.parse::<BarCount>().map_err(anyhow::Error::msg)?;
            Ok((path, bars))
        }
        None => Ok((spec, BarCount::All)),
    }
}

fn analyze(session: &Session, file: &Path) -> Result<(AnalysisReport, Vec<GrooveMatch>)> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner:.green} {msg}").unwrap());
    pb.set_message(format!("Analyzing {}", file.display()));
    pb.enable_steady_tick(Duration::from_millis(100));

    session.analyze_file(file);
    let outcome = session.wait_analysis(Duration::from_secs(120));
    pb.finish_and_clear();

    let outcome = outcome.context("Analysis timed out")?;
    outcome
        .result
        .with_context(|| format!("Analysis of {} failed", file.display()))
}

fn run_preview(session: &Session, config: &AppConfig, beats: f64) {
    let transport = TransportInfo::stopped(config.block_size.max(1));
    let block_beats = transport.num_samples as f64 * session.effective_bpm(&transport)
        / (60.0 * config.sample_rate);
    if block_beats <= 0.0 {
        return;
    }

    let mut out = Vec::with_capacity(256);
    let mut elapsed = 0.0;
    let mut block_index = 0_u64;

    println!("{:>8} {:>8} {:>5} {:>5} {:>4}", "Block", "Beat", "Note", "Vel", "");
    while elapsed < beats && session.is_playing_groove() {
        out.clear();
        session.process_block(&transport, &mut out);
        let at = session.position().unwrap_or(elapsed);
        for event in &out {
            println!(
                "{:>8} {:>8.3} {:>5} {:>5} {:>4}",
                block_index,
                at,
                event.note,
                event.velocity,
                if event.on { "on" } else { "off" }
            );
        }
        elapsed += block_beats;
        block_index += 1;
    }
}

fn print_report(report: &AnalysisReport) {
    let pattern = &report.pattern;
    println!("File:        {}", report.file_name);
    println!("Duration:    {:.2}s at {} Hz", report.duration_secs, report.sample_rate);
    println!(
        "Tempo:       {:.1} BPM ({:?}, confidence {:.1})",
        pattern.bpm, report.bpm_source, pattern.confidence
    );
    if !pattern.alternative_bpms.is_empty() {
        let alts: Vec<String> = pattern.alternative_bpms.iter().map(|b| format!("{:.1}", b)).collect();
        println!("Candidates:  {}", alts.join(", "));
    }
    println!(
        "Onsets:      {} over {:.1} beats",
        pattern.onset_times_beats.len(),
        pattern.length_in_beats
    );
}

fn print_matches(matches: &[GrooveMatch]) {
    if matches.is_empty() {
        println!("No matching grooves.");
        return;
    }
    println!("{:<4} {:<20} {:<30} {:>6}", "#", "Category", "Groove", "Score");
    for (i, m) in matches.iter().enumerate() {
        println!(
            "{:<4} {:<20} {:<30} {:>6.1}",
            i + 1,
            truncate(&m.category_name, 20),
            truncate(&m.groove_name, 30),
            m.match_score
        );
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let t: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", t)
    }
}
