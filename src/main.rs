use std::path::{Path, PathBuf};
use std::process::ExitCode;
use clap::{Parser, Subcommand};
use serde_json::json;

#[allow(unused_imports)]
use log::{debug, error, info, warn};

use panoptic_curator::build_info::BuildInfo;
use panoptic_curator::config::{DatasetCatalog, DEFAULT_CONFIG_FILE};
use panoptic_curator::export::{export_selection_file, find_selection_files};
use panoptic_curator::logging;
use panoptic_curator::render::OverlayRenderer;
use panoptic_curator::session::Session;
use panoptic_curator::settings::UserSettings;

const APP_NAME: &str = "panoptic-curator";

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Dataset catalog (JSON or YAML)
    #[clap(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// User settings file; defaults to settings.yaml in the config directory
    #[clap(long)]
    settings: Option<PathBuf>,

    /// Print build details and exit
    #[clap(long)]
    build_info: bool,

    /// Write the captured log lines to debug.log in the log directory when done
    #[clap(long)]
    export_logs: bool,

    #[command(subcommand)]
    cmd: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// List the configured datasets
    Datasets,
    /// List the frames of a dataset with their mask coverage
    Frames {
        dataset: String,

        /// Only frames whose coverage is strictly above this percentage
        #[clap(long)]
        min_coverage: Option<f64>,
    },
    /// Compare label statistics of the saved selection with the whole dataset
    Stats {
        dataset: String,

        /// Print machine readable JSON instead of tables
        #[clap(long)]
        json: bool,
    },
    /// Change and save the selection of a dataset.
    /// Applied in the order clear, add, remove, toggle.
    Select {
        dataset: String,

        #[clap(long)]
        add: Vec<String>,

        #[clap(long)]
        remove: Vec<String>,

        #[clap(long)]
        toggle: Vec<String>,

        #[clap(long)]
        clear: bool,
    },
    /// Export selected frames. Without arguments every selected_*.json in the
    /// selection directory is exported.
    Export {
        selection_files: Vec<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.build_info {
        println!("{}", BuildInfo::detailed_info());
        return ExitCode::SUCCESS;
    }

    let log_buffer = logging::setup_logger();
    logging::setup_panic_hook(APP_NAME, log_buffer.clone());
    debug!("{} {}", APP_NAME, BuildInfo::display_version());

    let Some(cmd) = args.cmd.clone() else {
        eprintln!("No command given. Run with --help for usage.");
        return ExitCode::FAILURE;
    };

    let settings = UserSettings::load(args.settings.as_deref());
    let result = run(cmd, &args.config, settings).await;

    if args.export_logs {
        match logging::export_debug_logs(APP_NAME, &log_buffer) {
            Ok(path) => eprintln!("Debug logs exported to: {}", path.display()),
            Err(e) => eprintln!("Failed to export debug logs: {e}"),
        }
    }

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Returns false when the command ran but some of its work failed
async fn run(cmd: Command, config_path: &Path, settings: UserSettings) -> CliResult<bool> {
    let catalog = DatasetCatalog::load(config_path)?;

    match cmd {
        Command::Datasets => {
            for name in catalog.names() {
                println!("{name}");
            }
            Ok(true)
        }
        Command::Frames { dataset, min_coverage } => {
            let mut session = Session::new(catalog, settings);
            print_switch(&session.switch_to(&dataset).await?);
            let index = session.index().ok_or("dataset not loaded")?;

            let keys: Vec<&str> = match min_coverage {
                Some(threshold) => index.frames_with_min_coverage(threshold),
                None => index.frame_keys().collect(),
            };
            for key in keys {
                let selected = if session.is_selected(key) { "*" } else { " " };
                println!("{selected} {key}\t{:.2}%", index.coverage_for(key)?);
            }
            Ok(true)
        }
        Command::Stats { dataset, json } => {
            let mut session = Session::new(catalog, settings);
            let outcome = session.switch_to(&dataset).await?;
            let index = session.index().ok_or("dataset not loaded")?;
            let goal = index.goal_stats();
            let current = session.current_stats()?;
            let histograms = session.histograms()?;

            if json {
                let document = json!({
                    "dataset": outcome.name,
                    "selected_frames": session.active().map(|a| a.selection().len()),
                    "goal": goal,
                    "selected": current,
                    "histograms": histograms,
                });
                println!("{}", serde_json::to_string_pretty(&document)?);
                return Ok(true);
            }

            print_switch(&outcome);
            println!("{:>6}  {:<24} {:>10} {:>10} {:>14} {:>14}", "id", "label", "goal", "selected", "goal area", "selected area");
            for (i, label) in goal.labels.iter().enumerate() {
                println!(
                    "{:>6}  {:<24} {:>10} {:>10} {:>14} {:>14}",
                    label,
                    index.category_name(*label),
                    goal.freqs[i],
                    current.freqs[i],
                    goal.areas[i],
                    current.areas[i],
                );
            }

            println!("\nMasks per image");
            print_histograms(&histograms.goal_mask_counts, &histograms.selected_mask_counts);
            println!("\nUnique labels per image");
            print_histograms(&histograms.goal_unique_labels, &histograms.selected_unique_labels);
            Ok(true)
        }
        Command::Select { dataset, add, remove, toggle, clear } => {
            let mut session = Session::new(catalog, settings);
            session.switch_to(&dataset).await?;

            if clear {
                session.clear_selection()?;
            }
            for key in &add {
                session.select(key)?;
            }
            for key in &remove {
                session.deselect(key)?;
            }
            for key in &toggle {
                session.toggle(key)?;
            }

            if let Some(path) = session.save_selection()? {
                let count = session.active().map(|a| a.selection().len()).unwrap_or(0);
                println!("{count} frames selected, saved to {}", path.display());
            }
            Ok(true)
        }
        Command::Export { selection_files } => {
            let files = if selection_files.is_empty() {
                find_selection_files(&settings.selection_dir)?
            } else {
                selection_files
            };
            if files.is_empty() {
                return Err("No selection files found to process.".into());
            }

            let mut all_ok = true;
            for file in &files {
                let renderer = OverlayRenderer::new(settings.overlay_alpha);
                match export_selection_file(file, &catalog, &settings, renderer) {
                    Ok(report) => {
                        println!(
                            "{}: exported {} frames to {}",
                            report.dataset,
                            report.exported,
                            report.output_dir.display()
                        );
                        for (key, reason) in &report.skipped {
                            println!("  skipped {key}: {reason}");
                        }
                    }
                    Err(e) => {
                        error!("Error processing {}: {}", file.display(), e);
                        eprintln!("Error processing {}: {e}", file.display());
                        all_ok = false;
                    }
                }
            }
            Ok(all_ok)
        }
    }
}

fn print_switch(outcome: &panoptic_curator::session::SwitchOutcome) {
    let report = &outcome.report;
    println!(
        "{}: {} frames ({} restored selections)",
        outcome.name, report.frames_loaded, outcome.restored
    );
    if let Some(warning) = &outcome.warning {
        println!("warning: {warning}");
    }
}

fn print_histograms(goal: &panoptic_curator::stats::Histogram, selected: &panoptic_curator::stats::Histogram) {
    println!("{:>10} {:>10} {:>10}", "bin", "goal", "selected");
    for (i, label) in goal.labels.iter().enumerate() {
        println!("{:>10} {:>10} {:>10}", label, goal.counts[i], selected.counts.get(i).copied().unwrap_or(0));
    }
}
