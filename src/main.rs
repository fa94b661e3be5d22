//! ModelFlow CLI Entry Point
//!
//! Runs the built-in model selection workflow.
//!
//! # Usage
//!
//! ```bash
//! # Execute today's scheduled run
//! modelflow
//!
//! # Preview the task graph without executing
//! modelflow --dry-run
//!
//! # Re-run a specific logical date
//! modelflow --run-date 2023-01-05
//!
//! # Pin training scores for a reproducible run
//! modelflow --scores A=9,B=3,C=5
//!
//! # Set maximum parallel tasks
//! modelflow --parallel 8
//! ```

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use chrono::NaiveDate;
use log::info;

use modelflow::execution::Engine;
use modelflow::pipeline::{build_with_scorer, fixed_scorer, random_scorer, Scorer};
use modelflow::{APP_NAME, VERSION};

/// Default maximum parallel tasks.
const DEFAULT_MAX_PARALLEL: usize = 4;

/// Command-line configuration parsed from arguments.
#[derive(Default)]
struct Config {
    dry_run: bool,
    run_date: Option<String>,
    scores: Option<HashMap<String, u32>>,
    state_dir: Option<PathBuf>,
    max_parallel: Option<usize>,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME, VERSION);
    println!("Branching Workflow Execution Engine");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: modelflow [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --dry-run           Preview the task graph without executing");
    println!("  --run-date DATE     Logical run date, YYYY-MM-DD (default: latest scheduled)");
    println!("  --scores LIST       Fixed training scores, e.g. A=9,B=3,C=5");
    println!("  --state-dir PATH    Directory for run records (default: .modelflow)");
    println!("  --parallel N        Maximum parallel tasks (default: {})", DEFAULT_MAX_PARALLEL);
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  modelflow");
    println!("  modelflow --dry-run");
    println!("  modelflow --run-date 2023-01-05 --scores A=9,B=3,C=5");
}

/// Parses a `A=9,B=3,C=5` list into a score map.
fn parse_scores(list: &str) -> Result<HashMap<String, u32>, String> {
    let mut scores = HashMap::new();

    for pair in list.split(',') {
        let (model, score) = pair
            .split_once('=')
            .ok_or_else(|| format!("Invalid score entry '{}', expected MODEL=SCORE", pair))?;
        let score: u32 = score
            .parse()
            .map_err(|_| format!("Invalid score value in '{}'", pair))?;
        scores.insert(model.trim().to_string(), score);
    }

    Ok(scores)
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => {
                config.dry_run = true;
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--run-date" => {
                i += 1;
                if i >= args.len() {
                    return Err("--run-date requires a date argument".to_string());
                }
                NaiveDate::parse_from_str(&args[i], "%Y-%m-%d")
                    .map_err(|_| format!("Invalid date '{}', expected YYYY-MM-DD", args[i]))?;
                config.run_date = Some(args[i].clone());
            }
            "--scores" => {
                i += 1;
                if i >= args.len() {
                    return Err("--scores requires a list argument".to_string());
                }
                config.scores = Some(parse_scores(&args[i])?);
            }
            "--state-dir" => {
                i += 1;
                if i >= args.len() {
                    return Err("--state-dir requires a path argument".to_string());
                }
                config.state_dir = Some(PathBuf::from(&args[i]));
            }
            "--parallel" => {
                i += 1;
                if i >= args.len() {
                    return Err("--parallel requires a number argument".to_string());
                }
                config.max_parallel = Some(
                    args[i]
                        .parse()
                        .map_err(|_| format!("Invalid parallel value: {}", args[i]))?,
                );
            }
            arg => {
                return Err(format!("Unknown option: {}", arg));
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    print_banner();

    if config.dry_run {
        info!("Mode: DRY RUN (tasks will not execute)");
        println!();
    }

    let scorer: Scorer = match config.scores {
        Some(scores) => {
            info!("Using fixed training scores: {:?}", scores);
            fixed_scorer(scores)
        }
        None => random_scorer(),
    };

    let workflow = build_with_scorer(scorer)?;
    info!("Workflow '{}': {} tasks", workflow.name, workflow.len());

    let mut engine = Engine::new(workflow);
    engine.set_max_parallel(config.max_parallel.unwrap_or(DEFAULT_MAX_PARALLEL));
    engine.set_dry_run(config.dry_run);

    if let Some(run_date) = config.run_date {
        engine.set_run_id(run_date);
    }

    if let Some(dir) = config.state_dir {
        engine.set_state_dir(dir);
    }

    engine.run()?;

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
