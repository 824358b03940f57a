//! formdag CLI: check, run, pack and inspect form definitions.

mod commands;
mod config;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use config::FormdagConfig;

#[derive(Parser)]
#[command(name = "formdag", version, about = "Form definition recalculation engine")]
struct Cli {
    /// Configuration file (default: formdag.toml in the working directory or above)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log engine progress at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a form and print its evaluation order, or the cycle that prevents one
    Check {
        /// Form definition (.json)
        form: PathBuf,
    },
    /// Initialise a form, apply edits, and print events and final answers
    Run {
        /// Form definition (.json) or stored form (.fdf)
        form: PathBuf,
        /// Edit script (.json): a list of set / insert / delete operations
        #[arg(long)]
        script: Option<PathBuf>,
        /// Stored form (.fdf) whose answers are restored before initialising
        #[arg(long)]
        answers: Option<PathBuf>,
        /// Print answers as JSON
        #[arg(long)]
        json: bool,
    },
    /// Build a form and store it as an .fdf file
    Pack {
        /// Form definition (.json)
        form: PathBuf,
        /// Output path (default: the input with an .fdf extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Initialise before storing
        #[arg(long)]
        initialize: bool,
    },
    /// Show the sections, binds and answers of an .fdf file
    Inspect {
        /// Stored form (.fdf)
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let cwd = std::env::current_dir()?;
    let config = match &cli.config {
        Some(path) => FormdagConfig::load(path)?,
        None => FormdagConfig::find_and_load(&cwd)?.unwrap_or_default(),
    };

    match cli.command {
        Commands::Check { form } => commands::check::run(&form, &config),
        Commands::Run {
            form,
            script,
            answers,
            json,
        } => commands::run::run(
            &form,
            script.as_deref(),
            answers.as_deref(),
            json,
            &config,
        ),
        Commands::Pack {
            form,
            output,
            initialize,
        } => commands::pack::run(&form, output.as_deref(), initialize, &config),
        Commands::Inspect { file } => commands::inspect::run(&file),
    }
}
