// SPDX-License-Identifier: MIT OR Apache-2.0
//! `flowcanvas` - headless host for `FlowCanvas` graphs.
//!
//! Loads saved graph documents against the gameplay registries and can:
//! - check them for stale or mismatched branches and dataflow loops
//! - migrate them to the current node versions
//! - write values into host outputs and read the results back
//!
//! Set `RUST_LOG=flowcanvas_graph=debug` to see edits and pruning.

mod commands;

use clap::{Parser, Subcommand};
use commands::{Assignment, SlotPath};
use flowcanvas_graph::EngineSettings;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "flowcanvas", version)]
#[command(about = "Validate, migrate and evaluate FlowCanvas graphs", long_about = None)]
struct Cli {
    /// Engine settings file (RON). Defaults are used when absent.
    #[arg(long, global = true, value_name = "FILE")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a graph, resolve every branch and report problems
    Check {
        /// Graph document (.ron or .json)
        graph: PathBuf,
    },

    /// Upgrade a graph document to the current node versions
    Migrate {
        /// Document to read
        input: PathBuf,
        /// Document to write; the extension picks the format
        output: PathBuf,
    },

    /// Write values into a graph and read results back
    Eval {
        /// Graph document (.ron or .json)
        graph: PathBuf,

        /// Write a value to an output, e.g. `--write "Int Variable.Value=5"`
        #[arg(long = "write", value_name = "NODE.SLOT=VALUE")]
        writes: Vec<Assignment>,

        /// Read an input after all writes, e.g. `--read "Set Health.Amount"`
        #[arg(long = "read", value_name = "NODE.SLOT")]
        reads: Vec<SlotPath>,
    },
}

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    tracing::debug!("Starting flowcanvas v{}", env!("CARGO_PKG_VERSION"));

    let settings = match &cli.settings {
        Some(path) => EngineSettings::load(path),
        None => EngineSettings::load_or_default(std::path::Path::new(
            flowcanvas_graph::settings::SETTINGS_FILE_NAME,
        )),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!("Failed to load settings: {e}");
            std::process::exit(2);
        }
    };

    let result = match cli.command {
        Commands::Check { graph } => commands::check(&graph, &settings).map(|report| {
            print!("{report}");
            report.is_clean()
        }),
        Commands::Migrate { input, output } => commands::migrate(&input, &output, &settings).map(|count| {
            println!("migrated {count} node(s), wrote {}", output.display());
            true
        }),
        Commands::Eval { graph, writes, reads } => {
            commands::eval(&graph, &writes, &reads, &settings).map(|results| {
                for (path, value) in results {
                    match value {
                        Some(value) => println!("{path} = {value}"),
                        None => println!("{path} = <none>"),
                    }
                }
                true
            })
        }
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(2);
        }
    }
}
