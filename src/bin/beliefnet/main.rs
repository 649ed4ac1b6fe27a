//! beliefnet CLI tool
//!
//! Command-line interface for inspecting and querying belief network descriptions.
//!
//! ## Commands
//!
//! - `format <path>`: Parse a description and print its canonical form
//! - `dot <path>`: Print the network as a Graphviz digraph
//! - `posterior <path>`: Assert evidence and print posteriors
//!
//! Networks named by foreign parent references are loaded from the search path first when
//! listed with `--preload`. Exit status is 0 on success and 1 on any failure.

use beliefnet_core::{
    config::{ConfigProvider, EngineConfig, TomlConfigProvider},
    context::Context,
    network::{BeliefNetwork, NetworkKind},
    InferenceError,
};
use clap::{Parser, Subcommand};
use std::{
    collections::BTreeMap,
    fs::read_to_string,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

#[derive(Parser)]
#[command(name = "beliefnet")]
#[command(author, version, about = "A tool for inspecting and querying belief networks", long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Networks to load from the search path before the main description
    #[arg(long, global = true)]
    preload: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a network description and print it in canonical form
    Format {
        /// Path to the network description
        path: PathBuf,
    },

    /// Print a network description as a Graphviz digraph
    Dot {
        /// Path to the network description
        path: PathBuf,
    },

    /// Assert evidence and print posterior distributions
    Posterior {
        /// Path to the network description
        path: PathBuf,

        /// Evidence as `variable=value`; value is a state name or number
        #[arg(short, long)]
        evidence: Vec<String>,

        /// Variables to report (default: all)
        #[arg(short, long)]
        variable: Vec<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), InferenceError> {
    let config = match &cli.config {
        Some(path) => TomlConfigProvider::new(path.clone()).load()?,
        None => EngineConfig::default(),
    };
    let context = Context::new(config)?;
    for name in &cli.preload {
        context.load_network(name)?;
    }

    match cli.command {
        Commands::Format { path } => {
            let network = open(&context, &path)?;
            print!("{}", network.format_string()?);
        }
        Commands::Dot { path } => {
            let network = open(&context, &path)?;
            print!("{}", network.dot_format()?);
        }
        Commands::Posterior {
            path,
            evidence,
            variable,
            json,
        } => {
            let network = open(&context, &path)?;
            for assignment in &evidence {
                assign(&network, assignment)?;
            }
            if network.kind() == NetworkKind::Loopy {
                network.initialize_messages()?;
                let report = network.propagate(&context.config().loopy)?;
                tracing::info!(
                    "{} sweeps, converged: {}, max change {:e}",
                    report.iterations,
                    report.converged,
                    report.max_change
                );
            }
            let names = if variable.is_empty() {
                network.variable_names()
            } else {
                variable
            };
            let mut posteriors = BTreeMap::new();
            for name in names {
                let posterior = network.get_posterior(&name)?;
                posteriors.insert(name, posterior);
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&posteriors)?);
            } else {
                for (name, posterior) in &posteriors {
                    println!("{name}: {posterior}");
                }
            }
        }
    }
    context.teardown();
    Ok(())
}

fn open(context: &Context, path: &Path) -> Result<Arc<BeliefNetwork>, InferenceError> {
    let text = read_to_string(path)?;
    context.parse_network(&text)
}

fn assign(network: &BeliefNetwork, assignment: &str) -> Result<(), InferenceError> {
    let (name, value) = assignment.split_once('=').ok_or_else(|| {
        InferenceError::InvalidArgument(format!(
            "evidence '{assignment}' is not of the form variable=value"
        ))
    })?;
    let (name, value) = (name.trim(), value.trim());
    match network.variable(name)?.numeric_value(value) {
        Ok(index) => network.assign_evidence(name, index),
        Err(_) => {
            let value: f64 = value.parse().map_err(|_| {
                InferenceError::InvalidArgument(format!(
                    "'{value}' is neither a state of {name} nor a number"
                ))
            })?;
            network.assign_evidence(name, value)
        }
    }
}
