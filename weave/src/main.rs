mod commands;
mod formatting;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "weave")]
#[command(about = "Incremental type-check and transpile orchestrator for TypeScript monorepos")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Workspace root holding the root weave.toml.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(short, long, global = true, action)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List discovered workspace nodes.
    List {
        #[arg(long, action)]
        json: bool,
    },
    /// Print the dependency order and parallel levels.
    Graph {
        #[arg(long, action)]
        json: bool,
    },
    /// Show what a node depends on and what depends on it.
    Why { node: String },
    /// Type-check nodes in dependency order, skipping unchanged ones.
    Check {
        nodes: Vec<String>,
        #[arg(long, action)]
        only_self: bool,
        #[arg(long, action)]
        force: bool,
        #[arg(short = 'j', long)]
        parallel: Option<usize>,
    },
    /// Transpile nodes in dependency order.
    Transpile {
        nodes: Vec<String>,
        #[arg(long, action)]
        only_self: bool,
        #[arg(short = 'j', long)]
        parallel: Option<usize>,
    },
    /// Re-check nodes and their dependents whenever their sources change.
    Watch {
        nodes: Vec<String>,
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
    /// Remove the checksum cache.
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::List { json } => commands::cmd_list(cli.root, json)?,
        Commands::Graph { json } => commands::cmd_graph(cli.root, json)?,
        Commands::Why { node } => commands::cmd_why(cli.root, node)?,
        Commands::Check {
            nodes,
            only_self,
            force,
            parallel,
        } => commands::cmd_check(cli.root, nodes, only_self, force, parallel)?,
        Commands::Transpile {
            nodes,
            only_self,
            parallel,
        } => commands::cmd_transpile(cli.root, nodes, only_self, parallel)?,
        Commands::Watch { nodes, debounce_ms } => commands::cmd_watch(cli.root, nodes, debounce_ms)?,
        Commands::Clean => commands::cmd_clean(cli.root)?,
    }

    Ok(())
}
