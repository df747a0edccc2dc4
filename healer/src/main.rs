//! CLI entry point: run one healing pipeline locally and print the results
//! document as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use healer::config::{load_config, resolve_github_token, AgentConfig};
use healer::pipeline::{run_pipeline, NoopObserver};
use healer::state::{RunMode, RunState};

#[derive(Parser)]
#[command(name = "healer", version, about = "Self-healing CI pipeline agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Clone a repository, heal its CI failures, and print the results.
    Run {
        /// Target repository, e.g. https://github.com/acme/widgets
        #[arg(long)]
        repo_url: String,
        #[arg(long)]
        team_name: String,
        #[arg(long)]
        team_leader: String,
        #[arg(long, value_enum, default_value = "run-agent")]
        mode: RunMode,
        /// Overrides the configured default when set.
        #[arg(long)]
        max_iterations: Option<u32>,
        /// GitHub token; falls back to the GITHUB_TOKEN env var.
        #[arg(long)]
        token: Option<String>,
        /// Optional TOML config file.
        #[arg(long, default_value = "healer.toml")]
        config: PathBuf,
    },
}

fn main() {
    healer::logging::init("warn");
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            repo_url,
            team_name,
            team_leader,
            mode,
            max_iterations,
            token,
            config,
        } => cmd_run(
            &repo_url,
            &team_name,
            &team_leader,
            mode,
            max_iterations,
            token,
            &config,
        ),
    }
}

fn cmd_run(
    repo_url: &str,
    team_name: &str,
    team_leader: &str,
    mode: RunMode,
    max_iterations: Option<u32>,
    token: Option<String>,
    config_path: &std::path::Path,
) -> Result<()> {
    let config: AgentConfig = load_config(config_path)?;
    let token = resolve_github_token(token.as_deref());

    let mut state = RunState::new(
        repo_url,
        team_name,
        team_leader,
        max_iterations.unwrap_or(config.max_iterations),
        mode.is_read_only(),
        token,
    );

    let mut observer = NoopObserver;
    let document = run_pipeline(&mut state, &config, &mut observer);

    let json = serde_json::to_string_pretty(&document).context("serialize results")?;
    println!("{json}");
    Ok(())
}
