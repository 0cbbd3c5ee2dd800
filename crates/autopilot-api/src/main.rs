//! Autopilot workflow engine admin/ops CLI.
//!
//! Binary name: `apctl`
//!
//! Parses CLI arguments, initializes the database and engine, restores
//! admission state and reaps stale runs, then dispatches to a command.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use autopilot_observe::fields::default_filter;
use autopilot_observe::tracing_setup::{init_tracing, shutdown_tracing};
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(default_filter(cli.verbose, cli.quiet), cli.otel) {
        eprintln!("Warning: tracing setup failed: {e}");
    }

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "apctl", &mut std::io::stdout());
        return Ok(());
    }

    // Failure injection only applies to the run command
    let injections = match &cli.command {
        Commands::Run(args) => args.fail.clone(),
        _ => Vec::new(),
    };
    let state = AppState::init(injections).await?;

    let result = match cli.command {
        Commands::Run(args) => cli::run::run(&state, args, cli.json, cli.quiet).await,
        Commands::Workflow { action } => {
            cli::workflow::handle_workflow_command(action, &state, cli.json).await
        }
        Commands::DeadLetter { action } => {
            cli::dead_letter::handle_dead_letter_command(action, &state, cli.json).await
        }
        Commands::Status => cli::status::status(&state, cli.json).await,
        Commands::Completions { .. } => Ok(()),
    };

    state.shutdown().await;
    shutdown_tracing();
    result
}
