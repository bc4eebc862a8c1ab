use clap::{Parser, Subcommand};
use colored::*;
use splitlab_cli::{docker_sandbox, init_tracing, reap_orphans, run_server, Config};
use std::process;

#[derive(Parser)]
#[command(name = "splitlab")]
#[command(about = "SplitLab - live previews of Git repositories in isolated sandboxes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        /// API server port (overrides SPLITLAB_API_PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Remove every splitlab-session-* container, including those of a running server
    ///
    /// Meant for when no server is running; `serve` performs the same sweep on startup.
    ReapOrphans,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = handle_command(cli.command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let config = Config::from_env()?;

    match command {
        Commands::Serve { port } => {
            let config = match port {
                Some(port) => config.with_port(port)?,
                None => config,
            };
            run_server(config).await
        }
        Commands::ReapOrphans => {
            let sandbox = docker_sandbox(&config).await?;
            let report = reap_orphans(&sandbox).await?;

            let removed = report.completed_steps().count();
            println!("{} Removed {} orphaned sandboxes", "✓".green(), removed);
            for (step, error) in report.failures() {
                println!("{} {}: {}", "!".yellow(), step, error);
            }
            Ok(())
        }
    }
}
