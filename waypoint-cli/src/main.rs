use std::io::{IsTerminal, Write};

use clap::Parser;
use tracing_subscriber::EnvFilter;
use waypoint_cli::{Cli, Command};

#[tokio::main]
async fn main() {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Failures are reported once, by the `Error:` line below.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let output = match cli.command {
        Command::Ask(args) => waypoint_cli::ask(args).await,
        Command::Index(args) => waypoint_cli::index(args).await.map(|manifest| {
            format!(
                "indexed {} documents ({}/{}, {})",
                manifest.document_count, manifest.embedder, manifest.embedding_model, manifest.metric
            )
        }),
    };

    match output {
        Ok(text) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|()| stdout.flush()) {
                eprintln!("Error: cannot write output: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}
