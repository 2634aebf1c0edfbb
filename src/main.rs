use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    ereservify::logging::init().context("init logging")?;

    let cli = ereservify::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        ereservify::cli::Command::Fetch(args) => {
            ereservify::fetch::run(args).await.context("fetch")?;
        }
        ereservify::cli::Command::Assemble(args) => {
            ereservify::assemble::run(args).context("assemble")?;
        }
    }

    Ok(())
}
