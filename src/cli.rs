use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Fetch(FetchArgs),
    Assemble(AssembleArgs),
}

#[derive(Debug, Args)]
pub struct FetchArgs {
    /// Book identifier from the detail-page URL.
    #[arg(long)]
    pub book_id: String,

    /// Directory for downloaded page images and the acquisition log.
    #[arg(long, default_value = "downloads")]
    pub downloads: String,

    /// Directory for the assembled document.
    #[arg(long, default_value = "output")]
    pub output: String,

    /// Overall deadline for scan-token discovery, in seconds.
    #[arg(long, default_value_t = 90)]
    pub scan_timeout_secs: u64,

    /// Deadline for navigations and element waits, in seconds.
    #[arg(long, default_value_t = 45)]
    pub nav_timeout_secs: u64,

    /// Explicit Chrome/Chromium executable (default: auto-detected).
    #[arg(long)]
    pub chrome: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct AssembleArgs {
    /// Input path to an acquisition log (`manifest.jsonl`).
    #[arg(long)]
    pub manifest: String,

    /// Output file path for the assembled document.
    #[arg(long)]
    pub out: String,

    /// Document title (default: derived from the output file name).
    #[arg(long)]
    pub title: Option<String>,
}
