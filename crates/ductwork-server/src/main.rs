//! Ductwork Server - responder endpoint of the FIFO transport.
//!
//! Serves one client session over FIFO channels in the agreed directory:
//! data queries against a CSV data set, byte-range file queries against a
//! served directory, and dynamic channel negotiation on the control
//! channel.

use anyhow::Result;
use clap::Parser;
use ductwork_core::{Responder, Settings};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "ductwork-server")]
#[command(about = "FIFO transport responder")]
struct Args {
    /// Maximum message size in bytes (32..=4096)
    #[arg(short = 'm', long)]
    max_message: Option<usize>,

    /// Directory the channel FIFOs live in
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Worker thread count
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Root of the per-subject CSV data set
    #[arg(long, default_value = "data")]
    data_root: PathBuf,

    /// Root directory served for file queries
    #[arg(long, default_value = "files")]
    file_root: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Ductwork Server");

    let mut settings = Settings::from_env()?
        .with_data_root(args.data_root)
        .with_file_root(args.file_root)
        .with_workers(args.workers)?;
    if let Some(dir) = args.dir {
        settings = settings.with_channel_dir(dir);
    }
    if let Some(max) = args.max_message {
        settings = settings.with_max_message(max)?;
    }

    // An interrupted server must not leave FIFOs behind; a stale control
    // pair would deadlock the next session's open.
    let chan_dir = settings.channel_dir.clone();
    ctrlc::set_handler(move || {
        remove_channel_fifos(&chan_dir);
        std::process::exit(130);
    })?;

    Responder::new(settings)?.run()?;
    info!("Ductwork Server exited cleanly");
    Ok(())
}

/// Unlink every channel FIFO under `dir`.
fn remove_channel_fifos(dir: &std::path::Path) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_fifo_name = path
            .extension()
            .is_some_and(|ext| ext == "req" || ext == "rep");
        if is_fifo_name {
            let _ = std::fs::remove_file(&path);
        }
    }
}
