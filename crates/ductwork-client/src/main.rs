//! Ductwork Client - requester endpoint of the FIFO transport.
//!
//! Connects to a responder (optionally spawning one), then runs the
//! requested flow: a single data query, a whole-stream export, or a file
//! transfer. With `-c` the traffic moves to a freshly negotiated dynamic
//! channel first.

use anyhow::{Context, Result};
use clap::Parser;
use ductwork_core::config::ProtocolConfig;
use ductwork_core::{Requester, Settings};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Rows exported per stream by the whole-stream mode.
const EXPORT_ROWS: usize = 1000;

#[derive(Parser, Debug)]
#[command(name = "ductwork-client")]
#[command(about = "FIFO transport requester")]
struct Args {
    /// Subject id to query
    #[arg(short = 'p', long)]
    subject: Option<i32>,

    /// Query time in seconds; omit to export the first 1000 rows
    #[arg(short = 't', long)]
    time: Option<f64>,

    /// Stream number (1 or 2)
    #[arg(short = 'e', long, default_value = "1")]
    stream: i32,

    /// File to transfer from the responder
    #[arg(short = 'f', long)]
    file: Option<String>,

    /// Maximum message size in bytes (32..=4096)
    #[arg(short = 'm', long)]
    max_message: Option<usize>,

    /// Negotiate a dynamic channel and run the requests on it
    #[arg(short = 'c', long)]
    new_channel: bool,

    /// Spawn a ductwork-server with matching settings
    #[arg(long)]
    spawn_server: bool,

    /// Directory the channel FIFOs live in
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Directory received files and exports are written to
    #[arg(long, default_value = "received")]
    out: PathBuf,

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

    let mut settings = Settings::from_env()?;
    if let Some(dir) = args.dir.clone() {
        settings = settings.with_channel_dir(dir);
    }
    if let Some(max) = args.max_message {
        settings = settings.with_max_message(max)?;
    }

    let server = if args.spawn_server {
        Some(spawn_server(&args, &settings)?)
    } else {
        None
    };

    let mut requester = Requester::connect(&settings.channel_dir, settings.max_message)?;

    if args.new_channel {
        let name = requester.new_channel()?;
        info!(channel = %name, "requests will use the dynamic channel");
    }

    if let Some(name) = &args.file {
        fetch_file(&requester, name, &args.out)?;
    }

    if let Some(subject) = args.subject {
        match args.time {
            Some(time) => {
                let value = requester.data_query(subject, time, args.stream)?;
                println!("{value}");
            }
            None => export_subject(&requester, subject, &args.out)?,
        }
    }

    requester.shutdown()?;

    if let Some(mut child) = server {
        let status = child.wait().context("waiting for spawned server")?;
        info!(%status, "spawned server exited");
    }
    Ok(())
}

/// Start a responder sibling process with matching transport settings.
///
/// Prefers a `ductwork-server` next to this executable, falling back to
/// whatever the PATH resolves.
fn spawn_server(args: &Args, settings: &Settings) -> Result<Child> {
    let sibling = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.join("ductwork-server")))
        .filter(|p| p.is_file());
    let program = sibling.unwrap_or_else(|| PathBuf::from("ductwork-server"));

    let mut cmd = Command::new(&program);
    cmd.arg("-m").arg(settings.max_message.to_string());
    if let Some(dir) = &args.dir {
        cmd.arg("--dir").arg(dir);
    }
    if args.debug {
        cmd.arg("--debug");
    }

    info!(server = %program.display(), "spawning responder");
    cmd.spawn()
        .with_context(|| format!("spawning {}", program.display()))
}

/// Transfer one file into the output directory.
fn fetch_file(requester: &Requester, name: &str, out: &Path) -> Result<()> {
    let dest = out.join(name);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = std::fs::File::create(&dest)
        .with_context(|| format!("creating {}", dest.display()))?;
    let mut sink = BufWriter::new(file);

    let bytes = requester.fetch_file(name, &mut sink)?;
    sink.flush()?;
    info!(file = %name, bytes, dest = %dest.display(), "file received");
    Ok(())
}

/// Export the first [`EXPORT_ROWS`] readings of both streams to
/// `<out>/<subject>.csv`, one query per row and stream.
fn export_subject(requester: &Requester, subject: i32, out: &Path) -> Result<()> {
    std::fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let dest = out.join(format!("{subject}.csv"));
    let file = std::fs::File::create(&dest)
        .with_context(|| format!("creating {}", dest.display()))?;
    let mut sink = BufWriter::new(file);

    for row in 0..EXPORT_ROWS {
        let time = row as f64 * ProtocolConfig::SAMPLE_INTERVAL;
        let first = requester.data_query(subject, time, 1)?;
        let second = requester.data_query(subject, time, 2)?;
        writeln!(sink, "{time},{first},{second}")?;
    }
    sink.flush()?;

    info!(subject, rows = EXPORT_ROWS, dest = %dest.display(), "export complete");
    Ok(())
}
