// ABOUTME: Tracing setup for the sinitaivas binary.
// ABOUTME: Everything passing RUST_LOG goes to stderr; warnings and errors are also appended to a log file.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

const DEFAULT_FILTER: &str = "sinitaivas=info,info";

/// Install the global subscriber, appending warnings and errors to `log_file`.
pub fn init(log_file: &Path) -> anyhow::Result<()> {
    let file = open_log_file(log_file)
        .with_context(|| format!("failed to open log file {}", log_file.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing::subscriber::set_global_default(subscriber(filter, file))
        .context("failed to install tracing subscriber")?;
    Ok(())
}

fn subscriber(filter: EnvFilter, file: File) -> impl Subscriber + Send + Sync + 'static {
    let console = fmt::layer().with_writer(io::stderr).with_filter(filter);

    let persistent = fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry().with(console).with(persistent)
}

/// Open `path` for appending, creating it and its parent directory if needed.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
