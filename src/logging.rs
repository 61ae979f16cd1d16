use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config;

const LOG_FILE_NAME: &str = "panelctl.log";

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Subcommands log to stderr and stay quiet unless RUST_LOG asks otherwise
pub fn init_cli() -> Result<()> {
    fmt::Subscriber::builder()
        .with_env_filter(filter("warn"))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!(err))
}

/// The panel owns the terminal, so it logs to a file in the data directory.
/// Returns the path of the log file.
pub fn init_panel() -> Result<PathBuf> {
    let path = config::data_dir()?.join(LOG_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    fmt::Subscriber::builder()
        .with_env_filter(filter("info,panelctl=debug"))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow!(err))?;
    Ok(path)
}
