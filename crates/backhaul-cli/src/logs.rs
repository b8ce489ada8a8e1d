use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

fn filter() -> EnvFilter {
	EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_stdout() {
	tracing_subscriber::fmt().with_env_filter(filter()).init();
}

/// Daemon log: truncated on every start, no colours.
pub fn init_daemon(path: &Path) -> anyhow::Result<()> {
	let file = OpenOptions::new()
		.create(true)
		.write(true)
		.truncate(true)
		.mode(0o640)
		.open(path)
		.with_context(|| format!("failed to open log file {}", path.display()))?;

	tracing_subscriber::fmt()
		.with_env_filter(filter())
		.with_ansi(false)
		.with_writer(Mutex::new(file))
		.init();
	Ok(())
}
