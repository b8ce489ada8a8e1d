//! One backup run: every configured directory and database, in order,
//! continuing past failed items.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::process::Command;

use crate::config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupItem {
	Directory(PathBuf),
	Database { name: String, command: String },
}

impl BackupItem {
	fn kind(&self) -> &'static str {
		match self {
			BackupItem::Directory(_) => "directory",
			BackupItem::Database { .. } => "database",
		}
	}

	fn name(&self) -> String {
		match self {
			BackupItem::Directory(path) => path.display().to_string(),
			BackupItem::Database { name, .. } => name.clone(),
		}
	}

	fn label(&self) -> String {
		match self {
			BackupItem::Directory(path) => format!("Directory: {}", path.display()),
			BackupItem::Database { name, .. } => format!("Database: {}", name),
		}
	}
}

/// Backs up a single item.
#[async_trait]
pub trait ItemRunner: Send + Sync {
	async fn back_up(&self, item: &BackupItem) -> anyhow::Result<()>;
}

/// Hands each item to the configured snapshot command. Databases are first
/// dumped into `scratch` by their own command.
pub struct CommandRunner {
	snapshot_command: String,
	scratch: PathBuf,
}

impl CommandRunner {
	pub fn new(snapshot_command: impl Into<String>, scratch: impl Into<PathBuf>) -> Self {
		Self {
			snapshot_command: snapshot_command.into(),
			scratch: scratch.into(),
		}
	}

	async fn snapshot(&self, path: &Path, name: &str) -> anyhow::Result<()> {
		let command = render(&self.snapshot_command, path, name);
		run_shell(&command, Stdio::null()).await
	}
}

#[async_trait]
impl ItemRunner for CommandRunner {
	async fn back_up(&self, item: &BackupItem) -> anyhow::Result<()> {
		match item {
			BackupItem::Directory(path) => {
				if !path.is_dir() {
					bail!("{} is not a directory", path.display());
				}
				let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
				self.snapshot(path, &name).await
			}
			BackupItem::Database { name, command } => {
				std::fs::create_dir_all(&self.scratch)
					.with_context(|| format!("failed to create {}", self.scratch.display()))?;
				let dump = self.scratch.join(format!("{}.dump", rendezvous::identity::sanitize(name)));
				let file = std::fs::File::create(&dump)
					.with_context(|| format!("failed to create {}", dump.display()))?;

				let result = async {
					run_shell(command, Stdio::from(file)).await.context("dump failed")?;
					self.snapshot(&dump, name).await
				}
				.await;
				let _ = std::fs::remove_file(&dump);
				result
			}
		}
	}
}

async fn run_shell(command: &str, stdout: Stdio) -> anyhow::Result<()> {
	let output = Command::new("sh")
		.arg("-c")
		.arg(command)
		.stdin(Stdio::null())
		.stdout(stdout)
		.stderr(Stdio::piped())
		.kill_on_drop(true)
		.spawn()
		.with_context(|| format!("failed to run {:?}", command))?
		.wait_with_output()
		.await
		.with_context(|| format!("failed to wait for {:?}", command))?;
	if !output.status.success() {
		let stderr = String::from_utf8_lossy(&output.stderr);
		bail!("{:?} exited with {}: {}", command, output.status, stderr.trim());
	}
	Ok(())
}

/// Substitutes `{path}` and `{name}`, single-quoted for the shell.
pub fn render(template: &str, path: &Path, name: &str) -> String {
	template
		.replace("{path}", &shell_quote(&path.display().to_string()))
		.replace("{name}", &shell_quote(name))
}

fn shell_quote(s: &str) -> String {
	format!("'{}'", s.replace('\'', r"'\''"))
}

pub fn format_duration(d: Duration) -> String {
	let secs = (d.as_millis() + 500) / 1000;
	let (h, m, s) = (secs / 3600, secs % 3600 / 60, secs % 60);
	if h > 0 {
		format!("{}h{}m{}s", h, m, s)
	} else if m > 0 {
		format!("{}m{}s", m, s)
	} else {
		format!("{}s", s)
	}
}

/// Progress through a run, reported before each item.
#[derive(Debug)]
pub struct Progress {
	total: usize,
	current: usize,
	started: Instant,
}

impl Progress {
	pub fn new(total: usize) -> Self {
		Self { total, current: 0, started: Instant::now() }
	}

	pub fn advance(&mut self, item: &str) -> String {
		self.current += 1;
		status_line(self.current, self.total, item, self.started.elapsed())
	}
}

/// `P% (i/n) | item | Elapsed: E | Remaining: ~R`, the remaining time
/// extrapolated from the average so far.
pub fn status_line(current: usize, total: usize, item: &str, elapsed: Duration) -> String {
	let percent = if total == 0 { 100.0 } else { current as f64 / total as f64 * 100.0 };
	let remaining = if current == 0 {
		Duration::ZERO
	} else {
		elapsed.mul_f64(total as f64 / current as f64).saturating_sub(elapsed)
	};
	format!(
		"{:.1}% ({}/{}) | {} | Elapsed: {} | Remaining: ~{}",
		percent,
		current,
		total,
		item,
		format_duration(elapsed),
		format_duration(remaining)
	)
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
	pub succeeded: Vec<String>,
	pub failed: Vec<(String, String)>,
}

impl RunReport {
	pub fn has_errors(&self) -> bool {
		!self.failed.is_empty()
	}
}

pub struct BackupJob {
	name: String,
	items: Vec<BackupItem>,
	runner: Arc<dyn ItemRunner>,
}

impl BackupJob {
	pub fn new(name: impl Into<String>, items: Vec<BackupItem>, runner: Arc<dyn ItemRunner>) -> Self {
		Self { name: name.into(), items, runner }
	}

	/// Directories first, then databases, each handed to a [`CommandRunner`].
	pub fn from_config(config: &Config, scratch: &Path) -> Self {
		let items = config
			.directories
			.iter()
			.cloned()
			.map(BackupItem::Directory)
			.chain(config.databases.iter().map(|db| BackupItem::Database {
				name: db.name.clone(),
				command: db.command.clone(),
			}))
			.collect();
		let runner = CommandRunner::new(config.snapshot_command.clone(), scratch);
		Self::new(config.name.clone(), items, Arc::new(runner))
	}

	pub fn items(&self) -> &[BackupItem] {
		&self.items
	}

	pub async fn run(&self) -> RunReport {
		tracing::info!("starting backup for {}", self.name);
		let mut progress = Progress::new(self.items.len());
		let mut report = RunReport::default();

		for item in &self.items {
			let kind = item.kind();
			let name = item.name();
			tracing::info!("starting backup of {}: {}", kind, name);
			tracing::info!("Progress: {}", progress.advance(&item.label()));

			match self.runner.back_up(item).await {
				Ok(()) => {
					tracing::info!("successfully backed up {}: {}", kind, name);
					report.succeeded.push(name);
				}
				Err(e) => {
					tracing::error!("error backing up {} {}: {:#}", kind, name, e);
					report.failed.push((name, format!("{:#}", e)));
				}
			}
		}

		if report.has_errors() {
			tracing::warn!(
				"backup completed for {} with errors ({} of {} items failed)",
				self.name,
				report.failed.len(),
				self.items.len()
			);
		} else {
			tracing::info!("backup completed for {}", self.name);
		}
		report
	}
}
