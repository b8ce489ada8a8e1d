use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use rendezvous::{DaemonIdentity, LocalDirStore, ObjectStore, S3Settings, S3Store};
use serde::Deserialize;

// ── backhaul.toml ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	/// Job name; must be unique across everything sharing one store.
	pub name: String,
	#[serde(default = "default_host_label")]
	pub host_label: String,
	#[serde(default = "default_schedule")]
	pub schedule: String,
	#[serde(default)]
	pub directories: Vec<PathBuf>,
	#[serde(default)]
	pub databases: Vec<DatabaseConfig>,
	#[serde(default = "default_snapshot_command")]
	pub snapshot_command: String,
	#[serde(default)]
	pub shell: ShellConfig,
	#[serde(default)]
	pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
	pub name: String,
	/// Writes the dump to stdout.
	pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShellConfig {
	#[serde(default = "default_port")]
	pub port: u16,
	pub shell: Option<PathBuf>,
}

impl Default for ShellConfig {
	fn default() -> Self {
		Self { port: default_port(), shell: None }
	}
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
	Local {
		#[serde(default = "default_store_path")]
		path: PathBuf,
	},
	S3 {
		bucket: String,
		#[serde(default)]
		prefix: String,
		endpoint: Option<String>,
		region: Option<String>,
	},
}

impl Default for StoreConfig {
	fn default() -> Self {
		StoreConfig::Local { path: default_store_path() }
	}
}

fn default_host_label() -> String { "primary".into() }
fn default_schedule() -> String { "0 0 * * *".into() }
fn default_snapshot_command() -> String { "kopia snapshot create {path}".into() }
fn default_port() -> u16 { burrow::DEFAULT_PORT }
fn default_store_path() -> PathBuf { PathBuf::from("rendezvous") }

const PLACEHOLDER_NAME: &str = "your-app-name";

pub const DEFAULT_CONFIG: &str = r#"# Job name. Must be unique among all daemons sharing one store.
name = "your-app-name"

# Label for this host within the job.
# host_label = "primary"

# Backup schedule, cron format (5 or 6 fields)
schedule = "0 0 * * *" # daily at midnight
# "0 */6 * * *"   every 6 hours
# "0 0 * * 0"     weekly on Sunday at midnight
# "*/15 * * * *"  every 15 minutes

# Directories to back up
directories = [
	# "/path/to/directory",
]

# Run once per directory and once per database dump.
# {path} is the directory or dump file, {name} the item name.
# snapshot_command = "kopia snapshot create {path}"

# Databases: `command` must write the dump to stdout
# [[databases]]
# name = "example_db"
# command = "pg_dump --format=custom example"

[shell]
# port = 41334
# shell = "/bin/bash"

# Where connectivity and the shell credential are published.
[store]
kind = "local"
path = "rendezvous"
# kind = "s3"
# bucket = "my-bucket"
# prefix = "backhaul"
# endpoint = "https://s3.example.com"
# region = "us-east-1"
"#;

impl Config {
	pub fn parse(content: &str) -> anyhow::Result<Self> {
		let config: Config = toml::from_str(content)?;
		if config.name.trim().is_empty() || config.name == PLACEHOLDER_NAME {
			bail!("`name` must be set to a unique job name");
		}
		Ok(config)
	}

	/// `Ok(None)` when the file does not exist.
	pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
		let content = match std::fs::read_to_string(path) {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
			Err(e) => return Err(e).with_context(|| format!("failed to read {}", path.display())),
		};
		Self::parse(&content)
			.with_context(|| format!("failed to parse {}", path.display()))
			.map(Some)
	}

	pub fn identity(&self) -> DaemonIdentity {
		DaemonIdentity::new(&self.name, &self.host_label)
	}

	pub fn shell_path(&self) -> PathBuf {
		self.shell.shell.clone().unwrap_or_else(burrow::pty::default_shell)
	}
}

/// Writes the commented default config. Refuses to overwrite.
pub fn write_default(path: &Path) -> anyhow::Result<()> {
	let mut file = std::fs::OpenOptions::new()
		.write(true)
		.create_new(true)
		.open(path)
		.with_context(|| format!("failed to create {}", path.display()))?;
	std::io::Write::write_all(&mut file, DEFAULT_CONFIG.as_bytes())
		.with_context(|| format!("failed to write {}", path.display()))
}

impl StoreConfig {
	/// Opens the configured store. Relative local paths resolve against `work_dir`.
	pub async fn open(&self, work_dir: &Path) -> Arc<dyn ObjectStore> {
		match self {
			StoreConfig::Local { path } => Arc::new(LocalDirStore::new(work_dir.join(path))),
			StoreConfig::S3 { bucket, prefix, endpoint, region } => Arc::new(
				S3Store::connect(S3Settings {
					bucket: bucket.clone(),
					prefix: prefix.clone(),
					endpoint: endpoint.clone(),
					region: region.clone(),
				})
				.await,
			),
		}
	}
}
