mod backup;
mod config;
mod daemon;
mod logs;
mod schedule;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use rendezvous::locate::PreferInterfaces;
use rendezvous::{ConnectError, DaemonIdentity, RendezvousClient};
use sentinel::{DaemonContext, DaemonPaths, SignalProbe, TriggerRoute};

use backup::BackupJob;
use config::{Config, StoreConfig};

#[derive(Parser)]
#[command(name = "backhaul", version)]
#[command(about = "Backup daemon with a rendezvous shell", long_about = None)]
struct Cli {
	/// Working directory holding backhaul.toml and .backhaul/
	#[arg(short = 'C', long, global = true)]
	dir: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Run a backup now: trigger the running daemon, or back up in-process
	Run,
	/// Run as the daemon in the foreground
	Daemon,
	/// Open a shell on a daemon located through the store
	Connect {
		/// Job name (defaults to the local backhaul.toml)
		job: Option<String>,
		/// Host label within the job
		#[arg(long)]
		host: Option<String>,
		/// Shell port on the daemon
		#[arg(short, long)]
		port: Option<u16>,
		/// Interfaces to try first, e.g. --prefer wg0,eth0
		#[arg(long, value_delimiter = ',')]
		prefer: Vec<String>,
	},
	/// Publish connectivity and the shell credential once
	Publish,
	/// Show whether a daemon is running here
	Status,
}

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	let code = match run(cli).await {
		Ok(code) => code,
		Err(e) => {
			tracing::error!("{:#}", e);
			eprintln!("{} {:#}", "error:".red().bold(), e);
			if let Some(hint) = e.downcast_ref::<ConnectError>().and_then(hint) {
				eprintln!("{}", hint.dimmed());
			}
			1
		}
	};
	// the stdin reader and PTY pumps live on blocking threads
	std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
	if let Some(dir) = &cli.dir {
		std::env::set_current_dir(dir).with_context(|| format!("cannot enter {}", dir.display()))?;
	}
	let paths = DaemonPaths::current()?;

	match cli.command.unwrap_or(Commands::Run) {
		Commands::Run => {
			logs::init_stdout();
			let Some(config) = require_config(&paths)? else { return Ok(0) };
			cmd_run(&paths, &config).await
		}
		Commands::Daemon => {
			let Some(config) = require_config(&paths)? else { return Ok(0) };
			daemon::run(paths, config).await?;
			Ok(0)
		}
		Commands::Connect { job, host, port, prefer } => {
			logs::init_stdout();
			cmd_connect(&paths, job, host, port, prefer).await
		}
		Commands::Publish => {
			logs::init_stdout();
			let Some(config) = require_config(&paths)? else { return Ok(0) };
			cmd_publish(&paths, &config).await
		}
		Commands::Status => cmd_status(&paths).await,
	}
}

/// Loads backhaul.toml, or writes a commented default and returns `None`.
fn require_config(paths: &DaemonPaths) -> anyhow::Result<Option<Config>> {
	let path = paths.config_path();
	if let Some(config) = Config::load(&path)? {
		return Ok(Some(config));
	}
	config::write_default(&path)?;
	eprintln!("created default {}", path.display().bold());
	eprintln!("edit it (at least `name`) before running backhaul again");
	Ok(None)
}

async fn cmd_run(paths: &DaemonPaths, config: &Config) -> anyhow::Result<i32> {
	match sentinel::trigger_daemon(&paths.pid_path(), &SignalProbe)? {
		TriggerRoute::Delegated { pid } => {
			tracing::info!(
				"triggered backup in running daemon (pid {}), see {} for progress",
				pid,
				paths.log_path().display()
			);
			Ok(0)
		}
		TriggerRoute::RunLocally { .. } => {
			tracing::info!("no daemon running, performing one-time backup");
			paths.ensure_state_dir()?;
			let ctx = DaemonContext::new(paths.clone());
			let Some(_guard) = ctx.run_lock.try_acquire() else {
				tracing::info!("backup already in progress, skipping");
				return Ok(0);
			};
			let report = BackupJob::from_config(config, &paths.tmp_dir()).run().await;
			Ok(if report.has_errors() { 1 } else { 0 })
		}
	}
}

async fn cmd_connect(
	paths: &DaemonPaths,
	job: Option<String>,
	host: Option<String>,
	port: Option<u16>,
	prefer: Vec<String>,
) -> anyhow::Result<i32> {
	let config = Config::load(&paths.config_path())?;
	let job = job
		.or_else(|| config.as_ref().map(|c| c.name.clone()))
		.context("no job given and no backhaul.toml here")?;
	let host = host
		.or_else(|| config.as_ref().map(|c| c.host_label.clone()))
		.unwrap_or_else(|| "primary".to_string());
	let port = port
		.or_else(|| config.as_ref().map(|c| c.shell.port))
		.unwrap_or(burrow::DEFAULT_PORT);
	let store = match &config {
		Some(c) => c.store.open(&paths.work_dir).await,
		None => StoreConfig::default().open(&paths.work_dir).await,
	};

	let identity = DaemonIdentity::new(job, host);
	let client = RendezvousClient::new(store).port(port).order(PreferInterfaces(prefer));
	let located = client.connect(&identity).await?;
	eprintln!(
		"{} {} via {} ({})",
		"connected to".green(),
		identity.bold(),
		located.address,
		located.candidate.interface
	);

	let status = located.session.run_interactive().await?;
	Ok(status.min(255) as i32)
}

async fn cmd_publish(paths: &DaemonPaths, config: &Config) -> anyhow::Result<i32> {
	paths.ensure_state_dir()?;
	let store = config.store.open(&paths.work_dir).await;
	let publisher = rendezvous::Publisher::new(config.identity(), store, paths.client_key_path());
	let report = publisher.publish().await?;
	println!("{} {}", "published".green(), report.snapshot_name);
	println!("{} {}", "published".green(), report.credential_name);
	for (name, addrs) in &report.snapshot.interfaces {
		println!("  {:<12} {}", name.cyan(), addrs.join(", "));
	}
	Ok(0)
}

async fn cmd_status(paths: &DaemonPaths) -> anyhow::Result<i32> {
	let ctx = DaemonContext::new(paths.clone());
	match sentinel::running_pid(&ctx, &SignalProbe) {
		Some(pid) => println!("{} (pid {})", "daemon running".green().bold(), pid),
		None if paths.pid_path().exists() => {
			println!("{} (stale PID file at {})", "daemon not running".red(), paths.pid_path().display())
		}
		None => println!("{}", "daemon not running".dimmed()),
	}

	let Ok(Some(config)) = Config::load(&paths.config_path()) else {
		return Ok(0);
	};
	let identity = config.identity();
	println!("  {:<10} {}", "job".bold(), identity);
	match schedule::Schedule::parse(&config.schedule) {
		Ok(schedule) => match schedule.next_after(&chrono::Local::now()) {
			Some(next) => println!("  {:<10} {} (next {})", "schedule".bold(), schedule, next.format("%Y-%m-%d %H:%M")),
			None => println!("  {:<10} {}", "schedule".bold(), schedule),
		},
		Err(e) => println!("  {:<10} {}", "schedule".bold(), format!("{:#}", e).red()),
	}

	let client = RendezvousClient::new(config.store.open(&paths.work_dir).await);
	match client.fetch_snapshot(&identity).await {
		Ok(snapshot) => {
			let age = snapshot.age(chrono::Utc::now());
			let line = format!(
				"{} ({} ago, {} addresses)",
				snapshot.captured_at.format("%Y-%m-%d %H:%M:%S UTC"),
				backup::format_duration(age.to_std().unwrap_or_default()),
				snapshot.address_count()
			);
			if snapshot.check_fresh(chrono::Utc::now()).is_ok() {
				println!("  {:<10} {}", "published".bold(), line.green());
			} else {
				println!("  {:<10} {} {}", "published".bold(), line.yellow(), "(stale)".yellow());
			}
		}
		Err(e) => println!("  {:<10} {}", "published".bold(), e.to_string().dimmed()),
	}
	Ok(0)
}

fn hint(e: &ConnectError) -> Option<&'static str> {
	match e {
		ConnectError::StaleSnapshot { .. } => {
			Some("the daemon has not published within the last hour; check that it is running")
		}
		ConnectError::NoReachableHost { .. } => Some("none of the published addresses accepted a shell; re-run to try again"),
		ConnectError::Fetch { .. } => Some("nothing published under that job and host label"),
		_ => None,
	}
}
