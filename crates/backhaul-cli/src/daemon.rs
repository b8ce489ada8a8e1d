use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use burrow::{keys, Credential, ShellServer};
use rendezvous::Publisher;
use sentinel::{control_channel, Daemon, DaemonContext, DaemonPaths, SignalProbe};

use crate::backup::BackupJob;
use crate::config::Config;
use crate::logs;
use crate::schedule::{Schedule, Scheduler};

/// Runs the daemon in the foreground until a shutdown signal arrives.
///
/// Startup order: signal handlers, PID file, log file, rendezvous publish
/// (failure is only logged), shell server, scheduler. Anything else failing
/// before the control loop starts stops the daemon. The log is only truncated
/// once the PID file is ours, so a refused second daemon leaves it alone.
pub async fn run(paths: DaemonPaths, config: Config) -> anyhow::Result<()> {
	let schedule = Schedule::parse(&config.schedule)?;
	let daemon = Daemon::start_with_signals(DaemonContext::new(paths.clone()), &SignalProbe)?;
	logs::init_daemon(&paths.log_path())?;
	tracing::info!("daemon started (pid {})", daemon.pid());
	let identity = config.identity();

	let store = config.store.open(&paths.work_dir).await;
	match Publisher::new(identity.clone(), store, paths.client_key_path()).publish().await {
		Ok(report) => tracing::info!("published {} as {}", identity, report.snapshot_name),
		Err(e) => tracing::warn!("failed to publish connectivity for {}: {}", identity, e),
	}

	let host_key = keys::load_host_key(&paths.host_key_path()).context("failed to load host key")?;
	let credential =
		Credential::load_or_generate(&paths.client_key_path()).context("failed to load shell credential")?;
	let server = ShellServer::new(host_key, &credential, config.shell_path());
	let listening = server
		.bind(SocketAddr::from(([0, 0, 0, 0], config.shell.port)))
		.await
		.context("failed to start shell server")?;
	let shell = tokio::spawn(listening.serve());

	let job = Arc::new(BackupJob::from_config(&config, &paths.tmp_dir()));
	tracing::info!("{} items to back up for {}", job.items().len(), config.name);

	let (tx, rx) = control_channel();
	let scheduler = Scheduler::start(schedule, tx.clone());

	let stats = daemon
		.serve(
			tx,
			rx,
			move || {
				let job = Arc::clone(&job);
				async move {
					job.run().await;
				}
			},
			move || {
				scheduler.stop();
				shell.abort();
			},
		)
		.await;

	tracing::info!(
		"{} backups started, {} triggers skipped while a backup was running",
		stats.started,
		stats.already_running
	);
	Ok(())
}
