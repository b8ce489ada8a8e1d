use std::future::Future;

use tokio::sync::mpsc;

use crate::context::DaemonContext;
use crate::error::SentinelError;
use crate::pidfile::{read_pid, PidFile, ProcessProbe};
use crate::router::{ControlEvent, Router, RouterStats};
use crate::signals::SignalStreams;

/// A daemon that has claimed its working directory.
///
/// Holds the PID file until [`Daemon::serve_events`] finishes its shutdown
/// transition (or the value is dropped).
pub struct Daemon {
	pub ctx: DaemonContext,
	pidfile: PidFile,
	signals: Option<SignalStreams>,
}

impl Daemon {
	/// Creates the state directory and claims the PID file. Either failing is
	/// fatal: the daemon must not run half-initialized.
	pub fn start(ctx: DaemonContext, probe: &dyn ProcessProbe) -> Result<Self, SentinelError> {
		ctx.paths.ensure_state_dir()?;
		let pidfile = PidFile::claim(ctx.paths.pid_path(), probe)?;
		tracing::debug!("claimed {} for pid {}", pidfile.path().display(), pidfile.pid());

		if let Err(e) = ctx.notifier.ready() {
			tracing::warn!("failed to notify systemd: {}", e);
		}

		Ok(Self {
			ctx,
			pidfile,
			signals: None,
		})
	}

	/// Like [`Daemon::start`], but installs the control signal handlers before
	/// the PID file becomes visible, so a trigger or stop sent as soon as the
	/// pid is readable is queued for [`Daemon::serve`] instead of killing the
	/// process. Must be called from within a tokio runtime.
	pub fn start_with_signals(ctx: DaemonContext, probe: &dyn ProcessProbe) -> Result<Self, SentinelError> {
		let signals = SignalStreams::install().map_err(SentinelError::SignalSetup)?;
		let mut daemon = Self::start(ctx, probe)?;
		daemon.signals = Some(signals);
		Ok(daemon)
	}

	pub fn pid(&self) -> i32 {
		self.pidfile.pid()
	}

	/// Routes real OS signals until shutdown. `tx`/`rx` come from
	/// [`control_channel`]; other event sources (the scheduler) may hold clones
	/// of `tx`. Handlers not installed at start are installed here.
	pub async fn serve<F, Fut, S>(
		mut self,
		tx: mpsc::Sender<ControlEvent>,
		rx: mpsc::Receiver<ControlEvent>,
		job: F,
		on_shutdown: S,
	) -> RouterStats
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
		S: FnOnce(),
	{
		let streams = match self.signals.take() {
			Some(streams) => Some(streams),
			None => SignalStreams::install()
				.map_err(|e| tracing::error!("failed to install signal handlers: {}", e))
				.ok(),
		};
		let listener = tokio::spawn(async move {
			if let Some(streams) = streams {
				streams.forward(tx).await;
			}
		});

		let stats = self.serve_events(rx, job, on_shutdown).await;
		listener.abort();
		stats
	}

	/// Runs the control loop over an arbitrary event source. The PID file is
	/// removed after `on_shutdown` and before this returns.
	pub async fn serve_events<F, Fut, S>(
		self,
		events: mpsc::Receiver<ControlEvent>,
		job: F,
		on_shutdown: S,
	) -> RouterStats
	where
		F: Fn() -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ()> + Send + 'static,
		S: FnOnce(),
	{
		let Daemon { ctx, mut pidfile, .. } = self;

		let watchdog = tokio::spawn(ctx.notifier.clone().run_watchdog());
		let router = Router::new(ctx.run_lock.clone(), job);
		let notifier = ctx.notifier.clone();

		router
			.run(events, move || {
				watchdog.abort();
				let _ = notifier.stopping();
				on_shutdown();
				if let Err(e) = pidfile.release() {
					tracing::warn!("error removing PID file: {}", e);
				}
			})
			.await
	}
}

pub fn control_channel() -> (mpsc::Sender<ControlEvent>, mpsc::Receiver<ControlEvent>) {
	mpsc::channel(16)
}

/// Returns the pid of the live daemon holding `ctx`'s working directory, if any.
pub fn running_pid(ctx: &DaemonContext, probe: &dyn ProcessProbe) -> Option<i32> {
	read_pid(&ctx.paths.pid_path()).filter(|pid| probe.is_alive(*pid))
}
