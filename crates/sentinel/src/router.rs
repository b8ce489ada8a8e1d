//! Signal command router.
//!
//! A single control task consumes [`ControlEvent`]s from a channel and drives
//! the `Idle -> RunInProgress -> Idle` cycle, or the terminal `ShuttingDown`
//! transition. Backup runs execute on their own tasks so the router keeps
//! draining events while a run is in flight.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::run_lock::{RunGuard, RunLock};

/// Logical control events, independent of the OS signal that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
	Trigger,
	Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
	Idle,
	RunInProgress,
	ShuttingDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
	Started,
	AlreadyRunning,
	/// Received after shutdown began.
	Ignored,
}

/// Counters reported when the router stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
	pub started: u32,
	pub already_running: u32,
}

pub struct Router<F> {
	run_lock: RunLock,
	job: Arc<F>,
	shutting_down: bool,
	stats: RouterStats,
}

impl<F, Fut> Router<F>
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ()> + Send + 'static,
{
	pub fn new(run_lock: RunLock, job: F) -> Self {
		Self {
			run_lock,
			job: Arc::new(job),
			shutting_down: false,
			stats: RouterStats::default(),
		}
	}

	pub fn state(&self) -> RouterState {
		if self.shutting_down {
			RouterState::ShuttingDown
		} else if self.run_lock.is_held() {
			RouterState::RunInProgress
		} else {
			RouterState::Idle
		}
	}

	pub fn stats(&self) -> RouterStats {
		self.stats
	}

	/// Starts a run unless one is in progress. Never waits for the run.
	pub fn trigger(&mut self) -> TriggerOutcome {
		if self.shutting_down {
			return TriggerOutcome::Ignored;
		}
		match self.run_lock.try_acquire() {
			Some(guard) => {
				tracing::info!("received backup trigger");
				spawn_guarded(Arc::clone(&self.job), guard);
				self.stats.started += 1;
				TriggerOutcome::Started
			}
			None => {
				tracing::info!("backup already in progress, ignoring trigger");
				self.stats.already_running += 1;
				TriggerOutcome::AlreadyRunning
			}
		}
	}

	/// Consumes events until the first shutdown (or until every sender is gone).
	///
	/// `on_shutdown` runs exactly once, to completion, before this returns;
	/// later events are never observed.
	pub async fn run<S>(mut self, mut events: mpsc::Receiver<ControlEvent>, on_shutdown: S) -> RouterStats
	where
		S: FnOnce(),
	{
		while let Some(event) = events.recv().await {
			match event {
				ControlEvent::Trigger => {
					self.trigger();
				}
				ControlEvent::Shutdown => break,
			}
		}

		self.shutting_down = true;
		events.close();
		tracing::info!("shutting down daemon");
		on_shutdown();
		tracing::info!("daemon shutdown complete");
		self.stats
	}
}

fn spawn_guarded<F, Fut>(job: Arc<F>, guard: RunGuard)
where
	F: Fn() -> Fut + Send + Sync + 'static,
	Fut: Future<Output = ()> + Send + 'static,
{
	tokio::spawn(async move {
		let _guard = guard;
		if let Err(e) = tokio::spawn(job()).await {
			if e.is_panic() {
				tracing::error!("recovered from panic during backup");
			}
		}
		tracing::info!("triggered backup finished");
	});
}
