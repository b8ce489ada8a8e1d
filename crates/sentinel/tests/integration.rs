use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use sentinel::{
	pidfile, running_pid, trigger_daemon, ControlEvent, Daemon, DaemonContext, DaemonPaths,
	ProcessProbe, RouterStats, SentinelError, SignalProbe, SystemdNotifier, TriggerRoute,
};

fn temp_ctx() -> (tempfile::TempDir, DaemonContext) {
	let dir = tempfile::tempdir().unwrap();
	let ctx = DaemonContext::new(DaemonPaths::new(dir.path())).with_notifier(SystemdNotifier::disabled());
	(dir, ctx)
}

/// Reports only the listed pids as alive and records every signal attempt.
#[derive(Default)]
struct FakeProcesses {
	alive: Vec<i32>,
	signalled: Mutex<Vec<i32>>,
}

impl ProcessProbe for FakeProcesses {
	fn is_alive(&self, pid: i32) -> bool {
		self.alive.contains(&pid)
	}
	fn send_trigger(&self, pid: i32) -> io::Result<()> {
		self.signalled.lock().unwrap().push(pid);
		Ok(())
	}
}

// --- PID file ---

#[test]
fn start_creates_state_dir_and_pid_file() {
	let (_dir, ctx) = temp_ctx();
	let daemon = Daemon::start(ctx.clone(), &SignalProbe).unwrap();
	assert!(ctx.paths.state_dir().is_dir());
	assert_eq!(pidfile::read_pid(&ctx.paths.pid_path()), Some(daemon.pid()));
	assert_eq!(running_pid(&ctx, &SignalProbe), Some(daemon.pid()));
	drop(daemon);
	assert!(!ctx.paths.pid_path().exists());
	assert_eq!(running_pid(&ctx, &SignalProbe), None);
}

#[test]
fn second_start_is_refused_while_first_is_alive() {
	let (_dir, ctx) = temp_ctx();
	ctx.paths.ensure_state_dir().unwrap();
	std::fs::write(ctx.paths.pid_path(), "90001").unwrap();

	let probe = FakeProcesses {
		alive: vec![90001],
		..Default::default()
	};
	match Daemon::start(ctx.clone(), &probe) {
		Err(SentinelError::AlreadyRunning { pid }) => assert_eq!(pid, 90001),
		Err(e) => panic!("unexpected error: {}", e),
		Ok(_) => panic!("second daemon claimed the singleton"),
	}
}

#[test]
fn stale_pid_file_is_always_reclaimed() {
	let (_dir, ctx) = temp_ctx();
	ctx.paths.ensure_state_dir().unwrap();
	let probe = FakeProcesses::default();

	for stale in ["90002", "90003\n", "", "not a pid"] {
		std::fs::write(ctx.paths.pid_path(), stale).unwrap();
		let daemon = Daemon::start(ctx.clone(), &probe).unwrap();
		assert_eq!(pidfile::read_pid(&ctx.paths.pid_path()), Some(daemon.pid()));
		drop(daemon);
	}
}

#[test]
fn start_fails_when_state_dir_cannot_be_created() {
	let dir = tempfile::tempdir().unwrap();
	let blocker = dir.path().join("file");
	std::fs::write(&blocker, "").unwrap();
	let ctx = DaemonContext::new(DaemonPaths::new(&blocker)).with_notifier(SystemdNotifier::disabled());
	assert!(matches!(Daemon::start(ctx, &SignalProbe), Err(SentinelError::Io { .. })));
}

// --- remote trigger ---

#[test]
fn fresh_invocation_with_dead_daemon_runs_locally() {
	let (_dir, ctx) = temp_ctx();
	ctx.paths.ensure_state_dir().unwrap();
	std::fs::write(ctx.paths.pid_path(), "90004").unwrap();
	let probe = FakeProcesses::default();

	let route = trigger_daemon(&ctx.paths.pid_path(), &probe).unwrap();
	assert_eq!(route, TriggerRoute::RunLocally { reclaimed_stale: true });
	assert!(!ctx.paths.pid_path().exists());
	assert!(probe.signalled.lock().unwrap().is_empty());
}

// --- control loop ---

#[tokio::test(start_paused = true)]
async fn triggers_during_a_run_are_rejected() {
	let (_dir, ctx) = temp_ctx();
	let daemon = Daemon::start(ctx.clone(), &SignalProbe).unwrap();
	let runs = Arc::new(AtomicU32::new(0));
	let counter = Arc::clone(&runs);
	let (tx, rx) = mpsc::channel(8);

	let serve = tokio::spawn(daemon.serve_events(
		rx,
		move || {
			let counter = Arc::clone(&counter);
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
				tokio::time::sleep(Duration::from_secs(5)).await;
			}
		},
		|| {},
	));

	tx.send(ControlEvent::Trigger).await.unwrap();
	tokio::time::sleep(Duration::from_millis(100)).await;
	tx.send(ControlEvent::Trigger).await.unwrap();
	tokio::time::sleep(Duration::from_millis(10)).await;
	tx.send(ControlEvent::Trigger).await.unwrap();
	tokio::time::sleep(Duration::from_millis(10)).await;
	assert!(ctx.run_lock.is_held());

	tx.send(ControlEvent::Shutdown).await.unwrap();
	let stats = serve.await.unwrap();

	assert_eq!(stats, RouterStats { started: 1, already_running: 2 });
	assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shutdown_removes_pid_file_after_hook() {
	let (_dir, ctx) = temp_ctx();
	let daemon = Daemon::start(ctx.clone(), &SignalProbe).unwrap();
	let pid_path = ctx.paths.pid_path();
	let seen_during_hook = Arc::new(Mutex::new(None));
	let seen = Arc::clone(&seen_during_hook);
	let hook_path = pid_path.clone();

	let (tx, rx) = mpsc::channel(4);
	tx.send(ControlEvent::Shutdown).await.unwrap();
	tx.send(ControlEvent::Shutdown).await.unwrap();

	daemon
		.serve_events(rx, || async {}, move || {
			*seen.lock().unwrap() = Some(hook_path.exists());
		})
		.await;

	assert_eq!(*seen_during_hook.lock().unwrap(), Some(true));
	assert!(!pid_path.exists());
}

#[tokio::test]
async fn signals_sent_before_serving_are_queued_not_fatal() {
	use nix::sys::signal::{kill, Signal};
	use nix::unistd::Pid;

	let (_dir, ctx) = temp_ctx();
	let daemon = Daemon::start_with_signals(ctx.clone(), &SignalProbe).unwrap();
	let pid_path = ctx.paths.pid_path();

	// The pid is visible, the control loop is not running yet.
	kill(Pid::this(), Signal::SIGUSR1).unwrap();

	let runs = Arc::new(AtomicU32::new(0));
	let counter = Arc::clone(&runs);
	let (tx, rx) = sentinel::control_channel();
	let served = tokio::spawn(daemon.serve(
		tx,
		rx,
		move || {
			let counter = Arc::clone(&counter);
			async move {
				counter.fetch_add(1, Ordering::SeqCst);
			}
		},
		|| {},
	));

	tokio::time::timeout(Duration::from_secs(5), async {
		while runs.load(Ordering::SeqCst) == 0 {
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	})
	.await
	.unwrap();

	kill(Pid::this(), Signal::SIGTERM).unwrap();
	let stats: RouterStats = tokio::time::timeout(Duration::from_secs(5), served).await.unwrap().unwrap();
	assert_eq!(stats.started, 1);
	assert!(!pid_path.exists());
}
