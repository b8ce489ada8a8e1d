use std::path::Path;
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

fn backhaul(dir: &Path, args: &[&str]) -> Output {
	Command::new(env!("CARGO_BIN_EXE_backhaul"))
		.arg("-C")
		.arg(dir)
		.args(args)
		.env("RUST_LOG", "info")
		.env_remove("NOTIFY_SOCKET")
		.output()
		.unwrap()
}

fn text(out: &Output) -> String {
	format!("{}{}", String::from_utf8_lossy(&out.stdout), String::from_utf8_lossy(&out.stderr))
}

fn write_config(dir: &Path, extra: &str) {
	let config = format!(
		"name = \"orders\"\nsnapshot_command = \"echo {{name}} >> {}\"\n{}\n[store]\nkind = \"local\"\npath = \"store\"\n",
		dir.join("snapshots.log").display(),
		extra
	);
	std::fs::write(dir.join("backhaul.toml"), config).unwrap();
}

/// A `backhaul daemon` child that is killed if the test bails out early.
struct DaemonProcess(Child);

impl DaemonProcess {
	fn spawn(dir: &Path) -> Self {
		let child = Command::new(env!("CARGO_BIN_EXE_backhaul"))
			.arg("-C")
			.arg(dir)
			.arg("daemon")
			.env("RUST_LOG", "info")
			.env_remove("NOTIFY_SOCKET")
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.spawn()
			.unwrap();
		Self(child)
	}

	fn signal(&self, sig: Signal) {
		kill(Pid::from_raw(self.0.id() as i32), sig).unwrap();
	}

	fn wait_for_exit(&mut self) -> std::process::ExitStatus {
		let deadline = Instant::now() + Duration::from_secs(10);
		loop {
			if let Some(status) = self.0.try_wait().unwrap() {
				return status;
			}
			assert!(Instant::now() < deadline, "daemon did not exit");
			std::thread::sleep(Duration::from_millis(50));
		}
	}
}

impl Drop for DaemonProcess {
	fn drop(&mut self) {
		let _ = self.0.kill();
		let _ = self.0.wait();
	}
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
	let deadline = Instant::now() + Duration::from_secs(10);
	while !done() {
		assert!(Instant::now() < deadline, "timed out waiting for {}", what);
		std::thread::sleep(Duration::from_millis(50));
	}
}

fn read(path: &Path) -> String {
	std::fs::read_to_string(path).unwrap_or_default()
}

fn dead_pid() -> u32 {
	let mut child = Command::new("true").spawn().unwrap();
	let pid = child.id();
	child.wait().unwrap();
	pid
}

#[test]
fn missing_config_writes_default_and_exits_cleanly() {
	let dir = tempfile::tempdir().unwrap();
	let out = backhaul(dir.path(), &["run"]);
	assert!(out.status.success(), "{}", text(&out));
	let written = std::fs::read_to_string(dir.path().join("backhaul.toml")).unwrap();
	assert!(written.contains("your-app-name"));

	// still the placeholder name: refuse to run
	let out = backhaul(dir.path(), &["run"]);
	assert_eq!(out.status.code(), Some(1), "{}", text(&out));
}

#[test]
fn run_without_daemon_backs_up_in_process() {
	let dir = tempfile::tempdir().unwrap();
	let data = dir.path().join("data");
	std::fs::create_dir(&data).unwrap();
	write_config(dir.path(), &format!("directories = [\"{}\"]", data.display()));

	let out = backhaul(dir.path(), &[]);
	assert!(out.status.success(), "{}", text(&out));
	let output = text(&out);
	assert!(output.contains("no daemon running"), "{}", output);
	assert!(output.contains("Progress: 100.0% (1/1) | Directory:"), "{}", output);
	assert!(output.contains("backup completed for orders"), "{}", output);
	assert_eq!(std::fs::read_to_string(dir.path().join("snapshots.log")).unwrap(), "data\n");
}

#[test]
fn stale_pid_file_is_removed_and_backup_runs_locally() {
	let dir = tempfile::tempdir().unwrap();
	let data = dir.path().join("data");
	std::fs::create_dir(&data).unwrap();
	write_config(
		dir.path(),
		&format!("directories = [\"{}\", \"{}\"]", data.display(), dir.path().join("missing").display()),
	);
	std::fs::create_dir(dir.path().join(".backhaul")).unwrap();
	let pid_path = dir.path().join(".backhaul/daemon.pid");
	std::fs::write(&pid_path, dead_pid().to_string()).unwrap();

	let out = backhaul(dir.path(), &["run"]);
	let output = text(&out);
	assert!(output.contains("removing stale PID file"), "{}", output);
	assert!(output.contains("backup completed for orders with errors"), "{}", output);
	assert_eq!(out.status.code(), Some(1));
	assert!(!pid_path.exists());
	assert_eq!(std::fs::read_to_string(dir.path().join("snapshots.log")).unwrap(), "data\n");
}

#[test]
fn publish_then_status_reports_fresh_snapshot() {
	let dir = tempfile::tempdir().unwrap();
	write_config(dir.path(), "");

	let out = backhaul(dir.path(), &["publish"]);
	assert!(out.status.success(), "{}", text(&out));
	assert!(dir.path().join("store/orders/primary/ips.json").exists());
	assert!(dir.path().join("store/orders/primary/priv.key").exists());
	assert_eq!(
		std::fs::read(dir.path().join("store/orders/primary/priv.key")).unwrap(),
		std::fs::read(dir.path().join(".backhaul/client_key")).unwrap()
	);

	let out = backhaul(dir.path(), &["status"]);
	let output = text(&out);
	assert!(out.status.success(), "{}", output);
	assert!(output.contains("daemon not running"), "{}", output);
	assert!(output.contains("orders@primary"), "{}", output);
	assert!(!output.contains("(stale)"), "{}", output);
}

#[test]
fn connect_fails_cleanly_when_nothing_is_published() {
	let dir = tempfile::tempdir().unwrap();
	write_config(dir.path(), "");
	let out = backhaul(dir.path(), &["connect", "orders", "--host", "replica"]);
	assert_eq!(out.status.code(), Some(1));
	assert!(text(&out).contains("nothing published"), "{}", text(&out));
}

#[test]
fn daemon_takes_triggers_refuses_a_twin_and_stops_on_sigterm() {
	let dir = tempfile::tempdir().unwrap();
	let data = dir.path().join("data");
	std::fs::create_dir(&data).unwrap();
	write_config(
		dir.path(),
		&format!(
			"directories = [\"{}\"]\nschedule = \"0 0 1 1 *\"\n[shell]\nport = 0",
			data.display()
		),
	);
	let pid_path = dir.path().join(".backhaul/daemon.pid");
	let log_path = dir.path().join(".backhaul/daemon.log");

	let mut daemon = DaemonProcess::spawn(dir.path());
	wait_until("the PID file", || read(&pid_path) == daemon.0.id().to_string());

	// Triggered as soon as the pid is visible, before the control loop may be up.
	let out = backhaul(dir.path(), &["run"]);
	assert!(out.status.success(), "{}", text(&out));
	assert!(text(&out).contains("triggered backup in running daemon"), "{}", text(&out));
	wait_until("the triggered backup", || read(&log_path).contains("backup completed for orders"));
	assert!(read(&log_path).contains("received backup trigger"));
	assert_eq!(read(&dir.path().join("snapshots.log")), "data\n");

	let out = backhaul(dir.path(), &["daemon"]);
	assert_eq!(out.status.code(), Some(1), "{}", text(&out));
	assert!(text(&out).contains("already running"), "{}", text(&out));
	assert_eq!(read(&pid_path), daemon.0.id().to_string());
	assert!(read(&log_path).contains("backup completed for orders"), "log was truncated");

	daemon.signal(Signal::SIGTERM);
	let status = daemon.wait_for_exit();
	assert_eq!(status.code(), Some(0));
	assert!(!pid_path.exists());
	assert!(read(&log_path).contains("daemon shutdown complete"));
}

#[test]
fn daemon_survives_sigterm_sent_right_after_the_pid_appears() {
	let dir = tempfile::tempdir().unwrap();
	write_config(dir.path(), "schedule = \"0 0 1 1 *\"\n[shell]\nport = 0");
	let pid_path = dir.path().join(".backhaul/daemon.pid");

	let mut daemon = DaemonProcess::spawn(dir.path());
	wait_until("the PID file", || pid_path.exists());
	daemon.signal(Signal::SIGTERM);

	// Handled as a graceful shutdown, not the default action.
	let status = daemon.wait_for_exit();
	assert_eq!(status.code(), Some(0));
	assert!(!pid_path.exists());
}
