pub mod context;
pub mod daemon;
pub mod error;
pub mod notify;
pub mod paths;
pub mod pidfile;
pub mod router;
pub mod run_lock;
pub mod signals;
pub mod trigger;

pub use context::DaemonContext;
pub use daemon::{control_channel, running_pid, Daemon};
pub use error::SentinelError;
pub use notify::SystemdNotifier;
pub use paths::DaemonPaths;
pub use pidfile::{PidFile, ProcessProbe, SignalProbe};
pub use router::{ControlEvent, Router, RouterState, RouterStats, TriggerOutcome};
pub use run_lock::{RunGuard, RunLock};
pub use trigger::{trigger_daemon, TriggerRoute};
