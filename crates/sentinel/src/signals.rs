//! Boundary between raw OS signals and [`ControlEvent`]s.

use std::io;

use nix::sys::signal::Signal;
use tokio::signal::unix::{self, signal, SignalKind};
use tokio::sync::mpsc;

use crate::router::ControlEvent;

/// Maps a raw signal to the logical event it stands for, if any.
pub fn classify(sig: Signal) -> Option<ControlEvent> {
	match sig {
		Signal::SIGUSR1 => Some(ControlEvent::Trigger),
		Signal::SIGTERM | Signal::SIGQUIT | Signal::SIGINT => Some(ControlEvent::Shutdown),
		_ => None,
	}
}

/// Handlers for every classified signal. Once installed, those signals no
/// longer take their default action; deliveries queue until [`forward`] runs.
///
/// [`forward`]: SignalStreams::forward
pub struct SignalStreams {
	usr1: unix::Signal,
	term: unix::Signal,
	quit: unix::Signal,
	int: unix::Signal,
}

impl SignalStreams {
	/// Must be called from within a tokio runtime.
	pub fn install() -> io::Result<Self> {
		Ok(Self {
			usr1: signal(SignalKind::user_defined1())?,
			term: signal(SignalKind::terminate())?,
			quit: signal(SignalKind::quit())?,
			int: signal(SignalKind::interrupt())?,
		})
	}

	/// Forwards events into `tx` until the receiving side goes away.
	pub async fn forward(mut self, tx: mpsc::Sender<ControlEvent>) {
		loop {
			let sig = tokio::select! {
				Some(()) = self.usr1.recv() => Signal::SIGUSR1,
				Some(()) = self.term.recv() => Signal::SIGTERM,
				Some(()) = self.quit.recv() => Signal::SIGQUIT,
				Some(()) = self.int.recv() => Signal::SIGINT,
				else => return,
			};
			let Some(event) = classify(sig) else { continue };
			tracing::debug!("received {} -> {:?}", sig, event);
			if tx.send(event).await.is_err() {
				return;
			}
		}
	}
}
