use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-local guard ensuring at most one backup run at a time.
///
/// Acquisition never blocks: a caller that loses the race skips its run.
#[derive(Debug, Clone, Default)]
pub struct RunLock {
	running: Arc<AtomicBool>,
}

impl RunLock {
	pub fn new() -> Self {
		Self::default()
	}

	/// Test-and-set. `None` means a run is already in progress.
	pub fn try_acquire(&self) -> Option<RunGuard> {
		self.running
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| RunGuard {
				running: Arc::clone(&self.running),
			})
	}

	pub fn is_held(&self) -> bool {
		self.running.load(Ordering::Acquire)
	}
}

/// Held for the duration of one run; dropping it releases the lock on every
/// exit path, unwinding included.
#[derive(Debug)]
pub struct RunGuard {
	running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
	fn drop(&mut self) {
		self.running.store(false, Ordering::Release);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn second_acquire_fails_until_release() {
		let lock = RunLock::new();
		let guard = lock.try_acquire().expect("first acquire");
		assert!(lock.is_held());
		assert!(lock.try_acquire().is_none());
		drop(guard);
		assert!(!lock.is_held());
		assert!(lock.try_acquire().is_some());
	}

	#[test]
	fn clones_share_state() {
		let lock = RunLock::new();
		let other = lock.clone();
		let _guard = lock.try_acquire().unwrap();
		assert!(other.try_acquire().is_none());
	}

	#[test]
	fn released_on_panic() {
		let lock = RunLock::new();
		let inner = lock.clone();
		let result = std::thread::spawn(move || {
			let _guard = inner.try_acquire().unwrap();
			panic!("backup item blew up");
		})
		.join();
		assert!(result.is_err());
		assert!(!lock.is_held());
	}

	#[test]
	fn concurrent_acquire_has_single_winner() {
		let lock = RunLock::new();
		let barrier = Arc::new(std::sync::Barrier::new(16));
		let handles: Vec<_> = (0..16)
			.map(|_| {
				let lock = lock.clone();
				let barrier = Arc::clone(&barrier);
				std::thread::spawn(move || {
					barrier.wait();
					lock.try_acquire().map(std::mem::forget).is_some()
				})
			})
			.collect();
		let winners = handles
			.into_iter()
			.map(|h| h.join().unwrap())
			.filter(|won| *won)
			.count();
		assert_eq!(winners, 1);
	}
}
