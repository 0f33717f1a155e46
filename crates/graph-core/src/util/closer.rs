// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::sync::{
	atomic::{AtomicBool, Ordering},
	Arc,
};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

/// Closer holds the two things we need to close a task and wait for it to
/// finish: a channel to tell the task to shut down, and a wait count with
/// which to wait for it to finish shutting down.
///
/// Workers obtain a receiver via [`Closer::listen`] and treat channel
/// disconnection as the shutdown signal, which makes the signal selectable
/// alongside tickers and work channels.
#[derive(Debug, Clone)]
#[repr(transparent)]
pub struct Closer(Arc<CloserInner>);

#[derive(Debug)]
struct CloserInner {
	sender: Mutex<Option<Sender<()>>>,
	receiver: Receiver<()>,
	signaled: AtomicBool,
	running: Mutex<usize>,
	finished: Condvar,
}

impl Default for Closer {
	fn default() -> Self {
		Self::new(0)
	}
}

impl Closer {
	/// Constructs a new [`Closer`] with an initial count of running
	/// tasks.
	pub fn new(initial: usize) -> Self {
		let (sender, receiver) = bounded(0);
		Self(Arc::new(CloserInner {
			sender: Mutex::new(Some(sender)),
			receiver,
			signaled: AtomicBool::new(false),
			running: Mutex::new(initial),
			finished: Condvar::new(),
		}))
	}

	/// Registers `n` more running tasks.
	pub fn add_running(&self, n: usize) {
		*self.0.running.lock() += n;
	}

	/// Marks one task as finished.
	pub fn done(&self) {
		let mut running = self.0.running.lock();
		*running = running.saturating_sub(1);
		if *running == 0 {
			self.0.finished.notify_all();
		}
	}

	/// Signals the shutdown. Idempotent.
	pub fn signal(&self) {
		if !self.0.signaled.swap(true, Ordering::AcqRel) {
			// Dropping the sender disconnects every listener.
			self.0.sender.lock().take();
		}
	}

	/// Returns a receiver that becomes disconnected when [`Closer::signal`]
	/// is called. Usable inside `crossbeam_channel::select!`.
	pub fn listen(&self) -> Receiver<()> {
		self.0.receiver.clone()
	}

	pub fn is_signaled(&self) -> bool {
		self.0.signaled.load(Ordering::Acquire)
	}

	/// Blocks until every registered task has called [`Closer::done`].
	pub fn wait(&self) {
		let mut running = self.0.running.lock();
		while *running > 0 {
			self.0.finished.wait(&mut running);
		}
	}

	/// Calls [`Closer::signal`], then [`Closer::wait`].
	pub fn signal_and_wait(&self) {
		self.signal();
		self.wait();
	}
}

#[cfg(test)]
mod tests {
	use std::{thread, time::Duration};

	use super::*;

	#[test]
	fn test_signal_is_idempotent() {
		let closer = Closer::default();
		closer.signal();
		closer.signal();
		closer.signal_and_wait();
		assert!(closer.is_signaled());
	}

	#[test]
	fn test_listener_observes_signal() {
		let closer = Closer::new(1);
		let worker = closer.clone();
		let handle = thread::spawn(move || {
			let rx = worker.listen();
			// recv returns Err once the closer drops the sender.
			assert!(rx.recv().is_err());
			worker.done();
		});
		thread::sleep(Duration::from_millis(10));
		closer.signal_and_wait();
		handle.join().unwrap();
	}

	#[test]
	fn test_waits_for_many() {
		let closer = Closer::new(4);
		for _ in 0..4 {
			let worker = closer.clone();
			thread::spawn(move || {
				let _ = worker.listen().recv();
				worker.done();
			});
		}
		closer.signal_and_wait();
	}
}
