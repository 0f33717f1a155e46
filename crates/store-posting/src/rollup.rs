// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The incremental rollup engine.
//!
//! Readers enqueue delta-heavy keys here in two priorities. A dedicated
//! worker drains batches, re-reads each key at the maximum timestamp,
//! folds it and accumulates the rewritten snapshots in a skiplist that is
//! periodically handed to the store. Batch loss on overflow is deliberate:
//! a dropped key is rediscovered by the next reader that trips the delta
//! threshold.

use std::{
	collections::HashMap,
	sync::atomic::{AtomicU64, Ordering},
	time::{Duration, Instant},
};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use reifydb_graph_core::{
	hash_key,
	util::{hex, retry, Closer},
	CommitVersion, Hash64, MetaTag, Result, ValueMeta, VersionedKey,
};
use tracing::{debug, error, warn};

use crate::{
	mvcc::PostingEngine,
	store::{PostingStore, SkipValue, Skiplist},
};

#[derive(Debug, Clone)]
pub struct RollupConfig {
	/// Keys per batch; batches are enqueued at this granularity.
	pub batch_size: usize,
	/// Full batches buffered per priority before overflow drops them.
	pub channel_capacity: usize,
	/// Delta depth above which a key is enqueued at high priority.
	pub high_priority_deltas: usize,
	/// A key is rolled up at most once per window by one worker.
	pub dedup_window: Duration,
	/// Drains partial high-priority batches and paces handover.
	pub base_tick: Duration,
	/// Caps low-priority throughput to one batch per tick.
	pub limiter_tick: Duration,
	/// Evicts stale dedup entries.
	pub cleanup_tick: Duration,
	/// The accumulated skiplist is handed over every this many base
	/// ticks.
	pub handover_every: u64,
	pub handover_retries: usize,
	pub handover_retry_interval: Duration,
}

impl Default for RollupConfig {
	fn default() -> Self {
		Self {
			batch_size: 16,
			channel_capacity: 16,
			high_priority_deltas: 500,
			dedup_window: Duration::from_secs(10),
			base_tick: Duration::from_millis(500),
			limiter_tick: Duration::from_millis(1),
			cleanup_tick: Duration::from_secs(300),
			handover_every: 4,
			handover_retries: 3600,
			handover_retry_interval: Duration::from_secs(1),
		}
	}
}

/// High priority keys carry enough deltas that reading them is already
/// expensive; they are rolled up without rate limiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
	High = 0,
	Low = 1,
}

/// One priority's batching state: a pool of reusable key buffers being
/// filled, and a bounded channel of full batches.
struct PriorityKeys {
	pool: Mutex<Vec<Vec<Vec<u8>>>>,
	batch_tx: Sender<Vec<Vec<u8>>>,
	batch_rx: Receiver<Vec<Vec<u8>>>,
}

impl PriorityKeys {
	fn new(capacity: usize) -> Self {
		let (batch_tx, batch_rx) = bounded(capacity);
		Self {
			pool: Mutex::new(Vec::new()),
			batch_tx,
			batch_rx,
		}
	}

	fn take_batch(&self, batch_size: usize) -> Vec<Vec<u8>> {
		self.pool.lock().pop().unwrap_or_else(|| Vec::with_capacity(batch_size))
	}

	fn put_back(&self, batch: Vec<Vec<u8>>) {
		self.pool.lock().push(batch);
	}
}

pub struct IncrRollup {
	config: RollupConfig,
	priorities: [PriorityKeys; 2],
	rolled_up: AtomicU64,
}

impl IncrRollup {
	pub fn new(config: RollupConfig) -> Self {
		let priorities = [
			PriorityKeys::new(config.channel_capacity),
			PriorityKeys::new(config.channel_capacity),
		];
		Self {
			config,
			priorities,
			rolled_up: AtomicU64::new(0),
		}
	}

	pub fn config(&self) -> &RollupConfig {
		&self.config
	}

	/// Total keys rolled up by the worker since construction.
	pub fn rolled_up_keys(&self) -> u64 {
		self.rolled_up.load(Ordering::Relaxed)
	}

	/// Appends `key` to the batch being filled for `priority`. A full
	/// batch moves to the channel; when the channel is full the batch is
	/// dropped and its buffer recycled.
	pub fn add_key_to_batch(&self, key: &[u8], priority: Priority) {
		let keys = &self.priorities[priority as usize];
		let mut batch = keys.take_batch(self.config.batch_size);
		batch.push(key.to_vec());
		if batch.len() < self.config.batch_size {
			keys.put_back(batch);
			return;
		}
		if let Err(err) = keys.batch_tx.try_send(batch) {
			// Lossy by design.
			let mut batch = err.into_inner();
			batch.clear();
			keys.put_back(batch);
		}
	}

	/// Routes a key read with `delta_count` deltas to the right
	/// priority. No-op for delta-free keys.
	pub(crate) fn enqueue_for_deltas(&self, key: &[u8], delta_count: usize) {
		if delta_count == 0 {
			return;
		}
		if delta_count > self.config.high_priority_deltas {
			self.add_key_to_batch(key, Priority::High);
		} else {
			self.add_key_to_batch(key, Priority::Low);
		}
	}

	/// The worker loop. Runs until `closer` is signaled; shutdown,
	/// tickers and batch channels are selected as equal events. Batches
	/// in flight at shutdown are abandoned, which only delays the next
	/// rollup of their keys.
	pub fn process<S: PostingStore>(&self, engine: &PostingEngine<S>, closer: Closer) {
		let shutdown = closer.listen();
		let cleanup = tick(self.config.cleanup_tick);
		let base = tick(self.config.base_tick);
		let limiter = tick(self.config.limiter_tick);

		let mut dedup: HashMap<Hash64, Instant> = HashMap::new();
		let mut sl = Skiplist::new();
		let mut ticks: u64 = 0;

		debug!("rollup worker started");
		loop {
			select! {
				recv(shutdown) -> _ => {
					debug!("rollup worker stopped");
					closer.done();
					return;
				}
				recv(cleanup) -> _ => {
					dedup.retain(|_, last| last.elapsed() < self.config.dedup_window);
				}
				recv(base) -> _ => {
					// Pick up the partially-filled high priority
					// batch; infrequent writes would otherwise wait
					// on a full batch forever.
					let batch = self.priorities[Priority::High as usize]
						.take_batch(self.config.batch_size);
					if batch.is_empty() {
						self.priorities[Priority::High as usize].put_back(batch);
					} else {
						self.do_rollup(engine, &mut dedup, batch, Priority::High, &sl);
					}
					ticks += 1;
					if ticks % self.config.handover_every == 0 {
						self.handover(engine, &mut sl);
					}
				}
				recv(self.priorities[Priority::High as usize].batch_rx) -> batch => {
					if let Ok(batch) = batch {
						self.do_rollup(engine, &mut dedup, batch, Priority::High, &sl);
					}
				}
				recv(self.priorities[Priority::Low as usize].batch_rx) -> batch => {
					if let Ok(batch) = batch {
						self.do_rollup(engine, &mut dedup, batch, Priority::Low, &sl);
						// throttle: one low priority batch per tick
						let _ = limiter.recv();
					}
				}
			}
		}
	}

	fn do_rollup<S: PostingStore>(
		&self,
		engine: &PostingEngine<S>,
		dedup: &mut HashMap<Hash64, Instant>,
		mut batch: Vec<Vec<u8>>,
		priority: Priority,
		sl: &Skiplist,
	) {
		for key in batch.drain(..) {
			let hash = hash_key(&key);
			// Key rolled up within the window already; skip.
			if dedup.get(&hash).is_some_and(|last| last.elapsed() < self.config.dedup_window) {
				continue;
			}
			dedup.insert(hash, Instant::now());
			if let Err(err) = self.rollup_key(engine, sl, &key) {
				warn!("rollup failed for key {}: {err}", hex::encode(&key));
			}
		}
		self.priorities[priority as usize].put_back(batch);
	}

	fn rollup_key<S: PostingStore>(
		&self,
		engine: &PostingEngine<S>,
		sl: &Skiplist,
		key: &[u8],
	) -> Result<()> {
		let list = engine.get_no_store(key, CommitVersion::MAX)?;
		let entries = list.to_entries(engine.store().max_value_size())?;

		for entry in entries {
			let meta = match entry.meta.tag {
				// Let the store drop the versions this snapshot
				// supersedes.
				MetaTag::Complete | MetaTag::Empty => ValueMeta::with_discard(entry.meta.tag),
				_ => entry.meta,
			};
			sl.put(
				VersionedKey::new(entry.key, entry.version),
				SkipValue::new(entry.value, meta),
			);
		}

		let count = self.rolled_up.fetch_add(1, Ordering::Relaxed) + 1;
		if count % 1000 == 0 {
			debug!("rolled up {count} keys");
		}
		Ok(())
	}

	fn handover<S: PostingStore>(&self, engine: &PostingEngine<S>, sl: &mut Skiplist) {
		if sl.is_empty() {
			return;
		}
		// After a failed handover the skiplist may not be safe to keep
		// filling, so the accumulator is always replaced.
		let full = std::mem::take(sl);
		let result = retry(self.config.handover_retries, self.config.handover_retry_interval, || {
			engine.store().handover_skiplist(&full, None)
		});
		if let Err(err) = result {
			error!("rollup skiplist handover failed: {err}");
		}
	}

	#[cfg(test)]
	pub(crate) fn pooled_keys(&self, priority: Priority) -> Vec<Vec<u8>> {
		self.priorities[priority as usize].pool.lock().iter().flatten().cloned().collect()
	}

	#[cfg(test)]
	pub(crate) fn try_recv_batch(&self, priority: Priority) -> Option<Vec<Vec<u8>>> {
		self.priorities[priority as usize].batch_rx.try_recv().ok()
	}
}
