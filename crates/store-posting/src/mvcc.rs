// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The MVCC read path: drives a versioned key iterator to assemble a
//! posting list at a read timestamp, coordinating with the list cache and
//! scheduling rollup work for delta-heavy keys.

use std::{collections::BTreeMap, sync::Arc, thread};

use reifydb_graph_core::{
	key::parse, util::Closer, CommitVersion, Error, MetaTag, Result,
};

use crate::{
	cache::{CacheEntry, ListCache},
	list::PostingList,
	proto::PostingData,
	rollup::{IncrRollup, RollupConfig},
	store::{PostingStore, VersionEntry},
	txn::Txn,
};

/// Constructs the posting list for `key` from an all-versions iterator,
/// newest first. The iterator must already be scoped to `key` and to the
/// read timestamp.
///
/// Multi-part lists may only be read through their main key; a secondary
/// part key fails before any side effect. When the chain carried deltas,
/// the key is enqueued for rollup: high priority once the chain is deep
/// enough that reading it is already expensive, low priority otherwise.
pub fn read_posting_list(
	key: &[u8],
	iter: &mut impl Iterator<Item = VersionEntry>,
	rollup: Option<&IncrRollup>,
) -> Result<PostingList> {
	let parsed = parse(key)?;
	if parsed.has_start_uid() {
		return Err(Error::InvalidKey);
	}

	let mut delta_count = 0usize;
	let result = read_versions(key, iter, &mut delta_count);
	if let Some(rollup) = rollup {
		rollup.enqueue_for_deltas(key, delta_count);
	}
	result
}

fn read_versions(
	key: &[u8],
	iter: &mut impl Iterator<Item = VersionEntry>,
	delta_count: &mut usize,
) -> Result<PostingList> {
	let mut list = PostingList::new(key.to_vec());

	for entry in iter {
		list.max_ts = list.max_ts.max(entry.version);
		let Some(value) = &entry.value else {
			// Deleted; don't consider any older versions.
			break;
		};
		let meta = match value.meta() {
			Some(meta) => meta,
			None => return Err(Error::unexpected_meta(key, value.meta_byte())),
		};
		match meta.tag {
			MetaTag::Empty => {
				list.min_ts = entry.version;
				return Ok(list);
			}
			MetaTag::Complete => {
				list.base = Arc::new(PostingData::decode(key, &value.value)?);
				list.min_ts = entry.version;
				return Ok(list);
			}
			MetaTag::Delta => {
				let mut delta = PostingData::decode(key, &value.value)?;
				delta.commit_ts = entry.version;
				for posting in &mut delta.postings {
					posting.commit_ts = entry.version;
				}
				list.mutations.insert(entry.version, delta);
				*delta_count += 1;
			}
			MetaTag::Schema => {
				return Err(Error::schema_read(key));
			}
		}
		if meta.discard_earlier {
			break;
		}
	}
	Ok(list)
}

/// The posting read surface: resolves `(key, read_ts)` against the store,
/// the list cache and the rollup engine. One engine instance is shared by
/// every reader and by the rollup worker.
pub struct PostingEngine<S: PostingStore> {
	store: Arc<S>,
	cache: Arc<ListCache>,
	rollup: Arc<IncrRollup>,
}

impl<S: PostingStore> Clone for PostingEngine<S> {
	fn clone(&self) -> Self {
		Self {
			store: Arc::clone(&self.store),
			cache: Arc::clone(&self.cache),
			rollup: Arc::clone(&self.rollup),
		}
	}
}

impl<S: PostingStore> PostingEngine<S> {
	pub fn new(store: Arc<S>, config: RollupConfig) -> Self {
		Self {
			store,
			cache: Arc::new(ListCache::new()),
			rollup: Arc::new(IncrRollup::new(config)),
		}
	}

	pub fn store(&self) -> &Arc<S> {
		&self.store
	}

	pub fn cache(&self) -> &ListCache {
		&self.cache
	}

	pub fn incr_rollup(&self) -> &Arc<IncrRollup> {
		&self.rollup
	}

	/// Reads the posting list for `key` at `read_ts`. The returned list
	/// is collapsed (no mutation map) and shares only immutable state.
	pub fn get(&self, key: &[u8], read_ts: CommitVersion) -> Result<Arc<PostingList>> {
		if self.store.is_closed() {
			return Err(Error::StoreClosed);
		}

		let mut seen_ts = CommitVersion::default();
		match self.cache.get(key) {
			Some(CacheEntry::List(list)) => {
				// The cached latest version may be newer than this
				// read; only serve it when the read can see it.
				if list.max_ts <= read_ts {
					debug_assert!(list.mutations.is_empty());
					return Ok(list);
				}
			}
			Some(CacheEntry::Sentinel(ts)) => seen_ts = ts,
			None => {
				// Register the key before reading the store, so a
				// commit landing between our store read and our
				// cache install demotes the slot and wins; without
				// this the commit would be invisible to the cache.
				self.cache.set(key, CacheEntry::Sentinel(CommitVersion(1)));
			}
		}

		let mut iter = self.store.key_iterator(key, read_ts).peekable();
		let latest_ts = iter.peek().map(|entry| entry.version).unwrap_or_default();
		let list = read_posting_list(key, &mut iter, Some(&*self.rollup))?;

		// Collapse for caching; the rollup worker reads through this
		// same path, so its work is served from here as well.
		let folded = list.rollup(CommitVersion::MAX);
		let fresh = Arc::new(PostingList {
			key: list.key.clone(),
			min_ts: folded.new_min_ts,
			max_ts: list.max_ts,
			base: Arc::new(folded.data),
			mutations: BTreeMap::new(),
		});

		// Install only when this read observed the latest version of
		// the key and nothing newer superseded our sentinel.
		if read_ts >= latest_ts && latest_ts >= seen_ts {
			self.cache.install(key, latest_ts, Arc::clone(&fresh));
		}
		Ok(fresh)
	}

	/// Reads the posting list for `key` at `read_ts`, bypassing the
	/// cache entirely: no probe, no sentinel, no install. The returned
	/// list keeps its mutation map, which is what rollups fold.
	pub fn get_no_store(&self, key: &[u8], read_ts: CommitVersion) -> Result<PostingList> {
		if self.store.is_closed() {
			return Err(Error::StoreClosed);
		}
		let mut iter = self.store.key_iterator(key, read_ts);
		read_posting_list(key, &mut iter, Some(&*self.rollup))
	}

	pub fn reset_cache(&self) {
		self.cache.clear();
	}

	/// Commits a transaction: hands its delta skiplist, rewritten to
	/// `commit_ts`, to the store, then demotes the cache slot of every
	/// written key.
	pub fn commit(&self, txn: &Txn, commit_ts: CommitVersion) -> Result<()> {
		let sl = match txn.take_skiplist() {
			Some(sl) => sl,
			None => {
				txn.to_skiplist(self.store.as_ref())?;
				txn.take_skiplist().unwrap_or_default()
			}
		};
		let sl = sl.with_version(commit_ts);
		self.store.handover_skiplist(&sl, None)?;
		txn.update_cached_keys(&self.cache, commit_ts);
		Ok(())
	}

	/// Spawns the rollup worker on a dedicated thread. The worker runs
	/// until `closer` is signaled and reports done through it.
	pub fn spawn_rollup_worker(&self, closer: Closer) -> thread::JoinHandle<()> {
		closer.add_running(1);
		let engine = self.clone();
		thread::Builder::new()
			.name("posting-rollup".to_string())
			.spawn(move || {
				let rollup = Arc::clone(&engine.rollup);
				rollup.process(&engine, closer);
			})
			.expect("failed to spawn posting rollup thread")
	}
}
