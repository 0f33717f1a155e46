// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Per-transaction staging of posting deltas.
//!
//! A transaction accumulates encoded deltas, read-key fingerprints and
//! conflict fingerprints. At commit time the deltas become a skiplist the
//! store absorbs; state snapshots are never written here, they come from
//! rollups. Schema mutations take a different path and must not be routed
//! through [`Txn::to_skiplist`].

use std::{
	collections::{BTreeMap, HashSet},
	sync::atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use reifydb_graph_core::{
	key::parse, CommitVersion, Hash64, MetaTag, Result, ValueMeta, VersionedKey,
};
use tracing::error;

use crate::{
	cache::{CacheEntry, ListCache},
	proto::PostingData,
	store::{PostingStore, SkipValue, Skiplist},
};

/// The context a transaction reports back to the oracle: its start
/// timestamp, conflict fingerprints and the predicates it touched.
#[derive(Debug, Default, Clone)]
pub struct TxnContext {
	pub start_ts: CommitVersion,
	pub keys: Vec<String>,
	pub preds: Vec<String>,
}

#[derive(Default)]
struct TxnCache {
	deltas: BTreeMap<Vec<u8>, Vec<u8>>,
	read_keys: HashSet<Hash64>,
	conflicts: HashSet<Hash64>,
}

pub struct Txn {
	start_ts: CommitVersion,
	cache: Mutex<TxnCache>,
	should_abort: AtomicBool,
	skiplist: Mutex<Option<Skiplist>>,
}

impl Txn {
	pub fn new(start_ts: CommitVersion) -> Self {
		Self {
			start_ts,
			cache: Mutex::new(TxnCache::default()),
			should_abort: AtomicBool::new(false),
			skiplist: Mutex::new(None),
		}
	}

	pub fn start_ts(&self) -> CommitVersion {
		self.start_ts
	}

	pub fn should_abort(&self) -> bool {
		self.should_abort.load(Ordering::Acquire)
	}

	pub fn set_should_abort(&self) {
		self.should_abort.store(true, Ordering::Release);
	}

	/// Records a conflict fingerprint. Zero fingerprints carry no
	/// information and are ignored.
	pub fn add_conflict_key(&self, hash: Hash64) {
		if hash.is_zero() {
			return;
		}
		self.cache.lock().conflicts.insert(hash);
	}

	pub fn add_read_key(&self, hash: Hash64) {
		self.cache.lock().read_keys.insert(hash);
	}

	/// Stages the encoded delta for `key`, replacing any earlier staged
	/// delta for it.
	pub fn stage_delta(&self, key: Vec<u8>, delta: &PostingData) {
		self.cache.lock().deltas.insert(key, delta.encode());
	}

	pub fn deltas(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
		self.cache.lock().deltas.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
	}

	pub fn read_keys(&self) -> Vec<Hash64> {
		self.cache.lock().read_keys.iter().copied().collect()
	}

	/// Fills `ctx` with this transaction's start timestamp, its conflict
	/// fingerprints rendered in base 36, and the predicates its deltas
	/// touch, prefixed with the group they belong to.
	pub fn fill_context(&self, ctx: &mut TxnContext, gid: u32) {
		let cache = self.cache.lock();
		ctx.start_ts = self.start_ts;

		for hash in &cache.conflicts {
			ctx.keys.push(hash.to_base36());
		}
		ctx.keys.sort();
		ctx.keys.dedup();

		for key in cache.deltas.keys() {
			if let Ok(parsed) = parse(key) {
				ctx.preds.push(format!("{}-{}", gid, parsed.attr));
			}
		}
		ctx.preds.sort();
		ctx.preds.dedup();
	}

	/// Builds the commit skiplist from this transaction's deltas: one
	/// entry per non-empty delta key, byte-ascending, at
	/// [`CommitVersion::MAX`] with delta meta. Entries the store rejects
	/// are logged and skipped; the commit itself proceeds.
	pub fn to_skiplist<S: PostingStore>(&self, store: &S) -> Result<()> {
		let cache = self.cache.lock();
		let sl = Skiplist::new();
		for (key, data) in &cache.deltas {
			if data.is_empty() {
				continue;
			}
			if let Err(err) = store.valid_entry(key, data) {
				error!(
					key_len = key.len(),
					value_len = data.len(),
					"invalid entry skipped during commit: {err}"
				);
				continue;
			}
			sl.put(
				VersionedKey::new(key.clone(), CommitVersion::MAX),
				SkipValue::new(data.clone(), ValueMeta::new(MetaTag::Delta)),
			);
		}
		*self.skiplist.lock() = Some(sl);
		Ok(())
	}

	/// Takes the skiplist produced by [`Txn::to_skiplist`].
	pub fn take_skiplist(&self) -> Option<Skiplist> {
		self.skiplist.lock().take()
	}

	/// Demotes the cache slot of every key this transaction wrote to the
	/// raw commit timestamp, so the next reader refetches.
	pub fn update_cached_keys(&self, cache: &ListCache, commit_ts: CommitVersion) {
		debug_assert!(commit_ts.0 > 0);
		let txn_cache = self.cache.lock();
		for key in txn_cache.deltas.keys() {
			cache.set_if_present(key, CacheEntry::Sentinel(commit_ts));
		}
	}
}

#[cfg(test)]
mod tests {
	use reifydb_graph_core::{codec, data_key, hash_key};

	use super::*;
	use crate::{
		proto::Posting,
		store::{MemoryStore, StoreConfig},
	};

	fn delta(uid: u64) -> PostingData {
		PostingData {
			uids: codec::UidList::default(),
			postings: vec![Posting::set(uid)],
			commit_ts: CommitVersion::default(),
			splits: Vec::new(),
		}
	}

	#[test]
	fn test_abort_flag() {
		let txn = Txn::new(CommitVersion(3));
		assert!(!txn.should_abort());
		txn.set_should_abort();
		assert!(txn.should_abort());
	}

	#[test]
	fn test_conflicts_ignore_zero() {
		let txn = Txn::new(CommitVersion(3));
		txn.add_conflict_key(Hash64(0));
		txn.add_conflict_key(Hash64(17));

		let mut ctx = TxnContext::default();
		txn.fill_context(&mut ctx, 1);
		assert_eq!(ctx.keys, vec![Hash64(17).to_base36()]);
	}

	#[test]
	fn test_fill_context_dedups() {
		let txn = Txn::new(CommitVersion(9));
		txn.add_conflict_key(Hash64(100));
		txn.add_conflict_key(Hash64(100));
		txn.stage_delta(data_key("follows", 1), &delta(5));
		txn.stage_delta(data_key("follows", 2), &delta(6));
		txn.stage_delta(data_key("likes", 1), &delta(7));

		let mut ctx = TxnContext::default();
		txn.fill_context(&mut ctx, 2);
		assert_eq!(ctx.start_ts, CommitVersion(9));
		assert_eq!(ctx.keys.len(), 1);
		assert_eq!(ctx.preds, vec!["2-follows".to_string(), "2-likes".to_string()]);
	}

	#[test]
	fn test_to_skiplist_sorted_at_max_with_delta_meta() {
		let store = MemoryStore::new();
		let txn = Txn::new(CommitVersion(1));
		// staged out of byte order on purpose
		txn.stage_delta(data_key("zeta", 1), &delta(1));
		txn.stage_delta(data_key("alpha", 1), &delta(2));

		txn.to_skiplist(&store).unwrap();
		let sl = txn.take_skiplist().unwrap();

		let keys: Vec<Vec<u8>> = sl.iter().map(|e| e.key().key.clone()).collect();
		let mut sorted = keys.clone();
		sorted.sort();
		assert_eq!(keys, sorted);
		assert_eq!(sl.len(), 2);

		for entry in sl.iter() {
			assert_eq!(entry.key().version, CommitVersion::MAX);
			assert_eq!(entry.value().meta().unwrap().tag, MetaTag::Delta);
		}
	}

	#[test]
	fn test_to_skiplist_skips_empty_deltas() {
		let store = MemoryStore::new();
		let txn = Txn::new(CommitVersion(1));
		txn.stage_delta(data_key("follows", 1), &delta(5));
		// an empty payload must not become a tombstone entry
		txn.cache.lock().deltas.insert(data_key("follows", 2), Vec::new());

		txn.to_skiplist(&store).unwrap();
		assert_eq!(txn.take_skiplist().unwrap().len(), 1);
	}

	#[test]
	fn test_to_skiplist_skips_invalid_entries_without_aborting() {
		let store = MemoryStore::with_config(StoreConfig {
			max_key_size: 1 << 16,
			max_value_size: 4,
		});
		let txn = Txn::new(CommitVersion(1));
		txn.stage_delta(data_key("follows", 1), &delta(5));

		txn.to_skiplist(&store).unwrap();
		assert_eq!(txn.take_skiplist().unwrap().len(), 0);
		assert!(!txn.should_abort());
	}

	#[test]
	fn test_update_cached_keys_demotes_to_sentinel() {
		let cache = ListCache::new();
		let key = data_key("follows", 1);
		cache.set(&key, CacheEntry::Sentinel(CommitVersion(1)));

		let txn = Txn::new(CommitVersion(40));
		txn.stage_delta(key.clone(), &delta(5));
		txn.stage_delta(data_key("follows", 2), &delta(6));
		txn.update_cached_keys(&cache, CommitVersion(50));

		assert!(matches!(cache.get(&key), Some(CacheEntry::Sentinel(v)) if v == CommitVersion(50)));
		// keys absent from the cache stay absent
		assert!(cache.get(&data_key("follows", 2)).is_none());
	}

	#[test]
	fn test_read_keys_accessor() {
		let txn = Txn::new(CommitVersion(2));
		txn.add_read_key(hash_key(b"a"));
		txn.add_read_key(hash_key(b"a"));
		txn.add_read_key(hash_key(b"b"));
		assert_eq!(txn.read_keys().len(), 2);
	}
}
