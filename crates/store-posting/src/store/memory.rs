// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::sync::{
	atomic::{AtomicBool, AtomicUsize, Ordering},
	Arc,
};

use crossbeam_skiplist::SkipMap;
use parking_lot::Mutex;
use reifydb_graph_core::{CommitVersion, Error, Result};

use super::{PostingStore, SkipValue, Skiplist, StoreConfig, VersionEntry};

type VersionedValues = SkipMap<CommitVersion, Option<SkipValue>>;

/// In-memory versioned store: every key maps to its version chain, with
/// `None` as the tombstone. Handover absorbs a whole skiplist under one
/// lock so readers never observe a half-applied commit.
#[derive(Clone)]
pub struct MemoryStore(Arc<MemoryStoreInner>);

pub struct MemoryStoreInner {
	keys: SkipMap<Vec<u8>, VersionedValues>,
	config: StoreConfig,
	closed: AtomicBool,
	commit_lock: Mutex<()>,
	// Test hook: fail this many handovers before succeeding again.
	fail_handovers: AtomicUsize,
}

impl Default for MemoryStore {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::with_config(StoreConfig::default())
	}

	pub fn with_config(config: StoreConfig) -> Self {
		Self(Arc::new(MemoryStoreInner {
			keys: SkipMap::new(),
			config,
			closed: AtomicBool::new(false),
			commit_lock: Mutex::new(()),
			fail_handovers: AtomicUsize::new(0),
		}))
	}

	/// Writes one version of a key directly.
	pub fn set(&self, key: &[u8], version: CommitVersion, value: SkipValue) {
		let discard = value.meta().map_or(false, |meta| meta.discard_earlier);
		let versions = self.0.keys.get_or_insert_with(key.to_vec(), VersionedValues::new);
		versions.value().insert(version, Some(value));
		if discard {
			Self::drop_earlier_versions(versions.value(), version);
		}
	}

	/// Writes a tombstone at `version`; older versions stay but become
	/// unreachable through reads at or above it.
	pub fn delete(&self, key: &[u8], version: CommitVersion) {
		let versions = self.0.keys.get_or_insert_with(key.to_vec(), VersionedValues::new);
		versions.value().insert(version, None);
	}

	pub fn close(&self) {
		self.0.closed.store(true, Ordering::Release);
	}

	/// Test hook: the next `n` handovers fail with a transient error.
	pub fn fail_next_handovers(&self, n: usize) {
		self.0.fail_handovers.store(n, Ordering::Release);
	}

	fn drop_earlier_versions(versions: &VersionedValues, version: CommitVersion) {
		let earlier: Vec<CommitVersion> =
			versions.range(..version).map(|entry| *entry.key()).collect();
		for v in earlier {
			versions.remove(&v);
		}
	}
}

pub struct MemoryKeyIter {
	entries: std::vec::IntoIter<VersionEntry>,
}

impl Iterator for MemoryKeyIter {
	type Item = VersionEntry;

	fn next(&mut self) -> Option<VersionEntry> {
		self.entries.next()
	}
}

impl PostingStore for MemoryStore {
	type KeyIter = MemoryKeyIter;

	fn is_closed(&self) -> bool {
		self.0.closed.load(Ordering::Acquire)
	}

	fn key_iterator(&self, key: &[u8], read_ts: CommitVersion) -> MemoryKeyIter {
		let mut entries = Vec::new();
		if let Some(versions) = self.0.keys.get(key) {
			for entry in versions.value().range(..=read_ts).rev() {
				entries.push(VersionEntry {
					version: *entry.key(),
					value: entry.value().clone(),
				});
			}
		}
		MemoryKeyIter {
			entries: entries.into_iter(),
		}
	}

	fn handover_skiplist(
		&self,
		sl: &Skiplist,
		on_absorbed: Option<&(dyn Fn() + Send + Sync)>,
	) -> Result<()> {
		if self.is_closed() {
			return Err(Error::StoreClosed);
		}
		if self
			.0
			.fail_handovers
			.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
			.is_ok()
		{
			return Err(Error::HandoverFailed("injected failure".to_string()));
		}

		let _guard = self.0.commit_lock.lock();
		for entry in sl.iter() {
			self.set(&entry.key().key, entry.key().version, entry.value().clone());
		}
		if let Some(callback) = on_absorbed {
			callback();
		}
		Ok(())
	}

	fn valid_entry(&self, key: &[u8], value: &[u8]) -> Result<()> {
		if key.is_empty() || key.len() > self.0.config.max_key_size || value.len() > self.0.config.max_value_size {
			return Err(Error::EntryTooLarge {
				key_len: key.len(),
				value_len: value.len(),
			});
		}
		Ok(())
	}

	fn max_value_size(&self) -> usize {
		self.0.config.max_value_size
	}
}

#[cfg(test)]
mod tests {
	use reifydb_graph_core::{MetaTag, ValueMeta, VersionedKey};

	use super::*;

	fn delta(payload: &[u8]) -> SkipValue {
		SkipValue::new(payload.to_vec(), ValueMeta::new(MetaTag::Delta))
	}

	#[test]
	fn test_iterates_newest_first_capped_at_read_ts() {
		let store = MemoryStore::new();
		for version in [3u64, 7, 11] {
			store.set(b"k", CommitVersion(version), delta(&[version as u8]));
		}

		let versions: Vec<u64> =
			store.key_iterator(b"k", CommitVersion(10)).map(|e| e.version.0).collect();
		assert_eq!(versions, vec![7, 3]);

		let all: Vec<u64> =
			store.key_iterator(b"k", CommitVersion::MAX).map(|e| e.version.0).collect();
		assert_eq!(all, vec![11, 7, 3]);
	}

	#[test]
	fn test_missing_key_yields_nothing() {
		let store = MemoryStore::new();
		assert_eq!(store.key_iterator(b"absent", CommitVersion::MAX).count(), 0);
	}

	#[test]
	fn test_tombstone_is_visible_as_deleted() {
		let store = MemoryStore::new();
		store.set(b"k", CommitVersion(1), delta(&[1]));
		store.delete(b"k", CommitVersion(5));

		let entries: Vec<VersionEntry> =
			store.key_iterator(b"k", CommitVersion::MAX).collect();
		assert!(entries[0].is_deleted());
		assert_eq!(entries[0].version, CommitVersion(5));
		assert!(!entries[1].is_deleted());
	}

	#[test]
	fn test_discard_earlier_versions_prunes() {
		let store = MemoryStore::new();
		store.set(b"k", CommitVersion(1), delta(&[1]));
		store.set(b"k", CommitVersion(2), delta(&[2]));
		store.set(
			b"k",
			CommitVersion(3),
			SkipValue::new(vec![3], ValueMeta::with_discard(MetaTag::Complete)),
		);

		let versions: Vec<u64> =
			store.key_iterator(b"k", CommitVersion::MAX).map(|e| e.version.0).collect();
		assert_eq!(versions, vec![3]);
	}

	#[test]
	fn test_handover_absorbs_and_notifies() {
		let store = MemoryStore::new();
		let sl = Skiplist::new();
		sl.put(VersionedKey::new(b"a".to_vec(), CommitVersion(4)), delta(&[4]));
		sl.put(VersionedKey::new(b"b".to_vec(), CommitVersion(4)), delta(&[5]));

		let notified = std::sync::atomic::AtomicBool::new(false);
		let callback = || notified.store(true, Ordering::Release);
		store.handover_skiplist(&sl, Some(&callback)).unwrap();

		assert!(notified.load(Ordering::Acquire));
		assert_eq!(store.key_iterator(b"a", CommitVersion::MAX).count(), 1);
		assert_eq!(store.key_iterator(b"b", CommitVersion::MAX).count(), 1);
	}

	#[test]
	fn test_handover_failure_injection() {
		let store = MemoryStore::new();
		store.fail_next_handovers(2);
		let sl = Skiplist::new();
		sl.put(VersionedKey::new(b"a".to_vec(), CommitVersion(1)), delta(&[1]));

		assert!(store.handover_skiplist(&sl, None).is_err());
		assert!(store.handover_skiplist(&sl, None).is_err());
		assert!(store.handover_skiplist(&sl, None).is_ok());
	}

	#[test]
	fn test_closed_store_rejects_handover() {
		let store = MemoryStore::new();
		store.close();
		assert!(store.is_closed());
		assert!(matches!(
			store.handover_skiplist(&Skiplist::new(), None),
			Err(Error::StoreClosed)
		));
	}

	#[test]
	fn test_valid_entry_limits() {
		let store = MemoryStore::with_config(StoreConfig {
			max_key_size: 8,
			max_value_size: 16,
		});
		assert!(store.valid_entry(b"key", b"value").is_ok());
		assert!(store.valid_entry(b"", b"value").is_err());
		assert!(store.valid_entry(b"way-too-long-key", b"v").is_err());
		assert!(store.valid_entry(b"key", &[0u8; 17]).is_err());
	}
}
