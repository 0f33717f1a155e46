// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;
use reifydb_graph_core::CommitVersion;

use crate::list::PostingList;

/// What a cache slot holds: the fully-loaded latest list, or a sentinel
/// timestamp meaning "a write happened at or around this version; the
/// real list must be refetched".
#[derive(Debug, Clone)]
pub enum CacheEntry {
	List(Arc<PostingList>),
	Sentinel(CommitVersion),
}

/// The list cache. All operations are atomic under one lock, which is
/// what makes the sentinel-then-value protocol race-free: between a
/// reader writing its sentinel and installing the full list, a committer
/// that demotes the slot via [`ListCache::set_if_present`] wins, because
/// [`ListCache::install`] declines to overwrite a newer sentinel.
#[derive(Default)]
pub struct ListCache {
	entries: Mutex<HashMap<Vec<u8>, CacheEntry>>,
}

impl ListCache {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, key: &[u8]) -> Option<CacheEntry> {
		self.entries.lock().get(key).cloned()
	}

	pub fn set(&self, key: &[u8], entry: CacheEntry) {
		self.entries.lock().insert(key.to_vec(), entry);
	}

	/// Updates the slot only when it currently exists. Returns whether
	/// the slot was updated.
	pub fn set_if_present(&self, key: &[u8], entry: CacheEntry) -> bool {
		let mut entries = self.entries.lock();
		match entries.get_mut(key) {
			Some(slot) => {
				*slot = entry;
				true
			}
			None => false,
		}
	}

	/// Installs a freshly-read list, declining when the slot is gone,
	/// when a sentinel newer than `latest_ts` has been recorded since
	/// the read began, or when the slot already holds a fresher list.
	/// A slot never goes backwards. Returns whether the list was
	/// installed.
	pub fn install(&self, key: &[u8], latest_ts: CommitVersion, list: Arc<PostingList>) -> bool {
		let mut entries = self.entries.lock();
		match entries.get_mut(key) {
			None => false,
			Some(CacheEntry::Sentinel(seen)) if *seen > latest_ts => false,
			Some(CacheEntry::List(current)) if current.max_ts > latest_ts => false,
			Some(slot) => {
				*slot = CacheEntry::List(list);
				true
			}
		}
	}

	pub fn clear(&self) {
		self.entries.lock().clear();
	}
}
