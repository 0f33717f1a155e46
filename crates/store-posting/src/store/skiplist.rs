// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::ops::Deref;

use crossbeam_skiplist::SkipMap;
use reifydb_graph_core::{CommitVersion, ValueMeta, VersionedKey};

/// A stored value: the payload bytes plus the raw meta byte. The byte is
/// decoded at read time so unknown tags surface as errors instead of
/// panics.
#[derive(Debug, Clone, PartialEq)]
pub struct SkipValue {
	pub value: Vec<u8>,
	meta: u8,
}

impl SkipValue {
	pub fn new(value: Vec<u8>, meta: ValueMeta) -> Self {
		Self {
			value,
			meta: meta.encode(),
		}
	}

	/// Builds a value carrying a raw meta byte, bypassing the tag check.
	/// Unknown bytes surface as unexpected-meta errors at read time.
	pub(crate) fn from_raw_parts(value: Vec<u8>, meta: u8) -> Self {
		Self {
			value,
			meta,
		}
	}

	pub fn meta(&self) -> Option<ValueMeta> {
		ValueMeta::decode(self.meta)
	}

	pub fn meta_byte(&self) -> u8 {
		self.meta
	}
}

/// The unit of bulk ingest: versioned keys mapping to values, ordered by
/// key ascending and version descending. Built by committing transactions
/// and by the rollup engine, then handed to the store.
#[derive(Debug, Default)]
pub struct Skiplist {
	entries: SkipMap<VersionedKey, SkipValue>,
}

impl Skiplist {
	pub fn new() -> Self {
		Self {
			entries: SkipMap::new(),
		}
	}

	pub fn put(&self, key: VersionedKey, value: SkipValue) {
		self.entries.insert(key, value);
	}

	/// A copy of this skiplist with every entry rewritten to `version`.
	/// Commit paths build entries at [`CommitVersion::MAX`] and rekey
	/// them once the commit timestamp is known.
	pub fn with_version(&self, version: CommitVersion) -> Skiplist {
		let out = Skiplist::new();
		for entry in self.entries.iter() {
			out.put(VersionedKey::new(entry.key().key.clone(), version), entry.value().clone());
		}
		out
	}
}

impl Deref for Skiplist {
	type Target = SkipMap<VersionedKey, SkipValue>;

	fn deref(&self) -> &Self::Target {
		&self.entries
	}
}
