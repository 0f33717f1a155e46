// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The in-memory posting list: an immutable base snapshot plus a map from
//! commit timestamp to delta, folded on demand.

use std::{collections::BTreeMap, sync::Arc};

use reifydb_graph_core::{
	codec::{self, UidSet},
	key::{parse, part_key},
	CommitVersion, Error, MetaTag, Result, ValueMeta,
};

use crate::proto::{Posting, PostingData, PostingOp};

/// A `Del` posting carrying this UID clears everything accumulated below
/// its commit timestamp.
pub const DELETE_ALL_UID: u64 = u64::MAX;

/// A key's posting state between `min_ts` and `max_ts`: the base snapshot
/// at `min_ts` and the deltas read above it. The base is immutable and may
/// be shared; lists handed to callers never share mutable state.
#[derive(Debug, Clone)]
pub struct PostingList {
	pub(crate) key: Vec<u8>,
	pub(crate) min_ts: CommitVersion,
	pub(crate) max_ts: CommitVersion,
	pub(crate) base: Arc<PostingData>,
	pub(crate) mutations: BTreeMap<CommitVersion, PostingData>,
}

/// The result of folding a list at a read timestamp.
#[derive(Debug)]
pub struct FoldedList {
	pub new_min_ts: CommitVersion,
	pub data: PostingData,
}

/// One key/value entry emitted by a rollup.
#[derive(Debug, Clone)]
pub struct StoreEntry {
	pub key: Vec<u8>,
	pub version: CommitVersion,
	pub value: Vec<u8>,
	pub meta: ValueMeta,
}

impl PostingList {
	pub fn new(key: Vec<u8>) -> Self {
		Self {
			key,
			min_ts: CommitVersion::default(),
			max_ts: CommitVersion::default(),
			base: Arc::new(PostingData::default()),
			mutations: BTreeMap::new(),
		}
	}

	pub fn key(&self) -> &[u8] {
		&self.key
	}

	pub fn min_ts(&self) -> CommitVersion {
		self.min_ts
	}

	pub fn max_ts(&self) -> CommitVersion {
		self.max_ts
	}

	pub fn delta_count(&self) -> usize {
		self.mutations.len()
	}

	/// The UID set visible at `read_ts`.
	pub fn uids(&self, read_ts: CommitVersion) -> UidSet {
		codec::from_list(&self.rollup(read_ts).data.uids)
	}

	/// Folds the base and every delta with `commit_ts <= read_ts`, in
	/// ascending commit order; later commits override earlier ones.
	pub fn rollup(&self, read_ts: CommitVersion) -> FoldedList {
		let mut set = codec::from_list(&self.base.uids);
		let mut postings: BTreeMap<u64, Posting> =
			self.base.postings.iter().map(|p| (p.uid, p.clone())).collect();
		let mut new_min_ts = self.min_ts;

		for (commit_ts, delta) in self.mutations.range(..=read_ts) {
			new_min_ts = new_min_ts.max(*commit_ts);
			for posting in &delta.postings {
				match posting.op {
					PostingOp::Del if posting.uid == DELETE_ALL_UID => {
						set.clear();
						postings.clear();
					}
					PostingOp::Del => {
						set.remove(posting.uid);
						postings.remove(&posting.uid);
					}
					PostingOp::Set => {
						set.insert(posting.uid);
						if posting.value.is_empty() {
							postings.remove(&posting.uid);
						} else {
							postings.insert(posting.uid, posting.clone());
						}
					}
				}
			}
		}

		FoldedList {
			new_min_ts,
			data: PostingData {
				uids: codec::to_list(&set),
				postings: postings.into_values().collect(),
				commit_ts: new_min_ts,
				// folding does not touch the part layout
				splits: self.base.splits.clone(),
			},
		}
	}

	/// Folds everything and emits the entries a rollup writes back: one
	/// `Complete` (or `Empty`) entry at the folded minimum timestamp,
	/// split into parts when the encoded payload exceeds
	/// `max_value_size`.
	pub fn to_entries(&self, max_value_size: usize) -> Result<Vec<StoreEntry>> {
		let folded = self.rollup(CommitVersion::MAX);
		let version = folded.new_min_ts;

		if folded.data.is_empty() && folded.data.splits.is_empty() {
			return Ok(vec![StoreEntry {
				key: self.key.clone(),
				version,
				value: Vec::new(),
				meta: ValueMeta::new(MetaTag::Empty),
			}]);
		}

		let encoded = folded.data.encode();
		// An already-split list keeps its directory; re-partitioning
		// would require reading every part.
		if encoded.len() <= max_value_size || !folded.data.splits.is_empty() {
			return Ok(vec![StoreEntry {
				key: self.key.clone(),
				version,
				value: encoded,
				meta: ValueMeta::new(MetaTag::Complete),
			}]);
		}

		self.split_entries(folded, max_value_size)
	}

	fn split_entries(&self, folded: FoldedList, max_value_size: usize) -> Result<Vec<StoreEntry>> {
		let parsed = parse(&self.key)?;
		if parsed.has_start_uid() {
			return Err(Error::InvalidKey);
		}
		let version = folded.new_min_ts;

		let uids = codec::get_uids(&folded.data.uids);
		// Conservative estimate of encoded bytes per UID; postings ride
		// along with the part that owns their UID.
		let per_part = (max_value_size / 16).max(1);

		let mut entries = Vec::with_capacity(uids.len() / per_part + 2);
		let mut splits = Vec::new();
		for chunk in uids.chunks(per_part) {
			let start = chunk[0];
			let end = *chunk.last().expect("chunks are non-empty");
			splits.push(start);

			let part = PostingData {
				uids: codec::to_list(&chunk.iter().copied().collect()),
				postings: folded
					.data
					.postings
					.iter()
					.filter(|p| p.uid >= start && p.uid <= end)
					.cloned()
					.collect(),
				commit_ts: version,
				splits: Vec::new(),
			};
			entries.push(StoreEntry {
				key: part_key(&parsed.attr, parsed.uid, start),
				version,
				value: part.encode(),
				meta: ValueMeta::new(MetaTag::Complete),
			});
		}

		let main = PostingData {
			uids: codec::UidList::default(),
			postings: Vec::new(),
			commit_ts: version,
			splits,
		};
		entries.insert(
			0,
			StoreEntry {
				key: self.key.clone(),
				version,
				value: main.encode(),
				meta: ValueMeta::new(MetaTag::Complete),
			},
		);
		Ok(entries)
	}
}

#[cfg(test)]
mod tests {
	use reifydb_graph_core::data_key;

	use super::*;

	fn delta_at(commit_ts: u64, postings: Vec<Posting>) -> (CommitVersion, PostingData) {
		let commit_ts = CommitVersion(commit_ts);
		(
			commit_ts,
			PostingData {
				uids: codec::UidList::default(),
				postings,
				commit_ts,
				splits: Vec::new(),
			},
		)
	}

	fn list_with(base_uids: &[u64], min_ts: u64, deltas: Vec<(CommitVersion, PostingData)>) -> PostingList {
		let mut list = PostingList::new(data_key("follows", 1));
		list.min_ts = CommitVersion(min_ts);
		list.base = Arc::new(PostingData {
			uids: codec::to_list(&base_uids.iter().copied().collect()),
			postings: Vec::new(),
			commit_ts: CommitVersion(min_ts),
			splits: Vec::new(),
		});
		for (commit_ts, delta) in deltas {
			list.max_ts = list.max_ts.max(commit_ts);
			list.mutations.insert(commit_ts, delta);
		}
		list
	}

	#[test]
	fn test_fold_applies_deltas_in_order() {
		let list = list_with(
			&[10, 20],
			5,
			vec![
				delta_at(7, vec![Posting::set(30)]),
				delta_at(9, vec![Posting::del(10)]),
			],
		);

		let folded = list.rollup(CommitVersion::MAX);
		assert_eq!(folded.new_min_ts, CommitVersion(9));
		assert_eq!(codec::get_uids(&folded.data.uids), vec![20, 30]);
	}

	#[test]
	fn test_fold_respects_read_ts() {
		let list = list_with(
			&[10, 20],
			5,
			vec![
				delta_at(7, vec![Posting::set(30)]),
				delta_at(9, vec![Posting::del(10)]),
			],
		);

		let folded = list.rollup(CommitVersion(7));
		assert_eq!(folded.new_min_ts, CommitVersion(7));
		assert_eq!(codec::get_uids(&folded.data.uids), vec![10, 20, 30]);

		let untouched = list.rollup(CommitVersion(6));
		assert_eq!(untouched.new_min_ts, CommitVersion(5));
		assert_eq!(codec::get_uids(&untouched.data.uids), vec![10, 20]);
	}

	#[test]
	fn test_later_commit_overrides_earlier() {
		let list = list_with(
			&[],
			0,
			vec![
				delta_at(3, vec![Posting::set_with_value(7, b"old".to_vec())]),
				delta_at(5, vec![Posting::set_with_value(7, b"new".to_vec())]),
			],
		);

		let folded = list.rollup(CommitVersion::MAX);
		assert_eq!(folded.data.postings.len(), 1);
		assert_eq!(folded.data.postings[0].value, b"new");
	}

	#[test]
	fn test_delete_all_clears_accumulated_state() {
		let list = list_with(
			&[1, 2, 3],
			1,
			vec![
				delta_at(4, vec![Posting::del(DELETE_ALL_UID)]),
				delta_at(6, vec![Posting::set(9)]),
			],
		);

		let folded = list.rollup(CommitVersion::MAX);
		assert_eq!(codec::get_uids(&folded.data.uids), vec![9]);
	}

	#[test]
	fn test_to_entries_empty_list() {
		let list = list_with(&[5], 2, vec![delta_at(8, vec![Posting::del(5)])]);

		let entries = list.to_entries(1 << 20).unwrap();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].meta.tag, MetaTag::Empty);
		assert_eq!(entries[0].version, CommitVersion(8));
		assert!(entries[0].value.is_empty());
	}

	#[test]
	fn test_to_entries_single_complete() {
		let list = list_with(&[10, 20], 5, vec![delta_at(7, vec![Posting::set(30)])]);

		let entries = list.to_entries(1 << 20).unwrap();
		assert_eq!(entries.len(), 1);
		assert_eq!(entries[0].meta.tag, MetaTag::Complete);
		assert_eq!(entries[0].version, CommitVersion(7));

		let data = PostingData::decode(list.key(), &entries[0].value).unwrap();
		assert_eq!(codec::get_uids(&data.uids), vec![10, 20, 30]);
		assert!(data.splits.is_empty());
	}

	#[test]
	fn test_to_entries_rolled_up_is_idempotent() {
		let list = list_with(&[10, 20], 5, vec![delta_at(7, vec![Posting::set(30)])]);
		let first = list.to_entries(1 << 20).unwrap();

		// rebuild the list the way a reader would after the rollup
		let mut rolled = PostingList::new(list.key().to_vec());
		rolled.min_ts = first[0].version;
		rolled.max_ts = first[0].version;
		rolled.base = Arc::new(PostingData::decode(list.key(), &first[0].value).unwrap());

		let second = rolled.to_entries(1 << 20).unwrap();
		assert_eq!(second.len(), 1);
		assert_eq!(second[0].meta.tag, MetaTag::Complete);
		let data = PostingData::decode(list.key(), &second[0].value).unwrap();
		assert_eq!(codec::get_uids(&data.uids), vec![10, 20, 30]);
	}

	#[test]
	fn test_to_entries_splits_oversized_lists() {
		let uids: Vec<u64> = (1..=64).collect();
		let list = list_with(&uids, 3, vec![]);

		let entries = list.to_entries(64).unwrap();
		assert!(entries.len() > 2);

		// main entry carries the split directory, no uids
		let main = PostingData::decode(list.key(), &entries[0].value).unwrap();
		assert!(!main.splits.is_empty());
		assert_eq!(codec::cardinality(&main.uids), 0);
		assert_eq!(entries[0].key, list.key());

		// parts carry disjoint uid runs addressed by start uid
		let mut collected = Vec::new();
		for (entry, start) in entries[1..].iter().zip(&main.splits) {
			let parsed = parse(&entry.key).unwrap();
			assert_eq!(parsed.start_uid, Some(*start));
			let part = PostingData::decode(&entry.key, &entry.value).unwrap();
			collected.extend(codec::get_uids(&part.uids));
		}
		assert_eq!(collected, uids);
	}
}
