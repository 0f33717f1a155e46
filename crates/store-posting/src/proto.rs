// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use reifydb_graph_core::{codec::UidList, util::encoding, CommitVersion, Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostingOp {
	Set,
	Del,
}

/// One per-UID entry of a posting payload. `commit_ts` is stamped in
/// memory when the payload is read from a versioned chain; the persisted
/// value is meaningless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
	pub uid: u64,
	pub op: PostingOp,
	pub value: Vec<u8>,
	pub commit_ts: CommitVersion,
}

impl Posting {
	pub fn set(uid: u64) -> Self {
		Self {
			uid,
			op: PostingOp::Set,
			value: Vec::new(),
			commit_ts: CommitVersion::default(),
		}
	}

	pub fn set_with_value(uid: u64, value: Vec<u8>) -> Self {
		Self {
			uid,
			op: PostingOp::Set,
			value,
			commit_ts: CommitVersion::default(),
		}
	}

	pub fn del(uid: u64) -> Self {
		Self {
			uid,
			op: PostingOp::Del,
			value: Vec::new(),
			commit_ts: CommitVersion::default(),
		}
	}
}

/// The wire form of a posting-list value: a snapshot (UID membership plus
/// retained postings) or a delta (postings only). `splits` holds the
/// start-UIDs of the secondary parts of a multi-part list and is empty for
/// single-part lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostingData {
	pub uids: UidList,
	pub postings: Vec<Posting>,
	pub commit_ts: CommitVersion,
	pub splits: Vec<u64>,
}

impl PostingData {
	pub fn encode(&self) -> Vec<u8> {
		encoding::serialize(self)
	}

	/// Decodes a stored payload. An empty payload decodes to the empty
	/// posting data, which is how `Empty` snapshots are stored.
	pub fn decode(key: &[u8], bytes: &[u8]) -> Result<Self> {
		if bytes.is_empty() {
			return Ok(Self::default());
		}
		encoding::deserialize(bytes).map_err(|err| Error::decode(key, err))
	}

	pub fn is_empty(&self) -> bool {
		self.uids.is_empty() && self.postings.is_empty()
	}
}
