// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

use std::fmt::Display;

use crate::util::hex;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// The requested read timestamp predates the earliest retained
	/// version. Declared here; raised by higher layers.
	#[error("transaction is too old")]
	TsTooOld,

	/// A secondary part of a multi-part list was used where a main key
	/// is required.
	#[error("cannot read posting list using multi-part list key")]
	InvalidKey,

	/// The underlying store has been shut down.
	#[error("store has been closed")]
	StoreClosed,

	/// A stored payload failed to parse.
	#[error("decode failed: {0}")]
	Decode(String),

	/// A schema value was found while reading a posting chain.
	#[error("cannot read schema value as posting data for key {key}")]
	SchemaRead { key: String },

	/// A value carried a meta byte that does not decode to a known tag.
	#[error("unexpected value meta {meta:#04x} for key {key}")]
	UnexpectedMeta { key: String, meta: u8 },

	/// The store rejected a skiplist handover. Transient; retried by the
	/// rollup engine.
	#[error("skiplist handover failed: {0}")]
	HandoverFailed(String),

	/// An entry exceeds the store's per-entry size limits.
	#[error("entry too large: key {key_len} bytes, value {value_len} bytes")]
	EntryTooLarge { key_len: usize, value_len: usize },
}

impl Error {
	pub fn decode(key: &[u8], reason: impl Display) -> Self {
		Error::Decode(format!("key {}: {}", hex::encode(key), reason))
	}

	pub fn schema_read(key: &[u8]) -> Self {
		Error::SchemaRead {
			key: hex::encode(key),
		}
	}

	pub fn unexpected_meta(key: &[u8], meta: u8) -> Self {
		Error::UnexpectedMeta {
			key: hex::encode(key),
			meta,
		}
	}
}
