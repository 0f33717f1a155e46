// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! Bincode is used to encode values stored in the key/value store. It is a
//! Rust-specific encoding that depends on the internal data structures
//! being stable, which is sufficient here. This module wraps the
//! [`bincode`] crate and uses the standard config.

use serde::{Deserialize, Serialize};

const CONFIG: bincode::config::Configuration = bincode::config::standard();

/// Serializes a value using Bincode.
pub fn serialize<T: Serialize>(value: &T) -> Vec<u8> {
	// Panic on failure, as this is a problem with the data structure.
	bincode::serde::encode_to_vec(value, CONFIG).expect("value must be serializable")
}

/// Deserializes a value using Bincode.
pub fn deserialize<'de, T: Deserialize<'de>>(
	bytes: &'de [u8],
) -> Result<T, bincode::error::DecodeError> {
	Ok(bincode::serde::borrow_decode_from_slice(bytes, CONFIG)?.0)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_roundtrip() {
		let value = (1u64, vec![2u8, 3, 4], "five".to_string());
		let bytes = serialize(&value);
		let decoded: (u64, Vec<u8>, String) = deserialize(&bytes).unwrap();
		assert_eq!(decoded, value);
	}

	#[test]
	fn test_garbage_fails() {
		let result: Result<(u64, String), _> = deserialize(&[0xff; 3]);
		assert!(result.is_err());
	}
}
