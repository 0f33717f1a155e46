// Copyright (c) reifydb.com 2025
// This file is licensed under the AGPL-3.0-or-later, see license.md file

//! The UID-set codec.
//!
//! Posting payloads carry their UID membership either as a compressed
//! bitmap or as a sorted array; [`UidList`] is that wire-level sum type and
//! [`UidSet`] the decoded set the engine computes with. The bitmap form is
//! the canonical encoding. Backup streams use a varint-delta encoding
//! terminated by a zero UID.

use std::{borrow::Cow, ops::{Deref, DerefMut}};

use roaring::RoaringTreemap;
use serde::{
	de::{self, Visitor},
	Deserialize, Deserializer, Serialize, Serializer,
};

/// A set of 64-bit UIDs backed by a compressed bitmap.
#[derive(Debug, Clone, PartialEq)]
pub struct UidSet(RoaringTreemap);

impl UidSet {
	pub fn new() -> Self {
		Self(RoaringTreemap::new())
	}

	pub fn from_sorted(uids: &[u64]) -> Self {
		debug_assert!(uids.windows(2).all(|w| w[0] < w[1]));
		Self(uids.iter().copied().collect())
	}

	pub fn cardinality(&self) -> u64 {
		self.0.len()
	}

	pub fn to_vec(&self) -> Vec<u64> {
		self.0.iter().collect()
	}
}

impl Default for UidSet {
	fn default() -> Self {
		Self::new()
	}
}

impl Deref for UidSet {
	type Target = RoaringTreemap;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl DerefMut for UidSet {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.0
	}
}

impl FromIterator<u64> for UidSet {
	fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}

// The serde form is the bitmap's serialized bytes, which keeps the
// compressed bitmap as the on-wire encoding inside bincode payloads.
impl Serialize for UidSet {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let mut bytes = Vec::new();
		self.0.serialize_into(&mut bytes).map_err(serde::ser::Error::custom)?;
		serializer.serialize_bytes(&bytes)
	}
}

impl<'de> Deserialize<'de> for UidSet {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		struct BitmapVisitor;

		impl<'de> Visitor<'de> for BitmapVisitor {
			type Value = UidSet;

			fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
				f.write_str("serialized bitmap bytes")
			}

			fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<UidSet, E> {
				RoaringTreemap::deserialize_from(v).map(UidSet).map_err(de::Error::custom)
			}

			fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<UidSet, E> {
				self.visit_bytes(&v)
			}

			fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<UidSet, A::Error> {
				let mut bytes = Vec::new();
				while let Some(byte) = seq.next_element::<u8>()? {
					bytes.push(byte);
				}
				self.visit_bytes(&bytes)
			}
		}

		deserializer.deserialize_bytes(BitmapVisitor)
	}
}

/// The wire form of a UID set: exactly one of the two encodings, by
/// construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UidList {
	Bitmap(UidSet),
	Sorted(Vec<u64>),
}

impl Default for UidList {
	fn default() -> Self {
		UidList::Bitmap(UidSet::new())
	}
}

impl UidList {
	pub fn is_empty(&self) -> bool {
		match self {
			UidList::Bitmap(set) => set.is_empty(),
			UidList::Sorted(uids) => uids.is_empty(),
		}
	}
}

/// Encodes a set as a bitmap list, copying.
pub fn to_list(set: &UidSet) -> UidList {
	UidList::Bitmap(set.clone())
}

/// Encodes a set as a sorted-array list.
pub fn to_sorted_list(set: &UidSet) -> UidList {
	UidList::Sorted(set.to_vec())
}

/// Decodes a list into an owned set.
pub fn from_list(list: &UidList) -> UidSet {
	match list {
		UidList::Bitmap(set) => set.clone(),
		UidList::Sorted(uids) => UidSet::from_sorted(uids),
	}
}

/// Decodes a list without copying when it already holds a bitmap. The
/// borrow ties the returned set to the input list; materializes only for
/// the sorted form.
pub fn from_list_ref(list: &UidList) -> Cow<'_, UidSet> {
	match list {
		UidList::Bitmap(set) => Cow::Borrowed(set),
		UidList::Sorted(uids) => Cow::Owned(UidSet::from_sorted(uids)),
	}
}

/// Number of UIDs in the list, without decoding the sorted form.
pub fn cardinality(list: &UidList) -> u64 {
	match list {
		UidList::Bitmap(set) => set.cardinality(),
		UidList::Sorted(uids) => uids.len() as u64,
	}
}

/// A list holding a single UID, in the canonical bitmap encoding.
pub fn one_uid(uid: u64) -> UidList {
	let mut set = UidSet::new();
	set.insert(uid);
	to_list(&set)
}

/// The UIDs of a list in ascending order.
pub fn get_uids(list: &UidList) -> Vec<u64> {
	match list {
		UidList::Bitmap(set) => set.to_vec(),
		UidList::Sorted(uids) => uids.clone(),
	}
}

/// Replaces the UIDs of a list, preserving its current encoding.
pub fn set_uids(list: &mut UidList, uids: Vec<u64>) {
	match list {
		UidList::Bitmap(set) => *set = uids.iter().copied().collect(),
		UidList::Sorted(sorted) => *sorted = uids,
	}
}

/// Converts a list to the sorted-array encoding in place.
pub fn bitmap_to_sorted(list: &mut UidList) {
	if let UidList::Bitmap(set) = list {
		*list = UidList::Sorted(set.to_vec());
	}
}

/// Unions a matrix of lists into one set.
pub fn matrix_to_bitmap(matrix: &[UidList]) -> UidSet {
	let mut out = UidSet::new();
	for list in matrix {
		out.0 |= &from_list(list).0;
	}
	out
}

/// Intersects a matrix of lists.
pub fn intersect(matrix: &[UidList]) -> UidSet {
	let mut out = UidSet::new();
	let Some((first, rest)) = matrix.split_first() else {
		return out;
	};
	out.0 |= &from_list(first).0;
	for list in rest {
		out.0 &= &from_list(list).0;
	}
	out
}

/// Fast union of a matrix of lists, decoding each at most once and
/// borrowing bitmap-encoded inputs.
pub fn merge(matrix: &[UidList]) -> UidSet {
	let mut out = UidSet::new();
	for list in matrix {
		let decoded = from_list_ref(list);
		out.0 |= &decoded.0;
	}
	out
}

/// Decodes a varint-delta sorted-UID stream terminating at a zero UID.
/// Truncated trailing bytes end the stream.
pub fn from_backup(mut buf: &[u8]) -> UidSet {
	let mut prev = 0u64;
	let mut set = UidSet::new();
	while let Some((delta, read)) = uvarint(buf) {
		if delta == 0 {
			break;
		}
		buf = &buf[read..];
		prev += delta;
		set.insert(prev);
	}
	set
}

/// Emits the varint-delta form of a set into a caller-owned buffer. The
/// inverse of [`from_backup`] up to the terminating sentinel.
pub fn encode_to_buffer(buf: &mut Vec<u8>, set: &UidSet) {
	let mut last = 0u64;
	for uid in set.iter() {
		put_uvarint(buf, uid - last);
		last = uid;
	}
}

/// Removes the closed interval `[from, to]` from the set.
pub fn remove_range(set: &mut UidSet, from: u64, to: u64) {
	set.remove_range(from..=to);
}

/// The UIDs of a list at or above `start`, ascending. Used when
/// assembling multi-part lists from a secondary part onward.
pub fn to_uids(list: &UidList, start: u64) -> Vec<u64> {
	let mut set = from_list(list);
	if start > 0 {
		set.remove_range(0..start);
	}
	set.to_vec()
}

fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
	while value >= 0x80 {
		buf.push(value as u8 | 0x80);
		value >>= 7;
	}
	buf.push(value as u8);
}

/// Decodes one unsigned varint; `None` when the buffer is truncated.
fn uvarint(buf: &[u8]) -> Option<(u64, usize)> {
	let mut value = 0u64;
	let mut shift = 0u32;
	for (read, byte) in buf.iter().enumerate() {
		if shift >= 64 {
			return None;
		}
		value |= u64::from(byte & 0x7f) << shift;
		if byte & 0x80 == 0 {
			return Some((value, read + 1));
		}
		shift += 7;
	}
	None
}
