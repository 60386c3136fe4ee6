//! 12-byte versionstamps assigned by the key-value store at commit time.
//!
//! The first 10 bytes are the commit version (8-byte transaction version
//! plus 2-byte batch order); the final 2 bytes are caller-chosen. An
//! *incomplete* versionstamp carries `0xff` in all 10 version bytes and is
//! substituted by the store when the containing key is committed through a
//! versionstamped-key mutation.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A 12-byte, globally monotone commit marker
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Versionstamp([u8; 12]);

impl Versionstamp {
	/// A complete versionstamp from its raw bytes
	pub fn new(bytes: [u8; 12]) -> Self {
		Self(bytes)
	}

	/// An incomplete versionstamp with the given user order bytes
	pub fn incomplete(user: u16) -> Self {
		let mut bytes = [0xff; 12];
		bytes[10..].copy_from_slice(&user.to_be_bytes());
		Self(bytes)
	}

	/// A complete versionstamp from an 8-byte transaction version and a
	/// 2-byte in-transaction batch order
	pub fn from_parts(version: u64, batch: u16, user: u16) -> Self {
		let mut bytes = [0u8; 12];
		bytes[0..8].copy_from_slice(&version.to_be_bytes());
		bytes[8..10].copy_from_slice(&batch.to_be_bytes());
		bytes[10..12].copy_from_slice(&user.to_be_bytes());
		Self(bytes)
	}

	/// Whether the version portion is still the `0xff` placeholder
	pub fn is_incomplete(&self) -> bool {
		self.0[..10].iter().all(|b| *b == 0xff)
	}

	/// The transaction version portion
	pub fn version(&self) -> u64 {
		u64::from_be_bytes(self.0[0..8].try_into().unwrap())
	}

	pub fn as_bytes(&self) -> &[u8; 12] {
		&self.0
	}

	pub fn into_bytes(self) -> [u8; 12] {
		self.0
	}
}

impl PartialOrd for Versionstamp {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Versionstamp {
	fn cmp(&self, other: &Self) -> Ordering {
		self.0.cmp(&other.0)
	}
}

impl From<[u8; 12]> for Versionstamp {
	fn from(bytes: [u8; 12]) -> Self {
		Self(bytes)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn incomplete_placeholder() {
		let vs = Versionstamp::incomplete(7);
		assert!(vs.is_incomplete());
		assert_eq!(&vs.as_bytes()[..10], &[0xff; 10]);
		assert_eq!(&vs.as_bytes()[10..], &[0x00, 0x07]);
	}

	#[test]
	fn commit_order_is_byte_order() {
		let a = Versionstamp::from_parts(1, 0, 0);
		let b = Versionstamp::from_parts(1, 1, 0);
		let c = Versionstamp::from_parts(2, 0, 0);
		assert!(a < b && b < c);
		assert!(c < Versionstamp::incomplete(0));
	}
}
