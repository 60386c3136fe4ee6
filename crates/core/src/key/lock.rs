//! Stores the migration lease

use super::Subspace;
use crate::err::Error;
use crate::kvs::Key;
use crate::tuple;
use crate::val::Value;
use serde::{Deserialize, Serialize};

pub fn new(root: &Subspace) -> Result<Key, Error> {
	let mut k = super::category_prefix(root, super::METADATA);
	k.extend(tuple::pack(&[Value::from("lock")])?);
	Ok(k)
}

/// The lease value: the holder and its expiry, in unix milliseconds
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lease {
	pub owner: String,
	pub expires_at: u64,
}

impl Lease {
	pub fn encode(&self) -> Result<Vec<u8>, Error> {
		Ok(bincode::serialize(self)?)
	}

	pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
		Ok(bincode::deserialize(bytes)?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn key() {
		let root = Subspace::new(b"t".to_vec());
		assert_eq!(new(&root).unwrap(), b"tm\x02lock\x00".to_vec());
	}
}
