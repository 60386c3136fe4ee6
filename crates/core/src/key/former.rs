//! Stores the tombstone of a removed index

use super::Subspace;
use crate::err::Error;
use crate::kvs::Key;
use crate::tuple;
use crate::val::Value;

pub fn new(root: &Subspace, index: &str) -> Result<Key, Error> {
	let mut k = super::category_prefix(root, super::METADATA);
	k.extend(tuple::pack(&[Value::from("former"), Value::from(index)])?);
	Ok(k)
}

/// The scan range covering every former-index tombstone
pub fn range(root: &Subspace) -> Result<std::ops::Range<Key>, Error> {
	let mut prefix = super::category_prefix(root, super::METADATA);
	prefix.extend(tuple::pack(&[Value::from("former")])?);
	let mut begin = prefix.clone();
	let mut end = prefix;
	begin.push(0x00);
	end.push(0xff);
	Ok(begin..end)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn key() {
		let root = Subspace::new(b"t".to_vec());
		assert_eq!(new(&root, "old").unwrap(), b"tm\x02former\x00\x02old\x00".to_vec());
	}
}
