//! Stores the persisted state byte of an index

use super::Subspace;
use crate::err::Error;
use crate::kvs::Key;
use crate::tuple;
use crate::val::Value;

pub fn new(root: &Subspace, index: &str) -> Result<Key, Error> {
	let mut k = super::category_prefix(root, super::METADATA);
	k.extend(tuple::pack(&[Value::from("state"), Value::from(index)])?);
	Ok(k)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn key() {
		let root = Subspace::new(b"t".to_vec());
		let k = new(&root, "byEmail").unwrap();
		assert_eq!(k, b"tm\x02state\x00\x02byEmail\x00".to_vec());
	}
}
