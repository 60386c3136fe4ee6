//! Stores histogram buckets and summaries for one index

use super::Subspace;
use crate::err::Error;
use crate::kvs::Key;
use crate::tuple;
use crate::val::Value;
use std::ops::Range;

/// The summary key for an index's histogram
pub fn summary(root: &Subspace, index: &str) -> Result<Key, Error> {
	let mut k = super::category_prefix(root, super::STATS);
	k.extend(tuple::pack(&[Value::from(index)])?);
	Ok(k)
}

/// The key of one histogram bucket
pub fn bucket(root: &Subspace, index: &str, id: i64) -> Result<Key, Error> {
	let mut k = super::category_prefix(root, super::STATS);
	k.extend(tuple::pack(&[Value::from(index), Value::from(id)])?);
	Ok(k)
}

/// The scan range over every stats key of one index, summary included
pub fn range(root: &Subspace, index: &str) -> Result<Range<Key>, Error> {
	let begin = summary(root, index)?;
	let mut end = begin.clone();
	end.push(0xff);
	Ok(begin..end)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys() {
		let root = Subspace::new(b"t".to_vec());
		assert_eq!(summary(&root, "byAge").unwrap(), b"ts\x02byAge\x00".to_vec());
		assert_eq!(bucket(&root, "byAge", 2).unwrap(), b"ts\x02byAge\x00\x15\x02".to_vec());
	}
}
