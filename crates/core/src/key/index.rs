//! Stores an index entry: the index name, then flat-packed elements.
//!
//! Entries MUST be flat-packed. A nested frame here would shift every
//! element behind a `0x05` marker and value-prefix range scans would come
//! back empty.

use super::Subspace;
use crate::err::Error;
use crate::kvs::Key;
use crate::tuple;
use crate::val::Value;
use std::ops::Range;

/// The key prefix owned by one index
pub fn prefix(root: &Subspace, index: &str) -> Result<Key, Error> {
	let mut k = super::category_prefix(root, super::INDEXES);
	k.extend(tuple::pack(&[Value::from(index)])?);
	Ok(k)
}

/// An index entry key: the indexed elements flat-packed behind the prefix
pub fn new(root: &Subspace, index: &str, elements: &[Value]) -> Result<Key, Error> {
	let mut k = prefix(root, index)?;
	k.extend(tuple::pack(elements)?);
	Ok(k)
}

/// An index entry key containing one incomplete versionstamp; returns the
/// placeholder offset within the full key
pub fn new_versionstamped(
	root: &Subspace,
	index: &str,
	elements: &[Value],
) -> Result<(Key, u32), Error> {
	let mut k = prefix(root, index)?;
	let base = k.len() as u32;
	let (packed, offset) = tuple::pack_with_versionstamp(elements)?;
	let offset = offset.ok_or_else(|| {
		Error::Encode("versionstamped index entry requires an incomplete versionstamp".to_string())
	})?;
	k.extend(packed);
	Ok((k, base + offset))
}

/// The scan range covering every entry of one index
pub fn range(root: &Subspace, index: &str) -> Result<Range<Key>, Error> {
	let prefix = prefix(root, index)?;
	let mut begin = prefix.clone();
	let mut end = prefix;
	begin.push(0x00);
	end.push(0xff);
	Ok(begin..end)
}

/// The scan range covering entries whose leading elements equal `elements`
pub fn prefix_range(root: &Subspace, index: &str, elements: &[Value]) -> Result<Range<Key>, Error> {
	let begin = new(root, index, elements)?;
	let mut end = begin.clone();
	end.push(0xff);
	Ok(begin..end)
}

/// Decodes the elements of an entry key belonging to the given index
pub fn parse(root: &Subspace, index: &str, key: &[u8]) -> Result<Vec<Value>, Error> {
	let p = prefix(root, index)?;
	match key.strip_prefix(p.as_slice()) {
		Some(rest) => tuple::unpack(rest),
		None => Err(Error::Decode {
			offset: 0,
			reason: format!("key does not belong to index '{index}'"),
		}),
	}
}
