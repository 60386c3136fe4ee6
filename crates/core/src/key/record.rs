//! Stores a record payload by record type and primary key

use super::Subspace;
use crate::err::Error;
use crate::kvs::Key;
use crate::tuple;
use crate::val::Value;
use std::ops::Range;

/// The storage key for one record: the type name, the primary key, and a
/// trailing empty tuple each form one self-delimited nesting level, so
/// prefix scans by type and by type-then-pk stay order-correct.
pub fn new(root: &Subspace, record_type: &str, pk: &[Value]) -> Result<Key, Error> {
	let mut k = super::category_prefix(root, super::RECORDS);
	k.extend(tuple::pack_nested(&[Value::from(record_type)])?);
	k.extend(tuple::pack_nested(pk)?);
	k.extend(tuple::pack_nested(&[])?);
	Ok(k)
}

/// The key prefix shared by every record of one type
pub fn prefix(root: &Subspace, record_type: &str) -> Result<Key, Error> {
	let mut k = super::category_prefix(root, super::RECORDS);
	k.extend(tuple::pack_nested(&[Value::from(record_type)])?);
	Ok(k)
}

/// The scan range covering every record of one type
pub fn range(root: &Subspace, record_type: &str) -> Result<Range<Key>, Error> {
	let prefix = prefix(root, record_type)?;
	let mut begin = prefix.clone();
	let mut end = prefix;
	begin.push(0x00);
	end.push(0xff);
	Ok(begin..end)
}

/// The scan range covering every record of every type
pub fn all_range(root: &Subspace) -> Range<Key> {
	super::category_range(root, super::RECORDS)
}

/// Splits a record key back into its record type name and primary key
pub fn parse(root: &Subspace, key: &[u8]) -> Result<(String, Vec<Value>), Error> {
	let bad = |reason: &str| Error::Decode {
		offset: 0,
		reason: reason.to_string(),
	};
	let rest = key
		.strip_prefix(super::category_prefix(root, super::RECORDS).as_slice())
		.ok_or_else(|| bad("key is not a record key of this store"))?;
	if rest.is_empty() {
		return Err(bad("record key has no type level"));
	}
	let mut pos = 0;
	let name = match tuple::decode_element(rest, &mut pos)? {
		Value::Array(a) => match a.0.as_slice() {
			[Value::Strand(s)] => s.clone(),
			_ => return Err(bad("record key has a malformed type level")),
		},
		_ => return Err(bad("record key has a malformed type level")),
	};
	if pos >= rest.len() {
		return Err(bad("record key has no primary key level"));
	}
	let pk = match tuple::decode_element(rest, &mut pos)? {
		Value::Array(a) => a.0,
		_ => return Err(bad("record key has a malformed primary key level")),
	};
	if pos >= rest.len() {
		return Err(bad("record key is missing its trailing empty tuple"));
	}
	match tuple::decode_element(rest, &mut pos)? {
		Value::Array(a) if a.0.is_empty() => {}
		_ => return Err(bad("record key is missing its trailing empty tuple")),
	}
	if pos != rest.len() {
		return Err(bad("record key has trailing bytes"));
	}
	Ok((name, pk))
}
