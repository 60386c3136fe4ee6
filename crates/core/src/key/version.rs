//! Stores the persisted schema version of the store

use super::Subspace;
use crate::err::Error;
use crate::kvs::Key;
use crate::tuple;
use crate::val::Value;
use semver::Version;

pub fn new(root: &Subspace) -> Result<Key, Error> {
	let mut k = super::category_prefix(root, super::METADATA);
	k.extend(tuple::pack(&[Value::from("version")])?);
	Ok(k)
}

/// The stored value is the `(major, minor, patch)` tuple
pub fn encode(version: &Version) -> Result<Vec<u8>, Error> {
	tuple::pack(&[
		Value::from(version.major as i64),
		Value::from(version.minor as i64),
		Value::from(version.patch as i64),
	])
}

pub fn decode(bytes: &[u8]) -> Result<Version, Error> {
	let vals = tuple::unpack(bytes)?;
	match vals.as_slice() {
		[Value::Int(major), Value::Int(minor), Value::Int(patch)]
			if *major >= 0 && *minor >= 0 && *patch >= 0 =>
		{
			Ok(Version::new(*major as u64, *minor as u64, *patch as u64))
		}
		_ => Err(Error::Decode {
			offset: 0,
			reason: "malformed schema version value".to_string(),
		}),
	}
}
