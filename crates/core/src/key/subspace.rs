use crate::err::Error;
use crate::kvs::Key;
use crate::tuple;
use crate::val::Value;
use std::ops::Range;

/// A byte prefix owning a region of the keyspace.
///
/// `flat_pack` appends side-by-side element encodings and is the right
/// shape for index and metadata keys. `nest` derives a child namespace by
/// appending a self-delimited tuple frame and is the right shape for
/// hierarchical grouping. The two produce incompatible key shapes; see the
/// module documentation of [`crate::key`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subspace {
	prefix: Key,
}

impl Subspace {
	/// A subspace over a raw byte prefix
	pub fn new(prefix: impl Into<Key>) -> Self {
		Self {
			prefix: prefix.into(),
		}
	}

	/// A root subspace derived from a tuple, e.g. one path element per
	/// application or tenant
	pub fn from_tuple(values: &[Value]) -> Result<Self, Error> {
		Ok(Self {
			prefix: tuple::pack(values)?,
		})
	}

	/// The raw prefix bytes
	pub fn key(&self) -> &[u8] {
		&self.prefix
	}

	/// A key under this subspace from side-by-side element encodings
	pub fn flat_pack(&self, values: &[Value]) -> Result<Key, Error> {
		let mut k = self.prefix.clone();
		k.extend(tuple::pack(values)?);
		Ok(k)
	}

	/// A child namespace wrapping the tuple in a self-delimited frame
	pub fn nest(&self, values: &[Value]) -> Result<Subspace, Error> {
		let mut prefix = self.prefix.clone();
		prefix.extend(tuple::pack_nested(values)?);
		Ok(Subspace {
			prefix,
		})
	}

	/// Everything lexicographically under this prefix
	pub fn range(&self) -> Range<Key> {
		let mut begin = self.prefix.clone();
		let mut end = self.prefix.clone();
		begin.push(0x00);
		end.push(0xff);
		begin..end
	}

	/// Whether the key sits under this prefix
	pub fn contains(&self, key: &[u8]) -> bool {
		key.starts_with(&self.prefix)
	}

	/// Removes this prefix from a key, if present
	pub fn strip<'a>(&self, key: &'a [u8]) -> Option<&'a [u8]> {
		key.strip_prefix(self.prefix.as_slice())
	}

	/// Decodes the flat-packed elements following this prefix
	pub fn unpack(&self, key: &[u8]) -> Result<Vec<Value>, Error> {
		match self.strip(key) {
			Some(rest) => tuple::unpack(rest),
			None => Err(Error::Decode {
				offset: 0,
				reason: "key does not belong to this subspace".to_string(),
			}),
		}
	}
}
