//! Index maintenance: write-time maintainers, online building and
//! scrubbing, lifecycle state, progress tracking, and statistics.

pub mod builder;
pub mod maintainer;
pub mod monitor;
pub mod planner;
pub mod scrubber;
pub mod state;
pub mod stats;
pub mod trees;

pub(crate) mod ranked;
pub(crate) mod rangeset;

use crate::err::Error;
use crate::key;
use crate::key::Subspace;
use crate::kvs::Key;
use crate::val::Value;
use std::ops::Range;
use std::sync::Arc;

/// The key handle a maintainer works through.
///
/// Maintainers never see the raw store subspace; every key they touch is
/// flat-packed behind their own index prefix through this handle, so a
/// nested namespace frame cannot end up inside an index entry.
#[derive(Clone, Debug)]
pub struct IndexKeyBase {
	inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
	root: Subspace,
	name: String,
}

impl IndexKeyBase {
	pub(crate) fn new(root: &Subspace, name: &str) -> Self {
		Self {
			inner: Arc::new(Inner {
				root: root.clone(),
				name: name.to_string(),
			}),
		}
	}

	pub(crate) fn name(&self) -> &str {
		&self.inner.name
	}

	/// An entry key from flat-packed elements
	pub(crate) fn entry(&self, elements: &[Value]) -> Result<Key, Error> {
		key::index::new(&self.inner.root, &self.inner.name, elements)
	}

	/// An entry key containing one incomplete versionstamp
	pub(crate) fn entry_versionstamped(&self, elements: &[Value]) -> Result<(Key, u32), Error> {
		key::index::new_versionstamped(&self.inner.root, &self.inner.name, elements)
	}

	/// Every entry of this index
	pub(crate) fn range(&self) -> Result<Range<Key>, Error> {
		key::index::range(&self.inner.root, &self.inner.name)
	}

	/// Every entry whose leading elements equal the given prefix
	pub(crate) fn prefix_range(&self, elements: &[Value]) -> Result<Range<Key>, Error> {
		key::index::prefix_range(&self.inner.root, &self.inner.name, elements)
	}

	/// Decodes the elements of one of this index's entry keys
	pub(crate) fn unpack(&self, key: &[u8]) -> Result<Vec<Value>, Error> {
		key::index::parse(&self.inner.root, &self.inner.name, key)
	}
}
