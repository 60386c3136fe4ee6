//! Typed construction of every key this crate persists.
//!
//! The keyspace under a store's root subspace is divided by a single
//! category byte so that each region can be cleared independently:
//!
//! ```text
//! root
//! ├─ r  records/ <recordTypeName>/ <primaryKey>/ () → record payload bytes
//! ├─ i  indexes/ <indexName> (indexedValues ++ pk) → per index kind
//! ├─ m  metadata/ version | state | former | lock  → see each module
//! ├─ p  progress/ <opId>/ …                        → range-set intervals
//! └─ s  stats/ <indexName>/ <bucketId>             → histogram buckets
//! ```
//!
//! Record keys nest their components (each level self-delimited) while
//! index entries are flat-packed behind the index name. The two shapes are
//! deliberately only constructible through the functions in [`record`] and
//! [`index`] respectively; nothing else in the crate touches raw prefixes,
//! so a nested frame byte can never leak into an index scan.

pub mod debug;
pub mod former;
pub mod index;
pub mod lock;
pub mod progress;
pub mod record;
pub mod state;
pub mod stats;
pub mod version;

mod subspace;

pub use subspace::Subspace;

use crate::kvs::Key;

/// Category byte for primary record storage
pub(crate) const RECORDS: u8 = b'r';
/// Category byte for index entries
pub(crate) const INDEXES: u8 = b'i';
/// Category byte for store metadata
pub(crate) const METADATA: u8 = b'm';
/// Category byte for online-operation progress state
pub(crate) const PROGRESS: u8 = b'p';
/// Category byte for index statistics
pub(crate) const STATS: u8 = b's';

/// The whole-category range under a root, e.g. every record of every type
pub(crate) fn category_range(root: &Subspace, category: u8) -> std::ops::Range<Key> {
	let mut begin = root.key().to_vec();
	begin.push(category);
	let mut end = begin.clone();
	begin.push(0x00);
	end.push(0xff);
	begin..end
}

pub(crate) fn category_prefix(root: &Subspace, category: u8) -> Key {
	let mut k = root.key().to_vec();
	k.push(category);
	k
}
