//! Write-time index maintenance.
//!
//! Every record mutation flows through [`IndexMaintainer::update`] with
//! the prior and the new record, either of which may be absent. For the
//! same record a maintainer always derives the same entries, and all of
//! its mutations commit in the caller's transaction, so a record and its
//! index entries can never be observed out of step. Maintainer errors
//! abort the whole transaction.

mod aggregate;
mod rank;
mod spatial;
mod value;
mod vector;
mod version;

use crate::cnf::Config;
use crate::err::Error;
use crate::idx::IndexKeyBase;
use crate::key::Subspace;
use crate::kvs::{Key, Transaction};
use crate::schema::{IndexDefinition, IndexKind, RecordType};
use crate::val::{Object, Value};

pub(crate) use aggregate::{CountMaintainer, MinMaxMaintainer, SumMaintainer};
pub(crate) use rank::RankMaintainer;
pub(crate) use spatial::SpatialMaintainer;
pub(crate) use value::ValueMaintainer;
pub(crate) use vector::VectorMaintainer;
pub(crate) use version::VersionMaintainer;

/// Dispatches an index update to the maintainer for its kind
pub(crate) enum IndexMaintainer {
	Value(ValueMaintainer),
	Count(CountMaintainer),
	Sum(SumMaintainer),
	MinMax(MinMaxMaintainer),
	Version(VersionMaintainer),
	Rank(RankMaintainer),
	Spatial(SpatialMaintainer),
	Vector(VectorMaintainer),
}

impl IndexMaintainer {
	pub fn new(def: &IndexDefinition, root: &Subspace, cfg: &Config) -> Self {
		let base = IndexKeyBase::new(root, &def.name);
		match &def.kind {
			IndexKind::Value {
				unique,
			} => Self::Value(ValueMaintainer::new(def.clone(), base, *unique)),
			IndexKind::Count => Self::Count(CountMaintainer::new(def.clone(), base)),
			IndexKind::Sum => Self::Sum(SumMaintainer::new(def.clone(), base)),
			IndexKind::Min | IndexKind::Max => {
				Self::MinMax(MinMaxMaintainer::new(def.clone(), base))
			}
			IndexKind::Version => Self::Version(VersionMaintainer::new(base)),
			IndexKind::Rank => Self::Rank(RankMaintainer::new(def.clone(), base)),
			IndexKind::Spatial(opts) => {
				Self::Spatial(SpatialMaintainer::new(def.clone(), base, *opts))
			}
			IndexKind::Vector(opts) => {
				let mut opts = *opts;
				opts.strategy = cfg.strategy_for(&def.name, opts.strategy);
				Self::Vector(VectorMaintainer::new(
					def.clone(),
					base,
					opts,
					cfg.hnsw_m,
					cfg.hnsw_ef_construction,
				))
			}
		}
	}

	/// Applies the entry changes for one record mutation
	pub async fn update(
		&self,
		tx: &mut Transaction,
		rt: &RecordType,
		pk: &[Value],
		old: Option<&Object>,
		new: Option<&Object>,
	) -> Result<(), Error> {
		match self {
			Self::Value(m) => m.update(tx, rt, pk, old, new).await,
			Self::Count(m) => m.update(tx, rt, pk, old, new).await,
			Self::Sum(m) => m.update(tx, rt, pk, old, new).await,
			Self::MinMax(m) => m.update(tx, rt, pk, old, new).await,
			Self::Version(m) => m.update(tx, rt, pk, old, new).await,
			Self::Rank(m) => m.update(tx, rt, pk, old, new).await,
			Self::Spatial(m) => m.update(tx, rt, pk, old, new).await,
			Self::Vector(m) => m.update(tx, rt, pk, old, new).await,
		}
	}

	/// The point-checkable entry keys expected for a record, used by the
	/// scrubber. `None` for kinds whose entries cannot be re-derived from
	/// the record alone.
	pub fn entries_for(
		&self,
		rt: &RecordType,
		pk: &[Value],
		record: &Object,
	) -> Result<Option<Vec<Key>>, Error> {
		match self {
			Self::Value(m) => m.entries_for(rt, pk, record).map(Some),
			Self::MinMax(m) => m.entries_for(rt, pk, record).map(Some),
			Self::Rank(m) => m.entries_for(rt, pk, record).map(Some),
			Self::Spatial(m) => m.entries_for(rt, pk, record),
			Self::Vector(m) => m.entries_for(pk).map(Some),
			Self::Count(_) | Self::Sum(_) | Self::Version(_) => Ok(None),
		}
	}
}

/// Extracts the indexed value tuple for a record, or `None` when the
/// record itself is absent
fn indexed_values(
	rt: &RecordType,
	def: &IndexDefinition,
	record: Option<&Object>,
) -> Option<Vec<Value>> {
	record.map(|r| rt.extract_all(r, &def.key_paths))
}
