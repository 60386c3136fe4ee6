use super::field::FieldPath;
use crate::err::Error;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// The kind of an index, fixing its write contract and query shape
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum IndexKind {
	/// One entry per record: indexed values then primary key
	Value {
		unique: bool,
	},
	/// A counter per grouping tuple, kept with atomic additions
	Count,
	/// A sum per grouping tuple; the last key path is the summed value
	Sum,
	/// Grouped minimum; answered with a single-key lookup
	Min,
	/// Grouped maximum; answered with a single-key lookup
	Max,
	/// Per-record commit history keyed by versionstamp
	Version,
	/// A persistent ranked set supporting O(log n) rank queries
	Rank,
	/// Coordinates encoded to a 64-bit space-filling-curve cell
	Spatial(SpatialOptions),
	/// Approximate nearest-neighbour search over embedding vectors
	Vector(VectorOptions),
}

/// Which space-filling curve a spatial index encodes cells with
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellCurve {
	/// Z-order interleaving, for Cartesian coordinates
	Morton,
	/// Hilbert curve, for geographic coordinates
	Hilbert,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpatialOptions {
	pub curve: CellCurve,
	/// Subdivision depth of the curve; cell ids use `2 × level` bits in
	/// 2D and `2 × level + altitude bits` in 3D
	pub level: u8,
	/// Whether a third coordinate is packed into the reserved high bits
	pub volumetric: bool,
	/// Axis ranges used to normalise raw coordinates
	pub x: (f64, f64),
	pub y: (f64, f64),
	pub z: (f64, f64),
}

impl SpatialOptions {
	pub fn cartesian(level: u8, x: (f64, f64), y: (f64, f64)) -> Self {
		Self {
			curve: CellCurve::Morton,
			level,
			volumetric: false,
			x,
			y,
			z: (0.0, 0.0),
		}
	}

	pub fn geographic(level: u8) -> Self {
		Self {
			curve: CellCurve::Hilbert,
			level,
			volumetric: false,
			x: (-180.0, 180.0),
			y: (-90.0, 90.0),
			z: (0.0, 0.0),
		}
	}

	pub fn with_altitude(mut self, range: (f64, f64)) -> Self {
		self.volumetric = true;
		self.z = range;
		self
	}
}

/// The distance metric of a vector index
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
	Cosine,
	Euclidean,
	InnerProduct,
}

/// How a vector index answers nearest-neighbour queries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorStrategy {
	/// Exact O(n) scan over the stored vectors
	FlatScan,
	/// HNSW graph; `inline` additionally maintains the graph at write time
	Hnsw {
		inline: bool,
	},
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VectorOptions {
	pub dimensions: usize,
	pub metric: Distance,
	pub strategy: VectorStrategy,
	/// Neighbours per node; `None` uses the store configuration
	pub m: Option<usize>,
	/// Construction candidate list size; `None` uses the store configuration
	pub ef_construction: Option<usize>,
}

impl VectorOptions {
	pub fn new(dimensions: usize, metric: Distance, strategy: VectorStrategy) -> Self {
		Self {
			dimensions,
			metric,
			strategy,
			m: None,
			ef_construction: None,
		}
	}
}

/// The persisted lifecycle state of an index
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexState {
	/// Neither maintained nor readable
	Disabled,
	/// Maintained on writes, not yet queryable
	WriteOnly,
	/// Fully built and queryable
	Readable,
}

impl IndexState {
	pub fn to_byte(self) -> u8 {
		match self {
			IndexState::Disabled => 0,
			IndexState::WriteOnly => 1,
			IndexState::Readable => 2,
		}
	}

	pub fn from_byte(b: u8) -> Result<Self, Error> {
		match b {
			0 => Ok(IndexState::Disabled),
			1 => Ok(IndexState::WriteOnly),
			2 => Ok(IndexState::Readable),
			b => Err(Error::Decode {
				offset: 0,
				reason: format!("invalid index state byte 0x{b:02x}"),
			}),
		}
	}

	/// Whether write-time maintenance applies in this state
	pub fn maintained(self) -> bool {
		!matches!(self, IndexState::Disabled)
	}
}

impl fmt::Display for IndexState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			IndexState::Disabled => write!(f, "disabled"),
			IndexState::WriteOnly => write!(f, "write-only"),
			IndexState::Readable => write!(f, "readable"),
		}
	}
}

/// The tombstone left behind by a removed index
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormerIndex {
	pub name: String,
	pub added_at: Version,
	pub removed_at: Version,
}

/// The definition of one index
#[derive(Clone, Debug, PartialEq)]
pub struct IndexDefinition {
	pub name: String,
	pub kind: IndexKind,
	pub key_paths: Vec<FieldPath>,
	/// Restricts the index to a subset of record types; `None` is universal
	record_types: Option<BTreeSet<String>>,
	/// The schema version this index first appeared in
	pub added_at: Version,
}

impl IndexDefinition {
	fn new(
		name: impl Into<String>,
		kind: IndexKind,
		paths: impl IntoIterator<Item = impl Into<FieldPath>>,
	) -> Self {
		Self {
			name: name.into(),
			kind,
			key_paths: paths.into_iter().map(Into::into).collect(),
			record_types: None,
			added_at: Version::new(1, 0, 0),
		}
	}

	pub fn value(
		name: impl Into<String>,
		paths: impl IntoIterator<Item = impl Into<FieldPath>>,
	) -> Self {
		Self::new(
			name,
			IndexKind::Value {
				unique: false,
			},
			paths,
		)
	}

	pub fn unique(
		name: impl Into<String>,
		paths: impl IntoIterator<Item = impl Into<FieldPath>>,
	) -> Self {
		Self::new(
			name,
			IndexKind::Value {
				unique: true,
			},
			paths,
		)
	}

	pub fn count(
		name: impl Into<String>,
		grouping: impl IntoIterator<Item = impl Into<FieldPath>>,
	) -> Self {
		Self::new(name, IndexKind::Count, grouping)
	}

	pub fn sum(
		name: impl Into<String>,
		paths: impl IntoIterator<Item = impl Into<FieldPath>>,
	) -> Self {
		Self::new(name, IndexKind::Sum, paths)
	}

	pub fn min(
		name: impl Into<String>,
		paths: impl IntoIterator<Item = impl Into<FieldPath>>,
	) -> Self {
		Self::new(name, IndexKind::Min, paths)
	}

	pub fn max(
		name: impl Into<String>,
		paths: impl IntoIterator<Item = impl Into<FieldPath>>,
	) -> Self {
		Self::new(name, IndexKind::Max, paths)
	}

	pub fn version(name: impl Into<String>) -> Self {
		Self::new(name, IndexKind::Version, Vec::<FieldPath>::new())
	}

	pub fn rank(
		name: impl Into<String>,
		paths: impl IntoIterator<Item = impl Into<FieldPath>>,
	) -> Self {
		Self::new(name, IndexKind::Rank, paths)
	}

	pub fn spatial(
		name: impl Into<String>,
		paths: impl IntoIterator<Item = impl Into<FieldPath>>,
		options: SpatialOptions,
	) -> Self {
		Self::new(name, IndexKind::Spatial(options), paths)
	}

	pub fn vector(
		name: impl Into<String>,
		path: impl Into<FieldPath>,
		options: VectorOptions,
	) -> Self {
		Self::new(name, IndexKind::Vector(options), [path])
	}

	/// Restricts the index to the given record types
	pub fn only(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.record_types = Some(types.into_iter().map(Into::into).collect());
		self
	}

	/// Marks the schema version this index was added at
	pub fn added_at(mut self, version: Version) -> Self {
		self.added_at = version;
		self
	}

	pub fn record_types(&self) -> Option<&BTreeSet<String>> {
		self.record_types.as_ref()
	}

	pub fn applies_to(&self, record_type: &str) -> bool {
		match &self.record_types {
			Some(types) => types.contains(record_type),
			None => true,
		}
	}

	/// The number of leading key paths forming the grouping tuple
	pub fn grouping_arity(&self) -> usize {
		match self.kind {
			IndexKind::Count => self.key_paths.len(),
			IndexKind::Sum | IndexKind::Min | IndexKind::Max => self.key_paths.len() - 1,
			_ => 0,
		}
	}

	pub(super) fn validate(&self) -> Result<(), Error> {
		let fail = |msg: String| Err(Error::InvalidSchema(msg));
		if self.name.is_empty() {
			return fail("index name is empty".to_string());
		}
		match &self.kind {
			IndexKind::Value {
				..
			}
			| IndexKind::Rank => {
				if self.key_paths.is_empty() {
					return fail(format!("index '{}' needs at least one key field", self.name));
				}
			}
			IndexKind::Count => {}
			IndexKind::Sum | IndexKind::Min | IndexKind::Max => {
				if self.key_paths.is_empty() {
					return fail(format!(
						"aggregate index '{}' needs an aggregated value field",
						self.name
					));
				}
			}
			IndexKind::Version => {
				if !self.key_paths.is_empty() {
					return fail(format!(
						"version index '{}' is keyed by primary key and versionstamp only",
						self.name
					));
				}
			}
			IndexKind::Spatial(opts) => {
				let dims = if opts.volumetric {
					3
				} else {
					2
				};
				if self.key_paths.len() != dims {
					return fail(format!(
						"spatial index '{}' needs exactly {dims} coordinate fields",
						self.name
					));
				}
				let max_level = if opts.volumetric {
					20
				} else {
					30
				};
				if opts.level == 0 || opts.level > max_level {
					return fail(format!(
						"spatial index '{}' level must be in 1..={max_level}",
						self.name
					));
				}
			}
			IndexKind::Vector(opts) => {
				if self.key_paths.len() != 1 {
					return fail(format!(
						"vector index '{}' needs exactly one embedding field",
						self.name
					));
				}
				if opts.dimensions == 0 {
					return fail(format!("vector index '{}' needs a dimension count", self.name));
				}
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn state_bytes_roundtrip() {
		for state in [IndexState::Disabled, IndexState::WriteOnly, IndexState::Readable] {
			assert_eq!(IndexState::from_byte(state.to_byte()).unwrap(), state);
		}
		assert!(IndexState::from_byte(9).is_err());
	}

	#[test]
	fn grouping_arity_per_kind() {
		assert_eq!(IndexDefinition::count("c", ["city"]).grouping_arity(), 1);
		assert_eq!(IndexDefinition::sum("s", ["city", "total"]).grouping_arity(), 1);
		assert_eq!(IndexDefinition::value("v", ["city"]).grouping_arity(), 0);
	}

	#[test]
	fn spatial_validation() {
		let opts = SpatialOptions::cartesian(16, (0.0, 100.0), (0.0, 100.0));
		assert!(IndexDefinition::spatial("s", ["x", "y"], opts).validate().is_ok());
		assert!(IndexDefinition::spatial("s", ["x"], opts).validate().is_err());
		let volumetric = opts.with_altitude((0.0, 10.0));
		assert!(IndexDefinition::spatial("s", ["x", "y", "z"], volumetric).validate().is_ok());
	}

	#[test]
	fn version_indexes_take_no_fields() {
		assert!(IndexDefinition::version("byVersion").validate().is_ok());
		let mut ix = IndexDefinition::version("byVersion");
		ix.key_paths.push("a".into());
		assert!(ix.validate().is_err());
	}
}
