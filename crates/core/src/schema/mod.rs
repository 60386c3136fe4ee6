//! Record types, index definitions, and the versioned schema that ties a
//! store together.
//!
//! A [`Schema`] is immutable for the lifetime of a store handle. Changing
//! it means building a new schema at a higher semantic version, re-opening
//! the store, and letting the migration manager bring the persisted state
//! up to date.

mod field;
mod index;
mod record;

pub use field::{FieldPath, Kind};
pub use index::{
	CellCurve, Distance, FormerIndex, IndexDefinition, IndexKind, IndexState, SpatialOptions,
	VectorOptions, VectorStrategy,
};
pub use record::RecordType;

use crate::err::Error;
use semver::Version;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A named set of record types and indexes at a semantic version
#[derive(Clone, Debug)]
pub struct Schema {
	version: Version,
	record_types: BTreeMap<String, RecordType>,
	indexes: BTreeMap<String, IndexDefinition>,
	former: Vec<FormerIndex>,
}

impl Schema {
	pub fn builder() -> SchemaBuilder {
		SchemaBuilder::default()
	}

	pub fn version(&self) -> &Version {
		&self.version
	}

	pub fn record_type(&self, name: &str) -> Result<&RecordType, Error> {
		self.record_types.get(name).ok_or_else(|| Error::UnknownRecordType(name.to_string()))
	}

	pub fn record_types(&self) -> impl Iterator<Item = &RecordType> {
		self.record_types.values()
	}

	pub fn index(&self, name: &str) -> Result<&IndexDefinition, Error> {
		self.indexes.get(name).ok_or_else(|| Error::UnknownIndex(name.to_string()))
	}

	pub fn indexes(&self) -> impl Iterator<Item = &IndexDefinition> {
		self.indexes.values()
	}

	/// The indexes maintaining entries for a given record type
	pub fn indexes_for(&self, record_type: &str) -> impl Iterator<Item = &IndexDefinition> {
		let name = record_type.to_string();
		self.indexes.values().filter(move |ix| ix.applies_to(&name))
	}

	/// Indexes removed by this schema, pending tombstone conversion
	pub fn former_indexes(&self) -> &[FormerIndex] {
		&self.former
	}

	/// Resolves an index by what it covers rather than by name
	pub fn resolve_index(
		&self,
		record_type: &str,
		paths: &[FieldPath],
		want: fn(&IndexKind) -> bool,
	) -> Result<&IndexDefinition, Error> {
		self.indexes_for(record_type)
			.find(|ix| want(&ix.kind) && ix.key_paths == paths)
			.ok_or_else(|| {
				Error::UnknownIndex(format!(
					"no matching index on {record_type} for [{}]",
					paths.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
				))
			})
	}
}

/// Builds and validates a [`Schema`]
#[derive(Default)]
pub struct SchemaBuilder {
	version: Option<Version>,
	record_types: Vec<RecordType>,
	indexes: Vec<IndexDefinition>,
	former: Vec<FormerIndex>,
}

impl SchemaBuilder {
	pub fn version(mut self, version: Version) -> Self {
		self.version = Some(version);
		self
	}

	pub fn record_type(mut self, rt: RecordType) -> Self {
		self.record_types.push(rt);
		self
	}

	pub fn index(mut self, ix: IndexDefinition) -> Self {
		self.indexes.push(ix);
		self
	}

	pub fn former_index(mut self, former: FormerIndex) -> Self {
		self.former.push(former);
		self
	}

	pub fn build(self) -> Result<Arc<Schema>, Error> {
		let version = self.version.unwrap_or_else(|| Version::new(1, 0, 0));
		let mut record_types = BTreeMap::new();
		for rt in self.record_types {
			rt.validate_definition()?;
			if record_types.insert(rt.name().to_string(), rt).is_some() {
				return Err(Error::InvalidSchema("duplicate record type name".to_string()));
			}
		}
		if record_types.is_empty() {
			return Err(Error::InvalidSchema("a schema needs at least one record type".to_string()));
		}
		let mut indexes = BTreeMap::new();
		for ix in self.indexes {
			ix.validate()?;
			if let Some(types) = ix.record_types() {
				for t in types {
					if !record_types.contains_key(t) {
						return Err(Error::InvalidSchema(format!(
							"index '{}' covers unknown record type '{t}'",
							ix.name
						)));
					}
				}
			}
			if ix.added_at > version {
				return Err(Error::InvalidSchema(format!(
					"index '{}' is added at {} which is newer than the schema version {version}",
					ix.name, ix.added_at
				)));
			}
			if indexes.insert(ix.name.clone(), ix).is_some() {
				return Err(Error::InvalidSchema("duplicate index name".to_string()));
			}
		}
		for former in &self.former {
			if indexes.contains_key(&former.name) {
				return Err(Error::InvalidSchema(format!(
					"index '{}' is both defined and removed",
					former.name
				)));
			}
		}
		Ok(Arc::new(Schema {
			version,
			record_types,
			indexes,
			former: self.former,
		}))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn user() -> RecordType {
		RecordType::new("User")
			.field("id", Kind::Int)
			.field("email", Kind::String)
			.primary_key(["id"])
	}

	#[test]
	fn builds_a_valid_schema() {
		let schema = Schema::builder()
			.record_type(user())
			.index(IndexDefinition::value("byEmail", ["email"]))
			.build()
			.unwrap();
		assert_eq!(schema.version(), &Version::new(1, 0, 0));
		assert_eq!(schema.indexes_for("User").count(), 1);
	}

	#[test]
	fn rejects_duplicate_names() {
		let err = Schema::builder()
			.record_type(user())
			.index(IndexDefinition::value("byEmail", ["email"]))
			.index(IndexDefinition::count("byEmail", ["email"]))
			.build()
			.unwrap_err();
		assert!(matches!(err, Error::InvalidSchema(_)));
	}

	#[test]
	fn rejects_index_on_unknown_type() {
		let err = Schema::builder()
			.record_type(user())
			.index(IndexDefinition::value("byCity", ["city"]).only(["Order"]))
			.build()
			.unwrap_err();
		assert!(matches!(err, Error::InvalidSchema(_)));
	}

	#[test]
	fn scoped_indexes_apply_to_their_types_only() {
		let schema = Schema::builder()
			.record_type(user())
			.record_type(
				RecordType::new("Order")
					.field("id", Kind::Int)
					.field("email", Kind::String)
					.primary_key(["id"]),
			)
			.index(IndexDefinition::value("byEmail", ["email"]).only(["User"]))
			.build()
			.unwrap();
		assert_eq!(schema.indexes_for("User").count(), 1);
		assert_eq!(schema.indexes_for("Order").count(), 0);
	}
}
