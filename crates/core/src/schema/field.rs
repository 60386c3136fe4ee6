use crate::val::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dotted path addressing a (possibly nested) field of a record
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
	pub fn new(segments: impl IntoIterator<Item = impl Into<String>>) -> Self {
		Self(segments.into_iter().map(Into::into).collect())
	}

	/// Parses a dotted path such as `address.city`
	pub fn parse(path: &str) -> Self {
		Self(path.split('.').map(str::to_string).collect())
	}

	pub fn segments(&self) -> &[String] {
		&self.0
	}
}

impl fmt::Display for FieldPath {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.join("."))
	}
}

impl From<&str> for FieldPath {
	fn from(path: &str) -> Self {
		Self::parse(path)
	}
}

impl From<String> for FieldPath {
	fn from(path: String) -> Self {
		Self::parse(&path)
	}
}

/// The declared type of a record field
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Kind {
	/// Any tuple-representable value
	Any,
	Bytes,
	String,
	Int,
	Float32,
	Float64,
	Bool,
	Uuid,
	Array,
	Object,
	Versionstamp,
}

impl Kind {
	/// Whether a value conforms to this kind; absent fields always do
	pub fn matches(&self, value: &Value) -> bool {
		match (self, value) {
			(_, Value::None) => true,
			(Kind::Any, _) => true,
			(Kind::Bytes, Value::Bytes(_)) => true,
			(Kind::String, Value::Strand(_)) => true,
			(Kind::Int, Value::Int(_)) => true,
			(Kind::Float32, Value::Float32(_)) => true,
			(Kind::Float64, Value::Float64(_)) => true,
			(Kind::Bool, Value::Bool(_)) => true,
			(Kind::Uuid, Value::Uuid(_)) => true,
			(Kind::Array, Value::Array(_)) => true,
			(Kind::Object, Value::Object(_)) => true,
			(Kind::Versionstamp, Value::Versionstamp(_)) => true,
			_ => false,
		}
	}
}

/// One declared field of a record type
#[derive(Clone, Debug, PartialEq)]
pub struct FieldDefinition {
	pub path: FieldPath,
	pub number: u32,
	pub kind: Kind,
	/// Restricts the field to a fixed set of values when present
	pub allowed: Option<Vec<Value>>,
}
