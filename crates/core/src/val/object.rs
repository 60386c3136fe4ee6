use super::Value;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A record payload: an ordered map of field names to values.
///
/// Nested objects are addressed with dotted field paths, so
/// `pick(["address", "city"])` descends into the `address` object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Object(pub BTreeMap<String, Value>);

impl Object {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> &mut Self {
		self.0.insert(field.into(), value.into());
		self
	}

	pub fn get(&self, field: &str) -> Option<&Value> {
		self.0.get(field)
	}

	pub fn remove(&mut self, field: &str) -> Option<Value> {
		self.0.remove(field)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Walks a dotted field path, yielding the value at its end.
	/// Missing fields and non-object intermediates yield [`Value::None`].
	pub fn pick(&self, segments: &[String]) -> Value {
		let mut current = self;
		for (i, segment) in segments.iter().enumerate() {
			match current.0.get(segment) {
				Some(Value::Object(o)) if i + 1 < segments.len() => current = o,
				Some(v) if i + 1 == segments.len() => return v.clone(),
				_ => return Value::None,
			}
		}
		Value::None
	}
}

impl PartialEq for Object {
	fn eq(&self, other: &Self) -> bool {
		self.0.len() == other.0.len()
			&& self.0.iter().zip(other.0.iter()).all(|((ak, av), (bk, bv))| ak == bk && av == bv)
	}
}

impl Eq for Object {}

impl PartialOrd for Object {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Object {
	fn cmp(&self, other: &Self) -> Ordering {
		self.0.iter().cmp(other.0.iter())
	}
}

impl fmt::Display for Object {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{{ ")?;
		for (i, (k, v)) in self.0.iter().enumerate() {
			if i > 0 {
				write!(f, ", ")?;
			}
			write!(f, "{k}: {v}")?;
		}
		write!(f, " }}")
	}
}

impl FromIterator<(String, Value)> for Object {
	fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
		Object(iter.into_iter().collect())
	}
}
