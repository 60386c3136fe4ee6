use super::field::{FieldDefinition, FieldPath, Kind};
use crate::err::Error;
use crate::val::{Object, Value};

/// A named record type: its declared fields and primary key.
///
/// Field values are extracted from record instances by walking the
/// object with the field path, so the schema owns the only mapping from
/// `(record type, field path)` to values; callers never reach into
/// payload bytes themselves.
#[derive(Clone, Debug)]
pub struct RecordType {
	name: String,
	fields: Vec<FieldDefinition>,
	primary_key: Vec<FieldPath>,
}

impl RecordType {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			fields: Vec::new(),
			primary_key: Vec::new(),
		}
	}

	/// Declares the next field; field numbers follow declaration order
	pub fn field(mut self, path: impl Into<FieldPath>, kind: Kind) -> Self {
		let number = self.fields.len() as u32 + 1;
		self.fields.push(FieldDefinition {
			path: path.into(),
			number,
			kind,
			allowed: None,
		});
		self
	}

	/// Declares an enum-like field restricted to a fixed set of values
	pub fn enum_field(
		mut self,
		path: impl Into<FieldPath>,
		allowed: impl IntoIterator<Item = impl Into<Value>>,
	) -> Self {
		let number = self.fields.len() as u32 + 1;
		self.fields.push(FieldDefinition {
			path: path.into(),
			number,
			kind: Kind::Any,
			allowed: Some(allowed.into_iter().map(Into::into).collect()),
		});
		self
	}

	pub fn primary_key(mut self, paths: impl IntoIterator<Item = impl Into<FieldPath>>) -> Self {
		self.primary_key = paths.into_iter().map(Into::into).collect();
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn fields(&self) -> &[FieldDefinition] {
		&self.fields
	}

	pub fn primary_key_paths(&self) -> &[FieldPath] {
		&self.primary_key
	}

	pub fn field_definition(&self, path: &FieldPath) -> Result<&FieldDefinition, Error> {
		self.fields.iter().find(|f| &f.path == path).ok_or_else(|| Error::UnknownField {
			record_type: self.name.clone(),
			path: path.to_string(),
		})
	}

	/// The field number of a declared path
	pub fn field_number(&self, path: &FieldPath) -> Result<u32, Error> {
		Ok(self.field_definition(path)?.number)
	}

	/// The value at a field path; missing fields yield the null element
	pub fn extract(&self, record: &Object, path: &FieldPath) -> Value {
		record.pick(path.segments())
	}

	/// The ordered values at several field paths
	pub fn extract_all(&self, record: &Object, paths: &[FieldPath]) -> Vec<Value> {
		paths.iter().map(|p| self.extract(record, p)).collect()
	}

	/// The primary key tuple of a record instance.
	/// Every primary key field must be present and tuple-representable.
	pub fn primary_key_tuple(&self, record: &Object) -> Result<Vec<Value>, Error> {
		let mut pk = Vec::with_capacity(self.primary_key.len());
		for path in &self.primary_key {
			let v = self.extract(record, path);
			if v.is_none() || !v.is_tuple_representable() {
				return Err(Error::MissingPrimaryKey {
					record_type: self.name.clone(),
					path: path.to_string(),
				});
			}
			pk.push(v);
		}
		Ok(pk)
	}

	/// Checks a record instance against the declared fields
	pub fn validate(&self, record: &Object) -> Result<(), Error> {
		for field in &self.fields {
			let v = record.pick(field.path.segments());
			if !field.kind.matches(&v) {
				return Err(Error::InvalidSchema(format!(
					"field '{}' of record type '{}' expects {:?}, got {}",
					field.path, self.name, field.kind, v.kind()
				)));
			}
			if let Some(allowed) = &field.allowed {
				if !v.is_none() && !allowed.contains(&v) {
					return Err(Error::InvalidSchema(format!(
						"field '{}' of record type '{}' does not allow {v}",
						field.path, self.name
					)));
				}
			}
		}
		self.primary_key_tuple(record)?;
		Ok(())
	}

	/// Checks the type definition itself, at schema build time
	pub(super) fn validate_definition(&self) -> Result<(), Error> {
		if self.name.is_empty() {
			return Err(Error::InvalidSchema("record type name is empty".to_string()));
		}
		if self.primary_key.is_empty() {
			return Err(Error::InvalidSchema(format!(
				"record type '{}' has no primary key",
				self.name
			)));
		}
		for path in &self.primary_key {
			self.field_definition(path).map_err(|_| {
				Error::InvalidSchema(format!(
					"record type '{}' uses undeclared primary key field '{path}'",
					self.name
				))
			})?;
		}
		Ok(())
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
	fn extracts_primary_key() {
		let rec = crate::object! { id: 7, email: "a@b" };
		assert_eq!(user().primary_key_tuple(&rec).unwrap(), vec![Value::from(7)]);
	}

	#[test]
	fn missing_primary_key_fails() {
		let rec = crate::object! { email: "a@b" };
		assert!(matches!(
			user().primary_key_tuple(&rec),
			Err(Error::MissingPrimaryKey { .. })
		));
	}

	#[test]
	fn validates_field_kinds() {
		let rec = crate::object! { id: 7, email: 9 };
		assert!(user().validate(&rec).is_err());
	}

	#[test]
	fn enum_fields_reject_unlisted_values() {
		let rt = RecordType::new("Order")
			.field("id", Kind::Int)
			.enum_field("status", ["open", "closed"])
			.primary_key(["id"]);
		assert!(rt.validate(&crate::object! { id: 1, status: "open" }).is_ok());
		assert!(rt.validate(&crate::object! { id: 1, status: "paused" }).is_err());
	}
}
