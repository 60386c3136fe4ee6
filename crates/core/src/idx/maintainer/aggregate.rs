use super::indexed_values;
use crate::err::Error;
use crate::idx::IndexKeyBase;
use crate::kvs::{Key, MutationType, Transaction};
use crate::schema::{IndexDefinition, RecordType};
use crate::val::{Object, Value};

/// Maintains a count index: an atomic counter per grouping tuple.
///
/// Counters are adjusted with ADD mutations, which carry no read
/// conflicts, so concurrent writers into the same group never abort each
/// other. A decrement is followed by a compare-and-clear of zero so empty
/// groups leave no keys behind.
pub(crate) struct CountMaintainer {
	def: IndexDefinition,
	base: IndexKeyBase,
}

impl CountMaintainer {
	pub fn new(def: IndexDefinition, base: IndexKeyBase) -> Self {
		Self {
			def,
			base,
		}
	}

	pub(crate) fn group_key(&self, group: &[Value]) -> Result<Key, Error> {
		self.base.entry(group)
	}

	pub async fn update(
		&self,
		tx: &mut Transaction,
		rt: &RecordType,
		_pk: &[Value],
		old: Option<&Object>,
		new: Option<&Object>,
	) -> Result<(), Error> {
		let o = indexed_values(rt, &self.def, old);
		let n = indexed_values(rt, &self.def, new);
		if o == n {
			return Ok(());
		}
		if let Some(group) = &n {
			let key = self.group_key(group)?;
			tx.atomic(key, 1i64.to_le_bytes().to_vec(), MutationType::Add).await?;
		}
		if let Some(group) = &o {
			let key = self.group_key(group)?;
			tx.atomic(key.clone(), (-1i64).to_le_bytes().to_vec(), MutationType::Add).await?;
			tx.atomic(key, 0i64.to_le_bytes().to_vec(), MutationType::CompareAndClear).await?;
		}
		Ok(())
	}
}

/// Maintains a sum index: the grouped total of its last key field,
/// adjusted with atomic additions. Summed fields must be integers.
pub(crate) struct SumMaintainer {
	def: IndexDefinition,
	base: IndexKeyBase,
}

impl SumMaintainer {
	pub fn new(def: IndexDefinition, base: IndexKeyBase) -> Self {
		Self {
			def,
			base,
		}
	}

	pub(crate) fn group_key(&self, group: &[Value]) -> Result<Key, Error> {
		self.base.entry(group)
	}

	/// Splits indexed values into the grouping tuple and the summed
	/// integer; records without the summed field contribute nothing
	fn split(&self, values: Vec<Value>) -> Result<Option<(Vec<Value>, i64)>, Error> {
		let arity = self.def.grouping_arity();
		if values[arity].is_none() {
			return Ok(None);
		}
		let summed = values[arity].as_int().ok_or_else(|| {
			Error::Encode(format!(
				"sum index '{}' expects an integer value field, got {}",
				self.def.name,
				values[arity].kind()
			))
		})?;
		let mut group = values;
		group.truncate(arity);
		Ok(Some((group, summed)))
	}

	pub async fn update(
		&self,
		tx: &mut Transaction,
		rt: &RecordType,
		_pk: &[Value],
		old: Option<&Object>,
		new: Option<&Object>,
	) -> Result<(), Error> {
		let o = indexed_values(rt, &self.def, old);
		let n = indexed_values(rt, &self.def, new);
		if o == n {
			return Ok(());
		}
		if let Some(Some((group, summed))) = n.map(|v| self.split(v)).transpose()? {
			tx.atomic(self.group_key(&group)?, summed.to_le_bytes().to_vec(), MutationType::Add)
				.await?;
		}
		if let Some(Some((group, summed))) = o.map(|v| self.split(v)).transpose()? {
			tx.atomic(
				self.group_key(&group)?,
				summed.wrapping_neg().to_le_bytes().to_vec(),
				MutationType::Add,
			)
			.await?;
		}
		Ok(())
	}
}

/// Maintains a min or max index. Entries are `group ++ value ++ pk` with
/// empty values, so the grouped minimum is the first key of the group's
/// range and the maximum the last; both are single-lookup reads.
pub(crate) struct MinMaxMaintainer {
	def: IndexDefinition,
	base: IndexKeyBase,
}

impl MinMaxMaintainer {
	pub fn new(def: IndexDefinition, base: IndexKeyBase) -> Self {
		Self {
			def,
			base,
		}
	}

	fn entry_key(&self, values: &[Value], pk: &[Value]) -> Result<Key, Error> {
		let mut elements = values.to_vec();
		elements.extend_from_slice(pk);
		self.base.entry(&elements)
	}

	pub async fn update(
		&self,
		tx: &mut Transaction,
		rt: &RecordType,
		pk: &[Value],
		old: Option<&Object>,
		new: Option<&Object>,
	) -> Result<(), Error> {
		let o = indexed_values(rt, &self.def, old);
		let n = indexed_values(rt, &self.def, new);
		if o == n {
			return Ok(());
		}
		if let Some(values) = &o {
			tx.del(self.entry_key(values, pk)?).await?;
		}
		if let Some(values) = &n {
			tx.set(self.entry_key(values, pk)?, Vec::new()).await?;
		}
		Ok(())
	}

	pub fn entries_for(
		&self,
		rt: &RecordType,
		pk: &[Value],
		record: &Object,
	) -> Result<Vec<Key>, Error> {
		let values = rt.extract_all(record, &self.def.key_paths);
		Ok(vec![self.entry_key(&values, pk)?])
	}
}
