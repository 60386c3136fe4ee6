use super::indexed_values;
use crate::err::Error;
use crate::idx::IndexKeyBase;
use crate::kvs::{Key, Transaction};
use crate::schema::{IndexDefinition, RecordType};
use crate::val::{Array, Object, Value};

/// Maintains a value index: one entry per record, keyed by the indexed
/// values with the primary key appended as the tie-breaker. Unique
/// indexes additionally assert, inside the same transaction, that no
/// other primary key shares the indexed value prefix.
pub(crate) struct ValueMaintainer {
	def: IndexDefinition,
	base: IndexKeyBase,
	unique: bool,
}

impl ValueMaintainer {
	pub fn new(def: IndexDefinition, base: IndexKeyBase, unique: bool) -> Self {
		Self {
			def,
			base,
			unique,
		}
	}

	fn entry_key(&self, values: &[Value], pk: &[Value]) -> Result<Key, Error> {
		let mut elements = values.to_vec();
		elements.extend_from_slice(pk);
		self.base.entry(&elements)
	}

	async fn assert_unique(
		&self,
		tx: &mut Transaction,
		values: &[Value],
		pk: &[Value],
	) -> Result<(), Error> {
		let rng = self.base.prefix_range(values)?;
		for (key, _) in tx.scan(rng, 2).await? {
			let elements = self.base.unpack(&key)?;
			let existing = &elements[self.def.key_paths.len()..];
			if existing != pk {
				return Err(Error::UniquenessViolation {
					index: self.def.name.clone(),
					value: Value::Array(Array(values.to_vec())),
					existing: Value::Array(Array(existing.to_vec())),
					new: Value::Array(Array(pk.to_vec())),
				});
			}
		}
		Ok(())
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
			if self.unique {
				self.assert_unique(tx, values, pk).await?;
			}
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

#[cfg(test)]
mod tests {
	use super::*;
	use crate::key::Subspace;
	use crate::kvs::{Datastore, LockType::*, TransactionType::*};
	use crate::schema::Kind;

	fn setup() -> (RecordType, IndexDefinition, ValueMaintainer) {
		let rt = RecordType::new("User")
			.field("id", Kind::Int)
			.field("email", Kind::String)
			.primary_key(["id"]);
		let def = IndexDefinition::unique("byEmail", ["email"]);
		let base = IndexKeyBase::new(&Subspace::new(b"t".to_vec()), "byEmail");
		let m = ValueMaintainer::new(def.clone(), base, true);
		(rt, def, m)
	}

	#[tokio::test]
	async fn insert_update_delete_entries() {
		let (rt, _, m) = setup();
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		let pk = [Value::from(1)];
		let v1 = crate::object! { id: 1, email: "a" };
		let v2 = crate::object! { id: 1, email: "b" };

		m.update(&mut tx, &rt, &pk, None, Some(&v1)).await.unwrap();
		assert!(tx.exists(m.entry_key(&[Value::from("a")], &pk).unwrap()).await.unwrap());

		m.update(&mut tx, &rt, &pk, Some(&v1), Some(&v2)).await.unwrap();
		assert!(!tx.exists(m.entry_key(&[Value::from("a")], &pk).unwrap()).await.unwrap());
		assert!(tx.exists(m.entry_key(&[Value::from("b")], &pk).unwrap()).await.unwrap());

		m.update(&mut tx, &rt, &pk, Some(&v2), None).await.unwrap();
		assert!(!tx.exists(m.entry_key(&[Value::from("b")], &pk).unwrap()).await.unwrap());
		tx.commit().await.unwrap();
	}

	#[tokio::test]
	async fn unique_violation_reports_both_keys() {
		let (rt, _, m) = setup();
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		let rec1 = crate::object! { id: 1, email: "x" };
		let rec2 = crate::object! { id: 2, email: "x" };
		m.update(&mut tx, &rt, &[Value::from(1)], None, Some(&rec1)).await.unwrap();
		let err =
			m.update(&mut tx, &rt, &[Value::from(2)], None, Some(&rec2)).await.unwrap_err();
		match err {
			Error::UniquenessViolation {
				index,
				existing,
				new,
				..
			} => {
				assert_eq!(index, "byEmail");
				assert_eq!(existing, Value::from(vec![Value::from(1)]));
				assert_eq!(new, Value::from(vec![Value::from(2)]));
			}
			e => panic!("unexpected error {e:?}"),
		}
		tx.cancel().await.unwrap();
	}

	#[tokio::test]
	async fn same_record_update_is_not_a_violation() {
		let (rt, _, m) = setup();
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		let rec = crate::object! { id: 1, email: "x" };
		let other = crate::object! { id: 1, email: "x", name: "n" };
		m.update(&mut tx, &rt, &[Value::from(1)], None, Some(&rec)).await.unwrap();
		// Indexed values unchanged: a no-op, not a violation
		m.update(&mut tx, &rt, &[Value::from(1)], Some(&rec), Some(&other)).await.unwrap();
		tx.commit().await.unwrap();
	}
}
