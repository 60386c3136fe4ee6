use crate::err::Error;
use crate::idx::trees::spatial;
use crate::idx::IndexKeyBase;
use crate::kvs::{Key, Transaction};
use crate::schema::{IndexDefinition, RecordType, SpatialOptions};
use crate::val::{Object, Value};

/// Maintains a spatial index: the record's coordinates are folded onto a
/// single space-filling-curve cell id, and the entry is the cell followed
/// by the primary key. Records missing a coordinate have no entry.
pub(crate) struct SpatialMaintainer {
	def: IndexDefinition,
	base: IndexKeyBase,
	opts: SpatialOptions,
}

impl SpatialMaintainer {
	pub fn new(def: IndexDefinition, base: IndexKeyBase, opts: SpatialOptions) -> Self {
		Self {
			def,
			base,
			opts,
		}
	}

	/// The coordinates of a record, or `None` when any is missing
	pub(crate) fn coordinates(
		&self,
		rt: &RecordType,
		record: &Object,
	) -> Option<(f64, f64, Option<f64>)> {
		let values = rt.extract_all(record, &self.def.key_paths);
		let x = values[0].as_f64()?;
		let y = values[1].as_f64()?;
		let z = if self.opts.volumetric {
			Some(values[2].as_f64()?)
		} else {
			None
		};
		Some((x, y, z))
	}

	fn entry_key(&self, cell: u64, pk: &[Value]) -> Result<Key, Error> {
		let mut elements = vec![Value::from(cell as i64)];
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
		let o = old.and_then(|r| self.coordinates(rt, r));
		let n = new.and_then(|r| self.coordinates(rt, r));
		if o == n {
			return Ok(());
		}
		if let Some((x, y, z)) = o {
			let cell = spatial::cell_id(&self.opts, x, y, z);
			tx.del(self.entry_key(cell, pk)?).await?;
		}
		if let Some((x, y, z)) = n {
			let cell = spatial::cell_id(&self.opts, x, y, z);
			tx.set(self.entry_key(cell, pk)?, Vec::new()).await?;
		}
		Ok(())
	}

	pub fn entries_for(
		&self,
		rt: &RecordType,
		pk: &[Value],
		record: &Object,
	) -> Result<Option<Vec<Key>>, Error> {
		match self.coordinates(rt, record) {
			Some((x, y, z)) => {
				let cell = spatial::cell_id(&self.opts, x, y, z);
				Ok(Some(vec![self.entry_key(cell, pk)?]))
			}
			None => Ok(Some(Vec::new())),
		}
	}

	/// The entry ranges covering a query region
	pub(crate) fn cover_ranges(
		&self,
		region: &spatial::Region,
	) -> Result<Vec<std::ops::Range<Key>>, Error> {
		let mut out = Vec::new();
		for cells in spatial::covering(&self.opts, region) {
			let begin = self.base.entry(&[Value::from(cells.start as i64)])?;
			let end = self.base.entry(&[Value::from(cells.end as i64)])?;
			out.push(begin..end);
		}
		Ok(out)
	}

	/// Decodes the primary key of an entry
	pub(crate) fn entry_pk(&self, key: &[u8]) -> Result<Vec<Value>, Error> {
		let mut elements = self.base.unpack(key)?;
		if elements.is_empty() {
			return Err(Error::Decode {
				offset: 0,
				reason: "malformed spatial index entry".to_string(),
			});
		}
		elements.remove(0);
		Ok(elements)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::idx::trees::spatial::Region;
	use crate::key::Subspace;
	use crate::kvs::{Datastore, LockType::*, TransactionType::*};
	use crate::schema::Kind;

	fn setup() -> (RecordType, SpatialMaintainer) {
		let rt = RecordType::new("Place")
			.field("id", Kind::Int)
			.field("x", Kind::Float64)
			.field("y", Kind::Float64)
			.primary_key(["id"]);
		let opts = SpatialOptions::cartesian(10, (0.0, 100.0), (0.0, 100.0));
		let def = IndexDefinition::spatial("byPos", ["x", "y"], opts);
		let base = IndexKeyBase::new(&Subspace::new(b"t".to_vec()), "byPos");
		(rt, SpatialMaintainer::new(def, base, opts))
	}

	#[tokio::test]
	async fn entries_follow_moves() {
		let (rt, m) = setup();
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		let pk = [Value::from(1)];
		let here = crate::object! { id: 1, x: 10.0, y: 10.0 };
		let there = crate::object! { id: 1, x: 90.0, y: 90.0 };
		m.update(&mut tx, &rt, &pk, None, Some(&here)).await.unwrap();
		m.update(&mut tx, &rt, &pk, Some(&here), Some(&there)).await.unwrap();
		tx.commit().await.unwrap();

		let mut tx = ds.transaction(Read, Optimistic).await.unwrap();
		let all = tx.getr(m.base.range().unwrap()).await.unwrap();
		assert_eq!(all.len(), 1);
		assert_eq!(m.entry_pk(&all[0].0).unwrap(), pk.to_vec());
		tx.cancel().await.unwrap();
	}

	#[tokio::test]
	async fn cover_ranges_find_nearby_entries() {
		let (rt, m) = setup();
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		for (id, x, y) in [(1, 5.0, 5.0), (2, 6.0, 4.0), (3, 80.0, 80.0)] {
			let rec = crate::object! { id: id, x: x, y: y };
			m.update(&mut tx, &rt, &[Value::from(id)], None, Some(&rec)).await.unwrap();
		}
		let region = Region::rect((0.0, 10.0), (0.0, 10.0));
		let mut found = Vec::new();
		for rng in m.cover_ranges(&region).unwrap() {
			for (k, _) in tx.getr(rng).await.unwrap() {
				found.push(m.entry_pk(&k).unwrap());
			}
		}
		assert!(found.contains(&vec![Value::from(1)]));
		assert!(found.contains(&vec![Value::from(2)]));
		assert!(!found.contains(&vec![Value::from(3)]));
		tx.commit().await.unwrap();
	}
}
