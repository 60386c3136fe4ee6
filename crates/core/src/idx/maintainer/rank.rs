use super::indexed_values;
use crate::err::Error;
use crate::idx::ranked::RankedSet;
use crate::idx::IndexKeyBase;
use crate::kvs::{Key, Transaction};
use crate::schema::{IndexDefinition, RecordType};
use crate::val::{Object, Value};

/// Maintains a rank index: members are the scored tuples with the primary
/// key appended, kept in a persistent ranked set so `rank(x)` needs only
/// O(log n) reads.
pub(crate) struct RankMaintainer {
	def: IndexDefinition,
	set: RankedSet,
}

impl RankMaintainer {
	pub fn new(def: IndexDefinition, base: IndexKeyBase) -> Self {
		Self {
			def,
			set: RankedSet::new(base),
		}
	}

	fn member(&self, values: &[Value], pk: &[Value]) -> Vec<Value> {
		let mut elements = values.to_vec();
		elements.extend_from_slice(pk);
		elements
	}

	pub(crate) fn ranked_set(&self) -> &RankedSet {
		&self.set
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
			self.set.remove(tx, &self.member(values, pk)).await?;
		}
		if let Some(values) = &n {
			self.set.add(tx, &self.member(values, pk)).await?;
		}
		Ok(())
	}

	/// The number of members scoring strictly below the given tuple
	pub async fn rank(&self, tx: &mut Transaction, values: &[Value]) -> Result<u64, Error> {
		self.set.rank(tx, values).await
	}

	pub fn entries_for(
		&self,
		rt: &RecordType,
		pk: &[Value],
		record: &Object,
	) -> Result<Vec<Key>, Error> {
		let values = rt.extract_all(record, &self.def.key_paths);
		self.set.member_key(&self.member(&values, pk)).map(|k| vec![k])
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::key::Subspace;
	use crate::kvs::{Datastore, LockType::*, TransactionType::*};
	use crate::schema::Kind;

	#[tokio::test]
	async fn rank_follows_scores() {
		let rt = RecordType::new("Player")
			.field("id", Kind::Int)
			.field("score", Kind::Int)
			.primary_key(["id"]);
		let def = IndexDefinition::rank("byScore", ["score"]);
		let base = IndexKeyBase::new(&Subspace::new(b"t".to_vec()), "byScore");
		let m = RankMaintainer::new(def, base);
		let ds = Datastore::new("memory").await.unwrap();

		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		for (id, score) in [(1, 100), (2, 50), (3, 150), (4, 75)] {
			let rec = crate::object! { id: id, score: score };
			m.update(&mut tx, &rt, &[Value::from(id)], None, Some(&rec)).await.unwrap();
		}
		tx.commit().await.unwrap();

		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		assert_eq!(m.rank(&mut tx, &[Value::from(50)]).await.unwrap(), 0);
		assert_eq!(m.rank(&mut tx, &[Value::from(100)]).await.unwrap(), 2);
		assert_eq!(m.rank(&mut tx, &[Value::from(1000)]).await.unwrap(), 4);

		// A score change moves the member
		let before = crate::object! { id: 2, score: 50 };
		let after = crate::object! { id: 2, score: 200 };
		m.update(&mut tx, &rt, &[Value::from(2)], Some(&before), Some(&after)).await.unwrap();
		assert_eq!(m.rank(&mut tx, &[Value::from(100)]).await.unwrap(), 1);
		tx.commit().await.unwrap();
	}
}
