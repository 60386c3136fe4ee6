//! A persistent union of byte-key intervals, used to record which ranges
//! of a keyspace an online operation has already covered.
//!
//! Each stored interval `[begin, end)` lives at `sub / begin → end`.
//! Intervals are kept disjoint and sorted; inserts merge with touching or
//! overlapping neighbours, so re-inserting after a retry is a no-op and
//! cooperating workers sharing one range set converge on the union of
//! their work. Serialisability of the observations comes from the
//! surrounding transaction.

use crate::err::Error;
use crate::key::Subspace;
use crate::kvs::{Key, Transaction};
use crate::val::Value;
use std::ops::Range;

#[derive(Clone, Debug)]
pub(crate) struct RangeSet {
	sub: Subspace,
}

impl RangeSet {
	pub fn new(sub: Subspace) -> Self {
		Self {
			sub,
		}
	}

	fn key(&self, begin: &[u8]) -> Result<Key, Error> {
		self.sub.flat_pack(&[Value::Bytes(begin.to_vec())])
	}

	fn decode(&self, key: &[u8]) -> Result<Key, Error> {
		match self.sub.unpack(key)?.as_slice() {
			[Value::Bytes(b)] => Ok(b.clone()),
			_ => Err(Error::Decode {
				offset: 0,
				reason: "malformed range set key".to_string(),
			}),
		}
	}

	/// Inserts `[begin, end)`, merging any touching or overlapping
	/// neighbours so the stored intervals stay disjoint
	pub async fn insert(&self, tx: &mut Transaction, begin: &[u8], end: &[u8]) -> Result<(), Error> {
		if begin >= end {
			return Ok(());
		}
		let mut new_begin = begin.to_vec();
		let mut new_end = end.to_vec();
		// A predecessor interval that reaches our begin absorbs us
		let mut upper = self.key(begin)?;
		upper.push(0x00);
		if let Some((k, v)) = tx.last(self.sub.range().start..upper).await? {
			let b = self.decode(&k)?;
			if v >= new_begin {
				new_begin = b;
				if v > new_end {
					new_end = v.clone();
				}
				tx.del(k).await?;
			}
		}
		// Successor intervals starting inside the new one get folded in
		let from = self.key(&new_begin)?;
		let entries = tx.getr(from..self.sub.range().end).await?;
		for (k, v) in entries {
			let b = self.decode(&k)?;
			if b > new_end {
				break;
			}
			if v > new_end {
				new_end = v.clone();
			}
			tx.del(k).await?;
		}
		tx.set(self.key(&new_begin)?, new_end).await
	}

	/// Whether some stored interval contains `key`
	pub async fn contains(&self, tx: &mut Transaction, key: &[u8]) -> Result<bool, Error> {
		let mut upper = self.key(key)?;
		upper.push(0x00);
		match tx.last(self.sub.range().start..upper).await? {
			Some((_, end)) => Ok(end.as_slice() > key),
			None => Ok(false),
		}
	}

	/// The complement intervals intersected with `[begin, end)`, in order
	pub async fn missing(
		&self,
		tx: &mut Transaction,
		begin: &[u8],
		end: &[u8],
	) -> Result<Vec<Range<Key>>, Error> {
		let mut out = Vec::new();
		let mut cursor = begin.to_vec();
		// An interval straddling `begin` advances the cursor first
		let mut upper = self.key(begin)?;
		upper.push(0x00);
		if let Some((_, e)) = tx.last(self.sub.range().start..upper).await? {
			if e > cursor {
				cursor = e;
			}
		}
		let from = self.key(begin)?;
		let entries = tx.getr(from..self.sub.range().end).await?;
		for (k, e) in entries {
			let b = self.decode(&k)?;
			if b.as_slice() >= end {
				break;
			}
			if b > cursor {
				out.push(cursor.clone()..b.clone());
			}
			if e > cursor {
				cursor = e;
			}
		}
		if cursor.as_slice() < end {
			out.push(cursor..end.to_vec());
		}
		Ok(out)
	}

	/// Every stored interval, for inspection
	#[cfg(test)]
	pub async fn intervals(&self, tx: &mut Transaction) -> Result<Vec<Range<Key>>, Error> {
		let mut out = Vec::new();
		for (k, v) in tx.getr(self.sub.range()).await? {
			out.push(self.decode(&k)?..v);
		}
		Ok(out)
	}

	/// Clears every stored interval
	pub async fn clear(&self, tx: &mut Transaction) -> Result<(), Error> {
		tx.delr(self.sub.range()).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kvs::{Datastore, LockType::*, TransactionType::*};

	async fn setup() -> (Datastore, RangeSet) {
		let ds = Datastore::new("memory").await.unwrap();
		let rs = RangeSet::new(Subspace::new(b"rs".to_vec()));
		(ds, rs)
	}

	#[tokio::test]
	async fn inserts_merge_neighbours() {
		let (ds, rs) = setup().await;
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		rs.insert(&mut tx, b"a", b"c").await.unwrap();
		rs.insert(&mut tx, b"e", b"g").await.unwrap();
		// Touching on the left, overlapping on the right
		rs.insert(&mut tx, b"c", b"f").await.unwrap();
		let spans = rs.intervals(&mut tx).await.unwrap();
		assert_eq!(spans, vec![b"a".to_vec()..b"g".to_vec()]);
		tx.commit().await.unwrap();
	}

	#[tokio::test]
	async fn insert_is_idempotent() {
		let (ds, rs) = setup().await;
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		rs.insert(&mut tx, b"a", b"c").await.unwrap();
		rs.insert(&mut tx, b"a", b"c").await.unwrap();
		rs.insert(&mut tx, b"b", b"c").await.unwrap();
		let spans = rs.intervals(&mut tx).await.unwrap();
		assert_eq!(spans, vec![b"a".to_vec()..b"c".to_vec()]);
		tx.commit().await.unwrap();
	}

	#[tokio::test]
	async fn contains_checks_interval_membership() {
		let (ds, rs) = setup().await;
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		rs.insert(&mut tx, b"b", b"d").await.unwrap();
		assert!(rs.contains(&mut tx, b"b").await.unwrap());
		assert!(rs.contains(&mut tx, b"c").await.unwrap());
		assert!(!rs.contains(&mut tx, b"d").await.unwrap());
		assert!(!rs.contains(&mut tx, b"a").await.unwrap());
		tx.commit().await.unwrap();
	}

	#[tokio::test]
	async fn missing_enumerates_the_complement() {
		let (ds, rs) = setup().await;
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		rs.insert(&mut tx, b"b", b"c").await.unwrap();
		rs.insert(&mut tx, b"e", b"f").await.unwrap();
		let gaps = rs.missing(&mut tx, b"a", b"g").await.unwrap();
		assert_eq!(
			gaps,
			vec![
				b"a".to_vec()..b"b".to_vec(),
				b"c".to_vec()..b"e".to_vec(),
				b"f".to_vec()..b"g".to_vec(),
			]
		);
		// Fully covered span has no gaps
		rs.insert(&mut tx, b"a", b"g").await.unwrap();
		assert!(rs.missing(&mut tx, b"a", b"g").await.unwrap().is_empty());
		tx.commit().await.unwrap();
	}

	#[tokio::test]
	async fn missing_respects_straddling_intervals() {
		let (ds, rs) = setup().await;
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		rs.insert(&mut tx, b"a", b"d").await.unwrap();
		let gaps = rs.missing(&mut tx, b"b", b"f").await.unwrap();
		assert_eq!(gaps, vec![b"d".to_vec()..b"f".to_vec()]);
		tx.commit().await.unwrap();
	}
}
