//! A persistent ranked set: a skip-list over scored tuples supporting
//! `rank(x)` in O(log n) range reads.
//!
//! Level 0 stores every member with a count of 1. Each higher level keeps
//! a deterministic 1-in-16 subset; an entry's count is the number of
//! members in the half-open span from its key to the next entry at the
//! same level. Promotion is derived from a keyed hash of the member, so
//! re-adding after a retry reproduces the same structure. A sentinel
//! entry at the empty key anchors every level.
//!
//! Count adjustments on unpromoted levels use atomic additions, so
//! concurrent inserts into disjoint spans do not conflict; splits read
//! and rewrite their neighbouring entries and rely on the transaction's
//! conflict detection.

use crate::err::Error;
use crate::idx::IndexKeyBase;
use crate::kvs::{Key, MutationType, Transaction};
use crate::tuple;
use crate::val::Value;
use std::hash::BuildHasher;
use std::ops::Range;

/// Skip-list levels above level 0
const NLEVELS: u8 = 6;

/// log2 of the per-level fan-out
const LEVEL_FAN_POW: u32 = 4;

pub(crate) struct RankedSet {
	base: IndexKeyBase,
}

impl RankedSet {
	pub fn new(base: IndexKeyBase) -> Self {
		Self {
			base,
		}
	}

	fn level_key(&self, level: u8, elems: &[Value]) -> Result<Key, Error> {
		let mut all = Vec::with_capacity(elems.len() + 1);
		all.push(Value::from(level as i64));
		all.extend_from_slice(elems);
		self.base.entry(&all)
	}

	/// The scan range of one level, sentinel included
	fn level_range(&self, level: u8) -> Result<Range<Key>, Error> {
		self.base.prefix_range(&[Value::from(level as i64)])
	}

	/// Splits a level entry key back into its member elements
	fn member_of(&self, key: &[u8]) -> Result<Vec<Value>, Error> {
		let mut elems = self.base.unpack(key)?;
		if elems.is_empty() {
			return Err(Error::Decode {
				offset: 0,
				reason: "malformed ranked set key".to_string(),
			});
		}
		elems.remove(0);
		Ok(elems)
	}

	/// The levels a member is promoted to are nested: promotion at level
	/// `l` implies promotion at every level below
	fn promoted(elems_packed: &[u8], level: u8) -> bool {
		if level == 0 {
			return true;
		}
		let hash = ahash::RandomState::with_seeds(0x72, 0x61, 0x6e, 0x6b).hash_one(elems_packed);
		let mask = (1u64 << (LEVEL_FAN_POW * level as u32)).wrapping_sub(1);
		hash & mask == 0
	}

	fn decode_count(bytes: &[u8]) -> i64 {
		let mut le = [0u8; 8];
		let n = bytes.len().min(8);
		le[..n].copy_from_slice(&bytes[..n]);
		i64::from_le_bytes(le)
	}

	/// The rightmost entry at a level whose key is strictly below the member
	async fn prev_entry(
		&self,
		tx: &mut Transaction,
		level: u8,
		elems: &[Value],
	) -> Result<Option<(Vec<Value>, i64)>, Error> {
		let end = self.level_key(level, elems)?;
		// The sentinel anchors the level, so a predecessor always exists
		let begin = self.level_key(level, &[])?;
		match tx.last(begin..end).await? {
			Some((k, v)) => Ok(Some((self.member_of(&k)?, Self::decode_count(&v)))),
			None => Ok(None),
		}
	}

	/// Ensures the per-level sentinel entries exist
	async fn ensure_sentinels(&self, tx: &mut Transaction) -> Result<(), Error> {
		for level in 0..=NLEVELS {
			let key = self.level_key(level, &[])?;
			if tx.get(key.clone()).await?.is_none() {
				tx.set(key, 0i64.to_le_bytes().to_vec()).await?;
			}
		}
		Ok(())
	}

	/// The sum of entry counts at a level within `[from, to)`
	async fn count_range(
		&self,
		tx: &mut Transaction,
		level: u8,
		from: &[Value],
		to: &[Value],
	) -> Result<i64, Error> {
		let rng = self.level_key(level, from)?..self.level_key(level, to)?;
		let mut sum = 0;
		for (_, v) in tx.getr(rng).await? {
			sum += Self::decode_count(&v);
		}
		Ok(sum)
	}

	pub async fn contains(&self, tx: &mut Transaction, elems: &[Value]) -> Result<bool, Error> {
		tx.exists(self.level_key(0, elems)?).await
	}

	/// The level-0 key a member is stored at
	pub fn member_key(&self, elems: &[Value]) -> Result<Key, Error> {
		self.level_key(0, elems)
	}

	/// Adds a member; returns false when it was already present
	pub async fn add(&self, tx: &mut Transaction, elems: &[Value]) -> Result<bool, Error> {
		if self.contains(tx, elems).await? {
			return Ok(false);
		}
		self.ensure_sentinels(tx).await?;
		let packed = tuple::pack(elems)?;
		// Level 0 stores the member itself
		tx.set(self.level_key(0, elems)?, 1i64.to_le_bytes().to_vec()).await?;
		for level in 1..=NLEVELS {
			if Self::promoted(&packed, level) {
				// Split the containing span in two
				let (prev, prev_count) = self
					.prev_entry(tx, level, elems)
					.await?
					.unwrap_or((Vec::new(), 0));
				let below = self.count_range(tx, level - 1, &prev, elems).await?;
				tx.set(self.level_key(level, &prev)?, below.to_le_bytes().to_vec()).await?;
				tx.set(
					self.level_key(level, elems)?,
					(prev_count - below + 1).to_le_bytes().to_vec(),
				)
				.await?;
			} else {
				// The containing span just grew by one
				let (prev, _) = self
					.prev_entry(tx, level, elems)
					.await?
					.unwrap_or((Vec::new(), 0));
				tx.atomic(
					self.level_key(level, &prev)?,
					1i64.to_le_bytes().to_vec(),
					MutationType::Add,
				)
				.await?;
			}
		}
		Ok(true)
	}

	/// Removes a member; returns false when it was not present
	pub async fn remove(&self, tx: &mut Transaction, elems: &[Value]) -> Result<bool, Error> {
		if !self.contains(tx, elems).await? {
			return Ok(false);
		}
		let packed = tuple::pack(elems)?;
		tx.del(self.level_key(0, elems)?).await?;
		for level in 1..=NLEVELS {
			if Self::promoted(&packed, level) {
				// Merge the member's span back into its predecessor
				let key = self.level_key(level, elems)?;
				let count = match tx.get(key.clone()).await? {
					Some(v) => Self::decode_count(&v),
					None => 0,
				};
				tx.del(key).await?;
				let (prev, _) = self
					.prev_entry(tx, level, elems)
					.await?
					.unwrap_or((Vec::new(), 0));
				tx.atomic(
					self.level_key(level, &prev)?,
					(count - 1).to_le_bytes().to_vec(),
					MutationType::Add,
				)
				.await?;
			} else {
				let (prev, _) = self
					.prev_entry(tx, level, elems)
					.await?
					.unwrap_or((Vec::new(), 0));
				tx.atomic(
					self.level_key(level, &prev)?,
					(-1i64).to_le_bytes().to_vec(),
					MutationType::Add,
				)
				.await?;
			}
		}
		Ok(true)
	}

	/// The number of members strictly below `elems`
	pub async fn rank(&self, tx: &mut Transaction, elems: &[Value]) -> Result<u64, Error> {
		let mut rank: i64 = 0;
		let mut anchor: Vec<Value> = Vec::new();
		for level in (1..=NLEVELS).rev() {
			let rng = self.level_key(level, &anchor)?..self.level_key(level, elems)?;
			let entries = tx.getr(rng).await?;
			if let Some((last, others)) = entries.split_last() {
				// Full spans below the target accumulate; the span
				// containing the target is descended into
				for (_, v) in others {
					rank += Self::decode_count(v);
				}
				anchor = self.member_of(&last.0)?;
			}
		}
		rank += self.count_range(tx, 0, &anchor, elems).await?;
		Ok(rank.max(0) as u64)
	}

	/// The total number of members: the sum of the top level's spans,
	/// sentinel included
	pub async fn size(&self, tx: &mut Transaction) -> Result<u64, Error> {
		let mut sum = 0;
		for (_, v) in tx.getr(self.level_range(NLEVELS)?).await? {
			sum += Self::decode_count(&v);
		}
		Ok(sum.max(0) as u64)
	}

	/// Clears every entry of the set
	pub async fn clear(&self, tx: &mut Transaction) -> Result<(), Error> {
		tx.delr(self.base.range()?).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::key::Subspace;
	use crate::kvs::{Datastore, LockType::*, TransactionType::*};

	fn elems(n: i64) -> Vec<Value> {
		vec![Value::from(n)]
	}

	async fn setup() -> (Datastore, RankedSet) {
		let ds = Datastore::new("memory").await.unwrap();
		let base = IndexKeyBase::new(&Subspace::new(b"t".to_vec()), "ranked");
		(ds, RankedSet::new(base))
	}

	#[tokio::test]
	async fn rank_counts_members_below() {
		let (ds, set) = setup().await;
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		for n in [10, 20, 30, 40, 50] {
			assert!(set.add(&mut tx, &elems(n)).await.unwrap());
		}
		assert_eq!(set.rank(&mut tx, &elems(10)).await.unwrap(), 0);
		assert_eq!(set.rank(&mut tx, &elems(30)).await.unwrap(), 2);
		assert_eq!(set.rank(&mut tx, &elems(55)).await.unwrap(), 5);
		assert_eq!(set.size(&mut tx).await.unwrap(), 5);
		tx.commit().await.unwrap();
	}

	#[tokio::test]
	async fn add_is_idempotent_and_remove_reverses() {
		let (ds, set) = setup().await;
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		assert!(set.add(&mut tx, &elems(7)).await.unwrap());
		assert!(!set.add(&mut tx, &elems(7)).await.unwrap());
		assert!(set.contains(&mut tx, &elems(7)).await.unwrap());
		assert!(set.remove(&mut tx, &elems(7)).await.unwrap());
		assert!(!set.remove(&mut tx, &elems(7)).await.unwrap());
		assert_eq!(set.size(&mut tx).await.unwrap(), 0);
		tx.commit().await.unwrap();
	}

	#[tokio::test]
	async fn rank_is_consistent_at_scale() {
		let (ds, set) = setup().await;
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		// Enough members that several reach the higher levels
		for n in 0..500 {
			set.add(&mut tx, &elems(n * 2)).await.unwrap();
		}
		tx.commit().await.unwrap();

		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		assert_eq!(set.rank(&mut tx, &elems(0)).await.unwrap(), 0);
		assert_eq!(set.rank(&mut tx, &elems(500)).await.unwrap(), 250);
		assert_eq!(set.rank(&mut tx, &elems(999)).await.unwrap(), 500);
		assert_eq!(set.size(&mut tx).await.unwrap(), 500);
		// Remove every fourth member and re-check ranks
		for n in (0..500).step_by(4) {
			set.remove(&mut tx, &elems(n * 2)).await.unwrap();
		}
		assert_eq!(set.size(&mut tx).await.unwrap(), 375);
		assert_eq!(set.rank(&mut tx, &elems(500)).await.unwrap(), 187);
		tx.commit().await.unwrap();
	}
}
