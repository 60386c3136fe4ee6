use crate::err::Error;
use crate::idx::IndexKeyBase;
use crate::kvs::Transaction;
use crate::schema::RecordType;
use crate::val::{Object, Value};
use crate::vs::Versionstamp;
use std::time::{SystemTime, UNIX_EPOCH};

/// Maintains a version index: per primary key, one entry per committed
/// write, keyed by the commit versionstamp the store assigns. Each entry
/// values the wall-clock insertion time, giving a monotone per-record
/// history. Deleting the record clears its history.
pub(crate) struct VersionMaintainer {
	base: IndexKeyBase,
}

impl VersionMaintainer {
	pub fn new(base: IndexKeyBase) -> Self {
		Self {
			base,
		}
	}

	pub async fn update(
		&self,
		tx: &mut Transaction,
		_rt: &RecordType,
		pk: &[Value],
		_old: Option<&Object>,
		new: Option<&Object>,
	) -> Result<(), Error> {
		match new {
			Some(_) => {
				let mut elements = pk.to_vec();
				elements.push(Value::Versionstamp(Versionstamp::incomplete(0)));
				let (key, offset) = self.base.entry_versionstamped(&elements)?;
				let now = SystemTime::now()
					.duration_since(UNIX_EPOCH)
					.unwrap_or_default()
					.as_millis() as u64;
				tx.set_versionstamped_key(key, offset, now.to_be_bytes().to_vec()).await
			}
			None => {
				// Record deleted: drop its whole history
				tx.delr(self.base.prefix_range(pk)?).await
			}
		}
	}

	/// The committed versionstamps of one record, oldest first
	pub async fn history(
		&self,
		tx: &mut Transaction,
		pk: &[Value],
	) -> Result<Vec<(Versionstamp, u64)>, Error> {
		let mut out = Vec::new();
		for (key, val) in tx.getr(self.base.prefix_range(pk)?).await? {
			let elements = self.base.unpack(&key)?;
			let vs = match elements.last() {
				Some(Value::Versionstamp(vs)) => *vs,
				_ => {
					return Err(Error::Decode {
						offset: 0,
						reason: "malformed version index entry".to_string(),
					})
				}
			};
			let mut be = [0u8; 8];
			let n = val.len().min(8);
			be[..n].copy_from_slice(&val[..n]);
			out.push((vs, u64::from_be_bytes(be)));
		}
		Ok(out)
	}

	/// The latest committed versionstamp of one record
	pub async fn latest(
		&self,
		tx: &mut Transaction,
		pk: &[Value],
	) -> Result<Option<Versionstamp>, Error> {
		match tx.last(self.base.prefix_range(pk)?).await? {
			Some((key, _)) => match self.base.unpack(&key)?.last() {
				Some(Value::Versionstamp(vs)) => Ok(Some(*vs)),
				_ => Err(Error::Decode {
					offset: 0,
					reason: "malformed version index entry".to_string(),
				}),
			},
			None => Ok(None),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::key::Subspace;
	use crate::kvs::{Datastore, LockType::*, TransactionType::*};
	use crate::schema::Kind;

	#[tokio::test]
	async fn history_is_strictly_increasing() {
		let rt = RecordType::new("User").field("id", Kind::Int).primary_key(["id"]);
		let base = IndexKeyBase::new(&Subspace::new(b"t".to_vec()), "versions");
		let m = VersionMaintainer::new(base);
		let ds = Datastore::new("memory").await.unwrap();
		let pk = [Value::from(1)];
		let rec = crate::object! { id: 1 };

		for _ in 0..4 {
			let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
			m.update(&mut tx, &rt, &pk, None, Some(&rec)).await.unwrap();
			tx.commit().await.unwrap();
		}

		let mut tx = ds.transaction(Read, Optimistic).await.unwrap();
		let history = m.history(&mut tx, &pk).await.unwrap();
		assert_eq!(history.len(), 4);
		assert!(history.windows(2).all(|w| w[0].0 < w[1].0));
		assert_eq!(m.latest(&mut tx, &pk).await.unwrap(), Some(history[3].0));
		tx.cancel().await.unwrap();

		// Deletion clears the history
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		m.update(&mut tx, &rt, &pk, Some(&rec), None).await.unwrap();
		tx.commit().await.unwrap();
		let mut tx = ds.transaction(Read, Optimistic).await.unwrap();
		assert!(m.history(&mut tx, &pk).await.unwrap().is_empty());
		tx.cancel().await.unwrap();
	}
}
