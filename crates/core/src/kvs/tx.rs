use super::api::Transaction as Api;
use super::{Check, Key, MutationType, Val};
use crate::cnf::SCAN_BATCH_SIZE;
use crate::err::Error;
use crate::vs::Versionstamp;
use std::ops::Range;

/// A transaction over whichever key-value backend the datastore wraps.
///
/// All record-layer operations run through this enum so the crate stays
/// monomorphic over the backend choice.
#[non_exhaustive]
pub enum Transaction {
	#[cfg(feature = "kv-mem")]
	Mem(super::mem::Transaction),
}

impl Transaction {
	/// Log instead of panicking when this transaction is dropped open
	pub fn rollback_with_warning(mut self) -> Self {
		self.check_level(Check::Warn);
		self
	}

	/// Ignore when this transaction is dropped open
	pub fn rollback_and_ignore(mut self) -> Self {
		self.check_level(Check::None);
		self
	}

	fn check_level(&mut self, check: Check) {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.check_level(check),
		}
	}

	/// Check if the transaction is finished
	pub fn closed(&self) -> bool {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.closed(),
		}
	}

	/// Cancel the transaction
	pub async fn cancel(&mut self) -> Result<(), Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.cancel().await,
		}
	}

	/// Commit the transaction
	pub async fn commit(&mut self) -> Result<(), Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.commit().await,
		}
	}

	/// Check if a key exists
	pub async fn exists(&mut self, key: Key) -> Result<bool, Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.exists(key).await,
		}
	}

	/// Fetch a key from the store
	pub async fn get(&mut self, key: Key) -> Result<Option<Val>, Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.get(key).await,
		}
	}

	/// Insert or update a key in the store
	pub async fn set(&mut self, key: Key, val: Val) -> Result<(), Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.set(key, val).await,
		}
	}

	/// Insert a key, erroring if it already exists
	pub async fn put(&mut self, key: Key, val: Val) -> Result<(), Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.put(key, val).await,
		}
	}

	/// Update a key only when its current value matches the check
	pub async fn putc(&mut self, key: Key, val: Val, chk: Option<Val>) -> Result<(), Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.putc(key, val, chk).await,
		}
	}

	/// Delete a key
	pub async fn del(&mut self, key: Key) -> Result<(), Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.del(key).await,
		}
	}

	/// Delete a key only when its current value matches the check
	pub async fn delc(&mut self, key: Key, chk: Option<Val>) -> Result<(), Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.delc(key, chk).await,
		}
	}

	/// Delete every key in a range
	pub async fn delr(&mut self, rng: Range<Key>) -> Result<(), Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.delr(rng).await,
		}
	}

	/// Fetch at most `limit` key-value pairs from a range, in order
	pub async fn scan(&mut self, rng: Range<Key>, limit: u32) -> Result<Vec<(Key, Val)>, Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.scan(rng, limit).await,
		}
	}

	/// Apply an atomic mutation to a key
	pub async fn atomic(&mut self, key: Key, param: Val, mtype: MutationType) -> Result<(), Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.atomic(key, param, mtype).await,
		}
	}

	/// Set a key whose placeholder bytes are substituted at commit
	pub async fn set_versionstamped_key(
		&mut self,
		key: Key,
		offset: u32,
		val: Val,
	) -> Result<(), Error> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.set_versionstamped_key(key, offset, val).await,
		}
	}

	/// The versionstamp assigned at commit
	pub fn versionstamp(&self) -> Option<Versionstamp> {
		match self {
			#[cfg(feature = "kv-mem")]
			Transaction::Mem(tx) => tx.versionstamp(),
		}
	}

	/// Fetch every key-value pair in a range, scanning in batches
	pub async fn getr(&mut self, rng: Range<Key>) -> Result<Vec<(Key, Val)>, Error> {
		let mut out = Vec::new();
		let mut next = rng.start.clone();
		loop {
			let batch = self.scan(next.clone()..rng.end.clone(), SCAN_BATCH_SIZE).await?;
			let full = batch.len() == SCAN_BATCH_SIZE as usize;
			match batch.last() {
				Some((k, _)) => {
					next = k.clone();
					next.push(0x00);
				}
				None => break,
			}
			out.extend(batch);
			if !full {
				break;
			}
		}
		Ok(out)
	}

	/// Fetch the first key-value pair at or after the start of a range
	pub async fn first(&mut self, rng: Range<Key>) -> Result<Option<(Key, Val)>, Error> {
		Ok(self.scan(rng, 1).await?.into_iter().next())
	}

	/// Fetch the last key-value pair before the end of a range
	pub async fn last(&mut self, rng: Range<Key>) -> Result<Option<(Key, Val)>, Error> {
		let mut out = None;
		let mut next = rng.start.clone();
		loop {
			let batch = self.scan(next.clone()..rng.end.clone(), SCAN_BATCH_SIZE).await?;
			let full = batch.len() == SCAN_BATCH_SIZE as usize;
			if let Some((k, _)) = batch.last() {
				next = k.clone();
				next.push(0x00);
				out = batch.into_iter().last();
			}
			if !full {
				break;
			}
		}
		Ok(out)
	}
}
