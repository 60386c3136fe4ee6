use super::{LockType, Transaction, TransactionType};
use crate::cnf;
use crate::err::Error;
use rand::Rng;
use std::time::Duration;

/// Per-transaction resource limits, inherited from the store configuration
#[derive(Clone, Copy, Debug)]
pub struct TxLimits {
	/// Abort the transaction after this long; zero disables the timeout
	pub timeout: Duration,
	/// Abort the transaction when it buffers more than this many bytes
	pub size_limit: usize,
}

impl Default for TxLimits {
	fn default() -> Self {
		Self {
			timeout: cnf::TRANSACTION_TIMEOUT,
			size_limit: cnf::TRANSACTION_SIZE_LIMIT,
		}
	}
}

/// The datastore handle wrapping a concrete key-value backend.
///
/// Cheap to share behind an `Arc`; holds no mutable state of its own.
#[allow(dead_code)]
#[non_exhaustive]
pub struct Datastore {
	inner: Inner,
}

#[allow(clippy::large_enum_variant)]
enum Inner {
	#[cfg(feature = "kv-mem")]
	Mem(super::mem::Datastore),
}

impl Datastore {
	/// Opens a datastore from a connection path.
	///
	/// ```text
	/// let ds = Datastore::new("memory").await?;
	/// ```
	pub async fn new(path: &str) -> Result<Datastore, Error> {
		match path {
			#[cfg(feature = "kv-mem")]
			"memory" => {
				info!(target: "tupledb::core::kvs", "Starting kvs store in {}", path);
				Ok(Datastore {
					inner: Inner::Mem(super::mem::Datastore::new()),
				})
			}
			_ => Err(Error::Ds(format!("Unable to load the specified datastore {path}"))),
		}
	}

	/// Start a new transaction with the default limits
	pub async fn transaction(
		&self,
		write: TransactionType,
		lock: LockType,
	) -> Result<Transaction, Error> {
		self.transaction_with(write, lock, TxLimits::default()).await
	}

	/// Start a new transaction with explicit limits
	pub async fn transaction_with(
		&self,
		write: TransactionType,
		_lock: LockType,
		limits: TxLimits,
	) -> Result<Transaction, Error> {
		match &self.inner {
			#[cfg(feature = "kv-mem")]
			Inner::Mem(ds) => {
				Ok(Transaction::Mem(ds.transaction(write, limits.timeout, limits.size_limit)))
			}
		}
	}
}

/// The pause before retrying a conflicted transaction: exponential in the
/// attempt number, with jitter, capped at half a second
pub(crate) fn retry_backoff(attempt: u32) -> Duration {
	let base = 5u64.saturating_mul(1 << attempt.min(7));
	let jitter = rand::thread_rng().gen_range(0..=base / 2);
	Duration::from_millis((base + jitter).min(500))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kvs::api::Transaction as _;
	use crate::kvs::{LockType::*, MutationType, TransactionType::*};

	#[tokio::test]
	async fn unknown_path_is_rejected() {
		assert!(Datastore::new("nowhere").await.is_err());
	}

	#[tokio::test]
	async fn crud_roundtrip() {
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		tx.set(b"k1".to_vec(), b"v1".to_vec()).await.unwrap();
		tx.set(b"k2".to_vec(), b"v2".to_vec()).await.unwrap();
		tx.commit().await.unwrap();

		let mut tx = ds.transaction(Read, Optimistic).await.unwrap();
		assert_eq!(tx.get(b"k1".to_vec()).await.unwrap(), Some(b"v1".to_vec()));
		let all = tx.scan(b"k".to_vec()..b"l".to_vec(), 10).await.unwrap();
		assert_eq!(all.len(), 2);
		tx.cancel().await.unwrap();
	}

	#[tokio::test]
	async fn read_your_writes() {
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		tx.set(b"a".to_vec(), b"1".to_vec()).await.unwrap();
		assert_eq!(tx.get(b"a".to_vec()).await.unwrap(), Some(b"1".to_vec()));
		tx.del(b"a".to_vec()).await.unwrap();
		assert_eq!(tx.get(b"a".to_vec()).await.unwrap(), None);
		tx.cancel().await.unwrap();
	}

	#[tokio::test]
	async fn conflicting_writers_abort() {
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		tx.set(b"test".to_vec(), b"some text".to_vec()).await.unwrap();
		tx.commit().await.unwrap();
		// Two writers read then write the same key
		let mut tx1 = ds.transaction(Write, Optimistic).await.unwrap();
		let mut tx2 = ds.transaction(Write, Optimistic).await.unwrap();
		tx1.get(b"test".to_vec()).await.unwrap();
		tx2.get(b"test".to_vec()).await.unwrap();
		tx1.set(b"test".to_vec(), b"other text 1".to_vec()).await.unwrap();
		tx2.set(b"test".to_vec(), b"other text 2".to_vec()).await.unwrap();
		tx1.commit().await.unwrap();
		let err = tx2.commit().await.unwrap_err();
		assert!(err.is_retryable());
		// The first writer won
		let mut tx = ds.transaction(Read, Optimistic).await.unwrap();
		let val = tx.get(b"test".to_vec()).await.unwrap().unwrap();
		assert_eq!(val, b"other text 1");
		tx.cancel().await.unwrap();
	}

	#[tokio::test]
	async fn blind_writes_do_not_conflict() {
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx1 = ds.transaction(Write, Optimistic).await.unwrap();
		let mut tx2 = ds.transaction(Write, Optimistic).await.unwrap();
		tx1.set(b"test".to_vec(), b"1".to_vec()).await.unwrap();
		tx2.set(b"test".to_vec(), b"2".to_vec()).await.unwrap();
		tx1.commit().await.unwrap();
		tx2.commit().await.unwrap();
	}

	#[tokio::test]
	async fn atomic_add_does_not_conflict() {
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx1 = ds.transaction(Write, Optimistic).await.unwrap();
		let mut tx2 = ds.transaction(Write, Optimistic).await.unwrap();
		tx1.atomic(b"n".to_vec(), 1i64.to_le_bytes().to_vec(), MutationType::Add).await.unwrap();
		tx2.atomic(b"n".to_vec(), 2i64.to_le_bytes().to_vec(), MutationType::Add).await.unwrap();
		tx1.commit().await.unwrap();
		tx2.commit().await.unwrap();
		let mut tx = ds.transaction(Read, Optimistic).await.unwrap();
		let val = tx.get(b"n".to_vec()).await.unwrap().unwrap();
		assert_eq!(i64::from_le_bytes(val.try_into().unwrap()), 3);
		tx.cancel().await.unwrap();
	}

	#[tokio::test]
	async fn compare_and_clear() {
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		tx.atomic(b"n".to_vec(), 5i64.to_le_bytes().to_vec(), MutationType::Add).await.unwrap();
		tx.atomic(b"n".to_vec(), (-5i64).to_le_bytes().to_vec(), MutationType::Add).await.unwrap();
		tx.atomic(b"n".to_vec(), 0i64.to_le_bytes().to_vec(), MutationType::CompareAndClear)
			.await
			.unwrap();
		tx.commit().await.unwrap();
		let mut tx = ds.transaction(Read, Optimistic).await.unwrap();
		assert_eq!(tx.get(b"n".to_vec()).await.unwrap(), None);
		tx.cancel().await.unwrap();
	}

	#[tokio::test]
	async fn versionstamps_are_monotone() {
		let ds = Datastore::new("memory").await.unwrap();
		let mut stamps = Vec::new();
		for i in 0..3u8 {
			let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
			let mut key = vec![b'v'];
			let offset = key.len() as u32;
			key.extend_from_slice(&[0xff; 10]);
			key.extend_from_slice(&[0x00, i]);
			tx.set_versionstamped_key(key, offset, vec![i]).await.unwrap();
			tx.commit().await.unwrap();
			stamps.push(tx.versionstamp().unwrap());
		}
		assert!(stamps[0] < stamps[1] && stamps[1] < stamps[2]);
		// The placeholder bytes were substituted
		let mut tx = ds.transaction(Read, Optimistic).await.unwrap();
		let all = tx.scan(vec![b'v']..vec![b'w'], 10).await.unwrap();
		assert_eq!(all.len(), 3);
		for (k, _) in all {
			assert_ne!(&k[1..11], &[0xff; 10]);
		}
		tx.cancel().await.unwrap();
	}

	#[tokio::test]
	async fn snapshot_isolation_for_scans() {
		let ds = Datastore::new("memory").await.unwrap();
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		tx.set(b"s1".to_vec(), b"a".to_vec()).await.unwrap();
		tx.commit().await.unwrap();
		// A reader opened before a later write does not see it
		let mut reader = ds.transaction(Read, Optimistic).await.unwrap();
		let mut writer = ds.transaction(Write, Optimistic).await.unwrap();
		writer.set(b"s2".to_vec(), b"b".to_vec()).await.unwrap();
		writer.commit().await.unwrap();
		let seen = reader.scan(b"s".to_vec()..b"t".to_vec(), 10).await.unwrap();
		assert_eq!(seen.len(), 1);
		reader.cancel().await.unwrap();
	}
}
