use super::{Key, MutationType, Val};
use crate::err::Error;
use crate::vs::Versionstamp;
use std::future::Future;
use std::ops::Range;

/// The transaction contract consumed from the underlying key-value store.
///
/// All reads observe the transaction's snapshot plus its own writes.
/// Commit performs optimistic conflict detection; a conflicting commit
/// fails with [`Error::TxRetryable`] and the whole operation may be
/// retried.
pub trait Transaction {
	/// Whether the transaction has been committed or cancelled
	fn closed(&self) -> bool;

	/// Cancel the transaction
	fn cancel(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

	/// Commit the transaction
	fn commit(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

	/// Check if a key exists
	fn exists(&mut self, key: Key) -> impl Future<Output = Result<bool, Error>> + Send;

	/// Fetch a key from the store
	fn get(&mut self, key: Key) -> impl Future<Output = Result<Option<Val>, Error>> + Send;

	/// Insert or update a key in the store
	fn set(&mut self, key: Key, val: Val) -> impl Future<Output = Result<(), Error>> + Send;

	/// Insert a key, erroring if it already exists
	fn put(&mut self, key: Key, val: Val) -> impl Future<Output = Result<(), Error>> + Send;

	/// Update a key only when its current value matches the check
	fn putc(
		&mut self,
		key: Key,
		val: Val,
		chk: Option<Val>,
	) -> impl Future<Output = Result<(), Error>> + Send;

	/// Delete a key
	fn del(&mut self, key: Key) -> impl Future<Output = Result<(), Error>> + Send;

	/// Delete a key only when its current value matches the check
	fn delc(
		&mut self,
		key: Key,
		chk: Option<Val>,
	) -> impl Future<Output = Result<(), Error>> + Send;

	/// Delete every key in a range
	fn delr(&mut self, rng: Range<Key>) -> impl Future<Output = Result<(), Error>> + Send;

	/// Fetch at most `limit` key-value pairs from a range, in order
	fn scan(
		&mut self,
		rng: Range<Key>,
		limit: u32,
	) -> impl Future<Output = Result<Vec<(Key, Val)>, Error>> + Send;

	/// Apply an atomic mutation to a key
	fn atomic(
		&mut self,
		key: Key,
		param: Val,
		mtype: MutationType,
	) -> impl Future<Output = Result<(), Error>> + Send;

	/// Set a key whose placeholder bytes at `offset` are substituted with
	/// the commit versionstamp
	fn set_versionstamped_key(
		&mut self,
		key: Key,
		offset: u32,
		val: Val,
	) -> impl Future<Output = Result<(), Error>> + Send;

	/// The versionstamp assigned at commit; available after `commit`
	fn versionstamp(&self) -> Option<Versionstamp>;
}
