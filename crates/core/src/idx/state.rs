//! Persistence and transitions of the per-index lifecycle state.
//!
//! The state byte lives under the metadata subspace. An index with no
//! persisted byte is readable: indexes present in the schema a store was
//! created with are live from the first write, and only indexes added to
//! an existing store pass through the write-only build phase.
//!
//! Transitions always commit atomically with their accompanying action;
//! in particular [`disable`] clears the index's entries in the same
//! transaction that demotes it.

use crate::err::Error;
use crate::key;
use crate::key::Subspace;
use crate::kvs::Transaction;
use crate::schema::{IndexDefinition, IndexState};

/// Reads the persisted state of an index
pub async fn get(tx: &mut Transaction, root: &Subspace, index: &str) -> Result<IndexState, Error> {
	let key = key::state::new(root, index)?;
	match tx.get(key).await? {
		Some(bytes) => match bytes.as_slice() {
			[b] => IndexState::from_byte(*b),
			_ => Err(Error::Decode {
				offset: 0,
				reason: "malformed index state value".to_string(),
			}),
		},
		None => Ok(IndexState::Readable),
	}
}

/// Persists the state of an index
pub async fn set(
	tx: &mut Transaction,
	root: &Subspace,
	index: &str,
	state: IndexState,
) -> Result<(), Error> {
	trace!(target: "tupledb::core::idx", index, %state, "setting index state");
	let key = key::state::new(root, index)?;
	tx.set(key, vec![state.to_byte()]).await
}

/// The queryability gate: fails unless the index is readable
pub async fn require_readable(
	tx: &mut Transaction,
	root: &Subspace,
	index: &str,
) -> Result<(), Error> {
	match get(tx, root, index).await? {
		IndexState::Readable => Ok(()),
		state => Err(Error::IndexNotReadable {
			index: index.to_string(),
			state,
		}),
	}
}

/// `disabled → writeOnly`: live writes start maintaining the index
pub async fn enable(tx: &mut Transaction, root: &Subspace, index: &str) -> Result<(), Error> {
	set(tx, root, index, IndexState::WriteOnly).await
}

/// `writeOnly → readable`: the index may now serve queries
pub async fn make_readable(
	tx: &mut Transaction,
	root: &Subspace,
	index: &str,
) -> Result<(), Error> {
	set(tx, root, index, IndexState::Readable).await
}

/// `* → disabled`, clearing the index's entries in the same transaction
pub async fn disable(
	tx: &mut Transaction,
	root: &Subspace,
	index: &IndexDefinition,
) -> Result<(), Error> {
	tx.delr(key::index::range(root, &index.name)?).await?;
	set(tx, root, &index.name, IndexState::Disabled).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::kvs::{Datastore, LockType::*, TransactionType::*};
	use crate::schema::IndexDefinition;

	#[tokio::test]
	async fn absent_state_reads_readable() {
		let ds = Datastore::new("memory").await.unwrap();
		let root = Subspace::new(b"t".to_vec());
		let mut tx = ds.transaction(Read, Optimistic).await.unwrap();
		assert_eq!(get(&mut tx, &root, "byEmail").await.unwrap(), IndexState::Readable);
		tx.cancel().await.unwrap();
	}

	#[tokio::test]
	async fn transitions_and_gate() {
		let ds = Datastore::new("memory").await.unwrap();
		let root = Subspace::new(b"t".to_vec());
		let ix = IndexDefinition::value("byEmail", ["email"]);

		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		enable(&mut tx, &root, "byEmail").await.unwrap();
		tx.commit().await.unwrap();

		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		assert_eq!(get(&mut tx, &root, "byEmail").await.unwrap(), IndexState::WriteOnly);
		let err = require_readable(&mut tx, &root, "byEmail").await.unwrap_err();
		assert!(matches!(err, Error::IndexNotReadable { .. }));
		make_readable(&mut tx, &root, "byEmail").await.unwrap();
		assert!(require_readable(&mut tx, &root, "byEmail").await.is_ok());
		tx.commit().await.unwrap();

		// Disabling clears the entries and demotes the index
		let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
		let entry = key::index::new(&root, "byEmail", &[crate::val::Value::from("a")]).unwrap();
		tx.set(entry.clone(), vec![]).await.unwrap();
		disable(&mut tx, &root, &ix).await.unwrap();
		assert_eq!(tx.get(entry).await.unwrap(), None);
		assert_eq!(get(&mut tx, &root, "byEmail").await.unwrap(), IndexState::Disabled);
		tx.commit().await.unwrap();
	}
}
