mod util;

use tupledb_core::key;
use tupledb_core::kvs::{LockType::*, TransactionType::*};
use tupledb_core::object;
use tupledb_core::val::Value;
use util::*;

#[tokio::test]
async fn crud_with_secondary_index() {
	let ds = new_datastore().await;
	let store = tupledb_core::store::RecordStore::new(
		ds.clone(),
		user_schema(),
		test_root(),
		Default::default(),
	)
	.unwrap();

	store.save("User", object! { id: 1, email: "a" }).await.unwrap();
	store.save("User", object! { id: 2, email: "b" }).await.unwrap();
	store.save("User", object! { id: 1, email: "c" }).await.unwrap();
	assert!(store.delete("User", &[Value::from(2)]).await.unwrap());

	// The primary subspace holds exactly one record, with the new value
	let records = store.scan("User").await.unwrap();
	assert_eq!(records.len(), 1);
	assert_eq!(records[0].get("email"), Some(&Value::from("c")));

	// The index holds exactly the ("c", 1) entry
	let mut tx = ds.transaction(Read, Optimistic).await.unwrap();
	let entries = tx.getr(key::index::range(&test_root(), "byEmail").unwrap()).await.unwrap();
	assert_eq!(entries.len(), 1);
	let elements = key::index::parse(&test_root(), "byEmail", &entries[0].0).unwrap();
	assert_eq!(elements, vec![Value::from("c"), Value::from(1)]);
	assert!(entries[0].1.is_empty());
	tx.cancel().await.unwrap();
}

#[tokio::test]
async fn load_returns_the_latest_value() {
	let store = new_store(user_schema()).await;
	store.save("User", object! { id: 7, email: "x" }).await.unwrap();
	store.save("User", object! { id: 7, email: "y" }).await.unwrap();
	let rec = store.load("User", &[Value::from(7)]).await.unwrap().unwrap();
	assert_eq!(rec.get("email"), Some(&Value::from("y")));
	assert!(store.load("User", &[Value::from(8)]).await.unwrap().is_none());
}

#[tokio::test]
async fn delete_missing_record_is_false() {
	let store = new_store(user_schema()).await;
	assert!(!store.delete("User", &[Value::from(1)]).await.unwrap());
}

#[tokio::test]
async fn save_all_applies_every_record() {
	let store = new_store(user_schema()).await;
	let records = (0..25).map(|i| object! { id: i, email: format!("u{i}") }).collect();
	store.save_all("User", records).await.unwrap();
	assert_eq!(store.scan("User").await.unwrap().len(), 25);
}

#[tokio::test]
async fn unknown_record_type_is_rejected() {
	let store = new_store(user_schema()).await;
	let err = store.save("Order", object! { id: 1 }).await.unwrap_err();
	assert!(matches!(err, tupledb_core::Error::UnknownRecordType(_)));
}

#[tokio::test]
async fn missing_primary_key_is_rejected() {
	let store = new_store(user_schema()).await;
	let err = store.save("User", object! { email: "a" }).await.unwrap_err();
	assert!(matches!(err, tupledb_core::Error::MissingPrimaryKey { .. }));
}

#[tokio::test]
async fn composed_context_commits_atomically() {
	let store = new_store(user_schema()).await;
	let mut ctx = store.begin(Write).await.unwrap();
	ctx.save("User", &object! { id: 1, email: "a" }).await.unwrap();
	ctx.save("User", &object! { id: 2, email: "b" }).await.unwrap();
	ctx.commit().await.unwrap();
	assert_eq!(store.scan("User").await.unwrap().len(), 2);

	// A cancelled context leaves no trace
	let mut ctx = store.begin(Write).await.unwrap();
	ctx.save("User", &object! { id: 3, email: "z" }).await.unwrap();
	ctx.cancel().await.unwrap();
	assert_eq!(store.scan("User").await.unwrap().len(), 2);
}

#[tokio::test]
async fn clearing_records_leaves_other_subspaces_alone() {
	let ds = new_datastore().await;
	let store = tupledb_core::store::RecordStore::new(
		ds.clone(),
		user_schema(),
		test_root(),
		Default::default(),
	)
	.unwrap();
	store.save("User", object! { id: 1, email: "a" }).await.unwrap();
	store.rebuild_statistics("byEmail").await.unwrap();

	// Clear the whole record region for the type
	let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
	tx.delr(key::record::range(&test_root(), "User").unwrap()).await.unwrap();
	tx.commit().await.unwrap();

	// Index entries and statistics survive
	let mut tx = ds.transaction(Read, Optimistic).await.unwrap();
	let entries = tx.getr(key::index::range(&test_root(), "byEmail").unwrap()).await.unwrap();
	assert_eq!(entries.len(), 1);
	let stats = tx.getr(key::stats::range(&test_root(), "byEmail").unwrap()).await.unwrap();
	assert!(!stats.is_empty());
	tx.cancel().await.unwrap();
	assert!(store.scan("User").await.unwrap().is_empty());
}
