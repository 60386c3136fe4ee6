mod util;

use semver::Version;
use std::sync::Arc;
use std::time::Duration;
use tupledb_core::cnf::Config;
use tupledb_core::idx::scrubber::{ScrubMode, ScrubReport};
use tupledb_core::idx::state;
use tupledb_core::key;
use tupledb_core::kvs::{Datastore, LockType::*, TransactionType::*};
use tupledb_core::object;
use tupledb_core::schema::{IndexDefinition, IndexState, Kind, RecordType, Schema};
use tupledb_core::store::RecordStore;
use tupledb_core::val::Value;
use util::*;

fn order_type() -> RecordType {
	RecordType::new("Order")
		.field("id", Kind::Int)
		.field("city", Kind::String)
		.primary_key(["id"])
}

/// A schema whose count index arrived in version 2, after the data
fn v2_schema() -> Arc<Schema> {
	Schema::builder()
		.version(Version::new(2, 0, 0))
		.record_type(order_type())
		.index(IndexDefinition::value("byCity", ["city"]))
		.index(
			IndexDefinition::count("countByCity", ["city"]).added_at(Version::new(2, 0, 0)),
		)
		.build()
		.unwrap()
}

fn v1_schema() -> Arc<Schema> {
	Schema::builder()
		.version(Version::new(1, 0, 0))
		.record_type(order_type())
		.index(IndexDefinition::value("byCity", ["city"]))
		.build()
		.unwrap()
}

async fn populate(store: &RecordStore, n: i64) {
	for i in 0..n {
		let city = if i % 2 == 0 {
			"T"
		} else {
			"K"
		};
		store.save("Order", object! { id: i, city: city }).await.unwrap();
	}
}

async fn enable(ds: &Arc<Datastore>, index: &str) {
	let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
	state::enable(&mut tx, &test_root(), index).await.unwrap();
	tx.commit().await.unwrap();
}

#[tokio::test]
async fn online_build_backfills_existing_records() {
	let ds = new_datastore().await;
	let v1 = RecordStore::new(ds.clone(), v1_schema(), test_root(), Default::default()).unwrap();
	populate(&v1, 200).await;

	let v2 = RecordStore::new(ds.clone(), v2_schema(), test_root(), Default::default()).unwrap();
	enable(&ds, "countByCity").await;
	let progress = v2.build_index("countByCity").await.unwrap();
	assert_eq!(progress.built, 200);
	assert_eq!(v2.index_state("countByCity").await.unwrap(), IndexState::Readable);
	assert_eq!(v2.count("countByCity", &[Value::from("T")]).await.unwrap(), 100);
	assert_eq!(v2.count("countByCity", &[Value::from("K")]).await.unwrap(), 100);
}

#[test_log::test(tokio::test)]
async fn interrupted_build_resumes_without_double_counting() {
	let ds = new_datastore().await;
	let v1 = RecordStore::new(ds.clone(), v1_schema(), test_root(), Default::default()).unwrap();
	populate(&v1, 300).await;

	let mut cfg = Config::new().with_online_batch_size(10);
	cfg.online_throttle = Duration::from_millis(5);
	let v2 = RecordStore::new(ds.clone(), v2_schema(), test_root(), cfg).unwrap();
	enable(&ds, "countByCity").await;

	// First run: cancelled somewhere in the middle
	let indexer = v2.indexer(v2.schema().index("countByCity").unwrap().clone());
	let cancel = indexer.cancellation();
	let handle = tokio::spawn(async move { indexer.run().await });
	tokio::time::sleep(Duration::from_millis(40)).await;
	cancel.store(true, std::sync::atomic::Ordering::Relaxed);
	let first = handle.await.unwrap();

	// Second run: picks up the recorded progress and completes
	let second = v2.build_index("countByCity").await.unwrap();
	assert_eq!(v2.index_state("countByCity").await.unwrap(), IndexState::Readable);

	// Every record was counted exactly once across both runs
	let total = first.map(|p| p.built).unwrap_or(0) + second.built;
	assert_eq!(total, 300);
	assert_eq!(v2.count("countByCity", &[Value::from("T")]).await.unwrap(), 150);
	assert_eq!(v2.count("countByCity", &[Value::from("K")]).await.unwrap(), 150);
}

#[test_log::test(tokio::test)]
async fn live_writers_and_builder_converge() {
	let ds = new_datastore().await;
	let v1 = RecordStore::new(ds.clone(), v1_schema(), test_root(), Default::default()).unwrap();
	populate(&v1, 150).await;

	let mut cfg = Config::new().with_online_batch_size(10);
	cfg.online_throttle = Duration::from_millis(2);
	let v2 = RecordStore::new(ds.clone(), v2_schema(), test_root(), cfg).unwrap();
	enable(&ds, "countByCity").await;

	let indexer = v2.indexer(v2.schema().index("countByCity").unwrap().clone());
	let builder = tokio::spawn(async move { indexer.run().await });

	// Concurrent writes while the build is in flight: new records,
	// updates moving groups, and deletions
	let writer = v2.clone();
	let writes = tokio::spawn(async move {
		for i in 150..200i64 {
			writer.save("Order", object! { id: i, city: "T" }).await.unwrap();
		}
		for i in 0..20i64 {
			writer.save("Order", object! { id: i, city: "K" }).await.unwrap();
		}
		for i in 20..30i64 {
			writer.delete("Order", &[Value::from(i)]).await.unwrap();
		}
	});
	builder.await.unwrap().unwrap();
	writes.await.unwrap();

	// Ground truth from the records themselves
	let records = v2.scan("Order").await.unwrap();
	let expected_t =
		records.iter().filter(|r| r.get("city") == Some(&Value::from("T"))).count() as i64;
	let expected_k =
		records.iter().filter(|r| r.get("city") == Some(&Value::from("K"))).count() as i64;
	assert_eq!(v2.count("countByCity", &[Value::from("T")]).await.unwrap(), expected_t);
	assert_eq!(v2.count("countByCity", &[Value::from("K")]).await.unwrap(), expected_k);
}

#[tokio::test]
async fn scrubber_detects_and_repairs() {
	let ds = new_datastore().await;
	let store = RecordStore::new(ds.clone(), v1_schema(), test_root(), Default::default()).unwrap();
	populate(&store, 40).await;

	// A clean index reports nothing
	let report = store.scrub_index("byCity", ScrubMode::Report).await.unwrap();
	assert_eq!(
		report,
		ScrubReport {
			scanned: 40,
			..Default::default()
		}
	);

	// Sabotage: delete one record behind the store's back and drop one
	// index entry
	let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
	let victim = key::record::new(&test_root(), "Order", &[Value::from(0)]).unwrap();
	tx.del(victim).await.unwrap();
	let entry =
		key::index::new(&test_root(), "byCity", &[Value::from("K"), Value::from(1)]).unwrap();
	tx.del(entry).await.unwrap();
	tx.commit().await.unwrap();

	let report = store.scrub_index("byCity", ScrubMode::Report).await.unwrap();
	assert_eq!(report.dangling, 1);
	assert_eq!(report.missing, 1);
	assert_eq!(report.repaired, 0);

	let report = store.scrub_index("byCity", ScrubMode::Repair).await.unwrap();
	assert_eq!(report.repaired, 2);

	// After repair the index is consistent again
	let report = store.scrub_index("byCity", ScrubMode::Report).await.unwrap();
	assert_eq!(report.dangling, 0);
	assert_eq!(report.missing, 0);
}

#[tokio::test]
async fn duplicate_spawned_builds_are_rejected() {
	let ds = new_datastore().await;
	let v1 = RecordStore::new(ds.clone(), v1_schema(), test_root(), Default::default()).unwrap();
	populate(&v1, 2000).await;

	let mut cfg = Config::new().with_online_batch_size(10);
	cfg.online_throttle = Duration::from_millis(5);
	let v2 = RecordStore::new(ds.clone(), v2_schema(), test_root(), cfg).unwrap();
	enable(&ds, "countByCity").await;

	v2.spawn_build("countByCity").unwrap();
	let second = v2.spawn_build("countByCity");
	assert!(matches!(second, Err(tupledb_core::Error::BuildAlreadyRunning(_))));
	v2.wait_build("countByCity").await.unwrap();
	assert_eq!(v2.index_state("countByCity").await.unwrap(), IndexState::Readable);
}
