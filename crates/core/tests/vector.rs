mod util;

use semver::Version;
use std::sync::Arc;
use std::time::Duration;
use tupledb_core::cnf::Config;
use tupledb_core::idx::state;
use tupledb_core::idx::trees::vector::Vector;
use tupledb_core::kvs::{LockType::*, TransactionType::*};
use tupledb_core::object;
use tupledb_core::schema::{
	Distance, IndexDefinition, IndexState, Kind, RecordType, Schema, VectorOptions, VectorStrategy,
};
use tupledb_core::store::RecordStore;
use tupledb_core::val::Value;
use util::*;

fn doc_type() -> RecordType {
	RecordType::new("Doc")
		.field("id", Kind::Int)
		.field("embedding", Kind::Array)
		.primary_key(["id"])
}

fn doc_schema(strategy: VectorStrategy) -> Arc<Schema> {
	Schema::builder()
		.version(Version::new(1, 0, 0))
		.record_type(doc_type())
		.index(IndexDefinition::vector(
			"byEmbedding",
			"embedding",
			VectorOptions::new(2, Distance::Euclidean, strategy),
		))
		.build()
		.unwrap()
}

/// A small grid of points with a predictable nearest-neighbour order
async fn populate(store: &RecordStore, n: i64) {
	for i in 0..n {
		let x = (i % 10) as f32;
		let y = (i / 10) as f32;
		store.save("Doc", object! { id: i, embedding: vec![x, y] }).await.unwrap();
	}
}

fn ids(records: &[tupledb_core::val::Object]) -> Vec<i64> {
	records.iter().map(|r| r.get("id").unwrap().as_int().unwrap()).collect()
}

#[tokio::test]
async fn inline_hnsw_answers_nearest_neighbours() {
	let store = new_store(doc_schema(VectorStrategy::Hnsw {
		inline: true,
	}))
	.await;
	populate(&store, 100).await;
	let found = store
		.nearest("Doc", "embedding", Vector::F32(vec![0.1, 0.1]), 3)
		.await
		.unwrap();
	// The corner point, then its two axis neighbours
	let found = ids(&found);
	assert_eq!(found[0], 0);
	assert_eq!(
		{
			let mut rest = found[1..].to_vec();
			rest.sort();
			rest
		},
		vec![1, 10]
	);
}

#[tokio::test]
async fn online_build_links_the_graph_in_two_phases() {
	let ds = new_datastore().await;
	let store = RecordStore::new(
		ds.clone(),
		doc_schema(VectorStrategy::Hnsw {
			inline: false,
		}),
		test_root(),
		Default::default(),
	)
	.unwrap();
	populate(&store, 80).await;

	// Deferred strategy: vectors are staged but the graph is absent, so
	// search falls back to the exact scan and still answers correctly
	let found = store
		.nearest("Doc", "embedding", Vector::F32(vec![5.1, 4.9]), 1)
		.await
		.unwrap();
	assert_eq!(ids(&found), vec![55]);

	// Build the graph online, then search through it
	let mut tx = ds.transaction(Write, Optimistic).await.unwrap();
	state::enable(&mut tx, &test_root(), "byEmbedding").await.unwrap();
	tx.commit().await.unwrap();
	store.build_index("byEmbedding").await.unwrap();
	assert_eq!(store.index_state("byEmbedding").await.unwrap(), IndexState::Readable);

	let found = store
		.nearest("Doc", "embedding", Vector::F32(vec![5.1, 4.9]), 4)
		.await
		.unwrap();
	assert_eq!(found.len(), 4);
	assert_eq!(ids(&found)[0], 55);
}

#[tokio::test]
async fn graph_results_match_the_flat_scan() {
	let ds = new_datastore().await;
	let store = RecordStore::new(
		ds.clone(),
		doc_schema(VectorStrategy::Hnsw {
			inline: true,
		}),
		test_root(),
		Default::default(),
	)
	.unwrap();
	populate(&store, 100).await;

	// The same store opened with a flat-scan override gives the exact
	// answer; on this small set the graph should agree
	let flat_cfg = Config::new().with_vector_strategy("byEmbedding", VectorStrategy::FlatScan);
	let flat = RecordStore::new(
		ds.clone(),
		doc_schema(VectorStrategy::Hnsw {
			inline: true,
		}),
		test_root(),
		flat_cfg,
	)
	.unwrap();

	for query in [vec![0.0f32, 0.0], vec![9.0, 9.0], vec![4.2, 6.7]] {
		let graph = store
			.nearest("Doc", "embedding", Vector::F32(query.clone()), 5)
			.await
			.unwrap();
		let exact = flat.nearest("Doc", "embedding", Vector::F32(query), 5).await.unwrap();
		assert_eq!(ids(&graph), ids(&exact));
	}
}

#[tokio::test]
async fn circuit_breaker_falls_back_to_flat_scan() {
	let ds = new_datastore().await;
	// The schema declares a flat strategy, so writes never build a graph;
	// this handle is then configured to insist on the (missing) graph
	let seed = RecordStore::new(
		ds.clone(),
		doc_schema(VectorStrategy::FlatScan),
		test_root(),
		Default::default(),
	)
	.unwrap();
	populate(&seed, 30).await;

	let mut cfg = Config::new().with_vector_strategy(
		"byEmbedding",
		VectorStrategy::Hnsw {
			inline: true,
		},
	);
	cfg.circuit_failure_threshold = 1;
	cfg.circuit_retry_delay = Duration::from_secs(3600);
	let store =
		RecordStore::new(ds.clone(), doc_schema(VectorStrategy::FlatScan), test_root(), cfg)
			.unwrap();

	// First call: the graph attempt fails and the exact scan answers
	let first = store
		.nearest("Doc", "embedding", Vector::F32(vec![2.1, 1.9]), 2)
		.await
		.unwrap();
	assert_eq!(ids(&first), vec![22, 12]);

	// Within the cooldown the breaker is open; results stay exact
	let second = store
		.nearest("Doc", "embedding", Vector::F32(vec![2.1, 1.9]), 2)
		.await
		.unwrap();
	assert_eq!(ids(&second), ids(&first));
}

#[tokio::test]
async fn deletions_trim_the_graph() {
	let store = new_store(doc_schema(VectorStrategy::Hnsw {
		inline: true,
	}))
	.await;
	populate(&store, 50).await;
	store.delete("Doc", &[Value::from(0)]).await.unwrap();

	let found = store
		.nearest("Doc", "embedding", Vector::F32(vec![0.0, 0.0]), 2)
		.await
		.unwrap();
	assert!(!ids(&found).contains(&0));
	assert_eq!(found.len(), 2);
}
