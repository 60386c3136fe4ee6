#![allow(dead_code)]

use semver::Version;
use std::sync::Arc;
use tupledb_core::cnf::Config;
use tupledb_core::key::Subspace;
use tupledb_core::kvs::Datastore;
use tupledb_core::schema::{IndexDefinition, Kind, RecordType, Schema};
use tupledb_core::store::RecordStore;
use tupledb_core::val::Value;

pub async fn new_datastore() -> Arc<Datastore> {
	Arc::new(Datastore::new("memory").await.unwrap())
}

pub fn test_root() -> Subspace {
	Subspace::from_tuple(&[Value::from("test")]).unwrap()
}

pub async fn new_store(schema: Arc<Schema>) -> RecordStore {
	new_store_with(schema, Config::new()).await
}

pub async fn new_store_with(schema: Arc<Schema>, cfg: Config) -> RecordStore {
	let ds = new_datastore().await;
	RecordStore::new(ds, schema, test_root(), cfg).unwrap()
}

pub fn user_type() -> RecordType {
	RecordType::new("User")
		.field("id", Kind::Int)
		.field("email", Kind::String)
		.field("city", Kind::String)
		.field("age", Kind::Int)
		.primary_key(["id"])
}

pub fn user_schema() -> Arc<Schema> {
	Schema::builder()
		.version(Version::new(1, 0, 0))
		.record_type(user_type())
		.index(IndexDefinition::value("byEmail", ["email"]))
		.build()
		.unwrap()
}
