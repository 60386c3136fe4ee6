mod util;

use semver::Version;
use std::sync::Arc;
use tupledb_core::idx::trees::spatial::Region;
use tupledb_core::object;
use tupledb_core::schema::{
	FieldPath, IndexDefinition, Kind, RecordType, Schema, SpatialOptions,
};
use tupledb_core::val::Value;
use util::*;

fn place_type() -> RecordType {
	RecordType::new("Place")
		.field("id", Kind::Int)
		.field("x", Kind::Float64)
		.field("y", Kind::Float64)
		.field("alt", Kind::Float64)
		.primary_key(["id"])
}

fn cartesian_schema() -> Arc<Schema> {
	Schema::builder()
		.version(Version::new(1, 0, 0))
		.record_type(place_type())
		.index(IndexDefinition::spatial(
			"byPosition",
			["x", "y"],
			SpatialOptions::cartesian(12, (0.0, 1000.0), (0.0, 1000.0)),
		))
		.build()
		.unwrap()
}

fn geo_schema() -> Arc<Schema> {
	Schema::builder()
		.version(Version::new(1, 0, 0))
		.record_type(place_type())
		.index(IndexDefinition::spatial("byLatLon", ["x", "y"], SpatialOptions::geographic(12)))
		.build()
		.unwrap()
}

fn volumetric_schema() -> Arc<Schema> {
	Schema::builder()
		.version(Version::new(1, 0, 0))
		.record_type(place_type())
		.index(IndexDefinition::spatial(
			"byAirspace",
			["x", "y", "alt"],
			SpatialOptions::cartesian(10, (0.0, 1000.0), (0.0, 1000.0))
				.with_altitude((0.0, 10_000.0)),
		))
		.build()
		.unwrap()
}

fn paths(names: &[&str]) -> Vec<FieldPath> {
	names.iter().map(|n| FieldPath::parse(n)).collect()
}

fn ids(records: &[tupledb_core::val::Object]) -> Vec<i64> {
	let mut out: Vec<i64> =
		records.iter().map(|r| r.get("id").unwrap().as_int().unwrap()).collect();
	out.sort();
	out
}

#[tokio::test]
async fn region_queries_return_exactly_the_contained_points() {
	let store = new_store(cartesian_schema()).await;
	// A 20x20 lattice over the whole space
	for i in 0..400i64 {
		let x = (i % 20) as f64 * 50.0;
		let y = (i / 20) as f64 * 50.0;
		store.save("Place", object! { id: i, x: x, y: y }).await.unwrap();
	}
	let region = Region::rect((100.0, 300.0), (200.0, 400.0));
	let found = store.within("Place", &paths(&["x", "y"]), region).await.unwrap();
	// Ground truth straight from the lattice
	let expected: Vec<i64> = (0..400i64)
		.filter(|i| {
			let x = (i % 20) as f64 * 50.0;
			let y = (i / 20) as f64 * 50.0;
			(100.0..=300.0).contains(&x) && (200.0..=400.0).contains(&y)
		})
		.collect();
	assert_eq!(ids(&found), expected);
}

#[tokio::test]
async fn geographic_indexes_use_the_hilbert_curve() {
	let store = new_store(geo_schema()).await;
	let cities = [
		(1i64, 139.7, 35.7),  // Tokyo
		(2, 2.35, 48.85),     // Paris
		(3, -0.13, 51.5),     // London
		(4, -74.0, 40.7),     // New York
		(5, 151.2, -33.9),    // Sydney
	];
	for (id, lon, lat) in cities {
		store.save("Place", object! { id: id, x: lon, y: lat }).await.unwrap();
	}
	// A box around western Europe
	let region = Region::rect((-5.0, 10.0), (45.0, 55.0));
	let found = store.within("Place", &paths(&["x", "y"]), region).await.unwrap();
	assert_eq!(ids(&found), vec![2, 3]);
}

#[tokio::test]
async fn volumetric_regions_filter_by_altitude() {
	let store = new_store(volumetric_schema()).await;
	for (id, alt) in [(1i64, 100.0), (2, 5000.0), (3, 9500.0)] {
		store
			.save("Place", object! { id: id, x: 500.0, y: 500.0, alt: alt })
			.await
			.unwrap();
	}
	let region =
		Region::rect((400.0, 600.0), (400.0, 600.0)).with_altitude((4000.0, 6000.0));
	let found = store.within("Place", &paths(&["x", "y", "alt"]), region).await.unwrap();
	assert_eq!(ids(&found), vec![2]);
}

#[tokio::test]
async fn moving_a_point_moves_its_cell() {
	let store = new_store(cartesian_schema()).await;
	store.save("Place", object! { id: 1, x: 10.0, y: 10.0 }).await.unwrap();
	store.save("Place", object! { id: 1, x: 900.0, y: 900.0 }).await.unwrap();

	let near_origin = Region::rect((0.0, 100.0), (0.0, 100.0));
	assert!(store
		.within("Place", &paths(&["x", "y"]), near_origin)
		.await
		.unwrap()
		.is_empty());
	let far_corner = Region::rect((850.0, 950.0), (850.0, 950.0));
	assert_eq!(
		ids(&store.within("Place", &paths(&["x", "y"]), far_corner).await.unwrap()),
		vec![1]
	);
}
