//! This library is a structured record layer for ordered, transactional
//! key-value stores. It turns a flat binary keyspace into a typed,
//! schema-aware record database: records are stored under order-preserving
//! tuple-encoded keys, secondary indexes of several kinds (value, count,
//! sum, min, max, version, rank, spatial, vector) are maintained atomically
//! with every record write, indexes can be built online against live data,
//! and queries are planned cost-based across the readable indexes.
//!
//! The underlying key-value store is consumed through the [`kvs`]
//! transaction contract. A serializable in-memory datastore is provided
//! behind the `kv-mem` feature for embedding and testing.

#![doc(html_favicon_url = "https://tupledb.org/favicon.png")]
#![doc(html_logo_url = "https://tupledb.org/logo.png")]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[macro_use]
extern crate tracing;

#[macro_use]
mod mac;

pub mod cnf;
pub mod err;
pub mod idx;
pub mod key;
pub mod kvs;
pub mod migrate;
pub mod schema;
pub mod store;
pub mod tuple;
pub mod val;
pub mod vs;

pub use self::err::Error;
