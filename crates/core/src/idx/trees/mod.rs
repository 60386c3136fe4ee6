pub mod hnsw;
pub mod spatial;
pub mod vector;

pub(crate) mod knn;
