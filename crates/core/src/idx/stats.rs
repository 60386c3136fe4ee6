//! Histograms over the leading indexed column, used by the planner for
//! selectivity estimation.
//!
//! A histogram is built by scanning an index and sampling entries at the
//! configured rate. The sorted sample is cut into equal-depth buckets
//! `(lo, hi, count)`, with counts scaled back up by the sample rate.
//! Buckets and a summary are persisted under the stats subspace, one key
//! per bucket, so statistics can be rebuilt or cleared per index without
//! touching anything else.

use crate::cnf;
use crate::err::Error;
use crate::idx::IndexKeyBase;
use crate::key;
use crate::key::Subspace;
use crate::kvs::scanner::Scanner;
use crate::kvs::Transaction;
use crate::val::Value;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// One histogram bucket over the leading indexed column
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Bucket {
	pub lo: Value,
	pub hi: Value,
	pub count: u64,
}

/// The persisted summary of a histogram
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Summary {
	/// Total number of index entries at build time
	pub total: u64,
	/// Estimated number of distinct leading values
	pub distinct: u64,
	pub buckets: u64,
}

/// A loaded histogram
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
	pub total: u64,
	pub distinct: u64,
	pub buckets: Vec<Bucket>,
}

impl Histogram {
	/// Estimated fraction of entries whose leading value equals `v`
	pub fn selectivity_eq(&self, v: &Value) -> f64 {
		if self.total == 0 {
			return 0.0;
		}
		let per_bucket_distinct =
			(self.distinct as f64 / self.buckets.len().max(1) as f64).max(1.0);
		for b in &self.buckets {
			if &b.lo <= v && v <= &b.hi {
				return (b.count as f64 / self.total as f64) / per_bucket_distinct;
			}
		}
		// Outside every bucket: assume at most one entry
		1.0 / self.total as f64
	}

	/// Estimated fraction of entries whose leading value falls in the
	/// window, with linear interpolation at the bucket edges
	pub fn selectivity_range(&self, lo: Option<&Value>, hi: Option<&Value>) -> f64 {
		if self.total == 0 {
			return 0.0;
		}
		let mut matched = 0.0;
		for b in &self.buckets {
			let below = lo.map(|v| fraction_below(b, v)).unwrap_or(0.0);
			let above = hi.map(|v| 1.0 - fraction_below(b, v)).unwrap_or(0.0);
			let overlap = (1.0 - below - above).clamp(0.0, 1.0);
			matched += overlap * b.count as f64;
		}
		(matched / self.total as f64).clamp(0.0, 1.0)
	}
}

/// The fraction of a bucket's span lying strictly below `v`
fn fraction_below(b: &Bucket, v: &Value) -> f64 {
	if v <= &b.lo {
		return 0.0;
	}
	if v > &b.hi {
		return 1.0;
	}
	match (b.lo.as_f64(), b.hi.as_f64(), v.as_f64()) {
		(Some(lo), Some(hi), Some(v)) if hi > lo => ((v - lo) / (hi - lo)).clamp(0.0, 1.0),
		// Non-numeric columns interpolate to the bucket midpoint
		_ => 0.5,
	}
}

/// Builds and persists the histogram for one index by sampling its scan
pub(crate) async fn build(
	tx: &mut Transaction,
	root: &Subspace,
	base: &IndexKeyBase,
	sample_rate: f64,
) -> Result<Histogram, Error> {
	let mut rng = SmallRng::seed_from_u64(0x57a75);
	let mut samples: Vec<Value> = Vec::new();
	let mut total = 0u64;
	let mut scanner = Scanner::new(cnf::SCAN_BATCH_SIZE, base.range()?);
	while let Some((key, _)) = scanner.next(tx).await? {
		total += 1;
		if rng.gen::<f64>() >= sample_rate {
			continue;
		}
		let elements = base.unpack(&key)?;
		if let Some(first) = elements.into_iter().next() {
			samples.push(first);
		}
	}
	// The scan is ordered, so the sample already is as well
	let nbuckets = (*cnf::STATS_BUCKETS).min(samples.len().max(1));
	let scale = (total as f64 / samples.len().max(1) as f64).max(1.0);
	let mut distinct = 0u64;
	let mut buckets = Vec::with_capacity(nbuckets);
	if !samples.is_empty() {
		let per = samples.len().div_ceil(nbuckets);
		for chunk in samples.chunks(per) {
			buckets.push(Bucket {
				lo: chunk.first().cloned().unwrap_or(Value::None),
				hi: chunk.last().cloned().unwrap_or(Value::None),
				count: (chunk.len() as f64 * scale).round() as u64,
			});
		}
		let mut uniques = 1u64;
		for w in samples.windows(2) {
			if w[0] != w[1] {
				uniques += 1;
			}
		}
		distinct = ((uniques as f64) * scale).round() as u64;
	}
	let histogram = Histogram {
		total,
		distinct,
		buckets,
	};
	persist(tx, root, base.name(), &histogram).await?;
	debug!(
		target: "tupledb::core::idx",
		index = base.name(),
		total,
		buckets = histogram.buckets.len(),
		"rebuilt index statistics"
	);
	Ok(histogram)
}

async fn persist(
	tx: &mut Transaction,
	root: &Subspace,
	index: &str,
	histogram: &Histogram,
) -> Result<(), Error> {
	tx.delr(key::stats::range(root, index)?).await?;
	let summary = Summary {
		total: histogram.total,
		distinct: histogram.distinct,
		buckets: histogram.buckets.len() as u64,
	};
	tx.set(key::stats::summary(root, index)?, bincode::serialize(&summary)?).await?;
	for (id, bucket) in histogram.buckets.iter().enumerate() {
		tx.set(key::stats::bucket(root, index, id as i64)?, bincode::serialize(bucket)?).await?;
	}
	Ok(())
}

/// Loads the persisted histogram of an index, if statistics exist
pub(crate) async fn load(
	tx: &mut Transaction,
	root: &Subspace,
	index: &str,
) -> Result<Option<Histogram>, Error> {
	let summary = match tx.get(key::stats::summary(root, index)?).await? {
		Some(bytes) => bincode::deserialize::<Summary>(&bytes)?,
		None => return Ok(None),
	};
	let mut buckets = Vec::with_capacity(summary.buckets as usize);
	for id in 0..summary.buckets {
		if let Some(bytes) = tx.get(key::stats::bucket(root, index, id as i64)?).await? {
			buckets.push(bincode::deserialize::<Bucket>(&bytes)?);
		}
	}
	Ok(Some(Histogram {
		total: summary.total,
		distinct: summary.distinct,
		buckets,
	}))
}
