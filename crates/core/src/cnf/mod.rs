use crate::err::Error;
use crate::schema::VectorStrategy;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::time::Duration;

/// The maximum number of bytes a single transaction may buffer before
/// committing. Mirrors the 10 MB limit of the reference key-value store.
pub const TRANSACTION_SIZE_LIMIT: usize = 10_000_000;

/// The default transaction timeout. A zero duration disables the timeout.
pub const TRANSACTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of records processed per online-indexer transaction.
pub static ONLINE_BATCH_SIZE: Lazy<u32> = lazy_env_parse!("TUPLEDB_ONLINE_BATCH_SIZE", u32, 1000);

/// Default pause between online-indexer batches, in milliseconds.
pub static ONLINE_THROTTLE_MILLIS: Lazy<u64> =
	lazy_env_parse!("TUPLEDB_ONLINE_THROTTLE_MILLIS", u64, 10);

/// Default sampling rate used when building index statistics.
pub const STATS_SAMPLE_RATE: f64 = 0.01;

/// Number of histogram buckets built per indexed column.
pub static STATS_BUCKETS: Lazy<usize> = lazy_env_parse!("TUPLEDB_STATS_BUCKETS", usize, 32);

/// Datastore scan batch size for streaming range scans.
pub const SCAN_BATCH_SIZE: u32 = 1000;

/// Default number of neighbours per HNSW node.
pub const HNSW_M: usize = 16;

/// Default size of the candidate list during HNSW construction.
pub const HNSW_EF_CONSTRUCTION: usize = 200;

/// Consecutive vector-search failures before the circuit breaker opens.
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 3;

/// Cooldown before a failed vector index is retried.
pub const CIRCUIT_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Per-store configuration options.
///
/// All options default to the constants above. Out-of-range values are
/// rejected by [`Config::validate`], which runs when a store is opened.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct Config {
	/// Maximum bytes buffered by a single transaction
	pub transaction_size_limit: usize,
	/// Transaction timeout; zero disables the timeout
	pub transaction_timeout: Duration,
	/// Transaction retry budget; zero means unbounded
	pub retry_limit: u32,
	/// Records per online-indexer batch transaction
	pub online_batch_size: u32,
	/// Pause between online-indexer batches
	pub online_throttle: Duration,
	/// Sampling rate for statistics builds, in (0, 1]
	pub stats_sample_rate: f64,
	/// Neighbours per HNSW node
	pub hnsw_m: usize,
	/// Candidate list size during HNSW construction
	pub hnsw_ef_construction: usize,
	/// Candidate list size during HNSW search; defaults to max(2k, 100)
	pub hnsw_ef: Option<usize>,
	/// Consecutive failures before the vector circuit breaker opens
	pub circuit_failure_threshold: u32,
	/// Cooldown before a failed vector index is retried
	pub circuit_retry_delay: Duration,
	/// Retries after which an open circuit stays on the fallback path
	pub circuit_max_retries: u32,
	/// Per-index overrides of the vector search strategy
	pub vector_strategy: HashMap<String, VectorStrategy>,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			transaction_size_limit: TRANSACTION_SIZE_LIMIT,
			transaction_timeout: TRANSACTION_TIMEOUT,
			retry_limit: 0,
			online_batch_size: *ONLINE_BATCH_SIZE,
			online_throttle: Duration::from_millis(*ONLINE_THROTTLE_MILLIS),
			stats_sample_rate: STATS_SAMPLE_RATE,
			hnsw_m: HNSW_M,
			hnsw_ef_construction: HNSW_EF_CONSTRUCTION,
			hnsw_ef: None,
			circuit_failure_threshold: CIRCUIT_FAILURE_THRESHOLD,
			circuit_retry_delay: CIRCUIT_RETRY_DELAY,
			circuit_max_retries: 0,
			vector_strategy: HashMap::new(),
		}
	}
}

impl Config {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_transaction_size_limit(mut self, limit: usize) -> Self {
		self.transaction_size_limit = limit;
		self
	}

	pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
		self.transaction_timeout = timeout;
		self
	}

	pub fn with_retry_limit(mut self, limit: u32) -> Self {
		self.retry_limit = limit;
		self
	}

	pub fn with_online_batch_size(mut self, size: u32) -> Self {
		self.online_batch_size = size;
		self
	}

	pub fn with_online_throttle(mut self, throttle: Duration) -> Self {
		self.online_throttle = throttle;
		self
	}

	pub fn with_stats_sample_rate(mut self, rate: f64) -> Self {
		self.stats_sample_rate = rate;
		self
	}

	pub fn with_vector_strategy(mut self, index: impl Into<String>, strategy: VectorStrategy) -> Self {
		self.vector_strategy.insert(index.into(), strategy);
		self
	}

	/// The effective strategy of a vector index, overrides applied
	pub fn strategy_for(&self, index: &str, declared: VectorStrategy) -> VectorStrategy {
		self.vector_strategy.get(index).copied().unwrap_or(declared)
	}

	pub fn validate(&self) -> Result<(), Error> {
		if self.transaction_size_limit == 0 || self.transaction_size_limit > TRANSACTION_SIZE_LIMIT
		{
			return Err(Error::InvalidConfig(format!(
				"transaction_size_limit must be in 1..={TRANSACTION_SIZE_LIMIT}"
			)));
		}
		if self.online_batch_size == 0 {
			return Err(Error::InvalidConfig("online_batch_size must be at least 1".to_string()));
		}
		if !(self.stats_sample_rate > 0.0 && self.stats_sample_rate <= 1.0) {
			return Err(Error::InvalidConfig("stats_sample_rate must be in (0, 1]".to_string()));
		}
		if self.hnsw_m < 2 {
			return Err(Error::InvalidConfig("hnsw_m must be at least 2".to_string()));
		}
		Ok(())
	}
}
