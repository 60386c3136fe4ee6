//! The record store: typed CRUD over the keyspace with atomic
//! multi-index maintenance, queries, aggregates, and the online
//! administration entry points.
//!
//! Every top-level operation runs in exactly one transaction. The
//! convenience methods on [`RecordStore`] open, run, and commit that
//! transaction themselves, retrying transient conflicts; the same
//! operations are available on a [`Context`] for callers composing
//! several operations into one transaction.

pub mod codec;

use crate::cnf::Config;
use crate::err::Error;
use crate::idx::builder::{build_op_id, BuildProgress, OnlineIndexer};
use crate::idx::maintainer::{
	CountMaintainer, IndexMaintainer, RankMaintainer, SumMaintainer, VersionMaintainer,
};
use crate::idx::monitor::IndexMonitor;
use crate::idx::planner::exe::{execute, Executor, QueryOutput};
use crate::idx::planner::plan::PlanNode;
use crate::idx::planner::{self, RecordQuery};
use crate::idx::rangeset::RangeSet;
use crate::idx::scrubber::{ScrubMode, ScrubReport, Scrubber};
use crate::idx::trees::spatial::Region;
use crate::idx::trees::vector::Vector;
use crate::idx::{state, stats, IndexKeyBase};
use crate::key;
use crate::key::debug::Sprintable;
use crate::key::Subspace;
use crate::kvs::ds::retry_backoff;
use crate::kvs::{Datastore, LockType, Transaction, TransactionType, TxLimits};
use crate::schema::{FieldPath, IndexDefinition, IndexKind, IndexState, RecordType, Schema};
use crate::val::{Object, Value};
use crate::vs::Versionstamp;
use codec::{BincodeCodec, RecordCodec};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Runs one transactional operation with conflict retries
macro_rules! run {
	($self:expr, $write:expr, |$ctx:ident| $body:block) => {{
		let mut attempt: u32 = 0;
		loop {
			let mut $ctx = $self.begin($write).await?;
			let res = async { $body }.await;
			match res {
				Ok(out) => match $ctx.commit().await {
					Ok(()) => break Ok(out),
					Err(e) if e.is_retryable() && !$self.retry_exhausted(attempt) => {
						attempt += 1;
						tokio::time::sleep(retry_backoff(attempt)).await;
					}
					Err(e) => break Err(e),
				},
				Err(e) => {
					$ctx.cancel_quietly().await;
					if e.is_retryable() && !$self.retry_exhausted(attempt) {
						attempt += 1;
						tokio::time::sleep(retry_backoff(attempt)).await;
					} else {
						break Err(e);
					}
				}
			}
		}
	}};
}

struct Inner {
	ds: Arc<Datastore>,
	schema: Arc<Schema>,
	root: Subspace,
	cfg: Config,
	codec: Arc<dyn RecordCodec>,
	monitor: IndexMonitor,
	maintainers: HashMap<String, IndexMaintainer>,
	builds: DashMap<String, JoinHandle<Result<BuildProgress, Error>>>,
}

/// A handle to one record store. Cheap to clone; holds only immutable
/// configuration and the datastore reference.
#[derive(Clone)]
pub struct RecordStore {
	inner: Arc<Inner>,
}

impl RecordStore {
	/// Opens a store over a datastore, a schema, and a root subspace
	pub fn new(
		ds: Arc<Datastore>,
		schema: Arc<Schema>,
		root: Subspace,
		cfg: Config,
	) -> Result<Self, Error> {
		Self::with_codec(ds, schema, root, cfg, Arc::new(BincodeCodec))
	}

	/// Opens a store with a caller-provided payload codec
	pub fn with_codec(
		ds: Arc<Datastore>,
		schema: Arc<Schema>,
		root: Subspace,
		cfg: Config,
		codec: Arc<dyn RecordCodec>,
	) -> Result<Self, Error> {
		cfg.validate()?;
		let monitor = IndexMonitor::new(
			cfg.circuit_failure_threshold,
			cfg.circuit_retry_delay,
			cfg.circuit_max_retries,
		);
		let maintainers = schema
			.indexes()
			.map(|def| (def.name.clone(), IndexMaintainer::new(def, &root, &cfg)))
			.collect();
		Ok(Self {
			inner: Arc::new(Inner {
				ds,
				schema,
				root,
				cfg,
				codec,
				monitor,
				maintainers,
				builds: DashMap::new(),
			}),
		})
	}

	pub fn schema(&self) -> &Arc<Schema> {
		&self.inner.schema
	}

	pub fn config(&self) -> &Config {
		&self.inner.cfg
	}

	pub(crate) fn root(&self) -> &Subspace {
		&self.inner.root
	}

	fn retry_exhausted(&self, attempt: u32) -> bool {
		let limit = self.inner.cfg.retry_limit;
		limit > 0 && attempt >= limit
	}

	/// Starts a transaction-scoped context for composing operations
	pub async fn begin(&self, write: TransactionType) -> Result<Context, Error> {
		let limits = TxLimits {
			timeout: self.inner.cfg.transaction_timeout,
			size_limit: self.inner.cfg.transaction_size_limit,
		};
		let tx = self.inner.ds.transaction_with(write, LockType::Optimistic, limits).await?;
		Ok(Context {
			tx,
			inner: self.inner.clone(),
			states: HashMap::new(),
		})
	}

	/// Saves a record, updating every maintained index atomically
	pub async fn save(&self, record_type: &str, record: Object) -> Result<(), Error> {
		run!(self, TransactionType::Write, |ctx| { ctx.save(record_type, &record).await })
	}

	/// Saves a record the caller asserts is new, skipping the read-back
	pub async fn create(&self, record_type: &str, record: Object) -> Result<(), Error> {
		run!(self, TransactionType::Write, |ctx| { ctx.create(record_type, &record).await })
	}

	/// Saves several records with per-record semantics identical to `save`
	pub async fn save_all(&self, record_type: &str, records: Vec<Object>) -> Result<(), Error> {
		run!(self, TransactionType::Write, |ctx| {
			for record in &records {
				ctx.save(record_type, record).await?;
			}
			Ok::<(), Error>(())
		})
	}

	/// Loads a record by primary key
	pub async fn load(&self, record_type: &str, pk: &[Value]) -> Result<Option<Object>, Error> {
		run!(self, TransactionType::Read, |ctx| { ctx.load(record_type, pk).await })
	}

	/// Deletes a record, removing its index entries atomically
	pub async fn delete(&self, record_type: &str, pk: &[Value]) -> Result<bool, Error> {
		run!(self, TransactionType::Write, |ctx| { ctx.delete(record_type, pk).await })
	}

	/// Every record of one type, in primary key order
	pub async fn scan(&self, record_type: &str) -> Result<Vec<Object>, Error> {
		run!(self, TransactionType::Read, |ctx| { ctx.scan(record_type).await })
	}

	/// Plans and executes a query
	pub async fn query(&self, query: RecordQuery) -> Result<QueryOutput, Error> {
		run!(self, TransactionType::Read, |ctx| { ctx.query(&query).await })
	}

	/// Plans a query without executing it
	pub async fn plan(&self, query: &RecordQuery) -> Result<PlanNode, Error> {
		run!(self, TransactionType::Read, |ctx| { ctx.plan(query).await })
	}

	/// Executes an already-planned node tree
	pub async fn execute(
		&self,
		plan: PlanNode,
		continuation: Option<Vec<u8>>,
		page_size: Option<usize>,
	) -> Result<QueryOutput, Error> {
		run!(self, TransactionType::Read, |ctx| {
			ctx.execute(&plan, continuation.as_deref(), page_size).await
		})
	}

	/// The grouped total of a count index
	pub async fn count(&self, index: &str, group: &[Value]) -> Result<i64, Error> {
		run!(self, TransactionType::Read, |ctx| { ctx.count(index, group).await })
	}

	/// The grouped total of a sum index
	pub async fn sum(&self, index: &str, group: &[Value]) -> Result<i64, Error> {
		run!(self, TransactionType::Read, |ctx| { ctx.sum(index, group).await })
	}

	/// The grouped minimum of a min index
	pub async fn min(&self, index: &str, group: &[Value]) -> Result<Option<Value>, Error> {
		run!(self, TransactionType::Read, |ctx| { ctx.min(index, group).await })
	}

	/// The grouped maximum of a max index
	pub async fn max(&self, index: &str, group: &[Value]) -> Result<Option<Value>, Error> {
		run!(self, TransactionType::Read, |ctx| { ctx.max(index, group).await })
	}

	/// How many entries of a rank index score strictly below the tuple
	pub async fn rank(&self, index: &str, values: &[Value]) -> Result<u64, Error> {
		run!(self, TransactionType::Read, |ctx| { ctx.rank(index, values).await })
	}

	/// The commit history of one record through a version index
	pub async fn version_history(
		&self,
		record_type: &str,
		pk: &[Value],
	) -> Result<Vec<Versionstamp>, Error> {
		run!(self, TransactionType::Read, |ctx| { ctx.version_history(record_type, pk).await })
	}

	/// Saves a record only if its latest version matches the expectation
	pub async fn save_if_version(
		&self,
		record_type: &str,
		record: Object,
		expected: Versionstamp,
	) -> Result<(), Error> {
		run!(self, TransactionType::Write, |ctx| {
			ctx.save_if_version(record_type, &record, expected).await
		})
	}

	/// The k nearest records by a vector field. The index is resolved by
	/// record type, field path, and kind.
	pub async fn nearest(
		&self,
		record_type: &str,
		path: impl Into<FieldPath>,
		query: Vector,
		k: usize,
	) -> Result<Vec<Object>, Error> {
		let path = path.into();
		run!(self, TransactionType::Read, |ctx| {
			ctx.nearest(record_type, &path, &query, k, None).await
		})
	}

	/// Every record of a type whose coordinates fall inside a region
	pub async fn within(
		&self,
		record_type: &str,
		paths: &[FieldPath],
		region: Region,
	) -> Result<Vec<Object>, Error> {
		run!(self, TransactionType::Read, |ctx| {
			ctx.within(record_type, paths, &region, None).await
		})
	}

	/// The persisted lifecycle state of an index
	pub async fn index_state(&self, index: &str) -> Result<IndexState, Error> {
		self.inner.schema.index(index)?;
		run!(self, TransactionType::Read, |ctx| {
			state::get(&mut ctx.tx, &ctx.inner.root, index).await
		})
	}

	/// Builds an index online, blocking until it is readable
	pub async fn build_index(&self, index: &str) -> Result<BuildProgress, Error> {
		let def = self.inner.schema.index(index)?.clone();
		self.indexer(def).run().await
	}

	/// The indexer driving an online build of one index
	pub fn indexer(&self, def: IndexDefinition) -> OnlineIndexer {
		OnlineIndexer::new(
			self.inner.ds.clone(),
			self.inner.schema.clone(),
			self.inner.root.clone(),
			self.inner.cfg.clone(),
			self.inner.codec.clone(),
			def,
		)
	}

	/// Spawns an online build in the background; a second spawn for the
	/// same index fails while the first is still running
	pub fn spawn_build(&self, index: &str) -> Result<(), Error> {
		let def = self.inner.schema.index(index)?.clone();
		match self.inner.builds.entry(index.to_string()) {
			dashmap::mapref::entry::Entry::Occupied(mut e) => {
				if !e.get().is_finished() {
					return Err(Error::BuildAlreadyRunning(index.to_string()));
				}
				let indexer = self.indexer(def);
				e.insert(tokio::spawn(async move { indexer.run().await }));
			}
			dashmap::mapref::entry::Entry::Vacant(e) => {
				let indexer = self.indexer(def);
				e.insert(tokio::spawn(async move { indexer.run().await }));
			}
		}
		Ok(())
	}

	/// Waits for a spawned build to finish
	pub async fn wait_build(&self, index: &str) -> Result<BuildProgress, Error> {
		let (_, handle) = self
			.inner
			.builds
			.remove(index)
			.ok_or_else(|| Error::UnknownIndex(index.to_string()))?;
		handle.await.map_err(|e| Error::Ds(e.to_string()))?
	}

	/// Verifies an index against its records, optionally repairing
	pub async fn scrub_index(&self, index: &str, mode: ScrubMode) -> Result<ScrubReport, Error> {
		let def = self.inner.schema.index(index)?.clone();
		Scrubber::new(
			self.inner.ds.clone(),
			self.inner.schema.clone(),
			self.inner.root.clone(),
			self.inner.cfg.clone(),
			self.inner.codec.clone(),
			def,
			mode,
		)
		.run()
		.await
	}

	/// Rebuilds the planner statistics of an index
	pub async fn rebuild_statistics(&self, index: &str) -> Result<(), Error> {
		self.inner.schema.index(index)?;
		let base = IndexKeyBase::new(&self.inner.root, index);
		let rate = self.inner.cfg.stats_sample_rate;
		run!(self, TransactionType::Write, |ctx| {
			stats::build(&mut ctx.tx, &ctx.inner.root, &base, rate).await.map(|_| ())
		})
	}
}

/// One transaction's view of the store
pub struct Context {
	pub(crate) tx: Transaction,
	inner: Arc<Inner>,
	/// Per-transaction cache of persisted index states
	states: HashMap<String, IndexState>,
}

impl Context {
	/// Commits the transaction
	pub async fn commit(mut self) -> Result<(), Error> {
		self.tx.commit().await
	}

	/// Cancels the transaction
	pub async fn cancel(mut self) -> Result<(), Error> {
		self.tx.cancel().await
	}

	pub(crate) async fn cancel_quietly(mut self) {
		if !self.tx.closed() {
			let _ = self.tx.cancel().await;
		}
	}

	fn record_type(&self, name: &str) -> Result<&RecordType, Error> {
		self.inner.schema.record_type(name)
	}

	async fn index_state(&mut self, index: &str) -> Result<IndexState, Error> {
		if let Some(state) = self.states.get(index) {
			return Ok(*state);
		}
		let state = state::get(&mut self.tx, &self.inner.root, index).await?;
		self.states.insert(index.to_string(), state);
		Ok(state)
	}

	/// Applies every maintained index's entry changes for one mutation
	async fn maintain(
		&mut self,
		record_type: &str,
		record_key: &[u8],
		pk: &[Value],
		old: Option<&Object>,
		new: Option<&Object>,
	) -> Result<(), Error> {
		let schema = self.inner.schema.clone();
		let rt = schema.record_type(record_type)?;
		for def in schema.indexes_for(record_type) {
			let state = self.index_state(&def.name).await?;
			if !state.maintained() {
				continue;
			}
			// Aggregate adjustments are deferred to the online builder
			// until it has covered the record's key range; the range-set
			// read conflicts with the builder's insert, so the handoff
			// is serialised
			if state == IndexState::WriteOnly
				&& matches!(def.kind, IndexKind::Count | IndexKind::Sum)
			{
				let ranges = key::progress::ranges(&self.inner.root, &build_op_id(&def.name))?;
				let built = RangeSet::new(ranges);
				if !built.contains(&mut self.tx, record_key).await? {
					continue;
				}
			}
			let maintainer = self
				.inner
				.maintainers
				.get(&def.name)
				.ok_or_else(|| Error::UnknownIndex(def.name.clone()))?;
			maintainer.update(&mut self.tx, rt, pk, old, new).await?;
		}
		Ok(())
	}

	async fn save_inner(
		&mut self,
		record_type: &str,
		record: &Object,
		first_write: bool,
	) -> Result<(), Error> {
		let rt = self.record_type(record_type)?;
		rt.validate(record)?;
		let pk = rt.primary_key_tuple(record)?;
		let record_key = key::record::new(&self.inner.root, record_type, &pk)?;
		let old = if first_write {
			None
		} else {
			match self.tx.get(record_key.clone()).await? {
				Some(bytes) => Some(self.inner.codec.deserialize(&bytes)?),
				None => None,
			}
		};
		let bytes = self.inner.codec.serialize(record)?;
		self.tx.set(record_key.clone(), bytes).await?;
		trace!(
			target: "tupledb::core::store",
			record_type,
			key = record_key.sprint(),
			update = old.is_some(),
			"saved record"
		);
		self.maintain(record_type, &record_key, &pk, old.as_ref(), Some(record)).await
	}

	/// Saves a record, reading the prior value for correct index diffs
	pub async fn save(&mut self, record_type: &str, record: &Object) -> Result<(), Error> {
		self.save_inner(record_type, record, false).await
	}

	/// Saves a record the caller asserts does not exist yet
	pub async fn create(&mut self, record_type: &str, record: &Object) -> Result<(), Error> {
		self.save_inner(record_type, record, true).await
	}

	/// Loads a record by primary key
	pub async fn load(&mut self, record_type: &str, pk: &[Value]) -> Result<Option<Object>, Error> {
		self.record_type(record_type)?;
		let key = key::record::new(&self.inner.root, record_type, pk)?;
		match self.tx.get(key).await? {
			Some(bytes) => Ok(Some(self.inner.codec.deserialize(&bytes)?)),
			None => Ok(None),
		}
	}

	/// Deletes a record; returns whether it existed
	pub async fn delete(&mut self, record_type: &str, pk: &[Value]) -> Result<bool, Error> {
		self.record_type(record_type)?;
		let record_key = key::record::new(&self.inner.root, record_type, pk)?;
		let old = match self.tx.get(record_key.clone()).await? {
			Some(bytes) => self.inner.codec.deserialize(&bytes)?,
			None => return Ok(false),
		};
		self.tx.del(record_key.clone()).await?;
		self.maintain(record_type, &record_key, pk, Some(&old), None).await?;
		Ok(true)
	}

	/// Every record of one type, in primary key order
	pub async fn scan(&mut self, record_type: &str) -> Result<Vec<Object>, Error> {
		self.record_type(record_type)?;
		let range = key::record::range(&self.inner.root, record_type)?;
		let mut out = Vec::new();
		for (_, bytes) in self.tx.getr(range).await? {
			out.push(self.inner.codec.deserialize(&bytes)?);
		}
		Ok(out)
	}

	/// Plans a query without executing it
	pub async fn plan(&mut self, query: &RecordQuery) -> Result<PlanNode, Error> {
		planner::plan(&mut self.tx, &self.inner.schema, &self.inner.root, &self.inner.cfg, query)
			.await
	}

	/// Plans and executes a query in this transaction
	pub async fn query(&mut self, query: &RecordQuery) -> Result<QueryOutput, Error> {
		let plan = self.plan(query).await?;
		self.execute(&plan, query.continuation.as_deref(), None).await
	}

	/// Executes a plan tree, resuming from a continuation if provided
	pub async fn execute(
		&mut self,
		plan: &PlanNode,
		continuation: Option<&[u8]>,
		page_size: Option<usize>,
	) -> Result<QueryOutput, Error> {
		let mut exe = Executor {
			tx: &mut self.tx,
			schema: &self.inner.schema,
			root: &self.inner.root,
			cfg: &self.inner.cfg,
			codec: self.inner.codec.as_ref(),
			monitor: &self.inner.monitor,
		};
		execute(&mut exe, plan, continuation, page_size).await
	}

	fn index_of_kind(
		&self,
		index: &str,
		want: fn(&IndexKind) -> bool,
	) -> Result<&IndexDefinition, Error> {
		let def = self.inner.schema.index(index)?;
		if !want(&def.kind) {
			return Err(Error::UnknownIndex(format!(
				"index '{index}' does not support this operation"
			)));
		}
		Ok(def)
	}

	/// The grouped total of a count index
	pub async fn count(&mut self, index: &str, group: &[Value]) -> Result<i64, Error> {
		self.index_of_kind(index, |k| matches!(k, IndexKind::Count))?;
		state::require_readable(&mut self.tx, &self.inner.root, index).await?;
		let m = CountMaintainer::new(
			self.inner.schema.index(index)?.clone(),
			IndexKeyBase::new(&self.inner.root, index),
		);
		match self.tx.get(m.group_key(group)?).await? {
			Some(v) => Ok(decode_le(&v)),
			None => Ok(0),
		}
	}

	/// The grouped total of a sum index
	pub async fn sum(&mut self, index: &str, group: &[Value]) -> Result<i64, Error> {
		self.index_of_kind(index, |k| matches!(k, IndexKind::Sum))?;
		state::require_readable(&mut self.tx, &self.inner.root, index).await?;
		let m = SumMaintainer::new(
			self.inner.schema.index(index)?.clone(),
			IndexKeyBase::new(&self.inner.root, index),
		);
		match self.tx.get(m.group_key(group)?).await? {
			Some(v) => Ok(decode_le(&v)),
			None => Ok(0),
		}
	}

	/// The grouped minimum: the first key of the group's range
	pub async fn min(&mut self, index: &str, group: &[Value]) -> Result<Option<Value>, Error> {
		let def = self.index_of_kind(index, |k| matches!(k, IndexKind::Min))?.clone();
		state::require_readable(&mut self.tx, &self.inner.root, index).await?;
		let base = IndexKeyBase::new(&self.inner.root, index);
		let rng = base.prefix_range(group)?;
		match self.tx.first(rng).await? {
			Some((k, _)) => Ok(Some(base.unpack(&k)?.remove(def.grouping_arity()))),
			None => Ok(None),
		}
	}

	/// The grouped maximum: the last key of the group's range
	pub async fn max(&mut self, index: &str, group: &[Value]) -> Result<Option<Value>, Error> {
		let def = self.index_of_kind(index, |k| matches!(k, IndexKind::Max))?.clone();
		state::require_readable(&mut self.tx, &self.inner.root, index).await?;
		let base = IndexKeyBase::new(&self.inner.root, index);
		let rng = base.prefix_range(group)?;
		match self.tx.last(rng).await? {
			Some((k, _)) => Ok(Some(base.unpack(&k)?.remove(def.grouping_arity()))),
			None => Ok(None),
		}
	}

	/// How many entries of a rank index score strictly below the tuple
	pub async fn rank(&mut self, index: &str, values: &[Value]) -> Result<u64, Error> {
		let def = self.index_of_kind(index, |k| matches!(k, IndexKind::Rank))?.clone();
		state::require_readable(&mut self.tx, &self.inner.root, index).await?;
		let m = RankMaintainer::new(def, IndexKeyBase::new(&self.inner.root, index));
		m.rank(&mut self.tx, values).await
	}

	/// The commit history of one record, oldest first
	pub async fn version_history(
		&mut self,
		record_type: &str,
		pk: &[Value],
	) -> Result<Vec<Versionstamp>, Error> {
		let def = self
			.inner
			.schema
			.resolve_index(record_type, &[], |k| matches!(k, IndexKind::Version))?
			.clone();
		state::require_readable(&mut self.tx, &self.inner.root, &def.name).await?;
		let m = VersionMaintainer::new(IndexKeyBase::new(&self.inner.root, &def.name));
		Ok(m.history(&mut self.tx, pk).await?.into_iter().map(|(vs, _)| vs).collect())
	}

	/// Saves only when the record's latest version matches the caller's
	pub async fn save_if_version(
		&mut self,
		record_type: &str,
		record: &Object,
		expected: Versionstamp,
	) -> Result<(), Error> {
		let def = self
			.inner
			.schema
			.resolve_index(record_type, &[], |k| matches!(k, IndexKind::Version))?
			.clone();
		let rt = self.record_type(record_type)?;
		let pk = rt.primary_key_tuple(record)?;
		let m = VersionMaintainer::new(IndexKeyBase::new(&self.inner.root, &def.name));
		match m.latest(&mut self.tx, &pk).await? {
			Some(latest) if latest == expected => self.save(record_type, record).await,
			_ => Err(Error::VersionMismatch {
				record_type: record_type.to_string(),
			}),
		}
	}

	/// The k nearest records by a vector field
	pub async fn nearest(
		&mut self,
		record_type: &str,
		path: &FieldPath,
		query: &Vector,
		k: usize,
		post: Option<crate::idx::planner::expr::Expr>,
	) -> Result<Vec<Object>, Error> {
		let def = self
			.inner
			.schema
			.resolve_index(record_type, std::slice::from_ref(path), |k| {
				matches!(k, IndexKind::Vector(_))
			})?
			.clone();
		state::require_readable(&mut self.tx, &self.inner.root, &def.name).await?;
		let plan = PlanNode::VectorSearch {
			index: def.name.clone(),
			record_type: record_type.to_string(),
			query: query.clone(),
			k,
			post,
		};
		Ok(self.execute(&plan, None, None).await?.records)
	}

	/// Every record of a type whose coordinates fall inside a region
	pub async fn within(
		&mut self,
		record_type: &str,
		paths: &[FieldPath],
		region: &Region,
		post: Option<crate::idx::planner::expr::Expr>,
	) -> Result<Vec<Object>, Error> {
		let def = self
			.inner
			.schema
			.resolve_index(record_type, paths, |k| matches!(k, IndexKind::Spatial(_)))?
			.clone();
		state::require_readable(&mut self.tx, &self.inner.root, &def.name).await?;
		let plan = PlanNode::SpatialScan {
			index: def.name.clone(),
			record_type: record_type.to_string(),
			region: region.clone(),
			post,
		};
		Ok(self.execute(&plan, None, None).await?.records)
	}
}

fn decode_le(bytes: &[u8]) -> i64 {
	let mut le = [0u8; 8];
	let n = bytes.len().min(8);
	le[..n].copy_from_slice(&bytes[..n]);
	i64::from_le_bytes(le)
}
