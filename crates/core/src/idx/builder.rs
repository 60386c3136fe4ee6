//! Online index building: batched backfill of an index over pre-existing
//! records, without blocking live writes.
//!
//! The target index is first moved to write-only so concurrent writers
//! keep it current for new mutations. The builder then walks each target
//! record type's key range in bounded batches, one short transaction per
//! batch, recording finished intervals in a range set. Progress survives
//! crashes: a restarted builder asks the range set for the missing
//! intervals and continues there. Cooperating builders on the same index
//! share the range set and never duplicate work, since a batch commit and
//! the interval insert are one transaction.
//!
//! Writers skip count and sum maintenance while their record sits in a
//! not-yet-built interval; the builder will reach the record and account
//! for its final state exactly once. The range-set read makes this race
//! conflict-checked: a writer observing a stale interval set conflicts
//! with the builder's insert and retries.

use crate::cnf::Config;
use crate::err::Error;
use crate::idx::maintainer::IndexMaintainer;
use crate::idx::rangeset::RangeSet;
use crate::idx::{state, IndexKeyBase};
use crate::key;
use crate::key::Subspace;
use crate::kvs::ds::retry_backoff;
use crate::kvs::{Datastore, Key, LockType, Transaction, TransactionType, TxLimits};
use crate::schema::{IndexDefinition, IndexKind, IndexState, Schema, VectorStrategy};
use crate::store::codec::RecordCodec;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// The range-set operation id of an index build
pub(crate) fn build_op_id(index: &str) -> String {
	format!("build-{index}")
}

/// Observed progress of an online build
#[derive(Clone, Copy, Debug, Default)]
pub struct BuildProgress {
	/// Records processed so far
	pub built: u64,
	/// Ranges that failed and were skipped
	pub skipped_ranges: u64,
}

/// Builds one index over existing records in batched transactions
pub struct OnlineIndexer {
	ds: Arc<Datastore>,
	schema: Arc<Schema>,
	root: Subspace,
	cfg: Config,
	codec: Arc<dyn RecordCodec>,
	def: IndexDefinition,
	maintainer: IndexMaintainer,
	cancelled: Arc<AtomicBool>,
	built: AtomicU64,
	skipped: AtomicU64,
}

impl OnlineIndexer {
	pub(crate) fn new(
		ds: Arc<Datastore>,
		schema: Arc<Schema>,
		root: Subspace,
		cfg: Config,
		codec: Arc<dyn RecordCodec>,
		def: IndexDefinition,
	) -> Self {
		let maintainer = IndexMaintainer::new(&def, &root, &cfg);
		Self {
			ds,
			schema,
			root,
			cfg,
			codec,
			def,
			maintainer,
			cancelled: Arc::new(AtomicBool::new(false)),
			built: AtomicU64::new(0),
			skipped: AtomicU64::new(0),
		}
	}

	/// The shared flag that stops the build at the next batch boundary
	pub fn cancellation(&self) -> Arc<AtomicBool> {
		self.cancelled.clone()
	}

	pub fn progress(&self) -> BuildProgress {
		BuildProgress {
			built: self.built.load(Ordering::Relaxed),
			skipped_ranges: self.skipped.load(Ordering::Relaxed),
		}
	}

	fn limits(&self) -> TxLimits {
		TxLimits {
			timeout: self.cfg.transaction_timeout,
			size_limit: self.cfg.transaction_size_limit,
		}
	}

	async fn begin(&self, write: TransactionType) -> Result<Transaction, Error> {
		self.ds.transaction_with(write, LockType::Optimistic, self.limits()).await
	}

	fn check_cancelled(&self) -> Result<(), Error> {
		if self.cancelled.load(Ordering::Relaxed) {
			return Err(Error::Cancelled);
		}
		Ok(())
	}

	/// Runs the build to completion and promotes the index to readable
	pub async fn run(&self) -> Result<BuildProgress, Error> {
		debug!(target: "tupledb::core::idx", index = %self.def.name, "starting online index build");
		// The index must be write-only before backfilling starts
		let mut tx = self.begin(TransactionType::Write).await?;
		match state::get(&mut tx, &self.root, &self.def.name).await? {
			IndexState::Readable => {
				// Nothing to backfill
				tx.cancel().await?;
				return Ok(self.progress());
			}
			IndexState::WriteOnly => tx.cancel().await?,
			IndexState::Disabled => {
				state::enable(&mut tx, &self.root, &self.def.name).await?;
				tx.commit().await?;
			}
		}
		let progress = RangeSet::new(key::progress::ranges(&self.root, &build_op_id(&self.def.name))?);
		for rt in self.target_types() {
			let total = key::record::range(&self.root, &rt)?;
			self.fill_range(&progress, total).await?;
		}
		// Vector indexes link their graph in a second phase
		if let IndexKind::Vector(opts) = &self.def.kind {
			if matches!(opts.strategy, VectorStrategy::Hnsw { .. }) {
				let link_progress = RangeSet::new(key::progress::ranges(
					&self.root,
					&format!("{}-link", build_op_id(&self.def.name)),
				)?);
				for rt in self.target_types() {
					let total = key::record::range(&self.root, &rt)?;
					self.link_range(&link_progress, total).await?;
				}
				self.clear_progress(&link_progress).await?;
			}
		}
		// Promote and drop the progress intervals in one transaction
		let mut tx = self.begin(TransactionType::Write).await?;
		state::make_readable(&mut tx, &self.root, &self.def.name).await?;
		progress.clear(&mut tx).await?;
		tx.commit().await?;
		info!(
			target: "tupledb::core::idx",
			index = %self.def.name,
			built = self.built.load(Ordering::Relaxed),
			"online index build complete"
		);
		Ok(self.progress())
	}

	fn target_types(&self) -> Vec<String> {
		match self.def.record_types() {
			Some(types) => types.iter().cloned().collect(),
			None => self.schema.record_types().map(|rt| rt.name().to_string()).collect(),
		}
	}

	/// Backfills every missing interval of one record type's range
	async fn fill_range(&self, progress: &RangeSet, total: Range<Key>) -> Result<(), Error> {
		loop {
			self.check_cancelled()?;
			// Find the next uncovered interval outside any batch transaction
			let mut tx = self.begin(TransactionType::Read).await?;
			let missing = progress.missing(&mut tx, &total.start, &total.end).await?;
			tx.cancel().await?;
			let Some(gap) = missing.into_iter().next() else {
				break;
			};
			match self.fill_batch(progress, &gap).await {
				Ok(()) => {}
				Err(e) if matches!(e, Error::Cancelled) => return Err(e),
				Err(e) => {
					// Record the failed interval and skip past it
					warn!(
						target: "tupledb::core::idx",
						index = %self.def.name,
						error = %e,
						"batch failed, recording the range and continuing"
					);
					self.record_failed_range(progress, &gap, &e).await?;
					self.skipped.fetch_add(1, Ordering::Relaxed);
				}
			}
			if !self.cfg.online_throttle.is_zero() {
				tokio::time::sleep(self.cfg.online_throttle).await;
			}
		}
		Ok(())
	}

	/// Processes one bounded batch in its own transaction, retrying
	/// transient conflicts
	async fn fill_batch(&self, progress: &RangeSet, gap: &Range<Key>) -> Result<(), Error> {
		let mut attempt = 0u32;
		loop {
			self.check_cancelled()?;
			let mut tx = self.begin(TransactionType::Write).await?;
			let res = self.fill_batch_once(&mut tx, progress, gap).await;
			match res {
				Ok(count) => match tx.commit().await {
					Ok(()) => {
						self.built.fetch_add(count, Ordering::Relaxed);
						return Ok(());
					}
					Err(e) if e.is_retryable() => {}
					Err(e) => return Err(e),
				},
				Err(e) => {
					let _ = tx.cancel().await;
					if !e.is_retryable() {
						return Err(e);
					}
				}
			}
			attempt += 1;
			tokio::time::sleep(retry_backoff(attempt)).await;
		}
	}

	async fn fill_batch_once(
		&self,
		tx: &mut Transaction,
		progress: &RangeSet,
		gap: &Range<Key>,
	) -> Result<u64, Error> {
		let batch = tx.scan(gap.clone(), self.cfg.online_batch_size).await?;
		let full = batch.len() == self.cfg.online_batch_size as usize;
		let mut count = 0u64;
		let mut covered_to = gap.end.clone();
		for (k, v) in &batch {
			let (type_name, pk) = key::record::parse(&self.root, k)?;
			if !self.def.applies_to(&type_name) {
				continue;
			}
			let rt = self.schema.record_type(&type_name)?;
			let record = self.codec.deserialize(v)?;
			self.maintainer.update(tx, rt, &pk, None, Some(&record)).await?;
			count += 1;
		}
		if full {
			if let Some((last, _)) = batch.last() {
				covered_to = last.clone();
				covered_to.push(0x00);
			}
		}
		progress.insert(tx, &gap.start, &covered_to).await?;
		Ok(count)
	}

	/// Second build phase for vector indexes: link every staged node into
	/// the graph, one node per iteration batch
	async fn link_range(&self, progress: &RangeSet, total: Range<Key>) -> Result<(), Error> {
		let IndexMaintainer::Vector(vm) = &self.maintainer else {
			return Ok(());
		};
		loop {
			self.check_cancelled()?;
			let mut tx = self.begin(TransactionType::Read).await?;
			let missing = progress.missing(&mut tx, &total.start, &total.end).await?;
			tx.cancel().await?;
			let Some(gap) = missing.into_iter().next() else {
				break;
			};
			// Graph linking fans out to many keys; keep batches small
			let batch_size = self.cfg.online_batch_size.min(64);
			let mut attempt = 0u32;
			loop {
				self.check_cancelled()?;
				let mut tx = self.begin(TransactionType::Write).await?;
				let res: Result<(), Error> = async {
					let batch = tx.scan(gap.clone(), batch_size).await?;
					let full = batch.len() == batch_size as usize;
					let mut covered_to = gap.end.clone();
					for (k, _) in &batch {
						let (type_name, pk) = key::record::parse(&self.root, k)?;
						if !self.def.applies_to(&type_name) {
							continue;
						}
						if let Some(node) = vm.hnsw().node(&mut tx, &pk).await? {
							if !node.linked {
								vm.hnsw().link(&mut tx, &pk, &node).await?;
							}
						}
					}
					if full {
						if let Some((last, _)) = batch.last() {
							covered_to = last.clone();
							covered_to.push(0x00);
						}
					}
					progress.insert(&mut tx, &gap.start, &covered_to).await?;
					Ok(())
				}
				.await;
				match res {
					Ok(()) => match tx.commit().await {
						Ok(()) => break,
						Err(e) if e.is_retryable() => {}
						Err(e) => return Err(e),
					},
					Err(e) => {
						let _ = tx.cancel().await;
						if !e.is_retryable() {
							return Err(e);
						}
					}
				}
				attempt += 1;
				tokio::time::sleep(retry_backoff(attempt)).await;
			}
			if !self.cfg.online_throttle.is_zero() {
				tokio::time::sleep(self.cfg.online_throttle).await;
			}
		}
		Ok(())
	}

	async fn record_failed_range(
		&self,
		progress: &RangeSet,
		gap: &Range<Key>,
		error: &Error,
	) -> Result<(), Error> {
		let errors = key::progress::errors(&self.root, &build_op_id(&self.def.name))?;
		let mut tx = self.begin(TransactionType::Write).await?;
		let key = errors.flat_pack(&[crate::val::Value::Bytes(gap.start.clone())])?;
		let val = bincode::serialize(&(gap.end.clone(), error.to_string()))?;
		tx.set(key, val).await?;
		// Mark it covered so the scan can move on
		progress.insert(&mut tx, &gap.start, &gap.end).await?;
		tx.commit().await
	}

	async fn clear_progress(&self, progress: &RangeSet) -> Result<(), Error> {
		let mut tx = self.begin(TransactionType::Write).await?;
		progress.clear(&mut tx).await?;
		tx.commit().await
	}

	/// The key handle of the index being built
	#[allow(dead_code)]
	pub(crate) fn key_base(&self) -> IndexKeyBase {
		IndexKeyBase::new(&self.root, &self.def.name)
	}
}
