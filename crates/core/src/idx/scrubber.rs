//! Index scrubbing: verification and repair of an index against the
//! records it covers.
//!
//! Two batched passes run in short transactions with range-set progress,
//! like the online builder. The dangling pass walks the index and drops
//! entries whose record no longer exists; the missing pass walks the
//! records and restores entries a record should have. Only
//! point-checkable kinds (value, min/max, rank, spatial, vector) are
//! scrubbed; aggregate and version indexes cannot be re-derived
//! entry-by-entry and are verified by rebuild instead.

use crate::cnf::Config;
use crate::err::Error;
use crate::idx::maintainer::IndexMaintainer;
use crate::idx::rangeset::RangeSet;
use crate::idx::IndexKeyBase;
use crate::key;
use crate::key::Subspace;
use crate::kvs::ds::retry_backoff;
use crate::kvs::{Datastore, Key, LockType, Transaction, TransactionType, TxLimits};
use crate::schema::{IndexDefinition, IndexKind, Schema};
use crate::store::codec::RecordCodec;
use crate::val::Value;
use std::ops::Range;
use std::sync::Arc;

/// Whether detected problems are repaired or only counted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScrubMode {
	Report,
	Repair,
}

/// The outcome of one scrub run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScrubReport {
	/// Index entries examined
	pub scanned: u64,
	/// Entries pointing at records that do not exist
	pub dangling: u64,
	/// Entries a record should have had but did not
	pub missing: u64,
	/// Problems fixed (zero in report mode)
	pub repaired: u64,
}

pub struct Scrubber {
	ds: Arc<Datastore>,
	schema: Arc<Schema>,
	root: Subspace,
	cfg: Config,
	codec: Arc<dyn RecordCodec>,
	def: IndexDefinition,
	maintainer: IndexMaintainer,
	mode: ScrubMode,
}

impl Scrubber {
	pub(crate) fn new(
		ds: Arc<Datastore>,
		schema: Arc<Schema>,
		root: Subspace,
		cfg: Config,
		codec: Arc<dyn RecordCodec>,
		def: IndexDefinition,
		mode: ScrubMode,
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
			mode,
		}
	}

	async fn begin(&self, write: TransactionType) -> Result<Transaction, Error> {
		let limits = TxLimits {
			timeout: self.cfg.transaction_timeout,
			size_limit: self.cfg.transaction_size_limit,
		};
		self.ds.transaction_with(write, LockType::Optimistic, limits).await
	}

	/// Runs both passes and returns the combined report
	pub async fn run(&self) -> Result<ScrubReport, Error> {
		let mut report = ScrubReport::default();
		if self.point_checkable() {
			self.dangling_pass(&mut report).await?;
			self.missing_pass(&mut report).await?;
		}
		info!(
			target: "tupledb::core::idx",
			index = %self.def.name,
			scanned = report.scanned,
			dangling = report.dangling,
			missing = report.missing,
			repaired = report.repaired,
			"index scrub finished"
		);
		Ok(report)
	}

	fn point_checkable(&self) -> bool {
		matches!(
			self.def.kind,
			IndexKind::Value { .. }
				| IndexKind::Min
				| IndexKind::Max
				| IndexKind::Spatial(_)
				| IndexKind::Vector(_)
				| IndexKind::Rank
		)
	}

	/// The next uncovered interval of a pass, read in its own transaction
	async fn next_gap(
		&self,
		progress: &RangeSet,
		total: &Range<Key>,
	) -> Result<Option<Range<Key>>, Error> {
		let mut tx = self.begin(TransactionType::Read).await?;
		let missing = progress.missing(&mut tx, &total.start, &total.end).await?;
		tx.cancel().await?;
		Ok(missing.into_iter().next())
	}

	/// Walks the index entries and verifies each one's record exists
	async fn dangling_pass(&self, report: &mut ScrubReport) -> Result<(), Error> {
		let base = IndexKeyBase::new(&self.root, &self.def.name);
		let total = base.range()?;
		let progress =
			RangeSet::new(key::progress::ranges(&self.root, &format!("scrub-{}", self.def.name))?);
		while let Some(gap) = self.next_gap(&progress, &total).await? {
			let mut attempt = 0u32;
			loop {
				let mut tx = self.begin(TransactionType::Write).await?;
				let mut partial = ScrubReport::default();
				let res = self.dangling_batch(&mut tx, &progress, &gap, &mut partial).await;
				match res {
					Ok(()) => match tx.commit().await {
						Ok(()) => {
							report.scanned += partial.scanned;
							report.dangling += partial.dangling;
							report.repaired += partial.repaired;
							break;
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
		self.clear(&progress).await
	}

	async fn dangling_batch(
		&self,
		tx: &mut Transaction,
		progress: &RangeSet,
		gap: &Range<Key>,
		report: &mut ScrubReport,
	) -> Result<(), Error> {
		let batch = tx.scan(gap.clone(), self.cfg.online_batch_size).await?;
		let full = batch.len() == self.cfg.online_batch_size as usize;
		let mut covered_to = gap.end.clone();
		if full {
			if let Some((last, _)) = batch.last() {
				covered_to = last.clone();
				covered_to.push(0x00);
			}
		}
		for (k, _) in batch {
			report.scanned += 1;
			let Some(pk) = self.entry_pk(&k)? else {
				continue;
			};
			if self.record_exists(tx, &pk).await? {
				continue;
			}
			report.dangling += 1;
			if self.mode == ScrubMode::Repair {
				match &self.maintainer {
					// Structured kinds repair through their own removal so
					// counts and edges stay consistent
					IndexMaintainer::Vector(vm) => vm.hnsw().remove(tx, &pk).await?,
					IndexMaintainer::Rank(rm) => {
						let member = self.base().unpack(&k)?[1..].to_vec();
						rm.ranked_set().remove(tx, &member).await?;
					}
					_ => tx.del(k).await?,
				}
				report.repaired += 1;
			}
		}
		progress.insert(tx, &gap.start, &covered_to).await
	}

	fn base(&self) -> IndexKeyBase {
		IndexKeyBase::new(&self.root, &self.def.name)
	}

	/// Walks the records and verifies each expected entry is present
	async fn missing_pass(&self, report: &mut ScrubReport) -> Result<(), Error> {
		let progress = RangeSet::new(key::progress::ranges(
			&self.root,
			&format!("scrub-{}-missing", self.def.name),
		)?);
		for rt_name in self.target_types() {
			let total = key::record::range(&self.root, &rt_name)?;
			while let Some(gap) = self.next_gap(&progress, &total).await? {
				let mut attempt = 0u32;
				loop {
					let mut tx = self.begin(TransactionType::Write).await?;
					let mut partial = ScrubReport::default();
					let res = self.missing_batch(&mut tx, &progress, &gap, &mut partial).await;
					match res {
						Ok(()) => match tx.commit().await {
							Ok(()) => {
								report.missing += partial.missing;
								report.repaired += partial.repaired;
								break;
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
		}
		self.clear(&progress).await
	}

	async fn missing_batch(
		&self,
		tx: &mut Transaction,
		progress: &RangeSet,
		gap: &Range<Key>,
		report: &mut ScrubReport,
	) -> Result<(), Error> {
		let batch = tx.scan(gap.clone(), self.cfg.online_batch_size).await?;
		let full = batch.len() == self.cfg.online_batch_size as usize;
		let mut covered_to = gap.end.clone();
		if full {
			if let Some((last, _)) = batch.last() {
				covered_to = last.clone();
				covered_to.push(0x00);
			}
		}
		for (k, v) in batch {
			let (type_name, pk) = key::record::parse(&self.root, &k)?;
			if !self.def.applies_to(&type_name) {
				continue;
			}
			let rt = self.schema.record_type(&type_name)?;
			let record = self.codec.deserialize(&v)?;
			let Some(expected) = self.maintainer.entries_for(rt, &pk, &record)? else {
				continue;
			};
			for key in expected {
				if tx.exists(key).await? {
					continue;
				}
				report.missing += 1;
				if self.mode == ScrubMode::Repair {
					self.maintainer.update(tx, rt, &pk, None, Some(&record)).await?;
					report.repaired += 1;
				}
			}
		}
		progress.insert(tx, &gap.start, &covered_to).await
	}

	/// The primary key of an index entry, when the kind allows deriving it
	fn entry_pk(&self, key: &[u8]) -> Result<Option<Vec<Value>>, Error> {
		let base = IndexKeyBase::new(&self.root, &self.def.name);
		let elements = base.unpack(key)?;
		Ok(match &self.def.kind {
			IndexKind::Value {
				..
			}
			| IndexKind::Min
			| IndexKind::Max => Some(elements[self.def.key_paths.len()..].to_vec()),
			// A cell id, then the primary key
			IndexKind::Spatial(_) => Some(elements[1..].to_vec()),
			// Only level-0 members map back to records; span counters and
			// sentinels are skipped
			IndexKind::Rank => match elements.split_first() {
				Some((Value::Int(0), rest)) if rest.len() > self.def.key_paths.len() => {
					Some(rest[self.def.key_paths.len()..].to_vec())
				}
				_ => None,
			},
			// Only node metadata entries map back to records; edges and
			// the graph metadata are skipped
			IndexKind::Vector(_) => match elements.split_last() {
				Some((Value::Strand(marker), pk)) if marker == "m" && !pk.is_empty() => {
					Some(pk.to_vec())
				}
				_ => None,
			},
			_ => None,
		})
	}

	/// Whether any applicable record type stores a record under this pk
	async fn record_exists(&self, tx: &mut Transaction, pk: &[Value]) -> Result<bool, Error> {
		for rt_name in self.target_types() {
			if let Ok(key) = key::record::new(&self.root, &rt_name, pk) {
				if tx.exists(key).await? {
					return Ok(true);
				}
			}
		}
		Ok(false)
	}

	fn target_types(&self) -> Vec<String> {
		match self.def.record_types() {
			Some(types) => types.iter().cloned().collect(),
			None => self.schema.record_types().map(|rt| rt.name().to_string()).collect(),
		}
	}

	async fn clear(&self, progress: &RangeSet) -> Result<(), Error> {
		let mut tx = self.begin(TransactionType::Write).await?;
		progress.clear(&mut tx).await?;
		tx.commit().await?;
		Ok(())
	}
}
