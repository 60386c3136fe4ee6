#![cfg(feature = "kv-mem")]

//! A serializable in-memory datastore.
//!
//! Values are kept versioned in a `BTreeMap` so that every transaction
//! reads a consistent snapshot. Commits take the store lock once: the
//! transaction's read keys and read ranges are validated against versions
//! newer than its snapshot (first committer wins), then its buffered
//! effects are applied in order under a single new commit version. Atomic
//! mutations are buffered without registering reads, so they never
//! conflict with each other.

use super::{Check, Key, MutationType, TransactionType, Val};
use crate::err::Error;
use crate::vs::Versionstamp;
use ahash::{HashSet, HashSetExt};
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The maximum size of a single value, enforced by append-if-fits
const VALUE_SIZE_LIMIT: usize = 100_000;

#[derive(Default)]
struct Db {
	/// Version history per key; an entry of `None` is a deletion
	data: BTreeMap<Key, Vec<(u64, Option<Val>)>>,
	/// The last committed version
	version: u64,
}

impl Db {
	fn latest(&self, key: &[u8], at: u64) -> Option<Val> {
		self.data
			.get(key)
			.and_then(|vs| vs.iter().rev().find(|(v, _)| *v <= at))
			.and_then(|(_, val)| val.clone())
	}

	fn push(&mut self, key: Key, version: u64, val: Option<Val>) {
		self.data.entry(key).or_default().push((version, val));
	}
}

#[non_exhaustive]
pub struct Datastore {
	db: Arc<Mutex<Db>>,
}

impl Datastore {
	/// Open a new database
	pub(crate) fn new() -> Datastore {
		Datastore {
			db: Arc::new(Mutex::new(Db::default())),
		}
	}

	/// Start a new transaction
	pub(crate) fn transaction(
		&self,
		write: TransactionType,
		timeout: Duration,
		size_limit: usize,
	) -> Transaction {
		// Specify the check level
		#[cfg(not(debug_assertions))]
		let check = Check::Warn;
		#[cfg(debug_assertions)]
		let check = Check::Panic;
		// Create a new transaction
		let snapshot = self.db.lock().unwrap().version;
		Transaction {
			done: false,
			write: matches!(write, TransactionType::Write),
			check,
			db: self.db.clone(),
			snapshot,
			ops: Vec::new(),
			local: BTreeMap::new(),
			read_keys: HashSet::new(),
			read_ranges: Vec::new(),
			size: 0,
			size_limit,
			started: Instant::now(),
			timeout,
			versionstamp: None,
		}
	}
}

enum Op {
	Set(Key, Val),
	Del(Key),
	Delr(Range<Key>),
	Atomic(Key, Val, MutationType),
	Vskey(Key, u32, Val),
}

/// A local overlay entry providing read-your-writes
#[derive(Clone)]
enum Local {
	Set(Val),
	Cleared,
}

#[non_exhaustive]
pub struct Transaction {
	/// Is the transaction complete?
	done: bool,
	/// Is the transaction writeable?
	write: bool,
	/// Should we check unhandled transactions?
	check: Check,
	/// The shared store state
	db: Arc<Mutex<Db>>,
	/// The version this transaction reads at
	snapshot: u64,
	/// Buffered effects, applied in order at commit
	ops: Vec<Op>,
	/// Read-your-writes overlay
	local: BTreeMap<Key, Local>,
	/// Point reads to validate at commit
	read_keys: HashSet<Key>,
	/// Range reads to validate at commit
	read_ranges: Vec<Range<Key>>,
	/// Bytes buffered so far
	size: usize,
	size_limit: usize,
	started: Instant,
	timeout: Duration,
	/// Assigned at commit
	versionstamp: Option<Versionstamp>,
}

impl Drop for Transaction {
	fn drop(&mut self) {
		if !self.done && self.write {
			// Check if already panicking
			if std::thread::panicking() {
				return;
			}
			// Handle the behaviour
			match self.check {
				Check::None => {
					trace!("A transaction was dropped without being committed or cancelled");
				}
				Check::Warn => {
					warn!("A transaction was dropped without being committed or cancelled");
				}
				Check::Panic => {
					panic!("A transaction was dropped without being committed or cancelled");
				}
			}
		}
	}
}

impl Transaction {
	/// Behaviour if unclosed
	pub(crate) fn check_level(&mut self, check: Check) {
		self.check = check;
	}

	fn open(&self) -> Result<(), Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		if !self.timeout.is_zero() && self.started.elapsed() > self.timeout {
			return Err(Error::TxTimeout);
		}
		Ok(())
	}

	fn writeable(&self) -> Result<(), Error> {
		if !self.write {
			return Err(Error::TxReadonly);
		}
		Ok(())
	}

	fn grow(&mut self, bytes: usize) -> Result<(), Error> {
		self.size += bytes;
		if self.size > self.size_limit {
			return Err(Error::TxTooLarge);
		}
		Ok(())
	}

	/// The visible value for a key: local overlay over the snapshot
	fn visible(&self, key: &[u8]) -> Option<Val> {
		match self.local.get(key) {
			Some(Local::Set(v)) => Some(v.clone()),
			Some(Local::Cleared) => None,
			None => self.db.lock().unwrap().latest(key, self.snapshot),
		}
	}

	/// Merged snapshot + overlay view of a range
	fn visible_range(&self, rng: &Range<Key>) -> BTreeMap<Key, Val> {
		let mut merged: BTreeMap<Key, Val> = {
			let db = self.db.lock().unwrap();
			db.data
				.range(rng.clone())
				.filter_map(|(k, _)| {
					db.latest(k, self.snapshot).map(|v| (k.clone(), v))
				})
				.collect()
		};
		for (k, e) in self.local.range(rng.clone()) {
			match e {
				Local::Set(v) => {
					merged.insert(k.clone(), v.clone());
				}
				Local::Cleared => {
					merged.remove(k);
				}
			}
		}
		merged
	}
}

impl super::api::Transaction for Transaction {
	/// Check if closed
	fn closed(&self) -> bool {
		self.done
	}

	/// Cancel a transaction
	async fn cancel(&mut self) -> Result<(), Error> {
		if self.done {
			return Err(Error::TxFinished);
		}
		self.done = true;
		self.ops.clear();
		self.local.clear();
		Ok(())
	}

	/// Commit a transaction. Read-only commits succeed without touching
	/// the store.
	async fn commit(&mut self) -> Result<(), Error> {
		self.open()?;
		if !self.write {
			self.done = true;
			return Ok(());
		}
		self.done = true;
		let mut db = self.db.lock().unwrap();
		// Validate point reads against newer committers
		for key in self.read_keys.iter() {
			if let Some(versions) = db.data.get(key) {
				if versions.iter().any(|(v, _)| *v > self.snapshot) {
					return Err(Error::TxRetryable);
				}
			}
		}
		// Validate range reads against newer committers
		for rng in self.read_ranges.iter() {
			for (_, versions) in db.data.range(rng.clone()) {
				if versions.iter().any(|(v, _)| *v > self.snapshot) {
					return Err(Error::TxRetryable);
				}
			}
		}
		// Apply the buffered effects under one new version
		let version = db.version + 1;
		db.version = version;
		let mut batch: u16 = 0;
		for op in self.ops.drain(..) {
			match op {
				Op::Set(k, v) => db.push(k, version, Some(v)),
				Op::Del(k) => db.push(k, version, None),
				Op::Delr(rng) => {
					let doomed: Vec<Key> = db
						.data
						.range(rng)
						.filter(|(k, _)| db.latest(k, version).is_some())
						.map(|(k, _)| k.clone())
						.collect();
					for k in doomed {
						db.push(k, version, None);
					}
				}
				Op::Atomic(k, param, mtype) => {
					let current = db.latest(&k, version);
					match mutate(current, &param, mtype) {
						Some(next) => db.push(k, version, Some(next)),
						None => db.push(k, version, None),
					}
				}
				Op::Vskey(mut k, offset, v) => {
					let vs = Versionstamp::from_parts(version, batch, 0);
					batch = batch.wrapping_add(1);
					let at = offset as usize;
					k[at..at + 10].copy_from_slice(&vs.as_bytes()[..10]);
					db.push(k, version, Some(v));
				}
			}
		}
		self.versionstamp = Some(Versionstamp::from_parts(version, 0, 0));
		Ok(())
	}

	/// Check if a key exists
	async fn exists(&mut self, key: Key) -> Result<bool, Error> {
		self.open()?;
		let found = self.visible(&key).is_some();
		self.read_keys.insert(key);
		Ok(found)
	}

	/// Fetch a key from the database
	async fn get(&mut self, key: Key) -> Result<Option<Val>, Error> {
		self.open()?;
		let val = self.visible(&key);
		self.read_keys.insert(key);
		Ok(val)
	}

	/// Insert or update a key in the database
	async fn set(&mut self, key: Key, val: Val) -> Result<(), Error> {
		self.open()?;
		self.writeable()?;
		self.grow(key.len() + val.len())?;
		self.local.insert(key.clone(), Local::Set(val.clone()));
		self.ops.push(Op::Set(key, val));
		Ok(())
	}

	/// Insert a key, erroring if it already exists
	async fn put(&mut self, key: Key, val: Val) -> Result<(), Error> {
		self.open()?;
		self.writeable()?;
		if self.visible(&key).is_some() {
			return Err(Error::TxKeyAlreadyExists);
		}
		self.read_keys.insert(key.clone());
		self.grow(key.len() + val.len())?;
		self.local.insert(key.clone(), Local::Set(val.clone()));
		self.ops.push(Op::Set(key, val));
		Ok(())
	}

	/// Update a key only when its current value matches the check
	async fn putc(&mut self, key: Key, val: Val, chk: Option<Val>) -> Result<(), Error> {
		self.open()?;
		self.writeable()?;
		if self.visible(&key) != chk {
			return Err(Error::TxConditionNotMet);
		}
		self.read_keys.insert(key.clone());
		self.grow(key.len() + val.len())?;
		self.local.insert(key.clone(), Local::Set(val.clone()));
		self.ops.push(Op::Set(key, val));
		Ok(())
	}

	/// Delete a key
	async fn del(&mut self, key: Key) -> Result<(), Error> {
		self.open()?;
		self.writeable()?;
		self.grow(key.len())?;
		self.local.insert(key.clone(), Local::Cleared);
		self.ops.push(Op::Del(key));
		Ok(())
	}

	/// Delete a key only when its current value matches the check
	async fn delc(&mut self, key: Key, chk: Option<Val>) -> Result<(), Error> {
		self.open()?;
		self.writeable()?;
		if self.visible(&key) != chk {
			return Err(Error::TxConditionNotMet);
		}
		self.read_keys.insert(key.clone());
		self.grow(key.len())?;
		self.local.insert(key.clone(), Local::Cleared);
		self.ops.push(Op::Del(key));
		Ok(())
	}

	/// Delete every key in a range
	async fn delr(&mut self, rng: Range<Key>) -> Result<(), Error> {
		self.open()?;
		self.writeable()?;
		self.grow(rng.start.len() + rng.end.len())?;
		// Materialise the clear into the overlay for read-your-writes
		for k in self.visible_range(&rng).into_keys() {
			self.local.insert(k, Local::Cleared);
		}
		self.ops.push(Op::Delr(rng));
		Ok(())
	}

	/// Fetch at most `limit` key-value pairs from a range, in order
	async fn scan(&mut self, rng: Range<Key>, limit: u32) -> Result<Vec<(Key, Val)>, Error> {
		self.open()?;
		let merged = self.visible_range(&rng);
		self.read_ranges.push(rng);
		Ok(merged.into_iter().take(limit as usize).collect())
	}

	/// Apply an atomic mutation to a key.
	///
	/// The overlay is updated so later reads in this transaction see the
	/// mutation applied to their snapshot, while the commit re-applies it
	/// against the then-current value without registering a read conflict.
	async fn atomic(&mut self, key: Key, param: Val, mtype: MutationType) -> Result<(), Error> {
		self.open()?;
		self.writeable()?;
		self.grow(key.len() + param.len())?;
		match mutate(self.visible(&key), &param, mtype) {
			Some(next) => self.local.insert(key.clone(), Local::Set(next)),
			None => self.local.insert(key.clone(), Local::Cleared),
		};
		self.ops.push(Op::Atomic(key, param, mtype));
		Ok(())
	}

	/// Set a key whose placeholder bytes are substituted at commit
	async fn set_versionstamped_key(&mut self, key: Key, offset: u32, val: Val) -> Result<(), Error> {
		self.open()?;
		self.writeable()?;
		if offset as usize + 10 > key.len() {
			return Err(Error::Tx("versionstamp placeholder exceeds the key".to_string()));
		}
		self.grow(key.len() + val.len())?;
		self.ops.push(Op::Vskey(key, offset, val));
		Ok(())
	}

	/// The versionstamp assigned at commit
	fn versionstamp(&self) -> Option<Versionstamp> {
		self.versionstamp
	}
}

/// Computes the result of an atomic mutation; `None` clears the key
fn mutate(current: Option<Val>, param: &[u8], mtype: MutationType) -> Option<Val> {
	fn le_u64(bytes: &[u8]) -> u64 {
		let mut le = [0u8; 8];
		let n = bytes.len().min(8);
		le[..n].copy_from_slice(&bytes[..n]);
		u64::from_le_bytes(le)
	}
	match mtype {
		MutationType::Add => {
			let sum = le_u64(current.as_deref().unwrap_or(&[])).wrapping_add(le_u64(param));
			Some(sum.to_le_bytes().to_vec())
		}
		MutationType::Max => {
			let cur = le_u64(current.as_deref().unwrap_or(&[]));
			Some(cur.max(le_u64(param)).to_le_bytes().to_vec())
		}
		MutationType::Min => match current {
			Some(cur) => Some(le_u64(&cur).min(le_u64(param)).to_le_bytes().to_vec()),
			None => Some(le_u64(param).to_le_bytes().to_vec()),
		},
		MutationType::BitAnd | MutationType::BitOr | MutationType::BitXor => {
			let cur = current.unwrap_or_default();
			let len = cur.len().max(param.len());
			let mut out = vec![0u8; len];
			for i in 0..len {
				let a = cur.get(i).copied().unwrap_or(0);
				let b = param.get(i).copied().unwrap_or(0);
				out[i] = match mtype {
					MutationType::BitAnd => a & b,
					MutationType::BitOr => a | b,
					_ => a ^ b,
				};
			}
			Some(out)
		}
		MutationType::ByteMin => match current {
			Some(cur) if cur.as_slice() <= param => Some(cur),
			_ => Some(param.to_vec()),
		},
		MutationType::ByteMax => match current {
			Some(cur) if cur.as_slice() >= param => Some(cur),
			_ => Some(param.to_vec()),
		},
		MutationType::AppendIfFits => {
			let mut cur = current.unwrap_or_default();
			if cur.len() + param.len() <= VALUE_SIZE_LIMIT {
				cur.extend_from_slice(param);
			}
			Some(cur)
		}
		MutationType::CompareAndClear => match current {
			Some(cur) if cur.as_slice() == param => None,
			other => other,
		},
	}
}
