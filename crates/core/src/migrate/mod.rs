//! Versioned schema migration.
//!
//! The persisted schema version advances along a chain of registered
//! migrations; `migrate` finds the shortest path from the stored version
//! to the target with a breadth-first search over the `from → to` edges.
//! Purely additive changes (new indexes, new record types, recorded
//! index removals) need no registered migration: a lightweight step is
//! derived from the schema itself. A lease key guards against two
//! processes migrating at once; each step runs in its own transactions
//! and may spawn online builds, so a crashed migration resumes cleanly
//! from the persisted version.

use crate::err::Error;
use crate::idx::state;
use crate::key;
use crate::kvs::{MutationType, TransactionType};
use crate::schema::FormerIndex;
use crate::store::RecordStore;
use futures::future::BoxFuture;
use semver::Version;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// How long a migration lease lasts before another process may take over
const LEASE_DURATION: Duration = Duration::from_secs(60);

type ApplyFn =
	Arc<dyn for<'a> Fn(&'a mut MigrationContext) -> BoxFuture<'a, Result<(), Error>> + Send + Sync>;

/// One registered migration step
#[derive(Clone)]
pub struct Migration {
	pub from: Version,
	pub to: Version,
	pub description: String,
	apply: ApplyFn,
}

impl Migration {
	pub fn new<F>(from: Version, to: Version, description: impl Into<String>, apply: F) -> Self
	where
		F: for<'a> Fn(&'a mut MigrationContext) -> BoxFuture<'a, Result<(), Error>>
			+ Send
			+ Sync
			+ 'static,
	{
		Self {
			from,
			to,
			description: description.into(),
			apply: Arc::new(apply),
		}
	}
}

impl std::fmt::Debug for Migration {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Migration")
			.field("from", &self.from)
			.field("to", &self.to)
			.field("description", &self.description)
			.finish()
	}
}

/// What a migration step may do
pub struct MigrationContext {
	store: RecordStore,
}

impl MigrationContext {
	/// The store being migrated, for data backfills
	pub fn store(&self) -> &RecordStore {
		&self.store
	}

	/// Adds an index: write-only first, then built online to readable
	pub async fn add_index(&mut self, index: &str) -> Result<(), Error> {
		self.store.schema().index(index)?;
		let mut ctx = self.store.begin(TransactionType::Write).await?;
		state::enable(&mut ctx.tx, self.store.root(), index).await?;
		ctx.commit().await?;
		self.store.build_index(index).await?;
		Ok(())
	}

	/// Disables, clears, and rebuilds an index from scratch
	pub async fn rebuild_index(&mut self, index: &str) -> Result<(), Error> {
		let def = self.store.schema().index(index)?.clone();
		let mut ctx = self.store.begin(TransactionType::Write).await?;
		state::disable(&mut ctx.tx, self.store.root(), &def).await?;
		// Stale build progress must not mask the cleared entries
		let ranges = key::progress::ranges(
			self.store.root(),
			&crate::idx::builder::build_op_id(index),
		)?;
		ctx.tx.delr(ranges.range()).await?;
		ctx.commit().await?;
		self.store.build_index(index).await?;
		Ok(())
	}

	/// Removes an index: disable, clear, and record the tombstone
	pub async fn remove_index(&mut self, index: &str, added_at: Version) -> Result<(), Error> {
		let removed_at = self.store.schema().version().clone();
		let former = FormerIndex {
			name: index.to_string(),
			added_at,
			removed_at,
		};
		// The index is gone from the schema; build its definition shape
		// only for the clearing of its regions
		let mut ctx = self.store.begin(TransactionType::Write).await?;
		ctx.tx.delr(key::index::range(self.store.root(), index)?).await?;
		ctx.tx
			.set(key::state::new(self.store.root(), index)?, vec![
				crate::schema::IndexState::Disabled.to_byte(),
			])
			.await?;
		ctx.tx.delr(key::stats::range(self.store.root(), index)?).await?;
		let ranges =
			key::progress::ranges(self.store.root(), &crate::idx::builder::build_op_id(index))?;
		ctx.tx.delr(ranges.range()).await?;
		ctx.tx
			.set(key::former::new(self.store.root(), index)?, bincode::serialize(&former)?)
			.await?;
		ctx.commit().await?;
		info!(target: "tupledb::core::migrate", index, "removed index");
		Ok(())
	}
}

/// Coordinates migrations for one store
pub struct MigrationManager {
	store: RecordStore,
	migrations: Vec<Migration>,
}

impl MigrationManager {
	pub fn new(store: RecordStore) -> Self {
		Self {
			store,
			migrations: Vec::new(),
		}
	}

	pub fn register(mut self, migration: Migration) -> Self {
		self.migrations.push(migration);
		self
	}

	/// The persisted schema version, if the store was initialised
	pub async fn current_version(&self) -> Result<Option<Version>, Error> {
		let mut ctx = self.store.begin(TransactionType::Read).await?;
		let key = key::version::new(self.store.root())?;
		let out = match ctx.tx.get(key).await? {
			Some(bytes) => Some(key::version::decode(&bytes)?),
			None => None,
		};
		ctx.cancel().await?;
		Ok(out)
	}

	/// Migrates the persisted state to the schema's version
	pub async fn migrate_to_latest(&self) -> Result<Version, Error> {
		let target = self.store.schema().version().clone();
		self.migrate(&target).await
	}

	/// Migrates the persisted state to a target version
	pub async fn migrate(&self, target: &Version) -> Result<Version, Error> {
		// A fresh store starts at the target directly: its indexes are
		// live from the first write
		let Some(current) = self.current_version().await? else {
			self.persist_version(target).await?;
			info!(target: "tupledb::core::migrate", version = %target, "initialised store");
			return Ok(target.clone());
		};
		if &current == target {
			return Ok(current);
		}
		let steps = self.path(&current, target)?;
		let lease = self.acquire_lease().await?;
		let outcome = self.run_steps(steps).await;
		self.release_lease(lease).await?;
		outcome?;
		Ok(target.clone())
	}

	async fn run_steps(&self, steps: Vec<Migration>) -> Result<(), Error> {
		for step in steps {
			info!(
				target: "tupledb::core::migrate",
				from = %step.from,
				to = %step.to,
				description = %step.description,
				"applying migration"
			);
			let mut ctx = MigrationContext {
				store: self.store.clone(),
			};
			(step.apply)(&mut ctx).await?;
			self.persist_version(&step.to).await?;
		}
		Ok(())
	}

	/// The shortest chain of registered migrations, or a derived
	/// lightweight step when the change is purely additive
	fn path(&self, from: &Version, to: &Version) -> Result<Vec<Migration>, Error> {
		// Breadth-first search over the registered edges
		let mut queue = VecDeque::from([from.clone()]);
		let mut visited: HashMap<Version, Option<Migration>> = HashMap::from([(from.clone(), None)]);
		while let Some(at) = queue.pop_front() {
			if &at == to {
				let mut chain = Vec::new();
				let mut cursor = at;
				while let Some(Some(step)) = visited.get(&cursor) {
					cursor = step.from.clone();
					chain.push(step.clone());
				}
				chain.reverse();
				return Ok(chain);
			}
			for m in &self.migrations {
				if m.from == at && !visited.contains_key(&m.to) {
					visited.insert(m.to.clone(), Some(m.clone()));
					queue.push_back(m.to.clone());
				}
			}
		}
		self.lightweight(from, to)
	}

	/// Derives the automatic step for an additive schema delta
	fn lightweight(&self, from: &Version, to: &Version) -> Result<Vec<Migration>, Error> {
		if to < from {
			return Err(Error::MigrationManual(format!(
				"downgrade from {from} to {to} needs a scripted migration"
			)));
		}
		let from_v = from.clone();
		let added: Vec<String> = self
			.store
			.schema()
			.indexes()
			.filter(|ix| ix.added_at > from_v && ix.added_at <= *to)
			.map(|ix| ix.name.clone())
			.collect();
		let removed: Vec<FormerIndex> = self
			.store
			.schema()
			.former_indexes()
			.iter()
			.filter(|f| f.removed_at > from_v && f.removed_at <= *to)
			.cloned()
			.collect();
		debug!(
			target: "tupledb::core::migrate",
			added = added.len(),
			removed = removed.len(),
			"derived lightweight migration"
		);
		Ok(vec![Migration::new(
			from.clone(),
			to.clone(),
			format!("lightweight migration to {to}"),
			move |ctx: &mut MigrationContext| {
				let added = added.clone();
				let removed = removed.clone();
				Box::pin(async move {
					for index in added {
						ctx.add_index(&index).await?;
					}
					for former in removed {
						ctx.remove_index(&former.name, former.added_at).await?;
					}
					Ok(())
				})
			},
		)])
	}

	async fn persist_version(&self, version: &Version) -> Result<(), Error> {
		let mut ctx = self.store.begin(TransactionType::Write).await?;
		let key = key::version::new(self.store.root())?;
		ctx.tx.set(key, key::version::encode(version)?).await?;
		ctx.commit().await
	}

	/// Takes the migration lease, clearing a stale one atomically
	async fn acquire_lease(&self) -> Result<key::lock::Lease, Error> {
		let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
		let lease = key::lock::Lease {
			owner: Uuid::new_v4().to_string(),
			expires_at: now + LEASE_DURATION.as_millis() as u64,
		};
		let key = key::lock::new(self.store.root())?;
		let mut ctx = self.store.begin(TransactionType::Write).await?;
		if let Some(bytes) = ctx.tx.get(key.clone()).await? {
			let held = key::lock::Lease::decode(&bytes)?;
			if held.expires_at > now {
				ctx.cancel().await?;
				return Err(Error::MigrationLockHeld {
					owner: held.owner,
				});
			}
			// Stale: clear it only if nobody renewed in the meantime
			ctx.tx.atomic(key.clone(), bytes, MutationType::CompareAndClear).await?;
		}
		ctx.tx.put(key, lease.encode()?).await?;
		ctx.commit().await?;
		Ok(lease)
	}

	async fn release_lease(&self, lease: key::lock::Lease) -> Result<(), Error> {
		let key = key::lock::new(self.store.root())?;
		let mut ctx = self.store.begin(TransactionType::Write).await?;
		ctx.tx.delc(key, Some(lease.encode()?)).await?;
		ctx.commit().await
	}
}
