use crate::err::Error;
use crate::idx::trees::hnsw::HnswIndex;
use crate::idx::trees::vector::Vector;
use crate::idx::IndexKeyBase;
use crate::kvs::{Key, Transaction};
use crate::schema::{IndexDefinition, RecordType, VectorOptions, VectorStrategy};
use crate::val::{Object, Value};

/// Maintains a vector index.
///
/// Write-time maintenance always keeps the stored vectors current. The
/// graph layers are touched at write time only when the index strategy
/// enables inline insertion; otherwise the online builder links nodes in
/// its two-phase build and writes merely stage vectors for it.
pub(crate) struct VectorMaintainer {
	def: IndexDefinition,
	hnsw: HnswIndex,
	opts: VectorOptions,
	base: IndexKeyBase,
}

impl VectorMaintainer {
	pub fn new(
		def: IndexDefinition,
		base: IndexKeyBase,
		opts: VectorOptions,
		m: usize,
		ef_construction: usize,
	) -> Self {
		Self {
			def,
			hnsw: HnswIndex::new(base.clone(), &opts, m, ef_construction),
			opts,
			base,
		}
	}

	pub(crate) fn hnsw(&self) -> &HnswIndex {
		&self.hnsw
	}

	/// The embedding of a record, or `None` when the field is absent
	fn embedding(&self, rt: &RecordType, record: &Object) -> Result<Option<Vector>, Error> {
		match rt.extract(record, &self.def.key_paths[0]) {
			Value::None => Ok(None),
			value => Vector::try_from_value(&value, self.opts.dimensions).map(Some),
		}
	}

	pub async fn update(
		&self,
		tx: &mut Transaction,
		rt: &RecordType,
		pk: &[Value],
		old: Option<&Object>,
		new: Option<&Object>,
	) -> Result<(), Error> {
		let o = old.map(|r| self.embedding(rt, r)).transpose()?.flatten();
		let n = new.map(|r| self.embedding(rt, r)).transpose()?.flatten();
		if o == n {
			return Ok(());
		}
		let inline = matches!(
			self.opts.strategy,
			VectorStrategy::Hnsw {
				inline: true
			}
		);
		match n {
			Some(vector) if inline => {
				if o.is_some() {
					self.hnsw.remove(tx, pk).await?;
				}
				self.hnsw.insert(tx, pk, vector).await
			}
			Some(vector) => self.hnsw.prepare(tx, pk, vector).await,
			None => self.hnsw.remove(tx, pk).await,
		}
	}

	pub fn entries_for(&self, pk: &[Value]) -> Result<Vec<Key>, Error> {
		let mut elements = pk.to_vec();
		elements.push(Value::from("m"));
		Ok(vec![self.base.entry(&elements)?])
	}
}
