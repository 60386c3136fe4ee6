//! A Hierarchical Navigable Small World graph persisted in the key-value
//! store.
//!
//! Per node the index keeps a metadata entry (assigned layer, stored
//! vector, whether the node is linked into the graph yet) and, per layer,
//! one edge entry per neighbour valued with the cached distance. A single
//! graph metadata entry records the entry point. Everything is fetched
//! through the transaction on demand, so searches and inserts read only
//! the nodes they actually visit.
//!
//! Layers are assigned deterministically from the primary key (a seeded
//! generator over `mL = 1/ln(M)`), so rebuilding the graph after a retry
//! assigns the same levels and the two-phase online build stays
//! idempotent.

use crate::err::Error;
use crate::idx::trees::knn::DoublePriorityQueue;
use crate::idx::trees::vector::Vector;
use crate::idx::IndexKeyBase;
use crate::kvs::{Key, Transaction};
use crate::schema::{Distance, VectorOptions};
use crate::tuple;
use crate::val::Value;
use hashbrown::{HashMap, HashSet};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::hash::BuildHasher;

/// Caps assigned layers; layers above this carry almost no nodes anyway
const MAX_LEVEL: u8 = 16;

/// The graph-wide metadata entry
#[derive(Serialize, Deserialize, Default)]
struct GraphMeta {
	/// The entry point: a primary key and its top layer
	entry: Option<(Vec<Value>, u8)>,
}

/// The per-node metadata entry
#[derive(Serialize, Deserialize, Clone)]
pub(crate) struct NodeMeta {
	pub level: u8,
	/// Whether the node has been linked into the graph layers
	pub linked: bool,
	pub vector: Vector,
}

pub(crate) struct HnswIndex {
	base: IndexKeyBase,
	metric: Distance,
	/// Neighbours per node on the upper layers
	m: usize,
	/// Neighbours per node on layer 0
	m0: usize,
	/// Level sampling factor, 1/ln(M)
	ml: f64,
	ef_construction: usize,
}

impl HnswIndex {
	pub fn new(base: IndexKeyBase, opts: &VectorOptions, m: usize, ef_construction: usize) -> Self {
		let m = opts.m.unwrap_or(m);
		let ef_construction = opts.ef_construction.unwrap_or(ef_construction);
		Self {
			base,
			metric: opts.metric,
			m,
			m0: m * 2,
			ml: 1.0 / (m as f64).ln(),
			ef_construction,
		}
	}

	fn meta_key(&self) -> Result<Key, Error> {
		self.base.entry(&[Value::None])
	}

	fn node_key(&self, pk: &[Value]) -> Result<Key, Error> {
		let mut elements = pk.to_vec();
		elements.push(Value::from("m"));
		self.base.entry(&elements)
	}

	fn edge_key(&self, pk: &[Value], layer: u8, neighbour: &[Value]) -> Result<Key, Error> {
		let mut elements = pk.to_vec();
		elements.push(Value::from("e"));
		elements.push(Value::from(layer as i64));
		elements.extend_from_slice(neighbour);
		self.base.entry(&elements)
	}

	async fn meta(&self, tx: &mut Transaction) -> Result<GraphMeta, Error> {
		match tx.get(self.meta_key()?).await? {
			Some(bytes) => Ok(bincode::deserialize(&bytes)?),
			None => Ok(GraphMeta::default()),
		}
	}

	async fn set_meta(&self, tx: &mut Transaction, meta: &GraphMeta) -> Result<(), Error> {
		tx.set(self.meta_key()?, bincode::serialize(meta)?).await
	}

	pub async fn node(&self, tx: &mut Transaction, pk: &[Value]) -> Result<Option<NodeMeta>, Error> {
		match tx.get(self.node_key(pk)?).await? {
			Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
			None => Ok(None),
		}
	}

	async fn set_node(&self, tx: &mut Transaction, pk: &[Value], node: &NodeMeta) -> Result<(), Error> {
		tx.set(self.node_key(pk)?, bincode::serialize(node)?).await
	}

	/// The neighbours of a node on one layer, with their cached distances
	async fn edges(
		&self,
		tx: &mut Transaction,
		pk: &[Value],
		layer: u8,
	) -> Result<Vec<(Vec<Value>, f64)>, Error> {
		let mut elements = pk.to_vec();
		elements.push(Value::from("e"));
		elements.push(Value::from(layer as i64));
		let skip = elements.len();
		let rng = self.base.prefix_range(&elements)?;
		let mut out = Vec::new();
		for (k, v) in tx.getr(rng).await? {
			let decoded = self.base.unpack(&k)?;
			let neighbour = decoded[skip..].to_vec();
			let dist = f64::from_le_bytes(v.try_into().map_err(|_| Error::Decode {
				offset: 0,
				reason: "malformed edge distance".to_string(),
			})?);
			out.push((neighbour, dist));
		}
		Ok(out)
	}

	async fn set_edge(
		&self,
		tx: &mut Transaction,
		pk: &[Value],
		layer: u8,
		neighbour: &[Value],
		dist: f64,
	) -> Result<(), Error> {
		tx.set(self.edge_key(pk, layer, neighbour)?, dist.to_le_bytes().to_vec()).await
	}

	/// The deterministic layer of a primary key
	fn level_for(&self, pk: &[Value]) -> Result<u8, Error> {
		let packed = tuple::pack(pk)?;
		let seed = ahash::RandomState::with_seeds(0x68, 0x6e, 0x73, 0x77).hash_one(&packed);
		let mut rng = SmallRng::seed_from_u64(seed);
		let unit: f64 = rng.gen_range(f64::EPSILON..1.0);
		Ok(((-unit.ln() * self.ml) as u8).min(MAX_LEVEL))
	}

	fn m_max(&self, layer: u8) -> usize {
		if layer == 0 {
			self.m0
		} else {
			self.m
		}
	}

	/// Stores the vector of a node without linking it into the graph.
	/// Write-time maintenance uses this when graph insertion is deferred
	/// to the online builder.
	pub async fn prepare(
		&self,
		tx: &mut Transaction,
		pk: &[Value],
		vector: Vector,
	) -> Result<(), Error> {
		let linked = self.node(tx, pk).await?.map(|n| n.linked).unwrap_or(false);
		let node = NodeMeta {
			level: self.level_for(pk)?,
			linked,
			vector,
		};
		self.set_node(tx, pk, &node).await
	}

	/// Inserts a node and links it into every layer up to its level
	pub async fn insert(
		&self,
		tx: &mut Transaction,
		pk: &[Value],
		vector: Vector,
	) -> Result<(), Error> {
		let node = NodeMeta {
			level: self.level_for(pk)?,
			linked: true,
			vector,
		};
		self.set_node(tx, pk, &node).await?;
		self.link(tx, pk, &node).await
	}

	/// Links an already-stored node into the graph layers
	pub async fn link(&self, tx: &mut Transaction, pk: &[Value], node: &NodeMeta) -> Result<(), Error> {
		if !node.linked {
			let mut relinked = node.clone();
			relinked.linked = true;
			self.set_node(tx, pk, &relinked).await?;
		}
		let mut meta = self.meta(tx).await?;
		let Some((entry_pk, entry_level)) = meta.entry.clone() else {
			meta.entry = Some((pk.to_vec(), node.level));
			return self.set_meta(tx, &meta).await;
		};
		if entry_pk == pk {
			return Ok(());
		}
		let mut cache = VectorCache::default();
		cache.put(pk, &node.vector)?;
		let mut ep = self.distance_to(tx, &mut cache, &entry_pk, &node.vector).await?;
		// Descend the layers above the node's level greedily
		for layer in (node.level + 1..=entry_level).rev() {
			ep = self.greedy_closest(tx, &mut cache, &node.vector, ep, layer).await?;
		}
		// Link each layer from the node's level down
		for layer in (0..=node.level.min(entry_level)).rev() {
			let found = self
				.search_layer(tx, &mut cache, &node.vector, ep.clone(), self.ef_construction, layer)
				.await?;
			let neighbours = self.select_neighbours(tx, &mut cache, &node.vector, &found, self.m).await?;
			for (dist, n_packed) in &neighbours {
				let n_pk = tuple::unpack(n_packed)?;
				self.set_edge(tx, pk, layer, &n_pk, *dist).await?;
				self.set_edge(tx, &n_pk, layer, pk, *dist).await?;
				self.prune(tx, &n_pk, layer).await?;
			}
			if let Some(best) = found.first() {
				ep = (best.dist(), best.key().clone());
			}
		}
		if node.level > entry_level {
			meta.entry = Some((pk.to_vec(), node.level));
			self.set_meta(tx, &meta).await?;
		}
		Ok(())
	}

	/// Caps a node's edge list at `m_max`, dropping the furthest
	async fn prune(&self, tx: &mut Transaction, pk: &[Value], layer: u8) -> Result<(), Error> {
		let edges = self.edges(tx, pk, layer).await?;
		let max = self.m_max(layer);
		if edges.len() <= max {
			return Ok(());
		}
		let mut sorted = edges;
		sorted.sort_by(|a, b| a.1.total_cmp(&b.1));
		for (neighbour, _) in sorted.drain(max..) {
			tx.del(self.edge_key(pk, layer, &neighbour)?).await?;
			tx.del(self.edge_key(&neighbour, layer, pk)?).await?;
		}
		Ok(())
	}

	/// Removes a node and its reciprocal edges
	pub async fn remove(&self, tx: &mut Transaction, pk: &[Value]) -> Result<(), Error> {
		let Some(node) = self.node(tx, pk).await? else {
			return Ok(());
		};
		let mut replacement: Option<(Vec<Value>, u8)> = None;
		for layer in 0..=node.level {
			for (neighbour, _) in self.edges(tx, pk, layer).await? {
				tx.del(self.edge_key(&neighbour, layer, pk)?).await?;
				if replacement.is_none() {
					if let Some(n) = self.node(tx, &neighbour).await? {
						replacement = Some((neighbour.clone(), n.level));
					}
				}
			}
		}
		// Drop the node's own metadata and edge entries
		tx.del(self.node_key(pk)?).await?;
		let mut edge_elements = pk.to_vec();
		edge_elements.push(Value::from("e"));
		tx.delr(self.base.prefix_range(&edge_elements)?).await?;
		let mut meta = self.meta(tx).await?;
		if let Some((entry_pk, _)) = &meta.entry {
			if entry_pk == pk {
				meta.entry = replacement;
				self.set_meta(tx, &meta).await?;
			}
		}
		Ok(())
	}

	/// k-nearest-neighbour search through the graph
	pub async fn search(
		&self,
		tx: &mut Transaction,
		query: &Vector,
		k: usize,
		ef: usize,
	) -> Result<Vec<(f64, Vec<Value>)>, Error> {
		let meta = self.meta(tx).await?;
		let Some((entry_pk, entry_level)) = meta.entry else {
			return Err(Error::GraphMissing {
				index: self.base.name().to_string(),
			});
		};
		let mut cache = VectorCache::default();
		let mut ep = self.distance_to(tx, &mut cache, &entry_pk, query).await?;
		for layer in (1..=entry_level).rev() {
			ep = self.greedy_closest(tx, &mut cache, query, ep, layer).await?;
		}
		let found = self
			.search_layer(tx, &mut cache, query, ep, ef.max(k), 0)
			.await?;
		let mut out = Vec::with_capacity(k);
		for (dist, packed) in found.into_sorted().into_iter().take(k) {
			out.push((dist, tuple::unpack(&packed)?));
		}
		Ok(out)
	}

	/// Whether the graph has been built
	pub async fn is_built(&self, tx: &mut Transaction) -> Result<bool, Error> {
		Ok(self.meta(tx).await?.entry.is_some())
	}

	/// Exact O(n) scan over the stored vectors, used as the fallback path
	pub async fn scan_flat(
		&self,
		tx: &mut Transaction,
		query: &Vector,
		k: usize,
	) -> Result<Vec<(f64, Vec<Value>)>, Error> {
		let mut queue = DoublePriorityQueue::new();
		for (key, bytes) in tx.getr(self.base.range()?).await? {
			let elements = self.base.unpack(&key)?;
			// Node metadata entries end with the "m" marker
			match elements.split_last() {
				Some((Value::Strand(marker), pk)) if marker == "m" && !pk.is_empty() => {
					let node: NodeMeta = bincode::deserialize(&bytes)?;
					let dist = query.distance(&node.vector, self.metric)?;
					queue.push(dist, tuple::pack(pk)?);
					if queue.len() > k {
						queue.pop_last();
					}
				}
				_ => continue,
			}
		}
		let mut out = Vec::with_capacity(k);
		for (dist, packed) in queue.into_sorted() {
			out.push((dist, tuple::unpack(&packed)?));
		}
		Ok(out)
	}

	async fn distance_to(
		&self,
		tx: &mut Transaction,
		cache: &mut VectorCache,
		pk: &[Value],
		query: &Vector,
	) -> Result<(f64, Key), Error> {
		let packed = tuple::pack(pk)?;
		let vector = self.cached_vector(tx, cache, &packed).await?;
		Ok((query.distance(&vector, self.metric)?, packed))
	}

	async fn cached_vector(
		&self,
		tx: &mut Transaction,
		cache: &mut VectorCache,
		packed: &Key,
	) -> Result<Vector, Error> {
		if let Some(v) = cache.get(packed) {
			return Ok(v);
		}
		let pk = tuple::unpack(packed)?;
		let node = self.node(tx, &pk).await?.ok_or_else(|| Error::GraphMissing {
			index: self.base.name().to_string(),
		})?;
		cache.0.insert(packed.clone(), node.vector.clone());
		Ok(node.vector)
	}

	/// Follows the closest edge on one layer until no neighbour improves
	async fn greedy_closest(
		&self,
		tx: &mut Transaction,
		cache: &mut VectorCache,
		query: &Vector,
		mut ep: (f64, Key),
		layer: u8,
	) -> Result<(f64, Key), Error> {
		loop {
			let pk = tuple::unpack(&ep.1)?;
			let mut improved = false;
			for (neighbour, _) in self.edges(tx, &pk, layer).await? {
				let packed = tuple::pack(&neighbour)?;
				let vector = self.cached_vector(tx, cache, &packed).await?;
				let dist = query.distance(&vector, self.metric)?;
				if dist < ep.0 {
					ep = (dist, packed);
					improved = true;
				}
			}
			if !improved {
				return Ok(ep);
			}
		}
	}

	/// The ef-bounded best-first search of one layer
	async fn search_layer(
		&self,
		tx: &mut Transaction,
		cache: &mut VectorCache,
		query: &Vector,
		ep: (f64, Key),
		ef: usize,
		layer: u8,
	) -> Result<DoublePriorityQueue, Error> {
		let mut visited: HashSet<Key> = HashSet::from([ep.1.clone()]);
		let mut candidates = DoublePriorityQueue::from(ep.0, ep.1.clone());
		let mut results = candidates.clone();
		while let Some((dist, current)) = candidates.pop_first() {
			if let Some(furthest) = results.last() {
				if dist > furthest.dist() && results.len() >= ef {
					break;
				}
			}
			let pk = tuple::unpack(&current)?;
			for (neighbour, _) in self.edges(tx, &pk, layer).await? {
				let packed = tuple::pack(&neighbour)?;
				if !visited.insert(packed.clone()) {
					continue;
				}
				let vector = self.cached_vector(tx, cache, &packed).await?;
				let dist = query.distance(&vector, self.metric)?;
				let admit = match results.last() {
					Some(furthest) => results.len() < ef || dist < furthest.dist(),
					None => true,
				};
				if admit {
					candidates.push(dist, packed.clone());
					results.push(dist, packed);
					if results.len() > ef {
						results.pop_last();
					}
				}
			}
		}
		Ok(results)
	}

	/// Picks up to `m` diverse neighbours: a candidate is kept only when
	/// it is closer to the query than to every already-selected neighbour
	async fn select_neighbours(
		&self,
		tx: &mut Transaction,
		cache: &mut VectorCache,
		_query: &Vector,
		found: &DoublePriorityQueue,
		m: usize,
	) -> Result<Vec<(f64, Key)>, Error> {
		let mut selected: Vec<(f64, Key)> = Vec::with_capacity(m);
		for (dist, packed) in found.clone().into_sorted() {
			if selected.len() >= m {
				break;
			}
			let vector = self.cached_vector(tx, cache, &packed).await?;
			let mut keep = true;
			for (_, s_packed) in &selected {
				let s_vector = self.cached_vector(tx, cache, s_packed).await?;
				if vector.distance(&s_vector, self.metric)? < dist {
					keep = false;
					break;
				}
			}
			if keep {
				selected.push((dist, packed));
			}
		}
		Ok(selected)
	}
}

#[derive(Default)]
struct VectorCache(HashMap<Key, Vector>);

impl VectorCache {
	fn get(&self, packed: &Key) -> Option<Vector> {
		self.0.get(packed).cloned()
	}

	fn put(&mut self, pk: &[Value], vector: &Vector) -> Result<(), Error> {
		self.0.insert(tuple::pack(pk)?, vector.clone());
		Ok(())
	}
}
