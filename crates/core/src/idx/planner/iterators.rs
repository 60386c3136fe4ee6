//! Streaming plan execution.
//!
//! Every plan node becomes a cursor: lazy, single-pass, pulling one
//! record at a time through the executor's transaction. A cursor can be
//! snapshotted into an opaque continuation token after partial
//! consumption; rebuilding the cursor from the same plan and the token
//! resumes the stream where it stopped.

use super::exe::Executor;
use super::expr::Expr;
use super::plan::{PlanNode, SortKey};
use crate::cnf;
use crate::err::Error;
use crate::idx::maintainer::{SpatialMaintainer, VectorMaintainer};
use crate::idx::trees::spatial::Region;
use crate::idx::trees::vector::Vector;
use crate::idx::IndexKeyBase;
use crate::key;
use crate::key::Subspace;
use crate::kvs::scanner::Scanner;
use crate::kvs::Key;
use crate::schema::{IndexKind, Schema, VectorStrategy};
use crate::tuple;
use crate::val::Object;
use futures::future::BoxFuture;
use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Range;

/// One streamed row: the packed primary key and the record
pub(crate) type Row = (Key, Object);

/// The serialised resumption state of a cursor
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) enum Token {
	Scan {
		resume: Vec<u8>,
	},
	Filter {
		child: Box<Token>,
	},
	Limit {
		child: Box<Token>,
	},
	Sort {
		skip: usize,
	},
	Union {
		active: usize,
		seen: Vec<Vec<u8>>,
		child: Option<Box<Token>>,
	},
	InJoin {
		active: usize,
		child: Option<Box<Token>>,
	},
	Vector {
		skip: usize,
	},
	Spatial {
		range: usize,
		resume: Option<Vec<u8>>,
	},
}

impl Token {
	pub fn encode(&self) -> Result<Vec<u8>, Error> {
		Ok(bincode::serialize(self)?)
	}

	pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
		Ok(bincode::deserialize(bytes)?)
	}
}

/// A bounded scan that remembers the last key it yielded
struct TrackedScan {
	scanner: Scanner,
	last: Option<Key>,
	done: bool,
}

impl TrackedScan {
	fn new(mut range: Range<Key>, resume: Option<&[u8]>) -> Self {
		if let Some(resume) = resume {
			if resume.to_vec() > range.start {
				range.start = resume.to_vec();
			}
		}
		Self {
			scanner: Scanner::new(cnf::SCAN_BATCH_SIZE, range),
			last: None,
			done: false,
		}
	}

	async fn next(
		&mut self,
		exe: &mut Executor<'_>,
	) -> Result<Option<(Key, Vec<u8>)>, Error> {
		match self.scanner.next(exe.tx).await? {
			Some((k, v)) => {
				self.last = Some(k.clone());
				Ok(Some((k, v)))
			}
			None => {
				self.done = true;
				Ok(None)
			}
		}
	}

	/// The key scanning should resume from on the next execution
	fn resume_key(&self) -> Option<Vec<u8>> {
		if self.done {
			return None;
		}
		match &self.last {
			Some(last) => {
				let mut key = last.clone();
				key.push(0x00);
				Some(key)
			}
			None => Some(self.scanner.resume_from().clone()),
		}
	}
}

/// A streaming cursor over one plan node
pub(crate) enum Cursor {
	Full {
		scan: TrackedScan,
	},
	Index {
		record_type: String,
		/// Number of indexed value elements before the primary key
		value_arity: usize,
		index: String,
		scan: TrackedScan,
	},
	Filter {
		record_type: String,
		predicate: Expr,
		child: Box<Cursor>,
	},
	Limit {
		remaining: usize,
		child: Box<Cursor>,
	},
	Sort {
		record_type: String,
		by: Vec<SortKey>,
		child: Option<Box<Cursor>>,
		buffered: Option<VecDeque<Row>>,
		consumed: usize,
	},
	Union {
		children: Vec<Cursor>,
		active: usize,
		seen: HashSet<Key>,
	},
	InJoin {
		children: Vec<Cursor>,
		active: usize,
	},
	Vector {
		record_type: String,
		index: String,
		query: Vector,
		k: usize,
		post: Option<Expr>,
		results: Option<VecDeque<Row>>,
		consumed: usize,
	},
	Spatial {
		record_type: String,
		index: String,
		region: Region,
		post: Option<Expr>,
		ranges: Vec<Range<Key>>,
		range: usize,
		resume: Option<Vec<u8>>,
		scan: Option<TrackedScan>,
	},
}

impl Cursor {
	/// Builds the cursor tree for a plan, optionally resuming from a token
	pub fn build(
		schema: &Schema,
		root: &Subspace,
		plan: &PlanNode,
		token: Option<Token>,
	) -> Result<Cursor, Error> {
		match (plan, token) {
			(
				PlanNode::FullScan {
					record_type,
				},
				token,
			) => {
				let resume = match &token {
					Some(Token::Scan {
						resume,
					}) => Some(resume.as_slice()),
					_ => None,
				};
				Ok(Cursor::Full {
					scan: TrackedScan::new(key::record::range(root, record_type)?, resume),
				})
			}
			(
				PlanNode::IndexScan {
					index,
					record_type,
					range,
				},
				token,
			) => {
				let resume = match &token {
					Some(Token::Scan {
						resume,
					}) => Some(resume.as_slice()),
					_ => None,
				};
				let arity = schema.index(index)?.key_paths.len();
				Ok(Cursor::Index {
					record_type: record_type.clone(),
					value_arity: arity,
					index: index.clone(),
					scan: TrackedScan::new(range.to_key_range(root, index)?, resume),
				})
			}
			(
				PlanNode::Filter {
					child,
					predicate,
				},
				token,
			) => {
				let child_token = match token {
					Some(Token::Filter {
						child,
					}) => Some(*child),
					_ => None,
				};
				Ok(Cursor::Filter {
					record_type: plan_record_type(child),
					predicate: predicate.clone(),
					child: Box::new(Self::build(schema, root, child, child_token)?),
				})
			}
			(
				PlanNode::Limit {
					child,
					n,
				},
				token,
			) => {
				// The limit applies per execution: resuming starts a new page
				let child_token = match token {
					Some(Token::Limit {
						child,
					}) => Some(*child),
					_ => None,
				};
				Ok(Cursor::Limit {
					remaining: *n,
					child: Box::new(Self::build(schema, root, child, child_token)?),
				})
			}
			(
				PlanNode::Sort {
					child,
					by,
				},
				token,
			) => {
				let consumed = match token {
					Some(Token::Sort {
						skip,
					}) => skip,
					_ => 0,
				};
				Ok(Cursor::Sort {
					record_type: plan_record_type(child),
					by: by.clone(),
					child: Some(Box::new(Self::build(schema, root, child, None)?)),
					buffered: None,
					consumed,
				})
			}
			(
				PlanNode::Union {
					children,
				},
				token,
			) => {
				let (active, seen, child_token) = match token {
					Some(Token::Union {
						active,
						seen,
						child,
					}) => (active, seen.into_iter().collect(), child.map(|c| *c)),
					_ => (0, HashSet::new(), None),
				};
				let mut cursors = Vec::with_capacity(children.len());
				for (i, child) in children.iter().enumerate() {
					let t = if i == active {
						child_token.clone()
					} else {
						None
					};
					cursors.push(Self::build(schema, root, child, t)?);
				}
				Ok(Cursor::Union {
					children: cursors,
					active,
					seen,
				})
			}
			(
				PlanNode::InJoin {
					children,
				},
				token,
			) => {
				let (active, child_token) = match token {
					Some(Token::InJoin {
						active,
						child,
					}) => (active, child.map(|c| *c)),
					_ => (0, None),
				};
				let mut cursors = Vec::with_capacity(children.len());
				for (i, child) in children.iter().enumerate() {
					let t = if i == active {
						child_token.clone()
					} else {
						None
					};
					cursors.push(Self::build(schema, root, child, t)?);
				}
				Ok(Cursor::InJoin {
					children: cursors,
					active,
				})
			}
			(
				PlanNode::VectorSearch {
					index,
					record_type,
					query,
					k,
					post,
				},
				token,
			) => {
				let consumed = match token {
					Some(Token::Vector {
						skip,
					}) => skip,
					_ => 0,
				};
				Ok(Cursor::Vector {
					record_type: record_type.clone(),
					index: index.clone(),
					query: query.clone(),
					k: *k,
					post: post.clone(),
					results: None,
					consumed,
				})
			}
			(
				PlanNode::SpatialScan {
					index,
					record_type,
					region,
					post,
				},
				token,
			) => {
				let (range, resume) = match token {
					Some(Token::Spatial {
						range,
						resume,
					}) => (range, resume),
					_ => (0, None),
				};
				Ok(Cursor::Spatial {
					record_type: record_type.clone(),
					index: index.clone(),
					region: region.clone(),
					post: post.clone(),
					ranges: Vec::new(),
					range,
					resume,
					scan: None,
				})
			}
		}
	}

	/// The next record, or `None` when the stream is exhausted
	pub fn next<'a>(
		&'a mut self,
		exe: &'a mut Executor<'_>,
	) -> BoxFuture<'a, Result<Option<Row>, Error>> {
		Box::pin(async move {
			match self {
				Cursor::Full {
					scan,
				} => match scan.next(exe).await? {
					Some((k, v)) => {
						let (_, pk) = key::record::parse(exe.root, &k)?;
						let record = exe.codec.deserialize(&v)?;
						Ok(Some((tuple::pack(&pk)?, record)))
					}
					None => Ok(None),
				},
				Cursor::Index {
					record_type,
					value_arity,
					index,
					scan,
				} => loop {
					let Some((k, _)) = scan.next(exe).await? else {
						return Ok(None);
					};
					let base = IndexKeyBase::new(exe.root, index);
					let elements = base.unpack(&k)?;
					let pk = &elements[*value_arity..];
					match exe.load_record(record_type, pk).await? {
						Some(record) => return Ok(Some((tuple::pack(pk)?, record))),
						// A dangling entry; skip it
						None => continue,
					}
				},
				Cursor::Filter {
					record_type,
					predicate,
					child,
				} => loop {
					let Some((pk, record)) = child.next(exe).await? else {
						return Ok(None);
					};
					let rt = exe.schema.record_type(record_type)?;
					if predicate.matches(rt, &record) {
						return Ok(Some((pk, record)));
					}
				},
				Cursor::Limit {
					remaining,
					child,
				} => {
					if *remaining == 0 {
						return Ok(None);
					}
					match child.next(exe).await? {
						Some(row) => {
							*remaining -= 1;
							Ok(Some(row))
						}
						None => Ok(None),
					}
				}
				Cursor::Sort {
					record_type,
					by,
					child,
					buffered,
					consumed,
				} => {
					if buffered.is_none() {
						// Single pass: drain the child and order the rows
						let mut rows = Vec::new();
						if let Some(child) = child.as_mut() {
							while let Some(row) = child.next(exe).await? {
								rows.push(row);
							}
						}
						let rt = exe.schema.record_type(record_type)?;
						sort_rows(&mut rows, rt, by);
						let mut q: VecDeque<Row> = rows.into();
						// Resume by skipping already-yielded rows
						for _ in 0..*consumed {
							q.pop_front();
						}
						*buffered = Some(q);
					}
					match buffered.as_mut().unwrap().pop_front() {
						Some(row) => {
							*consumed += 1;
							Ok(Some(row))
						}
						None => Ok(None),
					}
				}
				Cursor::Union {
					children,
					active,
					seen,
				} => loop {
					if *active >= children.len() {
						return Ok(None);
					}
					match children[*active].next(exe).await? {
						Some((pk, record)) => {
							if seen.insert(pk.clone()) {
								return Ok(Some((pk, record)));
							}
						}
						None => *active += 1,
					}
				},
				Cursor::InJoin {
					children,
					active,
				} => loop {
					if *active >= children.len() {
						return Ok(None);
					}
					match children[*active].next(exe).await? {
						Some(row) => return Ok(Some(row)),
						None => *active += 1,
					}
				},
				Cursor::Vector {
					record_type,
					index,
					query,
					k,
					post,
					results,
					consumed,
				} => {
					if results.is_none() {
						let rows =
							vector_search(exe, record_type, index, query, *k, post.as_ref())
								.await?;
						let mut q: VecDeque<Row> = rows.into();
						for _ in 0..*consumed {
							q.pop_front();
						}
						*results = Some(q);
					}
					match results.as_mut().unwrap().pop_front() {
						Some(row) => {
							*consumed += 1;
							Ok(Some(row))
						}
						None => Ok(None),
					}
				}
				Cursor::Spatial {
					record_type,
					index,
					region,
					post,
					ranges,
					range,
					resume,
					scan,
				} => {
					if ranges.is_empty() {
						*ranges = spatial_ranges(exe, index, region)?;
					}
					loop {
						if scan.is_none() {
							let Some(r) = ranges.get(*range) else {
								return Ok(None);
							};
							*scan = Some(TrackedScan::new(r.clone(), resume.take().as_deref()));
						}
						let current = scan.as_mut().unwrap();
						match current.next(exe).await? {
							None => {
								*scan = None;
								*range += 1;
								continue;
							}
							Some((k, _)) => {
								let base = IndexKeyBase::new(exe.root, index);
								let elements = base.unpack(&k)?;
								// Cell id first, then the primary key
								let pk = &elements[1..];
								let Some(record) = exe.load_record(record_type, pk).await?
								else {
									continue;
								};
								let rt = exe.schema.record_type(record_type)?;
								if !spatial_matches(exe, index, region, rt, &record)? {
									continue;
								}
								if let Some(post) = post {
									if !post.matches(rt, &record) {
										continue;
									}
								}
								return Ok(Some((tuple::pack(pk)?, record)));
							}
						}
					}
				}
			}
		})
	}

	/// The resumption token after partial consumption, or `None` when the
	/// stream is exhausted
	pub fn token(&self) -> Option<Token> {
		match self {
			Cursor::Full {
				scan,
			} => scan.resume_key().map(|resume| Token::Scan {
				resume,
			}),
			Cursor::Index {
				scan,
				..
			} => scan.resume_key().map(|resume| Token::Scan {
				resume,
			}),
			Cursor::Filter {
				child,
				..
			} => child.token().map(|t| Token::Filter {
				child: Box::new(t),
			}),
			Cursor::Limit {
				child,
				..
			} => child.token().map(|t| Token::Limit {
				child: Box::new(t),
			}),
			Cursor::Sort {
				buffered,
				consumed,
				..
			} => match buffered {
				Some(q) if q.is_empty() => None,
				_ => Some(Token::Sort {
					skip: *consumed,
				}),
			},
			Cursor::Union {
				children,
				active,
				seen,
			} => {
				if *active >= children.len() {
					return None;
				}
				Some(Token::Union {
					active: *active,
					seen: seen.iter().cloned().collect(),
					child: children[*active].token().map(Box::new),
				})
			}
			Cursor::InJoin {
				children,
				active,
			} => {
				if *active >= children.len() {
					return None;
				}
				Some(Token::InJoin {
					active: *active,
					child: children[*active].token().map(Box::new),
				})
			}
			Cursor::Vector {
				results,
				consumed,
				..
			} => match results {
				Some(q) if q.is_empty() => None,
				_ => Some(Token::Vector {
					skip: *consumed,
				}),
			},
			Cursor::Spatial {
				ranges,
				range,
				resume,
				scan,
				..
			} => {
				if !ranges.is_empty() && *range >= ranges.len() {
					return None;
				}
				// Before the current range's scan starts, the cursor still
				// carries the token it was built from
				let resume = match scan {
					Some(s) => s.resume_key(),
					None => resume.clone(),
				};
				Some(Token::Spatial {
					range: *range,
					resume,
				})
			}
		}
	}
}

/// The record type a plan subtree scans
fn plan_record_type(plan: &PlanNode) -> String {
	match plan {
		PlanNode::FullScan {
			record_type,
		}
		| PlanNode::IndexScan {
			record_type,
			..
		}
		| PlanNode::VectorSearch {
			record_type,
			..
		}
		| PlanNode::SpatialScan {
			record_type,
			..
		} => record_type.clone(),
		PlanNode::Filter {
			child,
			..
		}
		| PlanNode::Limit {
			child,
			..
		}
		| PlanNode::Sort {
			child,
			..
		} => plan_record_type(child),
		PlanNode::Union {
			children,
		}
		| PlanNode::InJoin {
			children,
		} => children.first().map(plan_record_type).unwrap_or_default(),
	}
}

fn sort_rows(rows: &mut [Row], rt: &crate::schema::RecordType, by: &[SortKey]) {
	rows.sort_by(|(_, a), (_, b)| {
		for key in by {
			let va = rt.extract(a, &key.path);
			let vb = rt.extract(b, &key.path);
			let ord = if key.descending {
				vb.cmp(&va)
			} else {
				va.cmp(&vb)
			};
			if !ord.is_eq() {
				return ord;
			}
		}
		std::cmp::Ordering::Equal
	});
}

/// Runs the approximate search, falling back to the exact scan when the
/// circuit breaker is open or the graph path fails
async fn vector_search(
	exe: &mut Executor<'_>,
	record_type: &str,
	index: &str,
	query: &Vector,
	k: usize,
	post: Option<&Expr>,
) -> Result<Vec<Row>, Error> {
	let def = exe.schema.index(index)?.clone();
	let IndexKind::Vector(opts) = &def.kind else {
		return Err(Error::UnknownIndex(index.to_string()));
	};
	let base = IndexKeyBase::new(exe.root, index);
	let mut opts = *opts;
	opts.strategy = exe.cfg.strategy_for(index, opts.strategy);
	let maintainer = VectorMaintainer::new(
		def.clone(),
		base,
		opts,
		exe.cfg.hnsw_m,
		exe.cfg.hnsw_ef_construction,
	);
	let hnsw = maintainer.hnsw();
	let ef = exe.cfg.hnsw_ef.unwrap_or_else(|| (2 * k).max(100));
	let use_graph = matches!(opts.strategy, VectorStrategy::Hnsw { .. })
		&& exe.monitor.should_attempt(index);
	let found = if use_graph {
		match hnsw.search(exe.tx, query, k, ef).await {
			Ok(found) => {
				exe.monitor.success(index);
				found
			}
			Err(e) => {
				exe.monitor.failure(index);
				warn!(
					target: "tupledb::core::idx",
					index,
					error = %e,
					"graph search failed, falling back to flat scan"
				);
				hnsw.scan_flat(exe.tx, query, k).await?
			}
		}
	} else {
		hnsw.scan_flat(exe.tx, query, k).await?
	};
	let mut rows = Vec::with_capacity(found.len());
	for (_dist, pk) in found {
		let Some(record) = exe.load_record(record_type, &pk).await? else {
			continue;
		};
		if let Some(post) = post {
			let rt = exe.schema.record_type(record_type)?;
			if !post.matches(rt, &record) {
				continue;
			}
		}
		rows.push((tuple::pack(&pk)?, record));
	}
	rows.truncate(k);
	Ok(rows)
}

fn spatial_ranges(
	exe: &Executor<'_>,
	index: &str,
	region: &Region,
) -> Result<Vec<Range<Key>>, Error> {
	let def = exe.schema.index(index)?.clone();
	let IndexKind::Spatial(opts) = &def.kind else {
		return Err(Error::UnknownIndex(index.to_string()));
	};
	let base = IndexKeyBase::new(exe.root, index);
	let maintainer = SpatialMaintainer::new(def.clone(), base, *opts);
	maintainer.cover_ranges(region)
}

fn spatial_matches(
	exe: &Executor<'_>,
	index: &str,
	region: &Region,
	rt: &crate::schema::RecordType,
	record: &Object,
) -> Result<bool, Error> {
	let def = exe.schema.index(index)?;
	let IndexKind::Spatial(opts) = &def.kind else {
		return Err(Error::UnknownIndex(index.to_string()));
	};
	let base = IndexKeyBase::new(exe.root, index);
	let maintainer = SpatialMaintainer::new(def.clone(), base, *opts);
	Ok(match maintainer.coordinates(rt, record) {
		Some((x, y, z)) => region.contains(x, y, z),
		None => false,
	})
}

