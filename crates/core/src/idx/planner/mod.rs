//! Cost-based query planning.
//!
//! The filter is normalised to disjunctive normal form. For every
//! conjunct, each readable value index applicable to the target record
//! type is offered the chance to bind its leading key columns: equality
//! atoms bind columns outright, and the first non-equality column may
//! take a merged range window or prefix. Whatever the index cannot
//! consume becomes a post-filter. Candidates are costed from histogram
//! selectivities (with fixed fallbacks when statistics are missing) and
//! the cheapest plan wins, with a deterministic hash breaking ties.

pub mod exe;
pub mod expr;
pub mod plan;

pub(crate) mod iterators;

use crate::cnf::Config;
use crate::err::Error;
use crate::idx::state;
use crate::idx::stats::{self, Histogram};
use crate::key::Subspace;
use crate::kvs::Transaction;
use crate::schema::{IndexDefinition, IndexKind, IndexState, Schema};
use crate::val::Value;
use expr::{to_dnf, Atom, Expr, Operator};
use plan::{PlanNode, ScanRange, SortKey, Window};
use std::hash::BuildHasher;

/// Fallback selectivities when no histogram is available
const EQUALITY_SELECTIVITY: f64 = 0.1;
const RANGE_SELECTIVITY: f64 = 0.3;
const FULL_SELECTIVITY: f64 = 1.0;

/// The assumed table size when no statistics exist
const DEFAULT_ROWS: f64 = 1000.0;

/// A typed query over one record type
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct RecordQuery {
	pub record_type: String,
	pub filter: Option<Expr>,
	pub sort: Vec<SortKey>,
	pub limit: Option<usize>,
	/// Opaque resumption token from a previous execution
	pub continuation: Option<Vec<u8>>,
	/// Restricts planning to one index, failing if it is not readable
	pub use_index: Option<String>,
}

impl RecordQuery {
	pub fn new(record_type: impl Into<String>) -> Self {
		Self {
			record_type: record_type.into(),
			filter: None,
			sort: Vec::new(),
			limit: None,
			continuation: None,
			use_index: None,
		}
	}

	pub fn filter(mut self, expr: Expr) -> Self {
		self.filter = Some(expr);
		self
	}

	pub fn sort(mut self, keys: impl IntoIterator<Item = SortKey>) -> Self {
		self.sort = keys.into_iter().collect();
		self
	}

	pub fn limit(mut self, n: usize) -> Self {
		self.limit = Some(n);
		self
	}

	pub fn continue_from(mut self, token: Vec<u8>) -> Self {
		self.continuation = Some(token);
		self
	}

	pub fn with_index(mut self, index: impl Into<String>) -> Self {
		self.use_index = Some(index.into());
		self
	}
}

/// A costed candidate during selection
struct Candidate {
	node: PlanNode,
	cost: f64,
	/// Whether the node already yields the query's requested order
	ordered: bool,
}

/// Plans a query into an executable node tree
pub(crate) async fn plan(
	tx: &mut Transaction,
	schema: &Schema,
	root: &Subspace,
	_cfg: &Config,
	query: &RecordQuery,
) -> Result<PlanNode, Error> {
	schema.record_type(&query.record_type)?;
	// An explicitly requested index must be readable
	if let Some(index) = &query.use_index {
		schema.index(index)?;
		state::require_readable(tx, root, index).await?;
	}
	let (node, ordered) = match &query.filter {
		None => (full_scan(&query.record_type, None), query.sort.is_empty()),
		Some(filter) => {
			let disjuncts = to_dnf(filter);
			let mut plans = Vec::with_capacity(disjuncts.len());
			let mut ordered = true;
			for conjunct in &disjuncts {
				let chosen = plan_conjunct(tx, schema, root, query, conjunct).await?;
				ordered &= chosen.ordered;
				plans.push(chosen.node);
			}
			if plans.len() == 1 {
				(plans.pop().unwrap(), ordered)
			} else {
				// Concatenated branches do not preserve a global order
				(
					PlanNode::Union {
						children: plans,
					},
					query.sort.is_empty(),
				)
			}
		}
	};
	let node = if ordered {
		node
	} else {
		PlanNode::Sort {
			child: Box::new(node),
			by: query.sort.clone(),
		}
	};
	let node = match query.limit {
		Some(n) => PlanNode::Limit {
			child: Box::new(node),
			n,
		},
		None => node,
	};
	debug!(target: "tupledb::core::planner", plan = %node.describe(), "selected query plan");
	Ok(node)
}

fn full_scan(record_type: &str, post: Option<Expr>) -> PlanNode {
	let scan = PlanNode::FullScan {
		record_type: record_type.to_string(),
	};
	match post {
		Some(predicate) => PlanNode::Filter {
			child: Box::new(scan),
			predicate,
		},
		None => scan,
	}
}

/// Plans one DNF conjunct: candidate generation, costing, selection
async fn plan_conjunct(
	tx: &mut Transaction,
	schema: &Schema,
	root: &Subspace,
	query: &RecordQuery,
	conjunct: &[Atom],
) -> Result<Candidate, Error> {
	let mut candidates: Vec<Candidate> = Vec::new();
	// The filtered full scan is always available
	let full_post = conjunct_expr(conjunct);
	candidates.push(Candidate {
		node: full_scan(&query.record_type, full_post),
		cost: DEFAULT_ROWS * FULL_SELECTIVITY + conjunct.len() as f64,
		ordered: query.sort.is_empty(),
	});
	for ix in schema.indexes_for(&query.record_type) {
		if !index_scannable(ix) {
			continue;
		}
		if let Some(wanted) = &query.use_index {
			if &ix.name != wanted {
				continue;
			}
		}
		// Only readable indexes may serve queries
		if state::get(tx, root, &ix.name).await? != IndexState::Readable {
			continue;
		}
		let histogram = stats::load(tx, root, &ix.name).await?;
		if let Some(candidate) = bind_index(schema, query, ix, conjunct, histogram.as_ref())? {
			candidates.push(candidate);
		}
	}
	// Minimum cost wins; ties break on a deterministic plan hash
	let hasher = ahash::RandomState::with_seeds(0x70, 0x6c, 0x61, 0x6e);
	candidates.sort_by(|a, b| {
		a.cost
			.total_cmp(&b.cost)
			.then_with(|| hasher.hash_one(a.node.describe()).cmp(&hasher.hash_one(b.node.describe())))
	});
	Ok(candidates.into_iter().next().unwrap())
}

/// Value indexes are the only kind the filter planner scans directly
fn index_scannable(ix: &IndexDefinition) -> bool {
	matches!(ix.kind, IndexKind::Value { .. })
}

fn conjunct_expr(atoms: &[Atom]) -> Option<Expr> {
	match atoms.len() {
		0 => None,
		1 => Some(atoms[0].to_expr()),
		_ => Some(Expr::And(atoms.iter().map(Atom::to_expr).collect())),
	}
}

/// Tries to bind a conjunct to an index's leading columns
fn bind_index(
	schema: &Schema,
	query: &RecordQuery,
	ix: &IndexDefinition,
	conjunct: &[Atom],
	histogram: Option<&Histogram>,
) -> Result<Option<Candidate>, Error> {
	let mut consumed = vec![false; conjunct.len()];
	let mut prefix: Vec<Value> = Vec::new();
	let mut window = Window::default();
	let mut in_branches: Option<Vec<Value>> = None;
	let mut selectivity = 1.0;
	for (col, path) in ix.key_paths.iter().enumerate() {
		// An equality atom binds the column and continues
		let eq = conjunct.iter().enumerate().find(|(i, a)| {
			!consumed[*i]
				&& !a.negated && &a.condition.path == path
				&& a.condition.op == Operator::Equal
		});
		if let Some((i, atom)) = eq {
			consumed[i] = true;
			selectivity *= match (col, histogram) {
				(0, Some(h)) => h.selectivity_eq(&atom.condition.value),
				_ => EQUALITY_SELECTIVITY,
			};
			prefix.push(atom.condition.value.clone());
			continue;
		}
		// An IN atom on the next column expands into equality branches
		let inn = conjunct.iter().enumerate().find(|(i, a)| {
			!consumed[*i]
				&& !a.negated && &a.condition.path == path
				&& a.condition.op == Operator::In
		});
		if let Some((i, atom)) = inn {
			if let Value::Array(options) = &atom.condition.value {
				consumed[i] = true;
				selectivity *= EQUALITY_SELECTIVITY * options.0.len() as f64;
				in_branches = Some(options.0.clone());
			}
			break;
		}
		// Range and prefix atoms bound the column and stop the binding
		let mut bounded = false;
		for (i, atom) in conjunct.iter().enumerate() {
			if consumed[i] || atom.negated || &atom.condition.path != path {
				continue;
			}
			let v = &atom.condition.value;
			match atom.condition.op {
				Operator::LessThan => window.narrow_hi(v, false),
				Operator::LessThanOrEqual => window.narrow_hi(v, true),
				Operator::MoreThan => window.narrow_lo(v, false),
				Operator::MoreThanOrEqual => window.narrow_lo(v, true),
				Operator::StartsWith => {
					if !matches!(v, Value::Strand(_) | Value::Bytes(_)) {
						continue;
					}
					window.prefix_match = Some(v.clone());
				}
				_ => continue,
			}
			consumed[i] = true;
			bounded = true;
		}
		if bounded {
			selectivity *= match (col, histogram) {
				(0, Some(h)) => {
					let lo = match &window.lo {
						plan::Bound::Inclusive(v) | plan::Bound::Exclusive(v) => Some(v),
						plan::Bound::Unbounded => None,
					};
					let hi = match &window.hi {
						plan::Bound::Inclusive(v) | plan::Bound::Exclusive(v) => Some(v),
						plan::Bound::Unbounded => None,
					};
					h.selectivity_range(lo, hi)
				}
				_ => RANGE_SELECTIVITY,
			};
		}
		break;
	}
	if prefix.is_empty() && !window.is_bounded() && in_branches.is_none() {
		return Ok(None);
	}
	// Whatever the index did not consume is re-checked on each record
	let post: Vec<Atom> =
		conjunct.iter().enumerate().filter(|(i, _)| !consumed[*i]).map(|(_, a)| a.clone()).collect();
	let rows = histogram.map(|h| h.total as f64).unwrap_or(DEFAULT_ROWS).max(1.0);
	let fetch_cost = selectivity.clamp(0.0, 1.0) * rows;
	let filter_cost = post.len() as f64 * fetch_cost * 0.1;
	let sort_cost = if sort_satisfied(query, ix, prefix.len()) {
		0.0
	} else if query.sort.is_empty() {
		0.0
	} else {
		fetch_cost * (fetch_cost.max(2.0)).log2() * 0.01
	};
	let satisfied = sort_satisfied(query, ix, prefix.len());
	let node = match in_branches {
		Some(options) => {
			let children = options
				.into_iter()
				.map(|value| {
					let mut branch_prefix = prefix.clone();
					branch_prefix.push(value);
					index_scan(schema, query, ix, branch_prefix, Window::default(), &post)
				})
				.collect::<Result<Vec<_>, Error>>()?;
			PlanNode::InJoin {
				children,
			}
		}
		None => index_scan(schema, query, ix, prefix, window, &post)?,
	};
	// Branch concatenation loses the index order
	let ordered = query.sort.is_empty()
		|| (satisfied && matches!(node_kind(&node), NodeKind::Scanlike));
	Ok(Some(Candidate {
		node,
		cost: fetch_cost + filter_cost + sort_cost,
		ordered,
	}))
}

enum NodeKind {
	Scanlike,
	Other,
}

fn node_kind(node: &PlanNode) -> NodeKind {
	match node {
		PlanNode::IndexScan {
			..
		} => NodeKind::Scanlike,
		PlanNode::Filter {
			child,
			..
		} => node_kind(child),
		_ => NodeKind::Other,
	}
}

fn index_scan(
	_schema: &Schema,
	query: &RecordQuery,
	ix: &IndexDefinition,
	prefix: Vec<Value>,
	window: Window,
	post: &[Atom],
) -> Result<PlanNode, Error> {
	let scan = PlanNode::IndexScan {
		index: ix.name.clone(),
		record_type: query.record_type.clone(),
		range: ScanRange {
			prefix,
			window,
		},
	};
	Ok(match conjunct_expr(post) {
		Some(predicate) => PlanNode::Filter {
			child: Box::new(scan),
			predicate,
		},
		None => scan,
	})
}

/// Whether the index's column order already yields the requested sort
fn sort_satisfied(query: &RecordQuery, ix: &IndexDefinition, bound_equalities: usize) -> bool {
	if query.sort.is_empty() {
		return true;
	}
	if query.sort.iter().any(|s| s.descending) {
		return false;
	}
	let remaining = &ix.key_paths[bound_equalities.min(ix.key_paths.len())..];
	query.sort.len() <= remaining.len()
		&& query.sort.iter().zip(remaining.iter()).all(|(s, p)| &s.path == p)
}

