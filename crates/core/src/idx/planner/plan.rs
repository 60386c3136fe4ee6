use super::expr::Expr;
use crate::err::Error;
use crate::idx::trees::spatial::Region;
use crate::idx::trees::vector::Vector;
use crate::key;
use crate::key::Subspace;
use crate::kvs::Key;
use crate::schema::FieldPath;
use crate::val::Value;
use std::ops::Range;

/// A sort key of a query
#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
	pub path: FieldPath,
	pub descending: bool,
}

impl SortKey {
	pub fn asc(path: impl Into<FieldPath>) -> Self {
		Self {
			path: path.into(),
			descending: false,
		}
	}

	pub fn desc(path: impl Into<FieldPath>) -> Self {
		Self {
			path: path.into(),
			descending: true,
		}
	}
}

/// One bound of a range window
#[derive(Clone, Debug, PartialEq)]
pub enum Bound {
	Unbounded,
	Inclusive(Value),
	Exclusive(Value),
}

/// The tightest `[lo, hi)` window over one indexed column, merged from
/// every range predicate on the column. A prefix match additionally
/// narrows the scan to keys whose column encoding starts with the
/// prefix's encoding.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Window {
	pub lo: Bound,
	pub hi: Bound,
	pub prefix_match: Option<Value>,
}

impl Default for Bound {
	fn default() -> Self {
		Bound::Unbounded
	}
}

impl Window {
	/// Tightens the lower bound
	pub fn narrow_lo(&mut self, value: &Value, inclusive: bool) {
		let proposed = if inclusive {
			Bound::Inclusive(value.clone())
		} else {
			Bound::Exclusive(value.clone())
		};
		self.lo = match (&self.lo, &proposed) {
			(Bound::Unbounded, _) => proposed,
			(Bound::Inclusive(a) | Bound::Exclusive(a), Bound::Inclusive(b)) if b > a => proposed,
			(Bound::Inclusive(a), Bound::Exclusive(b)) if b >= a => proposed,
			(Bound::Exclusive(a), Bound::Exclusive(b)) if b > a => proposed,
			_ => return,
		};
	}

	/// Tightens the upper bound
	pub fn narrow_hi(&mut self, value: &Value, inclusive: bool) {
		let proposed = if inclusive {
			Bound::Inclusive(value.clone())
		} else {
			Bound::Exclusive(value.clone())
		};
		self.hi = match (&self.hi, &proposed) {
			(Bound::Unbounded, _) => proposed,
			(Bound::Inclusive(a) | Bound::Exclusive(a), Bound::Inclusive(b)) if b < a => proposed,
			(Bound::Inclusive(a), Bound::Exclusive(b)) if b <= a => proposed,
			(Bound::Exclusive(a), Bound::Exclusive(b)) if b < a => proposed,
			_ => return,
		};
	}

	pub fn is_bounded(&self) -> bool {
		self.lo != Bound::Unbounded || self.hi != Bound::Unbounded || self.prefix_match.is_some()
	}
}

/// The byte range an index scan covers: leading equality values, then an
/// optional window on the next column
#[derive(Clone, Debug, PartialEq)]
pub struct ScanRange {
	pub prefix: Vec<Value>,
	pub window: Window,
}

impl ScanRange {
	/// The concrete key range under an index
	pub fn to_key_range(&self, root: &Subspace, index: &str) -> Result<Range<Key>, Error> {
		let mut rng = self.bounds_range(root, index)?;
		// A prefix match intersects with the bound-derived range
		if let Some(v) = &self.window.prefix_match {
			let packed = crate::tuple::pack_one(v)?;
			// Drop the element terminator so extensions stay in range
			let open = &packed[..packed.len() - 1];
			let mut begin = key::index::new(root, index, &self.prefix)?;
			begin.extend_from_slice(open);
			let mut end = begin.clone();
			end.push(0xff);
			if begin > rng.start {
				rng.start = begin;
			}
			if end < rng.end {
				rng.end = end;
			}
		}
		Ok(rng)
	}

	fn bounds_range(&self, root: &Subspace, index: &str) -> Result<Range<Key>, Error> {
		let begin = match &self.window.lo {
			Bound::Unbounded => {
				let mut k = key::index::new(root, index, &self.prefix)?;
				if self.prefix.is_empty() {
					k.push(0x00);
				}
				k
			}
			Bound::Inclusive(v) => {
				let mut elements = self.prefix.clone();
				elements.push(v.clone());
				key::index::new(root, index, &elements)?
			}
			Bound::Exclusive(v) => {
				let mut elements = self.prefix.clone();
				elements.push(v.clone());
				let mut k = key::index::new(root, index, &elements)?;
				// Skip every entry carrying this exact column value
				k.push(0xff);
				k
			}
		};
		let end = match &self.window.hi {
			Bound::Unbounded => {
				let mut k = key::index::new(root, index, &self.prefix)?;
				k.push(0xff);
				k
			}
			Bound::Inclusive(v) => {
				let mut elements = self.prefix.clone();
				elements.push(v.clone());
				let mut k = key::index::new(root, index, &elements)?;
				k.push(0xff);
				k
			}
			Bound::Exclusive(v) => {
				let mut elements = self.prefix.clone();
				elements.push(v.clone());
				key::index::new(root, index, &elements)?
			}
		};
		Ok(begin..end)
	}
}

/// An executable query plan
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum PlanNode {
	/// Scan every record of the target type
	FullScan {
		record_type: String,
	},
	/// Scan one index range, loading each entry's record
	IndexScan {
		index: String,
		record_type: String,
		range: ScanRange,
	},
	/// Keep only records matching the predicate
	Filter {
		child: Box<PlanNode>,
		predicate: Expr,
	},
	/// Stop after `n` records
	Limit {
		child: Box<PlanNode>,
		n: usize,
	},
	/// Buffer and order the child's output
	Sort {
		child: Box<PlanNode>,
		by: Vec<SortKey>,
	},
	/// Concatenate children, dropping records already yielded
	Union {
		children: Vec<PlanNode>,
	},
	/// Concatenate the per-value scans of an IN atom
	InJoin {
		children: Vec<PlanNode>,
	},
	/// Approximate k-nearest-neighbour search with exact post-filtering
	VectorSearch {
		index: String,
		record_type: String,
		query: Vector,
		k: usize,
		post: Option<Expr>,
	},
	/// Cell-cover scan with exact region post-filtering
	SpatialScan {
		index: String,
		record_type: String,
		region: Region,
		post: Option<Expr>,
	},
}

impl PlanNode {
	/// A short rendering for logs and deterministic tie-breaking
	pub fn describe(&self) -> String {
		match self {
			PlanNode::FullScan {
				record_type,
			} => format!("FullScan({record_type})"),
			PlanNode::IndexScan {
				index,
				range,
				..
			} => {
				format!("IndexScan({index}, prefix={:?}, window={:?})", range.prefix, range.window)
			}
			PlanNode::Filter {
				child,
				..
			} => format!("Filter({})", child.describe()),
			PlanNode::Limit {
				child,
				n,
			} => format!("Limit({}, {n})", child.describe()),
			PlanNode::Sort {
				child,
				..
			} => format!("Sort({})", child.describe()),
			PlanNode::Union {
				children,
			} => {
				let inner: Vec<String> = children.iter().map(|c| c.describe()).collect();
				format!("Union({})", inner.join(", "))
			}
			PlanNode::InJoin {
				children,
			} => format!("InJoin({} branches)", children.len()),
			PlanNode::VectorSearch {
				index,
				k,
				..
			} => format!("VectorSearch({index}, k={k})"),
			PlanNode::SpatialScan {
				index,
				..
			} => format!("SpatialScan({index})"),
		}
	}
}
