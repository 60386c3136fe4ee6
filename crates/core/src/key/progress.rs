//! Derives the progress subspaces used by online operations.
//!
//! Each long-running operation owns `progress/<opId>/…`: a range set of
//! completed intervals, plus an `errors` region recording ranges that
//! failed and were skipped.

use super::Subspace;
use crate::err::Error;
use crate::val::Value;

/// The range-set subspace for one online operation
pub fn ranges(root: &Subspace, op_id: &str) -> Result<Subspace, Error> {
	let prefix = super::category_prefix(root, super::PROGRESS);
	Subspace::new(prefix).nest(&[Value::from(op_id)])
}

/// The failed-range subspace for one online operation
pub fn errors(root: &Subspace, op_id: &str) -> Result<Subspace, Error> {
	let prefix = super::category_prefix(root, super::PROGRESS);
	Subspace::new(prefix).nest(&[Value::from(op_id), Value::from("errors")])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn op_subspaces_are_disjoint() {
		let root = Subspace::new(b"t".to_vec());
		let a = ranges(&root, "build-byEmail").unwrap();
		let b = ranges(&root, "build-byCity").unwrap();
		assert!(!a.contains(b.key()));
		assert!(!b.contains(a.key()));
		let e = errors(&root, "build-byEmail").unwrap();
		assert!(!a.contains(e.key()));
	}
}
