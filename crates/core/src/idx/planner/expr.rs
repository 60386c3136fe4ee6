use crate::schema::{FieldPath, RecordType};
use crate::val::{Object, Value};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A comparison operator of a filter atom
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Operator {
	Equal,
	NotEqual,
	LessThan,
	LessThanOrEqual,
	MoreThan,
	MoreThanOrEqual,
	/// String or byte prefix match
	StartsWith,
	/// Membership in an array literal
	In,
	/// Array fields sharing at least one element with an array literal
	Overlaps,
}

impl Operator {
	/// The operator expressing the negation, when one exists
	pub fn negated(self) -> Option<Operator> {
		match self {
			Operator::Equal => Some(Operator::NotEqual),
			Operator::NotEqual => Some(Operator::Equal),
			Operator::LessThan => Some(Operator::MoreThanOrEqual),
			Operator::LessThanOrEqual => Some(Operator::MoreThan),
			Operator::MoreThan => Some(Operator::LessThanOrEqual),
			Operator::MoreThanOrEqual => Some(Operator::LessThan),
			Operator::StartsWith | Operator::In | Operator::Overlaps => None,
		}
	}
}

impl fmt::Display for Operator {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Operator::Equal => "=",
			Operator::NotEqual => "!=",
			Operator::LessThan => "<",
			Operator::LessThanOrEqual => "<=",
			Operator::MoreThan => ">",
			Operator::MoreThanOrEqual => ">=",
			Operator::StartsWith => "starts-with",
			Operator::In => "in",
			Operator::Overlaps => "overlaps",
		};
		f.write_str(s)
	}
}

/// One comparison of a field against a literal
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
	pub path: FieldPath,
	pub op: Operator,
	pub value: Value,
}

impl Condition {
	pub fn new(path: impl Into<FieldPath>, op: Operator, value: impl Into<Value>) -> Self {
		Self {
			path: path.into(),
			op,
			value: value.into(),
		}
	}

	/// Whether a record satisfies this condition
	pub fn matches(&self, rt: &RecordType, record: &Object) -> bool {
		let field = rt.extract(record, &self.path);
		match self.op {
			Operator::Equal => field == self.value,
			Operator::NotEqual => field != self.value,
			Operator::LessThan => field < self.value,
			Operator::LessThanOrEqual => field <= self.value,
			Operator::MoreThan => field > self.value,
			Operator::MoreThanOrEqual => field >= self.value,
			Operator::StartsWith => match (&field, &self.value) {
				(Value::Strand(s), Value::Strand(prefix)) => s.starts_with(prefix.as_str()),
				(Value::Bytes(b), Value::Bytes(prefix)) => b.starts_with(prefix),
				_ => false,
			},
			Operator::In => match &self.value {
				Value::Array(options) => options.0.contains(&field),
				_ => false,
			},
			Operator::Overlaps => match (&field, &self.value) {
				(Value::Array(a), Value::Array(b)) => a.0.iter().any(|v| b.0.contains(v)),
				_ => false,
			},
		}
	}
}

/// A boolean filter over record fields
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum Expr {
	And(Vec<Expr>),
	Or(Vec<Expr>),
	Not(Box<Expr>),
	Cond(Condition),
}

impl Expr {
	pub fn cond(path: impl Into<FieldPath>, op: Operator, value: impl Into<Value>) -> Self {
		Expr::Cond(Condition::new(path, op, value))
	}

	pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Self {
		Expr::And(exprs.into_iter().collect())
	}

	pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Self {
		Expr::Or(exprs.into_iter().collect())
	}

	#[allow(clippy::should_implement_trait)]
	pub fn not(expr: Expr) -> Self {
		Expr::Not(Box::new(expr))
	}

	/// Whether a record satisfies the filter
	pub fn matches(&self, rt: &RecordType, record: &Object) -> bool {
		match self {
			Expr::And(children) => children.iter().all(|e| e.matches(rt, record)),
			Expr::Or(children) => children.iter().any(|e| e.matches(rt, record)),
			Expr::Not(child) => !child.matches(rt, record),
			Expr::Cond(c) => c.matches(rt, record),
		}
	}
}

/// One atom of a normalised conjunct. A negated atom is one whose
/// operator has no direct negation; it can only post-filter.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Atom {
	pub condition: Condition,
	pub negated: bool,
}

impl Atom {
	pub fn matches(&self, rt: &RecordType, record: &Object) -> bool {
		self.condition.matches(rt, record) != self.negated
	}

	/// The equivalent expression, for post-filter composition
	pub fn to_expr(&self) -> Expr {
		let cond = Expr::Cond(self.condition.clone());
		if self.negated {
			Expr::not(cond)
		} else {
			cond
		}
	}
}

/// Normalises a filter to disjunctive normal form with negations pushed
/// onto the atoms: the result is a disjunction of conjunctions of atoms.
pub(crate) fn to_dnf(expr: &Expr) -> Vec<Vec<Atom>> {
	normalise(expr, false)
}

fn normalise(expr: &Expr, negate: bool) -> Vec<Vec<Atom>> {
	match (expr, negate) {
		(Expr::Not(child), negate) => normalise(child, !negate),
		// De Morgan turns a negated conjunction into a disjunction
		(Expr::And(children), false) | (Expr::Or(children), true) => {
			let mut disjuncts: Vec<Vec<Atom>> = vec![Vec::new()];
			for child in children {
				let child_disjuncts = normalise(child, negate);
				let mut next = Vec::with_capacity(disjuncts.len() * child_disjuncts.len());
				for d in &disjuncts {
					for cd in &child_disjuncts {
						let mut merged = d.clone();
						merged.extend(cd.iter().cloned());
						next.push(merged);
					}
				}
				disjuncts = next;
			}
			disjuncts
		}
		(Expr::Or(children), false) | (Expr::And(children), true) => {
			children.iter().flat_map(|c| normalise(c, negate)).collect()
		}
		(Expr::Cond(c), negate) => {
			let atom = if negate {
				match c.op.negated() {
					Some(op) => Atom {
						condition: Condition {
							path: c.path.clone(),
							op,
							value: c.value.clone(),
						},
						negated: false,
					},
					None => Atom {
						condition: c.clone(),
						negated: true,
					},
				}
			} else {
				Atom {
					condition: c.clone(),
					negated: false,
				}
			};
			vec![vec![atom]]
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::schema::Kind;

	fn user() -> RecordType {
		RecordType::new("User")
			.field("id", Kind::Int)
			.field("city", Kind::String)
			.field("age", Kind::Int)
			.primary_key(["id"])
	}

	#[test]
	fn conditions_evaluate_against_records() {
		let rt = user();
		let rec = crate::object! { id: 1, city: "T", age: 30 };
		assert!(Condition::new("city", Operator::Equal, "T").matches(&rt, &rec));
		assert!(Condition::new("age", Operator::MoreThanOrEqual, 30).matches(&rt, &rec));
		assert!(!Condition::new("age", Operator::LessThan, 30).matches(&rt, &rec));
		assert!(Condition::new("city", Operator::StartsWith, "T").matches(&rt, &rec));
		assert!(Condition::new(
			"city",
			Operator::In,
			vec![Value::from("T"), Value::from("K")]
		)
		.matches(&rt, &rec));
	}

	#[test]
	fn dnf_distributes_and_over_or() {
		// a = 1 AND (b = 2 OR b = 3) → [a=1, b=2] | [a=1, b=3]
		let expr = Expr::and([
			Expr::cond("a", Operator::Equal, 1),
			Expr::or([Expr::cond("b", Operator::Equal, 2), Expr::cond("b", Operator::Equal, 3)]),
		]);
		let dnf = to_dnf(&expr);
		assert_eq!(dnf.len(), 2);
		assert_eq!(dnf[0].len(), 2);
		assert_eq!(dnf[1].len(), 2);
		assert_eq!(dnf[1][1].condition.value, Value::from(3));
	}

	#[test]
	fn not_is_pushed_onto_atoms() {
		// NOT (a < 1 OR b = 2) → [a >= 1, b != 2]
		let expr = Expr::not(Expr::or([
			Expr::cond("a", Operator::LessThan, 1),
			Expr::cond("b", Operator::Equal, 2),
		]));
		let dnf = to_dnf(&expr);
		assert_eq!(dnf.len(), 1);
		assert_eq!(dnf[0][0].condition.op, Operator::MoreThanOrEqual);
		assert_eq!(dnf[0][1].condition.op, Operator::NotEqual);
		assert!(!dnf[0][0].negated);
	}

	#[test]
	fn unnegatable_atoms_keep_their_flag() {
		let expr = Expr::not(Expr::cond("city", Operator::StartsWith, "T"));
		let dnf = to_dnf(&expr);
		assert!(dnf[0][0].negated);
		let rt = user();
		let rec = crate::object! { id: 1, city: "K" };
		assert!(dnf[0][0].matches(&rt, &rec));
	}
}
