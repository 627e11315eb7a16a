//! Predicate implication testing.
//!
//! `subset_of(a, b)` answers: is the truth of `a` sufficient for the truth
//! of `b`? The test must be sound; false negatives are acceptable. It
//! drives partial-index applicability, SELF-span detection during
//! sarging, and minimality pruning across candidate indexes. Both inputs
//! are expected in normalised form.

use std::cmp::Ordering;

use crate::expr::{CmpOp, Expr};
use crate::val::Value;

/// Whether every document satisfying `a` also satisfies `b`.
pub fn subset_of(a: &Expr, b: &Expr) -> bool {
	if a.equivalent_to(b) {
		return true;
	}
	if b.is_true() || a.is_false() {
		return true;
	}
	// Each disjunct of a must imply b on its own
	if let Expr::Or(disjuncts) = a {
		return !disjuncts.is_empty() && disjuncts.iter().all(|d| subset_of(d, b));
	}
	// a must imply every conjunct of b
	if let Expr::And(conjuncts) = b {
		return conjuncts.iter().all(|c| subset_of(a, c));
	}
	// A conjunction implies b when any of its conjuncts does
	if let Expr::And(conjuncts) = a {
		if conjuncts.iter().any(|c| subset_of(c, b)) {
			return true;
		}
	}
	// Implying any branch of a disjunction is enough
	if let Expr::Or(disjuncts) = b {
		if disjuncts.iter().any(|d| subset_of(a, d)) {
			return true;
		}
	}
	atom_subset(a, b)
}

/// Implication between two non-boolean-composite predicates.
fn atom_subset(a: &Expr, b: &Expr) -> bool {
	// Existence: a comparison can only hold on a present operand, and on
	// a valued one since NULL operands never compare TRUE.
	if let Some(target) = existence_target(b, false) {
		if implies_not_missing(a, target) {
			return true;
		}
	}
	if let Some(target) = existence_target(b, true) {
		if implies_valued(a, target) {
			return true;
		}
	}
	// Numeric / collation implication between comparisons on the same
	// operand
	let (Some((ta, ops_a)), Some((tb, op_b, vb))) = (comparison(a), single_comparison(b)) else {
		return false;
	};
	if !ta.equivalent_to(tb) {
		return false;
	}
	ops_a.iter().any(|(op_a, va)| range_implies(*op_a, va, op_b, &vb))
}

/// Does `x op_a va` imply `x op_b vb`?
fn range_implies(op_a: CmpOp, va: &Value, op_b: CmpOp, vb: &Value) -> bool {
	let ord = va.collate(vb);
	match (op_a, op_b) {
		// An equality implies whatever its value satisfies
		(CmpOp::Eq, CmpOp::Eq) => ord == Ordering::Equal,
		(CmpOp::Eq, CmpOp::Lt) => ord == Ordering::Less,
		(CmpOp::Eq, CmpOp::Le) => ord != Ordering::Greater,
		(CmpOp::Eq, CmpOp::Gt) => ord == Ordering::Greater,
		(CmpOp::Eq, CmpOp::Ge) => ord != Ordering::Less,
		// Lower bounds imply looser lower bounds
		(CmpOp::Gt, CmpOp::Gt) | (CmpOp::Gt, CmpOp::Ge) | (CmpOp::Ge, CmpOp::Ge) => {
			ord != Ordering::Less
		}
		(CmpOp::Ge, CmpOp::Gt) => ord == Ordering::Greater,
		// Upper bounds imply looser upper bounds
		(CmpOp::Lt, CmpOp::Lt) | (CmpOp::Lt, CmpOp::Le) | (CmpOp::Le, CmpOp::Le) => {
			ord != Ordering::Greater
		}
		(CmpOp::Le, CmpOp::Lt) => ord == Ordering::Less,
		_ => false,
	}
}

/// The operand of an existence test: `IS NOT MISSING` when `valued` is
/// false, `IS VALUED` when true.
fn existence_target(b: &Expr, valued: bool) -> Option<&Expr> {
	match (b, valued) {
		(Expr::IsNotMissing(x), false) => Some(x),
		(Expr::IsValued(x) | Expr::IsNotNull(x), true) => Some(x),
		_ => None,
	}
}

fn implies_not_missing(a: &Expr, target: &Expr) -> bool {
	implies_valued(a, target)
		|| matches!(a, Expr::IsNull(x) if x.equivalent_to(target))
		|| matches!(a, Expr::IsNotMissing(x) if x.equivalent_to(target))
}

/// Whether the truth of `a` forces `target` to be a valued (non-null,
/// non-missing) expression.
fn implies_valued(a: &Expr, target: &Expr) -> bool {
	match a {
		Expr::Cmp { op, left, right } => {
			if matches!(op, CmpOp::Neq) {
				// x != c is satisfiable by NULL-adjacent shapes under
				// some evaluators; stay conservative
				return false;
			}
			(left.equivalent_to(target) && right.static_value().is_some())
				|| (right.equivalent_to(target) && left.static_value().is_some())
		}
		Expr::Between { expr, .. } => expr.equivalent_to(target),
		Expr::In { expr, .. } => expr.equivalent_to(target),
		Expr::IsValued(x) | Expr::IsNotNull(x) => x.equivalent_to(target),
		_ => false,
	}
}

type RangeOps = Vec<(CmpOp, Value)>;

/// Decompose a predicate into range constraints over one operand.
fn comparison(e: &Expr) -> Option<(&Expr, RangeOps)> {
	match e {
		Expr::Cmp { op, left, right } => {
			let v = right.static_value()?;
			matches!(*op, CmpOp::Eq | CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge)
				.then(|| (left.as_ref(), vec![(*op, v)]))
		}
		Expr::Between { expr, low, high } => {
			let l = low.static_value()?;
			let h = high.static_value()?;
			Some((expr.as_ref(), vec![(CmpOp::Ge, l), (CmpOp::Le, h)]))
		}
		_ => None,
	}
}

fn single_comparison(e: &Expr) -> Option<(&Expr, CmpOp, Value)> {
	match e {
		Expr::Cmp { op, left, right } => {
			let v = right.static_value()?;
			matches!(*op, CmpOp::Eq | CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge)
				.then(|| (left.as_ref(), *op, v))
		}
		_ => None,
	}
}
