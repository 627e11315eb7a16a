//! Disjunctive-normal-form rewriting of predicates.
//!
//! The rewrite is bottom-up and idempotent: flattening and boolean
//! identities, negation pushed through De Morgan, constant folding,
//! range fusion over a common operand, and canonicalisation of the
//! null/missing tests. Distribution into DNF is bounded; a conjunction
//! whose expansion would exceed the cap is left un-distributed and
//! treated conservatively downstream.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::err::Error;
use crate::expr::{CmpOp, Expr, Exprs};
use crate::val::Value;

/// Expansion cap for DNF distribution.
const DISTRIBUTION_CAP: usize = 1024;

/// The DNF rewriter. Stateless; one instance can map any number of
/// expressions.
#[derive(Clone, Copy, Debug)]
pub struct Dnf {
	cap: usize,
}

impl Default for Dnf {
	fn default() -> Self {
		Self::new()
	}
}

impl Dnf {
	pub fn new() -> Self {
		Self { cap: DISTRIBUTION_CAP }
	}

	/// Rewrite an expression into disjunctive normal form.
	pub fn map(&self, expr: &Arc<Expr>) -> Result<Arc<Expr>, Error> {
		let out = match expr.as_ref() {
			Expr::Constant(_) | Expr::Param(_) | Expr::Field(_) => expr.clone(),
			Expr::Not(x) => {
				let x = self.map(x)?;
				fold(self.negate(&x)?)
			}
			Expr::And(ops) => {
				let mut flat = Vec::with_capacity(ops.len());
				for op in ops {
					flatten_into(self.map(op)?, true, &mut flat);
				}
				let conj = self.simplify_and(flat);
				self.distribute(conj)?
			}
			Expr::Or(ops) => {
				let mut flat = Vec::with_capacity(ops.len());
				for op in ops {
					flatten_into(self.map(op)?, false, &mut flat);
				}
				simplify_or(flat)
			}
			Expr::Cmp { op, left, right } => {
				let mut op = *op;
				let mut left = self.map(left)?;
				let mut right = self.map(right)?;
				// Orient constants to the right
				if matches!(left.as_ref(), Expr::Constant(_))
					&& !matches!(right.as_ref(), Expr::Constant(_))
				{
					std::mem::swap(&mut left, &mut right);
					op = op.swapped();
				}
				// Equality against NULL can never be satisfied
				if matches!(op, CmpOp::Eq | CmpOp::Neq)
					&& (is_null_constant(&left) || is_null_constant(&right))
				{
					return Ok(Arc::new(Expr::FALSE));
				}
				fold(Expr::cmp(op, left, right))
			}
			Expr::Between { expr, low, high } => {
				let expr = self.map(expr)?;
				let low = self.map(low)?;
				let high = self.map(high)?;
				if let (Some(l), Some(h)) = (low.static_value(), high.static_value()) {
					if l.collate(&h) == Ordering::Greater {
						return Ok(Arc::new(Expr::FALSE));
					}
				}
				fold(Expr::between(expr, low, high))
			}
			Expr::In { expr, array } => {
				let expr = self.map(expr)?;
				let array = self.map(array)?;
				if let Some(Value::Array(items)) = array.static_value() {
					if items.is_empty() {
						return Ok(Arc::new(Expr::FALSE));
					}
				}
				fold(Arc::new(Expr::In { expr, array }))
			}
			Expr::IsNull(x) => fold(Arc::new(Expr::IsNull(self.map(x)?))),
			Expr::IsNotNull(x) => fold(Arc::new(Expr::IsValued(self.map(x)?))),
			Expr::IsMissing(x) => fold(Arc::new(Expr::IsMissing(self.map(x)?))),
			Expr::IsNotMissing(x) => fold(Arc::new(Expr::IsNotMissing(self.map(x)?))),
			Expr::IsValued(x) => fold(Arc::new(Expr::IsValued(self.map(x)?))),
			Expr::Arith { op, left, right } => {
				fold(Arc::new(Expr::Arith { op: *op, left: self.map(left)?, right: self.map(right)? }))
			}
			Expr::Function { name, args } => {
				let mut mapped = Vec::with_capacity(args.len());
				for arg in args {
					mapped.push(self.map(arg)?);
				}
				Arc::new(Expr::Function { name: name.clone(), args: mapped })
			}
		};
		Ok(out)
	}

	/// Negate an already-normalised expression.
	fn negate(&self, expr: &Arc<Expr>) -> Result<Arc<Expr>, Error> {
		let out = match expr.as_ref() {
			Expr::Constant(Value::Bool(b)) => Arc::new(Expr::Constant(Value::Bool(!b))),
			Expr::Not(inner) => inner.clone(),
			Expr::And(ops) => {
				let mut negated: Exprs = Vec::with_capacity(ops.len());
				for op in ops {
					negated.push(Arc::new(Expr::Not(op.clone())));
				}
				self.map(&Expr::or(negated))?
			}
			Expr::Or(ops) => {
				let mut negated: Exprs = Vec::with_capacity(ops.len());
				for op in ops {
					negated.push(Arc::new(Expr::Not(op.clone())));
				}
				self.map(&Expr::and(negated))?
			}
			Expr::Cmp { op, left, right } => match op.negated() {
				Some(op) => self.map(&Expr::cmp(op, left.clone(), right.clone()))?,
				None => Expr::not(expr.clone()),
			},
			Expr::Between { expr: e, low, high } => self.map(&Expr::or(vec![
				Expr::cmp(CmpOp::Lt, e.clone(), low.clone()),
				Expr::cmp(CmpOp::Gt, e.clone(), high.clone()),
			]))?,
			Expr::IsNull(x) => Arc::new(Expr::IsValued(x.clone())),
			Expr::IsValued(x) => Arc::new(Expr::IsNull(x.clone())),
			Expr::IsMissing(x) => Arc::new(Expr::IsNotMissing(x.clone())),
			Expr::IsNotMissing(x) => Arc::new(Expr::IsMissing(x.clone())),
			_ => Expr::not(expr.clone()),
		};
		Ok(out)
	}

	/// Boolean identities, dedup and range fusion over a flat conjunct
	/// list. Returns the simplified conjunction, not yet distributed.
	fn simplify_and(&self, operands: Exprs) -> Arc<Expr> {
		let mut kept: Exprs = Vec::with_capacity(operands.len());
		for op in operands {
			if op.is_true() {
				continue;
			}
			if op.is_false() {
				return Arc::new(Expr::FALSE);
			}
			if kept.iter().any(|k| k.equivalent_to(&op)) {
				continue;
			}
			kept.push(op);
		}
		let kept = match fuse_ranges(kept) {
			Some(kept) => kept,
			None => return Arc::new(Expr::FALSE),
		};
		match kept.len() {
			0 => Arc::new(Expr::TRUE),
			1 => kept.into_iter().next().unwrap(),
			_ => Expr::and(kept),
		}
	}

	/// Distribute a conjunction over its disjunct children, bounded by
	/// the expansion cap.
	fn distribute(&self, conj: Arc<Expr>) -> Result<Arc<Expr>, Error> {
		let Expr::And(ops) = conj.as_ref() else {
			return Ok(conj);
		};
		let mut expansion: usize = 1;
		for op in ops {
			if let Expr::Or(inner) = op.as_ref() {
				expansion = expansion.saturating_mul(inner.len().max(1));
			}
		}
		if expansion <= 1 {
			return Ok(conj);
		}
		if expansion > self.cap {
			// Too wide; leave un-distributed
			return Ok(conj);
		}
		let mut disjuncts: Vec<Exprs> = vec![vec![]];
		for op in ops {
			match op.as_ref() {
				Expr::Or(inner) => {
					let mut next = Vec::with_capacity(disjuncts.len() * inner.len());
					for row in &disjuncts {
						for choice in inner {
							let mut row = row.clone();
							flatten_into(choice.clone(), true, &mut row);
							next.push(row);
						}
					}
					disjuncts = next;
				}
				_ => {
					for row in &mut disjuncts {
						row.push(op.clone());
					}
				}
			}
		}
		let mapped = disjuncts.into_iter().map(|row| self.simplify_and(row)).collect();
		Ok(simplify_or(mapped))
	}
}

fn flatten_into(expr: Arc<Expr>, conjunction: bool, out: &mut Exprs) {
	match (conjunction, expr.as_ref()) {
		(true, Expr::And(inner)) | (false, Expr::Or(inner)) => out.extend(inner.iter().cloned()),
		_ => out.push(expr),
	}
}

fn simplify_or(operands: Exprs) -> Arc<Expr> {
	let mut kept: Exprs = Vec::with_capacity(operands.len());
	for op in operands {
		if op.is_false() {
			continue;
		}
		if op.is_true() {
			return Arc::new(Expr::TRUE);
		}
		if kept.iter().any(|k| k.equivalent_to(&op)) {
			continue;
		}
		kept.push(op);
	}
	match kept.len() {
		0 => Arc::new(Expr::FALSE),
		1 => kept.into_iter().next().unwrap(),
		_ => Expr::or(kept),
	}
}

/// Fold a node that only depends on constants.
fn fold(expr: Arc<Expr>) -> Arc<Expr> {
	match expr.static_value() {
		Some(v) if !matches!(expr.as_ref(), Expr::Constant(_)) => Arc::new(Expr::Constant(v)),
		_ => expr,
	}
}

/// One bound of a fused range, with the operator that produced it.
struct Bound {
	op: CmpOp,
	value: Value,
}

/// Fuse comparisons over a common operand: the tightest lower and upper
/// bounds win, equalities are checked for consistency. Returns `None`
/// when the conjunction is unsatisfiable.
fn fuse_ranges(operands: Exprs) -> Option<Exprs> {
	// (target, eq, lower, upper) per distinct comparison operand
	let mut groups: Vec<(Arc<Expr>, Option<Value>, Option<Bound>, Option<Bound>)> = Vec::new();
	let mut kept: Exprs = Vec::with_capacity(operands.len());
	let mut order: Vec<Option<usize>> = Vec::with_capacity(operands.len());

	for op in operands {
		let comparison = match op.as_ref() {
			Expr::Cmp { op: cmp, left, right } => {
				right.static_value().map(|v| (left.clone(), *cmp, v))
			}
			_ => None,
		};
		let Some((target, cmp, value)) = comparison else {
			order.push(None);
			kept.push(op);
			continue;
		};
		if !matches!(cmp, CmpOp::Eq | CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge) {
			order.push(None);
			kept.push(op);
			continue;
		}
		let slot = match groups.iter().position(|(t, ..)| t.equivalent_to(&target)) {
			Some(i) => i,
			None => {
				groups.push((target, None, None, None));
				groups.len() - 1
			}
		};
		let (_, eq, lower, upper) = &mut groups[slot];
		match cmp {
			CmpOp::Eq => match eq {
				Some(prev) if prev.collate(&value) != Ordering::Equal => return None,
				_ => *eq = Some(value),
			},
			CmpOp::Gt | CmpOp::Ge => tighten(lower, cmp, value, Ordering::Greater),
			CmpOp::Lt | CmpOp::Le => tighten(upper, cmp, value, Ordering::Less),
			_ => unreachable!(),
		}
		order.push(Some(slot));
	}

	// Resolve each group to its fused comparisons
	let mut fused: Vec<Option<Exprs>> = Vec::with_capacity(groups.len());
	for (target, eq, lower, upper) in groups {
		fused.push(Some(resolve_group(target, eq, lower, upper)?));
	}

	// Re-emit in first-appearance order
	let mut out: Exprs = Vec::with_capacity(order.len());
	let mut kept = kept.into_iter();
	for slot in order {
		match slot {
			None => out.push(kept.next().expect("kept operand")),
			Some(i) => {
				if let Some(exprs) = fused[i].take() {
					out.extend(exprs);
				}
			}
		}
	}
	Some(out)
}

fn tighten(bound: &mut Option<Bound>, op: CmpOp, value: Value, stricter: Ordering) {
	match bound {
		None => *bound = Some(Bound { op, value }),
		Some(b) => {
			let ord = value.collate(&b.value);
			// At an equal value the exclusive operator is the tighter one
			let exclusive = matches!(op, CmpOp::Gt | CmpOp::Lt);
			if ord == stricter || (ord == Ordering::Equal && exclusive) {
				*bound = Some(Bound { op, value });
			}
		}
	}
}

fn resolve_group(
	target: Arc<Expr>,
	eq: Option<Value>,
	lower: Option<Bound>,
	upper: Option<Bound>,
) -> Option<Exprs> {
	if let Some(v) = eq {
		// The equality must be consistent with every range bound
		if let Some(b) = &lower {
			let ord = v.collate(&b.value);
			let ok = ord == Ordering::Greater || (ord == Ordering::Equal && b.op == CmpOp::Ge);
			if !ok {
				return None;
			}
		}
		if let Some(b) = &upper {
			let ord = v.collate(&b.value);
			let ok = ord == Ordering::Less || (ord == Ordering::Equal && b.op == CmpOp::Le);
			if !ok {
				return None;
			}
		}
		return Some(vec![Expr::eq(target, Arc::new(Expr::Constant(v)))]);
	}
	if let (Some(lo), Some(hi)) = (&lower, &upper) {
		match lo.value.collate(&hi.value) {
			Ordering::Greater => return None,
			Ordering::Equal => {
				if lo.op == CmpOp::Ge && hi.op == CmpOp::Le {
					let v = lo.value.clone();
					return Some(vec![Expr::eq(target, Arc::new(Expr::Constant(v)))]);
				}
				return None;
			}
			Ordering::Less => {}
		}
	}
	let mut out = Vec::with_capacity(2);
	if let Some(b) = lower {
		out.push(Expr::cmp(b.op, target.clone(), Arc::new(Expr::Constant(b.value))));
	}
	if let Some(b) = upper {
		out.push(Expr::cmp(b.op, target, Arc::new(Expr::Constant(b.value))));
	}
	Some(out)
}

fn is_null_constant(expr: &Expr) -> bool {
	matches!(expr, Expr::Constant(Value::Null))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::expr::Idiom;

	fn f(name: &str) -> Arc<Expr> {
		Arc::new(Expr::Field(Idiom::from(name)))
	}

	fn c(v: impl Into<Value>) -> Arc<Expr> {
		Arc::new(Expr::Constant(v.into()))
	}

	fn norm(e: &Arc<Expr>) -> Arc<Expr> {
		Dnf::new().map(e).unwrap()
	}

	#[test]
	fn flattens_and_drops_identities() {
		let e = Expr::and(vec![
			Expr::and(vec![Expr::eq(f("a"), c(1i64)), c(true)]),
			Expr::eq(f("b"), c(2i64)),
		]);
		let n = norm(&e);
		match n.as_ref() {
			Expr::And(ops) => assert_eq!(ops.len(), 2),
			other => panic!("expected And, got {other}"),
		}
	}

	#[test]
	fn false_collapses_a_conjunction() {
		let e = Expr::and(vec![Expr::eq(f("a"), c(1i64)), c(false)]);
		assert!(norm(&e).is_false());
		let e = Expr::or(vec![Expr::eq(f("a"), c(1i64)), c(true)]);
		assert!(norm(&e).is_true());
	}

	#[test]
	fn de_morgan_and_double_negation() {
		let e = Expr::not(Expr::and(vec![
			Expr::eq(f("a"), c(1i64)),
			Expr::cmp(CmpOp::Lt, f("b"), c(2i64)),
		]));
		let n = norm(&e);
		match n.as_ref() {
			Expr::Or(ops) => {
				assert_eq!(ops.len(), 2);
				assert!(matches!(ops[0].as_ref(), Expr::Cmp { op: CmpOp::Neq, .. }));
				assert!(matches!(ops[1].as_ref(), Expr::Cmp { op: CmpOp::Ge, .. }));
			}
			other => panic!("expected Or, got {other}"),
		}
		let e = Expr::not(Expr::not(Expr::eq(f("a"), c(1i64))));
		assert_eq!(norm(&e), Expr::eq(f("a"), c(1i64)));
	}

	#[test]
	fn distributes_to_dnf() {
		let e = Expr::and(vec![
			Expr::eq(f("a"), c(1i64)),
			Expr::or(vec![Expr::eq(f("b"), c(2i64)), Expr::eq(f("b"), c(3i64))]),
		]);
		let n = norm(&e);
		match n.as_ref() {
			Expr::Or(disjuncts) => {
				assert_eq!(disjuncts.len(), 2);
				for d in disjuncts {
					assert!(matches!(d.as_ref(), Expr::And(ops) if ops.len() == 2));
				}
			}
			other => panic!("expected Or of Ands, got {other}"),
		}
	}

	#[test]
	fn distribution_cap_leaves_node_unexpanded() {
		// 2^11 = 2048 disjuncts, above the cap
		let mut ops: Exprs = Vec::new();
		for i in 0..11 {
			let field = format!("f{i}");
			ops.push(Expr::or(vec![
				Expr::eq(f(&field), c(0i64)),
				Expr::eq(f(&field), c(1i64)),
			]));
		}
		let n = norm(&Expr::and(ops));
		assert!(matches!(n.as_ref(), Expr::And(_)));
	}

	#[test]
	fn fuses_ranges_over_a_common_operand() {
		let e = Expr::and(vec![
			Expr::cmp(CmpOp::Gt, f("x"), c(1i64)),
			Expr::cmp(CmpOp::Gt, f("x"), c(5i64)),
		]);
		assert_eq!(norm(&e), Expr::cmp(CmpOp::Gt, f("x"), c(5i64)));

		let e = Expr::and(vec![
			Expr::eq(f("x"), c(7i64)),
			Expr::cmp(CmpOp::Lt, f("x"), c(9i64)),
		]);
		assert_eq!(norm(&e), Expr::eq(f("x"), c(7i64)));

		let e = Expr::and(vec![
			Expr::eq(f("x"), c(7i64)),
			Expr::cmp(CmpOp::Lt, f("x"), c(5i64)),
		]);
		assert!(norm(&e).is_false());

		let e = Expr::and(vec![
			Expr::cmp(CmpOp::Ge, f("x"), c(5i64)),
			Expr::cmp(CmpOp::Le, f("x"), c(5i64)),
		]);
		assert_eq!(norm(&e), Expr::eq(f("x"), c(5i64)));
	}

	#[test]
	fn null_canonical_forms() {
		let e = Expr::eq(f("x"), c(Value::Null));
		assert!(norm(&e).is_false());

		let e = Arc::new(Expr::IsNotNull(f("x")));
		assert_eq!(norm(&e), Arc::new(Expr::IsValued(f("x"))));

		// IS NOT MISSING stays itself
		let e = Arc::new(Expr::IsNotMissing(f("x")));
		assert_eq!(norm(&e), e);
	}

	#[test]
	fn constant_orientation() {
		let e = Expr::cmp(CmpOp::Lt, c(5i64), f("x"));
		assert_eq!(norm(&e), Expr::cmp(CmpOp::Gt, f("x"), c(5i64)));
	}

	#[test]
	fn idempotent_on_a_mixed_predicate() {
		let e = Expr::not(Expr::or(vec![
			Expr::and(vec![
				Expr::cmp(CmpOp::Gt, f("a"), c(1i64)),
				Expr::cmp(CmpOp::Gt, f("a"), c(3i64)),
			]),
			Expr::not(Expr::eq(f("b"), c("x"))),
			Arc::new(Expr::IsNotNull(f("c"))),
		]));
		let once = norm(&e);
		let twice = norm(&once);
		assert_eq!(once, twice);
	}
}
