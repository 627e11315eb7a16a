//! Sargability analysis and span construction.
//!
//! [`sargable_for`] measures how many leading columns of a composite key
//! a predicate can constrain. [`sarg_for_keys`] turns the predicate into
//! a [`Spans`] disjunction over that prefix, composing per-key spans
//! right to left so the outer bounds of the composite stay valid whether
//! or not the inner keys narrow them.

use std::sync::Arc;

use crate::err::Error;
use crate::expr::{CmpOp, Expr, subset_of};
use crate::idx::planner::span::{Inclusion, Span, Spans, constrain_spans, full_spans};
use crate::val::Value;

/// Per-key fan-out cap during composition.
const COMPOSE_FAN_OUT: usize = 16;

/// Hard cap on the size of the final disjunction.
const MAX_SPANS: usize = 256;

/// The number of leading keys of `keys` that `pred` constrains. The walk
/// is left to right and stops at the first unconstrained key; a
/// composite index contributes only its left prefix.
pub fn sargable_for(pred: &Arc<Expr>, keys: &[Arc<Expr>]) -> usize {
	for (i, key) in keys.iter().enumerate() {
		if sarg_for(pred, key, false).is_empty() {
			return i;
		}
	}
	keys.len()
}

/// Build the composite span disjunction for a sargable key prefix.
/// `total` is the full arity of the index key, of which `sarg_keys` is
/// the constrained prefix. Gives up and returns the full span set when
/// the disjunction degenerates or exceeds [`MAX_SPANS`].
pub fn sarg_for_keys(
	pred: &Arc<Expr>,
	sarg_keys: &[Arc<Expr>],
	total: usize,
) -> Result<Spans, Error> {
	let n = sarg_keys.len();
	let mut missing_high = n < total;
	let mut ns: Option<Spans> = None;

	// Sarg composite keys right to left
	for i in (0..n).rev() {
		let rs = sarg_for(pred, &sarg_keys[i], missing_high);
		if rs.is_empty() {
			ns = None;
			continue;
		}

		// Notify the keys to the left when this key leaves the composite
		// open-ended on the right
		if i > 0 {
			missing_high = rs.iter().any(|s| !s.has_high());
		}

		ns = Some(match ns {
			None => rs,
			Some(next) => compose(rs, next),
		});
	}

	let ns = ns.unwrap_or_default();
	if ns.is_empty() || ns.len() > MAX_SPANS {
		return Ok(full_spans());
	}
	Ok(ns)
}

/// Cross product of the spans of one key (`rs`, the outer key) with the
/// accumulated spans of the keys to its right (`ns`).
fn compose(rs: Spans, ns: Spans) -> Spans {
	// A full span subsumes everything else for this key
	if rs.iter().any(Span::is_full) {
		return full_spans();
	}

	let mut sp = Spans::with_capacity(rs.len());
	for prev in rs {
		// An unconstrained outer span cannot be extended
		if !prev.has_low() && !prev.has_high() {
			sp.push(prev);
			continue;
		}
		// Limit fan-out
		if ns.len() > COMPOSE_FAN_OUT {
			sp.push(prev);
			continue;
		}
		// An unconstrained inner disjunct widens every pair to the outer
		// span alone
		if ns.iter().any(|next| next.is_full() || (!next.has_low() && !next.has_high())) {
			sp.push(prev);
			continue;
		}

		let mut pn = Spans::with_capacity(ns.len());
		for next in &ns {
			match compose_pair(&prev, next) {
				Some(pair) => pn.push(pair),
				None => break,
			}
		}
		if pn.len() == ns.len() {
			sp.extend(pn);
		} else {
			sp.push(prev);
		}
	}
	sp
}

/// Concatenate the bounds of an outer span with an inner one. The low
/// side always extends; the high side extends only through an exact
/// outer match, since an inner key cannot narrow the high bound of an
/// outer range. Returns `None` when the pair composes nothing.
fn compose_pair(prev: &Span, next: &Span) -> Option<Span> {
	let mut pre = prev.clone();
	let mut composed = false;

	let mut low_bit = Inclusion::LOW & prev.inclusion;
	if pre.has_low() && next.has_low() {
		pre.low.extend(next.low.iter().cloned());
		low_bit = Inclusion::LOW & prev.inclusion & next.inclusion;
		composed = true;
	}

	let mut high_bit = Inclusion::HIGH & prev.inclusion;
	if prev.is_exact_match() && next.has_high() {
		pre.high.extend(next.high.iter().cloned());
		high_bit = Inclusion::HIGH & prev.inclusion & next.inclusion;
		composed = true;
	}

	if !composed {
		return None;
	}
	pre.inclusion = low_bit | high_bit;
	Some(pre)
}

/// The per-key span visitor: what does `pred` say about `key`?
///
/// An empty result means the predicate does not constrain this key.
/// `missing_high` records that the keys to the right leave the composite
/// open-ended, in which case an equality cannot contribute a high bound.
pub fn sarg_for(pred: &Arc<Expr>, key: &Arc<Expr>, missing_high: bool) -> Spans {
	// The predicate may constrain the key by itself
	if subset_of(pred, key) {
		return vec![Span::self_span()];
	}
	match pred.as_ref() {
		Expr::And(ops) => {
			let mut spans = Spans::new();
			for op in ops {
				let s = sarg_for(op, key, missing_high);
				if s.is_empty() {
					continue;
				}
				spans = if spans.is_empty() { s } else { constrain_spans(spans, s) };
			}
			spans
		}
		Expr::Or(ops) => {
			// Every branch must constrain the key, or none bound it
			let mut spans = Spans::new();
			for op in ops {
				let s = sarg_for(op, key, missing_high);
				if s.is_empty() {
					return Spans::new();
				}
				spans.extend(s);
			}
			spans
		}
		Expr::Cmp { op, left, right } => {
			let (op, value) = match key_comparison(key, *op, left, right) {
				Some(found) => found,
				None => return Spans::new(),
			};
			let c = Expr::constant(value);
			let span = match op {
				CmpOp::Eq if missing_high => Span::new(vec![c], vec![], Inclusion::LOW),
				CmpOp::Eq => Span::new(vec![c.clone()], vec![c], Inclusion::BOTH),
				CmpOp::Lt => Span::new(vec![], vec![c], Inclusion::NEITHER),
				CmpOp::Le => Span::new(vec![], vec![c], Inclusion::HIGH),
				CmpOp::Gt => Span::new(vec![c], vec![], Inclusion::NEITHER),
				CmpOp::Ge => Span::new(vec![c], vec![], Inclusion::LOW),
				_ => return Spans::new(),
			};
			vec![span]
		}
		Expr::Between { expr, low, high } => {
			if !expr.equivalent_to(key) {
				return Spans::new();
			}
			match (low.static_value(), high.static_value()) {
				(Some(l), Some(h)) => {
					vec![Span::new(
						vec![Expr::constant(l)],
						vec![Expr::constant(h)],
						Inclusion::BOTH,
					)]
				}
				_ => Spans::new(),
			}
		}
		Expr::In { expr, array } => {
			if !expr.equivalent_to(key) {
				return Spans::new();
			}
			match array.static_value() {
				Some(Value::Array(items)) => items
					.into_iter()
					.map(|item| {
						let c = Expr::constant(item);
						if missing_high {
							Span::new(vec![c], vec![], Inclusion::LOW)
						} else {
							Span::new(vec![c.clone()], vec![c], Inclusion::BOTH)
						}
					})
					.collect(),
				_ => Spans::new(),
			}
		}
		Expr::IsNull(x) if x.equivalent_to(key) => vec![Span::null_span()],
		Expr::IsNotNull(x) | Expr::IsValued(x) if x.equivalent_to(key) => {
			vec![Span::valued_span()]
		}
		// The index holds exactly the entries where the key is present
		Expr::IsNotMissing(x) if x.equivalent_to(key) => vec![Span::full()],
		_ => Spans::new(),
	}
}

/// Match `key OP constant` in either orientation.
fn key_comparison(
	key: &Arc<Expr>,
	op: CmpOp,
	left: &Arc<Expr>,
	right: &Arc<Expr>,
) -> Option<(CmpOp, Value)> {
	if left.equivalent_to(key) {
		if let Some(v) = right.static_value() {
			return Some((op, v));
		}
	}
	if right.equivalent_to(key) {
		if let Some(v) = left.static_value() {
			return Some((op.swapped(), v));
		}
	}
	None
}
