//! Property-based invariants of the normalizer, the subset test and the
//! span builder.
//!
//! Predicate rewrites only need to preserve which rows a WHERE clause
//! selects, so evaluation equality is asserted on truthiness: NULL- and
//! MISSING-valued results both reject a row.

use std::sync::Arc;

use proptest::prelude::*;
use quiver_core::expr::{CmpOp, Dnf, Expr, evaluate, subset_of};
use quiver_core::idx::planner::sarg::{sarg_for_keys, sargable_for};
use quiver_core::val::Value;

fn arb_field() -> impl Strategy<Value = &'static str> {
	prop_oneof![Just("a"), Just("b"), Just("c"), Just("d")]
}

fn arb_scalar() -> impl Strategy<Value = Value> {
	prop_oneof![
		Just(Value::Null),
		any::<bool>().prop_map(Value::from),
		(-5i64..6).prop_map(Value::from),
		prop_oneof![Just("k"), Just("m"), Just("z")].prop_map(Value::from),
	]
}

fn arb_cmp_op() -> impl Strategy<Value = CmpOp> {
	prop_oneof![
		Just(CmpOp::Eq),
		Just(CmpOp::Neq),
		Just(CmpOp::Lt),
		Just(CmpOp::Le),
		Just(CmpOp::Gt),
		Just(CmpOp::Ge),
	]
}

fn arb_range_op() -> impl Strategy<Value = CmpOp> {
	prop_oneof![
		Just(CmpOp::Eq),
		Just(CmpOp::Lt),
		Just(CmpOp::Le),
		Just(CmpOp::Gt),
		Just(CmpOp::Ge),
	]
}

fn arb_leaf() -> impl Strategy<Value = Arc<Expr>> {
	prop_oneof![
		(arb_field(), arb_cmp_op(), arb_scalar())
			.prop_map(|(f, op, v)| Expr::cmp(op, Expr::field(f), Expr::constant(v))),
		arb_field().prop_map(|f| Arc::new(Expr::IsNull(Expr::field(f)))),
		arb_field().prop_map(|f| Arc::new(Expr::IsValued(Expr::field(f)))),
		arb_field().prop_map(|f| Arc::new(Expr::IsMissing(Expr::field(f)))),
		arb_field().prop_map(|f| Arc::new(Expr::IsNotMissing(Expr::field(f)))),
		(arb_field(), -5i64..6, 0i64..6).prop_map(|(f, lo, width)| {
			Expr::between(Expr::field(f), Expr::constant(lo), Expr::constant(lo + width))
		}),
		(arb_field(), proptest::collection::vec(arb_scalar(), 1..4)).prop_map(|(f, items)| {
			Arc::new(Expr::In {
				expr: Expr::field(f),
				array: Expr::constant(Value::Array(items)),
			})
		}),
		Just(Arc::new(Expr::TRUE)),
		Just(Arc::new(Expr::FALSE)),
	]
}

fn arb_pred() -> impl Strategy<Value = Arc<Expr>> {
	arb_leaf().prop_recursive(3, 24, 4, |inner| {
		prop_oneof![
			proptest::collection::vec(inner.clone(), 2..4).prop_map(Expr::and),
			proptest::collection::vec(inner.clone(), 2..4).prop_map(Expr::or),
			inner.prop_map(Expr::not),
		]
	})
}

fn arb_row() -> impl Strategy<Value = Value> {
	proptest::collection::btree_map(
		prop_oneof![
			Just("a".to_owned()),
			Just("b".to_owned()),
			Just("c".to_owned()),
			Just("d".to_owned()),
		],
		arb_scalar(),
		0..4,
	)
	.prop_map(Value::Object)
}

proptest! {
	#[test]
	fn normalization_is_idempotent(e in arb_pred()) {
		let dnf = Dnf::new();
		let once = dnf.map(&e).unwrap();
		let twice = dnf.map(&once).unwrap();
		prop_assert_eq!(&once, &twice, "normalizing {} twice diverged", e);
	}

	#[test]
	fn normalization_preserves_selected_rows(
		e in arb_pred(),
		rows in proptest::collection::vec(arb_row(), 1..6),
	) {
		let n = Dnf::new().map(&e).unwrap();
		for row in &rows {
			prop_assert_eq!(
				evaluate(&e, row).is_truthy(),
				evaluate(&n, row).is_truthy(),
				"{} and {} disagree on {}",
				e,
				n,
				row
			);
		}
	}

	#[test]
	fn sargable_prefixes_always_produce_spans(e in arb_pred()) {
		let pred = Dnf::new().map(&e).unwrap();
		let keys = [Expr::field("a"), Expr::field("b")];
		let n = sargable_for(&pred, &keys);
		if n > 0 {
			let spans = sarg_for_keys(&pred, &keys[..n], keys.len()).unwrap();
			prop_assert!(!spans.is_empty());
			prop_assert!(spans.len() <= 256);
		}
	}

	#[test]
	fn subset_is_reflexive(e in arb_pred()) {
		prop_assert!(subset_of(&e, &e));
	}

	#[test]
	fn subset_is_transitive_on_ranges(
		ops in proptest::collection::vec((arb_range_op(), -5i64..6), 3),
	) {
		let atoms: Vec<Arc<Expr>> = ops
			.iter()
			.map(|(op, v)| Expr::cmp(*op, Expr::field("x"), Expr::constant(*v)))
			.collect();
		if subset_of(&atoms[0], &atoms[1]) && subset_of(&atoms[1], &atoms[2]) {
			prop_assert!(
				subset_of(&atoms[0], &atoms[2]),
				"{} implies {} implies {} but transitivity failed",
				atoms[0],
				atoms[1],
				atoms[2]
			);
		}
	}

	#[test]
	fn spans_cover_every_satisfying_row(
		e in arb_pred(),
		rows in proptest::collection::vec(arb_row(), 1..8),
	) {
		let pred = Dnf::new().map(&e).unwrap();
		let keys = [Expr::field("a"), Expr::field("b")];
		let n = sargable_for(&pred, &keys);
		if n == 0 {
			return Ok(());
		}
		let spans = sarg_for_keys(&pred, &keys[..n], keys.len()).unwrap();
		for row in &rows {
			if !evaluate(&pred, row).is_truthy() {
				continue;
			}
			let key: Vec<Value> = keys.iter().map(|k| evaluate(k, row)).collect();
			if key[0].is_missing() {
				// The index does not hold entries without their leading key
				continue;
			}
			prop_assert!(
				spans.iter().any(|s| s.contains(&key)),
				"row {} satisfies {} but escaped its spans",
				row,
				pred
			);
		}
	}
}
