//! A model evaluator for predicate expressions.
//!
//! Comparisons propagate MISSING and NULL: if either operand is MISSING
//! the result is MISSING, else if either is NULL the result is NULL.
//! `AND`/`OR` follow three-valued logic with MISSING as the weakest
//! unknown. Only a TRUE result satisfies a WHERE clause, so predicate
//! rewrites need only preserve truthiness, which the normalizer tests
//! rely on.

use std::cmp::Ordering;

use crate::expr::{ArithOp, CmpOp, Expr};
use crate::val::{Number, Value};

/// Evaluate `expr` against one document.
pub fn evaluate(expr: &Expr, item: &Value) -> Value {
	match expr {
		Expr::Constant(v) => v.clone(),
		Expr::Param(_) => Value::Missing,
		Expr::Field(idiom) => item.field(idiom.parts()),
		Expr::And(ops) => {
			let mut out = Value::Bool(true);
			for op in ops {
				match evaluate(op, item) {
					Value::Bool(false) => return Value::Bool(false),
					Value::Missing => out = Value::Missing,
					v if !v.is_truthy() && out.is_valued() => out = Value::Null,
					_ => {}
				}
			}
			out
		}
		Expr::Or(ops) => {
			let mut out = Value::Bool(false);
			for op in ops {
				let v = evaluate(op, item);
				if v.is_truthy() {
					return Value::Bool(true);
				}
				match v {
					Value::Missing if matches!(out, Value::Bool(false)) => out = Value::Missing,
					Value::Null => out = Value::Null,
					_ => {}
				}
			}
			out
		}
		Expr::Not(x) => match evaluate(x, item) {
			Value::Missing => Value::Missing,
			Value::Null => Value::Null,
			v => Value::Bool(!v.is_truthy()),
		},
		Expr::Cmp { op, left, right } => {
			let l = evaluate(left, item);
			let r = evaluate(right, item);
			compare(*op, &l, &r)
		}
		Expr::Between { expr, low, high } => {
			let v = evaluate(expr, item);
			let lo = evaluate(low, item);
			let hi = evaluate(high, item);
			combine(compare(CmpOp::Ge, &v, &lo), compare(CmpOp::Le, &v, &hi))
		}
		Expr::In { expr, array } => {
			let v = evaluate(expr, item);
			let a = evaluate(array, item);
			if v.is_missing() || a.is_missing() {
				return Value::Missing;
			}
			if v.is_null() {
				return Value::Null;
			}
			match a {
				Value::Array(items) => {
					Value::Bool(items.iter().any(|i| i.collate(&v) == Ordering::Equal))
				}
				_ => Value::Null,
			}
		}
		Expr::IsNull(x) => match evaluate(x, item) {
			Value::Missing => Value::Missing,
			v => Value::Bool(v.is_null()),
		},
		Expr::IsNotNull(x) => match evaluate(x, item) {
			Value::Missing => Value::Missing,
			v => Value::Bool(!v.is_null()),
		},
		Expr::IsMissing(x) => Value::Bool(evaluate(x, item).is_missing()),
		Expr::IsNotMissing(x) => Value::Bool(!evaluate(x, item).is_missing()),
		Expr::IsValued(x) => match evaluate(x, item) {
			Value::Missing => Value::Missing,
			v => Value::Bool(v.is_valued()),
		},
		Expr::Arith { op, left, right } => {
			let l = evaluate(left, item);
			let r = evaluate(right, item);
			if l.is_missing() || r.is_missing() {
				return Value::Missing;
			}
			match (l, r) {
				(Value::Number(a), Value::Number(b)) => arith(*op, a, b),
				_ => Value::Null,
			}
		}
		Expr::Function { .. } => Value::Missing,
	}
}

fn compare(op: CmpOp, l: &Value, r: &Value) -> Value {
	if l.is_missing() || r.is_missing() {
		return Value::Missing;
	}
	if l.is_null() || r.is_null() {
		return Value::Null;
	}
	let ord = l.collate(r);
	let out = match op {
		CmpOp::Eq => ord == Ordering::Equal,
		CmpOp::Neq => ord != Ordering::Equal,
		CmpOp::Lt => ord == Ordering::Less,
		CmpOp::Le => ord != Ordering::Greater,
		CmpOp::Gt => ord == Ordering::Greater,
		CmpOp::Ge => ord != Ordering::Less,
		CmpOp::Like => match (l, r) {
			(Value::String(s), Value::String(p)) => like(s, p),
			_ => return Value::Null,
		},
	};
	Value::Bool(out)
}

fn combine(a: Value, b: Value) -> Value {
	match (a, b) {
		(Value::Bool(false), _) | (_, Value::Bool(false)) => Value::Bool(false),
		(Value::Missing, _) | (_, Value::Missing) => Value::Missing,
		(Value::Null, _) | (_, Value::Null) => Value::Null,
		_ => Value::Bool(true),
	}
}

fn arith(op: ArithOp, a: Number, b: Number) -> Value {
	match (op, a, b) {
		(ArithOp::Add, Number::Int(x), Number::Int(y)) => Value::from(x.wrapping_add(y)),
		(ArithOp::Sub, Number::Int(x), Number::Int(y)) => Value::from(x.wrapping_sub(y)),
		(ArithOp::Mul, Number::Int(x), Number::Int(y)) => Value::from(x.wrapping_mul(y)),
		(ArithOp::Div, _, b) if b.as_f64() == 0.0 => Value::Null,
		(ArithOp::Add, a, b) => Value::from(a.as_f64() + b.as_f64()),
		(ArithOp::Sub, a, b) => Value::from(a.as_f64() - b.as_f64()),
		(ArithOp::Mul, a, b) => Value::from(a.as_f64() * b.as_f64()),
		(ArithOp::Div, a, b) => Value::from(a.as_f64() / b.as_f64()),
	}
}

/// SQL LIKE with `%` and `_` wildcards.
fn like(s: &str, pattern: &str) -> bool {
	fn matches(s: &[char], p: &[char]) -> bool {
		match p.first() {
			None => s.is_empty(),
			Some('%') => {
				(0..=s.len()).any(|i| matches(&s[i..], &p[1..]))
			}
			Some('_') => !s.is_empty() && matches(&s[1..], &p[1..]),
			Some(c) => s.first() == Some(c) && matches(&s[1..], &p[1..]),
		}
	}
	let s: Vec<char> = s.chars().collect();
	let p: Vec<char> = pattern.chars().collect();
	matches(&s, &p)
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::expr::Expr;

	fn doc(json: serde_json::Value) -> Value {
		Value::from_json(&json)
	}

	#[test]
	fn comparisons_propagate_missing_and_null() {
		let item = doc(serde_json::json!({"a": null}));
		let on_missing = Expr::eq(Expr::field("b"), Expr::constant(1i64));
		assert_eq!(evaluate(&on_missing, &item), Value::Missing);
		let on_null = Expr::eq(Expr::field("a"), Expr::constant(1i64));
		assert_eq!(evaluate(&on_null, &item), Value::Null);
	}

	#[test]
	fn null_and_missing_tests() {
		let item = doc(serde_json::json!({"a": null, "b": 1}));
		assert_eq!(evaluate(&Expr::IsNull(Expr::field("a")), &item), Value::Bool(true));
		assert_eq!(evaluate(&Expr::IsMissing(Expr::field("z")), &item), Value::Bool(true));
		assert_eq!(evaluate(&Expr::IsNotMissing(Expr::field("a")), &item), Value::Bool(true));
		assert_eq!(evaluate(&Expr::IsValued(Expr::field("a")), &item), Value::Bool(false));
		assert_eq!(evaluate(&Expr::IsValued(Expr::field("b")), &item), Value::Bool(true));
		// IS VALUED and IS NOT NULL agree on missing input
		assert_eq!(evaluate(&Expr::IsValued(Expr::field("z")), &item), Value::Missing);
		assert_eq!(evaluate(&Expr::IsNotNull(Expr::field("z")), &item), Value::Missing);
	}

	#[test]
	fn in_checks_membership_by_collation() {
		let item = doc(serde_json::json!({"status": "A"}));
		let e = Arc::new(Expr::In {
			expr: Expr::field("status"),
			array: Expr::constant(Value::Array(vec![Value::from("A"), Value::from("B")])),
		});
		assert_eq!(evaluate(&e, &item), Value::Bool(true));
	}

	#[test]
	fn like_wildcards() {
		assert!(like("alice", "al%"));
		assert!(like("alice", "_lice"));
		assert!(like("alice", "alice"));
		assert!(!like("alice", "al"));
		assert!(like("", "%"));
	}
}
