//! Composite key ranges.
//!
//! A [`Span`] is one range over an index's composite key: a low bound and
//! a high bound, each a sequence of expressions aligned with the key
//! columns, plus inclusion bits. A bound shorter than the key arity is
//! open over the missing suffix (a low pads towards the smallest
//! possible suffix, a high towards the largest), and an absent bound is
//! unbounded on that side. [`Spans`] is a disjunction of spans; the empty
//! disjunction matches nothing.

use std::cmp::Ordering;
use std::ops::{BitAnd, BitOr};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json, json};

use crate::err::{Error, ErrorKind};
use crate::expr::{Expr, Exprs};
use crate::val::Value;

/// Which bounds of a span are inclusive.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inclusion(u8);

impl Inclusion {
	pub const NEITHER: Inclusion = Inclusion(0);
	pub const LOW: Inclusion = Inclusion(1);
	pub const HIGH: Inclusion = Inclusion(2);
	pub const BOTH: Inclusion = Inclusion(3);

	pub fn has_low(self) -> bool {
		self.0 & Self::LOW.0 != 0
	}

	pub fn has_high(self) -> bool {
		self.0 & Self::HIGH.0 != 0
	}

	pub fn bits(self) -> u8 {
		self.0
	}
}

impl BitAnd for Inclusion {
	type Output = Inclusion;
	fn bitand(self, rhs: Inclusion) -> Inclusion {
		Inclusion(self.0 & rhs.0)
	}
}

impl BitOr for Inclusion {
	type Output = Inclusion;
	fn bitor(self, rhs: Inclusion) -> Inclusion {
		Inclusion(self.0 | rhs.0)
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SpanKind {
	/// An ordinary range.
	Range,
	/// The whole key space of the index.
	Full,
	/// The predicate constrains the index key by itself; no range is
	/// needed. Subsumes composition.
	Identity,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Span {
	pub low: Exprs,
	pub high: Exprs,
	pub inclusion: Inclusion,
	kind: SpanKind,
}

pub type Spans = Vec<Span>;

/// The whole-index disjunction.
pub fn full_spans() -> Spans {
	vec![Span::full()]
}

impl Span {
	pub fn new(low: Exprs, high: Exprs, inclusion: Inclusion) -> Self {
		Self { low, high, inclusion, kind: SpanKind::Range }
	}

	/// The span covering the entire key space.
	pub fn full() -> Self {
		Self { low: vec![], high: vec![], inclusion: Inclusion::BOTH, kind: SpanKind::Full }
	}

	/// The marker for a predicate that is the index key itself.
	pub fn self_span() -> Self {
		Self { low: vec![], high: vec![], inclusion: Inclusion::BOTH, kind: SpanKind::Identity }
	}

	/// The exactly-NULL lookup.
	pub fn null_span() -> Self {
		let null = Expr::constant(Value::Null);
		Self::new(vec![null.clone()], vec![null], Inclusion::BOTH)
	}

	/// Everything above NULL: any valued entry.
	pub fn valued_span() -> Self {
		Self::new(vec![Expr::constant(Value::Null)], vec![], Inclusion::HIGH)
	}

	pub fn is_full(&self) -> bool {
		self.kind == SpanKind::Full
	}

	pub fn is_self(&self) -> bool {
		self.kind == SpanKind::Identity
	}

	pub fn has_low(&self) -> bool {
		!self.low.is_empty()
	}

	pub fn has_high(&self) -> bool {
		!self.high.is_empty()
	}

	/// Whether a low/high pair describes an exact key prefix match.
	pub fn is_exact_match(&self) -> bool {
		self.kind == SpanKind::Range
			&& self.inclusion == Inclusion::BOTH
			&& self.has_low()
			&& self.low.len() == self.high.len()
			&& self.low.iter().zip(self.high.iter()).all(|(l, h)| l.equivalent_to(h))
	}

	/// Whether a composite key lies inside this span, under the static
	/// values of its bounds. A bound without a static value is treated
	/// as unbounded on that side.
	pub fn contains(&self, key: &[Value]) -> bool {
		if self.is_full() || self.is_self() {
			return true;
		}
		if self.has_low() {
			match bound_values(&self.low) {
				Some(low) => match compare_composite(key, &low) {
					Ordering::Less => return false,
					Ordering::Equal if !self.inclusion.has_low() => return false,
					_ => {}
				},
				None => {}
			}
		}
		if self.has_high() {
			match bound_values(&self.high) {
				Some(high) => match compare_composite(key, &high) {
					Ordering::Greater => return false,
					Ordering::Equal if !self.inclusion.has_high() => return false,
					_ => {}
				},
				None => {}
			}
		}
		true
	}

	pub fn to_json(&self) -> Json {
		let mut range = Map::new();
		if self.has_low() {
			range.insert("Low".to_owned(), Json::Array(self.low.iter().map(bound_json).collect()));
		}
		if self.has_high() {
			range
				.insert("High".to_owned(), Json::Array(self.high.iter().map(bound_json).collect()));
		}
		range.insert("Inclusion".to_owned(), json!(self.inclusion.bits()));
		json!({ "Range": Json::Object(range) })
	}

	pub fn from_json(json: &Json) -> Result<Self, Error> {
		let range = json
			.get("Range")
			.and_then(Json::as_object)
			.ok_or_else(|| Error::new(ErrorKind::Parse { message: "span without Range".into() }))?;
		let bounds = |name: &str| -> Exprs {
			range
				.get(name)
				.and_then(Json::as_array)
				.map(|a| {
					a.iter().map(|v| Expr::constant(Value::from_json(v))).collect::<Exprs>()
				})
				.unwrap_or_default()
		};
		let inclusion = range
			.get("Inclusion")
			.and_then(Json::as_u64)
			.filter(|i| *i <= Inclusion::BOTH.bits() as u64)
			.ok_or_else(|| {
				Error::new(ErrorKind::Parse { message: "span without a valid Inclusion".into() })
			})?;
		Ok(Span::new(bounds("Low"), bounds("High"), Inclusion(inclusion as u8)))
	}
}

fn bound_json(expr: &std::sync::Arc<Expr>) -> Json {
	match expr.static_value() {
		Some(v) => v.to_json(),
		None => Json::String(expr.to_string()),
	}
}

fn bound_values(bound: &Exprs) -> Option<Vec<Value>> {
	bound.iter().map(|e| e.static_value()).collect()
}

/// Compare a full-arity key against a possibly shorter bound. Equality
/// means the key sits exactly on the bound; a key extending an equal,
/// exhausted bound compares through the open suffix and lands strictly
/// inside.
fn compare_composite(key: &[Value], bound: &[Value]) -> Ordering {
	for (k, b) in key.iter().zip(bound.iter()) {
		match k.collate(b) {
			Ordering::Equal => continue,
			other => return other,
		}
	}
	if key.len() >= bound.len() {
		Ordering::Equal
	} else {
		Ordering::Less
	}
}

/// Tighten every span of `spans1` with the single span of `spans2`.
/// When neither side is a singleton there is no sound pairwise
/// tightening, and `spans1` is returned untouched.
pub fn constrain_spans(mut spans1: Spans, mut spans2: Spans) -> Spans {
	if spans2.len() != 1 {
		if spans1.len() == 1 {
			std::mem::swap(&mut spans1, &mut spans2);
		} else {
			return spans1;
		}
	}
	let span2 = spans2[0].clone();
	for span1 in &mut spans1 {
		constrain_span(span1, &span2);
	}
	spans1
}

/// Replace each bound of `span1` with the more restrictive of the two:
/// the greater low and the lesser high, carrying the inclusion of the
/// winning side. A bound with no static value wins over a static one.
pub fn constrain_span(span1: &mut Span, span2: &Span) {
	if span2.has_low() {
		if !span1.has_low() {
			replace_low(span1, span2);
		} else {
			let low1 = span1.low[0].static_value();
			let low2 = span2.low[0].static_value();
			if let Some(l1) = low1 {
				if low2.as_ref().map_or(true, |l2| l1.collate(l2) == Ordering::Less) {
					replace_low(span1, span2);
				}
			}
		}
	}
	if span2.has_high() {
		if !span1.has_high() {
			replace_high(span1, span2);
		} else {
			let high1 = span1.high[0].static_value();
			let high2 = span2.high[0].static_value();
			if let Some(h1) = high1 {
				if high2.as_ref().map_or(true, |h2| h1.collate(h2) == Ordering::Greater) {
					replace_high(span1, span2);
				}
			}
		}
	}
}

fn replace_low(span1: &mut Span, span2: &Span) {
	span1.low = span2.low.clone();
	span1.inclusion = (span1.inclusion & Inclusion::HIGH) | (span2.inclusion & Inclusion::LOW);
	span1.kind = SpanKind::Range;
}

fn replace_high(span1: &mut Span, span2: &Span) {
	span1.high = span2.high.clone();
	span1.inclusion = (span1.inclusion & Inclusion::LOW) | (span2.inclusion & Inclusion::HIGH);
	span1.kind = SpanKind::Range;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn c(v: impl Into<Value>) -> std::sync::Arc<Expr> {
		Expr::constant(v)
	}

	fn span(low: i64, high: i64, inclusion: Inclusion) -> Span {
		Span::new(vec![c(low)], vec![c(high)], inclusion)
	}

	#[test]
	fn constrain_keeps_the_higher_low() {
		let mut s1 = Span::new(vec![c(10i64)], vec![], Inclusion::LOW);
		let s2 = Span::new(vec![c(20i64)], vec![], Inclusion::NEITHER);
		constrain_span(&mut s1, &s2);
		assert_eq!(s1.low[0].static_value(), Some(Value::from(20i64)));
		assert!(!s1.inclusion.has_low());

		// The reverse direction leaves the tighter bound in place
		let mut s1 = Span::new(vec![c(20i64)], vec![], Inclusion::NEITHER);
		let s2 = Span::new(vec![c(10i64)], vec![], Inclusion::LOW);
		constrain_span(&mut s1, &s2);
		assert_eq!(s1.low[0].static_value(), Some(Value::from(20i64)));
		assert!(!s1.inclusion.has_low());
	}

	#[test]
	fn constrain_keeps_the_lower_high() {
		let mut s1 = Span::new(vec![], vec![c(30i64)], Inclusion::HIGH);
		let s2 = Span::new(vec![], vec![c(20i64)], Inclusion::NEITHER);
		constrain_span(&mut s1, &s2);
		assert_eq!(s1.high[0].static_value(), Some(Value::from(20i64)));
		assert!(!s1.inclusion.has_high());

		let mut s1 = Span::new(vec![], vec![c(20i64)], Inclusion::NEITHER);
		let s2 = Span::new(vec![], vec![c(30i64)], Inclusion::HIGH);
		constrain_span(&mut s1, &s2);
		assert_eq!(s1.high[0].static_value(), Some(Value::from(20i64)));
		assert!(!s1.inclusion.has_high());
	}

	#[test]
	fn constrain_fills_missing_bounds() {
		let mut s1 = Span::new(vec![c(10i64)], vec![], Inclusion::LOW);
		let s2 = Span::new(vec![], vec![c(30i64)], Inclusion::HIGH);
		constrain_span(&mut s1, &s2);
		assert!(s1.has_low() && s1.has_high());
		assert_eq!(s1.inclusion, Inclusion::BOTH);
	}

	#[test]
	fn containment_respects_inclusion() {
		let s = span(10, 20, Inclusion::BOTH);
		assert!(s.contains(&[Value::from(10i64)]));
		assert!(s.contains(&[Value::from(20i64)]));
		assert!(!s.contains(&[Value::from(21i64)]));

		let s = span(10, 20, Inclusion::NEITHER);
		assert!(!s.contains(&[Value::from(10i64)]));
		assert!(!s.contains(&[Value::from(20i64)]));
		assert!(s.contains(&[Value::from(15i64)]));
	}

	#[test]
	fn short_bounds_are_open_over_the_suffix() {
		// Low [20, "NYC"], High [30], as a composite (age, city) span
		let s = Span::new(vec![c(20i64), c("NYC")], vec![c(30i64)], Inclusion::BOTH);
		assert!(s.contains(&[Value::from(20i64), Value::from("NYC")]));
		assert!(!s.contains(&[Value::from(20i64), Value::from("AAA")]));
		assert!(s.contains(&[Value::from(25i64), Value::from("AAA")]));
		assert!(s.contains(&[Value::from(30i64), Value::from("ZZZ")]));
		assert!(!s.contains(&[Value::from(31i64), Value::from("NYC")]));
	}

	#[test]
	fn null_and_valued_spans() {
		let null = Span::null_span();
		assert!(null.contains(&[Value::Null]));
		assert!(!null.contains(&[Value::from(0i64)]));

		let valued = Span::valued_span();
		assert!(!valued.contains(&[Value::Null]));
		assert!(valued.contains(&[Value::from(false)]));
		assert!(valued.contains(&[Value::from("x")]));
	}

	#[test]
	fn json_round_trip() {
		let s = Span::new(vec![c("alice")], vec![c("alice")], Inclusion::BOTH);
		let json = s.to_json();
		assert_eq!(json, serde_json::json!({
			"Range": { "Low": ["alice"], "High": ["alice"], "Inclusion": 3 }
		}));
		let back = Span::from_json(&json).unwrap();
		assert_eq!(back, s);
	}
}
