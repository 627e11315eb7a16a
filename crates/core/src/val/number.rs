use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A JSON number. Integers and floats compare numerically across the two
/// representations; NaN sorts after every other number so the total order
/// required by collation holds.
#[derive(Clone, Copy, Debug)]
pub enum Number {
	Int(i64),
	Float(f64),
}

impl Number {
	pub fn as_f64(&self) -> f64 {
		match self {
			Number::Int(i) => *i as f64,
			Number::Float(f) => *f,
		}
	}

	pub fn is_nan(&self) -> bool {
		matches!(self, Number::Float(f) if f.is_nan())
	}

	pub fn is_truthy(&self) -> bool {
		match self {
			Number::Int(i) => *i != 0,
			Number::Float(f) => *f != 0.0 && !f.is_nan(),
		}
	}
}

impl PartialEq for Number {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Number {}

impl PartialOrd for Number {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for Number {
	fn cmp(&self, other: &Self) -> Ordering {
		match (self, other) {
			(Number::Int(a), Number::Int(b)) => a.cmp(b),
			(a, b) => match (a.is_nan(), b.is_nan()) {
				(true, true) => Ordering::Equal,
				(true, false) => Ordering::Greater,
				(false, true) => Ordering::Less,
				(false, false) => {
					a.as_f64().partial_cmp(&b.as_f64()).unwrap_or(Ordering::Equal)
				}
			},
		}
	}
}

impl fmt::Display for Number {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Number::Int(i) => write!(f, "{i}"),
			Number::Float(v) => write!(f, "{v}"),
		}
	}
}

impl From<i64> for Number {
	fn from(i: i64) -> Self {
		Number::Int(i)
	}
}

impl From<f64> for Number {
	fn from(f: f64) -> Self {
		Number::Float(f)
	}
}

impl Serialize for Number {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self {
			Number::Int(i) => serializer.serialize_i64(*i),
			Number::Float(f) => serializer.serialize_f64(*f),
		}
	}
}

impl<'de> Deserialize<'de> for Number {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let n = serde_json::Number::deserialize(deserializer)?;
		if let Some(i) = n.as_i64() {
			Ok(Number::Int(i))
		} else {
			Ok(Number::Float(n.as_f64().unwrap_or(f64::NAN)))
		}
	}
}
