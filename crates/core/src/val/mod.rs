//! The semantic value model.
//!
//! Values follow the JSON shape of stored documents, extended with the
//! MISSING marker for absent fields. Collation is total and type-first:
//! Missing < Null < Bool < Number < String < Array < Object, with natural
//! ordering inside each type. This is the order index keys are stored in,
//! so it is also the order span bounds are compared with.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as Json;

pub(crate) mod number;

pub use self::number::Number;

/// The distinguished NULL used in span bounds.
pub const NULL_VALUE: Value = Value::Null;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Value {
	/// An absent field. Distinct from, and collating below, [`Value::Null`].
	#[default]
	Missing,
	Null,
	Bool(bool),
	Number(Number),
	String(String),
	Array(Vec<Value>),
	Object(BTreeMap<String, Value>),
}

impl Value {
	pub fn is_missing(&self) -> bool {
		matches!(self, Value::Missing)
	}

	pub fn is_null(&self) -> bool {
		matches!(self, Value::Null)
	}

	/// Check if this value is neither NULL nor MISSING.
	pub fn is_valued(&self) -> bool {
		!matches!(self, Value::Missing | Value::Null)
	}

	pub fn is_truthy(&self) -> bool {
		match self {
			Value::Missing | Value::Null => false,
			Value::Bool(b) => *b,
			Value::Number(n) => n.is_truthy(),
			Value::String(s) => !s.is_empty(),
			Value::Array(a) => !a.is_empty(),
			Value::Object(o) => !o.is_empty(),
		}
	}

	fn type_order(&self) -> u8 {
		match self {
			Value::Missing => 0,
			Value::Null => 1,
			Value::Bool(_) => 2,
			Value::Number(_) => 3,
			Value::String(_) => 4,
			Value::Array(_) => 5,
			Value::Object(_) => 6,
		}
	}

	/// Total-order comparison across the value zones.
	pub fn collate(&self, other: &Value) -> Ordering {
		match (self, other) {
			(Value::Bool(a), Value::Bool(b)) => a.cmp(b),
			(Value::Number(a), Value::Number(b)) => a.cmp(b),
			(Value::String(a), Value::String(b)) => a.cmp(b),
			(Value::Array(a), Value::Array(b)) => {
				for (x, y) in a.iter().zip(b.iter()) {
					match x.collate(y) {
						Ordering::Equal => continue,
						other => return other,
					}
				}
				a.len().cmp(&b.len())
			}
			(Value::Object(a), Value::Object(b)) => {
				for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
					match ka.cmp(kb) {
						Ordering::Equal => {}
						other => return other,
					}
					match va.collate(vb) {
						Ordering::Equal => {}
						other => return other,
					}
				}
				a.len().cmp(&b.len())
			}
			(a, b) => a.type_order().cmp(&b.type_order()),
		}
	}

	/// Navigate a dotted path, yielding MISSING for any absent step.
	pub fn field(&self, path: &[String]) -> Value {
		let mut cur = self;
		for name in path {
			match cur {
				Value::Object(o) => match o.get(name) {
					Some(v) => cur = v,
					None => return Value::Missing,
				},
				_ => return Value::Missing,
			}
		}
		cur.clone()
	}

	/// Convert into transport JSON. MISSING has no JSON spelling and
	/// flattens to null.
	pub fn to_json(&self) -> Json {
		match self {
			Value::Missing | Value::Null => Json::Null,
			Value::Bool(b) => Json::Bool(*b),
			Value::Number(Number::Int(i)) => Json::from(*i),
			Value::Number(Number::Float(f)) => {
				serde_json::Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null)
			}
			Value::String(s) => Json::String(s.clone()),
			Value::Array(a) => Json::Array(a.iter().map(Value::to_json).collect()),
			Value::Object(o) => {
				Json::Object(o.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
			}
		}
	}

	pub fn from_json(json: &Json) -> Value {
		match json {
			Json::Null => Value::Null,
			Json::Bool(b) => Value::Bool(*b),
			Json::Number(n) => {
				if let Some(i) = n.as_i64() {
					Value::Number(Number::Int(i))
				} else {
					Value::Number(Number::Float(n.as_f64().unwrap_or(f64::NAN)))
				}
			}
			Json::String(s) => Value::String(s.clone()),
			Json::Array(a) => Value::Array(a.iter().map(Value::from_json).collect()),
			Json::Object(o) => {
				Value::Object(o.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect())
			}
		}
	}
}

impl PartialOrd for Value {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.collate(other))
	}
}

impl Ord for Value {
	fn cmp(&self, other: &Self) -> Ordering {
		self.collate(other)
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Missing => f.write_str("missing"),
			other => write!(f, "{}", other.to_json()),
		}
	}
}

impl Serialize for Value {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		self.to_json().serialize(serializer)
	}
}

impl<'de> Deserialize<'de> for Value {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let json = Json::deserialize(deserializer)?;
		Ok(Value::from_json(&json))
	}
}

impl From<bool> for Value {
	fn from(b: bool) -> Self {
		Value::Bool(b)
	}
}

impl From<i64> for Value {
	fn from(i: i64) -> Self {
		Value::Number(Number::Int(i))
	}
}

impl From<f64> for Value {
	fn from(f: f64) -> Self {
		Value::Number(Number::Float(f))
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Value::String(s.to_owned())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Self {
		Value::String(s)
	}
}
