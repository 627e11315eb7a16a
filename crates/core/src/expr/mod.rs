//! The predicate and key expression AST.
//!
//! Expression trees are immutable once built and shared through [`Arc`],
//! so a deep copy is a pointer clone. The planner never mutates an input
//! expression; every rewrite builds new nodes.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::val::Value;

pub(crate) mod eval;
pub(crate) mod idiom;
pub(crate) mod normalize;
pub(crate) mod subset;

pub use self::eval::evaluate;
pub use self::idiom::Idiom;
pub use self::normalize::Dnf;
pub use self::subset::subset_of;

pub type Exprs = Vec<Arc<Expr>>;

/// Comparison operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CmpOp {
	Eq,
	Neq,
	Lt,
	Le,
	Gt,
	Ge,
	Like,
}

impl CmpOp {
	/// The operator with its operands swapped, e.g. `a < b` ⇔ `b > a`.
	pub fn swapped(self) -> CmpOp {
		match self {
			CmpOp::Lt => CmpOp::Gt,
			CmpOp::Le => CmpOp::Ge,
			CmpOp::Gt => CmpOp::Lt,
			CmpOp::Ge => CmpOp::Le,
			other => other,
		}
	}

	/// The logical negation, where one exists.
	pub fn negated(self) -> Option<CmpOp> {
		match self {
			CmpOp::Eq => Some(CmpOp::Neq),
			CmpOp::Neq => Some(CmpOp::Eq),
			CmpOp::Lt => Some(CmpOp::Ge),
			CmpOp::Le => Some(CmpOp::Gt),
			CmpOp::Gt => Some(CmpOp::Le),
			CmpOp::Ge => Some(CmpOp::Lt),
			CmpOp::Like => None,
		}
	}
}

impl fmt::Display for CmpOp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			CmpOp::Eq => "=",
			CmpOp::Neq => "!=",
			CmpOp::Lt => "<",
			CmpOp::Le => "<=",
			CmpOp::Gt => ">",
			CmpOp::Ge => ">=",
			CmpOp::Like => "LIKE",
		};
		f.write_str(s)
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ArithOp {
	Add,
	Sub,
	Mul,
	Div,
}

impl fmt::Display for ArithOp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ArithOp::Add => "+",
			ArithOp::Sub => "-",
			ArithOp::Mul => "*",
			ArithOp::Div => "/",
		};
		f.write_str(s)
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
	Constant(Value),
	/// A named query parameter, bound at execution time.
	Param(String),
	Field(Idiom),
	And(Exprs),
	Or(Exprs),
	Not(Arc<Expr>),
	Cmp { op: CmpOp, left: Arc<Expr>, right: Arc<Expr> },
	Between { expr: Arc<Expr>, low: Arc<Expr>, high: Arc<Expr> },
	In { expr: Arc<Expr>, array: Arc<Expr> },
	IsNull(Arc<Expr>),
	IsNotNull(Arc<Expr>),
	IsMissing(Arc<Expr>),
	IsNotMissing(Arc<Expr>),
	IsValued(Arc<Expr>),
	Arith { op: ArithOp, left: Arc<Expr>, right: Arc<Expr> },
	/// An opaque function call. Never static, never sargable.
	Function { name: String, args: Exprs },
}

impl Expr {
	pub const TRUE: Expr = Expr::Constant(Value::Bool(true));
	pub const FALSE: Expr = Expr::Constant(Value::Bool(false));

	// -----------------------------------
	// Constructors
	// -----------------------------------

	pub fn constant(v: impl Into<Value>) -> Arc<Expr> {
		Arc::new(Expr::Constant(v.into()))
	}

	pub fn field(path: &str) -> Arc<Expr> {
		Arc::new(Expr::Field(Idiom::from(path)))
	}

	pub fn and(operands: Exprs) -> Arc<Expr> {
		Arc::new(Expr::And(operands))
	}

	pub fn or(operands: Exprs) -> Arc<Expr> {
		Arc::new(Expr::Or(operands))
	}

	pub fn not(operand: Arc<Expr>) -> Arc<Expr> {
		Arc::new(Expr::Not(operand))
	}

	pub fn cmp(op: CmpOp, left: Arc<Expr>, right: Arc<Expr>) -> Arc<Expr> {
		Arc::new(Expr::Cmp { op, left, right })
	}

	pub fn eq(left: Arc<Expr>, right: Arc<Expr>) -> Arc<Expr> {
		Self::cmp(CmpOp::Eq, left, right)
	}

	pub fn between(expr: Arc<Expr>, low: Arc<Expr>, high: Arc<Expr>) -> Arc<Expr> {
		Arc::new(Expr::Between { expr, low, high })
	}

	// -----------------------------------
	// Shape tests
	// -----------------------------------

	pub fn is_true(&self) -> bool {
		matches!(self, Expr::Constant(Value::Bool(true)))
	}

	pub fn is_false(&self) -> bool {
		matches!(self, Expr::Constant(Value::Bool(false)))
	}

	/// Whether this expression depends only on constants. Fields, params
	/// and function calls are data-, binding- or clock-dependent.
	pub fn is_static(&self) -> bool {
		match self {
			Expr::Constant(_) => true,
			Expr::Param(_) | Expr::Field(_) | Expr::Function { .. } => false,
			other => other.children().iter().all(|c| c.is_static()),
		}
	}

	/// The constant this expression reduces to, if any.
	pub fn static_value(&self) -> Option<Value> {
		if let Expr::Constant(v) = self {
			return Some(v.clone());
		}
		if self.is_static() {
			Some(eval::evaluate(self, &Value::Missing))
		} else {
			None
		}
	}

	// -----------------------------------
	// Structure
	// -----------------------------------

	pub fn children(&self) -> Exprs {
		match self {
			Expr::Constant(_) | Expr::Param(_) | Expr::Field(_) => vec![],
			Expr::And(ops) | Expr::Or(ops) => ops.clone(),
			Expr::Not(x)
			| Expr::IsNull(x)
			| Expr::IsNotNull(x)
			| Expr::IsMissing(x)
			| Expr::IsNotMissing(x)
			| Expr::IsValued(x) => vec![x.clone()],
			Expr::Cmp { left, right, .. } | Expr::Arith { left, right, .. } => {
				vec![left.clone(), right.clone()]
			}
			Expr::Between { expr, low, high } => vec![expr.clone(), low.clone(), high.clone()],
			Expr::In { expr, array } => vec![expr.clone(), array.clone()],
			Expr::Function { args, .. } => args.clone(),
		}
	}

	/// Structural equivalence. Reflexive; commuted equalities are
	/// recognised; false negatives are allowed.
	pub fn equivalent_to(&self, other: &Expr) -> bool {
		if self == other {
			return true;
		}
		if let (
			Expr::Cmp { op: CmpOp::Eq, left: l1, right: r1 },
			Expr::Cmp { op: CmpOp::Eq, left: l2, right: r2 },
		) = (self, other)
		{
			return l1.equivalent_to(r2) && r1.equivalent_to(l2);
		}
		false
	}

	/// Whether this expression contains a subtree equivalent to `other`.
	/// False negatives are allowed.
	pub fn depends_on(&self, other: &Expr) -> bool {
		if self.equivalent_to(other) {
			return true;
		}
		self.children().iter().any(|c| c.depends_on(other))
	}

	/// Whether this expression needs no stored data beyond the given key
	/// expressions, so an index carrying them can answer it alone.
	pub fn covered_by(&self, keys: &[Arc<Expr>]) -> bool {
		if keys.iter().any(|k| self.equivalent_to(k)) {
			return true;
		}
		match self {
			Expr::Constant(_) | Expr::Param(_) => true,
			Expr::Field(_) => false,
			other => {
				let children = other.children();
				!children.is_empty() && children.iter().all(|c| c.covered_by(keys))
			}
		}
	}
}

impl fmt::Display for Expr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Expr::Constant(v) => write!(f, "{v}"),
			Expr::Param(name) => write!(f, "${name}"),
			Expr::Field(idiom) => write!(f, "{idiom}"),
			Expr::And(ops) => write_joined(f, ops, " AND "),
			Expr::Or(ops) => write_joined(f, ops, " OR "),
			Expr::Not(x) => write!(f, "NOT ({x})"),
			Expr::Cmp { op, left, right } => write!(f, "({left} {op} {right})"),
			Expr::Between { expr, low, high } => {
				write!(f, "({expr} BETWEEN {low} AND {high})")
			}
			Expr::In { expr, array } => write!(f, "({expr} IN {array})"),
			Expr::IsNull(x) => write!(f, "({x} IS NULL)"),
			Expr::IsNotNull(x) => write!(f, "({x} IS NOT NULL)"),
			Expr::IsMissing(x) => write!(f, "({x} IS MISSING)"),
			Expr::IsNotMissing(x) => write!(f, "({x} IS NOT MISSING)"),
			Expr::IsValued(x) => write!(f, "({x} IS VALUED)"),
			Expr::Arith { op, left, right } => write!(f, "({left} {op} {right})"),
			Expr::Function { name, args } => {
				write!(f, "{name}(")?;
				let mut first = true;
				for arg in args {
					if !first {
						f.write_str(", ")?;
					}
					first = false;
					write!(f, "{arg}")?;
				}
				f.write_str(")")
			}
		}
	}
}

fn write_joined(f: &mut fmt::Formatter<'_>, ops: &Exprs, sep: &str) -> fmt::Result {
	f.write_str("(")?;
	let mut first = true;
	for op in ops {
		if !first {
			f.write_str(sep)?;
		}
		first = false;
		write!(f, "{op}")?;
	}
	f.write_str(")")
}
