//! Scan plan nodes.
//!
//! The output of index selection: an immutable tree of scan operators,
//! serialisable to tagged JSON for EXPLAIN output and cross-process plan
//! transport. Nodes own their children; catalog index handles are shared
//! references that outlive the plan.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value as Json, json};

use crate::catalog::{Datastore, Index, IndexType, PrimaryIndex};
use crate::err::{Error, ErrorKind};
use crate::expr::{Expr, Exprs};
use crate::idx::planner::span::{Span, Spans};
use crate::val::Value;

#[derive(Clone)]
pub enum ScanPlan {
	Primary(PrimaryScan),
	Index(IndexScan),
	Key(KeyScan),
	Parent(ParentScan),
	Value(ValueScan),
	Dummy(DummyScan),
	Count(CountScan),
	Union(UnionScan),
	Intersect(IntersectScan),
	Filter(Filter),
}

impl ScanPlan {
	pub fn operator(&self) -> &'static str {
		match self {
			ScanPlan::Primary(_) => "PrimaryScan",
			ScanPlan::Index(_) => "IndexScan",
			ScanPlan::Key(_) => "KeyScan",
			ScanPlan::Parent(_) => "ParentScan",
			ScanPlan::Value(_) => "ValueScan",
			ScanPlan::Dummy(_) => "DummyScan",
			ScanPlan::Count(_) => "CountScan",
			ScanPlan::Union(_) => "UnionScan",
			ScanPlan::Intersect(_) => "IntersectScan",
			ScanPlan::Filter(_) => "Filter",
		}
	}

	pub fn to_json(&self) -> Json {
		match self {
			ScanPlan::Primary(s) => s.to_json(),
			ScanPlan::Index(s) => s.to_json(),
			ScanPlan::Key(s) => s.to_json(),
			ScanPlan::Parent(_) => json!({ "#operator": "ParentScan" }),
			ScanPlan::Value(s) => s.to_json(),
			ScanPlan::Dummy(_) => json!({ "#operator": "DummyScan" }),
			ScanPlan::Count(s) => s.to_json(),
			ScanPlan::Union(s) => s.to_json(),
			ScanPlan::Intersect(s) => s.to_json(),
			ScanPlan::Filter(s) => s.to_json(),
		}
	}

	/// Rebuild a plan from its JSON form, consulting the catalog to
	/// re-bind index references. Fails when resolution fails.
	pub fn from_json(json: &Json, datastore: &dyn Datastore) -> Result<ScanPlan, Error> {
		let operator = json
			.get("#operator")
			.and_then(Json::as_str)
			.ok_or_else(|| Error::new(ErrorKind::Parse { message: "plan without #operator".into() }))?;
		match operator {
			"PrimaryScan" => PrimaryScan::from_json(json, datastore).map(ScanPlan::Primary),
			"IndexScan" => IndexScan::from_json(json, datastore).map(ScanPlan::Index),
			"KeyScan" => KeyScan::from_json(json).map(ScanPlan::Key),
			"ParentScan" => Ok(ScanPlan::Parent(ParentScan)),
			"ValueScan" => ValueScan::from_json(json).map(ScanPlan::Value),
			"DummyScan" => Ok(ScanPlan::Dummy(DummyScan)),
			"CountScan" => CountScan::from_json(json).map(ScanPlan::Count),
			"UnionScan" => {
				Ok(ScanPlan::Union(UnionScan { scans: child_scans(json, datastore)? }))
			}
			"IntersectScan" => {
				Ok(ScanPlan::Intersect(IntersectScan { scans: child_scans(json, datastore)? }))
			}
			"Filter" => Filter::from_json(json).map(ScanPlan::Filter),
			other => Err(Error::new(ErrorKind::Parse {
				message: format!("unknown operator {other}"),
			})),
		}
	}
}

impl fmt::Debug for ScanPlan {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.to_json())
	}
}

fn child_scans(json: &Json, datastore: &dyn Datastore) -> Result<Vec<ScanPlan>, Error> {
	let scans = json
		.get("scans")
		.and_then(Json::as_array)
		.ok_or_else(|| Error::new(ErrorKind::Parse { message: "scan without children".into() }))?;
	scans.iter().map(|s| ScanPlan::from_json(s, datastore)).collect()
}

/// Serialise an expression field. Static expressions keep their JSON
/// value; anything else falls back to the printed text.
fn expr_json(expr: &Arc<Expr>) -> Json {
	match expr.static_value() {
		Some(v) => v.to_json(),
		None => Json::String(expr.to_string()),
	}
}

/// Restore an expression field. Only JSON values round-trip; parsing
/// expression text is the job of the external parser.
fn expr_from_json(json: &Json) -> Arc<Expr> {
	Expr::constant(Value::from_json(json))
}

fn resolve_index(
	json: &Json,
	datastore: &dyn Datastore,
) -> Result<(Arc<dyn Index>, String, String), Error> {
	let field = |name: &str| -> Result<&str, Error> {
		json.get(name).and_then(Json::as_str).ok_or_else(|| {
			Error::new(ErrorKind::Parse { message: format!("scan without {name}") })
		})
	};
	let namespace = field("namespace")?;
	let keyspace = field("keyspace")?;
	let index = field("index")?;
	let using: IndexType = json
		.get("using")
		.and_then(|u| serde_json::from_value(u.clone()).ok())
		.unwrap_or_default();
	let ks = datastore.namespace(namespace)?.keyspace(keyspace)?;
	let ix = ks.indexer(using)?.index_by_name(index)?;
	Ok((ix, namespace.to_owned(), keyspace.to_owned()))
}

#[derive(Clone)]
pub struct PrimaryScan {
	index: Arc<dyn PrimaryIndex>,
	namespace: String,
	keyspace: String,
	limit: Option<Arc<Expr>>,
}

impl PrimaryScan {
	pub fn new(
		index: Arc<dyn PrimaryIndex>,
		namespace: impl Into<String>,
		keyspace: impl Into<String>,
		limit: Option<Arc<Expr>>,
	) -> Self {
		Self { index, namespace: namespace.into(), keyspace: keyspace.into(), limit }
	}

	pub fn index(&self) -> &Arc<dyn PrimaryIndex> {
		&self.index
	}

	pub fn keyspace(&self) -> &str {
		&self.keyspace
	}

	pub fn limit(&self) -> Option<&Arc<Expr>> {
		self.limit.as_ref()
	}

	pub fn to_json(&self) -> Json {
		let mut r = Map::new();
		r.insert("#operator".to_owned(), json!("PrimaryScan"));
		r.insert("index".to_owned(), json!(self.index.name()));
		r.insert("namespace".to_owned(), json!(self.namespace));
		r.insert("keyspace".to_owned(), json!(self.keyspace));
		r.insert("using".to_owned(), json!(self.index.index_type().to_string()));
		if let Some(limit) = &self.limit {
			r.insert("limit".to_owned(), expr_json(limit));
		}
		Json::Object(r)
	}

	fn from_json(json: &Json, datastore: &dyn Datastore) -> Result<Self, Error> {
		let (index, namespace, keyspace) = resolve_index(json, datastore)?;
		if !index.is_primary() {
			return Err(Error::new(ErrorKind::IndexCatalog {
				message: format!("index {} is not primary", index.name()),
			}));
		}
		let name = index.name().to_owned();
		let keyspace_ref = datastore.namespace(&namespace)?.keyspace(&keyspace)?;
		let primary = keyspace_ref
			.indexer(index.index_type())?
			.primary_indexes()?
			.into_iter()
			.find(|p| p.name() == name)
			.ok_or_else(|| Error::new(ErrorKind::IndexNotFound { name }))?;
		let limit = json.get("limit").map(expr_from_json);
		Ok(Self { index: primary, namespace, keyspace, limit })
	}
}

#[derive(Clone)]
pub struct IndexScan {
	index: Arc<dyn Index>,
	namespace: String,
	keyspace: String,
	spans: Spans,
	distinct: bool,
	limit: Option<Arc<Expr>>,
	covers: Option<Exprs>,
}

impl IndexScan {
	pub fn new(
		index: Arc<dyn Index>,
		namespace: impl Into<String>,
		keyspace: impl Into<String>,
		spans: Spans,
		distinct: bool,
		limit: Option<Arc<Expr>>,
		covers: Option<Exprs>,
	) -> Self {
		Self {
			index,
			namespace: namespace.into(),
			keyspace: keyspace.into(),
			spans,
			distinct,
			limit,
			covers,
		}
	}

	pub fn index(&self) -> &Arc<dyn Index> {
		&self.index
	}

	pub fn keyspace(&self) -> &str {
		&self.keyspace
	}

	pub fn spans(&self) -> &Spans {
		&self.spans
	}

	pub fn distinct(&self) -> bool {
		self.distinct
	}

	pub fn limit(&self) -> Option<&Arc<Expr>> {
		self.limit.as_ref()
	}

	pub fn covers(&self) -> Option<&Exprs> {
		self.covers.as_ref()
	}

	pub fn covering(&self) -> bool {
		self.covers.as_ref().is_some_and(|c| !c.is_empty())
	}

	pub fn to_json(&self) -> Json {
		let mut r = Map::new();
		r.insert("#operator".to_owned(), json!("IndexScan"));
		r.insert("index".to_owned(), json!(self.index.name()));
		r.insert("namespace".to_owned(), json!(self.namespace));
		r.insert("keyspace".to_owned(), json!(self.keyspace));
		r.insert("using".to_owned(), json!(self.index.index_type().to_string()));
		r.insert("spans".to_owned(), Json::Array(self.spans.iter().map(Span::to_json).collect()));
		if self.distinct {
			r.insert("distinct".to_owned(), json!(true));
		}
		if let Some(limit) = &self.limit {
			r.insert("limit".to_owned(), expr_json(limit));
		}
		if let Some(covers) = &self.covers {
			r.insert(
				"covers".to_owned(),
				Json::Array(covers.iter().map(|c| Json::String(c.to_string())).collect()),
			);
		}
		Json::Object(r)
	}

	fn from_json(json: &Json, datastore: &dyn Datastore) -> Result<Self, Error> {
		let (index, namespace, keyspace) = resolve_index(json, datastore)?;
		let spans = json
			.get("spans")
			.and_then(Json::as_array)
			.ok_or_else(|| Error::new(ErrorKind::Parse { message: "IndexScan without spans".into() }))?
			.iter()
			.map(Span::from_json)
			.collect::<Result<Spans, Error>>()?;
		let distinct = json.get("distinct").and_then(Json::as_bool).unwrap_or(false);
		let limit = json.get("limit").map(expr_from_json);
		Ok(Self { index, namespace, keyspace, spans, distinct, limit, covers: None })
	}
}

/// The USE KEYS shortcut: fetch the given primary keys directly.
#[derive(Clone)]
pub struct KeyScan {
	keys: Arc<Expr>,
}

impl KeyScan {
	pub fn new(keys: Arc<Expr>) -> Self {
		Self { keys }
	}

	pub fn keys(&self) -> &Arc<Expr> {
		&self.keys
	}

	pub fn to_json(&self) -> Json {
		json!({ "#operator": "KeyScan", "keys": expr_json(&self.keys) })
	}

	fn from_json(json: &Json) -> Result<Self, Error> {
		let keys = json
			.get("keys")
			.map(expr_from_json)
			.ok_or_else(|| Error::new(ErrorKind::Parse { message: "KeyScan without keys".into() }))?;
		Ok(Self { keys })
	}
}

/// Used for UNNEST of a parent document.
#[derive(Clone, Copy, Default)]
pub struct ParentScan;

/// Used for VALUES clauses, e.g. in INSERTs.
#[derive(Clone)]
pub struct ValueScan {
	values: Arc<Expr>,
}

impl ValueScan {
	pub fn new(values: Arc<Expr>) -> Self {
		Self { values }
	}

	pub fn values(&self) -> &Arc<Expr> {
		&self.values
	}

	pub fn to_json(&self) -> Json {
		json!({ "#operator": "ValueScan", "values": expr_json(&self.values) })
	}

	fn from_json(json: &Json) -> Result<Self, Error> {
		let values = json.get("values").map(expr_from_json).ok_or_else(|| {
			Error::new(ErrorKind::Parse { message: "ValueScan without values".into() })
		})?;
		Ok(Self { values })
	}
}

/// Used for SELECTs with no FROM clause.
#[derive(Clone, Copy, Default)]
pub struct DummyScan;

/// Used for SELECT COUNT(*) with no WHERE clause.
#[derive(Clone)]
pub struct CountScan {
	namespace: String,
	keyspace: String,
}

impl CountScan {
	pub fn new(namespace: impl Into<String>, keyspace: impl Into<String>) -> Self {
		Self { namespace: namespace.into(), keyspace: keyspace.into() }
	}

	pub fn keyspace(&self) -> &str {
		&self.keyspace
	}

	pub fn to_json(&self) -> Json {
		json!({
			"#operator": "CountScan",
			"namespace": self.namespace,
			"keyspace": self.keyspace,
		})
	}

	fn from_json(json: &Json) -> Result<Self, Error> {
		let field = |name: &str| -> Result<String, Error> {
			json.get(name).and_then(Json::as_str).map(str::to_owned).ok_or_else(|| {
				Error::new(ErrorKind::Parse { message: format!("CountScan without {name}") })
			})
		};
		Ok(Self { namespace: field("namespace")?, keyspace: field("keyspace")? })
	}
}

/// De-duplicating union over child scans. A multi-span index scan may
/// produce one primary key several times; the union collapses them.
#[derive(Clone)]
pub struct UnionScan {
	scans: Vec<ScanPlan>,
}

impl UnionScan {
	pub fn new(scans: Vec<ScanPlan>) -> Self {
		Self { scans }
	}

	pub fn scans(&self) -> &[ScanPlan] {
		&self.scans
	}

	pub fn to_json(&self) -> Json {
		json!({
			"#operator": "UnionScan",
			"scans": Json::Array(self.scans.iter().map(ScanPlan::to_json).collect()),
		})
	}
}

/// Intersection over child scans: only primary keys present in every
/// child survive. Child output order is unspecified.
#[derive(Clone)]
pub struct IntersectScan {
	scans: Vec<ScanPlan>,
}

impl IntersectScan {
	pub fn new(scans: Vec<ScanPlan>) -> Self {
		Self { scans }
	}

	pub fn scans(&self) -> &[ScanPlan] {
		&self.scans
	}

	pub fn to_json(&self) -> Json {
		json!({
			"#operator": "IntersectScan",
			"scans": Json::Array(self.scans.iter().map(ScanPlan::to_json).collect()),
		})
	}
}

/// Residual predicate application above a scan.
#[derive(Clone)]
pub struct Filter {
	cond: Arc<Expr>,
}

impl Filter {
	pub fn new(cond: Arc<Expr>) -> Self {
		Self { cond }
	}

	pub fn condition(&self) -> &Arc<Expr> {
		&self.cond
	}

	pub fn to_json(&self) -> Json {
		json!({ "#operator": "Filter", "condition": self.cond.to_string() })
	}

	fn from_json(json: &Json) -> Result<Self, Error> {
		let cond = json.get("condition").map(expr_from_json).ok_or_else(|| {
			Error::new(ErrorKind::Parse { message: "Filter without condition".into() })
		})?;
		Ok(Self { cond })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::catalog::mock::MockDatastore;
	use crate::idx::planner::span::Inclusion;

	fn datastore() -> MockDatastore {
		let ds = MockDatastore::new("default");
		let ks = ds.add_keyspace("default", "users");
		ks.add_primary_index("#primary");
		ks.add_index("by_name", vec![Expr::field("name")], None);
		ds
	}

	#[test]
	fn index_scan_round_trips_through_the_catalog() {
		let ds = datastore();
		let ks = ds.namespace("default").unwrap().keyspace("users").unwrap();
		let ix = ks.indexer(IndexType::Default).unwrap().index_by_name("by_name").unwrap();
		let spans = vec![Span::new(
			vec![Expr::constant("alice")],
			vec![Expr::constant("alice")],
			Inclusion::BOTH,
		)];
		let scan = IndexScan::new(ix, "default", "users", spans, false, None, None);
		let json = scan.to_json();
		assert_eq!(json["#operator"], "IndexScan");
		assert_eq!(json["spans"][0]["Range"]["Low"][0], "alice");

		let back = ScanPlan::from_json(&json, &ds).unwrap();
		let ScanPlan::Index(back) = back else { panic!("expected IndexScan") };
		assert_eq!(back.index().name(), "by_name");
		assert_eq!(back.spans(), scan.spans());
	}

	#[test]
	fn unknown_indexes_fail_resolution() {
		let ds = datastore();
		let json = serde_json::json!({
			"#operator": "IndexScan",
			"index": "by_age",
			"namespace": "default",
			"keyspace": "users",
			"using": "default",
			"spans": [],
		});
		let err = ScanPlan::from_json(&json, &ds).unwrap_err();
		assert_eq!(err.code(), 4042);
	}

	#[test]
	fn leaf_operators_round_trip() {
		let ds = datastore();
		let key_scan = ScanPlan::Key(KeyScan::new(Expr::constant(Value::Array(vec![
			Value::from("a"),
			Value::from("b"),
		]))));
		let json = key_scan.to_json();
		assert_eq!(json, serde_json::json!({ "#operator": "KeyScan", "keys": ["a", "b"] }));
		assert!(matches!(ScanPlan::from_json(&json, &ds).unwrap(), ScanPlan::Key(_)));

		let value_scan = ScanPlan::Value(ValueScan::new(Expr::constant(Value::from(1i64))));
		let back = ScanPlan::from_json(&value_scan.to_json(), &ds).unwrap();
		assert_eq!(back.operator(), "ValueScan");

		let filter = ScanPlan::Filter(Filter::new(Expr::eq(
			Expr::field("a"),
			Expr::constant(1i64),
		)));
		let json = filter.to_json();
		assert_eq!(json["condition"], "(a = 1)");

		for plan in [ScanPlan::Parent(ParentScan), ScanPlan::Dummy(DummyScan)] {
			let back = ScanPlan::from_json(&plan.to_json(), &ds).unwrap();
			assert_eq!(back.operator(), plan.operator());
		}
	}

	#[test]
	fn composite_scans_nest_their_children() {
		let ds = datastore();
		let ks = ds.namespace("default").unwrap().keyspace("users").unwrap();
		let ix = ks.indexer(IndexType::Default).unwrap().index_by_name("by_name").unwrap();
		let child = ScanPlan::Index(IndexScan::new(
			ix,
			"default",
			"users",
			vec![Span::full()],
			false,
			None,
			None,
		));
		let union = ScanPlan::Union(UnionScan::new(vec![child.clone()]));
		let json = union.to_json();
		assert_eq!(json["scans"][0]["#operator"], "IndexScan");
		let back = ScanPlan::from_json(&json, &ds).unwrap();
		assert!(matches!(back, ScanPlan::Union(u) if u.scans().len() == 1));
	}
}
