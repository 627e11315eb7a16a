//! End-to-end index selection against the in-memory datastore.

use std::sync::Arc;

use quiver_core::catalog::mock::{MockDatastore, RequestContext};
use quiver_core::catalog::{
	Datastore, IndexConnection, IndexState, Keyspace, ScanConsistency,
};
use quiver_core::expr::{CmpOp, Expr};
use quiver_core::idx::planner::plan::ScanPlan;
use quiver_core::idx::planner::{Builder, KeyspaceTerm};
use quiver_core::val::Value;

fn users() -> (MockDatastore, Arc<dyn Keyspace>) {
	let ds = MockDatastore::new("default");
	let ks = ds.add_keyspace("default", "users");
	ks.add_doc("u1", serde_json::json!({"name": "alice", "age": 30, "city": "NYC", "status": "A", "active": true}));
	ks.add_doc("u2", serde_json::json!({"name": "bob", "age": 25, "city": "SF", "status": "B", "active": false}));
	ks.add_doc("u3", serde_json::json!({"name": "carol", "age": 41, "city": "NYC", "status": "C", "active": true}));
	let ks = ds.namespace("default").unwrap().keyspace("users").unwrap();
	(ds, ks)
}

fn term() -> KeyspaceTerm {
	KeyspaceTerm::new("default", "users")
}

fn mock_keyspace(ds: &MockDatastore) -> Arc<quiver_core::catalog::mock::MockKeyspace> {
	ds.keyspace_handle("default", "users")
}

#[test]
fn equality_on_a_single_key_is_a_bare_index_scan() {
	let (ds, ks) = users();
	mock_keyspace(&ds).add_index("by_name", vec![Expr::field("name")], None);

	let pred = Expr::eq(Expr::field("name"), Expr::constant("alice"));
	let mut builder = Builder::new(Some(pred));
	let plan = builder.select_scan(&ks, &term(), None).unwrap();

	let ScanPlan::Index(scan) = plan else { panic!("expected IndexScan, got {plan:?}") };
	assert_eq!(scan.index().name(), "by_name");
	assert_eq!(
		scan.to_json()["spans"],
		serde_json::json!([
			{ "Range": { "Low": ["alice"], "High": ["alice"], "Inclusion": 3 } }
		])
	);
}

#[test]
fn a_leading_range_drops_the_inner_high_bound() {
	let (ds, ks) = users();
	mock_keyspace(&ds).add_index("by_age_city", vec![Expr::field("age"), Expr::field("city")], None);

	let pred = Expr::and(vec![
		Expr::between(Expr::field("age"), Expr::constant(20i64), Expr::constant(30i64)),
		Expr::eq(Expr::field("city"), Expr::constant("NYC")),
	]);
	let mut builder = Builder::new(Some(pred));
	let plan = builder.select_scan(&ks, &term(), None).unwrap();

	let ScanPlan::Index(scan) = plan else { panic!("expected IndexScan, got {plan:?}") };
	assert_eq!(
		scan.to_json()["spans"],
		serde_json::json!([
			{ "Range": { "Low": [20, "NYC"], "High": [30], "Inclusion": 3 } }
		])
	);
}

#[test]
fn a_single_key_disjunction_is_wrapped_in_a_union_scan() {
	let (ds, ks) = users();
	mock_keyspace(&ds).add_index("by_status", vec![Expr::field("status")], None);

	let pred = Expr::or(vec![
		Expr::eq(Expr::field("status"), Expr::constant("A")),
		Expr::eq(Expr::field("status"), Expr::constant("B")),
	]);
	let mut builder = Builder::new(Some(pred));
	let plan = builder.select_scan(&ks, &term(), None).unwrap();

	let ScanPlan::Union(union) = plan else { panic!("expected UnionScan, got {plan:?}") };
	assert_eq!(union.scans().len(), 1);
	let ScanPlan::Index(scan) = &union.scans()[0] else { panic!("expected IndexScan child") };
	assert_eq!(scan.spans().len(), 2);
	let json = scan.to_json();
	assert_eq!(json["spans"][0]["Range"]["Low"], serde_json::json!(["A"]));
	assert_eq!(json["spans"][1]["Range"]["Low"], serde_json::json!(["B"]));
}

#[test]
fn two_minimal_indexes_intersect() {
	let (ds, ks) = users();
	let mk = mock_keyspace(&ds);
	mk.add_index("by_age", vec![Expr::field("age")], None);
	mk.add_index("by_city", vec![Expr::field("city")], None);

	let pred = Expr::and(vec![
		Expr::cmp(CmpOp::Gt, Expr::field("age"), Expr::constant(30i64)),
		Expr::eq(Expr::field("city"), Expr::constant("NYC")),
	]);
	let mut builder = Builder::new(Some(pred));
	let plan = builder.select_scan(&ks, &term(), None).unwrap();

	let ScanPlan::Intersect(intersect) = plan else {
		panic!("expected IntersectScan, got {plan:?}")
	};
	let mut names: Vec<&str> = intersect
		.scans()
		.iter()
		.map(|s| match s {
			ScanPlan::Index(i) => i.index().name(),
			other => panic!("unexpected child {other:?}"),
		})
		.collect();
	names.sort();
	assert_eq!(names, ["by_age", "by_city"]);
}

#[test]
fn a_partial_index_needs_its_condition_implied() {
	let (ds, ks) = users();
	let cond = Expr::eq(Expr::field("active"), Expr::constant(true));
	mock_keyspace(&ds).add_index("active_users", vec![Expr::field("name")], Some(cond));
	mock_keyspace(&ds).add_primary_index("#primary");

	// The predicate implies the condition: the partial index is usable
	let pred = Expr::and(vec![
		Expr::eq(Expr::field("active"), Expr::constant(true)),
		Expr::eq(Expr::field("name"), Expr::constant("alice")),
	]);
	let mut builder = Builder::new(Some(pred));
	let plan = builder.select_scan(&ks, &term(), None).unwrap();
	let ScanPlan::Index(scan) = plan else { panic!("expected IndexScan, got {plan:?}") };
	assert_eq!(scan.index().name(), "active_users");

	// Without the implication the index is dropped
	let pred = Expr::eq(Expr::field("name"), Expr::constant("alice"));
	let mut builder = Builder::new(Some(pred));
	let plan = builder.select_scan(&ks, &term(), None).unwrap();
	assert!(matches!(plan, ScanPlan::Primary(_)), "expected PrimaryScan, got {plan:?}");
}

#[test]
fn an_unsargable_predicate_falls_back_to_the_primary_scan() {
	let (ds, ks) = users();
	mock_keyspace(&ds).add_index("by_name", vec![Expr::field("name")], None);
	mock_keyspace(&ds).add_primary_index("#primary");

	let pred = Expr::eq(
		Arc::new(Expr::Function { name: "upper".to_owned(), args: vec![Expr::field("name")] }),
		Expr::constant("ALICE"),
	);
	let mut builder = Builder::new(Some(pred));
	let plan = builder.select_scan(&ks, &term(), None).unwrap();
	let ScanPlan::Primary(scan) = plan else { panic!("expected PrimaryScan, got {plan:?}") };
	assert_eq!(scan.index().name(), "#primary");
}

#[test]
fn no_online_primary_is_a_fatal_error() {
	let (ds, ks) = users();
	let pred = Expr::eq(
		Arc::new(Expr::Function { name: "upper".to_owned(), args: vec![Expr::field("name")] }),
		Expr::constant("ALICE"),
	);
	let mut builder = Builder::new(Some(pred.clone()));
	let err = builder.select_scan(&ks, &term(), None).unwrap_err();
	assert_eq!(err.code(), 4010);
	assert!(err.to_string().contains("No primary index on keyspace users"));

	// A primary that exists but is not online reports its name instead
	let primary = mock_keyspace(&ds).add_primary_index("#primary");
	primary.set_state(IndexState::Building);
	let mut builder = Builder::new(Some(pred));
	let err = builder.select_scan(&ks, &term(), None).unwrap_err();
	assert_eq!(err.code(), 4011);
}

#[test]
fn use_keys_bypasses_index_selection() {
	let (_ds, ks) = users();
	let keys = Expr::constant(Value::Array(vec![
		Value::from("a"),
		Value::from("b"),
		Value::from("c"),
	]));

	let mut t = term();
	t.keys = Some(keys);
	let mut builder = Builder::new(None);
	let plan = builder.select_scan(&ks, &t, None).unwrap();
	assert!(matches!(plan, ScanPlan::Key(_)));
	assert_eq!(builder.max_parallelism(), 3);

	t.keys = Some(Arc::new(Expr::Param("keys".to_owned())));
	let plan = builder.select_scan(&ks, &t, None).unwrap();
	assert!(matches!(plan, ScanPlan::Key(_)));
	assert_eq!(builder.max_parallelism(), 0);

	t.keys = Some(Expr::field("other"));
	let plan = builder.select_scan(&ks, &t, None).unwrap();
	assert!(matches!(plan, ScanPlan::Key(_)));
	assert_eq!(builder.max_parallelism(), 1);
}

#[test]
fn non_online_indexes_are_skipped_with_a_warning() {
	let (ds, ks) = users();
	let mk = mock_keyspace(&ds);
	let pending = mk.add_index_with_state(
		"by_name_new",
		vec![Expr::field("name")],
		None,
		IndexState::Pending,
	);
	mk.add_primary_index("#primary");
	let _ = pending;

	let pred = Expr::eq(Expr::field("name"), Expr::constant("alice"));
	let mut builder = Builder::new(Some(pred));
	let plan = builder.select_scan(&ks, &term(), None).unwrap();
	assert!(matches!(plan, ScanPlan::Primary(_)));
	assert_eq!(builder.warnings().len(), 1);
	assert_eq!(builder.warnings()[0].code(), 4090);
	assert!(!builder.warnings()[0].is_fatal());
}

#[test]
fn a_covering_index_short_circuits_composition() {
	let (ds, ks) = users();
	let mk = mock_keyspace(&ds);
	mk.add_index("by_name_age", vec![Expr::field("name"), Expr::field("age")], None);
	mk.add_index("by_name", vec![Expr::field("name")], None);

	let pred = Expr::and(vec![
		Expr::eq(Expr::field("name"), Expr::constant("alice")),
		Expr::cmp(CmpOp::Gt, Expr::field("age"), Expr::constant(20i64)),
	]);
	let cover = vec![Expr::field("name"), Expr::field("age")];
	let mut builder = Builder::new(Some(pred)).with_cover(cover);
	let plan = builder.select_scan(&ks, &term(), None).unwrap();

	let ScanPlan::Index(scan) = plan else { panic!("expected IndexScan, got {plan:?}") };
	assert_eq!(scan.index().name(), "by_name_age");
	assert!(scan.covering());
	let json = scan.to_json();
	assert_eq!(json["covers"], serde_json::json!(["name", "age"]));
}

#[test]
fn hinted_selection_only_considers_the_hints() {
	let (ds, ks) = users();
	let mk = mock_keyspace(&ds);
	mk.add_index("by_name", vec![Expr::field("name")], None);
	mk.add_index("by_age", vec![Expr::field("age")], None);

	let pred = Expr::and(vec![
		Expr::eq(Expr::field("name"), Expr::constant("alice")),
		Expr::cmp(CmpOp::Gt, Expr::field("age"), Expr::constant(20i64)),
	]);
	let mut t = term();
	t.indexes = Some(vec![quiver_core::idx::planner::IndexRef {
		name: "by_age".to_owned(),
		using: Default::default(),
	}]);
	let mut builder = Builder::new(Some(pred));
	let plan = builder.select_scan(&ks, &t, None).unwrap();
	let ScanPlan::Index(scan) = plan else { panic!("expected IndexScan, got {plan:?}") };
	assert_eq!(scan.index().name(), "by_age");
}

#[test]
fn a_selected_scan_fetches_exactly_the_matching_documents() {
	let (ds, ks) = users();
	mock_keyspace(&ds).add_index("by_city", vec![Expr::field("city")], None);

	let pred = Expr::eq(Expr::field("city"), Expr::constant("NYC"));
	let mut builder = Builder::new(Some(pred));
	let plan = builder.select_scan(&ks, &term(), None).unwrap();
	let ScanPlan::Index(scan) = plan else { panic!("expected IndexScan, got {plan:?}") };

	let mut keys = Vec::new();
	for span in scan.spans() {
		let conn = IndexConnection::new(Arc::new(RequestContext::default()));
		scan.index().scan("r1", span, false, 0, ScanConsistency::Unbounded, None, &conn);
		while let Ok(entry) = conn.entries().recv_blocking() {
			keys.push(entry.primary_key);
		}
	}
	keys.sort();
	assert_eq!(keys, ["u1", "u3"]);
}
