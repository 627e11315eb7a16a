//! An in-memory datastore for tests and experimentation.
//!
//! Documents live in a plain map; indexes evaluate their key expressions
//! against each document and execute spans with the value collation. The
//! planner sees it through the same capability traits as a real backend.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};

use crate::catalog::{
	ConnectionContext, Datastore, Index, IndexConnection, IndexEntry, IndexState, IndexType,
	Indexer, Keyspace, Namespace, PrimaryIndex, ScanConsistency, Statistics, Timestamp,
};
use crate::err::{Error, ErrorKind};
use crate::expr::{Expr, Exprs, evaluate};
use crate::idx::planner::span::Span;
use crate::val::Value;

type Docs = Arc<RwLock<BTreeMap<String, Value>>>;

static NEXT_INDEX_ID: AtomicU64 = AtomicU64::new(1);

pub struct MockDatastore {
	namespaces: RwLock<BTreeMap<String, Arc<MockNamespace>>>,
}

impl MockDatastore {
	pub fn new(namespace: &str) -> Self {
		let ds = Self { namespaces: RwLock::new(BTreeMap::new()) };
		ds.add_namespace(namespace);
		ds
	}

	pub fn add_namespace(&self, name: &str) -> Arc<MockNamespace> {
		let ns = Arc::new(MockNamespace {
			name: name.to_owned(),
			keyspaces: RwLock::new(BTreeMap::new()),
		});
		self.namespaces.write().unwrap().insert(name.to_owned(), ns.clone());
		ns
	}

	pub fn add_keyspace(&self, namespace: &str, name: &str) -> Arc<MockKeyspace> {
		let ns = self.namespaces.read().unwrap().get(namespace).cloned().expect("namespace");
		ns.add_keyspace(name)
	}

	/// The concrete keyspace handle, for defining documents and indexes.
	pub fn keyspace_handle(&self, namespace: &str, name: &str) -> Arc<MockKeyspace> {
		let ns = self.namespaces.read().unwrap().get(namespace).cloned().expect("namespace");
		let ks = ns.keyspaces.read().unwrap().get(name).cloned().expect("keyspace");
		ks
	}
}

impl Datastore for MockDatastore {
	fn namespace_names(&self) -> Result<Vec<String>, Error> {
		Ok(self.namespaces.read().unwrap().keys().cloned().collect())
	}

	fn namespace(&self, name: &str) -> Result<Arc<dyn Namespace>, Error> {
		self.namespaces
			.read()
			.unwrap()
			.get(name)
			.cloned()
			.map(|ns| ns as Arc<dyn Namespace>)
			.ok_or_else(|| Error::new(ErrorKind::NamespaceNotFound { namespace: name.to_owned() }))
	}
}

pub struct MockNamespace {
	name: String,
	keyspaces: RwLock<BTreeMap<String, Arc<MockKeyspace>>>,
}

impl MockNamespace {
	pub fn add_keyspace(self: &Arc<Self>, name: &str) -> Arc<MockKeyspace> {
		let docs: Docs = Arc::new(RwLock::new(BTreeMap::new()));
		let ks = Arc::new(MockKeyspace {
			namespace_id: self.name.clone(),
			name: name.to_owned(),
			docs,
			indexer: Arc::new(MockIndexer {
				keyspace_id: name.to_owned(),
				indexes: RwLock::new(Vec::new()),
			}),
		});
		self.keyspaces.write().unwrap().insert(name.to_owned(), ks.clone());
		ks
	}
}

impl Namespace for MockNamespace {
	fn name(&self) -> &str {
		&self.name
	}

	fn keyspace_names(&self) -> Result<Vec<String>, Error> {
		Ok(self.keyspaces.read().unwrap().keys().cloned().collect())
	}

	fn keyspace(&self, name: &str) -> Result<Arc<dyn Keyspace>, Error> {
		self.keyspaces
			.read()
			.unwrap()
			.get(name)
			.cloned()
			.map(|ks| ks as Arc<dyn Keyspace>)
			.ok_or_else(|| Error::new(ErrorKind::KeyspaceNotFound { keyspace: name.to_owned() }))
	}
}

pub struct MockKeyspace {
	namespace_id: String,
	name: String,
	docs: Docs,
	indexer: Arc<MockIndexer>,
}

impl MockKeyspace {
	pub fn add_doc(&self, key: &str, doc: serde_json::Value) {
		self.docs.write().unwrap().insert(key.to_owned(), Value::from_json(&doc));
	}

	pub fn add_primary_index(&self, name: &str) -> Arc<MockIndex> {
		self.indexer.add(MockIndex::new(self, name, vec![], None, IndexState::Online, true))
	}

	pub fn add_index(
		&self,
		name: &str,
		range_key: Exprs,
		condition: Option<Arc<Expr>>,
	) -> Arc<MockIndex> {
		self.add_index_with_state(name, range_key, condition, IndexState::Online)
	}

	pub fn add_index_with_state(
		&self,
		name: &str,
		range_key: Exprs,
		condition: Option<Arc<Expr>>,
		state: IndexState,
	) -> Arc<MockIndex> {
		self.indexer.add(MockIndex::new(self, name, range_key, condition, state, false))
	}
}

impl Keyspace for MockKeyspace {
	fn namespace_id(&self) -> &str {
		&self.namespace_id
	}

	fn name(&self) -> &str {
		&self.name
	}

	fn indexers(&self) -> Result<Vec<Arc<dyn Indexer>>, Error> {
		Ok(vec![self.indexer.clone() as Arc<dyn Indexer>])
	}

	fn indexer(&self, using: IndexType) -> Result<Arc<dyn Indexer>, Error> {
		if using == self.indexer.name() {
			Ok(self.indexer.clone() as Arc<dyn Indexer>)
		} else {
			Err(Error::new(ErrorKind::IndexCatalog {
				message: format!("no {using} indexer on keyspace {}", self.name),
			}))
		}
	}
}

pub struct MockIndexer {
	keyspace_id: String,
	indexes: RwLock<Vec<Arc<MockIndex>>>,
}

impl MockIndexer {
	fn add(&self, index: MockIndex) -> Arc<MockIndex> {
		let index = Arc::new(index);
		self.indexes.write().unwrap().push(index.clone());
		index
	}

	fn find(&self, pred: impl Fn(&MockIndex) -> bool) -> Option<Arc<MockIndex>> {
		self.indexes.read().unwrap().iter().find(|ix| pred(ix)).cloned()
	}
}

impl Indexer for MockIndexer {
	fn keyspace_id(&self) -> &str {
		&self.keyspace_id
	}

	fn name(&self) -> IndexType {
		IndexType::Default
	}

	fn index_ids(&self) -> Result<Vec<String>, Error> {
		Ok(self.indexes.read().unwrap().iter().map(|ix| ix.id.clone()).collect())
	}

	fn index_names(&self) -> Result<Vec<String>, Error> {
		Ok(self.indexes.read().unwrap().iter().map(|ix| ix.name.clone()).collect())
	}

	fn index_by_id(&self, id: &str) -> Result<Arc<dyn Index>, Error> {
		self.find(|ix| ix.id == id)
			.map(|ix| ix as Arc<dyn Index>)
			.ok_or_else(|| Error::new(ErrorKind::IndexNotFound { name: id.to_owned() }))
	}

	fn index_by_name(&self, name: &str) -> Result<Arc<dyn Index>, Error> {
		self.find(|ix| ix.name == name)
			.map(|ix| ix as Arc<dyn Index>)
			.ok_or_else(|| Error::new(ErrorKind::IndexNotFound { name: name.to_owned() }))
	}

	fn primary_indexes(&self) -> Result<Vec<Arc<dyn PrimaryIndex>>, Error> {
		Ok(self
			.indexes
			.read()
			.unwrap()
			.iter()
			.filter(|ix| ix.primary)
			.cloned()
			.map(|ix| ix as Arc<dyn PrimaryIndex>)
			.collect())
	}

	fn indexes(&self) -> Result<Vec<Arc<dyn Index>>, Error> {
		Ok(self.indexes.read().unwrap().iter().cloned().map(|ix| ix as Arc<dyn Index>).collect())
	}

	fn refresh(&self) -> Result<(), Error> {
		Ok(())
	}
}

pub struct MockIndex {
	id: String,
	name: String,
	keyspace_id: String,
	range_key: Exprs,
	condition: Option<Arc<Expr>>,
	state: RwLock<IndexState>,
	primary: bool,
	docs: Docs,
}

impl MockIndex {
	fn new(
		keyspace: &MockKeyspace,
		name: &str,
		range_key: Exprs,
		condition: Option<Arc<Expr>>,
		state: IndexState,
		primary: bool,
	) -> Self {
		Self {
			id: NEXT_INDEX_ID.fetch_add(1, AtomicOrdering::Relaxed).to_string(),
			name: name.to_owned(),
			keyspace_id: keyspace.name.clone(),
			range_key,
			condition,
			state: RwLock::new(state),
			primary,
			docs: keyspace.docs.clone(),
		}
	}

	pub fn set_state(&self, state: IndexState) {
		*self.state.write().unwrap() = state;
	}

	/// The composite key of a document under this index, or None when
	/// the document is not indexed (leading key missing, or the partial
	/// condition does not hold).
	fn entry_key(&self, doc: &Value) -> Option<Vec<Value>> {
		if let Some(cond) = &self.condition {
			if !evaluate(cond, doc).is_truthy() {
				return None;
			}
		}
		let key: Vec<Value> = self.range_key.iter().map(|k| evaluate(k, doc)).collect();
		match key.first() {
			Some(Value::Missing) | None => None,
			_ => Some(key),
		}
	}

	fn send_entries(&self, span: Option<&Span>, limit: i64, conn: &IndexConnection) {
		let tx = conn.sender();
		let mut sent = 0i64;
		for (pk, doc) in self.docs.read().unwrap().iter() {
			if conn.stop_requested() {
				break;
			}
			if limit > 0 && sent >= limit {
				break;
			}
			let entry_key = if self.primary {
				vec![Value::from(pk.as_str())]
			} else {
				match self.entry_key(doc) {
					Some(k) => k,
					None => continue,
				}
			};
			if let Some(span) = span {
				if !span.contains(&entry_key) {
					continue;
				}
			}
			if tx.send_blocking(IndexEntry { entry_key, primary_key: pk.clone() }).is_err() {
				break;
			}
			sent += 1;
		}
		tx.close();
	}
}

impl Index for MockIndex {
	fn keyspace_id(&self) -> &str {
		&self.keyspace_id
	}

	fn id(&self) -> &str {
		&self.id
	}

	fn name(&self) -> &str {
		&self.name
	}

	fn index_type(&self) -> IndexType {
		IndexType::Default
	}

	fn seek_key(&self) -> Exprs {
		vec![]
	}

	fn range_key(&self) -> Exprs {
		self.range_key.clone()
	}

	fn condition(&self) -> Option<Arc<Expr>> {
		self.condition.clone()
	}

	fn is_primary(&self) -> bool {
		self.primary
	}

	fn as_primary(self: Arc<Self>) -> Option<Arc<dyn PrimaryIndex>> {
		self.primary.then_some(self as Arc<dyn PrimaryIndex>)
	}

	fn state(&self) -> Result<(IndexState, String), Error> {
		Ok((*self.state.read().unwrap(), String::new()))
	}

	fn statistics(&self, _request_id: &str, span: &Span) -> Result<Arc<dyn Statistics>, Error> {
		let mut keys = Vec::new();
		for (pk, doc) in self.docs.read().unwrap().iter() {
			let entry_key = if self.primary {
				vec![Value::from(pk.as_str())]
			} else {
				match self.entry_key(doc) {
					Some(k) => k,
					None => continue,
				}
			};
			if span.contains(&entry_key) {
				keys.push(entry_key);
			}
		}
		keys.sort();
		Ok(Arc::new(MockStatistics { keys }))
	}

	fn scan(
		&self,
		_request_id: &str,
		span: &Span,
		_distinct: bool,
		limit: i64,
		_cons: ScanConsistency,
		_vector: Option<&Timestamp>,
		conn: &IndexConnection,
	) {
		self.send_entries(Some(span), limit, conn);
	}
}

impl PrimaryIndex for MockIndex {
	fn scan_entries(
		&self,
		_request_id: &str,
		limit: i64,
		_cons: ScanConsistency,
		_vector: Option<&Timestamp>,
		conn: &IndexConnection,
	) {
		self.send_entries(None, limit, conn);
	}
}

struct MockStatistics {
	keys: Vec<Vec<Value>>,
}

impl Statistics for MockStatistics {
	fn count(&self) -> Result<i64, Error> {
		Ok(self.keys.len() as i64)
	}

	fn min(&self) -> Result<Vec<Value>, Error> {
		Ok(self.keys.first().cloned().unwrap_or_default())
	}

	fn max(&self) -> Result<Vec<Value>, Error> {
		Ok(self.keys.last().cloned().unwrap_or_default())
	}

	fn distinct_count(&self) -> Result<i64, Error> {
		let mut keys = self.keys.clone();
		keys.dedup();
		Ok(keys.len() as i64)
	}

	fn bins(&self) -> Result<Vec<Arc<dyn Statistics>>, Error> {
		Ok(vec![])
	}
}

/// A request context that collects the errors and warnings a scan
/// raises.
#[derive(Default)]
pub struct RequestContext {
	errors: Mutex<Vec<Error>>,
	warnings: Mutex<Vec<Error>>,
}

impl RequestContext {
	pub fn errors(&self) -> Vec<i32> {
		self.errors.lock().unwrap().iter().map(Error::code).collect()
	}

	pub fn warnings(&self) -> Vec<i32> {
		self.warnings.lock().unwrap().iter().map(Error::code).collect()
	}
}

impl ConnectionContext for RequestContext {
	fn fatal(&self, err: Error) {
		self.errors.lock().unwrap().push(err);
	}

	fn error(&self, err: Error) {
		self.errors.lock().unwrap().push(err);
	}

	fn warning(&self, err: Error) {
		self.warnings.lock().unwrap().push(err);
	}
}
