//! Index selection.
//!
//! [`Builder::select_scan`] turns a keyspace term and its WHERE predicate
//! into a scan plan: the USE KEYS shortcut, a single index scan, a union
//! or intersection of scans, or the primary-scan fallback. Selection is
//! rule-based on sargability depth and subsumption; it consults no
//! statistics.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::catalog::{Index, IndexState, IndexType, Keyspace, PrimaryIndex};
use crate::err::{Error, ErrorKind};
use crate::expr::{Dnf, Expr, Exprs, subset_of};
use crate::idx::planner::plan::{
	IndexScan, IntersectScan, KeyScan, PrimaryScan, ScanPlan, UnionScan,
};
use crate::idx::planner::sarg::{sarg_for_keys, sargable_for};
use crate::idx::planner::span::Spans;
use crate::val::Value;

pub mod plan;
pub mod sarg;
pub mod span;

/// A USE INDEX hint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IndexRef {
	pub name: String,
	pub using: IndexType,
}

/// The FROM-clause term the planner works on.
#[derive(Clone, Debug)]
pub struct KeyspaceTerm {
	pub namespace: String,
	pub keyspace: String,
	pub alias: Option<String>,
	/// A USE KEYS clause, bypassing index selection entirely.
	pub keys: Option<Arc<Expr>>,
	/// USE INDEX hints; None means consider every index.
	pub indexes: Option<Vec<IndexRef>>,
}

impl KeyspaceTerm {
	pub fn new(namespace: impl Into<String>, keyspace: impl Into<String>) -> Self {
		Self {
			namespace: namespace.into(),
			keyspace: keyspace.into(),
			alias: None,
			keys: None,
			indexes: None,
		}
	}

	pub fn alias(&self) -> &str {
		self.alias.as_deref().unwrap_or(&self.keyspace)
	}
}

/// One candidate index under consideration.
#[derive(Clone)]
struct IndexEntry {
	keys: Exprs,
	sarg_keys: Exprs,
	cond: Option<Arc<Expr>>,
	spans: Spans,
}

type Candidates = Vec<(Arc<dyn Index>, IndexEntry)>;

/// Builds scan plans for one statement.
pub struct Builder {
	where_: Option<Arc<Expr>>,
	cover: Option<Exprs>,
	max_parallelism: usize,
	warnings: Vec<Error>,
}

impl Builder {
	pub fn new(where_: Option<Arc<Expr>>) -> Self {
		Self { where_, cover: None, max_parallelism: 0, warnings: Vec::new() }
	}

	/// Configure the expressions the statement projects; when one index
	/// covers them all, the base documents need not be fetched.
	pub fn with_cover(mut self, cover: Exprs) -> Self {
		self.cover = Some(cover);
		self
	}

	/// The parallelism hint derived for the last selected scan. Zero
	/// means "use the default".
	pub fn max_parallelism(&self) -> usize {
		self.max_parallelism
	}

	/// Non-fatal diagnostics gathered during selection, e.g. skipped
	/// indexes.
	pub fn warnings(&self) -> &[Error] {
		&self.warnings
	}

	/// Select the access path for one keyspace term.
	pub fn select_scan(
		&mut self,
		keyspace: &Arc<dyn Keyspace>,
		term: &KeyspaceTerm,
		limit: Option<Arc<Expr>>,
	) -> Result<ScanPlan, Error> {
		if let Some(keys) = &term.keys {
			self.max_parallelism = match keys.as_ref() {
				Expr::Constant(Value::Array(a)) => a.len().max(1),
				Expr::Param(_) => 0,
				_ => 1,
			};
			return Ok(ScanPlan::Key(KeyScan::new(keys.clone())));
		}

		// Use default parallelism for index scans
		self.max_parallelism = 0;

		let (secondary, primary) = self.build_scan(keyspace, term, limit)?;
		match secondary {
			Some(scan) => Ok(scan),
			None => Ok(ScanPlan::Primary(primary.expect("primary scan"))),
		}
	}

	fn build_scan(
		&mut self,
		keyspace: &Arc<dyn Keyspace>,
		term: &KeyspaceTerm,
		limit: Option<Arc<Expr>>,
	) -> Result<(Option<ScanPlan>, Option<PrimaryScan>), Error> {
		let mut hint_indexes: Vec<Arc<dyn Index>> = Vec::new();
		let mut other_indexes: Vec<Arc<dyn Index>> = Vec::new();
		let indexes = match &term.indexes {
			Some(hints) => {
				hint_indexes = self.all_hints(keyspace, hints)?;
				hint_indexes.clone()
			}
			None => {
				other_indexes = self.all_indexes(keyspace)?;
				other_indexes.clone()
			}
		};

		if let Some(pred) = &self.where_ {
			let dnf = Dnf::new();
			let pred = dnf.map(pred)?;
			let primary_key = vec![Arc::new(Expr::Function {
				name: "meta_id".to_owned(),
				args: vec![Expr::constant(term.alias())],
			})];

			let sargables = sargable_indexes(indexes, &pred, &primary_key, &dnf)?;
			let minimals = minimal_indexes(sargables, &pred)?;

			if !minimals.is_empty() {
				let scan = self.build_secondary_scan(minimals, term, limit);
				return Ok((Some(scan), None));
			}
		}

		let primary =
			self.build_primary_scan(keyspace, term, limit, &hint_indexes, &other_indexes)?;
		Ok((None, Some(primary)))
	}

	/// Resolve USE INDEX hints, keeping only online indexes.
	fn all_hints(
		&mut self,
		keyspace: &Arc<dyn Keyspace>,
		hints: &[IndexRef],
	) -> Result<Vec<Arc<dyn Index>>, Error> {
		let mut indexes = Vec::with_capacity(hints.len());
		for hint in hints {
			let indexer = keyspace.indexer(hint.using)?;
			let index = indexer.index_by_name(&hint.name)?;
			if self.check_online(&index) {
				indexes.push(index);
			}
		}
		Ok(indexes)
	}

	/// Enumerate every online index on the keyspace.
	fn all_indexes(&mut self, keyspace: &Arc<dyn Keyspace>) -> Result<Vec<Arc<dyn Index>>, Error> {
		let mut indexes = Vec::new();
		for indexer in keyspace.indexers()? {
			for index in indexer.indexes()? {
				if self.check_online(&index) {
					indexes.push(index);
				}
			}
		}
		Ok(indexes)
	}

	fn check_online(&mut self, index: &Arc<dyn Index>) -> bool {
		match index.state() {
			Ok((IndexState::Online, _)) => true,
			Ok((state, _)) => {
				warn!(index = index.name(), %state, "index skipped");
				self.warnings.push(Error::new(ErrorKind::IndexNotOnline {
					name: index.name().to_owned(),
					state,
				}));
				false
			}
			Err(err) => {
				warn!(index = index.name(), error = %err, "index state unavailable");
				self.warnings.push(err);
				false
			}
		}
	}

	fn build_secondary_scan(
		&mut self,
		minimals: Candidates,
		term: &KeyspaceTerm,
		limit: Option<Arc<Expr>>,
	) -> ScanPlan {
		if let Some(scan) = self.build_covering_scan(&minimals, term, &limit) {
			return scan;
		}

		let mut scans = Vec::with_capacity(minimals.len());
		for (index, entry) in minimals {
			let multi_span = entry.spans.len() > 1;
			let scan = ScanPlan::Index(IndexScan::new(
				index,
				term.namespace.clone(),
				term.keyspace.clone(),
				entry.spans,
				false,
				limit.clone(),
				None,
			));
			if multi_span {
				// Use a union to de-dup the keys a multi-span scan may
				// produce more than once
				scans.push(ScanPlan::Union(UnionScan::new(vec![scan])));
			} else {
				scans.push(scan);
			}
		}

		if scans.len() > 1 {
			ScanPlan::Intersect(IntersectScan::new(scans))
		} else {
			scans.into_iter().next().expect("at least one candidate")
		}
	}

	fn build_covering_scan(
		&mut self,
		minimals: &Candidates,
		term: &KeyspaceTerm,
		limit: &Option<Arc<Expr>>,
	) -> Option<ScanPlan> {
		let cover = self.cover.as_ref()?;
		for (index, entry) in minimals {
			if cover.iter().all(|expr| expr.covered_by(&entry.keys)) {
				debug!(index = index.name(), "covering index selected");
				let scan = IndexScan::new(
					index.clone(),
					term.namespace.clone(),
					term.keyspace.clone(),
					entry.spans.clone(),
					false,
					limit.clone(),
					Some(entry.keys.clone()),
				);
				return Some(ScanPlan::Index(scan));
			}
		}
		None
	}

	fn build_primary_scan(
		&mut self,
		keyspace: &Arc<dyn Keyspace>,
		term: &KeyspaceTerm,
		limit: Option<Arc<Expr>>,
		hint_indexes: &[Arc<dyn Index>],
		other_indexes: &[Arc<dyn Index>],
	) -> Result<PrimaryScan, Error> {
		let primary = build_primary_index(keyspace, hint_indexes, other_indexes)?;
		Ok(PrimaryScan::new(primary, term.namespace.clone(), term.keyspace.clone(), limit))
	}
}

/// Pick a primary index: hints first, then the other candidates, then
/// any online primary in the catalog.
fn build_primary_index(
	keyspace: &Arc<dyn Keyspace>,
	hint_indexes: &[Arc<dyn Index>],
	other_indexes: &[Arc<dyn Index>],
) -> Result<Arc<dyn PrimaryIndex>, Error> {
	for index in hint_indexes.iter().chain(other_indexes) {
		if !index.is_primary() {
			continue;
		}
		return index.clone().as_primary().ok_or_else(|| {
			Error::new(ErrorKind::IndexCatalog {
				message: format!("unable to cast primary index {}", index.name()),
			})
		});
	}

	// Fall back to the first online primary index
	let mut offline: Option<Arc<dyn PrimaryIndex>> = None;
	for indexer in keyspace.indexers()? {
		for primary in indexer.primary_indexes()? {
			let (state, _) = primary.state()?;
			if state == IndexState::Online {
				return Ok(primary);
			}
			offline = Some(primary);
		}
	}

	match offline {
		Some(primary) => {
			Err(Error::new(ErrorKind::PrimaryNotOnline { name: primary.name().to_owned() }))
		}
		None => Err(Error::new(ErrorKind::NoPrimaryIndex {
			keyspace: keyspace.name().to_owned(),
		})),
	}
}

/// Annotate each index the predicate can use: the normalised keys, the
/// sargable prefix, and the normalised partial-index condition. Indexes
/// whose condition is not implied by the predicate are discarded.
fn sargable_indexes(
	indexes: Vec<Arc<dyn Index>>,
	pred: &Arc<Expr>,
	primary_key: &Exprs,
	dnf: &Dnf,
) -> Result<Candidates, Error> {
	let mut sargables: Candidates = Vec::with_capacity(indexes.len());
	for index in indexes {
		let keys = if index.is_primary() {
			primary_key.clone()
		} else {
			let mut keys = Vec::new();
			for key in index.range_key() {
				keys.push(dnf.map(&key)?);
			}
			keys
		};

		let cond = match index.condition() {
			Some(cond) => {
				let cond = dnf.map(&cond)?;
				if !subset_of(pred, &cond) {
					continue;
				}
				Some(cond)
			}
			None => None,
		};

		let n = sargable_for(pred, &keys);
		if n > 0 {
			let sarg_keys = keys[..n].to_vec();
			sargables.push((index, IndexEntry { keys, sarg_keys, cond, spans: vec![] }));
		}
	}
	Ok(sargables)
}

/// Drop candidates another candidate makes redundant, then build the
/// spans of the survivors. A sargable index that fails to sarg is a
/// planner invariant violation.
fn minimal_indexes(sargables: Candidates, pred: &Arc<Expr>) -> Result<Candidates, Error> {
	let mut removed = vec![false; sargables.len()];
	for s in 0..sargables.len() {
		if removed[s] {
			continue;
		}
		for t in 0..sargables.len() {
			if t == s || removed[t] {
				continue;
			}
			if narrower_or_equivalent(&sargables[s].1, &sargables[t].1) {
				removed[t] = true;
			}
		}
	}

	let mut minimals = Vec::with_capacity(sargables.len());
	for (dropped, (index, mut entry)) in removed.into_iter().zip(sargables) {
		if dropped {
			continue;
		}
		let spans = sarg_for_keys(pred, &entry.sarg_keys, entry.keys.len())?;
		if spans.is_empty() {
			error!(pred = %pred, index = index.name(), "sargable index not sarged");
			return Err(Error::new(ErrorKind::PlannerInternal {
				predicate: pred.to_string(),
				sarg_keys: exprs_text(&entry.sarg_keys),
			}));
		}
		entry.spans = spans;
		minimals.push((index, entry));
	}
	Ok(minimals)
}

/// Whether `se` makes `te` redundant: it sarges at least as many keys,
/// its partial condition is at least as strict, and every sarg key of
/// `te` is implied by one of `se`'s. Ties break towards fewer total
/// keys.
fn narrower_or_equivalent(se: &IndexEntry, te: &IndexEntry) -> bool {
	if te.sarg_keys.len() > se.sarg_keys.len() {
		return false;
	}

	if let Some(tc) = &te.cond {
		match &se.cond {
			None => return false,
			Some(sc) => {
				if !subset_of(sc, tc) {
					return false;
				}
			}
		}
	}

	for tk in &te.sarg_keys {
		if !se.sarg_keys.iter().any(|sk| subset_of(sk, tk)) {
			return false;
		}
	}

	se.sarg_keys.len() > te.sarg_keys.len() || se.keys.len() <= te.keys.len()
}

fn exprs_text(exprs: &Exprs) -> String {
	let mut out = String::from("[");
	for (i, e) in exprs.iter().enumerate() {
		if i > 0 {
			out.push_str(", ");
		}
		out.push_str(&e.to_string());
	}
	out.push(']');
	out
}
