//! The datastore capability consumed by the planner.
//!
//! The planner never talks to storage directly: it enumerates indexes
//! through these traits and hands the resulting plan back to the caller.
//! Implementations may block on I/O inside any method; the planner is
//! invoked from a task that accepts that.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::err::{Error, ErrorKind};
use crate::expr::Exprs;
use crate::idx::planner::span::Span;
use crate::val::Value;

pub mod mock;

/// The family of indexer an index belongs to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
	/// Whatever the backend considers its default indexer.
	#[default]
	Default,
	Gsi,
	View,
}

impl fmt::Display for IndexType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			IndexType::Default => "default",
			IndexType::Gsi => "gsi",
			IndexType::View => "view",
		};
		f.write_str(s)
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
	/// Created but the build was deferred.
	Deferred,
	Building,
	Pending,
	/// Available for scanning.
	Online,
	/// Requires manual intervention.
	Offline,
}

impl fmt::Display for IndexState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			IndexState::Deferred => "deferred",
			IndexState::Building => "building",
			IndexState::Pending => "pending",
			IndexState::Online => "online",
			IndexState::Offline => "offline",
		};
		f.write_str(s)
	}
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ScanConsistency {
	#[default]
	Unbounded,
	ScanPlus,
	AtPlus,
}

/// A consistency vector for [`ScanConsistency::AtPlus`] scans.
pub type Timestamp = Vec<u64>;

/// The root of the catalog.
pub trait Datastore: Send + Sync {
	fn namespace_names(&self) -> Result<Vec<String>, Error>;
	fn namespace(&self, name: &str) -> Result<Arc<dyn Namespace>, Error>;
}

pub trait Namespace: Send + Sync {
	fn name(&self) -> &str;
	fn keyspace_names(&self) -> Result<Vec<String>, Error>;
	fn keyspace(&self, name: &str) -> Result<Arc<dyn Keyspace>, Error>;
}

pub trait Keyspace: Send + Sync {
	fn namespace_id(&self) -> &str;
	fn name(&self) -> &str;
	fn indexers(&self) -> Result<Vec<Arc<dyn Indexer>>, Error>;
	fn indexer(&self, using: IndexType) -> Result<Arc<dyn Indexer>, Error>;
}

/// One index provider on a keyspace. A keyspace may carry several, e.g.
/// a view indexer alongside a GSI one.
pub trait Indexer: Send + Sync {
	fn keyspace_id(&self) -> &str;
	/// Unique within a keyspace.
	fn name(&self) -> IndexType;
	fn index_ids(&self) -> Result<Vec<String>, Error>;
	fn index_names(&self) -> Result<Vec<String>, Error>;
	fn index_by_id(&self, id: &str) -> Result<Arc<dyn Index>, Error>;
	fn index_by_name(&self, name: &str) -> Result<Arc<dyn Index>, Error>;
	fn primary_indexes(&self) -> Result<Vec<Arc<dyn PrimaryIndex>>, Error>;
	fn indexes(&self) -> Result<Vec<Arc<dyn Index>>, Error>;
	/// Refresh the list of indexes from metadata.
	fn refresh(&self) -> Result<(), Error>;
}

/// A secondary (or primary) index over a keyspace.
pub trait Index: Send + Sync {
	fn keyspace_id(&self) -> &str;
	fn id(&self) -> &str;
	fn name(&self) -> &str;
	fn index_type(&self) -> IndexType;
	/// Equality keys.
	fn seek_key(&self) -> Exprs;
	/// Range keys, the composite key sequence spans are built over.
	fn range_key(&self) -> Exprs;
	/// The partial-index WHERE clause, if any.
	fn condition(&self) -> Option<Arc<crate::expr::Expr>>;
	fn is_primary(&self) -> bool {
		false
	}
	/// View this handle as a primary index, when it is one.
	fn as_primary(self: Arc<Self>) -> Option<Arc<dyn PrimaryIndex>> {
		None
	}
	fn state(&self) -> Result<(IndexState, String), Error>;
	/// Range statistics. Heuristic and possibly stale; the planner
	/// exposes but does not consult them.
	fn statistics(&self, request_id: &str, span: &Span) -> Result<Arc<dyn Statistics>, Error>;
	/// Scan one span. `distinct` and `limit` are hints.
	#[allow(clippy::too_many_arguments)]
	fn scan(
		&self,
		request_id: &str,
		span: &Span,
		distinct: bool,
		limit: i64,
		cons: ScanConsistency,
		vector: Option<&Timestamp>,
		conn: &IndexConnection,
	);
}

/// A primary key index. Scanning its entries enumerates the keyspace.
pub trait PrimaryIndex: Index {
	fn scan_entries(
		&self,
		request_id: &str,
		limit: i64,
		cons: ScanConsistency,
		vector: Option<&Timestamp>,
		conn: &IndexConnection,
	);
}

pub trait Statistics: Send + Sync {
	fn count(&self) -> Result<i64, Error>;
	fn min(&self) -> Result<Vec<Value>, Error>;
	fn max(&self) -> Result<Vec<Value>, Error>;
	fn distinct_count(&self) -> Result<i64, Error>;
	fn bins(&self) -> Result<Vec<Arc<dyn Statistics>>, Error>;
}

/// One row produced by an index scan.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexEntry {
	pub entry_key: Vec<Value>,
	pub primary_key: String,
}

/// Sink for errors raised while a scan is running.
pub trait ConnectionContext: Send + Sync {
	fn fatal(&self, err: Error);
	fn error(&self, err: Error);
	fn warning(&self, err: Error);
}

const ENTRY_CAP: usize = 256;

static SCAN_CAP: AtomicI64 = AtomicI64::new(0);

/// Set the process-wide cap on index scan request sizes. Zero disables
/// the cap. Read-mostly; written at configuration time.
pub fn set_scan_cap(cap: i64) {
	SCAN_CAP.store(cap, Ordering::Relaxed);
}

pub fn scan_cap() -> i64 {
	SCAN_CAP.load(Ordering::Relaxed)
}

/// The conduit between an index scan and its consumer.
///
/// The index writes entries into the bounded entry channel and closes it
/// when the scan completes or aborts. The consumer reads entries; if it
/// stops consuming early it must send the stop signal before dropping
/// its receiver, and a writer observing the signal after any send is
/// expected to close the entry channel and terminate.
pub struct IndexConnection {
	entry_tx: async_channel::Sender<IndexEntry>,
	entry_rx: async_channel::Receiver<IndexEntry>,
	stop_tx: async_channel::Sender<bool>,
	stop_rx: async_channel::Receiver<bool>,
	context: Arc<dyn ConnectionContext>,
	primary: AtomicBool,
	timeout: AtomicBool,
}

impl IndexConnection {
	pub fn new(context: Arc<dyn ConnectionContext>) -> Self {
		Self::with_capacity(ENTRY_CAP, context)
	}

	/// A connection with an explicit entry-channel size, clamped by the
	/// global scan cap.
	pub fn sized(size: i64, context: Arc<dyn ConnectionContext>) -> Result<Self, Error> {
		if size <= 0 {
			return Err(Error::new(ErrorKind::IndexScanSize { size }));
		}
		let max = scan_cap();
		let size = if max > 0 && size > max { max } else { size };
		Ok(Self::with_capacity(size as usize, context))
	}

	fn with_capacity(cap: usize, context: Arc<dyn ConnectionContext>) -> Self {
		let (entry_tx, entry_rx) = async_channel::bounded(cap);
		let (stop_tx, stop_rx) = async_channel::bounded(1);
		Self {
			entry_tx,
			entry_rx,
			stop_tx,
			stop_rx,
			context,
			primary: AtomicBool::new(false),
			timeout: AtomicBool::new(false),
		}
	}

	/// The sender side, for the index. Dropping every clone closes the
	/// channel and ends the scan for the consumer.
	pub fn sender(&self) -> async_channel::Sender<IndexEntry> {
		self.entry_tx.clone()
	}

	/// The consumer side of the entry channel.
	pub fn entries(&self) -> &async_channel::Receiver<IndexEntry> {
		&self.entry_rx
	}

	/// Ask the index to stop scanning. Idempotent.
	pub fn send_stop(&self) {
		let _ = self.stop_tx.try_send(true);
	}

	/// Whether a stop has been requested. Consumes the signal.
	pub fn stop_requested(&self) -> bool {
		self.stop_rx.try_recv().is_ok()
	}

	/// Mark this connection as serving a primary scan, which converts a
	/// scan timeout into a flag instead of an error.
	pub fn set_primary(&self) {
		self.primary.store(true, Ordering::Relaxed);
	}

	pub fn timeout(&self) -> bool {
		self.timeout.load(Ordering::Relaxed)
	}

	pub fn fatal(&self, err: Error) {
		self.context.fatal(err);
	}

	pub fn error(&self, err: Error) {
		if self.primary.load(Ordering::Relaxed) && matches!(err.kind(), ErrorKind::ScanTimeout) {
			self.timeout.store(true, Ordering::Relaxed);
			return;
		}
		self.context.error(err);
	}

	pub fn warning(&self, err: Error) {
		self.context.warning(err);
	}
}
