//! User-visible errors and warnings.
//!
//! Every error carries a stable numeric code, a translation key and a
//! severity level. The numeric codes are a cross-process contract and must
//! never be re-used for a different condition.

use std::error::Error as StdError;
use std::fmt;
use std::panic::Location;

use serde_json::{Map, Value as Json, json};
use thiserror::Error;

use crate::catalog::IndexState;

/// How serious an error is. Only [`Severity::Exception`] aborts a query.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Severity {
	Exception,
	Warning,
	Notice,
	Info,
	Log,
	Debug,
}

/// A structured engine error: a kind plus the call site that raised it.
///
/// Constructed through [`Error::new`] or the `From<ErrorKind>` conversion,
/// both of which capture the caller location for the error envelope.
#[derive(Error, Debug)]
#[error("{kind}")]
pub struct Error {
	kind: ErrorKind,
	caller: &'static Location<'static>,
	cause: Option<Box<dyn StdError + Send + Sync>>,
}

#[derive(Error, Debug)]
pub enum ErrorKind {
	/// A feature reached through a valid query that this build does not provide.
	#[error("Not yet implemented: {feature}")]
	NotImplemented { feature: String },

	/// The query text could not be parsed.
	#[error("Parse error: {message}")]
	Parse { message: String },

	/// A malformed or unsupported expression was encountered during
	/// predicate normalisation.
	#[error("Unsupported predicate shape: {message}")]
	PredicateShape { message: String },

	/// An underlying catalog call failed.
	#[error("Index catalog failure: {message}")]
	IndexCatalog { message: String },

	/// No candidate secondary index and no online primary index.
	#[error("No primary index on keyspace {keyspace}. Use CREATE PRIMARY INDEX to create one.")]
	NoPrimaryIndex { keyspace: String },

	/// A primary index exists but is not in the ONLINE state.
	#[error("Primary index {name} not online.")]
	PrimaryNotOnline { name: String },

	/// A sargable index failed to produce spans. This is a planner
	/// invariant violation, never a user error.
	#[error("Sargable index not sarged; pred={predicate}, sarg_keys={sarg_keys}")]
	PlannerInternal { predicate: String, sarg_keys: String },

	/// The named keyspace does not exist.
	#[error("Keyspace {keyspace} does not exist")]
	KeyspaceNotFound { keyspace: String },

	/// The named namespace does not exist.
	#[error("Namespace {namespace} does not exist")]
	NamespaceNotFound { namespace: String },

	/// The named index does not exist on the keyspace.
	#[error("Index {name} does not exist")]
	IndexNotFound { name: String },

	/// An index scan exceeded its deadline.
	#[error("Index scan timed out")]
	ScanTimeout,

	/// An index was skipped because it is not available for scanning.
	#[error("Index {name} is in state {state} and was skipped")]
	IndexNotOnline { name: String, state: IndexState },

	/// A sized index connection was requested with a non-positive size.
	#[error("Invalid index scan size {size}")]
	IndexScanSize { size: i64 },

	/// Anything without a more precise classification.
	#[error("Internal error: {message}")]
	Internal { message: String },
}

impl Error {
	#[track_caller]
	pub fn new(kind: ErrorKind) -> Self {
		Self { kind, caller: Location::caller(), cause: None }
	}

	/// Attach an underlying cause.
	pub fn with_cause(mut self, cause: impl StdError + Send + Sync + 'static) -> Self {
		self.cause = Some(Box::new(cause));
		self
	}

	pub fn kind(&self) -> &ErrorKind {
		&self.kind
	}

	pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync)> {
		self.cause.as_deref()
	}

	/// The stable numeric code of this error.
	pub fn code(&self) -> i32 {
		match self.kind {
			ErrorKind::NotImplemented { .. } => 1001,
			ErrorKind::IndexCatalog { .. } => 4000,
			ErrorKind::NoPrimaryIndex { .. } => 4010,
			ErrorKind::PrimaryNotOnline { .. } => 4011,
			ErrorKind::PlannerInternal { .. } => 4020,
			ErrorKind::KeyspaceNotFound { .. } => 4040,
			ErrorKind::NamespaceNotFound { .. } => 4041,
			ErrorKind::IndexNotFound { .. } => 4042,
			ErrorKind::ScanTimeout => 4080,
			ErrorKind::IndexNotOnline { .. } => 4090,
			ErrorKind::IndexScanSize { .. } => 4095,
			ErrorKind::Parse { .. } => 4100,
			ErrorKind::PredicateShape { .. } => 4200,
			ErrorKind::Internal { .. } => 5000,
		}
	}

	pub fn translation_key(&self) -> &'static str {
		match self.kind {
			ErrorKind::NotImplemented { .. } => "not_implemented",
			ErrorKind::IndexCatalog { .. } => "index_catalog",
			ErrorKind::NoPrimaryIndex { .. } => "no_primary_index",
			ErrorKind::PrimaryNotOnline { .. } => "primary_index_not_online",
			ErrorKind::PlannerInternal { .. } => "planner_internal",
			ErrorKind::KeyspaceNotFound { .. } => "keyspace_not_found",
			ErrorKind::NamespaceNotFound { .. } => "namespace_not_found",
			ErrorKind::IndexNotFound { .. } => "index_not_found",
			ErrorKind::ScanTimeout => "scan_timeout",
			ErrorKind::IndexNotOnline { .. } => "index_not_online",
			ErrorKind::IndexScanSize { .. } => "index_scan_size",
			ErrorKind::Parse { .. } => "parse_error",
			ErrorKind::PredicateShape { .. } => "semantic_error",
			ErrorKind::Internal { .. } => "internal_error",
		}
	}

	pub fn severity(&self) -> Severity {
		match self.kind {
			ErrorKind::IndexNotOnline { .. } => Severity::Warning,
			_ => Severity::Exception,
		}
	}

	pub fn is_fatal(&self) -> bool {
		self.severity() == Severity::Exception
	}

	/// The JSON envelope shipped to clients and logs.
	pub fn to_json(&self) -> Json {
		let mut m = Map::new();
		m.insert("code".to_owned(), json!(self.code()));
		m.insert("key".to_owned(), json!(self.translation_key()));
		m.insert("message".to_owned(), json!(self.kind.to_string()));
		if let Some(cause) = &self.cause {
			m.insert("cause".to_owned(), json!(cause.to_string()));
		}
		m.insert("caller".to_owned(), json!(format!("{}:{}", self.caller.file(), self.caller.line())));
		Json::Object(m)
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Self {
		Self::new(kind)
	}
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Severity::Exception => "exception",
			Severity::Warning => "warning",
			Severity::Notice => "notice",
			Severity::Info => "info",
			Severity::Log => "log",
			Severity::Debug => "debug",
		};
		f.write_str(s)
	}
}
