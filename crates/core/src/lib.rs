//! The core of Quiver, a SQL-for-JSON query engine.
//!
//! This crate holds the index-selection and SARG planner: predicate
//! normalisation into DNF, sargability analysis against composite index
//! keys, span construction, and the selection policy that assembles the
//! final scan plan. Parsing and storage are external collaborators,
//! reached through the expression AST in [`expr`] and the capability
//! traits in [`catalog`].
//!
//! Planning is purely functional: a single invocation runs on one task,
//! holds no shared mutable state, and produces an immutable
//! [`idx::planner::plan::ScanPlan`].

pub mod catalog;
pub mod err;
pub mod expr;
pub mod idx;
pub mod val;

pub use crate::err::{Error, ErrorKind, Severity};
pub use crate::expr::{Dnf, Expr, Idiom, subset_of};
pub use crate::idx::planner::{Builder, IndexRef, KeyspaceTerm};
pub use crate::val::Value;
