//! Fluent builder for document-database aggregation pipelines.
//!
//! Builder calls record filters, sorting, projection, grouping, pagination
//! and joins on an [`Aggregation`] session. [`Aggregation::pipeline`] turns
//! them into an ordered list of stages; [`Aggregation::stage`] returns the
//! single most relevant one. Nothing is executed: the output is the document
//! a caller passes to the database's aggregate entry point.

pub mod aggregation;
pub mod config;
pub mod error;
pub mod group;
pub mod lookup;
pub mod pipeline;
pub mod projection;
pub mod query;

pub use aggregation::{Aggregation, aggregation};
pub use config::BuilderConfig;
pub use error::{Error, Result};
pub use group::{GroupOp, GroupSpec, GroupValue};
pub use lookup::{JoinSpec, Lookup, LookupMode};
pub use pipeline::{Pipeline, Stage};
pub use projection::{Projection, ProjectionField};
pub use query::{Condition, Operator, Predicate, SortOrder, SortSpec};
