//! Per-backend catalog engine
//!
//! The generic machinery every backend shares: the upstream adapter
//! contract, the durable name catalog, the filter/sort/inline engine, the
//! response assembly engine, and an `axum::Router` factory exposing one
//! backend's xRegistry surface over HTTP.

pub mod adapter;
pub mod engine;
pub mod filter;
pub mod name_catalog;
pub mod service;

pub use adapter::{NameListing, NameNormalization, ResourceMetadata, UpstreamAdapter, VersionMetadata};
pub use engine::{BackendDescriptor, CatalogEngine, EngineConfig};
pub use filter::{FilterClause, FilterEngine, FilterOp, InlineSpec, ListFlags, SortSpec};
pub use name_catalog::NameCatalog;
pub use service::catalog_router;
