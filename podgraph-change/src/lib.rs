//! Change request pipeline for podgraph
//!
//! Turns a [`ChangeRequest`](podgraph_core::ChangeRequest) into typed record
//! mutations and commits them to storage backends, producing exactly one
//! [`ChangeReport`](podgraph_core::ChangeReport) per request.
//!
//! # Overview
//!
//! 1. The [`ChangePipeline`] opens a [`ChangeRequestTxBuffer`] for the request
//! 2. Stages run in configured order against that buffer:
//!    - [`AssertionEvaluator`]: precondition queries, checked concurrently
//!    - [`ReferenceMaterializer`]: external references, literal entries and
//!      templates become records
//!    - [`SchemaConformanceGate`]: slice-bound requests are validated
//!    - each [`StorageBackend`]: claims, persists and removes its records
//! 3. The buffer statistics become the report; the report is written to the
//!    [`ChangeLog`] and published through the [`ChangeOutbox`]
//!
//! # Example
//!
//! ```ignore
//! use podgraph_change::{ChangePipeline, FixtureQueryEngine, PipelineConfig};
//!
//! let pipeline = ChangePipeline::builder(PipelineConfig::default())
//!     .query_engine(Arc::new(FixtureQueryEngine::new()))
//!     .build()?;
//! let report = pipeline.process(request).await?;
//! ```

pub mod assertions;
pub mod audit;
pub mod buffer;
pub mod config;
pub mod conformance;
pub mod error;
pub mod jsonld;
pub mod materialize;
pub mod pipeline;
pub mod processor;
pub mod query;
pub mod reference;
pub mod storage;
pub mod template;

pub use assertions::AssertionEvaluator;
pub use audit::{BroadcastOutbox, ChangeEvent, ChangeLog, ChangeOutbox, MemoryChangeLog};
pub use buffer::{ChangeRequestTxBuffer, DiscardedRecords, RecordFilter};
pub use config::{BackendConfig, BackendKind, PipelineConfig, StageId};
pub use conformance::{
    ConformanceCapability, MemorySliceSchemaSource, SchemaConformanceGate, ShapeValidator,
    SliceSchema, SliceSchemaSource, ValidationReport,
};
pub use error::{ChangeError, Result};
pub use jsonld::{JsonLdContext, StatementBuilder};
pub use materialize::ReferenceMaterializer;
pub use pipeline::{ChangePipeline, PipelineBuilder, PipelineStage};
pub use processor::Processor;
pub use query::{FixtureQueryEngine, QueryEngine, QueryRequest, QueryResponse};
pub use reference::{FileReferenceLoader, MemoryReferenceLoader, ReferenceLoader, ReferenceLoaders};
pub use storage::{ClaimSelector, MemoryBackend, RecordsQuery, StorageBackend};
pub use template::TemplateEngine;
