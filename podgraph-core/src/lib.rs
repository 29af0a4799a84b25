//! # Podgraph Core
//!
//! Value types shared by the change request pipeline:
//!
//! - [`RdfStatement`] / [`RdfObject`]: expanded RDF triples in a named graph
//! - [`ChangeRecord`]: one insert or delete of a statement, owned by a request
//! - [`ChangeRequest`] / [`Assertion`] / [`ChangeEntry`]: the caller's intent
//! - [`ChangeReport`]: audit outcome with an append-only status history
//! - [`cursor`]: the canonical stateless pagination cursor

pub mod cursor;
pub mod error;
pub mod iri;
pub mod record;
pub mod report;
pub mod request;
pub mod statement;
pub mod vocab;

pub use cursor::{decode_cursor, encode_cursor, Page};
pub use error::{CoreError, Result};
pub use record::{ChangeRecord, ChangeType};
pub use report::{ChangeReport, ChangeReportStatusEntry, ChangeStatistics, ChangeStatusCode};
pub use request::{
    Assertion, AssertionKind, ChangeEntry, ChangeRequest, ExternalReference, WILDCARD_ENTRY,
};
pub use statement::{RdfObject, RdfStatement};
