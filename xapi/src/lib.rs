//! xAPI statement validation, storage and querying.
//!
//! The validator is schema-as-data: [`definitions`] lists the fields of
//! every xAPI object as [`rules::Rule`]s, and [`schema::Schema::clean`]
//! interprets them. Advisory rules log a warning and carry on; everything
//! else rejects the statement with a [`ValidationError`] whose message
//! names the path to the failing field.
//!
//! ```
//! use serde_json::json;
//! use xapi::SchemaKind;
//!
//! let err = SchemaKind::Agent.clean(json!({})).unwrap_err();
//! assert_eq!(err.message(), "mbox is required");
//! ```

pub mod definitions;
pub mod documents;
pub mod error;
pub mod formats;
pub mod interaction;
pub mod progress;
pub mod rules;
pub mod schema;
pub mod store;

pub use documents::{Document, DocumentScope, DocumentStore};
pub use error::ValidationError;
pub use progress::calculate_progress;
pub use rules::{Rule, Severity, Validator};
pub use schema::{Cleaned, Field, Schema, SchemaKind, XAPI_VERSION};
pub use store::{StatementFilter, StatementStore, VOIDED_VERB};
