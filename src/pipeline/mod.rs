//! Type-casting row pipeline
//!
//! Converts raw source rows into rows shaped and typed by a resource schema:
//! each field is coerced to its column's declared type, then passed through the
//! column's compiled transform.

mod cast;
mod error;
mod processor;
mod transform;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

pub use cast::{cast_value, display_value};
pub use error::{CastError, TransformError};
pub use processor::RowProcessor;
pub use transform::{
    CompiledTransform, RowContext, TransformFn, TransformLibrary, TransformPlan,
};

/// A row of cell values
pub type Row = Vec<Value>;

/// Casting and transform failures of one pass, keyed by column name
pub type ErrorMap = BTreeMap<String, Vec<String>>;

/// Error map shared between a resource and the streams it starts
pub type SharedErrors = Arc<Mutex<ErrorMap>>;
