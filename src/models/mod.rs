//! Schema models
//!
//! A [`Table`] is the ordered column description that governs a resource's typed
//! output shape.

pub mod column;
pub mod table;

pub use column::{Column, DataType, EMPTY_SOURCE_HEADER};
pub use table::Table;
