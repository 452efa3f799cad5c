//! Schema collaborator used by the normalizer
//!
//! The normalizer only reads through [`SchemaLookup`]; [`Schema`] is the
//! in-memory implementation shipped with the crate.

pub mod hints;
pub mod naming;
pub mod store;
pub mod table;

pub use hints::{Hint, NamePattern};
pub use store::{PreferredType, Schema};
pub use table::{Column, DataType, Table};

use crate::error::SchemaError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Operations the normalizer needs from a schema.
///
/// Read methods take `&self` and may be called from many threads at once
/// when the implementation is `Sync`. `merge_hints` is the only mutation and
/// must finish before normalization starts.
pub trait SchemaLookup {
    /// Schema name, used as the root table when a document carries no routing hint
    fn name(&self) -> &str;

    fn normalize_table_name(&self, name: &str) -> String;

    fn normalize_column_name(&self, name: &str) -> String;

    /// Type declared for `column` on `table`, if the column is declared
    fn column_type(&self, table: &str, column: &str) -> Option<DataType>;

    /// Schema-wide type inferred from the column name alone
    fn preferred_type(&self, column: &str) -> Option<DataType>;

    /// Names of the columns of `table` carrying `hint`, in declaration order
    fn hint_columns(&self, table: &str, hint: Hint) -> Vec<String>;

    /// Subset of `row` whose columns carry `hint` on `table`, in declaration order
    fn filter_row_with_hint(
        &self,
        table: &str,
        hint: Hint,
        row: &Map<String, Value>,
    ) -> Map<String, Value>;

    fn has_hint_pattern(&self, hint: Hint, pattern: &str) -> bool;

    /// Union `hints` into the schema. Merging the same hints twice is a no-op.
    fn merge_hints(&mut self, hints: &BTreeMap<Hint, Vec<String>>) -> Result<(), SchemaError>;

    fn data_type(&self, table: &str, column: &str) -> Option<DataType> {
        self.column_type(table, column)
            .or_else(|| self.preferred_type(column))
    }

    /// Whether `column` on `table` must be kept as a single opaque value
    fn is_complex(&self, table: &str, column: &str) -> bool {
        self.data_type(table, column) == Some(DataType::Complex)
    }
}
