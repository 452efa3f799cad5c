//! In-memory schema: declared tables, preferred types and hint patterns

use crate::error::SchemaError;
use crate::schema::hints::{Hint, NamePattern};
use crate::schema::naming::snake_case;
use crate::schema::table::{Column, DataType, Table};
use crate::schema::SchemaLookup;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::io::Read;

/// Type applied to any column whose name matches `pattern`, unless the
/// column is declared on its table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreferredType {
    pub pattern: NamePattern,
    pub data_type: DataType,
}

/// Schema loaded from JSON or assembled in code.
///
/// ```rust
/// use relnorm::schema::{Column, DataType, Hint, Schema, SchemaLookup};
///
/// let schema = Schema::new("event")
///     .with_table("event", vec![
///         Column::new("id", DataType::Bigint).with_hint(Hint::PrimaryKey),
///     ]);
///
/// assert_eq!(schema.data_type("event", "id"), Some(DataType::Bigint));
/// assert_eq!(schema.normalize_column_name("userName"), "user_name");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    name: String,
    #[serde(default)]
    tables: BTreeMap<String, Table>,
    #[serde(default)]
    preferred_types: Vec<PreferredType>,
    #[serde(default)]
    hints: BTreeMap<Hint, Vec<NamePattern>>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            tables: BTreeMap::new(),
            preferred_types: Vec::new(),
            hints: BTreeMap::new(),
        }
    }

    /// Parse a schema document. Patterns are compiled here, so a bad regex
    /// fails the load rather than a later lookup.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SchemaError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn with_table(mut self, name: impl Into<String>, columns: Vec<Column>) -> Self {
        self.tables.insert(name.into(), Table::new(columns));
        self
    }

    pub fn with_preferred_type(
        mut self,
        pattern: &str,
        data_type: DataType,
    ) -> Result<Self, SchemaError> {
        self.preferred_types.push(PreferredType {
            pattern: NamePattern::new(pattern)?,
            data_type,
        });
        Ok(self)
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Patterns registered for a hint, in registration order
    pub fn hint_patterns(&self, hint: Hint) -> &[NamePattern] {
        self.hints.get(&hint).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl SchemaLookup for Schema {
    fn name(&self) -> &str {
        &self.name
    }

    fn normalize_table_name(&self, name: &str) -> String {
        snake_case(name)
    }

    fn normalize_column_name(&self, name: &str) -> String {
        snake_case(name)
    }

    fn column_type(&self, table: &str, column: &str) -> Option<DataType> {
        self.table(table)
            .and_then(|t| t.column(column))
            .map(|c| c.data_type)
    }

    fn preferred_type(&self, column: &str) -> Option<DataType> {
        self.preferred_types
            .iter()
            .find(|p| p.pattern.is_match(column))
            .map(|p| p.data_type)
    }

    fn hint_columns(&self, table: &str, hint: Hint) -> Vec<String> {
        let Some(table) = self.table(table) else {
            return Vec::new();
        };
        table
            .columns
            .iter()
            .filter(|c| c.has_hint(hint))
            .map(|c| c.name.clone())
            .collect()
    }

    fn filter_row_with_hint(
        &self,
        table: &str,
        hint: Hint,
        row: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut filtered = Map::new();
        for name in self.hint_columns(table, hint) {
            if let Some(value) = row.get(&name) {
                filtered.insert(name, value.clone());
            }
        }
        filtered
    }

    fn has_hint_pattern(&self, hint: Hint, pattern: &str) -> bool {
        self.hint_patterns(hint).iter().any(|p| p.as_str() == pattern)
    }

    fn merge_hints(&mut self, hints: &BTreeMap<Hint, Vec<String>>) -> Result<(), SchemaError> {
        for (hint, patterns) in hints {
            // compile everything first so a bad pattern leaves the schema untouched
            let compiled = patterns
                .iter()
                .map(|p| NamePattern::new(p.as_str()))
                .collect::<Result<Vec<_>, _>>()?;

            let existing = self.hints.entry(*hint).or_default();
            for pattern in compiled {
                if !existing.contains(&pattern) {
                    existing.push(pattern);
                }
            }
        }
        Ok(())
    }
}
