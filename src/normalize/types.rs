use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Joins nested field names and child table names
pub const PATH_SEPARATOR: &str = "__";

/// Unique id of the current row
pub const RECORD_ID: &str = "_record_hash";
/// Record id of the top-level row of the document
pub const ROOT_ID: &str = "_root_hash";
/// Record id of the parent row
pub const PARENT_ID: &str = "_parent_hash";
/// Position of the row in the list that produced it
pub const POSITION: &str = "_pos";
/// Identifies records loaded together
pub const LOAD_ID: &str = "_load_id";
/// Holds the element of a list of scalars
pub const VALUE: &str = "value";
/// Transport metadata, stripped from every document
pub const META_FIELD: &str = "__dlt_meta";
/// Key inside [`META_FIELD`] naming the target table
pub const META_TABLE_NAME: &str = "table_name";

/// Identifier of one emitted row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<RecordId> for Value {
    fn from(id: RecordId) -> Self {
        Value::String(id.0)
    }
}

/// Where a row sits in the document tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowClass {
    /// The top-level row of a document
    Root,
    /// A row produced from one element of a list field
    Child {
        parent_table: String,
        parent_id: RecordId,
        position: usize,
    },
}

/// One flattened row bound for `table`
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub table: String,
    pub class: RowClass,
    /// String form of the row's record id, also used for linkage
    pub record_id: RecordId,
    pub data: Map<String, Value>,
}

impl NormalizedRow {
    pub fn parent_table(&self) -> Option<&str> {
        match &self.class {
            RowClass::Root => None,
            RowClass::Child { parent_table, .. } => Some(parent_table),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self.class, RowClass::Root)
    }

    pub fn record_id(&self) -> &str {
        self.record_id.as_str()
    }

    pub fn root_id(&self) -> Option<&str> {
        self.data.get(ROOT_ID).and_then(Value::as_str)
    }

    pub fn parent_id(&self) -> Option<&str> {
        match &self.class {
            RowClass::Root => None,
            RowClass::Child { parent_id, .. } => Some(parent_id.as_str()),
        }
    }

    pub fn position(&self) -> Option<usize> {
        match &self.class {
            RowClass::Root => None,
            RowClass::Child { position, .. } => Some(*position),
        }
    }
}

/// Extra columns copied from an ancestor row into all of its descendants.
///
/// Each mapping goes from a column of the ancestor's flattened row to the
/// column name used in the descendants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Applied to the root row of every document
    #[serde(default)]
    pub root: BTreeMap<String, String>,
    /// Applied to rows of the named table
    #[serde(default)]
    pub tables: BTreeMap<String, BTreeMap<String, String>>,
}

impl PropagationConfig {
    /// Mappings that apply to a row of `table`
    pub fn for_table<'a>(
        &'a self,
        table: &str,
        is_root: bool,
    ) -> impl Iterator<Item = (&'a String, &'a String)> + 'a {
        let root = if is_root { Some(&self.root) } else { None };
        root.into_iter()
            .chain(self.tables.get(table))
            .flat_map(|m| m.iter())
    }
}

/// Configuration for the relational normalizer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizerConfig {
    #[serde(default)]
    pub propagation: PropagationConfig,
}

/// Values copied into every descendant row of one document.
///
/// Created once per document with an unresolved root id; the root id is set
/// when the root row's identity is known.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Propagation {
    root_id: Option<RecordId>,
    fields: Map<String, Value>,
}

impl Propagation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn root_id(&self) -> Option<&RecordId> {
        self.root_id.as_ref()
    }

    /// Set the root id unless it is already resolved
    pub fn resolve_root(&mut self, id: &RecordId) {
        if self.root_id.is_none() {
            self.root_id = Some(id.clone());
        }
    }

    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.fields.insert(column.into(), value);
    }

    /// Copy the propagated values into `row`
    pub fn apply(&self, row: &mut Map<String, Value>) {
        if let Some(root_id) = &self.root_id {
            row.insert(ROOT_ID.to_string(), Value::String(root_id.0.clone()));
        }
        for (column, value) in &self.fields {
            row.insert(column.clone(), value.clone());
        }
    }
}
