//! Relational normalization - decompose nested documents into table rows
//!
//! A document becomes one root row plus one child table per list field,
//! recursively. Nested objects are flattened into `__`-joined columns, and
//! every row gets a record id, the root id of its document and, for child
//! rows, the parent id and list position.

pub mod flatten;
pub mod hashing;
pub mod relational;
pub mod types;
pub mod writer;

pub use flatten::flatten_row;
pub use relational::{extend_schema, new_load_id, normalize, RelationalNormalizer};
pub use types::{
    NormalizedRow, NormalizerConfig, Propagation, PropagationConfig, RecordId, RowClass,
    PATH_SEPARATOR,
};
pub use writer::{RowSink, StreamWriter, TableWriter};
