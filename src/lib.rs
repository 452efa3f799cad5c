//! # relnorm - Relational Normalization of Nested JSON
//!
//! Decomposes nested JSON documents into flat rows spread across a root table
//! and derived child tables, ready for loading into a tabular destination.
//!
//! ## Modules
//!
//! - **normalize**: flattening, row identity and the recursive decomposition
//! - **schema**: the schema the normalizer consults for names, types and hints
//!
//! ## Quick Start
//!
//! ```rust
//! use relnorm::normalize::{extend_schema, normalize};
//! use relnorm::schema::{Column, DataType, Hint, Schema};
//! use serde_json::json;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut schema = Schema::new("users").with_table(
//!     "users",
//!     vec![Column::new("id", DataType::Bigint).with_hint(Hint::PrimaryKey)],
//! );
//! extend_schema(&mut schema)?;
//!
//! let document = json!({
//!     "id": 1,
//!     "name": "Alice",
//!     "address": {"city": "Berlin"},
//!     "posts": [
//!         {"title": "First Post"},
//!         {"title": "Second Post"}
//!     ]
//! });
//!
//! let rows = normalize(&schema, document.as_object().cloned().unwrap_or_default(), "1700000000.000000")?;
//!
//! // rows[0] = users (id, name, address__city, identity columns)
//! // rows[1-2] = users__posts with _parent_hash and _pos
//! assert_eq!(rows.len(), 3);
//! assert_eq!(rows[1].table, "users__posts");
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use serde_json::Value;
use std::io::BufRead;
use tracing::info;

pub mod error;
pub mod normalize;
pub mod schema;

// Re-export commonly used types for convenience
pub use error::{NormalizeError, SchemaError};
pub use normalize::{
    extend_schema, NormalizedRow, NormalizerConfig, RecordId, RelationalNormalizer, RowClass,
    RowSink, StreamWriter, TableWriter,
};
pub use schema::{Schema, SchemaLookup};

/// Normalize a newline-delimited JSON stream into `writer`.
///
/// Blank lines are skipped. Returns the number of documents processed.
pub fn normalize_json<R, W, S>(
    reader: R,
    writer: &mut W,
    normalizer: &RelationalNormalizer,
    schema: &S,
    load_id: &str,
) -> Result<usize>
where
    R: BufRead,
    W: RowSink + ?Sized,
    S: SchemaLookup + ?Sized,
{
    let mut documents = 0;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.context("Failed to read line")?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .with_context(|| format!("Failed to parse JSON on line {}", line_no + 1))?;

        let rows = normalizer
            .normalize_value(schema, value, load_id)
            .with_context(|| format!("Failed to normalize document on line {}", line_no + 1))?;
        writer.write_rows(rows)?;
        documents += 1;
    }

    info!(documents, load_id, "normalized stream");
    Ok(documents)
}
