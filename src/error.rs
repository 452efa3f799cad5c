use thiserror::Error;

/// Errors raised while building or extending a [`Schema`](crate::schema::Schema).
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to parse schema: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised while decomposing a document into table rows.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// A list element was itself a list. There is no single positional axis
    /// for such an element, so the whole document is rejected.
    #[error("list nested directly in a list at `{table}` position {position}")]
    NestedList { table: String, position: usize },

    #[error("top-level document must be an object, got {found}")]
    NotAnObject { found: &'static str },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

pub type Result<T, E = NormalizeError> = std::result::Result<T, E>;
