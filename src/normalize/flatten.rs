use crate::normalize::types::PATH_SEPARATOR;
use crate::schema::SchemaLookup;
use serde_json::{Map, Value};

/// Collapse nested objects of `row` into `__`-joined column names.
///
/// Objects whose path is typed `complex` on `table` are kept whole. Lists are
/// kept whole as well; splitting them into child tables happens later.
pub fn flatten_row<S: SchemaLookup + ?Sized>(
    schema: &S,
    table: &str,
    row: Map<String, Value>,
) -> Map<String, Value> {
    let mut out = Map::new();
    flatten_into(schema, table, row, None, &mut out);
    out
}

fn flatten_into<S: SchemaLookup + ?Sized>(
    schema: &S,
    table: &str,
    row: Map<String, Value>,
    parent_path: Option<&str>,
    out: &mut Map<String, Value>,
) {
    for (key, value) in row {
        let column = schema.normalize_column_name(&key);
        let path = match parent_path {
            Some(parent) => format!("{}{}{}", parent, PATH_SEPARATOR, column),
            None => column,
        };

        match value {
            Value::Object(nested) if !schema.is_complex(table, &path) => {
                flatten_into(schema, table, nested, Some(&path), out);
            }
            other => {
                out.insert(path, other);
            }
        }
    }
}
