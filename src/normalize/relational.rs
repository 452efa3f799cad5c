use crate::error::{NormalizeError, Result, SchemaError};
use crate::normalize::flatten::flatten_row;
use crate::normalize::hashing::{child_row_id, key_string, primary_key_id, random_id};
use crate::normalize::types::{
    NormalizedRow, NormalizerConfig, Propagation, RecordId, RowClass, LOAD_ID, META_FIELD,
    META_TABLE_NAME, PARENT_ID, PATH_SEPARATOR, POSITION, RECORD_ID, ROOT_ID, VALUE,
};
use crate::schema::{Hint, SchemaLookup};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// The list slot a child row was produced from
#[derive(Debug, Clone, Copy)]
struct ParentSlot<'a> {
    table: &'a str,
    id: &'a RecordId,
    position: usize,
}

/// Decomposes documents into a root row plus one child table per list field
#[derive(Debug, Clone, Default)]
pub struct RelationalNormalizer {
    config: NormalizerConfig,
}

impl RelationalNormalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        RelationalNormalizer { config }
    }

    /// Normalize one document into rows, parents always ahead of their children.
    ///
    /// `load_id` is stored on the root row. The target table comes from the
    /// document's `__dlt_meta.table_name`, or the schema name when absent.
    pub fn normalize<S: SchemaLookup + ?Sized>(
        &self,
        schema: &S,
        mut document: Map<String, Value>,
        load_id: &str,
    ) -> Result<Vec<NormalizedRow>> {
        document.insert(LOAD_ID.to_string(), Value::String(load_id.to_string()));
        let table = schema.normalize_table_name(routing_table(&document).unwrap_or(schema.name()));
        document.retain(|key, _| key != META_FIELD);

        debug!(table = %table, load_id, "normalizing document");

        let mut propagation = Propagation::new();
        let mut rows = Vec::new();
        self.normalize_row(schema, document, &mut propagation, &table, None, &mut rows)?;
        Ok(rows)
    }

    /// Like [`normalize`](Self::normalize), for documents not yet known to be objects
    pub fn normalize_value<S: SchemaLookup + ?Sized>(
        &self,
        schema: &S,
        document: Value,
        load_id: &str,
    ) -> Result<Vec<NormalizedRow>> {
        match document {
            Value::Object(map) => self.normalize(schema, map, load_id),
            other => Err(NormalizeError::NotAnObject {
                found: value_kind(&other),
            }),
        }
    }

    fn normalize_row<S: SchemaLookup + ?Sized>(
        &self,
        schema: &S,
        row: Map<String, Value>,
        propagation: &mut Propagation,
        table: &str,
        parent: Option<ParentSlot<'_>>,
        rows: &mut Vec<NormalizedRow>,
    ) -> Result<()> {
        let is_root = parent.is_none();
        let mut flattened = flatten_row(schema, table, row);
        let forwarded = forwarded_id(&flattened);
        let is_forwarded = forwarded.is_some();
        let record_id = match forwarded {
            Some(id) => id,
            None => resolve_record_id(schema, table, &flattened, parent.as_ref()),
        };

        let class = match parent {
            Some(slot) => {
                attach_child_meta(&mut flattened, slot, propagation);
                RowClass::Child {
                    parent_table: slot.table.to_string(),
                    parent_id: slot.id.clone(),
                    position: slot.position,
                }
            }
            None => RowClass::Root,
        };
        // a forwarded id stays on the row exactly as it arrived
        if !is_forwarded {
            flattened.insert(RECORD_ID.to_string(), record_id.clone().into());
        }

        if is_root {
            propagation.resolve_root(&record_id);
            if let Some(root_id) = propagation.root_id() {
                flattened.insert(ROOT_ID.to_string(), root_id.clone().into());
            }
        }

        // values this row hands down to its own descendants
        let mut scoped: Option<Propagation> = None;
        for (source, target) in self.config.propagation.for_table(table, is_root) {
            match flattened.get(source) {
                Some(value) if !value.is_null() => {
                    scoped
                        .get_or_insert_with(|| propagation.clone())
                        .insert(target.clone(), value.clone());
                }
                _ => {}
            }
        }
        let branch = match scoped.as_mut() {
            Some(scoped) => scoped,
            None => propagation,
        };

        // lists leave the row unless typed complex, which keeps them in both places
        let mut lists: Vec<(String, Vec<Value>)> = Vec::new();
        let mut data = Map::new();
        for (column, value) in flattened {
            match value {
                Value::Array(items) => {
                    if schema.is_complex(table, &column) {
                        data.insert(column.clone(), Value::Array(items.clone()));
                    }
                    lists.push((column, items));
                }
                other => {
                    data.insert(column, other);
                }
            }
        }

        trace!(table, record_id = %record_id, "emitting row");
        rows.push(NormalizedRow {
            table: table.to_string(),
            class,
            record_id: record_id.clone(),
            data,
        });

        for (column, items) in lists {
            let child_table = format!("{}{}{}", table, PATH_SEPARATOR, column);
            for (position, item) in items.into_iter().enumerate() {
                let slot = ParentSlot {
                    table,
                    id: &record_id,
                    position,
                };
                match item {
                    Value::Object(child) => {
                        self.normalize_row(schema, child, branch, &child_table, Some(slot), rows)?;
                    }
                    Value::Array(_) => {
                        warn!(table = %child_table, position, "rejecting list nested in a list");
                        return Err(NormalizeError::NestedList {
                            table: child_table,
                            position,
                        });
                    }
                    scalar => {
                        rows.push(scalar_child_row(scalar, &child_table, slot, branch));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Normalize `document` with the default configuration
pub fn normalize<S: SchemaLookup + ?Sized>(
    schema: &S,
    document: Map<String, Value>,
    load_id: &str,
) -> Result<Vec<NormalizedRow>> {
    RelationalNormalizer::default().normalize(schema, document, load_id)
}

/// Register the constraints on the identity columns. Does nothing when the
/// schema already carries them.
pub fn extend_schema<S: SchemaLookup + ?Sized>(schema: &mut S) -> Result<(), SchemaError> {
    let record_id = exact(RECORD_ID);
    if schema.has_hint_pattern(Hint::NotNull, &record_id) {
        return Ok(());
    }

    let mut hints = BTreeMap::new();
    hints.insert(
        Hint::NotNull,
        vec![
            record_id.clone(),
            exact(ROOT_ID),
            exact(PARENT_ID),
            exact(POSITION),
            LOAD_ID.to_string(),
        ],
    );
    hints.insert(Hint::ForeignKey, vec![exact(PARENT_ID)]);
    hints.insert(Hint::Unique, vec![record_id]);

    debug!(schema = schema.name(), "registering identity column hints");
    schema.merge_hints(&hints)
}

/// A load id from the current time, as fractional seconds since the epoch
pub fn new_load_id() -> String {
    let now = chrono::Utc::now();
    format!("{}.{:06}", now.timestamp(), now.timestamp_subsec_micros())
}

fn exact(column: &str) -> String {
    format!("^{}$", column)
}

fn routing_table(document: &Map<String, Value>) -> Option<&str> {
    document
        .get(META_FIELD)?
        .get(META_TABLE_NAME)?
        .as_str()
}

/// Record id supplied by the source document: any scalar except null and
/// the empty string
fn forwarded_id(row: &Map<String, Value>) -> Option<RecordId> {
    match row.get(RECORD_ID)? {
        Value::Null | Value::Array(_) | Value::Object(_) => None,
        Value::String(id) if id.is_empty() => None,
        value => Some(RecordId::new(key_string(value))),
    }
}

/// Primary key, then list slot; root rows without either get a random id
fn resolve_record_id<S: SchemaLookup + ?Sized>(
    schema: &S,
    table: &str,
    row: &Map<String, Value>,
    parent: Option<&ParentSlot<'_>>,
) -> RecordId {
    let key = schema.filter_row_with_hint(table, Hint::PrimaryKey, row);
    let declared = schema.hint_columns(table, Hint::PrimaryKey).len();
    if !key.is_empty() && key.len() == declared && key.values().all(|v| !v.is_null()) {
        return primary_key_id(&key);
    }

    match parent {
        Some(slot) => child_row_id(slot.id, table, slot.position),
        None => {
            trace!(table, "no primary key on root row, using random id");
            random_id()
        }
    }
}

fn attach_child_meta(row: &mut Map<String, Value>, slot: ParentSlot<'_>, propagation: &Propagation) {
    row.insert(PARENT_ID.to_string(), slot.id.clone().into());
    row.insert(POSITION.to_string(), Value::from(slot.position));
    propagation.apply(row);
}

fn scalar_child_row(
    value: Value,
    child_table: &str,
    slot: ParentSlot<'_>,
    propagation: &Propagation,
) -> NormalizedRow {
    let record_id = child_row_id(slot.id, child_table, slot.position);

    let mut data = Map::new();
    data.insert(VALUE.to_string(), value);
    data.insert(RECORD_ID.to_string(), record_id.clone().into());
    attach_child_meta(&mut data, slot, propagation);

    trace!(table = child_table, record_id = %record_id, "emitting row");
    NormalizedRow {
        table: child_table.to_string(),
        class: RowClass::Child {
            parent_table: slot.table.to_string(),
            parent_id: slot.id.clone(),
            position: slot.position,
        },
        record_id,
        data,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::hashing::digest128;
    use crate::normalize::types::PropagationConfig;
    use crate::schema::{Column, DataType, Schema};
    use serde_json::json;

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected an object"),
        }
    }

    fn keyed_schema() -> Schema {
        Schema::new("event").with_table(
            "event",
            vec![Column::new("id", DataType::Bigint).with_hint(Hint::PrimaryKey)],
        )
    }

    #[test]
    fn test_nested_object_single_row() {
        let schema = Schema::new("event");
        let rows = normalize(&schema, doc(json!({"a": 1, "b": {"c": 2}})), "load-1").unwrap();

        assert_eq!(rows.len(), 1);
        let root = &rows[0];
        assert_eq!(root.table, "event");
        assert!(root.is_root());
        assert_eq!(root.data["a"], 1);
        assert_eq!(root.data["b__c"], 2);
        assert_eq!(root.data[LOAD_ID], "load-1");
        assert_eq!(Some(root.record_id()), root.root_id());
        assert!(!root.data.contains_key(PARENT_ID));
        assert!(!root.data.contains_key(POSITION));
    }

    #[test]
    fn test_scalar_list_becomes_child_table() {
        let schema = Schema::new("event");
        let rows = normalize(&schema, doc(json!({"tags": ["x", "y"]})), "load-1").unwrap();

        assert_eq!(rows.len(), 3);
        let root_id = rows[0].record_id().to_string();
        assert!(!rows[0].data.contains_key("tags"));

        for (position, (row, value)) in rows[1..].iter().zip(["x", "y"]).enumerate() {
            assert_eq!(row.table, "event__tags");
            assert_eq!(row.parent_table(), Some("event"));
            assert_eq!(row.data[VALUE], value);
            assert_eq!(row.data[POSITION], position);
            assert_eq!(row.data[PARENT_ID], root_id.as_str());
            assert_eq!(row.data[ROOT_ID], root_id.as_str());
            assert_eq!(
                row.record_id(),
                digest128(&format!("{}_event__tags_{}", root_id, position))
            );
            assert!(!row.data.contains_key(LOAD_ID));
        }
    }

    #[test]
    fn test_primary_key_identity_is_stable() {
        let schema = keyed_schema();
        let first = normalize(&schema, doc(json!({"id": 42, "name": "a"})), "load-1").unwrap();
        let second = normalize(&schema, doc(json!({"id": 42, "name": "a"})), "load-2").unwrap();

        assert_eq!(first[0].record_id(), digest128("42"));
        assert_eq!(first[0].record_id(), second[0].record_id());
    }

    #[test]
    fn test_keyed_document_is_reproducible() {
        let schema = keyed_schema();
        let document = json!({
            "id": 1,
            "items": [{"sku": "a", "parts": [1, 2]}, {"sku": "b"}],
            "tags": ["t"]
        });

        let first = normalize(&schema, doc(document.clone()), "load-1").unwrap();
        let second = normalize(&schema, doc(document), "load-1").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unkeyed_root_gets_fresh_id() {
        let schema = Schema::new("event");
        let first = normalize(&schema, doc(json!({"a": 1})), "load-1").unwrap();
        let second = normalize(&schema, doc(json!({"a": 1})), "load-1").unwrap();
        assert_ne!(first[0].record_id(), second[0].record_id());
    }

    #[test]
    fn test_incomplete_primary_key_falls_back() {
        let schema = Schema::new("event").with_table(
            "event",
            vec![
                Column::new("tenant", DataType::Text).with_hint(Hint::PrimaryKey),
                Column::new("id", DataType::Bigint).with_hint(Hint::PrimaryKey),
            ],
        );

        let partial = normalize(&schema, doc(json!({"id": 42})), "l").unwrap();
        assert_ne!(partial[0].record_id(), digest128("42"));

        let nulled = normalize(&schema, doc(json!({"tenant": null, "id": 42})), "l").unwrap();
        assert_ne!(nulled[0].record_id(), digest128("None_42"));

        let full = normalize(&schema, doc(json!({"id": 42, "tenant": "acme"})), "l").unwrap();
        assert_eq!(full[0].record_id(), digest128("acme_42"));
    }

    #[test]
    fn test_forwarded_record_id() {
        let schema = keyed_schema();
        let rows = normalize(
            &schema,
            doc(json!({"id": 1, "_record_hash": "upstream", "tags": ["a"]})),
            "l",
        )
        .unwrap();

        assert_eq!(rows[0].record_id(), "upstream");
        assert_eq!(rows[0].root_id(), Some("upstream"));
        assert_eq!(rows[1].parent_id(), Some("upstream"));
        assert_eq!(rows[1].root_id(), Some("upstream"));
    }

    #[test]
    fn test_numeric_forwarded_record_id() {
        let schema = Schema::new("event");
        let rows = normalize(&schema, doc(json!({"_record_hash": 7, "a": 1, "tags": ["x"]})), "l").unwrap();

        assert_eq!(rows[0].data[RECORD_ID], 7);
        assert_eq!(rows[0].record_id(), "7");
        assert_eq!(rows[0].root_id(), Some("7"));
        assert_eq!(rows[1].parent_id(), Some("7"));
        assert_eq!(rows[1].data[PARENT_ID], "7");
        assert_eq!(rows[1].root_id(), Some("7"));
        assert_eq!(rows[1].record_id(), digest128("7_event__tags_0"));
    }

    #[test]
    fn test_forwarded_boolean_and_null_ids() {
        let schema = Schema::new("event");
        let rows = normalize(&schema, doc(json!({"_record_hash": true, "tags": [1]})), "l").unwrap();
        assert_eq!(rows[0].data[RECORD_ID], true);
        assert_eq!(rows[1].parent_id(), Some("True"));

        let nulled = normalize(&schema, doc(json!({"_record_hash": null})), "l").unwrap();
        assert_eq!(nulled[0].record_id().len(), 20);
    }

    #[test]
    fn test_empty_forwarded_id_is_ignored() {
        let schema = keyed_schema();
        let rows = normalize(&schema, doc(json!({"id": 5, "_record_hash": ""})), "l").unwrap();
        assert_eq!(rows[0].record_id(), digest128("5"));
    }

    #[test]
    fn test_child_rows_with_primary_key_keep_linkage() {
        let schema = Schema::new("order").with_table(
            "order__lines",
            vec![Column::new("line_no", DataType::Bigint).with_hint(Hint::PrimaryKey)],
        );
        let rows = normalize(
            &schema,
            doc(json!({"lines": [{"line_no": 7}, {"line_no": 8}]})),
            "l",
        )
        .unwrap();

        let root_id = rows[0].record_id();
        assert_eq!(rows[1].record_id(), digest128("7"));
        assert_eq!(rows[1].parent_id(), Some(root_id));
        assert_eq!(rows[1].data[PARENT_ID], root_id);
        assert_eq!(rows[2].data[POSITION], 1);
        assert_eq!(rows[2].root_id(), Some(root_id));
    }

    #[test]
    fn test_depth_first_order_and_linkage() {
        let schema = keyed_schema();
        let rows = normalize(
            &schema,
            doc(json!({
                "id": 1,
                "items": [
                    {"sku": "a", "parts": [{"n": 1}, {"n": 2}]},
                    {"sku": "b", "parts": [{"n": 3}]}
                ],
                "tags": ["t1"]
            })),
            "l",
        )
        .unwrap();

        let tables: Vec<&str> = rows.iter().map(|r| r.table.as_str()).collect();
        assert_eq!(
            tables,
            vec![
                "event",
                "event__items",
                "event__items__parts",
                "event__items__parts",
                "event__items",
                "event__items__parts",
                "event__tags",
            ]
        );

        let root_id = rows[0].record_id();
        for (idx, row) in rows.iter().enumerate() {
            assert_eq!(row.root_id(), Some(root_id));
            if let Some(parent_id) = row.parent_id() {
                let parent_table = row.parent_table().unwrap();
                assert!(rows[..idx]
                    .iter()
                    .any(|p| p.table == parent_table && p.record_id() == parent_id));
            }
        }

        assert_eq!(rows[3].data["n"], 2);
        assert_eq!(rows[3].position(), Some(1));
        assert_eq!(rows[3].parent_id(), Some(rows[1].record_id()));
        assert!(!rows[1].data.contains_key("parts"));
    }

    #[test]
    fn test_complex_fields_pass_through() {
        let schema = Schema::new("event")
            .with_table("event", vec![Column::new("payload", DataType::Complex)]);
        let rows = normalize(&schema, doc(json!({"payload": {"a": {"b": 1}}})), "l").unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].data["payload"], json!({"a": {"b": 1}}));
    }

    #[test]
    fn test_complex_list_is_kept_and_expanded() {
        let schema = Schema::new("event")
            .with_table("event", vec![Column::new("labels", DataType::Complex)]);
        let rows = normalize(&schema, doc(json!({"labels": ["a", "b"]})), "l").unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].data["labels"], json!(["a", "b"]));
        assert_eq!(rows[1].table, "event__labels");
        assert_eq!(rows[2].data[VALUE], "b");
    }

    #[test]
    fn test_preferred_complex_type_keeps_list() {
        let schema = Schema::new("event")
            .with_preferred_type("^raw_", DataType::Complex)
            .unwrap();
        let rows = normalize(&schema, doc(json!({"raw_ids": [1], "ids": [2]})), "l").unwrap();

        assert_eq!(rows[0].data["raw_ids"], json!([1]));
        assert!(!rows[0].data.contains_key("ids"));
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_list_of_lists_is_rejected() {
        let schema = Schema::new("event");
        let err = normalize(&schema, doc(json!({"matrix": [[1, 2], [3]]})), "l").unwrap_err();

        match err {
            NormalizeError::NestedList { table, position } => {
                assert_eq!(table, "event__matrix");
                assert_eq!(position, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_deep_list_of_lists_is_rejected() {
        let schema = Schema::new("event");
        let result = normalize(
            &schema,
            doc(json!({"items": [{"ok": 1}, {"grid": [1, [2]]}]})),
            "l",
        );
        assert!(matches!(
            result,
            Err(NormalizeError::NestedList { ref table, position: 1 }) if table == "event__items__grid"
        ));
    }

    #[test]
    fn test_routing_hint_selects_table_and_is_stripped() {
        let schema = Schema::new("event");
        let rows = normalize(
            &schema,
            doc(json!({"__dlt_meta": {"table_name": "PageViews"}, "a": 1, "list": [1]})),
            "l",
        )
        .unwrap();

        assert_eq!(rows[0].table, "page_views");
        assert_eq!(rows[1].table, "page_views__list");
        assert!(rows.iter().all(|r| !r.data.keys().any(|k| k.contains("dlt_meta"))));
    }

    #[test]
    fn test_schema_name_is_normalized() {
        let schema = Schema::new("MyEvents");
        let rows = normalize(&schema, doc(json!({"a": 1})), "l").unwrap();
        assert_eq!(rows[0].table, "my_events");
    }

    #[test]
    fn test_empty_list_produces_no_children() {
        let schema = Schema::new("event");
        let rows = normalize(&schema, doc(json!({"tags": [], "a": 1})), "l").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].data.contains_key("tags"));
    }

    #[test]
    fn test_configured_propagation() {
        let schema = keyed_schema();
        let config = NormalizerConfig {
            propagation: serde_json::from_value::<PropagationConfig>(json!({
                "root": {"id": "_event_id"},
                "tables": {"event__items": {"sku": "_item_sku"}}
            }))
            .unwrap(),
        };
        let normalizer = RelationalNormalizer::new(config);
        let rows = normalizer
            .normalize(
                &schema,
                doc(json!({
                    "id": 9,
                    "items": [{"sku": "a", "parts": ["p"]}, {"parts": ["q"]}],
                    "tags": ["t"]
                })),
                "l",
            )
            .unwrap();

        let by_table = |t: &str| rows.iter().filter(move |r| r.table == t).collect::<Vec<_>>();

        for row in &rows[1..] {
            assert_eq!(row.data["_event_id"], 9);
        }
        assert!(!rows[0].data.contains_key("_event_id"));

        let parts = by_table("event__items__parts");
        assert_eq!(parts[0].data["_item_sku"], "a");
        assert!(!parts[1].data.contains_key("_item_sku"));
        assert!(!by_table("event__tags")[0].data.contains_key("_item_sku"));
    }

    #[test]
    fn test_normalize_value_rejects_non_objects() {
        let schema = Schema::new("event");
        let normalizer = RelationalNormalizer::default();

        let err = normalizer.normalize_value(&schema, json!([1, 2]), "l").unwrap_err();
        assert!(matches!(err, NormalizeError::NotAnObject { found: "array" }));

        let rows = normalizer.normalize_value(&schema, json!({"a": 1}), "l").unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_extend_schema_is_idempotent() {
        let mut schema = Schema::new("event");
        extend_schema(&mut schema).unwrap();
        extend_schema(&mut schema).unwrap();

        let not_null: Vec<&str> = schema.hint_patterns(Hint::NotNull).iter().map(|p| p.as_str()).collect();
        assert_eq!(
            not_null,
            vec!["^_record_hash$", "^_root_hash$", "^_parent_hash$", "^_pos$", "_load_id"]
        );
        assert!(schema.has_hint_pattern(Hint::ForeignKey, "^_parent_hash$"));
        assert!(schema.has_hint_pattern(Hint::Unique, "^_record_hash$"));
        assert_eq!(schema.hint_patterns(Hint::Unique).len(), 1);
    }

    #[test]
    fn test_extend_schema_load_id_pattern_is_unanchored() {
        let mut schema = Schema::new("event");
        extend_schema(&mut schema).unwrap();

        let load_id = schema
            .hint_patterns(Hint::NotNull)
            .iter()
            .find(|p| p.as_str() == "_load_id")
            .unwrap();
        assert!(load_id.is_match("_load_id"));
        assert!(load_id.is_match("prev_load_id"));
    }

    #[test]
    fn test_extend_schema_skips_when_present() {
        let mut schema: Schema = serde_json::from_value(json!({
            "name": "event",
            "hints": {"not_null": ["^_record_hash$"]}
        }))
        .unwrap();

        extend_schema(&mut schema).unwrap();
        assert_eq!(schema.hint_patterns(Hint::NotNull).len(), 1);
        assert!(schema.hint_patterns(Hint::Unique).is_empty());
    }

    #[test]
    fn test_new_load_id_shape() {
        let load_id = new_load_id();
        let (secs, micros) = load_id.split_once('.').unwrap();
        assert!(secs.parse::<i64>().unwrap() > 0);
        assert_eq!(micros.len(), 6);
    }
}
