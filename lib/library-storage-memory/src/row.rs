//! JSON row encoding and filter evaluation.

use std::cmp::Ordering;

use library_storage::{Filter, Order, Storable, StorageDatetime, StorageError, Value};
use serde_json::{Map, Value as Json};

/// A stored row, keyed by column name.
pub(crate) type Row = Map<String, Json>;

/// Serialize an item into a row keyed by column name.
///
/// Columns missing from the serialized form are stored as null.
pub(crate) fn encode<T: Storable>(item: &T) -> Result<Row, StorageError> {
    let Json::Object(mut obj) = serde_json::to_value(item)? else {
        return Err(StorageError::StorageError(format!(
            "{} did not serialize to an object",
            T::table_name()
        )));
    };

    let mut row = Row::new();
    for (column, json_key) in T::columns().iter().zip(T::json_keys()) {
        let value = obj.remove(*json_key).unwrap_or(Json::Null);
        row.insert((*column).to_string(), value);
    }
    Ok(row)
}

/// Deserialize a row back into its Storable type.
///
/// Null columns are omitted so optional fields deserialize to `None`.
pub(crate) fn decode<T: Storable>(row: &Row) -> Result<T, StorageError> {
    let mut obj = Map::new();
    for (column, json_key) in T::columns().iter().zip(T::json_keys()) {
        match row.get(*column) {
            Some(Json::Null) | None => {}
            Some(value) => {
                obj.insert((*json_key).to_string(), value.clone());
            }
        }
    }
    serde_json::from_value(Json::Object(obj))
        .map_err(|e| StorageError::StorageError(format!("Deserialization error: {}", e)))
}

/// Whether a row satisfies every filter.
pub(crate) fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| matches(row, filter))
}

fn matches(row: &Row, filter: &Filter) -> bool {
    match filter {
        Filter::Eq(column, value) => row.get(column).is_some_and(|cell| cell_eq(cell, value)),
        Filter::In(column, value) => row.get(column).is_some_and(|cell| match value {
            Value::Ints(ids) => cell.as_i64().is_some_and(|n| ids.contains(&n)),
            other => cell_eq(cell, other),
        }),
        Filter::IsNull(column) => row.get(column).is_none_or(Json::is_null),
    }
}

fn cell_eq(cell: &Json, value: &Value) -> bool {
    match (cell, value) {
        (Json::String(s), Value::String(v)) => s == v,
        (Json::Number(n), Value::Int(v)) => n.as_i64() == Some(*v),
        (Json::Bool(b), Value::Bool(v)) => b == v,
        (Json::String(s), Value::Datetime(v)) => {
            StorageDatetime::parse(s).is_ok_and(|dt| &dt == v)
        }
        (Json::Null, Value::Null) => true,
        _ => false,
    }
}

/// Sort rows by the given order-by clauses, first clause first.
pub(crate) fn sort(rows: &mut [Row], order_by: &[(String, Order)]) {
    if order_by.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for (column, order) in order_by {
            let ordering = compare_cells(a.get(column), b.get(column));
            let ordering = match order {
                Order::Asc => ordering,
                Order::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

/// Nulls sort first. Timestamps are stored as fixed-width RFC 3339 strings,
/// so string comparison orders them chronologically.
fn compare_cells(a: Option<&Json>, b: Option<&Json>) -> Ordering {
    match (a.unwrap_or(&Json::Null), b.unwrap_or(&Json::Null)) {
        (Json::Null, Json::Null) => Ordering::Equal,
        (Json::Null, _) => Ordering::Less,
        (_, Json::Null) => Ordering::Greater,
        (Json::Number(x), Json::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Json::String(x), Json::String(y)) => x.cmp(y),
        (Json::Bool(x), Json::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

/// Whether two rows agree on every listed column.
pub(crate) fn same_key(a: &Row, b: &Row, columns: &[&str]) -> bool {
    columns.iter().all(|column| a.get(*column) == b.get(*column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, library_storage::Storable)]
    #[storable(table = "shelves")]
    #[serde(rename_all = "camelCase")]
    struct Shelf {
        #[primary_key]
        id: i64,
        label: String,
        archived_at: Option<StorageDatetime>,
    }

    fn row(value: Json) -> Row {
        match value {
            Json::Object(map) => map,
            _ => Row::new(),
        }
    }

    #[test]
    fn encode_keys_rows_by_column_name() {
        let shelf = Shelf {
            id: 4,
            label: "fiction".into(),
            archived_at: None,
        };
        let encoded = encode(&shelf).unwrap();
        assert_eq!(
            Json::Object(encoded.clone()),
            json!({"id": 4, "label": "fiction", "archived_at": null})
        );
        assert_eq!(decode::<Shelf>(&encoded).unwrap(), shelf);
    }

    #[test]
    fn filters_compare_by_type() {
        let stamp = StorageDatetime::now();
        let r = row(json!({"id": 7, "label": "x", "archived_at": stamp.to_rfc3339()}));

        assert!(matches_all(&r, &[Filter::Eq("id".into(), Value::Int(7))]));
        assert!(!matches_all(&r, &[Filter::Eq("id".into(), Value::String("7".into()))]));
        assert!(matches_all(&r, &[Filter::In("id".into(), Value::Ints(vec![1, 7]))]));
        assert!(!matches_all(&r, &[Filter::In("id".into(), Value::Ints(vec![]))]));
        assert!(matches_all(&r, &[Filter::Eq("archived_at".into(), Value::Datetime(stamp))]));
        assert!(!matches_all(&r, &[Filter::IsNull("archived_at".into())]));
        assert!(matches_all(&r, &[Filter::IsNull("missing".into())]));
    }

    #[test]
    fn sort_puts_nulls_first_and_honours_direction() {
        let mut rows = vec![
            row(json!({"id": 2, "rank": 1})),
            row(json!({"id": 1, "rank": null})),
            row(json!({"id": 3, "rank": 1})),
        ];
        sort(
            &mut rows,
            &[("rank".into(), Order::Asc), ("id".into(), Order::Desc)],
        );
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 3, 2]);
    }
}
