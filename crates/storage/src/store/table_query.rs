#![forbid(unsafe_code)]

//! Filter, sort and paginate stored table rows.
//!
//! Rows look like `{"_id": {"r", "c", "type"}, "value": {...}}`. Field paths
//! starting with `_id` or `value` address the row directly; any other path is
//! read under `value`, so `isbn` and `value.isbn` are the same field.

use super::{SqliteStore, StoreError};
use pr_core::OperationType;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

static NULL: JsonValue = JsonValue::Null;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    /// `1` / `-1` style direction values.
    pub fn from_sign(sign: i64) -> Self {
        if sign < 0 {
            Self::Descending
        } else {
            Self::Ascending
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Condition {
    Eq(JsonValue),
    Ne(JsonValue),
    Gt(JsonValue),
    Gte(JsonValue),
    Lt(JsonValue),
    Lte(JsonValue),
    In(Vec<JsonValue>),
}

/// Query over one table specification's rows. `limit == 0` means no limit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableQuery {
    filter: Vec<(String, Condition)>,
    sort: Vec<(String, SortDirection)>,
    offset: usize,
    limit: usize,
}

impl TableQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter on `path`. A plain value is an equality match (an array
    /// field matches when it contains the value). An object of operators
    /// (`$gt`, `$gte`, `$lt`, `$lte`, `$ne`, `$in`) is a range or set match.
    pub fn filter(mut self, path: impl Into<String>, value: JsonValue) -> Result<Self, StoreError> {
        let path = path.into();
        for condition in parse_conditions(value)? {
            self.filter.push((path.clone(), condition));
        }
        Ok(self)
    }

    pub fn sort(mut self, path: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push((path.into(), direction));
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn is_match(&self, row: &JsonValue) -> bool {
        self.filter
            .iter()
            .all(|(path, condition)| condition_matches(condition, resolve(row, path)))
    }

    /// Applies filter, sort and pagination. `head.count` is the number of
    /// rows matching the filter, before pagination.
    pub fn apply(&self, rows: Vec<JsonValue>) -> TableRows {
        let mut matched: Vec<JsonValue> = rows.into_iter().filter(|row| self.is_match(row)).collect();
        let count = matched.len();
        matched.sort_by(|a, b| self.compare_rows(a, b));

        let results = matched
            .into_iter()
            .skip(self.offset)
            .take(if self.limit == 0 { usize::MAX } else { self.limit })
            .collect();

        TableRows {
            head: TableHead {
                count,
                offset: self.offset,
                limit: self.limit,
            },
            results,
        }
    }

    fn compare_rows(&self, a: &JsonValue, b: &JsonValue) -> Ordering {
        for (path, direction) in &self.sort {
            let left = sort_key(resolve(a, path), *direction);
            let right = sort_key(resolve(b, path), *direction);
            let ord = compare_values(left, right);
            let ord = match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        compare_values(a.get("_id").unwrap_or(&NULL), b.get("_id").unwrap_or(&NULL))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TableHead {
    pub count: usize,
    pub offset: usize,
    pub limit: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableRows {
    pub head: TableHead,
    pub results: Vec<JsonValue>,
}

impl SqliteStore {
    /// Rows of table `spec_id` selected by `query`.
    pub fn table_rows(&self, spec_id: &str, query: &TableQuery) -> Result<TableRows, StoreError> {
        let rows = self
            .artifacts(OperationType::Tables, spec_id)?
            .into_iter()
            .map(|artifact| artifact.document)
            .collect();
        Ok(query.apply(rows))
    }
}

fn parse_conditions(value: JsonValue) -> Result<Vec<Condition>, StoreError> {
    let operators = match value {
        JsonValue::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => map,
        other => return Ok(vec![Condition::Eq(other)]),
    };
    let mut out = Vec::with_capacity(operators.len());
    for (op, operand) in &operators {
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(operand.clone()),
            "$ne" => Condition::Ne(operand.clone()),
            "$gt" => Condition::Gt(operand.clone()),
            "$gte" => Condition::Gte(operand.clone()),
            "$lt" => Condition::Lt(operand.clone()),
            "$lte" => Condition::Lte(operand.clone()),
            "$in" => match operand {
                JsonValue::Array(values) => Condition::In(values.clone()),
                _ => return Err(StoreError::InvalidInput("$in expects an array")),
            },
            _ => return Err(StoreError::InvalidInput("unsupported filter operator")),
        };
        out.push(condition);
    }
    Ok(out)
}

fn resolve<'a>(row: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let rooted = path == "_id" || path == "value" || path.starts_with("_id.") || path.starts_with("value.");
    let mut current = if rooted { row } else { row.get("value")? };
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

fn equals(field: Option<&JsonValue>, wanted: &JsonValue) -> bool {
    match field {
        None => wanted.is_null(),
        Some(value) if value == wanted => true,
        Some(JsonValue::Array(items)) => items.iter().any(|item| item == wanted),
        Some(_) => false,
    }
}

/// Range comparisons only hold between values of the same kind, and for an
/// array field when any element satisfies them.
fn range(field: Option<&JsonValue>, bound: &JsonValue, accept: fn(Ordering) -> bool) -> bool {
    let check = |value: &JsonValue| type_rank(value) == type_rank(bound) && accept(compare_values(value, bound));
    match field {
        None => false,
        Some(JsonValue::Array(items)) if !bound.is_array() => items.iter().any(check),
        Some(value) => check(value),
    }
}

fn condition_matches(condition: &Condition, field: Option<&JsonValue>) -> bool {
    match condition {
        Condition::Eq(wanted) => equals(field, wanted),
        Condition::Ne(wanted) => !equals(field, wanted),
        Condition::In(candidates) => candidates.iter().any(|wanted| equals(field, wanted)),
        Condition::Gt(bound) => range(field, bound, |o| o == Ordering::Greater),
        Condition::Gte(bound) => range(field, bound, |o| o != Ordering::Less),
        Condition::Lt(bound) => range(field, bound, |o| o == Ordering::Less),
        Condition::Lte(bound) => range(field, bound, |o| o != Ordering::Greater),
    }
}

/// Arrays sort by their smallest element ascending and by their largest
/// descending.
fn sort_key(value: Option<&JsonValue>, direction: SortDirection) -> &JsonValue {
    match value {
        None => &NULL,
        Some(JsonValue::Array(items)) => {
            let picked = match direction {
                SortDirection::Ascending => items.iter().min_by(|a, b| compare_values(a, b)),
                SortDirection::Descending => items.iter().max_by(|a, b| compare_values(a, b)),
            };
            picked.unwrap_or(&NULL)
        }
        Some(value) => value,
    }
}

fn type_rank(value: &JsonValue) -> u8 {
    match value {
        JsonValue::Null => 0,
        JsonValue::Number(_) => 1,
        JsonValue::String(_) => 2,
        JsonValue::Object(_) => 3,
        JsonValue::Array(_) => 4,
        JsonValue::Bool(_) => 5,
    }
}

/// Total order over json values: null < numbers < strings < objects <
/// arrays < booleans.
fn compare_values(a: &JsonValue, b: &JsonValue) -> Ordering {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.total_cmp(&y)
        }
        (JsonValue::String(x), JsonValue::String(y)) => x.cmp(y),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => x.cmp(y),
        (JsonValue::Array(x), JsonValue::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (JsonValue::Object(x), JsonValue::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
