//! Record model shared by source readers, the normalizer and load adapters

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use uuid::Uuid;

// ============================================================================
// Raw Types
// ============================================================================

/// Untyped scalar as produced by a source reader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Textual form of the value, `None` for null.
    ///
    /// Numbers render in their shortest round-trip form, so `3.0` renders as `3`.
    pub fn as_text(&self) -> Option<Cow<'_, str>> {
        match self {
            RawValue::Null => None,
            RawValue::Bool(b) => Some(Cow::Borrowed(if *b { "true" } else { "false" })),
            RawValue::Integer(i) => Some(Cow::Owned(i.to_string())),
            RawValue::Float(f) => Some(Cow::Owned(f.to_string())),
            RawValue::Text(s) => Some(Cow::Borrowed(s.as_str())),
        }
    }

    /// Convert a JSON scalar into a raw value.
    ///
    /// Nested arrays and objects are kept as their JSON text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => RawValue::Null,
            serde_json::Value::Bool(b) => RawValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => RawValue::Integer(i),
                None => n.as_f64().map(RawValue::Float).unwrap_or(RawValue::Null),
            },
            serde_json::Value::String(s) => RawValue::Text(s.clone()),
            other => RawValue::Text(other.to_string()),
        }
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<String> for RawValue {
    fn from(value: String) -> Self {
        RawValue::Text(value)
    }
}

impl From<i64> for RawValue {
    fn from(value: i64) -> Self {
        RawValue::Integer(value)
    }
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Float(value)
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

/// Ordered mapping of column name to raw value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    fields: Vec<(String, RawValue)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any existing value for the column in place
    pub fn insert(&mut self, column: impl Into<String>, value: RawValue) {
        let column = column.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = value,
            None => self.fields.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&RawValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RawValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, RawValue)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, RawValue)>>(iter: I) -> Self {
        let mut record = RawRecord::new();
        for (column, value) in iter {
            record.insert(column, value);
        }
        record
    }
}

/// Bookkeeping a reader attaches to the dataset it produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractMeta {
    /// Request retries performed while reading
    pub retries: u32,
    /// Rows dropped because their shape did not match the header
    pub malformed_rows: usize,
}

/// Named, ordered collection of raw records
///
/// `columns` is the union of column names across all records in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    columns: Vec<String>,
    records: Vec<RawRecord>,
    pub meta: ExtractMeta,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, record: RawRecord) {
        for column in record.columns() {
            if !self.columns.iter().any(|c| c == column) {
                self.columns.push(column.to_string());
            }
        }
        self.records.push(record);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Extend<RawRecord> for Dataset {
    fn extend<I: IntoIterator<Item = RawRecord>>(&mut self, iter: I) {
        for record in iter {
            self.push(record);
        }
    }
}

// ============================================================================
// Normalized Types
// ============================================================================

/// Destination type domain of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Integer,
    Float,
    Date,
    Timestamp,
    Boolean,
    Uuid,
    Category,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Float => "float",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Boolean => "boolean",
            ColumnType::Uuid => "uuid",
            ColumnType::Category => "category",
        };
        write!(f, "{}", s)
    }
}

/// Typed value conforming to a [`ColumnType`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Boolean(bool),
    Uuid(Uuid),
    Category(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Whether the value lies in the domain of `column_type`.
    ///
    /// Null conforms to every type; nullability is a property of the column.
    pub fn conforms_to(&self, column_type: ColumnType) -> bool {
        matches!(
            (self, column_type),
            (Value::Null, _)
                | (Value::Text(_), ColumnType::Text)
                | (Value::Integer(_), ColumnType::Integer)
                | (Value::Float(_), ColumnType::Float)
                | (Value::Date(_), ColumnType::Date)
                | (Value::Timestamp(_), ColumnType::Timestamp)
                | (Value::Boolean(_), ColumnType::Boolean)
                | (Value::Uuid(_), ColumnType::Uuid)
                | (Value::Category(_), ColumnType::Category)
        )
    }

    /// Canonical text: ISO-8601 dates, shortest round-trip numbers, hyphenated lowercase UUIDs
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) | Value::Category(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::Timestamp(t) => Some(t.format("%Y-%m-%d %H:%M:%S").to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Uuid(u) => Some(u.hyphenated().to_string()),
        }
    }

    pub fn to_raw(&self) -> RawValue {
        match self {
            Value::Null => RawValue::Null,
            Value::Integer(i) => RawValue::Integer(*i),
            Value::Float(f) => RawValue::Float(*f),
            Value::Boolean(b) => RawValue::Bool(*b),
            other => other.render().map(RawValue::Text).unwrap_or(RawValue::Null),
        }
    }
}

/// Declared destination column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

/// Record whose values line up with the owning dataset's column definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub values: Vec<Value>,
}

/// Counters produced while normalizing one dataset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub input_rows: usize,
    pub rejected_rows: usize,
    /// Rejections keyed by the first failing column of each dropped row
    pub rejections_by_column: std::collections::BTreeMap<String, usize>,
    pub duplicates_dropped: usize,
}

/// Validated dataset with a unique, non-null key column
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedDataset {
    pub name: String,
    pub key_column: String,
    pub columns: Vec<ColumnDef>,
    pub records: Vec<NormalizedRecord>,
    pub report: NormalizeReport,
}

impl NormalizedDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// All values of one column in record order
    pub fn column_values(&self, name: &str) -> Vec<&Value> {
        match self.column_index(name) {
            Some(idx) => self.records.iter().map(|r| &r.values[idx]).collect(),
            None => Vec::new(),
        }
    }

    /// Same columns and records, ignoring the report
    pub fn same_contents(&self, other: &NormalizedDataset) -> bool {
        self.key_column == other.key_column
            && self.columns == other.columns
            && self.records == other.records
    }

    /// Render back into a raw dataset using canonical text for each value
    pub fn to_raw(&self) -> Dataset {
        let mut dataset = Dataset::new(self.name.clone());
        for record in &self.records {
            dataset.push(
                self.columns
                    .iter()
                    .zip(&record.values)
                    .map(|(column, value)| (column.name.clone(), value.to_raw()))
                    .collect(),
            );
        }
        dataset
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_record_insert_replaces_in_place() {
        let mut record = RawRecord::new();
        record.insert("a", RawValue::from("1"));
        record.insert("b", RawValue::from("2"));
        record.insert("a", RawValue::from("3"));

        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(record.get("a"), Some(&RawValue::from("3")));
        assert_eq!(record.get("missing"), None);
    }

    #[test]
    fn test_dataset_tracks_column_union_in_first_seen_order() {
        let mut dataset = Dataset::new("stores");
        dataset.push([("store_code", RawValue::from("A"))].into_iter().collect());
        dataset.push(
            [("lat", RawValue::Null), ("store_code", RawValue::from("B"))]
                .into_iter()
                .collect(),
        );

        assert_eq!(dataset.columns(), ["store_code", "lat"]);
        assert_eq!(dataset.len(), 2);
    }

    #[test]
    fn test_raw_value_from_json() {
        assert_eq!(RawValue::from_json(&serde_json::json!(3)), RawValue::Integer(3));
        assert_eq!(RawValue::from_json(&serde_json::json!(2.5)), RawValue::Float(2.5));
        assert_eq!(RawValue::from_json(&serde_json::json!(null)), RawValue::Null);
        assert_eq!(
            RawValue::from_json(&serde_json::json!([1, 2])),
            RawValue::Text("[1,2]".to_string())
        );
    }

    #[test]
    fn test_raw_value_text_forms() {
        assert_eq!(RawValue::Float(3.0).as_text().unwrap(), "3");
        assert_eq!(RawValue::Float(0.25).as_text().unwrap(), "0.25");
        assert_eq!(RawValue::Bool(true).as_text().unwrap(), "true");
        assert!(RawValue::Null.as_text().is_none());
    }

    #[test]
    fn test_value_render_is_canonical() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        assert_eq!(Value::Date(date).render().unwrap(), "2020-01-01");
        let at = date.and_hms_opt(9, 8, 55).unwrap();
        assert_eq!(Value::Timestamp(at).render().unwrap(), "2020-01-01 09:08:55");
        assert!(Value::Timestamp(at).conforms_to(ColumnType::Timestamp));
        assert!(!Value::Timestamp(at).conforms_to(ColumnType::Date));

        let uuid = Uuid::parse_str("93CAF182-E4E9-4C6E-BEBB-60A1A3DCF0F6").unwrap();
        assert_eq!(
            Value::Uuid(uuid).render().unwrap(),
            "93caf182-e4e9-4c6e-bebb-60a1a3dcf0f6"
        );
        assert_eq!(Value::Float(1.2).render().unwrap(), "1.2");
        assert!(Value::Null.render().is_none());
    }

    #[test]
    fn test_value_conforms_to() {
        assert!(Value::Integer(1).conforms_to(ColumnType::Integer));
        assert!(!Value::Integer(1).conforms_to(ColumnType::Float));
        assert!(Value::Null.conforms_to(ColumnType::Uuid));
    }

    #[test]
    fn test_normalized_dataset_to_raw() {
        let dataset = NormalizedDataset {
            name: "dim_date_times".to_string(),
            key_column: "date_uuid".to_string(),
            columns: vec![
                ColumnDef {
                    name: "month".to_string(),
                    column_type: ColumnType::Integer,
                    nullable: false,
                },
                ColumnDef {
                    name: "time_period".to_string(),
                    column_type: ColumnType::Category,
                    nullable: false,
                },
            ],
            records: vec![NormalizedRecord {
                values: vec![Value::Integer(9), Value::Category("Evening".to_string())],
            }],
            report: NormalizeReport::default(),
        };

        let raw = dataset.to_raw();
        assert_eq!(raw.columns(), ["month", "time_period"]);
        assert_eq!(raw.records()[0].get("month"), Some(&RawValue::Integer(9)));
        assert_eq!(
            raw.records()[0].get("time_period"),
            Some(&RawValue::from("Evening"))
        );
    }
}
