//! Record normalizer
//!
//! Turns a raw [`Dataset`] into a [`NormalizedDataset`] according to a [`DatasetSchema`]:
//! every declared column is cleaned by its [`ColumnRule`], rows with any rejected value are
//! dropped and counted, and rows sharing a key value are reduced to the first one seen.
//!
//! # Example
//!
//! ```
//! use retail_common::types::{Dataset, RawValue};
//! use retail_etl::normalize::{normalize, ColumnRule, DatasetSchema};
//!
//! let mut raw = Dataset::new("dates");
//! for (id, day) in [("a", "2020-01-01"), ("b", "NULL"), ("c", "not-a-date")] {
//!     raw.push([("id", RawValue::from(id)), ("day", RawValue::from(day))].into_iter().collect());
//! }
//!
//! let schema = DatasetSchema::new("dates", "id")
//!     .column(ColumnRule::text("id"))
//!     .column(ColumnRule::date("day"));
//!
//! let normalized = normalize(&raw, &schema).unwrap();
//! assert_eq!(normalized.len(), 1);
//! assert_eq!(normalized.report.rejected_rows, 2);
//! ```

pub mod rules;
pub mod schemas;

pub use rules::{Check, Coercion, ColumnRule, Repair};
pub use schemas::WarehouseTable;

use retail_common::types::{Dataset, NormalizeReport, NormalizedDataset, NormalizedRecord};
use retail_common::{EtlError, Result};
use std::collections::HashSet;
use tracing::{debug, info};

/// Declared shape of one destination table
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSchema {
    pub name: String,
    pub key_column: String,
    pub rules: Vec<ColumnRule>,
}

impl DatasetSchema {
    pub fn new(name: impl Into<String>, key_column: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key_column: key_column.into(),
            rules: Vec::new(),
        }
    }

    pub fn column(mut self, rule: ColumnRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Check that the key is a declared, non-nullable column and names are unique
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for rule in &self.rules {
            if !seen.insert(rule.name.as_str()) {
                return Err(EtlError::Config(format!(
                    "schema '{}' declares column '{}' twice",
                    self.name, rule.name
                )));
            }
        }

        match self.rules.iter().find(|r| r.name == self.key_column) {
            None => Err(EtlError::Config(format!(
                "schema '{}' has no key column '{}'",
                self.name, self.key_column
            ))),
            Some(rule) if rule.nullable => Err(EtlError::Config(format!(
                "key column '{}' of schema '{}' must not be nullable",
                self.key_column, self.name
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// Clean a raw dataset against a schema.
///
/// Only schema errors fail the call. Row-level problems are recorded in the report.
pub fn normalize(dataset: &Dataset, schema: &DatasetSchema) -> Result<NormalizedDataset> {
    schema.validate()?;

    let prepared = schema
        .rules
        .iter()
        .map(ColumnRule::prepare)
        .collect::<Result<Vec<_>>>()?;
    let key_index = schema
        .rules
        .iter()
        .position(|r| r.name == schema.key_column)
        .ok_or_else(|| EtlError::Config(format!("missing key column '{}'", schema.key_column)))?;

    let mut report = NormalizeReport {
        input_rows: dataset.len(),
        ..Default::default()
    };
    let mut records = Vec::with_capacity(dataset.len());
    let mut seen_keys = HashSet::new();

    'rows: for (row, raw) in dataset.records().iter().enumerate() {
        let mut values = Vec::with_capacity(prepared.len());

        for rule in &prepared {
            let found = std::iter::once(&rule.rule.name)
                .chain(&rule.rule.aliases)
                .find_map(|column| raw.get(column));
            let derived = match found {
                Some(_) => None,
                None => rule.rule.derive(raw),
            };

            match rule.apply(found.or(derived.as_ref())) {
                Ok(value) => values.push(value),
                Err(rejection) => {
                    let err = EtlError::RecordInvalid {
                        column: rule.rule.name.clone(),
                        rejection,
                    };
                    debug!(dataset = %dataset.name, row, error = %err, "Dropping invalid record");

                    report.rejected_rows += 1;
                    *report
                        .rejections_by_column
                        .entry(rule.rule.name.clone())
                        .or_default() += 1;
                    continue 'rows;
                },
            }
        }

        let key = values[key_index].render().unwrap_or_default();
        if !seen_keys.insert(key) {
            report.duplicates_dropped += 1;
            continue;
        }

        records.push(NormalizedRecord { values });
    }

    info!(
        dataset = %dataset.name,
        input_rows = report.input_rows,
        rejected_rows = report.rejected_rows,
        duplicates_dropped = report.duplicates_dropped,
        output_rows = records.len(),
        "Normalized dataset"
    );

    Ok(NormalizedDataset {
        name: schema.name.clone(),
        key_column: schema.key_column.clone(),
        columns: schema.rules.iter().map(ColumnRule::column_def).collect(),
        records,
        report,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use retail_common::types::{RawRecord, RawValue, Value};

    fn record(fields: &[(&str, &str)]) -> RawRecord {
        fields
            .iter()
            .map(|(k, v)| (*k, RawValue::from(*v)))
            .collect()
    }

    fn dataset(rows: &[&[(&str, &str)]]) -> Dataset {
        let mut dataset = Dataset::new("test");
        dataset.extend(rows.iter().map(|r| record(r)));
        dataset
    }

    fn date_schema() -> DatasetSchema {
        DatasetSchema::new("test", "id")
            .column(ColumnRule::text("id"))
            .column(ColumnRule::date("day"))
    }

    #[test]
    fn test_date_column_rejections() {
        let raw = dataset(&[
            &[("id", "1"), ("day", "2020-01-01")],
            &[("id", "2"), ("day", "NULL")],
            &[("id", "3"), ("day", "not-a-date")],
        ]);

        let normalized = normalize(&raw, &date_schema()).unwrap();

        assert_eq!(
            normalized.column_values("day"),
            vec![&Value::Date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())]
        );
        assert_eq!(normalized.report.rejected_rows, 2);
        assert_eq!(normalized.report.rejections_by_column["day"], 2);
        assert_eq!(normalized.report.input_rows, 3);
    }

    #[test]
    fn test_duplicates_keep_first_seen() {
        let raw = dataset(&[
            &[("id", "k"), ("day", "2020-01-01")],
            &[("id", "other"), ("day", "2020-01-03")],
            &[("id", "k"), ("day", "2020-01-02")],
        ]);

        let normalized = normalize(&raw, &date_schema()).unwrap();

        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized.report.duplicates_dropped, 1);
        assert_eq!(
            normalized.records[0].values[1],
            Value::Date(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())
        );
    }

    #[test]
    fn test_uuid_keys_deduplicate_across_spellings() {
        let schema = DatasetSchema::new("test", "id").column(ColumnRule::uuid("id"));
        let raw = dataset(&[
            &[("id", "93caf182-e4e9-4c6e-bebb-60a1a3dcf0f6")],
            &[("id", "93CAF182-E4E9-4C6E-BEBB-60A1A3DCF0F6")],
        ]);

        let normalized = normalize(&raw, &schema).unwrap();
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized.report.duplicates_dropped, 1);
    }

    #[test]
    fn test_aliases_and_undeclared_columns() {
        let schema = DatasetSchema::new("products", "product_code")
            .column(ColumnRule::text("product_code"))
            .column(
                ColumnRule::boolean("still_available", &["Still_avaliable"], &["Removed"])
                    .alias("removed"),
            );
        let raw = dataset(&[&[("product_code", "A8-4686892S"), ("removed", "Removed"), ("Unnamed: 0", "0")]]);

        let normalized = normalize(&raw, &schema).unwrap();

        let names: Vec<_> = normalized.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["product_code", "still_available"]);
        assert_eq!(normalized.records[0].values[1], Value::Boolean(false));
    }

    #[test]
    fn test_first_failing_column_is_counted() {
        let schema = DatasetSchema::new("test", "id")
            .column(ColumnRule::integer("id"))
            .column(ColumnRule::date("day"));
        let raw = dataset(&[&[("id", "x"), ("day", "bad")]]);

        let normalized = normalize(&raw, &schema).unwrap();
        assert_eq!(normalized.report.rejections_by_column.get("id"), Some(&1));
        assert_eq!(normalized.report.rejections_by_column.get("day"), None);
    }

    #[test]
    fn test_row_isolation() {
        let mut rows: Vec<Vec<(String, String)>> = (0..20)
            .map(|i| vec![("id".to_string(), i.to_string()), ("day".to_string(), "2021-06-01".to_string())])
            .collect();
        for i in [3, 7, 11, 19] {
            rows[i][1].1 = "31/31/31".to_string();
        }

        let mut raw = Dataset::new("test");
        for row in &rows {
            raw.push(row.iter().map(|(k, v)| (k.clone(), RawValue::from(v.as_str()))).collect());
        }

        let normalized = normalize(&raw, &date_schema()).unwrap();
        assert_eq!(normalized.len(), 16);
        assert_eq!(normalized.report.rejected_rows, 4);
    }

    #[test]
    fn test_schema_validation() {
        let no_key = DatasetSchema::new("t", "id").column(ColumnRule::text("name"));
        assert!(no_key.validate().is_err());

        let nullable_key = DatasetSchema::new("t", "id").column(ColumnRule::text("id").nullable());
        assert!(nullable_key.validate().is_err());

        let duplicate = DatasetSchema::new("t", "id")
            .column(ColumnRule::text("id"))
            .column(ColumnRule::text("id"));
        assert!(duplicate.validate().is_err());

        assert!(normalize(&Dataset::new("t"), &no_key).is_err());
    }

    #[test]
    fn test_every_warehouse_schema_is_valid() {
        for table in WarehouseTable::all() {
            table.schema().validate().unwrap();
            for rule in &table.schema().rules {
                rule.prepare().unwrap();
            }
        }
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let raw = dataset(&[
            &[("id", " 1 "), ("day", "1968 October 16")],
            &[("id", "2"), ("day", "2020/02/29")],
            &[("id", "3"), ("day", "N/A")],
        ]);

        let once = normalize(&raw, &date_schema()).unwrap();
        let twice = normalize(&once.to_raw(), &date_schema()).unwrap();

        assert!(once.same_contents(&twice));
        assert_eq!(twice.report.rejected_rows, 0);
    }

    fn raw_value() -> impl Strategy<Value = RawValue> {
        prop_oneof![
            Just(RawValue::Null),
            any::<bool>().prop_map(RawValue::Bool),
            any::<i64>().prop_map(RawValue::Integer),
            any::<f64>().prop_map(RawValue::Float),
            ".{0,24}".prop_map(RawValue::Text),
            prop_oneof![
                Just("NULL"),
                Just("N/A"),
                Just("2020-02-30"),
                Just("1e309"),
                Just("-0"),
                Just("12 x 100g"),
                Just("£-3"),
            ]
            .prop_map(RawValue::from),
        ]
    }

    proptest! {
        #[test]
        fn prop_every_rule_is_total(values in proptest::collection::vec(raw_value(), 1..8)) {
            for table in WarehouseTable::all() {
                let schema = table.schema();
                let mut raw = Dataset::new(table.as_str());
                for value in &values {
                    raw.push(
                        schema
                            .rules
                            .iter()
                            .map(|r| (r.name.clone(), value.clone()))
                            .collect(),
                    );
                }

                let normalized = normalize(&raw, &schema).unwrap();
                let report = &normalized.report;
                prop_assert_eq!(
                    report.input_rows,
                    normalized.len() + report.rejected_rows + report.duplicates_dropped
                );
                for record in &normalized.records {
                    for (value, column) in record.values.iter().zip(&normalized.columns) {
                        prop_assert!(value.conforms_to(column.column_type));
                        prop_assert!(column.nullable || !value.is_null());
                    }
                }
            }
        }

        #[test]
        fn prop_warehouse_normalization_is_idempotent(values in proptest::collection::vec(raw_value(), 1..8)) {
            for table in WarehouseTable::all() {
                let schema = table.schema();
                let mut raw = Dataset::new(table.as_str());
                for value in &values {
                    raw.push(schema.rules.iter().map(|r| (r.name.clone(), value.clone())).collect());
                }

                let once = normalize(&raw, &schema).unwrap();
                let twice = normalize(&once.to_raw(), &schema).unwrap();
                prop_assert!(once.same_contents(&twice));
            }
        }
    }
}
