//! Per-column cleaning rules
//!
//! A [`ColumnRule`] is total over its input domain: every raw value either becomes a typed
//! [`Value`] or a [`Rejection`]. Evaluation order for one value:
//!
//! 1. trim and resolve null sentinels (`""`, `NULL`, `N/A`, ...)
//! 2. apply format repairs in declaration order
//! 3. coerce to the declared type
//! 4. run domain checks
//!
//! Repairs are idempotent so a cleaned value passes through a second cleaning unchanged.
//!
//! A derived column (see [`ColumnRule::derived_from`]) has no source column of its own: when
//! the raw record lacks it, its text is built from other fields of the same record and then
//! cleaned like any other value.

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use retail_common::types::{ColumnDef, ColumnType, RawRecord, RawValue, Value};
use retail_common::{EtlError, Rejection, Result};
use uuid::Uuid;

/// Tokens treated as missing in every column
pub const NULL_SENTINELS: &[&str] = &["", "NULL", "null", "Null", "N/A", "n/a", "NaN", "nan", "None"];

/// Date formats tried in order
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y %B %d", "%B %Y %d", "%Y %b %d", "%d %B %Y"];

/// Datetime formats whose date part is kept
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"];

const TRUE_TOKENS: &[&str] = &["true", "t", "yes", "y", "1"];
const FALSE_TOKENS: &[&str] = &["false", "f", "no", "n", "0"];

/// Grams per ounce divided by 1000
const KG_PER_OZ: f64 = 0.0283495;

/// Format repair applied to the text of a value before coercion
#[derive(Debug, Clone, PartialEq)]
pub enum Repair {
    /// Trim surrounding whitespace again after earlier repairs
    Trim,
    /// Replace every occurrence of a substring
    Replace { from: String, to: String },
    /// Remove every character in the set
    StripChars(String),
    /// Remove everything except ASCII digits
    KeepDigits,
    /// Replace the whole value when it equals `from`
    MapValue { from: String, to: String },
    /// Convert a weight with unit (`kg`, `g`, `ml`, `oz`, optional `N x`) to kilograms
    WeightToKg,
}

impl Repair {
    pub fn replace(from: &str, to: &str) -> Self {
        Repair::Replace {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn strip(chars: &str) -> Self {
        Repair::StripChars(chars.to_string())
    }

    pub fn map(from: &str, to: &str) -> Self {
        Repair::MapValue {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn apply(&self, text: &str) -> String {
        match self {
            Repair::Trim => text.trim().to_string(),
            Repair::Replace { from, to } if !from.is_empty() => {
                let mut out = text.replace(from.as_str(), to);
                // Repeat while shrinking so "@@@@" settles on "@"
                while to.len() < from.len() && out.contains(from.as_str()) {
                    out = out.replace(from.as_str(), to);
                }
                out
            },
            Repair::Replace { .. } => text.to_string(),
            Repair::StripChars(set) => text.chars().filter(|c| !set.contains(*c)).collect(),
            Repair::KeepDigits => text.chars().filter(|c| c.is_ascii_digit()).collect(),
            Repair::MapValue { from, to } if text == from => to.clone(),
            Repair::MapValue { .. } => text.to_string(),
            Repair::WeightToKg => match weight_to_kg(text) {
                Some(kg) => kg.to_string(),
                None => text.to_string(),
            },
        }
    }
}

/// Parse a product weight into kilograms.
///
/// A bare number is taken to be kilograms already.
pub fn weight_to_kg(text: &str) -> Option<f64> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    let compact = compact.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());

    let kg = if let Ok(value) = compact.parse::<f64>() {
        value
    } else if let Some((count, unit_weight)) = compact.split_once('x') {
        count.parse::<f64>().ok()? * unit_to_kg(unit_weight)?
    } else {
        unit_to_kg(compact)?
    };

    if !kg.is_finite() {
        return None;
    }
    if kg.abs() >= 1e9 {
        return Some(kg);
    }
    Some((kg * 1_000_000.0).round() / 1_000_000.0)
}

fn unit_to_kg(text: &str) -> Option<f64> {
    if let Some(n) = text.strip_suffix("kg") {
        n.parse::<f64>().ok()
    } else if let Some(n) = text.strip_suffix("ml") {
        n.parse::<f64>().ok().map(|v| v / 1000.0)
    } else if let Some(n) = text.strip_suffix("oz") {
        n.parse::<f64>().ok().map(|v| v * KG_PER_OZ)
    } else if let Some(n) = text.strip_suffix('g') {
        n.parse::<f64>().ok().map(|v| v / 1000.0)
    } else {
        None
    }
}

/// Target type of a column
#[derive(Debug, Clone, PartialEq)]
pub enum Coercion {
    Text,
    Integer,
    Float,
    Date,
    Timestamp,
    /// Extra tokens are matched case-insensitively in addition to the defaults
    Boolean {
        true_tokens: Vec<String>,
        false_tokens: Vec<String>,
    },
    Uuid,
    Category(Vec<String>),
}

impl Coercion {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Coercion::Text => ColumnType::Text,
            Coercion::Integer => ColumnType::Integer,
            Coercion::Float => ColumnType::Float,
            Coercion::Date => ColumnType::Date,
            Coercion::Timestamp => ColumnType::Timestamp,
            Coercion::Boolean { .. } => ColumnType::Boolean,
            Coercion::Uuid => ColumnType::Uuid,
            Coercion::Category(_) => ColumnType::Category,
        }
    }

    fn coerce(&self, text: &str) -> std::result::Result<Value, Rejection> {
        let fail = || Rejection::Coercion {
            expected: self.column_type().to_string(),
            value: text.to_string(),
        };

        match self {
            Coercion::Text => Ok(Value::Text(text.to_string())),
            Coercion::Integer => parse_integer(text).map(Value::Integer).ok_or_else(fail),
            Coercion::Float => text
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::Float)
                .ok_or_else(fail),
            Coercion::Date => parse_date(text).map(Value::Date).ok_or_else(fail),
            Coercion::Timestamp => parse_timestamp(text).map(Value::Timestamp).ok_or_else(fail),
            Coercion::Boolean {
                true_tokens,
                false_tokens,
            } => {
                let matches = |defaults: &[&str], extra: &[String]| {
                    defaults.iter().any(|t| t.eq_ignore_ascii_case(text))
                        || extra.iter().any(|t| t.eq_ignore_ascii_case(text))
                };
                if matches(TRUE_TOKENS, true_tokens) {
                    Ok(Value::Boolean(true))
                } else if matches(FALSE_TOKENS, false_tokens) {
                    Ok(Value::Boolean(false))
                } else {
                    Err(fail())
                }
            },
            Coercion::Uuid => Uuid::parse_str(text).map(Value::Uuid).map_err(|_| fail()),
            Coercion::Category(allowed) => {
                if allowed.iter().any(|a| a == text) {
                    Ok(Value::Category(text.to_string()))
                } else {
                    Err(Rejection::Domain(format!("'{}' is not a known category", text)))
                }
            },
        }
    }
}

/// Accepts plain integers and integral floats such as `3.0`
pub fn parse_integer(text: &str) -> Option<i64> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(i);
    }
    let f = text.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Parse a date using the allow-listed formats
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
        })
}

/// Parse a date and time of day
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

/// Domain constraint checked after coercion
#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    Min(f64),
    Max(f64),
    /// Exact length in characters of the rendered value
    Length(usize),
    /// Regex the rendered value must match
    Pattern(String),
}

/// Cleaning rule for one destination column
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnRule {
    pub name: String,
    /// Source column names tried when `name` is absent from the raw record
    pub aliases: Vec<String>,
    pub coercion: Coercion,
    pub nullable: bool,
    /// Column-specific tokens treated as missing
    pub null_tokens: Vec<String>,
    pub repairs: Vec<Repair>,
    pub checks: Vec<Check>,
    /// Template such as `{year}-{month}-{day}` filled from the record when the column is absent
    pub derived: Option<String>,
}

impl ColumnRule {
    pub fn new(name: &str, coercion: Coercion) -> Self {
        Self {
            name: name.to_string(),
            aliases: Vec::new(),
            coercion,
            nullable: false,
            null_tokens: Vec::new(),
            repairs: Vec::new(),
            checks: Vec::new(),
            derived: None,
        }
    }

    pub fn text(name: &str) -> Self {
        Self::new(name, Coercion::Text)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, Coercion::Integer)
    }

    pub fn float(name: &str) -> Self {
        Self::new(name, Coercion::Float)
    }

    pub fn date(name: &str) -> Self {
        Self::new(name, Coercion::Date)
    }

    pub fn timestamp(name: &str) -> Self {
        Self::new(name, Coercion::Timestamp)
    }

    pub fn uuid(name: &str) -> Self {
        Self::new(name, Coercion::Uuid)
    }

    pub fn boolean(name: &str, true_tokens: &[&str], false_tokens: &[&str]) -> Self {
        let owned = |tokens: &[&str]| tokens.iter().map(|t| t.to_string()).collect();
        Self::new(
            name,
            Coercion::Boolean {
                true_tokens: owned(true_tokens),
                false_tokens: owned(false_tokens),
            },
        )
    }

    pub fn category(name: &str, allowed: &[&str]) -> Self {
        Self::new(
            name,
            Coercion::Category(allowed.iter().map(|a| a.to_string()).collect()),
        )
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn null_token(mut self, token: &str) -> Self {
        self.null_tokens.push(token.to_string());
        self
    }

    pub fn repair(mut self, repair: Repair) -> Self {
        self.repairs.push(repair);
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    pub fn derived_from(mut self, template: &str) -> Self {
        self.derived = Some(template.to_string());
        self
    }

    /// Fill the derivation template from `record`.
    ///
    /// `None` when the rule is not derived or a referenced field is missing or null.
    pub fn derive(&self, record: &RawRecord) -> Option<RawValue> {
        let template = self.derived.as_deref()?;
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let end = start + rest[start..].find('}')?;
            let field = record.get(&rest[start + 1..end])?.as_text()?;
            out.push_str(field.trim());
            rest = &rest[end + 1..];
        }
        out.push_str(rest);
        Some(RawValue::Text(out))
    }

    pub fn column_def(&self) -> ColumnDef {
        ColumnDef {
            name: self.name.clone(),
            column_type: self.coercion.column_type(),
            nullable: self.nullable,
        }
    }

    /// Compile regex checks, failing on an invalid pattern
    pub fn prepare(&self) -> Result<PreparedRule<'_>> {
        let patterns = self
            .checks
            .iter()
            .filter_map(|check| match check {
                Check::Pattern(p) => Some(p),
                _ => None,
            })
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    EtlError::Config(format!("invalid pattern for column '{}': {}", self.name, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(PreparedRule {
            rule: self,
            patterns,
        })
    }
}

/// A [`ColumnRule`] with its patterns compiled
pub struct PreparedRule<'a> {
    pub rule: &'a ColumnRule,
    patterns: Vec<Regex>,
}

impl PreparedRule<'_> {
    fn is_sentinel(&self, text: &str) -> bool {
        NULL_SENTINELS.contains(&text) || self.rule.null_tokens.iter().any(|t| t == text)
    }

    fn missing(&self) -> std::result::Result<Value, Rejection> {
        if self.rule.nullable {
            Ok(Value::Null)
        } else {
            Err(Rejection::Missing)
        }
    }

    /// Clean one raw value
    pub fn apply(&self, raw: Option<&RawValue>) -> std::result::Result<Value, Rejection> {
        let text = match raw.and_then(RawValue::as_text) {
            Some(text) => text,
            None => return self.missing(),
        };

        let trimmed = text.trim();
        if self.is_sentinel(trimmed) {
            return self.missing();
        }

        let repaired = self
            .rule
            .repairs
            .iter()
            .fold(trimmed.to_string(), |acc, repair| repair.apply(&acc));
        let repaired = repaired.trim();
        if self.is_sentinel(repaired) {
            return self.missing();
        }

        let value = self.rule.coercion.coerce(repaired)?;
        self.check(&value)?;
        Ok(value)
    }

    fn check(&self, value: &Value) -> std::result::Result<(), Rejection> {
        let numeric = match value {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        };
        let rendered = value.render().unwrap_or_default();
        let mut patterns = self.patterns.iter();

        for check in &self.rule.checks {
            match check {
                Check::Min(min) => {
                    if numeric.is_some_and(|n| n < *min) {
                        return Err(Rejection::Domain(format!("{} is below {}", rendered, min)));
                    }
                },
                Check::Max(max) => {
                    if numeric.is_some_and(|n| n > *max) {
                        return Err(Rejection::Domain(format!("{} is above {}", rendered, max)));
                    }
                },
                Check::Length(len) => {
                    if rendered.chars().count() != *len {
                        return Err(Rejection::Domain(format!(
                            "'{}' is not {} characters long",
                            rendered, len
                        )));
                    }
                },
                Check::Pattern(p) => {
                    let matched = patterns.next().is_some_and(|re| re.is_match(&rendered));
                    if !matched {
                        return Err(Rejection::Domain(format!("'{}' does not match {}", rendered, p)));
                    }
                },
            }
        }

        Ok(())
    }
}
