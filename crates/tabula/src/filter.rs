// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::data::{Column, ColumnData, Dataset, Value};
use crate::error::{ColumnRole, Result, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// A filter as it arrives in a request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFilter {
    pub column: String,
    pub operator: String,
    #[serde(default)]
    pub value: JsonValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,
    Contains,
    Between,
}

impl FilterOperator {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterOperator::Equal => "==",
            FilterOperator::NotEqual => "!=",
            FilterOperator::GreaterThan => ">",
            FilterOperator::LessThan => "<",
            FilterOperator::Contains => "contains",
            FilterOperator::Between => "between",
        }
    }

    /// Operators that compare magnitudes and so need a numeric column.
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            FilterOperator::GreaterThan | FilterOperator::LessThan | FilterOperator::Between
        )
    }
}

impl FromStr for FilterOperator {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "==" | "=" => Ok(FilterOperator::Equal),
            "!=" => Ok(FilterOperator::NotEqual),
            ">" => Ok(FilterOperator::GreaterThan),
            "<" => Ok(FilterOperator::LessThan),
            "contains" => Ok(FilterOperator::Contains),
            "between" => Ok(FilterOperator::Between),
            _ => Err(format!("unsupported operator '{s}'")),
        }
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Range(f64, f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub operator: FilterOperator,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(
        column: impl Into<String>,
        operator: FilterOperator,
        value: FilterValue,
    ) -> ValidationResult<Self> {
        let column = column.into();
        let invalid = |reason: &str| ValidationError::InvalidFilter {
            column: column.clone(),
            reason: reason.to_string(),
        };
        match (operator, &value) {
            (FilterOperator::Between, FilterValue::Range(lo, hi)) if lo > hi => {
                return Err(invalid("range bounds are reversed"))
            }
            (FilterOperator::Between, FilterValue::Range(..)) => {}
            (FilterOperator::Between, _) => return Err(invalid("between expects [low, high]")),
            (FilterOperator::GreaterThan | FilterOperator::LessThan, FilterValue::Number(_)) => {}
            (FilterOperator::GreaterThan | FilterOperator::LessThan, _) => {
                return Err(invalid("comparison needs a numeric value"))
            }
            (FilterOperator::Contains, FilterValue::Text(_)) => {}
            (FilterOperator::Contains, _) => return Err(invalid("contains needs a text value")),
            (FilterOperator::Equal | FilterOperator::NotEqual, FilterValue::Range(..)) => {
                return Err(invalid("equality needs a single value"))
            }
            (FilterOperator::Equal | FilterOperator::NotEqual, _) => {}
        }
        Ok(Self {
            column,
            operator,
            value,
        })
    }

    /// Checks the filter against the columns it will run on.
    pub fn check(&self, dataset: &Dataset) -> ValidationResult<()> {
        let column = dataset
            .get_column(&self.column)
            .ok_or_else(|| ValidationError::missing(self.column.as_str(), ColumnRole::Filter))?;
        if self.operator.is_ordering() && !column.is_numeric() {
            return Err(ValidationError::non_numeric(self.column.as_str(), ColumnRole::Filter));
        }
        Ok(())
    }

    fn compile<'a>(&self, dataset: &'a Dataset) -> ValidationResult<CompiledPredicate<'a>> {
        self.check(dataset)?;
        let column = dataset
            .get_column(&self.column)
            .ok_or_else(|| ValidationError::missing(self.column.as_str(), ColumnRole::Filter))?;
        Ok(match (self.operator, &self.value) {
            (FilterOperator::Equal, value) => CompiledPredicate::Equal(column, value.clone()),
            (FilterOperator::NotEqual, value) => CompiledPredicate::NotEqual(column, value.clone()),
            (FilterOperator::GreaterThan, FilterValue::Number(n)) => {
                CompiledPredicate::GreaterThan(column, *n)
            }
            (FilterOperator::LessThan, FilterValue::Number(n)) => {
                CompiledPredicate::LessThan(column, *n)
            }
            (FilterOperator::Between, FilterValue::Range(lo, hi)) => {
                CompiledPredicate::Between(column, *lo, *hi)
            }
            (FilterOperator::Contains, FilterValue::Text(needle)) => {
                CompiledPredicate::Contains(column, needle.to_lowercase())
            }
            _ => {
                return Err(ValidationError::InvalidFilter {
                    column: self.column.clone(),
                    reason: format!("value does not fit operator '{}'", self.operator),
                })
            }
        })
    }
}

impl TryFrom<RawFilter> for Filter {
    type Error = ValidationError;

    fn try_from(raw: RawFilter) -> ValidationResult<Self> {
        let invalid = |reason: String| ValidationError::InvalidFilter {
            column: raw.column.clone(),
            reason,
        };
        if raw.column.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "filters[].column".to_string(),
            });
        }
        let operator: FilterOperator = raw.operator.parse().map_err(invalid)?;
        let value = match (operator, &raw.value) {
            (FilterOperator::Between, JsonValue::Array(bounds)) if bounds.len() == 2 => {
                match (json_number(&bounds[0]), json_number(&bounds[1])) {
                    (Some(lo), Some(hi)) => FilterValue::Range(lo, hi),
                    _ => return Err(invalid("range bounds must be numbers".to_string())),
                }
            }
            (FilterOperator::Between, _) => {
                return Err(invalid("between expects [low, high]".to_string()))
            }
            (FilterOperator::GreaterThan | FilterOperator::LessThan, v) => json_number(v)
                .map(FilterValue::Number)
                .ok_or_else(|| invalid("comparison needs a numeric value".to_string()))?,
            (_, JsonValue::String(s)) => FilterValue::Text(s.clone()),
            (FilterOperator::Contains, JsonValue::Number(n)) => FilterValue::Text(n.to_string()),
            (_, JsonValue::Number(n)) => n
                .as_f64()
                .map(FilterValue::Number)
                .ok_or_else(|| invalid("number out of range".to_string()))?,
            (_, JsonValue::Bool(b)) => FilterValue::Boolean(*b),
            (_, other) => return Err(invalid(format!("unsupported value {other}"))),
        };
        Filter::new(raw.column.trim(), operator, value)
    }
}

fn json_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug)]
enum CompiledPredicate<'a> {
    Equal(&'a Column, FilterValue),
    NotEqual(&'a Column, FilterValue),
    GreaterThan(&'a Column, f64),
    LessThan(&'a Column, f64),
    Between(&'a Column, f64, f64),
    Contains(&'a Column, String),
}

impl CompiledPredicate<'_> {
    fn evaluate(&self, index: usize) -> bool {
        match self {
            CompiledPredicate::Equal(column, value) => cell_equals(&column.value(index), value),
            CompiledPredicate::NotEqual(column, value) => {
                let cell = column.value(index);
                !cell.is_null() && !cell_equals(&cell, value)
            }
            CompiledPredicate::GreaterThan(column, n) => {
                column.to_f64(index).is_some_and(|v| v > *n)
            }
            CompiledPredicate::LessThan(column, n) => column.to_f64(index).is_some_and(|v| v < *n),
            CompiledPredicate::Between(column, lo, hi) => column
                .to_f64(index)
                .is_some_and(|v| *lo <= v && v <= *hi),
            CompiledPredicate::Contains(column, needle) => column
                .get_string(index)
                .is_some_and(|s| s.to_lowercase().contains(needle.as_str())),
        }
    }
}

fn cell_equals(cell: &Value, value: &FilterValue) -> bool {
    match (cell, value) {
        (Value::Null, _) => false,
        (Value::Boolean(b), FilterValue::Boolean(v)) => b == v,
        (_, FilterValue::Number(n)) => match cell.as_f64() {
            Some(v) => v == *n,
            None => cell.to_string() == n.to_string(),
        },
        (_, FilterValue::Text(t)) => cell.to_string() == *t,
        (_, FilterValue::Boolean(v)) => cell.to_string().eq_ignore_ascii_case(&v.to_string()),
        (_, FilterValue::Range(..)) => false,
    }
}

/// Keeps the rows that match every filter.
pub fn apply_filters(dataset: &Dataset, filters: &[Filter]) -> Result<Dataset> {
    if filters.is_empty() {
        return Ok(dataset.clone());
    }
    let predicates = filters
        .iter()
        .map(|filter| filter.compile(dataset))
        .collect::<ValidationResult<Vec<_>>>()?;
    let mut filtered = dataset.filter(|i| predicates.iter().all(|p| p.evaluate(i)))?;
    filtered.metadata.name = format!("{}_filtered", dataset.name());
    Ok(filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset() -> Dataset {
        Dataset::from_columns(
            "f",
            vec![
                (
                    "city",
                    Column::from_str_values(vec![Some("Oslo"), Some("Bergen"), None, Some("OSLO")]),
                ),
                ("pop", Column::from_i64(vec![Some(700), Some(290), Some(50), None])),
                ("coastal", Column::Boolean(vec![Some(true), Some(true), Some(false), None].into())),
            ],
        )
        .unwrap()
    }

    fn raw(column: &str, operator: &str, value: JsonValue) -> RawFilter {
        RawFilter {
            column: column.to_string(),
            operator: operator.to_string(),
            value,
        }
    }

    fn run(filters: Vec<RawFilter>) -> Result<Dataset> {
        let filters: Vec<Filter> = filters
            .into_iter()
            .map(Filter::try_from)
            .collect::<ValidationResult<_>>()?;
        apply_filters(&dataset(), &filters)
    }

    #[test]
    fn filters_combine_with_and() {
        let out = run(vec![
            raw("pop", ">", json!(100)),
            raw("city", "contains", json!("os")),
        ])
        .unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(out.value("pop", 0), Value::Int64(700));
    }

    #[test]
    fn between_is_inclusive_and_skips_nulls() {
        let out = run(vec![raw("pop", "between", json!([50, 290]))]).unwrap();
        assert_eq!(out.row_count(), 2);
        let out = run(vec![raw("pop", "!=", json!(700))]).unwrap();
        assert_eq!(out.row_count(), 2);
    }

    #[test]
    fn equality_on_text_and_booleans() {
        assert_eq!(run(vec![raw("city", "==", json!("Oslo"))]).unwrap().row_count(), 1);
        assert_eq!(run(vec![raw("coastal", "==", json!(true))]).unwrap().row_count(), 2);
        assert_eq!(run(vec![raw("pop", "==", json!("290"))]).unwrap().row_count(), 1);
    }

    #[test]
    fn bad_filters_are_validation_errors() {
        for filters in [
            vec![raw("pop", "~", json!(1))],
            vec![raw("pop", "between", json!([9, 1]))],
            vec![raw("pop", ">", json!("many"))],
            vec![raw("city", ">", json!(3))],
            vec![raw("nope", "==", json!(3))],
        ] {
            let err = run(filters).unwrap_err();
            assert_eq!(err.status_code(), 400, "{err}");
        }
    }

    #[test]
    fn no_filters_keeps_every_row() {
        assert_eq!(apply_filters(&dataset(), &[]).unwrap().row_count(), 4);
    }
}
