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
use crate::error::{
    utils::malformed, ColumnRole, ProcessingError, ProcessingResult, Result, ValidationError,
    ValidationResult,
};
use crate::sort::COUNT_COLUMN;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    None,
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl Aggregation {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::None => "none",
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Count => "count",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }

    /// Reductions that read a numeric value column.
    pub fn is_numeric_reduction(self) -> bool {
        matches!(
            self,
            Aggregation::Sum | Aggregation::Avg | Aggregation::Min | Aggregation::Max
        )
    }

    pub fn groups_rows(self) -> bool {
        self != Aggregation::None
    }

    /// Name of the reduced column in the aggregated table.
    pub fn output_column(self, value_column: Option<&str>) -> Option<String> {
        match self {
            Aggregation::None => value_column.map(str::to_string),
            Aggregation::Count => Some(COUNT_COLUMN.to_string()),
            _ => value_column.map(|col| format!("{col}_{}", self.as_str())),
        }
    }
}

impl FromStr for Aggregation {
    type Err = ValidationError;

    fn from_str(s: &str) -> ValidationResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Aggregation::None),
            "sum" => Ok(Aggregation::Sum),
            "avg" => Ok(Aggregation::Avg),
            "count" => Ok(Aggregation::Count),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            _ => Err(ValidationError::UnsupportedAggregation { tag: s.to_string() }),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A table ready for sorting and charting, plus how it was derived.
#[derive(Debug, Clone)]
pub struct AggregatedTable {
    pub table: Dataset,
    /// Columns the rows were grouped by; empty when nothing was grouped.
    pub group_keys: Vec<String>,
    /// The column holding y values, after any renaming.
    pub value_column: Option<String>,
    pub aggregation: Aggregation,
}

impl AggregatedTable {
    pub fn passthrough(table: Dataset) -> Self {
        Self {
            table,
            group_keys: Vec::new(),
            value_column: None,
            aggregation: Aggregation::None,
        }
    }

    pub fn with_value_column(mut self, value_column: Option<String>) -> Self {
        self.value_column = value_column;
        self
    }

    /// Same derivation, different rows (after sorting or limiting).
    pub fn with_table(mut self, table: Dataset) -> Self {
        self.table = table;
        self
    }

    pub fn is_grouped(&self) -> bool {
        self.aggregation.groups_rows()
    }

    pub fn row_count(&self) -> usize {
        self.table.row_count()
    }
}

#[derive(Debug)]
pub struct Aggregator {
    parallel_threshold: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            parallel_threshold: 10000,
        }
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.parallel_threshold = threshold;
        self
    }

    pub fn aggregate(
        &self,
        dataset: &Dataset,
        keys: &[String],
        value_column: Option<&str>,
        aggregation: Aggregation,
    ) -> Result<AggregatedTable> {
        if aggregation == Aggregation::None {
            return Ok(AggregatedTable::passthrough(dataset.clone())
                .with_value_column(value_column.map(str::to_string)));
        }

        let mut unique_keys: Vec<String> = Vec::with_capacity(keys.len());
        for key in keys {
            if !unique_keys.contains(key) {
                unique_keys.push(key.clone());
            }
        }
        let key_columns: Vec<&Column> = unique_keys
            .iter()
            .map(|key| {
                dataset
                    .get_column(key)
                    .ok_or_else(|| ValidationError::missing(key.as_str(), ColumnRole::X))
            })
            .collect::<ValidationResult<_>>()?;

        let reduced_input = match (aggregation, value_column) {
            (Aggregation::Count, _) => None,
            (_, Some(name)) => {
                let column = dataset
                    .get_column(name)
                    .ok_or_else(|| ValidationError::missing(name, ColumnRole::Y))?;
                if !column.is_numeric() {
                    return Err(ValidationError::non_numeric(name, ColumnRole::Y).into());
                }
                Some((name, column))
            }
            (_, None) => {
                return Err(ValidationError::MissingRole {
                    role: ColumnRole::Y,
                    requirement: format!("'{aggregation}' aggregation"),
                }
                .into())
            }
        };

        let groups = build_groups(&key_columns, dataset.row_count());
        debug!(
            dataset = dataset.name(),
            keys = ?unique_keys,
            groups = groups.len(),
            %aggregation,
            "rows grouped"
        );

        let representatives: Vec<usize> = groups.iter().map(|g| g[0]).collect();
        let mut result = Dataset::new(crate::data::DatasetMetadata::named(format!(
            "{}_grouped",
            dataset.name()
        )));
        for (name, column) in unique_keys.iter().zip(&key_columns) {
            result.add_column(name.clone(), column.select_rows(&representatives)?)?;
        }

        let output_name = aggregation
            .output_column(value_column)
            .ok_or_else(|| malformed("aggregation produced no output column"))?;
        if result.has_column(&output_name) {
            return Err(ValidationError::ColumnConflict {
                column: output_name,
            }
            .into());
        }
        let reduced = match reduced_input {
            None => Column::from_i64(
                self.map_groups(&groups, dataset.row_count(), |g| Some(g.len() as i64)),
            ),
            Some((name, column)) => self.reduce(name, column, &groups, dataset.row_count(), aggregation)?,
        };
        result.add_column(output_name.clone(), reduced)?;

        Ok(AggregatedTable {
            table: result,
            group_keys: unique_keys,
            value_column: Some(output_name),
            aggregation,
        })
    }

    fn map_groups<T, F>(&self, groups: &[Vec<usize>], rows: usize, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&[usize]) -> T + Send + Sync,
    {
        if rows > self.parallel_threshold {
            groups.par_iter().map(|g| f(g)).collect()
        } else {
            groups.iter().map(|g| f(g)).collect()
        }
    }

    fn reduce(
        &self,
        name: &str,
        column: &Column,
        groups: &[Vec<usize>],
        rows: usize,
        aggregation: Aggregation,
    ) -> ProcessingResult<Column> {
        match (aggregation, column) {
            (Aggregation::Avg, _) => Ok(Column::from_f64(self.map_groups(groups, rows, |g| {
                let values = column.numeric_values(g);
                (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
            }))),
            (Aggregation::Sum, Column::Int64(data)) => {
                let sums: Vec<Option<Option<i64>>> = self.map_groups(groups, rows, |g| {
                    present(data, g).try_fold(None, |acc: Option<i64>, v| {
                        Some(Some(acc.unwrap_or(0).checked_add(v)?))
                    })
                });
                let sums: Option<Vec<Option<i64>>> = sums.into_iter().collect();
                sums.map(Column::from_i64).ok_or_else(|| ProcessingError::Overflow {
                    column: name.to_string(),
                })
            }
            (Aggregation::Sum, Column::Float64(data)) => {
                Ok(Column::from_f64(self.map_groups(groups, rows, |g| {
                    present(data, g).fold(None, |acc: Option<f64>, v| Some(acc.unwrap_or(0.0) + v))
                })))
            }
            (Aggregation::Min, Column::Int64(data)) => Ok(Column::from_i64(
                self.map_groups(groups, rows, |g| present(data, g).min()),
            )),
            (Aggregation::Max, Column::Int64(data)) => Ok(Column::from_i64(
                self.map_groups(groups, rows, |g| present(data, g).max()),
            )),
            (Aggregation::Min, Column::Float64(data)) => Ok(Column::from_f64(
                self.map_groups(groups, rows, |g| present(data, g).reduce(f64::min)),
            )),
            (Aggregation::Max, Column::Float64(data)) => Ok(Column::from_f64(
                self.map_groups(groups, rows, |g| present(data, g).reduce(f64::max)),
            )),
            _ => Err(malformed(format!(
                "cannot apply '{aggregation}' to {} column '{name}'",
                column.data_type()
            ))),
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn present<'a, T: Copy>(data: &'a [Option<T>], rows: &'a [usize]) -> impl Iterator<Item = T> + 'a {
    rows.iter().filter_map(move |&i| data.get(i).copied().flatten())
}

/// Row indices per distinct key, in order of first appearance. Rows with a
/// null in any key column belong to no group.
fn build_groups(key_columns: &[&Column], row_count: usize) -> Vec<Vec<usize>> {
    let mut slots: HashMap<Vec<String>, usize> = HashMap::new();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    'rows: for row in 0..row_count {
        let mut key = Vec::with_capacity(key_columns.len());
        for column in key_columns {
            match key_part(column, row) {
                Some(part) => key.push(part),
                None => continue 'rows,
            }
        }
        let next = groups.len();
        let slot = *slots.entry(key).or_insert(next);
        if slot == next {
            groups.push(Vec::new());
        }
        groups[slot].push(row);
    }
    groups
}

/// Text identity of a key cell. `-0.0` and `0.0` land in the same group.
fn key_part(column: &Column, row: usize) -> Option<String> {
    match column.value(row) {
        Value::Null => None,
        Value::Float64(v) if v == 0.0 => Some(0.0f64.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DataType, Value};
    use std::sync::Arc;

    fn dataset() -> Dataset {
        Dataset::from_columns(
            "d",
            vec![
                ("cat", Column::from_str_values(vec![Some("B"), Some("A"), Some("B"), None, Some("A")])),
                ("val", Column::from_i64(vec![Some(1), None, Some(3), Some(7), None])),
                ("price", Column::from_f64(vec![Some(1.5), Some(2.0), None, Some(4.0), Some(3.0)])),
                ("label", Column::from_str_values(vec![Some("x"); 5])),
            ],
        )
        .unwrap()
    }

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn text(s: &str) -> Value {
        Value::String(Arc::from(s))
    }

    #[test]
    fn count_groups_in_first_appearance_order() {
        let out = Aggregator::new()
            .aggregate(&dataset(), &keys(&["cat"]), None, Aggregation::Count)
            .unwrap();
        assert_eq!(out.table.column_names(), &keys(&["cat", "Count"]));
        assert_eq!(out.table.value("cat", 0), text("B"));
        assert_eq!(out.table.value("Count", 0), Value::Int64(2));
        assert_eq!(out.table.value("Count", 1), Value::Int64(2));
        // the null key row is dropped
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.value_column.as_deref(), Some("Count"));
    }

    #[test]
    fn nulls_are_excluded_from_reductions() {
        let source = Dataset::from_columns(
            "n",
            vec![
                ("k", Column::from_str_values(vec![Some("a"); 3])),
                ("v", Column::from_i64(vec![Some(1), None, Some(3)])),
            ],
        )
        .unwrap();
        let agg = Aggregator::new();
        let sum = agg.aggregate(&source, &keys(&["k"]), Some("v"), Aggregation::Sum).unwrap();
        assert_eq!(sum.table.value("v_sum", 0), Value::Int64(4));
        let avg = agg.aggregate(&source, &keys(&["k"]), Some("v"), Aggregation::Avg).unwrap();
        assert_eq!(avg.table.value("v_avg", 0), Value::Float64(2.0));
    }

    #[test]
    fn all_null_group_reduces_to_null() {
        let out = Aggregator::new()
            .aggregate(&dataset(), &keys(&["cat"]), Some("val"), Aggregation::Max)
            .unwrap();
        assert_eq!(out.table.column_type("val_max"), Some(DataType::Int64));
        assert_eq!(out.table.value("val_max", 0), Value::Int64(3));
        assert!(out.table.value("val_max", 1).is_null());
    }

    #[test]
    fn signed_zero_keys_share_a_group() {
        let source = Dataset::from_columns(
            "z",
            vec![
                ("k", Column::from_f64(vec![Some(0.0), Some(-0.0), Some(1.0)])),
                ("v", Column::from_i64(vec![Some(2), Some(5), Some(1)])),
            ],
        )
        .unwrap();
        let out = Aggregator::new()
            .aggregate(&source, &keys(&["k"]), Some("v"), Aggregation::Sum)
            .unwrap();
        assert_eq!(out.row_count(), 2);
        assert_eq!(out.table.value("v_sum", 0), Value::Int64(7));
    }

    #[test]
    fn float_min_and_two_key_grouping() {
        let out = Aggregator::new()
            .aggregate(&dataset(), &keys(&["cat", "label"]), Some("price"), Aggregation::Min)
            .unwrap();
        assert_eq!(out.group_keys, keys(&["cat", "label"]));
        assert_eq!(out.table.value("price_min", 0), Value::Float64(1.5));
        assert_eq!(out.table.value("price_min", 1), Value::Float64(2.0));
    }

    #[test]
    fn parallel_path_matches_sequential() {
        let source = dataset();
        let seq = Aggregator::new()
            .aggregate(&source, &keys(&["cat"]), Some("price"), Aggregation::Sum)
            .unwrap();
        let par = Aggregator::new()
            .with_parallel_threshold(0)
            .aggregate(&source, &keys(&["cat"]), Some("price"), Aggregation::Sum)
            .unwrap();
        for row in 0..seq.row_count() {
            assert_eq!(seq.table.value("price_sum", row), par.table.value("price_sum", row));
        }
    }

    #[test]
    fn reductions_need_numeric_values() {
        let err = Aggregator::new()
            .aggregate(&dataset(), &keys(&["cat"]), Some("label"), Aggregation::Sum)
            .unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Y column 'label' is non-numeric");
        let err = Aggregator::new()
            .aggregate(&dataset(), &keys(&["cat"]), None, Aggregation::Avg)
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn integer_overflow_is_reported() {
        let source = Dataset::from_columns(
            "o",
            vec![
                ("k", Column::from_str_values(vec![Some("a"); 2])),
                ("v", Column::from_i64(vec![Some(i64::MAX), Some(1)])),
            ],
        )
        .unwrap();
        let err = Aggregator::new()
            .aggregate(&source, &keys(&["k"]), Some("v"), Aggregation::Sum)
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn none_passes_the_table_through() {
        let source = dataset();
        let out = Aggregator::new()
            .aggregate(&source, &keys(&["cat"]), Some("val"), Aggregation::None)
            .unwrap();
        assert!(!out.is_grouped());
        assert_eq!(out.row_count(), source.row_count());
        assert_eq!(out.value_column.as_deref(), Some("val"));
    }

    #[test]
    fn aggregation_names() {
        assert_eq!("AVG".parse::<Aggregation>().unwrap(), Aggregation::Avg);
        assert_eq!("".parse::<Aggregation>().unwrap(), Aggregation::None);
        assert!("median".parse::<Aggregation>().is_err());
        assert_eq!(Aggregation::Avg.output_column(Some("val")).as_deref(), Some("val_avg"));
        assert_eq!(Aggregation::Count.output_column(None).as_deref(), Some("Count"));
    }
}
