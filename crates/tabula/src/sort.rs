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

use crate::data::{ColumnData, Dataset, Value};
use crate::error::{ColumnRole, ProcessingResult, Result, ValidationError, ValidationResult};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

pub const SORT_BY_X: &str = "x_column";
pub const SORT_BY_Y: &str = "y_column";
pub const SORT_BY_COUNT: &str = "count";
pub const COUNT_COLUMN: &str = "Count";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn is_ascending(self) -> bool {
        matches!(self, SortOrder::Asc)
    }
}

impl FromStr for SortOrder {
    type Err = ValidationError;

    fn from_str(s: &str) -> ValidationResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            _ => Err(ValidationError::UnsupportedSortOrder { tag: s.to_string() }),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_ascending() { "asc" } else { "desc" })
    }
}

/// Row limit applied after sorting. Always at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopN(NonZeroUsize);

impl TopN {
    pub fn new(n: i64) -> ValidationResult<Self> {
        usize::try_from(n)
            .ok()
            .and_then(NonZeroUsize::new)
            .map(TopN)
            .ok_or_else(|| ValidationError::InvalidTopN {
                value: n.to_string(),
            })
    }

    pub fn get(self) -> usize {
        self.0.get()
    }

    /// Reads the loosely typed `topN` request field. Integers and integer
    /// strings are accepted; an empty string or null means "no limit".
    pub fn from_json(value: &JsonValue) -> ValidationResult<Option<Self>> {
        let invalid = || ValidationError::InvalidTopN {
            value: value.to_string(),
        };
        match value {
            JsonValue::Null => Ok(None),
            JsonValue::Number(n) => n.as_i64().map(Self::new).ok_or_else(invalid)?.map(Some),
            JsonValue::String(s) if s.trim().is_empty() => Ok(None),
            JsonValue::String(s) => s.parse::<TopN>().map(Some),
            _ => Err(invalid()),
        }
    }
}

impl FromStr for TopN {
    type Err = ValidationError;

    fn from_str(s: &str) -> ValidationResult<Self> {
        s.trim()
            .parse::<i64>()
            .map_err(|_| ValidationError::InvalidTopN {
                value: format!("\"{s}\""),
            })
            .and_then(TopN::new)
    }
}

/// Maps the UI's sort aliases onto real column names; no request means the
/// x column.
pub fn resolve_sort_column(requested: Option<&str>, x_column: &str, y_column: Option<&str>) -> String {
    match requested.map(str::trim).filter(|s| !s.is_empty()) {
        None => x_column.to_string(),
        Some(SORT_BY_X) => x_column.to_string(),
        Some(SORT_BY_Y) => y_column.unwrap_or(SORT_BY_Y).to_string(),
        Some(SORT_BY_COUNT) => COUNT_COLUMN.to_string(),
        Some(other) => other.to_string(),
    }
}

fn compare_cells(a: &Value, b: &Value, order: SortOrder) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ordering = a.compare(b);
            if order.is_ascending() {
                ordering
            } else {
                ordering.reverse()
            }
        }
    }
}

/// Row indices of `table` in sorted order. Stable; nulls go last in both
/// directions.
pub fn sorted_indices(table: &Dataset, column: &str, order: SortOrder) -> ValidationResult<Vec<usize>> {
    let values: Vec<Value> = {
        let col = table
            .get_column(column)
            .ok_or_else(|| ValidationError::missing(column, ColumnRole::Sort))?;
        (0..table.row_count()).map(|i| col.value(i)).collect()
    };
    let mut indices: Vec<usize> = (0..table.row_count()).collect();
    indices.par_sort_by(|&a, &b| compare_cells(&values[a], &values[b], order));
    Ok(indices)
}

/// Sorts the whole table, then keeps the first `top_n` rows.
pub fn sort_and_limit(
    table: &Dataset,
    column: &str,
    order: SortOrder,
    top_n: Option<TopN>,
) -> Result<Dataset> {
    let mut indices = sorted_indices(table, column, order)?;
    if let Some(limit) = top_n {
        indices.truncate(limit.get());
    }
    Ok(take(table, &indices)?)
}

fn take(table: &Dataset, indices: &[usize]) -> ProcessingResult<Dataset> {
    let mut sorted = table.select_rows(indices)?;
    sorted.metadata.name = format!("{}_sorted", table.name());
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Column;
    use serde_json::json;

    fn table() -> Dataset {
        Dataset::from_columns(
            "t",
            vec![
                ("name", Column::from_str_values(vec![Some("c"), Some("a"), Some("d"), Some("b")])),
                ("score", Column::from_i64(vec![Some(2), None, Some(9), Some(5)])),
            ],
        )
        .unwrap()
    }

    fn names(dataset: &Dataset) -> Vec<String> {
        (0..dataset.row_count())
            .map(|i| dataset.value("name", i).to_string())
            .collect()
    }

    #[test]
    fn top_n_accepts_only_positive_integers() {
        assert_eq!(TopN::from_json(&json!(3)).unwrap().map(TopN::get), Some(3));
        assert_eq!(TopN::from_json(&json!("4")).unwrap().map(TopN::get), Some(4));
        assert_eq!(TopN::from_json(&json!(null)).unwrap(), None);
        for bad in [json!(0), json!(-5), json!("abc"), json!(2.5), json!(true), json!([1])] {
            assert!(
                matches!(TopN::from_json(&bad), Err(ValidationError::InvalidTopN { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn sort_order_parsing() {
        assert_eq!("".parse::<SortOrder>().unwrap(), SortOrder::Asc);
        assert_eq!("DESC".parse::<SortOrder>().unwrap(), SortOrder::Desc);
        assert!("sideways".parse::<SortOrder>().is_err());
    }

    #[test]
    fn aliases_resolve_to_columns() {
        assert_eq!(resolve_sort_column(None, "cat", Some("val_sum")), "cat");
        assert_eq!(resolve_sort_column(Some(""), "cat", None), "cat");
        assert_eq!(resolve_sort_column(Some("x_column"), "cat", None), "cat");
        assert_eq!(resolve_sort_column(Some("y_column"), "cat", Some("val_sum")), "val_sum");
        assert_eq!(resolve_sort_column(Some("count"), "cat", Some("Count")), "Count");
        assert_eq!(resolve_sort_column(Some("other"), "cat", None), "other");
    }

    #[test]
    fn nulls_sort_last_in_both_directions() {
        let asc = sort_and_limit(&table(), "score", SortOrder::Asc, None).unwrap();
        assert_eq!(names(&asc), ["c", "b", "d", "a"]);
        let desc = sort_and_limit(&table(), "score", SortOrder::Desc, None).unwrap();
        assert_eq!(names(&desc), ["d", "b", "c", "a"]);
    }

    #[test]
    fn limit_applies_after_sorting() {
        let limited =
            sort_and_limit(&table(), "name", SortOrder::Asc, Some(TopN::new(2).unwrap())).unwrap();
        // the first two source rows are "c" and "a"; sorting first must win
        assert_eq!(names(&limited), ["a", "b"]);
    }

    #[test]
    fn unknown_sort_column_is_rejected() {
        let err = sort_and_limit(&table(), "nope", SortOrder::Asc, None).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }
}
