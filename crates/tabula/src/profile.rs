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

use crate::data::{Column, ColumnData, Dataset};
use rayon::prelude::*;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashSet};

pub const DEFAULT_PREVIEW_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSummary {
    #[serde(rename = "type")]
    pub data_type: &'static str,
    pub missing: usize,
    pub unique: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
}

/// What a client needs to populate its column pickers.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetProfile {
    pub filename: String,
    pub columns: Vec<String>,
    pub dtypes: BTreeMap<String, &'static str>,
    pub row_count: usize,
    pub preview: Vec<Map<String, JsonValue>>,
    pub column_stats: BTreeMap<String, ColumnSummary>,
}

impl DatasetProfile {
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| matches!(self.dtypes.get(*c), Some(&"integer") | Some(&"decimal")))
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct Profiler {
    preview_rows: usize,
}

impl Profiler {
    pub fn new() -> Self {
        Self {
            preview_rows: DEFAULT_PREVIEW_ROWS,
        }
    }

    pub fn with_preview_rows(mut self, rows: usize) -> Self {
        self.preview_rows = rows;
        self
    }

    pub fn profile(&self, filename: &str, dataset: &Dataset) -> DatasetProfile {
        let column_stats: BTreeMap<String, ColumnSummary> = dataset
            .column_names()
            .par_iter()
            .filter_map(|name| {
                let column = dataset.get_column(name)?;
                Some((name.clone(), summarize(column)))
            })
            .collect();
        let dtypes = column_stats
            .iter()
            .map(|(name, summary)| (name.clone(), summary.data_type))
            .collect();
        DatasetProfile {
            filename: filename.to_string(),
            columns: dataset.column_names().to_vec(),
            dtypes,
            row_count: dataset.row_count(),
            preview: dataset.records(self.preview_rows),
            column_stats,
        }
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new()
    }
}

pub fn summarize(column: &Column) -> ColumnSummary {
    let unique = (0..column.len())
        .filter_map(|i| column.get_string(i))
        .collect::<HashSet<_>>()
        .len();
    let mut summary = ColumnSummary {
        data_type: column.data_type().label(),
        missing: column.null_count(),
        unique,
        min: None,
        max: None,
        mean: None,
        median: None,
    };
    if column.is_numeric() {
        let mut values: Vec<f64> = (0..column.len()).filter_map(|i| column.to_f64(i)).collect();
        if !values.is_empty() {
            values.sort_by(f64::total_cmp);
            let n = values.len();
            summary.min = values.first().copied();
            summary.max = values.last().copied();
            summary.mean = Some(values.iter().sum::<f64>() / n as f64);
            summary.median = Some(if n % 2 == 1 {
                values[n / 2]
            } else {
                (values[n / 2 - 1] + values[n / 2]) / 2.0
            });
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset() -> Dataset {
        Dataset::from_columns(
            "people",
            vec![
                (
                    "name",
                    Column::from_str_values(vec![Some("ann"), Some("bo"), Some("ann"), None, Some("cy"), Some("di")]),
                ),
                ("age", Column::from_i64(vec![Some(30), Some(20), None, Some(40), Some(10), Some(50)])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn profile_reports_types_and_preview() {
        let profile = Profiler::new().profile("people.csv", &dataset());
        assert_eq!(profile.columns, vec!["name".to_string(), "age".to_string()]);
        assert_eq!(profile.dtypes["age"], "integer");
        assert_eq!(profile.dtypes["name"], "text");
        assert_eq!(profile.row_count, 6);
        assert_eq!(profile.preview.len(), DEFAULT_PREVIEW_ROWS);
        assert_eq!(profile.preview[0]["name"], json!("ann"));
        assert_eq!(profile.numeric_columns(), vec!["age"]);
    }

    #[test]
    fn numeric_stats_ignore_nulls() {
        let profile = Profiler::new().with_preview_rows(2).profile("p", &dataset());
        let age = &profile.column_stats["age"];
        assert_eq!(age.missing, 1);
        assert_eq!(age.unique, 5);
        assert_eq!(age.min, Some(10.0));
        assert_eq!(age.max, Some(50.0));
        assert_eq!(age.mean, Some(30.0));
        assert_eq!(age.median, Some(30.0));
        assert_eq!(profile.preview.len(), 2);
    }

    #[test]
    fn text_stats_have_no_numbers() {
        let summary = summarize(dataset().get_column("name").unwrap());
        assert_eq!(summary.unique, 4);
        assert_eq!(summary.missing, 1);
        assert_eq!(summary.mean, None);
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json, json!({"type": "text", "missing": 1, "unique": 4}));
    }
}
