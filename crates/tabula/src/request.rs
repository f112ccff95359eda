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

use crate::aggregate::Aggregation;
use crate::chart::ChartKind;
use crate::error::{ValidationError, ValidationResult};
use crate::filter::{Filter, RawFilter};
use crate::sort::{SortOrder, TopN};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Request body exactly as a client sends it. Every field is optional here;
/// [`ChartRequest`] decides what is required.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChartRequest {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub viz_type: Option<String>,
    #[serde(default)]
    pub x_column: Option<String>,
    #[serde(default)]
    pub y_column: Option<String>,
    #[serde(default)]
    pub y_aggregation: Option<String>,
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default, rename = "topN")]
    pub top_n: Option<JsonValue>,
    #[serde(default)]
    pub sort_column: Option<String>,
    #[serde(default)]
    pub sort_order: Option<String>,
    #[serde(default)]
    pub filters: Vec<RawFilter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartRequest {
    pub filename: String,
    pub kind: ChartKind,
    pub x_column: String,
    pub y_column: Option<String>,
    pub aggregation: Aggregation,
    pub group_by: Option<String>,
    pub sort_column: Option<String>,
    pub sort_order: SortOrder,
    pub top_n: Option<TopN>,
    pub filters: Vec<Filter>,
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn required(value: Option<String>, field: &str) -> ValidationResult<String> {
    present(value).ok_or_else(|| ValidationError::MissingField {
        field: field.to_string(),
    })
}

impl ChartRequest {
    pub fn new(filename: impl Into<String>, kind: ChartKind, x_column: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            kind,
            x_column: x_column.into(),
            y_column: None,
            aggregation: Aggregation::None,
            group_by: None,
            sort_column: None,
            sort_order: SortOrder::Asc,
            top_n: None,
            filters: Vec::new(),
        }
    }

    pub fn y(mut self, column: impl Into<String>) -> Self {
        self.y_column = Some(column.into());
        self
    }

    pub fn aggregate(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group_by = Some(column.into());
        self
    }

    pub fn sort(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.sort_column = Some(column.into());
        self.sort_order = order;
        self
    }

    pub fn top_n(mut self, top_n: TopN) -> Self {
        self.top_n = Some(top_n);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Parses and types a JSON request body.
    pub fn from_json(body: &str) -> ValidationResult<Self> {
        let raw: RawChartRequest =
            serde_json::from_str(body).map_err(|e| ValidationError::MalformedBody {
                reason: e.to_string(),
            })?;
        Self::try_from(raw)
    }

    /// Grouping keys for aggregation: x, then the group-by column if distinct.
    pub fn group_keys(&self) -> Vec<String> {
        let mut keys = vec![self.x_column.clone()];
        if let Some(group) = &self.group_by {
            if *group != self.x_column {
                keys.push(group.clone());
            }
        }
        keys
    }
}

impl TryFrom<RawChartRequest> for ChartRequest {
    type Error = ValidationError;

    fn try_from(raw: RawChartRequest) -> ValidationResult<Self> {
        let filename = required(raw.filename, "filename")?;
        let kind: ChartKind = required(raw.viz_type, "vizType")?.parse()?;
        let x_column = required(raw.x_column, "xColumn")?;
        let aggregation = match present(raw.y_aggregation) {
            Some(tag) => tag.parse()?,
            None => Aggregation::None,
        };
        let sort_order = match present(raw.sort_order) {
            Some(tag) => tag.parse()?,
            None => SortOrder::Asc,
        };
        let top_n = match &raw.top_n {
            Some(value) => TopN::from_json(value)?,
            None => None,
        };
        let filters = raw
            .filters
            .into_iter()
            .map(Filter::try_from)
            .collect::<ValidationResult<Vec<_>>>()?;

        Ok(ChartRequest {
            filename,
            kind,
            x_column,
            y_column: present(raw.y_column),
            aggregation,
            group_by: present(raw.group_by),
            sort_column: present(raw.sort_column),
            sort_order,
            top_n,
            filters,
        })
    }
}
