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

use crate::chart::Encoding;
use crate::data::{ColumnData, Dataset};
use crate::error::{ColumnRole, ValidationError, ValidationResult};
use crate::request::ChartRequest;
use crate::sort::resolve_sort_column;

/// What the pipeline will do for a request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewPlan {
    /// Empty unless the request aggregates.
    pub group_keys: Vec<String>,
    /// The y column of the table handed to the sorter.
    pub value_column: Option<String>,
    pub sort_column: String,
    pub encoding: Encoding,
}

fn require(dataset: &Dataset, column: &str, role: ColumnRole) -> ValidationResult<()> {
    if dataset.has_column(column) {
        Ok(())
    } else {
        Err(ValidationError::missing(column, role))
    }
}

/// Column existence and type checks for the x, y and group-by roles.
pub fn validate_columns(dataset: &Dataset, request: &ChartRequest) -> ValidationResult<()> {
    require(dataset, &request.x_column, ColumnRole::X)?;
    if let Some(y) = &request.y_column {
        require(dataset, y, ColumnRole::Y)?;
    }
    if let Some(group) = &request.group_by {
        require(dataset, group, ColumnRole::GroupBy)?;
    }
    if request.aggregation.is_numeric_reduction() {
        if let Some(y) = &request.y_column {
            let numeric = dataset.get_column(y).is_some_and(|c| c.data_type().is_numeric());
            if !numeric {
                return Err(ValidationError::non_numeric(y.as_str(), ColumnRole::Y));
            }
        }
    }
    Ok(())
}

/// Every check that can fail before any rows are touched.
pub fn validate(dataset: &Dataset, request: &ChartRequest) -> ValidationResult<PreviewPlan> {
    validate_columns(dataset, request)?;

    let aggregation = request.aggregation;
    if aggregation.is_numeric_reduction() && request.y_column.is_none() {
        return Err(ValidationError::MissingRole {
            role: ColumnRole::Y,
            requirement: format!("'{aggregation}' aggregation"),
        });
    }
    let value_column = aggregation.output_column(request.y_column.as_deref());
    if request.kind.requires_y() && value_column.is_none() {
        return Err(ValidationError::MissingRole {
            role: ColumnRole::Y,
            requirement: format!("a {} chart", request.kind),
        });
    }

    for filter in &request.filters {
        filter.check(dataset)?;
    }

    let (group_keys, projected) = if aggregation.groups_rows() {
        let keys = request.group_keys();
        let mut projected = keys.clone();
        if let Some(value) = &value_column {
            if keys.contains(value) {
                return Err(ValidationError::ColumnConflict {
                    column: value.clone(),
                });
            }
            projected.push(value.clone());
        }
        (keys, projected)
    } else {
        (Vec::new(), dataset.column_names().to_vec())
    };

    let sort_column = resolve_sort_column(
        request.sort_column.as_deref(),
        &request.x_column,
        value_column.as_deref(),
    );
    if !projected.contains(&sort_column) {
        return Err(ValidationError::missing(sort_column, ColumnRole::Sort));
    }

    let encoding = Encoding::new(request.x_column.as_str())
        .with_y(value_column.clone())
        .with_color(request.group_by.clone());

    Ok(PreviewPlan {
        group_keys,
        value_column,
        sort_column,
        encoding,
    })
}
