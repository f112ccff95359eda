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

use crate::aggregate::Aggregator;
use crate::chart::{ChartAssembler, ChartSpec};
use crate::config::PreviewConfig;
use crate::data::Dataset;
use crate::error::{Result, TabulaError};
use crate::filter::apply_filters;
use crate::request::ChartRequest;
use crate::sort::sort_and_limit;
use crate::storage::StorageContext;
use crate::validate::validate;
use tracing::{debug, info, warn};

/// Runs one chart request end to end: validate, filter, aggregate, sort and
/// limit, then assemble.
#[derive(Debug)]
pub struct PreviewPipeline {
    aggregator: Aggregator,
    assembler: ChartAssembler,
}

impl PreviewPipeline {
    pub fn new() -> Self {
        Self {
            aggregator: Aggregator::new(),
            assembler: ChartAssembler::new(),
        }
    }

    pub fn from_config(config: &PreviewConfig) -> Self {
        Self::new().with_parallel_threshold(config.parallel_threshold)
    }

    pub fn with_parallel_threshold(mut self, threshold: usize) -> Self {
        self.aggregator = self.aggregator.with_parallel_threshold(threshold);
        self
    }

    pub fn run(&self, dataset: &Dataset, request: &ChartRequest) -> Result<ChartSpec> {
        let plan = validate(dataset, request).map_err(|e| {
            warn!(dataset = dataset.name(), error = %e, "chart request rejected");
            TabulaError::from(e)
        })?;

        let filtered = apply_filters(dataset, &request.filters).map_err(|e| e.sanitize("filter"))?;
        debug!(
            kept = filtered.row_count(),
            total = dataset.row_count(),
            filters = request.filters.len(),
            "filters applied"
        );

        let aggregated = self
            .aggregator
            .aggregate(
                &filtered,
                &plan.group_keys,
                request.y_column.as_deref(),
                request.aggregation,
            )
            .map_err(|e| e.sanitize("aggregate"))?;
        debug!(rows = aggregated.row_count(), aggregation = %request.aggregation, "aggregated");

        let sorted = sort_and_limit(
            &aggregated.table,
            &plan.sort_column,
            request.sort_order,
            request.top_n,
        )
        .map_err(|e| e.sanitize("sort"))?;
        debug!(
            column = %plan.sort_column,
            order = %request.sort_order,
            rows = sorted.row_count(),
            "sorted"
        );

        let spec = self
            .assembler
            .assemble(&aggregated.with_table(sorted), request.kind, plan.encoding)
            .map_err(|e| e.sanitize("assemble"))?;
        info!(
            file = %request.filename,
            chart = %spec.chart_type,
            rows = spec.row_count,
            "chart preview built"
        );
        Ok(spec)
    }
}

impl Default for PreviewPipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a chart from an already loaded dataset.
pub fn preview(dataset: &Dataset, request: &ChartRequest) -> Result<ChartSpec> {
    PreviewPipeline::new().run(dataset, request)
}

/// Loads `request.filename` through `ctx`, then builds the chart.
pub fn preview_file(ctx: &StorageContext, request: &ChartRequest) -> Result<ChartSpec> {
    let dataset = ctx.load(&request.filename)?;
    preview(&dataset, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Aggregation;
    use crate::chart::ChartKind;
    use crate::data::Column;
    use crate::sort::{SortOrder, TopN};
    use serde_json::json;

    fn dataset() -> Dataset {
        Dataset::from_columns(
            "worked",
            vec![
                ("cat", Column::from_str_values(vec![Some("A"), Some("B"), Some("A")])),
                ("val", Column::from_i64(vec![Some(10), Some(5), Some(3)])),
            ],
        )
        .unwrap()
    }

    #[test]
    fn worked_example() {
        let request = ChartRequest::new("worked.csv", ChartKind::Bar, "cat")
            .y("val")
            .aggregate(Aggregation::Sum)
            .sort("y_column", SortOrder::Desc)
            .top_n(TopN::new(1).unwrap());
        let spec = preview(&dataset(), &request).unwrap();
        assert_eq!(spec.title, "Bar Chart");
        assert_eq!(spec.row_count, 1);
        assert_eq!(spec.data.x, vec![json!("A")]);
        assert_eq!(spec.data.y, Some(vec![json!(13)]));
        assert_eq!(spec.encoding.y.as_deref(), Some("val_sum"));
    }

    #[test]
    fn validation_failures_short_circuit() {
        let request = ChartRequest::new("worked.csv", ChartKind::Bar, "cat").y("price");
        let err = preview(&dataset(), &request).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.user_message().contains("price"));
    }

    #[test]
    fn passthrough_keeps_every_row_sorted_by_x() {
        let request = ChartRequest::new("worked.csv", ChartKind::Scatter, "val").y("val");
        let spec = PreviewPipeline::new().with_parallel_threshold(0).run(&dataset(), &request).unwrap();
        assert_eq!(spec.data.x, vec![json!(3), json!(5), json!(10)]);
        assert_eq!(spec.row_count, 3);
    }
}
