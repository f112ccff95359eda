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

pub mod aggregate;
pub mod chart;
pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod profile;
pub mod request;
pub mod sort;
pub mod storage;
pub mod validate;

pub use aggregate::{AggregatedTable, Aggregation, Aggregator};
pub use chart::{ChartAssembler, ChartKind, ChartSpec, Encoding, SeriesData, Trace};
pub use crate::config::{AppConfig, PreviewConfig, StorageConfig};
pub use data::{Column, DataType, Dataset, Value};
pub use error::{
    ConfigError, NotFoundError, ProcessingError, Result, TabulaError, ValidationError,
};
pub use filter::{Filter, FilterOperator, FilterValue, RawFilter};
pub use pipeline::{preview, preview_file, PreviewPipeline};
pub use profile::{ColumnSummary, DatasetProfile, Profiler};
pub use request::{ChartRequest, RawChartRequest};
pub use sort::{SortOrder, TopN};
pub use storage::{secure_filename, StorageContext, UploadReceipt};
pub use validate::{validate, validate_columns, PreviewPlan};

use std::path::Path;

/// Storage and pipeline wired together from one configuration.
#[derive(Debug)]
pub struct Tabula {
    storage: StorageContext,
    pipeline: PreviewPipeline,
}

impl Tabula {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            storage: StorageContext::from_config(config),
            pipeline: PreviewPipeline::from_config(&config.preview),
        }
    }

    pub fn from_config_file(path: Option<&Path>) -> Result<Self> {
        let config = AppConfig::load(path)?;
        Ok(Self::new(&config))
    }

    pub fn storage(&self) -> &StorageContext {
        &self.storage
    }

    pub fn preview(&self, request: &ChartRequest) -> Result<ChartSpec> {
        let dataset = self.storage.load(&request.filename)?;
        self.pipeline.run(&dataset, request)
    }

    /// Parses a JSON request body and answers with the chart as JSON.
    pub fn preview_json(&self, body: &str) -> Result<serde_json::Value> {
        let request = ChartRequest::from_json(body)?;
        let spec = self.preview(&request)?;
        spec.to_json().map_err(|e| TabulaError::from(e).sanitize("serialise"))
    }

    pub fn list_files(&self) -> Result<Vec<String>> {
        self.storage.list_files()
    }

    pub fn inspect(&self, filename: &str) -> Result<DatasetProfile> {
        self.storage.inspect(filename)
    }

    pub fn upload(&self, source: &Path, original_name: &str) -> Result<UploadReceipt> {
        self.storage.ingest(source, original_name)
    }
}
