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

use crate::data::column::{Column, ColumnData, Value};
use crate::data::common::{DataType, DatasetMetadata};
use crate::error::{utils::malformed, ProcessingError, ProcessingResult};
use rayon::prelude::*;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable columnar table. Derived tables share unchanged columns.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: HashMap<String, Arc<Column>>,
    pub metadata: DatasetMetadata,
    column_order: Vec<String>,
}

impl Dataset {
    pub fn new(metadata: DatasetMetadata) -> Self {
        Self {
            columns: HashMap::new(),
            metadata,
            column_order: Vec::new(),
        }
    }

    pub fn from_columns<I, S>(name: &str, columns: I) -> ProcessingResult<Self>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        let mut dataset = Dataset::new(DatasetMetadata::named(name));
        for (column_name, column) in columns {
            dataset.add_column(column_name.into(), column)?;
        }
        Ok(dataset)
    }

    pub fn add_column(&mut self, name: String, column: Column) -> ProcessingResult<()> {
        if self.columns.contains_key(&name) {
            return Err(malformed(format!("duplicate column name '{name}'")));
        }
        if let Some(existing) = self.column_order.first().and_then(|n| self.columns.get(n)) {
            if column.len() != existing.len() {
                return Err(ProcessingError::LengthMismatch {
                    expected: existing.len(),
                    actual: column.len(),
                });
            }
        }
        self.metadata.row_count = column.len();
        self.column_order.push(name.clone());
        self.columns.insert(name, Arc::new(column));
        self.metadata.column_count = self.columns.len();
        Ok(())
    }

    pub fn row_count(&self) -> usize {
        self.metadata.row_count
    }

    pub fn column_count(&self) -> usize {
        self.metadata.column_count
    }

    pub fn column_names(&self) -> &[String] {
        &self.column_order
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name).map(|arc| arc.as_ref())
    }

    pub fn column_type(&self, name: &str) -> Option<DataType> {
        self.get_column(name).map(|c| c.data_type())
    }

    pub fn value(&self, column: &str, row: usize) -> Value {
        self.get_column(column)
            .map_or(Value::Null, |c| c.value(row))
    }

    pub fn select_rows(&self, indices: &[usize]) -> ProcessingResult<Dataset> {
        let mut new_df = Dataset::new(DatasetMetadata::named(format!(
            "{}_rows",
            self.metadata.name
        )));
        for name in &self.column_order {
            let new_column = self.columns[name].select_rows(indices)?;
            new_df.add_column(name.clone(), new_column)?;
        }
        new_df.metadata.row_count = indices.len();
        Ok(new_df)
    }

    pub fn filter<P>(&self, predicate: P) -> ProcessingResult<Dataset>
    where
        P: Fn(usize) -> bool + Send + Sync,
    {
        let indices: Vec<usize> = (0..self.row_count())
            .into_par_iter()
            .filter(|&i| predicate(i))
            .collect();
        self.select_rows(&indices)
    }

    /// One row as a JSON object keyed by column name.
    pub fn record(&self, row: usize) -> Map<String, JsonValue> {
        self.column_order
            .iter()
            .map(|name| (name.clone(), self.columns[name].value(row).to_json()))
            .collect()
    }

    pub fn records(&self, limit: usize) -> Vec<Map<String, JsonValue>> {
        (0..limit.min(self.row_count()))
            .map(|row| self.record(row))
            .collect()
    }
}
