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

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TabulaError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),
    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// The part a column plays in a chart request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    X,
    Y,
    GroupBy,
    Color,
    Sort,
    Filter,
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnRole::X => "X",
            ColumnRole::Y => "Y",
            ColumnRole::GroupBy => "Group By",
            ColumnRole::Color => "Color",
            ColumnRole::Sort => "Sort",
            ColumnRole::Filter => "Filter",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnIssue {
    Missing,
    NonNumeric,
}

impl ColumnIssue {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnIssue::Missing => "missing",
            ColumnIssue::NonNumeric => "non-numeric",
        }
    }
}

impl fmt::Display for ColumnIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("{role} column '{column}' is {issue}")]
    Column {
        column: String,
        role: ColumnRole,
        issue: ColumnIssue,
    },
    #[error("A {role} column is required for {requirement}")]
    MissingRole {
        role: ColumnRole,
        requirement: String,
    },
    #[error("Missing required parameter: {field}")]
    MissingField { field: String },
    #[error("Malformed request body: {reason}")]
    MalformedBody { reason: String },
    #[error("Unsupported visualization type: '{tag}'")]
    UnsupportedChartType { tag: String },
    #[error("Unsupported aggregation: '{tag}'")]
    UnsupportedAggregation { tag: String },
    #[error("Unsupported sort order: '{tag}' (expected 'asc' or 'desc')")]
    UnsupportedSortOrder { tag: String },
    #[error("Top N must be a positive integer (got {value})")]
    InvalidTopN { value: String },
    #[error("Color column '{column}' must be the group-by column used for aggregation")]
    ColorNotGrouped { column: String },
    #[error("Aggregated column '{column}' collides with a grouping column")]
    ColumnConflict { column: String },
    #[error("Invalid filter on column '{column}': {reason}")]
    InvalidFilter { column: String, reason: String },
    #[error("Invalid file name: '{name}'")]
    InvalidFileName { name: String },
    #[error("Invalid file type '{name}'. Supported formats are: {allowed}")]
    UnsupportedFileType { name: String, allowed: String },
    #[error("File size exceeds the maximum limit of {limit_mb}MB")]
    FileTooLarge { limit_mb: u64 },
    #[error("Storage space limit exceeded. Please delete some files first.")]
    StorageFull,
    #[error("File contains no {what}")]
    EmptyDataset { what: &'static str },
}

impl ValidationError {
    pub fn missing(column: impl Into<String>, role: ColumnRole) -> Self {
        ValidationError::Column {
            column: column.into(),
            role,
            issue: ColumnIssue::Missing,
        }
    }

    pub fn non_numeric(column: impl Into<String>, role: ColumnRole) -> Self {
        ValidationError::Column {
            column: column.into(),
            role,
            issue: ColumnIssue::NonNumeric,
        }
    }

    /// The column this error is about, when there is one.
    pub fn column(&self) -> Option<&str> {
        match self {
            ValidationError::Column { column, .. }
            | ValidationError::ColorNotGrouped { column }
            | ValidationError::ColumnConflict { column }
            | ValidationError::InvalidFilter { column, .. } => Some(column),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("File not found: {name}")]
    File { name: String },
}

#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Failed to access '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse CSV '{path}': {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("Failed to read workbook '{path}': {source}")]
    Workbook {
        path: String,
        #[source]
        source: calamine::Error,
    },
    #[error("Malformed table: {reason}")]
    Malformed { reason: String },
    #[error("Column length mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("Row index {0} out of bounds")]
    OutOfBounds(usize),
    #[error("Integer overflow while reducing column '{column}'")]
    Overflow { column: String },
    #[error("Serialisation failed: {0}")]
    Serialisation(#[from] serde_json::Error),
    #[error("{message}")]
    Sanitized {
        stage: &'static str,
        message: &'static str,
    },
}

impl ProcessingError {
    /// Message that is safe to hand back to a client.
    pub fn user_message(&self) -> &'static str {
        match self {
            ProcessingError::Io { .. } => "Unable to read file.",
            ProcessingError::Csv { .. }
            | ProcessingError::Workbook { .. }
            | ProcessingError::Malformed { .. } => {
                "Unable to read file. Please ensure it's a valid CSV/Excel file with proper encoding."
            }
            ProcessingError::Sanitized { message, .. } => message,
            _ => "Failed to generate preview.",
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {field} {reason}")]
    Invalid { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, TabulaError>;
pub type ValidationResult<T> = std::result::Result<T, ValidationError>;
pub type ProcessingResult<T> = std::result::Result<T, ProcessingError>;

impl TabulaError {
    pub fn category(&self) -> &'static str {
        match self {
            TabulaError::Validation(_) => "Validation",
            TabulaError::NotFound(_) => "NotFound",
            TabulaError::Processing(_) => "Processing",
            TabulaError::Config(_) => "Configuration",
        }
    }

    /// HTTP status a request handler should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            TabulaError::Validation(_) => 400,
            TabulaError::NotFound(_) => 404,
            TabulaError::Processing(_) | TabulaError::Config(_) => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            TabulaError::Validation(e) => e.to_string(),
            TabulaError::NotFound(e) => e.to_string(),
            TabulaError::Processing(e) => e.user_message().to_string(),
            TabulaError::Config(_) => "Service is misconfigured.".to_string(),
        }
    }

    /// Logs the full detail of a processing failure and replaces it with a
    /// sanitized one. Other kinds pass through untouched.
    pub fn sanitize(self, stage: &'static str) -> Self {
        match self {
            TabulaError::Processing(e) => {
                tracing::error!(stage, detail = %e, "chart processing failed");
                TabulaError::Processing(ProcessingError::Sanitized {
                    stage,
                    message: e.user_message(),
                })
            }
            other => other,
        }
    }
}

pub mod utils {
    use super::*;

    pub fn io_error(path: &std::path::Path, source: std::io::Error) -> ProcessingError {
        ProcessingError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn file_not_found(name: &str) -> TabulaError {
        TabulaError::NotFound(NotFoundError::File {
            name: name.to_string(),
        })
    }

    pub fn malformed(reason: impl Into<String>) -> ProcessingError {
        ProcessingError::Malformed {
            reason: reason.into(),
        }
    }
}
