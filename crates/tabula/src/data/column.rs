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

use crate::data::common::{is_na, parse_bool, parse_date, DataType};
use crate::error::{ProcessingError, ProcessingResult};
use chrono::NaiveDate;
use rayon::prelude::*;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::sync::Arc;

const MAX_STRING_LENGTH: usize = 1024 * 1024;

pub trait ColumnData: Send + Sync + std::fmt::Debug {
    fn len(&self) -> usize;
    fn data_type(&self) -> DataType;
    fn null_count(&self) -> usize;
    fn get_string(&self, index: usize) -> Option<String>;
    fn to_f64(&self, index: usize) -> Option<f64>;
    fn value(&self, index: usize) -> Value;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single typed cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int64(i64),
    Float64(f64),
    String(Arc<str>),
    Boolean(bool),
    Date(NaiveDate),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Ordering between two non-null cells of the same column. Cells of
    /// different kinds only meet when numbers mix, which compare by value.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => a.to_string().cmp(&b.to_string()),
            },
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Int64(v) => JsonValue::from(*v),
            Value::Float64(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.to_string()),
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::Date(d) => JsonValue::String(d.format("%Y-%m-%d").to_string()),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(s) => f.write_str(s),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Column {
    Int64(Arc<[Option<i64>]>),
    Float64(Arc<[Option<f64>]>),
    String(Arc<[Option<Arc<str>>]>),
    Boolean(Arc<[Option<bool>]>),
    Date(Arc<[Option<NaiveDate>]>),
}

impl ColumnData for Column {
    fn len(&self) -> usize {
        match self {
            Column::Int64(data) => data.len(),
            Column::Float64(data) => data.len(),
            Column::String(data) => data.len(),
            Column::Boolean(data) => data.len(),
            Column::Date(data) => data.len(),
        }
    }
    fn data_type(&self) -> DataType {
        match self {
            Column::Int64(_) => DataType::Int64,
            Column::Float64(_) => DataType::Float64,
            Column::String(_) => DataType::String,
            Column::Boolean(_) => DataType::Boolean,
            Column::Date(_) => DataType::Date,
        }
    }
    fn null_count(&self) -> usize {
        match self {
            Column::Int64(data) => data.par_iter().filter(|v| v.is_none()).count(),
            Column::Float64(data) => data.par_iter().filter(|v| v.is_none()).count(),
            Column::String(data) => data.par_iter().filter(|v| v.is_none()).count(),
            Column::Boolean(data) => data.par_iter().filter(|v| v.is_none()).count(),
            Column::Date(data) => data.par_iter().filter(|v| v.is_none()).count(),
        }
    }
    fn get_string(&self, index: usize) -> Option<String> {
        match self.value(index) {
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }
    fn to_f64(&self, index: usize) -> Option<f64> {
        match self {
            Column::Int64(data) => data.get(index).and_then(|opt| opt.map(|v| v as f64)),
            Column::Float64(data) => data.get(index).copied()?,
            _ => None,
        }
    }
    fn value(&self, index: usize) -> Value {
        let cell = match self {
            Column::Int64(data) => data.get(index).copied().flatten().map(Value::Int64),
            Column::Float64(data) => data.get(index).copied().flatten().map(Value::Float64),
            Column::String(data) => data.get(index).cloned().flatten().map(Value::String),
            Column::Boolean(data) => data.get(index).copied().flatten().map(Value::Boolean),
            Column::Date(data) => data.get(index).copied().flatten().map(Value::Date),
        };
        cell.unwrap_or(Value::Null)
    }
}

fn pick<T: Clone + Send + Sync>(data: &[Option<T>], indices: &[usize]) -> ProcessingResult<Arc<[Option<T>]>> {
    let picked: ProcessingResult<Vec<Option<T>>> = indices
        .par_iter()
        .map(|&i| {
            data.get(i)
                .cloned()
                .ok_or(ProcessingError::OutOfBounds(i))
        })
        .collect();
    Ok(picked?.into())
}

impl Column {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_numeric(&self) -> bool {
        self.data_type().is_numeric()
    }

    pub fn from_i64(values: Vec<Option<i64>>) -> Self {
        Column::Int64(values.into())
    }

    pub fn from_f64(values: Vec<Option<f64>>) -> Self {
        Column::Float64(values.into())
    }

    pub fn from_str_values<S: AsRef<str>>(values: Vec<Option<S>>) -> Self {
        let data: Vec<Option<Arc<str>>> = values
            .into_iter()
            .map(|opt| opt.map(|s| Arc::from(s.as_ref())))
            .collect();
        Column::String(data.into())
    }

    /// Parses raw cells as `data_type`. Null markers become nulls.
    pub fn from_strings(values: &[Option<String>], data_type: DataType) -> ProcessingResult<Self> {
        fn parse_all<T, F>(values: &[Option<String>], data_type: DataType, parse: F) -> ProcessingResult<Vec<Option<T>>>
        where
            T: Send,
            F: Fn(&str) -> Option<T> + Sync,
        {
            values
                .par_iter()
                .map(|opt| match opt {
                    None => Ok(None),
                    Some(s) if is_na(s) => Ok(None),
                    Some(s) => parse(s.trim()).map(Some).ok_or_else(|| {
                        ProcessingError::Malformed {
                            reason: format!("cannot parse '{s}' as {data_type}"),
                        }
                    }),
                })
                .collect()
        }
        Ok(match data_type {
            DataType::Int64 => Column::Int64(parse_all(values, data_type, |s| s.parse::<i64>().ok())?.into()),
            DataType::Float64 => {
                Column::Float64(parse_all(values, data_type, |s| s.parse::<f64>().ok())?.into())
            }
            DataType::Boolean => Column::Boolean(parse_all(values, data_type, parse_bool)?.into()),
            DataType::Date => Column::Date(parse_all(values, data_type, parse_date)?.into()),
            DataType::String => {
                let strings: Vec<Option<Arc<str>>> = values
                    .iter()
                    .map(|opt| {
                        opt.as_ref().filter(|s| !is_na(s)).map(|s| {
                            if s.len() > MAX_STRING_LENGTH {
                                let mut end = MAX_STRING_LENGTH;
                                while !s.is_char_boundary(end) {
                                    end -= 1;
                                }
                                Arc::from(&s[..end])
                            } else {
                                Arc::from(s.as_str())
                            }
                        })
                    })
                    .collect();
                Column::String(strings.into())
            }
        })
    }

    pub fn select_rows(&self, indices: &[usize]) -> ProcessingResult<Column> {
        Ok(match self {
            Column::Int64(data) => Column::Int64(pick(data, indices)?),
            Column::Float64(data) => Column::Float64(pick(data, indices)?),
            Column::String(data) => Column::String(pick(data, indices)?),
            Column::Boolean(data) => Column::Boolean(pick(data, indices)?),
            Column::Date(data) => Column::Date(pick(data, indices)?),
        })
    }

    /// Non-null numeric cells at `indices`, in order.
    pub fn numeric_values(&self, indices: &[usize]) -> Vec<f64> {
        indices.iter().filter_map(|&i| self.to_f64(i)).collect()
    }

    pub fn to_json_values(&self) -> Vec<JsonValue> {
        (0..self.len()).map(|i| self.value(i).to_json()).collect()
    }
}

/// Collects raw cells and infers the narrowest type that fits all of them.
#[derive(Debug, Default)]
pub struct ColumnBuilder {
    values: Vec<Option<String>>,
}

impl ColumnBuilder {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: Option<String>) -> ProcessingResult<()> {
        if let Some(ref s) = value {
            if s.len() > MAX_STRING_LENGTH {
                return Err(ProcessingError::Malformed {
                    reason: format!("cell of {} bytes exceeds limit {MAX_STRING_LENGTH}", s.len()),
                });
            }
        }
        self.values.push(value.filter(|s| !is_na(s)));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn build(self) -> ProcessingResult<Column> {
        let data_type = Self::infer_type(&self.values);
        Column::from_strings(&self.values, data_type)
    }

    /// An all-null column is treated as decimal, as pandas does.
    pub fn infer_type(values: &[Option<String>]) -> DataType {
        let mut present = values.iter().flatten().map(|s| s.trim()).peekable();
        if present.peek().is_none() {
            return DataType::Float64;
        }
        let (mut all_int, mut all_float, mut all_bool, mut all_date) = (true, true, true, true);
        for value in present {
            all_int &= value.parse::<i64>().is_ok();
            all_float &= value.parse::<f64>().is_ok();
            all_bool &= parse_bool(value).is_some();
            all_date &= parse_date(value).is_some();
            if !(all_int || all_float || all_bool || all_date) {
                break;
            }
        }
        if all_int {
            DataType::Int64
        } else if all_float {
            DataType::Float64
        } else if all_bool {
            DataType::Boolean
        } else if all_date {
            DataType::Date
        } else {
            DataType::String
        }
    }
}
