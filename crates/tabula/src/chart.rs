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

use crate::aggregate::AggregatedTable;
use crate::data::{Column, ColumnData, Dataset};
use crate::error::{ColumnRole, ProcessingResult, Result, ValidationError, ValidationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Chart kinds the assembler can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Scatter,
    Line,
    Bar,
    Area,
    Histogram,
    Box,
    Violin,
}

impl ChartKind {
    pub const ALL: [ChartKind; 7] = [
        ChartKind::Scatter,
        ChartKind::Line,
        ChartKind::Bar,
        ChartKind::Area,
        ChartKind::Histogram,
        ChartKind::Box,
        ChartKind::Violin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChartKind::Scatter => "scatter",
            ChartKind::Line => "line",
            ChartKind::Bar => "bar",
            ChartKind::Area => "area",
            ChartKind::Histogram => "histogram",
            ChartKind::Box => "box",
            ChartKind::Violin => "violin",
        }
    }

    pub fn title(self) -> String {
        let tag = self.as_str();
        let mut chars = tag.chars();
        match chars.next() {
            Some(first) => format!("{}{} Chart", first.to_ascii_uppercase(), chars.as_str()),
            None => String::from("Chart"),
        }
    }

    /// Distribution charts plot x alone; the rest need a y value.
    pub fn requires_y(self) -> bool {
        match self {
            ChartKind::Scatter | ChartKind::Line | ChartKind::Bar | ChartKind::Area => true,
            ChartKind::Histogram | ChartKind::Box | ChartKind::Violin => false,
        }
    }

    fn trace_style(self) -> TraceStyle {
        match self {
            ChartKind::Scatter => TraceStyle::new("scatter").mode("markers"),
            ChartKind::Line => TraceStyle::new("scatter").mode("lines"),
            ChartKind::Area => TraceStyle::new("scatter").mode("lines").fill("tozeroy"),
            ChartKind::Bar => TraceStyle::new("bar"),
            ChartKind::Histogram => TraceStyle::new("histogram"),
            ChartKind::Box => TraceStyle::new("box"),
            ChartKind::Violin => TraceStyle::new("violin"),
        }
    }
}

impl FromStr for ChartKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> ValidationResult<Self> {
        let tag = s.trim().to_ascii_lowercase();
        ChartKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == tag)
            .ok_or_else(|| ValidationError::UnsupportedChartType { tag: s.to_string() })
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct TraceStyle {
    kind: &'static str,
    mode: Option<&'static str>,
    fill: Option<&'static str>,
}

impl TraceStyle {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            mode: None,
            fill: None,
        }
    }

    fn mode(mut self, mode: &'static str) -> Self {
        self.mode = Some(mode);
        self
    }

    fn fill(mut self, fill: &'static str) -> Self {
        self.fill = Some(fill);
        self
    }
}

/// Which table column plays which role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoding {
    pub x: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Encoding {
    pub fn new(x: impl Into<String>) -> Self {
        Self {
            x: x.into(),
            y: None,
            color: None,
        }
    }

    pub fn with_y(mut self, y: Option<String>) -> Self {
        self.y = y;
        self
    }

    pub fn with_color(mut self, color: Option<String>) -> Self {
        self.color = color;
        self
    }
}

/// Flat per-role value arrays, one entry per table row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesData {
    pub x: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<Vec<JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Vec<JsonValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    #[serde(rename = "type")]
    pub trace_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<&'static str>,
    pub x: Vec<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<Vec<JsonValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub chart_type: ChartKind,
    pub title: String,
    pub encoding: Encoding,
    pub data: SeriesData,
    pub traces: Vec<Trace>,
    pub row_count: usize,
}

impl ChartSpec {
    pub fn to_json(&self) -> ProcessingResult<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }
}

#[derive(Debug, Default)]
pub struct ChartAssembler;

impl ChartAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(
        &self,
        processed: &AggregatedTable,
        kind: ChartKind,
        encoding: Encoding,
    ) -> Result<ChartSpec> {
        let table = &processed.table;
        let x = column(table, &encoding.x, ColumnRole::X)?;
        let y = match &encoding.y {
            Some(name) => Some(column(table, name, ColumnRole::Y)?),
            None if kind.requires_y() => {
                return Err(ValidationError::MissingRole {
                    role: ColumnRole::Y,
                    requirement: format!("a {kind} chart"),
                }
                .into())
            }
            None => None,
        };
        let color = match &encoding.color {
            Some(name) => {
                if processed.is_grouped() && !processed.group_keys.contains(name) {
                    return Err(ValidationError::ColorNotGrouped {
                        column: name.clone(),
                    }
                    .into());
                }
                Some(column(table, name, ColumnRole::Color)?)
            }
            None => None,
        };

        let data = SeriesData {
            x: x.to_json_values(),
            y: y.map(Column::to_json_values),
            color: color.map(Column::to_json_values),
        };
        let traces = build_traces(kind, &data, color);

        Ok(ChartSpec {
            chart_type: kind,
            title: kind.title(),
            encoding,
            data,
            traces,
            row_count: table.row_count(),
        })
    }
}

fn column<'a>(table: &'a Dataset, name: &str, role: ColumnRole) -> ValidationResult<&'a Column> {
    table
        .get_column(name)
        .ok_or_else(|| ValidationError::missing(name, role))
}

/// One trace per distinct color value, in first-appearance order, or a
/// single unnamed trace when there is no color role.
fn build_traces(kind: ChartKind, data: &SeriesData, color: Option<&Column>) -> Vec<Trace> {
    let style = kind.trace_style();
    let trace = |name: Option<String>, rows: &[usize]| Trace {
        trace_type: style.kind,
        name,
        mode: style.mode,
        fill: style.fill,
        x: rows.iter().map(|&i| data.x[i].clone()).collect(),
        y: data
            .y
            .as_ref()
            .map(|y| rows.iter().map(|&i| y[i].clone()).collect()),
    };

    let Some(color) = color else {
        let rows: Vec<usize> = (0..data.x.len()).collect();
        return vec![trace(None, &rows)];
    };

    let mut order: Vec<Option<String>> = Vec::new();
    let mut members: HashMap<Option<String>, Vec<usize>> = HashMap::new();
    for row in 0..color.len() {
        let key = color.get_string(row);
        members
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(row);
    }
    order
        .into_iter()
        .map(|key| {
            let rows = members.remove(&key).unwrap_or_default();
            trace(Some(key.unwrap_or_else(|| "null".to_string())), &rows)
        })
        .collect()
}
