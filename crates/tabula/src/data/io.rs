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

use crate::data::column::ColumnBuilder;
use crate::data::common::DatasetMetadata;
use crate::data::dataset::Dataset;
use crate::error::utils::{io_error, malformed};
use crate::error::{ProcessingError, ProcessingResult, Result, ValidationError};
use calamine::{open_workbook_auto, Data, DataType as _, Range, Reader};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::debug;

pub const EXCEL_EXTENSIONS: &[&str] = &["xlsx", "xls", "xlsm", "ods"];

fn supported_extensions() -> String {
    std::iter::once("csv")
        .chain(EXCEL_EXTENSIONS.iter().copied())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Source formats the loader understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Excel,
}

impl FileFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if ext == "csv" {
            Some(FileFormat::Csv)
        } else if EXCEL_EXTENSIONS.contains(&ext.as_str()) {
            Some(FileFormat::Excel)
        } else {
            None
        }
    }
}

/// Loads a CSV or Excel file, picking the reader from the extension.
pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let dataset = match FileFormat::from_path(path) {
        Some(FileFormat::Csv) => CsvReader::new().read_file(path)?,
        Some(FileFormat::Excel) => ExcelReader::new().read_file(path)?,
        None => {
            return Err(ValidationError::UnsupportedFileType {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                allowed: supported_extensions(),
            }
            .into())
        }
    };
    debug!(
        path = %path.display(),
        rows = dataset.row_count(),
        columns = dataset.column_count(),
        "dataset loaded"
    );
    Ok(dataset)
}

fn dataset_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "dataset".to_string())
}

fn check_headers(headers: &[String]) -> ProcessingResult<()> {
    let mut seen = HashSet::new();
    for header in headers {
        if header.is_empty() {
            return Err(malformed("empty column header"));
        }
        if !seen.insert(header.as_str()) {
            return Err(malformed(format!("duplicate column header '{header}'")));
        }
    }
    Ok(())
}

fn assemble(
    name: String,
    path: &Path,
    headers: Vec<String>,
    builders: Vec<ColumnBuilder>,
) -> ProcessingResult<Dataset> {
    let mut metadata = DatasetMetadata::named(name);
    metadata.source_path = Some(path.to_path_buf());
    let mut dataset = Dataset::new(metadata);
    for (header, builder) in headers.into_iter().zip(builders) {
        dataset.add_column(header, builder.build()?)?;
    }
    Ok(dataset)
}

#[derive(Debug)]
pub struct CsvReader {
    delimiter: u8,
    quote_char: u8,
    buffer_size: usize,
}

impl CsvReader {
    pub fn new() -> Self {
        Self {
            delimiter: b',',
            quote_char: b'"',
            buffer_size: 64 * 1024,
        }
    }

    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_quote_char(mut self, quote_char: u8) -> Self {
        self.quote_char = quote_char;
        self
    }

    pub fn read_file(&self, path: &Path) -> ProcessingResult<Dataset> {
        let file = File::open(path).map_err(|e| io_error(path, e))?;
        let reader = BufReader::with_capacity(self.buffer_size, file);
        self.read_from(reader, path)
    }

    pub fn read_from<R: Read>(&self, reader: R, path: &Path) -> ProcessingResult<Dataset> {
        let csv_error = |source| ProcessingError::Csv {
            path: path.display().to_string(),
            source,
        };
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .quote(self.quote_char)
            .has_headers(true)
            .flexible(false)
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers: Vec<String> = rdr
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();
        check_headers(&headers)?;
        let mut builders: Vec<ColumnBuilder> =
            headers.iter().map(|_| ColumnBuilder::new()).collect();
        for record in rdr.records() {
            let record = record.map_err(csv_error)?;
            for (builder, field) in builders.iter_mut().zip(record.iter()) {
                builder.push(Some(field.to_string()))?;
            }
        }
        assemble(dataset_name(path), path, headers, builders)
    }
}

impl Default for CsvReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads the first worksheet; its first row holds the headers.
#[derive(Debug, Default)]
pub struct ExcelReader;

impl ExcelReader {
    pub fn new() -> Self {
        Self
    }

    pub fn read_file(&self, path: &Path) -> ProcessingResult<Dataset> {
        let workbook_error = |source| ProcessingError::Workbook {
            path: path.display().to_string(),
            source,
        };
        let mut workbook = open_workbook_auto(path).map_err(workbook_error)?;
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| malformed("workbook has no sheets"))?;
        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(workbook_error)?;
        self.read_range(&range, &sheet_name, path)
    }

    /// Builds a dataset from a sheet's cells. Every row is padded to the
    /// header width; missing cells are null.
    pub fn read_range(
        &self,
        range: &Range<Data>,
        sheet_name: &str,
        path: &Path,
    ) -> ProcessingResult<Dataset> {
        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .ok_or_else(|| malformed(format!("sheet '{sheet_name}' is empty")))?
            .iter()
            .map(|cell| cell_text(cell).unwrap_or_default())
            .collect();
        check_headers(&headers)?;
        let mut builders: Vec<ColumnBuilder> = headers
            .iter()
            .map(|_| ColumnBuilder::with_capacity(range.height()))
            .collect();
        for row in rows {
            for (i, builder) in builders.iter_mut().enumerate() {
                builder.push(row.get(i).and_then(cell_text))?;
            }
        }
        assemble(dataset_name(path), path, headers, builders)
    }
}

/// Cell contents as the text the CSV path would have seen.
fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(f.to_string()),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(_) | Data::DateTimeIso(_) => cell
            .as_date()
            .map(|d| d.format("%Y-%m-%d").to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::column::{ColumnData, Value};
    use crate::data::common::DataType;
    use calamine::{ExcelDateTime, ExcelDateTimeType};
    use std::io::Cursor;

    fn read(text: &str) -> ProcessingResult<Dataset> {
        CsvReader::new().read_from(Cursor::new(text.to_string()), Path::new("inline.csv"))
    }

    #[test]
    fn csv_types_are_inferred_per_column() {
        let dataset = read("cat,val,price,flag,day\nA,10,1.5,true,2024-01-01\nB,,2,false,2024-01-02\n")
            .unwrap();
        assert_eq!(dataset.name(), "inline");
        assert_eq!(dataset.row_count(), 2);
        assert_eq!(dataset.column_type("cat"), Some(DataType::String));
        assert_eq!(dataset.column_type("val"), Some(DataType::Int64));
        assert_eq!(dataset.column_type("price"), Some(DataType::Float64));
        assert_eq!(dataset.column_type("flag"), Some(DataType::Boolean));
        assert_eq!(dataset.column_type("day"), Some(DataType::Date));
        assert_eq!(dataset.get_column("val").unwrap().null_count(), 1);
        assert_eq!(dataset.value("price", 1), Value::Float64(2.0));
    }

    #[test]
    fn quoted_fields_and_bom_are_handled() {
        let dataset = read("\u{feff}name,note\n\"Smith, J\",\"said \"\"hi\"\"\"\n").unwrap();
        assert_eq!(dataset.column_names()[0], "name");
        assert_eq!(
            dataset.get_column("name").unwrap().get_string(0).as_deref(),
            Some("Smith, J")
        );
        assert_eq!(
            dataset.get_column("note").unwrap().get_string(0).as_deref(),
            Some("said \"hi\"")
        );
    }

    #[test]
    fn ragged_rows_and_duplicate_headers_fail() {
        assert!(matches!(read("a,b\n1\n"), Err(ProcessingError::Csv { .. })));
        assert!(matches!(read("a,a\n1,2\n"), Err(ProcessingError::Malformed { .. })));
    }

    #[test]
    fn custom_delimiter_and_quote() {
        let dataset = CsvReader::new()
            .with_delimiter(b';')
            .with_quote_char(b'\'')
            .read_from(Cursor::new("city;note\nOslo;'a;b'\n"), Path::new("semi.csv"))
            .unwrap();
        assert_eq!(dataset.column_count(), 2);
        assert_eq!(
            dataset.get_column("note").unwrap().get_string(0).as_deref(),
            Some("a;b")
        );
    }

    #[test]
    fn unknown_extension_names_only_the_file() {
        let err = read_dataset(Path::new("/srv/private/notes.txt")).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(
            err.user_message(),
            "Invalid file type 'notes.txt'. Supported formats are: csv, xlsx, xls, xlsm, ods"
        );
    }

    fn sheet(cells: &[&[Data]]) -> Range<Data> {
        let width = cells.iter().map(|row| row.len()).max().unwrap_or(1) as u32;
        let mut range = Range::new((0, 0), (cells.len() as u32 - 1, width - 1));
        for (r, row) in cells.iter().enumerate() {
            for (c, cell) in row.iter().enumerate() {
                range.set_value((r as u32, c as u32), cell.clone());
            }
        }
        range
    }

    #[test]
    fn excel_cells_render_as_csv_text() {
        assert_eq!(cell_text(&Data::Empty), None);
        assert_eq!(cell_text(&Data::Error(calamine::CellErrorType::NA)), None);
        assert_eq!(cell_text(&Data::String("Oslo".into())).as_deref(), Some("Oslo"));
        assert_eq!(cell_text(&Data::Int(7)).as_deref(), Some("7"));
        assert_eq!(cell_text(&Data::Float(2.0)).as_deref(), Some("2"));
        assert_eq!(cell_text(&Data::Float(2.5)).as_deref(), Some("2.5"));
        assert_eq!(cell_text(&Data::Bool(true)).as_deref(), Some("true"));
        let serial = ExcelDateTime::new(45356.0, ExcelDateTimeType::DateTime, false);
        assert_eq!(cell_text(&Data::DateTime(serial)).as_deref(), Some("2024-03-05"));
        assert_eq!(
            cell_text(&Data::DateTimeIso("2024-03-05T10:30:00".into())).as_deref(),
            Some("2024-03-05")
        );
    }

    #[test]
    fn excel_sheet_infers_column_types() {
        let range = sheet(&[
            &[Data::String("city".into()), Data::String("pop".into()), Data::String("area".into())],
            &[Data::String("Oslo".into()), Data::Float(700.0), Data::Float(454.2)],
            &[Data::String("Bergen".into()), Data::Empty, Data::Float(465.0)],
        ]);
        let dataset = ExcelReader::new()
            .read_range(&range, "Sheet1", Path::new("cities.xlsx"))
            .unwrap();
        assert_eq!(dataset.name(), "cities");
        assert_eq!(dataset.row_count(), 2);
        assert_eq!(dataset.column_type("city"), Some(DataType::String));
        assert_eq!(dataset.column_type("pop"), Some(DataType::Int64));
        assert_eq!(dataset.column_type("area"), Some(DataType::Float64));
        assert!(dataset.value("pop", 1).is_null());
    }

    #[test]
    fn excel_sheet_needs_complete_headers() {
        let blank_header = sheet(&[
            &[Data::String("city".into()), Data::Empty],
            &[Data::String("Oslo".into()), Data::Int(1)],
        ]);
        assert!(matches!(
            ExcelReader::new().read_range(&blank_header, "Sheet1", Path::new("a.xlsx")),
            Err(ProcessingError::Malformed { .. })
        ));
        let empty: Range<Data> = Range::empty();
        assert!(ExcelReader::new()
            .read_range(&empty, "Sheet1", Path::new("a.xlsx"))
            .is_err());
    }

    #[test]
    fn format_detection_is_case_insensitive() {
        assert_eq!(FileFormat::from_path(Path::new("a.CSV")), Some(FileFormat::Csv));
        assert_eq!(FileFormat::from_path(Path::new("a.Xlsx")), Some(FileFormat::Excel));
        assert_eq!(FileFormat::from_path(Path::new("a")), None);
    }
}
