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

use crate::config::AppConfig;
use crate::data::{read_dataset, Dataset};
use crate::error::utils::{file_not_found, io_error};
use crate::error::{Result, ValidationError, ValidationResult};
use crate::profile::{DatasetProfile, Profiler};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MB: u64 = 1024 * 1024;

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("filename pattern is valid"));

/// Reduces a client supplied name to a plain ASCII basename that is safe to
/// join onto a storage directory.
pub fn secure_filename(name: &str) -> ValidationResult<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let joined = base.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = UNSAFE_CHARS.replace_all(&joined, "");
    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c == '_');
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidFileName {
            name: name.to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn extension(name: &str) -> Option<String> {
    name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub message: &'static str,
    #[serde(flatten)]
    pub profile: DatasetProfile,
    pub file_size: u64,
    pub file_size_formatted: String,
}

/// Where datasets live and how much may be stored. Built once at startup and
/// passed to whatever needs file access.
#[derive(Debug, Clone)]
pub struct StorageContext {
    upload_dir: PathBuf,
    data_dir: PathBuf,
    allowed_extensions: Vec<String>,
    max_file_size_mb: u64,
    max_storage_mb: u64,
    profiler: Profiler,
}

impl StorageContext {
    pub fn new(upload_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        let defaults = AppConfig::default();
        Self {
            upload_dir: upload_dir.into(),
            data_dir: data_dir.into(),
            allowed_extensions: defaults.storage.allowed_extensions,
            max_file_size_mb: defaults.storage.max_file_size_mb,
            max_storage_mb: defaults.storage.max_storage_mb,
            profiler: Profiler::new().with_preview_rows(defaults.preview.preview_rows),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.storage.upload_dir, &config.storage.data_dir)
            .with_allowed_extensions(config.storage.allowed_extensions.clone())
            .with_limits(config.storage.max_file_size_mb, config.storage.max_storage_mb)
            .with_preview_rows(config.preview.preview_rows)
    }

    pub fn with_allowed_extensions(mut self, extensions: Vec<String>) -> Self {
        self.allowed_extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn with_limits(mut self, max_file_size_mb: u64, max_storage_mb: u64) -> Self {
        self.max_file_size_mb = max_file_size_mb;
        self.max_storage_mb = max_storage_mb;
        self
    }

    pub fn with_preview_rows(mut self, rows: usize) -> Self {
        self.profiler = self.profiler.with_preview_rows(rows);
        self
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        extension(name).is_some_and(|ext| self.allowed_extensions.contains(&ext))
    }

    fn unsupported(&self, name: &str) -> ValidationError {
        ValidationError::UnsupportedFileType {
            name: name.to_string(),
            allowed: self.allowed_extensions.join(", "),
        }
    }

    /// Finds a stored file, looking in the upload directory before the data
    /// directory.
    pub fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let name = secure_filename(filename)?;
        if !self.is_allowed(&name) {
            return Err(self.unsupported(&name).into());
        }
        for dir in [&self.upload_dir, &self.data_dir] {
            let candidate = dir.join(&name);
            if candidate.is_file() {
                debug!(filename, path = %candidate.display(), "file resolved");
                return Ok(candidate);
            }
        }
        Err(file_not_found(filename))
    }

    pub fn load(&self, filename: &str) -> Result<Dataset> {
        let path = self.resolve(filename)?;
        read_dataset(&path).map_err(|e| e.sanitize("load"))
    }

    pub fn inspect(&self, filename: &str) -> Result<DatasetProfile> {
        let dataset = self.load(filename)?;
        Ok(self.profiler.profile(filename, &dataset))
    }

    /// Allowed files across both directories, sorted and without duplicates.
    pub fn list_files(&self) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();
        for dir in [&self.upload_dir, &self.data_dir] {
            let entries = match fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(io_error(dir, e).into()),
            };
            for entry in entries {
                let entry = entry.map_err(|e| io_error(dir, e))?;
                if !entry.path().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy().into_owned();
                if self.is_allowed(&name) {
                    names.insert(name);
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    fn stored_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for entry in fs::read_dir(&self.upload_dir).map_err(|e| io_error(&self.upload_dir, e))? {
            let entry = entry.map_err(|e| io_error(&self.upload_dir, e))?;
            let metadata = entry.metadata().map_err(|e| io_error(&entry.path(), e))?;
            if metadata.is_file() {
                total += metadata.len();
            }
        }
        Ok(total)
    }

    fn free_name(&self, filename: &str) -> PathBuf {
        let candidate = self.upload_dir.join(filename);
        if !candidate.exists() {
            return candidate;
        }
        let (base, ext) = match filename.rsplit_once('.') {
            Some((base, ext)) => (base, format!(".{ext}")),
            None => (filename, String::new()),
        };
        (1..)
            .map(|n| self.upload_dir.join(format!("{base}_{n}{ext}")))
            .find(|path| !path.exists())
            .unwrap_or(candidate)
    }

    /// Copies `source` into the upload directory under a sanitized, unused
    /// name and profiles it. The copy is removed if it cannot be read.
    pub fn ingest(&self, source: &Path, original_name: &str) -> Result<UploadReceipt> {
        if !self.is_allowed(original_name) {
            return Err(self.unsupported(original_name).into());
        }
        let filename = secure_filename(original_name)?;
        if !self.is_allowed(&filename) {
            return Err(self.unsupported(original_name).into());
        }

        let size = fs::metadata(source).map_err(|e| io_error(source, e))?.len();
        if size > self.max_file_size_mb * MB {
            return Err(ValidationError::FileTooLarge {
                limit_mb: self.max_file_size_mb,
            }
            .into());
        }

        fs::create_dir_all(&self.upload_dir).map_err(|e| io_error(&self.upload_dir, e))?;
        if self.stored_bytes()? + size > self.max_storage_mb * MB {
            return Err(ValidationError::StorageFull.into());
        }

        let target = self.free_name(&filename);
        fs::copy(source, &target).map_err(|e| io_error(&target, e))?;

        match self.profile_stored(&target) {
            Ok(receipt) => {
                info!(
                    filename = %receipt.profile.filename,
                    rows = receipt.profile.row_count,
                    bytes = receipt.file_size,
                    "upload stored"
                );
                Ok(receipt)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&target) {
                    warn!(path = %target.display(), error = %cleanup, "failed to remove rejected upload");
                }
                Err(e.sanitize("ingest"))
            }
        }
    }

    fn profile_stored(&self, path: &Path) -> Result<UploadReceipt> {
        let dataset = read_dataset(path)?;
        if dataset.column_count() == 0 {
            return Err(ValidationError::EmptyDataset { what: "columns" }.into());
        }
        if dataset.row_count() == 0 {
            return Err(ValidationError::EmptyDataset { what: "data rows" }.into());
        }
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let file_size = fs::metadata(path).map_err(|e| io_error(path, e))?.len();
        Ok(UploadReceipt {
            message: "File uploaded successfully",
            profile: self.profiler.profile(&filename, &dataset),
            file_size,
            file_size_formatted: format!("{:.2}MB", file_size as f64 / MB as f64),
        })
    }
}
