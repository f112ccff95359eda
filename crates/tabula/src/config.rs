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

use crate::error::ConfigError;
use crate::profile::DEFAULT_PREVIEW_ROWS;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "TABULA";
pub const DEFAULT_CONFIG_FILE: &str = "tabula.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub data_dir: PathBuf,
    pub allowed_extensions: Vec<String>,
    pub max_file_size_mb: u64,
    pub max_storage_mb: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("data/raw/uploaded"),
            data_dir: PathBuf::from("data"),
            allowed_extensions: vec!["csv".into(), "xlsx".into(), "xls".into()],
            max_file_size_mb: 50,
            max_storage_mb: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    pub preview_rows: usize,
    /// Row count above which grouping work is spread over the rayon pool.
    pub parallel_threshold: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            preview_rows: DEFAULT_PREVIEW_ROWS,
            parallel_threshold: 10000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub preview: PreviewConfig,
}

impl AppConfig {
    /// Defaults, then `path` if it exists, then `TABULA__SECTION__KEY`
    /// variables from the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_layered(path, None)
    }

    /// Like [`AppConfig::load`], reading environment overrides from `env`
    /// instead of the process when it is given.
    pub fn load_layered(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, ConfigError> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let settings = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::from(file).required(path.is_some()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("storage.allowed_extensions")
                    .source(env),
            )
            .build()?;
        let loaded: AppConfig = settings.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| ConfigError::Invalid {
            field: field.to_string(),
            reason: reason.to_string(),
        };
        if self.storage.allowed_extensions.is_empty() {
            return Err(invalid("storage.allowed_extensions", "must not be empty"));
        }
        if self.storage.max_file_size_mb == 0 {
            return Err(invalid("storage.max_file_size_mb", "must be positive"));
        }
        if self.storage.max_storage_mb < self.storage.max_file_size_mb {
            return Err(invalid(
                "storage.max_storage_mb",
                "must be at least storage.max_file_size_mb",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> Option<config::Map<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn defaults_without_file_or_env() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let loaded = AppConfig::load_layered(None, env(&[])).unwrap();
        assert_eq!(loaded, AppConfig::default());
        assert!(AppConfig::load_layered(Some(&missing), env(&[])).is_err());
    }

    #[test]
    fn file_then_env_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[storage]\nupload_dir = \"/srv/uploads\"\nmax_file_size_mb = 10\n\n[preview]\npreview_rows = 8"
        )
        .unwrap();
        let loaded = AppConfig::load_layered(
            Some(file.path()),
            env(&[
                ("TABULA__PREVIEW__PREVIEW_ROWS", "3"),
                ("TABULA__STORAGE__ALLOWED_EXTENSIONS", "csv,xlsx"),
            ]),
        )
        .unwrap();
        assert_eq!(loaded.storage.upload_dir, PathBuf::from("/srv/uploads"));
        assert_eq!(loaded.storage.max_file_size_mb, 10);
        assert_eq!(loaded.storage.max_storage_mb, 500);
        assert_eq!(loaded.preview.preview_rows, 3);
        assert_eq!(loaded.storage.allowed_extensions, vec!["csv", "xlsx"]);
    }

    #[test]
    fn inconsistent_limits_are_rejected() {
        let err = AppConfig::load_layered(
            None,
            env(&[("TABULA__STORAGE__MAX_STORAGE_MB", "1")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
