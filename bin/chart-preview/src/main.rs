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

mod args;

use anyhow::{Context, Result};
use args::{Cli, Command};
use clap::Parser;
use serde_json::{json, Value};
use std::io::Read;
use std::path::Path;
use std::process::ExitCode;
use tabula::{Tabula, TabulaError};
use tracing::{debug, error};

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(output) => {
            print_json(&output, cli.pretty);
            ExitCode::SUCCESS
        }
        Err(err) => {
            let (status, message) = classify(&err);
            let category = err
                .downcast_ref::<TabulaError>()
                .map_or("Internal", TabulaError::category);
            if status >= 500 {
                error!(category, error = %format!("{err:#}"), "command failed");
            } else {
                debug!(category, status, error = %message, "request rejected");
            }
            print_json(&json!({ "error": message, "status": status }), cli.pretty);
            ExitCode::from(exit_code(status))
        }
    }
}

fn run(cli: &Cli) -> Result<Value> {
    let tabula =
        Tabula::from_config_file(cli.config.as_deref()).context("failed to load configuration")?;
    match &cli.command {
        Command::Preview { request } => {
            let body = read_request(request.as_deref())?;
            Ok(tabula.preview_json(&body)?)
        }
        Command::Files => Ok(json!({ "files": tabula.list_files()? })),
        Command::Inspect { filename } => Ok(serde_json::to_value(tabula.inspect(filename)?)?),
        Command::Upload { path, name } => {
            let name = match name {
                Some(name) => name.clone(),
                None => path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("upload path has no file name")?,
            };
            Ok(serde_json::to_value(tabula.upload(path, &name)?)?)
        }
    }
}

fn read_request(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read request from {}", path.display())),
        _ => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("failed to read request from stdin")?;
            Ok(body)
        }
    }
}

/// HTTP-style status and client-safe message for a failed command.
fn classify(err: &anyhow::Error) -> (u16, String) {
    match err.downcast_ref::<TabulaError>() {
        Some(e) => (e.status_code(), e.user_message()),
        None => (500, format!("{err:#}")),
    }
}

fn exit_code(status: u16) -> u8 {
    match status {
        400 => 2,
        404 => 3,
        _ => 1,
    }
}

fn print_json(value: &Value, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match rendered {
        Ok(text) => println!("{text}"),
        Err(e) => error!(error = %e, "failed to render output"),
    }
}
