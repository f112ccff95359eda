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

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "chart-preview",
    version,
    about = "Chart previews and dataset inspection for stored CSV and Excel files"
)]
pub struct Cli {
    #[arg(
        long = "config",
        short = 'c',
        global = true,
        help = "Path to a TOML configuration file (defaults to ./tabula.toml when present)"
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long = "pretty",
        global = true,
        default_value_t = false,
        help = "Pretty-print JSON output"
    )]
    pub pretty: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a chart spec from a JSON request body.
    Preview {
        #[arg(
            long = "request",
            short = 'r',
            help = "File holding the request JSON; reads stdin when omitted or '-'"
        )]
        request: Option<PathBuf>,
    },
    /// List stored data files.
    Files,
    /// Show columns, types, stats and a preview of a stored file.
    Inspect { filename: String },
    /// Copy a local CSV or Excel file into the upload directory.
    Upload {
        path: PathBuf,
        #[arg(long = "name", help = "Name to store the file under (defaults to its own name)")]
        name: Option<String>,
    },
}
