// Copyright 2025 Webmobix Solutions AG
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUTHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Google Sheets API error: {0}")]
    SheetsApi(String),

    #[error("Google Drive API error: {0}")]
    DriveApi(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Missing required sheets: {}", .0.join(", "))]
    MissingSheets(Vec<String>),

    #[error("Invalid template URL: {0}")]
    InvalidTemplateUrl(String),

    #[error("Missing cell locations for: {}", .0.join(", "))]
    MissingCells(Vec<String>),

    #[error("Invalid underwriting payload: {0}")]
    InvalidPayload(String),

    #[error("Layout error: {0}")]
    Layout(String),

    #[error("Sensitivity analysis failed: {0}")]
    Sensitivity(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("JSON parsing error: {0}")]
    JsonParsing(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}
