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

//! Service seams the engine talks through.
//!
//! The Google implementations live in [`super::manager`] and [`super::drive`];
//! tests substitute in-memory fakes. Every method takes the spreadsheet id so
//! one client can serve the model sheet and temporary export copies alike.

use crate::plan::ops::CellStyle;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// How the service interprets written values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueInputOption {
    /// Parsed as if typed into the UI: formulas evaluate, `5%` becomes a percent.
    UserEntered,
    Raw,
}

impl ValueInputOption {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            ValueInputOption::UserEntered => "USER_ENTERED",
            ValueInputOption::Raw => "RAW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRenderOption {
    FormattedValue,
    Formula,
}

impl ValueRenderOption {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            ValueRenderOption::FormattedValue => "FORMATTED_VALUE",
            ValueRenderOption::Formula => "FORMULA",
        }
    }
}

/// A structural change against a numeric sheet id. Indexes are 0-based and
/// end-exclusive, the way the API's `GridRange` counts.
#[derive(Debug, Clone, PartialEq)]
pub enum StructureChange {
    InsertRows {
        sheet_id: i32,
        start_index: u32,
        end_index: u32,
        inherit_from_before: bool,
    },
    FormatCells {
        sheet_id: i32,
        start_row_index: u32,
        end_row_index: u32,
        columns: Option<(usize, usize)>,
        style: CellStyle,
    },
    DeleteSheet {
        sheet_id: i32,
    },
    HideSheet {
        sheet_id: i32,
    },
}

/// One rectangle of values addressed in A1 notation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueWrite {
    pub range: String,
    pub values: Vec<Vec<Value>>,
}

/// Background channels as returned by the API. Channels the API omits are
/// `None` and read as full intensity.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CellColor {
    pub red: Option<f32>,
    pub green: Option<f32>,
    pub blue: Option<f32>,
}

/// Formatted value plus the style bits extraction cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridCell {
    pub formatted_value: Option<String>,
    pub bold: bool,
    pub background: Option<CellColor>,
}

#[async_trait]
pub trait SpreadsheetBackend: Send + Sync {
    /// Tab title to numeric sheet id.
    async fn sheet_ids(&self, spreadsheet_id: &str) -> Result<HashMap<String, i32>>;

    /// Submits every change in one batchUpdate call.
    async fn apply_structure(&self, spreadsheet_id: &str, changes: &[StructureChange]) -> Result<()>;

    /// Writes values, returning the number of updated cells.
    async fn write_values(
        &self,
        spreadsheet_id: &str,
        writes: &[ValueWrite],
        input: ValueInputOption,
    ) -> Result<usize>;

    /// Values for each range, in request order. Missing trailing cells are
    /// simply absent from the rows.
    async fn batch_get(
        &self,
        spreadsheet_id: &str,
        ranges: &[String],
        render: ValueRenderOption,
    ) -> Result<Vec<Vec<Vec<Value>>>>;

    /// Formatted values with style metadata for one range.
    async fn read_grid(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<GridCell>>>;
}

#[async_trait]
pub trait DriveBackend: Send + Sync {
    async fn find_folder(&self, name: &str, parent: Option<&str>) -> Result<Option<String>>;

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String>;

    /// Non-folder file with exactly this name, inside `parent` when given.
    async fn find_file(&self, name: &str, parent: Option<&str>) -> Result<Option<String>>;

    /// One copy request, never retried here. A timed out request may still
    /// have created the file, so callers look it up before trying again.
    async fn copy_file(&self, file_id: &str, name: &str, parent: Option<&str>) -> Result<String>;

    async fn delete_file(&self, file_id: &str) -> Result<()>;

    /// Downloads the spreadsheet as an `.xlsx` workbook.
    async fn export_xlsx(&self, file_id: &str) -> Result<Vec<u8>>;
}
