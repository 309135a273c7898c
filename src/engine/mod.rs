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

//! Remote-facing stages of a model run.
//!
//! Everything here talks to the spreadsheet through the backend traits in
//! [`crate::sheets::backend`], so tests drive it with in-memory fakes.

pub mod extract;
pub mod orchestrate;
pub mod provision;
pub mod sensitivity;

use crate::sheets::backend::{SpreadsheetBackend, ValueRenderOption};
use crate::utils::{ModelError, a1};
use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

pub use orchestrate::ModelRun;
pub use sensitivity::SensitivitySolver;

/// Fails with every missing tab named when `required` is not a subset of
/// the spreadsheet's tabs.
pub async fn require_sheets(
    backend: &dyn SpreadsheetBackend,
    spreadsheet_id: &str,
    required: &[&str],
) -> Result<HashMap<String, i32>> {
    let sheet_ids = backend
        .sheet_ids(spreadsheet_id)
        .await
        .context("Failed to read spreadsheet metadata")?;
    let missing: Vec<String> = required
        .iter()
        .filter(|name| !sheet_ids.contains_key(**name))
        .map(|name| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(ModelError::MissingSheets(missing).into());
    }
    Ok(sheet_ids)
}

/// Whole tabs read with the `FORMULA` render option, in request order.
pub async fn read_tabs(
    backend: &dyn SpreadsheetBackend,
    spreadsheet_id: &str,
    tabs: &[&str],
) -> Result<Vec<Vec<Vec<Value>>>> {
    let ranges: Vec<String> = tabs.iter().map(|tab| a1::quote_sheet(tab)).collect();
    debug!("🔍 Reading tabs {:?}", ranges);
    let mut values = backend
        .batch_get(spreadsheet_id, &ranges, ValueRenderOption::Formula)
        .await
        .context("Failed to read mapping tabs")?;
    values.resize_with(tabs.len(), Vec::new);
    Ok(values)
}

/// First cell of a value range, empty when the API left it out.
pub(crate) fn first_cell(rows: &[Vec<Value>]) -> Value {
    rows.first()
        .and_then(|row| row.first())
        .cloned()
        .unwrap_or_else(|| Value::String(String::new()))
}

pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}
