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

//! Reads results back out of a finished model.

use super::first_cell;
use crate::model::mapping::{TableMappingEntry, VariableMappingEntry};
use crate::sheets::backend::{CellColor, GridCell, SpreadsheetBackend, ValueRenderOption};
use crate::utils::{ModelError, a1};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Backgrounds darker than this get white text.
const LUMINANCE_THRESHOLD: f64 = 140.0;
const MAX_RANGES_PER_READ: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedTable {
    pub table_name: String,
    pub table_order: Value,
    pub summary: Value,
    /// Normalized as `'Sheet'!A1:B2`.
    pub location: String,
    pub data: Vec<Vec<String>>,
    /// Inline CSS per cell, same shape as `data`.
    pub styles: Vec<Vec<String>>,
}

/// A channel the service leaves out reads as 255, also when the other
/// channels of the same color are present.
fn channel(value: Option<f32>) -> i32 {
    (f64::from(value.unwrap_or(1.0)) * 255.0) as i32
}

/// `background-color: rgb(r,g,b);` plus bold and contrast markers.
pub fn cell_style(cell: &GridCell) -> String {
    let color = cell.background.unwrap_or(CellColor::default());
    let (r, g, b) = (channel(color.red), channel(color.green), channel(color.blue));
    let mut style = format!("background-color: rgb({},{},{});", r, g, b);
    if cell.bold {
        style.push_str(" font-weight: bold;");
    }
    let luminance = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
    if luminance < LUMINANCE_THRESHOLD {
        style.push_str(" color: white;");
    }
    style
}

/// Integer orders first, ascending; anything else keeps its place after them.
fn order_key(order: &Value) -> (u8, i64) {
    match order.as_i64() {
        Some(order) => (0, order),
        None => (1, 0),
    }
}

/// Fetches every mapped table with its styling, sorted by `table_order`.
/// Entries without a `Sheet!Range` location are skipped with a warning.
///
/// # Errors
///
/// A range the service rejects fails the whole extraction.
pub async fn extract_tables(
    backend: &dyn SpreadsheetBackend,
    spreadsheet_id: &str,
    entries: &[TableMappingEntry],
) -> Result<Vec<ExtractedTable>> {
    let mut tables = Vec::new();
    for entry in entries {
        if !entry.table_location.contains('!') {
            warn!(
                "⚠️ Skipping table '{}' with invalid location '{}'",
                entry.table_name, entry.table_location
            );
            continue;
        }
        let location = a1::normalize_range(&entry.table_location);
        debug!("🔍 Fetching table '{}' from {}", entry.table_name, location);

        let grid = backend
            .read_grid(spreadsheet_id, &location)
            .await
            .map_err(|err| {
                ModelError::Extraction(format!(
                    "table '{}' at {}: {:#}",
                    entry.table_name, location, err
                ))
            })?;

        let data = grid
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| cell.formatted_value.clone().unwrap_or_default())
                    .collect()
            })
            .collect();
        let styles = grid
            .iter()
            .map(|row| row.iter().map(cell_style).collect())
            .collect();

        tables.push(ExtractedTable {
            table_name: entry.table_name.clone(),
            table_order: entry.table_order.clone(),
            summary: entry.summary.clone(),
            location,
            data,
            styles,
        });
    }

    tables.sort_by_key(|table| order_key(&table.table_order));
    info!("✅ Extracted {} tables", tables.len());
    Ok(tables)
}

/// Resolves the variable map. `=Sheet!Cell` locations are read as formatted
/// values in as few calls as possible; anything else is a literal.
pub async fn extract_variables(
    backend: &dyn SpreadsheetBackend,
    spreadsheet_id: &str,
    entries: &[VariableMappingEntry],
) -> Result<Map<String, Value>> {
    let mut variables = Map::new();
    let mut references: Vec<(&str, String)> = Vec::new();

    for entry in entries {
        if entry.variable_name.trim().is_empty() || super::is_blank(&entry.variable_location) {
            continue;
        }
        match &entry.variable_location {
            Value::String(location) if location.starts_with('=') && location.contains('!') => {
                references.push((entry.variable_name.as_str(), a1::normalize_range(location)));
            }
            literal => {
                variables.insert(entry.variable_name.clone(), literal.clone());
            }
        }
    }

    for chunk in references.chunks(MAX_RANGES_PER_READ) {
        let ranges: Vec<String> = chunk.iter().map(|(_, range)| range.clone()).collect();
        let values = backend
            .batch_get(spreadsheet_id, &ranges, ValueRenderOption::FormattedValue)
            .await
            .context("Failed to read mapped variables")?;
        for (index, (name, _)) in chunk.iter().enumerate() {
            let value = values
                .get(index)
                .map(|rows| first_cell(rows))
                .unwrap_or_else(|| Value::String(String::new()));
            variables.insert(name.to_string(), value);
        }
    }

    info!(
        "📈 Extracted {} variables ({} read from the sheet)",
        variables.len(),
        references.len()
    );
    Ok(variables)
}
