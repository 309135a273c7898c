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

//! Submits a [`ModelPlan`] in two round-trips.
//!
//! Inserts and formats go first in a single batchUpdate, in plan order, so
//! that every row number baked into a write is already valid when the
//! values call lands. A failed structural call stops the run before any
//! value is written. Inserts that did apply are not rolled back.

use super::backend::{SpreadsheetBackend, StructureChange, ValueInputOption, ValueWrite};
use crate::plan::ModelPlan;
use crate::plan::ops::BatchOperation;
use crate::utils::ModelError;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub structural_changes: usize,
    pub value_ranges: usize,
    pub updated_cells: usize,
}

/// Structural changes and value writes of a plan, split apart.
#[derive(Debug, Default)]
struct Partitioned<'a> {
    structural: Vec<&'a BatchOperation>,
    writes: Vec<ValueWrite>,
}

fn partition(operations: &[BatchOperation]) -> Partitioned<'_> {
    let mut parts = Partitioned::default();
    for op in operations {
        match op {
            BatchOperation::Write { range, values } => {
                if values.iter().all(Vec::is_empty) {
                    debug!("🔍 Skipping empty write to {}", range);
                    continue;
                }
                parts.writes.push(ValueWrite {
                    range: range.clone(),
                    values: values.clone(),
                });
            }
            other => parts.structural.push(other),
        }
    }
    parts
}

/// Translates 1-based plan rows into 0-based, end-exclusive API indexes.
fn to_structure_changes(
    operations: &[&BatchOperation],
    sheet_ids: &HashMap<String, i32>,
) -> Result<Vec<StructureChange>, ModelError> {
    let mut missing: Vec<String> = operations
        .iter()
        .filter_map(|op| match op {
            BatchOperation::Insert { sheet, .. } | BatchOperation::Format { sheet, .. } => {
                (!sheet_ids.contains_key(sheet)).then(|| sheet.clone())
            }
            BatchOperation::Write { .. } => None,
        })
        .collect();
    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(ModelError::MissingSheets(missing));
    }

    Ok(operations
        .iter()
        .filter_map(|op| match op {
            BatchOperation::Insert {
                sheet,
                start_row,
                count,
                inherit_from_before,
            } => {
                let start_index = start_row.saturating_sub(1);
                Some(StructureChange::InsertRows {
                    sheet_id: sheet_ids[sheet],
                    start_index,
                    end_index: start_index + count,
                    inherit_from_before: *inherit_from_before,
                })
            }
            BatchOperation::Format {
                sheet,
                start_row,
                row_count,
                columns,
                style,
            } => {
                let start_row_index = start_row.saturating_sub(1);
                Some(StructureChange::FormatCells {
                    sheet_id: sheet_ids[sheet],
                    start_row_index,
                    end_row_index: start_row_index + row_count,
                    columns: *columns,
                    style: style.clone(),
                })
            }
            BatchOperation::Write { .. } => None,
        })
        .collect())
}

/// Applies a plan to `spreadsheet_id`.
///
/// # Errors
///
/// * If a sheet the plan touches does not exist in the spreadsheet
/// * If either submission fails; the service message is kept verbatim
pub async fn dispatch(
    backend: &dyn SpreadsheetBackend,
    spreadsheet_id: &str,
    plan: &ModelPlan,
) -> Result<DispatchReport> {
    let parts = partition(&plan.operations);
    let mut report = DispatchReport::default();

    if !parts.structural.is_empty() {
        let sheet_ids = backend.sheet_ids(spreadsheet_id).await?;
        let changes = to_structure_changes(&parts.structural, &sheet_ids)?;
        info!(
            "📦 Applying {} structural changes in one batch",
            changes.len()
        );
        backend
            .apply_structure(spreadsheet_id, &changes)
            .await
            .context("Structural batch failed, no values were written")?;
        report.structural_changes = changes.len();
    }

    if !parts.writes.is_empty() {
        info!("📦 Writing {} value ranges", parts.writes.len());
        report.updated_cells = backend
            .write_values(spreadsheet_id, &parts.writes, ValueInputOption::UserEntered)
            .await
            .context("Value batch failed after structural changes were applied")?;
        report.value_ranges = parts.writes.len();
    }

    info!(
        "✅ Dispatched {} structural changes and {} value ranges ({} cells)",
        report.structural_changes, report.value_ranges, report.updated_cells
    );
    Ok(report)
}
