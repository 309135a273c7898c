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

//! A full model run against one spreadsheet.
//!
//! Stages run strictly in sequence: mapping, literal fields, planned blocks,
//! extraction. The caller must not run two of these against the same
//! spreadsheet at once; concurrent inserts would invalidate each other's row
//! numbers.

use super::extract::{ExtractedTable, extract_tables, extract_variables};
use super::{read_tabs, require_sheets};
use crate::model::mapping::{
    MODEL_VARIABLE_MAPPING_SHEET, REQUIRED_SHEETS, TABLE_MAPPING_SHEET, VARIABLE_MAPPING_SHEET,
};
use crate::model::{ModelVariableMapping, UnderwritingPayload, parse_table_mapping, parse_variable_mapping};
use crate::plan::blocks::fields::plan_field_writes;
use crate::plan::{ModelPlan, PlanSummary, build_plan};
use crate::sheets::backend::{SpreadsheetBackend, ValueInputOption, ValueWrite};
use crate::sheets::dispatch::{DispatchReport, dispatch};
use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{error, info};

/// Seconds spent per phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Timings {
    pub load_mapping: f64,
    pub update_sheet: f64,
    pub build_model: f64,
    pub extract_tables: f64,
    pub extract_variables: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelOutput {
    pub sheet_url: String,
    pub levered_irr: Option<Value>,
    pub levered_moic: Option<Value>,
    pub variables: Map<String, Value>,
    pub tables: Vec<ExtractedTable>,
    pub dispatch: DispatchReport,
    pub timings: Timings,
}

/// What a dry run would have sent.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedRun {
    pub sheet_url: String,
    pub summary: PlanSummary,
    pub field_writes: usize,
    pub plan: ModelPlan,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RunOutcome {
    Completed(Box<ModelOutput>),
    Planned(Box<PlannedRun>),
}

pub struct ModelRun<'a> {
    sheets: &'a dyn SpreadsheetBackend,
}

fn elapsed(since: Instant) -> f64 {
    since.elapsed().as_secs_f64()
}

impl<'a> ModelRun<'a> {
    pub fn new(sheets: &'a dyn SpreadsheetBackend) -> Self {
        Self { sheets }
    }

    /// Drives `payload` through the spreadsheet and reads the results back.
    ///
    /// With `dry_run` the mapping is still read, since planning needs it,
    /// but nothing is written.
    ///
    /// # Errors
    ///
    /// * [`crate::utils::ModelError::MissingSheets`] naming every absent mapping tab
    /// * [`crate::utils::ModelError::InvalidPayload`] before any write
    /// * Dispatch and extraction failures, with the service message
    pub async fn execute(
        &self,
        spreadsheet_id: &str,
        sheet_url: &str,
        payload: &UnderwritingPayload,
        dry_run: bool,
    ) -> Result<RunOutcome> {
        info!("📤 Starting model run for {}", sheet_url);
        let started = Instant::now();
        let mut timings = Timings::default();

        let phase = Instant::now();
        require_sheets(self.sheets, spreadsheet_id, &REQUIRED_SHEETS).await?;
        let tabs = read_tabs(
            self.sheets,
            spreadsheet_id,
            &[MODEL_VARIABLE_MAPPING_SHEET, TABLE_MAPPING_SHEET, VARIABLE_MAPPING_SHEET],
        )
        .await?;
        let mapping = ModelVariableMapping::from_rows(&tabs[0]);
        let table_mapping = parse_table_mapping(&tabs[1]);
        let variable_mapping = parse_variable_mapping(&tabs[2]);
        timings.load_mapping = elapsed(phase);
        info!(
            "✅ Loaded mapping with {} rows in {:.3}s",
            mapping.len(),
            timings.load_mapping
        );

        let plan = build_plan(payload, &mapping)?;
        let field_groups = plan_field_writes(&payload.field_values, &mapping);

        if dry_run {
            let summary = plan.summary();
            let field_writes = field_groups.iter().map(|group| group.cells.len()).sum();
            info!(
                "🔍 Dry run: {:?} model, {} inserts, {} formats, {} writes, {} field values",
                plan.variant, summary.inserts, summary.formats, summary.writes, field_writes
            );
            return Ok(RunOutcome::Planned(Box::new(PlannedRun {
                sheet_url: sheet_url.to_string(),
                summary,
                field_writes,
                plan,
            })));
        }

        let phase = Instant::now();
        for group in &field_groups {
            let writes: Vec<ValueWrite> = group
                .cells
                .iter()
                .map(|(range, value)| ValueWrite {
                    range: range.clone(),
                    values: vec![vec![value.clone()]],
                })
                .collect();
            match self
                .sheets
                .write_values(spreadsheet_id, &writes, ValueInputOption::UserEntered)
                .await
            {
                Ok(_) => info!("✅ Batch updated {} cells in '{}'", writes.len(), group.sheet),
                Err(err) => error!("❌ Failed batch update for sheet '{}': {:#}", group.sheet, err),
            }
        }
        timings.update_sheet = elapsed(phase);

        let phase = Instant::now();
        let report = dispatch(self.sheets, spreadsheet_id, &plan).await?;
        timings.build_model = elapsed(phase);

        let phase = Instant::now();
        let tables = extract_tables(self.sheets, spreadsheet_id, &table_mapping).await?;
        timings.extract_tables = elapsed(phase);

        let phase = Instant::now();
        let variables = extract_variables(self.sheets, spreadsheet_id, &variable_mapping).await?;
        timings.extract_variables = elapsed(phase);

        timings.total = elapsed(started);
        info!("⏱️ Total time: {:.3}s", timings.total);

        Ok(RunOutcome::Completed(Box::new(ModelOutput {
            sheet_url: sheet_url.to_string(),
            levered_irr: variables.get("Levered IRR").cloned(),
            levered_moic: variables.get("Levered MOIC").cloned(),
            variables,
            tables,
            dispatch: report,
            timings,
        })))
    }
}
