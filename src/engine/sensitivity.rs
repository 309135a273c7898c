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

//! Two-way IRR/MOIC tables over acquisition price and exit cap rate.
//!
//! The spreadsheet recalculates on its own schedule, so every input write is
//! followed by a fixed settle wait before the outputs are read. The grid is
//! all-or-nothing: any failed write or read, or an output that stays empty
//! after the configured re-reads, aborts the request. The two input cells
//! are restored in every case.

use super::{first_cell, is_blank, read_tabs, require_sheets};
use crate::config::SensitivitySettings;
use crate::model::mapping::{MODEL_VARIABLE_MAPPING_SHEET, ModelVariableMapping};
use crate::plan::blocks::ASSUMPTIONS;
use crate::sheets::backend::{SpreadsheetBackend, ValueInputOption, ValueRenderOption, ValueWrite};
use crate::utils::{ModelError, a1, json_value_to_string};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Number, Value};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

const OTHER_REFERENCE: &str = "Other Reference";
const ACQUISITION_PRICE: (&str, &str) = ("General Property Assumptions", "Acquisition Price");
/// Tried in order; retail-only templates carry only the second.
const EXIT_CAP_RATES: [(&str, &str); 2] = [
    ("Exit Assumptions", "Multifamily Applied Exit Cap Rate"),
    ("Exit Assumptions", "Retail Applied Exit Cap Rate"),
];

/// Strips `'` and `,` and parses `12.5%` or `2.95x` into a number. Anything
/// that does not parse comes back unchanged.
pub fn clean_number(value: &Value) -> Value {
    let Value::String(raw) = value else {
        return value.clone();
    };
    let cleaned = raw.trim().replace(['\'', ','], "");
    let as_number = |text: &str| {
        text.trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
    };

    if let Some(percent) = cleaned.strip_suffix('%') {
        return as_number(percent.trim_start_matches('%')).unwrap_or(Value::String(cleaned));
    }
    if cleaned.to_lowercase().ends_with('x') {
        let multiple = &cleaned[..cleaned.len() - 1];
        return as_number(multiple).unwrap_or(Value::String(cleaned));
    }
    as_number(&cleaned).unwrap_or_else(|| value.clone())
}

/// `6.0` renders as `6%`, `6.25` as `6.25%`.
fn percent_text(value: &Value) -> String {
    format!("{}%", json_value_to_string(value))
}

/// One cell, with bare references placed on the Assumptions tab.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SheetCell {
    sheet: String,
    row: u32,
    col: usize,
}

impl SheetCell {
    fn locate(location: &str) -> Option<Self> {
        let cell = a1::parse_cell(location)?;
        Some(Self {
            sheet: cell.sheet.unwrap_or_else(|| ASSUMPTIONS.to_string()),
            row: cell.row,
            col: cell.col,
        })
    }

    fn range(&self) -> String {
        self.block(1, 1)
    }

    fn block(&self, rows: usize, cols: usize) -> String {
        a1::sheet_range(
            &self.sheet,
            self.col,
            self.row,
            self.col + cols.saturating_sub(1),
            self.row + rows.saturating_sub(1) as u32,
        )
    }

    /// Top-left body cell of a table whose cap rates run down from `cap`
    /// and whose prices run across from `price`.
    fn body(price: &SheetCell, cap: &SheetCell) -> Self {
        Self {
            sheet: price.sheet.clone(),
            row: cap.row,
            col: price.col,
        }
    }
}

/// Mapped cells the solver reads and writes.
#[derive(Debug, Clone)]
struct SensitivityCells {
    purchase_price: SheetCell,
    exit_cap: SheetCell,
    irr: SheetCell,
    moic: SheetCell,
    prices: [SheetCell; 2],
    caps: [SheetCell; 2],
}

impl SensitivityCells {
    /// Every missing location is reported at once.
    fn resolve(mapping: &ModelVariableMapping) -> Result<Self, ModelError> {
        let locate = |section: &str, key: &str| {
            mapping
                .resolve(section, key)
                .and_then(|location| SheetCell::locate(&location))
        };
        let mut missing = Vec::new();
        let mut require = |(section, key): (&str, &str), found: Option<SheetCell>| {
            if found.is_none() {
                missing.push(format!("{} / {}", section, key));
            }
            found
        };

        let exit_cap = EXIT_CAP_RATES.iter().find_map(|&(section, key)| {
            let found = locate(section, key);
            if found.is_some() {
                debug!("🔍 Using {} for the exit cap rate", key);
            }
            found
        });
        let other = |key| (OTHER_REFERENCE, key);

        let purchase_price = require(ACQUISITION_PRICE, locate(ACQUISITION_PRICE.0, ACQUISITION_PRICE.1));
        let exit_cap = require(EXIT_CAP_RATES[0], exit_cap);
        let irr = require(other("Levered IRR"), locate(OTHER_REFERENCE, "Levered IRR"));
        let moic = require(other("Levered MOIC"), locate(OTHER_REFERENCE, "Levered MOIC"));
        let price_1 = require(
            other("Sensitivity Purchase Price 1"),
            locate(OTHER_REFERENCE, "Sensitivity Purchase Price 1"),
        );
        let price_2 = require(
            other("Sensitivity Purchase Price 2"),
            locate(OTHER_REFERENCE, "Sensitivity Purchase Price 2"),
        );
        let cap_1 = require(
            other("Sensitivity Exit Cap Rate 1"),
            locate(OTHER_REFERENCE, "Sensitivity Exit Cap Rate 1"),
        );
        let cap_2 = require(
            other("Sensitivity Exit Cap Rate 2"),
            locate(OTHER_REFERENCE, "Sensitivity Exit Cap Rate 2"),
        );

        match (purchase_price, exit_cap, irr, moic, price_1, price_2, cap_1, cap_2) {
            (
                Some(purchase_price),
                Some(exit_cap),
                Some(irr),
                Some(moic),
                Some(price_1),
                Some(price_2),
                Some(cap_1),
                Some(cap_2),
            ) => Ok(Self {
                purchase_price,
                exit_cap,
                irr,
                moic,
                prices: [price_1, price_2],
                caps: [cap_1, cap_2],
            }),
            _ => Err(ModelError::MissingCells(missing)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitivityGrid {
    pub cap_rates: Vec<Value>,
    pub acquisition_prices: Vec<Value>,
    /// One row per cap rate, one column per price.
    pub values: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityResult {
    pub irr_table: SensitivityGrid,
    pub moic_table: SensitivityGrid,
}

/// Outputs exactly as the sheet formatted them, kept for writing back.
#[derive(Debug, Default)]
struct RawGrid {
    irr: Vec<Vec<Value>>,
    moic: Vec<Vec<Value>>,
}

pub struct SensitivitySolver<'a> {
    backend: &'a dyn SpreadsheetBackend,
    spreadsheet_id: &'a str,
    settings: SensitivitySettings,
}

impl<'a> SensitivitySolver<'a> {
    pub fn new(
        backend: &'a dyn SpreadsheetBackend,
        spreadsheet_id: &'a str,
        settings: SensitivitySettings,
    ) -> Self {
        Self {
            backend,
            spreadsheet_id,
            settings,
        }
    }

    /// Seeds both tables' headers from `max_price` and `min_cap_rate` (in
    /// percent), then evaluates every `(cap rate, price)` pair.
    ///
    /// # Errors
    ///
    /// * [`ModelError::MissingCells`] when any mapped location is absent
    /// * [`ModelError::Sensitivity`] when a header does not hold exactly
    ///   `grid_size` values or an output stays empty
    /// * Any failed read or write, with the pair it happened at
    pub async fn run(&self, max_price: f64, min_cap_rate: f64) -> Result<SensitivityResult> {
        info!(
            "📊 Sensitivity analysis for max price {} and min cap rate {}%",
            max_price, min_cap_rate
        );
        require_sheets(self.backend, self.spreadsheet_id, &[MODEL_VARIABLE_MAPPING_SHEET]).await?;
        let tabs = read_tabs(self.backend, self.spreadsheet_id, &[MODEL_VARIABLE_MAPPING_SHEET]).await?;
        let mapping = ModelVariableMapping::from_rows(&tabs[0]);
        let cells = SensitivityCells::resolve(&mapping)?;

        self.seed_headers(&cells, max_price, min_cap_rate).await?;
        self.settle().await;
        let (cap_rates, prices) = self.read_headers(&cells).await?;
        let originals = self.read_originals(&cells).await?;

        let outcome: Result<RawGrid> = async {
            let grid = self.solve(&cells, &cap_rates, &prices).await?;
            self.write_tables(&cells, &grid).await?;
            Ok(grid)
        }
        .await;
        let restored = self.restore(&cells, &originals).await;

        let grid = match outcome {
            Ok(grid) => grid,
            Err(err) => {
                error!("❌ Sensitivity grid aborted: {:#}", err);
                if let Err(restore_err) = restored {
                    warn!("⚠️ Inputs could not be restored: {:#}", restore_err);
                }
                return Err(err);
            }
        };
        restored?;

        let table = |values: &[Vec<Value>]| SensitivityGrid {
            cap_rates: cap_rates.iter().map(clean_number).collect(),
            acquisition_prices: prices.iter().map(clean_number).collect(),
            values: values
                .iter()
                .map(|row| row.iter().map(clean_number).collect())
                .collect(),
        };
        info!("✅ Sensitivity grid complete");
        Ok(SensitivityResult {
            irr_table: table(&grid.irr),
            moic_table: table(&grid.moic),
        })
    }

    async fn settle(&self) {
        debug!("⏱️ Waiting {:?} for recalculation", self.settings.settle_delay);
        sleep(self.settings.settle_delay).await;
    }

    async fn write(&self, writes: Vec<ValueWrite>, input: ValueInputOption) -> Result<()> {
        self.backend
            .write_values(self.spreadsheet_id, &writes, input)
            .await
            .map(|_| ())
    }

    async fn seed_headers(&self, cells: &SensitivityCells, max_price: f64, min_cap_rate: f64) -> Result<()> {
        let price = Number::from_f64(max_price)
            .map(Value::Number)
            .ok_or_else(|| ModelError::Sensitivity(format!("max price {} is not finite", max_price)))?;
        let cap = Value::String(format!("{}%", min_cap_rate));

        let mut writes = Vec::new();
        for cell in &cells.prices {
            writes.push(single(cell, price.clone()));
        }
        for cell in &cells.caps {
            writes.push(single(cell, cap.clone()));
        }
        self.write(writes, ValueInputOption::Raw)
            .await
            .context("Failed to seed sensitivity headers")
    }

    /// Cap rates run down from the first table's cap cell, prices across
    /// from its price cell. The second table shares both headers.
    async fn read_headers(&self, cells: &SensitivityCells) -> Result<(Vec<Value>, Vec<Value>)> {
        let size = self.settings.grid_size;
        let ranges = [cells.caps[0].block(size, 1), cells.prices[0].block(1, size)];
        let values = self
            .backend
            .batch_get(self.spreadsheet_id, &ranges, ValueRenderOption::FormattedValue)
            .await
            .context("Failed to read sensitivity headers")?;

        let cap_rates: Vec<Value> = values
            .first()
            .into_iter()
            .flatten()
            .filter_map(|row| row.first())
            .filter(|value| !is_blank(value))
            .cloned()
            .collect();
        let prices: Vec<Value> = values
            .get(1)
            .and_then(|rows| rows.first())
            .into_iter()
            .flatten()
            .filter(|value| !is_blank(value))
            .cloned()
            .collect();

        if cap_rates.len() != size || prices.len() != size {
            return Err(ModelError::Sensitivity(format!(
                "expected {} cap rates and {} prices in the headers, found {} and {}",
                size,
                size,
                cap_rates.len(),
                prices.len()
            ))
            .into());
        }
        debug!("🔍 Cap rates {:?}, prices {:?}", cap_rates, prices);
        Ok((cap_rates, prices))
    }

    /// Inputs as entered, formulas included.
    async fn read_originals(&self, cells: &SensitivityCells) -> Result<[Value; 2]> {
        let ranges = [cells.purchase_price.range(), cells.exit_cap.range()];
        let values = self
            .backend
            .batch_get(self.spreadsheet_id, &ranges, ValueRenderOption::Formula)
            .await
            .context("Failed to read sensitivity inputs")?;
        let cell = |index: usize| values.get(index).map(|rows| first_cell(rows)).unwrap_or_default();
        Ok([cell(0), cell(1)])
    }

    async fn solve(&self, cells: &SensitivityCells, cap_rates: &[Value], prices: &[Value]) -> Result<RawGrid> {
        let mut grid = RawGrid::default();
        for cap_rate in cap_rates {
            let mut irr_row = Vec::with_capacity(prices.len());
            let mut moic_row = Vec::with_capacity(prices.len());
            for price in prices {
                let at = || {
                    format!(
                        "cap rate {} and price {}",
                        json_value_to_string(cap_rate),
                        json_value_to_string(price)
                    )
                };
                let writes = vec![
                    single(&cells.purchase_price, clean_number(price)),
                    single(&cells.exit_cap, Value::String(percent_text(&clean_number(cap_rate)))),
                ];
                self.write(writes, ValueInputOption::Raw)
                    .await
                    .with_context(|| format!("Failed to write sensitivity inputs at {}", at()))?;
                self.settle().await;

                let (irr, moic) = self
                    .read_outputs(cells)
                    .await
                    .with_context(|| format!("Failed to read sensitivity outputs at {}", at()))?;
                irr_row.push(irr);
                moic_row.push(moic);
            }
            grid.irr.push(irr_row);
            grid.moic.push(moic_row);
        }
        Ok(grid)
    }

    async fn read_outputs(&self, cells: &SensitivityCells) -> Result<(Value, Value)> {
        let ranges = [cells.irr.range(), cells.moic.range()];
        for attempt in 0..=self.settings.read_retries {
            let values = self
                .backend
                .batch_get(self.spreadsheet_id, &ranges, ValueRenderOption::FormattedValue)
                .await?;
            let irr = values.first().map(|rows| first_cell(rows)).unwrap_or_default();
            let moic = values.get(1).map(|rows| first_cell(rows)).unwrap_or_default();
            if !is_blank(&irr) && !is_blank(&moic) {
                return Ok((irr, moic));
            }
            if attempt < self.settings.read_retries {
                debug!("🔁 Outputs still empty, re-reading (attempt {})", attempt + 1);
                self.settle().await;
            }
        }
        Err(ModelError::Sensitivity(format!(
            "IRR or MOIC output stayed empty after {} reads",
            self.settings.read_retries + 1
        ))
        .into())
    }

    async fn write_tables(&self, cells: &SensitivityCells, grid: &RawGrid) -> Result<()> {
        let rows = grid.irr.len();
        let cols = grid.irr.first().map(Vec::len).unwrap_or(0);
        let irr_body = SheetCell::body(&cells.prices[0], &cells.caps[0]);
        let moic_body = SheetCell::body(&cells.prices[1], &cells.caps[1]);
        let writes = vec![
            ValueWrite {
                range: irr_body.block(rows, cols),
                values: grid.irr.clone(),
            },
            ValueWrite {
                range: moic_body.block(rows, cols),
                values: grid.moic.clone(),
            },
        ];
        self.write(writes, ValueInputOption::UserEntered)
            .await
            .context("Failed to write sensitivity tables")
    }

    async fn restore(&self, cells: &SensitivityCells, originals: &[Value; 2]) -> Result<()> {
        let writes = vec![
            single(&cells.purchase_price, originals[0].clone()),
            single(&cells.exit_cap, originals[1].clone()),
        ];
        self.write(writes, ValueInputOption::UserEntered)
            .await
            .context("Failed to restore sensitivity inputs")?;
        debug!("🔍 Restored acquisition price and exit cap rate");
        Ok(())
    }
}

fn single(cell: &SheetCell, value: Value) -> ValueWrite {
    ValueWrite {
        range: cell.range(),
        values: vec![vec![value]],
    }
}
