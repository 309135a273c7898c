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

//! Growth rate table on the Assumptions sheet and everything that reads it.

use super::{ASSUMPTIONS, NOI_WALK, NOI_WALK_FIRST_MONTH, Stage, register_nothing};
use crate::model::payload::GrowthKind;
use crate::model::{ModelVariableMapping, UnderwritingPayload};
use crate::plan::PlanContext;
use crate::plan::formulas::{self, text};
use crate::plan::ops::{CellStyle, Color, PlanBuilder};
use crate::utils::a1::{self, column_letter};
use serde_json::Value;
use tracing::warn;

pub const GROWTH_RATES: Stage = Stage {
    name: "growth rates",
    register: register_nothing,
    build: build_growth_rates,
};

/// Months of the NOI Walk growth factor row (E..EB).
const NOI_GROWTH_MONTHS: usize = 128;
const NOI_GROWTH_ROW: u32 = 9;

/// Where one growth rate landed on the Assumptions sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct GrowthCell {
    pub name: String,
    pub kind: GrowthKind,
    pub sheet: String,
    pub row: u32,
    pub name_col: usize,
    pub value_col: usize,
    pub percent: f64,
}

impl GrowthCell {
    pub fn name_ref(&self) -> String {
        format!(
            "={}!{}{}",
            a1::quote_sheet(&self.sheet),
            column_letter(self.name_col),
            self.row
        )
    }

    pub fn value_cell(&self) -> String {
        format!(
            "{}!{}{}",
            a1::quote_sheet(&self.sheet),
            column_letter(self.value_col),
            self.row
        )
    }

    pub fn value_ref(&self) -> String {
        format!("={}", self.value_cell())
    }
}

/// Growth rates listed under the mapped `Growth Rates Header` cell, rental
/// rates last. Empty when the payload has no rental block or the header is
/// not mapped.
#[derive(Debug, Clone, Default)]
pub struct GrowthTable {
    cells: Vec<GrowthCell>,
}

impl GrowthTable {
    pub fn build(payload: &UnderwritingPayload, mapping: &ModelVariableMapping) -> Self {
        if !payload.has_rental_block() || payload.growth_rates.is_empty() {
            return Self::default();
        }
        let Some(header) = mapping
            .resolve("Other Reference", "Growth Rates Header")
            .as_deref()
            .and_then(a1::parse_cell)
        else {
            warn!("⚠️ Growth Rates Header is not mapped, growth rates will not be written");
            return Self::default();
        };
        let sheet = header.sheet.clone().unwrap_or_else(|| ASSUMPTIONS.to_string());

        let mut rates: Vec<_> = payload.growth_rates.iter().collect();
        rates.sort_by_key(|rate| rate.kind == GrowthKind::Rental);

        let cells = rates
            .into_iter()
            .enumerate()
            .map(|(i, rate)| GrowthCell {
                name: rate.name.clone(),
                kind: rate.kind,
                sheet: sheet.clone(),
                row: header.row + 1 + i as u32,
                name_col: header.col,
                value_col: header.col + 1,
                percent: rate.value,
            })
            .collect();
        Self { cells }
    }

    pub fn cell(&self, name: &str) -> Option<&GrowthCell> {
        self.cells.iter().find(|cell| cell.name == name)
    }

    pub fn cells(&self) -> &[GrowthCell] {
        &self.cells
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

fn build_growth_rates(ctx: &PlanContext, plan: &mut PlanBuilder) {
    let Some(first) = ctx.growth.cells().first() else {
        return;
    };

    let rows: Vec<Vec<Value>> = ctx
        .growth
        .cells()
        .iter()
        .map(|cell| {
            vec![
                text(cell.name.clone()),
                Value::from(formulas::percent_literal(cell.percent)),
            ]
        })
        .collect();
    let count = rows.len() as u32;
    plan.write(&first.sheet, first.row, first.name_col, rows);
    plan.format(
        &first.sheet,
        first.row,
        count,
        Some((first.value_col, first.value_col + 1)),
        CellStyle {
            foreground: Some(Color::BLUE),
            ..CellStyle::percent("0.0%")
        },
    );

    for (name, target) in [("Amenity Inflation", "L3"), ("Expense Inflation", "H6")] {
        match ctx.growth.cell(name) {
            Some(cell) => plan.write_cell(
                &format!("{}!{}", a1::quote_sheet(NOI_WALK), target),
                text(cell.value_ref()),
            ),
            None => warn!("⚠️ {} not found among growth rates", name),
        }
    }

    let rental_cells: Vec<String> = ctx
        .growth
        .cells()
        .iter()
        .filter(|cell| cell.kind == GrowthKind::Rental)
        .map(GrowthCell::value_cell)
        .collect();
    if rental_cells.is_empty() {
        warn!("⚠️ No rental growth rates, NOI Walk growth factors left untouched");
        return;
    }
    let max_rate = format!("MAX({})", rental_cells.join(","));
    let factors = formulas::month_columns(NOI_WALK_FIRST_MONTH, NOI_GROWTH_MONTHS)
        .iter()
        .map(|column| text(format!("=(1 + ({max_rate} / 12))^{column}15")))
        .collect();
    plan.write_row(NOI_WALK, NOI_GROWTH_ROW, NOI_WALK_FIRST_MONTH, factors);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::build_plan;
    use crate::plan::fixtures;
    use crate::plan::ops::BatchOperation;
    use serde_json::json;

    #[test]
    fn rental_rates_sort_last_under_header() {
        let table = GrowthTable::build(&fixtures::residential(), &fixtures::mapping());
        let names: Vec<&str> = table.cells().iter().map(|cell| cell.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["Expense Inflation", "Rent Growth", "Loss to Lease Burn-off"]
        );
        let rent = table.cell("Rent Growth").unwrap();
        assert_eq!(rent.row, 52);
        assert_eq!(rent.value_cell(), "'Assumptions'!N52");
    }

    #[test]
    fn missing_header_leaves_table_empty() {
        let mapping = ModelVariableMapping::from_entries(&[]);
        assert!(GrowthTable::build(&fixtures::residential(), &mapping).is_empty());
    }

    #[test]
    fn writes_fractions_and_inflation_references() {
        let plan = build_plan(&fixtures::residential(), &fixtures::mapping()).unwrap();
        let values = plan.writes().find_map(|op| match op {
            BatchOperation::Write { range, values } if range == "'Assumptions'!M51:N53" => {
                Some(values.clone())
            }
            _ => None,
        });
        let values = values.unwrap();
        assert_eq!(values[0], vec![json!("Expense Inflation"), json!(0.025)]);
        assert_eq!(values[1][1], json!(0.03));

        let expense = plan.writes().any(|op| {
            matches!(op, BatchOperation::Write { range, values }
                if range == "'NOI Walk'!H6" && values[0][0] == json!("='Assumptions'!N51"))
        });
        assert!(expense);
        assert!(!plan.writes().any(|op| {
            matches!(op, BatchOperation::Write { range, .. } if range == "'NOI Walk'!L3")
        }));

        let growth_row = plan.writes().any(|op| {
            matches!(op, BatchOperation::Write { range, values }
                if range == "'NOI Walk'!E9:EB9"
                && values[0][0] == json!("=(1 + (MAX('Assumptions'!N52,'Assumptions'!N53) / 12))^E15"))
        });
        assert!(growth_row);
    }
}
