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

//! Operating expense table and its NOI Walk / NOI wiring.

use super::amenity::noi_summary_rows;
use super::{
    NOI, NOI_WALK, NOI_WALK_FIRST_MONTH, NOI_WALK_MONTHS, OPERATING_EXPENSES as OPEX_SHEET,
    RENTAL_ASSUMPTIONS, RETAIL_ASSUMPTIONS, Stage, row_count,
};
use crate::model::UnderwritingPayload;
use crate::model::payload::OperatingExpense;
use crate::plan::PlanContext;
use crate::plan::formulas::{self, blank, text};
use crate::plan::layout::{BlockId, BlockKind, SheetLayout};
use crate::plan::ops::{CellStyle, PlanBuilder};
use crate::plan::variant::NoiWiring;
use crate::utils::ModelError;
use crate::utils::a1::column_letter;
use serde_json::Value;
use tracing::warn;

pub const OPERATING_EXPENSES: Stage = Stage {
    name: "operating expenses",
    register: register_operating_expenses,
    build: build_operating_expenses,
};

pub const NOI_EXPENSES: Stage = Stage {
    name: "noi expenses",
    register: register_noi_expenses,
    build: build_noi_expenses,
};

/// 0-based column where retail expense monthlies are read from for NOI Walk
/// column E.
const RETAIL_WALK_SOURCE_COLUMN: usize = 13;
/// Width of the trailing window summed into each NTM cell, minus one.
const NTM_WINDOW: usize = 11;

fn register_operating_expenses(
    payload: &UnderwritingPayload,
    _wiring: NoiWiring,
    layout: &mut SheetLayout,
) -> Result<(), ModelError> {
    layout.register(
        BlockKind::OperatingExpenses,
        OPEX_SHEET,
        2,
        row_count(payload.operating_expenses.len()),
    )?;
    Ok(())
}

fn register_noi_expenses(
    payload: &UnderwritingPayload,
    wiring: NoiWiring,
    layout: &mut SheetLayout,
) -> Result<(), ModelError> {
    let count = match wiring {
        NoiWiring::Residential => row_count(payload.operating_expenses.len()),
        NoiWiring::Commercial => layout
            .find(BlockKind::RetailExpenses)
            .map(|id| layout.count(id))
            .unwrap_or(0),
    };
    layout.register(
        BlockKind::NoiWalkExpenses,
        NOI_WALK,
        wiring.walk_expense_anchor(),
        count,
    )?;
    layout.register(BlockKind::NoiExpenses, NOI, wiring.noi_expense_anchor(), count)?;
    Ok(())
}

/// Property taxes first, insurance second, the rest in input order. The
/// Closing Costs sheet reads those two totals from fixed rows.
pub fn sorted_expenses(expenses: &[OperatingExpense]) -> Vec<&OperatingExpense> {
    let mut sorted: Vec<&OperatingExpense> = expenses.iter().collect();
    sorted.sort_by_key(|expense| match expense.name.as_str() {
        "Property Taxes" => 0,
        "Insurance" => 1,
        _ => 2,
    });
    sorted
}

fn build_operating_expenses(ctx: &PlanContext, plan: &mut PlanBuilder) {
    let Some(block) = ctx.block(BlockKind::OperatingExpenses) else {
        return;
    };
    if ctx.layout.is_empty(block) {
        return;
    }
    let start = ctx.layout.start_row(block);
    let expenses = sorted_expenses(&ctx.payload.operating_expenses);
    let statistic = StatisticCells::resolve(ctx);

    let rows: Vec<Vec<Value>> = expenses
        .iter()
        .enumerate()
        .map(|(i, expense)| expense_row(expense, start + i as u32, &statistic))
        .collect();
    plan.write(OPEX_SHEET, start, 0, rows);

    let end = ctx.layout.end_row(block);
    plan.write_row(
        OPEX_SHEET,
        ctx.layout.after(block),
        7,
        vec![
            text(formulas::sum("H", start, end)),
            text(formulas::sum("I", start, end)),
        ],
    );

    // Formats follow the sorted order so they line up with the rows written.
    for (i, expense) in expenses.iter().enumerate() {
        let row = start + i as u32;
        let cost_per = expense.cost_per.to_lowercase();
        let cost_style = match cost_per.as_str() {
            "per unit" => CellStyle::number(r#"$#,##0"/unit""#),
            "per ca square foot" | "per total square feet" => {
                CellStyle::number(r#"$#,##0.00"/sf""#)
            }
            "per month" => CellStyle::number(r#"$#,##0.00"/month""#),
            "percent of egi" => CellStyle::percent("0.00%"),
            _ => CellStyle::number("$#,##0.00"),
        };
        let statistic_style = match cost_per.as_str() {
            "per unit" => CellStyle::number(r##"#,##0" units""##),
            "per ca square foot" | "per total square feet" => {
                CellStyle::number(r##"#,##0" sf""##)
            }
            "per month" => CellStyle::number(r##"#,##0" months""##),
            _ => CellStyle::number("#,##0"),
        };
        plan.format(OPEX_SHEET, row, 1, Some((5, 6)), cost_style.on_white());
        plan.format(OPEX_SHEET, row, 1, Some((6, 7)), statistic_style.on_white());
        plan.format(OPEX_SHEET, row, 1, Some((4, 6)), CellStyle::input().on_white());
    }
    plan.format(
        OPEX_SHEET,
        start,
        ctx.layout.count(block),
        Some((0, 200)),
        CellStyle::bold(false),
    );
}

/// Cells the statistic column (G) points at, per `cost_per`.
struct StatisticCells {
    units_total: Option<String>,
    gross_sf: Option<String>,
    net_rentable_sf: Option<String>,
    egi: Option<String>,
}

impl StatisticCells {
    fn resolve(ctx: &PlanContext) -> Self {
        let needs = |cost_per: &str| {
            ctx.payload
                .operating_expenses
                .iter()
                .any(|expense| expense.cost_per.eq_ignore_ascii_case(cost_per))
        };
        let square_feet = needs("per ca square foot") || needs("per total square feet");
        Self {
            units_total: ctx.block(BlockKind::RentalUnits).map(|units| {
                format!("'{RENTAL_ASSUMPTIONS}'!$D${}", ctx.layout.after(units))
            }),
            gross_sf: square_feet
                .then(|| ctx.reference("General Property Assumptions", "Gross Square Feet"))
                .flatten(),
            net_rentable_sf: needs("per ca square foot")
                .then(|| ctx.reference("Other Reference", "Net Rentable SF"))
                .flatten(),
            egi: needs("percent of egi")
                .then(|| ctx.reference("Other Reference", "Estimated Pro Forma Rent Roll"))
                .flatten(),
        }
    }

    fn formula(&self, cost_per: &str) -> Option<String> {
        match cost_per {
            "per unit" => {
                let units = self.units_total.as_ref();
                if units.is_none() {
                    warn!("⚠️ Per-unit operating expense without rental units, statistic left blank");
                }
                units.map(|cell| format!("={cell}"))
            }
            "per ca square foot" => match (&self.gross_sf, &self.net_rentable_sf) {
                (Some(gross), Some(net)) => Some(format!("={gross}-{net}")),
                _ => None,
            },
            "per total square feet" => self.gross_sf.as_ref().map(|gross| format!("={gross}")),
            "percent of egi" => self.egi.as_ref().map(|egi| format!("={egi}")),
            _ => None,
        }
    }
}

fn expense_row(expense: &OperatingExpense, row: u32, statistic: &StatisticCells) -> Vec<Value> {
    let cost_per = expense.cost_per.to_lowercase();
    let factor = if cost_per == "percent of egi" {
        formulas::percent_literal(expense.factor)
    } else {
        expense.factor
    };
    let statistic = statistic.formula(&cost_per);
    let annual = if statistic.is_some() {
        format!("=F{row}*G{row}")
    } else {
        format!("=F{row}")
    };

    vec![
        text(expense.name.clone()),
        blank(),
        blank(),
        blank(),
        text(expense.cost_per.clone()),
        Value::from(factor),
        text(statistic.unwrap_or_default()),
        text(format!("=I{row}/12")),
        text(annual),
        blank(),
    ]
}

fn build_noi_expenses(ctx: &PlanContext, plan: &mut PlanBuilder) {
    let Some(walk) = ctx.block(BlockKind::NoiWalkExpenses) else {
        return;
    };
    let months = formulas::month_columns(NOI_WALK_FIRST_MONTH, NOI_WALK_MONTHS);

    if !ctx.layout.is_empty(walk) {
        match ctx.wiring {
            NoiWiring::Residential => residential_walk_rows(ctx, plan, walk, &months),
            NoiWiring::Commercial => commercial_walk_rows(ctx, plan, walk),
        }
        let sum_row = ctx.layout.after(walk);
        plan.write_row(
            NOI_WALK,
            sum_row,
            NOI_WALK_FIRST_MONTH,
            formulas::column_sums(&months, ctx.layout.start_row(walk), ctx.layout.end_row(walk)),
        );
    }
    build_next_twelve_months(ctx, plan, walk);

    if let Some(noi) = ctx.block(BlockKind::NoiExpenses)
        && !ctx.layout.is_empty(noi)
    {
        noi_summary_rows(ctx, plan, noi, walk);
        plan.format(
            NOI,
            ctx.layout.start_row(noi),
            ctx.layout.count(noi),
            None,
            CellStyle::bold(false).on_white(),
        );
    }
}

fn residential_walk_rows(
    ctx: &PlanContext,
    plan: &mut PlanBuilder,
    walk: BlockId,
    months: &[String],
) {
    let Some(opex) = ctx.block(BlockKind::OperatingExpenses) else {
        return;
    };
    let layout = ctx.layout;
    let opex_start = layout.start_row(opex);
    let walk_start = layout.start_row(walk);
    let egi_row = layout.shifted(NOI_WALK, ctx.wiring.egi_template_row());
    let count = layout.count(walk);

    let labels = (0..count)
        .map(|i| vec![text(format!("='{OPEX_SHEET}'!A{}", opex_start + i))])
        .collect();
    plan.write(NOI_WALK, walk_start, 1, labels);

    let rows = (0..count)
        .map(|i| {
            let op = opex_start + i;
            months
                .iter()
                .map(|l| {
                    text(format!(
                        "=IF('{OPEX_SHEET}'!$E{op}=\"Percent of EGI\",'{OPEX_SHEET}'!$F{op}*{l}{egi_row},'{OPEX_SHEET}'!$H{op}*{l}$11)"
                    ))
                })
                .collect()
        })
        .collect();
    plan.write(NOI_WALK, walk_start, NOI_WALK_FIRST_MONTH, rows);
}

/// Commercial templates take expense monthlies straight from the retail
/// expense block.
fn commercial_walk_rows(ctx: &PlanContext, plan: &mut PlanBuilder, walk: BlockId) {
    let Some(retail) = ctx.block(BlockKind::RetailExpenses) else {
        return;
    };
    let layout = ctx.layout;
    let retail_start = layout.start_row(retail);
    let walk_start = layout.start_row(walk);
    let count = layout.count(walk);

    let labels = (0..count)
        .map(|i| vec![text(format!("='{RETAIL_ASSUMPTIONS}'!B{}", retail_start + i))])
        .collect();
    plan.write(NOI_WALK, walk_start, 1, labels);

    let rows = (0..count)
        .map(|i| {
            let ra = retail_start + i;
            (0..NOI_WALK_MONTHS)
                .map(|j| {
                    text(format!(
                        "='{RETAIL_ASSUMPTIONS}'!{}{ra}",
                        column_letter(RETAIL_WALK_SOURCE_COLUMN + j)
                    ))
                })
                .collect()
        })
        .collect();
    plan.write(NOI_WALK, walk_start, NOI_WALK_FIRST_MONTH, rows);
}

/// Next-twelve-months row: each cell sums the following twelve months of the
/// line two rows below the expense sum row, written one row under it.
fn build_next_twelve_months(ctx: &PlanContext, plan: &mut PlanBuilder, walk: BlockId) {
    let source = ctx.layout.after(walk) + 2;
    let target = source + 1;
    let values = (0..NOI_WALK_MONTHS)
        .map(|i| {
            let first = column_letter(NOI_WALK_FIRST_MONTH + 1 + i);
            let last = column_letter(NOI_WALK_FIRST_MONTH + 1 + i + NTM_WINDOW);
            text(format!("=SUM({first}{source}:{last}{source})"))
        })
        .collect();
    plan.write_row(NOI_WALK, target, NOI_WALK_FIRST_MONTH, values);
}
