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

use super::{AMENITY_INCOME, NOI, NOI_WALK, NOI_WALK_FIRST_MONTH, NOI_WALK_MONTHS, Stage, row_count};
use crate::model::UnderwritingPayload;
use crate::plan::PlanContext;
use crate::plan::formulas::{self, blank, text};
use crate::plan::layout::{BlockId, BlockKind, SheetLayout};
use crate::plan::ops::{CellStyle, PlanBuilder};
use crate::plan::variant::NoiWiring;
use crate::utils::ModelError;
use serde_json::Value;

pub const AMENITIES: Stage = Stage {
    name: "amenities",
    register: register_amenities,
    build: build_amenities,
};

const UNITS_FORMAT: &str = r#"[=0]"-";[=1]#,##0" unit";#,##0" units""#;
const DOLLAR_FORMAT: &str = r##"[=0]"-";"$"#,##0"##;
const NOI_PERIOD_COLUMNS: [&str; 5] = ["G", "H", "I", "J", "K"];

fn register_amenities(
    payload: &UnderwritingPayload,
    wiring: NoiWiring,
    layout: &mut SheetLayout,
) -> Result<(), ModelError> {
    let count = row_count(payload.amenity_income.len());
    layout.register(BlockKind::AmenityIncome, AMENITY_INCOME, 2, count)?;
    layout.register_inheriting(
        BlockKind::NoiWalkAmenities,
        NOI_WALK,
        wiring.walk_amenity_anchor(),
        count,
    )?;
    layout.register_inheriting(
        BlockKind::NoiAmenities,
        NOI,
        wiring.noi_amenity_anchor(),
        count,
    )?;
    Ok(())
}

fn build_amenities(ctx: &PlanContext, plan: &mut PlanBuilder) {
    let (Some(income), Some(walk)) = (
        ctx.block(BlockKind::AmenityIncome),
        ctx.block(BlockKind::NoiWalkAmenities),
    ) else {
        return;
    };
    build_effective_gross_income(ctx, plan, walk);
    if ctx.layout.is_empty(income) {
        return;
    }

    build_amenity_income(ctx, plan, income);
    build_walk_rows(ctx, plan, income, walk);
    if let Some(noi) = ctx.block(BlockKind::NoiAmenities) {
        noi_summary_rows(ctx, plan, noi, walk);
    }
}

fn build_amenity_income(ctx: &PlanContext, plan: &mut PlanBuilder, income: BlockId) {
    let layout = ctx.layout;
    let start = layout.start_row(income);
    let end = layout.end_row(income);
    let count = layout.count(income);

    let rows: Vec<Vec<Value>> = ctx
        .payload
        .amenity_income
        .iter()
        .enumerate()
        .map(|(i, amenity)| {
            let r = start + i as u32;
            vec![
                text(amenity.name.clone()),
                blank(),
                amenity.start_month.clone(),
                formulas::percent_text(&amenity.utilization),
                amenity.unit_count.clone(),
                text(format!("=ROUND(E{r}*D{r},0)")),
                amenity.monthly_fee.clone(),
                text(format!("=G{r}*F{r}")),
                text(format!("=H{r}*12")),
            ]
        })
        .collect();
    plan.write(AMENITY_INCOME, start, 0, rows);

    let total = layout.after(income);
    let mut total_row = vec![text("Total Amenity Income")];
    total_row.extend(std::iter::repeat_with(blank).take(6));
    total_row.push(text(formulas::sum("H", start, end)));
    total_row.push(text(formulas::sum("I", start, end)));
    plan.write_row(AMENITY_INCOME, total, 0, total_row);

    // Number formats cover the total row too.
    plan.format(AMENITY_INCOME, start, count + 1, Some((4, 6)), CellStyle::number(UNITS_FORMAT));
    plan.format(AMENITY_INCOME, start, count + 1, Some((6, 9)), CellStyle::number(DOLLAR_FORMAT));
    plan.format(AMENITY_INCOME, start, count, Some((2, 5)), CellStyle::input());
    plan.format(AMENITY_INCOME, start, count, Some((6, 7)), CellStyle::input());
    plan.format(AMENITY_INCOME, start, count, Some((0, 200)), CellStyle::bold(false));
    plan.format(AMENITY_INCOME, total, 1, Some((0, 200)), CellStyle::bold(true));
}

/// Monthly amenity income on NOI Walk. Residential templates also scale by
/// the occupancy row.
fn build_walk_rows(ctx: &PlanContext, plan: &mut PlanBuilder, income: BlockId, walk: BlockId) {
    let layout = ctx.layout;
    let income_start = layout.start_row(income);
    let walk_start = layout.start_row(walk);
    let months = formulas::month_columns(NOI_WALK_FIRST_MONTH, NOI_WALK_MONTHS);
    let occupancy = ctx.wiring == NoiWiring::Residential;

    let rows: Vec<Vec<Value>> = (0..layout.count(walk))
        .map(|i| {
            let a = income_start + i;
            let mut row = vec![
                blank(),
                text(format!("='{AMENITY_INCOME}'!A{a}")),
                blank(),
                blank(),
            ];
            row.extend(months.iter().map(|l| {
                let occupancy_factor = if occupancy {
                    format!("*{l}$16")
                } else {
                    String::new()
                };
                text(format!(
                    "=IF({l}$15<'{AMENITY_INCOME}'!$C{a},0,'{AMENITY_INCOME}'!G{a}{occupancy_factor}*{l}$10*'{AMENITY_INCOME}'!D{a})"
                ))
            }));
            row
        })
        .collect();
    plan.write(NOI_WALK, walk_start, 0, rows);
}

/// Effective gross income row on NOI Walk, sitting below the amenity rows.
fn build_effective_gross_income(ctx: &PlanContext, plan: &mut PlanBuilder, walk: BlockId) {
    let layout = ctx.layout;
    let walk_start = layout.start_row(walk);
    let walk_end = layout.end_row(walk);
    let egi_row = layout.shifted(NOI_WALK, ctx.wiring.egi_template_row());
    let months = formulas::month_columns(NOI_WALK_FIRST_MONTH, NOI_WALK_MONTHS);

    let formulas: Vec<Value> = match ctx.wiring {
        NoiWiring::Residential => {
            // Two template rows follow the amenities before the EGI line.
            let last = layout.shifted(NOI_WALK, 26);
            months
                .iter()
                .map(|l| {
                    text(format!(
                        "=SUM({l}{walk_start}:{l}{last},{l}22)+IF({l}15>=$H$5,{l}23,0)"
                    ))
                })
                .collect()
        }
        NoiWiring::Commercial if layout.is_empty(walk) => {
            months.iter().map(|l| text(format!("=SUM({l}17)"))).collect()
        }
        NoiWiring::Commercial => months
            .iter()
            .map(|l| text(format!("=SUM({l}{walk_start}:{l}{walk_end},{l}17)")))
            .collect(),
    };
    plan.write_row(NOI_WALK, egi_row, NOI_WALK_FIRST_MONTH, formulas);
}

/// NOI rows that fold NOI Walk lines into the period columns G..K.
pub(crate) fn noi_summary_rows(
    ctx: &PlanContext,
    plan: &mut PlanBuilder,
    noi: BlockId,
    walk: BlockId,
) {
    let layout = ctx.layout;
    let noi_start = layout.start_row(noi);
    let walk_start = layout.start_row(walk);
    let header = ctx.wiring.walk_header_row();

    let rows: Vec<Vec<Value>> = (0..layout.count(noi).min(layout.count(walk)))
        .map(|i| {
            let w = walk_start + i;
            let mut row = vec![
                blank(),
                blank(),
                text(format!("='{NOI_WALK}'!B{w}")),
                blank(),
                blank(),
                blank(),
            ];
            row.extend(NOI_PERIOD_COLUMNS.iter().map(|column| {
                text(format!(
                    "=SUMIFS('{NOI_WALK}'!$E{w}:$CW{w},'{NOI_WALK}'!$E${header}:$CW${header},{NOI}!{column}$4)"
                ))
            }));
            row
        })
        .collect();
    plan.write(NOI, noi_start, 0, rows);
}
