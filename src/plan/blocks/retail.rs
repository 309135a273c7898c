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

//! Retail Assumptions: tenants, recoveries and retail operating expenses.
//!
//! The sheet carries three stacked tables, each followed by a template
//! summary row. Monthly columns run L..EO and read their month number from
//! row 5, which sits above every insert.

use super::{RETAIL_ASSUMPTIONS as SHEET, Stage, row_count};
use crate::model::UnderwritingPayload;
use crate::plan::PlanContext;
use crate::plan::formulas::{self, blank, text};
use crate::plan::layout::{BlockId, BlockKind, SheetLayout};
use crate::plan::ops::{CellStyle, PlanBuilder};
use crate::plan::variant::NoiWiring;
use crate::utils::ModelError;
use serde_json::Value;

pub const RETAIL: Stage = Stage {
    name: "retail",
    register: register_retail,
    build: build_retail,
};

const FIRST_MONTH: usize = 11;
const MONTHS: usize = 134;
const MONTH_HEADER_ROW: u32 = 5;

const TENANT_ANCHOR: u32 = 6;
const RECOVERY_ANCHOR: u32 = 10;
const EXPENSE_ANCHOR: u32 = 17;

fn register_retail(
    payload: &UnderwritingPayload,
    _wiring: NoiWiring,
    layout: &mut SheetLayout,
) -> Result<(), ModelError> {
    if payload.retail_income.is_empty() {
        return Ok(());
    }
    let tenants = row_count(payload.retail_income.len());
    layout.register(BlockKind::RetailTenants, SHEET, TENANT_ANCHOR, tenants)?;
    layout.register(BlockKind::RetailRecoveries, SHEET, RECOVERY_ANCHOR, tenants)?;

    let expenses = payload.retail_expenses().len();
    if expenses > 0 {
        layout.register(
            BlockKind::RetailExpenses,
            SHEET,
            EXPENSE_ANCHOR,
            row_count(expenses),
        )?;
    }
    Ok(())
}

/// Fixed rows of the retail sheet, resolved against the final layout.
struct RetailRows {
    tenant_start: u32,
    tenant_end: u32,
    tenant_summary: u32,
    occupancy: u32,
    recovery_summary: u32,
    expense_summary: u32,
}

impl RetailRows {
    fn resolve(ctx: &PlanContext, tenants: BlockId) -> Self {
        let layout = ctx.layout;
        Self {
            tenant_start: layout.start_row(tenants),
            tenant_end: layout.end_row(tenants),
            tenant_summary: layout.shifted(SHEET, TENANT_ANCHOR),
            occupancy: layout.shifted(SHEET, TENANT_ANCHOR + 1),
            recovery_summary: layout.shifted(SHEET, RECOVERY_ANCHOR),
            expense_summary: layout.shifted(SHEET, EXPENSE_ANCHOR),
        }
    }

    /// `$X$a:$X$b` over the tenant rows.
    fn tenant_range(&self, column: char) -> String {
        format!(
            "${column}${}:${column}${}",
            self.tenant_start, self.tenant_end
        )
    }
}

fn build_retail(ctx: &PlanContext, plan: &mut PlanBuilder) {
    let Some(tenants) = ctx.block(BlockKind::RetailTenants) else {
        return;
    };
    let rows = RetailRows::resolve(ctx, tenants);
    let months = formulas::month_columns(FIRST_MONTH, MONTHS);

    build_tenants(ctx, plan, tenants, &rows, &months);
    if let Some(recoveries) = ctx.block(BlockKind::RetailRecoveries) {
        build_recoveries(ctx, plan, recoveries, &rows, &months);
    }
    if let Some(expenses) = ctx.block(BlockKind::RetailExpenses) {
        build_expenses(ctx, plan, expenses, &rows, &months);
    }
    build_mapped_cells(ctx, plan, &rows);
}

fn build_tenants(
    ctx: &PlanContext,
    plan: &mut PlanBuilder,
    tenants: BlockId,
    rows: &RetailRows,
    months: &[String],
) {
    let start = rows.tenant_start;
    let values: Vec<Vec<Value>> = ctx
        .payload
        .retail_income
        .iter()
        .enumerate()
        .map(|(i, tenant)| {
            let r = start + i as u32;
            let mut row = vec![
                tenant.suite.clone(),
                tenant.tenant_name.clone(),
                blank(),
                tenant.lease_start_month.clone(),
                tenant.square_feet.clone(),
                tenant.lease_start_month.clone(),
                formulas::percent_text(&tenant.annual_bumps),
                tenant.rent_per_square_foot_per_year.clone(),
                text(format!("=I{r}*F{r}")),
                blank(),
            ];
            row.extend(months.iter().map(|c| {
                text(format!(
                    "=($G{r}<={c}${h})*($J{r}/12)*(1+$H{r})^(ROUNDUP(MAX({c}${h}-$G{r}+1,0)/12,0)-1)",
                    h = MONTH_HEADER_ROW
                ))
            }));
            row
        })
        .collect();
    plan.write(SHEET, start, 1, values);

    let count = ctx.layout.count(tenants);
    plan.format(SHEET, start, count, Some((1, 10)), CellStyle::bold(false));
    plan.format(SHEET, start, count, Some((1, 9)), CellStyle::input());

    let (s, e, total) = (rows.tenant_start, rows.tenant_end, rows.tenant_summary);
    let mut summary = vec![
        text("Total Base Retail Income"),
        blank(),
        blank(),
        text(format!("=MIN(E{s}:E{e})")),
        text(formulas::sum("F", s, e)),
        text(format!("=MIN(G{s}:G{e})")),
        text(format!("=IFERROR(SUMPRODUCT(H{s}:H{e},J{s}:J{e})/J{total},0)")),
        text(format!("=IFERROR(SUMPRODUCT(I{s}:I{e},F{s}:F{e})/F{total},0)")),
        text(formulas::sum("J", s, e)),
        blank(),
    ];
    summary.extend(formulas::column_sums(months, s, e));
    plan.write_row(SHEET, total, 1, summary);

    let mut occupancy = vec![text("Occ.")];
    occupancy.extend(months.iter().map(|c| {
        text(format!(
            "=IFERROR(SUMIF($E${s}:$E${e},\"<=\"&{c}{h},$F${s}:$F${e})/$F${total},0)",
            h = MONTH_HEADER_ROW
        ))
    }));
    plan.write_row(SHEET, rows.occupancy, FIRST_MONTH - 1, occupancy);
}

fn build_recoveries(
    ctx: &PlanContext,
    plan: &mut PlanBuilder,
    recoveries: BlockId,
    rows: &RetailRows,
    months: &[String],
) {
    let start = ctx.layout.start_row(recoveries);
    let end = ctx.layout.end_row(recoveries);
    let tenant_total = rows.tenant_summary;
    let expense_total = rows.expense_summary;

    let values: Vec<Vec<Value>> = ctx
        .payload
        .retail_income
        .iter()
        .enumerate()
        .map(|(i, tenant)| {
            let t = rows.tenant_start + i as u32;
            let r = start + i as u32;
            let mut row = vec![
                text(format!("=+B{t}")),
                text(format!("=+C{t}")),
                blank(),
                blank(),
                tenant.recovery_start_month.clone(),
                blank(),
                text(format!("=IFERROR(F{t}/$F${tenant_total},0)")),
                text(format!("=IFERROR(J{r}/F{t},0)")),
                text(format!("=+H{r}*$J${expense_total}")),
                blank(),
            ];
            row.extend(months.iter().map(|c| {
                text(format!(
                    "=IFERROR(({c}${h}>=$F{r})*$H{r}*{c}${expense_total},0)",
                    h = MONTH_HEADER_ROW
                ))
            }));
            row
        })
        .collect();
    plan.write(SHEET, start, 1, values);

    let count = ctx.layout.count(recoveries);
    plan.format(SHEET, start, count, Some((1, 10)), CellStyle::bold(false));
    plan.format(SHEET, start, count, Some((1, 3)), CellStyle::input());
    plan.format(SHEET, start, count, Some((5, 6)), CellStyle::input());
    plan.format(SHEET, start, count, Some((8, 9)), CellStyle::percent("0.00%"));

    let summary_row = rows.recovery_summary;
    let mut summary = vec![text("Total Recovery Income")];
    summary.extend(std::iter::repeat_with(blank).take(6));
    summary.push(text(format!("=IFERROR(J{summary_row}/F{tenant_total},0)")));
    summary.push(text(formulas::sum("J", start, end)));
    summary.push(blank());
    summary.extend(formulas::column_sums(months, start, end));
    plan.write_row(SHEET, summary_row, 1, summary);
}

fn build_expenses(
    ctx: &PlanContext,
    plan: &mut PlanBuilder,
    expenses: BlockId,
    rows: &RetailRows,
    months: &[String],
) {
    let start = ctx.layout.start_row(expenses);
    let growth = formulas::number(ctx.payload.retail_growth_rate());
    let tenant_total = rows.tenant_summary;
    let occupancy = rows.occupancy;

    let values: Vec<Vec<Value>> = ctx
        .payload
        .retail_expenses()
        .iter()
        .enumerate()
        .map(|(i, expense)| {
            let r = start + i as u32;
            let mut row = vec![
                text(expense.name.clone()),
                blank(),
                blank(),
                blank(),
                blank(),
                text(format!("{growth}%")),
                blank(),
                Value::from(expense.cost_per),
                text(format!("=F{tenant_total}*I{r}")),
                blank(),
            ];
            row.extend(months.iter().map(|c| {
                text(format!(
                    "=IFERROR($J{r}/12*{c}${occupancy}*(1+$G{r})^(ROUNDUP({c}${h}/12,0)-1),0)",
                    h = MONTH_HEADER_ROW
                ))
            }));
            row
        })
        .collect();
    plan.write(SHEET, start, 1, values);

    let count = ctx.layout.count(expenses);
    plan.format(SHEET, start, count, Some((1, 10)), CellStyle::bold(false));
    plan.format(SHEET, start, count, Some((8, 9)), CellStyle::input());

    let end = ctx.layout.end_row(expenses);
    let summary_row = rows.expense_summary;
    let mut summary = vec![text("Total Retail Operating Expenses")];
    summary.extend(std::iter::repeat_with(blank).take(6));
    summary.push(text(format!("=IFERROR(J{summary_row}/F{tenant_total},0)")));
    summary.push(text(formulas::sum("J", start, end)));
    summary.push(blank());
    summary.extend(formulas::column_sums(months, start, end));
    plan.write_row(SHEET, summary_row, 1, summary);
}

/// Space count and in-place rent on the mapped reference cells.
fn build_mapped_cells(ctx: &PlanContext, plan: &mut PlanBuilder, rows: &RetailRows) {
    if let Some(cell) = ctx.reference("Other Reference", "Number of Spaces") {
        plan.write_cell(
            &cell,
            text(format!(
                "=COUNTA(UNIQUE('{SHEET}'!$B${}:B{}))",
                rows.tenant_start, rows.tenant_end
            )),
        );
    }
    if let Some(cell) = ctx.reference("Other Reference", "In-Place Rent / SF") {
        let (rent, start, area) = (
            rows.tenant_range('L'),
            rows.tenant_range('G'),
            rows.tenant_range('F'),
        );
        plan.write_cell(
            &cell,
            text(format!(
                "=+SUMIFS('{SHEET}'!{rent},'{SHEET}'!{start},\">=\"&1)/SUMIFS('{SHEET}'!{area},'{SHEET}'!{start},\">=\"&1)"
            )),
        );
    }
}

#[cfg(test)]
mod tests {
    use crate::plan::build_plan;
    use crate::plan::fixtures;
    use crate::plan::ops::BatchOperation;
    use serde_json::{Value, json};

    fn write(ops: &[BatchOperation], range: &str) -> Option<Vec<Vec<Value>>> {
        ops.iter().find_map(|op| match op {
            BatchOperation::Write { range: r, values } if r == range => Some(values.clone()),
            _ => None,
        })
    }

    #[test]
    fn tenant_rows_escalate_from_lease_start() {
        let plan = build_plan(&fixtures::commercial(), &fixtures::mapping()).unwrap();
        let tenants = write(&plan.operations, "'Retail Assumptions'!B6:EO7").unwrap();
        assert_eq!(tenants[0][0], json!("101"));
        assert_eq!(tenants[0][6], json!("3%"));
        assert_eq!(tenants[1][6], json!(""));
        assert_eq!(tenants[0][8], json!("=I6*F6"));
        assert_eq!(
            tenants[0][10],
            json!("=($G6<=L$5)*($J6/12)*(1+$H6)^(ROUNDUP(MAX(L$5-$G6+1,0)/12,0)-1)")
        );

        let summary = write(&plan.operations, "'Retail Assumptions'!B8:EO8").unwrap();
        assert_eq!(summary[0][0], json!("Total Base Retail Income"));
        assert_eq!(
            summary[0][6],
            json!("=IFERROR(SUMPRODUCT(H6:H7,J6:J7)/J8,0)")
        );

        let occupancy = write(&plan.operations, "'Retail Assumptions'!K9:EO9").unwrap();
        assert_eq!(
            occupancy[0][1],
            json!("=IFERROR(SUMIF($E$6:$E$7,\"<=\"&L5,$F$6:$F$7)/$F$8,0)")
        );
    }

    #[test]
    fn recoveries_share_expense_total() {
        let plan = build_plan(&fixtures::commercial(), &fixtures::mapping()).unwrap();
        let recoveries = write(&plan.operations, "'Retail Assumptions'!B12:EO13").unwrap();
        assert_eq!(recoveries[1][0], json!("=+B7"));
        assert_eq!(recoveries[0][6], json!("=IFERROR(F6/$F$8,0)"));
        assert_eq!(recoveries[0][8], json!("=+H12*$J$23"));

        let summary = write(&plan.operations, "'Retail Assumptions'!B14:EO14").unwrap();
        assert_eq!(summary[0][7], json!("=IFERROR(J14/F8,0)"));
        assert_eq!(summary[0][8], json!("=SUM(J12:J13)"));
    }

    #[test]
    fn expense_lines_scale_with_occupancy() {
        let plan = build_plan(&fixtures::commercial(), &fixtures::mapping()).unwrap();
        let expenses = write(&plan.operations, "'Retail Assumptions'!B21:EO22").unwrap();
        assert_eq!(expenses[0][0], json!("CAM"));
        assert_eq!(expenses[0][5], json!("3%"));
        assert_eq!(expenses[0][7], json!(4.5));
        assert_eq!(expenses[0][8], json!("=F8*I21"));
        assert_eq!(
            expenses[0][10],
            json!("=IFERROR($J21/12*L$9*(1+$G21)^(ROUNDUP(L$5/12,0)-1),0)")
        );

        let summary = write(&plan.operations, "'Retail Assumptions'!B23:EO23").unwrap();
        assert_eq!(summary[0][0], json!("Total Retail Operating Expenses"));
        assert_eq!(summary[0][8], json!("=SUM(J21:J22)"));
    }

    #[test]
    fn mapped_cells_cover_tenant_rows() {
        let plan = build_plan(&fixtures::commercial(), &fixtures::mapping()).unwrap();
        let spaces = write(&plan.operations, "'Other Reference'!C50").unwrap();
        assert_eq!(
            spaces[0][0],
            json!("=COUNTA(UNIQUE('Retail Assumptions'!$B$6:B7))")
        );
        let rent = write(&plan.operations, "'Other Reference'!C51").unwrap();
        assert!(rent[0][0].as_str().unwrap().starts_with(
            "=+SUMIFS('Retail Assumptions'!$L$6:$L$7,'Retail Assumptions'!$G$6:$G$7,\">=\"&1)"
        ));
    }
}
