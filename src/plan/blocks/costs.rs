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

//! Closing, hard, legal and reserve cost sheets.
//!
//! All four share one layout: a line per cost at row 2 and down, a total in
//! column E, the start/end month window in G..H and the total spread over
//! the window in J..EL. Row 1 carries the month numbers.

use super::{OPERATING_EXPENSES, Stage, row_count};
use crate::model::UnderwritingPayload;
use crate::model::payload::{CostLine, value_as_f64};
use crate::plan::PlanContext;
use crate::plan::formulas::{self, blank, text};
use crate::plan::layout::{BlockId, BlockKind, SheetLayout};
use crate::plan::ops::{CellStyle, PlanBuilder};
use crate::plan::variant::NoiWiring;
use crate::utils::ModelError;
use serde_json::Value;
use tracing::warn;

pub const COST_SHEETS: Stage = Stage {
    name: "cost sheets",
    register: register_cost_sheets,
    build: build_cost_sheets,
};

/// `(cost line type, block)`; the type doubles as the sheet title.
const COST_SHEET_KINDS: [(&str, BlockKind); 4] = [
    ("Closing Costs", BlockKind::ClosingCosts),
    ("Hard Costs", BlockKind::HardCosts),
    ("Legal and Pre-Development Costs", BlockKind::LegalCosts),
    ("Reserves", BlockKind::Reserves),
];

const ANCHOR: u32 = 2;
const FIRST_MONTH: usize = 9;
const MONTHS: usize = 133;
const PERCENT_OF_OTHERS: &str = "Total percent of other expenses";

fn register_cost_sheets(
    payload: &UnderwritingPayload,
    _wiring: NoiWiring,
    layout: &mut SheetLayout,
) -> Result<(), ModelError> {
    for (sheet, kind) in COST_SHEET_KINDS {
        let lines = payload.cost_lines(sheet).len();
        if lines > 0 {
            layout.register(kind, sheet, ANCHOR, row_count(lines))?;
        }
    }
    Ok(())
}

fn build_cost_sheets(ctx: &PlanContext, plan: &mut PlanBuilder) {
    let bases = PercentBases::resolve(ctx);
    for (sheet, kind) in COST_SHEET_KINDS {
        if let Some(block) = ctx.block(kind) {
            build_cost_sheet(ctx, plan, sheet, block, &bases);
        }
    }
}

/// What each percent factor is a percentage of.
struct PercentBases {
    purchase_price: Option<String>,
    acquisition_loan: Option<String>,
    property_taxes: String,
    insurance: String,
}

impl PercentBases {
    fn resolve(ctx: &PlanContext) -> Self {
        let needs = |factor: &str| {
            ctx.payload
                .expenses
                .iter()
                .any(|line| line.factor.eq_ignore_ascii_case(factor))
        };
        // Property taxes and insurance sort to the top of the expense table.
        let opex_start = ctx
            .block(BlockKind::OperatingExpenses)
            .map(|block| ctx.layout.start_row(block))
            .unwrap_or(2);
        Self {
            purchase_price: needs("Percent of Purchase Price")
                .then(|| ctx.reference("General Property Assumptions", "Acquisition Price"))
                .flatten(),
            acquisition_loan: needs("Percent of Acquisition Loan")
                .then(|| ctx.reference("Other Reference", "Max Loan Size"))
                .flatten(),
            property_taxes: format!("'{OPERATING_EXPENSES}'!I{opex_start}"),
            insurance: format!("'{OPERATING_EXPENSES}'!I{}", opex_start + 1),
        }
    }

    /// Statistic cell formula for a percent factor, `None` for other factors.
    fn statistic(&self, factor: &str) -> Option<Value> {
        let base = match factor.to_lowercase().as_str() {
            "percent of purchase price" => self.purchase_price.clone(),
            "percent of acquisition loan" => self.acquisition_loan.clone(),
            "percent of property taxes" => Some(self.property_taxes.clone()),
            "percent of insurance cost" => Some(self.insurance.clone()),
            _ => return None,
        };
        Some(text(base.map(|cell| format!("={cell}")).unwrap_or_default()))
    }
}

fn is_percent_factor(factor: &str) -> bool {
    [
        "percent of purchase price",
        "percent of acquisition loan",
        "percent of property taxes",
        "percent of insurance cost",
    ]
    .contains(&factor.to_lowercase().as_str())
}

fn is_percent_of_others(factor: &str) -> bool {
    factor.trim().eq_ignore_ascii_case(PERCENT_OF_OTHERS)
}

/// The percent-of-others line goes last so it can sum every line above it.
fn sorted_lines<'a>(lines: Vec<&'a CostLine>) -> Vec<&'a CostLine> {
    let mut sorted = lines;
    sorted.sort_by_key(|line| is_percent_of_others(&line.factor));
    sorted
}

fn month(value: &Value) -> i64 {
    value_as_f64(value).map(|month| month as i64).unwrap_or(0)
}

fn build_cost_sheet(
    ctx: &PlanContext,
    plan: &mut PlanBuilder,
    sheet: &str,
    block: BlockId,
    bases: &PercentBases,
) {
    let layout = ctx.layout;
    let start = layout.start_row(block);
    let end = layout.end_row(block);
    let months = formulas::month_columns(FIRST_MONTH, MONTHS);
    let lines = sorted_lines(ctx.payload.cost_lines(sheet));

    let rows: Vec<Vec<Value>> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let r = start + i as u32;
            let (start_month, end_month) = (month(&line.start_month), month(&line.end_month));
            if end_month < start_month {
                warn!(
                    "⚠️ '{}' on {} ends in month {} before it starts in month {}, it will prorate to zero",
                    line.name, sheet, end_month, start_month
                );
            }

            let (cost, statistic, total) = if is_percent_of_others(&line.factor) {
                let statistic = if r == start {
                    text("0")
                } else {
                    text(formulas::sum("E", start, r - 1))
                };
                (
                    text(format!("{}%", formulas::number(line.cost_per))),
                    statistic,
                    format!("=C{r}*D{r}"),
                )
            } else if line.factor.eq_ignore_ascii_case("Total") {
                (Value::from(line.cost_per), blank(), format!("=C{r}"))
            } else if let Some(statistic) = bases.statistic(&line.factor) {
                (
                    Value::from(formulas::percent_literal(line.cost_per)),
                    statistic,
                    format!("=C{r}*D{r}"),
                )
            } else {
                (
                    Value::from(line.cost_per),
                    Value::from(value_as_f64(&line.statistic).unwrap_or(0.0)),
                    format!("=C{r}*D{r}"),
                )
            };

            let mut row = vec![
                text(line.name.clone()),
                text(line.factor.clone()),
                cost,
                statistic,
                text(total),
                blank(),
                Value::from(start_month),
                Value::from(end_month),
                blank(),
            ];
            row.extend(months.iter().map(|c| {
                text(formulas::prorate(
                    &format!("$E{r}"),
                    &format!("$G{r}"),
                    &format!("$H{r}"),
                    &format!("{c}$1"),
                ))
            }));
            row
        })
        .collect();
    plan.write(sheet, start, 0, rows);

    let total_row = layout.after(block);
    plan.write_row(sheet, total_row, 4, vec![text(formulas::sum("E", start, end))]);
    plan.write_row(
        sheet,
        total_row,
        FIRST_MONTH,
        formulas::column_sums(&months, start, end),
    );

    for (i, line) in lines.iter().enumerate() {
        let r = start + i as u32;
        plan.format(sheet, r, 1, Some((2, 3)), cost_style(line));
        plan.format(sheet, r, 1, Some((1, 4)), CellStyle::input());
        plan.format(sheet, r, 1, Some((3, 4)), statistic_style(&line.factor));
    }
    let count = layout.count(block);
    plan.format(sheet, start, count, Some((6, 8)), CellStyle::number(r#""Month " #,##0"#));
    plan.format(sheet, start, count, Some((0, 200)), CellStyle::bold(false));
}

fn cost_style(line: &CostLine) -> CellStyle {
    if is_percent_factor(&line.factor) || is_percent_of_others(&line.factor) {
        return CellStyle::percent("0.00%");
    }
    let suffix = match line.factor.to_lowercase().as_str() {
        "per unit" => r#""/unit""#,
        "per sf" => r#""/sf""#,
        "per month" => r#""/month""#,
        _ => "",
    };
    let digits = if line.cost_per >= 100.0 { "$#,##0" } else { "$#,##0.00" };
    CellStyle::number(&format!("{digits}{suffix}"))
}

fn statistic_style(factor: &str) -> CellStyle {
    match factor.to_lowercase().as_str() {
        "per unit" => CellStyle::number(r#"#,##0" units""#),
        "per sf" => CellStyle::number(r#"#,##0" sf""#),
        "per month" => CellStyle::number(r#"#,##0" months""#),
        _ => CellStyle::number("#,##0"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::build_plan;
    use crate::plan::fixtures;
    use crate::plan::ops::BatchOperation;
    use serde_json::json;

    fn write(ops: &[BatchOperation], range: &str) -> Option<Vec<Vec<Value>>> {
        ops.iter().find_map(|op| match op {
            BatchOperation::Write { range: r, values } if r == range => Some(values.clone()),
            _ => None,
        })
    }

    #[test]
    fn closing_costs_convert_percent_once() {
        let plan = build_plan(&fixtures::residential(), &fixtures::mapping()).unwrap();
        let rows = write(&plan.operations, "'Closing Costs'!A2:EL3").unwrap();

        assert_eq!(rows[0][0], json!("Title"));
        assert_eq!(rows[0][2], json!(250.0));
        assert_eq!(rows[0][3], json!(3.0));
        assert_eq!(rows[0][4], json!("=C2*D2"));
        assert_eq!(
            rows[0][9],
            json!("=IF(AND($G2=J$1,$H2=J$1),$E2,IF($G2>J$1,0,IF($H2<J$1,0,$E2/($H2-$G2+1))))")
        );

        assert_eq!(rows[1][2], json!(0.02));
        assert_eq!(rows[1][3], json!("='Assumptions'!E62"));

        let total = write(&plan.operations, "'Closing Costs'!E4:E4").unwrap();
        assert_eq!(total[0][0], json!("=SUM(E2:E3)"));
        assert!(write(&plan.operations, "'Closing Costs'!J4:EL4").is_some());
    }

    #[test]
    fn empty_cost_sheets_are_untouched() {
        let plan = build_plan(&fixtures::residential(), &fixtures::mapping()).unwrap();
        assert!(plan.layout.find(BlockKind::HardCosts).is_none());
        assert!(!plan.operations.iter().any(|op| match op {
            BatchOperation::Write { range, .. } => range.starts_with("'Hard Costs'"),
            BatchOperation::Insert { sheet, .. } | BatchOperation::Format { sheet, .. } => {
                sheet == "Hard Costs"
            }
        }));
    }

    #[test]
    fn percent_of_others_sums_lines_above() {
        let mut payload = fixtures::residential();
        payload.expenses = serde_json::from_value(json!([
            {"name": "Contingency", "factor": "Total percent of other expenses", "cost_per": 5,
             "start_month": 1, "end_month": 1, "type": "Hard Costs"},
            {"name": "Roof", "factor": "Total", "cost_per": 40000,
             "start_month": 2, "end_month": 4, "type": "Hard Costs"},
            {"name": "Paint", "factor": "Per Unit", "cost_per": 900, "statistic": 3,
             "start_month": 6, "end_month": 5, "type": "Hard Costs"}
        ]))
        .unwrap();
        let plan = build_plan(&payload, &fixtures::mapping()).unwrap();
        let rows = write(&plan.operations, "'Hard Costs'!A2:EL4").unwrap();

        assert_eq!(rows[0][0], json!("Roof"));
        assert_eq!(rows[0][3], json!(""));
        assert_eq!(rows[0][4], json!("=C2"));
        assert_eq!(rows[2][0], json!("Contingency"));
        assert_eq!(rows[2][2], json!("5%"));
        assert_eq!(rows[2][3], json!("=SUM(E2:E3)"));
    }

    #[test]
    fn percent_of_others_matches_factor_case_insensitively() {
        let mut payload = fixtures::residential();
        payload.expenses = serde_json::from_value(json!([
            {"name": "Contingency", "factor": "total percent of other expenses", "cost_per": 5,
             "start_month": 1, "end_month": 1, "type": "Hard Costs"},
            {"name": "Roof", "factor": "Total", "cost_per": 40000,
             "start_month": 2, "end_month": 4, "type": "Hard Costs"}
        ]))
        .unwrap();
        let plan = build_plan(&payload, &fixtures::mapping()).unwrap();
        let rows = write(&plan.operations, "'Hard Costs'!A2:EL3").unwrap();

        assert_eq!(rows[0][0], json!("Roof"));
        assert_eq!(rows[1][0], json!("Contingency"));
        assert_eq!(rows[1][3], json!("=SUM(E2:E2)"));

        let contingency = &payload.expenses[0];
        let pattern = cost_style(contingency).number_format.map(|format| format.pattern);
        assert_eq!(pattern.as_deref(), Some("0.00%"));
    }

    #[test]
    fn lone_percent_of_others_uses_zero_basis() {
        let line: CostLine = serde_json::from_value(json!({
            "name": "Contingency", "factor": "Total percent of other expenses", "cost_per": 5,
            "type": "Reserves"
        }))
        .unwrap();
        let mut payload = fixtures::residential();
        payload.expenses = vec![line];
        let plan = build_plan(&payload, &fixtures::mapping()).unwrap();
        let rows = write(&plan.operations, "'Reserves'!A2:EL2").unwrap();
        assert_eq!(rows[0][3], json!("0"));
    }

    #[test]
    fn cost_format_depends_on_magnitude() {
        let line = |cost_per: f64| CostLine {
            name: "Title".to_string(),
            factor: "Per Unit".to_string(),
            cost_per,
            statistic: Value::Null,
            start_month: Value::Null,
            end_month: Value::Null,
            kind: None,
        };
        let pattern = |style: CellStyle| style.number_format.map(|format| format.pattern);
        assert_eq!(
            pattern(cost_style(&line(250.0))).as_deref(),
            Some(r#"$#,##0"/unit""#)
        );
        assert_eq!(
            pattern(cost_style(&line(12.5))).as_deref(),
            Some(r#"$#,##0.00"/unit""#)
        );
    }
}
