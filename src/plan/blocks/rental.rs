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

//! Market rent, rental unit and rent roll blocks.

use super::{MARKET_RENT, RENT_ROLL, RENTAL_ASSUMPTIONS, Stage, row_count};
use crate::model::UnderwritingPayload;
use crate::plan::PlanContext;
use crate::plan::formulas::{self, UnitColumns, blank, text};
use crate::plan::layout::{BlockKind, SheetLayout};
use crate::plan::ops::{CellStyle, PlanBuilder};
use crate::plan::variant::NoiWiring;
use crate::utils::ModelError;
use serde_json::Value;
use tracing::debug;

pub const RENTAL_TABLES: Stage = Stage {
    name: "rental tables",
    register: register_rental_tables,
    build: build_rental_tables,
};

pub const RENT_ROLL_MODEL: Stage = Stage {
    name: "rent roll",
    register: register_rent_roll,
    build: build_rent_roll,
};

/// 0-based index of column J, where the monthly rent roll columns begin.
const RENT_ROLL_FIRST_MONTH: usize = 9;
const GROWTH_MONTHS: usize = 131;
const UNIT_MONTHS: usize = 132;
const VACANCY_MONTHS: usize = 131;

fn register_rental_tables(
    payload: &UnderwritingPayload,
    _wiring: NoiWiring,
    layout: &mut SheetLayout,
) -> Result<(), ModelError> {
    if !payload.has_rental_block() {
        return Ok(());
    }
    layout.register(
        BlockKind::MarketRent,
        MARKET_RENT,
        2,
        row_count(payload.market_rent_assumptions.len()),
    )?;
    layout.register(
        BlockKind::RentalUnits,
        RENTAL_ASSUMPTIONS,
        2,
        row_count(payload.units.len()),
    )?;
    Ok(())
}

fn register_rent_roll(
    payload: &UnderwritingPayload,
    _wiring: NoiWiring,
    layout: &mut SheetLayout,
) -> Result<(), ModelError> {
    if !payload.has_rental_block() {
        return Ok(());
    }
    let units = row_count(payload.units.len());
    layout.register(
        BlockKind::RentRollGrowth,
        RENT_ROLL,
        3,
        row_count(payload.rental_growth_rates().len()),
    )?;
    layout.register(BlockKind::RentRollUnits, RENT_ROLL, 7, units)?;
    layout.register(BlockKind::RentRollVacancy, RENT_ROLL, 14, units)?;
    Ok(())
}

/// `'Rental Assumptions'!$X$a:$X$b` over the unit block.
fn unit_range(column: char, start: u32, end: u32) -> String {
    format!("'{RENTAL_ASSUMPTIONS}'!${column}${start}:${column}${end}")
}

fn build_rental_tables(ctx: &PlanContext, plan: &mut PlanBuilder) {
    let (Some(market), Some(units)) = (
        ctx.block(BlockKind::MarketRent),
        ctx.block(BlockKind::RentalUnits),
    ) else {
        return;
    };
    let layout = ctx.layout;
    let (market_start, market_end) = (layout.start_row(market), layout.end_row(market));
    let (unit_start, unit_end) = (layout.start_row(units), layout.end_row(units));

    let columns = UnitColumns {
        vacate_flag: unit_range('C', unit_start, unit_end),
        layout: unit_range('D', unit_start, unit_end),
        vacate_month: unit_range('F', unit_start, unit_end),
        rent: unit_range('H', unit_start, unit_end),
    };
    let square_feet = unit_range('E', unit_start, unit_end);
    let pf_rent = unit_range('I', unit_start, unit_end);

    let market_rows: Vec<Vec<Value>> = ctx
        .payload
        .market_rent_assumptions
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let row = market_start + i as u32;
            let key = format!("A{row}");
            let layouts = &columns.layout;
            vec![
                entry.layout.clone(),
                blank(),
                entry.pf_rent.clone(),
                text(formulas::occupancy_weighted_average(&key, &columns)),
                text(format!(
                    "=IFERROR(SUMIF({layouts},{key},{rent})/SUMIF({layouts},{key},{square_feet}),0)",
                    rent = columns.rent
                )),
                text(format!("=IFERROR(AVERAGEIF({layouts},{key},{pf_rent}),0)")),
                text(format!(
                    "=IFERROR(SUMIF({layouts},{key},{pf_rent})/SUMIF({layouts},{key},{square_feet}),0)"
                )),
            ]
        })
        .collect();
    plan.write(MARKET_RENT, market_start, 0, market_rows);
    plan.format(
        MARKET_RENT,
        market_start,
        layout.count(market),
        Some((2, 3)),
        CellStyle::input(),
    );

    let market_rents = format!("'{MARKET_RENT}'!$C${market_start}:$C${market_end}");
    let market_layouts = format!("'{MARKET_RENT}'!$A${market_start}:$A${market_end}");
    let unit_rows: Vec<Vec<Value>> = ctx
        .payload
        .units
        .iter()
        .enumerate()
        .map(|(i, unit)| {
            let r = unit_start + i as u32;
            vec![
                Value::from(i + 1),
                unit.rent_type.clone(),
                unit.vacate_flag.clone(),
                unit.layout.clone(),
                unit.square_feet.clone(),
                unit.vacate_month.clone(),
                text(format!("=EOMONTH(Assumptions!$F$2,F{r})")),
                unit.current_rent.clone(),
                text(format!(
                    "=IFERROR(IF(OR(C{r}=1,C{r}=2),INDEX({market_rents}, MATCH(D{r}, {market_layouts}, 0)),H{r}),H{r})"
                )),
                text(format!("=I{r}*12")),
            ]
        })
        .collect();
    plan.write(RENTAL_ASSUMPTIONS, unit_start, 0, unit_rows);

    let total = layout.after(units);
    plan.write_row(
        RENTAL_ASSUMPTIONS,
        total,
        0,
        vec![
            blank(),
            blank(),
            blank(),
            text(format!("=COUNTA(A{unit_start}:A{unit_end})")),
            text(format!("=SUM(E{unit_start}:E{unit_end})/D{total}")),
            blank(),
            blank(),
            text(formulas::sum("H", unit_start, unit_end)),
            text(formulas::sum("I", unit_start, unit_end)),
            text(formulas::sum("J", unit_start, unit_end)),
        ],
    );

    let count = layout.count(units);
    plan.format(RENTAL_ASSUMPTIONS, unit_start, count, Some((0, 6)), CellStyle::input());
    plan.format(RENTAL_ASSUMPTIONS, unit_start, count, Some((7, 8)), CellStyle::input());
    plan.format(
        RENTAL_ASSUMPTIONS,
        unit_start,
        count,
        Some((6, 7)),
        CellStyle::date("m/dd/yy"),
    );
}

fn build_rent_roll(ctx: &PlanContext, plan: &mut PlanBuilder) {
    let (Some(growth), Some(units), Some(vacancy), Some(rentals)) = (
        ctx.block(BlockKind::RentRollGrowth),
        ctx.block(BlockKind::RentRollUnits),
        ctx.block(BlockKind::RentRollVacancy),
        ctx.block(BlockKind::RentalUnits),
    ) else {
        return;
    };
    let layout = ctx.layout;
    let growth_start = layout.start_row(growth);
    let growth_end = layout.end_row(growth);
    let month_row = layout.shifted(RENT_ROLL, 6);

    // Growth rows: references into the Assumptions growth table plus factors.
    let growth_columns = formulas::month_columns(RENT_ROLL_FIRST_MONTH, GROWTH_MONTHS);
    for (i, rate) in ctx.payload.rental_growth_rates().iter().enumerate() {
        let row = growth_start + i as u32;
        match ctx.growth.cell(&rate.name) {
            Some(cell) => plan.write_row(
                RENT_ROLL,
                row,
                1,
                vec![text(cell.name_ref()), blank(), text(cell.value_ref())],
            ),
            None => debug!("🔍 No Assumptions row for growth rate '{}'", rate.name),
        }
        let factors = growth_columns
            .iter()
            .map(|column| {
                text(formulas::growth_factor(
                    &format!("$D{row}"),
                    &format!("{column}${month_row}"),
                ))
            })
            .collect();
        plan.write_row(RENT_ROLL, row, RENT_ROLL_FIRST_MONTH, factors);
    }
    plan.format(
        RENT_ROLL,
        growth_start,
        layout.count(growth),
        Some((RENT_ROLL_FIRST_MONTH, RENT_ROLL_FIRST_MONTH + GROWTH_MONTHS)),
        CellStyle::number("0.000"),
    );

    let rehab = ctx.reference("Other Reference", "Rehab Time");
    let lease_up = ctx.reference("Other Reference", "Lease-up Time");
    let unit_start = layout.start_row(units);
    let unit_end = layout.end_row(units);
    let rental_start = layout.start_row(rentals);
    let unit_columns = formulas::month_columns(RENT_ROLL_FIRST_MONTH, UNIT_MONTHS);

    let rows: Vec<Vec<Value>> = (0..layout.count(units))
        .map(|i| {
            let c = unit_start + i;
            let source = rental_start + i;
            let reference = |column: char| text(format!("='{RENTAL_ASSUMPTIONS}'!{column}{source}"));
            let lease_end = match (&rehab, &lease_up) {
                (Some(rehab), Some(lease_up)) => {
                    format!("=IF(D{c}=1,E{c}+{rehab}+{lease_up},E{c})")
                }
                _ => format!("=E{c}"),
            };
            let mut row = vec![
                reference('A'),
                reference('B'),
                reference('C'),
                reference('F'),
                text(lease_end),
                reference('H'),
                reference('I'),
                blank(),
            ];
            row.extend(unit_columns.iter().map(|column| {
                text(format!(
                    "=IFERROR(IF($D{c}=0,$G{c},IF({column}${month_row}<$E{c},$G{c},IF({column}${month_row}>=$F{c},$H{c},0)))*INDEX({column}${growth_start}:{column}${growth_end},MATCH($C{c},$B${growth_start}:$B${growth_end},0)),0)"
                ))
            }));
            row
        })
        .collect();
    plan.write(RENT_ROLL, unit_start, 1, rows);

    // Summary rows directly below the units.
    let sum_row = layout.after(units);
    let mut sum_values = vec![text("Rent Roll")];
    sum_values.extend(formulas::column_sums(&unit_columns, unit_start, unit_end));
    plan.write_row(RENT_ROLL, sum_row, RENT_ROLL_FIRST_MONTH - 1, sum_values);

    let logic_rows: Vec<Vec<Value>> = vec![
        unit_columns
            .iter()
            .map(|l| text(format!("=COUNTIF({l}{unit_start}:{l}{unit_end},\">0\")")))
            .collect(),
        unit_columns
            .iter()
            .map(|l| text(format!("=-COUNTIF({l}{unit_start}:{l}{unit_end},0)")))
            .collect(),
        unit_columns
            .iter()
            .map(|l| {
                text(format!(
                    "=COUNTIFS($F${unit_start}:$F${unit_end},{l}{month_row},$D${unit_start}:$D${unit_end},1)"
                ))
            })
            .collect(),
    ];
    plan.write(RENT_ROLL, sum_row + 1, RENT_ROLL_FIRST_MONTH, logic_rows);

    let restabilization = ctx.reference("Other Reference", "Re-Stabilization Occurs");
    let vacancy_rate = ctx.reference("Leasing Assumptions", "Vacancy");
    let as_formula = |location: &Option<String>| match location {
        Some(location) => text(format!("={location}")),
        None => blank(),
    };
    plan.write(
        RENT_ROLL,
        3,
        5,
        vec![
            vec![text("Re-stabilization Occurs"), blank(), as_formula(&restabilization)],
            vec![text("Vacancy"), blank(), as_formula(&vacancy_rate)],
        ],
    );

    let vacancy_sum = layout.shifted(RENT_ROLL, 14);
    let weighted: Vec<Value> = unit_columns
        .iter()
        .map(|l| {
            text(format!(
                "=-IF({l}{month_row}<$H$3,{l}{vacancy_sum}-{l}{sum_row},{l}{sum_row}*$H$4)"
            ))
        })
        .collect();
    plan.write_row(RENT_ROLL, sum_row + 4, RENT_ROLL_FIRST_MONTH, weighted);
    plan.format(
        RENT_ROLL,
        sum_row,
        1,
        Some((1, RENT_ROLL_FIRST_MONTH + UNIT_MONTHS)),
        CellStyle::top_border(),
    );

    // Vacancy rows: like the unit rows, but vacated units keep their current rent.
    let vacancy_start = layout.start_row(vacancy);
    let vacancy_columns = formulas::month_columns(RENT_ROLL_FIRST_MONTH, VACANCY_MONTHS);
    let vacancy_rows: Vec<Vec<Value>> = (0..layout.count(vacancy))
        .map(|i| {
            let u = unit_start + i;
            vacancy_columns
                .iter()
                .map(|l| {
                    text(format!(
                        "=IFERROR(IF($D{u}=0,$G{u},IF({l}${month_row}<$E{u},$G{u},IF({l}${month_row}>=$F{u},$H{u},$G{u})))*INDEX({l}${growth_start}:{l}${growth_end},MATCH($C{u},$B${growth_start}:$B${growth_end},0)),0)"
                    ))
                })
                .collect()
        })
        .collect();
    plan.write(RENT_ROLL, vacancy_start, RENT_ROLL_FIRST_MONTH, vacancy_rows);
    plan.format(
        RENT_ROLL,
        vacancy_start,
        layout.count(vacancy),
        Some((RENT_ROLL_FIRST_MONTH, RENT_ROLL_FIRST_MONTH + VACANCY_MONTHS)),
        CellStyle::number("#,##0"),
    );
    plan.write_row(
        RENT_ROLL,
        layout.after(vacancy),
        RENT_ROLL_FIRST_MONTH,
        formulas::column_sums(&vacancy_columns, vacancy_start, layout.end_row(vacancy)),
    );

    write_restabilization(ctx, plan, rental_start, layout.end_row(rentals), &rehab, &lease_up);
}

/// Month the last vacated unit is leased back up, written to the mapped
/// `Re-Stabilization Occurs` cell.
fn write_restabilization(
    ctx: &PlanContext,
    plan: &mut PlanBuilder,
    rental_start: u32,
    rental_end: u32,
    rehab: &Option<String>,
    lease_up: &Option<String>,
) {
    let (Some(target), Some(rehab), Some(lease_up)) = (
        ctx.mapping.resolve("Other Reference", "Re-Stabilization Occurs"),
        rehab,
        lease_up,
    ) else {
        return;
    };
    let flags = format!("'{RENTAL_ASSUMPTIONS}'!C{rental_start}:C{rental_end}");
    let months = format!("'{RENTAL_ASSUMPTIONS}'!F{rental_start}:F{rental_end}");
    plan.write_cell(
        &target,
        text(format!(
            "=IFERROR(IF(COUNTIF({flags},1)=0,1,SUMPRODUCT(LARGE(({flags}=1)*{months},1))+{lease_up}+{rehab}),0)"
        )),
    );
}

#[cfg(test)]
mod tests {
    use crate::plan::build_plan;
    use crate::plan::fixtures;
    use crate::plan::ops::BatchOperation;
    use serde_json::{Value, json};

    fn write<'a>(ops: &'a [BatchOperation], range: &str) -> &'a Vec<Vec<Value>> {
        ops.iter()
            .find_map(|op| match op {
                BatchOperation::Write { range: r, values } if r == range => Some(values),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no write to {range}"))
    }

    #[test]
    fn rental_total_row_sits_below_units() {
        let plan = build_plan(&fixtures::residential(), &fixtures::mapping()).unwrap();
        let total = write(&plan.operations, "'Rental Assumptions'!A5:J5");
        assert_eq!(total[0][3], json!("=COUNTA(A2:A4)"));
        assert_eq!(total[0][4], json!("=SUM(E2:E4)/D5"));

        let units = write(&plan.operations, "'Rental Assumptions'!A2:J4");
        assert_eq!(units[1][0], json!(2));
        assert_eq!(units[1][6], json!("=EOMONTH(Assumptions!$F$2,F3)"));
        assert!(
            units[0][8]
                .as_str()
                .unwrap()
                .contains("'Market Rent Assumptions'!$C$2:$C$3")
        );
    }

    #[test]
    fn rent_roll_rows_follow_growth_block() {
        let plan = build_plan(&fixtures::residential(), &fixtures::mapping()).unwrap();
        // Two rental growth rates push units to row 9; the month header is row 8.
        let units = write(&plan.operations, "'Rent Roll Model'!B9:EK11");
        assert_eq!(units[0][0], json!("='Rental Assumptions'!A2"));
        assert_eq!(
            units[0][4],
            json!("=IF(D9=1,E9+'Other Reference'!C20+'Other Reference'!C21,E9)")
        );
        assert_eq!(
            units[0][8],
            json!(
                "=IFERROR(IF($D9=0,$G9,IF(J$8<$E9,$G9,IF(J$8>=$F9,$H9,0)))*INDEX(J$3:J$4,MATCH($C9,$B$3:$B$4,0)),0)"
            )
        );

        let sums = write(&plan.operations, "'Rent Roll Model'!I12:EK12");
        assert_eq!(sums[0][0], json!("Rent Roll"));
        assert_eq!(sums[0][1], json!("=SUM(J9:J11)"));

        // Vacancy rows land below the shifted template row 14 and read the
        // shifted month header rather than a fixed one.
        let vacancy = write(&plan.operations, "'Rent Roll Model'!J19:EJ21");
        assert!(vacancy[0][0].as_str().unwrap().contains("J$8<$E9"));
        let weighted = write(&plan.operations, "'Rent Roll Model'!J16:EK16");
        assert_eq!(weighted[0][0], json!("=-IF(J8<$H$3,J22-J12,J12*$H$4)"));
    }

    #[test]
    fn growth_rows_reference_assumptions_cells() {
        let plan = build_plan(&fixtures::residential(), &fixtures::mapping()).unwrap();
        let first = write(&plan.operations, "'Rent Roll Model'!B3:D3");
        // Header at M50; the expense rate sorts first, rental rates after it.
        assert_eq!(first[0][0], json!("='Assumptions'!M52"));
        assert_eq!(first[0][2], json!("='Assumptions'!N52"));
        let factors = write(&plan.operations, "'Rent Roll Model'!J3:EJ3");
        assert_eq!(factors[0][0], json!("=(1+($D3/12))^J$8"));
    }

    #[test]
    fn restabilization_formula_targets_mapped_cell() {
        let plan = build_plan(&fixtures::residential(), &fixtures::mapping()).unwrap();
        let cell = write(&plan.operations, "'Other Reference'!C22");
        assert_eq!(
            cell[0][0],
            json!(
                "=IFERROR(IF(COUNTIF('Rental Assumptions'!C2:C4,1)=0,1,SUMPRODUCT(LARGE(('Rental Assumptions'!C2:C4=1)*'Rental Assumptions'!F2:F4,1))+'Other Reference'!C21+'Other Reference'!C20),0)"
            )
        );
    }
}
