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

//! Formula families shared by the block builders.

use crate::model::payload::value_as_f64;
use crate::utils::a1::column_letter;
use crate::utils::json_value_to_string;
use serde_json::Value;

/// Renders a number for formula text: integers without a fraction, everything
/// else in shortest form. Rounded to ten places to drop binary noise.
pub fn number(value: f64) -> String {
    let rounded = (value * 1e10).round() / 1e10;
    if rounded.fract() == 0.0 && rounded.abs() < 1e15 {
        format!("{}", rounded as i64)
    } else {
        format!("{}", rounded)
    }
}

/// A human percentage (`5` for 5%) as the fraction formulas multiply by.
/// This is the only place the `/100` happens.
pub fn percent_literal(percent: f64) -> f64 {
    (percent / 100.0 * 1e10).round() / 1e10
}

/// A human percentage as `USER_ENTERED` text, e.g. `"5%"`. Blank stays blank.
pub fn percent_text(value: &Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::String(text) if text.trim().is_empty() => Value::String(String::new()),
        other => match value_as_f64(other) {
            Some(percent) => Value::String(format!("{}%", number(percent))),
            None => Value::String(format!("{}%", json_value_to_string(other).trim())),
        },
    }
}

/// Letters for `count` consecutive columns starting at 0-based `start`.
pub fn month_columns(start: usize, count: usize) -> Vec<String> {
    (start..start + count).map(column_letter).collect()
}

/// `=(1+(rate/12))^month`: monthly compounding of an annual rate cell.
pub fn growth_factor(rate_cell: &str, month_cell: &str) -> String {
    format!("=(1+({}/12))^{}", rate_cell, month_cell)
}

/// Spreads `total` evenly over `[start, end]` months, zero outside.
///
/// A one-month window short-circuits to the full value, so the divisor is
/// never evaluated for it. With `end < start` every column falls into a
/// zero branch.
pub fn prorate(total: &str, start: &str, end: &str, month: &str) -> String {
    format!(
        "=IF(AND({start}={month},{end}={month}),{total},IF({start}>{month},0,IF({end}<{month},0,{total}/({end}-{start}+1))))"
    )
}

/// Ranges of the unit block an occupancy-weighted average reads.
#[derive(Debug, Clone)]
pub struct UnitColumns {
    pub vacate_flag: String,
    pub layout: String,
    pub vacate_month: String,
    pub rent: String,
}

/// Average rent for one layout, counting units that stay (flag 0) and units
/// that vacate (flag 1 or 2) with a positive vacate month.
pub fn occupancy_weighted_average(key_cell: &str, units: &UnitColumns) -> String {
    let eligible = format!(
        "(--({flag}=0)+((--({flag}=1)+--({flag}=2))*--({month}>0)))",
        flag = units.vacate_flag,
        month = units.vacate_month
    );
    format!(
        "=IFERROR(SUMPRODUCT({rent}*--({layout}={key})*{eligible})/SUMPRODUCT(--({layout}={key})*{eligible}),0)",
        rent = units.rent,
        layout = units.layout,
        key = key_cell,
    )
}

/// `=SUM(Xa:Xb)`.
pub fn sum(column: &str, start: u32, end: u32) -> String {
    format!("=SUM({column}{start}:{column}{end})")
}

/// One `=SUM` per month column over `[start, end]`.
pub fn column_sums(columns: &[String], start: u32, end: u32) -> Vec<Value> {
    columns
        .iter()
        .map(|column| Value::String(sum(column, start, end)))
        .collect()
}

pub fn text(value: impl Into<String>) -> Value {
    Value::String(value.into())
}

pub fn blank() -> Value {
    Value::String(String::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn percent_is_converted_once() {
        assert_eq!(percent_literal(5.0), 0.05);
        assert_eq!(number(percent_literal(5.0)), "0.05");
        assert_eq!(number(percent_literal(2.5)), "0.025");
        assert_eq!(number(percent_literal(1.1)), "0.011");
        assert_eq!(percent_text(&json!(5)), json!("5%"));
        assert_eq!(percent_text(&json!("3.5")), json!("3.5%"));
        assert_eq!(percent_text(&json!("")), json!(""));
        assert_eq!(percent_text(&Value::Null), json!(""));
    }

    #[test]
    fn numbers_render_without_trailing_fraction() {
        assert_eq!(number(250.0), "250");
        assert_eq!(number(-3.0), "-3");
        assert_eq!(number(0.1 + 0.2), "0.3");
    }

    #[test]
    fn single_month_window_takes_full_value_first() {
        let formula = prorate("$E2", "$G2", "$H2", "J$1");
        assert_eq!(
            formula,
            "=IF(AND($G2=J$1,$H2=J$1),$E2,IF($G2>J$1,0,IF($H2<J$1,0,$E2/($H2-$G2+1))))"
        );
        let first_branch = formula.find("),$E2,").unwrap();
        let division = formula.find("$E2/(").unwrap();
        assert!(first_branch < division);
    }

    /// Evaluates the IF/AND/arithmetic subset the proration formula uses.
    struct Eval<'a> {
        src: &'a [u8],
        pos: usize,
    }

    impl Eval<'_> {
        fn run(formula: &str) -> f64 {
            let mut eval = Eval {
                src: formula.trim_start_matches('=').as_bytes(),
                pos: 0,
            };
            let value = eval.compare();
            assert_eq!(eval.pos, eval.src.len(), "trailing input in {}", formula);
            value
        }

        fn eat(&mut self, token: &str) -> bool {
            if self.src[self.pos..].starts_with(token.as_bytes()) {
                self.pos += token.len();
                true
            } else {
                false
            }
        }

        fn expect(&mut self, token: &str) {
            assert!(self.eat(token), "expected {} at {}", token, self.pos);
        }

        fn compare(&mut self) -> f64 {
            let left = self.add();
            let truth = |flag: bool| if flag { 1.0 } else { 0.0 };
            if self.eat("=") {
                truth(left == self.add())
            } else if self.eat(">") {
                truth(left > self.add())
            } else if self.eat("<") {
                truth(left < self.add())
            } else {
                left
            }
        }

        fn add(&mut self) -> f64 {
            let mut value = self.mul();
            loop {
                if self.eat("+") {
                    value += self.mul();
                } else if self.eat("-") {
                    value -= self.mul();
                } else {
                    return value;
                }
            }
        }

        fn mul(&mut self) -> f64 {
            let mut value = self.atom();
            loop {
                if self.eat("*") {
                    value *= self.atom();
                } else if self.eat("/") {
                    value /= self.atom();
                } else {
                    return value;
                }
            }
        }

        fn atom(&mut self) -> f64 {
            if self.eat("IF(") {
                let condition = self.compare();
                self.expect(",");
                let then = self.compare();
                self.expect(",");
                let otherwise = self.compare();
                self.expect(")");
                if condition != 0.0 { then } else { otherwise }
            } else if self.eat("AND(") {
                let left = self.compare();
                self.expect(",");
                let right = self.compare();
                self.expect(")");
                if left != 0.0 && right != 0.0 { 1.0 } else { 0.0 }
            } else if self.eat("(") {
                let value = self.compare();
                self.expect(")");
                value
            } else {
                let start = self.pos;
                while self.pos < self.src.len()
                    && (self.src[self.pos].is_ascii_digit() || self.src[self.pos] == b'.')
                {
                    self.pos += 1;
                }
                std::str::from_utf8(&self.src[start..self.pos])
                    .unwrap()
                    .parse()
                    .unwrap()
            }
        }
    }

    fn monthly(total: f64, start: u32, end: u32, months: u32) -> Vec<f64> {
        (1..=months)
            .map(|month| {
                Eval::run(&prorate(
                    &number(total),
                    &start.to_string(),
                    &end.to_string(),
                    &month.to_string(),
                ))
            })
            .collect()
    }

    #[test]
    fn prorated_months_sum_to_total_inside_window() {
        let amounts = monthly(1000.0, 3, 8, 12);
        let total: f64 = amounts.iter().sum();
        assert!((total - 1000.0).abs() < 1e-9);
        for (i, amount) in amounts.iter().enumerate() {
            let month = i as u32 + 1;
            if (3..=8).contains(&month) {
                assert!((amount - 1000.0 / 6.0).abs() < 1e-9);
            } else {
                assert_eq!(*amount, 0.0, "month {}", month);
            }
        }
    }

    #[test]
    fn single_month_window_carries_whole_total() {
        let amounts = monthly(2500.0, 5, 5, 12);
        assert_eq!(amounts[4], 2500.0);
        assert_eq!(amounts.iter().sum::<f64>(), 2500.0);
        assert_eq!(amounts.iter().filter(|amount| **amount != 0.0).count(), 1);
    }

    #[test]
    fn inverted_window_prorates_to_zero() {
        assert!(monthly(900.0, 6, 4, 12).iter().all(|amount| *amount == 0.0));
    }

    #[test]
    fn growth_factor_compounds_monthly() {
        assert_eq!(growth_factor("$D3", "J$8"), "=(1+($D3/12))^J$8");
    }

    #[test]
    fn occupancy_average_filters_on_vacate_flags() {
        let units = UnitColumns {
            vacate_flag: "'Rental Assumptions'!$C$2:$C$4".to_string(),
            layout: "'Rental Assumptions'!$D$2:$D$4".to_string(),
            vacate_month: "'Rental Assumptions'!$F$2:$F$4".to_string(),
            rent: "'Rental Assumptions'!$H$2:$H$4".to_string(),
        };
        let formula = occupancy_weighted_average("A2", &units);
        assert!(formula.starts_with("=IFERROR(SUMPRODUCT('Rental Assumptions'!$H$2:$H$4*"));
        assert!(formula.contains("--('Rental Assumptions'!$C$2:$C$4=0)"));
        assert!(formula.contains("*--('Rental Assumptions'!$F$2:$F$4>0)"));
        assert!(formula.ends_with(",0)"));
    }

    #[test]
    fn month_columns_cross_letter_boundaries() {
        let columns = month_columns(24, 4);
        assert_eq!(columns, vec!["Y", "Z", "AA", "AB"]);
        assert_eq!(column_sums(&columns[..1], 3, 9), vec![json!("=SUM(Y3:Y9)")]);
    }
}
