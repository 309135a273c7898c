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

//! Spreadsheet mutations as plain data.
//!
//! Nothing in here talks to Google. Builders push operations into a
//! [`PlanBuilder`]; the dispatcher later turns them into API requests.

use crate::utils::a1;
use serde::Serialize;
use serde_json::Value;

/// RGB color with channels in `0.0..=1.0`, as the Sheets API expects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

impl Color {
    pub const BLUE: Color = Color {
        red: 0.0,
        green: 0.0,
        blue: 1.0,
    };
    pub const WHITE: Color = Color {
        red: 1.0,
        green: 1.0,
        blue: 1.0,
    };
    pub const BLACK: Color = Color {
        red: 0.0,
        green: 0.0,
        blue: 0.0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NumberFormatKind {
    Number,
    Percent,
    Date,
}

impl NumberFormatKind {
    pub fn as_api_str(&self) -> &'static str {
        match self {
            NumberFormatKind::Number => "NUMBER",
            NumberFormatKind::Percent => "PERCENT",
            NumberFormatKind::Date => "DATE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NumberFormat {
    pub kind: NumberFormatKind,
    pub pattern: String,
}

/// Formatting applied to a rectangle of cells. Unset fields are left alone
/// on the sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CellStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub foreground: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<Color>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_format: Option<NumberFormat>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub top_border: bool,
}

impl CellStyle {
    pub fn bold(bold: bool) -> Self {
        Self {
            bold: Some(bold),
            ..Default::default()
        }
    }

    /// Blue text marks a cell as a user input.
    pub fn input() -> Self {
        Self {
            foreground: Some(Color::BLUE),
            ..Default::default()
        }
    }

    pub fn number(pattern: &str) -> Self {
        Self::with_number_format(NumberFormatKind::Number, pattern)
    }

    pub fn percent(pattern: &str) -> Self {
        Self::with_number_format(NumberFormatKind::Percent, pattern)
    }

    pub fn date(pattern: &str) -> Self {
        Self::with_number_format(NumberFormatKind::Date, pattern)
    }

    pub fn top_border() -> Self {
        Self {
            top_border: true,
            ..Default::default()
        }
    }

    fn with_number_format(kind: NumberFormatKind, pattern: &str) -> Self {
        Self {
            number_format: Some(NumberFormat {
                kind,
                pattern: pattern.to_string(),
            }),
            ..Default::default()
        }
    }

    pub fn on_white(mut self) -> Self {
        self.background = Some(Color::WHITE);
        self
    }

    pub fn with_bold(mut self, bold: bool) -> Self {
        self.bold = Some(bold);
        self
    }

    /// `userEnteredFormat` paths touched by this style, for the request's field mask.
    pub fn field_paths(&self) -> Vec<&'static str> {
        let mut paths = Vec::new();
        if self.bold.is_some() {
            paths.push("userEnteredFormat.textFormat.bold");
        }
        if self.foreground.is_some() {
            paths.push("userEnteredFormat.textFormat.foregroundColor");
        }
        if self.background.is_some() {
            paths.push("userEnteredFormat.backgroundColor");
        }
        if self.number_format.is_some() {
            paths.push("userEnteredFormat.numberFormat");
        }
        paths
    }
}

/// One mutation in a model run.
///
/// Rows are 1-based and expressed in final coordinates, i.e. after every
/// insert of the plan has been applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOperation {
    Insert {
        sheet: String,
        start_row: u32,
        count: u32,
        inherit_from_before: bool,
    },
    Format {
        sheet: String,
        start_row: u32,
        row_count: u32,
        /// 0-based `[start, end)` column span; `None` formats whole rows.
        columns: Option<(usize, usize)>,
        style: CellStyle,
    },
    Write {
        range: String,
        values: Vec<Vec<Value>>,
    },
}

impl BatchOperation {
    pub fn is_structural(&self) -> bool {
        !matches!(self, BatchOperation::Write { .. })
    }
}

/// Collects operations, dropping the ones that would touch nothing.
#[derive(Debug, Default)]
pub struct PlanBuilder {
    operations: Vec<BatchOperation>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, sheet: &str, start_row: u32, count: u32, inherit_from_before: bool) {
        if count == 0 {
            return;
        }
        self.operations.push(BatchOperation::Insert {
            sheet: sheet.to_string(),
            start_row,
            count,
            inherit_from_before,
        });
    }

    pub fn format(
        &mut self,
        sheet: &str,
        start_row: u32,
        row_count: u32,
        columns: Option<(usize, usize)>,
        style: CellStyle,
    ) {
        if row_count == 0 || columns.is_some_and(|(start, end)| end <= start) {
            return;
        }
        self.operations.push(BatchOperation::Format {
            sheet: sheet.to_string(),
            start_row,
            row_count,
            columns,
            style,
        });
    }

    /// Writes a rectangle whose top-left cell is `(row, col)`.
    /// The range is sized from the widest row.
    pub fn write(&mut self, sheet: &str, row: u32, col: usize, values: Vec<Vec<Value>>) {
        let width = values.iter().map(Vec::len).max().unwrap_or(0);
        if values.is_empty() || width == 0 {
            return;
        }
        let range = a1::sheet_range(
            sheet,
            col,
            row,
            col + width - 1,
            row + values.len() as u32 - 1,
        );
        self.operations.push(BatchOperation::Write { range, values });
    }

    pub fn write_row(&mut self, sheet: &str, row: u32, col: usize, values: Vec<Value>) {
        self.write(sheet, row, col, vec![values]);
    }

    /// Writes to a location taken from the mapping, e.g. `'Other Reference'!C14`.
    pub fn write_cell(&mut self, location: &str, value: Value) {
        self.operations.push(BatchOperation::Write {
            range: a1::normalize_range(location),
            values: vec![vec![value]],
        });
    }

    pub fn extend(&mut self, other: PlanBuilder) {
        self.operations.extend(other.operations);
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn into_operations(self) -> Vec<BatchOperation> {
        self.operations
    }
}
