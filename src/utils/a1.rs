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

//! A1-notation helpers shared by the planner, the dispatcher and the readers.

/// A single cell parsed out of an A1 reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellRef {
    pub sheet: Option<String>,
    /// 1-based row number.
    pub row: u32,
    /// 0-based column index.
    pub col: usize,
}

impl CellRef {
    pub fn column(&self) -> String {
        column_letter(self.col)
    }
}

/// Converts a zero-based column index to a column letter (0=A, 25=Z, 26=AA, ...).
pub fn column_letter(index: usize) -> String {
    let mut result = String::new();
    let mut n = index;

    loop {
        result.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }

    result
}

/// Converts column letters back to a zero-based index. `$` markers are ignored.
pub fn column_index(letters: &str) -> Option<usize> {
    let mut col: usize = 0;
    let mut saw_letter = false;

    for ch in letters.trim().chars() {
        if ch == '$' {
            continue;
        }
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        col = col * 26 + (ch.to_ascii_uppercase() as usize - 'A' as usize + 1);
        saw_letter = true;
    }

    saw_letter.then(|| col - 1)
}

/// Wraps a sheet title in single quotes, doubling embedded quotes.
pub fn quote_sheet(name: &str) -> String {
    let bare = name.trim().trim_matches('\'');
    format!("'{}'", bare.replace('\'', "''"))
}

/// Splits `=Sheet!B12` or `'Sheet Name'!B12` into an unquoted sheet title and the cell part.
pub fn split_location(location: &str) -> Option<(String, String)> {
    let trimmed = location.trim();
    let trimmed = trimmed.strip_prefix('=').unwrap_or(trimmed);
    let (sheet, cell) = trimmed.rsplit_once('!')?;
    let sheet = sheet.trim().trim_matches('\'').replace("''", "'");
    let cell = cell.trim();
    if sheet.is_empty() || cell.is_empty() {
        return None;
    }
    Some((sheet, cell.to_string()))
}

/// Parses a single-cell reference such as `B12`, `$B$12` or `'Rent Roll'!B12`.
pub fn parse_cell(reference: &str) -> Option<CellRef> {
    let trimmed = reference.trim();
    let trimmed = trimmed.strip_prefix('=').unwrap_or(trimmed);

    let (sheet, cell) = match split_location(trimmed) {
        Some((sheet, cell)) => (Some(sheet), cell),
        None => (None, trimmed.to_string()),
    };

    let cell = cell.replace('$', "");
    let split = cell.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cell.split_at(split);
    let col = column_index(letters)?;
    let row: u32 = digits.parse().ok()?;
    if row == 0 {
        return None;
    }

    Some(CellRef { sheet, row, col })
}

/// Re-quotes the sheet part of a location so it can be passed to the API,
/// e.g. `=Cash Flow!A1:B2` becomes `'Cash Flow'!A1:B2`.
pub fn normalize_range(location: &str) -> String {
    match split_location(location) {
        Some((sheet, range)) => format!("{}!{}", quote_sheet(&sheet), range),
        None => location.trim().trim_start_matches('=').to_string(),
    }
}

/// Builds an A1 range such as `'Rent Roll'!B3:D5`.
pub fn sheet_range(sheet: &str, start_col: usize, start_row: u32, end_col: usize, end_row: u32) -> String {
    format!(
        "{}!{}{}:{}{}",
        quote_sheet(sheet),
        column_letter(start_col),
        start_row,
        column_letter(end_col),
        end_row
    )
}
