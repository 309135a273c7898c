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

//! In-memory backends for tests.
//!
//! [`FakeSheets`] keeps one cell store shared by every spreadsheet id and
//! logs each call so tests can assert on ordering. Cells registered with
//! [`FakeSheets::compute`] are evaluated on every read, which stands in for
//! server-side recalculation.

use super::backend::{
    DriveBackend, GridCell, SpreadsheetBackend, StructureChange, ValueInputOption,
    ValueRenderOption, ValueWrite,
};
use crate::model::mapping::{MODEL_VARIABLE_MAPPING_SHEET, REQUIRED_SHEETS};
use crate::plan::blocks;
use crate::utils::{ModelError, a1, json_value_to_string};
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

type CellKey = (String, u32, usize);
type Computed = Arc<dyn Fn(&CellReader<'_>) -> Value + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum FakeCall {
    SheetIds,
    Structure(Vec<StructureChange>),
    Write(Vec<ValueWrite>, ValueInputOption),
    BatchGet(Vec<String>, ValueRenderOption),
    ReadGrid(String),
}

/// Read access to the store from inside a computed cell.
pub struct CellReader<'a> {
    cells: &'a HashMap<CellKey, Value>,
}

impl CellReader<'_> {
    pub fn value(&self, location: &str) -> Value {
        cell_key(location)
            .and_then(|key| self.cells.get(&key).cloned())
            .unwrap_or(Value::Null)
    }

    pub fn number(&self, location: &str) -> f64 {
        let raw = json_value_to_string(&self.value(location));
        raw.trim()
            .trim_end_matches('%')
            .replace(',', "")
            .parse()
            .unwrap_or(0.0)
    }
}

#[derive(Default)]
struct SheetsState {
    sheet_ids: HashMap<String, i32>,
    cells: HashMap<CellKey, Value>,
    computed: HashMap<CellKey, Computed>,
    grids: HashMap<String, Vec<Vec<GridCell>>>,
    calls: Vec<FakeCall>,
    structure_failure: Option<String>,
    write_failure: Option<String>,
}

#[derive(Default)]
pub struct FakeSheets {
    state: Mutex<SheetsState>,
}

/// `'Sheet'!B12` to `(Sheet, 12, 1)`. Bare cells have no sheet and no key.
fn cell_key(location: &str) -> Option<CellKey> {
    let cell = a1::parse_cell(location)?;
    Some((cell.sheet?, cell.row, cell.col))
}

/// Sheet title plus inclusive bounds; `None` bounds mean the whole tab.
fn parse_range(range: &str) -> Option<(String, Option<((u32, usize), (u32, usize))>)> {
    let Some((sheet, cells)) = a1::split_location(range) else {
        let sheet = range.trim().trim_matches('\'').replace("''", "'");
        return (!sheet.is_empty()).then_some((sheet, None));
    };
    let (start, end) = cells.split_once(':').unwrap_or((cells.as_str(), cells.as_str()));
    let start = a1::parse_cell(start)?;
    let end = a1::parse_cell(end)?;
    Some((sheet, Some(((start.row, start.col), (end.row, end.col)))))
}

impl FakeSheets {
    pub fn new(sheets: &[&str]) -> Self {
        let fake = Self::default();
        {
            let mut state = fake.lock();
            for (index, name) in sheets.iter().enumerate() {
                state.sheet_ids.insert(name.to_string(), index as i32 + 1);
            }
        }
        fake
    }

    /// Every tab a model template carries.
    pub fn with_template_tabs() -> Self {
        let mut tabs: Vec<&str> = vec![
            blocks::ASSUMPTIONS,
            blocks::MARKET_RENT,
            blocks::RENTAL_ASSUMPTIONS,
            blocks::RENT_ROLL,
            blocks::AMENITY_INCOME,
            blocks::NOI_WALK,
            blocks::NOI,
            blocks::OPERATING_EXPENSES,
            blocks::RETAIL_ASSUMPTIONS,
            blocks::COVER,
            "Other Reference",
            "Closing Costs",
            "Hard Costs",
            "Legal and Pre-Development Costs",
            "Reserves",
            "Underwriting Assumptions",
        ];
        tabs.extend(REQUIRED_SHEETS);
        Self::new(&tabs)
    }

    fn lock(&self) -> MutexGuard<'_, SheetsState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.lock().calls.clone()
    }

    pub fn fail_structure(&self, message: &str) {
        self.lock().structure_failure = Some(message.to_string());
    }

    pub fn fail_writes(&self, message: &str) {
        self.lock().write_failure = Some(message.to_string());
    }

    pub fn set(&self, location: &str, value: Value) {
        if let Some(key) = cell_key(location) {
            self.lock().cells.insert(key, value);
        }
    }

    pub fn get(&self, location: &str) -> Value {
        let state = self.lock();
        cell_key(location)
            .map(|key| read_cell(&state, &key))
            .unwrap_or(Value::Null)
    }

    /// Lays `rows` out from `A1` of `sheet`.
    pub fn set_tab(&self, sheet: &str, rows: Vec<Vec<Value>>) {
        let mut state = self.lock();
        for (r, row) in rows.into_iter().enumerate() {
            for (c, value) in row.into_iter().enumerate() {
                state.cells.insert((sheet.to_string(), r as u32 + 1, c), value);
            }
        }
    }

    /// Seeds the model variable mapping tab with `(section, field_key, location)` rows.
    pub fn set_mapping(&self, entries: &[(&str, &str, &str)]) {
        let mut rows = vec![vec![
            Value::from("section"),
            Value::from("field_key"),
            Value::from("location"),
            Value::from("start_month_location"),
            Value::from("end_month_location"),
        ]];
        rows.extend(entries.iter().map(|(section, key, location)| {
            vec![Value::from(*section), Value::from(*key), Value::from(*location)]
        }));
        self.set_tab(MODEL_VARIABLE_MAPPING_SHEET, rows);
    }

    pub fn compute<F>(&self, location: &str, formula: F)
    where
        F: Fn(&CellReader<'_>) -> Value + Send + Sync + 'static,
    {
        if let Some(key) = cell_key(location) {
            self.lock().computed.insert(key, Arc::new(formula));
        }
    }

    pub fn set_grid(&self, range: &str, grid: Vec<Vec<GridCell>>) {
        self.lock().grids.insert(a1::normalize_range(range), grid);
    }

    /// Values written with this range, most recent last.
    pub fn writes_to(&self, range: &str) -> Vec<Vec<Vec<Value>>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                FakeCall::Write(writes, _) => Some(writes.clone()),
                _ => None,
            })
            .flatten()
            .filter(|write| write.range == range)
            .map(|write| write.values)
            .collect()
    }
}

fn read_cell(state: &SheetsState, key: &CellKey) -> Value {
    if let Some(formula) = state.computed.get(key) {
        return formula(&CellReader {
            cells: &state.cells,
        });
    }
    state.cells.get(key).cloned().unwrap_or(Value::Null)
}

fn render(value: Value, render: ValueRenderOption) -> Value {
    match (render, value) {
        (_, Value::Null) => Value::Null,
        (ValueRenderOption::FormattedValue, value) => Value::String(json_value_to_string(&value)),
        (ValueRenderOption::Formula, value) => value,
    }
}

/// Trailing empty cells and rows are dropped, as the API does.
fn trim_rows(mut rows: Vec<Vec<Value>>) -> Vec<Vec<Value>> {
    for row in rows.iter_mut() {
        while row.last().is_some_and(Value::is_null) {
            row.pop();
        }
        for cell in row.iter_mut() {
            if cell.is_null() {
                *cell = Value::String(String::new());
            }
        }
    }
    while rows.last().is_some_and(Vec::is_empty) {
        rows.pop();
    }
    rows
}

#[async_trait]
impl SpreadsheetBackend for FakeSheets {
    async fn sheet_ids(&self, _spreadsheet_id: &str) -> Result<HashMap<String, i32>> {
        let mut state = self.lock();
        state.calls.push(FakeCall::SheetIds);
        Ok(state.sheet_ids.clone())
    }

    async fn apply_structure(&self, _spreadsheet_id: &str, changes: &[StructureChange]) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(FakeCall::Structure(changes.to_vec()));
        if let Some(message) = &state.structure_failure {
            return Err(anyhow!("Google Sheets API error: {}", message));
        }
        for change in changes {
            if let StructureChange::DeleteSheet { sheet_id } = change {
                state.sheet_ids.retain(|_, id| id != sheet_id);
            }
        }
        Ok(())
    }

    async fn write_values(
        &self,
        _spreadsheet_id: &str,
        writes: &[ValueWrite],
        input: ValueInputOption,
    ) -> Result<usize> {
        let mut state = self.lock();
        state.calls.push(FakeCall::Write(writes.to_vec(), input));
        if let Some(message) = &state.write_failure {
            return Err(anyhow!("Google Sheets API error: {}", message));
        }

        let mut updated = 0;
        for write in writes {
            let (sheet, bounds) = parse_range(&write.range)
                .ok_or_else(|| anyhow!("Unable to parse range: {}", write.range))?;
            let (row, col) = bounds.map(|(start, _)| start).unwrap_or((1, 0));
            for (r, values) in write.values.iter().enumerate() {
                for (c, value) in values.iter().enumerate() {
                    state
                        .cells
                        .insert((sheet.clone(), row + r as u32, col + c), value.clone());
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn batch_get(
        &self,
        _spreadsheet_id: &str,
        ranges: &[String],
        render_option: ValueRenderOption,
    ) -> Result<Vec<Vec<Vec<Value>>>> {
        let mut state = self.lock();
        state
            .calls
            .push(FakeCall::BatchGet(ranges.to_vec(), render_option));

        ranges
            .iter()
            .map(|range| {
                let (sheet, bounds) =
                    parse_range(range).ok_or_else(|| anyhow!("Unable to parse range: {}", range))?;
                let ((top, left), (bottom, right)) = match bounds {
                    Some(bounds) => bounds,
                    None => {
                        let keys = state.cells.keys().filter(|(name, _, _)| *name == sheet);
                        let (rows, cols) = keys.fold((0, 0), |(rows, cols), (_, row, col)| {
                            (rows.max(*row), cols.max(*col))
                        });
                        ((1, 0), (rows, cols))
                    }
                };
                let rows = (top..=bottom)
                    .map(|row| {
                        (left..=right)
                            .map(|col| {
                                render(read_cell(&state, &(sheet.clone(), row, col)), render_option)
                            })
                            .collect()
                    })
                    .collect();
                Ok(trim_rows(rows))
            })
            .collect()
    }

    async fn read_grid(&self, _spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<GridCell>>> {
        let mut state = self.lock();
        state.calls.push(FakeCall::ReadGrid(range.to_string()));
        state
            .grids
            .get(range)
            .cloned()
            .ok_or_else(|| anyhow!("Google Sheets API error: Unable to parse range: {}", range))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FakeFile {
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
    pub folder: bool,
}

#[derive(Default)]
struct DriveState {
    files: Vec<FakeFile>,
    copies: usize,
    deleted: Vec<String>,
    exports: Vec<String>,
    next_id: usize,
    lost_copy_responses: usize,
}

#[derive(Default)]
pub struct FakeDrive {
    state: Mutex<DriveState>,
}

impl FakeDrive {
    fn lock(&self) -> MutexGuard<'_, DriveState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn add(&self, name: &str, parent: Option<&str>, folder: bool) -> String {
        let mut state = self.lock();
        state.next_id += 1;
        let id = format!("{}-{}", if folder { "folder" } else { "file" }, state.next_id);
        state.files.push(FakeFile {
            id: id.clone(),
            name: name.to_string(),
            parent: parent.map(str::to_string),
            folder,
        });
        id
    }

    pub fn add_folder(&self, name: &str, parent: Option<&str>) -> String {
        self.add(name, parent, true)
    }

    pub fn add_file(&self, name: &str, parent: &str) -> String {
        self.add(name, Some(parent), false)
    }

    pub fn files(&self) -> Vec<FakeFile> {
        self.lock().files.clone()
    }

    pub fn copies(&self) -> usize {
        self.lock().copies
    }

    pub fn deleted(&self) -> Vec<String> {
        self.lock().deleted.clone()
    }

    pub fn exports(&self) -> Vec<String> {
        self.lock().exports.clone()
    }

    /// The next `count` copies land on Drive but report a timeout.
    pub fn lose_copy_responses(&self, count: usize) {
        self.lock().lost_copy_responses = count;
    }

    fn find(&self, name: &str, parent: Option<&str>, folder: bool) -> Option<String> {
        self.lock()
            .files
            .iter()
            .find(|file| file.name == name && file.folder == folder && file.parent.as_deref() == parent)
            .map(|file| file.id.clone())
    }
}

#[async_trait]
impl DriveBackend for FakeDrive {
    async fn find_folder(&self, name: &str, parent: Option<&str>) -> Result<Option<String>> {
        Ok(self.find(name, parent, true))
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<String> {
        Ok(self.add_folder(name, parent))
    }

    async fn find_file(&self, name: &str, parent: Option<&str>) -> Result<Option<String>> {
        let state = self.lock();
        Ok(state
            .files
            .iter()
            .find(|file| {
                file.name == name
                    && !file.folder
                    && parent.is_none_or(|parent| file.parent.as_deref() == Some(parent))
            })
            .map(|file| file.id.clone()))
    }

    async fn copy_file(&self, _file_id: &str, name: &str, parent: Option<&str>) -> Result<String> {
        let id = self.add(name, parent, false);
        let mut state = self.lock();
        state.copies += 1;
        if state.lost_copy_responses > 0 {
            state.lost_copy_responses -= 1;
            return Err(ModelError::DriveApi("template copy failed: operation timed out".to_string()).into());
        }
        Ok(id)
    }

    async fn delete_file(&self, file_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.files.retain(|file| file.id != file_id);
        state.deleted.push(file_id.to_string());
        Ok(())
    }

    async fn export_xlsx(&self, file_id: &str) -> Result<Vec<u8>> {
        self.lock().exports.push(file_id.to_string());
        Ok(b"PK\x03\x04".to_vec())
    }
}
