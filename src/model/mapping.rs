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

//! Mapping tabs shipped inside every model template.
//!
//! * `Model Variable Mapping` translates a logical `(section, field_key)` pair
//!   into a sheet cell and is the only way the planner learns where fixed
//!   inputs live.
//! * `Table Mapping` lists the ranges to read back as styled tables.
//! * `Variable Mapping` lists named outputs, either literals or `=Sheet!Cell`
//!   references.
//!
//! All three are read with the `FORMULA` render option so references come
//! back as their `=Sheet!Cell` text rather than the value they point at.

use crate::utils::a1;
use crate::utils::json_value_to_string;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

pub const MODEL_VARIABLE_MAPPING_SHEET: &str = "Model Variable Mapping";
pub const VARIABLE_MAPPING_SHEET: &str = "Variable Mapping";
pub const TABLE_MAPPING_SHEET: &str = "Table Mapping";

/// Tabs a template must carry before the engine touches it.
pub const REQUIRED_SHEETS: [&str; 3] = [
    MODEL_VARIABLE_MAPPING_SHEET,
    VARIABLE_MAPPING_SHEET,
    TABLE_MAPPING_SHEET,
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelMappingRow {
    pub section: String,
    pub field_key: String,
    pub location: String,
    pub start_month_location: String,
    pub end_month_location: String,
}

/// Sheet and cell a field value is written to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellTarget {
    pub sheet: String,
    pub cell: String,
}

impl CellTarget {
    /// Only `=Sheet!Cell` locations are writable targets.
    fn parse(location: &str) -> Option<Self> {
        let trimmed = location.trim();
        if !trimmed.starts_with('=') || !trimmed.contains('!') {
            return None;
        }
        let (sheet, cell) = a1::split_location(trimmed)?;
        Some(Self {
            sheet: sheet.trim_matches('"').to_string(),
            cell,
        })
    }

    pub fn range(&self) -> String {
        format!("{}!{}", a1::quote_sheet(&self.sheet), self.cell)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTargets {
    pub value: Option<CellTarget>,
    pub start_month: Option<CellTarget>,
    pub end_month: Option<CellTarget>,
}

/// Parsed `Model Variable Mapping` tab. Immutable for the length of a run.
#[derive(Debug, Clone, Default)]
pub struct ModelVariableMapping {
    rows: Vec<ModelMappingRow>,
}

impl ModelVariableMapping {
    /// Builds the mapping from raw tab values, header row first.
    pub fn from_rows(rows: &[Vec<Value>]) -> Self {
        let records = records(rows);
        let rows = records
            .iter()
            .map(|record| {
                let column = |name: &str| {
                    record
                        .get(name)
                        .map(json_value_to_string)
                        .unwrap_or_default()
                        .trim()
                        .to_string()
                };
                ModelMappingRow {
                    section: column("section"),
                    field_key: column("field_key"),
                    location: column("location"),
                    start_month_location: column("start_month_location"),
                    end_month_location: column("end_month_location"),
                }
            })
            .collect();
        Self { rows }
    }

    #[cfg(test)]
    pub fn from_entries(entries: &[(&str, &str, &str)]) -> Self {
        let rows = entries
            .iter()
            .map(|(section, field_key, location)| ModelMappingRow {
                section: section.to_string(),
                field_key: field_key.to_string(),
                location: location.to_string(),
                ..Default::default()
            })
            .collect();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Resolves a `(section, field_key)` pair to a location such as
    /// `'Other Reference'!C14`, with any leading `=` removed.
    ///
    /// Matching is exact and case-sensitive after trimming. A miss is
    /// reported as `None`; the caller decides whether that is fatal.
    pub fn resolve(&self, section: &str, field_key: &str) -> Option<String> {
        let section = section.trim();
        let field_key = field_key.trim();
        let found = self
            .rows
            .iter()
            .find(|row| row.section == section && row.field_key == field_key)
            .map(|row| row.location.trim_start_matches('=').to_string());

        if found.is_none() {
            debug!("🔍 No location found for {} / {}", section, field_key);
        }
        found
    }

    /// Targets for a literal field write. Looks up by `field_key` only,
    /// case-insensitively, taking the first matching row.
    pub fn field_targets(&self, field_key: &str) -> FieldTargets {
        let wanted = field_key.trim().to_lowercase();
        let first = |pick: fn(&ModelMappingRow) -> &str| {
            self.rows
                .iter()
                .filter(|row| row.field_key.to_lowercase() == wanted)
                .find_map(|row| CellTarget::parse(pick(row)))
        };
        FieldTargets {
            value: first(|row| row.location.as_str()),
            start_month: first(|row| row.start_month_location.as_str()),
            end_month: first(|row| row.end_month_location.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableMappingEntry {
    pub table_name: String,
    pub table_location: String,
    pub table_order: Value,
    pub summary: Value,
}

pub fn parse_table_mapping(rows: &[Vec<Value>]) -> Vec<TableMappingEntry> {
    records(rows)
        .into_iter()
        .map(|record| TableMappingEntry {
            table_name: record
                .get("table_name")
                .map(json_value_to_string)
                .unwrap_or_default(),
            table_location: record
                .get("table_location")
                .map(json_value_to_string)
                .unwrap_or_default(),
            table_order: record.get("table_order").cloned().unwrap_or(Value::Null),
            summary: record
                .get("summary")
                .cloned()
                .unwrap_or_else(|| Value::String("FALSE".to_string())),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableMappingEntry {
    pub variable_name: String,
    pub variable_location: Value,
}

pub fn parse_variable_mapping(rows: &[Vec<Value>]) -> Vec<VariableMappingEntry> {
    records(rows)
        .into_iter()
        .filter_map(|record| {
            let name = record.get("variable_name").map(json_value_to_string)?;
            let location = record.get("variable_location").cloned()?;
            Some(VariableMappingEntry {
                variable_name: name,
                variable_location: location,
            })
        })
        .collect()
}

/// Zips every data row with the header row. Short rows simply lack the
/// trailing keys.
fn records(rows: &[Vec<Value>]) -> Vec<HashMap<String, Value>> {
    let Some((header, data)) = rows.split_first() else {
        return Vec::new();
    };
    let header: Vec<String> = header
        .iter()
        .map(|cell| json_value_to_string(cell).trim().to_string())
        .collect();

    data.iter()
        .map(|row| {
            header
                .iter()
                .cloned()
                .zip(row.iter().cloned())
                .collect::<HashMap<_, _>>()
        })
        .collect()
}
