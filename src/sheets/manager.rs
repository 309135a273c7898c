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

use super::backend::{
    CellColor, GridCell, SpreadsheetBackend, StructureChange, ValueInputOption, ValueRenderOption,
    ValueWrite,
};
use crate::auth::Authenticator;
use crate::config::RetryPolicy;
use crate::plan::ops::{self, CellStyle};
use crate::utils::ModelError;
use anyhow::Result;
use async_trait::async_trait;
use google_sheets4::{
    FieldMask, Sheets,
    api::{
        BatchUpdateSpreadsheetRequest, BatchUpdateValuesRequest, Border, CellData, CellFormat,
        Color, DeleteSheetRequest, DimensionRange, GridRange, InsertDimensionRequest,
        NumberFormat, RepeatCellRequest, Request, SheetProperties, TextFormat,
        UpdateBordersRequest, UpdateSheetPropertiesRequest, ValueRange,
    },
    hyper_rustls,
};
use hyper_util::{client::legacy::connect::HttpConnector, rt::TokioExecutor};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Ranges per values read.
const MAX_BATCH_SIZE: usize = 100;

pub type SheetsHub = Sheets<hyper_rustls::HttpsConnector<HttpConnector>>;

/// [`SpreadsheetBackend`] over the Google Sheets v4 API.
pub struct GoogleSheetsBackend {
    hub: SheetsHub,
    retry: RetryPolicy,
}

impl GoogleSheetsBackend {
    fn is_rate_limit_error(error: &google_sheets4::Error) -> bool {
        let message = error.to_string().to_lowercase();
        message.contains("rate")
            || message.contains("quota")
            || message.contains("too many requests")
            || message.contains("429")
    }

    async fn call_with_rate_limit_retry<T, F, Fut>(
        &self,
        description: &str,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, google_sheets4::Error>>,
    {
        let mut attempt = 0usize;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err)
                    if attempt + 1 < self.retry.max_attempts
                        && GoogleSheetsBackend::is_rate_limit_error(&err) =>
                {
                    attempt += 1;
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        "🔁 {} hit Google rate limit (attempt {}/{}), retrying in {:?}",
                        description, attempt, self.retry.max_attempts, delay
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    return Err(
                        ModelError::SheetsApi(format!("{} failed: {}", description, err)).into(),
                    );
                }
            }
        }
    }

    /// Builds the API hub once; the backend is then handed to the engine.
    pub fn new(auth: Authenticator, retry: RetryPolicy) -> Result<Self> {
        info!("🔑 Initializing Google Sheets API connection...");
        let client = hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(
            hyper_rustls::HttpsConnectorBuilder::new()
                .with_native_roots()?
                .https_or_http()
                .enable_http1()
                .build(),
        );
        let hub = Sheets::new(client, auth);
        info!("✅ Google Sheets API connection established");
        Ok(Self { hub, retry })
    }
}

#[async_trait]
impl SpreadsheetBackend for GoogleSheetsBackend {
    async fn sheet_ids(&self, spreadsheet_id: &str) -> Result<HashMap<String, i32>> {
        debug!("🔍 Fetching sheet metadata for {}", spreadsheet_id);
        let hub = &self.hub;
        let (_, spreadsheet) = self
            .call_with_rate_limit_retry("fetch spreadsheet metadata", || async move {
                hub.spreadsheets().get(spreadsheet_id).doit().await
            })
            .await?;

        let mut ids = HashMap::new();
        for sheet in spreadsheet.sheets.unwrap_or_default() {
            if let Some(properties) = sheet.properties
                && let Some(title) = properties.title
                && let Some(sheet_id) = properties.sheet_id
            {
                ids.insert(title, sheet_id);
            }
        }
        Ok(ids)
    }

    async fn apply_structure(&self, spreadsheet_id: &str, changes: &[StructureChange]) -> Result<()> {
        let requests: Vec<Request> = changes.iter().flat_map(structure_requests).collect();
        if requests.is_empty() {
            return Ok(());
        }
        let count = requests.len();
        let batch_request = BatchUpdateSpreadsheetRequest {
            requests: Some(requests),
            ..Default::default()
        };

        let hub = &self.hub;
        self.call_with_rate_limit_retry("apply structural changes", || {
            let request = batch_request.clone();
            async move {
                hub.spreadsheets()
                    .batch_update(request, spreadsheet_id)
                    .doit()
                    .await
            }
        })
        .await?;
        debug!("✅ Applied {} structural requests", count);
        Ok(())
    }

    async fn write_values(
        &self,
        spreadsheet_id: &str,
        writes: &[ValueWrite],
        input: ValueInputOption,
    ) -> Result<usize> {
        let value_ranges: Vec<ValueRange> = writes
            .iter()
            .filter(|write| !write.values.is_empty())
            .map(|write| ValueRange {
                range: Some(write.range.clone()),
                values: Some(write.values.clone()),
                ..Default::default()
            })
            .collect();
        if value_ranges.is_empty() {
            return Ok(0);
        }

        let request = BatchUpdateValuesRequest {
            value_input_option: Some(input.as_api_str().to_string()),
            data: Some(value_ranges),
            ..Default::default()
        };
        let ranges = request.data.as_ref().map_or(0, Vec::len);
        let hub = &self.hub;

        // Every range in a single call.
        let result = self
            .call_with_rate_limit_retry("batch update values", || {
                let request = request.clone();
                async move {
                    hub.spreadsheets()
                        .values_batch_update(request, spreadsheet_id)
                        .doit()
                        .await
                }
            })
            .await;

        match result {
            Ok((_, response)) => {
                let updated_cells = response.total_updated_cells.unwrap_or(0).max(0) as usize;
                debug!("✅ {} ranges written: {} cells updated", ranges, updated_cells);
                Ok(updated_cells)
            }
            Err(e) => {
                error!("❌ {}", e);
                Err(e)
            }
        }
    }

    async fn batch_get(
        &self,
        spreadsheet_id: &str,
        ranges: &[String],
        render: ValueRenderOption,
    ) -> Result<Vec<Vec<Vec<Value>>>> {
        let mut results = Vec::with_capacity(ranges.len());
        let hub = &self.hub;

        for chunk in ranges.chunks(MAX_BATCH_SIZE) {
            debug!("📊 Reading {} ranges ({})", chunk.len(), render.as_api_str());
            let (_, response) = self
                .call_with_rate_limit_retry("batch read values", || async move {
                    let mut call = hub
                        .spreadsheets()
                        .values_batch_get(spreadsheet_id)
                        .value_render_option(render.as_api_str());
                    for range in chunk {
                        call = call.add_ranges(range);
                    }
                    call.doit().await
                })
                .await?;

            let mut value_ranges = response.value_ranges.unwrap_or_default().into_iter();
            // The API answers one ValueRange per requested range, in order.
            for _ in chunk {
                let values = value_ranges
                    .next()
                    .and_then(|range| range.values)
                    .unwrap_or_default();
                results.push(values);
            }
        }
        Ok(results)
    }

    async fn read_grid(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<GridCell>>> {
        let hub = &self.hub;
        let description = format!("read grid data for {}", range);
        let (_, spreadsheet) = self
            .call_with_rate_limit_retry(description.as_str(), || async move {
                hub.spreadsheets()
                    .get(spreadsheet_id)
                    .add_ranges(range)
                    .include_grid_data(true)
                    .doit()
                    .await
            })
            .await?;

        let rows = spreadsheet
            .sheets
            .unwrap_or_default()
            .into_iter()
            .next()
            .and_then(|sheet| sheet.data)
            .and_then(|data| data.into_iter().next())
            .and_then(|grid| grid.row_data)
            .unwrap_or_default();

        Ok(rows
            .into_iter()
            .map(|row| {
                row.values
                    .unwrap_or_default()
                    .into_iter()
                    .map(grid_cell)
                    .collect()
            })
            .collect())
    }
}

fn grid_cell(cell: CellData) -> GridCell {
    let format = cell.effective_format.unwrap_or_default();
    GridCell {
        formatted_value: cell.formatted_value,
        bold: format
            .text_format
            .and_then(|text| text.bold)
            .unwrap_or(false),
        background: format.background_color.map(|color| CellColor {
            red: color.red,
            green: color.green,
            blue: color.blue,
        }),
    }
}

fn api_color(color: ops::Color) -> Color {
    Color {
        red: Some(color.red),
        green: Some(color.green),
        blue: Some(color.blue),
        ..Default::default()
    }
}

fn grid_range(
    sheet_id: i32,
    start_row_index: u32,
    end_row_index: u32,
    columns: Option<(usize, usize)>,
) -> GridRange {
    GridRange {
        sheet_id: Some(sheet_id),
        start_row_index: Some(start_row_index as i32),
        end_row_index: Some(end_row_index as i32),
        start_column_index: columns.map(|(start, _)| start as i32),
        end_column_index: columns.map(|(_, end)| end as i32),
        ..Default::default()
    }
}

fn cell_format(style: &CellStyle) -> CellFormat {
    let text_format = (style.bold.is_some() || style.foreground.is_some()).then(|| TextFormat {
        bold: style.bold,
        foreground_color: style.foreground.map(api_color),
        ..Default::default()
    });
    CellFormat {
        text_format,
        background_color: style.background.map(api_color),
        number_format: style.number_format.as_ref().map(|format| NumberFormat {
            type_: Some(format.kind.as_api_str().to_string()),
            pattern: Some(format.pattern.clone()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// API requests for one change. A styled range with a top border needs a
/// repeatCell and an updateBorders request.
fn structure_requests(change: &StructureChange) -> Vec<Request> {
    match change {
        StructureChange::InsertRows {
            sheet_id,
            start_index,
            end_index,
            inherit_from_before,
        } => vec![Request {
            insert_dimension: Some(InsertDimensionRequest {
                range: Some(DimensionRange {
                    sheet_id: Some(*sheet_id),
                    dimension: Some("ROWS".to_string()),
                    start_index: Some(*start_index as i32),
                    end_index: Some(*end_index as i32),
                    ..Default::default()
                }),
                inherit_from_before: Some(*inherit_from_before),
                ..Default::default()
            }),
            ..Default::default()
        }],
        StructureChange::FormatCells {
            sheet_id,
            start_row_index,
            end_row_index,
            columns,
            style,
        } => {
            let range = grid_range(*sheet_id, *start_row_index, *end_row_index, *columns);
            let mut requests = Vec::new();
            let paths = style.field_paths();
            if !paths.is_empty() {
                requests.push(Request {
                    repeat_cell: Some(RepeatCellRequest {
                        range: Some(range.clone()),
                        cell: Some(CellData {
                            user_entered_format: Some(cell_format(style)),
                            ..Default::default()
                        }),
                        fields: Some(FieldMask::new(&paths[..])),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }
            if style.top_border {
                requests.push(Request {
                    update_borders: Some(UpdateBordersRequest {
                        range: Some(range),
                        top: Some(Border {
                            style: Some("SOLID".to_string()),
                            color: Some(api_color(ops::Color::BLACK)),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }
            requests
        }
        StructureChange::DeleteSheet { sheet_id } => vec![Request {
            delete_sheet: Some(DeleteSheetRequest {
                sheet_id: Some(*sheet_id),
                ..Default::default()
            }),
            ..Default::default()
        }],
        StructureChange::HideSheet { sheet_id } => vec![Request {
            update_sheet_properties: Some(UpdateSheetPropertiesRequest {
                properties: Some(SheetProperties {
                    sheet_id: Some(*sheet_id),
                    hidden: Some(true),
                    ..Default::default()
                }),
                fields: Some(FieldMask::new(&["hidden"])),
                ..Default::default()
            }),
            ..Default::default()
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_maps_to_row_dimension() {
        let requests = structure_requests(&StructureChange::InsertRows {
            sheet_id: 7,
            start_index: 1,
            end_index: 4,
            inherit_from_before: true,
        });
        assert_eq!(requests.len(), 1);
        let insert = requests[0].insert_dimension.as_ref().unwrap();
        let range = insert.range.as_ref().unwrap();
        assert_eq!(range.dimension.as_deref(), Some("ROWS"));
        assert_eq!((range.start_index, range.end_index), (Some(1), Some(4)));
        assert_eq!(insert.inherit_from_before, Some(true));
    }

    #[test]
    fn format_with_border_produces_two_requests() {
        let style = CellStyle {
            top_border: true,
            ..CellStyle::bold(true)
        };
        let requests = structure_requests(&StructureChange::FormatCells {
            sheet_id: 3,
            start_row_index: 9,
            end_row_index: 10,
            columns: Some((0, 200)),
            style,
        });
        assert_eq!(requests.len(), 2);
        let repeat = requests[0].repeat_cell.as_ref().unwrap();
        let format = repeat
            .cell
            .as_ref()
            .and_then(|cell| cell.user_entered_format.as_ref())
            .unwrap();
        assert_eq!(format.text_format.as_ref().and_then(|text| text.bold), Some(true));
        assert!(requests[1].update_borders.is_some());
        let range = repeat.range.as_ref().unwrap();
        assert_eq!(range.end_column_index, Some(200));
    }

    #[test]
    fn border_only_style_skips_repeat_cell() {
        let requests = structure_requests(&StructureChange::FormatCells {
            sheet_id: 3,
            start_row_index: 0,
            end_row_index: 1,
            columns: None,
            style: CellStyle::top_border(),
        });
        assert_eq!(requests.len(), 1);
        assert!(requests[0].repeat_cell.is_none());
    }

    #[test]
    fn number_format_carries_type_and_pattern() {
        let format = cell_format(&CellStyle::percent("0.0%"));
        let number = format.number_format.unwrap();
        assert_eq!(number.type_.as_deref(), Some("PERCENT"));
        assert_eq!(number.pattern.as_deref(), Some("0.0%"));
        assert!(format.text_format.is_none());
    }

    #[test]
    fn hide_sheet_sets_hidden_flag() {
        let requests = structure_requests(&StructureChange::HideSheet { sheet_id: 11 });
        let properties = requests[0]
            .update_sheet_properties
            .as_ref()
            .and_then(|update| update.properties.as_ref())
            .unwrap();
        assert_eq!(properties.hidden, Some(true));
        assert_eq!(properties.sheet_id, Some(11));
    }

    #[test]
    fn grid_cell_defaults_when_format_missing() {
        let cell = grid_cell(CellData {
            formatted_value: Some("$1,200".to_string()),
            ..Default::default()
        });
        assert_eq!(cell.formatted_value.as_deref(), Some("$1,200"));
        assert!(!cell.bold);
        assert!(cell.background.is_none());
    }
}
