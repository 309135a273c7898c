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

//! Single-cell inputs: property identity and the payload's literal field values.

use super::{ASSUMPTIONS, COVER, Stage, register_nothing};
use crate::model::ModelVariableMapping;
use crate::model::mapping::CellTarget;
use crate::model::payload::{FieldValue, value_as_f64};
use crate::plan::PlanContext;
use crate::plan::formulas::text;
use crate::plan::ops::PlanBuilder;
use crate::utils::{a1, json_value_to_string};
use serde_json::Value;
use tracing::{debug, warn};

pub const PROPERTY: Stage = Stage {
    name: "property",
    register: register_nothing,
    build: build_property,
};

fn build_property(ctx: &PlanContext, plan: &mut PlanBuilder) {
    if let Some(address) = ctx.payload.address() {
        match ctx.mapping.resolve("Other Reference", "Address") {
            Some(location) => plan.write_cell(&on_sheet(&location, ASSUMPTIONS), text(address)),
            None => warn!("⚠️ No location found for Other Reference / Address, address not written"),
        }
    }

    if let Some(name) = &ctx.payload.name {
        let location = ctx
            .mapping
            .resolve("Other Reference", "Property Name")
            .map(|location| on_sheet(&location, COVER))
            .unwrap_or_else(|| format!("{}!A1", a1::quote_sheet(COVER)));
        plan.write_cell(&location, text(name.clone()));
    }
}

/// Bare cells such as `C5` are taken to live on `sheet`.
fn on_sheet(location: &str, sheet: &str) -> String {
    if location.contains('!') {
        a1::normalize_range(location)
    } else {
        format!("{}!{}", a1::quote_sheet(sheet), location.trim())
    }
}

/// Literal writes destined for one sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetFieldWrites {
    pub sheet: String,
    /// `(range, value)` pairs in payload order.
    pub cells: Vec<(String, Value)>,
}

/// Plans the payload's literal field values, grouped per sheet in the order
/// sheets are first seen. Fields without a mapped location are logged and
/// skipped.
pub fn plan_field_writes(
    fields: &[FieldValue],
    mapping: &ModelVariableMapping,
) -> Vec<SheetFieldWrites> {
    let mut groups: Vec<SheetFieldWrites> = Vec::new();
    let mut push = |target: &CellTarget, value: Value| {
        let range = target.range();
        match groups.iter_mut().find(|group| group.sheet == target.sheet) {
            Some(group) => group.cells.push((range, value)),
            None => groups.push(SheetFieldWrites {
                sheet: target.sheet.clone(),
                cells: vec![(range, value)],
            }),
        }
    };

    for field in fields {
        let targets = mapping.field_targets(&field.field_key);
        let Some(target) = &targets.value else {
            warn!("⚠️ No location found for {}", field.field_key);
            continue;
        };
        push(target, field_cell_value(field));

        for (month, target) in [
            (&field.start_month, &targets.start_month),
            (&field.end_month, &targets.end_month),
        ] {
            if let (Some(month), Some(target)) = (month, target)
                && is_truthy(month)
            {
                push(target, month.clone());
            }
        }
    }

    debug!(
        "🔍 Planned literal field writes for {} sheets",
        groups.len()
    );
    groups
}

/// What a field value looks like once entered into the sheet.
fn field_cell_value(field: &FieldValue) -> Value {
    if let Value::String(raw) = &field.value {
        match raw.trim().to_lowercase().as_str() {
            "yes" => return text("Yes"),
            "no" => return text("No"),
            _ => {}
        }
    }

    let is_percent = field
        .field_type
        .as_deref()
        .is_some_and(|kind| kind.eq_ignore_ascii_case("percent"));
    if is_percent && !field.value.is_null() {
        if value_as_f64(&field.value).is_some() {
            return text(format!("{}%", json_value_to_string(&field.value).trim()));
        }
        warn!(
            "⚠️ Percent field {} has a non-numeric value '{}', writing it as is",
            field.field_key,
            json_value_to_string(&field.value)
        );
    }
    field.value.clone()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(num) => num.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
