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

//! Underwriting input accepted by the engine.
//!
//! The payload is what the web layer hands over after intake: one JSON
//! document with the per-category item collections. Numeric fields accept
//! either JSON numbers or numeric strings, since intake forms send both.

use crate::utils::ModelError;
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnderwritingPayload {
    /// Single-cell field values keyed by the mapping's `field_key`.
    #[serde(alias = "user_model_field_values")]
    pub field_values: Vec<FieldValue>,
    pub market_rent_assumptions: Vec<MarketRent>,
    #[serde(alias = "rental_assumptions")]
    pub units: Vec<RentalUnit>,
    pub growth_rates: Vec<GrowthRate>,
    pub amenity_income: Vec<Amenity>,
    pub operating_expenses: Vec<OperatingExpense>,
    /// Closing, hard, legal, reserve and retail cost lines, told apart by `type`.
    pub expenses: Vec<CostLine>,
    pub retail_income: Vec<RetailTenant>,
    #[serde(alias = "property_name")]
    pub name: Option<String>,
    pub street_address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
}

impl UnderwritingPayload {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read payload file: {}", path.display()))?;
        serde_json::from_str(&content)
            .map_err(ModelError::from)
            .with_context(|| format!("Failed to parse payload JSON: {}", path.display()))
    }

    /// `street, city, state zip` with missing parts left blank.
    pub fn address(&self) -> Option<String> {
        if self.street_address.is_none() && self.city.is_none() {
            return None;
        }
        let part = |value: &Option<String>| value.clone().unwrap_or_default();
        Some(format!(
            "{} {}, {} {}",
            part(&self.street_address),
            part(&self.city),
            part(&self.state),
            part(&self.zip_code)
        ))
    }

    /// Market rows are only meaningful alongside units, and vice versa.
    pub fn has_rental_block(&self) -> bool {
        !self.market_rent_assumptions.is_empty() && !self.units.is_empty()
    }

    pub fn rental_growth_rates(&self) -> Vec<&GrowthRate> {
        self.growth_rates
            .iter()
            .filter(|rate| rate.kind == GrowthKind::Rental)
            .collect()
    }

    /// First `retail` growth rate, in percent.
    pub fn retail_growth_rate(&self) -> f64 {
        self.growth_rates
            .iter()
            .find(|rate| rate.kind == GrowthKind::Retail)
            .map(|rate| rate.value)
            .unwrap_or(0.0)
    }

    pub fn cost_lines(&self, kind: &str) -> Vec<&CostLine> {
        self.expenses
            .iter()
            .filter(|line| line.kind.as_deref() == Some(kind))
            .collect()
    }

    pub fn retail_expenses(&self) -> Vec<&CostLine> {
        self.cost_lines(RETAIL_COST_TYPE)
    }
}

pub const RETAIL_COST_TYPE: &str = "Retail";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValue {
    pub field_key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub field_type: Option<String>,
    #[serde(default)]
    pub start_month: Option<Value>,
    #[serde(default)]
    pub end_month: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketRent {
    pub layout: Value,
    #[serde(default)]
    pub pf_rent: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentalUnit {
    #[serde(default)]
    pub rent_type: Value,
    #[serde(default)]
    pub vacate_flag: Value,
    #[serde(default)]
    pub layout: Value,
    #[serde(default)]
    pub square_feet: Value,
    #[serde(default)]
    pub vacate_month: Value,
    #[serde(default)]
    pub current_rent: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrowthKind {
    Rental,
    Retail,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrowthRate {
    pub name: String,
    /// Percent, e.g. `3` for 3%.
    #[serde(default, deserialize_with = "number_or_string")]
    pub value: f64,
    #[serde(default, rename = "type")]
    pub kind: GrowthKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Amenity {
    pub name: String,
    #[serde(default)]
    pub start_month: Value,
    /// Percent of units using the amenity.
    #[serde(default)]
    pub utilization: Value,
    #[serde(default)]
    pub unit_count: Value,
    #[serde(default)]
    pub monthly_fee: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatingExpense {
    pub name: String,
    #[serde(default, deserialize_with = "number_or_string")]
    pub factor: f64,
    #[serde(default)]
    pub cost_per: String,
    #[serde(default)]
    pub broker: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostLine {
    pub name: String,
    /// How the cost is computed, e.g. `Percent of Purchase Price` or `Per Unit`.
    #[serde(default)]
    pub factor: String,
    #[serde(default, deserialize_with = "number_or_string")]
    pub cost_per: f64,
    #[serde(default)]
    pub statistic: Value,
    #[serde(default)]
    pub start_month: Value,
    #[serde(default)]
    pub end_month: Value,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetailTenant {
    #[serde(default)]
    pub suite: Value,
    #[serde(default)]
    pub tenant_name: Value,
    #[serde(default)]
    pub square_feet: Value,
    #[serde(default)]
    pub rent_start_month: Value,
    /// Annual escalation in percent.
    #[serde(default)]
    pub annual_bumps: Value,
    #[serde(default)]
    pub rent_per_square_foot_per_year: Value,
    #[serde(default)]
    pub rent_type: Value,
    #[serde(default)]
    pub lease_start_month: Value,
    #[serde(default)]
    pub lease_end_month: Value,
    #[serde(default)]
    pub recovery_start_month: Value,
}

/// Accepts `5`, `5.5`, `"5"`, `""` and `null`; blanks become `0`.
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Number(num) => num
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom(format!("invalid number: {}", num))),
        Value::String(text) if text.trim().is_empty() => Ok(0.0),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got '{}'", text))),
        Value::Null => Ok(0.0),
        other => Err(serde::de::Error::custom(format!(
            "expected a number, got {}",
            other
        ))),
    }
}

/// Reads a loosely typed cell input as a number, if it is one.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(num) => num.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_intake_document_with_aliases() {
        let payload: UnderwritingPayload = serde_json::from_value(json!({
            "user_model_field_values": [
                {"field_key": "Purchase Price", "value": "1000000", "field_type": "number"}
            ],
            "units": [{"rent_type": "Market", "vacate_flag": 0, "layout": "1BR",
                       "square_feet": 700, "vacate_month": 0, "current_rent": 1500}],
            "market_rent_assumptions": [{"layout": "1BR", "pf_rent": 1650}],
            "growth_rates": [{"name": "Rent Growth", "value": "3", "type": "rental"},
                             {"name": "Expense Inflation", "value": 2.5, "type": "expense"}],
            "expenses": [{"name": "Title", "factor": "Per Unit", "cost_per": "250",
                          "statistic": 10, "start_month": 1, "end_month": 1, "type": "Closing Costs"}],
            "name": "Maple Court",
            "city": "Austin"
        }))
        .unwrap();

        assert_eq!(payload.field_values.len(), 1);
        assert!(payload.has_rental_block());
        assert_eq!(payload.rental_growth_rates().len(), 1);
        assert_eq!(payload.growth_rates[1].kind, GrowthKind::Other);
        assert_eq!(payload.growth_rates[0].value, 3.0);
        assert_eq!(payload.cost_lines("Closing Costs")[0].cost_per, 250.0);
        assert_eq!(payload.name.as_deref(), Some("Maple Court"));
        assert_eq!(payload.address().as_deref(), Some(" Austin,  "));
    }

    #[test]
    fn retail_growth_defaults_to_zero() {
        let payload = UnderwritingPayload::default();
        assert_eq!(payload.retail_growth_rate(), 0.0);
        assert!(payload.address().is_none());
    }

    #[test]
    fn rejects_non_numeric_growth_rate() {
        let result: Result<GrowthRate, _> =
            serde_json::from_value(json!({"name": "Rent Growth", "value": "fast"}));
        assert!(result.is_err());
    }
}
