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

use crate::model::UnderwritingPayload;
use crate::plan::blocks::{self, Stage};
use crate::utils::ModelError;
use serde::Serialize;

/// Template family a payload drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Residential,
    Commercial,
    Mixed,
}

impl Variant {
    /// Recomputed on every run from what the payload actually carries.
    pub fn detect(payload: &UnderwritingPayload) -> Result<Self, ModelError> {
        let rentals = !payload.units.is_empty();
        let retail = !payload.retail_income.is_empty();
        match (rentals, retail) {
            (true, false) => Ok(Variant::Residential),
            (false, true) => Ok(Variant::Commercial),
            (true, true) => Ok(Variant::Mixed),
            (false, false) => Err(ModelError::InvalidPayload(
                "payload has neither rental units nor retail income".to_string(),
            )),
        }
    }

    /// Ordered block builders for this variant.
    pub fn strategy(self) -> &'static [Stage] {
        match self {
            Variant::Residential => RESIDENTIAL,
            Variant::Commercial => COMMERCIAL,
            Variant::Mixed => MIXED,
        }
    }
}

const RESIDENTIAL: &[Stage] = &[
    blocks::rental::RENTAL_TABLES,
    blocks::growth::GROWTH_RATES,
    blocks::amenity::AMENITIES,
    blocks::rental::RENT_ROLL_MODEL,
    blocks::opex::OPERATING_EXPENSES,
    blocks::opex::NOI_EXPENSES,
    blocks::fields::PROPERTY,
    blocks::costs::COST_SHEETS,
];

const COMMERCIAL: &[Stage] = &[
    blocks::amenity::AMENITIES,
    blocks::retail::RETAIL,
    blocks::opex::OPERATING_EXPENSES,
    blocks::opex::NOI_EXPENSES,
    blocks::fields::PROPERTY,
    blocks::costs::COST_SHEETS,
];

const MIXED: &[Stage] = &[
    blocks::rental::RENTAL_TABLES,
    blocks::growth::GROWTH_RATES,
    blocks::amenity::AMENITIES,
    blocks::rental::RENT_ROLL_MODEL,
    blocks::retail::RETAIL,
    blocks::opex::OPERATING_EXPENSES,
    blocks::opex::NOI_EXPENSES,
    blocks::fields::PROPERTY,
    blocks::costs::COST_SHEETS,
];

/// How the NOI Walk and NOI sheets are wired.
///
/// Operating expenses present means residential wiring with expense rows
/// from `Operating Expenses`; otherwise the commercial template rows are
/// used and expenses come from the retail expense block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiWiring {
    Residential,
    Commercial,
}

impl NoiWiring {
    pub fn for_payload(payload: &UnderwritingPayload) -> Self {
        if payload.operating_expenses.is_empty() {
            NoiWiring::Commercial
        } else {
            NoiWiring::Residential
        }
    }

    pub fn walk_amenity_anchor(self) -> u32 {
        match self {
            NoiWiring::Residential => 25,
            NoiWiring::Commercial => 20,
        }
    }

    pub fn walk_expense_anchor(self) -> u32 {
        match self {
            NoiWiring::Residential => 30,
            NoiWiring::Commercial => 23,
        }
    }

    pub fn noi_amenity_anchor(self) -> u32 {
        match self {
            NoiWiring::Residential => 10,
            NoiWiring::Commercial => 8,
        }
    }

    pub fn noi_expense_anchor(self) -> u32 {
        match self {
            NoiWiring::Residential => 14,
            NoiWiring::Commercial => 11,
        }
    }

    /// NOI Walk row holding the period headers the NOI SUMIFS match on.
    pub fn walk_header_row(self) -> u32 {
        match self {
            NoiWiring::Residential => 14,
            NoiWiring::Commercial => 13,
        }
    }

    /// Template row of the effective gross income line on NOI Walk.
    pub fn egi_template_row(self) -> u32 {
        match self {
            NoiWiring::Residential => 27,
            NoiWiring::Commercial => 20,
        }
    }
}
