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

//! Block builders, one module per data category.
//!
//! Each module exposes one or more [`Stage`]s. A stage registers the row
//! blocks it needs with the layout, then, once every stage has registered,
//! generates its operations against the final layout.

pub mod amenity;
pub mod costs;
pub mod fields;
pub mod growth;
pub mod opex;
pub mod rental;
pub mod retail;

use crate::model::UnderwritingPayload;
use crate::plan::PlanContext;
use crate::plan::layout::SheetLayout;
use crate::plan::ops::PlanBuilder;
use crate::plan::variant::NoiWiring;
use crate::utils::ModelError;

pub const ASSUMPTIONS: &str = "Assumptions";
pub const MARKET_RENT: &str = "Market Rent Assumptions";
pub const RENTAL_ASSUMPTIONS: &str = "Rental Assumptions";
pub const RENT_ROLL: &str = "Rent Roll Model";
pub const AMENITY_INCOME: &str = "Amenity Income";
pub const NOI_WALK: &str = "NOI Walk";
pub const NOI: &str = "NOI";
pub const OPERATING_EXPENSES: &str = "Operating Expenses";
pub const RETAIL_ASSUMPTIONS: &str = "Retail Assumptions";
pub const COVER: &str = "Cover";

/// Number of monthly columns on NOI Walk, starting at column E.
pub const NOI_WALK_MONTHS: usize = 132;
/// 0-based index of column E.
pub const NOI_WALK_FIRST_MONTH: usize = 4;

pub type RegisterFn =
    fn(&UnderwritingPayload, NoiWiring, &mut SheetLayout) -> Result<(), ModelError>;
pub type BuildFn = fn(&PlanContext, &mut PlanBuilder);

/// One step of a variant's strategy.
pub struct Stage {
    pub name: &'static str,
    pub register: RegisterFn,
    pub build: BuildFn,
}

/// For stages that only write into fixed template cells.
pub fn register_nothing(
    _payload: &UnderwritingPayload,
    _wiring: NoiWiring,
    _layout: &mut SheetLayout,
) -> Result<(), ModelError> {
    Ok(())
}

pub(crate) fn row_count(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
