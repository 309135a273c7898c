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

//! Pure planning phase of a model run.
//!
//! [`build_plan`] turns a payload and the template's mapping into the full
//! list of [`BatchOperation`]s without touching the network. Planning runs
//! in two passes over the variant's stages: the first registers every row
//! block so the layout is final, the second generates formulas against it.

pub mod blocks;
pub mod formulas;
pub mod layout;
pub mod ops;
pub mod variant;

use crate::model::{ModelVariableMapping, UnderwritingPayload};
use crate::utils::a1;
use anyhow::Result;
use blocks::growth::GrowthTable;
use layout::{BlockId, BlockKind, SheetLayout};
use ops::{BatchOperation, PlanBuilder};
use serde::Serialize;
use tracing::{debug, info, warn};
use variant::{NoiWiring, Variant};

/// Everything a block builder may read while generating operations.
pub struct PlanContext<'a> {
    pub payload: &'a UnderwritingPayload,
    pub mapping: &'a ModelVariableMapping,
    pub variant: Variant,
    pub wiring: NoiWiring,
    pub layout: &'a SheetLayout,
    pub growth: &'a GrowthTable,
}

impl PlanContext<'_> {
    pub fn block(&self, kind: BlockKind) -> Option<BlockId> {
        self.layout.find(kind)
    }

    /// Mapped cell usable inside a formula, e.g. `'Other Reference'!C14`.
    /// A miss is logged and the caller skips whatever needed it.
    pub fn reference(&self, section: &str, field_key: &str) -> Option<String> {
        match self.mapping.resolve(section, field_key) {
            Some(location) => Some(a1::normalize_range(&location)),
            None => {
                warn!(
                    "⚠️ No location found for {} / {}, skipping dependent cells",
                    section, field_key
                );
                None
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelPlan {
    pub variant: Variant,
    pub wiring: NoiWiring,
    pub layout: SheetLayout,
    pub operations: Vec<BatchOperation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    pub inserts: usize,
    pub inserted_rows: u32,
    pub formats: usize,
    pub writes: usize,
}

impl ModelPlan {
    pub fn inserts(&self) -> impl Iterator<Item = &BatchOperation> {
        self.operations
            .iter()
            .filter(|op| matches!(op, BatchOperation::Insert { .. }))
    }

    pub fn formats(&self) -> impl Iterator<Item = &BatchOperation> {
        self.operations
            .iter()
            .filter(|op| matches!(op, BatchOperation::Format { .. }))
    }

    pub fn writes(&self) -> impl Iterator<Item = &BatchOperation> {
        self.operations
            .iter()
            .filter(|op| matches!(op, BatchOperation::Write { .. }))
    }

    pub fn summary(&self) -> PlanSummary {
        let inserted_rows = self
            .inserts()
            .map(|op| match op {
                BatchOperation::Insert { count, .. } => *count,
                _ => 0,
            })
            .sum();
        PlanSummary {
            inserts: self.inserts().count(),
            inserted_rows,
            formats: self.formats().count(),
            writes: self.writes().count(),
        }
    }
}

/// Builds the full mutation plan for one run.
pub fn build_plan(
    payload: &UnderwritingPayload,
    mapping: &ModelVariableMapping,
) -> Result<ModelPlan> {
    let variant = Variant::detect(payload)?;
    let wiring = NoiWiring::for_payload(payload);
    let stages = variant.strategy();
    debug!("🔍 Planning {:?} model with {:?} NOI wiring", variant, wiring);

    let mut layout = SheetLayout::new();
    for stage in stages {
        (stage.register)(payload, wiring, &mut layout)?;
    }

    let growth = GrowthTable::build(payload, mapping);
    let context = PlanContext {
        payload,
        mapping,
        variant,
        wiring,
        layout: &layout,
        growth: &growth,
    };

    let mut builder = PlanBuilder::new();
    layout.emit_inserts(&mut builder);
    for stage in stages {
        let before = builder.len();
        (stage.build)(&context, &mut builder);
        debug!(
            "🔍 Stage '{}' produced {} operations",
            stage.name,
            builder.len() - before
        );
    }

    let plan = ModelPlan {
        variant,
        wiring,
        layout,
        operations: builder.into_operations(),
    };
    let summary = plan.summary();
    info!(
        "📊 Planned {} inserts ({} rows), {} formats, {} writes",
        summary.inserts, summary.inserted_rows, summary.formats, summary.writes
    );
    Ok(plan)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ModelError;

    fn writes_to(plan: &ModelPlan, sheet: &str) -> Vec<String> {
        let prefix = format!("{}!", a1::quote_sheet(sheet));
        plan.writes()
            .filter_map(|op| match op {
                BatchOperation::Write { range, .. } if range.starts_with(&prefix) => {
                    Some(range.clone())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn residential_plan_places_blocks_and_skips_empty_amenities() {
        let plan = build_plan(&fixtures::residential(), &fixtures::mapping()).unwrap();
        assert_eq!(plan.variant, Variant::Residential);
        assert_eq!(plan.wiring, NoiWiring::Residential);

        let layout = &plan.layout;
        let units = layout.find(BlockKind::RentRollUnits).unwrap();
        let growth = layout.find(BlockKind::RentRollGrowth).unwrap();
        let amenities = layout.find(BlockKind::AmenityIncome).unwrap();
        assert_eq!(layout.count(growth), 2);
        assert_eq!(layout.start_row(units), 7 + 2);
        assert!(layout.is_empty(amenities));

        assert!(writes_to(&plan, "Amenity Income").is_empty());
        assert!(plan.inserts().all(|op| match op {
            BatchOperation::Insert { sheet, .. } => sheet != "Amenity Income",
            _ => true,
        }));
    }

    #[test]
    fn every_write_happens_after_every_insert() {
        let plan = build_plan(&fixtures::residential(), &fixtures::mapping()).unwrap();
        let last_insert = plan
            .operations
            .iter()
            .rposition(|op| matches!(op, BatchOperation::Insert { .. }))
            .unwrap();
        let first_write = plan
            .operations
            .iter()
            .position(|op| matches!(op, BatchOperation::Write { .. }))
            .unwrap();
        assert!(last_insert < first_write);
    }

    #[test]
    fn planning_is_deterministic() {
        let payload = fixtures::residential();
        let mapping = fixtures::mapping();
        let first = build_plan(&payload, &mapping).unwrap();
        let second = build_plan(&payload, &mapping).unwrap();
        assert_eq!(first.operations, second.operations);
    }

    #[test]
    fn commercial_plan_uses_retail_wiring() {
        let plan = build_plan(&fixtures::commercial(), &fixtures::mapping()).unwrap();
        assert_eq!(plan.variant, Variant::Commercial);
        assert_eq!(plan.wiring, NoiWiring::Commercial);
        assert!(plan.layout.find(BlockKind::RentRollUnits).is_none());

        let walk_expenses = plan.layout.find(BlockKind::NoiWalkExpenses).unwrap();
        assert_eq!(plan.layout.count(walk_expenses), 2);
        assert_eq!(plan.layout.start_row(walk_expenses), 23 + 1);
        assert!(!writes_to(&plan, "Retail Assumptions").is_empty());
    }

    #[test]
    fn empty_payload_fails_before_planning() {
        let err = build_plan(&UnderwritingPayload::default(), &fixtures::mapping()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ModelError>(),
            Some(ModelError::InvalidPayload(_))
        ));
    }
}
