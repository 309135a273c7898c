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

//! Row-block allocator.
//!
//! Every variable-length block is registered once with the row it is
//! inserted above in the untouched template (its anchor) and the number of
//! rows it needs. All row numbers the builders bake into formulas are then
//! derived here, so the arithmetic lives in exactly one place:
//!
//! * a block starts at its anchor plus the rows of every block registered
//!   before it on the same sheet;
//! * a fixed template row moves down by the rows of every block anchored at
//!   or above it.
//!
//! Inserts are applied in registration order, which is what makes the first
//! rule hold on the live sheet.

use crate::plan::ops::PlanBuilder;
use crate::utils::ModelError;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct BlockId(usize);

/// Logical identity of a block. One block of each kind per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    MarketRent,
    RentalUnits,
    AmenityIncome,
    RentRollGrowth,
    NoiWalkAmenities,
    NoiAmenities,
    OperatingExpenses,
    NoiWalkExpenses,
    NoiExpenses,
    RentRollUnits,
    RentRollVacancy,
    RetailTenants,
    RetailRecoveries,
    RetailExpenses,
    ClosingCosts,
    HardCosts,
    LegalCosts,
    Reserves,
}

#[derive(Debug, Clone, Serialize)]
pub struct Block {
    pub kind: BlockKind,
    pub sheet: String,
    pub anchor: u32,
    pub count: u32,
    pub inherit_from_before: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SheetLayout {
    blocks: Vec<Block>,
}

impl SheetLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a block. Anchors on one sheet must not go back up the sheet,
    /// otherwise the insert order would move rows already handed out.
    pub fn register(
        &mut self,
        kind: BlockKind,
        sheet: &str,
        anchor: u32,
        count: u32,
    ) -> Result<BlockId, ModelError> {
        if anchor == 0 {
            return Err(ModelError::Layout(format!(
                "{:?} on '{}' has anchor row 0",
                kind, sheet
            )));
        }
        if self.find(kind).is_some() {
            return Err(ModelError::Layout(format!("{:?} registered twice", kind)));
        }
        if let Some(previous) = self.blocks.iter().rev().find(|block| block.sheet == sheet)
            && previous.anchor > anchor
        {
            return Err(ModelError::Layout(format!(
                "{:?} anchored at row {} on '{}' but {:?} was already anchored at row {}",
                kind, anchor, sheet, previous.kind, previous.anchor
            )));
        }

        self.blocks.push(Block {
            kind,
            sheet: sheet.to_string(),
            anchor,
            count,
            inherit_from_before: false,
        });
        Ok(BlockId(self.blocks.len() - 1))
    }

    /// Same as [`register`](Self::register), but new rows copy the formatting
    /// of the row above instead of the row below.
    pub fn register_inheriting(
        &mut self,
        kind: BlockKind,
        sheet: &str,
        anchor: u32,
        count: u32,
    ) -> Result<BlockId, ModelError> {
        let id = self.register(kind, sheet, anchor, count)?;
        self.blocks[id.0].inherit_from_before = true;
        Ok(id)
    }

    pub fn find(&self, kind: BlockKind) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|block| block.kind == kind)
            .map(BlockId)
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    pub fn count(&self, id: BlockId) -> u32 {
        self.blocks[id.0].count
    }

    pub fn is_empty(&self, id: BlockId) -> bool {
        self.blocks[id.0].count == 0
    }

    /// First row of the block once every insert has been applied.
    pub fn start_row(&self, id: BlockId) -> u32 {
        let block = &self.blocks[id.0];
        let earlier: u32 = self.blocks[..id.0]
            .iter()
            .filter(|other| other.sheet == block.sheet)
            .map(|other| other.count)
            .sum();
        block.anchor + earlier
    }

    /// Last row of the block. For an empty block this is `start_row - 1`.
    pub fn end_row(&self, id: BlockId) -> u32 {
        self.start_row(id) + self.count(id) - 1
    }

    /// Row directly below the block, where template summary rows end up.
    pub fn after(&self, id: BlockId) -> u32 {
        self.start_row(id) + self.count(id)
    }

    /// Where a fixed template row ends up after all inserts.
    pub fn shifted(&self, sheet: &str, template_row: u32) -> u32 {
        let above: u32 = self
            .blocks
            .iter()
            .filter(|block| block.sheet == sheet && block.anchor <= template_row)
            .map(|block| block.count)
            .sum();
        template_row + above
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Emits one insert per non-empty block, in registration order.
    pub fn emit_inserts(&self, plan: &mut PlanBuilder) {
        for (index, block) in self.blocks.iter().enumerate() {
            plan.insert(
                &block.sheet,
                self.start_row(BlockId(index)),
                block.count,
                block.inherit_from_before,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ops::BatchOperation;

    #[test]
    fn start_rows_accumulate_earlier_counts() {
        let sizes = [3u32, 0, 5, 0, 0, 2, 7];
        let kinds = [
            BlockKind::MarketRent,
            BlockKind::RentalUnits,
            BlockKind::AmenityIncome,
            BlockKind::RentRollGrowth,
            BlockKind::NoiWalkAmenities,
            BlockKind::NoiAmenities,
            BlockKind::OperatingExpenses,
        ];
        let base = 4;
        let mut layout = SheetLayout::new();
        let ids: Vec<BlockId> = kinds
            .iter()
            .zip(sizes)
            .map(|(kind, size)| layout.register(*kind, "Model", base, size).unwrap())
            .collect();

        for (k, id) in ids.iter().enumerate() {
            let expected = base + sizes[..k].iter().sum::<u32>();
            assert_eq!(layout.start_row(*id), expected);
        }
    }

    #[test]
    fn expense_block_follows_units_growth_and_empty_amenities() {
        let base_expense_row = 12;
        let mut layout = SheetLayout::new();
        layout.register(BlockKind::RentalUnits, "Walk", 12, 3).unwrap();
        layout.register(BlockKind::RentRollGrowth, "Walk", 12, 2).unwrap();
        let amenities = layout.register(BlockKind::AmenityIncome, "Walk", 12, 0).unwrap();
        let expenses = layout.register(BlockKind::OperatingExpenses, "Walk", 12, 4).unwrap();

        assert_eq!(layout.start_row(expenses), base_expense_row + 3 + 2 + 0);
        assert!(layout.is_empty(amenities));

        let mut plan = PlanBuilder::new();
        layout.emit_inserts(&mut plan);
        let ops = plan.into_operations();
        assert_eq!(ops.len(), 3);
        assert!(
            ops.iter()
                .all(|op| matches!(op, BatchOperation::Insert { count, .. } if *count > 0))
        );
    }

    #[test]
    fn shifted_rows_only_move_for_blocks_at_or_above() {
        let mut layout = SheetLayout::new();
        let growth = layout.register(BlockKind::RentRollGrowth, "Rent Roll Model", 3, 2).unwrap();
        let units = layout.register(BlockKind::RentRollUnits, "Rent Roll Model", 7, 4).unwrap();
        let vacancy = layout
            .register(BlockKind::RentRollVacancy, "Rent Roll Model", 14, 4)
            .unwrap();
        layout.register(BlockKind::AmenityIncome, "Amenity Income", 2, 9).unwrap();

        assert_eq!(layout.start_row(growth), 3);
        assert_eq!(layout.start_row(units), 9);
        assert_eq!(layout.start_row(vacancy), 20);
        assert_eq!(layout.shifted("Rent Roll Model", 2), 2);
        assert_eq!(layout.shifted("Rent Roll Model", 6), 8);
        assert_eq!(layout.shifted("Rent Roll Model", 7), layout.after(units));
        assert_eq!(layout.shifted("Rent Roll Model", 14), layout.after(vacancy));
    }

    #[test]
    fn empty_block_ends_before_it_starts() {
        let mut layout = SheetLayout::new();
        let id = layout.register(BlockKind::Reserves, "Reserves", 2, 0).unwrap();
        assert_eq!(layout.start_row(id), 2);
        assert_eq!(layout.end_row(id), 1);
        assert_eq!(layout.after(id), 2);
    }

    #[test]
    fn rejects_anchor_moving_up_the_sheet() {
        let mut layout = SheetLayout::new();
        layout.register(BlockKind::NoiWalkExpenses, "NOI Walk", 30, 2).unwrap();
        let err = layout
            .register(BlockKind::NoiWalkAmenities, "NOI Walk", 25, 1)
            .unwrap_err();
        assert!(matches!(err, ModelError::Layout(_)));
        assert!(layout.register(BlockKind::NoiWalkExpenses, "NOI", 14, 1).is_err());
    }

    #[test]
    fn inheriting_blocks_carry_the_flag_into_inserts() {
        let mut layout = SheetLayout::new();
        layout
            .register_inheriting(BlockKind::NoiAmenities, "NOI", 10, 2)
            .unwrap();
        let mut plan = PlanBuilder::new();
        layout.emit_inserts(&mut plan);
        assert_eq!(
            plan.into_operations(),
            vec![BatchOperation::Insert {
                sheet: "NOI".to_string(),
                start_row: 10,
                count: 2,
                inherit_from_before: true,
            }]
        );
    }
}
