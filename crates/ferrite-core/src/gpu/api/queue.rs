// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Queue families, their capabilities, and the selection of the four logical
//! queues (graphics, present, transfer, compute).

use crate::ferrite_bitflags;

ferrite_bitflags! {
    /// Operations a queue family supports, or a pass requires.
    pub struct QueueOperations: u32 {
        /// Graphics commands.
        const GRAPHICS = 1 << 0;
        /// Compute dispatches.
        const COMPUTE = 1 << 1;
        /// Transfer commands.
        const TRANSFER = 1 << 2;
        /// Sparse binding.
        const SPARSE_BINDING = 1 << 3;
        /// Presentation to a surface.
        const PRESENT = 1 << 4;
    }
}

/// Capabilities of one queue family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    /// Family index.
    pub index: u32,
    /// Supported operations.
    pub ops: QueueOperations,
    /// Number of queues in the family.
    pub count: u32,
}

/// The family chosen for each logical queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyLayout {
    /// Family used for graphics passes.
    pub graphics: u32,
    /// Family used for presentation.
    pub present: u32,
    /// Family used for transfer passes.
    pub transfer: u32,
    /// Family used for compute passes.
    pub compute: u32,
}

impl QueueFamilyLayout {
    /// Picks one family per logical queue.
    ///
    /// Each queue first takes the first family supporting it. Compute then moves
    /// off the graphics family if another compute-capable family exists, and
    /// transfer moves off both graphics and compute when a separate
    /// transfer-capable family exists, so uploads and compute work can overlap
    /// with rendering. Transfer and compute fall back to the graphics family.
    ///
    /// Returns `None` when no family supports graphics or presentation.
    pub fn select(families: &[QueueFamilyInfo]) -> Option<Self> {
        let first = |ops: QueueOperations| {
            families
                .iter()
                .find(|family| family.count > 0 && family.ops.contains(ops))
                .map(|family| family.index)
        };

        let graphics = first(QueueOperations::GRAPHICS)?;
        let present = first(QueueOperations::PRESENT)?;
        let mut compute = first(QueueOperations::COMPUTE);
        let mut transfer = first(QueueOperations::TRANSFER);

        if compute == Some(graphics) {
            if let Some(other) = families.iter().find(|family| {
                family.count > 0
                    && family.index != graphics
                    && family.ops.contains(QueueOperations::COMPUTE)
            }) {
                compute = Some(other.index);
            }
        }

        if transfer == compute || transfer == Some(graphics) {
            if let Some(other) = families.iter().find(|family| {
                family.count > 0
                    && family.index != graphics
                    && Some(family.index) != compute
                    && family.ops.contains(QueueOperations::TRANSFER)
            }) {
                transfer = Some(other.index);
            }
        }

        let layout = Self {
            graphics,
            present,
            transfer: transfer.unwrap_or(graphics),
            compute: compute.unwrap_or(graphics),
        };
        log::debug!("Selected queue families: {:?}", layout);
        Some(layout)
    }

    /// The family that should execute work requiring `ops`.
    ///
    /// Graphics wins over compute, compute over transfer; an empty set maps to
    /// the graphics family.
    pub fn family_for(&self, ops: QueueOperations) -> u32 {
        if ops.contains(QueueOperations::GRAPHICS) {
            self.graphics
        } else if ops.contains(QueueOperations::COMPUTE) {
            self.compute
        } else if ops.contains(QueueOperations::TRANSFER) {
            self.transfer
        } else if ops.contains(QueueOperations::PRESENT) {
            self.present
        } else {
            self.graphics
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(index: u32, ops: QueueOperations) -> QueueFamilyInfo {
        QueueFamilyInfo {
            index,
            ops,
            count: 1,
        }
    }

    #[test]
    fn single_universal_family_serves_everything() {
        let families = [family(
            0,
            QueueOperations::GRAPHICS
                | QueueOperations::COMPUTE
                | QueueOperations::TRANSFER
                | QueueOperations::PRESENT,
        )];
        let layout = QueueFamilyLayout::select(&families).unwrap();
        assert_eq!(layout.graphics, 0);
        assert_eq!(layout.present, 0);
        assert_eq!(layout.transfer, 0);
        assert_eq!(layout.compute, 0);
    }

    #[test]
    fn compute_and_transfer_prefer_distinct_families() {
        let families = [
            family(
                0,
                QueueOperations::GRAPHICS
                    | QueueOperations::COMPUTE
                    | QueueOperations::TRANSFER
                    | QueueOperations::PRESENT,
            ),
            family(1, QueueOperations::COMPUTE | QueueOperations::TRANSFER),
            family(2, QueueOperations::TRANSFER),
        ];
        let layout = QueueFamilyLayout::select(&families).unwrap();
        assert_eq!(layout.graphics, 0);
        assert_eq!(layout.compute, 1);
        assert_eq!(layout.transfer, 2);
    }

    #[test]
    fn transfer_stays_shared_without_a_free_family() {
        let families = [
            family(
                0,
                QueueOperations::GRAPHICS | QueueOperations::TRANSFER | QueueOperations::PRESENT,
            ),
            family(1, QueueOperations::COMPUTE | QueueOperations::TRANSFER),
        ];
        let layout = QueueFamilyLayout::select(&families).unwrap();
        assert_eq!(layout.compute, 1);
        assert_eq!(layout.transfer, 0);
    }

    #[test]
    fn missing_present_family_fails() {
        let families = [family(0, QueueOperations::GRAPHICS)];
        assert!(QueueFamilyLayout::select(&families).is_none());
    }

    #[test]
    fn family_for_prefers_graphics() {
        let layout = QueueFamilyLayout {
            graphics: 0,
            present: 0,
            transfer: 2,
            compute: 1,
        };
        assert_eq!(layout.family_for(QueueOperations::TRANSFER), 2);
        assert_eq!(
            layout.family_for(QueueOperations::GRAPHICS | QueueOperations::TRANSFER),
            0
        );
        assert_eq!(layout.family_for(QueueOperations::COMPUTE), 1);
        assert_eq!(layout.family_for(QueueOperations::empty()), 0);
    }
}
