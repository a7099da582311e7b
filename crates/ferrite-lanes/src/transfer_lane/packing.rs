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

//! Layout of the shared allocation of a resource bundle.

use ferrite_core::utils::align_up;

/// Placement class of one object in the shared allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PackClass {
    OptimalImage,
    LinearImage,
    Buffer,
}

/// One object to place.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PackItem {
    pub(crate) class: PackClass,
    pub(crate) size: u64,
    pub(crate) alignment: u64,
}

/// Computes the offset of every item and the total size of the allocation.
///
/// Optimal images come first. The cursor is then moved to the next
/// buffer-image granularity boundary, and linear images followed by buffers
/// are placed after it, so tiled and linear resources never share a
/// granularity page. Every offset is aligned to `max(alignment, atom)`.
pub(crate) fn pack(items: &[PackItem], granularity: u64, atom: u64) -> (Vec<u64>, u64) {
    let mut offsets = vec![0u64; items.len()];
    let mut cursor = 0u64;

    let mut place = |class: PackClass, cursor: &mut u64| {
        for (index, item) in items.iter().enumerate() {
            if item.class != class {
                continue;
            }
            *cursor = align_up(*cursor, item.alignment.max(atom));
            offsets[index] = *cursor;
            *cursor += item.size;
        }
    };

    place(PackClass::OptimalImage, &mut cursor);
    if items.iter().any(|item| item.class != PackClass::OptimalImage) {
        cursor = align_up(cursor, granularity);
    }
    place(PackClass::LinearImage, &mut cursor);
    place(PackClass::Buffer, &mut cursor);

    (offsets, cursor)
}
