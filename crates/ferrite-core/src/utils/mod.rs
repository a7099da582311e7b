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

//! Small helpers shared by every Ferrite crate.

pub mod bitflags;

/// Rounds `value` up to the next multiple of `alignment`.
///
/// An `alignment` of zero or one returns `value` unchanged. Driver alignments
/// are powers of two, but the rounding does not rely on it.
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return value;
    }
    let remainder = value % alignment;
    if remainder == 0 {
        value
    } else {
        value + (alignment - remainder)
    }
}

#[cfg(test)]
mod tests {
    use super::align_up;

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(1, 16), 16);
        assert_eq!(align_up(256, 16), 256);
        assert_eq!(align_up(257, 16), 272);
        assert_eq!(align_up(100, 0), 100);
        assert_eq!(align_up(100, 1), 100);
        assert_eq!(align_up(10, 24), 24);
    }
}
