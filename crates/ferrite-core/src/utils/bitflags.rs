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

//! A small `bitflags`-style macro used for every driver-facing flag set.
//!
//! Flag types generated by [`ferrite_bitflags!`] are plain `Copy` newtypes over an
//! integer with associated constants, so they can cross the driver boundary
//! bit-exactly.

/// Declares a flag set newtype with associated constants and the usual
/// set operations (`|`, `&`, `contains`, `intersects`, ...).
///
/// ```rust,ignore
/// ferrite_bitflags! {
///     /// Example flags.
///     pub struct Example: u32 {
///         /// First bit.
///         const A = 1 << 0;
///     }
/// }
/// ```
#[macro_export]
macro_rules! ferrite_bitflags {
    (
        $(#[$outer:meta])*
        $vis:vis struct $name:ident: $ty:ty {
            $(
                $(#[$inner:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$outer])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        $vis struct $name {
            bits: $ty,
        }

        #[allow(dead_code)]
        impl $name {
            $(
                $(#[$inner])*
                pub const $flag: Self = Self { bits: $value };
            )*

            /// Returns a set with no flags.
            pub const fn empty() -> Self {
                Self { bits: 0 }
            }

            /// Returns a set with every declared flag.
            pub const fn all() -> Self {
                Self { bits: 0 $(| $value)* }
            }

            /// Returns the raw bits.
            pub const fn bits(&self) -> $ty {
                self.bits
            }

            /// Builds a set from raw bits, keeping unknown bits.
            pub const fn from_bits_retain(bits: $ty) -> Self {
                Self { bits }
            }

            /// Builds a set from raw bits, dropping bits that are not declared.
            pub const fn from_bits_truncate(bits: $ty) -> Self {
                Self { bits: bits & Self::all().bits }
            }

            /// Returns `true` if no flag is set.
            pub const fn is_empty(&self) -> bool {
                self.bits == 0
            }

            /// Returns `true` if every flag of `other` is set in `self`.
            pub const fn contains(&self, other: Self) -> bool {
                (self.bits & other.bits) == other.bits
            }

            /// Returns `true` if `self` and `other` share at least one flag.
            pub const fn intersects(&self, other: Self) -> bool {
                (self.bits & other.bits) != 0
            }

            /// Returns the union of both sets.
            pub const fn union(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }

            /// Returns the flags present in both sets.
            pub const fn intersection(self, other: Self) -> Self {
                Self { bits: self.bits & other.bits }
            }

            /// Returns `self` without the flags of `other`.
            pub const fn difference(self, other: Self) -> Self {
                Self { bits: self.bits & !other.bits }
            }

            /// Sets or clears the flags of `other`.
            pub fn set(&mut self, other: Self, value: bool) {
                if value {
                    self.bits |= other.bits;
                } else {
                    self.bits &= !other.bits;
                }
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                let mut first = true;
                write!(f, "{}(", stringify!($name))?;
                $(
                    if Self::$flag.bits != 0 && self.contains(Self::$flag) {
                        if !first {
                            f.write_str(" | ")?;
                        }
                        f.write_str(stringify!($flag))?;
                        first = false;
                    }
                )*
                if first {
                    write!(f, "{:#x}", self.bits)?;
                }
                f.write_str(")")
            }
        }

        impl ::std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self::Output {
                self.union(rhs)
            }
        }

        impl ::std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.bits |= rhs.bits;
            }
        }

        impl ::std::ops::BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self::Output {
                self.intersection(rhs)
            }
        }

        impl ::std::ops::BitAndAssign for $name {
            fn bitand_assign(&mut self, rhs: Self) {
                self.bits &= rhs.bits;
            }
        }
    };
}

#[cfg(test)]
mod tests {
    crate::ferrite_bitflags! {
        /// Flags used only by these tests.
        pub struct TestFlags: u32 {
            /// Bit zero.
            const A = 1 << 0;
            /// Bit one.
            const B = 1 << 1;
            /// Bit two.
            const C = 1 << 2;
        }
    }

    #[test]
    fn union_and_contains() {
        let ab = TestFlags::A | TestFlags::B;
        assert!(ab.contains(TestFlags::A));
        assert!(ab.contains(TestFlags::A | TestFlags::B));
        assert!(!ab.contains(TestFlags::C));
        assert!(ab.intersects(TestFlags::B | TestFlags::C));
    }

    #[test]
    fn truncate_drops_unknown_bits() {
        let flags = TestFlags::from_bits_truncate(0xFF);
        assert_eq!(flags, TestFlags::all());
        assert_eq!(TestFlags::from_bits_retain(0x10).bits(), 0x10);
    }

    #[test]
    fn debug_lists_flag_names() {
        let flags = TestFlags::A | TestFlags::C;
        assert_eq!(format!("{flags:?}"), "TestFlags(A | C)");
        assert_eq!(format!("{:?}", TestFlags::empty()), "TestFlags(0x0)");
    }

    #[test]
    fn set_and_difference() {
        let mut flags = TestFlags::A;
        flags.set(TestFlags::B, true);
        assert_eq!(flags, TestFlags::A | TestFlags::B);
        flags.set(TestFlags::A, false);
        assert_eq!(flags, TestFlags::B);
        assert_eq!((TestFlags::all()).difference(TestFlags::B), TestFlags::A | TestFlags::C);
    }
}
