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

//! A declarative macro for the GPU mask types (stages, access, usages, dirty sets).

/// Declares a transparent bit set over an unsigned integer.
///
/// The generated type is `Copy`, hashable, `const`-friendly and prints its set flags by
/// name. Multi-bit constants are printed when fully contained, so composite masks such as
/// `ALL_COMMANDS` stay readable in logs.
#[macro_export]
#[doc(hidden)]
macro_rules! lumen_bitflags {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident: $ty:ty {
            $(
                $(#[$flag_attr:meta])*
                const $flag_name:ident = $flag_value:expr;
            )*
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        #[repr(transparent)]
        $vis struct $name {
            bits: $ty,
        }

        impl $name {
            /// The empty set.
            pub const EMPTY: Self = Self { bits: 0 };

            $(
                $(#[$flag_attr])*
                pub const $flag_name: Self = Self { bits: $flag_value };
            )*

            /// Builds a set from raw bits, keeping bits that have no name.
            #[inline]
            pub const fn from_bits_retain(bits: $ty) -> Self {
                Self { bits }
            }

            /// The raw bits of the set.
            #[inline]
            pub const fn bits(&self) -> $ty {
                self.bits
            }

            /// `true` when no bit is set.
            #[inline]
            pub const fn is_empty(&self) -> bool {
                self.bits == 0
            }

            /// `true` when every bit of `other` is set in `self`.
            #[inline]
            pub const fn contains(&self, other: Self) -> bool {
                (self.bits & other.bits) == other.bits
            }

            /// `true` when `self` and `other` share at least one bit.
            #[inline]
            pub const fn intersects(&self, other: Self) -> bool {
                (self.bits & other.bits) != 0
            }

            /// Bits set in either operand.
            #[inline]
            #[must_use]
            pub const fn union(self, other: Self) -> Self {
                Self { bits: self.bits | other.bits }
            }

            /// Bits set in both operands.
            #[inline]
            #[must_use]
            pub const fn intersection(self, other: Self) -> Self {
                Self { bits: self.bits & other.bits }
            }

            /// Bits of `self` that are not in `other`.
            #[inline]
            #[must_use]
            pub const fn difference(self, other: Self) -> Self {
                Self { bits: self.bits & !other.bits }
            }

            /// Sets every bit of `other`.
            #[inline]
            pub fn insert(&mut self, other: Self) {
                self.bits |= other.bits;
            }

            /// Clears every bit of `other`.
            #[inline]
            pub fn remove(&mut self, other: Self) {
                self.bits &= !other.bits;
            }

            /// Sets or clears the bits of `other` depending on `value`.
            #[inline]
            pub fn set(&mut self, other: Self, value: bool) {
                if value {
                    self.insert(other);
                } else {
                    self.remove(other);
                }
            }
        }

        impl ::core::ops::BitOr for $name {
            type Output = Self;
            #[inline]
            fn bitor(self, other: Self) -> Self {
                self.union(other)
            }
        }

        impl ::core::ops::BitOrAssign for $name {
            #[inline]
            fn bitor_assign(&mut self, other: Self) {
                self.insert(other);
            }
        }

        impl ::core::ops::BitAnd for $name {
            type Output = Self;
            #[inline]
            fn bitand(self, other: Self) -> Self {
                self.intersection(other)
            }
        }

        impl ::core::ops::BitAndAssign for $name {
            #[inline]
            fn bitand_assign(&mut self, other: Self) {
                self.bits &= other.bits;
            }
        }

        impl ::core::ops::Sub for $name {
            type Output = Self;
            #[inline]
            fn sub(self, other: Self) -> Self {
                self.difference(other)
            }
        }

        impl ::core::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                if self.bits == 0 {
                    return write!(f, "{}(EMPTY)", stringify!($name));
                }

                let mut remaining = self.bits;
                let mut first = true;
                write!(f, "{}(", stringify!($name))?;
                $(
                    let flag: $ty = $flag_value;
                    if flag != 0 && (self.bits & flag) == flag && (remaining & flag) != 0 {
                        if !first {
                            write!(f, " | ")?;
                        }
                        write!(f, "{}", stringify!($flag_name))?;
                        remaining &= !flag;
                        first = false;
                    }
                )*
                if remaining != 0 {
                    if !first {
                        write!(f, " | ")?;
                    }
                    write!(f, "{:#x}", remaining)?;
                }
                write!(f, ")")
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use crate::lumen_bitflags;

    lumen_bitflags! {
        /// Flags used only by these tests.
        pub struct Stages: u32 {
            const TOP = 1 << 0;
            const TRANSFER = 1 << 1;
            const COMPUTE = 1 << 2;
            const ALL = (1 << 1) | (1 << 2);
        }
    }

    #[test]
    fn empty_set_formats_as_empty() {
        assert!(Stages::EMPTY.is_empty());
        assert_eq!(Stages::default(), Stages::EMPTY);
        assert_eq!(format!("{:?}", Stages::EMPTY), "Stages(EMPTY)");
    }

    #[test]
    fn union_and_containment() {
        let set = Stages::TRANSFER | Stages::COMPUTE;
        assert!(set.contains(Stages::TRANSFER));
        assert!(set.contains(Stages::ALL));
        assert!(!set.contains(Stages::TOP));
        assert!(set.intersects(Stages::COMPUTE | Stages::TOP));
        assert!(set.contains(Stages::EMPTY));
    }

    #[test]
    fn composite_constant_is_printed_once() {
        let set = Stages::TRANSFER | Stages::COMPUTE;
        // TRANSFER is consumed first, so ALL no longer has remaining bits.
        assert_eq!(format!("{set:?}"), "Stages(TRANSFER | COMPUTE)");
    }

    #[test]
    fn unnamed_bits_are_kept_and_printed() {
        let set = Stages::TOP | Stages::from_bits_retain(1 << 8);
        assert_eq!(set.bits(), 0x101);
        assert_eq!(format!("{set:?}"), "Stages(TOP | 0x100)");
    }

    #[test]
    fn insert_remove_and_set() {
        let mut set = Stages::EMPTY;
        set.insert(Stages::TOP);
        set.set(Stages::COMPUTE, true);
        assert_eq!(set, Stages::TOP | Stages::COMPUTE);
        set.remove(Stages::TOP);
        set.set(Stages::COMPUTE, false);
        assert!(set.is_empty());
    }

    #[test]
    fn difference_and_intersection() {
        let set = Stages::TOP | Stages::TRANSFER;
        assert_eq!(set - Stages::TOP, Stages::TRANSFER);
        assert_eq!(set & Stages::ALL, Stages::TRANSFER);
        let mut narrowed = set;
        narrowed &= Stages::TOP;
        assert_eq!(narrowed, Stages::TOP);
    }
}
