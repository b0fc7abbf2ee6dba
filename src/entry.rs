//! Positive and negative entry types, and the small per-directory state
//! bitset they live under. Mirrors `NLC_PE_FULL` / `NLC_PE_PARTIAL` /
//! `NLC_NE_VALID` from `nl-cache.h`.

use crate::host::DirHandle;

/// A minimal `bitflags`-shaped macro, used in place of the `bitflags` crate
/// since the entire state fits in three bits and nothing else in the crate
/// needs its derive machinery.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $ty:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name($ty);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub const fn empty() -> Self {
                $name(0)
            }

            pub fn contains(&self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            pub fn is_empty(&self) -> bool {
                self.0 == 0
            }
        }
    };
}

bitflags_like! {
    /// Cache state bits for one directory. `PE_FULL` implies the positive
    /// entry list enumerates *every* child; `PE_PARTIAL` means some, but
    /// not necessarily all, children are known.
    pub struct DirState: u8 {
        const NE_VALID = 0b001;
        const PE_PARTIAL = 0b010;
        const PE_FULL = 0b100;
    }
}

/// A cached negative answer: `name` is known not to exist under the owning
/// directory. An empty `name` is tolerated as the "negative for unknown
/// child" sentinel used by some invalidation paths.
#[derive(Debug, Clone)]
pub struct NegativeEntry {
    pub name: String,
}

impl NegativeEntry {
    pub fn overhead(&self) -> usize {
        std::mem::size_of::<NegativeEntry>() + self.name.len() + 1
    }
}

/// A cached positive answer: `name` exists under the owning directory. If
/// `child` is `Some`, the handle is held live by this entry (contributing
/// to `refd_inodes`); entries seeded from a hardlink or a plain readdir
/// carry only the name.
#[derive(Debug, Clone)]
pub struct PositiveEntry {
    pub name: String,
    pub child: Option<DirHandle>,
}

impl PositiveEntry {
    pub fn overhead(&self) -> usize {
        std::mem::size_of::<PositiveEntry>() + self.name.len() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_bits_compose() {
        let mut s = DirState::empty();
        assert!(s.is_empty());
        s.insert(DirState::NE_VALID);
        assert!(s.contains(DirState::NE_VALID));
        assert!(!s.contains(DirState::PE_FULL));
        s.insert(DirState::PE_PARTIAL);
        assert!(s.contains(DirState::NE_VALID) && s.contains(DirState::PE_PARTIAL));
        s.remove(DirState::NE_VALID);
        assert!(!s.contains(DirState::NE_VALID));
    }
}
