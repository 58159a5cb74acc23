use core::fmt;
use core::num::{NonZeroU32, NonZeroU64};
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity token shared by a system and every object allocated for it.
///
/// Tokens are minted from a process-wide counter, so two systems (including a
/// system and its clone) never share one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(NonZeroU64);

static NEXT_SYSTEM_ID: AtomicU64 = AtomicU64::new(1);

impl SystemId {
    /// Mint a fresh token.
    pub fn next() -> Self {
        let raw = NEXT_SYSTEM_ID.fetch_add(1, Ordering::Relaxed);
        // counter starts at 1; wrapping would take 2^64 systems
        Self(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SystemId({})", self.get())
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.get())
    }
}

/// Anything stamped with the identity of the system that allocated it.
pub trait HasSystemId {
    /// `None` means the object was built by hand rather than allocated by a system.
    fn system_id(&self) -> Option<SystemId>;
}

macro_rules! define_index {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        ///
        /// - `u32` keeps memory small
        /// - `NonZero` enables `Option<Self>` to be pointer-optimized
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            /// Create from a 0-based index by storing index+1.
            pub fn new(index: usize) -> Self {
                let raw = u32::try_from(index)
                    .ok()
                    .and_then(|i| i.checked_add(1))
                    .and_then(NonZeroU32::new);
                Self(raw.expect("index fits in u32"))
            }

            /// Recover the 0-based index.
            pub fn index(self) -> usize {
                (self.0.get() - 1) as usize
            }
        }

        impl From<usize> for $name {
            fn from(index: usize) -> Self {
                Self::new(index)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), self.index())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.index())
            }
        }
    };
}

define_index!(
    /// Position of an input port on its system.
    InputPortIndex
);
define_index!(
    /// Position of an output port on its system.
    OutputPortIndex
);
define_index!(
    /// Position of a cache entry declaration on its system.
    CacheIndex
);
define_index!(
    /// Position of a constraint in a system's constraint registry.
    ConstraintIndex
);
define_index!(
    /// Discrete-state group on a leaf system.
    DiscreteStateIndex
);
define_index!(
    /// Abstract-state slot on a leaf system.
    AbstractStateIndex
);
define_index!(
    /// Numeric parameter group on a leaf system.
    NumericParameterIndex
);
define_index!(
    /// Abstract parameter slot on a leaf system.
    AbstractParameterIndex
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_round_trip() {
        for i in [0_usize, 1, 2, 42, 10_000] {
            assert_eq!(InputPortIndex::new(i).index(), i);
            assert_eq!(CacheIndex::from(i).index(), i);
        }
    }

    #[test]
    fn option_index_is_small() {
        assert_eq!(
            core::mem::size_of::<OutputPortIndex>(),
            core::mem::size_of::<Option<OutputPortIndex>>()
        );
    }

    #[test]
    fn system_ids_are_unique() {
        let a = SystemId::next();
        let b = SystemId::next();
        assert_ne!(a, b);
        assert!(b.get() > a.get());
    }

    #[test]
    fn index_debug_names_the_type() {
        assert_eq!(format!("{:?}", ConstraintIndex::new(3)), "ConstraintIndex(3)");
        assert_eq!(format!("{}", ConstraintIndex::new(3)), "3");
    }
}
