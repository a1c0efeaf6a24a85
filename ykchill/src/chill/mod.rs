//! Chill hints.
//!
//! A register group is "chilled" after an instruction if the value it holds either won't be read
//! again, or won't be read for a while. A register allocator can use that knowledge to evict the
//! value (or, in the former case, forget it entirely) without having to work it out for itself.
//!
//! Hints are produced in two stages:
//!
//!   1. [analyse] runs a reverse analysis over a validated [crate::unit::Unit], computing, for
//!      every instruction and every alias group, the distance to the next read of that group's
//!      current value (a [NextUse]).
//!   2. [emit] turns those distances into a [ChillTable]: one [ChillHint] per instruction.
//!
//! Hints are purely additive: a unit with its hints stripped runs correctly under any allocator.

use std::{
    fmt::{self, Display, Formatter},
    num::NonZeroU32,
};

mod encode;
mod hints;
mod rev_analyse;
#[cfg(test)]
pub(crate) mod sim;

pub use hints::{emit, ChillEntry, ChillHint, ChillTable};
pub(crate) use rev_analyse::analyse_valid;
pub use rev_analyse::{analyse, NextUseTable};

/// How far away the next read of a value is.
///
/// `In(n)` means that the `n`th instruction executed from this point on is the next one to read
/// the value. `Never` means that the value is not read again before it is overwritten, dropped,
/// or the unit ends. `In(_)` values are always less than `Never`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum NextUse {
    In(NonZeroU32),
    Never,
}

impl NextUse {
    /// The next instruction reads the value.
    pub const NEXT: NextUse = NextUse::In(NonZeroU32::MIN);

    /// Return `In(dist)`, or `None` if `dist` is zero.
    pub fn in_dist(dist: u32) -> Option<Self> {
        NonZeroU32::new(dist).map(NextUse::In)
    }

    /// The distance, as seen from one instruction earlier. Distances saturate rather than
    /// overflow: a saturated distance understates how far away the next read is.
    pub fn succ(self) -> Self {
        match self {
            NextUse::In(x) => NextUse::In(x.saturating_add(1)),
            NextUse::Never => NextUse::Never,
        }
    }

    /// If there is a next use, how far away is it?
    pub fn dist(self) -> Option<u32> {
        match self {
            NextUse::In(x) => Some(x.get()),
            NextUse::Never => None,
        }
    }

    /// Is the next use (if there is one) at least `dist` instructions away?
    pub fn at_least(self, dist: u32) -> bool {
        match self {
            NextUse::In(x) => x.get() >= dist,
            NextUse::Never => true,
        }
    }

    /// The on-disk form of this value: `0` means `Never`.
    pub(crate) fn to_raw(self) -> u32 {
        self.dist().unwrap_or(0)
    }

    pub(crate) fn from_raw(x: u32) -> Self {
        NextUse::in_dist(x).unwrap_or(NextUse::Never)
    }
}

impl Display for NextUse {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NextUse::In(x) => write!(f, "in {x}"),
            NextUse::Never => write!(f, "never"),
        }
    }
}
