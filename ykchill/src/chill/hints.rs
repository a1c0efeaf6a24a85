//! Turning next-use distances into chill hints.

use super::{NextUse, NextUseTable};
use crate::{
    reg::{Edition, RegClass, VirtualRegister},
    unit::{InstIdx, Unit},
};
use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter};

/// One register that is safe to evict after an instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChillEntry {
    pub class: RegClass,
    /// The register's index within `class`. For [RegClass::Sp] this is always 0.
    pub idx: u8,
    /// The register is not read before this.
    pub until: NextUse,
}

impl ChillEntry {
    fn matches(&self, reg: VirtualRegister) -> bool {
        match reg {
            VirtualRegister::Gp(idx, _) => self.class == RegClass::Gp && self.idx == idx.raw(),
            VirtualRegister::Sp => self.class == RegClass::Sp,
        }
    }
}

impl Display for ChillEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.class {
            RegClass::Gp => write!(f, "r{} ({})", self.idx, self.until),
            RegClass::Sp => write!(f, "sp ({})", self.until),
        }
    }
}

/// The registers that are safe to evict just after one instruction, in ascending (class, index)
/// order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChillHint {
    entries: SmallVec<[ChillEntry; 4]>,
}

impl ChillHint {
    pub(crate) fn from_entries(entries: SmallVec<[ChillEntry; 4]>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ChillEntry] {
        &self.entries
    }

    /// The entries of this hint in register class `class`.
    pub fn iter_class(&self, class: RegClass) -> impl Iterator<Item = &ChillEntry> + '_ {
        self.entries.iter().filter(move |x| x.class == class)
    }
}

/// The chill hints for every instruction in a unit. Only non-empty hints are stored, so the
/// size of a table is independent of how many instructions its unit has.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChillTable {
    edition: Edition,
    insts_len: usize,
    /// Non-empty hints in ascending instruction order.
    hints: Vec<(InstIdx, ChillHint)>,
}

impl ChillTable {
    /// Create a table for a unit of `insts_len` instructions. `hints` must be in ascending
    /// instruction order; empty hints are discarded.
    pub(crate) fn new<I>(edition: Edition, insts_len: usize, hints: I) -> Self
    where
        I: IntoIterator<Item = (InstIdx, ChillHint)>,
    {
        let hints = hints
            .into_iter()
            .filter(|(_, h)| !h.is_empty())
            .collect::<Vec<_>>();
        debug_assert!(hints.windows(2).all(|w| w[0].0 < w[1].0));
        debug_assert!(hints.iter().all(|(iidx, _)| iidx.index() < insts_len));
        Self {
            edition,
            insts_len,
            hints,
        }
    }

    /// The edition whose register file this table's indices refer to.
    pub fn edition(&self) -> Edition {
        self.edition
    }

    pub fn insts_len(&self) -> usize {
        self.insts_len
    }

    /// The hint attached to `iidx`, or `None` if nothing is safe to evict after it.
    pub fn hint(&self, iidx: InstIdx) -> Option<&ChillHint> {
        self.hints
            .binary_search_by_key(&iidx, |(x, _)| *x)
            .ok()
            .map(|i| &self.hints[i].1)
    }

    /// Iterate over all non-empty hints in program order.
    pub fn iter_hints(&self) -> impl Iterator<Item = (InstIdx, &ChillHint)> + '_ {
        self.hints.iter().map(|(iidx, h)| (*iidx, h))
    }

    /// How many instructions have a non-empty hint?
    pub fn num_hints(&self) -> usize {
        self.hints.len()
    }

    /// How many (instruction, register) entries are there across all hints?
    pub fn num_entries(&self) -> usize {
        self.hints.iter().map(|(_, h)| h.entries.len()).sum()
    }

    /// If `reg` is safe to evict just after `iidx`, return how long it is safe for. Every view
    /// of a register index gets the same answer. Registers that aren't part of this table's
    /// edition are never chillable.
    pub fn chillable(&self, iidx: InstIdx, reg: VirtualRegister) -> Option<NextUse> {
        self.edition.reg_file().check(reg).ok()?;
        let at = self.edition.aliases();
        // Resolve through the alias table so that e.g. `r3.8` finds an entry for index 3.
        let canon = at.members(at.group(reg))[0];
        self.hint(iidx)?
            .entries
            .iter()
            .find(|x| x.matches(canon))
            .map(|x| x.until)
    }
}

impl Display for ChillTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (iidx, h) in self.iter_hints() {
            writeln!(
                f,
                "%{iidx}: chill {}",
                h.entries
                    .iter()
                    .map(|x| x.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )?;
        }
        Ok(())
    }
}

/// Produce the chill hints for `u` from its [NextUseTable].
///
/// A general purpose register is listed after an instruction if it may hold a value and its next
/// use is either [NextUse::Never] or at least `min_chill_dist` instructions away. The distance is
/// copied verbatim. The stack pointer is never listed.
pub fn emit(u: &Unit, t: &NextUseTable, min_chill_dist: u32) -> ChillTable {
    debug_assert_eq!(u.insts_len(), t.insts_len());
    let at = u.edition().aliases();
    let mut hints = Vec::new();
    for (iidx, _) in u.iter_insts() {
        let mut entries = SmallVec::new();
        for gidx in at.iter_gp_groups() {
            if !t.may_hold_value(iidx, gidx) {
                continue;
            }
            let nu = t.next_use(iidx, gidx);
            if nu.at_least(min_chill_dist) {
                // `iter_gp_groups` only returns groups with a GP index.
                if let Some(idx) = at.gp_idx(gidx) {
                    entries.push(ChillEntry {
                        class: RegClass::Gp,
                        idx: idx.raw(),
                        until: nu,
                    });
                }
            }
        }
        hints.push((iidx, ChillHint::from_entries(entries)));
    }
    ChillTable::new(u.edition(), u.insts_len(), hints)
}
