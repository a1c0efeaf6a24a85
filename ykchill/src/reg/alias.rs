//! Register alias groups.
//!
//! An alias group is the set of register views that share one storage slot. Writing any member of
//! a group overwrites the value of every member; once no member of a group is needed, the whole
//! group can be chilled. Aliasing is an equivalence relation, not a hierarchy, so it is
//! represented as a flat table from `(class, index)` to a [GroupIdx]:
//!
//! ```text
//! r0.8 r0.16 r0.32 r0.64 r0.ptr  -> group 0
//! r1.8 ...                       -> group 1
//! ...
//! sp                             -> group num_gp
//! ```
//!
//! In edition 0 every width view of a GP index is in the same group (full aliasing); views of
//! different indices never alias; the stack pointer is always in a group of its own.

use super::{GpIdx, RegFile, VirtualRegister};
use index_vec::IndexVec;
use smallvec::SmallVec;

index_vec::define_index_type! {
    /// An index into [AliasTable]'s groups.
    pub struct GroupIdx = u8;
    DISPLAY_FORMAT = "{}";
}

#[derive(Debug)]
pub struct AliasTable {
    /// The group of each GP register index.
    gp_groups: IndexVec<GpIdx, GroupIdx>,
    /// The group of the stack pointer.
    sp_group: GroupIdx,
    /// Every view in each group.
    members: IndexVec<GroupIdx, SmallVec<[VirtualRegister; 5]>>,
}

impl AliasTable {
    pub(super) fn new(rf: &RegFile) -> Self {
        let mut members = IndexVec::with_capacity(rf.num_gp() + 1);
        let mut gp_groups = IndexVec::with_capacity(rf.num_gp());
        for idx in rf.iter_gp() {
            let views = rf
                .widths()
                .iter()
                .map(|width| VirtualRegister::Gp(idx, *width))
                .collect::<SmallVec<_>>();
            gp_groups.push(members.push(views));
        }
        let sp_group = members.push(SmallVec::from_slice(&[VirtualRegister::Sp]));
        Self {
            gp_groups,
            sp_group,
            members,
        }
    }

    /// How many alias groups are there?
    pub fn num_groups(&self) -> usize {
        self.members.len()
    }

    /// The group `reg` belongs to.
    ///
    /// # Panics
    ///
    /// If `reg` is out of bounds for this table's edition.
    pub fn group(&self, reg: VirtualRegister) -> GroupIdx {
        match reg {
            VirtualRegister::Gp(idx, _) => self.gp_groups[idx],
            VirtualRegister::Sp => self.sp_group,
        }
    }

    /// The group of the stack pointer.
    pub fn sp_group(&self) -> GroupIdx {
        self.sp_group
    }

    /// If `group` is a general purpose register group, return its register index.
    pub fn gp_idx(&self, group: GroupIdx) -> Option<GpIdx> {
        self.members[group][0].gp_idx()
    }

    /// Every view (including `reg` itself) that shares storage with `reg`.
    pub fn alias_group(&self, reg: VirtualRegister) -> &[VirtualRegister] {
        &self.members[self.group(reg)]
    }

    /// Every view in `group`.
    pub fn members(&self, group: GroupIdx) -> &[VirtualRegister] {
        &self.members[group]
    }

    /// Do `a` and `b` share storage?
    pub fn aliases(&self, a: VirtualRegister, b: VirtualRegister) -> bool {
        self.group(a) == self.group(b)
    }

    /// Iterate over all groups that contain general purpose registers.
    pub fn iter_gp_groups(&self) -> impl Iterator<Item = GroupIdx> + '_ {
        self.gp_groups.iter().cloned()
    }
}
