//! Perform a reverse analysis on a unit's instructions, computing how far away the next read of
//! each alias group's value is after every instruction.
//!
//! The analysis is a backwards dataflow over the unit's blocks, solved with a worklist until a
//! fixed point is reached:
//!
//!   * Going backwards over one instruction, every group's distance grows by one; groups the
//!     instruction writes or drops become [NextUse::Never]; groups it reads become
//!     [NextUse::NEXT]. Reads happen before writes, so a group both read and written is
//!     `NEXT`.
//!   * The state at a block's exit is the minimum, per group, of its successors' entry states. A
//!     block with no successors exits with every group `Never`.
//!
//! A narrow write ends the previous value of its group as a whole: the upper bits it leaves behind
//! are undefined, so nothing can legitimately read them.
//!
//! A second, forward, pass records which groups may hold a value at all after each instruction,
//! so that consumers don't have to reason about registers that were never written.

use super::NextUse;
use crate::{
    errors::ChillError,
    reg::{Edition, GroupIdx},
    unit::{BlockIdx, Inst, InstIdx, Role, Unit},
};
use index_vec::IndexVec;
use smallvec::SmallVec;
use std::fmt::{self, Display, Formatter};
use vob::Vob;

/// The result of [analyse].
#[derive(Debug)]
pub struct NextUseTable {
    edition: Edition,
    num_groups: usize,
    /// `num_groups` entries per instruction: the next use of each group, as seen from just after
    /// that instruction.
    next_uses: Vec<NextUse>,
    /// For each instruction, which groups may hold a value just after it.
    may_hold: IndexVec<InstIdx, Vob>,
}

impl NextUseTable {
    pub fn edition(&self) -> Edition {
        self.edition
    }

    pub fn insts_len(&self) -> usize {
        self.may_hold.len()
    }

    /// How far, from just after `iidx`, is the next read of `group`'s current value?
    ///
    /// # Panics
    ///
    /// If `iidx` or `group` is out of bounds.
    pub fn next_use(&self, iidx: InstIdx, group: GroupIdx) -> NextUse {
        assert!(group.index() < self.num_groups);
        self.next_uses[iidx.index() * self.num_groups + group.index()]
    }

    /// Might `group` hold a value just after `iidx`? This is true if, on at least one path from
    /// the entry to `iidx`, the group has been written and not subsequently dropped.
    pub fn may_hold_value(&self, iidx: InstIdx, group: GroupIdx) -> bool {
        self.may_hold[iidx][group.index()]
    }
}

impl Display for NextUseTable {
    /// One line per instruction listing the groups that may hold a value, each with its next use.
    /// Groups are named after their widest view.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let at = self.edition.aliases();
        for iidx in self.may_hold.indices() {
            let groups = (0..self.num_groups)
                .map(GroupIdx::from_usize)
                .filter(|g| self.may_hold_value(iidx, *g))
                .map(|g| match at.gp_idx(g) {
                    Some(x) => format!("r{x} ({})", self.next_use(iidx, g)),
                    None => format!("sp ({})", self.next_use(iidx, g)),
                })
                .collect::<Vec<_>>();
            writeln!(f, "%{iidx}: {}", groups.join(", "))?;
        }
        Ok(())
    }
}

/// Validate `u` and compute its [NextUseTable].
pub fn analyse(u: &Unit) -> Result<NextUseTable, ChillError> {
    u.validate()?;
    Ok(analyse_valid(u))
}

/// Compute the [NextUseTable] of `u`, which must already have been validated.
pub(crate) fn analyse_valid(u: &Unit) -> NextUseTable {
    RevAnalyse::new(u).analyse()
}

struct RevAnalyse<'a> {
    u: &'a Unit,
    num_groups: usize,
}

impl<'a> RevAnalyse<'a> {
    fn new(u: &'a Unit) -> Self {
        Self {
            u,
            num_groups: u.edition().aliases().num_groups(),
        }
    }

    fn analyse(self) -> NextUseTable {
        let next_uses = self.next_uses();
        let may_hold = self.may_hold();
        NextUseTable {
            edition: self.u.edition(),
            num_groups: self.num_groups,
            next_uses,
            may_hold,
        }
    }

    /// Update `state` from "just after `inst`" to "just before `inst`".
    fn transfer(&self, inst: &Inst, state: &mut [NextUse]) {
        let at = self.u.edition().aliases();
        for x in state.iter_mut() {
            *x = x.succ();
        }
        inst.map_kills(|reg| state[at.group(reg).index()] = NextUse::Never);
        inst.map_reads(|reg| state[at.group(reg).index()] = NextUse::NEXT);
    }

    /// The state at the exit of `bidx`, given the entry states computed so far.
    fn exit_state(
        &self,
        bidx: BlockIdx,
        entries: &IndexVec<BlockIdx, Vec<NextUse>>,
    ) -> Vec<NextUse> {
        let mut state = vec![NextUse::Never; self.num_groups];
        for succ in self.u.successors(bidx) {
            for (x, y) in state.iter_mut().zip(entries[succ].iter()) {
                *x = std::cmp::min(*x, *y);
            }
        }
        state
    }

    fn next_uses(&self) -> Vec<NextUse> {
        let preds = self.u.predecessors();
        let mut entries: IndexVec<BlockIdx, Vec<NextUse>> = IndexVec::from_vec(vec![
            vec![NextUse::Never; self.num_groups];
            self.u.blocks_len()
        ]);

        // Start with the last block so that, in straight-line code, each block is processed
        // after its successor.
        let mut todo = self.u.iter_blocks().map(|(bidx, _)| bidx).collect::<Vec<_>>();
        let mut queued = Vob::from_elem(true, self.u.blocks_len());
        while let Some(bidx) = todo.pop() {
            queued.set(bidx.index(), false);
            let mut state = self.exit_state(bidx, &entries);
            for (_, inst) in self.u.block_insts(bidx).rev() {
                self.transfer(inst, &mut state);
            }
            if state != entries[bidx] {
                entries[bidx] = state;
                for pred in &preds[bidx] {
                    if !queued[pred.index()] {
                        queued.set(pred.index(), true);
                        todo.push(*pred);
                    }
                }
            }
        }

        // Now that the entry states have converged, record the state after every instruction.
        let mut next_uses = vec![NextUse::Never; self.u.insts_len() * self.num_groups];
        for (bidx, _) in self.u.iter_blocks() {
            let mut state = self.exit_state(bidx, &entries);
            for (iidx, inst) in self.u.block_insts(bidx).rev() {
                let off = iidx.index() * self.num_groups;
                next_uses[off..off + self.num_groups].copy_from_slice(&state);
                self.transfer(inst, &mut state);
            }
        }
        next_uses
    }

    /// Update `state` from "just before `inst`" to "just after `inst`".
    fn transfer_holds(&self, inst: &Inst, state: &mut Vob) {
        let at = self.u.edition().aliases();
        for op in inst.operands() {
            match op.role {
                Role::Read => (),
                Role::Write => {
                    state.set(at.group(op.reg).index(), true);
                }
                Role::Drop => {
                    state.set(at.group(op.reg).index(), false);
                }
            }
        }
    }

    fn may_hold(&self) -> IndexVec<InstIdx, Vob> {
        let at = self.u.edition().aliases();
        let reachable = self.u.reachable();
        let preds = self.u.predecessors();
        let mut entry = Vob::from_elem(false, self.num_groups);
        entry.set(at.sp_group().index(), true);

        let mut outs: IndexVec<BlockIdx, Vob> = IndexVec::from_vec(vec![
            Vob::from_elem(false, self.num_groups);
            self.u.blocks_len()
        ]);
        let mut changed = true;
        while changed {
            changed = false;
            for (bidx, _) in self.u.iter_blocks() {
                let mut out = self.entry_holds(bidx, &entry, &reachable, &preds, &outs);
                for (_, inst) in self.u.block_insts(bidx) {
                    self.transfer_holds(inst, &mut out);
                }
                if out != outs[bidx] {
                    outs[bidx] = out;
                    changed = true;
                }
            }
        }

        let mut may_hold = IndexVec::with_capacity(self.u.insts_len());
        for (bidx, _) in self.u.iter_blocks() {
            let mut state = self.entry_holds(bidx, &entry, &reachable, &preds, &outs);
            for (_, inst) in self.u.block_insts(bidx) {
                self.transfer_holds(inst, &mut state);
                may_hold.push(state.clone());
            }
        }
        may_hold
    }

    /// Which groups may hold a value on entry to `bidx`? Unreachable blocks hold nothing.
    fn entry_holds(
        &self,
        bidx: BlockIdx,
        entry: &Vob,
        reachable: &Vob,
        preds: &IndexVec<BlockIdx, SmallVec<[BlockIdx; 2]>>,
        outs: &IndexVec<BlockIdx, Vob>,
    ) -> Vob {
        if !reachable[bidx.index()] {
            return Vob::from_elem(false, self.num_groups);
        }
        let mut state = if bidx.index() == 0 {
            entry.clone()
        } else {
            Vob::from_elem(false, self.num_groups)
        };
        for pred in preds[bidx]
            .iter()
            .filter(|pred| reachable[pred.index()])
        {
            state.or(&outs[*pred]);
        }
        state
    }
}
