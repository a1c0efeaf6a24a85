//! Well-formedness checks for units. Nothing downstream of validation (the scanner, the hint
//! emitter, the container encoder) is prepared to handle IR that fails these checks.
//!
//! After [Unit::validate] has returned `Ok`, one can safely assume:
//!
//!   * Every register is part of the unit's edition (in-bounds index, defined width mode).
//!   * Only `sp_add` modifies the stack pointer.
//!   * Terminators only appear as the last instruction of a block.
//!   * Every branch target is a block in the unit.
//!   * On every path from the unit's entry to a read, the read's register has been written, and
//!     every write of that register's group reaching the read was at least as wide as the read.
//!     The stack pointer counts as written on entry.

use super::{BlockIdx, Inst, InstIdx, Role, Unit};
use crate::{
    errors::ChillError,
    reg::{GroupIdx, RegCheckFailure},
};
use index_vec::IndexVec;
use vob::Vob;

/// For each alias group, the narrowest width (in bits) written on any path reaching a program
/// point, or `None` if at least one path has no write (or a `drop`) since the entry.
type DefState = IndexVec<GroupIdx, Option<u32>>;

impl Unit {
    /// Check that this unit is well-formed. Per-instruction checks are run over the whole unit
    /// before the dataflow checks: within each set, the first offending instruction in program
    /// order is reported.
    pub fn validate(&self) -> Result<(), ChillError> {
        self.check_structure()?;
        self.check_defs()
    }

    /// Which blocks can be reached from the entry block? The unit's branch targets must be valid.
    pub(crate) fn reachable(&self) -> Vob {
        let mut seen = Vob::from_elem(false, self.blocks_len());
        if self.blocks_len() == 0 {
            return seen;
        }
        let mut todo = vec![BlockIdx::from_usize(0)];
        seen.set(0, true);
        while let Some(bidx) = todo.pop() {
            for succ in self.successors(bidx) {
                if !seen[succ.index()] {
                    seen.set(succ.index(), true);
                    todo.push(succ);
                }
            }
        }
        seen
    }

    /// Checks that only need to look at one instruction at a time.
    fn check_structure(&self) -> Result<(), ChillError> {
        let rf = self.edition().reg_file();
        for (bidx, b) in self.iter_blocks() {
            for (iidx, inst) in self.block_insts(bidx) {
                for op in inst.operands() {
                    match rf.check(op.reg) {
                        Ok(()) => (),
                        Err(RegCheckFailure::OutOfBounds) => {
                            return Err(ChillError::RegisterOutOfBounds {
                                iidx,
                                reg: op.reg,
                                edition: self.edition(),
                                num_gp: rf.num_gp(),
                            })
                        }
                        Err(RegCheckFailure::UnsupportedWidth) => {
                            return Err(ChillError::UnsupportedWidth {
                                iidx,
                                reg: op.reg,
                                width: op.reg.width(),
                                edition: self.edition(),
                            })
                        }
                    }
                    if op.role != Role::Read
                        && op.reg.gp_idx().is_none()
                        && !matches!(inst, Inst::SpAdd { .. })
                    {
                        return Err(ChillError::StackPointerWrite { iidx });
                    }
                }
                if inst.is_term() && iidx + 1 != b.end() {
                    return Err(ChillError::MisplacedTerminator { iidx });
                }
                match inst {
                    Inst::Br { target } => self.check_target(iidx, *target)?,
                    Inst::CondBr {
                        true_bb, false_bb, ..
                    } => {
                        self.check_target(iidx, *true_bb)?;
                        self.check_target(iidx, *false_bb)?;
                    }
                    _ => (),
                }
            }
        }
        Ok(())
    }

    fn check_target(&self, iidx: InstIdx, target: BlockIdx) -> Result<(), ChillError> {
        if target.index() >= self.blocks_len() {
            Err(ChillError::InvalidBranchTarget { iidx, target })
        } else {
            Ok(())
        }
    }

    /// Check that every read has a wide enough write reaching it. This is a forward "must"
    /// dataflow: the state at a block's entry is the meet of its reachable predecessors' exit
    /// states, where a group undefined on any incoming path is undefined.
    fn check_defs(&self) -> Result<(), ChillError> {
        if self.blocks_len() == 0 {
            return Ok(());
        }
        let rf = self.edition().reg_file();
        let at = self.edition().aliases();
        let reachable = self.reachable();
        let preds = self.predecessors();

        let mut nothing = DefState::from_vec(vec![None; at.num_groups()]);
        let empty = nothing.clone();
        nothing[at.sp_group()] = Some(rf.ptr_bitw());
        let entry = nothing;

        // `None` means "not yet computed", which acts as the top of the lattice.
        let mut ins: IndexVec<BlockIdx, Option<DefState>> =
            IndexVec::from_vec(vec![None; self.blocks_len()]);
        let mut outs: IndexVec<BlockIdx, Option<DefState>> =
            IndexVec::from_vec(vec![None; self.blocks_len()]);
        let mut changed = true;
        while changed {
            changed = false;
            for (bidx, _) in self.iter_blocks() {
                let state = if !reachable[bidx.index()] {
                    empty.clone()
                } else if bidx.index() == 0 {
                    // The entry block may also be a loop header.
                    let mut state = entry.clone();
                    for pred in preds[bidx]
                        .iter()
                        .filter(|pred| reachable[pred.index()])
                    {
                        if let Some(out) = &outs[*pred] {
                            meet(&mut state, out);
                        }
                    }
                    state
                } else {
                    let mut state: Option<DefState> = None;
                    for pred in preds[bidx]
                        .iter()
                        .filter(|pred| reachable[pred.index()])
                    {
                        if let Some(out) = &outs[*pred] {
                            match &mut state {
                                Some(state) => meet(state, out),
                                None => state = Some(out.clone()),
                            }
                        }
                    }
                    match state {
                        Some(state) => state,
                        // No predecessor has been computed yet.
                        None => continue,
                    }
                };
                if ins[bidx].as_ref() == Some(&state) {
                    continue;
                }
                let mut out = state.clone();
                for (_, inst) in self.block_insts(bidx) {
                    self.transfer_defs(inst, &mut out);
                }
                ins[bidx] = Some(state);
                outs[bidx] = Some(out);
                changed = true;
            }
        }

        for (bidx, _) in self.iter_blocks() {
            let mut state = ins[bidx].take().unwrap_or_else(|| empty.clone());
            for (iidx, inst) in self.block_insts(bidx) {
                let mut err = None;
                inst.map_reads(|reg| {
                    if err.is_some() {
                        return;
                    }
                    let bitw = rf.bitw(reg.width());
                    match state[at.group(reg)] {
                        None => err = Some(ChillError::UseBeforeDef { iidx, reg }),
                        Some(written_bitw) if written_bitw < bitw => {
                            err = Some(ChillError::ReadBeyondWrittenWidth {
                                iidx,
                                reg,
                                written_bitw,
                            })
                        }
                        Some(_) => (),
                    }
                });
                if let Some(err) = err {
                    return Err(err);
                }
                self.transfer_defs(inst, &mut state);
            }
        }
        Ok(())
    }

    fn transfer_defs(&self, inst: &Inst, state: &mut DefState) {
        let rf = self.edition().reg_file();
        let at = self.edition().aliases();
        for op in inst.operands() {
            match op.role {
                Role::Read => (),
                Role::Write => state[at.group(op.reg)] = Some(rf.bitw(op.reg.width())),
                Role::Drop => state[at.group(op.reg)] = None,
            }
        }
    }
}

/// Merge `other` into `state`: a group is defined only if it is defined in both, and then only as
/// wide as the narrower of the two.
fn meet(state: &mut DefState, other: &DefState) {
    for (x, y) in state.iter_mut().zip(other.iter()) {
        *x = std::cmp::min(*x, *y);
    }
}
