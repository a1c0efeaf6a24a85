//! Building units in program order.

use super::{Block, BlockIdx, Inst, InstIdx, Unit};
use crate::{
    errors::ChillError,
    reg::{Edition, GpIdx, VirtualRegister, WidthMode},
};
use index_vec::IndexVec;
use vob::Vob;

/// Hands out general purpose registers in allocation order: the lowest free index first, with
/// indices that have been released becoming available again.
#[derive(Debug)]
pub struct RegPool {
    edition: Edition,
    /// One bit per GP index of the edition: set if that index currently holds a live value.
    in_use: Vob,
}

impl RegPool {
    pub fn new(edition: Edition) -> Self {
        Self {
            edition,
            in_use: Vob::from_elem(false, edition.reg_file().num_gp()),
        }
    }

    /// Allocate the lowest free register index and return a `width` view of it.
    pub fn alloc(&mut self, width: WidthMode) -> Result<VirtualRegister, ChillError> {
        match self.in_use.iter_unset_bits(..).next() {
            Some(idx) => {
                self.in_use.set(idx, true);
                Ok(VirtualRegister::Gp(GpIdx::from_usize(idx), width))
            }
            None => Err(ChillError::RegistersExhausted {
                edition: self.edition,
                num_gp: self.in_use.len(),
            }),
        }
    }

    /// Release `reg`'s index so that a later [Self::alloc] can reuse it. Releasing a register
    /// that isn't allocated, or the stack pointer, is a no-op.
    pub fn free(&mut self, reg: VirtualRegister) {
        if let Some(idx) = reg.gp_idx() {
            if idx.index() < self.in_use.len() {
                self.in_use.set(idx.index(), false);
            }
        }
    }

    /// How many registers are currently allocated?
    pub fn live(&self) -> usize {
        self.in_use.iter_set_bits(..).count()
    }
}

/// Builds a [Unit] one instruction at a time.
///
/// The builder starts with block `bb0` open. [Self::start_block] closes the current block and
/// opens the next one. Branches may name blocks that haven't been started yet: whether they exist
/// is only checked when the unit is validated.
#[derive(Debug)]
pub struct UnitBuilder {
    name: String,
    edition: Edition,
    insts: IndexVec<InstIdx, Inst>,
    blocks: IndexVec<BlockIdx, Block>,
    /// The first instruction of the currently open block.
    cur_start: InstIdx,
    pool: RegPool,
}

impl UnitBuilder {
    pub fn new(name: &str, edition: Edition) -> Self {
        Self {
            name: name.to_owned(),
            edition,
            insts: IndexVec::new(),
            blocks: IndexVec::new(),
            cur_start: InstIdx::from_usize(0),
            pool: RegPool::new(edition),
        }
    }

    /// The block currently being appended to.
    pub fn cur_block(&self) -> BlockIdx {
        self.blocks.next_idx()
    }

    /// Close the current block and open a new one, returning the new block's index.
    pub fn start_block(&mut self) -> BlockIdx {
        let end = self.insts.next_idx();
        self.blocks.push(Block::new(self.cur_start, end));
        self.cur_start = end;
        self.blocks.next_idx()
    }

    /// Append `inst` to the current block.
    pub fn push(&mut self, inst: Inst) -> InstIdx {
        self.insts.push(inst)
    }

    /// Allocate a fresh register through this builder's [RegPool].
    pub fn alloc_reg(&mut self, width: WidthMode) -> Result<VirtualRegister, ChillError> {
        self.pool.alloc(width)
    }

    /// Emit a `drop` of `reg` and return its index to the [RegPool].
    pub fn drop_reg(&mut self, reg: VirtualRegister) -> InstIdx {
        self.pool.free(reg);
        self.push(Inst::Drop { reg })
    }

    /// Close the current block and return the finished unit.
    pub fn build(mut self) -> Unit {
        let end = self.insts.next_idx();
        self.blocks.push(Block::new(self.cur_start, end));
        Unit::from_parts(self.name, self.edition, self.insts, self.blocks)
    }
}
