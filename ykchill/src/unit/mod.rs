//! Compiled units.
//!
//! A [Unit] is the instruction stream of one compiled function as handed to us by IR
//! construction. Instructions operate on [VirtualRegister]s and are stored in program order in an
//! arena: an instruction's position in that arena ([InstIdx]) is its identity, and it is what chill
//! hints are keyed by.
//!
//! Control flow is represented by basic blocks. A [Block] is a contiguous, possibly empty, range
//! of instructions; blocks are themselves stored in an arena and refer to each other by
//! [BlockIdx]. A block's successors are determined by its last instruction:
//!
//!   * `br bbN` jumps to `bbN`;
//!   * `condbr %r, bbN, bbM` jumps to one of `bbN` or `bbM`;
//!   * `ret` leaves the unit;
//!   * anything else falls through to the next block, or leaves the unit if this is the last
//!     block.
//!
//! Instructions are immutable once constructed: analyses annotate them from the outside.
//!
//!
//! ## Textual format
//!
//! Units can be pretty-printed:
//!
//! ```text
//! unit fib edition 0
//! bb0:
//!   %0: r0.64 = const 10
//!   %1: r1.64 = const 1
//!   %2: r0.64 = sub r0.64, r1.64
//!   %3: condbr r0.8, bb1, bb2
//! bb1:
//!   ...
//! ```
//!
//! In tests, the same syntax (with the `%n:` prefixes being optional) can be parsed back into a
//! unit.

use crate::reg::{Edition, VirtualRegister};
use index_vec::IndexVec;
use smallvec::{smallvec, SmallVec};
use std::fmt::{self, Display, Formatter};

mod builder;
mod well_formed;

pub use builder::{RegPool, UnitBuilder};

index_vec::define_index_type! {
    /// The position of an instruction in a [Unit]'s program order.
    pub struct InstIdx = u32;
    DISPLAY_FORMAT = "{}";
}

index_vec::define_index_type! {
    /// An index into a [Unit]'s blocks.
    pub struct BlockIdx = u32;
    DISPLAY_FORMAT = "{}";
}

/// A compiled unit: a sequence of basic blocks containing instructions.
#[derive(Clone, Debug, PartialEq)]
pub struct Unit {
    name: String,
    edition: Edition,
    insts: IndexVec<InstIdx, Inst>,
    blocks: IndexVec<BlockIdx, Block>,
}

impl Unit {
    /// Create a unit from its raw parts. `blocks` must exactly cover `insts` in order.
    pub(crate) fn from_parts(
        name: String,
        edition: Edition,
        insts: IndexVec<InstIdx, Inst>,
        blocks: IndexVec<BlockIdx, Block>,
    ) -> Self {
        debug_assert_eq!(
            blocks.last().map(|b| b.end).unwrap_or(InstIdx::from_usize(0)),
            insts.next_idx()
        );
        Self {
            name,
            edition,
            insts,
            blocks,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn edition(&self) -> Edition {
        self.edition
    }

    pub fn insts_len(&self) -> usize {
        self.insts.len()
    }

    /// Return the instruction at `iidx`.
    ///
    /// # Panics
    ///
    /// If `iidx` is out of bounds.
    pub fn inst(&self, iidx: InstIdx) -> &Inst {
        &self.insts[iidx]
    }

    /// Iterate, in program order, over all instructions.
    pub fn iter_insts(&self) -> impl DoubleEndedIterator<Item = (InstIdx, &Inst)> {
        self.insts.iter_enumerated()
    }

    pub fn blocks_len(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, bidx: BlockIdx) -> &Block {
        &self.blocks[bidx]
    }

    /// Iterate, in program order, over all blocks.
    pub fn iter_blocks(&self) -> impl DoubleEndedIterator<Item = (BlockIdx, &Block)> {
        self.blocks.iter_enumerated()
    }

    /// Return the instructions in `bidx` alongside their positions.
    pub fn block_insts(
        &self,
        bidx: BlockIdx,
    ) -> impl DoubleEndedIterator<Item = (InstIdx, &Inst)> + '_ {
        let b = &self.blocks[bidx];
        self.insts[b.start..b.end]
            .iter()
            .enumerate()
            .map(move |(i, inst)| (b.start + i, inst))
    }

    /// The successors of block `bidx`. The unit must be well-formed.
    pub fn successors(&self, bidx: BlockIdx) -> SmallVec<[BlockIdx; 2]> {
        let b = &self.blocks[bidx];
        if !b.is_empty() {
            match &self.insts[b.end - 1] {
                Inst::Br { target } => return smallvec![*target],
                Inst::CondBr {
                    true_bb, false_bb, ..
                } => {
                    if true_bb == false_bb {
                        return smallvec![*true_bb];
                    }
                    return smallvec![*true_bb, *false_bb];
                }
                Inst::Return { .. } => return smallvec![],
                _ => (),
            }
        }
        let next = bidx + 1;
        if next.index() < self.blocks.len() {
            smallvec![next]
        } else {
            smallvec![]
        }
    }

    /// The predecessors of each block. The unit must be well-formed.
    pub fn predecessors(&self) -> IndexVec<BlockIdx, SmallVec<[BlockIdx; 2]>> {
        let mut preds = IndexVec::from_vec(vec![SmallVec::new(); self.blocks.len()]);
        for bidx in self.blocks.indices() {
            for succ in self.successors(bidx) {
                preds[succ].push(bidx);
            }
        }
        preds
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "unit {} edition {}", self.name, self.edition)?;
        for (bidx, _) in self.iter_blocks() {
            writeln!(f, "bb{bidx}:")?;
            for (iidx, inst) in self.block_insts(bidx) {
                writeln!(f, "  %{iidx}: {inst}")?;
            }
        }
        Ok(())
    }
}

/// A basic block: the half-open range `start..end` of a [Unit]'s instructions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Block {
    start: InstIdx,
    end: InstIdx,
}

impl Block {
    pub(crate) fn new(start: InstIdx, end: InstIdx) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn start(&self) -> InstIdx {
        self.start
    }

    pub fn end(&self) -> InstIdx {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end.index() - self.start.index()
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    LShr,
}

impl BinOp {
    pub(crate) fn from_name(s: &str) -> Option<Self> {
        match s {
            "add" => Some(BinOp::Add),
            "sub" => Some(BinOp::Sub),
            "mul" => Some(BinOp::Mul),
            "and" => Some(BinOp::And),
            "or" => Some(BinOp::Or),
            "xor" => Some(BinOp::Xor),
            "shl" => Some(BinOp::Shl),
            "lshr" => Some(BinOp::LShr),
            _ => None,
        }
    }
}

impl Display for BinOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
        };
        write!(f, "{s}")
    }
}

/// How an instruction uses one of its operands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// The register's current value is read.
    Read,
    /// A new value is written to the register.
    Write,
    /// The register's current value is discarded without a new value being written.
    Drop,
}

/// One register operand of an instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Operand {
    pub reg: VirtualRegister,
    pub role: Role,
}

impl Operand {
    fn read(reg: VirtualRegister) -> Self {
        Self {
            reg,
            role: Role::Read,
        }
    }

    fn write(reg: VirtualRegister) -> Self {
        Self {
            reg,
            role: Role::Write,
        }
    }
}

/// An instruction.
///
/// Where an instruction both reads and writes the same register (e.g. `r0.64 = add r0.64,
/// r1.64`), all reads happen before the write.
#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    /// `dst = const val`
    Const { dst: VirtualRegister, val: u64 },
    /// `dst = mov src`
    Mov {
        dst: VirtualRegister,
        src: VirtualRegister,
    },
    /// `dst = <binop> lhs, rhs`
    BinOp {
        dst: VirtualRegister,
        binop: BinOp,
        lhs: VirtualRegister,
        rhs: VirtualRegister,
    },
    /// `dst = load addr`
    Load {
        dst: VirtualRegister,
        addr: VirtualRegister,
    },
    /// `store addr, val`
    Store {
        addr: VirtualRegister,
        val: VirtualRegister,
    },
    /// `sp_add off`: offset the stack pointer by `off` bytes. This is the only instruction
    /// allowed to change the stack pointer.
    SpAdd { off: i32 },
    /// `drop reg`: `reg`'s current value will never be needed again.
    Drop { reg: VirtualRegister },
    /// `blackbox reg`: an opaque use of `reg`.
    BlackBox { reg: VirtualRegister },
    /// `[rtn =] call @target(args...)`
    Call {
        target: u32,
        args: SmallVec<[VirtualRegister; 4]>,
        rtn: Option<VirtualRegister>,
    },
    /// `br target`
    Br { target: BlockIdx },
    /// `condbr cond, true_bb, false_bb`: branch to `true_bb` if `cond` is non-zero.
    CondBr {
        cond: VirtualRegister,
        true_bb: BlockIdx,
        false_bb: BlockIdx,
    },
    /// `ret [val]`
    Return { val: Option<VirtualRegister> },
}

impl Inst {
    /// Is this a block terminator?
    pub fn is_term(&self) -> bool {
        matches!(
            self,
            Inst::Br { .. } | Inst::CondBr { .. } | Inst::Return { .. }
        )
    }

    /// Return this instruction's operands in syntactic order.
    pub fn operands(&self) -> SmallVec<[Operand; 4]> {
        match self {
            Inst::Const { dst, .. } => smallvec![Operand::write(*dst)],
            Inst::Mov { dst, src } => smallvec![Operand::write(*dst), Operand::read(*src)],
            Inst::BinOp { dst, lhs, rhs, .. } => smallvec![
                Operand::write(*dst),
                Operand::read(*lhs),
                Operand::read(*rhs)
            ],
            Inst::Load { dst, addr } => smallvec![Operand::write(*dst), Operand::read(*addr)],
            Inst::Store { addr, val } => smallvec![Operand::read(*addr), Operand::read(*val)],
            Inst::SpAdd { .. } => smallvec![
                Operand::write(VirtualRegister::Sp),
                Operand::read(VirtualRegister::Sp)
            ],
            Inst::Drop { reg } => smallvec![Operand {
                reg: *reg,
                role: Role::Drop
            }],
            Inst::BlackBox { reg } => smallvec![Operand::read(*reg)],
            Inst::Call { args, rtn, .. } => {
                let mut ops = SmallVec::new();
                if let Some(rtn) = rtn {
                    ops.push(Operand::write(*rtn));
                }
                ops.extend(args.iter().map(|x| Operand::read(*x)));
                ops
            }
            Inst::Br { .. } => smallvec![],
            Inst::CondBr { cond, .. } => smallvec![Operand::read(*cond)],
            Inst::Return { val } => val.iter().map(|x| Operand::read(*x)).collect(),
        }
    }

    /// Call `f` for each register this instruction reads.
    pub fn map_reads<F>(&self, mut f: F)
    where
        F: FnMut(VirtualRegister),
    {
        for op in self.operands() {
            if op.role == Role::Read {
                f(op.reg);
            }
        }
    }

    /// Call `f` for each register whose value this instruction ends, either by writing a new
    /// value or by dropping it.
    pub fn map_kills<F>(&self, mut f: F)
    where
        F: FnMut(VirtualRegister),
    {
        for op in self.operands() {
            if op.role != Role::Read {
                f(op.reg);
            }
        }
    }
}

impl Display for Inst {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Inst::Const { dst, val } => write!(f, "{dst} = const {val}"),
            Inst::Mov { dst, src } => write!(f, "{dst} = mov {src}"),
            Inst::BinOp {
                dst,
                binop,
                lhs,
                rhs,
            } => write!(f, "{dst} = {binop} {lhs}, {rhs}"),
            Inst::Load { dst, addr } => write!(f, "{dst} = load {addr}"),
            Inst::Store { addr, val } => write!(f, "store {addr}, {val}"),
            Inst::SpAdd { off } => write!(f, "sp_add {off}"),
            Inst::Drop { reg } => write!(f, "drop {reg}"),
            Inst::BlackBox { reg } => write!(f, "blackbox {reg}"),
            Inst::Call { target, args, rtn } => {
                if let Some(rtn) = rtn {
                    write!(f, "{rtn} = ")?;
                }
                write!(
                    f,
                    "call @{target}({})",
                    args.iter()
                        .map(|x| x.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
            Inst::Br { target } => write!(f, "br bb{target}"),
            Inst::CondBr {
                cond,
                true_bb,
                false_bb,
            } => write!(f, "condbr {cond}, bb{true_bb}, bb{false_bb}"),
            Inst::Return { val: Some(val) } => write!(f, "ret {val}"),
            Inst::Return { val: None } => write!(f, "ret"),
        }
    }
}
