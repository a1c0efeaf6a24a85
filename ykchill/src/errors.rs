use crate::{
    reg::{Edition, VirtualRegister, WidthMode},
    unit::{BlockIdx, InstIdx},
};
use thiserror::Error;

/// A failure to validate, analyse, or load the chill hints of a compiled unit.
///
/// None of these are transient: every variant means "this input is rejected".
#[derive(Error, Debug, PartialEq)]
pub enum ChillError {
    /// An instruction references a general purpose register the edition does not have.
    #[error(
        "Instruction at position {iidx} references {reg}, but edition {edition} only has {num_gp} general purpose registers"
    )]
    RegisterOutOfBounds {
        iidx: InstIdx,
        reg: VirtualRegister,
        edition: Edition,
        num_gp: usize,
    },
    /// An instruction uses a width mode the edition does not define.
    #[error("Instruction at position {iidx} uses {reg} whose width {width} is not part of edition {edition}")]
    UnsupportedWidth {
        iidx: InstIdx,
        reg: VirtualRegister,
        width: WidthMode,
        edition: Edition,
    },
    /// An instruction reads a register that has no write reaching it on at least one path.
    #[error("Instruction at position {iidx} reads {reg} which has no reaching write")]
    UseBeforeDef { iidx: InstIdx, reg: VirtualRegister },
    /// An instruction reads more bits of a register than the narrowest reaching write defined.
    /// Narrow writes leave the upper bits of a register undefined.
    #[error(
        "Instruction at position {iidx} reads {reg} but on at least one path only the low {written_bitw} bits were written"
    )]
    ReadBeyondWrittenWidth {
        iidx: InstIdx,
        reg: VirtualRegister,
        written_bitw: u32,
    },
    /// Something other than `sp_add` tried to change the stack pointer.
    #[error("Instruction at position {iidx} modifies the stack pointer but is not an offsetting instruction")]
    StackPointerWrite { iidx: InstIdx },
    /// A terminator appears before the end of its block.
    #[error("Terminator at position {iidx} is not the last instruction of its block")]
    MisplacedTerminator { iidx: InstIdx },
    /// A branch references a block that doesn't exist.
    #[error("Instruction at position {iidx} branches to non-existent block bb{target}")]
    InvalidBranchTarget { iidx: InstIdx, target: BlockIdx },
    /// Data produced for one edition was handed to something expecting another.
    #[error("Unsupported edition {found} (expected edition {expected})")]
    UnsupportedEdition { found: u32, expected: u32 },
    /// All of an edition's general purpose registers are live at once.
    #[error(
        "All {num_gp} general purpose registers of edition {edition} are in use: this can be caused by a unit with too many simultaneously live values; try factoring it into smaller units"
    )]
    RegistersExhausted { edition: Edition, num_gp: usize },
    /// A chill table could not be serialised.
    #[error("Cannot encode chill table: {0}")]
    Encode(String),
    /// A serialised chill table could not be decoded.
    #[error("Malformed chill table: {0}")]
    Decode(String),
}

impl ChillError {
    /// If this error was caused by a specific instruction, return its position.
    pub fn iidx(&self) -> Option<InstIdx> {
        match self {
            ChillError::RegisterOutOfBounds { iidx, .. }
            | ChillError::UnsupportedWidth { iidx, .. }
            | ChillError::UseBeforeDef { iidx, .. }
            | ChillError::ReadBeyondWrittenWidth { iidx, .. }
            | ChillError::StackPointerWrite { iidx }
            | ChillError::MisplacedTerminator { iidx }
            | ChillError::InvalidBranchTarget { iidx, .. } => Some(*iidx),
            ChillError::UnsupportedEdition { .. }
            | ChillError::RegistersExhausted { .. }
            | ChillError::Encode(_)
            | ChillError::Decode(_) => None,
        }
    }
}
