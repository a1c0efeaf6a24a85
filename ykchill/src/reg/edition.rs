//! IR editions and the register file each of them defines.
//!
//! Editions are versioned: a later edition may have more general purpose registers, more register
//! classes, or a different chill hint format. Anything that interprets register indices or hint
//! data must first check that it was produced for the edition it expects.

use super::{AliasTable, GpIdx, VirtualRegister, WidthMode};
use crate::errors::ChillError;
use static_assertions::const_assert;
use std::{
    fmt::{self, Display, Formatter},
    sync::LazyLock,
};

/// The number of general purpose registers in edition 0. One of AMD64's 16 general purpose
/// registers is the stack pointer, so 15 virtual GP registers can map 1:1 onto native registers.
const ED0_NUM_GP: usize = 15;
const_assert!(ED0_NUM_GP <= u8::MAX as usize);

static ED0_REGFILE: RegFile = RegFile {
    edition: Edition(0),
    num_gp: ED0_NUM_GP,
    widths: &[
        WidthMode::W8,
        WidthMode::W16,
        WidthMode::W32,
        WidthMode::W64,
        WidthMode::Ptr,
    ],
    ptr_bitw: 64,
};

static ED0_ALIASES: LazyLock<AliasTable> = LazyLock::new(|| AliasTable::new(&ED0_REGFILE));

/// An IR edition.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct Edition(u32);

impl Edition {
    pub const ED0: Edition = Edition(0);
    /// The newest edition this crate knows about.
    pub const LATEST: Edition = Edition::ED0;

    /// Return the edition numbered `x`.
    pub fn new(x: u32) -> Result<Self, ChillError> {
        match x {
            0 => Ok(Edition::ED0),
            _ => Err(ChillError::UnsupportedEdition {
                found: x,
                expected: Edition::LATEST.0,
            }),
        }
    }

    /// Fail with [ChillError::UnsupportedEdition] unless `self` is `expected`.
    pub fn expect(self, expected: Edition) -> Result<(), ChillError> {
        if self == expected {
            Ok(())
        } else {
            Err(ChillError::UnsupportedEdition {
                found: self.0,
                expected: expected.0,
            })
        }
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// The register file of this edition.
    pub fn reg_file(self) -> &'static RegFile {
        match self.0 {
            0 => &ED0_REGFILE,
            _ => unreachable!(),
        }
    }

    /// The alias groups of this edition's register file.
    pub fn aliases(self) -> &'static AliasTable {
        match self.0 {
            0 => &ED0_ALIASES,
            _ => unreachable!(),
        }
    }
}

impl Display for Edition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The shape of one edition's register file.
#[derive(Debug)]
pub struct RegFile {
    edition: Edition,
    num_gp: usize,
    widths: &'static [WidthMode],
    ptr_bitw: u32,
}

impl RegFile {
    pub fn edition(&self) -> Edition {
        self.edition
    }

    /// How many general purpose registers does this edition have?
    pub fn num_gp(&self) -> usize {
        self.num_gp
    }

    /// The width modes every general purpose register can be viewed through.
    pub fn widths(&self) -> &'static [WidthMode] {
        self.widths
    }

    /// How many bits is a [WidthMode::Ptr] view?
    pub fn ptr_bitw(&self) -> u32 {
        self.ptr_bitw
    }

    /// How many bits does `width` cover in this edition?
    pub fn bitw(&self, width: WidthMode) -> u32 {
        width.bitw(self.ptr_bitw)
    }

    /// Iterate over this edition's general purpose register indices.
    pub fn iter_gp(&self) -> impl Iterator<Item = GpIdx> {
        (0..self.num_gp).map(GpIdx::from_usize)
    }

    /// Is `reg` a register of this edition? Returns `Err(reason)` if not. The stack pointer is
    /// always part of the register file.
    pub(crate) fn check(&self, reg: VirtualRegister) -> Result<(), RegCheckFailure> {
        match reg {
            VirtualRegister::Gp(idx, width) => {
                if idx.index() >= self.num_gp {
                    Err(RegCheckFailure::OutOfBounds)
                } else if !self.widths.contains(&width) {
                    Err(RegCheckFailure::UnsupportedWidth)
                } else {
                    Ok(())
                }
            }
            VirtualRegister::Sp => Ok(()),
        }
    }
}

/// Why [RegFile::check] rejected a register.
#[derive(Debug, PartialEq)]
pub(crate) enum RegCheckFailure {
    OutOfBounds,
    UnsupportedWidth,
}
