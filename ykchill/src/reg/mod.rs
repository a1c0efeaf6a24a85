//! Virtual registers.
//!
//! The register file has two classes of registers:
//!
//!   * general purpose (GP) registers `r0..rN`, where `N` is fixed by the [Edition];
//!   * a single stack pointer `sp`, which is never numbered among the GP registers.
//!
//! Each GP register can be accessed through several width views (`r3.8`, `r3.32`, `r3.ptr` and
//! so on). All views of the same index share one storage slot, in the same way that `al`, `eax`,
//! and `rax` share storage on x64: see [alias] for how those relationships are represented.
//!
//! Writing a view narrower than the storage slot leaves the remaining upper bits *undefined*.
//! They are neither preserved nor zero-extended, so nothing may read them until a wide enough
//! write has happened. This is part of the edition contract.

use std::fmt::{self, Display, Formatter};
use strum::{EnumCount, EnumIter, FromRepr};

pub mod alias;
mod edition;

pub use alias::{AliasTable, GroupIdx};
pub(crate) use edition::RegCheckFailure;
pub use edition::{Edition, RegFile};

index_vec::define_index_type! {
    /// The index of a general purpose register.
    pub struct GpIdx = u8;
    DISPLAY_FORMAT = "{}";
}

/// A register class.
#[repr(u8)]
#[derive(Copy, Clone, Debug, EnumCount, EnumIter, Eq, FromRepr, Hash, PartialEq)]
pub enum RegClass {
    /// General purpose registers.
    Gp,
    /// The stack pointer.
    Sp,
}

impl Display for RegClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            RegClass::Gp => write!(f, "gp"),
            RegClass::Sp => write!(f, "sp"),
        }
    }
}

/// The width through which a register is viewed.
#[repr(u8)]
#[derive(
    Copy, Clone, Debug, EnumCount, EnumIter, Eq, FromRepr, Hash, Ord, PartialEq, PartialOrd,
)]
pub enum WidthMode {
    W8,
    W16,
    W32,
    W64,
    /// A platform pointer-sized view. How many bits this is depends on the [Edition].
    Ptr,
}

impl WidthMode {
    /// How many bits does this view cover, given pointers of `ptr_bitw` bits?
    pub fn bitw(self, ptr_bitw: u32) -> u32 {
        match self {
            WidthMode::W8 => 8,
            WidthMode::W16 => 16,
            WidthMode::W32 => 32,
            WidthMode::W64 => 64,
            WidthMode::Ptr => ptr_bitw,
        }
    }

    /// Parse the suffix of a register's textual name (e.g. the `32` of `r3.32`).
    pub(crate) fn from_suffix(s: &str) -> Option<Self> {
        match s {
            "8" => Some(WidthMode::W8),
            "16" => Some(WidthMode::W16),
            "32" => Some(WidthMode::W32),
            "64" => Some(WidthMode::W64),
            "ptr" => Some(WidthMode::Ptr),
            _ => None,
        }
    }
}

impl Display for WidthMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            WidthMode::W8 => write!(f, "8"),
            WidthMode::W16 => write!(f, "16"),
            WidthMode::W32 => write!(f, "32"),
            WidthMode::W64 => write!(f, "64"),
            WidthMode::Ptr => write!(f, "ptr"),
        }
    }
}

/// One view of one slot in the virtual register file.
///
/// Note that two `VirtualRegister`s which compare unequal may still share storage (e.g. `r1.8`
/// and `r1.64`): use [AliasTable] to reason about storage.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum VirtualRegister {
    /// General purpose register `idx` viewed with `width`.
    Gp(GpIdx, WidthMode),
    /// The stack pointer. This is always pointer sized.
    Sp,
}

impl VirtualRegister {
    /// Shorthand for `VirtualRegister::Gp(GpIdx::from_usize(idx), width)`.
    ///
    /// # Panics
    ///
    /// If `idx` cannot be represented as a [GpIdx].
    pub fn gp(idx: usize, width: WidthMode) -> Self {
        VirtualRegister::Gp(GpIdx::from_usize(idx), width)
    }

    pub fn class(&self) -> RegClass {
        match self {
            VirtualRegister::Gp(..) => RegClass::Gp,
            VirtualRegister::Sp => RegClass::Sp,
        }
    }

    pub fn width(&self) -> WidthMode {
        match self {
            VirtualRegister::Gp(_, width) => *width,
            VirtualRegister::Sp => WidthMode::Ptr,
        }
    }

    /// If this is a general purpose register, return its index.
    pub fn gp_idx(&self) -> Option<GpIdx> {
        match self {
            VirtualRegister::Gp(idx, _) => Some(*idx),
            VirtualRegister::Sp => None,
        }
    }

    /// Parse a register's textual name (e.g. `r3.32` or `sp`).
    pub(crate) fn from_name(s: &str) -> Option<Self> {
        if s == "sp" {
            return Some(VirtualRegister::Sp);
        }
        let (idx, width) = s.strip_prefix('r')?.split_once('.')?;
        let idx = idx.parse::<u8>().ok()?;
        Some(VirtualRegister::Gp(
            GpIdx::from_usize(usize::from(idx)),
            WidthMode::from_suffix(width)?,
        ))
    }
}

impl Display for VirtualRegister {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            VirtualRegister::Gp(idx, width) => write!(f, "r{idx}.{width}"),
            VirtualRegister::Sp => write!(f, "sp"),
        }
    }
}
