//! The binary form of [ChillTable]s.
//!
//! All integers are little endian. A table is a header followed by a body:
//!
//! ```text
//! header: magic: u32, edition: u32
//! body:   num_insts: u32, num_hints: u32, hints: [hint; num_hints]
//! hint:   iidx: u32, num_entries: u8, entries: [entry; num_entries]
//! entry:  class: u8, idx: u8, until: u32
//! ```
//!
//! Only instructions with a non-empty hint are stored, in ascending `iidx` order; entries within a
//! hint are in ascending `(class, idx)` order. An `until` of 0 means [NextUse::Never].
//!
//! The header is decoded and checked on its own before any of the body is looked at, so that data
//! from another edition is rejected rather than misinterpreted.

use super::{ChillEntry, ChillHint, ChillTable, NextUse};
use crate::{
    errors::ChillError,
    reg::{Edition, RegClass},
    unit::InstIdx,
};
use deku::prelude::*;
use smallvec::SmallVec;

/// A magic number that all serialised chill tables begin with.
const MAGIC: u32 = 0x6c6c6863;

#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
struct Header {
    magic: u32,
    edition: u32,
}

#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "little")]
struct Body {
    num_insts: u32,
    num_hints: u32,
    #[deku(count = "num_hints")]
    hints: Vec<WireHint>,
}

#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
struct WireHint {
    iidx: u32,
    num_entries: u8,
    #[deku(count = "num_entries")]
    entries: Vec<WireEntry>,
}

#[derive(Debug, DekuRead, DekuWrite)]
#[deku(endian = "endian", ctx = "endian: deku::ctx::Endian")]
struct WireEntry {
    class: u8,
    idx: u8,
    until: u32,
}

impl ChillTable {
    /// Serialise this table.
    pub fn encode(&self) -> Result<Vec<u8>, ChillError> {
        let mut hints = Vec::new();
        for (iidx, h) in self.iter_hints() {
            let entries = h
                .entries()
                .iter()
                .map(|x| WireEntry {
                    class: x.class as u8,
                    idx: x.idx,
                    until: x.until.to_raw(),
                })
                .collect::<Vec<_>>();
            hints.push(WireHint {
                iidx: iidx.raw(),
                num_entries: u8::try_from(entries.len())
                    .map_err(|_| ChillError::Encode(format!("too many entries at %{iidx}")))?,
                entries,
            });
        }
        let body = Body {
            num_insts: u32::try_from(self.insts_len())
                .map_err(|_| ChillError::Encode("too many instructions".into()))?,
            num_hints: u32::try_from(hints.len())
                .map_err(|_| ChillError::Encode("too many hints".into()))?,
            hints,
        };
        let hdr = Header {
            magic: MAGIC,
            edition: self.edition().as_u32(),
        };
        let mut out = hdr
            .to_bytes()
            .map_err(|e| ChillError::Encode(e.to_string()))?;
        out.extend(
            body.to_bytes()
                .map_err(|e| ChillError::Encode(e.to_string()))?,
        );
        Ok(out)
    }

    /// Deserialise a table that must have been produced for edition `expected`.
    pub fn decode(data: &[u8], expected: Edition) -> Result<Self, ChillError> {
        let (rest, hdr) =
            Header::from_bytes((data, 0)).map_err(|e| ChillError::Decode(e.to_string()))?;
        if hdr.magic != MAGIC {
            return Err(ChillError::Decode(format!(
                "bad magic number {:#x}",
                hdr.magic
            )));
        }
        let edition = Edition::new(hdr.edition)?;
        edition.expect(expected)?;

        let ((rest, _), body) =
            Body::from_bytes(rest).map_err(|e| ChillError::Decode(e.to_string()))?;
        if !rest.is_empty() {
            return Err(ChillError::Decode(format!(
                "{} trailing bytes",
                rest.len()
            )));
        }

        let num_gp = edition.reg_file().num_gp();
        let num_insts = usize::try_from(body.num_insts)
            .map_err(|_| ChillError::Decode("too many instructions".into()))?;
        // `num_insts` is untrusted: nothing may be allocated in proportion to it.
        let mut hints = Vec::with_capacity(body.hints.len());
        let mut prev_iidx = None;
        for wh in body.hints {
            let iidx = InstIdx::from_usize(
                usize::try_from(wh.iidx)
                    .map_err(|_| ChillError::Decode("instruction index too big".into()))?,
            );
            if iidx.index() >= num_insts {
                return Err(ChillError::Decode(format!(
                    "hint for %{iidx} but there are only {num_insts} instructions"
                )));
            }
            if prev_iidx.is_some_and(|x| x >= iidx) {
                return Err(ChillError::Decode(format!("hint for %{iidx} out of order")));
            }
            prev_iidx = Some(iidx);

            let mut entries = SmallVec::<[ChillEntry; 4]>::new();
            for we in wh.entries {
                let class = RegClass::from_repr(we.class).ok_or_else(|| {
                    ChillError::Decode(format!("invalid register class {} at %{iidx}", we.class))
                })?;
                let in_bounds = match class {
                    RegClass::Gp => usize::from(we.idx) < num_gp,
                    RegClass::Sp => we.idx == 0,
                };
                if !in_bounds {
                    return Err(ChillError::Decode(format!(
                        "{class} register index {} out of bounds at %{iidx}",
                        we.idx
                    )));
                }
                let entry = ChillEntry {
                    class,
                    idx: we.idx,
                    until: NextUse::from_raw(we.until),
                };
                if let Some(prev) = entries.last() {
                    if (prev.class as u8, prev.idx) >= (we.class, we.idx) {
                        return Err(ChillError::Decode(format!(
                            "entries at %{iidx} are not in ascending order"
                        )));
                    }
                }
                entries.push(entry);
            }
            if entries.is_empty() {
                return Err(ChillError::Decode(format!("empty hint at %{iidx}")));
            }
            hints.push((iidx, ChillHint::from_entries(entries)));
        }
        Ok(ChillTable::new(edition, num_insts, hints))
    }
}
