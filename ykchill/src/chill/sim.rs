//! A machine for executing units in tests.
//!
//! The same unit can be run with three different ways of holding register values:
//!
//!   * [run_direct]: every alias group has its own storage.
//!   * [run_naive]: only [NUM_PHYS] values can be held at once. Other values are spilled on
//!     demand and reloaded when read. No hints are consulted.
//!   * [run_hinted]: as [run_naive], but after every instruction the unit's [ChillTable] is
//!     followed: values chilled until [NextUse::Never] are thrown away entirely and other chilled
//!     values are spilled. Reading a thrown away value, or reading a chilled value before its
//!     stated distance, panics.
//!
//! Since hints are purely additive, all three must observe exactly the same events.
//!
//! [arb_unit] generates random well-formed units for property tests.

use super::{ChillTable, NextUse};
use crate::{
    reg::{Edition, GroupIdx, VirtualRegister, WidthMode},
    unit::{BinOp, BlockIdx, Inst, InstIdx, Unit, UnitBuilder},
};
use proptest::prelude::*;
use smallvec::smallvec;
use std::collections::HashMap;

/// How many instructions a unit can execute before it is forcibly stopped.
const FUEL: usize = 1000;
/// How many values the naive and hinted allocators can hold in registers at once.
pub(crate) const NUM_PHYS: usize = 4;

/// Something a unit did that can be observed from outside it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Event {
    BlackBox(u64),
    Call(u32, Vec<u64>),
    Store(u64, u64),
    Return(Option<u64>),
}

/// Execute `u` with each alias group having its own storage.
pub(crate) fn run_direct(u: &Unit) -> Vec<Event> {
    let num_groups = u.edition().aliases().num_groups();
    Machine::new(u, Direct(vec![None; num_groups])).run().0
}

/// Execute `u` with [NUM_PHYS] registers, spilling on pressure. Returns the events and how many
/// values had to be reloaded from spill slots.
pub(crate) fn run_naive(u: &Unit) -> (Vec<Event>, usize) {
    let (events, regs) = Machine::new(u, Naive::new(u.edition())).run();
    (events, regs.reloads)
}

/// Execute `u` as [run_naive] does, following the hints in `ct`. Returns the events and how many
/// values were thrown away because of hints.
///
/// # Panics
///
/// If `ct` chills a value that is then read earlier than the hint said it would be.
pub(crate) fn run_hinted(u: &Unit, ct: &ChillTable) -> (Vec<Event>, usize) {
    let num_groups = u.edition().aliases().num_groups();
    let regs = Hinted {
        naive: Naive::new(u.edition()),
        ct,
        dead: vec![false; num_groups],
        cold: vec![None; num_groups],
        discards: 0,
    };
    let (events, regs) = Machine::new(u, regs).run();
    (events, regs.discards)
}

/// Storage for general purpose register values, keyed by alias group.
trait Regs {
    fn read(&mut self, step: usize, g: GroupIdx) -> u64;
    fn write(&mut self, g: GroupIdx, v: u64);
    fn drop_value(&mut self, g: GroupIdx);
    /// Called after the instruction `iidx`, executed at `step`, has finished.
    fn after_inst(&mut self, _step: usize, _iidx: InstIdx) {}
}

struct Direct(Vec<Option<u64>>);

impl Regs for Direct {
    fn read(&mut self, _step: usize, g: GroupIdx) -> u64 {
        self.0[g.index()].unwrap()
    }

    fn write(&mut self, g: GroupIdx, v: u64) {
        self.0[g.index()] = Some(v);
    }

    fn drop_value(&mut self, g: GroupIdx) {
        self.0[g.index()] = None;
    }
}

struct Naive {
    /// The group (and its value) in each physical register, and when it was last used.
    phys: [Option<(GroupIdx, u64, usize)>; NUM_PHYS],
    spill: Vec<Option<u64>>,
    clock: usize,
    reloads: usize,
}

impl Naive {
    fn new(edition: Edition) -> Self {
        Self {
            phys: [None; NUM_PHYS],
            spill: vec![None; edition.aliases().num_groups()],
            clock: 0,
            reloads: 0,
        }
    }

    fn find(&self, g: GroupIdx) -> Option<usize> {
        self.phys
            .iter()
            .position(|x| matches!(x, Some((pg, _, _)) if *pg == g))
    }

    /// Free up a physical register, spilling the least recently used value if needed.
    fn victim(&mut self) -> usize {
        if let Some(i) = self.phys.iter().position(|x| x.is_none()) {
            return i;
        }
        let (i, _) = self
            .phys
            .iter()
            .enumerate()
            .min_by_key(|(_, x)| x.map(|(_, _, t)| t))
            .unwrap();
        self.evict_phys(i);
        i
    }

    fn evict_phys(&mut self, i: usize) {
        if let Some((g, v, _)) = self.phys[i].take() {
            self.spill[g.index()] = Some(v);
        }
    }

    fn place(&mut self, g: GroupIdx, v: u64) {
        self.clock += 1;
        let i = match self.find(g) {
            Some(i) => i,
            None => self.victim(),
        };
        self.phys[i] = Some((g, v, self.clock));
    }

    /// Move `g`'s value, if it's in a register, to its spill slot.
    fn evict(&mut self, g: GroupIdx) {
        if let Some(i) = self.find(g) {
            self.evict_phys(i);
        }
    }
}

impl Regs for Naive {
    fn read(&mut self, _step: usize, g: GroupIdx) -> u64 {
        match self.find(g) {
            Some(i) => {
                self.clock += 1;
                let (_, v, t) = self.phys[i].as_mut().unwrap();
                *t = self.clock;
                *v
            }
            None => {
                let v = self.spill[g.index()]
                    .take()
                    .unwrap_or_else(|| panic!("group {g} has no value"));
                self.reloads += 1;
                self.place(g, v);
                v
            }
        }
    }

    fn write(&mut self, g: GroupIdx, v: u64) {
        self.spill[g.index()] = None;
        self.place(g, v);
    }

    fn drop_value(&mut self, g: GroupIdx) {
        if let Some(i) = self.find(g) {
            self.phys[i] = None;
        }
        self.spill[g.index()] = None;
    }
}

struct Hinted<'a> {
    naive: Naive,
    ct: &'a ChillTable,
    /// Groups whose value was chilled until [NextUse::Never].
    dead: Vec<bool>,
    /// For chilled groups, the earliest step at which they may be read.
    cold: Vec<Option<usize>>,
    discards: usize,
}

impl Regs for Hinted<'_> {
    fn read(&mut self, step: usize, g: GroupIdx) -> u64 {
        if self.dead[g.index()] {
            panic!("group {g} read at step {step} after being chilled forever");
        }
        if let Some(earliest) = self.cold[g.index()].take() {
            if step < earliest {
                panic!("group {g} read at step {step} but was chilled until step {earliest}");
            }
        }
        self.naive.read(step, g)
    }

    fn write(&mut self, g: GroupIdx, v: u64) {
        self.dead[g.index()] = false;
        self.cold[g.index()] = None;
        self.naive.write(g, v);
    }

    fn drop_value(&mut self, g: GroupIdx) {
        self.naive.drop_value(g);
    }

    fn after_inst(&mut self, step: usize, iidx: InstIdx) {
        let ct = self.ct;
        let at = ct.edition().aliases();
        let Some(h) = ct.hint(iidx) else {
            return;
        };
        for e in h.entries() {
            let g = at.group(VirtualRegister::gp(usize::from(e.idx), WidthMode::W64));
            match e.until {
                NextUse::Never => {
                    self.naive.drop_value(g);
                    self.dead[g.index()] = true;
                    self.discards += 1;
                }
                NextUse::In(n) => {
                    self.naive.evict(g);
                    self.cold[g.index()] = Some(step + usize::try_from(n.get()).unwrap());
                }
            }
        }
    }
}

enum Flow {
    Next,
    Jump(BlockIdx),
    Stop,
}

struct Machine<'a, R> {
    u: &'a Unit,
    regs: R,
    sp: u64,
    mem: HashMap<u64, u64>,
    events: Vec<Event>,
    step: usize,
}

impl<'a, R: Regs> Machine<'a, R> {
    fn new(u: &'a Unit, regs: R) -> Self {
        Self {
            u,
            regs,
            sp: 0x7fff_0000,
            mem: HashMap::new(),
            events: Vec::new(),
            step: 0,
        }
    }

    fn run(mut self) -> (Vec<Event>, R) {
        let u = self.u;
        let mut bidx = BlockIdx::from_usize(0);
        'blocks: while bidx.index() < u.blocks_len() {
            let mut next = bidx + 1;
            for (iidx, inst) in u.block_insts(bidx) {
                self.step += 1;
                if self.step > FUEL {
                    break 'blocks;
                }
                let flow = self.exec(inst);
                self.regs.after_inst(self.step, iidx);
                match flow {
                    Flow::Next => (),
                    Flow::Jump(target) => next = target,
                    Flow::Stop => break 'blocks,
                }
            }
            bidx = next;
        }
        (self.events, self.regs)
    }

    fn bitw(&self, reg: VirtualRegister) -> u32 {
        self.u.edition().reg_file().bitw(reg.width())
    }

    fn get(&mut self, reg: VirtualRegister) -> u64 {
        match reg {
            VirtualRegister::Sp => self.sp,
            VirtualRegister::Gp(..) => {
                let g = self.u.edition().aliases().group(reg);
                mask(self.regs.read(self.step, g), self.bitw(reg))
            }
        }
    }

    fn set(&mut self, reg: VirtualRegister, v: u64) {
        let g = self.u.edition().aliases().group(reg);
        self.regs.write(g, mask(v, self.bitw(reg)));
    }

    fn exec(&mut self, inst: &Inst) -> Flow {
        match inst {
            Inst::Const { dst, val } => self.set(*dst, *val),
            Inst::Mov { dst, src } => {
                let v = self.get(*src);
                self.set(*dst, v);
            }
            Inst::BinOp {
                dst,
                binop,
                lhs,
                rhs,
            } => {
                let l = self.get(*lhs);
                let r = self.get(*rhs);
                let v = match binop {
                    BinOp::Add => l.wrapping_add(r),
                    BinOp::Sub => l.wrapping_sub(r),
                    BinOp::Mul => l.wrapping_mul(r),
                    BinOp::And => l & r,
                    BinOp::Or => l | r,
                    BinOp::Xor => l ^ r,
                    BinOp::Shl => l.wrapping_shl((r & 63) as u32),
                    BinOp::LShr => l.wrapping_shr((r & 63) as u32),
                };
                self.set(*dst, v);
            }
            Inst::Load { dst, addr } => {
                let a = self.get(*addr);
                let v = self
                    .mem
                    .get(&a)
                    .copied()
                    .unwrap_or_else(|| a.wrapping_mul(0x9e3779b97f4a7c15));
                self.set(*dst, v);
            }
            Inst::Store { addr, val } => {
                let a = self.get(*addr);
                let v = self.get(*val);
                self.mem.insert(a, v);
                self.events.push(Event::Store(a, v));
            }
            Inst::SpAdd { off } => self.sp = self.sp.wrapping_add_signed(i64::from(*off)),
            Inst::Drop { reg } => {
                let g = self.u.edition().aliases().group(*reg);
                self.regs.drop_value(g);
            }
            Inst::BlackBox { reg } => {
                let v = self.get(*reg);
                self.events.push(Event::BlackBox(v));
            }
            Inst::Call { target, args, rtn } => {
                let vals = args.iter().map(|x| self.get(*x)).collect::<Vec<_>>();
                let v = vals.iter().fold(u64::from(*target), |acc, x| {
                    acc.rotate_left(7) ^ x.wrapping_add(0x51)
                });
                self.events.push(Event::Call(*target, vals));
                if let Some(rtn) = rtn {
                    self.set(*rtn, v);
                }
            }
            Inst::Br { target } => return Flow::Jump(*target),
            Inst::CondBr {
                cond,
                true_bb,
                false_bb,
            } => {
                if self.get(*cond) != 0 {
                    return Flow::Jump(*true_bb);
                }
                return Flow::Jump(*false_bb);
            }
            Inst::Return { val } => {
                let v = val.map(|x| self.get(x));
                self.events.push(Event::Return(v));
                return Flow::Stop;
            }
        }
        Flow::Next
    }
}

fn mask(v: u64, bitw: u32) -> u64 {
    if bitw >= 64 {
        v
    } else {
        v & ((1 << bitw) - 1)
    }
}

/// How many general purpose registers [arb_unit] uses. This is more than [NUM_PHYS] so that
/// the naive allocator has to spill.
const ARB_REGS: usize = 6;

/// One operation in a block: `(kind, reg a, reg b, extra)`.
type ArbOp = (u8, usize, usize, u8);
/// One block: `(ops, terminator kind, branch target, condition register)`.
type ArbBlock = (Vec<ArbOp>, u8, u8, usize);

/// Generate well-formed edition 0 units. Every register is written at the start of the unit.
/// Narrow writes only occur in short runs which read no more than was written and end with a
/// full width write, so every read is valid. Every block is reachable: each block but the last
/// either falls through or conditionally branches to its successor.
pub(crate) fn arb_unit() -> impl Strategy<Value = Unit> {
    let op = (0u8..11, 0..ARB_REGS, 0..ARB_REGS, any::<u8>());
    let block = (prop::collection::vec(op, 0..6), any::<u8>(), any::<u8>(), 0..ARB_REGS);
    prop::collection::vec(block, 1..6).prop_map(|blocks| arb_build(&blocks))
}

fn arb_build(blocks: &[ArbBlock]) -> Unit {
    const WIDTHS: [WidthMode; 5] = [
        WidthMode::W8,
        WidthMode::W16,
        WidthMode::W32,
        WidthMode::W64,
        WidthMode::Ptr,
    ];
    const BINOPS: [BinOp; 8] = [
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::And,
        BinOp::Or,
        BinOp::Xor,
        BinOp::Shl,
        BinOp::LShr,
    ];
    let rd = |idx: usize, x: u8| VirtualRegister::gp(idx, WIDTHS[usize::from(x % 5)]);
    let wr = |idx: usize, x: u8| {
        VirtualRegister::gp(
            idx,
            if x & 1 == 0 {
                WidthMode::W64
            } else {
                WidthMode::Ptr
            },
        )
    };

    let mut b = UnitBuilder::new("arb", Edition::ED0);
    for idx in 0..ARB_REGS {
        b.push(Inst::Const {
            dst: wr(idx, 0),
            val: u64::try_from(idx).unwrap() + 1,
        });
    }
    for (i, (ops, term, target, cond)) in blocks.iter().enumerate() {
        if i > 0 {
            b.start_block();
        }
        for &(kind, a, c, x) in ops {
            match kind {
                0 => {
                    b.push(Inst::Const {
                        dst: wr(a, x),
                        val: u64::from(x),
                    });
                }
                1 => {
                    b.push(Inst::Mov {
                        dst: wr(a, x),
                        src: rd(c, x >> 3),
                    });
                }
                2 => {
                    b.push(Inst::BinOp {
                        dst: wr(a, x),
                        binop: BINOPS[usize::from(x % 8)],
                        lhs: rd(a, x >> 1),
                        rhs: rd(c, x >> 4),
                    });
                }
                3 => {
                    b.push(Inst::Load {
                        dst: wr(a, x),
                        addr: rd(c, 3),
                    });
                }
                4 => {
                    b.push(Inst::Store {
                        addr: rd(a, 4),
                        val: rd(c, x),
                    });
                }
                5 => {
                    b.push(Inst::BlackBox { reg: rd(a, x) });
                }
                6 => {
                    b.push(Inst::Call {
                        target: u32::from(x),
                        args: smallvec![rd(a, x), rd(c, x >> 2)],
                        rtn: (x & 1 == 0).then(|| wr(c, x)),
                    });
                }
                7 => {
                    b.push(Inst::Drop { reg: wr(a, x) });
                    b.push(Inst::Const {
                        dst: wr(a, x),
                        val: u64::from(x) << 8,
                    });
                }
                8 => {
                    // Write the low 8, 16 or 32 bits, work on that many, then widen again.
                    let w = WIDTHS[usize::from(x % 3)];
                    let narrow = VirtualRegister::gp(a, w);
                    b.push(Inst::Const {
                        dst: narrow,
                        val: u64::from(x).wrapping_mul(0x0101_0101_0101),
                    });
                    b.push(Inst::BinOp {
                        dst: narrow,
                        binop: BINOPS[usize::from(x >> 3) % 8],
                        lhs: narrow,
                        rhs: narrow,
                    });
                    b.push(Inst::BlackBox {
                        reg: rd(a, (x >> 2) % (x % 3 + 1)),
                    });
                    b.push(Inst::Call {
                        target: u32::from(x),
                        args: smallvec![narrow],
                        rtn: Some(wr(a, x)),
                    });
                }
                9 => {
                    b.push(Inst::SpAdd {
                        off: i32::from(x) - 128,
                    });
                }
                _ => {
                    b.push(Inst::Mov {
                        dst: wr(a, 1),
                        src: VirtualRegister::Sp,
                    });
                }
            }
        }
        let target = BlockIdx::from_usize(usize::from(*target) % blocks.len());
        if i + 1 < blocks.len() {
            if term % 2 == 1 {
                b.push(Inst::CondBr {
                    cond: rd(*cond, 0),
                    true_bb: target,
                    false_bb: BlockIdx::from_usize(i + 1),
                });
            }
        } else {
            match term % 3 {
                0 => (),
                1 => {
                    b.push(Inst::Br { target });
                }
                _ => {
                    b.push(Inst::Return {
                        val: Some(rd(*cond, *term)),
                    });
                }
            }
        }
    }
    b.build()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        chill::{analyse, emit, ChillEntry, ChillHint},
        reg::RegClass,
    };

    fn hints(u: &Unit, min_chill_dist: u32) -> ChillTable {
        emit(u, &analyse(u).unwrap(), min_chill_dist)
    }

    #[test]
    fn all_agree() {
        let u = Unit::from_str(
            "
          bb0:
            r0.64 = const 5
            r1.64 = const 1
            r2.64 = const 0
            r3.64 = const 100
            r4.64 = const 7
            r5.64 = const 9
          bb1:
            r2.64 = add r2.64, r0.64
            r3.64 = xor r3.64, r2.64
            r0.64 = sub r0.64, r1.64
            condbr r0.8, bb1, bb2
          bb2:
            blackbox r4.64
            blackbox r3.32
            store r5.64, r2.64
            r5.64 = call @3(r4.16, r5.64)
            ret r5.64
        ",
        );
        let direct = run_direct(&u);
        assert_eq!(direct.last(), Some(&Event::Return(Some(direct_ret(&direct)))));
        let (naive, reloads) = run_naive(&u);
        assert_eq!(direct, naive);
        assert!(reloads > 0);
        for min_chill_dist in [1, 2, 4] {
            let (hinted, discards) = run_hinted(&u, &hints(&u, min_chill_dist));
            assert_eq!(direct, hinted);
            assert!(discards > 0);
        }
    }

    fn direct_ret(events: &[Event]) -> u64 {
        match events.iter().rev().nth(1) {
            Some(Event::Call(target, vals)) => vals.iter().fold(u64::from(*target), |acc, x| {
                acc.rotate_left(7) ^ x.wrapping_add(0x51)
            }),
            x => panic!("{x:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "chilled forever")]
    fn unsound_never_detected() {
        let u = Unit::from_str(
            "
          bb0:
            r0.64 = const 1
            blackbox r0.64
        ",
        );
        let entry = ChillEntry {
            class: RegClass::Gp,
            idx: 0,
            until: NextUse::Never,
        };
        let ct = ChillTable::new(
            Edition::ED0,
            2,
            vec![(InstIdx::from_usize(0), ChillHint::from_entries(smallvec![entry]))],
        );
        run_hinted(&u, &ct);
    }

    #[test]
    #[should_panic(expected = "chilled until step")]
    fn unsound_distance_detected() {
        let u = Unit::from_str(
            "
          bb0:
            r0.64 = const 1
            r1.64 = const 2
            blackbox r0.64
        ",
        );
        let entry = ChillEntry {
            class: RegClass::Gp,
            idx: 0,
            until: NextUse::in_dist(3).unwrap(),
        };
        let ct = ChillTable::new(
            Edition::ED0,
            3,
            vec![(InstIdx::from_usize(0), ChillHint::from_entries(smallvec![entry]))],
        );
        run_hinted(&u, &ct);
    }

    #[test]
    fn arb_narrow_runs() {
        let ops = vec![(8, 0, 0, 0), (8, 1, 0, 1), (8, 2, 0, 2), (5, 2, 0, 4)];
        let u = arb_build(&[(ops, 0, 0, 0)]);
        u.validate().unwrap();
        let s = u.to_string();
        for w in ["r0.8 = const", "r1.16 = const", "r2.32 = const", "r2.64 = call"] {
            assert!(s.contains(w), "{w} not in:\n{s}");
        }
        let direct = run_direct(&u);
        assert_eq!(run_naive(&u).0, direct);
        for min_chill_dist in [1, 3] {
            assert_eq!(run_hinted(&u, &hints(&u, min_chill_dist)).0, direct);
        }
    }

    proptest! {
        #[test]
        fn arb_units_are_valid(u in arb_unit()) {
            prop_assert_eq!(u.validate(), Ok(()));
        }

        #[test]
        fn hints_are_additive(u in arb_unit(), min_chill_dist in 1u32..6) {
            let direct = run_direct(&u);
            let (naive, _) = run_naive(&u);
            prop_assert_eq!(&direct, &naive);
            let (hinted, _) = run_hinted(&u, &hints(&u, min_chill_dist));
            prop_assert_eq!(&direct, &hinted);
        }
    }
}
