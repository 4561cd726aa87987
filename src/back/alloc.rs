//! Linear-scan register allocation with a move-coalescing remap pass.
//!
//! Two passes precede the scan itself: [`live_ranges`] computes each
//! virtual register's `[firstUse, lastUse]` interval, and [`coalesce_map`]
//! finds register-to-register `Mov`s that can share a physical register
//! with their source. The scan itself (`allocate`) then walks the
//! instruction stream once, acquiring and releasing from a fixed pool as
//! virtual registers come into and go out of scope.

use crate::back::x86::{BaseRegister, Frame, Instruction, Register, GENERAL_REGS};
use crate::common::{CompileError, Map, Result};

/// The allocation pool: which `GENERAL_REGS` slots are currently assigned.
struct RegPool {
    used: [bool; GENERAL_REGS.len()],
}

impl RegPool {
    fn new() -> Self {
        RegPool { used: [false; GENERAL_REGS.len()] }
    }

    fn acquire(&mut self) -> Result<BaseRegister> {
        for (i, taken) in self.used.iter_mut().enumerate() {
            if !*taken {
                *taken = true;
                return Ok(GENERAL_REGS[i]);
            }
        }
        Err(CompileError::no_free_registers("all general-purpose registers are live"))
    }

    fn release(&mut self, base: BaseRegister) -> Result<()> {
        let idx = GENERAL_REGS
            .iter()
            .position(|&r| r == base)
            .ok_or_else(|| CompileError::invalid_operand(format!("{base} is not an allocation-pool register")))?;
        if !self.used[idx] {
            return Err(CompileError::invalid_operand(format!("{base} released while not held")));
        }
        self.used[idx] = false;
        Ok(())
    }
}

/// One left-to-right pass recording, for every virtual register id, the
/// first and last instruction position it appears in (as either operand).
fn live_ranges(frame: &Frame) -> (Map<u32, usize>, Map<u32, usize>) {
    let mut first_use = Map::new();
    let mut last_use = Map::new();
    for (i, ins) in frame.instructions.iter().enumerate() {
        for reg in [ins.src_register(), ins.dst_register()].into_iter().flatten() {
            if let Some(v) = reg.as_virtual() {
                first_use.entry(v.id).or_insert(i);
                last_use.insert(v.id, i);
            }
        }
    }
    (first_use, last_use)
}

/// Find `Mov`s whose destination is a virtual register never seen before
/// (as a source, anywhere in the frame, up to this point) and whose
/// source is already a virtual register: map `dst -> canonical source`,
/// chasing an existing mapping for the source so chains collapse to one
/// representative id.
fn coalesce_map(frame: &Frame) -> Map<u32, u32> {
    let mut remap: Map<u32, u32> = Map::new();
    let mut ever_used_as_src: std::collections::BTreeSet<u32> = Default::default();
    for ins in &frame.instructions {
        let src_v = ins.src_register().and_then(|r| r.as_virtual());
        if let Some(s) = src_v {
            ever_used_as_src.insert(s.id);
        }
        if let Instruction::Mov { dst, .. } = ins {
            if let Some(d) = dst.as_virtual() {
                if !ever_used_as_src.contains(&d.id) {
                    if let Some(s) = src_v {
                        let canonical = *remap.get(&s.id).unwrap_or(&s.id);
                        remap.insert(d.id, canonical);
                    }
                }
            }
        }
    }
    remap
}

/// Widen a coalesced pair's combined live range: the canonical id's
/// interval must cover the eliminated id's interval too.
fn widen_for_coalescing(first_use: &mut Map<u32, usize>, last_use: &mut Map<u32, usize>, remap: &Map<u32, u32>) {
    for (&eliminated, &canonical) in remap {
        if let (Some(&prev_first), Some(&canon_first)) = (first_use.get(&eliminated), first_use.get(&canonical)) {
            first_use.insert(canonical, prev_first.min(canon_first));
        }
        if let (Some(&prev_last), Some(&canon_last)) = (last_use.get(&eliminated), last_use.get(&canonical)) {
            last_use.insert(canonical, prev_last.max(canon_last));
        }
    }
}

fn resolve(remap: &Map<u32, u32>, id: u32) -> u32 {
    *remap.get(&id).unwrap_or(&id)
}

fn assign(pool: &mut RegPool, assignment: &mut Map<u32, BaseRegister>, first_use: &Map<u32, usize>, id: u32, i: usize) -> Result<BaseRegister> {
    if first_use.get(&id) == Some(&i) {
        assignment.insert(id, pool.acquire()?);
    }
    if !assignment.contains_key(&id) {
        assignment.insert(id, pool.acquire()?);
    }
    Ok(assignment[&id])
}

fn release_if_last(pool: &mut RegPool, assignment: &Map<u32, BaseRegister>, last_use: &Map<u32, usize>, id: u32, i: usize) -> Result<()> {
    if last_use.get(&id) == Some(&i) {
        if let Some(&base) = assignment.get(&id) {
            pool.release(base)?;
        }
    }
    Ok(())
}

/// Assign every virtual register in `frame` to a physical one, returning a
/// new frame with identical instruction count and order.
#[tracing::instrument(skip_all, fields(frame = %frame.name))]
pub fn allocate(frame: &Frame) -> Result<Frame> {
    let (mut first_use, mut last_use) = live_ranges(frame);
    let remap = coalesce_map(frame);
    widen_for_coalescing(&mut first_use, &mut last_use, &remap);

    let mut pool = RegPool::new();
    let mut assignment: Map<u32, BaseRegister> = Map::new();
    let mut instructions = Vec::with_capacity(frame.instructions.len());

    // src is processed before dst; no instruction this pipeline lowers ever
    // puts the same vreg id in both slots, so processing order here never
    // double-acquires a single id's register within one instruction.
    for (i, ins) in frame.instructions.iter().enumerate() {
        let mut ins = ins.clone();

        if let Some(v) = ins.src_register().and_then(|r| r.as_virtual()) {
            let id = resolve(&remap, v.id);
            let base = assign(&mut pool, &mut assignment, &first_use, id, i)?;
            ins.set_src_register(Register::hardcoded(base, v.size));
            tracing::trace!(vreg = id, reg = %base, "acquired for src");
            release_if_last(&mut pool, &assignment, &last_use, id, i)?;
        }
        if let Some(v) = ins.dst_register().and_then(|r| r.as_virtual()) {
            let id = resolve(&remap, v.id);
            let base = assign(&mut pool, &mut assignment, &first_use, id, i)?;
            ins.set_dst_register(Register::hardcoded(base, v.size));
            tracing::trace!(vreg = id, reg = %base, "acquired for dst");
            release_if_last(&mut pool, &assignment, &last_use, id, i)?;
        }

        instructions.push(ins);
    }

    Ok(Frame { name: frame.name, instructions, size: frame.size })
}

pub fn allocate_program(frames: &[Frame]) -> Result<Vec<Frame>> {
    frames.iter().map(allocate).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::back::x86::VirtualRegister;
    use crate::common::Id;

    fn vreg(id: u32, size: u8) -> Register {
        Register::Virtual(VirtualRegister { id, size })
    }

    #[test]
    fn assigns_disjoint_registers_to_overlapping_live_ranges() {
        let frame = Frame {
            name: Id::new("f".to_string()),
            size: 0,
            instructions: vec![
                Instruction::LoadI { dst: vreg(0, 4), value: 1 },
                Instruction::LoadI { dst: vreg(1, 4), value: 2 },
                Instruction::Add { dst: vreg(0, 4), src: vreg(1, 4) },
            ],
        };
        let allocated = allocate(&frame).unwrap();
        assert_eq!(allocated.instructions.len(), frame.instructions.len());
        let Instruction::Add { dst, src } = &allocated.instructions[2] else { panic!() };
        assert_ne!(dst, src, "two simultaneously-live vregs must not share a physical register");
        for ins in &allocated.instructions {
            assert!(ins.src_register().map_or(true, |r| r.as_virtual().is_none()));
            assert!(ins.dst_register().map_or(true, |r| r.as_virtual().is_none()));
        }
    }

    #[test]
    fn coalesces_a_move_into_its_source() {
        // v1 = v0 (a fresh Mov never used as a src before this point) should
        // share v0's physical register rather than acquiring a second one.
        let frame = Frame {
            name: Id::new("f".to_string()),
            size: 0,
            instructions: vec![
                Instruction::LoadI { dst: vreg(0, 4), value: 7 },
                Instruction::Mov { dst: vreg(1, 4), src: vreg(0, 4) },
                Instruction::Add { dst: vreg(2, 4), src: vreg(1, 4) },
            ],
        };
        let allocated = allocate(&frame).unwrap();
        let Instruction::Mov { dst, src } = &allocated.instructions[1] else { panic!() };
        assert_eq!(dst, src, "coalesced move should become a same-register no-op");
    }

    #[test]
    fn exhausting_the_pool_is_a_fatal_error() {
        let mut instructions = Vec::new();
        // Nine distinct vregs alive at once exceeds the eight-register pool.
        for id in 0..9 {
            instructions.push(Instruction::LoadI { dst: vreg(id, 4), value: id as i32 });
        }
        let uses: Vec<Register> = (0..9).map(|id| vreg(id, 4)).collect();
        instructions.push(Instruction::Add { dst: uses[0], src: uses[8] });
        for u in &uses[1..8] {
            instructions.push(Instruction::Add { dst: uses[0], src: *u });
        }
        let frame = Frame { name: Id::new("f".to_string()), size: 0, instructions };
        assert!(allocate(&frame).is_err());
    }
}
