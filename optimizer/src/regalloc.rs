//! Temp-register allocation
//!
//! A forward pass that rewrites parser-assigned temp slots onto a minimal
//! set of physical slots. A slot is reclaimed at its last load; freed
//! slots are reissued smallest-first, which keeps allocation
//! deterministic. Re-defining an already-mapped temp keeps its physical
//! slot, which is what makes stores under conditional control flow safe.

use crate::liveness::Liveness;
use liquidc_frontend::il::{Il, Instruction};
use rustc_hash::{FxHashMap, FxHashSet};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Allocation {
    /// Maximum number of simultaneously live physical slots.
    pub peak_usage: usize,
    /// Physical slots handed out in total.
    pub slots_allocated: usize,
}

pub fn allocate(il: &mut Il) -> Allocation {
    let liveness = Liveness::analyze(il);

    let mut available: Vec<u32> = Vec::new();
    let mut next_slot: u32 = 0;
    let mut temp_to_slot: FxHashMap<u32, u32> = FxHashMap::default();
    let mut live: FxHashSet<u32> = FxHashSet::default();
    let mut peak = 0usize;

    for index in 0..il.instructions.len() {
        let temp_op = match &il.instructions[index] {
            Instruction::StoreTemp(t) => Some((true, *t)),
            Instruction::LoadTemp(t) => Some((false, *t)),
            _ => None,
        };
        match temp_op {
            Some((true, temp)) => {
                let physical = match temp_to_slot.get(&temp) {
                    // Re-definition: the temp keeps its slot.
                    Some(&slot) => slot,
                    None => {
                        let slot = if available.is_empty() {
                            let s = next_slot;
                            next_slot += 1;
                            s
                        } else {
                            available.remove(0)
                        };
                        temp_to_slot.insert(temp, slot);
                        slot
                    }
                };
                il.instructions[index] = Instruction::StoreTemp(physical);
                live.insert(temp);
                peak = peak.max(live.len());
            }
            Some((false, temp)) => {
                let physical = match temp_to_slot.get(&temp) {
                    Some(&slot) => slot,
                    // A load before any store reads nil; give it a slot so
                    // the rewrite stays total.
                    None => {
                        let slot = if available.is_empty() {
                            let s = next_slot;
                            next_slot += 1;
                            s
                        } else {
                            available.remove(0)
                        };
                        temp_to_slot.insert(temp, slot);
                        slot
                    }
                };
                il.instructions[index] = Instruction::LoadTemp(physical);
                if liveness.last_use(temp) == Some(index) {
                    // Sorted re-insertion keeps reissue order deterministic.
                    let at = available.partition_point(|&s| s < physical);
                    available.insert(at, physical);
                    live.remove(&temp);
                }
            }
            _ => {}
        }
    }

    Allocation {
        peak_usage: peak,
        slots_allocated: next_slot as usize,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidc_frontend::il::Span;
    use Instruction::*;

    fn il_of(insts: Vec<Instruction>) -> Il {
        let spans = vec![Span::default(); insts.len()];
        Il {
            instructions: insts,
            spans,
        }
    }

    #[test]
    fn test_sequential_temps_share_one_slot() {
        // Two assignments with disjoint live ranges.
        let mut il = il_of(vec![
            ConstInt(1),
            StoreTemp(0),
            LoadTemp(0),
            Assign("a".into()),
            ConstInt(2),
            StoreTemp(1),
            LoadTemp(1),
            Assign("b".into()),
            Halt,
        ]);
        let allocation = allocate(&mut il);
        assert_eq!(allocation.peak_usage, 1);
        assert_eq!(allocation.slots_allocated, 1);
        assert_eq!(il.instructions[5], StoreTemp(0));
        assert_eq!(il.instructions[6], LoadTemp(0));
    }

    #[test]
    fn test_overlapping_temps_get_distinct_slots() {
        let mut il = il_of(vec![
            ConstInt(1),
            StoreTemp(0),
            ConstInt(2),
            StoreTemp(1),
            LoadTemp(0),
            LoadTemp(1),
            Halt,
        ]);
        let allocation = allocate(&mut il);
        assert_eq!(allocation.peak_usage, 2);
        assert_eq!(il.instructions[1], StoreTemp(0));
        assert_eq!(il.instructions[3], StoreTemp(1));
    }

    #[test]
    fn test_freed_slot_reissued_smallest_first() {
        let mut il = il_of(vec![
            StoreTemp(0),
            StoreTemp(1),
            LoadTemp(0), // frees physical 0
            StoreTemp(2), // must reuse physical 0
            LoadTemp(1),
            LoadTemp(2),
        ]);
        allocate(&mut il);
        assert_eq!(il.instructions[3], StoreTemp(0));
    }

    #[test]
    fn test_redefinition_keeps_slot() {
        // The same temp stored on both sides of a branch keeps one slot.
        let mut il = il_of(vec![
            StoreTemp(7),
            StoreTemp(7),
            LoadTemp(7),
        ]);
        let allocation = allocate(&mut il);
        assert_eq!(allocation.slots_allocated, 1);
        assert_eq!(il.instructions[0], StoreTemp(0));
        assert_eq!(il.instructions[1], StoreTemp(0));
    }

    #[test]
    fn test_peak_matches_max_concurrent_liveness() {
        let mut il = il_of(vec![
            StoreTemp(0),
            StoreTemp(1),
            StoreTemp(2),
            LoadTemp(0),
            LoadTemp(1),
            LoadTemp(2),
            StoreTemp(3),
            LoadTemp(3),
        ]);
        let allocation = allocate(&mut il);
        assert_eq!(allocation.peak_usage, 3);
        assert_eq!(allocation.slots_allocated, 3);
    }
}
