//! Temp-slot liveness
//!
//! One backward pass recording, for every temp slot, the index of its
//! final `LOAD_TEMP`. Slots that are stored but never loaded are pruned;
//! the allocator treats them as pinned.

use liquidc_frontend::il::{Il, Instruction};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Default)]
pub struct Liveness {
    last_use: FxHashMap<u32, usize>,
}

impl Liveness {
    pub fn analyze(il: &Il) -> Self {
        let mut last_use = FxHashMap::default();
        for (index, inst) in il.instructions.iter().enumerate().rev() {
            if let Instruction::LoadTemp(slot) = inst {
                // Scanning backward, the first load seen is the last use.
                last_use.entry(*slot).or_insert(index);
            }
        }
        Self { last_use }
    }

    pub fn last_use(&self, slot: u32) -> Option<usize> {
        self.last_use.get(&slot).copied()
    }

    /// True when `slot` holds no value anyone will read after `index`.
    pub fn dead_after(&self, slot: u32, index: usize) -> bool {
        match self.last_use.get(&slot) {
            Some(&use_index) => index >= use_index,
            None => true,
        }
    }

    /// Slots still carrying a value somebody reads after `index`.
    pub fn live_at(&self, index: usize) -> Vec<u32> {
        let mut live: Vec<u32> = self
            .last_use
            .iter()
            .filter(|(_, &use_index)| use_index > index)
            .map(|(&slot, _)| slot)
            .collect();
        live.sort_unstable();
        live
    }

    pub fn tracked_slots(&self) -> usize {
        self.last_use.len()
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
    fn test_last_use_is_final_load() {
        let il = il_of(vec![
            ConstInt(1),
            StoreTemp(0),
            LoadTemp(0),
            LoadTemp(0),
            Halt,
        ]);
        let liveness = Liveness::analyze(&il);
        assert_eq!(liveness.last_use(0), Some(3));
        assert!(!liveness.dead_after(0, 2));
        assert!(liveness.dead_after(0, 3));
    }

    #[test]
    fn test_store_without_load_pruned() {
        let il = il_of(vec![ConstInt(1), StoreTemp(5), Halt]);
        let liveness = Liveness::analyze(&il);
        assert_eq!(liveness.last_use(5), None);
        assert!(liveness.dead_after(5, 0));
        assert_eq!(liveness.tracked_slots(), 0);
    }

    #[test]
    fn test_live_at() {
        let il = il_of(vec![
            ConstInt(1),
            StoreTemp(0),
            ConstInt(2),
            StoreTemp(1),
            LoadTemp(0),
            LoadTemp(1),
            Halt,
        ]);
        let liveness = Liveness::analyze(&il);
        assert_eq!(liveness.live_at(3), vec![0, 1]);
        assert_eq!(liveness.live_at(4), vec![1]);
        assert_eq!(liveness.live_at(5), Vec::<u32>::new());
    }
}
