//! Control-flow and no-op cleanup
//!
//! Small structural rewrites: dropping redundant truthiness coercions,
//! `NOOP`s, jumps to the immediately following label, and code made
//! unreachable by earlier folds. Unreachable-code removal iterates with a
//! dead-label sweep so a collapsed conditional disappears entirely in one
//! optimizer run.

use liquidc_frontend::il::{Il, Instruction};
use rustc_hash::FxHashSet;

pub struct Cleanup;

impl Cleanup {
    pub fn new() -> Self {
        Self
    }

    /// `IS_TRUTHY` after an operator that already yields a boolean is a
    /// no-op.
    pub fn remove_redundant_is_truthy(&self, il: &mut Il) {
        let mut i = 1;
        while i < il.len() {
            let redundant = matches!(il.instructions[i], Instruction::IsTruthy)
                && matches!(
                    il.instructions[i - 1],
                    Instruction::Compare(_)
                        | Instruction::CaseCompare
                        | Instruction::Contains
                        | Instruction::BoolNot
                );
            if redundant {
                il.remove(i);
            } else {
                i += 1;
            }
        }
        il.debug_assert_coherent();
    }

    pub fn remove_noops(&self, il: &mut Il) {
        il.retain(|_, inst| !matches!(inst, Instruction::Noop));
        il.debug_assert_coherent();
    }

    /// `JUMP id` immediately followed by `LABEL id` falls through anyway.
    pub fn remove_jump_to_next_label(&self, il: &mut Il) {
        let mut i = 0;
        while i + 1 < il.len() {
            let dead = matches!(
                (&il.instructions[i], &il.instructions[i + 1]),
                (Instruction::Jump(t), Instruction::Label(id)) if t == id
            );
            if dead {
                il.remove(i);
            } else {
                i += 1;
            }
        }
        il.debug_assert_coherent();
    }

    /// Delete instructions that can never execute. After an unconditional
    /// `JUMP` or `HALT` everything up to the next `LABEL` is dead; labels
    /// no jump references are dead too, and removing one can expose more
    /// dead code, so the two sweeps run to a fixpoint together.
    pub fn remove_unreachable(&self, il: &mut Il) {
        loop {
            let mut changed = self.sweep_after_jumps(il);
            changed |= self.sweep_dead_labels(il);
            changed |= {
                let before = il.len();
                self.remove_jump_to_next_label(il);
                il.len() != before
            };
            if !changed {
                break;
            }
        }
        il.debug_assert_coherent();
    }

    fn sweep_after_jumps(&self, il: &mut Il) -> bool {
        let mut changed = false;
        let mut i = 0;
        while i < il.len() {
            if matches!(
                il.instructions[i],
                Instruction::Jump(_) | Instruction::Halt
            ) {
                let mut end = i + 1;
                while end < il.len() && !matches!(il.instructions[end], Instruction::Label(_)) {
                    end += 1;
                }
                if end > i + 1 {
                    for index in (i + 1..end).rev() {
                        il.remove(index);
                    }
                    changed = true;
                }
            }
            i += 1;
        }
        changed
    }

    fn sweep_dead_labels(&self, il: &mut Il) -> bool {
        let referenced: FxHashSet<u32> = il
            .instructions
            .iter()
            .filter_map(Instruction::jump_target)
            .collect();
        let before = il.len();
        il.retain(|_, inst| match inst {
            Instruction::Label(id) => referenced.contains(id),
            _ => true,
        });
        il.len() != before
    }
}

impl Default for Cleanup {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidc_frontend::il::{CompareOp, Span};
    use Instruction::*;

    fn il_of(insts: Vec<Instruction>) -> Il {
        let spans = vec![Span::default(); insts.len()];
        Il {
            instructions: insts,
            spans,
        }
    }

    #[test]
    fn test_is_truthy_after_compare_removed() {
        let cleanup = Cleanup::new();
        let mut il = il_of(vec![
            FindVar("a".into()),
            ConstInt(1),
            Compare(CompareOp::Eq),
            IsTruthy,
            JumpIfFalse(0),
            Label(0),
        ]);
        cleanup.remove_redundant_is_truthy(&mut il);
        assert!(!il.instructions.contains(&IsTruthy));
    }

    #[test]
    fn test_is_truthy_after_var_kept() {
        let cleanup = Cleanup::new();
        let before = vec![FindVar("a".into()), IsTruthy];
        let mut il = il_of(before.clone());
        cleanup.remove_redundant_is_truthy(&mut il);
        assert_eq!(il.instructions, before);
    }

    #[test]
    fn test_remove_noops() {
        let cleanup = Cleanup::new();
        let mut il = il_of(vec![Noop, Halt, Noop]);
        cleanup.remove_noops(&mut il);
        assert_eq!(il.instructions, vec![Halt]);
    }

    #[test]
    fn test_jump_to_next_label() {
        let cleanup = Cleanup::new();
        let mut il = il_of(vec![Jump(3), Label(3), Halt]);
        cleanup.remove_jump_to_next_label(&mut il);
        assert_eq!(il.instructions, vec![Label(3), Halt]);
    }

    #[test]
    fn test_jump_to_other_label_kept() {
        let cleanup = Cleanup::new();
        let before = vec![Jump(4), Label(3), Label(4), Halt];
        let mut il = il_of(before.clone());
        cleanup.remove_jump_to_next_label(&mut il);
        assert_eq!(il.instructions, before);
    }

    #[test]
    fn test_unreachable_after_jump() {
        let cleanup = Cleanup::new();
        let mut il = il_of(vec![
            Jump(1),
            WriteRaw("dead".into()),
            Label(1),
            Halt,
        ]);
        cleanup.remove_unreachable(&mut il);
        assert_eq!(il.instructions, vec![Halt]);
    }

    #[test]
    fn test_collapsed_branch_disappears_entirely() {
        // What pass 1 leaves behind for `{% if true %}yes{% else %}no{% endif %}`.
        let cleanup = Cleanup::new();
        let mut il = il_of(vec![
            WriteRaw("yes".into()),
            Jump(2),
            Label(1),
            WriteRaw("no".into()),
            Label(2),
            Halt,
        ]);
        cleanup.remove_unreachable(&mut il);
        assert_eq!(il.instructions, vec![WriteRaw("yes".into()), Halt]);
    }

    #[test]
    fn test_referenced_labels_survive() {
        let cleanup = Cleanup::new();
        let mut il = il_of(vec![
            FindVar("a".into()),
            JumpIfFalse(7),
            WriteRaw("x".into()),
            Label(7),
            Halt,
        ]);
        let before = il.clone();
        cleanup.remove_unreachable(&mut il);
        assert_eq!(il, before);
    }
}
