//! liquidc optimizer - peephole and dataflow passes over template IL
//!
//! The optimizer runs a fixed schedule of local rewrites over the
//! `(instructions, spans)` pair, then hands the stream back for linking.
//! Passes never fail: anything a rewrite cannot prove safe is left
//! exactly as it was. Temp-register allocation lives here too, driven by
//! the backward liveness scan.
//!
//! # Pass schedule
//!
//! 1. fold_const_ops
//! 2. fold_const_filters
//! 3. fold_const_writes
//! 4. collapse_const_paths
//! 5. collapse_find_var_paths
//! 6. remove_redundant_is_truthy
//! 7. remove_noops
//! 8. remove_jump_to_next_label
//! 9. merge_raw_writes
//! 10. remove_unreachable
//! 11. merge_raw_writes (again, for adjacencies pass 10 created)
//! 12. fold_const_captures
//! 13. remove_empty_raw_writes

pub mod effects;
pub mod liveness;
pub mod passes;
pub mod regalloc;

pub use effects::{classify, ControlFlow, Effect, EffectTable};
pub use liveness::Liveness;
pub use passes::{CaptureFolder, Cleanup, ConstFolder, PathCollapser, WriteMerger, FOLDABLE_FILTERS};
pub use regalloc::{allocate, Allocation};

use liquidc_frontend::il::Il;
use tracing::debug;

/// Coordinates the pass schedule.
pub struct Optimizer {
    const_fold: ConstFolder,
    paths: PathCollapser,
    cleanup: Cleanup,
    writes: WriteMerger,
    capture: CaptureFolder,
}

impl Optimizer {
    pub fn new() -> Self {
        Self {
            const_fold: ConstFolder::new(),
            paths: PathCollapser::new(),
            cleanup: Cleanup::new(),
            writes: WriteMerger::new(),
            capture: CaptureFolder::new(),
        }
    }

    /// Run every pass in order, in place. Idempotent: a second run finds
    /// nothing left to rewrite.
    pub fn optimize(&self, il: &mut Il) {
        let before = il.len();

        self.const_fold.fold_const_ops(il);
        self.const_fold.fold_const_filters(il);
        self.const_fold.fold_const_writes(il);
        self.paths.collapse_const_paths(il);
        self.paths.collapse_find_var_paths(il);
        self.cleanup.remove_redundant_is_truthy(il);
        self.cleanup.remove_noops(il);
        self.cleanup.remove_jump_to_next_label(il);
        self.writes.merge_raw_writes(il);
        self.cleanup.remove_unreachable(il);
        self.writes.merge_raw_writes(il);
        self.capture.fold_const_captures(il);
        self.writes.remove_empty_raw_writes(il);

        il.debug_assert_coherent();
        debug!(
            instructions_before = before,
            instructions_after = il.len(),
            "optimization complete"
        );
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidc_frontend::il::{Instruction, Span};
    use Instruction::*;

    fn il_of(insts: Vec<Instruction>) -> Il {
        let spans = vec![Span::default(); insts.len()];
        Il {
            instructions: insts,
            spans,
        }
    }

    #[test]
    fn test_constant_branch_reduces_to_taken_arm() {
        // {% if true %}yes{% else %}no{% endif %}
        let mut il = il_of(vec![
            ConstTrue,
            IsTruthy,
            JumpIfFalse(1),
            WriteRaw("yes".into()),
            Jump(2),
            Label(1),
            WriteRaw("no".into()),
            Label(2),
            Halt,
        ]);
        Optimizer::new().optimize(&mut il);
        assert_eq!(il.instructions, vec![WriteRaw("yes".into()), Halt]);
    }

    #[test]
    fn test_optimizer_is_idempotent_on_branches() {
        let source = vec![
            ConstFalse,
            IsTruthy,
            JumpIfFalse(1),
            WriteRaw("yes".into()),
            Jump(2),
            Label(1),
            WriteRaw("no".into()),
            Label(2),
            Halt,
        ];
        let optimizer = Optimizer::new();
        let mut once = il_of(source);
        optimizer.optimize(&mut once);
        let mut twice = once.clone();
        optimizer.optimize(&mut twice);
        assert_eq!(once, twice);
        assert_eq!(once.instructions, vec![WriteRaw("no".into()), Halt]);
    }

    #[test]
    fn test_spans_stay_in_lockstep() {
        let mut il = il_of(vec![
            ConstString("a".into()),
            CallFilter {
                name: "upcase".into(),
                argc: 0,
            },
            WriteValue,
            Halt,
        ]);
        Optimizer::new().optimize(&mut il);
        assert_eq!(il.instructions.len(), il.spans.len());
        assert_eq!(il.instructions, vec![WriteRaw("A".into()), Halt]);
    }
}
