//! Per-instruction effect analysis
//!
//! Classifies every opcode with the facts the optimizer needs to reason
//! about code motion and elimination: what it reads and writes, whether it
//! emits output, and whether it is a barrier nothing may move across.
//! Classification is stateless; there is no cross-instruction inference.

use liquidc_frontend::il::{Il, Instruction};
use smallvec::{smallvec, SmallVec};

/// Control-flow role of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlFlow {
    None,
    Label,
    Jump,
    CondJump,
    LoopInit,
    LoopNext,
    LoopEnd,
    Halt,
}

/// Effect record for a single instruction.
#[derive(Debug, Clone)]
pub struct Effect {
    pub reads_vars: SmallVec<[String; 1]>,
    pub writes_vars: SmallVec<[String; 1]>,
    pub reads_stack: u8,
    pub writes_stack: u8,
    pub reads_scope: bool,
    pub writes_scope: bool,
    pub produces_output: bool,
    pub control_flow: ControlFlow,
    pub has_side_effects: bool,
    pub barrier: bool,
}

impl Default for Effect {
    /// Conservative default: anything unclassified is a side-effecting
    /// barrier.
    fn default() -> Self {
        Effect {
            reads_vars: SmallVec::new(),
            writes_vars: SmallVec::new(),
            reads_stack: 0,
            writes_stack: 0,
            reads_scope: false,
            writes_scope: false,
            produces_output: false,
            control_flow: ControlFlow::None,
            has_side_effects: true,
            barrier: true,
        }
    }
}

impl Effect {
    fn pure_stack(reads: u8, writes: u8) -> Self {
        Effect {
            reads_stack: reads,
            writes_stack: writes,
            has_side_effects: false,
            barrier: false,
            ..Effect::default()
        }
    }

    /// No observable effect at all: safe to delete if its stack outputs
    /// are unused, safe to reorder among other pure instructions.
    pub fn pure(&self) -> bool {
        !self.has_side_effects
            && !self.produces_output
            && self.writes_vars.is_empty()
            && !self.writes_scope
            && !self.barrier
    }

    /// Pure and scope-independent: may move across scope boundaries.
    pub fn hoistable(&self) -> bool {
        self.pure() && !self.reads_scope && self.control_flow == ControlFlow::None
    }
}

/// Classify one instruction.
pub fn classify(inst: &Instruction) -> Effect {
    use Instruction::*;
    match inst {
        ConstNil | ConstTrue | ConstFalse | ConstInt(_) | ConstFloat(_) | ConstString(_)
        | ConstRange(_, _) | ConstEmpty | ConstBlank => Effect::pure_stack(0, 1),

        FindVar(name) => Effect {
            reads_vars: smallvec![name.clone()],
            reads_scope: true,
            ..Effect::pure_stack(0, 1)
        },
        FindVarPath(name, _) => Effect {
            reads_vars: smallvec![name.clone()],
            reads_scope: true,
            ..Effect::pure_stack(0, 1)
        },
        // The looked-up name is unknowable, so any reordering could change
        // which variable is observed.
        FindVarDynamic => Effect {
            reads_scope: true,
            reads_stack: 1,
            writes_stack: 1,
            has_side_effects: false,
            barrier: true,
            ..Effect::default()
        },
        LookupKey => Effect::pure_stack(2, 1),
        LookupConstKey(_) | LookupConstPath(_) | LookupCommand(_) => Effect::pure_stack(1, 1),

        WriteRaw(_) => Effect {
            produces_output: true,
            has_side_effects: false,
            barrier: false,
            ..Effect::default()
        },
        WriteValue => Effect {
            reads_stack: 1,
            produces_output: true,
            has_side_effects: false,
            barrier: false,
            ..Effect::default()
        },
        WriteVar(name) | WriteVarPath(name, _) => Effect {
            reads_vars: smallvec![name.clone()],
            reads_scope: true,
            produces_output: true,
            has_side_effects: false,
            barrier: false,
            ..Effect::default()
        },

        Compare(_) | CaseCompare | Contains => Effect::pure_stack(2, 1),
        BoolNot | IsTruthy => Effect::pure_stack(1, 1),
        NewRange => Effect::pure_stack(2, 1),

        // Filters may reach into global state, so folding them is opt-in
        // via the whitelist rather than effect-driven.
        CallFilter { argc, .. } => Effect {
            reads_stack: argc.saturating_add(1),
            writes_stack: 1,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },

        Label(_) => Effect {
            control_flow: ControlFlow::Label,
            has_side_effects: false,
            barrier: false,
            ..Effect::default()
        },
        Jump(_) => Effect {
            control_flow: ControlFlow::Jump,
            has_side_effects: false,
            barrier: false,
            ..Effect::default()
        },
        JumpIfFalse(_) | JumpIfTrue(_) | JumpIfEmpty(_) => Effect {
            reads_stack: 1,
            control_flow: ControlFlow::CondJump,
            has_side_effects: false,
            barrier: false,
            ..Effect::default()
        },
        JumpIfInterrupt(_) => Effect {
            reads_scope: true,
            control_flow: ControlFlow::CondJump,
            has_side_effects: false,
            barrier: false,
            ..Effect::default()
        },
        Halt => Effect {
            control_flow: ControlFlow::Halt,
            has_side_effects: false,
            barrier: true,
            ..Effect::default()
        },

        PushScope | PopScope => Effect {
            writes_scope: true,
            has_side_effects: true,
            barrier: true,
            ..Effect::default()
        },
        Assign(name) | AssignLocal(name) => Effect {
            writes_vars: smallvec![name.clone()],
            writes_scope: true,
            reads_stack: 1,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        Increment(name) | Decrement(name) => Effect {
            writes_vars: smallvec![name.clone()],
            produces_output: true,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        PushCapture => Effect {
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        PopCapture => Effect {
            writes_stack: 1,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        PushInterrupt(_) => Effect {
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        PopInterrupt => Effect {
            writes_stack: 1,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        StoreTemp(_) => Effect::pure_stack(1, 0),
        LoadTemp(_) => Effect::pure_stack(0, 1),
        Dup => Effect::pure_stack(1, 2),
        Pop => Effect::pure_stack(1, 0),
        BuildHash(n) => Effect::pure_stack(((*n as u32) * 2).min(255) as u8, 1),
        // Reads and updates its per-site snapshot register.
        IfchangedCheck(_) => Effect {
            reads_scope: true,
            writes_scope: true,
            produces_output: true,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        Noop => Effect {
            has_side_effects: false,
            barrier: false,
            ..Effect::default()
        },

        ForInit { var, .. } => Effect {
            writes_vars: smallvec![var.clone()],
            reads_stack: 1,
            writes_scope: true,
            control_flow: ControlFlow::LoopInit,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        ForNext => Effect {
            writes_stack: 1,
            writes_scope: true,
            control_flow: ControlFlow::LoopNext,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        ForEnd => Effect {
            writes_scope: true,
            control_flow: ControlFlow::LoopEnd,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        PushForloop | PopForloop => Effect {
            writes_scope: true,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        TablerowInit { var, .. } => Effect {
            writes_vars: smallvec![var.clone()],
            reads_stack: 1,
            writes_scope: true,
            produces_output: true,
            control_flow: ControlFlow::LoopInit,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        TablerowNext => Effect {
            writes_stack: 1,
            writes_scope: true,
            produces_output: true,
            control_flow: ControlFlow::LoopNext,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        TablerowEnd => Effect {
            writes_scope: true,
            produces_output: true,
            control_flow: ControlFlow::LoopEnd,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },

        CycleStep { .. } => Effect {
            produces_output: true,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },
        CycleStepVar { name_var, .. } => Effect {
            reads_vars: smallvec![name_var.clone()],
            reads_scope: true,
            produces_output: true,
            has_side_effects: true,
            barrier: false,
            ..Effect::default()
        },

        RenderPartial(_) | IncludePartial(_) | ConstRender(_) | ConstInclude(_) => Effect {
            reads_scope: true,
            produces_output: true,
            has_side_effects: true,
            barrier: true,
            ..Effect::default()
        },
    }
}

/// Effect records for a whole instruction stream, with inclusive range
/// queries. Rebuild after any pass that reorders instructions.
pub struct EffectTable {
    effects: Vec<Effect>,
}

impl EffectTable {
    pub fn build(il: &Il) -> Self {
        Self {
            effects: il.instructions.iter().map(classify).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Effect> {
        self.effects.get(index)
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    fn range(&self, start: usize, end: usize) -> &[Effect] {
        let end = end.min(self.effects.len().saturating_sub(1));
        if start > end {
            return &[];
        }
        &self.effects[start..=end]
    }

    /// Any variable or scope write in `[start, end]`.
    pub fn writes_in_range(&self, start: usize, end: usize) -> bool {
        self.range(start, end)
            .iter()
            .any(|e| !e.writes_vars.is_empty() || e.writes_scope)
    }

    /// Any variable or scope read in `[start, end]`.
    pub fn reads_in_range(&self, start: usize, end: usize) -> bool {
        self.range(start, end)
            .iter()
            .any(|e| !e.reads_vars.is_empty() || e.reads_scope)
    }

    pub fn any_barrier_in_range(&self, start: usize, end: usize) -> bool {
        self.range(start, end).iter().any(|e| e.barrier)
    }

    pub fn any_side_effect_in_range(&self, start: usize, end: usize) -> bool {
        self.range(start, end).iter().any(|e| e.has_side_effects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidc_frontend::il::Span;

    #[test]
    fn test_constants_are_hoistable() {
        let e = classify(&Instruction::ConstInt(1));
        assert!(e.pure());
        assert!(e.hoistable());
        assert_eq!(e.writes_stack, 1);
    }

    #[test]
    fn test_find_var_is_pure_but_not_hoistable() {
        let e = classify(&Instruction::FindVar("x".into()));
        assert!(e.pure());
        assert!(!e.hoistable());
        assert_eq!(e.reads_vars.as_slice(), ["x".to_string()]);
    }

    #[test]
    fn test_dynamic_find_var_is_barrier() {
        let e = classify(&Instruction::FindVarDynamic);
        assert!(e.barrier);
        assert!(!e.pure());
    }

    #[test]
    fn test_filter_stack_delta() {
        let e = classify(&Instruction::CallFilter {
            name: "plus".into(),
            argc: 2,
        });
        assert_eq!(e.reads_stack, 3);
        assert_eq!(e.writes_stack, 1);
        assert!(e.has_side_effects);
        assert!(!e.barrier);
    }

    #[test]
    fn test_partials_and_scopes_are_barriers() {
        for inst in [
            Instruction::PushScope,
            Instruction::PopScope,
            Instruction::Halt,
            Instruction::RenderPartial(liquidc_frontend::il::PartialCall::new("p", vec![])),
        ] {
            assert!(classify(&inst).barrier, "{inst} should be a barrier");
        }
    }

    #[test]
    fn test_ifchanged_is_not_a_barrier() {
        let e = classify(&Instruction::IfchangedCheck(0));
        assert!(!e.barrier);
        assert!(e.reads_scope && e.writes_scope);
    }

    #[test]
    fn test_temp_ops_are_pure() {
        assert!(classify(&Instruction::StoreTemp(0)).pure());
        assert!(classify(&Instruction::LoadTemp(0)).pure());
        assert!(classify(&Instruction::BuildHash(2)).pure());
    }

    #[test]
    fn test_range_queries() {
        let mut il = Il::new();
        let s = Span::default();
        il.push(Instruction::ConstInt(1), s);
        il.push(Instruction::Assign("x".into()), s);
        il.push(Instruction::ConstInt(2), s);
        il.push(Instruction::Halt, s);

        let table = EffectTable::build(&il);
        assert!(table.writes_in_range(0, 3));
        assert!(!table.writes_in_range(2, 2));
        assert!(table.any_side_effect_in_range(0, 1));
        assert!(!table.any_side_effect_in_range(2, 2));
        assert!(table.any_barrier_in_range(0, 3));
        assert!(!table.any_barrier_in_range(0, 2));
    }
}
