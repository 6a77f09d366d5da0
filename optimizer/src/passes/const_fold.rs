//! Constant folding
//!
//! Three related rewrites: boolean/comparison operators applied to
//! constants, whitelisted filters applied to constant inputs, and
//! constant writes turned into raw output. Every fold either produces a
//! provably equivalent replacement or leaves the stream untouched; a
//! failed comparison or filter application is a non-event.

use liquidc_frontend::il::{Il, Instruction};
use liquidc_runtime::{FilterRegistry, Value};

/// Filters proven safe to run at compile time. Everything else keeps its
/// runtime call, whatever its arguments look like.
pub const FOLDABLE_FILTERS: &[&str] = &[
    "append",
    "prepend",
    "capitalize",
    "downcase",
    "upcase",
    "size",
    "plus",
    "minus",
    "times",
    "divided_by",
    "modulo",
    "abs",
    "ceil",
    "floor",
    "round",
    "at_least",
    "at_most",
    "strip",
    "lstrip",
    "rstrip",
    "strip_newlines",
    "newline_to_br",
    "escape",
    "escape_once",
    "url_encode",
    "url_decode",
    "remove",
    "remove_first",
    "replace",
    "replace_first",
    "slice",
    "truncate",
    "truncatewords",
    "default",
    "json",
    "t",
    "base64_encode",
    "base64_decode",
    "base64_url_safe_encode",
    "base64_url_safe_decode",
];

pub struct ConstFolder {
    registry: FilterRegistry,
}

impl ConstFolder {
    pub fn new() -> Self {
        Self {
            registry: FilterRegistry::new(),
        }
    }

    /// Fold constant operands of `IS_TRUTHY`, `BOOL_NOT`, conditional
    /// jumps, comparisons, `CASE_COMPARE`, and `CONTAINS`.
    pub fn fold_const_ops(&self, il: &mut Il) {
        let mut i = 0;
        while i < il.len() {
            match self.try_fold_op(il, i) {
                Some((end, with)) => {
                    il.replace(i, end, with);
                    // A fold can expose a new pattern just before it.
                    i = i.saturating_sub(2);
                }
                None => i += 1,
            }
        }
        il.debug_assert_coherent();
    }

    fn try_fold_op(&self, il: &Il, i: usize) -> Option<(usize, Vec<Instruction>)> {
        let insts = &il.instructions;
        let first = insts[i].as_const()?;

        // Two constants feeding a binary predicate.
        if let (Some(second), Some(op)) = (
            insts.get(i + 1).and_then(|inst| inst.as_const()),
            insts.get(i + 2),
        ) {
            let lhs = Value::from(&first);
            let rhs = Value::from(&second);
            let result = match op {
                Instruction::Compare(op) => lhs.compare(*op, &rhs).ok()?,
                Instruction::CaseCompare => lhs.case_eq(&rhs),
                Instruction::Contains => lhs.contains(&rhs).ok()?,
                _ => return None,
            };
            return Some((i + 2, vec![bool_const(result)]));
        }

        // One constant feeding a unary operator or conditional jump.
        let truthy = Value::from(&first).is_truthy();
        match insts.get(i + 1)? {
            Instruction::IsTruthy => Some((i + 1, vec![bool_const(truthy)])),
            Instruction::BoolNot => Some((i + 1, vec![bool_const(!truthy)])),
            Instruction::JumpIfFalse(target) => {
                if truthy {
                    Some((i + 1, vec![]))
                } else {
                    Some((i + 1, vec![Instruction::Jump(*target)]))
                }
            }
            Instruction::JumpIfTrue(target) => {
                if truthy {
                    Some((i + 1, vec![Instruction::Jump(*target)]))
                } else {
                    Some((i + 1, vec![]))
                }
            }
            _ => None,
        }
    }

    /// Apply whitelisted filters whose input and arguments are all
    /// compile-time constants, replacing the producer run and the call
    /// with a single constant.
    pub fn fold_const_filters(&self, il: &mut Il) {
        let mut i = 0;
        while i < il.len() {
            let folded = match &il.instructions[i] {
                Instruction::CallFilter { name, argc }
                    if FOLDABLE_FILTERS.contains(&name.as_str()) =>
                {
                    self.try_fold_filter(il, i, *argc as usize, name.clone())
                }
                _ => None,
            };
            match folded {
                Some((start, replacement)) => {
                    il.replace(start, i, vec![replacement]);
                    i = start + 1;
                }
                None => i += 1,
            }
        }
        il.debug_assert_coherent();
    }

    fn try_fold_filter(
        &self,
        il: &Il,
        call: usize,
        argc: usize,
        name: String,
    ) -> Option<(usize, Instruction)> {
        let mut values: Vec<Value> = Vec::with_capacity(argc + 1);
        let mut pos = call;
        for _ in 0..argc + 1 {
            let (start, value) = collect_producer(il, pos)?;
            values.push(value);
            pos = start;
        }
        values.reverse();
        let (input, args) = values.split_first()?;
        let result = self.registry.apply(&name, input, args).ok()?;
        let constant = result.to_const()?;
        Some((pos, Instruction::from_const(&constant)))
    }

    /// `CONST x; WRITE_VALUE` becomes `WRITE_RAW` with the formatted
    /// output string.
    pub fn fold_const_writes(&self, il: &mut Il) {
        let mut i = 0;
        while i + 1 < il.len() {
            let formatted = match (&il.instructions[i], &il.instructions[i + 1]) {
                (inst, Instruction::WriteValue) => inst
                    .as_const()
                    .map(|c| Value::from(&c).to_output()),
                _ => None,
            };
            match formatted {
                Some(text) => {
                    il.replace(i, i + 1, vec![Instruction::WriteRaw(text)]);
                    i += 1;
                }
                None => i += 1,
            }
        }
        il.debug_assert_coherent();
    }
}

impl Default for ConstFolder {
    fn default() -> Self {
        Self::new()
    }
}

fn bool_const(b: bool) -> Instruction {
    if b {
        Instruction::ConstTrue
    } else {
        Instruction::ConstFalse
    }
}

/// A producer group ending just before `end`: a single constant opcode,
/// or a `BUILD_HASH` backed entirely by constant producers, recursively.
/// Returns the group's start index and its value.
fn collect_producer(il: &Il, end: usize) -> Option<(usize, Value)> {
    let idx = end.checked_sub(1)?;
    match &il.instructions[idx] {
        Instruction::BuildHash(n) => {
            let mut pairs = Vec::with_capacity(*n as usize);
            let mut pos = idx;
            for _ in 0..*n {
                let (value_start, value) = collect_producer(il, pos)?;
                let (key_start, key) = collect_producer(il, value_start)?;
                let Value::Str(key) = key else { return None };
                pairs.push((key, value));
                pos = key_start;
            }
            pairs.reverse();
            Some((pos, Value::Hash(pairs)))
        }
        inst => {
            let c = inst.as_const()?;
            Some((idx, Value::from(&c)))
        }
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
    fn test_fold_truthy_const() {
        let folder = ConstFolder::new();
        let mut il = il_of(vec![ConstTrue, IsTruthy, Halt]);
        folder.fold_const_ops(&mut il);
        assert_eq!(il.instructions, vec![ConstTrue, Halt]);
    }

    #[test]
    fn test_empty_and_blank_are_falsy() {
        let folder = ConstFolder::new();
        let mut il = il_of(vec![ConstEmpty, IsTruthy, ConstBlank, IsTruthy]);
        folder.fold_const_ops(&mut il);
        assert_eq!(il.instructions, vec![ConstFalse, ConstFalse]);
    }

    #[test]
    fn test_fold_conditional_jump_taken() {
        let folder = ConstFolder::new();
        let mut il = il_of(vec![ConstFalse, JumpIfFalse(9), Halt]);
        folder.fold_const_ops(&mut il);
        assert_eq!(il.instructions, vec![Jump(9), Halt]);
    }

    #[test]
    fn test_fold_conditional_jump_erased() {
        let folder = ConstFolder::new();
        let mut il = il_of(vec![ConstTrue, JumpIfFalse(9), Halt]);
        folder.fold_const_ops(&mut il);
        assert_eq!(il.instructions, vec![Halt]);
    }

    #[test]
    fn test_fold_comparison_cascades_into_jump() {
        let folder = ConstFolder::new();
        let mut il = il_of(vec![
            ConstInt(1),
            ConstInt(2),
            Compare(CompareOp::Lt),
            JumpIfTrue(4),
            Halt,
        ]);
        folder.fold_const_ops(&mut il);
        assert_eq!(il.instructions, vec![Jump(4), Halt]);
    }

    #[test]
    fn test_compare_type_error_bails_silently() {
        let folder = ConstFolder::new();
        let before = vec![
            ConstInt(1),
            ConstString("a".into()),
            Compare(CompareOp::Lt),
            Halt,
        ];
        let mut il = il_of(before.clone());
        folder.fold_const_ops(&mut il);
        assert_eq!(il.instructions, before);
    }

    #[test]
    fn test_fold_filter_chain() {
        let folder = ConstFolder::new();
        let mut il = il_of(vec![
            ConstString("a".into()),
            CallFilter {
                name: "upcase".into(),
                argc: 0,
            },
            ConstString("B".into()),
            CallFilter {
                name: "append".into(),
                argc: 1,
            },
            WriteValue,
            Halt,
        ]);
        folder.fold_const_filters(&mut il);
        assert_eq!(
            il.instructions,
            vec![ConstString("AB".into()), WriteValue, Halt]
        );
    }

    #[test]
    fn test_filter_with_variable_input_left_alone() {
        let folder = ConstFolder::new();
        let before = vec![
            FindVar("x".into()),
            CallFilter {
                name: "upcase".into(),
                argc: 0,
            },
        ];
        let mut il = il_of(before.clone());
        folder.fold_const_filters(&mut il);
        assert_eq!(il.instructions, before);
    }

    #[test]
    fn test_filter_error_left_alone() {
        let folder = ConstFolder::new();
        let before = vec![
            ConstInt(1),
            ConstInt(0),
            CallFilter {
                name: "divided_by".into(),
                argc: 1,
            },
        ];
        let mut il = il_of(before.clone());
        folder.fold_const_filters(&mut il);
        assert_eq!(il.instructions, before);
    }

    #[test]
    fn test_filter_with_hash_args_folds() {
        let folder = ConstFolder::new();
        let mut il = il_of(vec![
            ConstString("key".into()),
            ConstString("count".into()),
            ConstInt(2),
            BuildHash(1),
            CallFilter {
                name: "t".into(),
                argc: 1,
            },
        ]);
        folder.fold_const_filters(&mut il);
        assert_eq!(il.instructions, vec![ConstString("key".into())]);
    }

    #[test]
    fn test_non_whitelisted_filter_not_folded() {
        let folder = ConstFolder::new();
        let before = vec![
            ConstString("a,b".into()),
            ConstString(",".into()),
            CallFilter {
                name: "split".into(),
                argc: 1,
            },
        ];
        let mut il = il_of(before.clone());
        folder.fold_const_filters(&mut il);
        assert_eq!(il.instructions, before);
    }

    #[test]
    fn test_fold_const_write() {
        let folder = ConstFolder::new();
        let mut il = il_of(vec![ConstFloat(2.0), WriteValue, ConstNil, WriteValue]);
        folder.fold_const_writes(&mut il);
        assert_eq!(
            il.instructions,
            vec![WriteRaw("2.0".into()), WriteRaw("".into())]
        );
    }
}
