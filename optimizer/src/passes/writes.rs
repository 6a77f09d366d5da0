//! Raw-write coalescing
//!
//! Adjacent `WRITE_RAW`s concatenate into one emission; empty ones
//! disappear. Merging runs twice in the schedule because unreachable-code
//! removal can make previously separated writes adjacent.

use liquidc_frontend::il::{Il, Instruction};

pub struct WriteMerger;

impl WriteMerger {
    pub fn new() -> Self {
        Self
    }

    pub fn merge_raw_writes(&self, il: &mut Il) {
        let mut i = 0;
        while i + 1 < il.len() {
            let merged = match (&il.instructions[i], &il.instructions[i + 1]) {
                (Instruction::WriteRaw(a), Instruction::WriteRaw(b)) => {
                    Some(Instruction::WriteRaw(format!("{a}{b}")))
                }
                _ => None,
            };
            match merged {
                Some(inst) => il.replace(i, i + 1, vec![inst]),
                None => i += 1,
            }
        }
        il.debug_assert_coherent();
    }

    pub fn remove_empty_raw_writes(&self, il: &mut Il) {
        il.retain(|_, inst| !matches!(inst, Instruction::WriteRaw(s) if s.is_empty()));
        il.debug_assert_coherent();
    }
}

impl Default for WriteMerger {
    fn default() -> Self {
        Self::new()
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
    fn test_merge_run_of_writes() {
        let merger = WriteMerger::new();
        let mut il = il_of(vec![
            WriteRaw("a".into()),
            WriteRaw("b".into()),
            WriteRaw("c".into()),
            Halt,
        ]);
        merger.merge_raw_writes(&mut il);
        assert_eq!(il.instructions, vec![WriteRaw("abc".into()), Halt]);
    }

    #[test]
    fn test_merge_preserves_span_union() {
        let merger = WriteMerger::new();
        let mut il = Il::new();
        il.push(WriteRaw("a".into()), Span::new(0, 1));
        il.push(WriteRaw("b".into()), Span::new(5, 9));
        merger.merge_raw_writes(&mut il);
        assert_eq!(il.spans[0], Span::new(0, 9));
    }

    #[test]
    fn test_separated_writes_untouched() {
        let merger = WriteMerger::new();
        let before = vec![WriteRaw("a".into()), WriteValue, WriteRaw("b".into())];
        let mut il = il_of(before.clone());
        merger.merge_raw_writes(&mut il);
        assert_eq!(il.instructions, before);
    }

    #[test]
    fn test_empty_writes_removed() {
        let merger = WriteMerger::new();
        let mut il = il_of(vec![WriteRaw(String::new()), Halt]);
        merger.remove_empty_raw_writes(&mut il);
        assert_eq!(il.instructions, vec![Halt]);
    }
}
