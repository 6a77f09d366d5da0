//! Constant capture folding
//!
//! A capture whose body reduced to nothing but raw writes is just a
//! string assignment; the buffer machinery can go. The region may contain
//! labels (left over from folded conditionals) and nested balanced
//! captures, but any other instruction aborts the match.

use liquidc_frontend::il::{Il, Instruction};

pub struct CaptureFolder;

impl CaptureFolder {
    pub fn new() -> Self {
        Self
    }

    pub fn fold_const_captures(&self, il: &mut Il) {
        let mut i = 0;
        while i < il.len() {
            if matches!(il.instructions[i], Instruction::PushCapture) {
                if let Some((end, text)) = self.match_region(il, i) {
                    il.replace(i, end, vec![Instruction::ConstString(text)]);
                }
            }
            i += 1;
        }
        il.debug_assert_coherent();
    }

    /// Match `PUSH_CAPTURE .. POP_CAPTURE` at `start` whose body is only
    /// top-level raw writes, labels, and nested balanced captures, with an
    /// assignment right after. Returns the POP_CAPTURE index and the
    /// concatenated top-level text.
    fn match_region(&self, il: &Il, start: usize) -> Option<(usize, String)> {
        let mut depth = 1usize;
        let mut text = String::new();
        let mut i = start + 1;
        let end = loop {
            match il.instructions.get(i)? {
                Instruction::WriteRaw(s) => {
                    if depth == 1 {
                        text.push_str(s);
                    }
                }
                Instruction::Label(_) => {}
                Instruction::PushCapture => depth += 1,
                Instruction::PopCapture => {
                    depth -= 1;
                    if depth == 0 {
                        break i;
                    }
                }
                _ => return None,
            }
            i += 1;
        };
        match il.instructions.get(end + 1)? {
            Instruction::Assign(_) | Instruction::AssignLocal(_) => Some((end, text)),
            _ => None,
        }
    }
}

impl Default for CaptureFolder {
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
    fn test_fold_simple_capture() {
        let folder = CaptureFolder::new();
        let mut il = il_of(vec![
            PushCapture,
            WriteRaw("hi".into()),
            PopCapture,
            Assign("x".into()),
            Halt,
        ]);
        folder.fold_const_captures(&mut il);
        assert_eq!(
            il.instructions,
            vec![ConstString("hi".into()), Assign("x".into()), Halt]
        );
    }

    #[test]
    fn test_fold_multiple_writes_and_labels() {
        let folder = CaptureFolder::new();
        let mut il = il_of(vec![
            PushCapture,
            WriteRaw("a".into()),
            Label(3),
            WriteRaw("b".into()),
            PopCapture,
            AssignLocal("x".into()),
        ]);
        folder.fold_const_captures(&mut il);
        assert_eq!(
            il.instructions,
            vec![ConstString("ab".into()), AssignLocal("x".into())]
        );
    }

    #[test]
    fn test_dynamic_body_not_folded() {
        let folder = CaptureFolder::new();
        let before = vec![
            PushCapture,
            FindVar("v".into()),
            WriteValue,
            PopCapture,
            Assign("x".into()),
        ];
        let mut il = il_of(before.clone());
        folder.fold_const_captures(&mut il);
        assert_eq!(il.instructions, before);
    }

    #[test]
    fn test_capture_without_assignment_not_folded() {
        let folder = CaptureFolder::new();
        // An ifchanged body also starts with PUSH_CAPTURE but ends in
        // IFCHANGED_CHECK, which must not fold.
        let before = vec![
            PushCapture,
            WriteRaw("x".into()),
            IfchangedCheck(0),
        ];
        let mut il = il_of(before.clone());
        folder.fold_const_captures(&mut il);
        assert_eq!(il.instructions, before);
    }
}
