//! Lookup-path collapsing
//!
//! Runs of constant key lookups collapse into a single path walk, and a
//! path walk rooted directly on a variable collapses into
//! `FIND_VAR_PATH`, which the scope can answer in one call.

use liquidc_frontend::il::{Il, Instruction};

pub struct PathCollapser;

impl PathCollapser {
    pub fn new() -> Self {
        Self
    }

    /// `LOOKUP_CONST_KEY k1 .. LOOKUP_CONST_KEY kn` (n >= 2) becomes
    /// `LOOKUP_CONST_PATH [k1..kn]`.
    pub fn collapse_const_paths(&self, il: &mut Il) {
        let mut i = 0;
        while i < il.len() {
            let mut end = i;
            while matches!(
                il.instructions.get(end),
                Some(Instruction::LookupConstKey(_))
            ) {
                end += 1;
            }
            let run = end - i;
            if run >= 2 {
                let keys: Vec<String> = il.instructions[i..end]
                    .iter()
                    .map(|inst| match inst {
                        Instruction::LookupConstKey(k) => k.clone(),
                        _ => unreachable!("run contains only const key lookups"),
                    })
                    .collect();
                il.replace(i, end - 1, vec![Instruction::LookupConstPath(keys)]);
            }
            i += 1;
        }
        il.debug_assert_coherent();
    }

    /// `FIND_VAR v; LOOKUP_CONST_PATH p` becomes `FIND_VAR_PATH v p`.
    pub fn collapse_find_var_paths(&self, il: &mut Il) {
        let mut i = 0;
        while i + 1 < il.len() {
            let collapsed = match (&il.instructions[i], &il.instructions[i + 1]) {
                (Instruction::FindVar(name), Instruction::LookupConstPath(keys)) => {
                    Some(Instruction::FindVarPath(name.clone(), keys.clone()))
                }
                _ => None,
            };
            match collapsed {
                Some(inst) => {
                    il.replace(i, i + 1, vec![inst]);
                    i += 1;
                }
                None => i += 1,
            }
        }
        il.debug_assert_coherent();
    }
}

impl Default for PathCollapser {
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
    fn test_collapse_key_run() {
        let collapser = PathCollapser::new();
        let mut il = il_of(vec![
            FindVar("a".into()),
            LookupConstKey("b".into()),
            LookupConstKey("c".into()),
            WriteValue,
        ]);
        collapser.collapse_const_paths(&mut il);
        assert_eq!(
            il.instructions,
            vec![
                FindVar("a".into()),
                LookupConstPath(vec!["b".into(), "c".into()]),
                WriteValue
            ]
        );
    }

    #[test]
    fn test_single_key_kept() {
        let collapser = PathCollapser::new();
        let before = vec![FindVar("a".into()), LookupConstKey("b".into())];
        let mut il = il_of(before.clone());
        collapser.collapse_const_paths(&mut il);
        assert_eq!(il.instructions, before);
    }

    #[test]
    fn test_collapse_into_find_var_path() {
        let collapser = PathCollapser::new();
        let mut il = il_of(vec![
            FindVar("a".into()),
            LookupConstPath(vec!["b".into(), "c".into()]),
        ]);
        collapser.collapse_find_var_paths(&mut il);
        assert_eq!(
            il.instructions,
            vec![FindVarPath("a".into(), vec!["b".into(), "c".into()])]
        );
    }

    #[test]
    fn test_path_on_dynamic_base_not_merged() {
        let collapser = PathCollapser::new();
        let before = vec![LookupKey, LookupConstPath(vec!["b".into(), "c".into()])];
        let mut il = il_of(before.clone());
        collapser.collapse_find_var_paths(&mut il);
        assert_eq!(il.instructions, before);
    }
}
