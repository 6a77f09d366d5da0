//! Optimization pipeline coverage
//!
//! End-to-end checks over parsed templates: the canonical post-
//! optimization shapes, idempotence, span coherence, link validity, and
//! agreement between the constant folder and the runtime filter registry.

use liquidc_frontend::il::{link, Il, Instruction, Span};
use liquidc_frontend::parse;
use liquidc_optimizer::{allocate, ConstFolder, Optimizer, FOLDABLE_FILTERS};
use liquidc_runtime::{FilterRegistry, Value};
use Instruction::*;

fn optimized(source: &str) -> Il {
    let mut il = parse(source).unwrap();
    Optimizer::new().optimize(&mut il);
    il
}

#[test]
fn test_plain_output_shape() {
    let il = optimized("Hello {{ name }}");
    assert_eq!(
        il.instructions,
        vec![
            WriteRaw("Hello ".into()),
            FindVar("name".into()),
            WriteValue,
            Halt
        ]
    );
}

#[test]
fn test_filter_chain_folds_to_single_write() {
    let il = optimized("{{ 'a' | upcase | append: 'B' }}");
    assert_eq!(il.instructions, vec![WriteRaw("AB".into()), Halt]);
}

#[test]
fn test_constant_conditional_folds_to_taken_branch() {
    let il = optimized("{% if true %}yes{% else %}no{% endif %}");
    assert_eq!(il.instructions, vec![WriteRaw("yes".into()), Halt]);

    let il = optimized("{% if false %}yes{% else %}no{% endif %}");
    assert_eq!(il.instructions, vec![WriteRaw("no".into()), Halt]);
}

#[test]
fn test_constant_capture_folds_to_assignment() {
    let il = optimized("{% capture x %}hi{% endcapture %}{{ x }}");
    assert_eq!(
        il.instructions,
        vec![
            ConstString("hi".into()),
            Assign("x".into()),
            FindVar("x".into()),
            WriteValue,
            Halt
        ]
    );
}

#[test]
fn test_deep_path_collapses_to_find_var_path() {
    let il = optimized("{{ a.b.c.d }}");
    assert_eq!(
        il.instructions,
        vec![
            FindVarPath("a".into(), vec!["b".into(), "c".into(), "d".into()]),
            WriteValue,
            Halt
        ]
    );
}

#[test]
fn test_two_key_path_stays_single_lookup() {
    let il = optimized("{{ a.b }}");
    assert_eq!(
        il.instructions,
        vec![FindVar("a".into()), LookupConstKey("b".into()), WriteValue, Halt]
    );
}

#[test]
fn test_adjacent_raw_text_merges() {
    let il = optimized("a{% if true %}b{% endif %}c");
    assert_eq!(il.instructions, vec![WriteRaw("abc".into()), Halt]);
}

#[test]
fn test_register_allocation_packs_sequential_assigns() {
    let mut il = optimized("{% assign a = 1 %}{% assign b = 2 %}{{ a }}{{ b }}");
    let allocation = allocate(&mut il);
    assert_eq!(allocation.peak_usage, 1);
    assert_eq!(allocation.slots_allocated, 1);
    // Both assignments landed on physical slot 0.
    let stores: Vec<_> = il
        .instructions
        .iter()
        .filter_map(|inst| match inst {
            StoreTemp(s) => Some(*s),
            _ => None,
        })
        .collect();
    assert_eq!(stores, vec![0, 0]);
}

#[test]
fn test_optimizer_idempotent_across_templates() {
    let sources = [
        "Hello {{ name }}",
        "{{ 'a' | upcase | append: 'B' }}",
        "{% if true %}yes{% else %}no{% endif %}",
        "{% if x %}a{% elsif y %}b{% else %}c{% endif %}",
        "{% for i in (1..3) %}{{ i }}{% endfor %}",
        "{% for i in items %}{% if i > 2 %}{{ i }}{% break %}{% endif %}{% endfor %}",
        "{% capture x %}hi{% endcapture %}{{ x }}",
        "{% case x %}{% when 1 %}a{% when 2, 3 %}b{% else %}c{% endcase %}",
        "{% unless user %}anon{% endunless %}",
        "{% cycle 'a', 'b' %}{% increment c %}",
        "{% tablerow i in items cols: 2 %}{{ i }}{% endtablerow %}",
        "{% if a and b or c %}x{% endif %}",
    ];
    let optimizer = Optimizer::new();
    for source in sources {
        let mut once = parse(source).unwrap();
        optimizer.optimize(&mut once);
        let mut twice = once.clone();
        optimizer.optimize(&mut twice);
        assert_eq!(once, twice, "optimizer not idempotent for {source:?}");
    }
}

#[test]
fn test_spans_coherent_after_optimization() {
    let sources = [
        "Hello {{ name }}",
        "{{ 'a' | upcase }}{{ 1 | plus: 2 }}",
        "{% if true %}yes{% endif %}tail",
        "{% for i in (1..3) %}{{ i }}{% endfor %}",
    ];
    for source in sources {
        let il = optimized(source);
        assert_eq!(il.instructions.len(), il.spans.len(), "{source:?}");
    }
}

#[test]
fn test_every_jump_lands_on_a_label_after_linking() {
    let sources = [
        "{% if x %}a{% else %}b{% endif %}",
        "{% for i in items %}{{ i }}{% else %}none{% endfor %}",
        "{% case x %}{% when 1 %}a{% else %}b{% endcase %}",
        "{% if a and b %}x{% endif %}",
        "{% for i in items %}{% continue %}{% endfor %}",
    ];
    for source in sources {
        let mut il = optimized(source);
        link(&mut il).unwrap();
        for inst in &il.instructions {
            if let Some(target) = inst.jump_target() {
                assert!(
                    matches!(il.instructions[target as usize], Label(_)),
                    "jump in {source:?} points at {:?}",
                    il.instructions[target as usize]
                );
            }
        }
    }
}

#[test]
fn test_fold_agrees_with_registry_on_whitelist() {
    let registry = FilterRegistry::new();
    let folder = ConstFolder::new();
    // One representative constant input set per arity.
    let samples: &[(&str, Vec<Instruction>)] = &[
        ("upcase", vec![ConstString("ab".into())]),
        ("capitalize", vec![ConstString("ab cd".into())]),
        ("size", vec![ConstString("abc".into())]),
        ("abs", vec![ConstInt(-4)]),
        ("ceil", vec![ConstFloat(1.2)]),
        ("strip", vec![ConstString("  x  ".into())]),
        ("escape", vec![ConstString("<b>".into())]),
        ("url_encode", vec![ConstString("a b".into())]),
        ("base64_encode", vec![ConstString("hi".into())]),
        ("json", vec![ConstInt(3)]),
        ("plus", vec![ConstInt(1), ConstInt(2)]),
        ("minus", vec![ConstInt(5), ConstInt(2)]),
        ("divided_by", vec![ConstInt(7), ConstInt(2)]),
        ("modulo", vec![ConstInt(-7), ConstInt(3)]),
        ("at_least", vec![ConstInt(1), ConstInt(5)]),
        ("append", vec![ConstString("a".into()), ConstString("b".into())]),
        ("remove", vec![ConstString("aba".into()), ConstString("b".into())]),
        ("truncate", vec![ConstString("hello world".into()), ConstInt(7)]),
        ("default", vec![ConstNil, ConstInt(9)]),
        (
            "replace",
            vec![
                ConstString("aba".into()),
                ConstString("b".into()),
                ConstString("c".into()),
            ],
        ),
        (
            "slice",
            vec![ConstString("liquid".into()), ConstInt(1), ConstInt(3)],
        ),
    ];

    for (name, producers) in samples {
        assert!(
            FOLDABLE_FILTERS.contains(name),
            "{name} missing from whitelist"
        );
        let argc = (producers.len() - 1) as u8;
        let mut insts = producers.clone();
        insts.push(CallFilter {
            name: (*name).to_string(),
            argc,
        });
        let spans = vec![Span::default(); insts.len()];
        let mut il = Il {
            instructions: insts,
            spans,
        };
        folder.fold_const_filters(&mut il);

        let values: Vec<Value> = producers
            .iter()
            .map(|p| Value::from(&p.as_const().unwrap()))
            .collect();
        let expected = registry
            .apply(name, &values[0], &values[1..])
            .expect("sample inputs must be valid");

        assert_eq!(
            il.instructions.len(),
            1,
            "{name} did not fold to a single constant"
        );
        let folded = Value::from(&il.instructions[0].as_const().unwrap());
        assert!(
            folded.loose_eq(&expected),
            "{name}: folded {folded:?} != applied {expected:?}"
        );
    }
}

#[test]
fn test_fold_leaves_il_unchanged_on_filter_error() {
    let il = optimized("{{ 10 | divided_by: 0 }}");
    assert!(il
        .instructions
        .iter()
        .any(|inst| matches!(inst, CallFilter { name, .. } if name == "divided_by")));
}

#[test]
fn test_loop_shape_survives_optimization() {
    let il = optimized("{% for i in (1..3) %}{{ i }}{% endfor %}");
    // The doubled collection expression and the loop skeleton must all
    // survive for lowering to recognize the pattern.
    assert_eq!(il.instructions[0], ConstRange(1, 3));
    assert!(matches!(il.instructions[1], JumpIfEmpty(_)));
    assert_eq!(il.instructions[2], ConstRange(1, 3));
    assert!(matches!(il.instructions[3], ForInit { .. }));
    assert!(il.instructions.contains(&ForNext));
    assert!(il.instructions.contains(&ForEnd));
}
