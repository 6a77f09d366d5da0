//! Parser edge cases
//!
//! Structural properties of the emitted IL over awkward inputs: nesting,
//! dangling tags, span bookkeeping, and stack balance of the jump shapes.

use liquidc_frontend::il::{link, Instruction};
use liquidc_frontend::{parse, ParseError};

#[test]
fn test_deeply_nested_blocks_stay_balanced() {
    let mut source = String::new();
    for _ in 0..40 {
        source.push_str("{% if a %}{% for i in (1..2) %}");
    }
    source.push('x');
    for _ in 0..40 {
        source.push_str("{% endfor %}{% endif %}");
    }
    let mut il = parse(&source).unwrap();
    // Every jump resolves, even forty blocks deep.
    link(&mut il).unwrap();

    let inits = il
        .instructions
        .iter()
        .filter(|i| matches!(i, Instruction::ForInit { .. }))
        .count();
    let ends = il
        .instructions
        .iter()
        .filter(|i| matches!(i, Instruction::ForEnd))
        .count();
    assert_eq!(inits, 40);
    assert_eq!(inits, ends);
}

#[test]
fn test_scope_pairs_are_balanced() {
    let il = parse("{% capture a %}{% ifchanged %}x{% endifchanged %}{% endcapture %}").unwrap();
    let pushes = il
        .instructions
        .iter()
        .filter(|i| matches!(i, Instruction::PushCapture))
        .count();
    let pops = il
        .instructions
        .iter()
        .filter(|i| {
            matches!(
                i,
                Instruction::PopCapture | Instruction::IfchangedCheck(_)
            )
        })
        .count();
    assert_eq!(pushes, pops);
}

#[test]
fn test_elsif_chain() {
    let mut il =
        parse("{% if a %}1{% elsif b %}2{% elsif c %}3{% else %}4{% endif %}").unwrap();
    link(&mut il).unwrap();
    let conditions = il
        .instructions
        .iter()
        .filter(|i| matches!(i, Instruction::JumpIfFalse(_)))
        .count();
    assert_eq!(conditions, 3);
}

#[test]
fn test_mismatched_close_tag() {
    assert!(matches!(
        parse("{% if a %}{% endfor %}"),
        Err(ParseError::UnexpectedTag { .. })
    ));
}

#[test]
fn test_stray_close_tag() {
    assert!(matches!(
        parse("{% endif %}"),
        Err(ParseError::UnexpectedTag { .. })
    ));
}

#[test]
fn test_error_offsets_point_into_source() {
    let source = "abcdef {{ ] }}";
    let err = parse(source).unwrap_err();
    assert!(err.offset() >= 7 && err.offset() < source.len());
}

#[test]
fn test_raw_block_hides_tags() {
    let il = parse("{% raw %}{% if a %}{{ b }}{% endraw %}").unwrap();
    assert_eq!(
        il.instructions,
        vec![
            Instruction::WriteRaw("{% if a %}{{ b }}".into()),
            Instruction::Halt
        ]
    );
}

#[test]
fn test_spans_are_monotonic_per_segment() {
    let il = parse("a{{ b }}c{% assign d = 1 %}e").unwrap();
    assert_eq!(il.instructions.len(), il.spans.len());
    let mut last_start = 0;
    for span in &il.spans {
        assert!(span.start >= last_start, "span starts went backwards");
        last_start = span.start;
    }
}

#[test]
fn test_empty_template_is_just_halt() {
    let il = parse("").unwrap();
    assert_eq!(il.instructions, vec![Instruction::Halt]);
}

#[test]
fn test_conditional_jump_shapes_link() {
    // All four condition forms resolve their labels.
    for source in [
        "{% if a %}x{% endif %}",
        "{% if a and b %}x{% endif %}",
        "{% if a or b and c %}x{% endif %}",
        "{% case a %}{% when 1 or 2 %}x{% endcase %}",
    ] {
        let mut il = parse(source).unwrap();
        link(&mut il).unwrap();
        for inst in &il.instructions {
            if let Some(target) = inst.jump_target() {
                assert!(matches!(
                    il.instructions[target as usize],
                    Instruction::Label(_)
                ));
            }
        }
    }
}
