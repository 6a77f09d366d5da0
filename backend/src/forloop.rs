//! Forloop and tablerowloop metadata
//!
//! Shared between the VM and lowered programs so the `forloop` object a
//! template observes is identical on both execution paths.

use liquidc_runtime::Value;

/// Per-loop bookkeeping for the active `for` nest, innermost last.
#[derive(Debug, Clone)]
pub struct ForloopMeta {
    pub name: String,
    pub length: usize,
    pub index0: usize,
}

/// Build the `forloop` value for the innermost loop, chaining
/// `parentloop` through the enclosing frames.
pub fn forloop_value(metas: &[ForloopMeta]) -> Value {
    let Some((current, parents)) = metas.split_last() else {
        return Value::Nil;
    };
    let length = current.length as i64;
    let index0 = current.index0 as i64;
    let mut pairs = vec![
        ("name".to_string(), Value::Str(current.name.clone())),
        ("length".to_string(), Value::Int(length)),
        ("index".to_string(), Value::Int(index0 + 1)),
        ("index0".to_string(), Value::Int(index0)),
        ("rindex".to_string(), Value::Int(length - index0)),
        ("rindex0".to_string(), Value::Int(length - index0 - 1)),
        ("first".to_string(), Value::Bool(index0 == 0)),
        ("last".to_string(), Value::Bool(index0 == length - 1)),
    ];
    if !parents.is_empty() {
        pairs.push(("parentloop".to_string(), forloop_value(parents)));
    }
    Value::Hash(pairs)
}

/// Build the `tablerowloop` value for one cell.
pub fn tablerowloop_value(length: usize, index0: usize, cols: usize) -> Value {
    let length_i = length as i64;
    let index = index0 as i64;
    let col0 = (index0 % cols) as i64;
    let row = (index0 / cols) as i64;
    let cols_i = cols.min(length.max(1)) as i64;
    Value::Hash(vec![
        ("length".to_string(), Value::Int(length_i)),
        ("index".to_string(), Value::Int(index + 1)),
        ("index0".to_string(), Value::Int(index)),
        ("col".to_string(), Value::Int(col0 + 1)),
        ("col0".to_string(), Value::Int(col0)),
        ("row".to_string(), Value::Int(row + 1)),
        ("first".to_string(), Value::Bool(index0 == 0)),
        ("last".to_string(), Value::Bool(index + 1 == length_i)),
        ("col_first".to_string(), Value::Bool(col0 == 0)),
        (
            "col_last".to_string(),
            Value::Bool(col0 + 1 == cols_i || index + 1 == length_i),
        ),
    ])
}
