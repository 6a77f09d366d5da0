//! Runtime value model
//!
//! One sum type covers everything a template can touch at render time.
//! The comparison, truthiness, and formatting rules here are shared by the
//! constant folder, the stack VM, and lowered programs, which is what
//! keeps the three in agreement.

use liquidc_frontend::il::{CommandOp, CompareOp, Const};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("cannot compare {0} with {1}")]
    Incomparable(&'static str, &'static str),

    #[error("'contains' is not supported on {0}")]
    BadContains(&'static str),

    #[error("cannot build a range from {0}")]
    BadRangeBound(&'static str),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<Value>),
    /// Association list; hash literals are small and iteration order is
    /// part of the observable output.
    Hash(Vec<(String, Value)>),
    Range(i64, i64),
    Empty,
    Blank,
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Hash(_) => "hash",
            Value::Range(_, _) => "range",
            Value::Empty => "empty",
            Value::Blank => "blank",
        }
    }

    /// Liquid truthiness: only nil and false are falsy; the empty and
    /// blank sentinels are treated as falsy when tested directly.
    pub fn is_truthy(&self) -> bool {
        !matches!(
            self,
            Value::Nil | Value::Bool(false) | Value::Empty | Value::Blank
        )
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    fn is_empty_value(&self) -> bool {
        match self {
            Value::Str(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Hash(h) => h.is_empty(),
            _ => false,
        }
    }

    fn is_blank_value(&self) -> bool {
        match self {
            Value::Nil | Value::Bool(false) => true,
            Value::Str(s) => s.chars().all(char::is_whitespace),
            Value::Array(a) => a.is_empty(),
            Value::Hash(h) => h.is_empty(),
            _ => false,
        }
    }

    /// Loose equality with numeric coercion and sentinel handling.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Empty, v) | (v, Value::Empty) if !matches!(v, Value::Empty | Value::Blank) => {
                v.is_empty_value()
            }
            (Value::Blank, v) | (v, Value::Blank) if !matches!(v, Value::Empty | Value::Blank) => {
                v.is_blank_value()
            }
            (Value::Empty, Value::Empty) | (Value::Blank, Value::Blank) => true,
            (Value::Empty, Value::Blank) | (Value::Blank, Value::Empty) => false,
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Range(a1, b1), Value::Range(a2, b2)) => a1 == a2 && b1 == b2,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Value::Hash(a), Value::Hash(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
            }
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// Ordered comparison. Numbers compare across int/float; strings
    /// compare lexicographically; anything else is a type error.
    pub fn compare(&self, op: CompareOp, other: &Value) -> Result<bool, ValueError> {
        match op {
            CompareOp::Eq => return Ok(self.loose_eq(other)),
            CompareOp::Ne => return Ok(!self.loose_eq(other)),
            _ => {}
        }
        let ordering = match (self, other) {
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a
                    .partial_cmp(&b)
                    .ok_or(ValueError::Incomparable(self.type_name(), other.type_name()))?,
                _ => {
                    return Err(ValueError::Incomparable(
                        self.type_name(),
                        other.type_name(),
                    ))
                }
            },
        };
        Ok(match op {
            CompareOp::Lt => ordering.is_lt(),
            CompareOp::Le => ordering.is_le(),
            CompareOp::Gt => ordering.is_gt(),
            CompareOp::Ge => ordering.is_ge(),
            CompareOp::Eq | CompareOp::Ne => unreachable!(),
        })
    }

    /// `case`/`when` equality; total, unlike [`Value::compare`].
    pub fn case_eq(&self, other: &Value) -> bool {
        self.loose_eq(other)
    }

    /// `contains` on strings checks substrings, on arrays membership, on
    /// hashes key presence. Nil never contains anything.
    pub fn contains(&self, needle: &Value) -> Result<bool, ValueError> {
        match self {
            Value::Str(s) => Ok(s.contains(&needle.to_output())),
            Value::Array(items) => Ok(items.iter().any(|v| v.loose_eq(needle))),
            Value::Hash(pairs) => {
                let key = needle.to_output();
                Ok(pairs.iter().any(|(k, _)| *k == key))
            }
            Value::Nil => Ok(false),
            _ => Err(ValueError::BadContains(self.type_name())),
        }
    }

    /// Dynamic key lookup: hash by name, array and range by index
    /// (negative counts from the end). Missing keys yield nil.
    pub fn lookup_key(&self, key: &Value) -> Value {
        match self {
            Value::Hash(pairs) => {
                let name = key.to_output();
                pairs
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Nil)
            }
            Value::Array(items) => match key {
                Value::Int(i) => {
                    let len = items.len() as i64;
                    let idx = if *i < 0 { len + i } else { *i };
                    if idx >= 0 && idx < len {
                        items[idx as usize].clone()
                    } else {
                        Value::Nil
                    }
                }
                _ => Value::Nil,
            },
            Value::Range(a, b) => match key {
                Value::Int(i) if *i >= 0 && a + i <= *b => Value::Int(a + i),
                _ => Value::Nil,
            },
            _ => Value::Nil,
        }
    }

    pub fn lookup_const_key(&self, key: &str) -> Value {
        match self {
            Value::Hash(pairs) => pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Nil),
            _ => Value::Nil,
        }
    }

    pub fn lookup_path(&self, keys: &[String]) -> Value {
        let mut current = self.clone();
        for key in keys {
            current = current.lookup_const_key(key);
        }
        current
    }

    /// `size`, `first`, `last` property commands.
    pub fn command(&self, op: CommandOp) -> Value {
        match op {
            CommandOp::Size | CommandOp::Length => match self {
                Value::Str(s) => Value::Int(s.chars().count() as i64),
                Value::Array(a) => Value::Int(a.len() as i64),
                Value::Hash(h) => Value::Int(h.len() as i64),
                Value::Range(a, b) => Value::Int((b - a + 1).max(0)),
                _ => Value::Nil,
            },
            CommandOp::First => match self {
                Value::Array(a) => a.first().cloned().unwrap_or(Value::Nil),
                Value::Range(a, b) if a <= b => Value::Int(*a),
                _ => Value::Nil,
            },
            CommandOp::Last => match self {
                Value::Array(a) => a.last().cloned().unwrap_or(Value::Nil),
                Value::Range(a, b) if a <= b => Value::Int(*b),
                _ => Value::Nil,
            },
        }
    }

    /// Output-string rules: nil renders as nothing, floats keep a decimal
    /// point, arrays concatenate their elements.
    pub fn to_output(&self) -> String {
        match self {
            Value::Nil | Value::Empty | Value::Blank => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format_float(*v),
            Value::Str(s) => s.clone(),
            Value::Array(items) => items.iter().map(Value::to_output).collect(),
            Value::Hash(_) => self.to_json_string(),
            Value::Range(a, b) => format!("{a}..{b}"),
        }
    }

    /// Integer coercion used by `NEW_RANGE` bounds.
    pub fn to_integer(&self) -> Result<i64, ValueError> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Float(v) => Ok(*v as i64),
            Value::Str(s) => s
                .trim()
                .parse()
                .map_err(|_| ValueError::BadRangeBound("string")),
            Value::Nil => Ok(0),
            _ => Err(ValueError::BadRangeBound(self.type_name())),
        }
    }

    /// Whether a `for` loop over this value runs zero iterations.
    pub fn is_empty_for_iteration(&self) -> bool {
        match self {
            Value::Nil | Value::Empty | Value::Blank => true,
            Value::Str(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Range(a, b) => a > b,
            _ => false,
        }
    }

    /// Materialize the iteration sequence for a `for` loop. Hashes iterate
    /// as `[key, value]` pairs; scalars iterate once.
    pub fn to_iteration_items(&self) -> Vec<Value> {
        match self {
            Value::Array(items) => items.clone(),
            Value::Range(a, b) => (*a..=*b).map(Value::Int).collect(),
            Value::Hash(pairs) => pairs
                .iter()
                .map(|(k, v)| Value::Array(vec![Value::Str(k.clone()), v.clone()]))
                .collect(),
            Value::Nil | Value::Empty | Value::Blank => Vec::new(),
            Value::Str(s) if s.is_empty() => Vec::new(),
            other => vec![other.clone()],
        }
    }

    pub fn to_json_value(&self) -> serde_json::Value {
        match self {
            Value::Nil => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(v) => serde_json::Value::from(*v),
            Value::Float(v) => serde_json::Value::from(*v),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json_value).collect())
            }
            Value::Hash(pairs) => serde_json::Value::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_value()))
                    .collect(),
            ),
            Value::Range(a, b) => {
                serde_json::Value::Array((*a..=*b).map(serde_json::Value::from).collect())
            }
            Value::Empty | Value::Blank => serde_json::Value::String(String::new()),
        }
    }

    fn to_json_string(&self) -> String {
        self.to_json_value().to_string()
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(map) => Value::Hash(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// The constant this value can be re-emitted as, if any. Aggregates
    /// have no constant opcode, so folds producing them are abandoned.
    pub fn to_const(&self) -> Option<Const> {
        match self {
            Value::Nil => Some(Const::Nil),
            Value::Bool(true) => Some(Const::True),
            Value::Bool(false) => Some(Const::False),
            Value::Int(v) => Some(Const::Int(*v)),
            Value::Float(v) => Some(Const::Float(*v)),
            Value::Str(s) => Some(Const::Str(s.clone())),
            Value::Range(a, b) => Some(Const::Range(*a, *b)),
            Value::Empty => Some(Const::Empty),
            Value::Blank => Some(Const::Blank),
            Value::Array(_) | Value::Hash(_) => None,
        }
    }
}

impl From<&Const> for Value {
    fn from(c: &Const) -> Value {
        match c {
            Const::Nil => Value::Nil,
            Const::True => Value::Bool(true),
            Const::False => Value::Bool(false),
            Const::Int(v) => Value::Int(*v),
            Const::Float(v) => Value::Float(*v),
            Const::Str(s) => Value::Str(s.clone()),
            Const::Range(a, b) => Value::Range(*a, *b),
            Const::Empty => Value::Empty,
            Const::Blank => Value::Blank,
        }
    }
}

/// Floats always render with a decimal point, matching the output rules
/// the folder bakes into WRITE_RAW.
fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        v.to_string()
    }
}
