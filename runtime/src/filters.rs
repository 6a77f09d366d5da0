//! Filter registry
//!
//! Dispatches filter calls by name for the VM, lowered programs, and the
//! compile-time constant folder. Filters here are pure: they see only
//! their input and arguments, never the scope, which is what makes them
//! safe to run at compile time.

use crate::value::Value;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::{alphabet, Engine};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;

/// Padded on encode, indifferent to padding on decode, matching the
/// tokens templates actually paste in.
const BASE64_STD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);
const BASE64_URL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// CGI-style escaping: unreserved bytes pass through, space becomes '+'.
const URL_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b' ');

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("unknown filter '{0}'")]
    Unknown(String),

    #[error("divided by 0")]
    DividedByZero,

    #[error("filter '{filter}': {message}")]
    InvalidArgument { filter: String, message: String },
}

fn invalid(filter: &str, message: impl Into<String>) -> FilterError {
    FilterError::InvalidArgument {
        filter: filter.to_string(),
        message: message.into(),
    }
}

/// Numeric view of a value, for the arithmetic filters.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn to_value(self) -> Value {
        match self {
            Num::Int(v) => Value::Int(v),
            Num::Float(v) => Value::Float(v),
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(v) => v as f64,
            Num::Float(v) => v,
        }
    }
}

fn to_number(value: &Value) -> Num {
    match value {
        Value::Int(v) => Num::Int(*v),
        Value::Float(v) => Num::Float(*v),
        Value::Str(s) => {
            let t = s.trim();
            if let Ok(i) = t.parse::<i64>() {
                Num::Int(i)
            } else if let Ok(f) = t.parse::<f64>() {
                Num::Float(f)
            } else {
                Num::Int(0)
            }
        }
        _ => Num::Int(0),
    }
}

fn binary_num(input: &Value, arg: &Value, int_op: fn(i64, i64) -> i64, float_op: fn(f64, f64) -> f64) -> Value {
    match (to_number(input), to_number(arg)) {
        (Num::Int(a), Num::Int(b)) => Value::Int(int_op(a, b)),
        (a, b) => Value::Float(float_op(a.as_f64(), b.as_f64())),
    }
}

pub struct FilterRegistry;

impl FilterRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Apply `name` to `input` with positional `args`. Keyword arguments
    /// arrive pre-packed as a trailing hash value.
    pub fn apply(&self, name: &str, input: &Value, args: &[Value]) -> Result<Value, FilterError> {
        let arg = |i: usize| args.get(i);
        let str_arg = |i: usize| args.get(i).map(Value::to_output).unwrap_or_default();

        let result = match name {
            "append" => Value::Str(format!("{}{}", input.to_output(), str_arg(0))),
            "prepend" => Value::Str(format!("{}{}", str_arg(0), input.to_output())),
            "capitalize" => {
                let s = input.to_output();
                let mut chars = s.chars();
                match chars.next() {
                    Some(c) => Value::Str(c.to_uppercase().chain(chars).collect()),
                    None => Value::Str(s),
                }
            }
            "downcase" => Value::Str(input.to_output().to_lowercase()),
            "upcase" => Value::Str(input.to_output().to_uppercase()),
            "size" => input.command(liquidc_frontend::il::CommandOp::Size),

            "plus" => binary_num(input, arg(0).unwrap_or(&Value::Nil), i64::wrapping_add, |a, b| a + b),
            "minus" => binary_num(input, arg(0).unwrap_or(&Value::Nil), i64::wrapping_sub, |a, b| a - b),
            "times" => binary_num(input, arg(0).unwrap_or(&Value::Nil), i64::wrapping_mul, |a, b| a * b),
            "divided_by" => {
                let divisor = to_number(arg(0).unwrap_or(&Value::Nil));
                match (to_number(input), divisor) {
                    (_, Num::Int(0)) => return Err(FilterError::DividedByZero),
                    (Num::Int(a), Num::Int(b)) => Value::Int(floor_div(a, b)),
                    (a, b) => Value::Float(a.as_f64() / b.as_f64()),
                }
            }
            "modulo" => {
                let divisor = to_number(arg(0).unwrap_or(&Value::Nil));
                match (to_number(input), divisor) {
                    (_, Num::Int(0)) => return Err(FilterError::DividedByZero),
                    (Num::Int(a), Num::Int(b)) => Value::Int(floor_mod(a, b)),
                    (a, b) => {
                        let (a, b) = (a.as_f64(), b.as_f64());
                        Value::Float(a - b * (a / b).floor())
                    }
                }
            }
            "abs" => match to_number(input) {
                Num::Int(v) => Value::Int(v.wrapping_abs()),
                Num::Float(v) => Value::Float(v.abs()),
            },
            "ceil" => Value::Int(to_number(input).as_f64().ceil() as i64),
            "floor" => Value::Int(to_number(input).as_f64().floor() as i64),
            "round" => {
                let digits = arg(0).map(|v| to_number(v).as_f64() as i32).unwrap_or(0);
                let v = to_number(input).as_f64();
                if digits <= 0 {
                    Value::Int(v.round() as i64)
                } else {
                    let factor = 10f64.powi(digits);
                    Value::Float((v * factor).round() / factor)
                }
            }
            "at_least" => {
                let limit = to_number(arg(0).unwrap_or(&Value::Nil));
                let v = to_number(input);
                if v.as_f64() < limit.as_f64() {
                    limit.to_value()
                } else {
                    v.to_value()
                }
            }
            "at_most" => {
                let limit = to_number(arg(0).unwrap_or(&Value::Nil));
                let v = to_number(input);
                if v.as_f64() > limit.as_f64() {
                    limit.to_value()
                } else {
                    v.to_value()
                }
            }

            "strip" => Value::Str(input.to_output().trim().to_string()),
            "lstrip" => Value::Str(input.to_output().trim_start().to_string()),
            "rstrip" => Value::Str(input.to_output().trim_end().to_string()),
            "strip_newlines" => {
                Value::Str(input.to_output().replace("\r\n", "").replace('\n', ""))
            }
            "newline_to_br" => Value::Str(
                input
                    .to_output()
                    .replace("\r\n", "\n")
                    .replace('\n', "<br />\n"),
            ),
            "escape" => Value::Str(html_escape(&input.to_output())),
            "escape_once" => Value::Str(html_escape_once(&input.to_output())),
            "url_encode" => Value::Str(url_encode(&input.to_output())),
            "url_decode" => Value::Str(
                url_decode(&input.to_output())
                    .ok_or_else(|| invalid("url_decode", "invalid percent escape"))?,
            ),

            "remove" => Value::Str(input.to_output().replace(&str_arg(0), "")),
            "remove_first" => Value::Str(input.to_output().replacen(&str_arg(0), "", 1)),
            "replace" => Value::Str(input.to_output().replace(&str_arg(0), &str_arg(1))),
            "replace_first" => {
                Value::Str(input.to_output().replacen(&str_arg(0), &str_arg(1), 1))
            }
            "slice" => slice_filter(input, args)?,
            "truncate" => {
                let limit = arg(0).map(|v| to_number(v).as_f64() as usize).unwrap_or(50);
                let ellipsis = arg(1).map(Value::to_output).unwrap_or_else(|| "...".into());
                Value::Str(truncate(&input.to_output(), limit, &ellipsis))
            }
            "truncatewords" => {
                let limit = arg(0)
                    .map(|v| (to_number(v).as_f64() as usize).max(1))
                    .unwrap_or(15);
                let ellipsis = arg(1).map(Value::to_output).unwrap_or_else(|| "...".into());
                let s = input.to_output();
                let words: Vec<&str> = s.split_whitespace().collect();
                if words.len() <= limit {
                    Value::Str(s)
                } else {
                    Value::Str(format!("{}{}", words[..limit].join(" "), ellipsis))
                }
            }
            "default" => {
                let use_default = match input {
                    Value::Nil | Value::Bool(false) | Value::Empty | Value::Blank => true,
                    Value::Str(s) => s.is_empty(),
                    Value::Array(a) => a.is_empty(),
                    Value::Hash(h) => h.is_empty(),
                    _ => false,
                };
                if use_default {
                    arg(0).cloned().unwrap_or(Value::Nil)
                } else {
                    input.clone()
                }
            }
            "json" => Value::Str(input.to_json_value().to_string()),
            // Translation lookup; with no translation tables loaded the
            // key passes through unchanged.
            "t" => input.clone(),

            "base64_encode" => Value::Str(base64_encode(input.to_output().as_bytes(), false)),
            "base64_decode" => {
                let bytes = base64_decode(&input.to_output(), false)
                    .ok_or_else(|| invalid("base64_decode", "invalid base64"))?;
                Value::Str(String::from_utf8_lossy(&bytes).into_owned())
            }
            "base64_url_safe_encode" => {
                Value::Str(base64_encode(input.to_output().as_bytes(), true))
            }
            "base64_url_safe_decode" => {
                let bytes = base64_decode(&input.to_output(), true)
                    .ok_or_else(|| invalid("base64_url_safe_decode", "invalid base64"))?;
                Value::Str(String::from_utf8_lossy(&bytes).into_owned())
            }

            // Collection filters used at render time only.
            "join" => {
                let sep = arg(0).map(Value::to_output).unwrap_or_else(|| " ".into());
                match input {
                    Value::Array(items) => Value::Str(
                        items
                            .iter()
                            .map(Value::to_output)
                            .collect::<Vec<_>>()
                            .join(&sep),
                    ),
                    other => other.clone(),
                }
            }
            "split" => {
                let sep = str_arg(0);
                let s = input.to_output();
                if s.is_empty() {
                    Value::Array(vec![])
                } else if sep.is_empty() {
                    Value::Array(s.chars().map(|c| Value::Str(c.to_string())).collect())
                } else {
                    Value::Array(s.split(&sep).map(|p| Value::Str(p.to_string())).collect())
                }
            }
            "reverse" => match input {
                Value::Array(items) => Value::Array(items.iter().rev().cloned().collect()),
                other => other.clone(),
            },
            "sort" => match input {
                Value::Array(items) => {
                    let mut sorted = items.clone();
                    sorted.sort_by(|a, b| {
                        a.to_output()
                            .partial_cmp(&b.to_output())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    Value::Array(sorted)
                }
                other => other.clone(),
            },
            "uniq" => match input {
                Value::Array(items) => {
                    let mut out: Vec<Value> = Vec::new();
                    for item in items {
                        if !out.iter().any(|v| v.loose_eq(item)) {
                            out.push(item.clone());
                        }
                    }
                    Value::Array(out)
                }
                other => other.clone(),
            },
            "first" => input.command(liquidc_frontend::il::CommandOp::First),
            "last" => input.command(liquidc_frontend::il::CommandOp::Last),

            _ => return Err(FilterError::Unknown(name.to_string())),
        };
        Ok(result)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Ruby-style integer division: rounds toward negative infinity.
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

/// Ruby-style modulo: result takes the sign of the divisor.
fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

fn slice_filter(input: &Value, args: &[Value]) -> Result<Value, FilterError> {
    let offset = args
        .first()
        .map(|v| to_number(v).as_f64() as i64)
        .unwrap_or(0);
    let length = args.get(1).map(|v| (to_number(v).as_f64() as i64).max(0));

    match input {
        Value::Array(items) => {
            let (start, len) = slice_bounds(items.len(), offset, length);
            Ok(Value::Array(items[start..start + len].to_vec()))
        }
        other => {
            let chars: Vec<char> = other.to_output().chars().collect();
            let (start, len) = slice_bounds(chars.len(), offset, length);
            Ok(Value::Str(chars[start..start + len].iter().collect()))
        }
    }
}

fn slice_bounds(total: usize, offset: i64, length: Option<i64>) -> (usize, usize) {
    let total = total as i64;
    let start = if offset < 0 { total + offset } else { offset };
    let start = start.clamp(0, total);
    let len = length.unwrap_or(1).min(total - start).max(0);
    (start as usize, len as usize)
}

fn truncate(s: &str, limit: usize, ellipsis: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= limit {
        return s.to_string();
    }
    let keep = limit.saturating_sub(ellipsis.chars().count());
    let mut out: String = chars[..keep].iter().collect();
    out.push_str(ellipsis);
    out
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Escape, but leave existing entities alone.
fn html_escape_once(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    for (idx, c) in s.char_indices() {
        if idx < i {
            continue;
        }
        match c {
            '&' => {
                if let Some(end) = entity_end(bytes, idx) {
                    out.push_str(&s[idx..end]);
                    i = end;
                } else {
                    out.push_str("&amp;");
                }
            }
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

/// Byte index one past ';' when `s[start..]` opens a character entity.
fn entity_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut i = start + 1;
    if i < bytes.len() && bytes[i] == b'#' {
        i += 1;
    }
    let body_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric()) {
        i += 1;
    }
    if i > body_start && i < bytes.len() && bytes[i] == b';' {
        Some(i + 1)
    } else {
        None
    }
}

fn url_encode(s: &str) -> String {
    utf8_percent_encode(s, URL_ENCODE_SET)
        .to_string()
        .replace(' ', "+")
}

fn url_decode(s: &str) -> Option<String> {
    // Literal '+' means space; "%2B" still decodes to '+'.
    let unplussed = s.replace('+', " ");
    percent_decode_str(&unplussed)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

fn base64_encode(data: &[u8], url_safe: bool) -> String {
    if url_safe {
        BASE64_URL.encode(data)
    } else {
        BASE64_STD.encode(data)
    }
}

fn base64_decode(s: &str, url_safe: bool) -> Option<Vec<u8>> {
    // Embedded newlines are common in pasted tokens; strip them first.
    let cleaned: String = s.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let engine = if url_safe { &BASE64_URL } else { &BASE64_STD };
    engine.decode(cleaned).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply(name: &str, input: Value, args: &[Value]) -> Value {
        FilterRegistry::new().apply(name, &input, args).unwrap()
    }

    #[test]
    fn test_string_filters() {
        assert_eq!(
            apply("append", Value::Str("a".into()), &[Value::Str("b".into())]),
            Value::Str("ab".into())
        );
        assert_eq!(
            apply("upcase", Value::Str("ab".into()), &[]),
            Value::Str("AB".into())
        );
        assert_eq!(
            apply("capitalize", Value::Str("my title".into()), &[]),
            Value::Str("My title".into())
        );
    }

    #[test]
    fn test_arithmetic_coercion() {
        assert_eq!(
            apply("plus", Value::Int(1), &[Value::Int(2)]),
            Value::Int(3)
        );
        assert_eq!(
            apply("plus", Value::Str("1".into()), &[Value::Int(2)]),
            Value::Int(3)
        );
        assert_eq!(
            apply("times", Value::Float(1.5), &[Value::Int(2)]),
            Value::Float(3.0)
        );
    }

    #[test]
    fn test_divided_by() {
        assert_eq!(
            apply("divided_by", Value::Int(7), &[Value::Int(2)]),
            Value::Int(3)
        );
        // Integer division floors toward negative infinity, like Ruby.
        assert_eq!(
            apply("divided_by", Value::Int(-7), &[Value::Int(2)]),
            Value::Int(-4)
        );
        assert_eq!(
            FilterRegistry::new().apply("divided_by", &Value::Int(1), &[Value::Int(0)]),
            Err(FilterError::DividedByZero)
        );
    }

    #[test]
    fn test_modulo_sign() {
        assert_eq!(
            apply("modulo", Value::Int(-7), &[Value::Int(3)]),
            Value::Int(2)
        );
    }

    #[test]
    fn test_rounding() {
        assert_eq!(apply("ceil", Value::Float(1.2), &[]), Value::Int(2));
        assert_eq!(apply("floor", Value::Float(1.8), &[]), Value::Int(1));
        assert_eq!(apply("round", Value::Float(2.5), &[]), Value::Int(3));
        assert_eq!(
            apply("round", Value::Float(1.25), &[Value::Int(1)]),
            Value::Float(1.3)
        );
    }

    #[test]
    fn test_clamps() {
        assert_eq!(
            apply("at_least", Value::Int(3), &[Value::Int(5)]),
            Value::Int(5)
        );
        assert_eq!(
            apply("at_most", Value::Int(3), &[Value::Int(5)]),
            Value::Int(3)
        );
    }

    #[test]
    fn test_escape() {
        assert_eq!(
            apply("escape", Value::Str("<a> & 'b'".into()), &[]),
            Value::Str("&lt;a&gt; &amp; &#39;b&#39;".into())
        );
    }

    #[test]
    fn test_escape_once() {
        assert_eq!(
            apply("escape_once", Value::Str("&lt;p&gt; <p>".into()), &[]),
            Value::Str("&lt;p&gt; &lt;p&gt;".into())
        );
    }

    #[test]
    fn test_url_round_trip() {
        let encoded = apply("url_encode", Value::Str("a b&c".into()), &[]);
        assert_eq!(encoded, Value::Str("a+b%26c".into()));
        assert_eq!(
            apply("url_decode", encoded, &[]),
            Value::Str("a b&c".into())
        );
    }

    #[test]
    fn test_slice() {
        assert_eq!(
            apply(
                "slice",
                Value::Str("liquid".into()),
                &[Value::Int(0), Value::Int(3)]
            ),
            Value::Str("liq".into())
        );
        assert_eq!(
            apply("slice", Value::Str("liquid".into()), &[Value::Int(-2)]),
            Value::Str("i".into())
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(
            apply(
                "truncate",
                Value::Str("Ground control to Major Tom.".into()),
                &[Value::Int(20)]
            ),
            Value::Str("Ground control to...".into())
        );
    }

    #[test]
    fn test_truncatewords() {
        assert_eq!(
            apply(
                "truncatewords",
                Value::Str("one two three four".into()),
                &[Value::Int(2)]
            ),
            Value::Str("one two...".into())
        );
    }

    #[test]
    fn test_default() {
        assert_eq!(
            apply("default", Value::Nil, &[Value::Int(5)]),
            Value::Int(5)
        );
        assert_eq!(
            apply("default", Value::Str(String::new()), &[Value::Int(5)]),
            Value::Int(5)
        );
        assert_eq!(
            apply("default", Value::Int(0), &[Value::Int(5)]),
            Value::Int(0)
        );
    }

    #[test]
    fn test_json() {
        assert_eq!(
            apply("json", Value::Array(vec![Value::Int(1), Value::Nil]), &[]),
            Value::Str("[1,null]".into())
        );
    }

    #[test]
    fn test_base64_round_trip() {
        let encoded = apply("base64_encode", Value::Str("one two three".into()), &[]);
        assert_eq!(encoded, Value::Str("b25lIHR3byB0aHJlZQ==".into()));
        assert_eq!(
            apply("base64_decode", encoded, &[]),
            Value::Str("one two three".into())
        );
    }

    #[test]
    fn test_base64_url_safe_alphabet() {
        let encoded = apply(
            "base64_url_safe_encode",
            Value::Str("\u{3ff}\u{fff}?>".into()),
            &[],
        );
        let Value::Str(s) = &encoded else { panic!() };
        assert!(!s.contains('+') && !s.contains('/'));
        assert_eq!(
            apply("base64_url_safe_decode", encoded, &[]),
            Value::Str("\u{3ff}\u{fff}?>".into())
        );
    }

    #[test]
    fn test_invalid_base64_errors() {
        assert!(FilterRegistry::new()
            .apply("base64_decode", &Value::Str("!!!".into()), &[])
            .is_err());
    }

    #[test]
    fn test_collection_filters() {
        let arr = Value::Array(vec![
            Value::Int(3),
            Value::Int(1),
            Value::Int(3),
        ]);
        assert_eq!(
            apply("join", arr.clone(), &[Value::Str(",".into())]),
            Value::Str("3,1,3".into())
        );
        assert_eq!(
            apply("uniq", arr, &[]),
            Value::Array(vec![Value::Int(3), Value::Int(1)])
        );
        assert_eq!(
            apply("split", Value::Str("a,b".into()), &[Value::Str(",".into())]),
            Value::Array(vec![Value::Str("a".into()), Value::Str("b".into())])
        );
    }

    #[test]
    fn test_unknown_filter() {
        assert_eq!(
            FilterRegistry::new().apply("sparkle", &Value::Nil, &[]),
            Err(FilterError::Unknown("sparkle".into()))
        );
    }
}
