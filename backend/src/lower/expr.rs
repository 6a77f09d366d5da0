//! Expression trees reconstructed from stack code
//!
//! Strictly tree-shaped and owned top-down; every node maps onto one
//! native evaluation step. Boolean connectives short-circuit exactly like
//! the jump shapes they were reconstructed from, so an expression the VM
//! never evaluates is never evaluated here either.

use crate::error::RenderError;
use crate::lower::program::ExecCtx;
use liquidc_frontend::il::{CommandOp, CompareOp};
use liquidc_runtime::{FilterError, Scope, Value};
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    VarPath(String, Vec<String>),
    DynamicVar(Box<Expr>),
    Empty,
    Blank,
    RangeLit(i64, i64),
    DynamicRange(Box<Expr>, Box<Expr>),
    Lookup {
        obj: Box<Expr>,
        key: Box<Expr>,
    },
    LookupConst {
        obj: Box<Expr>,
        key: String,
    },
    LookupPath {
        obj: Box<Expr>,
        keys: Vec<String>,
    },
    Command {
        op: CommandOp,
        obj: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Contains {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    CaseCompare {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Filter {
        name: String,
        input: Box<Expr>,
        args: Vec<Expr>,
    },
    HashLit(Vec<(Expr, Expr)>),
    Temp(u32),
}

impl Expr {
    pub fn eval(&self, scope: &Scope, ctx: &ExecCtx) -> Result<Value, RenderError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => Ok(scope.lookup(name)),
            Expr::VarPath(name, keys) => Ok(scope.lookup_path(name, keys)),
            Expr::DynamicVar(name) => {
                let name = name.eval(scope, ctx)?.to_output();
                Ok(scope.lookup(&name))
            }
            Expr::Empty => Ok(Value::Empty),
            Expr::Blank => Ok(Value::Blank),
            Expr::RangeLit(a, b) => Ok(Value::Range(*a, *b)),
            Expr::DynamicRange(start, end) => {
                let start = start
                    .eval(scope, ctx)?
                    .to_integer()
                    .map_err(|e| RenderError::new(e.to_string()))?;
                let end = end
                    .eval(scope, ctx)?
                    .to_integer()
                    .map_err(|e| RenderError::new(e.to_string()))?;
                Ok(Value::Range(start, end))
            }
            Expr::Lookup { obj, key } => {
                let key = key.eval(scope, ctx)?;
                Ok(obj.eval(scope, ctx)?.lookup_key(&key))
            }
            Expr::LookupConst { obj, key } => Ok(obj.eval(scope, ctx)?.lookup_const_key(key)),
            Expr::LookupPath { obj, keys } => Ok(obj.eval(scope, ctx)?.lookup_path(keys)),
            Expr::Command { op, obj } => Ok(obj.eval(scope, ctx)?.command(*op)),
            Expr::Compare { op, lhs, rhs } => {
                let lhs = lhs.eval(scope, ctx)?;
                let rhs = rhs.eval(scope, ctx)?;
                let result = lhs
                    .compare(*op, &rhs)
                    .map_err(|e| RenderError::new(e.to_string()))?;
                Ok(Value::Bool(result))
            }
            Expr::Contains { lhs, rhs } => {
                let lhs = lhs.eval(scope, ctx)?;
                let rhs = rhs.eval(scope, ctx)?;
                let result = lhs
                    .contains(&rhs)
                    .map_err(|e| RenderError::new(e.to_string()))?;
                Ok(Value::Bool(result))
            }
            Expr::Not(inner) => Ok(Value::Bool(!inner.eval(scope, ctx)?.is_truthy())),
            Expr::And(lhs, rhs) => {
                if !lhs.eval(scope, ctx)?.is_truthy() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(rhs.eval(scope, ctx)?.is_truthy()))
            }
            Expr::Or(lhs, rhs) => {
                if lhs.eval(scope, ctx)?.is_truthy() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(rhs.eval(scope, ctx)?.is_truthy()))
            }
            Expr::CaseCompare { lhs, rhs } => {
                let lhs = lhs.eval(scope, ctx)?;
                let rhs = rhs.eval(scope, ctx)?;
                Ok(Value::Bool(lhs.case_eq(&rhs)))
            }
            Expr::Filter { name, input, args } => {
                let input = input.eval(scope, ctx)?;
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(arg.eval(scope, ctx)?);
                }
                match ctx.registry.apply(name, &input, &evaluated) {
                    Ok(v) => Ok(v),
                    Err(FilterError::Unknown(name)) => {
                        debug!(filter = %name, "unknown filter, passing input through");
                        Ok(input)
                    }
                    Err(e) => Err(RenderError::new(e.to_string())),
                }
            }
            Expr::HashLit(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    let key = key.eval(scope, ctx)?.to_output();
                    out.push((key, value.eval(scope, ctx)?));
                }
                Ok(Value::Hash(out))
            }
            Expr::Temp(slot) => Ok(ctx
                .temps
                .get(*slot as usize)
                .cloned()
                .unwrap_or(Value::Nil)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ExecCtx {
        ExecCtx::new()
    }

    #[test]
    fn test_short_circuit_and_skips_rhs() {
        // rhs would error (integer compared with string); lhs false wins.
        let expr = Expr::And(
            Box::new(Expr::Literal(Value::Bool(false))),
            Box::new(Expr::Compare {
                op: CompareOp::Lt,
                lhs: Box::new(Expr::Literal(Value::Int(1))),
                rhs: Box::new(Expr::Literal(Value::Str("x".into()))),
            }),
        );
        let scope = Scope::new();
        assert_eq!(expr.eval(&scope, &ctx()), Ok(Value::Bool(false)));
    }

    #[test]
    fn test_short_circuit_or_skips_rhs() {
        let expr = Expr::Or(
            Box::new(Expr::Literal(Value::Int(1))),
            Box::new(Expr::Compare {
                op: CompareOp::Lt,
                lhs: Box::new(Expr::Literal(Value::Int(1))),
                rhs: Box::new(Expr::Literal(Value::Str("x".into()))),
            }),
        );
        let scope = Scope::new();
        assert_eq!(expr.eval(&scope, &ctx()), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_lookup_chain() {
        let mut scope = Scope::new();
        scope.assign(
            "user",
            Value::Hash(vec![(
                "address".into(),
                Value::Hash(vec![("city".into(), Value::Str("Ottawa".into()))]),
            )]),
        );
        let expr = Expr::VarPath("user".into(), vec!["address".into(), "city".into()]);
        assert_eq!(
            expr.eval(&scope, &ctx()),
            Ok(Value::Str("Ottawa".into()))
        );
    }

    #[test]
    fn test_filter_eval() {
        let expr = Expr::Filter {
            name: "append".into(),
            input: Box::new(Expr::Literal(Value::Str("a".into()))),
            args: vec![Expr::Literal(Value::Str("b".into()))],
        };
        let scope = Scope::new();
        assert_eq!(expr.eval(&scope, &ctx()), Ok(Value::Str("ab".into())));
    }
}
