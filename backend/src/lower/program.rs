//! Lowered programs
//!
//! A [`Program`] is the native-control-flow form of a template: a
//! statement tree executed with ordinary Rust conditionals, loops, and
//! recursion instead of a dispatch loop over linear IL. It must render
//! byte-identically to the VM on the same IL; anything that cannot be
//! expressed this way stays on the VM path.

use crate::error::RenderError;
use crate::forloop::{forloop_value, ForloopMeta};
use crate::lower::expr::Expr;
use liquidc_frontend::il::{CycleValue, Span};
use liquidc_runtime::{FilterRegistry, Scope, Value};

/// How a lowered cycle step resolves its register key.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleKey {
    Fixed(String),
    Var(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    WriteRaw(String),
    WriteValue {
        value: Expr,
        span: Span,
    },
    Assign {
        name: String,
        value: Expr,
        local: bool,
        span: Span,
    },
    StoreTemp {
        slot: u32,
        value: Expr,
        span: Span,
    },
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
        span: Span,
    },
    For {
        var: String,
        name: String,
        reversed: bool,
        collection: Expr,
        body: Vec<Stmt>,
        else_branch: Vec<Stmt>,
        span: Span,
    },
    PushScope,
    PopScope,
    PushCapture,
    AssignCapture {
        name: String,
        local: bool,
    },
    IfchangedCheck(u32),
    Cycle {
        key: CycleKey,
        values: Vec<CycleValue>,
    },
    Increment(String),
    Decrement(String),
}

/// Mutable machinery a running program needs besides the scope.
pub struct ExecCtx {
    pub temps: Vec<Value>,
    pub buffers: Vec<String>,
    pub registry: FilterRegistry,
    pub forloops: Vec<ForloopMeta>,
}

impl ExecCtx {
    pub fn new() -> Self {
        Self {
            temps: Vec::new(),
            buffers: vec![String::new()],
            registry: FilterRegistry::new(),
            forloops: Vec::new(),
        }
    }

    fn write(&mut self, text: &str) {
        if let Some(buffer) = self.buffers.last_mut() {
            buffer.push_str(text);
        }
    }

    fn pop_buffer(&mut self) -> String {
        if self.buffers.len() > 1 {
            self.buffers.pop().unwrap_or_default()
        } else {
            String::new()
        }
    }
}

impl Default for ExecCtx {
    fn default() -> Self {
        Self::new()
    }
}

/// A template lowered to native control flow.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

impl Program {
    pub fn render(&self, scope: &mut Scope) -> Result<String, RenderError> {
        let mut ctx = ExecCtx::new();
        match exec_block(&self.stmts, scope, &mut ctx) {
            Ok(()) => Ok(ctx.buffers.swap_remove(0)),
            Err(mut error) => {
                error.output = std::mem::take(&mut ctx.buffers[0]);
                Err(error)
            }
        }
    }
}

fn exec_block(stmts: &[Stmt], scope: &mut Scope, ctx: &mut ExecCtx) -> Result<(), RenderError> {
    for stmt in stmts {
        exec_stmt(stmt, scope, ctx)?;
    }
    Ok(())
}

fn exec_stmt(stmt: &Stmt, scope: &mut Scope, ctx: &mut ExecCtx) -> Result<(), RenderError> {
    match stmt {
        Stmt::WriteRaw(text) => ctx.write(text),
        Stmt::WriteValue { value, span } => {
            let text = value.eval(scope, ctx).map_err(|e| e.locate(*span))?.to_output();
            ctx.write(&text);
        }
        Stmt::Assign {
            name,
            value,
            local,
            span,
        } => {
            let value = value.eval(scope, ctx).map_err(|e| e.locate(*span))?;
            if *local {
                scope.assign_local(name.clone(), value);
            } else {
                scope.assign(name.clone(), value);
            }
        }
        Stmt::StoreTemp { slot, value, span } => {
            let value = value.eval(scope, ctx).map_err(|e| e.locate(*span))?;
            let slot = *slot as usize;
            if ctx.temps.len() <= slot {
                ctx.temps.resize(slot + 1, Value::Nil);
            }
            ctx.temps[slot] = value;
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
            span,
        } => {
            if cond.eval(scope, ctx).map_err(|e| e.locate(*span))?.is_truthy() {
                exec_block(then_branch, scope, ctx)?;
            } else {
                exec_block(else_branch, scope, ctx)?;
            }
        }
        Stmt::For {
            var,
            name,
            reversed,
            collection,
            body,
            else_branch,
            span,
        } => {
            let collection = collection.eval(scope, ctx).map_err(|e| e.locate(*span))?;
            let mut items = collection.to_iteration_items();
            if *reversed {
                items.reverse();
            }
            if items.is_empty() {
                exec_block(else_branch, scope, ctx)?;
            } else {
                scope.push_scope();
                ctx.forloops.push(ForloopMeta {
                    name: name.clone(),
                    length: items.len(),
                    index0: 0,
                });
                let result = (|| -> Result<(), RenderError> {
                    for (index0, item) in items.into_iter().enumerate() {
                        if let Some(meta) = ctx.forloops.last_mut() {
                            meta.index0 = index0;
                        }
                        scope.assign_local(var.clone(), item);
                        scope.assign_local("forloop", forloop_value(&ctx.forloops));
                        exec_block(body, scope, ctx)?;
                    }
                    Ok(())
                })();
                ctx.forloops.pop();
                scope.pop_scope();
                result?;
            }
        }
        Stmt::PushScope => scope.push_scope(),
        Stmt::PopScope => scope.pop_scope(),
        Stmt::PushCapture => ctx.buffers.push(String::new()),
        Stmt::AssignCapture { name, local } => {
            let captured = ctx.pop_buffer();
            if *local {
                scope.assign_local(name.clone(), Value::Str(captured));
            } else {
                scope.assign(name.clone(), Value::Str(captured));
            }
        }
        Stmt::IfchangedCheck(site) => {
            let text = ctx.pop_buffer();
            if scope.ifchanged_update(*site, &text) {
                ctx.write(&text);
            }
        }
        Stmt::Cycle { key, values } => {
            let key = match key {
                CycleKey::Fixed(identity) => identity.clone(),
                CycleKey::Var(name) => scope.lookup(name).to_output(),
            };
            let index = scope.cycle_advance(&key, values.len());
            let text = match &values[index] {
                CycleValue::Lit(c) => Value::from(c).to_output(),
                CycleValue::Var(name) => scope.lookup(name).to_output(),
            };
            ctx.write(&text);
        }
        Stmt::Increment(name) => {
            let v = scope.increment(name);
            ctx.write(&v.to_string());
        }
        Stmt::Decrement(name) => {
            let v = scope.decrement(name);
            ctx.write(&v.to_string());
        }
    }
    Ok(())
}
