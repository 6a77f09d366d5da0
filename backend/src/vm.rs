//! Stack VM
//!
//! Executes linked IL directly. This is the reference execution path:
//! structured lowering must match it bit for bit, and templates the
//! lowering refuses always run here. Runtime failures stop execution and
//! surface the accumulated output alongside the failing pc.

use crate::error::RenderError;
use crate::forloop::{forloop_value, tablerowloop_value, ForloopMeta};
use liquidc_frontend::il::{
    CompiledPartial, CycleValue, Il, Instruction, InterruptKind, PartialArg, PartialCall,
};
use liquidc_runtime::{FilterError, FilterRegistry, Scope, Value};
use std::sync::Arc;
use tracing::debug;

/// Resolves a partial name to its compiled form at render time, for
/// partials that were not inlined at compile time.
pub trait PartialResolver {
    fn resolve(&self, name: &str) -> Option<Arc<CompiledPartial>>;
}

/// Resolver for templates that use no partials.
pub struct NoPartials;

impl PartialResolver for NoPartials {
    fn resolve(&self, _name: &str) -> Option<Arc<CompiledPartial>> {
        None
    }
}

/// Execute linked IL against a scope, returning the rendered output.
pub fn execute(
    il: &Il,
    scope: &mut Scope,
    resolver: &dyn PartialResolver,
) -> Result<String, RenderError> {
    Vm::new(il, resolver).run(scope)
}

struct ForFrame {
    items: Vec<Value>,
    index: usize,
    var: String,
    name: String,
}

struct TablerowFrame {
    items: Vec<Value>,
    index: usize,
    var: String,
    cols: usize,
}

struct Vm<'a> {
    il: &'a Il,
    resolver: &'a dyn PartialResolver,
    registry: FilterRegistry,
    stack: Vec<Value>,
    temps: Vec<Value>,
    buffers: Vec<String>,
    loops: Vec<ForFrame>,
    trows: Vec<TablerowFrame>,
    forloops: Vec<ForloopMeta>,
}

impl<'a> Vm<'a> {
    fn new(il: &'a Il, resolver: &'a dyn PartialResolver) -> Self {
        Self {
            il,
            resolver,
            registry: FilterRegistry::new(),
            stack: Vec::new(),
            temps: Vec::new(),
            buffers: vec![String::new()],
            loops: Vec::new(),
            trows: Vec::new(),
            forloops: Vec::new(),
        }
    }

    fn run(mut self, scope: &mut Scope) -> Result<String, RenderError> {
        match self.dispatch_loop(scope) {
            Ok(()) => Ok(self.buffers.swap_remove(0)),
            Err(mut error) => {
                error.output = std::mem::take(&mut self.buffers[0]);
                Err(error)
            }
        }
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().unwrap_or(Value::Nil)
    }

    fn fail(&self, message: impl Into<String>, pc: usize) -> RenderError {
        RenderError::at(message, self.il.spans.get(pc).copied())
    }

    fn write(&mut self, text: &str) {
        if let Some(buffer) = self.buffers.last_mut() {
            buffer.push_str(text);
        }
    }

    fn dispatch_loop(&mut self, scope: &mut Scope) -> Result<(), RenderError> {
        use Instruction::*;
        // Split the IL borrow off `self` so instruction payloads can be
        // read while the machine state mutates.
        let il = self.il;
        let mut pc = 0usize;

        while pc < il.len() {
            match &il.instructions[pc] {
                ConstNil => self.stack.push(Value::Nil),
                ConstTrue => self.stack.push(Value::Bool(true)),
                ConstFalse => self.stack.push(Value::Bool(false)),
                ConstInt(v) => self.stack.push(Value::Int(*v)),
                ConstFloat(v) => self.stack.push(Value::Float(*v)),
                ConstString(s) => self.stack.push(Value::Str(s.clone())),
                ConstRange(a, b) => self.stack.push(Value::Range(*a, *b)),
                ConstEmpty => self.stack.push(Value::Empty),
                ConstBlank => self.stack.push(Value::Blank),

                FindVar(name) => {
                    let v = scope.lookup(name);
                    self.stack.push(v);
                }
                FindVarPath(name, keys) => {
                    let v = scope.lookup_path(name, keys);
                    self.stack.push(v);
                }
                FindVarDynamic => {
                    let name = self.pop().to_output();
                    let v = scope.lookup(&name);
                    self.stack.push(v);
                }
                LookupKey => {
                    let key = self.pop();
                    let obj = self.pop();
                    self.stack.push(obj.lookup_key(&key));
                }
                LookupConstKey(key) => {
                    let obj = self.pop();
                    self.stack.push(obj.lookup_const_key(key));
                }
                LookupConstPath(keys) => {
                    let obj = self.pop();
                    self.stack.push(obj.lookup_path(keys));
                }
                LookupCommand(op) => {
                    let obj = self.pop();
                    self.stack.push(obj.command(*op));
                }

                WriteRaw(text) => {
                    let text = text.clone();
                    self.write(&text);
                }
                WriteValue => {
                    let text = self.pop().to_output();
                    self.write(&text);
                }
                WriteVar(name) => {
                    let text = scope.lookup(name).to_output();
                    self.write(&text);
                }
                WriteVarPath(name, keys) => {
                    let text = scope.lookup_path(name, keys).to_output();
                    self.write(&text);
                }

                Compare(op) => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    let result = lhs
                        .compare(*op, &rhs)
                        .map_err(|e| self.fail(e.to_string(), pc))?;
                    self.stack.push(Value::Bool(result));
                }
                CaseCompare => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    self.stack.push(Value::Bool(lhs.case_eq(&rhs)));
                }
                Contains => {
                    let rhs = self.pop();
                    let lhs = self.pop();
                    let result = lhs
                        .contains(&rhs)
                        .map_err(|e| self.fail(e.to_string(), pc))?;
                    self.stack.push(Value::Bool(result));
                }
                BoolNot => {
                    let v = self.pop();
                    self.stack.push(Value::Bool(!v.is_truthy()));
                }
                IsTruthy => {
                    let v = self.pop();
                    self.stack.push(Value::Bool(v.is_truthy()));
                }
                NewRange => {
                    let end = self.pop();
                    let start = self.pop();
                    let start = start
                        .to_integer()
                        .map_err(|e| self.fail(e.to_string(), pc))?;
                    let end = end
                        .to_integer()
                        .map_err(|e| self.fail(e.to_string(), pc))?;
                    self.stack.push(Value::Range(start, end));
                }

                CallFilter { name, argc } => {
                    let mut args = Vec::with_capacity(*argc as usize);
                    for _ in 0..*argc {
                        args.push(self.pop());
                    }
                    args.reverse();
                    let input = self.pop();
                    match self.registry.apply(name, &input, &args) {
                        Ok(v) => self.stack.push(v),
                        Err(FilterError::Unknown(name)) => {
                            // Lax mode: unknown filters pass the input through.
                            debug!(filter = %name, "unknown filter, passing input through");
                            self.stack.push(input);
                        }
                        Err(e) => return Err(self.fail(e.to_string(), pc)),
                    }
                }

                Label(_) | Noop => {}
                Jump(target) => {
                    pc = *target as usize;
                    continue;
                }
                JumpIfFalse(target) => {
                    if !self.pop().is_truthy() {
                        pc = *target as usize;
                        continue;
                    }
                }
                JumpIfTrue(target) => {
                    if self.pop().is_truthy() {
                        pc = *target as usize;
                        continue;
                    }
                }
                JumpIfEmpty(target) => {
                    if self.pop().is_empty_for_iteration() {
                        pc = *target as usize;
                        continue;
                    }
                }
                JumpIfInterrupt(target) => {
                    if scope.has_interrupt() {
                        pc = *target as usize;
                        continue;
                    }
                }
                Halt => break,

                PushScope => scope.push_scope(),
                PopScope => scope.pop_scope(),
                Assign(name) => {
                    let v = self.pop();
                    scope.assign(name.clone(), v);
                }
                AssignLocal(name) => {
                    let v = self.pop();
                    scope.assign_local(name.clone(), v);
                }
                Increment(name) => {
                    let v = scope.increment(name);
                    self.write(&v.to_string());
                }
                Decrement(name) => {
                    let v = scope.decrement(name);
                    self.write(&v.to_string());
                }
                PushCapture => self.buffers.push(String::new()),
                PopCapture => {
                    let captured = self.pop_buffer();
                    self.stack.push(Value::Str(captured));
                }
                PushInterrupt(kind) => scope.push_interrupt(*kind),
                PopInterrupt => {
                    let kind = scope.pop_interrupt();
                    self.stack
                        .push(Value::Bool(!matches!(kind, Some(InterruptKind::Continue))));
                }
                StoreTemp(slot) => {
                    let slot = *slot as usize;
                    if self.temps.len() <= slot {
                        self.temps.resize(slot + 1, Value::Nil);
                    }
                    self.temps[slot] = self.pop();
                }
                LoadTemp(slot) => {
                    let v = self
                        .temps
                        .get(*slot as usize)
                        .cloned()
                        .unwrap_or(Value::Nil);
                    self.stack.push(v);
                }
                Dup => {
                    let top = self.stack.last().cloned().unwrap_or(Value::Nil);
                    self.stack.push(top);
                }
                Pop => {
                    self.pop();
                }
                BuildHash(n) => {
                    let mut pairs = Vec::with_capacity(*n as usize);
                    for _ in 0..*n {
                        let value = self.pop();
                        let key = self.pop().to_output();
                        pairs.push((key, value));
                    }
                    pairs.reverse();
                    self.stack.push(Value::Hash(pairs));
                }
                IfchangedCheck(site) => {
                    let text = self.pop_buffer();
                    if scope.ifchanged_update(*site, &text) {
                        self.write(&text);
                    }
                }

                ForInit {
                    var,
                    name,
                    reversed,
                } => {
                    let collection = self.pop();
                    let mut items = collection.to_iteration_items();
                    if *reversed {
                        items.reverse();
                    }
                    scope.push_scope();
                    self.loops.push(ForFrame {
                        items,
                        index: 0,
                        var: var.clone(),
                        name: name.clone(),
                    });
                }
                ForNext => {
                    let Some(frame) = self.loops.last_mut() else {
                        return Err(self.fail("FOR_NEXT outside a loop", pc));
                    };
                    if frame.index >= frame.items.len() {
                        self.stack.push(Value::Bool(false));
                    } else {
                        let item = frame.items[frame.index].clone();
                        let index0 = frame.index;
                        frame.index += 1;
                        let var = frame.var.clone();
                        if let Some(meta) = self.forloops.last_mut() {
                            meta.index0 = index0;
                        }
                        scope.assign_local(var, item);
                        scope.assign_local("forloop", forloop_value(&self.forloops));
                        self.stack.push(Value::Bool(true));
                    }
                }
                ForEnd => {
                    self.loops.pop();
                    scope.pop_scope();
                }
                PushForloop => {
                    let Some(frame) = self.loops.last() else {
                        return Err(self.fail("PUSH_FORLOOP outside a loop", pc));
                    };
                    self.forloops.push(ForloopMeta {
                        name: frame.name.clone(),
                        length: frame.items.len(),
                        index0: 0,
                    });
                }
                PopForloop => {
                    self.forloops.pop();
                }

                TablerowInit { var, name: _, cols } => {
                    let collection = self.pop();
                    let items = collection.to_iteration_items();
                    let cols = cols.map(|c| c as usize).unwrap_or(usize::MAX).max(1);
                    scope.push_scope();
                    self.write("<tr class=\"row1\">");
                    self.trows.push(TablerowFrame {
                        items,
                        index: 0,
                        var: var.clone(),
                        cols,
                    });
                }
                TablerowNext => {
                    let Some(frame) = self.trows.last_mut() else {
                        return Err(self.fail("TABLEROW_NEXT outside a tablerow", pc));
                    };
                    if frame.index >= frame.items.len() {
                        self.stack.push(Value::Bool(false));
                    } else {
                        let index0 = frame.index;
                        let item = frame.items[index0].clone();
                        let cols = frame.cols;
                        let var = frame.var.clone();
                        let length = frame.items.len();
                        frame.index += 1;

                        let col = index0 % cols;
                        let row = index0 / cols;
                        let mut html = String::new();
                        if index0 > 0 {
                            html.push_str("</td>");
                            if col == 0 {
                                html.push_str(&format!("</tr><tr class=\"row{}\">", row + 1));
                            }
                        }
                        html.push_str(&format!("<td class=\"col{}\">", col + 1));
                        self.write(&html);

                        scope.assign_local(var, item);
                        scope.assign_local(
                            "tablerowloop",
                            tablerowloop_value(length, index0, cols),
                        );
                        self.stack.push(Value::Bool(true));
                    }
                }
                TablerowEnd => {
                    let closed = match self.trows.pop() {
                        Some(frame) if !frame.items.is_empty() => "</td></tr>",
                        _ => "</tr>",
                    };
                    self.write(closed);
                    scope.pop_scope();
                }

                CycleStep { identity, values } => {
                    let index = scope.cycle_advance(identity, values.len());
                    let text = self.cycle_value(&values[index], scope);
                    self.write(&text);
                }
                CycleStepVar { name_var, values } => {
                    let group = scope.lookup(name_var).to_output();
                    let index = scope.cycle_advance(&group, values.len());
                    let text = self.cycle_value(&values[index], scope);
                    self.write(&text);
                }

                RenderPartial(call) | ConstRender(call) => {
                    self.render_partial(call, scope, pc, true)?;
                }
                IncludePartial(call) | ConstInclude(call) => {
                    self.render_partial(call, scope, pc, false)?;
                }
            }
            pc += 1;
        }
        Ok(())
    }

    fn pop_buffer(&mut self) -> String {
        if self.buffers.len() > 1 {
            self.buffers.pop().unwrap_or_default()
        } else {
            String::new()
        }
    }

    fn cycle_value(&self, value: &CycleValue, scope: &Scope) -> String {
        match value {
            CycleValue::Lit(c) => Value::from(c).to_output(),
            CycleValue::Var(name) => scope.lookup(name).to_output(),
        }
    }

    fn eval_partial_arg(&self, arg: &PartialArg, scope: &Scope) -> Value {
        match arg {
            PartialArg::Lit(c) => Value::from(c),
            PartialArg::Var(path) => {
                let mut parts = path.split('.');
                let name = parts.next().unwrap_or_default();
                let keys: Vec<String> = parts.map(str::to_string).collect();
                scope.lookup_path(name, &keys)
            }
        }
    }

    /// Run a partial. `render` semantics isolate the scope; `include`
    /// shares it under a fresh frame.
    fn render_partial(
        &mut self,
        call: &PartialCall,
        scope: &mut Scope,
        pc: usize,
        isolated: bool,
    ) -> Result<(), RenderError> {
        let template = call
            .template
            .clone()
            .or_else(|| self.resolver.resolve(&call.name))
            .ok_or_else(|| {
                self.fail(format!("partial '{}' could not be found", call.name), pc)
            })?;

        let args: Vec<(String, Value)> = call
            .args
            .iter()
            .map(|(key, arg)| (key.clone(), self.eval_partial_arg(arg, scope)))
            .collect();

        let result = if isolated {
            let mut sub_scope = Scope::with_assigns(args);
            execute(&template.il, &mut sub_scope, self.resolver)
        } else {
            scope.push_scope();
            for (key, value) in args {
                scope.assign_local(key, value);
            }
            let result = execute(&template.il, scope, self.resolver);
            scope.pop_scope();
            result
        };

        match result {
            Ok(output) => {
                self.write(&output);
                Ok(())
            }
            Err(error) => {
                // Keep whatever the partial managed to emit.
                self.write(&error.output);
                Err(self.fail(format!("in '{}': {}", call.name, error.message), pc))
            }
        }
    }
}
