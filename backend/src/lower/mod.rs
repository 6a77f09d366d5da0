//! Structured lowering
//!
//! Reconstructs native control flow from linked, optimized IL: a cursor
//! walks the stream, shift-reducing stack producers into expression trees
//! and recognizing the jump shapes the parser emits for conditionals,
//! short-circuit booleans, and loops. Anything unrecognized refuses the
//! whole template; rendering then uses the stack VM, which accepts
//! everything.
//!
//! `IS_TRUTHY` reduces to the identity here: every consumer of a boolean
//! position (if conditions, `and`/`or` operands) re-applies truthiness at
//! evaluation time, matching the VM.

pub mod expr;
pub mod program;

pub use expr::Expr;
pub use program::{CycleKey, Program, Stmt};

use crate::error::{unsupported, Unsupported};
use liquidc_frontend::il::{Il, Instruction};
use liquidc_runtime::Value;
use smallvec::SmallVec;
use tracing::{debug, trace};

/// Reducer stack for expression reconstruction; almost always shallow.
type ExprStack = SmallVec<[Expr; 4]>;

/// Bound on the lookahead used to classify an expression run as a
/// conditional.
const IF_LOOKAHEAD: usize = 20;

/// Lower linked IL into a [`Program`], or refuse.
pub fn lower(il: &Il) -> Result<Program, Unsupported> {
    for (index, inst) in il.instructions.iter().enumerate() {
        match inst {
            Instruction::RenderPartial(_)
            | Instruction::IncludePartial(_)
            | Instruction::ConstRender(_)
            | Instruction::ConstInclude(_) => {
                return Err(unsupported(format!("partial call at {index}")))
            }
            Instruction::TablerowInit { .. }
            | Instruction::TablerowNext
            | Instruction::TablerowEnd => {
                return Err(unsupported(format!("tablerow at {index}")))
            }
            Instruction::PushInterrupt(_) => {
                return Err(unsupported(format!("interrupt at {index}")))
            }
            _ => {}
        }
        // Jump operands must be resolved label positions.
        if let Some(target) = inst.jump_target() {
            if !matches!(
                il.instructions.get(target as usize),
                Some(Instruction::Label(_))
            ) {
                return Err(unsupported(format!("unlinked jump at {index}")));
            }
        }
    }

    let lowerer = Lowerer { il };
    let stmts = lowerer.parse_range(0, il.len())?;
    debug!(statements = stmts.len(), "lowering succeeded");
    Ok(Program { stmts })
}

struct Lowerer<'a> {
    il: &'a Il,
}

impl<'a> Lowerer<'a> {
    fn at(&self, index: usize) -> Option<&Instruction> {
        self.il.instructions.get(index)
    }

    fn span_at(&self, index: usize) -> liquidc_frontend::il::Span {
        self.il.spans.get(index).copied().unwrap_or_default()
    }

    /// Compile statements from `start` up to (exclusive) `end`.
    fn parse_range(&self, start: usize, end: usize) -> Result<Vec<Stmt>, Unsupported> {
        let mut stmts = Vec::new();
        let mut pc = start;
        while pc < end {
            match &self.il.instructions[pc] {
                Instruction::Label(_) | Instruction::Noop | Instruction::Halt => pc += 1,
                Instruction::WriteRaw(text) => {
                    stmts.push(Stmt::WriteRaw(text.clone()));
                    pc += 1;
                }
                Instruction::WriteVar(name) => {
                    stmts.push(Stmt::WriteValue {
                        value: Expr::Var(name.clone()),
                        span: self.span_at(pc),
                    });
                    pc += 1;
                }
                Instruction::WriteVarPath(name, keys) => {
                    stmts.push(Stmt::WriteValue {
                        value: Expr::VarPath(name.clone(), keys.clone()),
                        span: self.span_at(pc),
                    });
                    pc += 1;
                }
                Instruction::PushScope => {
                    stmts.push(Stmt::PushScope);
                    pc += 1;
                }
                Instruction::PopScope => {
                    stmts.push(Stmt::PopScope);
                    pc += 1;
                }
                Instruction::PushCapture => {
                    stmts.push(Stmt::PushCapture);
                    pc += 1;
                }
                Instruction::PopCapture => match self.at(pc + 1) {
                    Some(Instruction::Assign(name)) => {
                        stmts.push(Stmt::AssignCapture {
                            name: name.clone(),
                            local: false,
                        });
                        pc += 2;
                    }
                    Some(Instruction::AssignLocal(name)) => {
                        stmts.push(Stmt::AssignCapture {
                            name: name.clone(),
                            local: true,
                        });
                        pc += 2;
                    }
                    _ => return Err(unsupported(format!("dangling POP_CAPTURE at {pc}"))),
                },
                Instruction::IfchangedCheck(site) => {
                    stmts.push(Stmt::IfchangedCheck(*site));
                    pc += 1;
                }
                Instruction::CycleStep { identity, values } => {
                    stmts.push(Stmt::Cycle {
                        key: CycleKey::Fixed(identity.clone()),
                        values: values.clone(),
                    });
                    pc += 1;
                }
                Instruction::CycleStepVar { name_var, values } => {
                    stmts.push(Stmt::Cycle {
                        key: CycleKey::Var(name_var.clone()),
                        values: values.clone(),
                    });
                    pc += 1;
                }
                Instruction::Increment(name) => {
                    stmts.push(Stmt::Increment(name.clone()));
                    pc += 1;
                }
                Instruction::Decrement(name) => {
                    stmts.push(Stmt::Decrement(name.clone()));
                    pc += 1;
                }
                inst if is_producer(inst) => {
                    if self.peek_for_loop(pc) {
                        let stmt = self.parse_for_statement(&mut pc, end)?;
                        stmts.push(stmt);
                    } else {
                        if self.peek_if_statement(pc) {
                            trace!(pc, "expression feeds a conditional");
                        }
                        self.parse_expression(&mut pc, end, &mut stmts)?;
                    }
                }
                other => return Err(unsupported(format!("statement opcode {other} at {pc}"))),
            }
        }
        Ok(stmts)
    }

    /// Bounded lookahead: does the producer run at `pc` feed a conditional
    /// jump before any plain statement terminator?
    fn peek_if_statement(&self, pc: usize) -> bool {
        for inst in self.il.instructions.iter().skip(pc).take(IF_LOOKAHEAD) {
            match inst {
                Instruction::JumpIfFalse(_) | Instruction::JumpIfTrue(_) => return true,
                Instruction::WriteValue
                | Instruction::Assign(_)
                | Instruction::AssignLocal(_)
                | Instruction::StoreTemp(_)
                | Instruction::JumpIfEmpty(_) => return false,
                _ => {}
            }
        }
        false
    }

    /// Does a loop head start at `pc`? The signature is a hoisted
    /// expression consumed by `JUMP_IF_EMPTY`, a second hoisted copy, and
    /// `FOR_INIT`.
    fn peek_for_loop(&self, pc: usize) -> bool {
        let mut i = pc;
        while self.at(i).map(is_producer).unwrap_or(false) {
            i += 1;
        }
        if !matches!(self.at(i), Some(Instruction::JumpIfEmpty(_))) {
            return false;
        }
        i += 1;
        while self.at(i).map(is_producer).unwrap_or(false) {
            i += 1;
        }
        matches!(self.at(i), Some(Instruction::ForInit { .. }))
    }

    /// One producer/reducer step onto the expression stack. Returns false
    /// for instructions the expression layer does not consume.
    fn try_reduce(&self, inst: &Instruction, stack: &mut ExprStack) -> Result<bool, Unsupported> {
        use Instruction::*;
        match inst {
            ConstNil => stack.push(Expr::Literal(Value::Nil)),
            ConstTrue => stack.push(Expr::Literal(Value::Bool(true))),
            ConstFalse => stack.push(Expr::Literal(Value::Bool(false))),
            ConstInt(v) => stack.push(Expr::Literal(Value::Int(*v))),
            ConstFloat(v) => stack.push(Expr::Literal(Value::Float(*v))),
            ConstString(s) => stack.push(Expr::Literal(Value::Str(s.clone()))),
            ConstRange(a, b) => stack.push(Expr::RangeLit(*a, *b)),
            ConstEmpty => stack.push(Expr::Empty),
            ConstBlank => stack.push(Expr::Blank),
            FindVar(name) => stack.push(Expr::Var(name.clone())),
            FindVarPath(name, keys) => stack.push(Expr::VarPath(name.clone(), keys.clone())),
            FindVarDynamic => {
                let name = pop(stack)?;
                stack.push(Expr::DynamicVar(Box::new(name)));
            }
            LookupKey => {
                let key = pop(stack)?;
                let obj = pop(stack)?;
                stack.push(Expr::Lookup {
                    obj: Box::new(obj),
                    key: Box::new(key),
                });
            }
            LookupConstKey(key) => {
                let obj = pop(stack)?;
                stack.push(Expr::LookupConst {
                    obj: Box::new(obj),
                    key: key.clone(),
                });
            }
            LookupConstPath(keys) => {
                let obj = pop(stack)?;
                stack.push(Expr::LookupPath {
                    obj: Box::new(obj),
                    keys: keys.clone(),
                });
            }
            LookupCommand(op) => {
                let obj = pop(stack)?;
                stack.push(Expr::Command {
                    op: *op,
                    obj: Box::new(obj),
                });
            }
            Compare(op) => {
                let rhs = pop(stack)?;
                let lhs = pop(stack)?;
                stack.push(Expr::Compare {
                    op: *op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                });
            }
            CaseCompare => {
                let rhs = pop(stack)?;
                let lhs = pop(stack)?;
                stack.push(Expr::CaseCompare {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                });
            }
            Contains => {
                let rhs = pop(stack)?;
                let lhs = pop(stack)?;
                stack.push(Expr::Contains {
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                });
            }
            BoolNot => {
                let inner = pop(stack)?;
                stack.push(Expr::Not(Box::new(inner)));
            }
            IsTruthy => {}
            NewRange => {
                let end = pop(stack)?;
                let start = pop(stack)?;
                stack.push(Expr::DynamicRange(Box::new(start), Box::new(end)));
            }
            CallFilter { name, argc } => {
                let mut args = Vec::with_capacity(*argc as usize);
                for _ in 0..*argc {
                    args.push(pop(stack)?);
                }
                args.reverse();
                let input = pop(stack)?;
                stack.push(Expr::Filter {
                    name: name.clone(),
                    input: Box::new(input),
                    args,
                });
            }
            BuildHash(n) => {
                let mut pairs = Vec::with_capacity(*n as usize);
                for _ in 0..*n {
                    let value = pop(stack)?;
                    let key = pop(stack)?;
                    pairs.push((key, value));
                }
                pairs.reverse();
                stack.push(Expr::HashLit(pairs));
            }
            LoadTemp(slot) => stack.push(Expr::Temp(*slot)),
            Dup => {
                let top = stack
                    .last()
                    .cloned()
                    .ok_or_else(|| unsupported("DUP on empty expression stack"))?;
                stack.push(top);
            }
            Pop => {
                pop(stack)?;
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Expression followed by its terminator: a write, an assignment, a
    /// temp store, or a conditional jump opening an `if`.
    fn parse_expression(
        &self,
        pc: &mut usize,
        end: usize,
        stmts: &mut Vec<Stmt>,
    ) -> Result<(), Unsupported> {
        let mut stack = ExprStack::new();
        loop {
            if *pc >= end {
                return Err(unsupported("expression ran past the end of its block"));
            }
            let inst = &self.il.instructions[*pc];
            if self.try_reduce(inst, &mut stack)? {
                *pc += 1;
                continue;
            }
            match inst {
                Instruction::WriteValue => {
                    let value = single(stack)?;
                    stmts.push(Stmt::WriteValue {
                        value,
                        span: self.span_at(*pc),
                    });
                    *pc += 1;
                    return Ok(());
                }
                Instruction::Assign(name) => {
                    let value = single(stack)?;
                    stmts.push(Stmt::Assign {
                        name: name.clone(),
                        value,
                        local: false,
                        span: self.span_at(*pc),
                    });
                    *pc += 1;
                    return Ok(());
                }
                Instruction::AssignLocal(name) => {
                    let value = single(stack)?;
                    stmts.push(Stmt::Assign {
                        name: name.clone(),
                        value,
                        local: true,
                        span: self.span_at(*pc),
                    });
                    *pc += 1;
                    return Ok(());
                }
                Instruction::StoreTemp(slot) => {
                    let value = single(stack)?;
                    stmts.push(Stmt::StoreTemp {
                        slot: *slot,
                        value,
                        span: self.span_at(*pc),
                    });
                    *pc += 1;
                    return Ok(());
                }
                Instruction::JumpIfFalse(target) => {
                    let target = *target as usize;
                    if self.short_circuit_target(target, false) {
                        let left = pop(&mut stack)?;
                        let right = self.parse_short_circuit_rhs(pc, target, end)?;
                        stack.push(Expr::And(Box::new(left), Box::new(right)));
                        continue;
                    }
                    let cond = single(stack)?;
                    let stmt = self.parse_if(pc, target, cond)?;
                    stmts.push(stmt);
                    return Ok(());
                }
                Instruction::JumpIfTrue(target) => {
                    let target = *target as usize;
                    if self.short_circuit_target(target, true) {
                        let left = pop(&mut stack)?;
                        let right = self.parse_short_circuit_rhs(pc, target, end)?;
                        stack.push(Expr::Or(Box::new(left), Box::new(right)));
                        continue;
                    }
                    // Jump-over-body when true: the branch runs when the
                    // condition is falsy.
                    let cond = Expr::Not(Box::new(single(stack)?));
                    let stmt = self.parse_if(pc, target, cond)?;
                    stmts.push(stmt);
                    return Ok(());
                }
                other => {
                    return Err(unsupported(format!(
                        "expression terminator {other} at {pc}"
                    )))
                }
            }
        }
    }

    /// `JUMP_IF_FALSE j` where `j` anchors `CONST_FALSE` whose successor
    /// is not a store or write is the parser's shape for `and`; the dual
    /// with `CONST_TRUE` is `or`. A store successor instead marks the
    /// case/when match-flag pattern, which parses as a real conditional.
    fn short_circuit_target(&self, target: usize, or: bool) -> bool {
        if !matches!(self.at(target), Some(Instruction::Label(_))) {
            return false;
        }
        let is_const = match self.at(target + 1) {
            Some(Instruction::ConstFalse) => !or,
            Some(Instruction::ConstTrue) => or,
            _ => false,
        };
        is_const
            && !matches!(
                self.at(target + 2),
                Some(
                    Instruction::StoreTemp(_)
                        | Instruction::WriteValue
                        | Instruction::WriteRaw(_)
                        | Instruction::WriteVar(_)
                        | Instruction::WriteVarPath(_, _)
                )
            )
    }

    /// Parse the right operand of a short-circuit connective. On entry
    /// `pc` sits on the conditional jump; on exit it sits just past the
    /// join label.
    fn parse_short_circuit_rhs(
        &self,
        pc: &mut usize,
        target: usize,
        end: usize,
    ) -> Result<Expr, Unsupported> {
        *pc += 1;
        let mut stack = ExprStack::new();
        loop {
            if *pc >= end {
                return Err(unsupported("unterminated boolean expression"));
            }
            let inst = &self.il.instructions[*pc];
            if self.try_reduce(inst, &mut stack)? {
                *pc += 1;
                continue;
            }
            match inst {
                Instruction::Jump(k) if *k as usize == target + 2 => {
                    let value = single(stack)?;
                    *pc = target + 3;
                    return Ok(value);
                }
                Instruction::JumpIfFalse(t) if self.short_circuit_target(*t as usize, false) => {
                    let left = pop(&mut stack)?;
                    let right = self.parse_short_circuit_rhs(pc, *t as usize, end)?;
                    stack.push(Expr::And(Box::new(left), Box::new(right)));
                }
                Instruction::JumpIfTrue(t) if self.short_circuit_target(*t as usize, true) => {
                    let left = pop(&mut stack)?;
                    let right = self.parse_short_circuit_rhs(pc, *t as usize, end)?;
                    stack.push(Expr::Or(Box::new(left), Box::new(right)));
                }
                other => {
                    return Err(unsupported(format!(
                        "boolean operand opcode {other} at {pc}"
                    )))
                }
            }
        }
    }

    /// Parse an `if`: condition already built, `pc` on the conditional
    /// jump, `target` its branch-over label. A trailing jump past the
    /// target marks an else branch.
    fn parse_if(&self, pc: &mut usize, target: usize, cond: Expr) -> Result<Stmt, Unsupported> {
        if target <= *pc || target > self.il.len() {
            return Err(unsupported(format!("bad branch target {target}")));
        }
        let span = self.span_at(*pc);
        let then_start = *pc + 1;
        let else_end = match self.at(target.wrapping_sub(1)) {
            Some(Instruction::Jump(e))
                if target >= 1 && target - 1 >= then_start && (*e as usize) >= target =>
            {
                Some(*e as usize)
            }
            _ => None,
        };
        let stmt = match else_end {
            Some(join) => {
                if join > self.il.len() {
                    return Err(unsupported(format!("bad join target {join}")));
                }
                let then_branch = self.parse_range(then_start, target - 1)?;
                let else_branch = self.parse_range(target, join)?;
                *pc = join;
                Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                    span,
                }
            }
            None => {
                let then_branch = self.parse_range(then_start, target)?;
                *pc = target;
                Stmt::If {
                    cond,
                    then_branch,
                    else_branch: Vec::new(),
                    span,
                }
            }
        };
        Ok(stmt)
    }

    /// Loop head at `pc`: first collection copy, `JUMP_IF_EMPTY`, second
    /// copy, `FOR_INIT`, then the fixed loop skeleton.
    fn parse_for_statement(&self, pc: &mut usize, end: usize) -> Result<Stmt, Unsupported> {
        let mut stack = ExprStack::new();
        while *pc < end && self.try_reduce(&self.il.instructions[*pc], &mut stack)? {
            *pc += 1;
        }
        let Some(Instruction::JumpIfEmpty(after)) = self.at(*pc) else {
            return Err(unsupported("expected JUMP_IF_EMPTY in loop head"));
        };
        let after = *after as usize;
        single(stack)?; // emptiness-test copy; FOR_INIT consumes the second
        self.parse_for(pc, after, end)
    }

    fn parse_for(&self, pc: &mut usize, after: usize, end: usize) -> Result<Stmt, Unsupported> {
        *pc += 1;
        let mut stack = ExprStack::new();
        while *pc < end && self.try_reduce(&self.il.instructions[*pc], &mut stack)? {
            *pc += 1;
        }
        let collection = single(stack)?;

        let Some(Instruction::ForInit {
            var,
            name,
            reversed,
        }) = self.at(*pc)
        else {
            return Err(unsupported("expected FOR_INIT after emptiness test"));
        };
        let (var, name, reversed) = (var.clone(), name.clone(), *reversed);
        let span = self.span_at(*pc);
        *pc += 1;

        if !matches!(self.at(*pc), Some(Instruction::PushForloop)) {
            return Err(unsupported("expected PUSH_FORLOOP"));
        }
        *pc += 1;
        let top = *pc;
        if !matches!(self.at(*pc), Some(Instruction::Label(_))) {
            return Err(unsupported("expected loop top label"));
        }
        *pc += 1;
        if !matches!(self.at(*pc), Some(Instruction::ForNext)) {
            return Err(unsupported("expected FOR_NEXT"));
        }
        *pc += 1;
        let Some(Instruction::JumpIfFalse(done)) = self.at(*pc) else {
            return Err(unsupported("expected loop exit jump"));
        };
        let done = *done as usize;
        *pc += 1;
        if done <= *pc || done >= self.il.len() {
            return Err(unsupported("bad loop exit target"));
        }

        match self.at(done - 1) {
            Some(Instruction::Jump(back)) if *back as usize == top => {}
            _ => return Err(unsupported("loop body does not end with a back edge")),
        }
        let body = self.parse_range(*pc, done - 1)?;

        if !matches!(self.at(done + 1), Some(Instruction::ForEnd)) {
            return Err(unsupported("expected FOR_END"));
        }
        if !matches!(self.at(done + 2), Some(Instruction::PopForloop)) {
            return Err(unsupported("expected POP_FORLOOP"));
        }
        *pc = done + 3;

        let else_branch = match self.at(*pc) {
            Some(Instruction::Jump(join)) if after == *pc + 1 => {
                let join = *join as usize;
                if join > self.il.len() {
                    return Err(unsupported(format!("bad loop join target {join}")));
                }
                let branch = self.parse_range(after, join)?;
                *pc = join;
                branch
            }
            _ => Vec::new(),
        };

        Ok(Stmt::For {
            var,
            name,
            reversed,
            collection,
            body,
            else_branch,
            span,
        })
    }
}

fn is_producer(inst: &Instruction) -> bool {
    use Instruction::*;
    matches!(
        inst,
        ConstNil
            | ConstTrue
            | ConstFalse
            | ConstInt(_)
            | ConstFloat(_)
            | ConstString(_)
            | ConstRange(_, _)
            | ConstEmpty
            | ConstBlank
            | FindVar(_)
            | FindVarPath(_, _)
            | FindVarDynamic
            | LookupKey
            | LookupConstKey(_)
            | LookupConstPath(_)
            | LookupCommand(_)
            | Compare(_)
            | CaseCompare
            | Contains
            | BoolNot
            | IsTruthy
            | NewRange
            | CallFilter { .. }
            | BuildHash(_)
            | LoadTemp(_)
            | Dup
            | Pop
    )
}

fn pop(stack: &mut ExprStack) -> Result<Expr, Unsupported> {
    stack
        .pop()
        .ok_or_else(|| unsupported("expression stack underflow"))
}

/// The stack must hold exactly the one value a terminator consumes.
fn single(mut stack: ExprStack) -> Result<Expr, Unsupported> {
    let value = pop(&mut stack)?;
    if !stack.is_empty() {
        return Err(unsupported("expression left extra values on the stack"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use liquidc_frontend::il::{link, PartialCall, Span};
    use liquidc_frontend::parse;

    fn lowered(source: &str) -> Result<Program, Unsupported> {
        let mut il = parse(source).unwrap();
        link(&mut il).unwrap();
        lower(&il)
    }

    #[test]
    fn test_simple_output_lowers() {
        let program = lowered("Hello {{ name }}").unwrap();
        assert_eq!(program.stmts.len(), 2);
        assert_eq!(program.stmts[0], Stmt::WriteRaw("Hello ".into()));
        assert!(matches!(
            &program.stmts[1],
            Stmt::WriteValue {
                value: Expr::Var(name),
                ..
            } if name == "name"
        ));
    }

    #[test]
    fn test_range_for_loop_lowers_to_native_loop() {
        let program = lowered("{% for i in (1..3) %}{{ i }}{% endfor %}").unwrap();
        assert!(matches!(
            &program.stmts[0],
            Stmt::For {
                collection: Expr::RangeLit(1, 3),
                reversed: false,
                ..
            }
        ));
    }

    #[test]
    fn test_if_else_lowers() {
        let program = lowered("{% if x %}a{% else %}b{% endif %}").unwrap();
        match &program.stmts[0] {
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                assert_eq!(then_branch, &vec![Stmt::WriteRaw("a".into())]);
                assert_eq!(else_branch, &vec![Stmt::WriteRaw("b".into())]);
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn test_and_or_reconstruct() {
        let program = lowered("{% if a and b or c %}x{% endif %}").unwrap();
        match &program.stmts[0] {
            Stmt::If { cond, .. } => {
                assert!(matches!(cond, Expr::Or(lhs, _) if matches!(**lhs, Expr::And(_, _))));
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn test_case_lowers_through_temps() {
        let program =
            lowered("{% case x %}{% when 1 %}a{% else %}b{% endcase %}").unwrap();
        assert!(program
            .stmts
            .iter()
            .any(|s| matches!(s, Stmt::StoreTemp { .. })));
    }

    #[test]
    fn test_partials_refused() {
        assert!(lowered("{% render 'card' %}").is_err());
    }

    #[test]
    fn test_tablerow_refused() {
        assert!(lowered("{% tablerow i in items %}{{ i }}{% endtablerow %}").is_err());
    }

    #[test]
    fn test_break_refused() {
        assert!(lowered("{% for i in (1..3) %}{% break %}{% endfor %}").is_err());
    }

    #[test]
    fn test_unlinked_il_refused() {
        // Deliberately not linked: jump operands still hold label ids,
        // which do not point at LABEL instructions.
        let mut il = Il::new();
        il.push(Instruction::FindVar("x".into()), Span::default());
        il.push(Instruction::IsTruthy, Span::default());
        il.push(Instruction::JumpIfFalse(17), Span::default());
        il.push(Instruction::WriteRaw("a".into()), Span::default());
        il.push(Instruction::Label(17), Span::default());
        il.push(Instruction::Halt, Span::default());
        assert!(lower(&il).is_err());
    }

    #[test]
    fn test_partial_gate_covers_const_forms() {
        let mut il = Il::new();
        il.push(
            Instruction::ConstRender(PartialCall::new("p", vec![])),
            Span::default(),
        );
        il.push(Instruction::Halt, Span::default());
        assert!(lower(&il).is_err());
    }

    #[test]
    fn test_stray_loop_opcode_refused() {
        let mut il = Il::new();
        il.push(Instruction::ForNext, Span::default());
        il.push(Instruction::Halt, Span::default());
        assert!(lower(&il).is_err());
    }
}
