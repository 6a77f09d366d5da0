//! Intermediate Language for compiled templates
//!
//! The parser emits a linear, stack-oriented instruction stream paired with
//! a span per instruction. Jumps reference labels by id; [`link`] resolves
//! them to instruction indices once the optimizer is done moving code.

use crate::error::LinkError;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Source byte range attached to an instruction for error attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start: start as u32,
            end: end as u32,
        }
    }

    /// Smallest span covering both inputs.
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Constant values the compiler can synthesize and re-emit.
///
/// `Empty` and `Blank` are the sentinel literals a template spells as
/// `empty` and `blank`; they are ordinary variants here, not shared
/// singletons.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Nil,
    True,
    False,
    Int(i64),
    Float(f64),
    Str(String),
    Range(i64, i64),
    Empty,
    Blank,
}

/// One step of a `cycle` tag: either a literal or a variable reference.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleValue {
    Lit(Const),
    Var(String),
}

/// Argument value handed to a partial. `Var` may be a dotted path
/// (`user.name`), resolved against the caller's scope at render time.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialArg {
    Lit(Const),
    Var(String),
}

/// A partial compiled ahead of time and embedded into the caller's IL.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPartial {
    pub source: String,
    pub il: Il,
}

/// Operand bundle shared by the four partial opcodes.
#[derive(Debug, Clone, PartialEq)]
pub struct PartialCall {
    pub name: String,
    pub args: Vec<(String, PartialArg)>,
    /// Pre-compiled partial, attached when inlining is enabled and the
    /// loader could produce the source at compile time.
    pub template: Option<Arc<CompiledPartial>>,
}

impl PartialCall {
    pub fn new(name: impl Into<String>, args: Vec<(String, PartialArg)>) -> Self {
        Self {
            name: name.into(),
            args,
            template: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
        };
        f.write_str(s)
    }
}

/// Built-in property commands that bypass the filter machinery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOp {
    Size,
    Length,
    First,
    Last,
}

impl fmt::Display for CommandOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommandOp::Size => "size",
            CommandOp::Length => "length",
            CommandOp::First => "first",
            CommandOp::Last => "last",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptKind {
    Break,
    Continue,
}

/// Template IL instruction.
///
/// Operands are small literals or nested lists; no instruction points at
/// another instruction. Jump operands hold a label id until [`link`]
/// rewrites them to instruction indices.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // Constants
    ConstNil,
    ConstTrue,
    ConstFalse,
    ConstInt(i64),
    ConstFloat(f64),
    ConstString(String),
    ConstRange(i64, i64),
    ConstEmpty,
    ConstBlank,

    // Variable access
    FindVar(String),
    FindVarPath(String, Vec<String>),
    FindVarDynamic,
    LookupKey,
    LookupConstKey(String),
    LookupConstPath(Vec<String>),
    LookupCommand(CommandOp),

    // Output
    WriteRaw(String),
    WriteValue,
    WriteVar(String),
    WriteVarPath(String, Vec<String>),

    // Arithmetic / logic on the stack
    Compare(CompareOp),
    CaseCompare,
    Contains,
    BoolNot,
    IsTruthy,
    NewRange,

    // Filters: stack on entry is [.., input, arg0, .., argN-1]
    CallFilter { name: String, argc: u8 },

    // Control flow
    Label(u32),
    Jump(u32),
    JumpIfFalse(u32),
    JumpIfTrue(u32),
    JumpIfEmpty(u32),
    JumpIfInterrupt(u32),
    Halt,

    // Scope and state
    PushScope,
    PopScope,
    Assign(String),
    AssignLocal(String),
    Increment(String),
    Decrement(String),
    PushCapture,
    PopCapture,
    PushInterrupt(InterruptKind),
    PopInterrupt,
    StoreTemp(u32),
    LoadTemp(u32),
    Dup,
    Pop,
    BuildHash(u16),
    IfchangedCheck(u32),
    Noop,

    // Loops
    ForInit {
        var: String,
        name: String,
        reversed: bool,
    },
    ForNext,
    ForEnd,
    PushForloop,
    PopForloop,
    TablerowInit {
        var: String,
        name: String,
        cols: Option<u32>,
    },
    TablerowNext,
    TablerowEnd,

    // Cycle
    CycleStep {
        identity: String,
        values: Vec<CycleValue>,
    },
    CycleStepVar {
        name_var: String,
        values: Vec<CycleValue>,
    },

    // Partials. The Const variants exist only between parsing and the
    // partial-lowering step; the optimizer and VM never see them.
    RenderPartial(PartialCall),
    IncludePartial(PartialCall),
    ConstRender(PartialCall),
    ConstInclude(PartialCall),
}

impl Instruction {
    /// Re-emit a folded constant as the opcode that produces it.
    pub fn from_const(c: &Const) -> Instruction {
        match c {
            Const::Nil => Instruction::ConstNil,
            Const::True => Instruction::ConstTrue,
            Const::False => Instruction::ConstFalse,
            Const::Int(v) => Instruction::ConstInt(*v),
            Const::Float(v) => Instruction::ConstFloat(*v),
            Const::Str(s) => Instruction::ConstString(s.clone()),
            Const::Range(a, b) => Instruction::ConstRange(*a, *b),
            Const::Empty => Instruction::ConstEmpty,
            Const::Blank => Instruction::ConstBlank,
        }
    }

    /// The constant this instruction pushes, if it is a constant producer.
    pub fn as_const(&self) -> Option<Const> {
        match self {
            Instruction::ConstNil => Some(Const::Nil),
            Instruction::ConstTrue => Some(Const::True),
            Instruction::ConstFalse => Some(Const::False),
            Instruction::ConstInt(v) => Some(Const::Int(*v)),
            Instruction::ConstFloat(v) => Some(Const::Float(*v)),
            Instruction::ConstString(s) => Some(Const::Str(s.clone())),
            Instruction::ConstRange(a, b) => Some(Const::Range(*a, *b)),
            Instruction::ConstEmpty => Some(Const::Empty),
            Instruction::ConstBlank => Some(Const::Blank),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(
            self,
            Instruction::ConstNil
                | Instruction::ConstTrue
                | Instruction::ConstFalse
                | Instruction::ConstInt(_)
                | Instruction::ConstFloat(_)
                | Instruction::ConstString(_)
                | Instruction::ConstRange(_, _)
                | Instruction::ConstEmpty
                | Instruction::ConstBlank
        )
    }

    /// Jump operand, for any of the five jump opcodes.
    pub fn jump_target(&self) -> Option<u32> {
        match self {
            Instruction::Jump(t)
            | Instruction::JumpIfFalse(t)
            | Instruction::JumpIfTrue(t)
            | Instruction::JumpIfEmpty(t)
            | Instruction::JumpIfInterrupt(t) => Some(*t),
            _ => None,
        }
    }

    pub fn jump_target_mut(&mut self) -> Option<&mut u32> {
        match self {
            Instruction::Jump(t)
            | Instruction::JumpIfFalse(t)
            | Instruction::JumpIfTrue(t)
            | Instruction::JumpIfEmpty(t)
            | Instruction::JumpIfInterrupt(t) => Some(t),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Instruction::*;
        match self {
            ConstNil => write!(f, "CONST_NIL"),
            ConstTrue => write!(f, "CONST_TRUE"),
            ConstFalse => write!(f, "CONST_FALSE"),
            ConstInt(v) => write!(f, "CONST_INT {v}"),
            ConstFloat(v) => write!(f, "CONST_FLOAT {v}"),
            ConstString(s) => write!(f, "CONST_STRING {s:?}"),
            ConstRange(a, b) => write!(f, "CONST_RANGE {a} {b}"),
            ConstEmpty => write!(f, "CONST_EMPTY"),
            ConstBlank => write!(f, "CONST_BLANK"),
            FindVar(n) => write!(f, "FIND_VAR {n}"),
            FindVarPath(n, keys) => write!(f, "FIND_VAR_PATH {n} {keys:?}"),
            FindVarDynamic => write!(f, "FIND_VAR_DYNAMIC"),
            LookupKey => write!(f, "LOOKUP_KEY"),
            LookupConstKey(k) => write!(f, "LOOKUP_CONST_KEY {k}"),
            LookupConstPath(keys) => write!(f, "LOOKUP_CONST_PATH {keys:?}"),
            LookupCommand(op) => write!(f, "LOOKUP_COMMAND {op}"),
            WriteRaw(s) => write!(f, "WRITE_RAW {s:?}"),
            WriteValue => write!(f, "WRITE_VALUE"),
            WriteVar(n) => write!(f, "WRITE_VAR {n}"),
            WriteVarPath(n, keys) => write!(f, "WRITE_VAR_PATH {n} {keys:?}"),
            Compare(op) => write!(f, "COMPARE {op}"),
            CaseCompare => write!(f, "CASE_COMPARE"),
            Contains => write!(f, "CONTAINS"),
            BoolNot => write!(f, "BOOL_NOT"),
            IsTruthy => write!(f, "IS_TRUTHY"),
            NewRange => write!(f, "NEW_RANGE"),
            CallFilter { name, argc } => write!(f, "CALL_FILTER {name} {argc}"),
            Label(id) => write!(f, "LABEL {id}"),
            Jump(t) => write!(f, "JUMP {t}"),
            JumpIfFalse(t) => write!(f, "JUMP_IF_FALSE {t}"),
            JumpIfTrue(t) => write!(f, "JUMP_IF_TRUE {t}"),
            JumpIfEmpty(t) => write!(f, "JUMP_IF_EMPTY {t}"),
            JumpIfInterrupt(t) => write!(f, "JUMP_IF_INTERRUPT {t}"),
            Halt => write!(f, "HALT"),
            PushScope => write!(f, "PUSH_SCOPE"),
            PopScope => write!(f, "POP_SCOPE"),
            Assign(n) => write!(f, "ASSIGN {n}"),
            AssignLocal(n) => write!(f, "ASSIGN_LOCAL {n}"),
            Increment(n) => write!(f, "INCREMENT {n}"),
            Decrement(n) => write!(f, "DECREMENT {n}"),
            PushCapture => write!(f, "PUSH_CAPTURE"),
            PopCapture => write!(f, "POP_CAPTURE"),
            PushInterrupt(InterruptKind::Break) => write!(f, "PUSH_INTERRUPT break"),
            PushInterrupt(InterruptKind::Continue) => write!(f, "PUSH_INTERRUPT continue"),
            PopInterrupt => write!(f, "POP_INTERRUPT"),
            StoreTemp(s) => write!(f, "STORE_TEMP {s}"),
            LoadTemp(s) => write!(f, "LOAD_TEMP {s}"),
            Dup => write!(f, "DUP"),
            Pop => write!(f, "POP"),
            BuildHash(n) => write!(f, "BUILD_HASH {n}"),
            IfchangedCheck(id) => write!(f, "IFCHANGED_CHECK {id}"),
            Noop => write!(f, "NOOP"),
            ForInit {
                var,
                name,
                reversed,
            } => write!(f, "FOR_INIT {var} {name} {reversed}"),
            ForNext => write!(f, "FOR_NEXT"),
            ForEnd => write!(f, "FOR_END"),
            PushForloop => write!(f, "PUSH_FORLOOP"),
            PopForloop => write!(f, "POP_FORLOOP"),
            TablerowInit { var, name, cols } => {
                write!(f, "TABLEROW_INIT {var} {name} {cols:?}")
            }
            TablerowNext => write!(f, "TABLEROW_NEXT"),
            TablerowEnd => write!(f, "TABLEROW_END"),
            CycleStep { identity, values } => {
                write!(f, "CYCLE_STEP {identity} ({} values)", values.len())
            }
            CycleStepVar { name_var, values } => {
                write!(f, "CYCLE_STEP_VAR {name_var} ({} values)", values.len())
            }
            RenderPartial(c) => write!(f, "RENDER_PARTIAL {}", c.name),
            IncludePartial(c) => write!(f, "INCLUDE_PARTIAL {}", c.name),
            ConstRender(c) => write!(f, "CONST_RENDER {}", c.name),
            ConstInclude(c) => write!(f, "CONST_INCLUDE {}", c.name),
        }
    }
}

/// Instruction stream plus the parallel span array.
///
/// All mutation goes through methods that keep the two vectors the same
/// length; passes that edit the stream by hand are responsible for calling
/// [`Il::debug_assert_coherent`] before returning.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Il {
    pub instructions: Vec<Instruction>,
    pub spans: Vec<Span>,
}

impl Il {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn push(&mut self, inst: Instruction, span: Span) {
        self.instructions.push(inst);
        self.spans.push(span);
    }

    /// Replace the inclusive instruction range `[start, end]` with `with`,
    /// assigning every inserted instruction the merged span of the removed
    /// range.
    pub fn replace(&mut self, start: usize, end: usize, with: Vec<Instruction>) {
        let span = self.spans[start..=end]
            .iter()
            .copied()
            .reduce(Span::merge)
            .unwrap_or_default();
        let spans = vec![span; with.len()];
        self.instructions.splice(start..=end, with);
        self.spans.splice(start..=end, spans);
    }

    /// Remove the instruction at `index` together with its span.
    pub fn remove(&mut self, index: usize) {
        self.instructions.remove(index);
        self.spans.remove(index);
    }

    /// Keep only instructions the predicate accepts; spans follow.
    pub fn retain(&mut self, mut keep: impl FnMut(usize, &Instruction) -> bool) {
        let mut idx = 0;
        let mut kept = Vec::with_capacity(self.instructions.len());
        self.instructions.retain(|inst| {
            let k = keep(idx, inst);
            kept.push(k);
            idx += 1;
            k
        });
        let mut it = kept.into_iter();
        self.spans.retain(|_| it.next().unwrap_or(true));
    }

    /// Drop everything from `len` onward (used to discard speculative
    /// compilation output).
    pub fn truncate(&mut self, len: usize) {
        self.instructions.truncate(len);
        self.spans.truncate(len);
    }

    pub fn debug_assert_coherent(&self) {
        debug_assert_eq!(
            self.instructions.len(),
            self.spans.len(),
            "span array out of sync with instructions"
        );
    }
}

impl fmt::Display for Il {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, inst) in self.instructions.iter().enumerate() {
            let span = self.spans.get(i).copied().unwrap_or_default();
            writeln!(f, "{i:4}  {inst}  ; {}..{}", span.start, span.end)?;
        }
        Ok(())
    }
}

/// Resolve label ids to instruction indices.
///
/// Builds the `label id -> index` table, then rewrites every jump operand.
/// `LABEL` instructions stay in place; they are no-ops for the VM but
/// anchor structured lowering.
pub fn link(il: &mut Il) -> Result<(), LinkError> {
    let mut targets: FxHashMap<u32, u32> = FxHashMap::default();
    for (index, inst) in il.instructions.iter().enumerate() {
        if let Instruction::Label(id) = inst {
            if targets.insert(*id, index as u32).is_some() {
                return Err(LinkError::DuplicateLabel(*id));
            }
        }
    }
    for inst in il.instructions.iter_mut() {
        if let Some(target) = inst.jump_target_mut() {
            match targets.get(target) {
                Some(index) => *target = *index,
                None => return Err(LinkError::UndefinedLabel(*target)),
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::new(0, 1)
    }

    #[test]
    fn test_link_rewrites_jump_operands() {
        let mut il = Il::new();
        il.push(Instruction::Jump(7), span());
        il.push(Instruction::WriteRaw("x".into()), span());
        il.push(Instruction::Label(7), span());
        il.push(Instruction::Halt, span());

        link(&mut il).unwrap();
        assert_eq!(il.instructions[0], Instruction::Jump(2));
        // Labels stay in place after linking.
        assert_eq!(il.instructions[2], Instruction::Label(7));
    }

    #[test]
    fn test_link_undefined_label() {
        let mut il = Il::new();
        il.push(Instruction::JumpIfFalse(3), span());
        il.push(Instruction::Halt, span());

        assert_eq!(link(&mut il), Err(LinkError::UndefinedLabel(3)));
    }

    #[test]
    fn test_link_duplicate_label() {
        let mut il = Il::new();
        il.push(Instruction::Label(1), span());
        il.push(Instruction::Label(1), span());

        assert_eq!(link(&mut il), Err(LinkError::DuplicateLabel(1)));
    }

    #[test]
    fn test_replace_merges_spans() {
        let mut il = Il::new();
        il.push(Instruction::ConstInt(1), Span::new(0, 3));
        il.push(Instruction::ConstInt(2), Span::new(3, 6));
        il.push(Instruction::Compare(CompareOp::Eq), Span::new(6, 8));

        il.replace(0, 2, vec![Instruction::ConstTrue]);
        assert_eq!(il.len(), 1);
        assert_eq!(il.spans[0], Span::new(0, 8));
        il.debug_assert_coherent();
    }

    #[test]
    fn test_retain_keeps_spans_in_lockstep() {
        let mut il = Il::new();
        il.push(Instruction::Noop, Span::new(0, 1));
        il.push(Instruction::Halt, Span::new(1, 2));
        il.push(Instruction::Noop, Span::new(2, 3));

        il.retain(|_, inst| !matches!(inst, Instruction::Noop));
        assert_eq!(il.len(), 1);
        assert_eq!(il.spans[0], Span::new(1, 2));
    }

    #[test]
    fn test_const_round_trip() {
        let consts = [
            Const::Nil,
            Const::True,
            Const::Int(42),
            Const::Str("hi".into()),
            Const::Range(1, 3),
            Const::Empty,
            Const::Blank,
        ];
        for c in consts {
            assert_eq!(Instruction::from_const(&c).as_const(), Some(c));
        }
    }
}
