//! Template parser
//!
//! Walks the lexed segment stream and compiles it straight into IL; there
//! is no intermediate AST. Expressions are emitted in stack order, tags
//! expand into the jump/label shapes the optimizer and the structured
//! lowering both expect.

use crate::error::{ParseError, Result};
use crate::il::{
    CommandOp, CompareOp, Const, CycleValue, Il, Instruction, InterruptKind, PartialArg,
    PartialCall, Span,
};
use crate::lexer::{tokenize, Segment};
use smallvec::SmallVec;

/// Compile template source into unoptimized, unlinked IL.
pub fn parse(source: &str) -> Result<Il> {
    Parser::new(source)?.run()
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Comparison(CompareOp),
    Pipe,
    Colon,
    Comma,
    Dot,
    DotDot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Assign,
    Eof,
}

/// Token scanner over a single piece of tag or output markup.
struct Scanner<'a> {
    src: &'a str,
    pos: usize,
    base: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str, base: usize) -> Self {
        Self { src, pos: 0, base }
    }

    fn offset(&self) -> usize {
        self.base + self.pos
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::syntax(self.offset(), message)
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
    }

    fn peek(&mut self) -> Result<Tok> {
        let saved = self.pos;
        let tok = self.next()?;
        self.pos = saved;
        Ok(tok)
    }

    fn next(&mut self) -> Result<Tok> {
        self.skip_whitespace();
        let Some(c) = self.peek_char() else {
            return Ok(Tok::Eof);
        };

        match c {
            '\'' | '"' => self.lex_string(c),
            '0'..='9' => self.lex_number(false),
            '-' if self.src[self.pos + 1..].starts_with(|d: char| d.is_ascii_digit()) => {
                self.pos += 1;
                self.lex_number(true)
            }
            '|' => self.single(Tok::Pipe),
            ':' => self.single(Tok::Colon),
            ',' => self.single(Tok::Comma),
            '.' => {
                if self.src[self.pos..].starts_with("..") {
                    self.pos += 2;
                    Ok(Tok::DotDot)
                } else {
                    self.single(Tok::Dot)
                }
            }
            '[' => self.single(Tok::LBracket),
            ']' => self.single(Tok::RBracket),
            '(' => self.single(Tok::LParen),
            ')' => self.single(Tok::RParen),
            '=' => {
                if self.src[self.pos..].starts_with("==") {
                    self.pos += 2;
                    Ok(Tok::Comparison(CompareOp::Eq))
                } else {
                    self.single(Tok::Assign)
                }
            }
            '!' => {
                if self.src[self.pos..].starts_with("!=") {
                    self.pos += 2;
                    Ok(Tok::Comparison(CompareOp::Ne))
                } else {
                    Err(self.error("unexpected '!'"))
                }
            }
            '<' => {
                if self.src[self.pos..].starts_with("<=") {
                    self.pos += 2;
                    Ok(Tok::Comparison(CompareOp::Le))
                } else if self.src[self.pos..].starts_with("<>") {
                    self.pos += 2;
                    Ok(Tok::Comparison(CompareOp::Ne))
                } else {
                    self.single(Tok::Comparison(CompareOp::Lt))
                }
            }
            '>' => {
                if self.src[self.pos..].starts_with(">=") {
                    self.pos += 2;
                    Ok(Tok::Comparison(CompareOp::Ge))
                } else {
                    self.single(Tok::Comparison(CompareOp::Gt))
                }
            }
            c if c.is_alphabetic() || c == '_' => self.lex_ident(),
            other => Err(self.error(format!("unexpected character '{other}'"))),
        }
    }

    fn single(&mut self, tok: Tok) -> Result<Tok> {
        self.pos += 1;
        Ok(tok)
    }

    fn lex_string(&mut self, quote: char) -> Result<Tok> {
        let start = self.pos;
        self.pos += 1;
        while let Some(c) = self.peek_char() {
            self.pos += c.len_utf8();
            if c == quote {
                return Ok(Tok::Str(self.src[start + 1..self.pos - 1].to_string()));
            }
        }
        Err(ParseError::syntax(
            self.base + start,
            "unterminated string literal",
        ))
    }

    fn lex_number(&mut self, negative: bool) -> Result<Tok> {
        let start = self.pos;
        while matches!(self.peek_char(), Some('0'..='9')) {
            self.pos += 1;
        }
        let mut float = false;
        // Only treat '.' as a decimal point when a digit follows; `1..3`
        // must lex as Int DotDot Int.
        if self.src[self.pos..].starts_with('.')
            && self.src[self.pos + 1..].starts_with(|d: char| d.is_ascii_digit())
        {
            float = true;
            self.pos += 1;
            while matches!(self.peek_char(), Some('0'..='9')) {
                self.pos += 1;
            }
        }
        let text = &self.src[start..self.pos];
        if float {
            let v: f64 = text
                .parse()
                .map_err(|_| ParseError::syntax(self.base + start, "invalid number"))?;
            Ok(Tok::Float(if negative { -v } else { v }))
        } else {
            let v: i64 = text
                .parse()
                .map_err(|_| ParseError::syntax(self.base + start, "invalid number"))?;
            Ok(Tok::Int(if negative { -v } else { v }))
        }
    }

    fn lex_ident(&mut self) -> Result<Tok> {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += c.len_utf8();
            } else {
                break;
            }
        }
        // Liquid allows a trailing '?' on identifiers.
        if self.peek_char() == Some('?') {
            self.pos += 1;
        }
        Ok(Tok::Ident(self.src[start..self.pos].to_string()))
    }
}

struct LoopCtx {
    interrupt_label: u32,
    used: bool,
}

struct Parser {
    segments: Vec<Segment>,
    pos: usize,
    il: Il,
    next_label: u32,
    next_temp: u32,
    loop_stack: Vec<LoopCtx>,
    ifchanged_sites: u32,
    source_len: usize,
}

impl Parser {
    fn new(source: &str) -> Result<Self> {
        Ok(Self {
            segments: tokenize(source)?,
            pos: 0,
            il: Il::new(),
            next_label: 0,
            next_temp: 0,
            loop_stack: Vec::new(),
            ifchanged_sites: 0,
            source_len: source.len(),
        })
    }

    fn run(mut self) -> Result<Il> {
        if let Some((name, _, span)) = self.parse_block(&[])? {
            return Err(ParseError::UnexpectedTag {
                tag: name,
                offset: span.start as usize,
            });
        }
        let end = Span::new(self.source_len, self.source_len);
        self.emit(Instruction::Halt, end);
        self.il.debug_assert_coherent();
        Ok(self.il)
    }

    fn emit(&mut self, inst: Instruction, span: Span) {
        self.il.push(inst, span);
    }

    fn alloc_label(&mut self) -> u32 {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    fn alloc_temp(&mut self) -> u32 {
        let id = self.next_temp;
        self.next_temp += 1;
        id
    }

    /// Compile segments until a stop tag (or the end of input) is reached.
    /// Returns the stop tag that ended the block.
    fn parse_block(&mut self, stop: &[&str]) -> Result<Option<(String, String, Span)>> {
        while self.pos < self.segments.len() {
            let segment = self.segments[self.pos].clone();
            self.pos += 1;
            match segment {
                Segment::Raw { text, span } => {
                    self.emit(Instruction::WriteRaw(text), span);
                }
                Segment::Output { markup, span } => {
                    self.compile_output(&markup, span)?;
                }
                Segment::Tag { name, markup, span } => {
                    if stop.contains(&name.as_str()) {
                        return Ok(Some((name, markup, span)));
                    }
                    self.compile_tag(&name, &markup, span)?;
                }
            }
        }
        Ok(None)
    }

    fn compile_output(&mut self, markup: &str, span: Span) -> Result<()> {
        let mut sc = Scanner::new(markup, span.start as usize);
        self.compile_filtered(&mut sc, span)?;
        self.expect_eof(&mut sc)?;
        self.emit(Instruction::WriteValue, span);
        Ok(())
    }

    fn compile_tag(&mut self, name: &str, markup: &str, span: Span) -> Result<()> {
        match name {
            "assign" => self.compile_assign(markup, span),
            "capture" => self.compile_capture(markup, span),
            "echo" => self.compile_output(markup, span),
            "if" => self.compile_if(markup, span, false),
            "unless" => self.compile_if(markup, span, true),
            "case" => self.compile_case(markup, span),
            "for" => self.compile_for(markup, span),
            "tablerow" => self.compile_tablerow(markup, span),
            "break" => self.compile_interrupt(InterruptKind::Break, span),
            "continue" => self.compile_interrupt(InterruptKind::Continue, span),
            "cycle" => self.compile_cycle(markup, span),
            "increment" => self.compile_counter(markup, span, true),
            "decrement" => self.compile_counter(markup, span, false),
            "include" => self.compile_partial(markup, span, false),
            "render" => self.compile_partial(markup, span, true),
            "ifchanged" => self.compile_ifchanged(span),
            "comment" => self.skip_comment(span),
            _ => Err(ParseError::UnknownTag {
                tag: name.to_string(),
                offset: span.start as usize,
            }),
        }
    }

    // ---- expressions -----------------------------------------------------

    /// Compile a full expression with optional filter chain.
    fn compile_filtered(&mut self, sc: &mut Scanner<'_>, span: Span) -> Result<()> {
        self.compile_primary(sc, span)?;
        while sc.peek()? == Tok::Pipe {
            sc.next()?;
            let name = match sc.next()? {
                Tok::Ident(n) => n,
                _ => return Err(sc.error("expected filter name after '|'")),
            };
            let mut argc: u8 = 0;
            if sc.peek()? == Tok::Colon {
                sc.next()?;
                argc = self.compile_filter_args(sc, span)?;
            }
            self.emit(Instruction::CallFilter { name, argc }, span);
        }
        Ok(())
    }

    /// Positional arguments followed by keyword arguments. Keywords are
    /// collected into a trailing hash argument via `BUILD_HASH`.
    fn compile_filter_args(&mut self, sc: &mut Scanner<'_>, span: Span) -> Result<u8> {
        let mut positional: u8 = 0;
        let mut keywords: SmallVec<[String; 4]> = SmallVec::new();
        loop {
            // `ident:` starts the keyword section.
            let saved = sc.pos;
            if let Tok::Ident(key) = sc.peek()? {
                sc.next()?;
                if sc.peek()? == Tok::Colon {
                    sc.next()?;
                    self.emit(Instruction::ConstString(key.clone()), span);
                    self.compile_primary(sc, span)?;
                    keywords.push(key);
                    if sc.peek()? == Tok::Comma {
                        sc.next()?;
                        continue;
                    }
                    break;
                }
                sc.pos = saved;
            }
            if !keywords.is_empty() {
                return Err(sc.error("positional argument after keyword argument"));
            }
            self.compile_primary(sc, span)?;
            positional += 1;
            if sc.peek()? == Tok::Comma {
                sc.next()?;
                continue;
            }
            break;
        }
        if !keywords.is_empty() {
            self.emit(Instruction::BuildHash(keywords.len() as u16), span);
            positional += 1;
        }
        Ok(positional)
    }

    /// Literals, ranges, and variable paths.
    fn compile_primary(&mut self, sc: &mut Scanner<'_>, span: Span) -> Result<()> {
        match sc.next()? {
            Tok::Str(s) => {
                self.emit(Instruction::ConstString(s), span);
                Ok(())
            }
            Tok::Int(v) => {
                self.emit(Instruction::ConstInt(v), span);
                Ok(())
            }
            Tok::Float(v) => {
                self.emit(Instruction::ConstFloat(v), span);
                Ok(())
            }
            Tok::LParen => self.compile_range(sc, span),
            Tok::Ident(name) => match name.as_str() {
                "nil" | "null" => {
                    self.emit(Instruction::ConstNil, span);
                    Ok(())
                }
                "true" => {
                    self.emit(Instruction::ConstTrue, span);
                    Ok(())
                }
                "false" => {
                    self.emit(Instruction::ConstFalse, span);
                    Ok(())
                }
                "empty" => {
                    self.emit(Instruction::ConstEmpty, span);
                    Ok(())
                }
                "blank" => {
                    self.emit(Instruction::ConstBlank, span);
                    Ok(())
                }
                _ => self.compile_path(sc, name, span),
            },
            other => Err(sc.error(format!("unexpected token {other:?} in expression"))),
        }
    }

    /// `(start..end)` range literal or dynamic range.
    fn compile_range(&mut self, sc: &mut Scanner<'_>, span: Span) -> Result<()> {
        let start_tok = sc.peek()?;
        // Fold fully literal ranges at parse time.
        if let Tok::Int(a) = start_tok {
            let saved = sc.pos;
            sc.next()?;
            if sc.peek()? == Tok::DotDot {
                sc.next()?;
                if let Tok::Int(b) = sc.peek()? {
                    sc.next()?;
                    if sc.next()? == Tok::RParen {
                        self.emit(Instruction::ConstRange(a, b), span);
                        return Ok(());
                    }
                    return Err(sc.error("expected ')' to close range"));
                }
            }
            sc.pos = saved;
        }
        self.compile_primary(sc, span)?;
        if sc.next()? != Tok::DotDot {
            return Err(sc.error("expected '..' in range"));
        }
        self.compile_primary(sc, span)?;
        if sc.next()? != Tok::RParen {
            return Err(sc.error("expected ')' to close range"));
        }
        self.emit(Instruction::NewRange, span);
        Ok(())
    }

    /// Variable reference with `.key` and `[expr]` chains. Emits the naive
    /// lookup chain; the optimizer collapses constant runs.
    fn compile_path(&mut self, sc: &mut Scanner<'_>, name: String, span: Span) -> Result<()> {
        self.emit(Instruction::FindVar(name), span);
        loop {
            match sc.peek()? {
                Tok::Dot => {
                    sc.next()?;
                    let key = match sc.next()? {
                        Tok::Ident(k) => k,
                        _ => return Err(sc.error("expected identifier after '.'")),
                    };
                    match command_op(&key) {
                        Some(op) => self.emit(Instruction::LookupCommand(op), span),
                        None => self.emit(Instruction::LookupConstKey(key), span),
                    }
                }
                Tok::LBracket => {
                    sc.next()?;
                    if let Tok::Str(key) = sc.peek()? {
                        sc.next()?;
                        if sc.next()? != Tok::RBracket {
                            return Err(sc.error("expected ']'"));
                        }
                        self.emit(Instruction::LookupConstKey(key), span);
                    } else {
                        self.compile_primary(sc, span)?;
                        if sc.next()? != Tok::RBracket {
                            return Err(sc.error("expected ']'"));
                        }
                        self.emit(Instruction::LookupKey, span);
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    // ---- conditions ------------------------------------------------------

    /// Compile a condition, leaving a boolean on the stack. Operands are
    /// uniformly normalized with `IS_TRUTHY`; the optimizer strips the
    /// redundant ones.
    fn compile_condition(&mut self, sc: &mut Scanner<'_>, span: Span) -> Result<()> {
        self.compile_and(sc, span)?;
        loop {
            if let Tok::Ident(w) = sc.peek()? {
                if w == "or" {
                    sc.next()?;
                    let taken = self.alloc_label();
                    let end = self.alloc_label();
                    self.emit(Instruction::JumpIfTrue(taken), span);
                    self.compile_and(sc, span)?;
                    self.emit(Instruction::Jump(end), span);
                    self.emit(Instruction::Label(taken), span);
                    self.emit(Instruction::ConstTrue, span);
                    self.emit(Instruction::Label(end), span);
                    continue;
                }
            }
            return Ok(());
        }
    }

    fn compile_and(&mut self, sc: &mut Scanner<'_>, span: Span) -> Result<()> {
        self.compile_comparison(sc, span)?;
        loop {
            if let Tok::Ident(w) = sc.peek()? {
                if w == "and" {
                    sc.next()?;
                    let failed = self.alloc_label();
                    let end = self.alloc_label();
                    self.emit(Instruction::JumpIfFalse(failed), span);
                    self.compile_comparison(sc, span)?;
                    self.emit(Instruction::Jump(end), span);
                    self.emit(Instruction::Label(failed), span);
                    self.emit(Instruction::ConstFalse, span);
                    self.emit(Instruction::Label(end), span);
                    continue;
                }
            }
            return Ok(());
        }
    }

    fn compile_comparison(&mut self, sc: &mut Scanner<'_>, span: Span) -> Result<()> {
        self.compile_primary(sc, span)?;
        match sc.peek()? {
            Tok::Comparison(op) => {
                sc.next()?;
                self.compile_primary(sc, span)?;
                self.emit(Instruction::Compare(op), span);
            }
            Tok::Ident(w) if w == "contains" => {
                sc.next()?;
                self.compile_primary(sc, span)?;
                self.emit(Instruction::Contains, span);
            }
            _ => {}
        }
        self.emit(Instruction::IsTruthy, span);
        Ok(())
    }

    // ---- tags ------------------------------------------------------------

    fn compile_assign(&mut self, markup: &str, span: Span) -> Result<()> {
        let mut sc = Scanner::new(markup, span.start as usize);
        let name = match sc.next()? {
            Tok::Ident(n) => n,
            _ => return Err(sc.error("expected variable name in assign")),
        };
        if sc.next()? != Tok::Assign {
            return Err(sc.error("expected '=' in assign"));
        }
        self.compile_filtered(&mut sc, span)?;
        self.expect_eof(&mut sc)?;
        // Assignments round-trip through a temp so the allocator can pack
        // short-lived slots.
        let temp = self.alloc_temp();
        self.emit(Instruction::StoreTemp(temp), span);
        self.emit(Instruction::LoadTemp(temp), span);
        self.emit(Instruction::Assign(name), span);
        Ok(())
    }

    fn compile_capture(&mut self, markup: &str, span: Span) -> Result<()> {
        let mut sc = Scanner::new(markup, span.start as usize);
        let name = match sc.next()? {
            Tok::Ident(n) => n,
            _ => return Err(sc.error("expected variable name in capture")),
        };
        self.emit(Instruction::PushCapture, span);
        let term = self.parse_block(&["endcapture"])?;
        let close = self.require_close(term, "capture", span)?;
        self.emit(Instruction::PopCapture, close);
        self.emit(Instruction::Assign(name), close);
        Ok(())
    }

    fn compile_if(&mut self, markup: &str, span: Span, unless: bool) -> Result<()> {
        let end_tag = if unless { "endunless" } else { "endif" };
        let end = self.alloc_label();
        let mut markup = markup.to_string();
        let mut span = span;
        let mut first = true;
        loop {
            let mut sc = Scanner::new(&markup, span.start as usize);
            self.compile_condition(&mut sc, span)?;
            self.expect_eof(&mut sc)?;
            if unless && first {
                self.emit(Instruction::BoolNot, span);
            }
            first = false;
            let next = self.alloc_label();
            self.emit(Instruction::JumpIfFalse(next), span);
            let term = self.parse_block(&["elsif", "else", end_tag])?;
            match term {
                Some((name, m, s)) if name == "elsif" => {
                    self.emit(Instruction::Jump(end), s);
                    self.emit(Instruction::Label(next), s);
                    markup = m;
                    span = s;
                }
                Some((name, _, s)) if name == "else" => {
                    self.emit(Instruction::Jump(end), s);
                    self.emit(Instruction::Label(next), s);
                    let term = self.parse_block(&[end_tag])?;
                    let close = self.require_close(term, end_tag, s)?;
                    self.emit(Instruction::Label(end), close);
                    return Ok(());
                }
                Some((_, _, s)) => {
                    self.emit(Instruction::Label(next), s);
                    self.emit(Instruction::Label(end), s);
                    return Ok(());
                }
                None => {
                    return Err(ParseError::UnclosedTag {
                        tag: if unless { "unless" } else { "if" }.into(),
                        offset: span.start as usize,
                    })
                }
            }
        }
    }

    fn compile_case(&mut self, markup: &str, span: Span) -> Result<()> {
        let mut sc = Scanner::new(markup, span.start as usize);
        self.compile_primary(&mut sc, span)?;
        self.expect_eof(&mut sc)?;
        let subject = self.alloc_temp();
        self.emit(Instruction::StoreTemp(subject), span);
        // Match flag consulted by the else clause; every matching branch
        // sets it.
        let flag = self.alloc_temp();
        self.emit(Instruction::ConstFalse, span);
        self.emit(Instruction::StoreTemp(flag), span);

        // Text between `case` and the first `when` renders nothing.
        let mark = self.il.len();
        let mut term = self.parse_block(&["when", "else", "endcase"])?;
        self.il.truncate(mark);

        loop {
            match term {
                Some((name, m, s)) if name == "when" => {
                    self.compile_when_values(&m, s, subject)?;
                    let skip = self.alloc_label();
                    self.emit(Instruction::JumpIfFalse(skip), s);
                    self.emit(Instruction::ConstTrue, s);
                    self.emit(Instruction::StoreTemp(flag), s);
                    term = self.parse_block(&["when", "else", "endcase"])?;
                    self.emit(Instruction::Label(skip), s);
                }
                Some((name, _, s)) if name == "else" => {
                    let skip = self.alloc_label();
                    self.emit(Instruction::LoadTemp(flag), s);
                    self.emit(Instruction::BoolNot, s);
                    self.emit(Instruction::JumpIfFalse(skip), s);
                    let t = self.parse_block(&["endcase"])?;
                    let close = self.require_close(t, "case", s)?;
                    self.emit(Instruction::Label(skip), close);
                    return Ok(());
                }
                Some((_, _, _)) => return Ok(()),
                None => {
                    return Err(ParseError::UnclosedTag {
                        tag: "case".into(),
                        offset: span.start as usize,
                    })
                }
            }
        }
    }

    /// `when a or b` / `when a, b` matches any listed value.
    fn compile_when_values(&mut self, markup: &str, span: Span, subject: u32) -> Result<()> {
        let mut sc = Scanner::new(markup, span.start as usize);
        self.emit(Instruction::LoadTemp(subject), span);
        self.compile_primary(&mut sc, span)?;
        self.emit(Instruction::CaseCompare, span);
        self.emit(Instruction::IsTruthy, span);
        loop {
            match sc.peek()? {
                Tok::Comma => {
                    sc.next()?;
                }
                Tok::Ident(w) if w == "or" => {
                    sc.next()?;
                }
                Tok::Eof => return Ok(()),
                other => return Err(sc.error(format!("unexpected {other:?} in when"))),
            }
            let taken = self.alloc_label();
            let end = self.alloc_label();
            self.emit(Instruction::JumpIfTrue(taken), span);
            self.emit(Instruction::LoadTemp(subject), span);
            self.compile_primary(&mut sc, span)?;
            self.emit(Instruction::CaseCompare, span);
            self.emit(Instruction::IsTruthy, span);
            self.emit(Instruction::Jump(end), span);
            self.emit(Instruction::Label(taken), span);
            self.emit(Instruction::ConstTrue, span);
            self.emit(Instruction::Label(end), span);
        }
    }

    fn compile_for(&mut self, markup: &str, span: Span) -> Result<()> {
        let head = ForHead::parse(markup, span)?;
        let after = self.alloc_label();

        // The collection expression appears twice: once consumed by the
        // emptiness test, once by FOR_INIT.
        self.compile_collection(&head, span)?;
        self.emit(Instruction::JumpIfEmpty(after), span);
        self.compile_collection(&head, span)?;
        self.emit(
            Instruction::ForInit {
                var: head.var.clone(),
                name: head.loop_name(),
                reversed: head.reversed,
            },
            span,
        );
        self.emit(Instruction::PushForloop, span);

        let top = self.alloc_label();
        let done = self.alloc_label();
        let interrupt = self.alloc_label();
        self.emit(Instruction::Label(top), span);
        self.emit(Instruction::ForNext, span);
        self.emit(Instruction::JumpIfFalse(done), span);

        self.loop_stack.push(LoopCtx {
            interrupt_label: interrupt,
            used: false,
        });
        let term = self.parse_block(&["else", "endfor"])?;
        let ctx = self.loop_stack.pop().unwrap_or(LoopCtx {
            interrupt_label: interrupt,
            used: false,
        });

        let close_span = term.as_ref().map(|(_, _, s)| *s).unwrap_or(span);
        self.emit(Instruction::Jump(top), close_span);
        if ctx.used {
            self.emit(Instruction::Label(interrupt), close_span);
            self.emit(Instruction::PopInterrupt, close_span);
            self.emit(Instruction::JumpIfFalse(top), close_span);
        }
        self.emit(Instruction::Label(done), close_span);
        self.emit(Instruction::ForEnd, close_span);
        self.emit(Instruction::PopForloop, close_span);

        match term {
            Some((name, _, s)) if name == "else" => {
                let end = self.alloc_label();
                self.emit(Instruction::Jump(end), s);
                self.emit(Instruction::Label(after), s);
                let t = self.parse_block(&["endfor"])?;
                let close = self.require_close(t, "for", s)?;
                self.emit(Instruction::Label(end), close);
                Ok(())
            }
            Some((_, _, s)) => {
                self.emit(Instruction::Label(after), s);
                Ok(())
            }
            None => Err(ParseError::UnclosedTag {
                tag: "for".into(),
                offset: span.start as usize,
            }),
        }
    }

    fn compile_collection(&mut self, head: &ForHead, span: Span) -> Result<()> {
        let mut sc = Scanner::new(&head.collection, span.start as usize);
        self.compile_primary(&mut sc, span)?;
        self.expect_eof(&mut sc)?;
        Ok(())
    }

    fn compile_tablerow(&mut self, markup: &str, span: Span) -> Result<()> {
        let head = ForHead::parse(markup, span)?;
        self.compile_collection(&head, span)?;
        self.emit(
            Instruction::TablerowInit {
                var: head.var.clone(),
                name: head.loop_name(),
                cols: head.cols,
            },
            span,
        );
        let top = self.alloc_label();
        let done = self.alloc_label();
        self.emit(Instruction::Label(top), span);
        self.emit(Instruction::TablerowNext, span);
        self.emit(Instruction::JumpIfFalse(done), span);
        let term = self.parse_block(&["endtablerow"])?;
        let close = self.require_close(term, "tablerow", span)?;
        self.emit(Instruction::Jump(top), close);
        self.emit(Instruction::Label(done), close);
        self.emit(Instruction::TablerowEnd, close);
        Ok(())
    }

    fn compile_interrupt(&mut self, kind: InterruptKind, span: Span) -> Result<()> {
        // Outside a loop the tag renders nothing.
        if let Some(ctx) = self.loop_stack.last_mut() {
            let label = ctx.interrupt_label;
            ctx.used = true;
            self.emit(Instruction::PushInterrupt(kind), span);
            self.emit(Instruction::JumpIfInterrupt(label), span);
        }
        Ok(())
    }

    fn compile_cycle(&mut self, markup: &str, span: Span) -> Result<()> {
        let mut sc = Scanner::new(markup, span.start as usize);
        let mut group: Option<Tok> = None;

        // A value followed by ':' names the cycle group.
        let saved = sc.pos;
        let first = sc.next()?;
        if sc.peek()? == Tok::Colon {
            sc.next()?;
            group = Some(first);
        } else {
            sc.pos = saved;
        }

        let mut values = Vec::new();
        loop {
            let value = match sc.next()? {
                Tok::Str(s) => CycleValue::Lit(Const::Str(s)),
                Tok::Int(v) => CycleValue::Lit(Const::Int(v)),
                Tok::Float(v) => CycleValue::Lit(Const::Float(v)),
                Tok::Ident(n) => match n.as_str() {
                    "nil" | "null" => CycleValue::Lit(Const::Nil),
                    "true" => CycleValue::Lit(Const::True),
                    "false" => CycleValue::Lit(Const::False),
                    _ => CycleValue::Var(n),
                },
                other => return Err(sc.error(format!("unexpected {other:?} in cycle"))),
            };
            values.push(value);
            match sc.next()? {
                Tok::Comma => {}
                Tok::Eof => break,
                other => return Err(sc.error(format!("unexpected {other:?} in cycle"))),
            }
        }
        if values.is_empty() {
            return Err(sc.error("cycle requires at least one value"));
        }

        let inst = match group {
            Some(Tok::Ident(name_var)) => Instruction::CycleStepVar { name_var, values },
            Some(Tok::Str(s)) => Instruction::CycleStep {
                identity: s,
                values,
            },
            Some(Tok::Int(v)) => Instruction::CycleStep {
                identity: v.to_string(),
                values,
            },
            Some(other) => return Err(sc.error(format!("invalid cycle group {other:?}"))),
            // Ungrouped cycles are identified by their value list.
            None => Instruction::CycleStep {
                identity: markup.to_string(),
                values,
            },
        };
        self.emit(inst, span);
        Ok(())
    }

    fn compile_counter(&mut self, markup: &str, span: Span, increment: bool) -> Result<()> {
        let mut sc = Scanner::new(markup, span.start as usize);
        let name = match sc.next()? {
            Tok::Ident(n) => n,
            _ => return Err(sc.error("expected counter name")),
        };
        self.expect_eof(&mut sc)?;
        let inst = if increment {
            Instruction::Increment(name)
        } else {
            Instruction::Decrement(name)
        };
        self.emit(inst, span);
        Ok(())
    }

    fn compile_partial(&mut self, markup: &str, span: Span, render: bool) -> Result<()> {
        let mut sc = Scanner::new(markup, span.start as usize);
        let name = match sc.next()? {
            Tok::Str(s) => s,
            // The partial opcodes carry literal names only.
            _ => return Err(sc.error("partial name must be a quoted string")),
        };
        let mut args = Vec::new();

        if let Tok::Ident(w) = sc.peek()? {
            if w == "with" {
                sc.next()?;
                let value = self.partial_arg_value(&mut sc)?;
                args.push((name.clone(), value));
            }
        }
        loop {
            match sc.next()? {
                Tok::Comma => {}
                Tok::Eof => break,
                other => return Err(sc.error(format!("unexpected {other:?} in partial args"))),
            }
            let key = match sc.next()? {
                Tok::Ident(k) => k,
                other => return Err(sc.error(format!("expected argument name, got {other:?}"))),
            };
            if sc.next()? != Tok::Colon {
                return Err(sc.error("expected ':' after argument name"));
            }
            let value = self.partial_arg_value(&mut sc)?;
            args.push((key, value));
        }

        let call = PartialCall::new(name, args);
        let inst = if render {
            Instruction::ConstRender(call)
        } else {
            Instruction::ConstInclude(call)
        };
        self.emit(inst, span);
        Ok(())
    }

    /// Partial arguments are literals or dotted variable paths.
    fn partial_arg_value(&mut self, sc: &mut Scanner<'_>) -> Result<PartialArg> {
        match sc.next()? {
            Tok::Str(s) => Ok(PartialArg::Lit(Const::Str(s))),
            Tok::Int(v) => Ok(PartialArg::Lit(Const::Int(v))),
            Tok::Float(v) => Ok(PartialArg::Lit(Const::Float(v))),
            Tok::Ident(n) => match n.as_str() {
                "nil" | "null" => Ok(PartialArg::Lit(Const::Nil)),
                "true" => Ok(PartialArg::Lit(Const::True)),
                "false" => Ok(PartialArg::Lit(Const::False)),
                _ => {
                    let mut path = n;
                    while sc.peek()? == Tok::Dot {
                        sc.next()?;
                        match sc.next()? {
                            Tok::Ident(k) => {
                                path.push('.');
                                path.push_str(&k);
                            }
                            _ => return Err(sc.error("expected identifier after '.'")),
                        }
                    }
                    Ok(PartialArg::Var(path))
                }
            },
            other => Err(sc.error(format!("invalid partial argument {other:?}"))),
        }
    }

    fn compile_ifchanged(&mut self, span: Span) -> Result<()> {
        self.emit(Instruction::PushCapture, span);
        let term = self.parse_block(&["endifchanged"])?;
        let close = self.require_close(term, "ifchanged", span)?;
        let site = self.ifchanged_sites;
        self.ifchanged_sites += 1;
        self.emit(Instruction::IfchangedCheck(site), close);
        Ok(())
    }

    fn skip_comment(&mut self, span: Span) -> Result<()> {
        let mark = self.il.len();
        let term = self.parse_block(&["endcomment"])?;
        self.il.truncate(mark);
        self.require_close(term, "comment", span)?;
        Ok(())
    }

    // ---- helpers ---------------------------------------------------------

    fn expect_eof(&self, sc: &mut Scanner<'_>) -> Result<()> {
        match sc.next()? {
            Tok::Eof => Ok(()),
            other => Err(sc.error(format!("trailing {other:?} in markup"))),
        }
    }

    fn require_close(
        &self,
        term: Option<(String, String, Span)>,
        tag: &str,
        span: Span,
    ) -> Result<Span> {
        match term {
            Some((_, _, s)) => Ok(s),
            None => Err(ParseError::UnclosedTag {
                tag: tag.to_string(),
                offset: span.start as usize,
            }),
        }
    }
}

struct ForHead {
    var: String,
    collection: String,
    reversed: bool,
    cols: Option<u32>,
}

impl ForHead {
    /// `var in collection [reversed] [cols: n]`
    fn parse(markup: &str, span: Span) -> Result<ForHead> {
        let base = span.start as usize;
        let mut sc = Scanner::new(markup, base);
        let var = match sc.next()? {
            Tok::Ident(n) => n,
            _ => return Err(ParseError::syntax(base, "expected loop variable")),
        };
        match sc.next()? {
            Tok::Ident(w) if w == "in" => {}
            _ => return Err(ParseError::syntax(base, "expected 'in'")),
        }

        let mut rest = markup[sc.pos..].trim().to_string();
        let mut reversed = false;
        let mut cols = None;

        if let Some(stripped) = rest.strip_suffix("reversed") {
            reversed = true;
            rest = stripped.trim_end().to_string();
        }
        if let Some(idx) = rest.find("cols:") {
            let spec = rest[idx + 5..].trim();
            let n: u32 = spec
                .parse()
                .map_err(|_| ParseError::syntax(base, "cols expects an integer"))?;
            cols = Some(n);
            rest = rest[..idx].trim_end().to_string();
            if let Some(stripped) = rest.strip_suffix(',') {
                rest = stripped.trim_end().to_string();
            }
        }
        if rest.contains("limit:") || rest.contains("offset:") {
            return Err(ParseError::syntax(
                base,
                "for tag options 'limit' and 'offset' are not supported",
            ));
        }
        if rest.is_empty() {
            return Err(ParseError::syntax(base, "expected collection expression"));
        }

        Ok(ForHead {
            var,
            collection: rest,
            reversed,
            cols,
        })
    }

    fn loop_name(&self) -> String {
        format!("{}-{}", self.var, self.collection)
    }
}

fn command_op(key: &str) -> Option<CommandOp> {
    match key {
        "size" => Some(CommandOp::Size),
        "length" => Some(CommandOp::Length),
        "first" => Some(CommandOp::First),
        "last" => Some(CommandOp::Last),
        _ => None,
    }
}
