//! Template lexer
//!
//! Splits source into raw text, `{{ output }}`, and `{% tag %}` segments,
//! each carrying its byte span. Whitespace control markers (`{{-`, `-%}`)
//! are applied here so the parser only ever sees the text it should emit.

use crate::error::{ParseError, Result};
use crate::il::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Raw { text: String, span: Span },
    Output { markup: String, span: Span },
    Tag { name: String, markup: String, span: Span },
}

impl Segment {
    pub fn span(&self) -> Span {
        match self {
            Segment::Raw { span, .. }
            | Segment::Output { span, .. }
            | Segment::Tag { span, .. } => *span,
        }
    }
}

/// Lexer state: a byte cursor over the source.
pub struct Lexer<'a> {
    source: &'a str,
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();
        let mut trim_next_raw = false;

        while self.position < self.source.len() {
            let rest = &self.source[self.position..];
            match rest.find("{{").into_iter().chain(rest.find("{%")).min() {
                Some(offset) => {
                    let start = self.position;
                    let delim_at = start + offset;
                    let is_tag = self.source[delim_at..].starts_with("{%");
                    let trims_before = self.source[delim_at + 2..].starts_with('-');

                    if offset > 0 {
                        self.push_raw(
                            &mut segments,
                            start,
                            delim_at,
                            trim_next_raw,
                            trims_before,
                        );
                    }
                    trim_next_raw = false;

                    self.position = delim_at;
                    let segment = if is_tag {
                        self.lex_tag(&mut trim_next_raw)?
                    } else {
                        self.lex_output(&mut trim_next_raw)?
                    };

                    // A raw block swallows everything up to its endraw tag.
                    if let Segment::Tag { name, span, .. } = &segment {
                        if name == "raw" {
                            let raw = self.lex_raw_body(span.start as usize)?;
                            segments.push(raw);
                            continue;
                        }
                    }
                    segments.push(segment);
                }
                None => {
                    let start = self.position;
                    let end = self.source.len();
                    self.push_raw(&mut segments, start, end, trim_next_raw, false);
                    self.position = end;
                }
            }
        }

        Ok(segments)
    }

    fn push_raw(
        &self,
        segments: &mut Vec<Segment>,
        start: usize,
        end: usize,
        trim_start: bool,
        trim_end: bool,
    ) {
        let mut text = &self.source[start..end];
        if trim_start {
            text = text.trim_start();
        }
        if trim_end {
            text = text.trim_end();
        }
        if !text.is_empty() {
            segments.push(Segment::Raw {
                text: text.to_string(),
                span: Span::new(start, end),
            });
        }
    }

    /// Lex `{{ ... }}` starting at the current position.
    fn lex_output(&mut self, trim_next: &mut bool) -> Result<Segment> {
        let start = self.position;
        let body_start = start + if self.source[start + 2..].starts_with('-') { 3 } else { 2 };
        let close = self.find_close(body_start, "}}")?;
        let mut body = &self.source[body_start..close];
        if body.ends_with('-') {
            body = &body[..body.len() - 1];
            *trim_next = true;
        }
        self.position = close + 2;
        Ok(Segment::Output {
            markup: body.trim().to_string(),
            span: Span::new(start, self.position),
        })
    }

    /// Lex `{% name ... %}` starting at the current position.
    fn lex_tag(&mut self, trim_next: &mut bool) -> Result<Segment> {
        let start = self.position;
        let body_start = start + if self.source[start + 2..].starts_with('-') { 3 } else { 2 };
        let close = self.find_close(body_start, "%}")?;
        let mut body = &self.source[body_start..close];
        if body.ends_with('-') {
            body = &body[..body.len() - 1];
            *trim_next = true;
        }
        self.position = close + 2;

        let body = body.trim();
        let (name, markup) = match body.find(char::is_whitespace) {
            Some(idx) => (&body[..idx], body[idx..].trim_start()),
            None => (body, ""),
        };
        if name.is_empty() {
            return Err(ParseError::syntax(start, "empty tag"));
        }
        Ok(Segment::Tag {
            name: name.to_string(),
            markup: markup.to_string(),
            span: Span::new(start, self.position),
        })
    }

    /// Find the closing delimiter, skipping over quoted strings so that a
    /// literal `"%}"` inside markup does not end the tag.
    fn find_close(&self, from: usize, close: &str) -> Result<usize> {
        let bytes = self.source.as_bytes();
        let mut i = from;
        let mut quote: Option<u8> = None;
        while i < bytes.len() {
            let b = bytes[i];
            match quote {
                Some(q) => {
                    if b == q {
                        quote = None;
                    }
                }
                None => {
                    if b == b'\'' || b == b'"' {
                        quote = Some(b);
                    } else if self.source[i..].starts_with(close) {
                        return Ok(i);
                    }
                }
            }
            i += 1;
        }
        Err(ParseError::UnclosedTag {
            tag: if close == "}}" { "{{".into() } else { "{%".into() },
            offset: from,
        })
    }

    /// After a `{% raw %}` tag, consume verbatim text up to `{% endraw %}`.
    fn lex_raw_body(&mut self, opened_at: usize) -> Result<Segment> {
        let start = self.position;
        let mut i = start;
        while let Some(offset) = self.source[i..].find("{%") {
            let tag_at = i + offset;
            let after = self.source[tag_at + 2..].trim_start_matches('-').trim_start();
            if after.starts_with("endraw") {
                let close = self.find_close(tag_at + 2, "%}")?;
                self.position = close + 2;
                return Ok(Segment::Raw {
                    text: self.source[start..tag_at].to_string(),
                    span: Span::new(start, tag_at),
                });
            }
            i = tag_at + 2;
        }
        Err(ParseError::UnclosedTag {
            tag: "raw".into(),
            offset: opened_at,
        })
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Segment>> {
    Lexer::new(source).tokenize()
}
