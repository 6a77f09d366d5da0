//! Compiled template API
//!
//! One `Template` owns the compiled IL plus, when structured lowering
//! accepted it, the native-control-flow program. Rendering never panics
//! and never returns an error: runtime failures are appended to the
//! output as the standard `Liquid error` tail, attributed to a source
//! line through the span table.

use crate::error::Result;
use crate::pipeline::{compile, CompilationStats, CompileOptions};
use backend::{execute, lower, PartialResolver, Program, RenderError};
use liquidc_frontend::il::{CompiledPartial, Il};
use liquidc_runtime::{Scope, Value};
use std::sync::Arc;
use tracing::debug;

pub struct Template {
    source: String,
    il: Il,
    program: Option<Program>,
    options: CompileOptions,
    stats: CompilationStats,
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("source", &self.source)
            .field("il", &self.il)
            .field("program", &self.program)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Template {
    pub fn parse(source: &str, options: CompileOptions) -> Result<Self> {
        let (il, stats) = compile(source, &options)?;
        let program = match lower(&il) {
            Ok(program) => Some(program),
            Err(reason) => {
                debug!(%reason, "structured lowering refused, using the stack VM");
                None
            }
        };
        Ok(Self {
            source: source.to_string(),
            il,
            program,
            options,
            stats,
        })
    }

    /// Whether rendering dispatches through the stack VM instead of a
    /// lowered program.
    pub fn uses_vm(&self) -> bool {
        self.program.is_none()
    }

    /// Drop the lowered program and render through the VM regardless.
    pub fn disable_lowering(&mut self) {
        self.program = None;
    }

    pub fn il(&self) -> &Il {
        &self.il
    }

    pub fn stats(&self) -> &CompilationStats {
        &self.stats
    }

    pub fn render(&self, assigns: impl IntoIterator<Item = (String, Value)>) -> String {
        let mut scope = Scope::with_assigns(assigns);
        self.render_with_scope(&mut scope)
    }

    /// Render with JSON assigns; the top level must be an object.
    pub fn render_json(&self, assigns: &serde_json::Value) -> String {
        let pairs: Vec<(String, Value)> = match assigns {
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect(),
            _ => Vec::new(),
        };
        self.render(pairs)
    }

    pub fn render_with_scope(&self, scope: &mut Scope) -> String {
        let result = match &self.program {
            Some(program) => program.render(scope),
            None => {
                let resolver = OnDemandResolver {
                    options: &self.options,
                };
                execute(&self.il, scope, &resolver)
            }
        };
        match result {
            Ok(output) => output,
            Err(error) => self.error_tail(error),
        }
    }

    /// Append the standard error tail to whatever rendered before the
    /// failure, attributing a line when the failure carries a span.
    fn error_tail(&self, error: RenderError) -> String {
        let line = error
            .location
            .map(|span| self.line_of(span.start as usize));
        match line {
            Some(line) => format!(
                "{}Liquid error (line {}): {}",
                error.output, line, error.message
            ),
            None => format!("{}Liquid error: {}", error.output, error.message),
        }
    }

    fn line_of(&self, offset: usize) -> usize {
        let end = offset.min(self.source.len());
        self.source[..end].bytes().filter(|b| *b == b'\n').count() + 1
    }
}

/// Resolves partials at render time by compiling them through the
/// template's own options. Only reached for partials that were not
/// inlined (no loader at compile time, recursion, or load failure).
struct OnDemandResolver<'a> {
    options: &'a CompileOptions,
}

impl PartialResolver for OnDemandResolver<'_> {
    fn resolve(&self, name: &str) -> Option<Arc<CompiledPartial>> {
        let loader = self.options.loader.as_ref()?;
        let source = match loader.read(name) {
            Ok(source) => source,
            Err(error) => {
                debug!(partial = name, %error, "runtime partial load failed");
                return None;
            }
        };
        match compile(&source, self.options) {
            Ok((il, _)) => Some(Arc::new(CompiledPartial { source, il })),
            Err(error) => {
                debug!(partial = name, %error, "runtime partial compile failed");
                None
            }
        }
    }
}
