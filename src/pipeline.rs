//! Compilation pipeline
//!
//! Drives one source string through the full compile:
//! parse -> constant-partial lowering (with optional inlining) ->
//! optimization passes -> label linking -> temp-register allocation.
//! Recursive partial compiles share an inline context so each partial is
//! compiled at most once per root compile and recursion cannot loop.

use crate::error::Result;
use crate::partials::PartialLoader;
use liquidc_frontend::il::{CompiledPartial, Il, Instruction};
use liquidc_frontend::{link, parse};
use liquidc_optimizer::{allocate, Optimizer};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Knobs for one compilation.
#[derive(Clone)]
pub struct CompileOptions {
    /// Run the full pass schedule; otherwise only partial lowering,
    /// linking, and register allocation happen.
    pub optimize: bool,
    /// Attach pre-compiled partials at compile time when a loader is
    /// available.
    pub inline_partials: bool,
    pub loader: Option<Arc<dyn PartialLoader>>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            optimize: true,
            inline_partials: true,
            loader: None,
        }
    }
}

impl CompileOptions {
    pub fn with_loader(mut self, loader: Arc<dyn PartialLoader>) -> Self {
        self.loader = Some(loader);
        self
    }
}

/// What one compile did, for logging, assertions, and `--stats` output.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct CompilationStats {
    pub instructions_before: usize,
    pub instructions_after: usize,
    pub peak_temp_slots: usize,
    pub partials_inlined: usize,
    pub parse_time_us: u64,
    pub optimize_time_us: u64,
}

impl CompilationStats {
    /// Fraction of instructions the optimizer removed.
    pub fn optimization_savings(&self) -> f64 {
        if self.instructions_before == 0 {
            0.0
        } else {
            (self.instructions_before.saturating_sub(self.instructions_after)) as f64
                / self.instructions_before as f64
        }
    }
}

/// Shared state of one recursive compile tree: the at-most-once partial
/// cache and the stack of names currently being compiled.
struct InlineCtx {
    cache: FxHashMap<String, Arc<CompiledPartial>>,
    stack: Vec<String>,
    inlined: usize,
}

impl InlineCtx {
    fn new() -> Self {
        Self {
            cache: FxHashMap::default(),
            stack: Vec::new(),
            inlined: 0,
        }
    }
}

/// Compile template source into linked, allocated IL.
pub fn compile(source: &str, options: &CompileOptions) -> Result<(Il, CompilationStats)> {
    let mut ctx = InlineCtx::new();
    let result = compile_inner(source, options, &mut ctx);
    if let Ok((il, stats)) = &result {
        info!(
            instructions_before = stats.instructions_before,
            instructions_after = il.len(),
            peak_temp_slots = stats.peak_temp_slots,
            partials_inlined = stats.partials_inlined,
            "compilation complete"
        );
    }
    result
}

fn compile_inner(
    source: &str,
    options: &CompileOptions,
    ctx: &mut InlineCtx,
) -> Result<(Il, CompilationStats)> {
    let mut stats = CompilationStats::default();

    let parse_start = Instant::now();
    let mut il = parse(source)?;
    stats.parse_time_us = parse_start.elapsed().as_micros() as u64;
    stats.instructions_before = il.len();

    lower_const_partials(&mut il, options, ctx)?;

    let optimize_start = Instant::now();
    if options.optimize {
        Optimizer::new().optimize(&mut il);
    }
    link(&mut il)?;
    let allocation = allocate(&mut il);
    stats.optimize_time_us = optimize_start.elapsed().as_micros() as u64;

    stats.instructions_after = il.len();
    stats.peak_temp_slots = allocation.peak_usage;
    stats.partials_inlined = ctx.inlined;

    debug!(
        before = stats.instructions_before,
        after = stats.instructions_after,
        "pipeline finished for one source"
    );
    Ok((il, stats))
}

/// Rewrite `CONST_RENDER`/`CONST_INCLUDE` to their runtime forms,
/// attaching pre-compiled partials where inlining allows.
fn lower_const_partials(il: &mut Il, options: &CompileOptions, ctx: &mut InlineCtx) -> Result<()> {
    for index in 0..il.len() {
        let lowered = match &il.instructions[index] {
            Instruction::ConstRender(call) => Some((call.clone(), true)),
            Instruction::ConstInclude(call) => Some((call.clone(), false)),
            _ => None,
        };
        let Some((mut call, is_render)) = lowered else {
            continue;
        };
        if options.inline_partials {
            if let Some(loader) = options.loader.clone() {
                call.template = compile_partial(&call.name, loader.as_ref(), options, ctx)?;
            }
        }
        il.instructions[index] = if is_render {
            Instruction::RenderPartial(call)
        } else {
            Instruction::IncludePartial(call)
        };
    }
    Ok(())
}

/// Compile one named partial for inlining. Returns `None` (deferring to
/// runtime resolution) when the name is already being compiled or the
/// loader cannot produce its source.
fn compile_partial(
    name: &str,
    loader: &dyn PartialLoader,
    options: &CompileOptions,
    ctx: &mut InlineCtx,
) -> Result<Option<Arc<CompiledPartial>>> {
    if ctx.stack.iter().any(|n| n == name) {
        debug!(partial = name, "recursive partial left for runtime");
        return Ok(None);
    }
    if let Some(cached) = ctx.cache.get(name) {
        return Ok(Some(cached.clone()));
    }

    let source = match loader.read(name) {
        Ok(source) => source,
        Err(error) => {
            debug!(partial = name, %error, "loader failed, partial left for runtime");
            return Ok(None);
        }
    };

    ctx.stack.push(name.to_string());
    let result = compile_inner(&source, options, ctx);
    ctx.stack.pop();
    let (il, _) = result?;

    let compiled = Arc::new(CompiledPartial { source, il });
    ctx.cache.insert(name.to_string(), compiled.clone());
    ctx.inlined += 1;
    Ok(Some(compiled))
}
