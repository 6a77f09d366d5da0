//! liquidc command line interface

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use liquidc::{CompileOptions, FileSystemLoader, Template};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "liquidc", version, about = "Compiling Liquid template engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a template file
    Render {
        /// Template file to render
        template: PathBuf,
        /// JSON file with the render assigns
        #[arg(long)]
        assigns: Option<PathBuf>,
        /// Directory partials are loaded from (defaults to the template's
        /// directory)
        #[arg(long)]
        partials: Option<PathBuf>,
        /// Skip the optimization passes
        #[arg(long)]
        no_optimize: bool,
        /// Do not inline partials at compile time
        #[arg(long)]
        no_inline: bool,
        /// Force execution on the stack VM
        #[arg(long)]
        vm: bool,
    },
    /// Print the linked IL of a compiled template
    Disasm {
        /// Template file to compile
        template: PathBuf,
        /// Skip the optimization passes
        #[arg(long)]
        no_optimize: bool,
        /// Emit compilation statistics as JSON on stderr
        #[arg(long)]
        stats: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run(Cli::parse()) {
        eprintln!("{} {error:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Render {
            template,
            assigns,
            partials,
            no_optimize,
            no_inline,
            vm,
        } => {
            let options = options_for(&template, partials, no_optimize, no_inline);
            let mut compiled = parse_template(&template, options)?;
            if vm {
                compiled.disable_lowering();
            }

            let assigns = match assigns {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading assigns {}", path.display()))?;
                    serde_json::from_str(&text)
                        .with_context(|| format!("parsing assigns {}", path.display()))?
                }
                None => serde_json::Value::Object(Default::default()),
            };

            print!("{}", compiled.render_json(&assigns));
            Ok(())
        }
        Command::Disasm {
            template,
            no_optimize,
            stats,
        } => {
            let options = options_for(&template, None, no_optimize, false);
            let compiled = parse_template(&template, options)?;
            print!("{}", compiled.il());
            if stats {
                eprintln!("{}", serde_json::to_string_pretty(compiled.stats())?);
            } else {
                let s = compiled.stats();
                eprintln!(
                    "{} instructions ({} before optimization), {} temp slots, {}",
                    s.instructions_after,
                    s.instructions_before,
                    s.peak_temp_slots,
                    if compiled.uses_vm() {
                        "stack VM"
                    } else {
                        "lowered"
                    }
                );
            }
            Ok(())
        }
    }
}

fn options_for(
    template: &Path,
    partials: Option<PathBuf>,
    no_optimize: bool,
    no_inline: bool,
) -> CompileOptions {
    let root = partials
        .or_else(|| template.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));
    CompileOptions {
        optimize: !no_optimize,
        inline_partials: !no_inline,
        loader: Some(Arc::new(FileSystemLoader::new(root))),
    }
}

fn parse_template(path: &Path, options: CompileOptions) -> Result<Template> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading template {}", path.display()))?;
    Template::parse(&source, options)
        .with_context(|| format!("compiling template {}", path.display()))
}
