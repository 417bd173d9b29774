use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sable_bytecode::{Disassembler, ScriptFile};
use sable_compiler::{Compiler, ast::Script};
use tracing_subscriber::filter::EnvFilter;

#[derive(Parser)]
#[command(name = "sable", version, about = "SB script container toolchain")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a parsed script (JSON AST) into an .sb container.
    Compile {
        input: PathBuf,
        /// Output path; defaults to the input with an .sb extension.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Strip debug symbols and line info from the container.
        #[arg(long)]
        release: bool,
        /// List the compiled functions and their code ranges.
        #[arg(long)]
        print_functions: bool,
    },
    /// Disassemble an .sb container to a text listing.
    Disasm {
        input: PathBuf,
        /// Output path; defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Offset-free listing, for diffing containers against each other.
        #[arg(long)]
        compare: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Compile {
            input,
            output,
            release,
            print_functions,
        } => compile(&input, output, release, print_functions),
        Commands::Disasm {
            input,
            output,
            compare,
        } => disasm(&input, output, compare),
    }
}

fn compile(
    input: &Path,
    output: Option<PathBuf>,
    release: bool,
    print_functions: bool,
) -> Result<()> {
    let source = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let script: Script =
        serde_json::from_str(&source).with_context(|| format!("parsing {}", input.display()))?;

    let file_name = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("script");
    let compiled = Compiler::new(file_name)
        .debug_info(!release)
        .compile(&script)?;

    let out_path = output.unwrap_or_else(|| input.with_extension("sb"));
    let bytes = compiled.to_bytes()?;
    std::fs::write(&out_path, &bytes)
        .with_context(|| format!("writing {}", out_path.display()))?;

    tracing::info!(
        "compiled {} functions, {} bytes of code, {} bytes total -> {}",
        compiled.functions.len(),
        compiled.code_size(),
        bytes.len(),
        out_path.display()
    );

    if print_functions {
        for func in &compiled.functions {
            let name = compiled
                .identifier_pool
                .get(func.name_id as usize)
                .map(String::as_str)
                .unwrap_or("?");
            println!(
                "{:5} {} args={} locals={} code={:#x}..{:#x}",
                func.id, name, func.arg_count, func.local_count, func.code_start, func.code_end
            );
        }
    }
    Ok(())
}

fn disasm(input: &Path, output: Option<PathBuf>, compare: bool) -> Result<()> {
    let data =
        std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let file = ScriptFile::from_bytes(&data)
        .with_context(|| format!("decoding {}", input.display()))?;

    let listing = Disassembler::new(&file).compare_mode(compare).disassemble()?;
    match output {
        Some(path) => std::fs::write(&path, listing)
            .with_context(|| format!("writing {}", path.display()))?,
        None => print!("{listing}"),
    }
    Ok(())
}
