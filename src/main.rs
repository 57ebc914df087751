// CLI binary: panicking on unrecoverable errors is standard for CLI tools.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use log::debug;

use flux_lang::compiler::{self, Chunk};
use flux_lang::config::{self, FluxConfig};
use flux_lang::{bytecode, compile_source, vm, Error};

/// File extension for compiled bytecode artifacts.
const BYTECODE_EXT: &str = "fxb";

#[derive(Parser)]
#[command(name = "flux", about = "The Flux language toolchain", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Flux source file (or a compiled .fxb artifact)
    Run { file: PathBuf },
    /// Compile a Flux source file to a bytecode artifact in dist/
    Compile { file: PathBuf },
    /// Initialize a new Flux project with a default flux.json
    Init,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let cfg = config::load(Path::new(".")).unwrap_or_else(|e| {
        println!("Warning: Could not load configuration: {e}");
        FluxConfig::default()
    });

    match cli.command {
        Commands::Run { file } => run_file(&file, &cfg),
        Commands::Compile { file } => compile_file(&file, &cfg),
        Commands::Init => init_project(),
    }
}

fn run_file(file: &Path, cfg: &FluxConfig) {
    let chunk = if file.extension().is_some_and(|ext| ext == BYTECODE_EXT) {
        let bytes =
            fs::read(file).unwrap_or_else(|e| panic!("failed to read {}: {e}", file.display()));
        bytecode::decode(&bytes).unwrap_or_else(|e| panic!("{e}"))
    } else {
        compile_or_exit(file, cfg)
    };

    dump_debug(&chunk, cfg);
    vm::run(chunk).unwrap_or_else(|e| panic!("{e}"));
}

fn compile_file(file: &Path, cfg: &FluxConfig) {
    let chunk = compile_or_exit(file, cfg);
    dump_debug(&chunk, cfg);

    let out_dir = Path::new("dist");
    fs::create_dir_all(out_dir)
        .unwrap_or_else(|e| panic!("failed to create {}: {e}", out_dir.display()));
    let stem = file
        .file_stem()
        .map_or_else(|| "out".to_string(), |s| s.to_string_lossy().into_owned());
    let out_path = out_dir.join(format!("{stem}.{BYTECODE_EXT}"));
    fs::write(&out_path, bytecode::encode(&chunk))
        .unwrap_or_else(|e| panic!("failed to write {}: {e}", out_path.display()));
    println!("Compiled bytecode written to {}", out_path.display());
}

fn init_project() {
    if let Err(e) = config::save(&FluxConfig::default(), Path::new(".")) {
        println!("Error initializing project: {e}");
        process::exit(1);
    }
    println!("Initialized new Flux project with flux.json configuration file");
}

/// Front half of the pipeline with the configured checker mode. Exits with
/// code 1 on type errors; lex and parse failures panic.
fn compile_or_exit(file: &Path, cfg: &FluxConfig) -> Chunk {
    let source = fs::read_to_string(file)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", file.display()));

    match compile_source(&source, &cfg.mode()) {
        Ok(compiled) => {
            print_warnings(&compiled.warnings);
            compiled.chunk
        }
        Err(Error::TypeCheck { errors, warnings }) => {
            print_warnings(&warnings);
            println!("Type checking errors:");
            for error in &errors {
                println!("  - {error}");
            }
            println!("Compilation failed due to type errors.");
            process::exit(1);
        }
        Err(e) => panic!("{e}"),
    }
}

fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!("Type checking warnings:");
    for warning in warnings {
        println!("  - {warning}");
    }
}

fn dump_debug(chunk: &Chunk, cfg: &FluxConfig) {
    if cfg.compiler.debug {
        eprint!("{}", compiler::disassemble(chunk, "main"));
    }
    debug!(
        "chunk: {} bytes of code, {} constants",
        chunk.code.len(),
        chunk.constants.len()
    );
}
