//! Flux: a small optionally-typed expression language.
//!
//! The pipeline runs source text through four stages:
//! lex → parse → type check (optional) → compile, producing a bytecode
//! [`compiler::Chunk`] that the stack [`vm`] executes. Compiled chunks can
//! also be serialized with [`bytecode`] and executed later.

pub mod ast;
pub mod builtins;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod typeck;
pub mod types;
pub mod vm;

pub use error::Error;

/// A successfully compiled program plus any type-checker warnings.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub chunk: compiler::Chunk,
    pub warnings: Vec<String>,
}

/// Compile Flux source through the full front half of the pipeline.
///
/// Type checking runs when `mode.enabled` is set; checker errors abort with
/// [`Error::TypeCheck`] carrying both diagnostic lists. Warnings never
/// abort, they ride along on the success path.
pub fn compile_source(
    source: &str,
    mode: &typeck::TypeCheckMode,
) -> Result<CompiledProgram, Error> {
    let tokens = lexer::lex(source)?;
    let program = parser::parse(tokens)?;

    let mut warnings = Vec::new();
    if mode.enabled {
        let report = typeck::check(&program, mode);
        if report.has_errors() {
            return Err(Error::TypeCheck {
                errors: report.errors,
                warnings: report.warnings,
            });
        }
        warnings = report.warnings;
    }

    let chunk = compiler::compile(&program)?;
    Ok(CompiledProgram { chunk, warnings })
}
