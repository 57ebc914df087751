//! Built-in functions.
//!
//! Built-ins are real [`Value`]s installed into the globals map at VM
//! startup, so `GetGlobal` resolves them like any other binding and a
//! rebinding (`let print = …`) shadows them naturally.

use std::collections::HashMap;
use std::io::Write;

use crate::error::Error;
use crate::types::Type;
use crate::vm::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
}

impl Builtin {
    pub const ALL: &'static [Builtin] = &[Builtin::Print];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
        }
    }

    /// The type the checker prebinds for this built-in.
    pub fn signature(self) -> Type {
        match self {
            Builtin::Print => Type::Function {
                params: vec![Type::Unknown],
                ret: Box::new(Type::Void),
            },
        }
    }
}

/// Seed a globals map with every built-in.
pub fn install(globals: &mut HashMap<String, Value>) {
    for builtin in Builtin::ALL {
        globals.insert(builtin.name().to_string(), Value::Builtin(*builtin));
    }
}

/// Invoke a built-in. `print` writes each argument on its own line and
/// returns its last argument, so the value flows through expressions.
pub fn call<W: Write>(builtin: Builtin, args: Vec<Value>, out: &mut W) -> Result<Value, Error> {
    match builtin {
        Builtin::Print => {
            for arg in &args {
                writeln!(out, "{arg}")?;
            }
            Ok(args.into_iter().next_back().unwrap_or(Value::Null))
        }
    }
}
