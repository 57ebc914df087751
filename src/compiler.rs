//! Bytecode compiler: lowers a type-checked AST to a [`Chunk`].
//!
//! All operands are a single byte, so constant-table indices and jump
//! targets must fit in 8 bits; exceeding either limit is a compile error.
//! Jump targets are absolute byte offsets within the current chunk.

use std::rc::Rc;

use crate::ast::{Base, BinOp, Expr, Postfix, Primary, Program, Statement, Term};
use crate::error::Error;

/// Bytecode operations for the stack-based VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// Push `constants[idx]`. Operand: constant index.
    Constant = 0,
    /// Pop two, push the sum (ints) or concatenation (strings).
    Add,
    /// Pop two ints, push the difference.
    Sub,
    /// Pop two, push structural equality as a bool.
    Equal,
    /// Pop two ints, push `a > b`.
    Greater,
    /// Pop two ints, push `a < b`.
    Less,
    /// Pop and discard.
    Pop,
    /// Pop and write one line to the output.
    Print,
    /// End the current chunk; top of stack (if any) is the result.
    Return,
    /// Pop a value and bind it in globals. Operand: name constant index.
    DefineGlobal,
    /// Push the binding for a name, locals first. Operand: name constant index.
    GetGlobal,
    /// Pop nargs arguments and a callee, invoke, push the result. Operand: nargs.
    Call,
    /// Wrap a chunk constant as a closure and push it. Operand: constant index.
    Closure,
    /// If the top of stack is falsy, jump. Peeks, does not pop. Operand: target.
    JumpIfFalse,
    /// Unconditional jump. Operand: target.
    Jump,
    /// Pop `count` values, push them as a list in push order. Operand: count.
    Array,
    /// Pop `count` (key, value) pairs, push them as a dict. Operand: count.
    Dict,
    /// Pop an index and a base, push `base[index]`.
    Index,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        let op = match byte {
            0 => Opcode::Constant,
            1 => Opcode::Add,
            2 => Opcode::Sub,
            3 => Opcode::Equal,
            4 => Opcode::Greater,
            5 => Opcode::Less,
            6 => Opcode::Pop,
            7 => Opcode::Print,
            8 => Opcode::Return,
            9 => Opcode::DefineGlobal,
            10 => Opcode::GetGlobal,
            11 => Opcode::Call,
            12 => Opcode::Closure,
            13 => Opcode::JumpIfFalse,
            14 => Opcode::Jump,
            15 => Opcode::Array,
            16 => Opcode::Dict,
            17 => Opcode::Index,
            _ => return None,
        };
        Some(op)
    }

    /// True when the opcode is followed by a one-byte operand.
    pub fn has_operand(self) -> bool {
        matches!(
            self,
            Opcode::Constant
                | Opcode::DefineGlobal
                | Opcode::GetGlobal
                | Opcode::Call
                | Opcode::Closure
                | Opcode::JumpIfFalse
                | Opcode::Jump
                | Opcode::Array
                | Opcode::Dict
        )
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Constant => "Constant",
            Opcode::Add => "Add",
            Opcode::Sub => "Sub",
            Opcode::Equal => "Equal",
            Opcode::Greater => "Greater",
            Opcode::Less => "Less",
            Opcode::Pop => "Pop",
            Opcode::Print => "Print",
            Opcode::Return => "Return",
            Opcode::DefineGlobal => "DefineGlobal",
            Opcode::GetGlobal => "GetGlobal",
            Opcode::Call => "Call",
            Opcode::Closure => "Closure",
            Opcode::JumpIfFalse => "JumpIfFalse",
            Opcode::Jump => "Jump",
            Opcode::Array => "Array",
            Opcode::Dict => "Dict",
            Opcode::Index => "Index",
        }
    }
}

/// One entry in a chunk's constant table.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i64),
    Str(String),
    Bool(bool),
    /// A compiled function body. Chunk nesting is tree-shaped: the child is
    /// owned by this table slot and shared only by closures made from it.
    Chunk(Rc<Chunk>),
}

/// A unit of compiled bytecode with its own constant table and parameter
/// list. The top-level program is one chunk; each function literal becomes
/// a child chunk stored in its parent's constant table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Chunk {
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
    /// Parameter names, in declaration order. Empty for the top level.
    pub params: Vec<String>,
}

pub fn compile(program: &Program) -> Result<Chunk, Error> {
    let mut compiler = Compiler::new(Vec::new());
    for stmt in &program.statements {
        compiler.compile_statement(stmt)?;
    }
    compiler.emit(Opcode::Return);
    Ok(compiler.chunk)
}

struct Compiler {
    chunk: Chunk,
}

impl Compiler {
    fn new(params: Vec<String>) -> Self {
        Self {
            chunk: Chunk {
                params,
                ..Chunk::default()
            },
        }
    }

    fn emit(&mut self, op: Opcode) {
        self.chunk.code.push(op as u8);
    }

    fn emit_with(&mut self, op: Opcode, operand: u8) {
        self.chunk.code.push(op as u8);
        self.chunk.code.push(operand);
    }

    /// Emit a jump with a placeholder target; returns the operand offset
    /// for later patching.
    fn emit_jump(&mut self, op: Opcode) -> usize {
        self.emit_with(op, 0);
        self.chunk.code.len() - 1
    }

    /// Point a previously emitted jump at the current end of the chunk.
    fn patch_jump(&mut self, operand_pos: usize) -> Result<(), Error> {
        let target = u8::try_from(self.chunk.code.len()).map_err(|_| {
            Error::Compile("function body too large for 8-bit jump targets (max 255 bytes)".into())
        })?;
        self.chunk.code[operand_pos] = target;
        Ok(())
    }

    /// Intern a constant, reusing an existing scalar slot when possible.
    /// Chunk constants are always appended.
    fn add_constant(&mut self, constant: Constant) -> Result<u8, Error> {
        if !matches!(constant, Constant::Chunk(_)) {
            if let Some(i) = self.chunk.constants.iter().position(|c| *c == constant) {
                return self.constant_index(i);
            }
        }
        self.chunk.constants.push(constant);
        self.constant_index(self.chunk.constants.len() - 1)
    }

    fn constant_index(&self, i: usize) -> Result<u8, Error> {
        u8::try_from(i)
            .map_err(|_| Error::Compile("too many constants in one chunk (max 256)".into()))
    }

    fn operand_count(&self, n: usize, what: &str) -> Result<u8, Error> {
        u8::try_from(n).map_err(|_| Error::Compile(format!("too many {what} (max 255)")))
    }

    fn compile_statement(&mut self, stmt: &Statement) -> Result<(), Error> {
        match stmt {
            Statement::Let { name, value, .. } => {
                self.compile_expr(value)?;
                let idx = self.add_constant(Constant::Str(name.clone()))?;
                self.emit_with(Opcode::DefineGlobal, idx);
            }
            Statement::Expr(expr) => {
                self.compile_expr(expr)?;
                // Echo the statement's value unless it comes from a print
                // call (which already wrote it) or an indexing expression.
                if !value_comes_from_print(expr) && !is_index_statement(expr) {
                    self.emit(Opcode::Print);
                }
            }
        }
        Ok(())
    }

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), Error> {
        match expr {
            Expr::If { cond, then, els } => {
                self.compile_expr(cond)?;
                let jump_else = self.emit_jump(Opcode::JumpIfFalse);
                self.compile_expr(then)?;
                let jump_end = self.emit_jump(Opcode::Jump);
                self.patch_jump(jump_else)?;
                self.compile_expr(els)?;
                self.patch_jump(jump_end)?;
            }
            Expr::Func { params, body, .. } => {
                let names = params.iter().map(|p| p.name.clone()).collect();
                let mut sub = Compiler::new(names);
                sub.compile_expr(body)?;
                sub.emit(Opcode::Return);
                let idx = self.add_constant(Constant::Chunk(Rc::new(sub.chunk)))?;
                self.emit_with(Opcode::Closure, idx);
            }
            Expr::Binary { left, tail } => {
                self.compile_primary(left)?;
                if let Some((op, right)) = tail {
                    self.compile_expr(right)?;
                    self.emit(match op {
                        BinOp::Add => Opcode::Add,
                        BinOp::Sub => Opcode::Sub,
                        BinOp::Eq => Opcode::Equal,
                        BinOp::Gt => Opcode::Greater,
                        BinOp::Lt => Opcode::Less,
                    });
                }
            }
            Expr::Block(exprs) => {
                for e in exprs {
                    self.compile_expr(e)?;
                }
            }
        }
        Ok(())
    }

    fn compile_primary(&mut self, primary: &Primary) -> Result<(), Error> {
        match &primary.base {
            Base::Term(term) => self.compile_term(term)?,
            Base::List(elems) => {
                for elem in elems {
                    self.compile_expr(elem)?;
                }
                let n = self.operand_count(elems.len(), "list elements")?;
                self.emit_with(Opcode::Array, n);
            }
            Base::Dict(pairs) => {
                // Value first, then key, so the VM pops key then value.
                for (key, value) in pairs {
                    self.compile_expr(value)?;
                    self.compile_expr(key)?;
                }
                let n = self.operand_count(pairs.len(), "dict entries")?;
                self.emit_with(Opcode::Dict, n);
            }
        }
        for postfix in &primary.postfix {
            match postfix {
                Postfix::Call(args) => {
                    for arg in args {
                        self.compile_expr(arg)?;
                    }
                    let n = self.operand_count(args.len(), "call arguments")?;
                    self.emit_with(Opcode::Call, n);
                }
                Postfix::Index(index) => {
                    self.compile_expr(index)?;
                    self.emit(Opcode::Index);
                }
            }
        }
        Ok(())
    }

    fn compile_term(&mut self, term: &Term) -> Result<(), Error> {
        match term {
            Term::Int(v) => {
                let idx = self.add_constant(Constant::Int(*v))?;
                self.emit_with(Opcode::Constant, idx);
            }
            Term::Str(s) => {
                let idx = self.add_constant(Constant::Str(s.clone()))?;
                self.emit_with(Opcode::Constant, idx);
            }
            Term::Bool(b) => {
                let idx = self.add_constant(Constant::Bool(*b))?;
                self.emit_with(Opcode::Constant, idx);
            }
            Term::Ident(name) => {
                let idx = self.add_constant(Constant::Str(name.clone()))?;
                self.emit_with(Opcode::GetGlobal, idx);
            }
        }
        Ok(())
    }
}

/// True when the statement's value position is a `print` call: a direct
/// `print(...)`, an `if` whose arms both end in one, or a block whose last
/// expression does. Those statements already wrote their output, so the
/// compiler skips the statement-level echo.
fn value_comes_from_print(expr: &Expr) -> bool {
    match expr {
        Expr::Binary { left, tail: None } => {
            matches!(&left.base, Base::Term(Term::Ident(name)) if name == "print")
                && matches!(left.postfix.first(), Some(Postfix::Call(_)))
        }
        Expr::If { then, els, .. } => value_comes_from_print(then) && value_comes_from_print(els),
        Expr::Block(exprs) => exprs.last().is_some_and(value_comes_from_print),
        _ => false,
    }
}

/// True for a bare indexing expression statement, whose result is not echoed.
fn is_index_statement(expr: &Expr) -> bool {
    match expr {
        Expr::Binary { left, tail: None } => {
            matches!(left.postfix.last(), Some(Postfix::Index(_)))
        }
        _ => false,
    }
}

/// Render a chunk as a human-readable listing, nested function chunks
/// included. Used by the `compiler.debug` config flag and in tests.
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = String::new();
    disassemble_into(chunk, name, &mut out);
    out
}

fn disassemble_into(chunk: &Chunk, name: &str, out: &mut String) {
    use std::fmt::Write as _;

    if chunk.params.is_empty() {
        let _ = writeln!(out, "== {name} ==");
    } else {
        let _ = writeln!(out, "== {name} (params: {}) ==", chunk.params.join(", "));
    }

    let mut offset = 0;
    while offset < chunk.code.len() {
        let byte = chunk.code[offset];
        let Some(op) = Opcode::from_byte(byte) else {
            let _ = writeln!(out, "{offset:04} <bad opcode {byte}>");
            offset += 1;
            continue;
        };
        if op.has_operand() {
            let operand = chunk.code.get(offset + 1).copied();
            match operand {
                Some(operand) => {
                    let _ = write!(out, "{offset:04} {:<12} {operand:3}", op.mnemonic());
                    if matches!(
                        op,
                        Opcode::Constant
                            | Opcode::DefineGlobal
                            | Opcode::GetGlobal
                            | Opcode::Closure
                    ) {
                        match chunk.constants.get(operand as usize) {
                            Some(Constant::Int(v)) => {
                                let _ = write!(out, "    ; {v}");
                            }
                            Some(Constant::Str(s)) => {
                                let _ = write!(out, "    ; {s:?}");
                            }
                            Some(Constant::Bool(b)) => {
                                let _ = write!(out, "    ; {b}");
                            }
                            Some(Constant::Chunk(_)) => {
                                let _ = write!(out, "    ; <fn>");
                            }
                            None => {
                                let _ = write!(out, "    ; <missing constant>");
                            }
                        }
                    }
                    let _ = writeln!(out);
                }
                None => {
                    let _ = writeln!(out, "{offset:04} {:<12} <truncated>", op.mnemonic());
                }
            }
            offset += 2;
        } else {
            let _ = writeln!(out, "{offset:04} {}", op.mnemonic());
            offset += 1;
        }
    }

    for (i, constant) in chunk.constants.iter().enumerate() {
        if let Constant::Chunk(sub) = constant {
            disassemble_into(sub, &format!("{name}.const[{i}]"), out);
        }
    }
}
