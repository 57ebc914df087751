//! Stack-based virtual machine.
//!
//! Executes one [`Chunk`] on an operand stack. The globals map is shared by
//! reference with every nested VM spawned for a closure call, so writes in a
//! callee are visible to the caller; each call frame owns its own locals.
//! Dispatch runs until the instruction pointer passes the end of the code or
//! a `Return` executes. Runtime errors are fatal.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;

use crate::builtins::{self, Builtin};
use crate::compiler::{Chunk, Constant, Opcode};
use crate::error::Error;

/// A runtime value. Every value is one of these variants; no untagged
/// nulls escape the VM.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
    Null,
    List(Vec<Value>),
    Dict(HashMap<DictKey, Value>),
    Closure(Rc<Chunk>),
    Builtin(Builtin),
}

impl Value {
    /// Truthiness: bools as themselves, ints nonzero, strings nonempty,
    /// null falsy, everything else truthy.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Null => false,
            Value::List(_) | Value::Dict(_) | Value::Closure(_) | Value::Builtin(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
            Value::Null => "null",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Closure(_) => "function",
            Value::Builtin(_) => "builtin",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Null => write!(f, "<null>"),
            Value::List(elems) => {
                write!(f, "[")?;
                for (i, elem) in elems.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    fmt_nested(elem, f)?;
                }
                write!(f, "]")
            }
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: ")?;
                    fmt_nested(value, f)?;
                }
                write!(f, "}}")
            }
            Value::Closure(_) => write!(f, "<fn>"),
            Value::Builtin(b) => write!(f, "<builtin {}>", b.name()),
        }
    }
}

/// Inside composites, strings are quoted so `[1, "a"]` stays readable.
fn fmt_nested(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Str(s) => write!(f, "{s:?}"),
        other => write!(f, "{other}"),
    }
}

/// A dictionary key. Keys are restricted to the scalar value kinds with
/// structural equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    Int(i64),
    Str(String),
    Bool(bool),
}

impl DictKey {
    fn from_value(value: Value) -> Result<DictKey, Error> {
        match value {
            Value::Int(n) => Ok(DictKey::Int(n)),
            Value::Str(s) => Ok(DictKey::Str(s)),
            Value::Bool(b) => Ok(DictKey::Bool(b)),
            other => Err(Error::Runtime(format!(
                "dict key must be int, string, or bool, got {}",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for DictKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DictKey::Int(n) => write!(f, "{n}"),
            DictKey::Str(s) => write!(f, "{s:?}"),
            DictKey::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Execute a chunk, writing program output to stdout.
pub fn run(chunk: Chunk) -> Result<(), Error> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_with_output(chunk, &mut out)
}

/// Execute a chunk against an arbitrary writer. Used by tests and anywhere
/// output capture matters.
pub fn run_with_output<W: Write>(chunk: Chunk, out: &mut W) -> Result<(), Error> {
    let mut globals = HashMap::new();
    builtins::install(&mut globals);
    let mut vm = Vm {
        chunk: Rc::new(chunk),
        ip: 0,
        stack: Vec::new(),
        globals: Rc::new(RefCell::new(globals)),
        locals: HashMap::new(),
        out,
    };
    vm.run()
}

struct Vm<'a, W: Write> {
    chunk: Rc<Chunk>,
    ip: usize,
    stack: Vec<Value>,
    globals: Rc<RefCell<HashMap<String, Value>>>,
    locals: HashMap<String, Value>,
    out: &'a mut W,
}

impl<W: Write> Vm<'_, W> {
    fn run(&mut self) -> Result<(), Error> {
        while self.ip < self.chunk.code.len() {
            let byte = self.chunk.code[self.ip];
            self.ip += 1;
            let op = Opcode::from_byte(byte)
                .ok_or_else(|| Error::Runtime(format!("unknown opcode: {byte}")))?;

            match op {
                Opcode::Constant => {
                    let idx = self.read_byte()?;
                    let value = match self.constant(idx)? {
                        Constant::Int(v) => Value::Int(*v),
                        Constant::Str(s) => Value::Str(s.clone()),
                        Constant::Bool(b) => Value::Bool(*b),
                        Constant::Chunk(_) => {
                            return Err(Error::Runtime(format!(
                                "constant {idx} is a function chunk, not a value"
                            )));
                        }
                    };
                    self.push(value);
                }
                Opcode::Add => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    let result = match (a, b) {
                        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(y)),
                        (Value::Str(x), Value::Str(y)) => Value::Str(x + &y),
                        (a, b) => {
                            return Err(Error::Runtime(format!(
                                "cannot add {} and {}",
                                a.type_name(),
                                b.type_name()
                            )));
                        }
                    };
                    self.push(result);
                }
                Opcode::Sub => {
                    let (a, b) = self.pop_int_pair("-")?;
                    self.push(Value::Int(a.wrapping_sub(b)));
                }
                Opcode::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::Bool(a == b));
                }
                Opcode::Greater => {
                    let (a, b) = self.pop_int_pair(">")?;
                    self.push(Value::Bool(a > b));
                }
                Opcode::Less => {
                    let (a, b) = self.pop_int_pair("<")?;
                    self.push(Value::Bool(a < b));
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::Print => {
                    let value = self.pop()?;
                    writeln!(self.out, "{value}")?;
                }
                Opcode::Return => break,
                Opcode::DefineGlobal => {
                    let idx = self.read_byte()?;
                    let name = self.name_constant(idx)?;
                    let value = self.pop()?;
                    self.globals.borrow_mut().insert(name, value);
                }
                Opcode::GetGlobal => {
                    let idx = self.read_byte()?;
                    let name = self.name_constant(idx)?;
                    let value = if let Some(v) = self.locals.get(&name) {
                        v.clone()
                    } else if let Some(v) = self.globals.borrow().get(&name) {
                        v.clone()
                    } else {
                        return Err(Error::Runtime(format!("undefined variable: {name}")));
                    };
                    self.push(value);
                }
                Opcode::Call => {
                    let nargs = self.read_byte()? as usize;
                    let args = self.pop_many(nargs)?;
                    let callee = self.pop()?;
                    let result = match callee {
                        Value::Closure(chunk) => self.call_closure(&chunk, args)?,
                        Value::Builtin(builtin) => builtins::call(builtin, args, self.out)?,
                        other => {
                            return Err(Error::Runtime(format!(
                                "cannot call a {} value",
                                other.type_name()
                            )));
                        }
                    };
                    self.push(result);
                }
                Opcode::Closure => {
                    let idx = self.read_byte()?;
                    let closure = match self.constant(idx)? {
                        Constant::Chunk(sub) => Value::Closure(Rc::clone(sub)),
                        _ => {
                            return Err(Error::Runtime(format!(
                                "closure operand {idx} is not a function chunk"
                            )));
                        }
                    };
                    self.push(closure);
                }
                Opcode::JumpIfFalse => {
                    let target = self.read_byte()? as usize;
                    // Peek, not pop: the condition stays on the stack.
                    if !self.peek()?.truthy() {
                        self.ip = target;
                    }
                }
                Opcode::Jump => {
                    let target = self.read_byte()? as usize;
                    self.ip = target;
                }
                Opcode::Array => {
                    let count = self.read_byte()? as usize;
                    let elems = self.pop_many(count)?;
                    self.push(Value::List(elems));
                }
                Opcode::Dict => {
                    let count = self.read_byte()? as usize;
                    let mut entries = HashMap::with_capacity(count);
                    for _ in 0..count {
                        let key = self.pop()?;
                        let value = self.pop()?;
                        entries.insert(DictKey::from_value(key)?, value);
                    }
                    self.push(Value::Dict(entries));
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let base = self.pop()?;
                    let result = Self::index_value(base, index)?;
                    self.push(result);
                }
            }
        }
        Ok(())
    }

    /// Spawn a nested VM sharing this one's globals, bind the parameters as
    /// its locals, run the body, and take the last value on its stack.
    fn call_closure(&mut self, chunk: &Rc<Chunk>, args: Vec<Value>) -> Result<Value, Error> {
        if args.len() != chunk.params.len() {
            return Err(Error::Runtime(format!(
                "function expects {} arguments, got {}",
                chunk.params.len(),
                args.len()
            )));
        }
        let locals = chunk
            .params
            .iter()
            .cloned()
            .zip(args)
            .collect::<HashMap<_, _>>();
        let mut sub = Vm {
            chunk: Rc::clone(chunk),
            ip: 0,
            stack: Vec::new(),
            globals: Rc::clone(&self.globals),
            locals,
            out: &mut *self.out,
        };
        sub.run()?;
        Ok(sub.stack.pop().unwrap_or(Value::Null))
    }

    fn index_value(base: Value, index: Value) -> Result<Value, Error> {
        match base {
            Value::List(elems) => {
                let i = match index {
                    Value::Int(i) => i,
                    other => {
                        return Err(Error::Runtime(format!(
                            "list index must be an integer, got {}",
                            other.type_name()
                        )));
                    }
                };
                usize::try_from(i)
                    .ok()
                    .and_then(|i| elems.get(i).cloned())
                    .ok_or_else(|| {
                        Error::Runtime(format!(
                            "list index out of bounds: {i} (length {})",
                            elems.len()
                        ))
                    })
            }
            Value::Dict(entries) => {
                let key = DictKey::from_value(index)?;
                entries
                    .get(&key)
                    .cloned()
                    .ok_or_else(|| Error::Runtime(format!("key not found: {key}")))
            }
            other => Err(Error::Runtime(format!(
                "cannot index into a {} value",
                other.type_name()
            ))),
        }
    }

    // ── Stack and chunk access ────────────────────────────────────

    fn read_byte(&mut self) -> Result<u8, Error> {
        let b = self
            .chunk
            .code
            .get(self.ip)
            .copied()
            .ok_or_else(|| Error::Runtime("truncated bytecode".into()))?;
        self.ip += 1;
        Ok(b)
    }

    fn constant(&self, idx: u8) -> Result<&Constant, Error> {
        self.chunk
            .constants
            .get(idx as usize)
            .ok_or_else(|| Error::Runtime(format!("constant index out of range: {idx}")))
    }

    fn name_constant(&self, idx: u8) -> Result<String, Error> {
        match self.constant(idx)? {
            Constant::Str(s) => Ok(s.clone()),
            other => Err(Error::Runtime(format!(
                "name operand must be a string constant, got {other:?}"
            ))),
        }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, Error> {
        self.stack
            .pop()
            .ok_or_else(|| Error::Runtime("stack underflow".into()))
    }

    fn peek(&self) -> Result<&Value, Error> {
        self.stack
            .last()
            .ok_or_else(|| Error::Runtime("stack underflow".into()))
    }

    /// Pop `n` values, preserving their push order.
    fn pop_many(&mut self, n: usize) -> Result<Vec<Value>, Error> {
        if self.stack.len() < n {
            return Err(Error::Runtime("stack underflow".into()));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn pop_int_pair(&mut self, op: &str) -> Result<(i64, i64), Error> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Int(x), Value::Int(y)) => Ok((x, y)),
            (a, b) => Err(Error::Runtime(format!(
                "'{op}' requires integer operands, got {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::lexer::lex;
    use crate::parser::parse;
    use crate::typeck::{self, TypeCheckMode};

    /// Full pipeline with the default (enabled, lenient) checker.
    fn run_src(src: &str) -> String {
        let program = parse(lex(src).unwrap()).unwrap();
        let report = typeck::check(&program, &TypeCheckMode::default());
        assert!(
            !report.has_errors(),
            "type errors in test program: {:?}",
            report.errors
        );
        let chunk = compile(&program).unwrap();
        let mut out = Vec::new();
        run_with_output(chunk, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    /// Pipeline without the type checker, for programs that only fail (or
    /// only make sense) at runtime.
    fn run_unchecked(src: &str) -> Result<String, Error> {
        let program = parse(lex(src).unwrap()).unwrap();
        let chunk = compile(&program).unwrap();
        let mut out = Vec::new();
        run_with_output(chunk, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    fn runtime_error(src: &str) -> String {
        match run_unchecked(src) {
            Err(Error::Runtime(msg)) => msg,
            other => panic!("expected runtime error, got {other:?}"),
        }
    }

    // ── End-to-end scenarios ──────────────────────────────────────

    #[test]
    fn scenario_arithmetic_through_globals() {
        assert_eq!(run_src("let x = 10 let y = 20 print(x + y)"), "30\n");
    }

    #[test]
    fn scenario_function_call() {
        assert_eq!(run_src("let add = fn(a, b) => a + b print(add(2, 3))"), "5\n");
    }

    #[test]
    fn scenario_if_routes_to_one_print() {
        assert_eq!(
            run_src(r#"if 1 < 2 then print("yes") else print("no")"#),
            "yes\n"
        );
        assert_eq!(
            run_src(r#"if 2 < 1 then print("yes") else print("no")"#),
            "no\n"
        );
    }

    #[test]
    fn scenario_list_indexing() {
        assert_eq!(run_src("let xs = [10, 20, 30] print(xs[1])"), "20\n");
    }

    #[test]
    fn scenario_dict_indexing() {
        assert_eq!(
            run_src(r#"let d = {"a": 1, "b": 2} print(d["b"])"#),
            "2\n"
        );
    }

    #[test]
    fn scenario_conditional_function() {
        assert_eq!(
            run_src("let fact = fn(n) => if n == 0 then 1 else n - 1 print(fact(0))"),
            "1\n"
        );
        assert_eq!(
            run_src("let fact = fn(n) => if n == 0 then 1 else n - 1 print(fact(5))"),
            "4\n"
        );
    }

    // ── Language semantics ────────────────────────────────────────

    #[test]
    fn expression_statements_echo_their_value() {
        assert_eq!(run_src("1 + 2"), "3\n");
        assert_eq!(run_src(r#""a" + "b""#), "ab\n");
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(
            run_src(r#"let name = "flux" print("hello " + name)"#),
            "hello flux\n"
        );
    }

    #[test]
    fn subtraction_chains_are_right_associative() {
        // 10 - 2 - 3 parses as 10 - (2 - 3) = 11.
        assert_eq!(run_src("print(10 - 2 - 3)"), "11\n");
    }

    #[test]
    fn comparisons_and_equality() {
        assert_eq!(run_src("print(1 < 2)"), "true\n");
        assert_eq!(run_src("print(1 > 2)"), "false\n");
        assert_eq!(run_src("print(2 == 2)"), "true\n");
        assert_eq!(run_src(r#"print("a" == "a")"#), "true\n");
    }

    #[test]
    fn equality_is_structural_across_variants() {
        assert_eq!(run_unchecked(r#"print(1 == "1")"#).unwrap(), "false\n");
        assert_eq!(run_src("print([1, 2] == [1, 2])"), "true\n");
        assert_eq!(run_src("print([1, 2] == [2, 1])"), "false\n");
        assert_eq!(
            run_src(r#"print({"a": 1} == {"a": 1})"#),
            "true\n"
        );
    }

    #[test]
    fn booleans_print_as_words() {
        assert_eq!(run_src("print(true) print(false)"), "true\nfalse\n");
        assert_eq!(run_src("print(yes) print(no)"), "true\nfalse\n");
    }

    #[test]
    fn print_returns_its_argument() {
        assert_eq!(run_src("let r = print(7) print(r)"), "7\n7\n");
    }

    #[test]
    fn print_multiple_arguments_each_on_a_line() {
        assert_eq!(run_unchecked("print(1, 2, 3)").unwrap(), "1\n2\n3\n");
    }

    #[test]
    fn truthiness_rules() {
        assert_eq!(run_unchecked(r#"if 0 then print("t") else print("f")"#).unwrap(), "f\n");
        assert_eq!(run_unchecked(r#"if 3 then print("t") else print("f")"#).unwrap(), "t\n");
        assert_eq!(
            run_unchecked(r#"if "" then print("t") else print("f")"#).unwrap(),
            "f\n"
        );
        assert_eq!(
            run_unchecked(r#"if "x" then print("t") else print("f")"#).unwrap(),
            "t\n"
        );
        assert_eq!(
            run_unchecked(r#"if [] then print("t") else print("f")"#).unwrap(),
            "t\n"
        );
    }

    #[test]
    fn block_value_is_the_last_expression() {
        assert_eq!(run_src("let x = { 1 2 3 } print(x)"), "3\n");
    }

    #[test]
    fn if_evaluates_exactly_one_branch() {
        // Each branch prints when taken; only one line may appear.
        let out = run_src(r#"let r = if 1 < 2 then print("then") else print("else") print(r)"#);
        assert_eq!(out, "then\nthen\n");
    }

    #[test]
    fn nested_calls() {
        assert_eq!(
            run_src("let inc = fn(n) => n + 1 print(inc(inc(inc(0))))"),
            "3\n"
        );
    }

    #[test]
    fn closures_observe_globals_at_call_time() {
        assert_eq!(
            run_src("let x = 1 let f = fn() => x let x = 99 print(f())"),
            "99\n"
        );
    }

    #[test]
    fn parameters_shadow_globals() {
        assert_eq!(
            run_src("let x = 1 let f = fn(x) => x + 10 print(f(5)) print(x)"),
            "15\n1\n"
        );
    }

    #[test]
    fn recursion_resolves_through_globals() {
        let src = "let count = fn(n) => if n == 0 then 0 else count(n - 1) print(count(10))";
        assert_eq!(run_unchecked(src).unwrap(), "0\n");
    }

    #[test]
    fn function_result_can_be_indexed() {
        assert_eq!(
            run_src("let make = fn() => [1, 2, 3] print(make()[2])"),
            "3\n"
        );
    }

    #[test]
    fn list_indexing_covers_the_whole_range() {
        for (i, expected) in [(0, "10"), (1, "20"), (2, "30")] {
            assert_eq!(
                run_src(&format!("let xs = [10, 20, 30] print(xs[{i}])")),
                format!("{expected}\n")
            );
        }
    }

    #[test]
    fn composite_values_render_in_debug_form() {
        assert_eq!(run_src("print([1, 2])"), "[1, 2]\n");
        assert_eq!(run_src(r#"print(["a", "b"])"#), "[\"a\", \"b\"]\n");
        assert_eq!(run_src(r#"print({"k": 1})"#), "{\"k\": 1}\n");
    }

    #[test]
    fn empty_dict_literal() {
        assert_eq!(run_src("print({})"), "{}\n");
    }

    // ── Runtime errors ────────────────────────────────────────────

    #[test]
    fn list_index_out_of_bounds() {
        let msg = runtime_error("let xs = [1, 2] print(xs[2])");
        assert!(msg.contains("out of bounds"), "message: {msg}");
        let msg = runtime_error("let xs = [1, 2] print(xs[0 - 1])");
        assert!(msg.contains("out of bounds"), "message: {msg}");
    }

    #[test]
    fn undefined_variable_fails() {
        let msg = runtime_error("print(missing)");
        assert!(msg.contains("undefined variable: missing"), "message: {msg}");
    }

    #[test]
    fn missing_dict_key_fails() {
        let msg = runtime_error(r#"let d = {"a": 1} print(d["z"])"#);
        assert!(msg.contains("key not found"), "message: {msg}");
    }

    #[test]
    fn calling_a_non_function_fails() {
        let msg = runtime_error("let n = 5 n(1)");
        assert!(msg.contains("cannot call"), "message: {msg}");
    }

    #[test]
    fn wrong_arity_fails() {
        let msg = runtime_error("let f = fn(a) => a f(1, 2)");
        assert!(msg.contains("expects 1 arguments, got 2"), "message: {msg}");
    }

    #[test]
    fn indexing_a_scalar_fails() {
        let msg = runtime_error("let n = 5 print(n[0])");
        assert!(msg.contains("cannot index"), "message: {msg}");
    }

    #[test]
    fn adding_mismatched_operands_fails() {
        let msg = runtime_error(r#"print(1 + "a")"#);
        assert!(msg.contains("cannot add int and string"), "message: {msg}");
    }

    #[test]
    fn comparison_requires_integers() {
        let msg = runtime_error(r#"print("a" < "b")"#);
        assert!(msg.contains("integer operands"), "message: {msg}");
    }

    #[test]
    fn unkeyable_dict_key_fails() {
        let msg = runtime_error("let f = fn(k) => {k: 1} f([1])");
        assert!(msg.contains("dict key must be"), "message: {msg}");
    }

    // ── Stack discipline ──────────────────────────────────────────

    #[test]
    fn residual_stack_matches_unechoed_statements() {
        // Echoed statements pop their value; print calls and indexing
        // statements leave theirs behind.
        let src = "let xs = [7, 8] print(3) xs[0] 1 + 1";
        let program = parse(lex(src).unwrap()).unwrap();
        let chunk = compile(&program).unwrap();
        let mut globals = HashMap::new();
        builtins::install(&mut globals);
        let mut out = Vec::new();
        let mut vm = Vm {
            chunk: Rc::new(chunk),
            ip: 0,
            stack: Vec::new(),
            globals: Rc::new(RefCell::new(globals)),
            locals: HashMap::new(),
            out: &mut out,
        };
        vm.run().unwrap();
        assert_eq!(vm.stack, vec![Value::Int(3), Value::Int(7)]);
    }

    #[test]
    fn decoded_artifacts_execute_identically() {
        let src = "let add = fn(a, b) => a + b print(add(40, 2))";
        let program = parse(lex(src).unwrap()).unwrap();
        let chunk = compile(&program).unwrap();
        let bytes = crate::bytecode::encode(&chunk);
        let decoded = crate::bytecode::decode(&bytes).unwrap();
        let mut out = Vec::new();
        run_with_output(decoded, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "42\n");
    }
}
