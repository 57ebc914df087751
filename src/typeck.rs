//! Structural type checker with gradual inference.
//!
//! The checker walks the AST once, computing a [`Type`] for every expression
//! and collecting errors and warnings into ordered lists. `Type::Unknown` is
//! a symmetric wildcard: unannotated function parameters start as `Unknown`
//! and most rules let it stand in for any concrete type.
//!
//! Three knobs control behavior: `enabled` skips the pass entirely, `strict`
//! turns the lenient-mode warnings into errors, and `warn_only` demotes
//! every would-be error to a warning.

use std::collections::HashMap;

use crate::ast::{Base, BinOp, Expr, Postfix, Primary, Program, Statement, Term};
use crate::builtins::Builtin;
use crate::types::Type;

/// Knobs for the type-checking pass, usually sourced from `flux.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeCheckMode {
    pub enabled: bool,
    pub strict: bool,
    pub warn_only: bool,
}

impl Default for TypeCheckMode {
    fn default() -> Self {
        Self {
            enabled: true,
            strict: false,
            warn_only: false,
        }
    }
}

/// Ordered diagnostics from one checking pass.
#[derive(Debug, Clone, Default)]
pub struct TypeReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl TypeReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub fn check(program: &Program, mode: &TypeCheckMode) -> TypeReport {
    let mut checker = TypeChecker::new(mode);
    checker.check_program(program);
    TypeReport {
        errors: checker.errors,
        warnings: checker.warnings,
    }
}

/// Lexically nested bindings. Lookup walks from the innermost scope out.
struct TypeEnv {
    scopes: Vec<HashMap<String, Type>>,
}

impl TypeEnv {
    fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    fn bind(&mut self, name: &str, ty: Type) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), ty);
        }
    }

    fn lookup(&self, name: &str) -> Option<&Type> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        if self.scopes.len() > 1 {
            self.scopes.pop();
        }
    }
}

struct TypeChecker {
    env: TypeEnv,
    errors: Vec<String>,
    warnings: Vec<String>,
    strict: bool,
    warn_only: bool,
}

impl TypeChecker {
    fn new(mode: &TypeCheckMode) -> Self {
        let mut env = TypeEnv::new();
        for builtin in Builtin::ALL {
            env.bind(builtin.name(), builtin.signature());
        }
        Self {
            env,
            errors: Vec::new(),
            warnings: Vec::new(),
            strict: mode.strict,
            warn_only: mode.warn_only,
        }
    }

    /// Record an error, demoted to a warning in warn-only mode.
    fn error(&mut self, msg: impl Into<String>) {
        if self.warn_only {
            self.warnings.push(msg.into());
        } else {
            self.errors.push(msg.into());
        }
    }

    fn warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn check_program(&mut self, program: &Program) {
        for stmt in &program.statements {
            self.check_statement(stmt);
        }
    }

    fn check_statement(&mut self, stmt: &Statement) {
        match stmt {
            Statement::Let { name, anno, value } => {
                let expr_ty = self.check_expr(value);
                if let Some(anno) = anno {
                    if !expr_ty.compatible(anno) {
                        let msg = format!(
                            "type mismatch: variable {name} declared as {anno} but assigned {expr_ty}"
                        );
                        if self.strict {
                            self.error(msg);
                        } else if Self::can_assign(&expr_ty, anno) {
                            self.warning(format!(
                                "implicit type conversion: {expr_ty} to {anno} for variable {name}"
                            ));
                        } else {
                            self.error(msg);
                        }
                    }
                    self.env.bind(name, anno.clone());
                } else {
                    self.env.bind(name, expr_ty);
                }
            }
            Statement::Expr(expr) => {
                self.check_expr(expr);
            }
        }
    }

    /// Lenient-mode assignability: anything goes to `string`, `Unknown`
    /// goes anywhere.
    fn can_assign(from: &Type, to: &Type) -> bool {
        if from.compatible(to) {
            return true;
        }
        matches!(to, Type::String)
    }

    fn check_expr(&mut self, expr: &Expr) -> Type {
        match expr {
            Expr::If { cond, then, els } => self.check_if(cond, then, els),
            Expr::Func {
                params,
                return_anno,
                body,
            } => self.check_func(params, return_anno.as_ref(), body),
            Expr::Binary { left, tail } => self.check_binary(left, tail.as_ref()),
            Expr::Block(exprs) => self.check_block(exprs),
        }
    }

    fn check_if(&mut self, cond: &Expr, then: &Expr, els: &Expr) -> Type {
        let cond_ty = self.check_expr(cond);
        if !cond_ty.compatible(&Type::Bool) {
            let msg = format!("if condition must be bool, got {cond_ty}");
            if self.strict {
                self.error(msg);
            } else {
                self.warning(format!("{msg} (treating as truthy)"));
            }
        }

        let then_ty = self.check_expr(then);
        let else_ty = self.check_expr(els);

        if !then_ty.compatible(&else_ty) {
            let msg = format!("if branches must have same type: then={then_ty}, else={else_ty}");
            if self.strict {
                self.error(msg);
                return Type::Void;
            }
            self.warning(format!("{msg} (using union type)"));
            // Lenient mode: prefer the first non-void branch type.
            if then_ty != Type::Void {
                return then_ty;
            }
            return else_ty;
        }

        then_ty
    }

    fn check_binary(&mut self, left: &Primary, tail: Option<&(BinOp, Box<Expr>)>) -> Type {
        let left_ty = self.check_primary(left);
        let Some((op, right)) = tail else {
            return left_ty;
        };
        let right_ty = self.check_expr(right);

        match op {
            BinOp::Add => {
                if left_ty == Type::Unknown || right_ty == Type::Unknown {
                    // Infer from whichever side is known.
                    if left_ty != Type::Unknown {
                        return left_ty;
                    }
                    if right_ty != Type::Unknown {
                        return right_ty;
                    }
                    return Type::Unknown;
                }
                if left_ty == Type::Int && right_ty == Type::Int {
                    return Type::Int;
                }
                if left_ty == Type::String && right_ty == Type::String {
                    return Type::String;
                }

                let msg = format!("invalid operands for +: {left_ty} and {right_ty}");
                if self.strict {
                    self.error(msg);
                } else if matches!(left_ty, Type::Int | Type::String)
                    && matches!(right_ty, Type::Int | Type::String)
                {
                    self.warning(format!(
                        "mixed type addition: {left_ty} + {right_ty} (converting to string)"
                    ));
                    return Type::String;
                } else {
                    self.error(msg);
                }
                Type::Void
            }
            BinOp::Sub => {
                if left_ty == Type::Unknown || right_ty == Type::Unknown {
                    return Type::Int;
                }
                if left_ty == Type::Int && right_ty == Type::Int {
                    return Type::Int;
                }
                let msg = format!("invalid operands for -: {left_ty} and {right_ty}");
                if self.strict {
                    self.error(msg);
                } else {
                    self.warning(format!("{msg} (assuming int)"));
                    return Type::Int;
                }
                Type::Void
            }
            BinOp::Eq => {
                if left_ty == Type::Unknown || right_ty == Type::Unknown {
                    return Type::Bool;
                }
                if !left_ty.compatible(&right_ty) {
                    let msg = format!("cannot compare different types: {left_ty} and {right_ty}");
                    if self.strict {
                        self.error(msg);
                    } else {
                        self.warning(format!("{msg} (allowing comparison)"));
                    }
                }
                Type::Bool
            }
            BinOp::Lt | BinOp::Gt => {
                if left_ty == Type::Unknown || right_ty == Type::Unknown {
                    return Type::Bool;
                }
                if !(left_ty == Type::Int && right_ty == Type::Int) {
                    let msg = format!("invalid operands for {op}: {left_ty} and {right_ty}");
                    if self.strict {
                        self.error(msg);
                    } else {
                        self.warning(format!("{msg} (assuming numeric comparison)"));
                    }
                }
                Type::Bool
            }
        }
    }

    fn check_block(&mut self, exprs: &[Expr]) -> Type {
        let mut last = Type::Void;
        for expr in exprs {
            last = self.check_expr(expr);
        }
        last
    }

    fn check_primary(&mut self, primary: &Primary) -> Type {
        let mut current = self.check_base(&primary.base);
        for postfix in &primary.postfix {
            current = match postfix {
                Postfix::Call(args) => self.check_call(current, args),
                Postfix::Index(index) => self.check_index(current, index),
            };
        }
        current
    }

    fn check_base(&mut self, base: &Base) -> Type {
        match base {
            Base::Term(term) => self.check_term(term),
            Base::List(elems) => self.check_list(elems),
            Base::Dict(pairs) => self.check_dict(pairs),
        }
    }

    fn check_term(&mut self, term: &Term) -> Type {
        match term {
            Term::Int(_) => Type::Int,
            Term::Str(_) => Type::String,
            Term::Bool(_) => Type::Bool,
            Term::Ident(name) => {
                if let Some(ty) = self.env.lookup(name) {
                    ty.clone()
                } else {
                    self.error(format!("undefined variable: {name}"));
                    Type::Void
                }
            }
        }
    }

    fn check_list(&mut self, elems: &[Expr]) -> Type {
        let Some(first) = elems.first() else {
            return Type::List(Box::new(Type::Void));
        };
        let elem_ty = self.check_expr(first);
        for (i, elem) in elems.iter().enumerate().skip(1) {
            let ty = self.check_expr(elem);
            if !ty.compatible(&elem_ty) {
                self.error(format!("list element {i} has type {ty}, expected {elem_ty}"));
            }
        }
        Type::List(Box::new(elem_ty))
    }

    fn check_dict(&mut self, pairs: &[(Expr, Expr)]) -> Type {
        let Some((first_key, first_value)) = pairs.first() else {
            return Type::Dict(Box::new(Type::Void), Box::new(Type::Void));
        };
        let key_ty = self.check_expr(first_key);
        let value_ty = self.check_expr(first_value);

        if !key_ty.is_keyable() && key_ty != Type::Unknown {
            self.error(format!("dict keys must be int, string, or bool, got {key_ty}"));
        }

        for (i, (key, value)) in pairs.iter().enumerate().skip(1) {
            let kt = self.check_expr(key);
            let vt = self.check_expr(value);
            if !kt.compatible(&key_ty) {
                self.error(format!("dict key {i} has type {kt}, expected {key_ty}"));
            }
            if !vt.compatible(&value_ty) {
                self.error(format!("dict value {i} has type {vt}, expected {value_ty}"));
            }
        }
        Type::Dict(Box::new(key_ty), Box::new(value_ty))
    }

    fn check_call(&mut self, callee_ty: Type, args: &[Expr]) -> Type {
        let (params, ret) = match callee_ty {
            Type::Function { params, ret } => (params, ret),
            other => {
                self.error(format!("cannot call non-function type: {other}"));
                // Still check the arguments so their errors surface.
                for arg in args {
                    self.check_expr(arg);
                }
                return Type::Void;
            }
        };

        if args.len() != params.len() {
            self.error(format!(
                "function expects {} arguments, got {}",
                params.len(),
                args.len()
            ));
            return *ret;
        }

        for (i, (arg, expected)) in args.iter().zip(params.iter()).enumerate() {
            let arg_ty = self.check_expr(arg);
            if *expected != Type::Unknown
                && arg_ty != Type::Unknown
                && !arg_ty.compatible(expected)
            {
                self.error(format!(
                    "argument {i} has type {arg_ty}, expected {expected}"
                ));
            }
        }

        *ret
    }

    fn check_index(&mut self, base_ty: Type, index: &Expr) -> Type {
        let index_ty = self.check_expr(index);
        match base_ty {
            Type::List(elem) => {
                if !index_ty.compatible(&Type::Int) {
                    self.error(format!("list index must be int, got {index_ty}"));
                }
                *elem
            }
            Type::Dict(key, value) => {
                if !index_ty.compatible(&key) {
                    self.error(format!("dict key must be {key}, got {index_ty}"));
                }
                *value
            }
            other => {
                self.error(format!("cannot index into type: {other}"));
                Type::Void
            }
        }
    }

    fn check_func(
        &mut self,
        params: &[crate::ast::Param],
        return_anno: Option<&Type>,
        body: &Expr,
    ) -> Type {
        self.env.push_scope();

        let mut param_types = Vec::with_capacity(params.len());
        for param in params {
            let ty = param.anno.clone().unwrap_or(Type::Unknown);
            self.env.bind(&param.name, ty.clone());
            param_types.push(ty);
        }

        let body_ty = self.check_expr(body);

        let ret = if let Some(anno) = return_anno {
            if body_ty != Type::Unknown && !body_ty.compatible(anno) {
                self.error(format!(
                    "return type mismatch: declared {anno} but body returns {body_ty}"
                ));
            }
            anno.clone()
        } else {
            body_ty
        };

        self.env.pop_scope();

        Type::Function {
            params: param_types,
            ret: Box::new(ret),
        }
    }
}
