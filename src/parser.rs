//! Recursive-descent parser for Flux.
//!
//! Expression alternatives are tried in grammar order: `if`, `fn`, binary,
//! block, primary. One token of lookahead is enough for every alternative
//! except a leading `{`, which can open either a dict literal or a block;
//! that case parses the first expression and then decides on the next token
//! (`:` means dict). A binary expression is one primary with at most one
//! operator tail whose right operand is a full expression, so operator
//! chains associate to the right; there is deliberately no precedence.

use crate::ast::{Base, BinOp, Expr, Param, Postfix, Primary, Program, Statement, Term};
use crate::error::Error;
use crate::lexer::{Token, TokenKind};
use crate::types::Type;

pub fn parse(tokens: Vec<Token>) -> Result<Program, Error> {
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse_program(&mut self) -> Result<Program, Error> {
        let mut statements = Vec::new();
        while !self.at_eof() {
            statements.push(self.parse_statement()?);
        }
        Ok(Program { statements })
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn position(&self) -> (usize, usize) {
        self.tokens
            .get(self.pos)
            .map_or((0, 0), |t| (t.line, t.col))
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len().saturating_sub(1) {
            self.pos += 1;
        }
    }

    fn error(&self, message: impl std::fmt::Display) -> Error {
        let (line, col) = self.position();
        Error::Parse(format!("{line}:{col}: {message}"))
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<(), Error> {
        if self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {expected}, got {}", self.peek())))
        }
    }

    fn expect_ident(&mut self) -> Result<String, Error> {
        if let TokenKind::Ident(name) = self.peek() {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error(format!("expected identifier, got {}", self.peek())))
        }
    }

    // ── Statements ────────────────────────────────────────────────

    fn parse_statement(&mut self) -> Result<Statement, Error> {
        if matches!(self.peek(), TokenKind::Let) {
            self.advance();
            let name = self.expect_ident()?;
            let anno = if matches!(self.peek(), TokenKind::Colon) {
                self.advance();
                Some(self.parse_type()?)
            } else {
                None
            };
            self.expect(&TokenKind::Eq)?;
            let value = self.parse_expr()?;
            Ok(Statement::Let { name, anno, value })
        } else {
            Ok(Statement::Expr(self.parse_expr()?))
        }
    }

    // ── Type syntax ───────────────────────────────────────────────

    fn parse_type(&mut self) -> Result<Type, Error> {
        match self.peek() {
            TokenKind::IntTy => {
                self.advance();
                Ok(Type::Int)
            }
            TokenKind::StringTy => {
                self.advance();
                Ok(Type::String)
            }
            TokenKind::BoolTy => {
                self.advance();
                Ok(Type::Bool)
            }
            TokenKind::VoidTy => {
                self.advance();
                Ok(Type::Void)
            }
            TokenKind::LBracket => {
                self.advance();
                let elem = self.parse_type()?;
                self.expect(&TokenKind::RBracket)?;
                Ok(Type::List(Box::new(elem)))
            }
            TokenKind::LBrace => {
                self.advance();
                let key = self.parse_type()?;
                self.expect(&TokenKind::Colon)?;
                let value = self.parse_type()?;
                self.expect(&TokenKind::RBrace)?;
                Ok(Type::Dict(Box::new(key), Box::new(value)))
            }
            TokenKind::Fn => {
                self.advance();
                self.expect(&TokenKind::LParen)?;
                let mut params = Vec::new();
                if !matches!(self.peek(), TokenKind::RParen) {
                    params.push(self.parse_type()?);
                    while matches!(self.peek(), TokenKind::Comma) {
                        self.advance();
                        params.push(self.parse_type()?);
                    }
                }
                self.expect(&TokenKind::RParen)?;
                self.expect(&TokenKind::TypeArrow)?;
                let ret = self.parse_type()?;
                Ok(Type::Function {
                    params,
                    ret: Box::new(ret),
                })
            }
            other => Err(self.error(format!("expected type, got {other}"))),
        }
    }

    // ── Expressions ───────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, Error> {
        match self.peek() {
            TokenKind::If => self.parse_if(),
            TokenKind::Fn => self.parse_func(),
            TokenKind::LBrace => self.parse_brace_form(),
            _ => {
                let primary = self.parse_primary()?;
                self.parse_binary_tail(primary)
            }
        }
    }

    fn parse_if(&mut self) -> Result<Expr, Error> {
        self.expect(&TokenKind::If)?;
        let cond = self.parse_expr()?;
        self.expect(&TokenKind::Then)?;
        let then = self.parse_expr()?;
        self.expect(&TokenKind::Else)?;
        let els = self.parse_expr()?;
        Ok(Expr::If {
            cond: Box::new(cond),
            then: Box::new(then),
            els: Box::new(els),
        })
    }

    fn parse_func(&mut self) -> Result<Expr, Error> {
        self.expect(&TokenKind::Fn)?;
        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !matches!(self.peek(), TokenKind::RParen) {
            params.push(self.parse_param()?);
            while matches!(self.peek(), TokenKind::Comma) {
                self.advance();
                params.push(self.parse_param()?);
            }
        }
        self.expect(&TokenKind::RParen)?;
        let return_anno = if matches!(self.peek(), TokenKind::Colon) {
            self.advance();
            Some(self.parse_type()?)
        } else {
            None
        };
        self.expect(&TokenKind::Arrow)?;
        let body = self.parse_expr()?;
        Ok(Expr::Func {
            params,
            return_anno,
            body: Box::new(body),
        })
    }

    fn parse_param(&mut self) -> Result<Param, Error> {
        let name = self.expect_ident()?;
        let anno = if matches!(self.peek(), TokenKind::Colon) {
            self.advance();
            Some(self.parse_type()?)
        } else {
            None
        };
        Ok(Param { name, anno })
    }

    /// A leading `{` opens either a dict literal (a primary, so postfixes
    /// and a binary tail may follow) or a block. `{}` is the empty dict.
    fn parse_brace_form(&mut self) -> Result<Expr, Error> {
        self.expect(&TokenKind::LBrace)?;

        if matches!(self.peek(), TokenKind::RBrace) {
            self.advance();
            let primary = self.parse_postfix_chain(Base::Dict(Vec::new()))?;
            return self.parse_binary_tail(primary);
        }

        let first = self.parse_expr()?;
        if matches!(self.peek(), TokenKind::Colon) {
            self.advance();
            let value = self.parse_expr()?;
            let mut pairs = vec![(first, value)];
            while matches!(self.peek(), TokenKind::Comma) {
                self.advance();
                let key = self.parse_expr()?;
                self.expect(&TokenKind::Colon)?;
                let val = self.parse_expr()?;
                pairs.push((key, val));
            }
            self.expect(&TokenKind::RBrace)?;
            let primary = self.parse_postfix_chain(Base::Dict(pairs))?;
            self.parse_binary_tail(primary)
        } else {
            let mut exprs = vec![first];
            while !matches!(self.peek(), TokenKind::RBrace | TokenKind::Eof) {
                exprs.push(self.parse_expr()?);
            }
            self.expect(&TokenKind::RBrace)?;
            Ok(Expr::Block(exprs))
        }
    }

    fn parse_binary_tail(&mut self, left: Primary) -> Result<Expr, Error> {
        let op = match self.peek() {
            TokenKind::Plus => Some(BinOp::Add),
            TokenKind::Minus => Some(BinOp::Sub),
            TokenKind::EqEq => Some(BinOp::Eq),
            TokenKind::Lt => Some(BinOp::Lt),
            TokenKind::Gt => Some(BinOp::Gt),
            _ => None,
        };
        let tail = match op {
            Some(op) => {
                self.advance();
                let right = self.parse_expr()?;
                Some((op, Box::new(right)))
            }
            None => None,
        };
        Ok(Expr::Binary { left, tail })
    }

    fn parse_primary(&mut self) -> Result<Primary, Error> {
        let base = match self.peek().clone() {
            TokenKind::Int(v) => {
                self.advance();
                Base::Term(Term::Int(v))
            }
            TokenKind::Str(s) => {
                self.advance();
                Base::Term(Term::Str(s))
            }
            TokenKind::Bool(b) => {
                self.advance();
                Base::Term(Term::Bool(b))
            }
            TokenKind::Ident(name) => {
                self.advance();
                Base::Term(Term::Ident(name))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut elems = Vec::new();
                if !matches!(self.peek(), TokenKind::RBracket) {
                    elems.push(self.parse_expr()?);
                    while matches!(self.peek(), TokenKind::Comma) {
                        self.advance();
                        elems.push(self.parse_expr()?);
                    }
                }
                self.expect(&TokenKind::RBracket)?;
                Base::List(elems)
            }
            other => return Err(self.error(format!("expected expression, got {other}"))),
        };
        self.parse_postfix_chain(base)
    }

    fn parse_postfix_chain(&mut self, base: Base) -> Result<Primary, Error> {
        let mut postfix = Vec::new();
        loop {
            match self.peek() {
                TokenKind::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    if !matches!(self.peek(), TokenKind::RParen) {
                        args.push(self.parse_expr()?);
                        while matches!(self.peek(), TokenKind::Comma) {
                            self.advance();
                            args.push(self.parse_expr()?);
                        }
                    }
                    self.expect(&TokenKind::RParen)?;
                    postfix.push(Postfix::Call(args));
                }
                TokenKind::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    self.expect(&TokenKind::RBracket)?;
                    postfix.push(Postfix::Index(Box::new(index)));
                }
                _ => break,
            }
        }
        Ok(Primary { base, postfix })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_src(src: &str) -> Program {
        parse(lex(src).unwrap()).unwrap()
    }

    fn parse_err(src: &str) -> Error {
        parse(lex(src).unwrap()).unwrap_err()
    }

    /// The single statement of a one-statement program.
    fn only_stmt(src: &str) -> Statement {
        let mut prog = parse_src(src);
        assert_eq!(prog.statements.len(), 1, "expected one statement");
        prog.statements.remove(0)
    }

    #[test]
    fn int_literal_round_trip() {
        for n in [0i64, 1, 42, 9_999_999] {
            let stmt = only_stmt(&format!("let x = {n}"));
            match stmt {
                Statement::Let { name, anno, value } => {
                    assert_eq!(name, "x");
                    assert!(anno.is_none());
                    assert_eq!(value, Expr::term(Term::Int(n)));
                }
                other => panic!("expected let, got {other:?}"),
            }
        }
    }

    #[test]
    fn string_literal_round_trip() {
        let stmt = only_stmt(r#"let s = "hi there""#);
        match stmt {
            Statement::Let { value, .. } => {
                assert_eq!(value, Expr::term(Term::Str("hi there".into())));
            }
            other => panic!("expected let, got {other:?}"),
        }
    }

    #[test]
    fn let_with_annotation() {
        let stmt = only_stmt("let n: int = 1");
        match stmt {
            Statement::Let { anno, .. } => assert_eq!(anno, Some(Type::Int)),
            other => panic!("expected let, got {other:?}"),
        }
    }

    #[test]
    fn composite_type_annotations() {
        let stmt = only_stmt("let xs: [int] = [1]");
        match stmt {
            Statement::Let { anno, .. } => {
                assert_eq!(anno, Some(Type::List(Box::new(Type::Int))));
            }
            other => panic!("expected let, got {other:?}"),
        }

        let stmt = only_stmt(r#"let d: {string: int} = {"a": 1}"#);
        match stmt {
            Statement::Let { anno, .. } => {
                assert_eq!(
                    anno,
                    Some(Type::Dict(Box::new(Type::String), Box::new(Type::Int)))
                );
            }
            other => panic!("expected let, got {other:?}"),
        }

        let stmt = only_stmt("let f: fn(int, int) -> int = fn(a, b) => a + b");
        match stmt {
            Statement::Let { anno, .. } => {
                assert_eq!(
                    anno,
                    Some(Type::Function {
                        params: vec![Type::Int, Type::Int],
                        ret: Box::new(Type::Int),
                    })
                );
            }
            other => panic!("expected let, got {other:?}"),
        }
    }

    #[test]
    fn binary_is_right_recursive() {
        // 1 - 2 - 3 must parse as 1 - (2 - 3): the tail's right operand is
        // itself a binary expression.
        let stmt = only_stmt("1 - 2 - 3");
        let Statement::Expr(Expr::Binary { left, tail }) = stmt else {
            panic!("expected binary expression");
        };
        assert_eq!(left.base, Base::Term(Term::Int(1)));
        let (op, right) = tail.unwrap();
        assert_eq!(op, BinOp::Sub);
        let Expr::Binary { left: rl, tail: rt } = *right else {
            panic!("right operand should be a nested binary");
        };
        assert_eq!(rl.base, Base::Term(Term::Int(2)));
        let (rop, rright) = rt.unwrap();
        assert_eq!(rop, BinOp::Sub);
        assert_eq!(*rright, Expr::term(Term::Int(3)));
    }

    #[test]
    fn postfix_chain_applies_left_to_right() {
        let stmt = only_stmt("f(1)[2](3)");
        let Statement::Expr(Expr::Binary { left, tail: None }) = stmt else {
            panic!("expected a bare primary");
        };
        assert_eq!(left.base, Base::Term(Term::Ident("f".into())));
        assert_eq!(left.postfix.len(), 3);
        assert!(matches!(left.postfix[0], Postfix::Call(ref a) if a.len() == 1));
        assert!(matches!(left.postfix[1], Postfix::Index(_)));
        assert!(matches!(left.postfix[2], Postfix::Call(ref a) if a.len() == 1));
    }

    #[test]
    fn func_with_annotations() {
        let stmt = only_stmt("let f = fn(a: int, b): bool => a < b");
        let Statement::Let { value, .. } = stmt else {
            panic!("expected let");
        };
        let Expr::Func {
            params,
            return_anno,
            ..
        } = value
        else {
            panic!("expected function literal");
        };
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].anno, Some(Type::Int));
        assert!(params[1].anno.is_none());
        assert_eq!(return_anno, Some(Type::Bool));
    }

    #[test]
    fn func_without_params() {
        let stmt = only_stmt("let f = fn() => 1");
        let Statement::Let { value, .. } = stmt else {
            panic!("expected let");
        };
        assert!(matches!(value, Expr::Func { ref params, .. } if params.is_empty()));
    }

    #[test]
    fn if_requires_both_arms() {
        let stmt = only_stmt("if true then 1 else 2");
        assert!(matches!(stmt, Statement::Expr(Expr::If { .. })));
        assert!(matches!(parse_err("if true then 1"), Error::Parse(_)));
    }

    #[test]
    fn list_literal() {
        let stmt = only_stmt("[1, 2, 3]");
        let Statement::Expr(Expr::Binary { left, .. }) = stmt else {
            panic!("expected primary");
        };
        assert!(matches!(left.base, Base::List(ref elems) if elems.len() == 3));
    }

    #[test]
    fn empty_list_literal() {
        let stmt = only_stmt("[]");
        let Statement::Expr(Expr::Binary { left, .. }) = stmt else {
            panic!("expected primary");
        };
        assert!(matches!(left.base, Base::List(ref elems) if elems.is_empty()));
    }

    #[test]
    fn dict_literal() {
        let stmt = only_stmt(r#"{"a": 1, "b": 2}"#);
        let Statement::Expr(Expr::Binary { left, .. }) = stmt else {
            panic!("expected primary");
        };
        assert!(matches!(left.base, Base::Dict(ref pairs) if pairs.len() == 2));
    }

    #[test]
    fn empty_braces_are_a_dict() {
        let stmt = only_stmt("{}");
        let Statement::Expr(Expr::Binary { left, .. }) = stmt else {
            panic!("expected primary");
        };
        assert!(matches!(left.base, Base::Dict(ref pairs) if pairs.is_empty()));
    }

    #[test]
    fn braces_without_colon_are_a_block() {
        let stmt = only_stmt("{ 1 2 3 }");
        assert!(matches!(stmt, Statement::Expr(Expr::Block(ref exprs)) if exprs.len() == 3));
    }

    #[test]
    fn dict_can_be_indexed_directly() {
        let stmt = only_stmt(r#"{"a": 1}["a"]"#);
        let Statement::Expr(Expr::Binary { left, .. }) = stmt else {
            panic!("expected primary");
        };
        assert!(matches!(left.base, Base::Dict(_)));
        assert_eq!(left.postfix.len(), 1);
        assert!(matches!(left.postfix[0], Postfix::Index(_)));
    }

    #[test]
    fn dict_takes_a_binary_tail() {
        let stmt = only_stmt(r#"{"a": 1}["a"] + 2"#);
        let Statement::Expr(Expr::Binary { tail, .. }) = stmt else {
            panic!("expected binary");
        };
        assert!(matches!(tail, Some((BinOp::Add, _))));
    }

    #[test]
    fn nested_collections() {
        let stmt = only_stmt(r#"[{"a": 1}, {"b": 2}]"#);
        let Statement::Expr(Expr::Binary { left, .. }) = stmt else {
            panic!("expected primary");
        };
        let Base::List(elems) = left.base else {
            panic!("expected list base");
        };
        assert_eq!(elems.len(), 2);
        assert!(elems
            .iter()
            .all(|e| matches!(e, Expr::Binary { left, .. } if matches!(left.base, Base::Dict(_)))));
    }

    #[test]
    fn if_as_call_argument() {
        let stmt = only_stmt("print(if 1 < 2 then 1 else 2)");
        let Statement::Expr(Expr::Binary { left, .. }) = stmt else {
            panic!("expected primary");
        };
        let Postfix::Call(args) = &left.postfix[0] else {
            panic!("expected call postfix");
        };
        assert!(matches!(args[0], Expr::If { .. }));
    }

    #[test]
    fn multiple_statements() {
        let prog = parse_src("let x = 1 let y = 2 print(x + y)");
        assert_eq!(prog.statements.len(), 3);
    }

    #[test]
    fn parse_error_carries_position() {
        let err = parse_err("let = 1");
        match err {
            Error::Parse(msg) => assert!(msg.starts_with("1:5:"), "message: {msg}"),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn let_requires_initializer() {
        assert!(matches!(parse_err("let x"), Error::Parse(_)));
        assert!(matches!(parse_err("let x ="), Error::Parse(_)));
    }

    #[test]
    fn stray_operator_fails() {
        assert!(matches!(parse_err("+ 1"), Error::Parse(_)));
    }

    #[test]
    fn let_inside_block_fails() {
        assert!(matches!(parse_err("{ let x = 1 }"), Error::Parse(_)));
    }
}
