//! Recursive-descent parser for `.snip` sources

use std::sync::Arc;

use super::ast::*;
use super::lexer::{Lexer, Pos, Tok, Token};
use super::ParseError;

/// Deepest nesting of blocks, parenthesised or unary expressions, and
/// postfix chains the parser accepts
pub const MAX_PARSE_DEPTH: usize = 256;

/// Parse one source file
pub fn parse_file(name: &str, source: &str) -> Result<File, ParseError> {
    let tokens = Lexer::new(name, source).tokenize()?;
    Parser::new(name, tokens).file()
}

struct Parser<'a> {
    file: &'a str,
    tokens: Vec<Token>,
    idx: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(file: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            file,
            tokens,
            idx: 0,
            depth: 0,
        }
    }

    // =========================================================================
    // Token helpers
    // =========================================================================

    fn peek(&self) -> &Tok {
        &self.tokens[self.idx.min(self.tokens.len() - 1)].tok
    }

    fn peek_at(&self, offset: usize) -> &Tok {
        &self.tokens[(self.idx + offset).min(self.tokens.len() - 1)].tok
    }

    fn pos(&self) -> Pos {
        self.tokens[self.idx.min(self.tokens.len() - 1)].pos
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
        tok
    }

    fn at(&self, tok: &Tok) -> bool {
        self.peek() == tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.at(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), ParseError> {
        if self.eat(&tok) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    fn skip_semis(&mut self) {
        while self.eat(&Tok::Semi) {}
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::Syntax {
            file: self.file.to_string(),
            pos: self.pos(),
            message: message.into(),
        }
    }

    fn unexpected(&self, what: &str) -> ParseError {
        let found = match self.peek() {
            Tok::Semi => "newline or ';'".to_string(),
            Tok::Eof => "end of file".to_string(),
            other => format!("{:?}", other),
        };
        self.error(format!("expected {}, found {}", what, found))
    }

    /// Run `f` one nesting level deeper
    fn descend<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= MAX_PARSE_DEPTH {
            return Err(self.error(format!("nesting exceeds {} levels", MAX_PARSE_DEPTH)));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// After a statement or declaration: `;` or a closing token
    fn end_of_item(&mut self, close: &Tok) -> Result<(), ParseError> {
        if self.eat(&Tok::Semi) || self.at(close) || self.at(&Tok::Eof) {
            Ok(())
        } else {
            Err(self.unexpected("';' or newline"))
        }
    }

    // =========================================================================
    // File level
    // =========================================================================

    fn file(mut self) -> Result<File, ParseError> {
        self.skip_semis();

        let mut package = None;
        if self.eat(&Tok::Package) {
            package = Some(self.ident("package name")?);
            self.end_of_item(&Tok::Eof)?;
        }
        self.skip_semis();

        let mut imports = Vec::new();
        while self.eat(&Tok::Import) {
            if self.eat(&Tok::LParen) {
                self.skip_semis();
                while !self.at(&Tok::RParen) {
                    imports.push(self.import_spec()?);
                    self.end_of_item(&Tok::RParen)?;
                    self.skip_semis();
                }
                self.expect(Tok::RParen, "')'")?;
            } else {
                imports.push(self.import_spec()?);
            }
            self.end_of_item(&Tok::Eof)?;
            self.skip_semis();
        }

        let mut decls = Vec::new();
        while !self.at(&Tok::Eof) {
            match self.peek() {
                Tok::Func => decls.push(Decl::Func(Arc::new(self.func_decl()?))),
                Tok::Var | Tok::Const => {
                    for spec in self.var_decl()? {
                        decls.push(Decl::Var(spec));
                    }
                }
                Tok::Import => return Err(self.error("imports must appear before other declarations")),
                _ => return Err(self.unexpected("declaration")),
            }
            self.end_of_item(&Tok::Eof)?;
            self.skip_semis();
        }

        Ok(File {
            name: self.file.to_string(),
            package,
            imports,
            decls,
        })
    }

    fn import_spec(&mut self) -> Result<ImportSpec, ParseError> {
        let pos = self.pos();
        let alias = match self.peek().clone() {
            Tok::Ident(alias) => {
                self.advance();
                Some(alias)
            }
            Tok::Dot => return Err(self.error("dot imports are not supported")),
            _ => None,
        };
        match self.advance() {
            Tok::Str(path) if !path.is_empty() => Ok(ImportSpec { alias, path, pos }),
            _ => Err(self.error("expected import path string")),
        }
    }

    fn func_decl(&mut self) -> Result<FuncDecl, ParseError> {
        let pos = self.pos();
        self.expect(Tok::Func, "'func'")?;
        let name = self.ident("function name")?;

        self.expect(Tok::LParen, "'('")?;
        let mut params = Vec::new();
        while !self.at(&Tok::RParen) {
            params.push(self.ident("parameter name")?);
            if !self.at(&Tok::Comma) && !self.at(&Tok::RParen) {
                self.type_expr()?;
            }
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RParen, "')'")?;

        if !self.at(&Tok::LBrace) {
            if self.eat(&Tok::LParen) {
                while !self.eat(&Tok::RParen) {
                    self.type_expr()?;
                    if !self.eat(&Tok::Comma) {
                        self.expect(Tok::RParen, "')'")?;
                        break;
                    }
                }
            } else {
                self.type_expr()?;
            }
        }

        let body = self.block()?;
        Ok(FuncDecl {
            name,
            params,
            body,
            pos,
        })
    }

    /// `var`/`const`, single or grouped
    fn var_decl(&mut self) -> Result<Vec<VarSpec>, ParseError> {
        let is_const = matches!(self.advance(), Tok::Const);
        let mut specs = Vec::new();
        if self.eat(&Tok::LParen) {
            self.skip_semis();
            while !self.at(&Tok::RParen) {
                specs.push(self.var_spec(is_const)?);
                self.end_of_item(&Tok::RParen)?;
                self.skip_semis();
            }
            self.expect(Tok::RParen, "')'")?;
        } else {
            specs.push(self.var_spec(is_const)?);
        }
        Ok(specs)
    }

    fn var_spec(&mut self, is_const: bool) -> Result<VarSpec, ParseError> {
        let name = self.ident("variable name")?;
        let ty = if !self.at(&Tok::Assign) {
            Some(self.type_expr()?)
        } else {
            None
        };
        let value = if self.eat(&Tok::Assign) {
            Some(self.expr()?)
        } else {
            None
        };
        if is_const && value.is_none() {
            return Err(self.error(format!("missing value in const declaration of {}", name)));
        }
        Ok(VarSpec {
            name,
            ty,
            value,
            is_const,
        })
    }

    fn type_expr(&mut self) -> Result<TypeExpr, ParseError> {
        match self.peek().clone() {
            Tok::Ident(name) => {
                self.advance();
                if self.eat(&Tok::Dot) {
                    let member = self.ident("type name")?;
                    return Ok(TypeExpr::Named(format!("{}.{}", name, member)));
                }
                Ok(TypeExpr::Named(name))
            }
            Tok::LBracket => {
                self.advance();
                self.expect(Tok::RBracket, "']'")?;
                Ok(TypeExpr::List(Box::new(self.type_expr()?)))
            }
            Tok::Map => {
                self.advance();
                self.expect(Tok::LBracket, "'['")?;
                let key = self.type_expr()?;
                self.expect(Tok::RBracket, "']'")?;
                let value = self.type_expr()?;
                Ok(TypeExpr::Map(Box::new(key), Box::new(value)))
            }
            _ => Err(self.unexpected("type")),
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        self.expect(Tok::LBrace, "'{'")?;
        let stmts = self.descend(|p| p.stmt_list(&Tok::RBrace))?;
        self.expect(Tok::RBrace, "'}'")?;
        Ok(stmts)
    }

    /// Statements up to (not including) `close`
    fn stmt_list(&mut self, close: &Tok) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        self.skip_semis();
        while !self.at(close) && !self.at(&Tok::Eof) {
            stmts.push(self.stmt()?);
            self.end_of_item(close)?;
            self.skip_semis();
        }
        Ok(stmts)
    }

    fn stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.peek() {
            Tok::LBrace => Ok(Stmt::Block(self.block()?)),
            Tok::Var | Tok::Const => Ok(Stmt::Var(self.var_decl()?)),
            Tok::If => self.if_stmt(),
            Tok::For => self.for_stmt(),
            Tok::Switch => self.switch_stmt(),
            Tok::Break => {
                self.advance();
                Ok(Stmt::Break)
            }
            Tok::Continue => {
                self.advance();
                Ok(Stmt::Continue)
            }
            Tok::Return => {
                self.advance();
                if self.at(&Tok::Semi) || self.at(&Tok::RBrace) {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.expr()?)))
                }
            }
            Tok::Defer => {
                self.advance();
                let call = self.expr()?;
                if !matches!(call, Expr::Call { .. }) {
                    return Err(self.error("expression in defer must be function call"));
                }
                Ok(Stmt::Defer(call))
            }
            _ => self.simple_stmt(),
        }
    }

    fn simple_stmt(&mut self) -> Result<Stmt, ParseError> {
        match self.simple_or_range()? {
            Simple::Stmt(stmt) => Ok(stmt),
            Simple::Range { .. } => Err(self.error("range clause outside for statement")),
        }
    }

    fn simple_or_range(&mut self) -> Result<Simple, ParseError> {
        let lhs = self.expr_list()?;

        match self.peek().clone() {
            Tok::Define => {
                self.advance();
                let names = lhs
                    .into_iter()
                    .map(|e| match e {
                        Expr::Name(name) => Ok(name),
                        _ => Err(self.error("non-name on left side of :=")),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if self.eat(&Tok::Range) {
                    let expr = self.expr()?;
                    return Simple::range(self, names.into_iter().map(Expr::Name).collect(), true, expr);
                }
                let values = self.expr_list()?;
                if names.len() != values.len() {
                    return Err(self.error(format!(
                        "assignment mismatch: {} variables but {} values",
                        names.len(),
                        values.len()
                    )));
                }
                Ok(Simple::Stmt(Stmt::Define { names, values }))
            }
            Tok::Assign | Tok::PlusAssign | Tok::MinusAssign => {
                let op = match self.advance() {
                    Tok::PlusAssign => AssignOp::Add,
                    Tok::MinusAssign => AssignOp::Sub,
                    _ => AssignOp::Set,
                };
                if op == AssignOp::Set && self.eat(&Tok::Range) {
                    let expr = self.expr()?;
                    return Simple::range(self, lhs, false, expr);
                }
                let values = self.expr_list()?;
                if lhs.len() != 1 || values.len() != 1 {
                    return Err(self.error("multiple assignment is only supported with :="));
                }
                let target = lhs.into_iter().next().ok_or_else(|| self.error("missing target"))?;
                let value = values.into_iter().next().ok_or_else(|| self.error("missing value"))?;
                check_assignable(self, &target)?;
                Ok(Simple::Stmt(Stmt::Assign { target, op, value }))
            }
            Tok::Inc | Tok::Dec => {
                let inc = matches!(self.advance(), Tok::Inc);
                let target = single(self, lhs)?;
                check_assignable(self, &target)?;
                Ok(Simple::Stmt(Stmt::IncDec { target, inc }))
            }
            _ => Ok(Simple::Stmt(Stmt::Expr(single(self, lhs)?))),
        }
    }

    fn if_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.expect(Tok::If, "'if'")?;
        let first = self.simple_stmt()?;
        let (init, cond) = if self.eat(&Tok::Semi) {
            (Some(Box::new(first)), self.expr()?)
        } else {
            match first {
                Stmt::Expr(cond) => (None, cond),
                _ => return Err(self.error("missing condition in if statement")),
            }
        };
        let then = self.block()?;
        let els = if self.eat(&Tok::Else) {
            if self.at(&Tok::If) {
                Some(Box::new(self.if_stmt()?))
            } else {
                Some(Box::new(Stmt::Block(self.block()?)))
            }
        } else {
            None
        };
        Ok(Stmt::If {
            init,
            cond,
            then,
            els,
        })
    }

    fn for_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.expect(Tok::For, "'for'")?;

        if self.at(&Tok::LBrace) {
            let body = self.block()?;
            return Ok(Stmt::For {
                init: None,
                cond: None,
                post: None,
                body,
            });
        }

        if self.eat(&Tok::Range) {
            let expr = self.expr()?;
            let body = self.block()?;
            return Ok(Stmt::Range {
                key: None,
                value: None,
                define: false,
                expr,
                body,
            });
        }

        let init = if self.at(&Tok::Semi) {
            None
        } else {
            match self.simple_or_range()? {
                Simple::Range {
                    key,
                    value,
                    define,
                    expr,
                } => {
                    let body = self.block()?;
                    return Ok(Stmt::Range {
                        key,
                        value,
                        define,
                        expr,
                        body,
                    });
                }
                Simple::Stmt(stmt) => Some(stmt),
            }
        };

        if self.at(&Tok::LBrace) {
            let cond = match init {
                Some(Stmt::Expr(cond)) => cond,
                _ => return Err(self.error("expected for loop condition")),
            };
            let body = self.block()?;
            return Ok(Stmt::For {
                init: None,
                cond: Some(cond),
                post: None,
                body,
            });
        }

        self.expect(Tok::Semi, "';'")?;
        let cond = if self.at(&Tok::Semi) {
            None
        } else {
            Some(self.expr()?)
        };
        self.expect(Tok::Semi, "';'")?;
        let post = if self.at(&Tok::LBrace) {
            None
        } else {
            Some(Box::new(self.simple_stmt()?))
        };
        let body = self.block()?;
        Ok(Stmt::For {
            init: init.map(Box::new),
            cond,
            post,
            body,
        })
    }

    fn switch_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.expect(Tok::Switch, "'switch'")?;

        let mut init = None;
        let mut tag = None;
        if !self.at(&Tok::LBrace) {
            let first = if self.at(&Tok::Semi) {
                None
            } else {
                Some(self.simple_stmt()?)
            };
            if self.eat(&Tok::Semi) {
                init = first.map(Box::new);
                if !self.at(&Tok::LBrace) {
                    tag = Some(self.expr()?);
                }
            } else {
                match first {
                    Some(Stmt::Expr(expr)) => tag = Some(expr),
                    _ => return Err(self.error("switch expression must be an expression")),
                }
            }
        }

        self.expect(Tok::LBrace, "'{'")?;
        self.skip_semis();
        let mut clauses = Vec::new();
        let mut seen_default = false;
        while !self.at(&Tok::RBrace) {
            let exprs = if self.eat(&Tok::Default) {
                if seen_default {
                    return Err(self.error("multiple defaults in switch"));
                }
                seen_default = true;
                Vec::new()
            } else {
                self.expect(Tok::Case, "'case' or 'default'")?;
                self.expr_list()?
            };
            self.expect(Tok::Colon, "':'")?;
            let body = self.clause_body()?;
            clauses.push(CaseClause { exprs, body });
        }
        self.expect(Tok::RBrace, "'}'")?;

        Ok(Stmt::Switch { init, tag, clauses })
    }

    fn clause_body(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut stmts = Vec::new();
        self.skip_semis();
        while !matches!(self.peek(), Tok::Case | Tok::Default | Tok::RBrace | Tok::Eof) {
            stmts.push(self.stmt()?);
            self.end_of_item(&Tok::RBrace)?;
            self.skip_semis();
        }
        Ok(stmts)
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expr_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = vec![self.expr()?];
        while self.eat(&Tok::Comma) {
            exprs.push(self.expr()?);
        }
        Ok(exprs)
    }

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.descend(|p| p.binary(1))
    }

    fn binary_op(&self) -> Option<BinaryOp> {
        Some(match self.peek() {
            Tok::OrOr => BinaryOp::Or,
            Tok::AndAnd => BinaryOp::And,
            Tok::Eq => BinaryOp::Eq,
            Tok::NotEq => BinaryOp::NotEq,
            Tok::Lt => BinaryOp::Lt,
            Tok::LtEq => BinaryOp::LtEq,
            Tok::Gt => BinaryOp::Gt,
            Tok::GtEq => BinaryOp::GtEq,
            Tok::Plus => BinaryOp::Add,
            Tok::Minus => BinaryOp::Sub,
            Tok::Star => BinaryOp::Mul,
            Tok::Slash => BinaryOp::Div,
            Tok::Percent => BinaryOp::Rem,
            _ => return None,
        })
    }

    /// Precedence climbing, all binary operators left-associative
    fn binary(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        while let Some(op) = self.binary_op() {
            let prec = op.precedence();
            if prec < min_prec {
                break;
            }
            self.advance();
            let right = self.binary(prec + 1)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        match self.peek() {
            Tok::Minus => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.descend(Self::unary)?)))
            }
            Tok::Not => {
                self.advance();
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.descend(Self::unary)?)))
            }
            Tok::Plus => {
                self.advance();
                self.unary()
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        let mut chain = 0;
        loop {
            if chain > MAX_PARSE_DEPTH {
                return Err(self.error(format!("nesting exceeds {} levels", MAX_PARSE_DEPTH)));
            }
            chain += 1;
            match self.peek() {
                Tok::Dot => {
                    self.advance();
                    let member = self.ident("selector")?;
                    expr = Expr::Selector(Box::new(expr), member);
                }
                Tok::LParen => {
                    self.advance();
                    let mut args = Vec::new();
                    self.skip_semis();
                    while !self.at(&Tok::RParen) {
                        args.push(self.expr()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                        self.skip_semis();
                    }
                    self.skip_semis();
                    self.expect(Tok::RParen, "')'")?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                    };
                }
                Tok::LBracket => {
                    self.advance();
                    let lo = if self.at(&Tok::Colon) {
                        None
                    } else {
                        Some(Box::new(self.expr()?))
                    };
                    if self.eat(&Tok::Colon) {
                        let hi = if self.at(&Tok::RBracket) {
                            None
                        } else {
                            Some(Box::new(self.expr()?))
                        };
                        self.expect(Tok::RBracket, "']'")?;
                        expr = Expr::Slice {
                            target: Box::new(expr),
                            lo,
                            hi,
                        };
                    } else {
                        self.expect(Tok::RBracket, "']'")?;
                        let index = lo.ok_or_else(|| self.error("missing index"))?;
                        expr = Expr::Index(Box::new(expr), index);
                    }
                }
                _ => return Ok(expr),
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.peek().clone() {
            Tok::Int(v) => {
                self.advance();
                Ok(Expr::Lit(Lit::Int(v)))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Expr::Lit(Lit::Str(s)))
            }
            Tok::Ident(name) => {
                self.advance();
                Ok(match name.as_str() {
                    "true" => Expr::Lit(Lit::Bool(true)),
                    "false" => Expr::Lit(Lit::Bool(false)),
                    "nil" => Expr::Lit(Lit::Nil),
                    _ => Expr::Name(name),
                })
            }
            Tok::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(Tok::RParen, "')'")?;
                Ok(inner)
            }
            Tok::LBracket if *self.peek_at(1) == Tok::RBracket => {
                self.type_expr()?;
                let elems = self.composite_body(|p| p.expr())?;
                Ok(Expr::List(elems))
            }
            Tok::Map => {
                self.type_expr()?;
                let entries = self.composite_body(|p| {
                    let key = p.expr()?;
                    p.expect(Tok::Colon, "':'")?;
                    let value = p.expr()?;
                    Ok((key, value))
                })?;
                Ok(Expr::Map(entries))
            }
            Tok::Func => Err(self.error("function literals are not supported")),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn composite_body<T>(
        &mut self,
        mut element: impl FnMut(&mut Self) -> Result<T, ParseError>,
    ) -> Result<Vec<T>, ParseError> {
        self.expect(Tok::LBrace, "'{'")?;
        let mut items = Vec::new();
        self.skip_semis();
        while !self.at(&Tok::RBrace) {
            items.push(element(self)?);
            if !self.eat(&Tok::Comma) {
                self.skip_semis();
                break;
            }
            self.skip_semis();
        }
        self.expect(Tok::RBrace, "'}'")?;
        Ok(items)
    }
}

/// Result of parsing a simple statement in a `for` header
enum Simple {
    Stmt(Stmt),
    Range {
        key: Option<Expr>,
        value: Option<Expr>,
        define: bool,
        expr: Expr,
    },
}

impl Simple {
    fn range(p: &Parser<'_>, lhs: Vec<Expr>, define: bool, expr: Expr) -> Result<Simple, ParseError> {
        if lhs.len() > 2 {
            return Err(p.error("range clause permits at most two iteration variables"));
        }
        let mut vars = lhs.into_iter();
        Ok(Simple::Range {
            key: vars.next(),
            value: vars.next(),
            define,
            expr,
        })
    }
}

fn single(p: &Parser<'_>, mut exprs: Vec<Expr>) -> Result<Expr, ParseError> {
    if exprs.len() != 1 {
        return Err(p.error(format!("expected 1 expression, found {}", exprs.len())));
    }
    Ok(exprs.remove(0))
}

fn check_assignable(p: &Parser<'_>, target: &Expr) -> Result<(), ParseError> {
    match target {
        Expr::Name(_) | Expr::Selector(..) => Ok(()),
        Expr::Index(base, _) => check_assignable(p, base),
        _ => Err(p.error("cannot assign to expression")),
    }
}
