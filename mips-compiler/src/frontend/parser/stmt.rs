//! Statement parsing.

use super::Parser;
use crate::frontend::lexer::Token;
use crate::ir::{Decl, FunctionSig, NodeId, NodeKind, Param, Symbol, TypeSpec, ValueType};
use crate::{CompileError, SemanticErrorKind};

/// Register-passed and stack-passed parameters combined.
const MAX_PARAMS: usize = 16;

impl<'t> Parser<'t> {
    /// Parse one statement. Returns `None` for empty statements.
    pub(super) fn parse_statement(&mut self) -> Result<Option<NodeId>, CompileError> {
        let Some(lx) = self.peek() else {
            return Ok(None);
        };
        let line = lx.line;
        let node = match &lx.token {
            Token::Semicolon => {
                self.pos += 1;
                return Ok(None);
            }
            Token::LBrace => {
                self.pos += 1;
                self.scopes.enter();
                let body = self.parse_until_rbrace()?;
                self.scopes.exit();
                self.ast.add(NodeKind::Group(body), line)
            }
            Token::If => self.parse_if()?,
            Token::While => self.parse_while()?,
            Token::For => self.parse_for()?,
            Token::Return => self.parse_return()?,
            Token::Break | Token::Continue => {
                let kind = if lx.token == Token::Break {
                    NodeKind::Break
                } else {
                    NodeKind::Continue
                };
                self.pos += 1;
                self.expect(Token::Semicolon)?;
                self.ast.add(kind, line)
            }
            Token::Asm => self.parse_asm()?,
            Token::Inline => {
                self.pos += 1;
                let node = self.parse_define(true)?;
                if !matches!(self.ast.kind(node), NodeKind::Function { body: Some(_), .. }) {
                    return Err(CompileError::parse(line, "inline expects a function"));
                }
                node
            }
            Token::Type(_) => self.parse_define(false)?,
            _ => {
                let end = self.find_statement_end(self.pos)?;
                let node = self.parse_expr_range(self.pos, end)?;
                self.pos = end + 1;
                node
            }
        };
        Ok(Some(node))
    }

    /// Statements up to and including the closing `}`.
    fn parse_until_rbrace(&mut self) -> Result<Vec<NodeId>, CompileError> {
        let mut body = Vec::new();
        loop {
            match self.peek_token() {
                None => return Err(CompileError::parse(self.line(), "Expected '}'")),
                Some(Token::RBrace) => {
                    self.pos += 1;
                    return Ok(body);
                }
                Some(_) => {
                    if let Some(stmt) = self.parse_statement()? {
                        body.push(stmt);
                    }
                }
            }
        }
    }

    /// A braced block or a single statement, in its own scope.
    fn parse_body(&mut self) -> Result<Vec<NodeId>, CompileError> {
        self.scopes.enter();
        let body = if self.peek_token() == Some(&Token::LBrace) {
            self.pos += 1;
            self.parse_until_rbrace()
        } else {
            self.parse_statement().map(|s| s.into_iter().collect())
        };
        self.scopes.exit();
        body
    }

    /// `( expr )`
    fn parse_condition(&mut self) -> Result<NodeId, CompileError> {
        let open = self.pos;
        self.expect(Token::LParen)?;
        let close = self.find_close(open, self.toks.len())?;
        let cond = self.parse_expr_range(open + 1, close)?;
        self.pos = close + 1;
        Ok(cond)
    }

    // ── Control flow ────────────────────────────────────────────────────

    fn parse_if(&mut self) -> Result<NodeId, CompileError> {
        let line = self.line();
        self.expect(Token::If)?;
        let mut branches = vec![(self.parse_condition()?, self.parse_body()?)];
        let mut otherwise = None;

        while self.peek_token() == Some(&Token::Else) {
            self.pos += 1;
            if self.peek_token() == Some(&Token::If) {
                self.pos += 1;
                branches.push((self.parse_condition()?, self.parse_body()?));
            } else {
                otherwise = Some(self.parse_body()?);
                break;
            }
        }
        Ok(self.ast.add(NodeKind::If { branches, otherwise }, line))
    }

    fn parse_while(&mut self) -> Result<NodeId, CompileError> {
        let line = self.line();
        self.expect(Token::While)?;
        let cond = self.parse_condition()?;
        let body = self.parse_body()?;
        Ok(self.ast.add(NodeKind::While { cond, body }, line))
    }

    /// `for (init; cond; step) body`. Every clause is optional and `init`
    /// may be a definition scoped to the loop.
    fn parse_for(&mut self) -> Result<NodeId, CompileError> {
        let line = self.line();
        self.expect(Token::For)?;
        let open = self.pos;
        self.expect(Token::LParen)?;
        let close = self.find_close(open, self.toks.len())?;

        let mut separators = Vec::new();
        let mut nesting = 0i32;
        for i in open + 1..close {
            match self.toks[i].token {
                Token::LParen | Token::LBracket | Token::LBrace => nesting += 1,
                Token::RParen | Token::RBracket | Token::RBrace => nesting -= 1,
                Token::Semicolon if nesting == 0 => separators.push(i),
                _ => {}
            }
        }
        let &[first, second] = separators.as_slice() else {
            return Err(CompileError::parse(line, "for expects (init; condition; step)"));
        };

        self.scopes.enter();
        let init = if first == open + 1 {
            None
        } else if matches!(self.toks[open + 1].token, Token::Type(_)) {
            self.pos = open + 1;
            let def = self.parse_define(false)?;
            if self.pos != first + 1 {
                return Err(CompileError::parse(line, "Invalid for-loop initializer"));
            }
            Some(def)
        } else {
            Some(self.parse_expr_range(open + 1, first)?)
        };
        let cond = if second == first + 1 {
            None
        } else {
            Some(self.parse_expr_range(first + 1, second)?)
        };
        let step = if close == second + 1 {
            None
        } else {
            Some(self.parse_expr_range(second + 1, close)?)
        };
        self.pos = close + 1;
        let body = self.parse_body()?;
        self.scopes.exit();

        Ok(self.ast.add(
            NodeKind::For {
                init,
                cond,
                step,
                body,
            },
            line,
        ))
    }

    fn parse_return(&mut self) -> Result<NodeId, CompileError> {
        let line = self.line();
        if self.current_function.is_none() {
            return Err(CompileError::semantic(
                SemanticErrorKind::ReturnOutsideFunction,
                line,
                "Return statement outside of function",
            ));
        }
        self.expect(Token::Return)?;
        let end = self.find_statement_end(self.pos)?;
        let value = if end == self.pos {
            None
        } else {
            Some(self.parse_expr_range(self.pos, end)?)
        };
        self.pos = end + 1;
        Ok(self.ast.add(NodeKind::Return(value), line))
    }

    /// `__asm__("line" "line" ...);` Each string becomes one line.
    fn parse_asm(&mut self) -> Result<NodeId, CompileError> {
        let line = self.line();
        self.expect(Token::Asm)?;
        self.expect(Token::LParen)?;
        let mut text = String::new();
        loop {
            match self.next() {
                Some(lx) => match &lx.token {
                    Token::Str(s) => {
                        text.push_str(s);
                        text.push('\n');
                    }
                    Token::RParen => break,
                    other => {
                        return Err(CompileError::parse(
                            lx.line,
                            format!("__asm__ expects string literals, found '{other}'"),
                        ))
                    }
                },
                None => return Err(CompileError::parse(line, "Unterminated __asm__ block")),
            }
        }
        if self.peek_token() == Some(&Token::Semicolon) {
            self.pos += 1;
        }
        Ok(self.ast.add(NodeKind::Asm(text), line))
    }

    // ── Definitions ─────────────────────────────────────────────────────

    fn parse_type(&mut self) -> Result<TypeSpec, CompileError> {
        let base = match self.next() {
            Some(lx) => match lx.token {
                Token::Type(t) => t,
                ref other => {
                    return Err(CompileError::parse(
                        lx.line,
                        format!("Expected a type but found '{other}'"),
                    ))
                }
            },
            None => return Err(CompileError::parse(self.line(), "Expected a type")),
        };
        let mut refs = 0u8;
        while self.peek_token() == Some(&Token::Star) {
            self.pos += 1;
            refs = refs.saturating_add(1);
        }
        Ok(TypeSpec::new(base, refs))
    }

    fn check_redefinition(&self, name: &str, line: usize) -> Result<(), CompileError> {
        match self.scopes.find_local(name) {
            Some(existing) => {
                let kind = match existing.decl {
                    Decl::Variable(_) => SemanticErrorKind::VariableRedefinition,
                    Decl::Array { .. } => SemanticErrorKind::ArrayRedefinition,
                    Decl::Function(_) => SemanticErrorKind::FunctionRedefinition,
                };
                Err(CompileError::semantic(
                    kind,
                    line,
                    format!("{name} already defined on line {}", existing.line),
                ))
            }
            None => Ok(()),
        }
    }

    /// `type *name = expr;`, `type name;`, `type name[N]... = {...};` or a
    /// function header/definition.
    fn parse_define(&mut self, inline: bool) -> Result<NodeId, CompileError> {
        let line = self.line();
        let ty = self.parse_type()?;
        let (name, _) = self.expect_ident()?;

        match self.peek_token() {
            Some(Token::LParen) => return self.parse_function(name, ty, inline, line),
            _ if inline => return Err(CompileError::parse(line, "inline expects a function")),
            Some(Token::LBracket) => return self.parse_array(name, ty, line),
            _ => {}
        }

        if ty.is_void() {
            return Err(CompileError::semantic(
                SemanticErrorKind::VoidValue,
                line,
                format!("Variable {name} declared void"),
            ));
        }
        self.check_redefinition(&name, line)?;

        let value = match self.peek_token() {
            Some(Token::Assign) => {
                self.pos += 1;
                let end = self.find_statement_end(self.pos)?;
                let value = self.parse_expr_range(self.pos, end)?;
                self.pos = end + 1;
                Some(value)
            }
            Some(Token::Semicolon) => {
                self.pos += 1;
                None
            }
            _ => {
                return Err(CompileError::parse(
                    self.line(),
                    format!("Expected '=' or ';' after {name}"),
                ))
            }
        };

        // Added after the initializer so `int x = x + 1;` sees the outer x.
        self.scopes.add(
            &name,
            Symbol {
                decl: Decl::Variable(ty),
                line,
            },
        );
        Ok(self.ast.add(NodeKind::Define { name, ty, value }, line))
    }

    fn parse_array(&mut self, name: String, ty: TypeSpec, line: usize) -> Result<NodeId, CompileError> {
        self.check_redefinition(&name, line)?;
        let mut dims = Vec::new();
        while self.peek_token() == Some(&Token::LBracket) {
            self.pos += 1;
            match self.next().map(|lx| &lx.token) {
                Some(Token::Int(n)) if *n > 0 && *n <= i16::MAX as i64 => dims.push(*n as usize),
                _ => {
                    return Err(CompileError::parse(
                        line,
                        format!("Array {name} needs a positive constant size"),
                    ))
                }
            }
            self.expect(Token::RBracket)?;
        }

        let mut init = Vec::new();
        if self.peek_token() == Some(&Token::Assign) {
            self.pos += 1;
            self.parse_initializer(&mut init)?;
            let capacity: usize = dims.iter().product();
            if init.len() > capacity {
                return Err(CompileError::semantic(
                    SemanticErrorKind::InvalidInitializer,
                    line,
                    format!("Too many initializers for array {name}"),
                ));
            }
        }
        self.expect(Token::Semicolon)?;

        self.scopes.add(
            &name,
            Symbol {
                decl: Decl::Array {
                    ty,
                    dims: dims.clone(),
                },
                line,
            },
        );
        Ok(self.ast.add(NodeKind::ArrayDef { name, ty, dims, init }, line))
    }

    /// `{ a, b, { c, d } }`, flattened in row-major order.
    fn parse_initializer(&mut self, out: &mut Vec<NodeId>) -> Result<(), CompileError> {
        self.expect(Token::LBrace)?;
        loop {
            match self.peek_token() {
                Some(Token::RBrace) => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(Token::LBrace) => self.parse_initializer(out)?,
                Some(_) => {
                    let start = self.pos;
                    let mut end = start;
                    let mut nesting = 0i32;
                    while let Some(lx) = self.toks.get(end) {
                        match lx.token {
                            Token::LParen | Token::LBracket => nesting += 1,
                            Token::RParen | Token::RBracket => nesting -= 1,
                            Token::Comma | Token::RBrace if nesting == 0 => break,
                            Token::Semicolon | Token::LBrace => break,
                            _ => {}
                        }
                        end += 1;
                    }
                    out.push(self.parse_expr_range(start, end)?);
                    self.pos = end;
                }
                None => return Err(CompileError::parse(self.line(), "Unterminated initializer")),
            }
            match self.peek_token() {
                Some(Token::Comma) => self.pos += 1,
                Some(Token::RBrace) => {}
                _ => {
                    return Err(CompileError::parse(
                        self.line(),
                        "Expected ',' or '}' in initializer",
                    ))
                }
            }
        }
    }

    fn parse_params(&mut self) -> Result<Vec<Param>, CompileError> {
        self.expect(Token::LParen)?;
        let mut params = Vec::new();
        if self.peek_token() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(params);
        }
        if self.peek_token() == Some(&Token::Type(ValueType::Void))
            && self.toks.get(self.pos + 1).map(|lx| &lx.token) == Some(&Token::RParen)
        {
            self.pos += 2;
            return Ok(params);
        }
        loop {
            let ty = self.parse_type()?;
            let (name, line) = self.expect_ident()?;
            if params.iter().any(|p: &Param| p.name == name) {
                return Err(CompileError::semantic(
                    SemanticErrorKind::ParameterRedefinition,
                    line,
                    format!("Parameter {name} declared twice"),
                ));
            }
            params.push(Param { name, ty });
            match self.next().map(|lx| &lx.token) {
                Some(Token::Comma) => {}
                Some(Token::RParen) => return Ok(params),
                _ => {
                    return Err(CompileError::parse(
                        line,
                        "Expected ',' or ')' in parameter list",
                    ))
                }
            }
        }
    }

    fn parse_function(
        &mut self,
        name: String,
        ret: TypeSpec,
        inline: bool,
        line: usize,
    ) -> Result<NodeId, CompileError> {
        let params = self.parse_params()?;
        if params.len() > MAX_PARAMS {
            return Err(CompileError::semantic(
                SemanticErrorKind::TooManyParameters,
                line,
                format!("{name} has more than {MAX_PARAMS} parameters"),
            ));
        }
        let mut sig = FunctionSig {
            ret,
            params: params.iter().map(|p| p.ty).collect(),
            defined: false,
            inline,
        };

        if let Some(existing) = self.scopes.find_local(&name) {
            match &existing.decl {
                Decl::Function(prev) if prev.defined => {
                    return Err(CompileError::semantic(
                        SemanticErrorKind::FunctionRedefinition,
                        line,
                        format!("{name} already defined on line {}", existing.line),
                    ))
                }
                Decl::Function(prev) if prev.ret != sig.ret || prev.params != sig.params => {
                    return Err(CompileError::semantic(
                        SemanticErrorKind::SignatureMismatch,
                        line,
                        format!("Function {name} already defined with different parameters"),
                    ))
                }
                Decl::Function(_) => {}
                _ => self.check_redefinition(&name, line)?,
            }
        }

        if self.peek_token() == Some(&Token::Semicolon) {
            self.pos += 1;
            self.scopes.add(
                &name,
                Symbol {
                    decl: Decl::Function(sig),
                    line,
                },
            );
            return Ok(self.ast.add(
                NodeKind::Function {
                    name,
                    ret,
                    params,
                    body: None,
                    inline,
                },
                line,
            ));
        }

        if self.current_function.is_some() || !self.scopes.is_base() {
            return Err(CompileError::semantic(
                SemanticErrorKind::NestedFunction,
                line,
                "Cannot define function within a function",
            ));
        }

        // Declared before the body so the function can call itself.
        sig.defined = true;
        self.scopes.add(
            &name,
            Symbol {
                decl: Decl::Function(sig),
                line,
            },
        );

        self.scopes.enter();
        for p in &params {
            self.scopes.add(
                &p.name,
                Symbol {
                    decl: Decl::Variable(p.ty),
                    line,
                },
            );
        }
        self.current_function = Some(name.clone());
        self.expect(Token::LBrace)?;
        let body = self.parse_until_rbrace();
        self.current_function = None;
        self.scopes.exit();

        Ok(self.ast.add(
            NodeKind::Function {
                name,
                ret,
                params,
                body: Some(body?),
                inline,
            },
            line,
        ))
    }
}
