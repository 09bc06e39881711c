//! Token stream to AST.
//!
//! Statements are parsed by a conventional cursor-driven parser
//! (`stmt`); expressions by a precedence-and-depth climbing parser over a
//! bounded token range (`expr`). Both consult the [`Scopes`] tree so that
//! undeclared names are rejected as soon as they are seen.

mod expr;
mod stmt;

use super::lexer::{Lexeme, Token};
use crate::ir::{Ast, ParsedProgram, Scopes};
use crate::CompileError;

/// Parse a full translation unit.
pub fn parse(tokens: &[Lexeme]) -> Result<ParsedProgram, CompileError> {
    let mut parser = Parser::new(tokens);
    let mut statements = Vec::new();
    while let Some(lx) = parser.peek() {
        if lx.token == Token::RBrace {
            return Err(CompileError::parse(lx.line, "Unexpected '}'"));
        }
        if let Some(stmt) = parser.parse_statement()? {
            statements.push(stmt);
        }
    }
    log::debug!(
        "parsed {} top-level statements ({} nodes)",
        statements.len(),
        parser.ast.len()
    );
    Ok(ParsedProgram {
        ast: parser.ast,
        statements,
    })
}

pub(crate) struct Parser<'t> {
    toks: &'t [Lexeme],
    pos: usize,
    ast: Ast,
    scopes: Scopes,
    /// Name of the function whose body is being parsed.
    current_function: Option<String>,
}

impl<'t> Parser<'t> {
    fn new(toks: &'t [Lexeme]) -> Self {
        Self {
            toks,
            pos: 0,
            ast: Ast::new(),
            scopes: Scopes::new(),
            current_function: None,
        }
    }

    // ── Cursor ──────────────────────────────────────────────────────────

    fn peek(&self) -> Option<&'t Lexeme> {
        self.toks.get(self.pos)
    }

    fn peek_token(&self) -> Option<&'t Token> {
        self.peek().map(|lx| &lx.token)
    }

    fn next(&mut self) -> Option<&'t Lexeme> {
        let lx = self.toks.get(self.pos);
        if lx.is_some() {
            self.pos += 1;
        }
        lx
    }

    /// Line of the current token, or of the last token at end of input.
    fn line(&self) -> usize {
        self.peek()
            .or_else(|| self.toks.last())
            .map_or(1, |lx| lx.line)
    }

    fn line_at(&self, index: usize) -> usize {
        self.toks
            .get(index)
            .or_else(|| self.toks.last())
            .map_or(1, |lx| lx.line)
    }

    fn expect(&mut self, expected: Token) -> Result<&'t Lexeme, CompileError> {
        match self.peek() {
            Some(lx) if lx.token == expected => {
                self.pos += 1;
                Ok(lx)
            }
            Some(lx) => Err(CompileError::parse(
                lx.line,
                format!("Expected '{}' but found '{}'", expected, lx.token),
            )),
            None => Err(CompileError::parse(
                self.line(),
                format!("Expected '{}' but reached end of input", expected),
            )),
        }
    }

    fn expect_ident(&mut self) -> Result<(String, usize), CompileError> {
        match self.next() {
            Some(Lexeme {
                token: Token::Ident(name),
                line,
                ..
            }) => Ok((name.clone(), *line)),
            Some(lx) => Err(CompileError::parse(
                lx.line,
                format!("Expected identifier but found '{}'", lx.token),
            )),
            None => Err(CompileError::parse(
                self.line(),
                "Expected identifier but reached end of input",
            )),
        }
    }

    // ── Bracket scanning ────────────────────────────────────────────────

    /// Index of the bracket matching the opener at `open`, searching no
    /// further than `limit`.
    fn find_close(&self, open: usize, limit: usize) -> Result<usize, CompileError> {
        let mut depth = 0i32;
        for i in open..limit.min(self.toks.len()) {
            match self.toks[i].token {
                Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
                Token::RParen | Token::RBracket | Token::RBrace => {
                    depth -= 1;
                    if depth == 0 {
                        let matches = matches!(
                            (&self.toks[open].token, &self.toks[i].token),
                            (Token::LParen, Token::RParen)
                                | (Token::LBracket, Token::RBracket)
                                | (Token::LBrace, Token::RBrace)
                        );
                        if !matches {
                            return Err(CompileError::parse(
                                self.toks[i].line,
                                format!("Mismatched '{}'", self.toks[i].token),
                            ));
                        }
                        return Ok(i);
                    }
                }
                _ => {}
            }
        }
        Err(CompileError::parse(
            self.line_at(open),
            format!("Unclosed '{}'", self.toks[open].token),
        ))
    }

    /// Index of the `;` ending the statement that starts at `from`.
    fn find_statement_end(&self, from: usize) -> Result<usize, CompileError> {
        let mut depth = 0i32;
        for i in from..self.toks.len() {
            match self.toks[i].token {
                Token::LParen | Token::LBracket | Token::LBrace => depth += 1,
                Token::RParen | Token::RBracket | Token::RBrace => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(CompileError::parse(
                            self.toks[i].line,
                            format!("Expected ';' before '{}'", self.toks[i].token),
                        ));
                    }
                }
                Token::Semicolon if depth == 0 => return Ok(i),
                _ => {}
            }
        }
        Err(CompileError::parse(
            self.line_at(from),
            "Expected ';' at end of statement",
        ))
    }
}
