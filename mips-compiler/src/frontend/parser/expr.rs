//! Expression parsing by precedence-and-depth climbing.
//!
//! Instead of recursive descent, the parser keeps the right spine of the
//! tree being built as a stack of open operator frames, rooted at a
//! sentinel. An operand fills the innermost frame's right slot. A binary
//! operator first closes every frame it binds looser than (or as loose as,
//! for left-associative operators), provided that frame was opened at the
//! same or a deeper parenthesis depth, then opens a new frame whose left
//! operand is the closed subtree. Parentheses only move the depth counter;
//! a closing parenthesis closes the frames opened inside it.

use super::Parser;
use crate::frontend::lexer::Token;
use crate::ir::ast::to_fixed;
use crate::ir::{BinOp, Decl, NodeId, NodeKind, UnOp};
use crate::{CompileError, SemanticErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Binary(BinOp),
    /// Plain assignment when `None`, compound otherwise.
    Assign(Option<BinOp>),
    Unary(UnOp),
}

const UNARY_PRECEDENCE: i32 = 10;

impl Op {
    fn precedence(self) -> i32 {
        match self {
            Op::Assign(_) => 1,
            Op::Binary(op) => match op {
                BinOp::LogicalOr => 2,
                BinOp::LogicalAnd => 3,
                BinOp::Eq | BinOp::Ne => 4,
                BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 5,
                BinOp::BitAnd | BinOp::BitOr | BinOp::Xor => 6,
                BinOp::Shl | BinOp::Shr => 7,
                BinOp::Add | BinOp::Sub => 8,
                BinOp::Mul | BinOp::Div | BinOp::Mod => 9,
            },
            Op::Unary(_) => UNARY_PRECEDENCE,
        }
    }

    fn right_assoc(self) -> bool {
        matches!(self, Op::Assign(_) | Op::Unary(_))
    }

    fn symbol(self) -> String {
        match self {
            Op::Binary(op) => op.symbol().to_string(),
            Op::Assign(None) => "=".to_string(),
            Op::Assign(Some(op)) => format!("{}=", op.symbol()),
            Op::Unary(op) => op.symbol().to_string(),
        }
    }

    /// Classify an operator token. Prefix `-`, `*` and `&` become unary.
    fn from_token(token: &Token, prefix: bool) -> Option<Op> {
        let op = match token {
            Token::Minus if prefix => Op::Unary(UnOp::Neg),
            Token::Star if prefix => Op::Unary(UnOp::Deref),
            Token::Amp if prefix => Op::Unary(UnOp::Ref),
            Token::Bang => Op::Unary(UnOp::Not),
            Token::Plus => Op::Binary(BinOp::Add),
            Token::Minus => Op::Binary(BinOp::Sub),
            Token::Star => Op::Binary(BinOp::Mul),
            Token::Slash => Op::Binary(BinOp::Div),
            Token::Percent => Op::Binary(BinOp::Mod),
            Token::Amp => Op::Binary(BinOp::BitAnd),
            Token::Pipe => Op::Binary(BinOp::BitOr),
            Token::Caret => Op::Binary(BinOp::Xor),
            Token::Shl => Op::Binary(BinOp::Shl),
            Token::Shr => Op::Binary(BinOp::Shr),
            Token::AndAnd => Op::Binary(BinOp::LogicalAnd),
            Token::OrOr => Op::Binary(BinOp::LogicalOr),
            Token::Eq => Op::Binary(BinOp::Eq),
            Token::Neq => Op::Binary(BinOp::Ne),
            Token::Lt => Op::Binary(BinOp::Lt),
            Token::Le => Op::Binary(BinOp::Le),
            Token::Gt => Op::Binary(BinOp::Gt),
            Token::Ge => Op::Binary(BinOp::Ge),
            Token::Assign => Op::Assign(None),
            Token::PlusAssign => Op::Assign(Some(BinOp::Add)),
            Token::MinusAssign => Op::Assign(Some(BinOp::Sub)),
            Token::StarAssign => Op::Assign(Some(BinOp::Mul)),
            Token::SlashAssign => Op::Assign(Some(BinOp::Div)),
            Token::PercentAssign => Op::Assign(Some(BinOp::Mod)),
            Token::AmpAssign => Op::Assign(Some(BinOp::BitAnd)),
            Token::PipeAssign => Op::Assign(Some(BinOp::BitOr)),
            Token::CaretAssign => Op::Assign(Some(BinOp::Xor)),
            Token::ShlAssign => Op::Assign(Some(BinOp::Shl)),
            Token::ShrAssign => Op::Assign(Some(BinOp::Shr)),
            _ => return None,
        };
        Some(op)
    }
}

/// One open node on the right spine.
struct Frame {
    /// `None` for the sentinel root.
    op: Option<Op>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    prec: i32,
    depth: i32,
    line: usize,
}

impl Frame {
    fn root() -> Self {
        Self {
            op: None,
            left: None,
            right: None,
            prec: -1,
            depth: -1,
            line: 0,
        }
    }
}

impl<'t> Parser<'t> {
    /// Parse the tokens in `lo..hi` as one expression.
    pub(super) fn parse_expr_range(&mut self, lo: usize, hi: usize) -> Result<NodeId, CompileError> {
        let toks = self.toks;
        if lo >= hi {
            return Err(CompileError::parse(self.line_at(lo), "Expected an expression"));
        }

        let mut spine = vec![Frame::root()];
        let mut depth = 0i32;
        let mut i = lo;
        while i < hi {
            let lx = &toks[i];
            let line = lx.line;
            match &lx.token {
                Token::LParen => {
                    if top(&spine).right.is_some() {
                        return Err(CompileError::parse(line, "Expected operator before '('"));
                    }
                    depth += 1;
                }
                Token::RParen => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(CompileError::parse(line, "Unexpected right parenthesis"));
                    }
                    while spine.len() > 1 && top(&spine).depth > depth {
                        self.close_frame(&mut spine)?;
                    }
                }
                Token::Ident(name) => {
                    let (node, last) = match toks.get(i + 1).map(|t| &t.token) {
                        Some(Token::LParen) if i + 1 < hi => self.parse_call(name, i, hi)?,
                        Some(Token::LBracket) if i + 1 < hi => self.parse_index(name, i, hi)?,
                        _ => (self.parse_identifier(name, line)?, i),
                    };
                    push_operand(&mut spine, node, line, &lx.token)?;
                    i = last;
                }
                Token::Int(n) => {
                    let value = i32::try_from(*n).map_err(|_| {
                        CompileError::parse(line, format!("Integer literal {n} does not fit in 32 bits"))
                    })?;
                    let node = self.ast.add(NodeKind::Int(value), line);
                    push_operand(&mut spine, node, line, &lx.token)?;
                }
                Token::Float(text) => {
                    let value: f64 = text.parse().map_err(|_| {
                        CompileError::parse(line, format!("Invalid decimal literal {text}"))
                    })?;
                    let node = self.ast.add(NodeKind::Fixed(to_fixed(value)), line);
                    push_operand(&mut spine, node, line, &lx.token)?;
                }
                Token::Char(c) => {
                    let node = self.ast.add(NodeKind::Int(*c as i32), line);
                    push_operand(&mut spine, node, line, &lx.token)?;
                }
                Token::Null => {
                    let node = self.ast.add(NodeKind::Int(0), line);
                    push_operand(&mut spine, node, line, &lx.token)?;
                }
                token => {
                    let Some(op) = Op::from_token(token, lx.prefix) else {
                        return Err(CompileError::parse(
                            line,
                            format!("Unexpected '{token}' in expression"),
                        ));
                    };
                    self.push_operator(&mut spine, op, depth, line)?;
                }
            }
            i += 1;
        }

        if depth != 0 {
            return Err(CompileError::parse(self.line_at(lo), "Mismatched parentheses"));
        }
        while spine.len() > 1 {
            self.close_frame(&mut spine)?;
        }
        spine
            .pop()
            .and_then(|root| root.right)
            .ok_or_else(|| CompileError::parse(self.line_at(lo), "Expected an expression"))
    }

    fn push_operator(
        &mut self,
        spine: &mut Vec<Frame>,
        op: Op,
        depth: i32,
        line: usize,
    ) -> Result<(), CompileError> {
        let prec = op.precedence();
        if let Op::Unary(_) = op {
            if top(spine).right.is_some() {
                return Err(CompileError::parse(
                    line,
                    format!("Operator {} cannot follow a value", op.symbol()),
                ));
            }
            spine.push(Frame {
                op: Some(op),
                left: None,
                right: None,
                prec,
                depth,
                line,
            });
            return Ok(());
        }

        if top(spine).right.is_none() {
            return Err(CompileError::parse(
                line,
                format!("Operator {} expected value on left", op.symbol()),
            ));
        }
        loop {
            let t = top(spine);
            let binds_looser = prec < t.prec || (prec == t.prec && !op.right_assoc());
            if spine.len() > 1 && depth <= t.depth && binds_looser {
                self.close_frame(spine)?;
            } else {
                break;
            }
        }
        let left = spine.last_mut().and_then(|f| f.right.take());
        spine.push(Frame {
            op: Some(op),
            left,
            right: None,
            prec,
            depth,
            line,
        });
        Ok(())
    }

    /// Pop the innermost frame, build its node and hand it to the parent.
    fn close_frame(&mut self, spine: &mut Vec<Frame>) -> Result<(), CompileError> {
        let Some(frame) = spine.pop() else {
            return Ok(());
        };
        let Some(op) = frame.op else {
            spine.push(frame);
            return Ok(());
        };
        let Some(right) = frame.right else {
            return Err(CompileError::parse(
                frame.line,
                format!("Operator {} expected value on right", op.symbol()),
            ));
        };

        let kind = match op {
            Op::Unary(u) => {
                if matches!(u, UnOp::Ref | UnOp::Deref)
                    && !matches!(self.ast.kind(right), NodeKind::Ident(_))
                {
                    return Err(CompileError::semantic(
                        SemanticErrorKind::InvalidOperand,
                        frame.line,
                        format!("Must use variable after ref or deref on line {}", frame.line),
                    ));
                }
                NodeKind::Unary { op: u, operand: right }
            }
            Op::Binary(b) => NodeKind::Binary {
                op: b,
                left: frame.left.unwrap_or(right),
                right,
            },
            Op::Assign(compound) => {
                let target = frame.left.unwrap_or(right);
                self.check_assign_target(target, compound, frame.line)?;
                NodeKind::Assign {
                    op: compound,
                    target,
                    value: right,
                }
            }
        };
        let node = self.ast.add(kind, frame.line);
        if let Some(parent) = spine.last_mut() {
            parent.right = Some(node);
        }
        Ok(())
    }

    fn check_assign_target(
        &self,
        target: NodeId,
        compound: Option<BinOp>,
        line: usize,
    ) -> Result<(), CompileError> {
        let valid = match self.ast.kind(target) {
            NodeKind::Ident(name) => !matches!(
                self.scopes.find(name).map(|s| &s.decl),
                Some(Decl::Array { .. })
            ),
            NodeKind::Index { .. } | NodeKind::Unary { op: UnOp::Deref, .. } => compound.is_none(),
            _ => false,
        };
        if valid {
            Ok(())
        } else {
            Err(CompileError::semantic(
                SemanticErrorKind::InvalidAssignment,
                line,
                format!("Cannot assign to {}", self.ast.render(target)),
            ))
        }
    }

    // ── Operands ────────────────────────────────────────────────────────

    fn parse_identifier(&mut self, name: &str, line: usize) -> Result<NodeId, CompileError> {
        match self.scopes.find(name).map(|s| &s.decl) {
            Some(Decl::Variable(_)) | Some(Decl::Array { .. }) => {}
            Some(Decl::Function(_)) => {
                return Err(CompileError::semantic(
                    SemanticErrorKind::FunctionUsedAsVariable,
                    line,
                    format!("Function {name} used as a value"),
                ))
            }
            None => {
                return Err(CompileError::semantic(
                    SemanticErrorKind::UndefinedVariable,
                    line,
                    format!("{name} not defined"),
                ))
            }
        }
        let node = self.ast.add(NodeKind::Ident(name.to_string()), line);
        self.scopes.touch(name, node, &mut self.ast);
        Ok(node)
    }

    /// `name(args...)` starting at `at`. Returns the node and the index of
    /// the closing parenthesis.
    fn parse_call(&mut self, name: &str, at: usize, hi: usize) -> Result<(NodeId, usize), CompileError> {
        let line = self.line_at(at);
        let expected = match self.scopes.find(name).map(|s| &s.decl) {
            Some(Decl::Function(sig)) => sig.params.len(),
            Some(_) => {
                return Err(CompileError::semantic(
                    SemanticErrorKind::NotAFunction,
                    line,
                    format!("{name} is not a function"),
                ))
            }
            None => {
                return Err(CompileError::semantic(
                    SemanticErrorKind::UndefinedFunction,
                    line,
                    format!("{name} not defined"),
                ))
            }
        };

        let close = self.find_close(at + 1, hi)?;
        let mut args = Vec::new();
        let mut start = at + 2;
        let mut nesting = 0i32;
        for i in at + 2..close {
            match self.toks[i].token {
                Token::LParen | Token::LBracket | Token::LBrace => nesting += 1,
                Token::RParen | Token::RBracket | Token::RBrace => nesting -= 1,
                Token::Comma if nesting == 0 => {
                    args.push(self.parse_expr_range(start, i)?);
                    start = i + 1;
                }
                _ => {}
            }
        }
        if start < close {
            args.push(self.parse_expr_range(start, close)?);
        } else if !args.is_empty() {
            return Err(CompileError::parse(line, "Expected an argument after ','"));
        }

        if args.len() != expected {
            return Err(CompileError::semantic(
                SemanticErrorKind::ArgumentCountMismatch,
                line,
                format!("{name} expects {expected} arguments but got {}", args.len()),
            ));
        }
        let node = self.ast.add(
            NodeKind::Call {
                name: name.to_string(),
                args,
            },
            line,
        );
        Ok((node, close))
    }

    /// `name[i]...` starting at `at`. Returns the node and the index of the
    /// last closing bracket.
    fn parse_index(&mut self, name: &str, at: usize, hi: usize) -> Result<(NodeId, usize), CompileError> {
        let line = self.line_at(at);
        let max_indices = match self.scopes.find(name).map(|s| &s.decl) {
            Some(Decl::Array { dims, .. }) => dims.len(),
            Some(Decl::Variable(ty)) if ty.refs > 0 => 1,
            Some(_) => {
                return Err(CompileError::semantic(
                    SemanticErrorKind::VariableUsedAsArray,
                    line,
                    format!("{name} cannot be indexed"),
                ))
            }
            None => {
                return Err(CompileError::semantic(
                    SemanticErrorKind::UndefinedVariable,
                    line,
                    format!("{name} not defined"),
                ))
            }
        };

        let mut indices = Vec::new();
        let mut open = at + 1;
        let mut last = at;
        while open < hi && self.toks[open].token == Token::LBracket {
            let close = self.find_close(open, hi)?;
            indices.push(self.parse_expr_range(open + 1, close)?);
            last = close;
            open = close + 1;
        }
        if indices.len() != max_indices {
            return Err(CompileError::semantic(
                SemanticErrorKind::VariableUsedAsArray,
                line,
                format!("{name} takes {max_indices} indices but got {}", indices.len()),
            ));
        }

        let node = self.ast.add(
            NodeKind::Index {
                name: name.to_string(),
                indices,
            },
            line,
        );
        self.scopes.touch(name, node, &mut self.ast);
        Ok((node, last))
    }
}

fn top(spine: &[Frame]) -> &Frame {
    // The sentinel is never popped while parsing.
    &spine[spine.len() - 1]
}

fn push_operand(
    spine: &mut [Frame],
    node: NodeId,
    line: usize,
    token: &Token,
) -> Result<(), CompileError> {
    let Some(frame) = spine.last_mut() else {
        return Ok(());
    };
    if frame.right.is_some() {
        return Err(CompileError::parse(
            line,
            format!("Expected operator before '{token}'"),
        ));
    }
    frame.right = Some(node);
    Ok(())
}
