use crate::ir::ValueType;
use logos::{FilterResult, Logos};
use std::fmt;
use std::ops::Range;

#[derive(Logos, Debug, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")] // Whitespace
#[logos(skip r"#[^\n]*")] // Preprocessor lines are ignored
#[logos(skip r"//[^\n]*")] // Line comments
pub enum Token {
    // --- Keywords ---
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("return")]
    Return,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("inline")]
    Inline,
    #[token("__asm__")]
    Asm,
    #[token("NULL")]
    Null,

    // --- Types ---
    #[token("int", |_| ValueType::Int)]
    #[token("char", |_| ValueType::Char)]
    #[token("short", |_| ValueType::Short)]
    #[token("long", |_| ValueType::Long)]
    #[token("float", |_| ValueType::Float)]
    #[token("double", |_| ValueType::Double)]
    #[token("void", |_| ValueType::Void)]
    Type(ValueType),

    // --- Identifiers and literals ---
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"[0-9]+", |lex| lex.slice().parse().ok())]
    Int(i64),

    /// Decimal literal, kept as text until converted to fixed-point.
    #[regex(r"[0-9]+\.[0-9]+", |lex| lex.slice().to_string())]
    Float(String),

    #[regex(r"'([^'\\\n]|\\.)'", char_literal)]
    Char(i64),

    #[regex(r#""([^"\\\n]|\\.)*""#, string_literal)]
    Str(String),

    /// Skipped by its callback; never reaches the parser.
    #[token("/*", block_comment)]
    BlockComment,

    // --- Operators ---
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("!")]
    Bang,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,

    #[token("==")]
    Eq,
    #[token("!=")]
    Neq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,

    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("&=")]
    AmpAssign,
    #[token("|=")]
    PipeAssign,
    #[token("^=")]
    CaretAssign,
    #[token("<<=")]
    ShlAssign,
    #[token(">>=")]
    ShrAssign,

    // --- Punctuation ---
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
}

fn char_literal(lex: &mut logos::Lexer<Token>) -> Option<i64> {
    let s = lex.slice();
    let mut chars = s[1..s.len() - 1].chars();
    let c = match chars.next()? {
        '\\' => unescape(chars.next()?),
        c => c,
    };
    Some(c as i64)
}

/// Skip to the matching `*/`. An unterminated comment is an error at its
/// opening `/*`.
fn block_comment(lex: &mut logos::Lexer<Token>) -> FilterResult<(), ()> {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            FilterResult::Skip
        }
        None => FilterResult::Error(()),
    }
}

fn string_literal(lex: &mut logos::Lexer<Token>) -> String {
    let s = lex.slice();
    let mut out = String::new();
    let mut chars = s[1..s.len() - 1].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(e) = chars.next() {
                    out.push(unescape(e));
                }
            }
            c => out.push(c),
        }
    }
    out
}

fn unescape(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        '0' => '\0',
        other => other,
    }
}

impl Token {
    /// Whether this token can end an operand, which decides if a following
    /// `-`, `*` or `&` is binary or prefix.
    fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::Ident(_)
                | Token::Int(_)
                | Token::Float(_)
                | Token::Char(_)
                | Token::Str(_)
                | Token::Null
                | Token::RParen
                | Token::RBracket
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::If => write!(f, "if"),
            Token::Else => write!(f, "else"),
            Token::While => write!(f, "while"),
            Token::For => write!(f, "for"),
            Token::Return => write!(f, "return"),
            Token::Break => write!(f, "break"),
            Token::Continue => write!(f, "continue"),
            Token::Inline => write!(f, "inline"),
            Token::Asm => write!(f, "__asm__"),
            Token::Null => write!(f, "NULL"),
            Token::Type(t) => write!(f, "{t}"),
            Token::Ident(s) => write!(f, "{s}"),
            Token::Int(n) => write!(f, "{n}"),
            Token::Float(s) => write!(f, "{s}"),
            Token::Char(c) => write!(f, "'{}'", char::from_u32(*c as u32).unwrap_or('?')),
            Token::Str(s) => write!(f, "\"{s}\""),
            Token::BlockComment => write!(f, "/*"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Amp => write!(f, "&"),
            Token::Pipe => write!(f, "|"),
            Token::Caret => write!(f, "^"),
            Token::Bang => write!(f, "!"),
            Token::Shl => write!(f, "<<"),
            Token::Shr => write!(f, ">>"),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Eq => write!(f, "=="),
            Token::Neq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::Assign => write!(f, "="),
            Token::PlusAssign => write!(f, "+="),
            Token::MinusAssign => write!(f, "-="),
            Token::StarAssign => write!(f, "*="),
            Token::SlashAssign => write!(f, "/="),
            Token::PercentAssign => write!(f, "%="),
            Token::AmpAssign => write!(f, "&="),
            Token::PipeAssign => write!(f, "|="),
            Token::CaretAssign => write!(f, "^="),
            Token::ShlAssign => write!(f, "<<="),
            Token::ShrAssign => write!(f, ">>="),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
        }
    }
}

/// A token with its source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lexeme {
    pub token: Token,
    /// 1-based source line.
    pub line: usize,
    pub span: Range<usize>,
    /// Set on `-`, `*` and `&` in prefix position (negate, dereference,
    /// address-of).
    pub prefix: bool,
}

/// Custom error type for lexical errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexicalError {
    pub location: usize,
    pub line: usize,
    pub column: usize,
    pub unexpected_char: char,
    pub context: String,
}

impl fmt::Display for LexicalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unexpected character '{}' at line {}, column {}\n  Context: {}",
            self.unexpected_char, self.line, self.column, self.context
        )
    }
}

impl std::error::Error for LexicalError {}

/// Convert a byte position to line and column numbers (1-based)
pub fn position_to_line_col(source: &str, position: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;

    for (i, ch) in source.char_indices() {
        if i >= position {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }

    (line, col)
}

/// The trimmed source line containing `position`.
fn error_context(source: &str, position: usize) -> String {
    let line_start = source[..position].rfind('\n').map(|p| p + 1).unwrap_or(0);
    let line_end = source[position..]
        .find('\n')
        .map(|p| position + p)
        .unwrap_or(source.len());
    source[line_start..line_end].trim().to_string()
}

fn create_lexical_error(source: &str, position: usize) -> LexicalError {
    let (line, column) = position_to_line_col(source, position);
    LexicalError {
        location: position,
        line,
        column,
        unexpected_char: source[position..].chars().next().unwrap_or('\0'),
        context: error_context(source, position),
    }
}

/// Tokenize `source`.
///
/// After scanning, `-`, `*` and `&` in prefix position are flagged, and a
/// prefix `-` written directly against a numeric literal is folded into a
/// negative literal.
pub fn tokenize(source: &str) -> Result<Vec<Lexeme>, LexicalError> {
    let mut lexer = Token::lexer(source);
    let mut out: Vec<Lexeme> = Vec::new();
    let mut line = 1;
    let mut scanned = 0;

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        line += source[scanned..span.start].matches('\n').count();
        scanned = span.start;
        let token = result.map_err(|_| create_lexical_error(source, span.start))?;
        let prefix = matches!(token, Token::Minus | Token::Star | Token::Amp)
            && out.last().map_or(true, |prev| !prev.token.ends_operand());
        out.push(Lexeme {
            token,
            line,
            span,
            prefix,
        });
    }

    fold_negative_literals(&mut out);
    log::debug!("lexed {} tokens", out.len());
    Ok(out)
}

fn fold_negative_literals(lexemes: &mut Vec<Lexeme>) {
    let mut i = 0;
    while i + 1 < lexemes.len() {
        let adjacent = lexemes[i].span.end == lexemes[i + 1].span.start;
        if lexemes[i].prefix && lexemes[i].token == Token::Minus && adjacent {
            let folded = match &lexemes[i + 1].token {
                Token::Int(n) => Some(Token::Int(-n)),
                Token::Float(s) => Some(Token::Float(format!("-{s}"))),
                _ => None,
            };
            if let Some(token) = folded {
                let minus = lexemes.remove(i);
                lexemes[i].token = token;
                lexemes[i].span.start = minus.span.start;
            }
        }
        i += 1;
    }
}
