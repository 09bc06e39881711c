//! Source text to AST: tokenizer and parsers.

pub mod lexer;
pub mod parser;
