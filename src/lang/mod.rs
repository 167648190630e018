//! The snippet language
//!
//! A small Go-flavoured language: packages of `.snip` files with imports,
//! functions, variables and constants. Parsing produces an [`ast::File`];
//! execution lives in [`crate::machine`].

pub mod ast;
pub mod lexer;
pub mod opcode;
pub mod parser;

pub use ast::File;
pub use lexer::Pos;
pub use opcode::Op;
pub use parser::parse_file;

use thiserror::Error;

/// Source file extension recognised by the file resolver
pub const SOURCE_EXT: &str = "snip";

/// Parse failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("{file}:{pos}: {message}")]
    Syntax {
        file: String,
        pos: Pos,
        message: String,
    },
}

impl ParseError {
    /// File the error was reported against
    pub fn file(&self) -> &str {
        match self {
            ParseError::Syntax { file, .. } => file,
        }
    }
}
