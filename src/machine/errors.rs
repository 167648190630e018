//! Machine failures

use thiserror::Error;

use crate::store::ResolveError;

use super::value::Value;

/// Runtime fault raised while executing snippet code
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Fault {
    #[error("panic: {0}")]
    Panic(String),

    #[error("undefined: {0}")]
    Undefined(String),

    #[error("type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error("integer divide by zero")]
    DivisionByZero,

    #[error("index out of range [{index}] with length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("cannot call non-function {0}")]
    NotCallable(String),

    #[error("wrong number of arguments to {func}: expected {expected}, got {got}")]
    ArgCount {
        func: String,
        expected: usize,
        got: usize,
    },

    #[error("cannot assign to {0}: read-only")]
    ReadOnly(String),

    #[error("call depth exceeded (max {0})")]
    CallDepthExceeded(usize),

    #[error("nesting depth exceeded (max {0})")]
    NestingExceeded(usize),
}

impl Fault {
    pub fn type_mismatch(context: &str, expected: &str, found: &Value) -> Self {
        Fault::TypeMismatch {
            context: context.to_string(),
            expected: expected.to_string(),
            found: found.type_name().to_string(),
        }
    }

    pub fn arg_count(func: &str, expected: usize, got: usize) -> Self {
        Fault::ArgCount {
            func: func.to_string(),
            expected,
            got,
        }
    }
}

/// Failure of one machine operation (running declarations or a function)
#[derive(Debug, Error)]
pub enum MachineError {
    /// No resolver produced the imported package
    #[error("unresolved import {path:?}")]
    Unresolved { path: String },

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("{file}: package {found} conflicts with package {expected}")]
    PackageMismatch {
        file: String,
        expected: String,
        found: String,
    },

    #[error("{name} redeclared in this package")]
    Redeclared { name: String },

    #[error(transparent)]
    Fault(#[from] Fault),
}
