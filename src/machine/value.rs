//! Runtime values

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

use crate::lang::ast::{FuncDecl, TypeExpr};

use super::errors::Fault;

/// Host function signature: output sink of the calling machine plus arguments
pub type NativeFn = fn(&mut dyn Write, Vec<Value>) -> Result<Value, Fault>;

/// Runtime value.
///
/// Lists and maps are shared and copied on write, so assigning one to a new
/// variable and then mutating either leaves the other untouched.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Int(i64),
    Bool(bool),
    Str(String),
    List(Arc<Vec<Value>>),
    Map(Arc<BTreeMap<Key, Value>>),
    Func(FuncValue),
    Native(NativeFunc),
    Stream(Stream),
}

/// Map key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Bool(bool),
    Int(i64),
    Str(String),
}

/// A function declared in snippet source
#[derive(Debug, Clone)]
pub struct FuncValue {
    /// Path of the declaring package
    pub pkg: Arc<str>,
    pub decl: Arc<FuncDecl>,
}

/// A host-provided function
#[derive(Clone, Copy)]
pub struct NativeFunc {
    /// Qualified name, e.g. `fmt.Println`
    pub name: &'static str,
    pub func: NativeFn,
}

impl fmt::Debug for NativeFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFunc({})", self.name)
    }
}

/// Standard stream handle exposed by the `os` package
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdin,
    Stdout,
    Stderr,
}

impl Stream {
    pub fn name(self) -> &'static str {
        match self {
            Stream::Stdin => "os.Stdin",
            Stream::Stdout => "os.Stdout",
            Stream::Stderr => "os.Stderr",
        }
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    pub fn map(entries: BTreeMap<Key, Value>) -> Self {
        Value::Map(Arc::new(entries))
    }

    /// Zero value for a declared type
    pub fn zero(ty: Option<&TypeExpr>) -> Self {
        match ty {
            Some(TypeExpr::Named(name)) => match name.as_str() {
                "int" | "int64" | "int32" | "uint" | "byte" | "rune" => Value::Int(0),
                "string" => Value::Str(String::new()),
                "bool" => Value::Bool(false),
                _ => Value::Nil,
            },
            Some(TypeExpr::List(_)) => Value::list(Vec::new()),
            Some(TypeExpr::Map(_, _)) => Value::map(BTreeMap::new()),
            None => Value::Nil,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Type name used in fault messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Func(_) | Value::Native(_) => "func",
            Value::Stream(_) => "stream",
        }
    }

    pub fn as_int(&self, context: &str) -> Result<i64, Fault> {
        match self {
            Value::Int(v) => Ok(*v),
            other => Err(Fault::type_mismatch(context, "int", other)),
        }
    }

    pub fn as_bool(&self, context: &str) -> Result<bool, Fault> {
        match self {
            Value::Bool(v) => Ok(*v),
            other => Err(Fault::type_mismatch(context, "bool", other)),
        }
    }

    /// Convert to a map key
    pub fn to_key(&self) -> Result<Key, Fault> {
        match self {
            Value::Int(v) => Ok(Key::Int(*v)),
            Value::Str(s) => Ok(Key::Str(s.clone())),
            Value::Bool(b) => Ok(Key::Bool(*b)),
            other => Err(Fault::type_mismatch("map key", "int, string or bool", other)),
        }
    }

    /// Structural equality; functions never compare equal
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Value::Map(a), Value::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|((ka, va), (kb, vb))| ka == kb && va.equals(vb))
            }
            (Value::Stream(a), Value::Stream(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Key> for Value {
    fn from(key: Key) -> Self {
        match key {
            Key::Bool(b) => Value::Bool(b),
            Key::Int(v) => Value::Int(v),
            Key::Str(s) => Value::Str(s),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Bool(b) => write!(f, "{}", b),
            Key::Int(v) => write!(f, "{}", v),
            Key::Str(s) => f.write_str(s),
        }
    }
}

/// Go-style display: `[1 2 3]`, `map[a:1 b:2]`, `<nil>`
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("<nil>"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("map[")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{}:{}", k, v)?;
                }
                f.write_str("]")
            }
            Value::Func(func) => write!(f, "<func {}.{}>", func.pkg, func.decl.name),
            Value::Native(native) => write!(f, "<func {}>", native.name),
            Value::Stream(stream) => write!(f, "<{}>", stream.name()),
        }
    }
}
