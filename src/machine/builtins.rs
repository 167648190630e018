//! Builtin functions
//!
//! | Name      | Behaviour                                           |
//! |-----------|-----------------------------------------------------|
//! | `len`     | length of a string (bytes), list or map             |
//! | `append`  | new list with the extra elements at the end         |
//! | `delete`  | remove a map key (evaluated in place by the caller) |
//! | `print`   | write operands to the output, no separators         |
//! | `println` | write operands separated by spaces, then a newline  |
//! | `panic`   | raise a panic fault                                 |
//! | `string`  | display form of any value                           |
//! | `int`     | parse a decimal string, or pass an int through      |

use crate::lang::Op;

use super::{Fault, Machine, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Append,
    Delete,
    Print,
    Println,
    Panic,
    String,
    Int,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "len" => Builtin::Len,
            "append" => Builtin::Append,
            "delete" => Builtin::Delete,
            "print" => Builtin::Print,
            "println" => Builtin::Println,
            "panic" => Builtin::Panic,
            "string" => Builtin::String,
            "int" => Builtin::Int,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Append => "append",
            Builtin::Delete => "delete",
            Builtin::Print => "print",
            Builtin::Println => "println",
            Builtin::Panic => "panic",
            Builtin::String => "string",
            Builtin::Int => "int",
        }
    }

    /// Call with already-evaluated arguments
    pub(crate) fn call(self, m: &mut Machine<'_>, args: Vec<Value>) -> Result<Value, Fault> {
        match self {
            Builtin::Len => {
                let [value] = exactly::<1>(self, args)?;
                let len = match value {
                    Value::Str(ref s) => s.len(),
                    Value::List(ref items) => items.len(),
                    Value::Map(ref entries) => entries.len(),
                    Value::Nil => 0,
                    ref other => return Err(Fault::type_mismatch("len", "string, list or map", other)),
                };
                Ok(Value::Int(len as i64))
            }

            Builtin::Append => {
                let mut args = args.into_iter();
                let base = args
                    .next()
                    .ok_or_else(|| Fault::arg_count("append", 1, 0))?;
                let mut items = match base {
                    Value::List(items) => items,
                    Value::Nil => Default::default(),
                    other => return Err(Fault::type_mismatch("append", "list", &other)),
                };
                std::sync::Arc::make_mut(&mut items).extend(args);
                Ok(Value::List(items))
            }

            // Needs the map expression; only reachable through `defer`
            Builtin::Delete => Err(Fault::Panic("delete cannot be deferred".to_string())),

            Builtin::Print => {
                let text: String = args.iter().map(|v| v.to_string()).collect();
                m.write_output(&text)?;
                Ok(Value::Nil)
            }

            Builtin::Println => {
                let mut text = args
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(" ");
                text.push('\n');
                m.write_output(&text)?;
                Ok(Value::Nil)
            }

            Builtin::Panic => {
                m.mark(Op::Panic1);
                let [value] = exactly::<1>(self, args)?;
                Err(Fault::Panic(value.to_string()))
            }

            Builtin::String => {
                let [value] = exactly::<1>(self, args)?;
                Ok(match value {
                    Value::Str(s) => Value::Str(s),
                    other => Value::Str(other.to_string()),
                })
            }

            Builtin::Int => {
                let [value] = exactly::<1>(self, args)?;
                match value {
                    Value::Int(v) => Ok(Value::Int(v)),
                    Value::Str(ref s) => s
                        .trim()
                        .parse::<i64>()
                        .map(Value::Int)
                        .map_err(|_| Fault::Panic(format!("int: invalid syntax {:?}", s))),
                    ref other => Err(Fault::type_mismatch("int", "int or string", other)),
                }
            }
        }
    }
}

fn exactly<const N: usize>(builtin: Builtin, args: Vec<Value>) -> Result<[Value; N], Fault> {
    let got = args.len();
    args.try_into()
        .map_err(|_| Fault::arg_count(builtin.name(), N, got))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ResolverChain, Store};

    fn call(builtin: Builtin, args: Vec<Value>) -> Result<Value, Fault> {
        let store = Store::new(ResolverChain::native_only());
        let mut m = Machine::new("main", &store);
        builtin.call(&mut m, args)
    }

    #[test]
    fn test_len() {
        assert!(call(Builtin::Len, vec![Value::str("héllo")]).unwrap().equals(&Value::Int(6)));
        assert!(call(Builtin::Len, vec![Value::Nil]).unwrap().equals(&Value::Int(0)));
        assert!(matches!(
            call(Builtin::Len, vec![]),
            Err(Fault::ArgCount { expected: 1, got: 0, .. })
        ));
    }

    #[test]
    fn test_append_to_nil() {
        let v = call(Builtin::Append, vec![Value::Nil, 1.into(), 2.into()]).unwrap();
        assert_eq!(v.to_string(), "[1 2]");
    }

    #[test]
    fn test_int_conversion() {
        assert!(call(Builtin::Int, vec![Value::str(" 42 ")]).unwrap().equals(&Value::Int(42)));
        assert!(matches!(call(Builtin::Int, vec![Value::str("x")]), Err(Fault::Panic(_))));
    }

    #[test]
    fn test_panic_message() {
        let err = call(Builtin::Panic, vec![Value::str("boom")]).unwrap_err();
        assert_eq!(err.to_string(), "panic: boom");
    }
}
