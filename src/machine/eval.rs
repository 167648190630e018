//! Expression evaluation

use std::collections::BTreeMap;

use crate::lang::ast::{BinaryOp, Expr, Lit, UnaryOp};
use crate::lang::Op;

use super::builtins::Builtin;
use super::{Fault, Machine, Value};

impl Machine<'_> {
    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Value, Fault> {
        self.nested(|m| m.eval_expr(expr))
    }

    fn eval_expr(&mut self, expr: &Expr) -> Result<Value, Fault> {
        match expr {
            Expr::Lit(lit) => {
                self.mark(Op::Literal);
                Ok(match lit {
                    Lit::Int(v) => Value::Int(*v),
                    Lit::Str(s) => Value::Str(s.clone()),
                    Lit::Bool(b) => Value::Bool(*b),
                    Lit::Nil => Value::Nil,
                })
            }

            Expr::Name(name) => {
                self.mark(Op::Name);
                self.lookup(name)
                    .ok_or_else(|| Fault::Undefined(name.clone()))
            }

            Expr::Selector(base, member) => {
                self.mark(Op::Selector);
                self.eval_selector(base, member)
            }

            Expr::Index(base, index) => {
                self.mark(Op::Index);
                let container = self.eval(base)?;
                let index = self.eval(index)?;
                index_value(&container, &index)
            }

            Expr::Slice { target, lo, hi } => {
                self.mark(Op::Slice);
                let container = self.eval(target)?;
                let lo = match lo {
                    Some(e) => Some(self.eval(e)?.as_int("slice bound")?),
                    None => None,
                };
                let hi = match hi {
                    Some(e) => Some(self.eval(e)?.as_int("slice bound")?),
                    None => None,
                };
                slice_value(&container, lo, hi)
            }

            Expr::Call { func, args } => self.eval_call(func, args),

            Expr::List(elems) => {
                self.mark(Op::CompositeList);
                let items = self.eval_args(elems)?;
                Ok(Value::list(items))
            }

            Expr::Map(entries) => {
                self.mark(Op::CompositeMap);
                let mut map = BTreeMap::new();
                for (k, v) in entries {
                    let key = self.eval(k)?.to_key()?;
                    let value = self.eval(v)?;
                    map.insert(key, value);
                }
                Ok(Value::map(map))
            }

            Expr::Unary(op, operand) => {
                self.mark(Op::Unary);
                let value = self.eval(operand)?;
                match (op, value) {
                    (UnaryOp::Neg, Value::Int(v)) => Ok(Value::Int(v.wrapping_neg())),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, other) => Err(Fault::type_mismatch("unary -", "int", &other)),
                    (UnaryOp::Not, other) => Err(Fault::type_mismatch("unary !", "bool", &other)),
                }
            }

            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                self.mark(Op::LogicalAnd);
                if !self.eval(lhs)?.as_bool("&&")? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(rhs)?.as_bool("&&")?))
            }

            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                self.mark(Op::LogicalOr);
                if self.eval(lhs)?.as_bool("||")? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(rhs)?.as_bool("||")?))
            }

            Expr::Binary(..) => self.eval_chain(expr),
        }
    }

    /// Left-associative operator chain, folded without recursing down the
    /// left operand: `a + b - c` is `Binary(-, Binary(+, a, b), c)`.
    fn eval_chain(&mut self, expr: &Expr) -> Result<Value, Fault> {
        let mut rest = Vec::new();
        let mut leftmost = expr;
        while let Expr::Binary(op, lhs, rhs) = leftmost {
            if op.is_logical() {
                break;
            }
            rest.push((*op, rhs.as_ref()));
            leftmost = lhs;
        }

        let mut acc = self.eval(leftmost)?;
        for (op, rhs) in rest.into_iter().rev() {
            self.mark(Op::Binary);
            let rhs = self.eval(rhs)?;
            acc = self.arith(op, acc, rhs)?;
        }
        Ok(acc)
    }

    pub(crate) fn eval_args(&mut self, args: &[Expr]) -> Result<Vec<Value>, Fault> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    /// Builtin named by a call target, unless the name is shadowed
    pub(crate) fn builtin_callee(&self, func: &Expr) -> Option<Builtin> {
        match func {
            Expr::Name(name) if !self.is_bound(name) => Builtin::from_name(name),
            _ => None,
        }
    }

    fn eval_call(&mut self, func: &Expr, args: &[Expr]) -> Result<Value, Fault> {
        if let Some(builtin) = self.builtin_callee(func) {
            self.mark(Op::CallBuiltin);
            if builtin == Builtin::Delete {
                return self.builtin_delete(args);
            }
            let args = self.eval_args(args)?;
            return builtin.call(self, args);
        }
        let callee = self.eval(func)?;
        let args = self.eval_args(args)?;
        self.invoke(&callee, args)
    }

    /// `delete(m, k)` updates the map in place, so it needs the map expression
    fn builtin_delete(&mut self, args: &[Expr]) -> Result<Value, Fault> {
        let [target, key] = args else {
            return Err(Fault::arg_count("delete", 2, args.len()));
        };
        let map = self.eval(target)?;
        let key = self.eval(key)?.to_key()?;
        match map {
            Value::Map(mut entries) => {
                if entries.contains_key(&key) {
                    std::sync::Arc::make_mut(&mut entries).remove(&key);
                    self.assign_to(target, Value::Map(entries))?;
                }
                Ok(Value::Nil)
            }
            Value::Nil => Ok(Value::Nil),
            other => Err(Fault::type_mismatch("delete", "map", &other)),
        }
    }

    /// `pkg.Member` for an imported package
    fn eval_selector(&mut self, base: &Expr, member: &str) -> Result<Value, Fault> {
        if let Expr::Name(name) = base {
            if !self.is_bound(name) {
                if let Some(pkg) = self.import(name) {
                    if !member.starts_with(|c: char| c.is_uppercase()) {
                        return Err(Fault::Undefined(format!(
                            "{}.{} (unexported)",
                            name, member
                        )));
                    }
                    return pkg
                        .value
                        .members
                        .get(member)
                        .cloned()
                        .ok_or_else(|| Fault::Undefined(format!("{}.{}", name, member)));
                }
                return Err(Fault::Undefined(name.clone()));
            }
        }
        let value = self.eval(base)?;
        Err(Fault::type_mismatch(
            &format!("selector .{}", member),
            "package",
            &value,
        ))
    }

    /// Non-logical binary operators
    pub(crate) fn arith(&self, op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value, Fault> {
        let mismatch = |lhs: &Value, rhs: &Value| Fault::TypeMismatch {
            context: format!("operator {}", op.symbol()),
            expected: lhs.type_name().to_string(),
            found: rhs.type_name().to_string(),
        };

        match op {
            BinaryOp::Eq => return Ok(Value::Bool(lhs.equals(&rhs))),
            BinaryOp::NotEq => return Ok(Value::Bool(!lhs.equals(&rhs))),
            _ => {}
        }

        match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => {
                let (a, b) = (*a, *b);
                Ok(match op {
                    BinaryOp::Add => Value::Int(a.wrapping_add(b)),
                    BinaryOp::Sub => Value::Int(a.wrapping_sub(b)),
                    BinaryOp::Mul => Value::Int(a.wrapping_mul(b)),
                    BinaryOp::Div | BinaryOp::Rem if b == 0 => return Err(Fault::DivisionByZero),
                    BinaryOp::Div => Value::Int(a.wrapping_div(b)),
                    BinaryOp::Rem => Value::Int(a.wrapping_rem(b)),
                    BinaryOp::Lt => Value::Bool(a < b),
                    BinaryOp::LtEq => Value::Bool(a <= b),
                    BinaryOp::Gt => Value::Bool(a > b),
                    BinaryOp::GtEq => Value::Bool(a >= b),
                    _ => return Err(mismatch(&lhs, &rhs)),
                })
            }
            (Value::Str(a), Value::Str(b)) => Ok(match op {
                BinaryOp::Add => {
                    let mut s = String::with_capacity(a.len() + b.len());
                    s.push_str(a);
                    s.push_str(b);
                    Value::Str(s)
                }
                BinaryOp::Lt => Value::Bool(a < b),
                BinaryOp::LtEq => Value::Bool(a <= b),
                BinaryOp::Gt => Value::Bool(a > b),
                BinaryOp::GtEq => Value::Bool(a >= b),
                _ => return Err(mismatch(&lhs, &rhs)),
            }),
            _ => Err(mismatch(&lhs, &rhs)),
        }
    }
}

fn index_value(container: &Value, index: &Value) -> Result<Value, Fault> {
    match container {
        Value::List(items) => {
            let i = index.as_int("list index")?;
            usize::try_from(i)
                .ok()
                .and_then(|i| items.get(i))
                .cloned()
                .ok_or(Fault::IndexOutOfRange { index: i, len: items.len() })
        }
        Value::Str(s) => {
            let i = index.as_int("string index")?;
            usize::try_from(i)
                .ok()
                .and_then(|i| s.as_bytes().get(i))
                .map(|b| Value::Str(char::from(*b).to_string()))
                .ok_or(Fault::IndexOutOfRange { index: i, len: s.len() })
        }
        // Missing keys read as nil
        Value::Map(entries) => Ok(entries.get(&index.to_key()?).cloned().unwrap_or_default()),
        Value::Nil => Ok(Value::Nil),
        other => Err(Fault::type_mismatch("index", "list, string or map", other)),
    }
}

fn slice_value(container: &Value, lo: Option<i64>, hi: Option<i64>) -> Result<Value, Fault> {
    let len = match container {
        Value::List(items) => items.len(),
        Value::Str(s) => s.len(),
        other => return Err(Fault::type_mismatch("slice", "list or string", other)),
    };
    let bound = |v: i64| -> Result<usize, Fault> {
        usize::try_from(v)
            .ok()
            .filter(|v| *v <= len)
            .ok_or(Fault::IndexOutOfRange { index: v, len })
    };
    let lo = lo.map(bound).transpose()?.unwrap_or(0);
    let hi = hi.map(bound).transpose()?.unwrap_or(len);
    if lo > hi {
        return Err(Fault::IndexOutOfRange {
            index: lo as i64,
            len: hi,
        });
    }
    match container {
        Value::List(items) => Ok(Value::list(items[lo..hi].to_vec())),
        Value::Str(s) => s
            .get(lo..hi)
            .map(Value::str)
            .ok_or(Fault::IndexOutOfRange {
                index: lo as i64,
                len,
            }),
        _ => Ok(Value::Nil),
    }
}
