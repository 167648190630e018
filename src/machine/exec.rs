//! Statement execution and calls

use std::collections::HashMap;

use tracing::trace;

use crate::lang::ast::{AssignOp, BinaryOp, CaseClause, Expr, Stmt};
use crate::lang::Op;

use super::{Binding, Deferred, Fault, Flow, Frame, FuncValue, Machine, Value};

impl Machine<'_> {
    // =========================================================================
    // Calls
    // =========================================================================

    /// Call a snippet function. Deferred calls run LIFO on every exit path.
    pub(crate) fn call_function(&mut self, func: &FuncValue, args: Vec<Value>) -> Result<Value, Fault> {
        self.mark(Op::Call);
        let decl = &func.decl;
        if args.len() != decl.params.len() {
            return Err(Fault::arg_count(&decl.name, decl.params.len(), args.len()));
        }
        if self.frames.len() >= self.max_call_depth {
            return Err(Fault::CallDepthExceeded(self.max_call_depth));
        }

        let package = if *func.pkg == *self.pkg_path {
            None
        } else {
            let pkg = self
                .store
                .cached(&func.pkg)
                .ok_or_else(|| Fault::Undefined(format!("package {}", func.pkg)))?;
            Some(pkg)
        };

        let mut scope = HashMap::new();
        for (param, arg) in decl.params.iter().zip(args) {
            if param != "_" {
                scope.insert(param.clone(), Binding::var(arg));
            }
        }
        self.frames.push(Frame {
            package,
            scopes: vec![scope],
            defers: Vec::new(),
        });
        trace!(func = %decl.name, depth = self.frames.len(), "call");

        let outcome = self.exec_stmts(&decl.body);
        let defers = self
            .frames
            .pop()
            .map(|frame| frame.defers)
            .unwrap_or_default();

        let mut result = outcome.map(|flow| match flow {
            Flow::Return(value) => value,
            _ => Value::Nil,
        });

        if result.is_err() && !defers.is_empty() {
            self.mark(Op::Panic2);
        }
        for deferred in defers.into_iter().rev() {
            let outcome = match deferred {
                Deferred::Value(callee, args) => self.invoke(&callee, args),
                Deferred::Builtin(builtin, args) => builtin.call(self, args),
            };
            // A later fault replaces the one being unwound
            if let Err(fault) = outcome {
                result = Err(fault);
            }
        }
        result
    }

    /// Call any callable value
    pub(crate) fn invoke(&mut self, callee: &Value, args: Vec<Value>) -> Result<Value, Fault> {
        match callee {
            Value::Func(func) => self.call_function(func, args),
            Value::Native(native) => {
                self.mark(Op::CallNative);
                (native.func)(&mut *self.output, args)
            }
            other => Err(Fault::NotCallable(other.to_string())),
        }
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Run statements in the current scope
    pub(crate) fn exec_stmts(&mut self, stmts: &[Stmt]) -> Result<Flow, Fault> {
        for stmt in stmts {
            match self.exec(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    /// Run statements in a new block scope
    pub(crate) fn exec_block(&mut self, stmts: &[Stmt]) -> Result<Flow, Fault> {
        self.mark(Op::Block);
        self.scoped(|m| m.exec_stmts(stmts))
    }

    pub(crate) fn exec(&mut self, stmt: &Stmt) -> Result<Flow, Fault> {
        self.nested(|m| m.exec_stmt(stmt))
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, Fault> {
        match stmt {
            Stmt::Block(stmts) => self.exec_block(stmts),

            Stmt::Var(specs) => {
                for spec in specs {
                    self.mark(Op::VarDecl);
                    let value = match spec.value {
                        Some(ref expr) => self.eval(expr)?,
                        None => Value::zero(spec.ty.as_ref()),
                    };
                    self.declare(&spec.name, value, !spec.is_const);
                }
                Ok(Flow::Normal)
            }

            Stmt::Define { names, values } => {
                self.mark(Op::Define);
                let values = values
                    .iter()
                    .map(|e| self.eval(e))
                    .collect::<Result<Vec<_>, _>>()?;
                for (name, value) in names.iter().zip(values) {
                    if self.declared_in_scope(name) {
                        self.set_name(name, value)?;
                    } else {
                        self.declare(name, value, true);
                    }
                }
                Ok(Flow::Normal)
            }

            Stmt::Assign { target, op, value } => {
                if matches!(target, Expr::Index(..)) {
                    self.mark(Op::AssignIndex);
                } else {
                    self.mark(Op::Assign);
                }
                let rhs = self.eval(value)?;
                let new = match op {
                    AssignOp::Set => rhs,
                    AssignOp::Add => {
                        let current = self.eval(target)?;
                        self.arith(BinaryOp::Add, nil_as_zero(current, &rhs), rhs)?
                    }
                    AssignOp::Sub => {
                        let current = self.eval(target)?;
                        self.arith(BinaryOp::Sub, nil_as_zero(current, &rhs), rhs)?
                    }
                };
                self.assign_to(target, new)?;
                Ok(Flow::Normal)
            }

            Stmt::IncDec { target, inc } => {
                self.mark(Op::IncDec);
                let one = Value::Int(1);
                let current = nil_as_zero(self.eval(target)?, &one);
                let op = if *inc { BinaryOp::Add } else { BinaryOp::Sub };
                let new = self.arith(op, current, one)?;
                self.assign_to(target, new)?;
                Ok(Flow::Normal)
            }

            Stmt::Expr(expr) => {
                self.mark(Op::ExprStmt);
                self.eval(expr)?;
                Ok(Flow::Normal)
            }

            Stmt::If {
                init,
                cond,
                then,
                els,
            } => self.scoped(|m| {
                if let Some(init) = init {
                    m.exec(init)?;
                }
                m.mark(Op::IfCond);
                if m.eval(cond)?.as_bool("if condition")? {
                    m.exec_block(then)
                } else if let Some(els) = els {
                    m.mark(Op::IfElse);
                    m.exec(els)
                } else {
                    Ok(Flow::Normal)
                }
            }),

            Stmt::For {
                init,
                cond,
                post,
                body,
            } => self.scoped(|m| {
                if let Some(init) = init {
                    m.exec(init)?;
                }
                loop {
                    if let Some(cond) = cond {
                        if !m.eval(cond)?.as_bool("for condition")? {
                            break;
                        }
                    }
                    m.mark(Op::ForLoop);
                    match m.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                    if let Some(post) = post {
                        m.exec(post)?;
                    }
                }
                Ok(Flow::Normal)
            }),

            Stmt::Range {
                key,
                value,
                define,
                expr,
                body,
            } => self.exec_range(key.as_ref(), value.as_ref(), *define, expr, body),

            Stmt::Switch { init, tag, clauses } => self.scoped(|m| {
                if let Some(init) = init {
                    m.exec(init)?;
                }
                m.exec_switch(tag.as_ref(), clauses)
            }),

            Stmt::Break => {
                self.mark(Op::Break);
                Ok(Flow::Break)
            }

            Stmt::Continue => {
                self.mark(Op::Continue);
                Ok(Flow::Continue)
            }

            Stmt::Return(expr) => {
                self.mark(Op::Return);
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Nil,
                };
                Ok(Flow::Return(value))
            }

            Stmt::Defer(call) => {
                self.mark(Op::Defer);
                let deferred = self.prepare_deferred(call)?;
                if let Some(frame) = self.frames.last_mut() {
                    frame.defers.push(deferred);
                }
                Ok(Flow::Normal)
            }
        }
    }

    fn prepare_deferred(&mut self, call: &Expr) -> Result<Deferred, Fault> {
        let Expr::Call { func, args } = call else {
            return Err(Fault::NotCallable(format!("{:?}", call)));
        };
        if let Some(builtin) = self.builtin_callee(func) {
            let args = self.eval_args(args)?;
            return Ok(Deferred::Builtin(builtin, args));
        }
        let callee = self.eval(func)?;
        let args = self.eval_args(args)?;
        Ok(Deferred::Value(callee, args))
    }

    fn exec_range(
        &mut self,
        key: Option<&Expr>,
        value: Option<&Expr>,
        define: bool,
        expr: &Expr,
        body: &[Stmt],
    ) -> Result<Flow, Fault> {
        let subject = self.eval(expr)?;
        let items: Vec<(Value, Value)> = match subject {
            Value::List(ref items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| (Value::Int(i as i64), v.clone()))
                .collect(),
            Value::Str(ref s) => s
                .char_indices()
                .map(|(i, c)| (Value::Int(i as i64), Value::Str(c.to_string())))
                .collect(),
            Value::Map(ref entries) => entries
                .iter()
                .map(|(k, v)| (Value::from(k.clone()), v.clone()))
                .collect(),
            Value::Nil => Vec::new(),
            ref other => return Err(Fault::type_mismatch("range", "list, string or map", other)),
        };
        let op = match subject {
            Value::Str(_) => Op::RangeIterString,
            Value::Map(_) => Op::RangeIterMap,
            _ => Op::RangeIterList,
        };

        for (k, v) in items {
            self.mark(op);
            let flow = self.scoped(|m| {
                m.bind_iteration(key, k, define)?;
                m.bind_iteration(value, v, define)?;
                m.exec_block(body)
            })?;
            match flow {
                Flow::Break => break,
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn bind_iteration(&mut self, target: Option<&Expr>, value: Value, define: bool) -> Result<(), Fault> {
        match target {
            None => Ok(()),
            Some(Expr::Name(name)) if define => {
                self.declare(name, value, true);
                Ok(())
            }
            Some(target) => self.assign_to(target, value),
        }
    }

    fn exec_switch(&mut self, tag: Option<&Expr>, clauses: &[CaseClause]) -> Result<Flow, Fault> {
        self.mark(Op::SwitchClause);
        let tag = match tag {
            Some(expr) => Some(self.eval(expr)?),
            None => None,
        };

        let mut chosen = None;
        'clauses: for clause in clauses.iter().filter(|c| !c.is_default()) {
            for expr in &clause.exprs {
                self.mark(Op::SwitchClauseCase);
                let candidate = self.eval(expr)?;
                let matched = match tag {
                    Some(ref tag) => tag.equals(&candidate),
                    None => candidate.as_bool("switch case")?,
                };
                if matched {
                    chosen = Some(clause);
                    break 'clauses;
                }
            }
        }
        if chosen.is_none() {
            chosen = clauses.iter().find(|c| c.is_default());
            if chosen.is_some() {
                self.mark(Op::SwitchDefault);
            }
        }

        match chosen {
            Some(clause) => match self.exec_block(&clause.body)? {
                Flow::Break => Ok(Flow::Normal),
                flow => Ok(flow),
            },
            None => Ok(Flow::Normal),
        }
    }

    // =========================================================================
    // Assignment
    // =========================================================================

    /// Store `value` into an assignable expression
    pub(crate) fn assign_to(&mut self, target: &Expr, value: Value) -> Result<(), Fault> {
        match target {
            Expr::Name(name) => self.set_name(name, value),
            Expr::Index(base, index) => {
                let container = self.eval(base)?;
                let index = self.eval(index)?;
                let updated = set_index(container, index, value)?;
                self.assign_to(base, updated)
            }
            Expr::Selector(base, member) => {
                let owner = match base.as_ref() {
                    Expr::Name(name) => name.clone(),
                    _ => "value".to_string(),
                };
                Err(Fault::ReadOnly(format!("{}.{}", owner, member)))
            }
            other => Err(Fault::ReadOnly(format!("{:?}", other))),
        }
    }
}

/// Copy-on-write element store
fn set_index(container: Value, index: Value, value: Value) -> Result<Value, Fault> {
    match container {
        Value::List(mut items) => {
            let i = index.as_int("list index")?;
            let len = items.len();
            let slot = usize::try_from(i)
                .ok()
                .and_then(|i| std::sync::Arc::make_mut(&mut items).get_mut(i))
                .ok_or(Fault::IndexOutOfRange { index: i, len })?;
            *slot = value;
            Ok(Value::List(items))
        }
        Value::Map(mut entries) => {
            let key = index.to_key()?;
            std::sync::Arc::make_mut(&mut entries).insert(key, value);
            Ok(Value::Map(entries))
        }
        Value::Nil => Err(Fault::Panic("assignment to entry in nil map".to_string())),
        other => Err(Fault::type_mismatch("index assignment", "list or map", &other)),
    }
}

/// Missing map entries read as nil; arithmetic updates treat that as zero
fn nil_as_zero(current: Value, rhs: &Value) -> Value {
    match (current, rhs) {
        (Value::Nil, Value::Int(_)) => Value::Int(0),
        (Value::Nil, Value::Str(_)) => Value::Str(String::new()),
        (current, _) => current,
    }
}
