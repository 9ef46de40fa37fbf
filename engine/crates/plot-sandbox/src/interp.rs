//! Tree-walking interpreter for compiled graph programs
//!
//! The interpreter owns the program's global namespace and borrows the figure
//! context for the whole run. Name resolution is globals, then the plotting
//! modules, then the safe builtins. There is no instruction budget: callers
//! bound wall-clock time from outside.

use std::collections::HashMap;

use crate::compiler::{Expr, Index, Literal, Program, Stmt, Target};
use crate::error::ExecError;
use crate::figure::FigureContext;
use crate::numpy;
use crate::ops;
use crate::pyplot;
use crate::sandbox::{self, Builtin, IndexValue, Module, SandboxLimits};
use crate::value::{CallArgs, Callable, Value};

enum Flow {
    Normal,
    Break,
    Continue,
}

pub struct Interpreter<'a> {
    figure: &'a mut FigureContext,
    limits: SandboxLimits,
    globals: HashMap<String, Value>,
    stdout: String,
}

impl<'a> Interpreter<'a> {
    pub fn new(figure: &'a mut FigureContext, limits: SandboxLimits) -> Self {
        Self {
            figure,
            limits,
            globals: HashMap::new(),
            stdout: String::new(),
        }
    }

    pub fn run(&mut self, program: &Program) -> Result<(), ExecError> {
        self.block(&program.body).map(|_| ())
    }

    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn into_stdout(self) -> String {
        self.stdout
    }

    // ============ Statements ============

    fn block(&mut self, stmts: &[Stmt]) -> Result<Flow, ExecError> {
        for stmt in stmts {
            match self.stmt(stmt)? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<Flow, ExecError> {
        match stmt {
            Stmt::Expr(expr) => {
                self.eval(expr)?;
            }
            Stmt::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            Stmt::AugAssign { target, op, value } => {
                let current = self.read_target(target)?;
                let rhs = self.eval(value)?;
                let updated = ops::binary(*op, &current, &rhs, &self.limits)?;
                self.assign(target, updated)?;
            }
            Stmt::If { test, body, orelse } => {
                let branch = if self.eval(test)?.truthy()? { body } else { orelse };
                return self.block(branch);
            }
            Stmt::For { target, iter, body, orelse } => {
                let items = sandbox::guarded_iter(self.eval(iter)?)?;
                let mut broke = false;
                for item in items {
                    self.assign(target, item)?;
                    if let Flow::Break = self.block(body)? {
                        broke = true;
                        break;
                    }
                }
                if !broke {
                    return self.block(orelse);
                }
            }
            Stmt::While { test, body, orelse } => {
                let mut broke = false;
                while self.eval(test)?.truthy()? {
                    if let Flow::Break = self.block(body)? {
                        broke = true;
                        break;
                    }
                }
                if !broke {
                    return self.block(orelse);
                }
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
            Stmt::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn assign(&mut self, target: &Target, value: Value) -> Result<(), ExecError> {
        match target {
            Target::Name(name) => {
                self.globals.insert(name.clone(), value);
            }
            Target::Unpack(parts) => {
                let values = sandbox::unpack(value, parts.len(), &self.limits)?;
                for (part, v) in parts.iter().zip(values) {
                    self.assign(part, v)?;
                }
            }
            Target::Item { name, index } => {
                let index = self.eval_index(index)?;
                let container = self
                    .globals
                    .get_mut(name)
                    .ok_or_else(|| ExecError::Name(name.clone()))?;
                set_item(container, &index, value)?;
            }
        }
        Ok(())
    }

    fn read_target(&mut self, target: &Target) -> Result<Value, ExecError> {
        match target {
            Target::Name(name) => self.lookup(name),
            Target::Item { name, index } => {
                let container = self.lookup(name)?;
                let index = self.eval_index(index)?;
                sandbox::guarded_getitem(&container, &index)
            }
            Target::Unpack(_) => Err(ExecError::type_error(
                "illegal expression for augmented assignment",
            )),
        }
    }

    // ============ Expressions ============

    fn lookup(&self, name: &str) -> Result<Value, ExecError> {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(module) = Module::from_name(name) {
            return Ok(Value::Module(module));
        }
        Builtin::lookup(name)
            .map(|b| Value::Function(Callable::Builtin(b)))
            .ok_or_else(|| ExecError::Name(name.to_string()))
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ExecError> {
        match expr {
            Expr::Literal(lit) => Ok(match lit {
                Literal::None => Value::None,
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Int(i) => Value::Int(*i),
                Literal::Float(f) => Value::Float(*f),
                Literal::Str(s) => Value::Str(s.clone()),
            }),
            Expr::Name(name) => self.lookup(name),
            Expr::Member { module, name } => module
                .attribute(name)
                .ok_or_else(|| ExecError::Name(format!("{}.{}", module.name(), name))),
            Expr::Call { func, args, keywords } => {
                let callee = self.eval(func)?;
                let positional = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
                let mut kwargs = Vec::with_capacity(keywords.len());
                for (name, value) in keywords {
                    kwargs.push((name.clone(), self.eval(value)?));
                }
                self.call(callee, positional, kwargs)
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                ops::binary(*op, &l, &r, &self.limits)
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                ops::unary(*op, &v)
            }
            Expr::And(values) => {
                let mut last = Value::Bool(true);
                for value in values {
                    last = self.eval(value)?;
                    if !last.truthy()? {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Or(values) => {
                let mut last = Value::Bool(false);
                for value in values {
                    last = self.eval(value)?;
                    if last.truthy()? {
                        break;
                    }
                }
                Ok(last)
            }
            Expr::Compare { left, rest } => {
                let mut lhs = self.eval(left)?;
                let mut result = Value::Bool(true);
                for (op, right) in rest {
                    let rhs = self.eval(right)?;
                    result = ops::compare(*op, &lhs, &rhs)?;
                    if rest.len() > 1 && !result.truthy()? {
                        return Ok(result);
                    }
                    lhs = rhs;
                }
                Ok(result)
            }
            Expr::IfElse { test, body, orelse } => {
                if self.eval(test)?.truthy()? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|e| self.eval(e)).collect::<Result<_, _>>()?,
            )),
            Expr::Tuple(items) => Ok(Value::Tuple(
                items.iter().map(|e| self.eval(e)).collect::<Result<_, _>>()?,
            )),
            Expr::Subscript { value, index } => {
                let container = self.eval(value)?;
                let index = self.eval_index(index)?;
                sandbox::guarded_getitem(&container, &index)
            }
        }
    }

    fn eval_index(&mut self, index: &Index) -> Result<IndexValue, ExecError> {
        match index {
            Index::Item(expr) => Ok(IndexValue::Item(self.eval(expr)?)),
            Index::Slice { lower, upper, step } => Ok(IndexValue::Slice(
                self.slice_bound(lower)?,
                self.slice_bound(upper)?,
                self.slice_bound(step)?,
            )),
            Index::Multi(parts) => Ok(IndexValue::Multi(
                parts.iter().map(|p| self.eval_index(p)).collect::<Result<_, _>>()?,
            )),
        }
    }

    fn slice_bound(&mut self, bound: &Option<Expr>) -> Result<Option<i64>, ExecError> {
        match bound {
            None => Ok(None),
            Some(expr) => match self.eval(expr)? {
                Value::None => Ok(None),
                other => other.to_i64().map(Some),
            },
        }
    }

    fn call(
        &mut self,
        callee: Value,
        positional: Vec<Value>,
        keywords: Vec<(String, Value)>,
    ) -> Result<Value, ExecError> {
        match callee {
            Value::Function(Callable::Builtin(b)) => {
                let args = CallArgs::new(b.name(), positional, keywords);
                sandbox::call_builtin(b, &args, &self.limits, &mut self.stdout)
            }
            Value::Function(Callable::Numpy(name)) => {
                let args = CallArgs::new(name.as_str(), positional, keywords);
                numpy::call(&name, &args, &self.limits)
            }
            Value::Function(Callable::Pyplot(name)) => {
                let args = CallArgs::new(name.as_str(), positional, keywords);
                pyplot::call(&name, &args, self.figure)
            }
            other => Err(ExecError::type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }
}

fn set_item(container: &mut Value, index: &IndexValue, value: Value) -> Result<(), ExecError> {
    match container {
        Value::List(items) => match index {
            IndexValue::Item(i) => {
                let pos = sandbox::normalize_index(i.to_i64()?, items.len(), "list assignment")?;
                items[pos] = value;
                Ok(())
            }
            _ => Err(ExecError::type_error("list indices must be integers")),
        },
        Value::Array(array) => array.set_item(index, value.to_f64()?),
        other => Err(ExecError::type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}
