//! Restricted compiler: Python source to a closed instruction tree
//!
//! Source is parsed with `rustpython-parser` and lowered into the small IR
//! below. Anything without an IR form is rejected here, before a single
//! statement runs:
//! - imports, `def`, `class`, `lambda`, `with`, `try`, `global`, `del`
//! - names and attributes starting with an underscore (`__import__`, `__class__`, ...)
//! - attribute access on anything but the `np`/`numpy`/`plt` modules, and
//!   module members that do not exist
//! - rebinding a module name
//! - comprehensions, f-strings, dict/set literals, `*args` and `**kwargs`

use rustpython_parser::{ast, Parse};

use crate::error::CompileError;
use crate::numeric::BinOp;
use crate::ops::{CmpOp, UnaryOp};
use crate::sandbox::{Module, MODULE_NAMES};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    Member { module: Module, name: String },
    Call { func: Box<Expr>, args: Vec<Expr>, keywords: Vec<(String, Expr)> },
    Binary { op: BinOp, left: Box<Expr>, right: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare { left: Box<Expr>, rest: Vec<(CmpOp, Expr)> },
    IfElse { test: Box<Expr>, body: Box<Expr>, orelse: Box<Expr> },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Subscript { value: Box<Expr>, index: Box<Index> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Index {
    Item(Expr),
    Slice { lower: Option<Expr>, upper: Option<Expr>, step: Option<Expr> },
    Multi(Vec<Index>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Name(String),
    Unpack(Vec<Target>),
    Item { name: String, index: Index },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign { targets: Vec<Target>, value: Expr },
    AugAssign { target: Target, op: BinOp, value: Expr },
    If { test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt> },
    For { target: Target, iter: Expr, body: Vec<Stmt>, orelse: Vec<Stmt> },
    While { test: Expr, body: Vec<Stmt>, orelse: Vec<Stmt> },
    Break,
    Continue,
    Pass,
}

/// A compiled graph program
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

/// Parse and lower graph code. Fails without executing anything.
pub fn compile(source: &str) -> Result<Program, CompileError> {
    let suite = ast::Suite::parse(source, "<graph>").map_err(|e| CompileError::Syntax(e.to_string()))?;
    let mut lowering = Lowering { loop_depth: 0 };
    Ok(Program {
        body: lowering.block(&suite)?,
    })
}

fn forbidden(what: impl Into<String>) -> CompileError {
    CompileError::Forbidden(what.into())
}

fn unsupported(what: impl Into<String>) -> CompileError {
    CompileError::Unsupported(what.into())
}

fn check_name(name: &str) -> Result<(), CompileError> {
    if name.starts_with('_') {
        return Err(forbidden(format!(
            "\"{}\" is an invalid variable name because it starts with \"_\"",
            name
        )));
    }
    Ok(())
}

fn check_bindable(name: &str) -> Result<(), CompileError> {
    check_name(name)?;
    if MODULE_NAMES.contains(&name) {
        return Err(forbidden(format!("assignment to module name '{}'", name)));
    }
    Ok(())
}

struct Lowering {
    loop_depth: usize,
}

impl Lowering {
    fn block(&mut self, stmts: &[ast::Stmt]) -> Result<Vec<Stmt>, CompileError> {
        stmts.iter().map(|s| self.stmt(s)).collect()
    }

    fn loop_body(&mut self, stmts: &[ast::Stmt]) -> Result<Vec<Stmt>, CompileError> {
        self.loop_depth += 1;
        let body = self.block(stmts);
        self.loop_depth -= 1;
        body
    }

    fn stmt(&mut self, stmt: &ast::Stmt) -> Result<Stmt, CompileError> {
        match stmt {
            ast::Stmt::Expr(ast::StmtExpr { value, .. }) => Ok(Stmt::Expr(self.expr(value)?)),
            ast::Stmt::Assign(ast::StmtAssign { targets, value, .. }) => Ok(Stmt::Assign {
                targets: targets.iter().map(|t| self.target(t)).collect::<Result<_, _>>()?,
                value: self.expr(value)?,
            }),
            ast::Stmt::AugAssign(ast::StmtAugAssign { target, op, value, .. }) => Ok(Stmt::AugAssign {
                target: self.target(target)?,
                op: bin_op(op)?,
                value: self.expr(value)?,
            }),
            ast::Stmt::AnnAssign(ast::StmtAnnAssign { target, value, .. }) => match value {
                Some(value) => Ok(Stmt::Assign {
                    targets: vec![self.target(target)?],
                    value: self.expr(value)?,
                }),
                None => Ok(Stmt::Pass),
            },
            ast::Stmt::If(ast::StmtIf { test, body, orelse, .. }) => Ok(Stmt::If {
                test: self.expr(test)?,
                body: self.block(body)?,
                orelse: self.block(orelse)?,
            }),
            ast::Stmt::For(ast::StmtFor { target, iter, body, orelse, .. }) => Ok(Stmt::For {
                target: self.target(target)?,
                iter: self.expr(iter)?,
                body: self.loop_body(body)?,
                orelse: self.block(orelse)?,
            }),
            ast::Stmt::While(ast::StmtWhile { test, body, orelse, .. }) => Ok(Stmt::While {
                test: self.expr(test)?,
                body: self.loop_body(body)?,
                orelse: self.block(orelse)?,
            }),
            ast::Stmt::Break(_) | ast::Stmt::Continue(_) if self.loop_depth == 0 => {
                Err(CompileError::Syntax("'break' or 'continue' outside loop".to_string()))
            }
            ast::Stmt::Break(_) => Ok(Stmt::Break),
            ast::Stmt::Continue(_) => Ok(Stmt::Continue),
            ast::Stmt::Pass(_) => Ok(Stmt::Pass),
            ast::Stmt::Import(_) | ast::Stmt::ImportFrom(_) => Err(forbidden("import statements")),
            ast::Stmt::FunctionDef(_) | ast::Stmt::AsyncFunctionDef(_) => {
                Err(forbidden("function definitions"))
            }
            ast::Stmt::ClassDef(_) => Err(forbidden("class definitions")),
            ast::Stmt::Global(_) | ast::Stmt::Nonlocal(_) => Err(forbidden("global and nonlocal")),
            ast::Stmt::With(_) | ast::Stmt::AsyncWith(_) => Err(forbidden("with statements")),
            ast::Stmt::Try(_) | ast::Stmt::TryStar(_) | ast::Stmt::Raise(_) => {
                Err(unsupported("exception handling"))
            }
            ast::Stmt::Delete(_) => Err(unsupported("del statements")),
            ast::Stmt::Return(_) => Err(CompileError::Syntax("'return' outside function".to_string())),
            _ => Err(unsupported("statement")),
        }
    }

    fn target(&mut self, expr: &ast::Expr) -> Result<Target, CompileError> {
        match expr {
            ast::Expr::Name(ast::ExprName { id, .. }) => {
                check_bindable(id.as_str())?;
                Ok(Target::Name(id.as_str().to_string()))
            }
            ast::Expr::Tuple(ast::ExprTuple { elts, .. }) | ast::Expr::List(ast::ExprList { elts, .. }) => {
                Ok(Target::Unpack(
                    elts.iter().map(|e| self.target(e)).collect::<Result<_, _>>()?,
                ))
            }
            ast::Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => match value.as_ref() {
                ast::Expr::Name(ast::ExprName { id, .. }) => {
                    check_bindable(id.as_str())?;
                    Ok(Target::Item {
                        name: id.as_str().to_string(),
                        index: self.index(slice)?,
                    })
                }
                _ => Err(unsupported("assignment to nested subscripts")),
            },
            ast::Expr::Attribute(_) => Err(forbidden("attribute assignment")),
            ast::Expr::Starred(_) => Err(unsupported("starred assignment")),
            _ => Err(CompileError::Syntax("cannot assign to expression".to_string())),
        }
    }

    fn index(&mut self, slice: &ast::Expr) -> Result<Index, CompileError> {
        match slice {
            ast::Expr::Slice(ast::ExprSlice { lower, upper, step, .. }) => Ok(Index::Slice {
                lower: self.optional(lower)?,
                upper: self.optional(upper)?,
                step: self.optional(step)?,
            }),
            ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => Ok(Index::Multi(
                elts.iter().map(|e| self.index(e)).collect::<Result<_, _>>()?,
            )),
            other => Ok(Index::Item(self.expr(other)?)),
        }
    }

    fn optional(&mut self, expr: &Option<Box<ast::Expr>>) -> Result<Option<Expr>, CompileError> {
        expr.as_deref().map(|e| self.expr(e)).transpose()
    }

    fn exprs(&mut self, exprs: &[ast::Expr]) -> Result<Vec<Expr>, CompileError> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn expr(&mut self, expr: &ast::Expr) -> Result<Expr, CompileError> {
        match expr {
            ast::Expr::Constant(ast::ExprConstant { value, .. }) => Ok(Expr::Literal(literal(value)?)),
            ast::Expr::Name(ast::ExprName { id, .. }) => {
                check_name(id.as_str())?;
                Ok(Expr::Name(id.as_str().to_string()))
            }
            ast::Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                check_name(attr.as_str())?;
                let module = match value.as_ref() {
                    ast::Expr::Name(ast::ExprName { id, .. }) => Module::from_name(id.as_str()),
                    _ => None,
                };
                let module = module.ok_or_else(|| {
                    forbidden(format!("attribute access '.{}' outside the np and plt modules", attr.as_str()))
                })?;
                if !module.has_member(attr.as_str()) {
                    return Err(CompileError::UnknownMember {
                        module: module.name().to_string(),
                        attr: attr.as_str().to_string(),
                    });
                }
                Ok(Expr::Member {
                    module,
                    name: attr.as_str().to_string(),
                })
            }
            ast::Expr::Call(ast::ExprCall { func, args, keywords, .. }) => {
                let func = self.expr(func)?;
                let mut lowered = Vec::with_capacity(args.len());
                for arg in args {
                    if matches!(arg, ast::Expr::Starred(_)) {
                        return Err(unsupported("*args in calls"));
                    }
                    lowered.push(self.expr(arg)?);
                }
                let mut kwargs = Vec::with_capacity(keywords.len());
                for keyword in keywords {
                    let name = keyword.arg.as_ref().ok_or_else(|| unsupported("**kwargs in calls"))?;
                    check_name(name.as_str())?;
                    kwargs.push((name.as_str().to_string(), self.expr(&keyword.value)?));
                }
                Ok(Expr::Call {
                    func: Box::new(func),
                    args: lowered,
                    keywords: kwargs,
                })
            }
            ast::Expr::BinOp(ast::ExprBinOp { left, op, right, .. }) => Ok(Expr::Binary {
                op: bin_op(op)?,
                left: Box::new(self.expr(left)?),
                right: Box::new(self.expr(right)?),
            }),
            ast::Expr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => {
                let op = match op {
                    ast::UnaryOp::Not => UnaryOp::Not,
                    ast::UnaryOp::USub => UnaryOp::Neg,
                    ast::UnaryOp::UAdd => UnaryOp::Pos,
                    ast::UnaryOp::Invert => return Err(unsupported("bitwise inversion")),
                };
                Ok(Expr::Unary {
                    op,
                    operand: Box::new(self.expr(operand)?),
                })
            }
            ast::Expr::BoolOp(ast::ExprBoolOp { op, values, .. }) => {
                let values = self.exprs(values)?;
                Ok(match op {
                    ast::BoolOp::And => Expr::And(values),
                    ast::BoolOp::Or => Expr::Or(values),
                })
            }
            ast::Expr::Compare(ast::ExprCompare { left, ops, comparators, .. }) => {
                let mut rest = Vec::with_capacity(ops.len());
                for (op, right) in ops.iter().zip(comparators) {
                    rest.push((cmp_op(op), self.expr(right)?));
                }
                Ok(Expr::Compare {
                    left: Box::new(self.expr(left)?),
                    rest,
                })
            }
            ast::Expr::IfExp(ast::ExprIfExp { test, body, orelse, .. }) => Ok(Expr::IfElse {
                test: Box::new(self.expr(test)?),
                body: Box::new(self.expr(body)?),
                orelse: Box::new(self.expr(orelse)?),
            }),
            ast::Expr::List(ast::ExprList { elts, .. }) => Ok(Expr::List(self.exprs(elts)?)),
            ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => Ok(Expr::Tuple(self.exprs(elts)?)),
            ast::Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => Ok(Expr::Subscript {
                value: Box::new(self.expr(value)?),
                index: Box::new(self.index(slice)?),
            }),
            ast::Expr::Lambda(_) => Err(forbidden("lambda expressions")),
            ast::Expr::NamedExpr(_) => Err(unsupported("assignment expressions")),
            ast::Expr::ListComp(_)
            | ast::Expr::SetComp(_)
            | ast::Expr::DictComp(_)
            | ast::Expr::GeneratorExp(_) => Err(unsupported("comprehensions")),
            ast::Expr::JoinedStr(_) | ast::Expr::FormattedValue(_) => Err(unsupported("f-strings")),
            ast::Expr::Dict(_) | ast::Expr::Set(_) => Err(unsupported("dict and set literals")),
            ast::Expr::Await(_) | ast::Expr::Yield(_) | ast::Expr::YieldFrom(_) => {
                Err(forbidden("await and yield"))
            }
            ast::Expr::Starred(_) => Err(unsupported("starred expressions")),
            _ => Err(unsupported("expression")),
        }
    }
}

fn literal(value: &ast::Constant) -> Result<Literal, CompileError> {
    match value {
        ast::Constant::None => Ok(Literal::None),
        ast::Constant::Bool(b) => Ok(Literal::Bool(*b)),
        ast::Constant::Str(s) => Ok(Literal::Str(s.clone())),
        ast::Constant::Int(i) => {
            let text = i.to_string();
            text.parse::<i64>()
                .map(Literal::Int)
                .map_err(|_| unsupported(format!("integer literal {} is too large", text)))
        }
        ast::Constant::Float(f) => Ok(Literal::Float(*f)),
        _ => Err(unsupported("bytes, complex and ellipsis literals")),
    }
}

fn bin_op(op: &ast::Operator) -> Result<BinOp, CompileError> {
    match op {
        ast::Operator::Add => Ok(BinOp::Add),
        ast::Operator::Sub => Ok(BinOp::Sub),
        ast::Operator::Mult => Ok(BinOp::Mul),
        ast::Operator::Div => Ok(BinOp::Div),
        ast::Operator::FloorDiv => Ok(BinOp::FloorDiv),
        ast::Operator::Mod => Ok(BinOp::Mod),
        ast::Operator::Pow => Ok(BinOp::Pow),
        _ => Err(unsupported("bitwise and matrix operators")),
    }
}

fn cmp_op(op: &ast::CmpOp) -> CmpOp {
    match op {
        ast::CmpOp::Eq => CmpOp::Eq,
        ast::CmpOp::NotEq => CmpOp::NotEq,
        ast::CmpOp::Lt => CmpOp::Lt,
        ast::CmpOp::LtE => CmpOp::LtE,
        ast::CmpOp::Gt => CmpOp::Gt,
        ast::CmpOp::GtE => CmpOp::GtE,
        ast::CmpOp::Is => CmpOp::Is,
        ast::CmpOp::IsNot => CmpOp::IsNot,
        ast::CmpOp::In => CmpOp::In,
        ast::CmpOp::NotIn => CmpOp::NotIn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(source: &str) -> CompileError {
        match compile(source) {
            Err(e) => e,
            Ok(program) => panic!("expected rejection of {:?}, got {:?}", source, program),
        }
    }

    #[test]
    fn test_compiles_typical_plot_code() {
        let program = compile(
            "x = np.linspace(-10, 10, 400)\n\
             y = 2 * x**2 + 3*x - 1\n\
             plt.plot(x, y, 'b-', label='f(x)')\n\
             plt.axhline(0, color='black', linewidth=0.5)\n\
             plt.grid(True, alpha=0.3)\n\
             for i in range(3):\n    plt.scatter([i], [i * i])\n",
        )
        .unwrap();
        assert_eq!(program.body.len(), 6);
    }

    #[test]
    fn test_rejects_imports_and_definitions() {
        assert!(matches!(rejected("import os"), CompileError::Forbidden(_)));
        assert!(matches!(rejected("from os import path"), CompileError::Forbidden(_)));
        assert!(matches!(rejected("def f():\n    return 1"), CompileError::Forbidden(_)));
        assert!(matches!(rejected("class A:\n    pass"), CompileError::Forbidden(_)));
        assert!(matches!(rejected("f = lambda: 1"), CompileError::Forbidden(_)));
    }

    #[test]
    fn test_rejects_underscore_names_and_attributes() {
        assert!(matches!(rejected("__builtins__"), CompileError::Forbidden(_)));
        assert!(matches!(rejected("x = np.__dict__"), CompileError::Forbidden(_)));
        assert!(matches!(rejected("x = ().__class__"), CompileError::Forbidden(_)));
        assert!(matches!(rejected("_x = 1"), CompileError::Forbidden(_)));
    }

    #[test]
    fn test_attribute_access_limited_to_modules() {
        assert!(matches!(rejected("x = [1].append"), CompileError::Forbidden(_)));
        assert!(matches!(
            rejected("plt.savefig('out.png')"),
            CompileError::UnknownMember { .. }
        ));
        assert!(matches!(rejected("np.load('x')"), CompileError::UnknownMember { .. }));
        assert!(compile("y = numpy.sin(np.pi)").is_ok());
    }

    #[test]
    fn test_module_names_cannot_be_rebound() {
        assert!(matches!(rejected("np = 1"), CompileError::Forbidden(_)));
        assert!(matches!(rejected("for plt in range(3):\n    pass"), CompileError::Forbidden(_)));
    }

    #[test]
    fn test_syntax_errors_and_unsupported_constructs() {
        assert!(matches!(rejected("x = = 1"), CompileError::Syntax(_)));
        assert!(matches!(rejected("break"), CompileError::Syntax(_)));
        assert!(matches!(rejected("xs = [i for i in range(3)]"), CompileError::Unsupported(_)));
        assert!(matches!(rejected("d = {'a': 1}"), CompileError::Unsupported(_)));
        assert!(matches!(rejected("f(**opts)"), CompileError::Unsupported(_)));
        assert!(matches!(rejected("x = 10 ** 100 if False else 99999999999999999999"), CompileError::Unsupported(_)));
    }

    #[test]
    fn test_lowering_shapes() {
        let program = compile("a, b = 1, 2.5\nxs[0] += a").unwrap();
        assert_eq!(
            program.body[0],
            Stmt::Assign {
                targets: vec![Target::Unpack(vec![
                    Target::Name("a".to_string()),
                    Target::Name("b".to_string())
                ])],
                value: Expr::Tuple(vec![
                    Expr::Literal(Literal::Int(1)),
                    Expr::Literal(Literal::Float(2.5))
                ]),
            }
        );
        assert!(matches!(&program.body[1], Stmt::AugAssign { target: Target::Item { .. }, op: BinOp::Add, .. }));
    }
}
