//! Safe formula evaluation
//!
//! Formulas are single Python expressions, parsed with `rustpython-parser` and
//! walked directly against a closed environment:
//! - the caller's bindings
//! - the whitelisted functions in [`FUNCTIONS`]
//!
//! Nothing else resolves. Attribute access, subscripting, names starting with
//! an underscore, lambdas and comprehensions are refused when the formula is
//! parsed, so a formula that parses can only compute a value.
//!
//! Arithmetic follows Python: `/` is true division, `//` floors, `%` takes the
//! sign of the divisor, and integer overflow is an error.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use plot_sandbox::numeric::{self, ArithError, BinOp, Number};
use rustpython_parser::{ast, Parse};

use crate::error::EvaluationError;
use crate::value::Value;

/// Functions a formula may call
pub const FUNCTIONS: &[&str] = &[
    "sqrt", "pow", "sin", "cos", "tan", "log", "log10", "exp", "abs", "round",
];

/// Round-half-even beyond this many digits cannot change an f64
const MAX_ROUND_DIGITS: i64 = 323;

// ============ Bindings ============

/// Read-only name lookup for formula evaluation
pub trait Bindings {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

impl Bindings for HashMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Bindings for BTreeMap<String, Value> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl Bindings for [(String, Value)] {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

impl Bindings for Vec<(String, Value)> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.as_slice().lookup(name)
    }
}

// ============ Formula ============

/// A parsed and checked formula, ready to evaluate any number of times
#[derive(Debug, Clone)]
pub struct Formula {
    source: String,
    expr: ast::Expr,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, EvaluationError> {
        let trimmed = source.trim();
        if trimmed.is_empty() {
            return Err(EvaluationError::Syntax {
                formula: source.to_string(),
                message: "empty formula".to_string(),
            });
        }
        let expr = ast::Expr::parse(trimmed, "<formula>").map_err(|e| EvaluationError::Syntax {
            formula: source.to_string(),
            message: e.to_string(),
        })?;
        check(&expr)?;
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Every name the formula mentions, including called function names
    pub fn referenced_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        collect_names(&self.expr, &mut names);
        names
    }

    pub fn evaluate<B: Bindings + ?Sized>(&self, bindings: &B) -> Result<Value, EvaluationError> {
        Evaluator { bindings }.eval(&self.expr)
    }

    /// Evaluate as a constraint. Anything but a boolean result is an error.
    pub fn evaluate_condition<B: Bindings + ?Sized>(&self, bindings: &B) -> Result<bool, EvaluationError> {
        match self.evaluate(bindings)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvaluationError::Type(format!(
                "constraint must evaluate to a boolean, got {}",
                other.type_name()
            ))),
        }
    }
}

/// Parse and evaluate a formula in one step
pub fn evaluate<B: Bindings + ?Sized>(formula: &str, bindings: &B) -> Result<Value, EvaluationError> {
    Formula::parse(formula)?.evaluate(bindings)
}

// ============ Static checks ============

fn check_name(name: &str) -> Result<(), EvaluationError> {
    if name.starts_with('_') {
        return Err(EvaluationError::Forbidden(format!(
            "name '{}' starts with an underscore",
            name
        )));
    }
    Ok(())
}

fn check_all(exprs: &[ast::Expr]) -> Result<(), EvaluationError> {
    for expr in exprs {
        if matches!(expr, ast::Expr::Starred(_)) {
            return Err(EvaluationError::Unsupported("starred expressions".into()));
        }
        check(expr)?;
    }
    Ok(())
}

fn check(expr: &ast::Expr) -> Result<(), EvaluationError> {
    use EvaluationError::{Forbidden, Unsupported};

    match expr {
        ast::Expr::Constant(ast::ExprConstant { value, .. }) => match value {
            ast::Constant::None
            | ast::Constant::Bool(_)
            | ast::Constant::Str(_)
            | ast::Constant::Int(_)
            | ast::Constant::Float(_) => Ok(()),
            _ => Err(Unsupported("bytes, complex and ellipsis literals".into())),
        },
        ast::Expr::Name(ast::ExprName { id, .. }) => check_name(id.as_str()),
        ast::Expr::Call(ast::ExprCall { func, args, keywords, .. }) => {
            match func.as_ref() {
                ast::Expr::Name(ast::ExprName { id, .. }) => check_name(id.as_str())?,
                ast::Expr::Attribute(_) => return Err(Forbidden("attribute access".into())),
                _ => return Err(Forbidden("calls to anything but a named function".into())),
            }
            if !keywords.is_empty() {
                return Err(Unsupported("keyword arguments".into()));
            }
            check_all(args)
        }
        ast::Expr::BinOp(ast::ExprBinOp { left, op, right, .. }) => {
            bin_op(op)?;
            check(left)?;
            check(right)
        }
        ast::Expr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => {
            if matches!(op, ast::UnaryOp::Invert) {
                return Err(Unsupported("bitwise inversion".into()));
            }
            check(operand)
        }
        ast::Expr::BoolOp(ast::ExprBoolOp { values, .. }) => check_all(values),
        ast::Expr::Compare(ast::ExprCompare { left, ops, comparators, .. }) => {
            if ops.iter().any(|op| matches!(op, ast::CmpOp::Is | ast::CmpOp::IsNot)) {
                return Err(Unsupported("identity comparison".into()));
            }
            check(left)?;
            check_all(comparators)
        }
        ast::Expr::IfExp(ast::ExprIfExp { test, body, orelse, .. }) => {
            check(test)?;
            check(body)?;
            check(orelse)
        }
        ast::Expr::List(ast::ExprList { elts, .. }) | ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => {
            check_all(elts)
        }
        ast::Expr::Attribute(_) => Err(Forbidden("attribute access".into())),
        ast::Expr::Subscript(_) => Err(Forbidden("subscripting".into())),
        ast::Expr::Lambda(_) => Err(Forbidden("lambda expressions".into())),
        ast::Expr::NamedExpr(_) => Err(Forbidden("assignment expressions".into())),
        ast::Expr::ListComp(_)
        | ast::Expr::SetComp(_)
        | ast::Expr::DictComp(_)
        | ast::Expr::GeneratorExp(_) => Err(Forbidden("comprehensions".into())),
        ast::Expr::Await(_) | ast::Expr::Yield(_) | ast::Expr::YieldFrom(_) => {
            Err(Forbidden("await and yield".into()))
        }
        ast::Expr::JoinedStr(_) | ast::Expr::FormattedValue(_) => Err(Unsupported("f-strings".into())),
        ast::Expr::Dict(_) | ast::Expr::Set(_) => Err(Unsupported("dict and set literals".into())),
        _ => Err(Unsupported("expression".into())),
    }
}

fn collect_names(expr: &ast::Expr, out: &mut BTreeSet<String>) {
    match expr {
        ast::Expr::Name(ast::ExprName { id, .. }) => {
            out.insert(id.as_str().to_string());
        }
        ast::Expr::Call(ast::ExprCall { func, args, .. }) => {
            collect_names(func, out);
            args.iter().for_each(|a| collect_names(a, out));
        }
        ast::Expr::BinOp(ast::ExprBinOp { left, right, .. }) => {
            collect_names(left, out);
            collect_names(right, out);
        }
        ast::Expr::UnaryOp(ast::ExprUnaryOp { operand, .. }) => collect_names(operand, out),
        ast::Expr::BoolOp(ast::ExprBoolOp { values, .. }) => {
            values.iter().for_each(|v| collect_names(v, out));
        }
        ast::Expr::Compare(ast::ExprCompare { left, comparators, .. }) => {
            collect_names(left, out);
            comparators.iter().for_each(|c| collect_names(c, out));
        }
        ast::Expr::IfExp(ast::ExprIfExp { test, body, orelse, .. }) => {
            collect_names(test, out);
            collect_names(body, out);
            collect_names(orelse, out);
        }
        ast::Expr::List(ast::ExprList { elts, .. }) | ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => {
            elts.iter().for_each(|e| collect_names(e, out));
        }
        _ => {}
    }
}

fn bin_op(op: &ast::Operator) -> Result<BinOp, EvaluationError> {
    match op {
        ast::Operator::Add => Ok(BinOp::Add),
        ast::Operator::Sub => Ok(BinOp::Sub),
        ast::Operator::Mult => Ok(BinOp::Mul),
        ast::Operator::Div => Ok(BinOp::Div),
        ast::Operator::FloorDiv => Ok(BinOp::FloorDiv),
        ast::Operator::Mod => Ok(BinOp::Mod),
        ast::Operator::Pow => Ok(BinOp::Pow),
        _ => Err(EvaluationError::Unsupported("bitwise and matrix operators".into())),
    }
}

// ============ Evaluation ============

struct Evaluator<'a, B: Bindings + ?Sized> {
    bindings: &'a B,
}

impl<B: Bindings + ?Sized> Evaluator<'_, B> {
    fn eval(&self, expr: &ast::Expr) -> Result<Value, EvaluationError> {
        match expr {
            ast::Expr::Constant(ast::ExprConstant { value, .. }) => constant(value),
            ast::Expr::Name(ast::ExprName { id, .. }) => {
                let name = id.as_str();
                match self.bindings.lookup(name) {
                    Some(value) => Ok(value.clone()),
                    None if FUNCTIONS.contains(&name) => Err(EvaluationError::Type(format!(
                        "function '{}' must be called",
                        name
                    ))),
                    None => Err(EvaluationError::UnboundName(name.to_string())),
                }
            }
            ast::Expr::Call(ast::ExprCall { func, args, .. }) => {
                let name = match func.as_ref() {
                    ast::Expr::Name(ast::ExprName { id, .. }) => id.as_str(),
                    _ => return Err(EvaluationError::Forbidden("calls to anything but a named function".into())),
                };
                // Bindings shadow the whitelist
                if let Some(value) = self.bindings.lookup(name) {
                    return Err(EvaluationError::Type(format!(
                        "'{}' object is not callable",
                        value.type_name()
                    )));
                }
                if !FUNCTIONS.contains(&name) {
                    return Err(EvaluationError::UnboundName(name.to_string()));
                }
                let args = args.iter().map(|a| self.eval(a)).collect::<Result<Vec<_>, _>>()?;
                call_function(name, &args)
            }
            ast::Expr::BinOp(ast::ExprBinOp { left, op, right, .. }) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(bin_op(op)?, &left, &right)
            }
            ast::Expr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => {
                let operand = self.eval(operand)?;
                unary(op, &operand)
            }
            ast::Expr::BoolOp(ast::ExprBoolOp { op, values, .. }) => {
                let mut last = Value::None;
                for expr in values {
                    last = self.eval(expr)?;
                    let short_circuit = match op {
                        ast::BoolOp::And => !last.truthy(),
                        ast::BoolOp::Or => last.truthy(),
                    };
                    if short_circuit {
                        break;
                    }
                }
                Ok(last)
            }
            ast::Expr::Compare(ast::ExprCompare { left, ops, comparators, .. }) => {
                let mut left = self.eval(left)?;
                for (op, right) in ops.iter().zip(comparators) {
                    let right = self.eval(right)?;
                    if !compare(op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            ast::Expr::IfExp(ast::ExprIfExp { test, body, orelse, .. }) => {
                if self.eval(test)?.truthy() {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            ast::Expr::List(ast::ExprList { elts, .. }) | ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => {
                let items = elts.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>, _>>()?;
                Ok(Value::List(items))
            }
            // Parsing already refused everything else
            _ => Err(EvaluationError::Forbidden("expression".into())),
        }
    }
}

fn constant(value: &ast::Constant) -> Result<Value, EvaluationError> {
    match value {
        ast::Constant::None => Ok(Value::None),
        ast::Constant::Bool(b) => Ok(Value::Bool(*b)),
        ast::Constant::Str(s) => Ok(Value::Str(s.clone())),
        ast::Constant::Int(i) => i
            .to_string()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ArithError::Overflow("integer literal too large").into()),
        ast::Constant::Float(f) => Ok(Value::Float(*f)),
        _ => Err(EvaluationError::Unsupported("literal".into())),
    }
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvaluationError> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return Ok(Value::from_number(numeric::apply(op, a, b)?));
    }
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{}{}", a, b))),
        (BinOp::Add, Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
        _ => Err(EvaluationError::Type(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn unary(op: &ast::UnaryOp, operand: &Value) -> Result<Value, EvaluationError> {
    let symbol = match op {
        ast::UnaryOp::Not => return Ok(Value::Bool(!operand.truthy())),
        ast::UnaryOp::USub => "-",
        ast::UnaryOp::UAdd => "+",
        ast::UnaryOp::Invert => return Err(EvaluationError::Unsupported("bitwise inversion".into())),
    };
    match (symbol, operand.as_number()) {
        ("-", Some(Number::Int(i))) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| ArithError::Overflow("integer negation overflowed").into()),
        ("-", Some(Number::Float(f))) => Ok(Value::Float(-f)),
        (_, Some(n)) => Ok(Value::from_number(n)),
        (_, None) => Err(EvaluationError::Type(format!(
            "bad operand type for unary {}: '{}'",
            symbol,
            operand.type_name()
        ))),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::List(a), Value::List(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y)),
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::None, Value::None) => true,
        _ => match (left.as_number(), right.as_number()) {
            (Some(Number::Int(a)), Some(Number::Int(b))) => a == b,
            (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
            _ => false,
        },
    }
}

fn ordering(left: &Value, right: &Value, symbol: &str) -> Result<Option<Ordering>, EvaluationError> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        _ => match (left.as_number(), right.as_number()) {
            (Some(Number::Int(a)), Some(Number::Int(b))) => Ok(Some(a.cmp(&b))),
            // NaN compares false every way
            (Some(a), Some(b)) => Ok(a.as_f64().partial_cmp(&b.as_f64())),
            _ => Err(EvaluationError::Type(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                symbol,
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, EvaluationError> {
    match (container, item) {
        (Value::List(items), _) => Ok(items.iter().any(|v| values_equal(v, item))),
        (Value::Str(haystack), Value::Str(needle)) => Ok(haystack.contains(needle.as_str())),
        (Value::Str(_), other) => Err(EvaluationError::Type(format!(
            "'in <string>' requires string as left operand, not {}",
            other.type_name()
        ))),
        (other, _) => Err(EvaluationError::Type(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn compare(op: &ast::CmpOp, left: &Value, right: &Value) -> Result<bool, EvaluationError> {
    let (symbol, accepts): (&str, fn(Ordering) -> bool) = match op {
        ast::CmpOp::Eq => return Ok(values_equal(left, right)),
        ast::CmpOp::NotEq => return Ok(!values_equal(left, right)),
        ast::CmpOp::In => return contains(right, left),
        ast::CmpOp::NotIn => return contains(right, left).map(|found| !found),
        ast::CmpOp::Lt => ("<", Ordering::is_lt),
        ast::CmpOp::LtE => ("<=", Ordering::is_le),
        ast::CmpOp::Gt => (">", Ordering::is_gt),
        ast::CmpOp::GtE => (">=", Ordering::is_ge),
        ast::CmpOp::Is | ast::CmpOp::IsNot => {
            return Err(EvaluationError::Unsupported("identity comparison".into()))
        }
    };
    Ok(ordering(left, right, symbol)?.map(accepts).unwrap_or(false))
}

// ============ Whitelisted functions ============

fn domain_error() -> EvaluationError {
    ArithError::Domain("math domain error".into()).into()
}

fn range_error() -> EvaluationError {
    ArithError::Overflow("math range error").into()
}

fn check_arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), EvaluationError> {
    if (min..=max).contains(&args.len()) {
        return Ok(());
    }
    let expected = if min == max {
        format!("exactly {}", min)
    } else {
        format!("from {} to {}", min, max)
    };
    Err(EvaluationError::Type(format!(
        "{}() takes {} argument(s) ({} given)",
        name,
        expected,
        args.len()
    )))
}

fn real(value: &Value) -> Result<f64, EvaluationError> {
    value
        .as_f64()
        .ok_or_else(|| EvaluationError::Type(format!("must be real number, not {}", value.type_name())))
}

fn finite_result(input_finite: bool, result: f64) -> Result<Value, EvaluationError> {
    if input_finite && result.is_infinite() {
        return Err(range_error());
    }
    Ok(Value::Float(result))
}

fn call_function(name: &str, args: &[Value]) -> Result<Value, EvaluationError> {
    match name {
        "sqrt" => {
            check_arity(name, args, 1, 1)?;
            let x = real(&args[0])?;
            if x < 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(x.sqrt()))
        }
        "pow" => {
            check_arity(name, args, 2, 2)?;
            let (x, y) = (real(&args[0])?, real(&args[1])?);
            let result = x.powf(y);
            if x.is_finite() && y.is_finite() {
                if result.is_nan() {
                    return Err(domain_error());
                }
                if result.is_infinite() {
                    return Err(if x == 0.0 { domain_error() } else { range_error() });
                }
            }
            Ok(Value::Float(result))
        }
        "sin" | "cos" | "tan" => {
            check_arity(name, args, 1, 1)?;
            let x = real(&args[0])?;
            if x.is_infinite() {
                return Err(domain_error());
            }
            Ok(Value::Float(match name {
                "sin" => x.sin(),
                "cos" => x.cos(),
                _ => x.tan(),
            }))
        }
        "log" => {
            check_arity(name, args, 1, 2)?;
            let x = real(&args[0])?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            match args.get(1) {
                None => Ok(Value::Float(x.ln())),
                Some(base) => {
                    let base = real(base)?;
                    if base <= 0.0 {
                        return Err(domain_error());
                    }
                    let denominator = base.ln();
                    if denominator == 0.0 {
                        return Err(ArithError::ZeroDivision("float division by zero").into());
                    }
                    Ok(Value::Float(x.ln() / denominator))
                }
            }
        }
        "log10" => {
            check_arity(name, args, 1, 1)?;
            let x = real(&args[0])?;
            if x <= 0.0 {
                return Err(domain_error());
            }
            Ok(Value::Float(x.log10()))
        }
        "exp" => {
            check_arity(name, args, 1, 1)?;
            let x = real(&args[0])?;
            finite_result(x.is_finite(), x.exp())
        }
        "abs" => {
            check_arity(name, args, 1, 1)?;
            match args[0].as_number() {
                Some(Number::Int(i)) => i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| ArithError::Overflow("integer absolute value overflowed").into()),
                Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
                None => Err(EvaluationError::Type(format!(
                    "bad operand type for abs(): '{}'",
                    args[0].type_name()
                ))),
            }
        }
        "round" => {
            check_arity(name, args, 1, 2)?;
            match args.get(1) {
                None => round_to_int(&args[0]),
                Some(Value::None) => round_to_int(&args[0]),
                Some(digits) => match digits.as_number() {
                    Some(Number::Int(n)) => round_digits(&args[0], n),
                    _ => Err(EvaluationError::Type(format!(
                        "'{}' object cannot be interpreted as an integer",
                        digits.type_name()
                    ))),
                },
            }
        }
        other => Err(EvaluationError::UnboundName(other.to_string())),
    }
}

fn round_to_int(value: &Value) -> Result<Value, EvaluationError> {
    match value.as_number() {
        Some(Number::Int(i)) => Ok(Value::Int(i)),
        Some(Number::Float(f)) => {
            if f.is_nan() {
                return Err(ArithError::Domain("cannot convert float NaN to integer".into()).into());
            }
            let rounded = f.round_ties_even();
            if !rounded.is_finite() || rounded < i64::MIN as f64 || rounded >= i64::MAX as f64 {
                return Err(ArithError::Overflow("cannot convert float to integer").into());
            }
            Ok(Value::Int(rounded as i64))
        }
        None => Err(EvaluationError::Type(format!(
            "type {} doesn't define __round__ method",
            value.type_name()
        ))),
    }
}

fn round_digits(value: &Value, digits: i64) -> Result<Value, EvaluationError> {
    match value.as_number() {
        Some(Number::Float(f)) => {
            if !f.is_finite() || digits >= MAX_ROUND_DIGITS {
                return Ok(Value::Float(f));
            }
            if digits >= 0 {
                // Bounded by MAX_ROUND_DIGITS above
                return Ok(Value::Float(numeric::round_to(f, digits as u32)));
            }
            let scale = 10f64.powi((-digits).min(400) as i32);
            if scale.is_infinite() {
                return Ok(Value::Float(0.0 * f));
            }
            Ok(Value::Float((f / scale).round_ties_even() * scale))
        }
        Some(Number::Int(i)) => {
            if digits >= 0 {
                return Ok(Value::Int(i));
            }
            let scale = match u32::try_from(-digits).ok().and_then(|p| 10i128.checked_pow(p)) {
                Some(scale) if scale <= i64::MAX as i128 => scale,
                _ => return Ok(Value::Int(0)),
            };
            let value = i as i128;
            let quotient = value.div_euclid(scale);
            let remainder = value.rem_euclid(scale);
            let round_up = match (2 * remainder).cmp(&scale) {
                Ordering::Greater => true,
                Ordering::Equal => quotient % 2 != 0,
                Ordering::Less => false,
            };
            let rounded = (quotient + i128::from(round_up)) * scale;
            i64::try_from(rounded)
                .map(Value::Int)
                .map_err(|_| ArithError::Overflow("integer rounding overflowed").into())
        }
        None => Err(EvaluationError::Type(format!(
            "type {} doesn't define __round__ method",
            value.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bindings(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    fn eval(formula: &str) -> Result<Value, EvaluationError> {
        let empty: HashMap<String, Value> = HashMap::new();
        evaluate(formula, &empty)
    }

    #[test]
    fn test_hypotenuse() {
        let env = bindings(&[("a", Value::Int(3)), ("b", Value::Int(4))]);
        assert_eq!(evaluate("sqrt(a**2 + b**2)", &env), Ok(Value::Float(5.0)));
    }

    #[test]
    fn test_rejects_escape_attempts() {
        let env = bindings(&[("x", Value::Int(1))]);
        for formula in [
            "__import__('os').system('ls')",
            "x.__class__.__bases__",
            "exec('1')",
            "eval('1')",
            "open('/etc/passwd')",
            "(lambda: 1)()",
            "[c for c in 'abc']",
            "x[0]",
        ] {
            assert!(evaluate(formula, &env).is_err(), "{} should be rejected", formula);
        }
        assert!(matches!(
            Formula::parse("__import__('os')"),
            Err(EvaluationError::Forbidden(_))
        ));
        assert!(matches!(
            Formula::parse("x.__class__"),
            Err(EvaluationError::Forbidden(_))
        ));
        assert_eq!(eval("open('/etc/passwd')"), Err(EvaluationError::UnboundName("open".into())));
    }

    #[test]
    fn test_python_arithmetic() {
        assert_eq!(eval("7 / 2"), Ok(Value::Float(3.5)));
        assert_eq!(eval("7 // 2"), Ok(Value::Int(3)));
        assert_eq!(eval("-7 % 3"), Ok(Value::Int(2)));
        assert_eq!(eval("2 ** 10"), Ok(Value::Int(1024)));
        assert_eq!(eval("True + 1"), Ok(Value::Int(2)));
        assert!(matches!(eval("1 / 0"), Err(EvaluationError::Arithmetic(ArithError::ZeroDivision(_)))));
        assert!(matches!(
            eval("9223372036854775807 + 1"),
            Err(EvaluationError::Arithmetic(ArithError::Overflow(_)))
        ));
    }

    #[test]
    fn test_round_is_half_even() {
        assert_eq!(eval("round(2.5)"), Ok(Value::Int(2)));
        assert_eq!(eval("round(3.5)"), Ok(Value::Int(4)));
        assert_eq!(eval("round(-0.5)"), Ok(Value::Int(0)));
        assert_eq!(eval("round(3.14159, 2)"), Ok(Value::Float(3.14)));
        assert_eq!(eval("round(1250, -2)"), Ok(Value::Int(1200)));
        assert_eq!(eval("round(7)"), Ok(Value::Int(7)));
    }

    #[test]
    fn test_math_functions() {
        match eval("log(8, 2)") {
            Ok(Value::Float(x)) => assert!((x - 3.0).abs() < 1e-12),
            other => panic!("unexpected {:?}", other),
        }
        match eval("log10(1000)") {
            Ok(Value::Float(x)) => assert!((x - 3.0).abs() < 1e-12),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(eval("pow(2, 3)"), Ok(Value::Float(8.0)));
        assert_eq!(eval("abs(-4)"), Ok(Value::Int(4)));
        assert_eq!(eval("exp(0)"), Ok(Value::Float(1.0)));
        assert!(matches!(eval("sqrt(-1)"), Err(EvaluationError::Arithmetic(ArithError::Domain(_)))));
        assert!(matches!(eval("log(0)"), Err(EvaluationError::Arithmetic(ArithError::Domain(_)))));
        assert!(matches!(eval("exp(1000)"), Err(EvaluationError::Arithmetic(ArithError::Overflow(_)))));
        assert!(matches!(eval("sqrt(1, 2)"), Err(EvaluationError::Type(_))));
        assert!(matches!(eval("sqrt('4')"), Err(EvaluationError::Type(_))));
    }

    #[test]
    fn test_bindings_shadow_functions() {
        let env = bindings(&[("sqrt", Value::Int(4))]);
        assert_eq!(evaluate("sqrt + 1", &env), Ok(Value::Int(5)));
        assert!(matches!(evaluate("sqrt(4)", &env), Err(EvaluationError::Type(_))));
    }

    #[test]
    fn test_comparisons_and_logic() {
        let env = bindings(&[("a", Value::Int(5)), ("b", Value::Float(2.5))]);
        assert_eq!(evaluate("1 < a < 10", &env), Ok(Value::Bool(true)));
        assert_eq!(evaluate("1 < a < 3", &env), Ok(Value::Bool(false)));
        assert_eq!(evaluate("a == 5.0", &env), Ok(Value::Bool(true)));
        assert_eq!(evaluate("a in [1, 5, 9]", &env), Ok(Value::Bool(true)));
        assert_eq!(evaluate("a not in (1, 2)", &env), Ok(Value::Bool(true)));
        assert_eq!(evaluate("0 or b", &env), Ok(Value::Float(2.5)));
        assert_eq!(evaluate("a and 0", &env), Ok(Value::Int(0)));
        assert_eq!(evaluate("a if a > b else b", &env), Ok(Value::Int(5)));
        assert_eq!(evaluate("not a", &env), Ok(Value::Bool(false)));
        // Short-circuit skips the unbound name
        assert_eq!(evaluate("a > 0 or missing", &env), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_condition_must_be_boolean() {
        let env = bindings(&[("a", Value::Int(5))]);
        let formula = Formula::parse("a > 3").unwrap();
        assert_eq!(formula.evaluate_condition(&env), Ok(true));
        let formula = Formula::parse("a - 5").unwrap();
        assert!(matches!(formula.evaluate_condition(&env), Err(EvaluationError::Type(_))));
    }

    #[test]
    fn test_unbound_name() {
        assert_eq!(eval("a + 1"), Err(EvaluationError::UnboundName("a".into())));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(Formula::parse("a +"), Err(EvaluationError::Syntax { .. })));
        assert!(matches!(Formula::parse("   "), Err(EvaluationError::Syntax { .. })));
        assert!(matches!(Formula::parse("x = 1"), Err(EvaluationError::Syntax { .. })));
    }

    #[test]
    fn test_referenced_names() {
        let formula = Formula::parse("sqrt(a) + b * (c if d else 2)").unwrap();
        let names: Vec<String> = formula.referenced_names().into_iter().collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "sqrt"]);
    }

    #[test]
    fn test_slice_bindings() {
        let env = vec![("x".to_string(), Value::Int(2)), ("y".to_string(), Value::Int(3))];
        assert_eq!(evaluate("x * y", &env), Ok(Value::Int(6)));
    }
}
