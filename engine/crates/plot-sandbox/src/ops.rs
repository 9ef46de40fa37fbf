//! Operators over runtime values

use crate::error::ExecError;
use crate::numeric::{self, BinOp};
use crate::numpy::{array_binop, to_array};
use crate::sandbox::SandboxLimits;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl CmpOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        }
    }
}

fn unsupported(op: &str, left: &Value, right: &Value) -> ExecError {
    ExecError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn is_array_operand(value: &Value) -> bool {
    matches!(value, Value::Array(_))
}

pub fn binary(op: BinOp, left: &Value, right: &Value, limits: &SandboxLimits) -> Result<Value, ExecError> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return Ok(Value::from_number(numeric::apply(op, a, b)?));
    }
    if is_array_operand(left) || is_array_operand(right) {
        let a = to_array(left).map_err(|_| unsupported(op.symbol(), left, right))?;
        let b = to_array(right).map_err(|_| unsupported(op.symbol(), left, right))?;
        return Ok(Value::Array(a.broadcast(&b, |x, y| array_binop(op, x, y))?));
    }
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            limits.check_array_len(a.len() + b.len())?;
            Ok(Value::Str(format!("{}{}", a, b)))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            limits.check_array_len(a.len() + b.len())?;
            Ok(Value::List(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            limits.check_array_len(a.len() + b.len())?;
            Ok(Value::Tuple(a.iter().chain(b).cloned().collect()))
        }
        (BinOp::Mul, seq, n) | (BinOp::Mul, n, seq)
            if matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_))
                && matches!(n, Value::Int(_) | Value::Bool(_)) =>
        {
            repeat(seq, n.to_i64()?, limits)
        }
        _ => Err(unsupported(op.symbol(), left, right)),
    }
}

fn repeat(seq: &Value, times: i64, limits: &SandboxLimits) -> Result<Value, ExecError> {
    let times = times.max(0) as usize;
    match seq {
        Value::Str(s) => {
            limits.check_array_len(s.len().saturating_mul(times))?;
            Ok(Value::Str(s.repeat(times)))
        }
        Value::List(items) | Value::Tuple(items) => {
            limits.check_array_len(items.len().saturating_mul(times))?;
            let repeated: Vec<Value> = std::iter::repeat(items.iter().cloned()).take(times).flatten().collect();
            Ok(if matches!(seq, Value::List(_)) { Value::List(repeated) } else { Value::Tuple(repeated) })
        }
        other => Err(ExecError::type_error(format!(
            "can't multiply sequence by non-int of type '{}'",
            other.type_name()
        ))),
    }
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, ExecError> {
    match (op, operand) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy()?)),
        (UnaryOp::Neg, Value::Array(a)) => Ok(Value::Array(a.map(|x| -x))),
        (UnaryOp::Pos, Value::Array(a)) => Ok(Value::Array(a.clone())),
        (UnaryOp::Neg, v) => match v.as_number() {
            Some(n) => Ok(Value::from_number(numeric::apply(BinOp::Sub, numeric::Number::Int(0), n)?)),
            None => Err(ExecError::type_error(format!(
                "bad operand type for unary -: '{}'",
                v.type_name()
            ))),
        },
        (UnaryOp::Pos, v) => match v.as_number() {
            Some(n) => Ok(Value::from_number(n)),
            None => Err(ExecError::type_error(format!(
                "bad operand type for unary +: '{}'",
                v.type_name()
            ))),
        },
    }
}

/// Structural equality with Python's numeric coercion (`1 == 1.0 == True`)
pub fn values_equal(left: &Value, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return a.as_f64() == b.as_f64();
    }
    match (left, right) {
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        _ => left == right,
    }
}

fn ordering(op: CmpOp, left: &Value, right: &Value) -> Result<bool, ExecError> {
    use std::cmp::Ordering;
    let ord = match (left, right) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::List(a), Value::List(b)) | (Value::Tuple(a), Value::Tuple(b)) => {
            if let Some((x, y)) = a.iter().zip(b).find(|(x, y)| !values_equal(x, y)) {
                return ordering(op, x, y);
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => match a.as_f64().partial_cmp(&b.as_f64()) {
                Some(ord) => Some(ord),
                None => return Ok(false),
            },
            _ => None,
        },
    };
    let ord = ord.ok_or_else(|| {
        ExecError::type_error(format!(
            "'{}' not supported between instances of '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))
    })?;
    Ok(match op {
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::LtE => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::GtE => ord != Ordering::Less,
        _ => false,
    })
}

fn contains(container: &Value, item: &Value) -> Result<bool, ExecError> {
    match container {
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Str(s) => match item {
            Value::Str(needle) => Ok(s.contains(needle.as_str())),
            other => Err(ExecError::type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::Range(r) => {
            let target = match item.as_number() {
                Some(numeric::Number::Int(i)) => i,
                Some(numeric::Number::Float(f)) if f.fract() == 0.0 && f.abs() < 9.2e18 => f as i64,
                _ => return Ok(false),
            };
            let in_bounds = if r.step > 0 {
                r.start <= target && target < r.stop
            } else {
                r.stop < target && target <= r.start
            };
            Ok(in_bounds && (target as i128 - r.start as i128) % r.step as i128 == 0)
        }
        Value::Array(a) => {
            let x = item.to_f64()?;
            Ok(a.data().iter().any(|&v| v == x))
        }
        other => Err(ExecError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// Evaluate one comparison. Arrays compare elementwise into 0/1 arrays.
pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<Value, ExecError> {
    let elementwise = !matches!(op, CmpOp::In | CmpOp::NotIn | CmpOp::Is | CmpOp::IsNot)
        && (is_array_operand(left) || is_array_operand(right));
    if elementwise {
        let a = to_array(left)?;
        let b = to_array(right)?;
        let result = a.broadcast(&b, |x, y| {
            let hit = match op {
                CmpOp::Eq => x == y,
                CmpOp::NotEq => x != y,
                CmpOp::Lt => x < y,
                CmpOp::LtE => x <= y,
                CmpOp::Gt => x > y,
                CmpOp::GtE => x >= y,
                _ => false,
            };
            if hit {
                1.0
            } else {
                0.0
            }
        })?;
        return Ok(Value::Array(result));
    }
    let outcome = match op {
        CmpOp::Eq => values_equal(left, right),
        CmpOp::NotEq => !values_equal(left, right),
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => ordering(op, left, right)?,
        CmpOp::Is => identical(left, right),
        CmpOp::IsNot => !identical(left, right),
        CmpOp::In => contains(right, left)?,
        CmpOp::NotIn => !contains(right, left)?,
    };
    Ok(Value::Bool(outcome))
}

/// `is` only has a stable meaning for singletons
fn identical(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Module(a), Value::Module(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numpy::NdArray;

    fn limits() -> SandboxLimits {
        SandboxLimits::default()
    }

    #[test]
    fn test_scalar_arithmetic_uses_python_rules() {
        assert_eq!(binary(BinOp::Div, &Value::Int(1), &Value::Int(2), &limits()).unwrap(), Value::Float(0.5));
        assert_eq!(binary(BinOp::Add, &Value::Bool(true), &Value::Int(2), &limits()).unwrap(), Value::Int(3));
        assert!(matches!(
            binary(BinOp::Div, &Value::Int(1), &Value::Int(0), &limits()),
            Err(ExecError::Arith(_))
        ));
    }

    #[test]
    fn test_array_arithmetic_broadcasts_scalars() {
        let xs = Value::Array(NdArray::vector(vec![1.0, 2.0]));
        match binary(BinOp::Pow, &xs, &Value::Int(2), &limits()).unwrap() {
            Value::Array(a) => assert_eq!(a.data(), &[1.0, 4.0]),
            other => panic!("expected array, got {:?}", other),
        }
        match binary(BinOp::Div, &Value::Int(1), &Value::Array(NdArray::vector(vec![0.0])), &limits()).unwrap() {
            Value::Array(a) => assert_eq!(a.data(), &[f64::INFINITY]),
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn test_sequence_operators() {
        let s = binary(BinOp::Mul, &Value::Str("ab".into()), &Value::Int(3), &limits()).unwrap();
        assert_eq!(s, Value::Str("ababab".into()));
        let l = binary(
            BinOp::Add,
            &Value::List(vec![Value::Int(1)]),
            &Value::List(vec![Value::Int(2)]),
            &limits(),
        )
        .unwrap();
        assert_eq!(l, Value::List(vec![Value::Int(1), Value::Int(2)]));
        assert!(binary(BinOp::Add, &Value::Str("a".into()), &Value::Int(1), &limits()).is_err());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(compare(CmpOp::Eq, &Value::Int(1), &Value::Float(1.0)).unwrap(), Value::Bool(true));
        assert_eq!(compare(CmpOp::Lt, &Value::Str("a".into()), &Value::Str("b".into())).unwrap(), Value::Bool(true));
        assert_eq!(
            compare(CmpOp::In, &Value::Int(2), &Value::List(vec![Value::Int(1), Value::Float(2.0)])).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(compare(CmpOp::Is, &Value::None, &Value::None).unwrap(), Value::Bool(true));
        assert!(compare(CmpOp::Lt, &Value::Str("a".into()), &Value::Int(1)).is_err());
    }

    #[test]
    fn test_not_uses_truthiness() {
        assert_eq!(unary(UnaryOp::Not, &Value::List(Vec::new())).unwrap(), Value::Bool(true));
        assert_eq!(unary(UnaryOp::Neg, &Value::Float(2.5)).unwrap(), Value::Float(-2.5));
        assert!(unary(UnaryOp::Neg, &Value::Str("x".into())).is_err());
    }
}
