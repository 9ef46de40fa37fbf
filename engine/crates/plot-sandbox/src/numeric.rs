//! Scalar arithmetic with Python number semantics
//!
//! Shared by the graph interpreter and the host's formula evaluator so that
//! `a / b`, `a // b`, `a % b` and `a ** b` behave the same everywhere:
//! - `/` always produces a float
//! - `//` floors, `%` takes the sign of the divisor
//! - `**` stays integral for integer operands with a non-negative exponent
//! - integer overflow is an error rather than a silent wrap

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A scalar number, integral or floating
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Number {
    Int(i64),
    Float(f64),
}

/// Arithmetic binary operators supported in formulas and graph code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArithError {
    #[error("ZeroDivisionError: {0}")]
    ZeroDivision(&'static str),
    #[error("OverflowError: {0}")]
    Overflow(&'static str),
    #[error("ValueError: {0}")]
    Domain(String),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Int(i) => i == 0,
            Number::Float(f) => f == 0.0,
        }
    }
}

/// Apply a binary operator to two numbers.
pub fn apply(op: BinOp, left: Number, right: Number) -> Result<Number, ArithError> {
    match (left, right) {
        (Number::Int(a), Number::Int(b)) => apply_int(op, a, b),
        _ => apply_float(op, left.as_f64(), right.as_f64()),
    }
}

fn apply_int(op: BinOp, a: i64, b: i64) -> Result<Number, ArithError> {
    const OVERFLOW: &str = "integer result too large";
    match op {
        BinOp::Add => a.checked_add(b).map(Number::Int).ok_or(ArithError::Overflow(OVERFLOW)),
        BinOp::Sub => a.checked_sub(b).map(Number::Int).ok_or(ArithError::Overflow(OVERFLOW)),
        BinOp::Mul => a.checked_mul(b).map(Number::Int).ok_or(ArithError::Overflow(OVERFLOW)),
        BinOp::Div => {
            if b == 0 {
                return Err(ArithError::ZeroDivision("division by zero"));
            }
            Ok(Number::Float(a as f64 / b as f64))
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return Err(ArithError::ZeroDivision("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or(ArithError::Overflow(OVERFLOW))?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                Ok(Number::Int(q - 1))
            } else {
                Ok(Number::Int(q))
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(ArithError::ZeroDivision("integer division or modulo by zero"));
            }
            let r = a.checked_rem(b).ok_or(ArithError::Overflow(OVERFLOW))?;
            if r != 0 && ((r < 0) != (b < 0)) {
                Ok(Number::Int(r + b))
            } else {
                Ok(Number::Int(r))
            }
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(ArithError::ZeroDivision(
                        "0.0 cannot be raised to a negative power",
                    ));
                }
                return Ok(Number::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| ArithError::Overflow(OVERFLOW))?;
            a.checked_pow(exp).map(Number::Int).ok_or(ArithError::Overflow(OVERFLOW))
        }
    }
}

fn apply_float(op: BinOp, a: f64, b: f64) -> Result<Number, ArithError> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(ArithError::ZeroDivision("float division by zero"));
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return Err(ArithError::ZeroDivision("float floor division by zero"));
            }
            (a / b).floor()
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(ArithError::ZeroDivision("float modulo"));
            }
            float_mod(a, b)
        }
        BinOp::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(ArithError::ZeroDivision(
                    "0.0 cannot be raised to a negative power",
                ));
            }
            if a < 0.0 && b.fract() != 0.0 && b.is_finite() {
                return Err(ArithError::Domain(
                    "negative number cannot be raised to a fractional power".to_string(),
                ));
            }
            let result = a.powf(b);
            if result.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(ArithError::Overflow("numerical result out of range"));
            }
            result
        }
    };
    Ok(Number::Float(value))
}

/// Python-style float modulo (result has the sign of the divisor).
pub fn float_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
        r + b
    } else {
        r
    }
}

/// Round half to even at `digits` decimal places, as Python's `round(x, n)`.
pub fn round_to(value: f64, digits: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    // Formatting rounds the exact binary value, which is what Python does too
    format!("{:.*}", digits as usize, value)
        .parse::<f64>()
        .unwrap_or(value)
}

/// Format a float the way Python's `repr(float)` does.
pub fn python_float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    let magnitude = value.abs();
    if value == 0.0 || (1e-4..1e16).contains(&magnitude) {
        let s = format!("{}", value);
        if s.contains('.') {
            s
        } else {
            format!("{}.0", s)
        }
    } else {
        // Rust prints `1e-7` / `1.5e20`; Python prints `1e-07` / `1.5e+20`
        let s = format!("{:e}", value);
        match s.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = match exp.strip_prefix('-') {
                    Some(rest) => ('-', rest),
                    None => ('+', exp),
                };
                format!("{}e{}{:0>2}", mantissa, sign, digits)
            }
            None => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_arithmetic_stays_integral() {
        assert_eq!(apply(BinOp::Add, Number::Int(2), Number::Int(3)), Ok(Number::Int(5)));
        assert_eq!(apply(BinOp::Pow, Number::Int(2), Number::Int(10)), Ok(Number::Int(1024)));
        assert_eq!(apply(BinOp::Div, Number::Int(7), Number::Int(2)), Ok(Number::Float(3.5)));
    }

    #[test]
    fn test_floor_div_and_mod_follow_divisor_sign() {
        assert_eq!(apply(BinOp::FloorDiv, Number::Int(-7), Number::Int(2)), Ok(Number::Int(-4)));
        assert_eq!(apply(BinOp::Mod, Number::Int(-7), Number::Int(2)), Ok(Number::Int(1)));
        assert_eq!(apply(BinOp::Mod, Number::Int(7), Number::Int(-2)), Ok(Number::Int(-1)));
        assert_eq!(float_mod(-7.5, 2.0), 0.5);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            apply(BinOp::Div, Number::Int(1), Number::Int(0)),
            Err(ArithError::ZeroDivision(_))
        ));
        assert!(matches!(
            apply(BinOp::Mul, Number::Int(i64::MAX), Number::Int(2)),
            Err(ArithError::Overflow(_))
        ));
        assert!(matches!(
            apply(BinOp::Pow, Number::Float(-8.0), Number::Float(0.5)),
            Err(ArithError::Domain(_))
        ));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(5.830951894845301, 2), 5.83);
        assert_eq!(round_to(2.675, 2), 2.67);
        assert_eq!(round_to(1.0, 3), 1.0);
    }

    #[test]
    fn test_python_float_repr() {
        assert_eq!(python_float_repr(5.0), "5.0");
        assert_eq!(python_float_repr(0.1), "0.1");
        assert_eq!(python_float_repr(-2.5), "-2.5");
        assert_eq!(python_float_repr(1e-7), "1e-07");
        assert_eq!(python_float_repr(1.5e20), "1.5e+20");
    }
}
