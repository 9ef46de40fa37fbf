//! The restricted execution profile
//!
//! This module defines everything graph code is allowed to touch:
//! - The module names `np`/`numpy` and `plt`, pre-bound and not rebindable
//! - A small set of safe builtins (no `open`, `eval`, `exec`, `__import__`, ...)
//! - Guarded item access, iteration and unpacking over known value kinds
//! - Resource limits on array sizes and captured output

use serde::{Deserialize, Serialize};

use crate::error::ExecError;
use crate::numeric::{self, ArithError, BinOp, Number};
use crate::numpy;
use crate::ops;
use crate::pyplot;
use crate::value::{CallArgs, Callable, RangeValue, Value};

/// Names that always refer to the plotting modules
pub const MODULE_NAMES: &[&str] = &["np", "numpy", "plt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    Numpy,
    Pyplot,
}

impl Module {
    pub fn from_name(name: &str) -> Option<Module> {
        match name {
            "np" | "numpy" => Some(Module::Numpy),
            "plt" => Some(Module::Pyplot),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Module::Numpy => "numpy",
            Module::Pyplot => "matplotlib.pyplot",
        }
    }

    pub fn has_member(self, attr: &str) -> bool {
        match self {
            Module::Numpy => numpy::has_member(attr),
            Module::Pyplot => pyplot::has_function(attr),
        }
    }

    pub fn attribute(self, attr: &str) -> Option<Value> {
        match self {
            Module::Numpy => numpy::attribute(attr),
            Module::Pyplot => pyplot::has_function(attr)
                .then(|| Value::Function(Callable::Pyplot(attr.to_string()))),
        }
    }
}

/// Resource limits enforced by the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Largest array or materialized sequence a program may build
    pub max_array_len: usize,
    /// Cap on text captured from `print`
    pub max_output_bytes: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_array_len: 1_000_000,
            max_output_bytes: 64 * 1024,
        }
    }
}

impl SandboxLimits {
    pub fn check_array_len(&self, len: usize) -> Result<(), ExecError> {
        if len > self.max_array_len {
            return Err(self.array_too_large(len as u128));
        }
        Ok(())
    }

    pub fn array_too_large(&self, len: u128) -> ExecError {
        ExecError::Limit(format!(
            "sequence of {} elements exceeds the limit of {}",
            len, self.max_array_len
        ))
    }
}

// ============ Builtins ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Range,
    Len,
    Abs,
    Min,
    Max,
    Round,
    Sum,
    Int,
    Float,
    Str,
    Bool,
    List,
    Tuple,
    Zip,
    Enumerate,
    Print,
}

const BUILTINS: &[(&str, Builtin)] = &[
    ("range", Builtin::Range),
    ("len", Builtin::Len),
    ("abs", Builtin::Abs),
    ("min", Builtin::Min),
    ("max", Builtin::Max),
    ("round", Builtin::Round),
    ("sum", Builtin::Sum),
    ("int", Builtin::Int),
    ("float", Builtin::Float),
    ("str", Builtin::Str),
    ("bool", Builtin::Bool),
    ("list", Builtin::List),
    ("tuple", Builtin::Tuple),
    ("zip", Builtin::Zip),
    ("enumerate", Builtin::Enumerate),
    ("print", Builtin::Print),
];

impl Builtin {
    pub fn lookup(name: &str) -> Option<Builtin> {
        BUILTINS.iter().find(|(n, _)| *n == name).map(|(_, b)| *b)
    }

    pub fn name(self) -> &'static str {
        BUILTINS
            .iter()
            .find(|(_, b)| *b == self)
            .map(|(n, _)| *n)
            .unwrap_or("builtin")
    }
}

pub fn call_builtin(
    builtin: Builtin,
    args: &CallArgs,
    limits: &SandboxLimits,
    stdout: &mut String,
) -> Result<Value, ExecError> {
    match builtin {
        Builtin::Range => {
            args.check_arity(1, 3)?;
            args.check_keywords(&[])?;
            let ints = args.positional.iter().map(Value::to_i64).collect::<Result<Vec<_>, _>>()?;
            let range = match ints.as_slice() {
                [stop] => RangeValue::new(0, *stop, 1)?,
                [start, stop] => RangeValue::new(*start, *stop, 1)?,
                [start, stop, step] => RangeValue::new(*start, *stop, *step)?,
                _ => unreachable!("arity checked above"),
            };
            Ok(Value::Range(range))
        }
        Builtin::Len => {
            args.check_arity(1, 1)?;
            let n = match &args.positional[0] {
                Value::Str(s) => s.chars().count(),
                Value::List(items) | Value::Tuple(items) => items.len(),
                Value::Array(a) => a.len(),
                Value::Range(r) => r.len(),
                other => {
                    return Err(ExecError::type_error(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )))
                }
            };
            Ok(Value::Int(n as i64))
        }
        Builtin::Abs => {
            args.check_arity(1, 1)?;
            match &args.positional[0] {
                Value::Array(a) => Ok(Value::Array(a.map(f64::abs))),
                other => match other.as_number() {
                    Some(Number::Int(i)) => i
                        .checked_abs()
                        .map(Value::Int)
                        .ok_or(ExecError::Arith(ArithError::Overflow("integer result too large"))),
                    Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
                    None => Err(ExecError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                },
            }
        }
        Builtin::Min | Builtin::Max => {
            args.check_keywords(&[])?;
            let candidates = match args.positional.as_slice() {
                [] => return Err(ExecError::type_error(format!("{} expected at least 1 argument", builtin.name()))),
                [single] => materialize(single, limits)?,
                many => many.to_vec(),
            };
            let want = if builtin == Builtin::Max { ops::CmpOp::Gt } else { ops::CmpOp::Lt };
            let mut iter = candidates.into_iter();
            let mut best = iter.next().ok_or_else(|| {
                ExecError::value_error(format!("{}() arg is an empty sequence", builtin.name()))
            })?;
            for candidate in iter {
                if ops::compare(want, &candidate, &best)?.truthy()? {
                    best = candidate;
                }
            }
            Ok(best)
        }
        Builtin::Round => {
            args.check_arity(1, 2)?;
            let value = args.require(0, "number")?;
            match args.get(1, "ndigits") {
                None | Some(Value::None) => round_to_int(value),
                Some(digits) => {
                    let digits = digits.to_i64()?;
                    match value.as_number() {
                        Some(Number::Int(i)) => Ok(Value::Int(i)),
                        Some(Number::Float(f)) => {
                            let digits = u32::try_from(digits).map_err(|_| {
                                ExecError::value_error("negative ndigits are not supported")
                            })?;
                            Ok(Value::Float(numeric::round_to(f, digits)))
                        }
                        None => Err(ExecError::type_error(format!(
                            "type {} doesn't define __round__ method",
                            value.type_name()
                        ))),
                    }
                }
            }
        }
        Builtin::Sum => {
            args.check_arity(1, 2)?;
            let mut total = args.get(1, "start").cloned().unwrap_or(Value::Int(0));
            for item in materialize(&args.positional[0], limits)? {
                total = ops::binary(BinOp::Add, &total, &item, limits)?;
            }
            Ok(total)
        }
        Builtin::Int => {
            args.check_arity(0, 1)?;
            match args.positional.first() {
                None => Ok(Value::Int(0)),
                Some(Value::Str(s)) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    ExecError::value_error(format!("invalid literal for int() with base 10: '{}'", s))
                }),
                Some(other) => match other.as_number() {
                    Some(Number::Int(i)) => Ok(Value::Int(i)),
                    Some(Number::Float(f)) => float_to_int(f.trunc()),
                    None => Err(ExecError::type_error(format!(
                        "int() argument must be a string or a real number, not '{}'",
                        other.type_name()
                    ))),
                },
            }
        }
        Builtin::Float => {
            args.check_arity(0, 1)?;
            match args.positional.first() {
                None => Ok(Value::Float(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Float),
                Some(other) => other.to_f64().map(Value::Float),
            }
        }
        Builtin::Str => {
            args.check_arity(0, 1)?;
            Ok(Value::Str(args.positional.first().map(Value::to_display).unwrap_or_default()))
        }
        Builtin::Bool => {
            args.check_arity(0, 1)?;
            match args.positional.first() {
                None => Ok(Value::Bool(false)),
                Some(v) => Ok(Value::Bool(v.truthy()?)),
            }
        }
        Builtin::List | Builtin::Tuple => {
            args.check_arity(0, 1)?;
            let items = match args.positional.first() {
                None => Vec::new(),
                Some(v) => materialize(v, limits)?,
            };
            Ok(if builtin == Builtin::List { Value::List(items) } else { Value::Tuple(items) })
        }
        Builtin::Zip => {
            args.check_keywords(&[])?;
            let columns = args
                .positional
                .iter()
                .map(|v| materialize(v, limits))
                .collect::<Result<Vec<_>, _>>()?;
            let n = columns.iter().map(Vec::len).min().unwrap_or(0);
            let rows = (0..n)
                .map(|i| Value::Tuple(columns.iter().map(|c| c[i].clone()).collect()))
                .collect();
            Ok(Value::List(rows))
        }
        Builtin::Enumerate => {
            args.check_arity(1, 2)?;
            let start = args.get(1, "start").map_or(Ok(0), Value::to_i64)?;
            let rows = materialize(&args.positional[0], limits)?
                .into_iter()
                .enumerate()
                .map(|(i, v)| Value::Tuple(vec![Value::Int(start + i as i64), v]))
                .collect();
            Ok(Value::List(rows))
        }
        Builtin::Print => {
            args.check_keywords(&["sep", "end"])?;
            let sep = args.keyword("sep").map_or_else(|| " ".to_string(), Value::to_display);
            let end = args.keyword("end").map_or_else(|| "\n".to_string(), Value::to_display);
            let line: Vec<String> = args.positional.iter().map(Value::to_display).collect();
            let text = format!("{}{}", line.join(&sep), end);
            if stdout.len() + text.len() > limits.max_output_bytes {
                return Err(ExecError::Limit(format!(
                    "printed output exceeds {} bytes",
                    limits.max_output_bytes
                )));
            }
            stdout.push_str(&text);
            Ok(Value::None)
        }
    }
}

fn round_to_int(value: &Value) -> Result<Value, ExecError> {
    match value.as_number() {
        Some(Number::Int(i)) => Ok(Value::Int(i)),
        Some(Number::Float(f)) => float_to_int(f.round_ties_even()),
        None => Err(ExecError::type_error(format!(
            "type {} doesn't define __round__ method",
            value.type_name()
        ))),
    }
}

fn float_to_int(f: f64) -> Result<Value, ExecError> {
    if f.is_nan() {
        return Err(ExecError::value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() || f.abs() >= 9.2e18 {
        return Err(ExecError::Arith(ArithError::Overflow(
            "cannot convert float infinity to integer",
        )));
    }
    Ok(Value::Int(f as i64))
}

fn parse_float(s: &str) -> Result<f64, ExecError> {
    let trimmed = s.trim();
    let parsed = match trimmed.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" => Ok(f64::INFINITY),
        "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
        "nan" | "+nan" | "-nan" => Ok(f64::NAN),
        _ => trimmed.parse::<f64>(),
    };
    parsed.map_err(|_| ExecError::value_error(format!("could not convert string to float: '{}'", s)))
}

// ============ Guards ============

/// An evaluated subscript
#[derive(Debug, Clone, PartialEq)]
pub enum IndexValue {
    Item(Value),
    Slice(Option<i64>, Option<i64>, Option<i64>),
    Multi(Vec<IndexValue>),
}

/// Map a possibly negative index onto `0..len`
pub fn normalize_index(index: i64, len: usize, kind: &str) -> Result<usize, ExecError> {
    let len_i = len as i64;
    let i = if index < 0 { index + len_i } else { index };
    if i < 0 || i >= len_i {
        return Err(ExecError::Index(format!("{} index out of range", kind)));
    }
    Ok(i as usize)
}

/// Positions selected by `[start:stop:step]` on a sequence of length `len`
pub fn slice_positions(
    len: usize,
    start: Option<i64>,
    stop: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<usize>, ExecError> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(ExecError::value_error("slice step cannot be zero"));
    }
    let len = len as i64;
    let mut positions = Vec::new();
    if step > 0 {
        let clamp = |v: i64| if v < 0 { (v + len).max(0) } else { v.min(len) };
        let start = start.map_or(0, clamp);
        let stop = stop.map_or(len, clamp);
        let mut i = start;
        while i < stop {
            positions.push(i as usize);
            i += step;
        }
    } else {
        let clamp = |v: i64| if v < 0 { (v + len).max(-1) } else { v.min(len - 1) };
        let start = start.map_or(len - 1, clamp);
        let stop = stop.map_or(-1, clamp);
        let mut i = start;
        while i > stop {
            positions.push(i as usize);
            i += step;
        }
    }
    Ok(positions)
}

/// `value[index]`, defined only for sequences and arrays
pub fn guarded_getitem(value: &Value, index: &IndexValue) -> Result<Value, ExecError> {
    match value {
        Value::Array(a) => a.select(index),
        Value::List(items) | Value::Tuple(items) => match index {
            IndexValue::Item(i) => {
                let kind = if matches!(value, Value::List(_)) { "list" } else { "tuple" };
                Ok(items[normalize_index(i.to_i64()?, items.len(), kind)?].clone())
            }
            IndexValue::Slice(start, stop, step) => {
                let picked = slice_positions(items.len(), *start, *stop, *step)?
                    .into_iter()
                    .map(|p| items[p].clone())
                    .collect();
                Ok(if matches!(value, Value::List(_)) { Value::List(picked) } else { Value::Tuple(picked) })
            }
            IndexValue::Multi(_) => Err(ExecError::type_error(format!(
                "{} indices must be integers or slices, not tuple",
                value.type_name()
            ))),
        },
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            match index {
                IndexValue::Item(i) => {
                    Ok(Value::Str(chars[normalize_index(i.to_i64()?, chars.len(), "string")?].to_string()))
                }
                IndexValue::Slice(start, stop, step) => Ok(Value::Str(
                    slice_positions(chars.len(), *start, *stop, *step)?
                        .into_iter()
                        .map(|p| chars[p])
                        .collect(),
                )),
                IndexValue::Multi(_) => Err(ExecError::type_error("string indices must be integers")),
            }
        }
        Value::Range(r) => match index {
            IndexValue::Item(i) => {
                let pos = normalize_index(i.to_i64()?, r.len(), "range object")?;
                r.get(pos).map(Value::Int).ok_or_else(|| ExecError::Index("range object index out of range".into()))
            }
            _ => Err(ExecError::type_error("range indices must be integers")),
        },
        other => Err(ExecError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// `for x in value`: a lazy iterator over the known iterable kinds
pub fn guarded_iter(value: Value) -> Result<Box<dyn Iterator<Item = Value>>, ExecError> {
    match value {
        Value::List(items) | Value::Tuple(items) => Ok(Box::new(items.into_iter())),
        Value::Str(s) => {
            let chars: Vec<Value> = s.chars().map(|c| Value::Str(c.to_string())).collect();
            Ok(Box::new(chars.into_iter()))
        }
        Value::Array(a) => Ok(Box::new(a.items().into_iter())),
        Value::Range(r) => Ok(Box::new(r.iter().map(Value::Int))),
        other => Err(ExecError::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

/// Collect an iterable into a vector, bounded by the array limit
pub fn materialize(value: &Value, limits: &SandboxLimits) -> Result<Vec<Value>, ExecError> {
    if let Value::Range(r) = value {
        limits.check_array_len(r.len())?;
    }
    Ok(guarded_iter(value.clone())?.collect())
}

/// `a, b = value`
pub fn unpack(value: Value, count: usize, limits: &SandboxLimits) -> Result<Vec<Value>, ExecError> {
    let items = materialize(&value, limits)?;
    if items.len() != count {
        let msg = if items.len() > count {
            format!("too many values to unpack (expected {})", count)
        } else {
            format!("not enough values to unpack (expected {}, got {})", count, items.len())
        };
        return Err(ExecError::value_error(msg));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(builtin: Builtin, positional: Vec<Value>) -> Result<Value, ExecError> {
        let mut out = String::new();
        call_builtin(
            builtin,
            &CallArgs::new(builtin.name(), positional, Vec::new()),
            &SandboxLimits::default(),
            &mut out,
        )
    }

    #[test]
    fn test_builtin_lookup_excludes_dangerous_names() {
        for name in ["open", "eval", "exec", "compile", "__import__", "getattr", "globals", "input"] {
            assert!(Builtin::lookup(name).is_none(), "{} must not be a builtin", name);
        }
        assert_eq!(Builtin::lookup("range"), Some(Builtin::Range));
        assert_eq!(Builtin::Enumerate.name(), "enumerate");
    }

    #[test]
    fn test_round_is_half_to_even() {
        assert_eq!(run(Builtin::Round, vec![Value::Float(2.5)]).unwrap(), Value::Int(2));
        assert_eq!(run(Builtin::Round, vec![Value::Float(3.5)]).unwrap(), Value::Int(4));
        assert_eq!(
            run(Builtin::Round, vec![Value::Float(3.14159), Value::Int(2)]).unwrap(),
            Value::Float(3.14)
        );
    }

    #[test]
    fn test_min_max_sum() {
        let xs = Value::List(vec![Value::Int(3), Value::Float(1.5), Value::Int(2)]);
        assert_eq!(run(Builtin::Min, vec![xs.clone()]).unwrap(), Value::Float(1.5));
        assert_eq!(run(Builtin::Max, vec![Value::Int(1), Value::Int(7)]).unwrap(), Value::Int(7));
        assert_eq!(run(Builtin::Sum, vec![xs]).unwrap(), Value::Float(6.5));
        assert!(run(Builtin::Max, vec![Value::List(Vec::new())]).is_err());
    }

    #[test]
    fn test_print_is_captured_and_capped() {
        let limits = SandboxLimits {
            max_output_bytes: 8,
            ..SandboxLimits::default()
        };
        let mut out = String::new();
        let args = CallArgs::new("print", vec![Value::Str("hi".into()), Value::Int(1)], Vec::new());
        call_builtin(Builtin::Print, &args, &limits, &mut out).unwrap();
        assert_eq!(out, "hi 1\n");
        assert!(matches!(
            call_builtin(Builtin::Print, &args, &limits, &mut out),
            Err(ExecError::Limit(_))
        ));
    }

    #[test]
    fn test_slices_follow_python_rules() {
        assert_eq!(slice_positions(5, None, None, Some(-1)).unwrap(), vec![4, 3, 2, 1, 0]);
        assert_eq!(slice_positions(5, Some(1), Some(-1), None).unwrap(), vec![1, 2, 3]);
        assert_eq!(slice_positions(3, Some(10), None, None).unwrap(), Vec::<usize>::new());
        assert!(slice_positions(3, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_getitem_guards() {
        let xs = Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(guarded_getitem(&xs, &IndexValue::Item(Value::Int(-1))).unwrap(), Value::Int(3));
        assert!(matches!(
            guarded_getitem(&xs, &IndexValue::Item(Value::Int(3))),
            Err(ExecError::Index(_))
        ));
        assert!(guarded_getitem(&Value::Int(5), &IndexValue::Item(Value::Int(0))).is_err());
        assert!(guarded_getitem(&Value::Module(Module::Numpy), &IndexValue::Item(Value::Int(0))).is_err());
    }

    #[test]
    fn test_materializing_huge_range_hits_limit() {
        let limits = SandboxLimits {
            max_array_len: 100,
            ..SandboxLimits::default()
        };
        let huge = Value::Range(RangeValue::new(0, 1_000_000_000, 1).unwrap());
        assert!(matches!(materialize(&huge, &limits), Err(ExecError::Limit(_))));
        assert!(guarded_iter(huge).is_ok());
    }

    #[test]
    fn test_string_concatenation_hits_limit() {
        let limits = SandboxLimits {
            max_array_len: 100,
            ..SandboxLimits::default()
        };
        let half = Value::Str("a".repeat(60));
        assert!(matches!(
            ops::binary(BinOp::Add, &half, &half, &limits),
            Err(ExecError::Limit(_))
        ));
        let short = Value::Str("ab".into());
        assert_eq!(
            ops::binary(BinOp::Add, &short, &short, &limits).unwrap(),
            Value::Str("abab".into())
        );
    }

    #[test]
    fn test_unpack_counts() {
        let pair = Value::Tuple(vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(unpack(pair.clone(), 2, &SandboxLimits::default()).unwrap().len(), 2);
        assert!(unpack(pair, 3, &SandboxLimits::default()).is_err());
    }
}
