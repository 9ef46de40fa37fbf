//! Runtime values of the graph interpreter

use crate::error::ExecError;
use crate::numeric::{python_float_repr, Number};
use crate::numpy::NdArray;
use crate::sandbox::{Builtin, Module};

/// Something the program can call. Only these three kinds exist: there is no
/// way for graph code to define or obtain any other callable.
#[derive(Debug, Clone, PartialEq)]
pub enum Callable {
    Builtin(Builtin),
    Numpy(String),
    Pyplot(String),
}

/// A lazy `range(start, stop, step)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeValue {
    pub fn new(start: i64, stop: i64, step: i64) -> Result<Self, ExecError> {
        if step == 0 {
            return Err(ExecError::value_error("range() arg 3 must not be zero"));
        }
        Ok(Self { start, stop, step })
    }

    pub fn len(&self) -> usize {
        let (start, stop, step) = (self.start as i128, self.stop as i128, self.step as i128);
        let span = if step > 0 { stop - start } else { start - stop };
        if span <= 0 {
            return 0;
        }
        let step = step.abs();
        ((span + step - 1) / step) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        Some(self.start + self.step * index as i64)
    }

    pub fn iter(self) -> impl Iterator<Item = i64> {
        (0..self.len()).map(move |i| self.start + self.step * i as i64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tuple(Vec<Value>),
    Array(NdArray),
    Range(RangeValue),
    Module(Module),
    Function(Callable),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Array(_) => "numpy.ndarray",
            Value::Range(_) => "range",
            Value::Module(_) => "module",
            Value::Function(_) => "builtin_function_or_method",
        }
    }

    /// Scalar numeric view; bools count as integers
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Bool(b) => Some(Number::Int(i64::from(*b))),
            Value::Int(i) => Some(Number::Int(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    pub fn from_number(number: Number) -> Self {
        match number {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
        }
    }

    pub fn to_f64(&self) -> Result<f64, ExecError> {
        self.as_number().map(Number::as_f64).ok_or_else(|| {
            ExecError::type_error(format!("must be real number, not {}", self.type_name()))
        })
    }

    pub fn to_i64(&self) -> Result<i64, ExecError> {
        match self {
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Int(i) => Ok(*i),
            other => Err(ExecError::type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))),
        }
    }

    pub fn truthy(&self) -> Result<bool, ExecError> {
        Ok(match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) | Value::Tuple(items) => !items.is_empty(),
            Value::Range(r) => !r.is_empty(),
            Value::Array(a) => match a.data().len() {
                0 => false,
                1 => a.data()[0] != 0.0,
                _ => {
                    return Err(ExecError::value_error(
                        "The truth value of an array with more than one element is ambiguous",
                    ))
                }
            },
            Value::Module(_) | Value::Function(_) => true,
        })
    }

    /// `str(value)`
    pub fn to_display(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            other => other.repr(),
        }
    }

    /// `repr(value)`
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => python_float_repr(*f),
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::List(items) => {
                let inner: Vec<String> = items.iter().map(Value::repr).collect();
                format!("[{}]", inner.join(", "))
            }
            Value::Tuple(items) => {
                let inner: Vec<String> = items.iter().map(Value::repr).collect();
                if inner.len() == 1 {
                    format!("({},)", inner[0])
                } else {
                    format!("({})", inner.join(", "))
                }
            }
            Value::Array(a) => a.repr(),
            Value::Range(r) => {
                if r.step == 1 {
                    format!("range({}, {})", r.start, r.stop)
                } else {
                    format!("range({}, {}, {})", r.start, r.stop, r.step)
                }
            }
            Value::Module(m) => format!("<module '{}'>", m.name()),
            Value::Function(Callable::Builtin(b)) => format!("<built-in function {}>", b.name()),
            Value::Function(Callable::Numpy(name)) => format!("<function numpy.{}>", name),
            Value::Function(Callable::Pyplot(name)) => {
                format!("<function matplotlib.pyplot.{}>", name)
            }
        }
    }
}

/// Arguments of one call, as evaluated by the interpreter
#[derive(Debug, Clone)]
pub struct CallArgs {
    pub func: String,
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn new(func: impl Into<String>, positional: Vec<Value>, keywords: Vec<(String, Value)>) -> Self {
        Self {
            func: func.into(),
            positional,
            keywords,
        }
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Argument by position, or by keyword when given that way
    pub fn get(&self, index: usize, keyword: &str) -> Option<&Value> {
        self.keyword(keyword).or_else(|| self.positional.get(index))
    }

    pub fn require(&self, index: usize, keyword: &str) -> Result<&Value, ExecError> {
        self.get(index, keyword).ok_or_else(|| {
            ExecError::type_error(format!(
                "{}() missing required argument '{}' (pos {})",
                self.func,
                keyword,
                index + 1
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty()
    }

    pub fn check_arity(&self, min: usize, max: usize) -> Result<(), ExecError> {
        let n = self.positional.len();
        if n < min || n > max {
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            };
            return Err(ExecError::type_error(format!(
                "{}() takes {} positional arguments but {} were given",
                self.func, expected, n
            )));
        }
        Ok(())
    }

    pub fn check_keywords(&self, allowed: &[&str]) -> Result<(), ExecError> {
        match self.keywords.iter().find(|(k, _)| !allowed.contains(&k.as_str())) {
            Some((k, _)) => Err(ExecError::type_error(format!(
                "{}() got an unexpected keyword argument '{}'",
                self.func, k
            ))),
            None => Ok(()),
        }
    }

    pub fn f64_or(&self, index: usize, keyword: &str, default: f64) -> Result<f64, ExecError> {
        self.get(index, keyword).map_or(Ok(default), Value::to_f64)
    }

    pub fn string(&self, index: usize, keyword: &str) -> Option<String> {
        self.get(index, keyword).map(Value::to_display)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_len_and_items() {
        let r = RangeValue::new(0, 10, 3).unwrap();
        assert_eq!(r.len(), 4);
        assert_eq!(r.iter().collect::<Vec<_>>(), vec![0, 3, 6, 9]);

        let down = RangeValue::new(5, 0, -2).unwrap();
        assert_eq!(down.iter().collect::<Vec<_>>(), vec![5, 3, 1]);
        assert!(RangeValue::new(3, 3, 1).unwrap().is_empty());
        assert!(RangeValue::new(0, 1, 0).is_err());
    }

    #[test]
    fn test_repr_matches_python() {
        let v = Value::List(vec![
            Value::Int(1),
            Value::Float(2.0),
            Value::Str("a".to_string()),
            Value::Bool(true),
            Value::None,
        ]);
        assert_eq!(v.repr(), "[1, 2.0, 'a', True, None]");
        assert_eq!(Value::Tuple(vec![Value::Int(1)]).repr(), "(1,)");
        assert_eq!(Value::Str("plain".to_string()).to_display(), "plain");
    }

    #[test]
    fn test_call_args_lookup() {
        let args = CallArgs::new(
            "plot",
            vec![Value::Int(1)],
            vec![("label".to_string(), Value::Str("x".to_string()))],
        );
        assert_eq!(args.get(0, "x"), Some(&Value::Int(1)));
        assert_eq!(args.string(5, "label").as_deref(), Some("x"));
        assert!(args.check_keywords(&["label"]).is_ok());
        assert!(args.check_keywords(&["color"]).is_err());
        assert!(args.require(1, "y").is_err());
    }
}
