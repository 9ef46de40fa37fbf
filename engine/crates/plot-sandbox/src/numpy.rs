//! The `np` module: a small float-array library for plotting code
//!
//! Arrays are one or two dimensional and always hold `f64`. Elementwise math
//! follows numpy rather than Python scalars: invalid inputs give NaN or inf
//! instead of raising.

use crate::error::ExecError;
use crate::numeric::{float_mod, python_float_repr, round_to, BinOp};
use crate::sandbox::{slice_positions, IndexValue, SandboxLimits};
use crate::value::{CallArgs, Callable, Value};

const CONSTANTS: &[(&str, f64)] = &[
    ("pi", std::f64::consts::PI),
    ("e", std::f64::consts::E),
    ("inf", f64::INFINITY),
    ("nan", f64::NAN),
];

const FUNCTIONS: &[&str] = &[
    "linspace", "arange", "array", "asarray", "zeros", "ones", "zeros_like", "ones_like",
    "full", "meshgrid", "sin", "cos", "tan", "arcsin", "arccos", "arctan", "arctan2", "sinh",
    "cosh", "tanh", "exp", "log", "log10", "log2", "sqrt", "abs", "absolute", "floor", "ceil",
    "sign", "square", "power", "maximum", "minimum", "hypot", "degrees", "radians", "round",
    "around", "clip", "where", "sum", "mean", "max", "min", "cumsum",
];

pub fn has_member(name: &str) -> bool {
    CONSTANTS.iter().any(|(n, _)| *n == name) || FUNCTIONS.contains(&name)
}

/// Value of `np.<name>`
pub fn attribute(name: &str) -> Option<Value> {
    if let Some((_, v)) = CONSTANTS.iter().find(|(n, _)| *n == name) {
        return Some(Value::Float(*v));
    }
    FUNCTIONS
        .contains(&name)
        .then(|| Value::Function(Callable::Numpy(name.to_string())))
}

// ============ Array type ============

#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    data: Vec<f64>,
    shape: Vec<usize>,
}

impl NdArray {
    pub fn vector(data: Vec<f64>) -> Self {
        let shape = vec![data.len()];
        Self { data, shape }
    }

    pub fn matrix(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, ExecError> {
        if rows * cols != data.len() {
            return Err(ExecError::value_error(format!(
                "cannot reshape array of size {} into shape ({}, {})",
                data.len(),
                rows,
                cols
            )));
        }
        Ok(Self {
            data,
            shape: vec![rows, cols],
        })
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Length along the first axis, as `len(a)`
    pub fn len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn cols(&self) -> usize {
        if self.ndim() == 2 {
            self.shape[1]
        } else {
            1
        }
    }

    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            data: self.data.iter().map(|&x| f(x)).collect(),
            shape: self.shape.clone(),
        }
    }

    /// Elements along the first axis: scalars for a vector, rows for a matrix
    pub fn items(&self) -> Vec<Value> {
        if self.ndim() == 2 {
            self.data
                .chunks(self.cols().max(1))
                .take(self.len())
                .map(|row| Value::Array(NdArray::vector(row.to_vec())))
                .collect()
        } else {
            self.data.iter().map(|&x| Value::Float(x)).collect()
        }
    }

    /// Combine two arrays elementwise. Equal shapes, single-element operands
    /// and a row vector against a matrix broadcast.
    pub fn broadcast(&self, other: &NdArray, f: impl Fn(f64, f64) -> f64) -> Result<Self, ExecError> {
        if self.shape == other.shape {
            let data = self.data.iter().zip(&other.data).map(|(&a, &b)| f(a, b)).collect();
            return Ok(Self {
                data,
                shape: self.shape.clone(),
            });
        }
        if other.data.len() == 1 {
            let b = other.data[0];
            return Ok(self.map(|a| f(a, b)));
        }
        if self.data.len() == 1 {
            let a = self.data[0];
            return Ok(other.map(|b| f(a, b)));
        }
        if self.ndim() == 2 && other.ndim() == 1 && other.shape[0] == self.shape[1] {
            let cols = self.shape[1];
            let data = self
                .data
                .iter()
                .enumerate()
                .map(|(i, &a)| f(a, other.data[i % cols]))
                .collect();
            return Ok(Self {
                data,
                shape: self.shape.clone(),
            });
        }
        if self.ndim() == 1 && other.ndim() == 2 && self.shape[0] == other.shape[1] {
            let cols = other.shape[1];
            let data = other
                .data
                .iter()
                .enumerate()
                .map(|(i, &b)| f(self.data[i % cols], b))
                .collect();
            return Ok(Self {
                data,
                shape: other.shape.clone(),
            });
        }
        Err(ExecError::value_error(format!(
            "operands could not be broadcast together with shapes {} {}",
            shape_repr(&self.shape),
            shape_repr(&other.shape)
        )))
    }

    pub fn repr(&self) -> String {
        let fmt_row = |row: &[f64]| {
            row.iter().map(|&x| python_float_repr(x)).collect::<Vec<_>>().join(", ")
        };
        if self.ndim() == 2 {
            let rows: Vec<String> = self
                .data
                .chunks(self.cols().max(1))
                .take(self.len())
                .map(|row| format!("[{}]", fmt_row(row)))
                .collect();
            format!("array([{}])", rows.join(", "))
        } else {
            format!("array([{}])", fmt_row(&self.data))
        }
    }

    /// `a[index]` for integer, slice and `a[i, j]`-style indices
    pub fn select(&self, index: &IndexValue) -> Result<Value, ExecError> {
        let parts: Vec<&IndexValue> = match index {
            IndexValue::Multi(parts) => parts.iter().collect(),
            single => vec![single],
        };
        if parts.len() > self.ndim() {
            return Err(ExecError::Index(format!(
                "too many indices for array: array is {}-dimensional, but {} were indexed",
                self.ndim(),
                parts.len()
            )));
        }

        let mut axes: Vec<(Vec<usize>, bool)> = Vec::with_capacity(self.ndim());
        for (axis, &dim) in self.shape.iter().enumerate() {
            match parts.get(axis) {
                None => axes.push(((0..dim).collect(), true)),
                Some(IndexValue::Slice(start, stop, step)) => {
                    axes.push((slice_positions(dim, *start, *stop, *step)?, true))
                }
                Some(IndexValue::Item(value)) => {
                    let i = crate::sandbox::normalize_index(value.to_i64()?, dim, "array")?;
                    axes.push((vec![i], false));
                }
                Some(IndexValue::Multi(_)) => {
                    return Err(ExecError::Index("nested index tuples are not supported".into()))
                }
            }
        }

        let cols = self.cols();
        let mut data = Vec::new();
        let kept: Vec<usize> = axes.iter().filter(|(_, keep)| *keep).map(|(p, _)| p.len()).collect();
        match axes.as_slice() {
            [(rows, _)] => data.extend(rows.iter().map(|&r| self.data[r])),
            [(rows, _), (columns, _)] => {
                for &r in rows {
                    data.extend(columns.iter().map(|&c| self.data[r * cols + c]));
                }
            }
            _ => return Err(ExecError::Index("unsupported array rank".into())),
        }

        match kept.as_slice() {
            [] => Ok(Value::Float(data[0])),
            [_] => Ok(Value::Array(NdArray::vector(data))),
            [r, c] => Ok(Value::Array(NdArray::matrix(*r, *c, data)?)),
            _ => Err(ExecError::Index("unsupported array rank".into())),
        }
    }
}

impl NdArray {
    /// `a[index] = value` for a single element
    pub fn set_item(&mut self, index: &IndexValue, value: f64) -> Result<(), ExecError> {
        let flat = match (index, self.shape.as_slice()) {
            (IndexValue::Item(i), [len]) => crate::sandbox::normalize_index(i.to_i64()?, *len, "array")?,
            (IndexValue::Multi(parts), [rows, cols]) => match parts.as_slice() {
                [IndexValue::Item(r), IndexValue::Item(c)] => {
                    let r = crate::sandbox::normalize_index(r.to_i64()?, *rows, "array")?;
                    let c = crate::sandbox::normalize_index(c.to_i64()?, *cols, "array")?;
                    r * cols + c
                }
                _ => return Err(ExecError::Index("only scalar element assignment is supported".into())),
            },
            _ => return Err(ExecError::Index("only scalar element assignment is supported".into())),
        };
        self.data[flat] = value;
        Ok(())
    }
}

fn shape_repr(shape: &[usize]) -> String {
    match shape {
        [n] => format!("({},)", n),
        _ => format!(
            "({})",
            shape.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(",")
        ),
    }
}

/// numpy elementwise arithmetic: never raises, division by zero gives inf/nan
pub fn array_binop(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::FloorDiv => (a / b).floor(),
        BinOp::Mod => {
            if b == 0.0 {
                f64::NAN
            } else {
                float_mod(a, b)
            }
        }
        BinOp::Pow => a.powf(b),
    }
}

/// Convert a value to an array (`np.asarray`)
pub fn to_array(value: &Value) -> Result<NdArray, ExecError> {
    match value {
        Value::Array(a) => Ok(a.clone()),
        Value::Range(r) => Ok(NdArray::vector(r.iter().map(|i| i as f64).collect())),
        Value::List(items) | Value::Tuple(items) => {
            if items.iter().all(|v| v.as_number().is_some()) {
                let data = items.iter().map(Value::to_f64).collect::<Result<Vec<_>, _>>()?;
                return Ok(NdArray::vector(data));
            }
            let rows = items.iter().map(to_array).collect::<Result<Vec<_>, _>>()?;
            let cols = rows[0].data.len();
            if rows.iter().any(|r| r.ndim() != 1 || r.data.len() != cols) {
                return Err(ExecError::value_error(
                    "setting an array element with a sequence: inhomogeneous shape",
                ));
            }
            let n = rows.len();
            let data = rows.into_iter().flat_map(NdArray::into_data).collect();
            NdArray::matrix(n, cols, data)
        }
        other => match other.as_number() {
            Some(n) => Ok(NdArray::vector(vec![n.as_f64()])),
            None => Err(ExecError::type_error(format!(
                "cannot convert '{}' to an array",
                other.type_name()
            ))),
        },
    }
}

// ============ Function dispatch ============

pub fn call(name: &str, args: &CallArgs, limits: &SandboxLimits) -> Result<Value, ExecError> {
    match name {
        "linspace" => linspace(args, limits),
        "arange" => arange(args, limits),
        "array" | "asarray" => {
            args.check_arity(1, 1)?;
            args.check_keywords(&["dtype"])?;
            Ok(Value::Array(to_array(&args.positional[0])?))
        }
        "zeros" | "ones" | "full" => filled(name, args, limits),
        "zeros_like" | "ones_like" => {
            args.check_arity(1, 1)?;
            let fill = if name == "ones_like" { 1.0 } else { 0.0 };
            Ok(Value::Array(to_array(&args.positional[0])?.map(|_| fill)))
        }
        "meshgrid" => meshgrid(args, limits),

        "sin" => unary(args, f64::sin),
        "cos" => unary(args, f64::cos),
        "tan" => unary(args, f64::tan),
        "arcsin" => unary(args, f64::asin),
        "arccos" => unary(args, f64::acos),
        "arctan" => unary(args, f64::atan),
        "sinh" => unary(args, f64::sinh),
        "cosh" => unary(args, f64::cosh),
        "tanh" => unary(args, f64::tanh),
        "exp" => unary(args, f64::exp),
        "log" => unary(args, f64::ln),
        "log10" => unary(args, f64::log10),
        "log2" => unary(args, f64::log2),
        "sqrt" => unary(args, f64::sqrt),
        "abs" | "absolute" => unary(args, f64::abs),
        "floor" => unary(args, f64::floor),
        "ceil" => unary(args, f64::ceil),
        "square" => unary(args, |x| x * x),
        "degrees" => unary(args, f64::to_degrees),
        "radians" => unary(args, f64::to_radians),
        "sign" => unary(args, |x| {
            if x.is_nan() {
                f64::NAN
            } else if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            }
        }),
        "round" | "around" => {
            let decimals = args.get(1, "decimals").map_or(Ok(0), Value::to_i64)?;
            let digits = u32::try_from(decimals).map_err(|_| {
                ExecError::value_error("negative decimals are not supported")
            })?;
            let first = CallArgs::new(name, args.positional.iter().take(1).cloned().collect(), Vec::new());
            unary(&first, |x| round_to(x, digits))
        }

        "arctan2" => binary(args, f64::atan2),
        "power" => binary(args, f64::powf),
        "maximum" => binary(args, |a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) }),
        "minimum" => binary(args, |a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) }),
        "hypot" => binary(args, f64::hypot),

        "clip" => clip(args),
        "where" => select_where(args),

        "sum" => reduce(args, |data| Ok(data.iter().sum())),
        "mean" => reduce(args, |data| {
            Ok(if data.is_empty() {
                f64::NAN
            } else {
                data.iter().sum::<f64>() / data.len() as f64
            })
        }),
        "max" => reduce(args, |data| extreme(data, f64::max)),
        "min" => reduce(args, |data| extreme(data, f64::min)),
        "cumsum" => {
            args.check_arity(1, 1)?;
            let mut total = 0.0;
            let data = to_array(&args.positional[0])?
                .data
                .into_iter()
                .map(|x| {
                    total += x;
                    total
                })
                .collect();
            Ok(Value::Array(NdArray::vector(data)))
        }
        other => Err(ExecError::Name(format!("np.{}", other))),
    }
}

fn unary(args: &CallArgs, f: impl Fn(f64) -> f64) -> Result<Value, ExecError> {
    args.check_arity(1, 1)?;
    let value = &args.positional[0];
    match value.as_number() {
        Some(n) => Ok(Value::Float(f(n.as_f64()))),
        None => Ok(Value::Array(to_array(value)?.map(f))),
    }
}

fn binary(args: &CallArgs, f: impl Fn(f64, f64) -> f64) -> Result<Value, ExecError> {
    args.check_arity(2, 2)?;
    let (a, b) = (&args.positional[0], &args.positional[1]);
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => Ok(Value::Float(f(x.as_f64(), y.as_f64()))),
        _ => Ok(Value::Array(to_array(a)?.broadcast(&to_array(b)?, f)?)),
    }
}

fn reduce(args: &CallArgs, f: impl Fn(&[f64]) -> Result<f64, ExecError>) -> Result<Value, ExecError> {
    args.check_arity(1, 1)?;
    args.check_keywords(&[])?;
    let array = to_array(&args.positional[0])?;
    Ok(Value::Float(f(array.data())?))
}

fn extreme(data: &[f64], pick: fn(f64, f64) -> f64) -> Result<f64, ExecError> {
    let first = *data.first().ok_or_else(|| {
        ExecError::value_error("zero-size array to reduction operation which has no identity")
    })?;
    if data.iter().any(|x| x.is_nan()) {
        return Ok(f64::NAN);
    }
    Ok(data.iter().copied().fold(first, pick))
}

fn linspace(args: &CallArgs, limits: &SandboxLimits) -> Result<Value, ExecError> {
    args.check_arity(2, 3)?;
    args.check_keywords(&["num", "endpoint"])?;
    let start = args.require(0, "start")?.to_f64()?;
    let stop = args.require(1, "stop")?.to_f64()?;
    let num = args.get(2, "num").map_or(Ok(50), Value::to_i64)?;
    let num = usize::try_from(num)
        .map_err(|_| ExecError::value_error(format!("Number of samples, {}, must be non-negative.", num)))?;
    let endpoint = args.keyword("endpoint").map_or(Ok(true), Value::truthy)?;
    limits.check_array_len(num)?;

    let divisor = if endpoint { num.saturating_sub(1) } else { num };
    let step = if divisor == 0 { 0.0 } else { (stop - start) / divisor as f64 };
    let mut data: Vec<f64> = (0..num).map(|i| start + step * i as f64).collect();
    if endpoint && num > 1 {
        data[num - 1] = stop;
    }
    Ok(Value::Array(NdArray::vector(data)))
}

fn arange(args: &CallArgs, limits: &SandboxLimits) -> Result<Value, ExecError> {
    args.check_arity(1, 3)?;
    args.check_keywords(&[])?;
    let values = args.positional.iter().map(Value::to_f64).collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match values.as_slice() {
        [stop] => (0.0, *stop, 1.0),
        [start, stop] => (*start, *stop, 1.0),
        [start, stop, step] => (*start, *stop, *step),
        _ => unreachable!("arity checked above"),
    };
    if step == 0.0 || !step.is_finite() {
        return Err(ExecError::value_error("arange: step must be a finite non-zero number"));
    }
    let count = ((stop - start) / step).ceil();
    let count = if count.is_finite() && count > 0.0 { count } else { 0.0 };
    if count > limits.max_array_len as f64 {
        return Err(limits.array_too_large(count as u128));
    }
    let data = (0..count as usize).map(|i| start + step * i as f64).collect();
    Ok(Value::Array(NdArray::vector(data)))
}

fn filled(name: &str, args: &CallArgs, limits: &SandboxLimits) -> Result<Value, ExecError> {
    let (min, max) = if name == "full" { (2, 2) } else { (1, 1) };
    args.check_arity(min, max)?;
    args.check_keywords(&["dtype"])?;
    let fill = match name {
        "ones" => 1.0,
        "full" => args.positional[1].to_f64()?,
        _ => 0.0,
    };
    let shape: Vec<usize> = match &args.positional[0] {
        Value::Tuple(dims) | Value::List(dims) => dims
            .iter()
            .map(|d| d.to_i64().map(|n| n.max(0) as usize))
            .collect::<Result<_, _>>()?,
        other => vec![other.to_i64()?.max(0) as usize],
    };
    let total = shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
    let total = total.ok_or_else(|| limits.array_too_large(u128::MAX))?;
    limits.check_array_len(total)?;
    match shape.as_slice() {
        [n] => Ok(Value::Array(NdArray::vector(vec![fill; *n]))),
        [r, c] => Ok(Value::Array(NdArray::matrix(*r, *c, vec![fill; total])?)),
        _ => Err(ExecError::value_error("only 1-D and 2-D arrays are supported")),
    }
}

fn meshgrid(args: &CallArgs, limits: &SandboxLimits) -> Result<Value, ExecError> {
    args.check_arity(2, 2)?;
    let xs = to_array(&args.positional[0])?.into_data();
    let ys = to_array(&args.positional[1])?.into_data();
    let (rows, cols) = (ys.len(), xs.len());
    let total = rows.checked_mul(cols).ok_or_else(|| limits.array_too_large(u128::MAX))?;
    limits.check_array_len(total)?;

    let mut grid_x = Vec::with_capacity(total);
    let mut grid_y = Vec::with_capacity(total);
    for &y in &ys {
        grid_x.extend_from_slice(&xs);
        grid_y.extend(std::iter::repeat(y).take(cols));
    }
    Ok(Value::Tuple(vec![
        Value::Array(NdArray::matrix(rows, cols, grid_x)?),
        Value::Array(NdArray::matrix(rows, cols, grid_y)?),
    ]))
}

fn clip(args: &CallArgs) -> Result<Value, ExecError> {
    args.check_arity(3, 3)?;
    let lo = args.positional[1].to_f64()?;
    let hi = args.positional[2].to_f64()?;
    let f = |x: f64| if x < lo { lo } else if x > hi { hi } else { x };
    let first = CallArgs::new("clip", vec![args.positional[0].clone()], Vec::new());
    unary(&first, f)
}

fn select_where(args: &CallArgs) -> Result<Value, ExecError> {
    args.check_arity(3, 3)?;
    let cond = to_array(&args.positional[0])?;
    let a = to_array(&args.positional[1])?;
    let b = to_array(&args.positional[2])?;
    let a = a.broadcast(&b, |x, _| x)?;
    let b = a.broadcast(&b, |_, y| y)?;
    let mask = a.broadcast(&cond, |_, c| c)?;
    if mask.shape != a.shape {
        return Err(ExecError::value_error(format!(
            "operands could not be broadcast together with shapes {} {}",
            shape_repr(&cond.shape),
            shape_repr(&a.shape)
        )));
    }
    let data = mask
        .data
        .iter()
        .zip(a.data.iter().zip(&b.data))
        .map(|(&c, (&x, &y))| if c != 0.0 { x } else { y })
        .collect();
    Ok(Value::Array(NdArray {
        data,
        shape: a.shape,
    }))
}
