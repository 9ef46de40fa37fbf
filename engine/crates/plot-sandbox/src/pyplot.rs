//! The `plt` module: records drawing calls into the current figure
//!
//! Every function mutates the `FigureContext` handed in by the interpreter.
//! Nothing here touches the filesystem or a display; `show()` and friends are
//! accepted and ignored.

use crate::error::ExecError;
use crate::figure::{Artist, Aspect, FigureContext, Style};
use crate::numpy::to_array;
use crate::value::{CallArgs, Value};

const FUNCTIONS: &[&str] = &[
    "figure", "plot", "scatter", "bar", "axhline", "axvline", "fill_between", "quiver", "text",
    "title", "xlabel", "ylabel", "xlim", "ylim", "grid", "legend", "axis", "show",
    "tight_layout", "close",
];

const STYLE_KEYWORDS: &[&str] = &[
    "label", "color", "c", "linewidth", "lw", "linestyle", "ls", "marker", "alpha",
    "markersize", "ms", "zorder",
];

const FORMAT_COLORS: &[(char, &str)] = &[
    ('b', "blue"),
    ('g', "green"),
    ('r', "red"),
    ('c', "cyan"),
    ('m', "magenta"),
    ('y', "yellow"),
    ('k', "black"),
    ('w', "white"),
];

const FORMAT_MARKERS: &[char] = &['o', '.', ',', 'x', 's', '^', 'v', '<', '>', '*', '+', 'D', 'd', 'p', 'h'];

pub fn has_function(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

pub fn call(name: &str, args: &CallArgs, ctx: &mut FigureContext) -> Result<Value, ExecError> {
    match name {
        "figure" => {
            args.check_keywords(&["figsize", "dpi", "num"])?;
            let size = match args.keyword("figsize") {
                Some(v) => pair(v, "figsize")?,
                None => crate::figure::DEFAULT_FIGURE_SIZE,
            };
            ctx.reset(size);
        }
        "plot" => plot(args, ctx)?,
        "scatter" => {
            args.check_arity(2, 2)?;
            args.check_keywords(&with_style(&["s"]))?;
            let (x, y) = same_length(vector(&args.positional[0])?, vector(&args.positional[1])?)?;
            let size = args.keyword("s").map(Value::to_f64).transpose()?;
            let style = style(args)?;
            ctx.figure_mut().artists.push(Artist::Scatter { x, y, size, style });
        }
        "bar" => {
            args.check_arity(2, 3)?;
            args.check_keywords(&with_style(&["width", "edgecolor"]))?;
            let (x, height) = same_length(vector(&args.positional[0])?, vector(&args.positional[1])?)?;
            let width = args.f64_or(2, "width", 0.8)?;
            let style = style(args)?;
            ctx.figure_mut().artists.push(Artist::Bars { x, height, width, style });
        }
        "axhline" => {
            args.check_arity(0, 1)?;
            args.check_keywords(&with_style(&["y", "xmin", "xmax"]))?;
            let y = args.f64_or(0, "y", 0.0)?;
            let style = style(args)?;
            ctx.figure_mut().artists.push(Artist::HorizontalLine { y, style });
        }
        "axvline" => {
            args.check_arity(0, 1)?;
            args.check_keywords(&with_style(&["x", "ymin", "ymax"]))?;
            let x = args.f64_or(0, "x", 0.0)?;
            let style = style(args)?;
            ctx.figure_mut().artists.push(Artist::VerticalLine { x, style });
        }
        "fill_between" => {
            args.check_arity(2, 3)?;
            args.check_keywords(&with_style(&["y2", "where", "facecolor", "edgecolor"]))?;
            let x = vector(&args.positional[0])?;
            let y1 = broadcast_to(vector(&args.positional[1])?, x.len())?;
            let y2 = match args.get(2, "y2") {
                Some(v) => broadcast_to(vector(v)?, x.len())?,
                None => vec![0.0; x.len()],
            };
            let style = style(args)?;
            ctx.figure_mut().artists.push(Artist::FillBetween { x, y1, y2, style });
        }
        "quiver" => quiver(args, ctx)?,
        "text" => {
            args.check_arity(3, 3)?;
            args.check_keywords(&with_style(&["fontsize", "ha", "va", "horizontalalignment", "verticalalignment"]))?;
            let x = args.positional[0].to_f64()?;
            let y = args.positional[1].to_f64()?;
            let text = args.positional[2].to_display();
            let fontsize = args.keyword("fontsize").map(Value::to_f64).transpose()?;
            let style = style(args)?;
            ctx.figure_mut().artists.push(Artist::Text { x, y, text, fontsize, style });
        }
        "title" | "xlabel" | "ylabel" => {
            args.check_arity(1, 1)?;
            args.check_keywords(&["fontsize", "fontweight", "loc", "pad", "labelpad"])?;
            let text = Some(args.positional[0].to_display());
            let figure = ctx.figure_mut();
            match name {
                "title" => figure.title = text,
                "xlabel" => figure.xlabel = text,
                _ => figure.ylabel = text,
            }
        }
        "xlim" => {
            let limits = bounds(args, "left", "right")?;
            ctx.figure_mut().xlim = Some(limits);
        }
        "ylim" => {
            let limits = bounds(args, "bottom", "top")?;
            ctx.figure_mut().ylim = Some(limits);
        }
        "grid" => {
            args.check_arity(0, 1)?;
            args.check_keywords(&["visible", "b", "which", "axis", "alpha", "linestyle", "ls", "color"])?;
            let visible = match args.get(0, "visible").or_else(|| args.keyword("b")) {
                Some(v) => v.truthy()?,
                None => true,
            };
            ctx.figure_mut().grid = visible;
        }
        "legend" => {
            args.check_keywords(&["loc", "fontsize", "frameon", "title"])?;
            ctx.figure_mut().legend = true;
        }
        "axis" => axis(args, ctx)?,
        "show" | "tight_layout" | "close" => {}
        other => return Err(ExecError::Name(format!("plt.{}", other))),
    }
    Ok(Value::None)
}

fn with_style(extra: &[&'static str]) -> Vec<&'static str> {
    STYLE_KEYWORDS.iter().chain(extra).copied().collect()
}

fn vector(value: &Value) -> Result<Vec<f64>, ExecError> {
    Ok(to_array(value)?.into_data())
}

fn same_length(x: Vec<f64>, y: Vec<f64>) -> Result<(Vec<f64>, Vec<f64>), ExecError> {
    if x.len() != y.len() {
        return Err(ExecError::value_error(format!(
            "x and y must have same first dimension, but have shapes ({},) and ({},)",
            x.len(),
            y.len()
        )));
    }
    Ok((x, y))
}

fn broadcast_to(values: Vec<f64>, len: usize) -> Result<Vec<f64>, ExecError> {
    match values.as_slice() {
        [single] if len != 1 => Ok(vec![*single; len]),
        _ if values.len() == len => Ok(values),
        _ => Err(ExecError::value_error(format!(
            "operands could not be broadcast together: expected {} values, got {}",
            len,
            values.len()
        ))),
    }
}

fn pair(value: &Value, what: &str) -> Result<(f64, f64), ExecError> {
    match value {
        Value::Tuple(items) | Value::List(items) if items.len() == 2 => {
            Ok((items[0].to_f64()?, items[1].to_f64()?))
        }
        other => Err(ExecError::type_error(format!(
            "{} must be a pair of numbers, not {}",
            what,
            other.type_name()
        ))),
    }
}

fn style(args: &CallArgs) -> Result<Style, ExecError> {
    let pick = |names: &[&str]| names.iter().find_map(|n| args.keyword(n));
    Ok(Style {
        label: pick(&["label"]).map(Value::to_display),
        color: pick(&["color", "c"]).map(Value::to_display),
        linewidth: pick(&["linewidth", "lw"]).map(Value::to_f64).transpose()?,
        linestyle: pick(&["linestyle", "ls"]).map(Value::to_display),
        marker: pick(&["marker"]).map(Value::to_display),
        alpha: pick(&["alpha"]).map(Value::to_f64).transpose()?,
    })
}

/// Apply a matplotlib format string such as `"r--"` or `"bo"` to a style
fn apply_format(fmt: &str, style: &mut Style) {
    let mut remaining = fmt.to_string();
    if let Some(line) = ["--", "-.", "-", ":"].iter().find(|l| fmt.contains(*l)) {
        if style.linestyle.is_none() {
            style.linestyle = Some(line.to_string());
        }
        remaining = fmt.replacen(line, "", 1);
    }
    for c in remaining.chars() {
        if let Some((_, color)) = FORMAT_COLORS.iter().find(|(k, _)| *k == c) {
            if style.color.is_none() {
                style.color = Some(color.to_string());
            }
        } else if FORMAT_MARKERS.contains(&c) && style.marker.is_none() {
            style.marker = Some(c.to_string());
        }
    }
}

fn plot(args: &CallArgs, ctx: &mut FigureContext) -> Result<(), ExecError> {
    args.check_keywords(&with_style(&["markerfacecolor", "mfc"]))?;
    if args.is_empty() {
        return Ok(());
    }
    let base = style(args)?;
    let mut rest = args.positional.as_slice();
    while let Some(first) = rest.first() {
        let (x, y, used) = match rest.get(1) {
            Some(second) if !matches!(second, Value::Str(_)) => (vector(first)?, vector(second)?, 2),
            _ => {
                let y = vector(first)?;
                ((0..y.len()).map(|i| i as f64).collect(), y, 1)
            }
        };
        rest = &rest[used..];
        let mut line_style = base.clone();
        if let Some(Value::Str(fmt)) = rest.first() {
            apply_format(fmt, &mut line_style);
            if line_style.linestyle.is_none() && line_style.marker.is_some() {
                line_style.linestyle = Some("None".to_string());
            }
            rest = &rest[1..];
        }
        let (x, y) = same_length(x, y)?;
        ctx.figure_mut().artists.push(Artist::Line { x, y, style: line_style });
    }
    Ok(())
}

fn quiver(args: &CallArgs, ctx: &mut FigureContext) -> Result<(), ExecError> {
    args.check_keywords(&with_style(&["angles", "scale_units", "scale", "width", "headwidth"]))?;
    let vectors = args.positional.iter().map(vector).collect::<Result<Vec<_>, _>>()?;
    let (x, y, u, v) = match vectors.as_slice() {
        [u, v] => {
            let n = u.len();
            let idx: Vec<f64> = (0..n).map(|i| i as f64).collect();
            (idx.clone(), vec![0.0; n], u.clone(), broadcast_to(v.clone(), n)?)
        }
        [x, y, u, v] => {
            let n = x.len();
            (
                x.clone(),
                broadcast_to(y.clone(), n)?,
                broadcast_to(u.clone(), n)?,
                broadcast_to(v.clone(), n)?,
            )
        }
        _ => {
            return Err(ExecError::type_error(format!(
                "quiver() takes 2 or 4 positional arguments but {} were given",
                vectors.len()
            )))
        }
    };
    let style = style(args)?;
    ctx.figure_mut().artists.push(Artist::Quiver { x, y, u, v, style });
    Ok(())
}

fn bounds(args: &CallArgs, low: &str, high: &str) -> Result<(f64, f64), ExecError> {
    args.check_arity(0, 2)?;
    args.check_keywords(&[low, high])?;
    match args.positional.as_slice() {
        [single] => pair(single, &args.func),
        _ => {
            let lo = args.require(0, low)?.to_f64()?;
            let hi = args.require(1, high)?.to_f64()?;
            Ok((lo, hi))
        }
    }
}

fn axis(args: &CallArgs, ctx: &mut FigureContext) -> Result<(), ExecError> {
    args.check_arity(0, 1)?;
    args.check_keywords(&[])?;
    let figure = ctx.figure_mut();
    match args.positional.first() {
        None => {}
        Some(Value::Str(mode)) => match mode.as_str() {
            "equal" | "scaled" => figure.aspect = Aspect::Equal,
            "square" => figure.aspect = Aspect::Square,
            "auto" | "normal" => figure.aspect = Aspect::Auto,
            "off" => figure.axis_visible = false,
            "on" => figure.axis_visible = true,
            other => {
                return Err(ExecError::value_error(format!(
                    "Unrecognized string '{}' to axis; try 'on' or 'off'",
                    other
                )))
            }
        },
        Some(Value::Bool(visible)) => figure.axis_visible = *visible,
        Some(limits) => {
            let values = vector(limits)?;
            match values.as_slice() {
                [x0, x1, y0, y1] => {
                    figure.xlim = Some((*x0, *x1));
                    figure.ylim = Some((*y0, *y1));
                }
                _ => {
                    return Err(ExecError::type_error(
                        "the first argument to axis() must be an iterable of the form [xmin, xmax, ymin, ymax]",
                    ))
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::figure::figure_test_lock;
    use crate::numpy::NdArray;

    fn args(name: &str, positional: Vec<Value>, keywords: Vec<(&str, Value)>) -> CallArgs {
        CallArgs::new(
            name,
            positional,
            keywords.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        )
    }

    fn floats(xs: &[f64]) -> Value {
        Value::Array(NdArray::vector(xs.to_vec()))
    }

    #[test]
    fn test_plot_with_format_string_and_label() {
        let _guard = figure_test_lock();
        let mut ctx = FigureContext::open();
        call(
            "plot",
            &args(
                "plot",
                vec![floats(&[0.0, 1.0]), floats(&[1.0, 3.0]), Value::Str("r--".into())],
                vec![("label", Value::Str("f(x)".into()))],
            ),
            &mut ctx,
        )
        .unwrap();
        match &ctx.figure().artists[0] {
            Artist::Line { x, y, style } => {
                assert_eq!(x, &vec![0.0, 1.0]);
                assert_eq!(y, &vec![1.0, 3.0]);
                assert_eq!(style.color.as_deref(), Some("red"));
                assert_eq!(style.linestyle.as_deref(), Some("--"));
                assert_eq!(style.label.as_deref(), Some("f(x)"));
            }
            other => panic!("expected line, got {:?}", other),
        }
    }

    #[test]
    fn test_plot_y_only_uses_indices() {
        let _guard = figure_test_lock();
        let mut ctx = FigureContext::open();
        call("plot", &args("plot", vec![floats(&[5.0, 6.0, 7.0])], vec![]), &mut ctx).unwrap();
        match &ctx.figure().artists[0] {
            Artist::Line { x, .. } => assert_eq!(x, &vec![0.0, 1.0, 2.0]),
            other => panic!("expected line, got {:?}", other),
        }
    }

    #[test]
    fn test_marker_only_format_has_no_line() {
        let mut style = Style::default();
        apply_format("bo", &mut style);
        assert_eq!(style.color.as_deref(), Some("blue"));
        assert_eq!(style.marker.as_deref(), Some("o"));
        assert!(style.linestyle.is_none());

        let mut dashed = Style::default();
        apply_format("g-.", &mut dashed);
        assert_eq!(dashed.color.as_deref(), Some("green"));
        assert_eq!(dashed.linestyle.as_deref(), Some("-."));
    }

    #[test]
    fn test_axes_settings() {
        let _guard = figure_test_lock();
        let mut ctx = FigureContext::open();
        call("title", &args("title", vec![Value::Str("Parabola".into())], vec![]), &mut ctx).unwrap();
        call("xlim", &args("xlim", vec![Value::Int(-5), Value::Int(5)], vec![]), &mut ctx).unwrap();
        call(
            "ylim",
            &args("ylim", vec![Value::Tuple(vec![Value::Int(0), Value::Float(2.5)])], vec![]),
            &mut ctx,
        )
        .unwrap();
        call("grid", &args("grid", vec![Value::Bool(true)], vec![("alpha", Value::Float(0.3))]), &mut ctx).unwrap();
        call("axis", &args("axis", vec![Value::Str("equal".into())], vec![]), &mut ctx).unwrap();

        let fig = ctx.figure();
        assert_eq!(fig.title.as_deref(), Some("Parabola"));
        assert_eq!(fig.xlim, Some((-5.0, 5.0)));
        assert_eq!(fig.ylim, Some((0.0, 2.5)));
        assert!(fig.grid);
        assert_eq!(fig.aspect, Aspect::Equal);
    }

    #[test]
    fn test_figure_resets_and_sizes() {
        let _guard = figure_test_lock();
        let mut ctx = FigureContext::open();
        call("axhline", &args("axhline", vec![], vec![]), &mut ctx).unwrap();
        call(
            "figure",
            &args("figure", vec![], vec![("figsize", Value::Tuple(vec![Value::Int(4), Value::Int(3)]))]),
            &mut ctx,
        )
        .unwrap();
        assert!(ctx.figure().is_empty());
        assert_eq!(ctx.figure().size, (4.0, 3.0));
    }

    #[test]
    fn test_mismatched_lengths_rejected() {
        let _guard = figure_test_lock();
        let mut ctx = FigureContext::open();
        let result = call("plot", &args("plot", vec![floats(&[1.0, 2.0]), floats(&[1.0])], vec![]), &mut ctx);
        assert!(matches!(result, Err(ExecError::Value(_))));
        let unknown = call("plot", &args("plot", vec![floats(&[1.0])], vec![("bogus", Value::None)]), &mut ctx);
        assert!(matches!(unknown, Err(ExecError::Type(_))));
    }
}
