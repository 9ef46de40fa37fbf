//! Question and answer template rendering
//!
//! `{name}` markers are replaced by the display form of the matching value.
//! Markers without a value stay as written. No escaping is done here.

use lazy_static::lazy_static;
use regex::{Captures, Regex};

use crate::parameters::GeneratedAssignment;
use crate::value::Value;

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([^{}]+)\}").unwrap();
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, template: &str, values: &GeneratedAssignment) -> String {
        if template.is_empty() || values.is_empty() {
            return template.to_string();
        }
        PLACEHOLDER
            .replace_all(template, |caps: &Captures| match values.get(&caps[1]) {
                Some(value) => format_value(value),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}

/// Render with a default renderer
pub fn render(template: &str, values: &GeneratedAssignment) -> String {
    TemplateRenderer.render(template, values)
}

/// Display form of a value.
///
/// Floats print with ten decimals, then lose trailing zeros and a trailing
/// point, so `5.8` shows as `5.8` and `5.0` as `5`.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::Float(f) if f.is_nan() => "nan".to_string(),
        Value::Float(f) if f.is_infinite() => {
            let sign = if *f > 0.0 { "" } else { "-" };
            format!("{}inf", sign)
        }
        Value::Float(f) => {
            let fixed = format!("{:.10}", f);
            fixed.trim_end_matches('0').trim_end_matches('.').to_string()
        }
        other => other.python_str(),
    }
}

/// Markers in `template` that `values` cannot fill
pub fn unresolved_placeholders(template: &str, values: &GeneratedAssignment) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|caps| caps[1].to_string())
        .filter(|name| values.get(name).is_none())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn values(pairs: &[(&str, Value)]) -> GeneratedAssignment {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_render_integers() {
        let vals = values(&[("a", Value::Int(5)), ("b", Value::Int(3))]);
        assert_eq!(render("What is {a} + {b}?", &vals), "What is 5 + 3?");
    }

    #[test]
    fn test_float_trailing_zeros_stripped() {
        assert_eq!(render("{c}", &values(&[("c", Value::Float(5.0))])), "5");
        assert_eq!(render("{c}", &values(&[("c", Value::Float(5.83))])), "5.83");
        assert_eq!(render("{c}", &values(&[("c", Value::Float(5.8))])), "5.8");
        assert_eq!(render("{c}", &values(&[("c", Value::Float(100.0))])), "100");
        assert_eq!(render("{c}", &values(&[("c", Value::Float(-0.25))])), "-0.25");
    }

    #[test]
    fn test_every_occurrence_replaced() {
        let vals = values(&[("x", Value::Int(2))]);
        assert_eq!(render("{x} * {x} = 4", &vals), "2 * 2 = 4");
    }

    #[test]
    fn test_missing_markers_left_verbatim() {
        let vals = values(&[("a", Value::Int(1))]);
        assert_eq!(render("{a} and {unknown}", &vals), "1 and {unknown}");
        assert_eq!(unresolved_placeholders("{a} and {unknown}", &vals), vec!["unknown"]);
    }

    #[test]
    fn test_latex_braces_survive() {
        let vals = values(&[("n", Value::Int(3))]);
        assert_eq!(render(r"$\frac{1}{n} + \sqrt{2}$", &vals), r"$\frac{1}3 + \sqrt{2}$");
    }

    #[test]
    fn test_other_values_use_python_str() {
        let vals = values(&[
            ("s", Value::Str("Ohm".into())),
            ("flag", Value::Bool(false)),
            ("items", Value::List(vec![Value::Int(1), Value::Float(2.5)])),
        ]);
        assert_eq!(render("{s} {flag} {items}", &vals), "Ohm False [1, 2.5]");
    }

    #[test]
    fn test_no_values_returns_template() {
        assert_eq!(render("{a}", &GeneratedAssignment::default()), "{a}");
        assert_eq!(render("", &values(&[("a", Value::Int(1))])), "");
    }

    #[test]
    fn test_non_finite_floats() {
        assert_eq!(format_value(&Value::Float(f64::INFINITY)), "inf");
        assert_eq!(format_value(&Value::Float(f64::NEG_INFINITY)), "-inf");
        assert_eq!(format_value(&Value::Float(f64::NAN)), "nan");
    }

    proptest! {
        #[test]
        fn prop_integer_valued_floats_render_as_integers(n in -1_000_000i64..1_000_000) {
            prop_assert_eq!(format_value(&Value::Float(n as f64)), n.to_string());
        }

        #[test]
        fn prop_formatted_float_has_no_trailing_zero(x in -1.0e6f64..1.0e6) {
            let text = format_value(&Value::Float(x));
            prop_assert!(!text.ends_with('.'));
            if text.contains('.') {
                prop_assert!(!text.ends_with('0'));
            }
        }
    }
}
