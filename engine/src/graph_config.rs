//! Graph types, built-in code templates and post-execution overrides

use plot_sandbox::Figure;
use serde::{Deserialize, Serialize};

/// Kind of graph attached to a flashcard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphType {
    #[default]
    None,
    Function,
    Parametric,
    #[serde(rename = "3d")]
    ThreeD,
    Vector,
}

impl GraphType {
    pub fn as_str(self) -> &'static str {
        match self {
            GraphType::None => "none",
            GraphType::Function => "function",
            GraphType::Parametric => "parametric",
            GraphType::ThreeD => "3d",
            GraphType::Vector => "vector",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Some(GraphType::None),
            "function" => Some(GraphType::Function),
            "parametric" => Some(GraphType::Parametric),
            "3d" => Some(GraphType::ThreeD),
            "vector" => Some(GraphType::Vector),
            _ => None,
        }
    }
}

/// Title, label, limit and grid overrides applied after the code has run.
///
/// These are not part of the sandboxed program; they are set on the returned
/// figure directly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xlabel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ylabel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xlim: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ylim: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid: Option<bool>,
}

impl GraphConfig {
    pub fn is_empty(&self) -> bool {
        self == &GraphConfig::default()
    }

    pub fn apply(&self, figure: &mut Figure) {
        if let Some(title) = &self.title {
            figure.title = Some(title.clone());
        }
        if let Some(xlabel) = &self.xlabel {
            figure.xlabel = Some(xlabel.clone());
        }
        if let Some(ylabel) = &self.ylabel {
            figure.ylabel = Some(ylabel.clone());
        }
        if let Some(xlim) = self.xlim {
            figure.xlim = Some(xlim);
        }
        if let Some(ylim) = self.ylim {
            figure.ylim = Some(ylim);
        }
        // A false grid leaves whatever the code drew
        if self.grid == Some(true) {
            figure.grid = true;
        }
    }
}

/// Starting code and config for a graph type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphTemplate {
    pub graph_type: GraphType,
    pub code: &'static str,
    pub config: GraphConfig,
}

const FUNCTION_CODE: &str = "x = np.linspace(-10, 10, 100)
y = np.sin(x)
plt.plot(x, y)
plt.grid(True)
plt.axhline(0, color='black', linewidth=0.5)
plt.axvline(0, color='black', linewidth=0.5)";

const PARAMETRIC_CODE: &str = "t = np.linspace(0, 2*np.pi, 100)
x = np.cos(t)
y = np.sin(t)
plt.plot(x, y)
plt.grid(True)
plt.axis('equal')";

const VECTOR_CODE: &str = "x = np.linspace(-2, 2, 10)
y = np.linspace(-2, 2, 10)
X, Y = np.meshgrid(x, y)
U = -Y
V = X
plt.quiver(X, Y, U, V)
plt.grid(True)";

fn labelled(title: &str) -> GraphConfig {
    GraphConfig {
        title: Some(title.to_string()),
        xlabel: Some("x".to_string()),
        ylabel: Some("y".to_string()),
        grid: Some(true),
        ..GraphConfig::default()
    }
}

/// Template for a graph type. Types without their own template get the
/// function plot.
pub fn graph_template(graph_type: GraphType) -> GraphTemplate {
    match graph_type {
        GraphType::Parametric => GraphTemplate {
            graph_type,
            code: PARAMETRIC_CODE,
            config: labelled("Parametric Plot"),
        },
        GraphType::Vector => GraphTemplate {
            graph_type,
            code: VECTOR_CODE,
            config: labelled("Vector Field"),
        },
        _ => GraphTemplate {
            graph_type: GraphType::Function,
            code: FUNCTION_CODE,
            config: labelled("Function Plot"),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_type_names() {
        for graph_type in [
            GraphType::None,
            GraphType::Function,
            GraphType::Parametric,
            GraphType::ThreeD,
            GraphType::Vector,
        ] {
            assert_eq!(GraphType::parse(graph_type.as_str()), Some(graph_type));
            let json = serde_json::to_string(&graph_type).unwrap();
            assert_eq!(json, format!("\"{}\"", graph_type.as_str()));
        }
        assert_eq!(GraphType::parse("pie"), None);
    }

    #[test]
    fn test_unknown_template_falls_back_to_function() {
        assert_eq!(graph_template(GraphType::ThreeD).graph_type, GraphType::Function);
        assert_eq!(graph_template(GraphType::None).code, FUNCTION_CODE);
        assert_eq!(graph_template(GraphType::Vector).config.title.as_deref(), Some("Vector Field"));
    }

    #[test]
    fn test_apply_overrides() {
        let mut figure = Figure {
            title: Some("from code".into()),
            ylabel: Some("kept".into()),
            ..Figure::default()
        };
        let config: GraphConfig =
            serde_json::from_str(r#"{"title": "Ohm's law", "xlim": [0, 10], "grid": true}"#).unwrap();
        config.apply(&mut figure);
        assert_eq!(figure.title.as_deref(), Some("Ohm's law"));
        assert_eq!(figure.ylabel.as_deref(), Some("kept"));
        assert_eq!(figure.xlim, Some((0.0, 10.0)));
        assert!(figure.grid);
    }

    #[test]
    fn test_empty_config() {
        assert!(GraphConfig::default().is_empty());
        assert!(!labelled("t").is_empty());
    }
}
