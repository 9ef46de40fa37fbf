//! Figure model and the single-owner figure context
//!
//! A `Figure` is the opaque artifact produced by graph code: axes settings plus
//! an ordered list of artists. It is plain data so it can cross the worker
//! process boundary as JSON; rasterizing it is the caller's concern.
//!
//! `FigureContext` replaces the "current figure" global of classic plotting
//! libraries. Exactly one context backs one execution, it is passed explicitly
//! to the interpreter, and dropping it releases it. The process-wide count of
//! live contexts is observable through [`open_figure_count`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

static OPEN_FIGURES: AtomicUsize = AtomicUsize::new(0);

/// Number of figure contexts currently alive in this process
pub fn open_figure_count() -> usize {
    OPEN_FIGURES.load(Ordering::SeqCst)
}

/// Visual properties shared by most artists
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Style {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "wire::opt_float")]
    pub linewidth: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linestyle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "wire::opt_float")]
    pub alpha: Option<f64>,
}

/// A drawable element of a figure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artist {
    Line {
        #[serde(with = "wire::floats")]
        x: Vec<f64>,
        #[serde(with = "wire::floats")]
        y: Vec<f64>,
        #[serde(default)]
        style: Style,
    },
    Scatter {
        #[serde(with = "wire::floats")]
        x: Vec<f64>,
        #[serde(with = "wire::floats")]
        y: Vec<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none", with = "wire::opt_float")]
        size: Option<f64>,
        #[serde(default)]
        style: Style,
    },
    Bars {
        #[serde(with = "wire::floats")]
        x: Vec<f64>,
        #[serde(with = "wire::floats")]
        height: Vec<f64>,
        #[serde(with = "wire::float")]
        width: f64,
        #[serde(default)]
        style: Style,
    },
    HorizontalLine {
        #[serde(with = "wire::float")]
        y: f64,
        #[serde(default)]
        style: Style,
    },
    VerticalLine {
        #[serde(with = "wire::float")]
        x: f64,
        #[serde(default)]
        style: Style,
    },
    FillBetween {
        #[serde(with = "wire::floats")]
        x: Vec<f64>,
        #[serde(with = "wire::floats")]
        y1: Vec<f64>,
        #[serde(with = "wire::floats")]
        y2: Vec<f64>,
        #[serde(default)]
        style: Style,
    },
    Quiver {
        #[serde(with = "wire::floats")]
        x: Vec<f64>,
        #[serde(with = "wire::floats")]
        y: Vec<f64>,
        #[serde(with = "wire::floats")]
        u: Vec<f64>,
        #[serde(with = "wire::floats")]
        v: Vec<f64>,
        #[serde(default)]
        style: Style,
    },
    Text {
        #[serde(with = "wire::float")]
        x: f64,
        #[serde(with = "wire::float")]
        y: f64,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none", with = "wire::opt_float")]
        fontsize: Option<f64>,
        #[serde(default)]
        style: Style,
    },
}

impl Artist {
    pub fn label(&self) -> Option<&str> {
        let style = match self {
            Artist::Line { style, .. }
            | Artist::Scatter { style, .. }
            | Artist::Bars { style, .. }
            | Artist::HorizontalLine { style, .. }
            | Artist::VerticalLine { style, .. }
            | Artist::FillBetween { style, .. }
            | Artist::Quiver { style, .. }
            | Artist::Text { style, .. } => style,
        };
        style.label.as_deref()
    }
}

/// Axis aspect handling requested through `plt.axis(...)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    #[default]
    Auto,
    Equal,
    Square,
}

/// The rendered-plot artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    /// Figure size in inches (width, height)
    #[serde(with = "wire::pair")]
    pub size: (f64, f64),
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xlabel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ylabel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "wire::opt_pair")]
    pub xlim: Option<(f64, f64)>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "wire::opt_pair")]
    pub ylim: Option<(f64, f64)>,
    #[serde(default)]
    pub grid: bool,
    #[serde(default)]
    pub legend: bool,
    #[serde(default)]
    pub aspect: Aspect,
    #[serde(default = "default_axis_visible")]
    pub axis_visible: bool,
    #[serde(default)]
    pub artists: Vec<Artist>,
}

fn default_axis_visible() -> bool {
    true
}

/// Default figure size used by graph generation (8x6 inches)
pub const DEFAULT_FIGURE_SIZE: (f64, f64) = (8.0, 6.0);

impl Default for Figure {
    fn default() -> Self {
        Self {
            size: DEFAULT_FIGURE_SIZE,
            title: None,
            xlabel: None,
            ylabel: None,
            xlim: None,
            ylim: None,
            grid: false,
            legend: false,
            aspect: Aspect::Auto,
            axis_visible: true,
            artists: Vec::new(),
        }
    }
}

impl Figure {
    pub fn is_empty(&self) -> bool {
        self.artists.is_empty()
    }

    /// Labels that a legend would show, in drawing order
    pub fn legend_entries(&self) -> Vec<&str> {
        self.artists.iter().filter_map(Artist::label).collect()
    }
}

/// Exclusive handle on the figure being drawn by one execution.
///
/// Not `Clone`: the interpreter borrows it mutably for the whole run, and the
/// figure either leaves through [`FigureContext::into_figure`] or is discarded
/// when the context drops.
#[derive(Debug)]
pub struct FigureContext {
    figure: Figure,
}

impl FigureContext {
    pub fn open() -> Self {
        OPEN_FIGURES.fetch_add(1, Ordering::SeqCst);
        Self {
            figure: Figure::default(),
        }
    }

    pub fn figure(&self) -> &Figure {
        &self.figure
    }

    pub fn figure_mut(&mut self) -> &mut Figure {
        &mut self.figure
    }

    /// Start over with a blank figure of the given size (`plt.figure(...)`)
    pub fn reset(&mut self, size: (f64, f64)) {
        self.figure = Figure {
            size,
            ..Figure::default()
        };
    }

    /// Release the context and keep the drawn figure
    pub fn into_figure(mut self) -> Figure {
        std::mem::take(&mut self.figure)
    }
}

impl Drop for FigureContext {
    fn drop(&mut self) {
        OPEN_FIGURES.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serializes tests that assert on the process-wide figure count
// ============ Wire Format ============

/// JSON has no NaN or infinity. Finite floats stay numbers; the others travel
/// as `"nan"`, `"inf"` and `"-inf"` so gaps in plotted data survive the trip.
mod wire {
    use serde::de;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum WireFloat {
        Number(f64),
        Text(String),
        Missing,
    }

    impl WireFloat {
        fn encode(x: f64) -> Self {
            if x.is_finite() {
                WireFloat::Number(x)
            } else if x.is_nan() {
                WireFloat::Text("nan".to_string())
            } else if x > 0.0 {
                WireFloat::Text("inf".to_string())
            } else {
                WireFloat::Text("-inf".to_string())
            }
        }

        fn decode(self) -> Result<f64, String> {
            match self {
                WireFloat::Number(x) => Ok(x),
                WireFloat::Missing => Ok(f64::NAN),
                WireFloat::Text(text) => match text.as_str() {
                    "nan" => Ok(f64::NAN),
                    "inf" => Ok(f64::INFINITY),
                    "-inf" => Ok(f64::NEG_INFINITY),
                    other => Err(format!("invalid float {:?}", other)),
                },
            }
        }
    }

    pub mod float {
        use super::*;

        pub fn serialize<S: Serializer>(x: &f64, serializer: S) -> Result<S::Ok, S::Error> {
            WireFloat::encode(*x).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
            WireFloat::deserialize(deserializer)?.decode().map_err(de::Error::custom)
        }
    }

    pub mod floats {
        use super::*;

        pub fn serialize<S: Serializer>(xs: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_seq(xs.iter().map(|&x| WireFloat::encode(x)))
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
            Vec::<WireFloat>::deserialize(deserializer)?
                .into_iter()
                .map(WireFloat::decode)
                .collect::<Result<_, _>>()
                .map_err(de::Error::custom)
        }
    }

    pub mod opt_float {
        use super::*;

        pub fn serialize<S: Serializer>(x: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
            x.map(WireFloat::encode).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
            Option::<WireFloat>::deserialize(deserializer)?
                .map(WireFloat::decode)
                .transpose()
                .map_err(de::Error::custom)
        }
    }

    pub mod pair {
        use super::*;

        pub fn serialize<S: Serializer>(p: &(f64, f64), serializer: S) -> Result<S::Ok, S::Error> {
            (WireFloat::encode(p.0), WireFloat::encode(p.1)).serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<(f64, f64), D::Error> {
            let (a, b) = <(WireFloat, WireFloat)>::deserialize(deserializer)?;
            Ok((a.decode().map_err(de::Error::custom)?, b.decode().map_err(de::Error::custom)?))
        }
    }

    pub mod opt_pair {
        use super::*;

        pub fn serialize<S: Serializer>(p: &Option<(f64, f64)>, serializer: S) -> Result<S::Ok, S::Error> {
            p.map(|(a, b)| (WireFloat::encode(a), WireFloat::encode(b)))
                .serialize(serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<(f64, f64)>, D::Error> {
            match Option::<(WireFloat, WireFloat)>::deserialize(deserializer)? {
                Some((a, b)) => Ok(Some((
                    a.decode().map_err(de::Error::custom)?,
                    b.decode().map_err(de::Error::custom)?,
                ))),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn figure_test_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
