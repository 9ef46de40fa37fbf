//! Parameter specifications and rejection-sampling generation
//!
//! A specification declares variables of four kinds:
//! - `random_int`: uniform integer in `[min, max]`, both inclusive
//! - `random_float`: uniform float in `[min, max]`, rounded to a precision
//! - `random_choice`: one element of a non-empty list
//! - `computed`: a formula over other variables
//!
//! plus boolean constraints over all of them. Each attempt draws every random
//! variable, then evaluates computed variables in declaration order, then checks
//! the constraints. A failing attempt is discarded and the next one starts from
//! scratch, up to the retry budget.

use std::collections::HashMap;
use std::fmt;

use plot_sandbox::numeric::round_to;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::{GenerationError, SpecError};
use crate::evaluator::{Bindings, Formula};
use crate::value::Value;

/// Attempts before giving up on a specification
pub const DEFAULT_MAX_RETRIES: usize = 100;

/// Decimal places for floats when neither the variable nor the spec says
pub const DEFAULT_PRECISION: u32 = 2;

fn default_int_max() -> i64 {
    100
}

fn default_float_max() -> f64 {
    100.0
}

// ============ Specification ============

/// How one variable's value is produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariableSpec {
    RandomInt {
        #[serde(default)]
        min: i64,
        #[serde(default = "default_int_max")]
        max: i64,
    },
    RandomFloat {
        #[serde(default)]
        min: f64,
        #[serde(default = "default_float_max")]
        max: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        precision: Option<u32>,
    },
    RandomChoice {
        #[serde(default)]
        choices: Vec<Value>,
    },
    Computed {
        #[serde(default)]
        formula: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        precision: Option<u32>,
    },
}

impl VariableSpec {
    pub fn int(min: i64, max: i64) -> Self {
        VariableSpec::RandomInt { min, max }
    }

    pub fn float(min: f64, max: f64) -> Self {
        VariableSpec::RandomFloat {
            min,
            max,
            precision: None,
        }
    }

    pub fn choice(choices: Vec<Value>) -> Self {
        VariableSpec::RandomChoice { choices }
    }

    pub fn computed(formula: impl Into<String>) -> Self {
        VariableSpec::Computed {
            formula: formula.into(),
            precision: None,
        }
    }

    /// Set the rounding precision of a float or computed variable
    pub fn with_precision(mut self, digits: u32) -> Self {
        match &mut self {
            VariableSpec::RandomFloat { precision, .. } | VariableSpec::Computed { precision, .. } => {
                *precision = Some(digits);
            }
            _ => {}
        }
        self
    }

    pub fn is_computed(&self) -> bool {
        matches!(self, VariableSpec::Computed { .. })
    }
}

/// Variables, constraints and the spec-wide float precision.
///
/// Variables keep the order they were declared in; computed variables resolve
/// in that order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpecification {
    #[serde(default, with = "ordered_variables")]
    pub variables: Vec<(String, VariableSpec)>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,
}

impl ParameterSpecification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, SpecError> {
        serde_json::from_str(json).map_err(|e| SpecError::Parse(e.to_string()))
    }

    /// Declare a variable; redeclaring a name replaces it in place
    pub fn variable(mut self, name: impl Into<String>, spec: VariableSpec) -> Self {
        insert_ordered(&mut self.variables, name.into(), spec);
        self
    }

    pub fn constraint(mut self, expression: impl Into<String>) -> Self {
        self.constraints.push(expression.into());
        self
    }

    pub fn with_precision(mut self, digits: u32) -> Self {
        self.precision = Some(digits);
        self
    }

    pub fn get(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Check everything that does not need a random draw.
    ///
    /// Forward references between computed variables are allowed here; they
    /// fail at generation time as rejected attempts. Cycles never resolve and
    /// are reported as `SpecError::CyclicDependency`.
    pub fn validate(&self) -> Result<(), SpecError> {
        self.compile().map(|_| ())
    }

    fn compile(&self) -> Result<CompiledSpec, SpecError> {
        let mut formulas = Vec::with_capacity(self.variables.len());
        for (name, spec) in &self.variables {
            formulas.push(check_variable(name, spec)?);
        }

        let mut constraints = Vec::with_capacity(self.constraints.len());
        for (index, expression) in self.constraints.iter().enumerate() {
            let formula = Formula::parse(expression)
                .map_err(|source| SpecError::MalformedConstraint { index, source })?;
            constraints.push(formula);
        }

        let compiled = CompiledSpec {
            formulas,
            constraints,
        };
        if let Some(cycle) = compiled.find_cycle(&self.variables) {
            return Err(SpecError::CyclicDependency { cycle });
        }
        Ok(compiled)
    }
}

fn check_variable(name: &str, spec: &VariableSpec) -> Result<Option<Formula>, SpecError> {
    match spec {
        VariableSpec::RandomInt { min, max } => {
            if min > max {
                return Err(SpecError::InvalidRange {
                    variable: name.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
            Ok(None)
        }
        VariableSpec::RandomFloat { min, max, .. } => {
            if !min.is_finite() || !max.is_finite() {
                return Err(SpecError::NonFiniteBound {
                    variable: name.to_string(),
                });
            }
            if min > max {
                return Err(SpecError::InvalidRange {
                    variable: name.to_string(),
                    min: min.to_string(),
                    max: max.to_string(),
                });
            }
            Ok(None)
        }
        VariableSpec::RandomChoice { choices } => {
            if choices.is_empty() {
                return Err(SpecError::EmptyChoices {
                    variable: name.to_string(),
                });
            }
            Ok(None)
        }
        VariableSpec::Computed { formula, .. } => {
            if formula.trim().is_empty() {
                return Err(SpecError::EmptyFormula {
                    variable: name.to_string(),
                });
            }
            Formula::parse(formula)
                .map(Some)
                .map_err(|source| SpecError::MalformedFormula {
                    variable: name.to_string(),
                    source,
                })
        }
    }
}

fn insert_ordered(variables: &mut Vec<(String, VariableSpec)>, name: String, spec: VariableSpec) {
    match variables.iter_mut().find(|(n, _)| *n == name) {
        Some(slot) => slot.1 = spec,
        None => variables.push((name, spec)),
    }
}

/// Parsed formulas, indexed like `ParameterSpecification::variables`
struct CompiledSpec {
    formulas: Vec<Option<Formula>>,
    constraints: Vec<Formula>,
}

impl CompiledSpec {
    /// Depth-first search over computed-to-computed references
    fn find_cycle(&self, variables: &[(String, VariableSpec)]) -> Option<Vec<String>> {
        let index: HashMap<&str, usize> = variables
            .iter()
            .enumerate()
            .filter(|(i, _)| self.formulas[*i].is_some())
            .map(|(i, (name, _))| (name.as_str(), i))
            .collect();

        let edges: Vec<Vec<usize>> = self
            .formulas
            .iter()
            .map(|formula| match formula {
                Some(formula) => formula
                    .referenced_names()
                    .iter()
                    .filter_map(|name| index.get(name.as_str()).copied())
                    .collect(),
                None => Vec::new(),
            })
            .collect();

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        fn visit(node: usize, edges: &[Vec<usize>], marks: &mut [Mark], path: &mut Vec<usize>) -> Option<Vec<usize>> {
            marks[node] = Mark::InProgress;
            path.push(node);
            for &next in &edges[node] {
                match marks[next] {
                    Mark::InProgress => {
                        let start = path.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(next);
                        return Some(cycle);
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(next, edges, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            path.pop();
            marks[node] = Mark::Done;
            None
        }

        let mut marks = vec![Mark::Unvisited; variables.len()];
        let mut path = Vec::new();
        for node in 0..variables.len() {
            if marks[node] == Mark::Unvisited && self.formulas[node].is_some() {
                if let Some(cycle) = visit(node, &edges, &mut marks, &mut path) {
                    return Some(cycle.into_iter().map(|i| variables[i].0.clone()).collect());
                }
            }
        }
        None
    }
}

/// Serialize variables as a JSON object while keeping declaration order
mod ordered_variables {
    use super::*;

    pub fn serialize<S: Serializer>(variables: &[(String, VariableSpec)], serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(variables.len()))?;
        for (name, spec) in variables {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<(String, VariableSpec)>, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = Vec<(String, VariableSpec)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of variable names to variable specs")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut variables = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, spec)) = access.next_entry::<String, VariableSpec>()? {
                    insert_ordered(&mut variables, name, spec);
                }
                Ok(variables)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

// ============ Assignment ============

/// One accepted set of values, in declaration order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedAssignment {
    values: Vec<(String, Value)>,
}

impl GeneratedAssignment {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.lookup(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Bindings for GeneratedAssignment {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.get(name)
    }
}

impl FromIterator<(String, Value)> for GeneratedAssignment {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut values: Vec<(String, Value)> = Vec::new();
        for (name, value) in iter {
            match values.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = value,
                None => values.push((name, value)),
            }
        }
        Self { values }
    }
}

impl Serialize for GeneratedAssignment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for GeneratedAssignment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AssignmentVisitor;

        impl<'de> Visitor<'de> for AssignmentVisitor {
            type Value = GeneratedAssignment;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of variable names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = access.next_entry::<String, Value>()? {
                    entries.push(entry);
                }
                Ok(entries.into_iter().collect())
            }
        }

        deserializer.deserialize_map(AssignmentVisitor)
    }
}

// ============ Generator ============

/// Values resolved so far in one attempt, indexed like the spec's variables
struct AttemptBindings<'a> {
    variables: &'a [(String, VariableSpec)],
    slots: &'a [Option<Value>],
}

impl Bindings for AttemptBindings<'_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        self.variables
            .iter()
            .zip(self.slots)
            .find(|((n, _), _)| n == name)
            .and_then(|(_, slot)| slot.as_ref())
    }
}

/// Draws assignments for one validated specification
pub struct ParameterGenerator {
    spec: ParameterSpecification,
    compiled: CompiledSpec,
    max_retries: usize,
    default_precision: u32,
}

impl fmt::Debug for ParameterGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParameterGenerator")
            .field("variables", &self.spec.variables.len())
            .field("constraints", &self.spec.constraints.len())
            .field("max_retries", &self.max_retries)
            .field("default_precision", &self.default_precision)
            .finish()
    }
}

impl ParameterGenerator {
    /// Validate the specification and prepare its formulas
    pub fn new(spec: ParameterSpecification) -> Result<Self, GenerationError> {
        let compiled = spec.compile()?;
        Ok(Self {
            spec,
            compiled,
            max_retries: DEFAULT_MAX_RETRIES,
            default_precision: DEFAULT_PRECISION,
        })
    }

    /// Attempts before `GenerationError::Exhausted`; at least one
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    /// Precision used when neither the variable nor the spec sets one
    pub fn with_default_precision(mut self, digits: u32) -> Self {
        self.default_precision = digits;
        self
    }

    pub fn spec(&self) -> &ParameterSpecification {
        &self.spec
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn generate(&self) -> Result<GeneratedAssignment, GenerationError> {
        self.generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<GeneratedAssignment, GenerationError> {
        let mut last_rejection = String::from("none");
        for attempt in 1..=self.max_retries {
            match self.attempt(rng) {
                Ok(assignment) => {
                    tracing::debug!(
                        "[ParameterGenerator] Accepted attempt {} ({} variables)",
                        attempt,
                        assignment.len()
                    );
                    return Ok(assignment);
                }
                Err(reason) => {
                    tracing::debug!("[ParameterGenerator] Attempt {} rejected: {}", attempt, reason);
                    last_rejection = reason;
                }
            }
        }
        tracing::warn!(
            "[ParameterGenerator] Exhausted {} attempts; last rejection: {}",
            self.max_retries,
            last_rejection
        );
        Err(GenerationError::Exhausted {
            attempts: self.max_retries,
            last_rejection,
        })
    }

    fn precision_for(&self, own: Option<u32>) -> u32 {
        own.or(self.spec.precision).unwrap_or(self.default_precision)
    }

    /// One draw-compute-check pass. `Err` carries the rejection reason.
    fn attempt<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<GeneratedAssignment, String> {
        let variables = &self.spec.variables;
        let mut slots: Vec<Option<Value>> = vec![None; variables.len()];

        for (slot, (name, spec)) in slots.iter_mut().zip(variables) {
            *slot = match spec {
                VariableSpec::RandomInt { min, max } => Some(Value::Int(rng.gen_range(*min..=*max))),
                VariableSpec::RandomFloat { min, max, precision } => {
                    let drawn = draw_float(rng, *min, *max);
                    Some(Value::Float(round_to(drawn, self.precision_for(*precision))))
                }
                VariableSpec::RandomChoice { choices } => Some(
                    choices
                        .choose(rng)
                        .cloned()
                        .ok_or_else(|| format!("'{}' has no choices", name))?,
                ),
                VariableSpec::Computed { .. } => None,
            };
        }

        for index in 0..variables.len() {
            let Some(formula) = &self.compiled.formulas[index] else {
                continue;
            };
            let (name, spec) = &variables[index];
            let value = formula
                .evaluate(&AttemptBindings {
                    variables,
                    slots: &slots,
                })
                .map_err(|e| format!("error evaluating formula '{}' for '{}': {}", formula.source(), name, e))?;
            let value = match (value, spec) {
                (Value::Float(f), VariableSpec::Computed { precision, .. }) => {
                    Value::Float(round_to(f, self.precision_for(*precision)))
                }
                (other, _) => other,
            };
            slots[index] = Some(value);
        }

        let bindings = AttemptBindings {
            variables,
            slots: &slots,
        };
        for constraint in &self.compiled.constraints {
            match constraint.evaluate_condition(&bindings) {
                Ok(true) => {}
                Ok(false) => return Err(format!("constraint '{}' not satisfied", constraint.source())),
                Err(e) => return Err(format!("constraint '{}' failed: {}", constraint.source(), e)),
            }
        }

        Ok(variables
            .iter()
            .zip(slots)
            .filter_map(|((name, _), slot)| slot.map(|value| (name.clone(), value)))
            .collect())
    }
}

/// Uniform draw from `[min, max]`. Bounds whose span overflows `f64`
/// interpolate between the endpoints instead.
fn draw_float<R: Rng + ?Sized>(rng: &mut R, min: f64, max: f64) -> f64 {
    if (max - min).is_finite() {
        return rng.gen_range(min..=max);
    }
    let t: f64 = rng.gen();
    (min * (1.0 - t) + max * t).clamp(min, max)
}

/// Generate one assignment with default settings
pub fn generate(spec: &ParameterSpecification) -> Result<GeneratedAssignment, GenerationError> {
    ParameterGenerator::new(spec.clone())?.generate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seeded() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    #[test]
    fn test_parse_wire_format_keeps_order() {
        let spec = ParameterSpecification::from_json(
            r#"{
                "variables": {
                    "b": {"type": "random_int", "min": 1, "max": 5},
                    "a": {"type": "random_float", "min": 0.5, "max": 2, "precision": 1},
                    "color": {"type": "random_choice", "choices": ["red", "blue"]},
                    "c": {"type": "computed", "formula": "a * b"}
                },
                "constraints": ["c > 1"],
                "precision": 3
            }"#,
        )
        .unwrap();
        let names: Vec<&str> = spec.variables.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["b", "a", "color", "c"]);
        assert_eq!(spec.precision, Some(3));
        assert_eq!(spec.get("a"), Some(&VariableSpec::float(0.5, 2.0).with_precision(1)));
        assert_eq!(spec.constraints, vec!["c > 1"]);
    }

    #[test]
    fn test_missing_bounds_use_defaults() {
        let spec = ParameterSpecification::from_json(
            r#"{"variables": {"n": {"type": "random_int"}, "x": {"type": "random_float"}}}"#,
        )
        .unwrap();
        assert_eq!(spec.get("n"), Some(&VariableSpec::int(0, 100)));
        assert_eq!(spec.get("x"), Some(&VariableSpec::float(0.0, 100.0)));
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let err = ParameterSpecification::from_json(r#"{"variables": {"n": {"type": "gaussian"}}}"#).unwrap_err();
        assert!(matches!(err, SpecError::Parse(_)));
    }

    #[test]
    fn test_duplicate_key_replaces_in_place() {
        let spec = ParameterSpecification::from_json(
            r#"{"variables": {
                "a": {"type": "random_int", "min": 1, "max": 2},
                "b": {"type": "random_int", "min": 1, "max": 2},
                "a": {"type": "random_int", "min": 5, "max": 6}
            }}"#,
        )
        .unwrap();
        assert_eq!(spec.variables[0], ("a".to_string(), VariableSpec::int(5, 6)));
        assert_eq!(spec.variables.len(), 2);
    }

    #[test]
    fn test_serialize_round_trips_order() {
        let spec = ParameterSpecification::new()
            .variable("z", VariableSpec::int(1, 2))
            .variable("y", VariableSpec::computed("z + 1"));
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.find("\"z\"").unwrap() < json.find("\"y\"").unwrap());
        assert_eq!(ParameterSpecification::from_json(&json).unwrap(), spec);
    }

    #[test]
    fn test_validate_rejects_bad_variables() {
        let cases = vec![
            VariableSpec::choice(vec![]),
            VariableSpec::int(5, 1),
            VariableSpec::float(2.0, 1.0),
            VariableSpec::float(0.0, f64::INFINITY),
            VariableSpec::computed("  "),
            VariableSpec::computed("a +"),
            VariableSpec::computed("a.__class__"),
        ];
        for spec in cases {
            let parameters = ParameterSpecification::new().variable("v", spec.clone());
            assert!(parameters.validate().is_err(), "{:?} should be invalid", spec);
        }
    }

    #[test]
    fn test_validate_rejects_malformed_constraint() {
        let spec = ParameterSpecification::new()
            .variable("a", VariableSpec::int(1, 2))
            .constraint("a >");
        assert!(matches!(
            spec.validate(),
            Err(SpecError::MalformedConstraint { index: 0, .. })
        ));
    }

    #[test]
    fn test_detects_cycles() {
        let spec = ParameterSpecification::new()
            .variable("x", VariableSpec::int(1, 2))
            .variable("a", VariableSpec::computed("b + x"))
            .variable("b", VariableSpec::computed("c * 2"))
            .variable("c", VariableSpec::computed("a - 1"));
        match spec.validate() {
            Err(SpecError::CyclicDependency { cycle }) => assert_eq!(cycle, vec!["a", "b", "c", "a"]),
            other => panic!("expected cycle, got {:?}", other),
        }

        let self_reference = ParameterSpecification::new().variable("a", VariableSpec::computed("a + 1"));
        assert!(matches!(
            self_reference.validate(),
            Err(SpecError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_generator_reports_invalid_spec() {
        let spec = ParameterSpecification::new().variable("a", VariableSpec::computed("a"));
        assert!(matches!(
            ParameterGenerator::new(spec),
            Err(GenerationError::InvalidSpec(SpecError::CyclicDependency { .. }))
        ));
    }

    #[test]
    fn test_empty_spec_generates_empty_assignment() {
        let generator = ParameterGenerator::new(ParameterSpecification::new()).unwrap();
        let assignment = generator.generate_with(&mut seeded()).unwrap();
        assert!(assignment.is_empty());
    }

    #[test]
    fn test_computed_values_follow_declaration_order() {
        let spec = ParameterSpecification::new()
            .variable("a", VariableSpec::int(1, 50))
            .variable("b", VariableSpec::int(1, 50))
            .variable("c", VariableSpec::computed("a + b"))
            .variable("d", VariableSpec::computed("c * 2"));
        let assignment = ParameterGenerator::new(spec)
            .unwrap()
            .generate_with(&mut seeded())
            .unwrap();
        let names: Vec<&str> = assignment.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b", "c", "d"]);
        let (Some(Value::Int(a)), Some(Value::Int(b)), Some(Value::Int(c)), Some(Value::Int(d))) = (
            assignment.get("a"),
            assignment.get("b"),
            assignment.get("c"),
            assignment.get("d"),
        ) else {
            panic!("unexpected assignment {:?}", assignment);
        };
        assert_eq!(*c, a + b);
        assert_eq!(*d, 2 * c);
    }

    #[test]
    fn test_forward_reference_consumes_retries() {
        let spec = ParameterSpecification::new()
            .variable("a", VariableSpec::computed("b + 1"))
            .variable("b", VariableSpec::computed("2"));
        let generator = ParameterGenerator::new(spec).unwrap().with_max_retries(5);
        match generator.generate_with(&mut seeded()) {
            Err(GenerationError::Exhausted { attempts, last_rejection }) => {
                assert_eq!(attempts, 5);
                assert!(last_rejection.contains("name 'b' is not defined"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[test]
    fn test_unsatisfiable_constraint_exhausts() {
        let spec = ParameterSpecification::new()
            .variable("a", VariableSpec::int(1, 5))
            .variable("b", VariableSpec::int(10, 20))
            .constraint("a > b");
        let result = ParameterGenerator::new(spec).unwrap().generate_with(&mut seeded());
        assert!(matches!(result, Err(GenerationError::Exhausted { attempts: 100, .. })));
    }

    #[test]
    fn test_undeclared_name_in_constraint_is_rejection() {
        let spec = ParameterSpecification::new()
            .variable("a", VariableSpec::int(1, 5))
            .constraint("a > missing");
        let result = ParameterGenerator::new(spec)
            .unwrap()
            .with_max_retries(3)
            .generate_with(&mut seeded());
        assert!(matches!(result, Err(GenerationError::Exhausted { attempts: 3, .. })));
    }

    #[test]
    fn test_non_boolean_constraint_is_rejection() {
        let spec = ParameterSpecification::new()
            .variable("a", VariableSpec::int(1, 5))
            .constraint("a");
        let result = ParameterGenerator::new(spec)
            .unwrap()
            .with_max_retries(2)
            .generate_with(&mut seeded());
        assert!(matches!(result, Err(GenerationError::Exhausted { .. })));
    }

    #[test]
    fn test_float_precision_resolution() {
        let spec = ParameterSpecification::new()
            .variable("own", VariableSpec::float(0.0, 10.0).with_precision(1))
            .variable("spec_wide", VariableSpec::float(0.0, 10.0))
            .variable("ratio", VariableSpec::computed("1 / 3"))
            .variable("third", VariableSpec::computed("1 / 3").with_precision(4))
            .with_precision(3);
        let assignment = ParameterGenerator::new(spec)
            .unwrap()
            .generate_with(&mut seeded())
            .unwrap();
        let digits = |name: &str| match assignment.get(name) {
            Some(Value::Float(f)) => {
                let text = format!("{}", f);
                text.split_once('.').map(|(_, frac)| frac.len()).unwrap_or(0)
            }
            other => panic!("expected float for {}, got {:?}", name, other),
        };
        assert!(digits("own") <= 1);
        assert!(digits("spec_wide") <= 3);
        assert_eq!(assignment.get("ratio"), Some(&Value::Float(0.333)));
        assert_eq!(assignment.get("third"), Some(&Value::Float(0.3333)));
    }

    #[test]
    fn test_default_precision_override() {
        let spec = ParameterSpecification::new().variable("r", VariableSpec::computed("2 / 3"));
        let generator = ParameterGenerator::new(spec).unwrap();
        assert_eq!(
            generator.generate_with(&mut seeded()).unwrap().get("r"),
            Some(&Value::Float(0.67))
        );
        let generator = generator.with_default_precision(4);
        assert_eq!(
            generator.generate_with(&mut seeded()).unwrap().get("r"),
            Some(&Value::Float(0.6667))
        );
    }

    #[test]
    fn test_float_bounds_spanning_whole_range() {
        let spec = ParameterSpecification::new()
            .variable("x", VariableSpec::float(-1.0e308, 1.0e308))
            .variable("y", VariableSpec::float(f64::MIN, f64::MAX).with_precision(0));
        let generator = ParameterGenerator::new(spec).unwrap();
        let mut rng = seeded();
        for _ in 0..50 {
            let assignment = generator.generate_with(&mut rng).unwrap();
            let x = assignment.get("x").and_then(Value::as_f64).unwrap();
            let y = assignment.get("y").and_then(Value::as_f64).unwrap();
            assert!((-1.0e308..=1.0e308).contains(&x), "x = {}", x);
            assert!(y.is_finite(), "y = {}", y);
        }
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let spec = ParameterSpecification::new()
            .variable("a", VariableSpec::int(1, 1000))
            .variable("x", VariableSpec::float(-5.0, 5.0));
        let generator = ParameterGenerator::new(spec).unwrap();
        let first = generator.generate_with(&mut StdRng::seed_from_u64(7)).unwrap();
        let second = generator.generate_with(&mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_assignment_serializes_as_map() {
        let assignment: GeneratedAssignment = vec![
            ("b".to_string(), Value::Int(2)),
            ("a".to_string(), Value::Float(1.5)),
        ]
        .into_iter()
        .collect();
        assert_eq!(serde_json::to_string(&assignment).unwrap(), r#"{"b":2,"a":1.5}"#);
        let parsed: GeneratedAssignment = serde_json::from_str(r#"{"b":2,"a":1.5}"#).unwrap();
        assert_eq!(parsed, assignment);
    }

    proptest! {
        #[test]
        fn prop_random_int_within_bounds(min in -1000i64..1000, span in 0i64..1000, seed in any::<u64>()) {
            let max = min + span;
            let spec = ParameterSpecification::new().variable("n", VariableSpec::int(min, max));
            let assignment = ParameterGenerator::new(spec).unwrap()
                .generate_with(&mut StdRng::seed_from_u64(seed)).unwrap();
            match assignment.get("n") {
                Some(Value::Int(n)) => prop_assert!(min <= *n && *n <= max),
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }

        #[test]
        fn prop_choice_is_member(choices in prop::collection::vec(-50i64..50, 1..8), seed in any::<u64>()) {
            let values: Vec<Value> = choices.iter().copied().map(Value::Int).collect();
            let spec = ParameterSpecification::new().variable("c", VariableSpec::choice(values.clone()));
            let assignment = ParameterGenerator::new(spec).unwrap()
                .generate_with(&mut StdRng::seed_from_u64(seed)).unwrap();
            let drawn = assignment.get("c").cloned();
            prop_assert!(drawn.map(|v| values.contains(&v)).unwrap_or(false));
        }

        #[test]
        fn prop_computed_sum_is_exact(seed in any::<u64>()) {
            let spec = ParameterSpecification::new()
                .variable("a", VariableSpec::int(-10_000, 10_000))
                .variable("b", VariableSpec::int(-10_000, 10_000))
                .variable("c", VariableSpec::computed("a + b"));
            let assignment = ParameterGenerator::new(spec).unwrap()
                .generate_with(&mut StdRng::seed_from_u64(seed)).unwrap();
            match (assignment.get("a"), assignment.get("b"), assignment.get("c")) {
                (Some(Value::Int(a)), Some(Value::Int(b)), Some(Value::Int(c))) => prop_assert_eq!(*c, a + b),
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }

        #[test]
        fn prop_float_sum_within_rounding(seed in any::<u64>()) {
            let spec = ParameterSpecification::new()
                .variable("a", VariableSpec::float(0.0, 10.0))
                .variable("b", VariableSpec::float(0.0, 10.0))
                .variable("c", VariableSpec::computed("a + b"));
            let assignment = ParameterGenerator::new(spec).unwrap()
                .generate_with(&mut StdRng::seed_from_u64(seed)).unwrap();
            match (assignment.get("a"), assignment.get("b"), assignment.get("c")) {
                (Some(Value::Float(a)), Some(Value::Float(b)), Some(Value::Float(c))) => {
                    prop_assert!((c - (a + b)).abs() <= 0.005 + 1e-9)
                }
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }

        #[test]
        fn prop_constraint_always_holds(seed in any::<u64>()) {
            let spec = ParameterSpecification::new()
                .variable("a", VariableSpec::int(1, 20))
                .variable("b", VariableSpec::int(1, 20))
                .constraint("a > b");
            let assignment = ParameterGenerator::new(spec).unwrap()
                .generate_with(&mut StdRng::seed_from_u64(seed)).unwrap();
            match (assignment.get("a"), assignment.get("b")) {
                (Some(Value::Int(a)), Some(Value::Int(b))) => prop_assert!(a > b),
                other => prop_assert!(false, "unexpected {:?}", other),
            }
        }
    }
}
