//! Parameterized card pipeline
//!
//! Generation runs first, then both templates are rendered from that one
//! assignment, then the same assignment is spliced into the graph code.

use std::time::Duration;

use plot_sandbox::Figure;
use rand::Rng;
use serde::Serialize;

use crate::error::{GenerationError, SandboxError};
use crate::graph::{GraphExecutor, SandboxConfig};
use crate::graph_config::GraphConfig;
use crate::parameters::{GeneratedAssignment, ParameterGenerator, ParameterSpecification};
use crate::settings::EngineSettings;
use crate::template::TemplateRenderer;

/// A rendered question/answer pair and the values behind it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterizedCard {
    pub question: String,
    pub answer: String,
    pub assignment: GeneratedAssignment,
}

/// Build a card with default settings
pub fn build_card(
    spec: &ParameterSpecification,
    question_template: &str,
    answer_template: &str,
) -> Result<ParameterizedCard, GenerationError> {
    CardPipeline::default().build_card(spec, question_template, answer_template)
}

#[derive(Debug, Clone)]
pub struct CardPipeline {
    max_retries: usize,
    default_precision: u32,
    graph_timeout: Duration,
    renderer: TemplateRenderer,
    executor: GraphExecutor,
}

impl Default for CardPipeline {
    fn default() -> Self {
        Self::new(&EngineSettings::default())
    }
}

impl CardPipeline {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            default_precision: settings.default_precision,
            graph_timeout: settings.graph_timeout(),
            renderer: TemplateRenderer::new(),
            executor: GraphExecutor::new(SandboxConfig::from_settings(settings)),
        }
    }

    pub fn with_graph_timeout(mut self, timeout: Duration) -> Self {
        self.graph_timeout = timeout;
        self
    }

    pub fn graph_timeout(&self) -> Duration {
        self.graph_timeout
    }

    pub fn generator(&self, spec: &ParameterSpecification) -> Result<ParameterGenerator, GenerationError> {
        Ok(ParameterGenerator::new(spec.clone())?
            .with_max_retries(self.max_retries)
            .with_default_precision(self.default_precision))
    }

    pub fn build_card(
        &self,
        spec: &ParameterSpecification,
        question_template: &str,
        answer_template: &str,
    ) -> Result<ParameterizedCard, GenerationError> {
        self.build_card_with(spec, question_template, answer_template, &mut rand::thread_rng())
    }

    pub fn build_card_with<R: Rng + ?Sized>(
        &self,
        spec: &ParameterSpecification,
        question_template: &str,
        answer_template: &str,
        rng: &mut R,
    ) -> Result<ParameterizedCard, GenerationError> {
        let assignment = self.generator(spec)?.generate_with(rng)?;
        Ok(self.render(question_template, answer_template, assignment))
    }

    pub fn render(
        &self,
        question_template: &str,
        answer_template: &str,
        assignment: GeneratedAssignment,
    ) -> ParameterizedCard {
        ParameterizedCard {
            question: self.renderer.render(question_template, &assignment),
            answer: self.renderer.render(answer_template, &assignment),
            assignment,
        }
    }

    /// Run graph code against the assignment a card was rendered from
    pub async fn figure_for(
        &self,
        assignment: &GeneratedAssignment,
        graph_code: &str,
        config: &GraphConfig,
    ) -> Result<Figure, SandboxError> {
        let output = self
            .executor
            .execute(graph_code, assignment, self.graph_timeout)
            .await?;
        let mut figure = output.figure;
        config.apply(&mut figure);
        Ok(figure)
    }
}
