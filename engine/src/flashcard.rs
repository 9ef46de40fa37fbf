//! Flashcard presentation
//!
//! Turns a stored flashcard record into what a study session shows:
//! - plain cards keep their text; a spec on them only feeds the graph
//! - parameterized cards get a fresh assignment, rendered text and
//!   (optionally) a figure drawn from the same values
//! - anything that cannot be generated degrades to an explicit [`Fallback`]

use chrono::{DateTime, Utc};
use plot_sandbox::Figure;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::graph_config::{GraphConfig, GraphType};
use crate::parameters::{GeneratedAssignment, ParameterSpecification};
use crate::pipeline::CardPipeline;
use crate::settings::EngineSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[default]
    Standard,
    Parameterized,
    StepByStep,
    MultipleChoice,
}

/// A flashcard as stored by the content layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlashcardRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub question_type: QuestionType,
    pub question: String,
    pub answer: String,
    pub question_template: String,
    pub answer_template: String,
    /// Serialized `ParameterSpecification`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter_spec: Option<serde_json::Value>,
    pub graph_type: GraphType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_code: Option<String>,
    pub graph_config: GraphConfig,
}

impl FlashcardRecord {
    /// Graph code worth running, if any
    pub fn graph_code(&self) -> Option<&str> {
        if self.graph_type == GraphType::None {
            return None;
        }
        self.graph_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
    }
}

/// Why part of a card was not generated
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fallback {
    /// Parameters could not be generated; the raw templates are shown
    RawTemplates { reason: String },
    NoFigure { reason: String },
}

/// One presentation of a flashcard
#[derive(Debug, Clone, Serialize)]
pub struct PresentedCard {
    pub id: Uuid,
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_id: Option<u64>,
    pub question_type: QuestionType,
    pub question: String,
    pub answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<GeneratedAssignment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub figure: Option<Figure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fallbacks: Vec<Fallback>,
}

impl PresentedCard {
    pub fn is_degraded(&self) -> bool {
        !self.fallbacks.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CardPresenter {
    pipeline: CardPipeline,
    enable_graphs: bool,
}

impl Default for CardPresenter {
    fn default() -> Self {
        Self::new(&EngineSettings::default())
    }
}

impl CardPresenter {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            pipeline: CardPipeline::new(settings),
            enable_graphs: settings.enable_graph_generation,
        }
    }

    pub fn with_pipeline(pipeline: CardPipeline, enable_graphs: bool) -> Self {
        Self { pipeline, enable_graphs }
    }

    pub fn pipeline(&self) -> &CardPipeline {
        &self.pipeline
    }

    pub async fn present(&self, record: &FlashcardRecord) -> PresentedCard {
        // Draw synchronously so no thread-local rng is held across the figure await
        let seed = rand::thread_rng().gen();
        self.present_seeded(record, seed).await
    }

    pub async fn present_seeded(&self, record: &FlashcardRecord, seed: u64) -> PresentedCard {
        let mut presented = PresentedCard {
            id: Uuid::new_v4(),
            generated_at: Utc::now(),
            card_id: record.id,
            question_type: record.question_type,
            question: record.question.clone(),
            answer: record.answer.clone(),
            parameters: None,
            figure: None,
            fallbacks: Vec::new(),
        };

        let assignment = if record.question_type == QuestionType::Parameterized {
            match self.generate(record, seed) {
                Ok(card) => {
                    presented.question = card.question;
                    presented.answer = card.answer;
                    presented.parameters = Some(card.assignment.clone());
                    Some(card.assignment)
                }
                Err(reason) => {
                    tracing::warn!("[CardPresenter] Showing raw templates for card {:?}: {}", record.id, reason);
                    presented.question = record.question_template.clone();
                    presented.answer = record.answer_template.clone();
                    presented.fallbacks.push(Fallback::RawTemplates { reason });
                    None
                }
            }
        } else {
            None
        };

        if !self.enable_graphs {
            return presented;
        }
        let Some(code) = record.graph_code() else {
            return presented;
        };

        let assignment = match (assignment, record.question_type) {
            (Some(assignment), _) => assignment,
            (None, QuestionType::Parameterized) => {
                presented.fallbacks.push(Fallback::NoFigure {
                    reason: "parameters were not generated".to_string(),
                });
                return presented;
            }
            // Other card types still draw graph values when they carry a spec
            (None, _) => match self.graph_parameters(record, seed) {
                Ok(assignment) => {
                    if !assignment.is_empty() {
                        presented.parameters = Some(assignment.clone());
                    }
                    assignment
                }
                Err(reason) => {
                    tracing::warn!("[CardPresenter] No graph parameters for card {:?}: {}", record.id, reason);
                    presented.fallbacks.push(Fallback::NoFigure { reason });
                    return presented;
                }
            },
        };

        match self.pipeline.figure_for(&assignment, code, &record.graph_config).await {
            Ok(figure) => presented.figure = Some(figure),
            Err(e) => {
                tracing::warn!("[CardPresenter] No figure for card {:?}: {}", record.id, e);
                presented.fallbacks.push(Fallback::NoFigure { reason: e.to_string() });
            }
        }

        presented
    }

    fn graph_parameters(&self, record: &FlashcardRecord, seed: u64) -> Result<GeneratedAssignment, String> {
        if record.parameter_spec.is_none() {
            return Ok(GeneratedAssignment::default());
        }
        let spec = parse_spec(record)?;
        let mut rng = StdRng::seed_from_u64(seed);
        self.pipeline
            .generator(&spec)
            .and_then(|generator| generator.generate_with(&mut rng))
            .map_err(|e| e.to_string())
    }

    fn generate(
        &self,
        record: &FlashcardRecord,
        seed: u64,
    ) -> Result<crate::pipeline::ParameterizedCard, String> {
        let spec = parse_spec(record)?;
        let mut rng = StdRng::seed_from_u64(seed);
        self.pipeline
            .build_card_with(&spec, &record.question_template, &record.answer_template, &mut rng)
            .map_err(|e| e.to_string())
    }
}

/// A record's spec, stored either inline or as JSON text
fn parse_spec(record: &FlashcardRecord) -> Result<ParameterSpecification, String> {
    match &record.parameter_spec {
        Some(serde_json::Value::String(text)) => ParameterSpecification::from_json(text).map_err(|e| e.to_string()),
        Some(raw) => ParameterSpecification::deserialize(raw).map_err(|e| format!("invalid parameter spec: {}", e)),
        None => Ok(ParameterSpecification::default()),
    }
}
