//! Parameterized flashcard engine
//!
//! - `evaluator`: safe formula evaluation over a closed namespace
//! - `parameters`: variable specs and rejection-sampling generation
//! - `template`: `{name}` placeholder rendering
//! - `graph`: sandboxed graph code execution in a worker process
//! - `pipeline` / `flashcard`: cards built from one consistent assignment

pub mod cli;
pub mod error;
pub mod evaluator;
pub mod flashcard;
pub mod graph;
pub mod graph_config;
pub mod parameters;
pub mod pipeline;
pub mod process_utils;
pub mod settings;
pub mod template;
pub mod value;

pub use error::{EvaluationError, GenerationError, SandboxError, SettingsError, SpecError};
pub use evaluator::{evaluate, Bindings, Formula};
pub use flashcard::{CardPresenter, FlashcardRecord, PresentedCard, QuestionType};
pub use graph::{GraphExecutor, GraphOutput, SandboxConfig};
pub use graph_config::{graph_template, GraphConfig, GraphType};
pub use parameters::{generate, GeneratedAssignment, ParameterGenerator, ParameterSpecification, VariableSpec};
pub use pipeline::{build_card, CardPipeline, ParameterizedCard};
pub use plot_sandbox::Figure;
pub use settings::EngineSettings;
pub use template::{render, TemplateRenderer};
pub use value::Value;

use clap::Parser;
use cli::{apply_cli_overrides, parse_json_or_file, read_value_or_file, CliArgs, Command};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries JSON results (and the worker protocol), so logs go to stderr
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Serialize)]
struct CardOutput {
    #[serde(flatten)]
    card: ParameterizedCard,
    #[serde(skip_serializing_if = "Option::is_none")]
    figure: Option<Figure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    figure_error: Option<String>,
}

/// Run the CLI. Returns the process exit code.
pub fn run() -> i32 {
    let args = CliArgs::parse();
    init_tracing();

    if let Command::SandboxWorker = args.command {
        return graph::run_sandbox_worker();
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return 1;
        }
    };

    runtime.block_on(async move {
        let mut settings = match &args.config {
            Some(path) => settings::load_settings_from(path).await,
            None => settings::load_settings().await,
        };
        apply_cli_overrides(&args, &mut settings);

        match dispatch(args.command, &settings).await {
            Ok(output) => match serde_json::to_string_pretty(&output) {
                Ok(text) => {
                    println!("{}", text);
                    0
                }
                Err(e) => {
                    eprintln!("Failed to encode output: {}", e);
                    1
                }
            },
            Err(message) => {
                eprintln!("{}", message);
                1
            }
        }
    })
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|e| format!("Failed to encode output: {}", e))
}

async fn dispatch(command: Command, settings: &EngineSettings) -> Result<serde_json::Value, String> {
    match command {
        Command::Card {
            spec,
            question,
            answer,
            seed,
            graph_code,
            graph_config,
        } => {
            let spec: ParameterSpecification = parse_json_or_file(&spec)?;
            let question = read_value_or_file(&question)?;
            let answer = read_value_or_file(&answer)?;
            let pipeline = CardPipeline::new(settings);

            let card = match seed {
                Some(seed) => pipeline.build_card_with(&spec, &question, &answer, &mut StdRng::seed_from_u64(seed)),
                None => pipeline.build_card(&spec, &question, &answer),
            }
            .map_err(|e| format!("[generation] {}", e))?;

            let mut output = CardOutput {
                card,
                figure: None,
                figure_error: None,
            };
            if let Some(code) = graph_code {
                let code = read_value_or_file(&code)?;
                let config: GraphConfig = match graph_config {
                    Some(raw) => parse_json_or_file(&raw)?,
                    None => GraphConfig::default(),
                };
                match pipeline.figure_for(&output.card.assignment, &code, &config).await {
                    Ok(figure) => output.figure = Some(figure),
                    Err(e) => output.figure_error = Some(format!("[{}] {}", e.kind(), e)),
                }
            }
            to_json(&output)
        }
        Command::Present { record, seed } => {
            let record: FlashcardRecord = parse_json_or_file(&record)?;
            let presenter = CardPresenter::new(settings);
            let presented = match seed {
                Some(seed) => presenter.present_seeded(&record, seed).await,
                None => presenter.present(&record).await,
            };
            to_json(&presented)
        }
        Command::Plot {
            code,
            values,
            graph_config,
        } => {
            let code = read_value_or_file(&code)?;
            let values: GeneratedAssignment = match values {
                Some(raw) => parse_json_or_file(&raw)?,
                None => GeneratedAssignment::default(),
            };
            let config: GraphConfig = match graph_config {
                Some(raw) => parse_json_or_file(&raw)?,
                None => GraphConfig::default(),
            };
            let figure = CardPipeline::new(settings)
                .figure_for(&values, &code, &config)
                .await
                .map_err(|e| format!("[{}] {}", e.kind(), e))?;
            to_json(&figure)
        }
        Command::Template { graph_type } => {
            let graph_type =
                GraphType::parse(&graph_type).ok_or_else(|| format!("Unknown graph type '{}'", graph_type))?;
            to_json(&graph_template(graph_type))
        }
        Command::SandboxWorker => Err("sandbox-worker must be the first argument".to_string()),
    }
}
