//! The bounded step loop: prompt, model, parse, dispatch, observe.
//!
//! Every per-question value lives in a [`QuestionContext`] created fresh by
//! [`SqlAgent::run_question`]; the agent itself only holds the model, the
//! tool registry and configuration, so nothing carries over between
//! questions.

use crate::agent::evidence::EvidenceCache;
use crate::agent::model::LanguageModel;
use crate::agent::parser::{self, Section, ToolInvocation};
use crate::agent::prompt;
use crate::agent::tools::{self, QueryOutcome, ToolKind, ToolOutput, ToolRegistry};
use crate::core::config::AgentConfig;
use crate::core::error::ScoutError;
use crate::core::output::truncate_observation;
use crate::core::trace::{self, TraceEvent, TraceSink};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::Path;

pub const NO_EVIDENCE_OBSERVATION: &str = "You are answering without running any tool yet. \
     Please gather evidence using one ACTION before concluding.";
pub const STALE_EVIDENCE_WARNING: &str =
    "No new evidence gathered since the last corrective observation before FINAL ANSWER.";
const NO_ACTION: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// A registered tool ran; its result or error is the observation.
    Tool,
    /// The model named a tool that does not exist.
    UnknownTool,
    /// The model output had no decodable action.
    ParseFailure,
    /// The model tried to answer before any tool ran.
    NoEvidence,
}

/// One (thought, action, observation) record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceBlock {
    pub kind: BlockKind,
    pub thought: Option<String>,
    pub action: String,
    pub observation: String,
}

impl TraceBlock {
    pub fn is_evidence(&self) -> bool {
        self.kind == BlockKind::Tool
    }

    /// Literal text replayed into later prompts.
    pub fn render(&self) -> String {
        format!(
            "THOUGHT: {}\nACTION: {}\nOBSERVATION: {}",
            self.thought.as_deref().unwrap_or("(none)"),
            self.action,
            self.observation
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Answered,
    StepBudgetExhausted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub question_id: String,
    pub answer: String,
    pub status: RunStatus,
    /// Model calls made.
    pub steps: usize,
    pub history: Vec<TraceBlock>,
    /// Non-blocking consistency warnings.
    pub warnings: Vec<String>,
    pub logs: Vec<String>,
    pub evidence: EvidenceCache,
}

/// Mutable state owned by one in-flight question.
#[derive(Debug)]
pub struct QuestionContext {
    pub question_id: String,
    pub question: String,
    pub history: Vec<TraceBlock>,
    pub evidence: EvidenceCache,
    pub logs: Vec<String>,
    pub warnings: Vec<String>,
}

impl QuestionContext {
    pub fn new(question: &str) -> Self {
        Self {
            question_id: trace::new_ulid(),
            question: question.to_string(),
            history: Vec::new(),
            evidence: EvidenceCache::default(),
            logs: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn has_evidence(&self) -> bool {
        self.history.iter().any(TraceBlock::is_evidence)
    }

    fn rendered_history(&self) -> Vec<String> {
        self.history.iter().map(TraceBlock::render).collect()
    }

    fn into_outcome(self, answer: String, status: RunStatus, steps: usize) -> RunOutcome {
        RunOutcome {
            question_id: self.question_id,
            answer,
            status,
            steps,
            history: self.history,
            warnings: self.warnings,
            logs: self.logs,
            evidence: self.evidence,
        }
    }
}

pub struct SqlAgent<M> {
    model: M,
    registry: ToolRegistry,
    config: AgentConfig,
    trace: Option<TraceSink>,
}

impl<M: LanguageModel> SqlAgent<M> {
    pub fn new(registry: ToolRegistry, model: M, config: AgentConfig) -> Self {
        let trace = config.trace_path.as_deref().map(TraceSink::new);
        Self {
            model,
            registry,
            config,
            trace,
        }
    }

    /// Open `db_path` read-only and build an agent over it.
    pub fn open(db_path: &Path, model: M, config: AgentConfig) -> Result<Self, ScoutError> {
        config.validate()?;
        let (registry, _mode) = ToolRegistry::open(db_path, &config)?;
        Ok(Self::new(registry, model, config))
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Answer `question`, returning only the answer text.
    pub fn run(&mut self, question: &str) -> Result<String, ScoutError> {
        self.run_question(question).map(|o| o.answer)
    }

    /// Answer `question` with the full trace. Only a model failure is an
    /// `Err`; every tool or parse problem becomes an observation.
    pub fn run_question(&mut self, question: &str) -> Result<RunOutcome, ScoutError> {
        let mut ctx = QuestionContext::new(question);
        let tool_docs = tools::render_tool_docs();

        for step in 0..self.config.step_limit {
            let prompt = prompt::build_prompt(&tool_docs, &ctx.rendered_history(), question);
            let reply = self.model.complete(&prompt)?;

            let thought = non_empty(parser::extract_section(&reply, Section::Thought));
            ctx.logs.push(format!(
                "[STEP {}] THOUGHT: {}",
                step,
                thought.as_deref().unwrap_or("(none)")
            ));

            let final_answer = parser::extract_section(&reply, Section::FinalAnswer);
            if !final_answer.is_empty() {
                if !ctx.has_evidence() {
                    ctx.history.push(TraceBlock {
                        kind: BlockKind::NoEvidence,
                        thought,
                        action: NO_ACTION.to_string(),
                        observation: NO_EVIDENCE_OBSERVATION.to_string(),
                    });
                    self.record(&mut ctx, step, "no_evidence", None, &prompt, Some(NO_EVIDENCE_OBSERVATION));
                    continue;
                }

                // Advisory only; the evidence requirement above is the guard.
                if ctx.history.last().is_some_and(|b| !b.is_evidence()) {
                    ctx.warnings.push(STALE_EVIDENCE_WARNING.to_string());
                }
                if let Some(mismatch) = ctx.evidence.check_final_answer(&final_answer) {
                    ctx.warnings.push(mismatch);
                }
                self.record(&mut ctx, step, "final", None, &prompt, None);
                return Ok(ctx.into_outcome(final_answer, RunStatus::Answered, step + 1));
            }

            let block = match parser::parse_action(&reply) {
                Ok(invocation) => {
                    let (kind, observation) = self.dispatch(&mut ctx, step, &invocation);
                    TraceBlock {
                        kind,
                        thought,
                        action: invocation.render(),
                        observation,
                    }
                }
                Err(e) => TraceBlock {
                    kind: BlockKind::ParseFailure,
                    thought: thought.or_else(|| Some("(parsing failed)".to_string())),
                    action: NO_ACTION.to_string(),
                    observation: format!(
                        "ParseError: {}. Ensure valid JSON with double quotes.",
                        e
                    ),
                },
            };

            let event_kind = match block.kind {
                BlockKind::Tool => "tool",
                BlockKind::UnknownTool => "unknown_tool",
                BlockKind::ParseFailure => "parse_error",
                BlockKind::NoEvidence => "no_evidence",
            };
            let tool_name = (block.kind == BlockKind::Tool)
                .then(|| block.action.split('{').next().unwrap_or_default().to_string());
            let observation = block.observation.clone();
            ctx.history.push(block);
            self.record(&mut ctx, step, event_kind, tool_name, &prompt, Some(&observation));
        }

        let steps = self.config.step_limit;
        let answer = self.exhausted_summary(&ctx);
        self.record(&mut ctx, steps, "budget_exhausted", None, "", None);
        Ok(ctx.into_outcome(answer, RunStatus::StepBudgetExhausted, steps))
    }

    /// Resolve, normalize and invoke. Never fails: errors become the
    /// observation text.
    fn dispatch(
        &self,
        ctx: &mut QuestionContext,
        step: usize,
        invocation: &ToolInvocation,
    ) -> (BlockKind, String) {
        let cap = self.config.observation_max_chars;
        let Some(kind) = ToolKind::resolve(&invocation.name) else {
            let err = ScoutError::UnknownTool(invocation.name.clone());
            return (BlockKind::UnknownTool, truncate_observation(&err.to_observation(), cap));
        };

        let args = normalize_arguments(kind, invocation.arguments.clone());
        let body = match self.registry.invoke(kind, &args) {
            Ok(output) => {
                if let ToolOutput::Query(QueryOutcome::Rows(rows)) = &output
                    && rows.row_cap_applied
                {
                    ctx.logs.push(format!(
                        "[STEP {}] row cap {} applied",
                        step,
                        self.registry.row_cap()
                    ));
                }
                match serde_json::to_value(&output) {
                    Ok(value) => {
                        ctx.evidence.ingest(kind, &args, &value);
                        value.to_string()
                    }
                    Err(e) => ScoutError::JsonError(e).to_observation(),
                }
            }
            Err(e) => e.to_observation(),
        };
        (BlockKind::Tool, truncate_observation(&body, cap))
    }

    fn exhausted_summary(&self, ctx: &QuestionContext) -> String {
        let keep = self.config.summary_blocks;
        let tail = &ctx.history[ctx.history.len().saturating_sub(keep)..];
        let tried = tail
            .iter()
            .map(TraceBlock::render)
            .collect::<Vec<_>>()
            .join("\n\n");
        format!(
            "Max step limit reached. Here's what I tried:\n{}\n\nConsider refining the question or being more specific.",
            tried
        )
    }

    fn record(
        &self,
        ctx: &mut QuestionContext,
        step: usize,
        kind: &str,
        tool: Option<String>,
        prompt: &str,
        observation: Option<&str>,
    ) {
        let Some(sink) = &self.trace else {
            return;
        };
        let mut event = TraceEvent::new(&ctx.question_id, step, kind);
        if !prompt.is_empty() {
            event = event.with_prompt(prompt);
        }
        event.tool = tool;
        event.observation = observation.map(str::to_string);
        if let Err(e) = sink.append(event) {
            ctx.logs
                .push(format!("[STEP {}] trace write failed: {}", step, e));
        }
    }
}

/// Fold common argument aliases into the canonical parameter names.
pub fn normalize_arguments(kind: ToolKind, mut args: Map<String, Value>) -> Map<String, Value> {
    let aliases: &[(&str, &str)] = match kind {
        ToolKind::DescribeTable => &[("table", "table_name")],
        ToolKind::QueryDatabase => &[("sql", "query")],
        ToolKind::ListTables => &[],
    };
    for (alias, canonical) in aliases {
        if !args.contains_key(*canonical) {
            if let Some(v) = args.get(*alias).cloned() {
                args.insert(canonical.to_string(), v);
            }
        }
    }
    args
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}
