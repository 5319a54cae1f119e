//! Model backends: anything that turns a prompt into a completion.

use crate::core::config::RetryPolicy;
use crate::core::error::ScoutError;
use crate::core::retry::retry_with_backoff;
use std::collections::VecDeque;
use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};

pub trait LanguageModel {
    fn complete(&mut self, prompt: &str) -> Result<String, ScoutError>;
}

impl<F> LanguageModel for F
where
    F: FnMut(&str) -> Result<String, ScoutError>,
{
    fn complete(&mut self, prompt: &str) -> Result<String, ScoutError> {
        self(prompt)
    }
}

/// Plays back fixed responses in order and keeps every prompt it was sent.
#[derive(Debug, Clone, Default)]
pub struct ScriptedModel {
    responses: VecDeque<String>,
    prompts: Vec<String>,
}

impl ScriptedModel {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            prompts: Vec::new(),
        }
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }
}

impl LanguageModel for ScriptedModel {
    fn complete(&mut self, prompt: &str) -> Result<String, ScoutError> {
        self.prompts.push(prompt.to_string());
        self.responses
            .pop_front()
            .ok_or_else(|| ScoutError::ModelError("scripted responses exhausted".to_string()))
    }
}

/// Runs an external program per call: prompt on stdin, completion on stdout.
#[derive(Debug, Clone)]
pub struct CommandModel {
    program: String,
    args: Vec<String>,
}

impl CommandModel {
    /// Split a command line on whitespace; no shell quoting is applied.
    pub fn from_command_line(command: &str) -> Result<Self, ScoutError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ScoutError::ConfigError("model command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl LanguageModel for CommandModel {
    fn complete(&mut self, prompt: &str) -> Result<String, ScoutError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ScoutError::ModelError(format!("failed to start '{}': {}", self.program, e))
            })?;

        // Feed stdin from a separate thread so a chatty child cannot fill
        // its stdout pipe while we are still writing.
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = prompt.to_string();
            std::thread::spawn(move || stdin.write_all(prompt.as_bytes()))
        });

        let output = child.wait_with_output().map_err(ScoutError::IoError)?;
        let written = match writer.map(|h| h.join()) {
            None | Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => Err(ScoutError::IoError(e)),
            Some(Err(_)) => Err(ScoutError::ModelError(
                "prompt writer thread panicked".to_string(),
            )),
        };
        if !output.status.success() {
            return Err(ScoutError::ModelError(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        match written {
            // The program answered without consuming the whole prompt.
            Err(ScoutError::IoError(e)) if e.kind() == ErrorKind::BrokenPipe => {}
            other => other?,
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Retries the wrapped model's transport failures with backoff.
pub struct RetryingModel<M> {
    inner: M,
    policy: RetryPolicy,
}

impl<M: LanguageModel> RetryingModel<M> {
    pub fn new(inner: M, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl<M: LanguageModel> LanguageModel for RetryingModel<M> {
    fn complete(&mut self, prompt: &str) -> Result<String, ScoutError> {
        let inner = &mut self.inner;
        retry_with_backoff(&self.policy, || inner.complete(prompt))
    }
}
