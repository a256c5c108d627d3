//! External-process stage body.
//!
//! Collaborators such as the hub download client or the compression tool
//! are opaque programs. [`CommandStage`] runs one with templated arguments,
//! classifies its exit status and reads outputs from its stdout.

use crate::context::StageContext;
use crate::core::StageOutputs;
use crate::errors::StageError;
use crate::stages::Stage;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::process::Command;
use tracing::{debug, warn};

fn template_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z0-9_][A-Za-z0-9_-]*)\}").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

fn output_line_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)=(.*)$").unwrap_or_else(|_| unreachable!("static pattern"))
    })
}

/// Configuration of an external command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Program to execute.
    pub program: String,
    /// Arguments; `${input}` placeholders are replaced with input values.
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables, templated like arguments.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Exit codes that mark a retryable failure.
    #[serde(default)]
    pub transient_exit_codes: Vec<i32>,
}

/// Runs an external program as a stage body.
///
/// On success, outputs come from stdout: if the last non-empty line is a
/// JSON object its fields become the outputs, otherwise every `key=value`
/// line is collected. A non-zero exit is transient when its code is listed
/// in `transient_exit_codes` or the process was killed by a signal, and
/// permanent otherwise. Cancelling the run kills the child.
#[derive(Debug, Clone)]
pub struct CommandStage {
    config: CommandConfig,
}

impl CommandStage {
    /// Creates a command stage for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            config: CommandConfig {
                program: program.into(),
                ..CommandConfig::default()
            },
        }
    }

    /// Creates a command stage from configuration.
    #[must_use]
    pub fn from_config(config: CommandConfig) -> Self {
        Self { config }
    }

    /// Adds an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.config.args.push(arg.into());
        self
    }

    /// Adds several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_dir = Some(dir.into());
        self
    }

    /// Marks exit codes as transient failures.
    #[must_use]
    pub fn transient_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.config.transient_exit_codes.extend(codes);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &CommandConfig {
        &self.config
    }

    fn build_command(&self, ctx: &StageContext) -> Result<Command, StageError> {
        let mut command = Command::new(&self.config.program);
        for arg in &self.config.args {
            command.arg(render_template(arg, ctx)?);
        }
        for (key, value) in &self.config.env {
            command.env(key, render_template(value, ctx)?);
        }
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(command)
    }

    fn classify_exit(&self, code: Option<i32>, stderr: &str) -> StageError {
        let detail = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim();
        match code {
            Some(code) if self.config.transient_exit_codes.contains(&code) => StageError::transient(
                format!("{} exited with {code}: {detail}", self.config.program),
            ),
            Some(code) => StageError::permanent(format!(
                "{} exited with {code}: {detail}",
                self.config.program
            )),
            None => StageError::transient(format!(
                "{} terminated by signal: {detail}",
                self.config.program
            )),
        }
    }
}

/// Substitutes `${name}` placeholders with input values.
///
/// String inputs are inserted verbatim; other values use their JSON form.
///
/// # Errors
///
/// Returns `StageError::Permanent` if a placeholder names an absent input.
pub fn render_template(template: &str, ctx: &StageContext) -> Result<String, StageError> {
    let mut missing = None;
    let rendered = template_pattern().replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match ctx.inputs().get(name) {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(StageError::permanent(format!(
            "template '{template}' references missing input '{name}'"
        ))),
        None => Ok(rendered.into_owned()),
    }
}

/// Extracts stage outputs from a command's stdout.
#[must_use]
pub fn parse_outputs(stdout: &str) -> StageOutputs {
    let last = stdout.lines().rev().map(str::trim).find(|l| !l.is_empty());
    if let Some(line) = last {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(line) {
            return map.into_iter().collect();
        }
    }

    stdout
        .lines()
        .filter_map(|line| {
            output_line_pattern()
                .captures(line.trim())
                .map(|caps| (caps[1].to_string(), serde_json::Value::from(caps[2].to_string())))
        })
        .collect()
}

#[async_trait]
impl Stage for CommandStage {
    fn name(&self) -> &str {
        &self.config.program
    }

    async fn run(&self, ctx: &StageContext) -> Result<StageOutputs, StageError> {
        let mut command = self.build_command(ctx)?;
        debug!(
            stage = ctx.stage_name(),
            program = %self.config.program,
            attempt = ctx.attempt(),
            "Spawning external command"
        );

        let output = tokio::select! {
            output = command.output() => output.map_err(|e| {
                StageError::permanent(format!("failed to spawn {}: {e}", self.config.program))
            })?,
            () = ctx.cancellation().cancelled() => {
                warn!(stage = ctx.stage_name(), program = %self.config.program, "Killed external command on cancellation");
                return Err(StageError::Cancelled(
                    ctx.cancellation().reason().unwrap_or_else(|| "cancelled".to_string()),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if output.status.success() {
            Ok(parse_outputs(&stdout))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(self.classify_exit(output.status.code(), &stderr))
        }
    }
}
