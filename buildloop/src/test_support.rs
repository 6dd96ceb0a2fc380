//! Test-only helpers: a throwaway project and a scripted execution agent.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tempfile::TempDir;

use crate::controller::{AgentSettings, RunOptions, run_loop};
use crate::core::decision::COMPLETION_SIGNAL;
use crate::core::types::RunResult;
use crate::io::agent::{AgentRequest, AgentResponse, AgentTimeoutError, ExecutionAgent};
use crate::io::paths::{AgentLayout, ProjectPaths};

pub const BUILD_INSTRUCTIONS: &str = "Implement the next unchecked checklist item.\n";

/// Temporary project whose `.agent/` directory holds the build instructions.
pub struct TestProject {
    temp: TempDir,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let project = Self { temp };
        let layout = project.layout();
        let prompts_dir = layout
            .build_prompt
            .parent()
            .ok_or_else(|| anyhow!("build prompt has no parent"))?;
        fs::create_dir_all(prompts_dir).context("create prompts dir")?;
        fs::write(&layout.build_prompt, BUILD_INSTRUCTIONS).context("write build prompt")?;
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn agent_dir(&self) -> PathBuf {
        self.temp.path().join(".agent")
    }

    pub fn paths(&self) -> ProjectPaths {
        ProjectPaths::new(self.root())
    }

    pub fn layout(&self) -> AgentLayout {
        AgentLayout::new(&self.agent_dir())
    }

    pub fn verdict_path(&self) -> PathBuf {
        self.paths().verdict_path
    }

    pub fn options(&self, max_iterations: u32) -> RunOptions {
        RunOptions {
            max_iterations,
            iteration_timeout: Duration::from_secs(30),
            agent: AgentSettings {
                model: "opus".to_string(),
                allowed_tools: Vec::new(),
                output_limit_bytes: 100_000,
            },
        }
    }

    pub fn run<A: ExecutionAgent>(&self, agent: &A, max_iterations: u32) -> Result<RunResult> {
        run_loop(
            self.root(),
            &self.agent_dir(),
            agent,
            &self.options(max_iterations),
            |_| {},
        )
    }
}

/// What a scripted turn does instead of running a real agent.
#[derive(Debug, Clone)]
enum TurnOutcome {
    Respond { exit_code: Option<i32> },
    Timeout,
    LaunchFailure(String),
}

/// One scripted agent turn.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    /// Raw contents written to the verdict path, if any.
    verdict: Option<String>,
    stdout: String,
    stderr: String,
    outcome: TurnOutcome,
}

impl ScriptedTurn {
    /// Successful turn with the given stdout and no verdict.
    pub fn output(stdout: &str) -> Self {
        Self {
            verdict: None,
            stdout: stdout.to_string(),
            stderr: String::new(),
            outcome: TurnOutcome::Respond { exit_code: Some(0) },
        }
    }

    pub fn approved(summary: &str) -> Self {
        Self::output("reviewed").with_raw_verdict(
            &json!({
                "approved": true,
                "summary": summary,
                "timestamp": "2026-01-01T00:00:00Z",
            })
            .to_string(),
        )
    }

    pub fn denied(reason: &str) -> Self {
        Self::output("reviewed").with_raw_verdict(
            &json!({
                "approved": false,
                "reason": reason,
                "timestamp": "2026-01-01T00:00:00Z",
            })
            .to_string(),
        )
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        Self {
            stderr: stderr.to_string(),
            outcome: TurnOutcome::Respond {
                exit_code: Some(code),
            },
            ..Self::output("")
        }
    }

    pub fn timeout() -> Self {
        Self {
            outcome: TurnOutcome::Timeout,
            ..Self::output("")
        }
    }

    pub fn launch_failure(message: &str) -> Self {
        Self {
            outcome: TurnOutcome::LaunchFailure(message.to_string()),
            ..Self::output("")
        }
    }

    /// Append the completion signal to stdout.
    pub fn with_completion(mut self) -> Self {
        self.stdout.push('\n');
        self.stdout.push_str(COMPLETION_SIGNAL);
        self
    }

    pub fn with_raw_verdict(mut self, contents: &str) -> Self {
        self.verdict = Some(contents.to_string());
        self
    }
}

/// Agent that plays back queued turns and records every request it sees.
pub struct ScriptedAgent {
    turns: RefCell<VecDeque<ScriptedTurn>>,
    prompts: RefCell<Vec<String>>,
    stale_verdicts: RefCell<Vec<bool>>,
}

impl ScriptedAgent {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: RefCell::new(turns.into()),
            prompts: RefCell::new(Vec::new()),
            stale_verdicts: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    /// Instruction payloads in invocation order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }

    /// Whether a verdict file already existed when each turn started.
    pub fn stale_verdicts(&self) -> Vec<bool> {
        self.stale_verdicts.borrow().clone()
    }
}

impl ExecutionAgent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        self.stale_verdicts
            .borrow_mut()
            .push(request.verdict_path.exists());
        let turn = self
            .turns
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent has no turns left"))?;

        if let Some(contents) = &turn.verdict {
            fs::write(&request.verdict_path, contents)
                .with_context(|| format!("write {}", request.verdict_path.display()))?;
        }
        match turn.outcome {
            TurnOutcome::Respond { exit_code } => Ok(AgentResponse {
                stdout: turn.stdout,
                stderr: turn.stderr,
                exit_code,
            }),
            TurnOutcome::Timeout => Err(AgentTimeoutError {
                timeout: request.timeout,
            }
            .into()),
            TurnOutcome::LaunchFailure(message) => Err(anyhow!(message)),
        }
    }
}
