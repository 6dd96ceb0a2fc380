//! Execution agent abstraction.
//!
//! The [`ExecutionAgent`] trait keeps the controller ignorant of how the agent
//! process is launched. [`ClaudeAgent`] drives the `claude` CLI; tests use
//! scripted agents that never spawn anything.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::config::AgentConfig;
use crate::io::process::{CapturedOutput, run_with_timeout};

/// Everything the agent needs for one iteration.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Project directory the agent works in.
    pub workdir: PathBuf,
    /// Instruction payload, piped on stdin.
    pub prompt: String,
    pub system_prompt_path: Option<PathBuf>,
    /// Tool allow-list; empty leaves the agent's defaults in place.
    pub allowed_tools: Vec<String>,
    pub model: String,
    pub timeout: Duration,
    /// Where the review tool must record its verdict.
    pub verdict_path: PathBuf,
    /// Per-iteration stdout/stderr log.
    pub log_path: PathBuf,
    pub output_limit_bytes: usize,
}

/// Text output and exit code of a completed agent call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentResponse {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl AgentResponse {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The agent did not finish within its per-iteration budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTimeoutError {
    pub timeout: Duration,
}

impl fmt::Display for AgentTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "agent timed out after {}s", self.timeout.as_secs())
    }
}

impl std::error::Error for AgentTimeoutError {}

/// Abstraction over execution agent backends.
pub trait ExecutionAgent {
    /// Run one agent turn.
    ///
    /// Returns an [`AgentTimeoutError`] (inside the `anyhow::Error`) when the
    /// budget expires. Any other error means the agent could not be run at all.
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse>;
}

/// Agent that spawns the `claude` CLI in print mode.
#[derive(Debug, Clone)]
pub struct ClaudeAgent {
    config: AgentConfig,
}

impl ClaudeAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    fn build_command(&self, request: &AgentRequest) -> Result<Command> {
        let (program, leading) = self
            .config
            .command
            .split_first()
            .context("agent command is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(leading).arg("-p");
        if let Some(path) = &request.system_prompt_path {
            cmd.arg("--append-system-prompt-file").arg(path);
        }
        if let Some(path) = &self.config.mcp_config {
            cmd.arg("--mcp-config").arg(path).arg("--strict-mcp-config");
        }
        if !request.allowed_tools.is_empty() {
            cmd.arg("--allowedTools")
                .arg(request.allowed_tools.join(","));
        }
        cmd.arg("--model")
            .arg(&request.model)
            .arg("--no-session-persistence");
        if self.config.skip_permissions {
            cmd.arg("--dangerously-skip-permissions");
        }
        // Each iteration is a fresh, independent session rather than a nested one.
        cmd.env_remove("CLAUDECODE")
            .env("VERDICT_PATH", &request.verdict_path)
            .current_dir(&request.workdir);
        Ok(cmd)
    }
}

impl ExecutionAgent for ClaudeAgent {
    #[instrument(skip_all, fields(model = %request.model, timeout_secs = request.timeout.as_secs()))]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentResponse> {
        info!(workdir = %request.workdir.display(), "starting agent");
        let cmd = self.build_command(request)?;
        let output = run_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
        )
        .context("run agent")?;

        if let Err(err) = write_agent_log(&request.log_path, &output) {
            warn!(err = %format!("{err:#}"), "failed to write agent log");
        }

        if output.timed_out {
            return Err(AgentTimeoutError {
                timeout: request.timeout,
            }
            .into());
        }
        debug!(exit_code = ?output.status.code(), "agent finished");
        Ok(AgentResponse {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }
}

fn write_agent_log(path: &Path, output: &CapturedOutput) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create agent log dir {}", parent.display()))?;
    }
    let mut buf = String::new();
    buf.push_str("=== stdout ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stdout));
    buf.push_str("\n=== stderr ===\n");
    buf.push_str(&String::from_utf8_lossy(&output.stderr));
    if output.dropped_bytes > 0 {
        buf.push_str(&format!(
            "\n[dropped {} leading bytes]\n",
            output.dropped_bytes
        ));
    }
    if output.timed_out {
        buf.push_str("\n[agent timed out]\n");
    }
    fs::write(path, buf).with_context(|| format!("write agent log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(root: &Path, timeout: Duration) -> AgentRequest {
        AgentRequest {
            workdir: root.to_path_buf(),
            prompt: "build it".to_string(),
            system_prompt_path: Some(root.join("orchestrator.md")),
            allowed_tools: vec!["Read".to_string(), "Bash".to_string()],
            model: "opus".to_string(),
            timeout,
            verdict_path: root.join("verdict.json"),
            log_path: root.join("logs").join("agent.log"),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn command_carries_model_tools_and_permissions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = ClaudeAgent::new(AgentConfig {
            mcp_config: Some(PathBuf::from("/tmp/mcp.json")),
            ..AgentConfig::default()
        });
        let cmd = agent
            .build_command(&request(temp.path(), Duration::from_secs(1)))
            .expect("command");
        let args: Vec<String> = cmd
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert_eq!(cmd.get_program(), "claude");
        assert_eq!(args[0], "-p");
        assert!(args.windows(2).any(|w| w == ["--model", "opus"]));
        assert!(args.windows(2).any(|w| w == ["--allowedTools", "Read,Bash"]));
        assert!(args.windows(2).any(|w| w == ["--mcp-config", "/tmp/mcp.json"]));
        assert!(args.contains(&"--strict-mcp-config".to_string()));
        assert!(args.contains(&"--dangerously-skip-permissions".to_string()));
        assert!(
            cmd.get_envs()
                .any(|(key, value)| key == "VERDICT_PATH" && value.is_some())
        );
    }

    #[cfg(unix)]
    #[test]
    fn stub_command_output_is_captured_and_logged() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = ClaudeAgent::new(AgentConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat; echo ' <promise>COMPLETE</promise>'".to_string(),
                "stub".to_string(),
            ],
            ..AgentConfig::default()
        });
        let req = request(temp.path(), Duration::from_secs(10));

        let response = agent.invoke(&req).expect("invoke");
        assert!(response.success());
        assert!(response.stdout.starts_with("build it"));
        assert!(response.stdout.contains("<promise>COMPLETE</promise>"));
        let log = fs::read_to_string(&req.log_path).expect("agent log");
        assert!(log.contains("=== stdout ===\nbuild it"));
    }

    #[cfg(unix)]
    #[test]
    fn completion_signal_survives_output_limit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = ClaudeAgent::new(AgentConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "cat >/dev/null; head -c 150000 /dev/zero | tr '\\0' a; echo ' <promise>COMPLETE</promise>'"
                    .to_string(),
                "stub".to_string(),
            ],
            ..AgentConfig::default()
        });
        let req = AgentRequest {
            output_limit_bytes: 100_000,
            ..request(temp.path(), Duration::from_secs(10))
        };

        let response = agent.invoke(&req).expect("invoke");
        assert_eq!(response.stdout.len(), 100_000);
        assert!(crate::core::decision::claims_completion(&response.stdout));
        let log = fs::read_to_string(&req.log_path).expect("agent log");
        assert!(log.contains("[dropped 50029 leading bytes]"));
    }

    #[cfg(unix)]
    #[test]
    fn stub_command_timeout_is_typed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let agent = ClaudeAgent::new(AgentConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                "exec sleep 5".to_string(),
                "stub".to_string(),
            ],
            ..AgentConfig::default()
        });

        let err = agent
            .invoke(&request(temp.path(), Duration::from_millis(200)))
            .unwrap_err();
        let timeout = err
            .downcast_ref::<AgentTimeoutError>()
            .expect("timeout error");
        assert_eq!(timeout.timeout, Duration::from_millis(200));
    }
}
