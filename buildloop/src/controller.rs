//! The build loop: one agent turn per iteration until two-key success or exhaustion.
//!
//! Each iteration runs strictly after the previous one:
//!
//! 1. clear any stale verdict and assemble the payload (escalated after
//!    [`ESCALATION_THRESHOLD`](crate::core::escalation::ESCALATION_THRESHOLD)
//!    consecutive denials),
//! 2. invoke the execution agent with the per-iteration timeout,
//! 3. read the verdict and classify the turn,
//! 4. update the denial streak, append to the ledger and the history.
//!
//! Nothing that goes wrong inside an iteration escapes `run`; every failure
//! becomes an [`IterationRecord`]. Only startup configuration errors propagate.

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use crate::core::decision::{claims_completion, judge};
use crate::core::escalation::DenialTracker;
use crate::core::types::{IterationRecord, IterationStatus, RunResult, Verdict};
use crate::io::agent::{AgentRequest, AgentTimeoutError, ExecutionAgent};
use crate::io::checklist::{read_checklist, totals};
use crate::io::config::LoopConfig;
use crate::io::init::{prepare_project, sync_agent_definitions};
use crate::io::iteration_log::{IterationPaths, new_run_id, start_run, write_record};
use crate::io::ledger::ProgressLedger;
use crate::io::paths::{AgentLayout, ProjectPaths};
use crate::io::prompt::build_iteration_prompt;
use crate::io::verdict_store::VerdictStore;

const STDERR_EXCERPT_CHARS: usize = 500;

/// Per-call agent settings that stay fixed for the whole run.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub allowed_tools: Vec<String>,
    pub output_limit_bytes: usize,
}

/// Parameters for [`run_loop`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub max_iterations: u32,
    pub iteration_timeout: Duration,
    pub agent: AgentSettings,
}

impl RunOptions {
    pub fn from_config(cfg: &LoopConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            iteration_timeout: cfg.iteration_timeout(),
            agent: AgentSettings {
                model: cfg.model.clone(),
                allowed_tools: cfg.agent.allowed_tools.clone(),
                output_limit_bytes: cfg.agent_output_limit_bytes,
            },
        }
    }
}

/// Owns all per-run state: streak, history and the project's artifacts.
///
/// Callers must ensure at most one controller runs against a project at a time;
/// the verdict slot is not safe under overlapping iterations.
pub struct IterationController<'a, A: ExecutionAgent> {
    paths: ProjectPaths,
    layout: AgentLayout,
    agent: &'a A,
    settings: AgentSettings,
    verdicts: VerdictStore,
    ledger: ProgressLedger,
    tracker: DenialTracker,
    history: Vec<IterationRecord>,
    run_id: Option<String>,
}

impl<'a, A: ExecutionAgent> IterationController<'a, A> {
    pub fn new(root: &Path, agent_dir: &Path, agent: &'a A, settings: AgentSettings) -> Self {
        let paths = ProjectPaths::new(root);
        Self {
            layout: AgentLayout::new(agent_dir),
            agent,
            settings,
            verdicts: VerdictStore::new(&paths.verdict_path),
            ledger: ProgressLedger::new(&paths.progress_path),
            tracker: DenialTracker::new(),
            history: Vec::new(),
            run_id: None,
            paths,
        }
    }

    /// Iterations completed so far in the current (or last) run.
    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    pub fn denial_streak(&self) -> u32 {
        self.tracker.streak()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn run(
        &mut self,
        max_iterations: u32,
        per_iteration_timeout: Duration,
    ) -> Result<RunResult> {
        self.run_with(max_iterations, per_iteration_timeout, |_| {})
    }

    /// Like [`run`](Self::run), calling `on_iteration` after each record is appended.
    pub fn run_with<F: FnMut(&IterationRecord)>(
        &mut self,
        max_iterations: u32,
        per_iteration_timeout: Duration,
        mut on_iteration: F,
    ) -> Result<RunResult> {
        if max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if per_iteration_timeout.is_zero() {
            return Err(anyhow!("per-iteration timeout must be > 0"));
        }
        prepare_project(&self.paths, &self.layout)?;

        self.history.clear();
        self.tracker = DenialTracker::new();
        let run_id = match start_run(&self.paths) {
            Ok(run_id) => run_id,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "failed to claim run directory");
                new_run_id()
            }
        };
        self.run_id = Some(run_id.clone());
        info!(%run_id, max_iterations, "starting build loop");

        for index in 1..=max_iterations {
            info!(
                index,
                max_iterations,
                denial_streak = self.tracker.streak(),
                "iteration start"
            );
            let record = self.run_iteration(&run_id, index, per_iteration_timeout);
            self.append(&run_id, &record);
            on_iteration(&record);

            if record.status == IterationStatus::Approved {
                info!(index, "build approved and complete");
                return Ok(self.finish(true, index, record.verdict, None));
            }
        }

        warn!(max_iterations, "iteration budget exhausted");
        Ok(self.finish(
            false,
            max_iterations,
            Verdict::Absent,
            Some(format!(
                "max iterations ({max_iterations}) reached without completion"
            )),
        ))
    }

    fn run_iteration(&mut self, run_id: &str, index: u32, timeout: Duration) -> IterationRecord {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        if let Err(err) = sync_agent_definitions(&self.paths, &self.layout) {
            warn!(err = %format!("{err:#}"), "failed to sync agent definitions");
        }
        self.log_checklist_progress();

        if let Err(err) = self.verdicts.clear() {
            return self.conclude(
                index,
                timestamp,
                IterationStatus::Error,
                format!("failed to clear stale verdict: {err:#}"),
                Verdict::Absent,
            );
        }
        let prompt = match build_iteration_prompt(&self.layout.build_prompt, &self.tracker) {
            Ok(prompt) => prompt,
            Err(err) => {
                return self.conclude(
                    index,
                    timestamp,
                    IterationStatus::Error,
                    format!("failed to assemble instructions: {err:#}"),
                    Verdict::Absent,
                );
            }
        };

        let request = AgentRequest {
            workdir: self.paths.root.clone(),
            prompt,
            system_prompt_path: self.layout.system_prompt_if_present(),
            allowed_tools: self.settings.allowed_tools.clone(),
            model: self.settings.model.clone(),
            timeout,
            verdict_path: self.verdicts.path().to_path_buf(),
            log_path: IterationPaths::new(&self.paths, run_id, index).agent_log_path,
            output_limit_bytes: self.settings.output_limit_bytes,
        };
        let response = match self.agent.invoke(&request) {
            Ok(response) => response,
            Err(err) => {
                let (status, details) = match err.downcast_ref::<AgentTimeoutError>() {
                    Some(timeout) => (IterationStatus::Timeout, timeout.to_string()),
                    None => (
                        IterationStatus::Error,
                        format!("agent invocation failed: {err:#}"),
                    ),
                };
                return self.conclude(index, timestamp, status, details, Verdict::Absent);
            }
        };
        if !response.success() {
            let code = response
                .exit_code
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            let stderr: String = response
                .stderr
                .trim()
                .chars()
                .take(STDERR_EXCERPT_CHARS)
                .collect();
            return self.conclude(
                index,
                timestamp,
                IterationStatus::Error,
                format!("agent exited with code {code}: {stderr}"),
                Verdict::Absent,
            );
        }

        let completion_claimed = claims_completion(&response.stdout);
        let verdict = self.verdicts.read();
        debug!(completion_claimed, verdict_present = verdict.is_present(), "agent turn finished");
        let judgment = judge(&verdict, completion_claimed);
        self.conclude(index, timestamp, judgment.status, judgment.details, verdict)
    }

    /// The single place the denial streak moves.
    fn conclude(
        &mut self,
        index: u32,
        timestamp: String,
        status: IterationStatus,
        details: String,
        verdict: Verdict,
    ) -> IterationRecord {
        self.tracker.observe(status, &details);
        info!(
            index,
            status = status.as_str(),
            denial_streak = self.tracker.streak(),
            "iteration finished"
        );
        IterationRecord {
            index,
            status,
            details,
            timestamp,
            verdict,
        }
    }

    /// Ledger and per-iteration records are audit trails; failures are logged, not raised.
    fn append(&mut self, run_id: &str, record: &IterationRecord) {
        if let Err(err) = self.ledger.append(record) {
            warn!(err = %format!("{err:#}"), "failed to append progress ledger");
        }
        if let Err(err) = write_record(&self.paths, run_id, record) {
            warn!(err = %format!("{err:#}"), "failed to write iteration record");
        }
        self.history.push(record.clone());
    }

    fn log_checklist_progress(&self) {
        match read_checklist(&self.paths.prds_dir) {
            Ok(files) => {
                let (done, total) = totals(&files);
                info!(files = files.len(), done, total, "checklist progress");
            }
            Err(err) => warn!(err = %format!("{err:#}"), "failed to read checklist"),
        }
    }

    fn finish(
        &self,
        success: bool,
        iterations_used: u32,
        final_verdict: Verdict,
        error: Option<String>,
    ) -> RunResult {
        RunResult {
            success,
            iterations_used,
            final_verdict,
            error,
            history: self.history.clone(),
            final_denial_streak: self.tracker.streak(),
        }
    }
}

/// Run the build loop for the project at `root` with instructions from `agent_dir`.
pub fn run_loop<A: ExecutionAgent, F: FnMut(&IterationRecord)>(
    root: &Path,
    agent_dir: &Path,
    agent: &A,
    options: &RunOptions,
    on_iteration: F,
) -> Result<RunResult> {
    let mut controller = IterationController::new(root, agent_dir, agent, options.agent.clone());
    controller.run_with(
        options.max_iterations,
        options.iteration_timeout,
        on_iteration,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedAgent, ScriptedTurn, TestProject};
    use std::fs;

    #[test]
    fn startup_fails_without_build_instructions() {
        let project = TestProject::new().expect("project");
        fs::remove_file(project.layout().build_prompt).expect("remove build prompt");
        let agent = ScriptedAgent::new(Vec::new());

        let err = project.run(&agent, 3).unwrap_err();
        assert!(err.to_string().contains("missing build instructions"));
        assert_eq!(agent.calls(), 0);
    }

    #[test]
    fn zero_budget_is_a_configuration_error() {
        let project = TestProject::new().expect("project");
        let agent = ScriptedAgent::new(Vec::new());
        assert!(project.run(&agent, 0).is_err());
    }

    #[test]
    fn stale_verdict_is_cleared_before_the_agent_runs() {
        let project = TestProject::new().expect("project");
        fs::write(
            project.verdict_path(),
            r#"{"approved": true, "summary": "left over"}"#,
        )
        .expect("write stale verdict");
        let agent = ScriptedAgent::new(vec![ScriptedTurn::output(
            "done <promise>COMPLETE</promise>",
        )]);

        let result = project.run(&agent, 1).expect("run");
        assert!(!result.success);
        assert_eq!(result.history[0].status, IterationStatus::NoVerdict);
        assert_eq!(agent.stale_verdicts(), vec![false]);
    }

    #[test]
    fn nonzero_exit_is_recorded_with_stderr() {
        let project = TestProject::new().expect("project");
        let agent = ScriptedAgent::new(vec![ScriptedTurn::exit(2, "rate limited")]);

        let result = project.run(&agent, 1).expect("run");
        assert_eq!(result.history[0].status, IterationStatus::Error);
        assert_eq!(
            result.history[0].details,
            "agent exited with code 2: rate limited"
        );
        assert_eq!(result.final_denial_streak, 0);
    }

    #[test]
    fn invocation_failure_is_an_error_record() {
        let project = TestProject::new().expect("project");
        let agent = ScriptedAgent::new(vec![ScriptedTurn::launch_failure(
            "spawn claude: not found",
        )]);

        let result = project.run(&agent, 1).expect("run");
        assert_eq!(result.history[0].status, IterationStatus::Error);
        assert!(result.history[0].details.contains("spawn claude: not found"));
    }

    #[test]
    fn records_are_logged_to_ledger_and_run_dir() {
        let project = TestProject::new().expect("project");
        let agent = ScriptedAgent::new(vec![
            ScriptedTurn::denied("no tests"),
            ScriptedTurn::approved("verified").with_completion(),
        ]);
        let mut seen = Vec::new();
        let result = run_loop(
            project.root(),
            &project.agent_dir(),
            &agent,
            &project.options(5),
            |record| seen.push(record.index),
        )
        .expect("run");
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(result.iterations_used, 2);

        let ledger = fs::read_to_string(project.paths().progress_path).expect("ledger");
        assert!(ledger.contains("## Iteration 1"));
        assert!(ledger.contains("- Status: denied\n- Details: no tests"));
        assert!(ledger.contains("- Status: approved\n- Details: verified"));

        let run_id = crate::io::iteration_log::latest_run_id(&project.paths())
            .expect("latest")
            .expect("run recorded");
        let recorded =
            crate::io::iteration_log::load_run_history(&project.paths(), &run_id).expect("load");
        assert_eq!(recorded, result.history);
    }

    #[test]
    fn each_run_gets_fresh_history_and_run_dir() {
        let project = TestProject::new().expect("project");
        let agent = ScriptedAgent::new(vec![
            ScriptedTurn::denied("a"),
            ScriptedTurn::approved("ok").with_completion(),
        ]);
        let mut controller = IterationController::new(
            project.root(),
            &project.agent_dir(),
            &agent,
            project.options(1).agent,
        );

        let first = controller.run(1, Duration::from_secs(5)).expect("first run");
        assert_eq!(first.final_denial_streak, 1);
        assert_eq!(controller.history().len(), 1);
        let first_run_id = controller.run_id().map(str::to_string);

        let second = controller.run(1, Duration::from_secs(5)).expect("second run");
        assert!(second.success);
        assert_eq!(second.history.len(), 1);
        assert_eq!(second.history[0].index, 1);
        assert_eq!(controller.denial_streak(), 0);
        assert!(controller.run_id().is_some());
        assert_ne!(controller.run_id().map(str::to_string), first_run_id);
        let paths = project.paths();
        let run_ids = [
            first_run_id.expect("first id"),
            controller.run_id().expect("second id").to_string(),
        ];
        for run_id in &run_ids {
            let recorded =
                crate::io::iteration_log::load_run_history(&paths, run_id).expect("load");
            assert_eq!(recorded.len(), 1);
        }
    }
}
