//! `buildloop` command-line interface.
//!
//! Runs the verdict-gated build loop against a project directory and exposes
//! the artifacts it leaves behind (iteration history, checklist progress,
//! verdict file).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use buildloop::controller::{RunOptions, run_loop};
use buildloop::core::escalation::DenialTracker;
use buildloop::core::types::{IterationRecord, RunResult, Verdict};
use buildloop::exit_codes;
use buildloop::io::agent::ClaudeAgent;
use buildloop::io::checklist::{ChecklistFile, percent, read_checklist, totals};
use buildloop::io::config::{LoopConfig, load_config};
use buildloop::io::init::{InitOptions, init_project};
use buildloop::io::iteration_log::{latest_run_id, load_run_history};
use buildloop::io::paths::ProjectPaths;
use buildloop::io::verdict_store::VerdictStore;
use buildloop::logging;

#[derive(Parser)]
#[command(
    name = "buildloop",
    version,
    about = "Verdict-gated build loop for an autonomous coding agent"
)]
struct Cli {
    /// Project the agent works in.
    #[arg(long, global = true, default_value = ".")]
    project_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.buildloop/` with default config, verdict schema and progress ledger.
    Init {
        /// Overwrite existing files (including the progress ledger).
        #[arg(short, long)]
        force: bool,
    },
    /// Run the build loop until approved and complete, or out of iterations.
    Execute {
        /// Directory holding `prompts/build.md` and agent definitions.
        #[arg(long)]
        agent_dir: Option<PathBuf>,
        #[arg(long)]
        max_iterations: Option<u32>,
        #[arg(long)]
        model: Option<String>,
        /// Per-iteration timeout in seconds.
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,
    },
    /// Print the recorded iterations of the latest (or given) run.
    History {
        #[arg(long = "run", value_name = "RUN_ID")]
        run_id: Option<String>,
    },
    /// Print checklist progress from `prds/*.md` and the current verdict.
    Status,
    /// Record a reviewer verdict.
    Verdict {
        #[command(subcommand)]
        action: VerdictAction,
    },
}

#[derive(Subcommand)]
enum VerdictAction {
    Approve {
        #[arg(long)]
        summary: String,
    },
    Deny {
        #[arg(long)]
        reason: String,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = cli.project_dir;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Execute {
            agent_dir,
            max_iterations,
            model,
            timeout,
        } => {
            let overrides = ExecuteOverrides {
                agent_dir,
                max_iterations,
                model,
                timeout_secs: timeout,
            };
            cmd_execute(&root, overrides)
        }
        Command::History { run_id } => cmd_history(&root, run_id),
        Command::Status => cmd_status(&root),
        Command::Verdict { action } => cmd_verdict(&root, action),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_project(root, &InitOptions { force })?;
    println!("initialized {}", paths.state_dir.display());
    Ok(exit_codes::OK)
}

#[derive(Debug, Default)]
struct ExecuteOverrides {
    agent_dir: Option<PathBuf>,
    max_iterations: Option<u32>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

impl ExecuteOverrides {
    fn apply(&self, mut cfg: LoopConfig) -> Result<LoopConfig> {
        if let Some(max_iterations) = self.max_iterations {
            cfg.max_iterations = max_iterations;
        }
        if let Some(model) = &self.model {
            cfg.model = model.clone();
        }
        if let Some(secs) = self.timeout_secs {
            cfg.iteration_timeout_secs = secs;
        }
        cfg.validate().context("invalid execute options")?;
        Ok(cfg)
    }
}

fn cmd_execute(root: &Path, overrides: ExecuteOverrides) -> Result<i32> {
    let paths = ProjectPaths::new(root);
    let cfg = overrides.apply(load_config(&paths.config_path)?)?;
    let agent_dir = match overrides.agent_dir {
        Some(dir) => dir,
        None => resolve_agent_dir(root, &cfg)?,
    };
    let agent = ClaudeAgent::new(cfg.agent.clone());

    let result = run_loop(
        root,
        &agent_dir,
        &agent,
        &RunOptions::from_config(&cfg),
        print_record,
    )?;
    print_summary(&result);
    Ok(if result.success {
        exit_codes::OK
    } else {
        exit_codes::EXHAUSTED
    })
}

/// A relative `agent_dir` from config is taken relative to the project.
fn resolve_agent_dir(root: &Path, cfg: &LoopConfig) -> Result<PathBuf> {
    let dir = cfg.agent_dir.as_ref().ok_or_else(|| {
        anyhow!("no agent directory: pass --agent-dir or set agent_dir in config")
    })?;
    Ok(root.join(dir))
}

fn cmd_history(root: &Path, run_id: Option<String>) -> Result<i32> {
    let paths = ProjectPaths::new(root);
    let run_id = match run_id {
        Some(run_id) => run_id,
        None => match latest_run_id(&paths)? {
            Some(run_id) => run_id,
            None => {
                println!("no recorded runs");
                return Ok(exit_codes::OK);
            }
        },
    };
    let records = load_run_history(&paths, &run_id)?;
    println!("run {run_id}");
    for record in &records {
        print_record(record);
    }
    let tracker = DenialTracker::replay(&records);
    println!("denial streak: {}", tracker.streak());
    Ok(exit_codes::OK)
}

fn cmd_status(root: &Path) -> Result<i32> {
    let paths = ProjectPaths::new(root);
    let files = read_checklist(&paths.prds_dir)?;
    if files.is_empty() {
        println!("no checklist files in {}", paths.prds_dir.display());
    }
    for file in &files {
        println!("{}", checklist_line(file));
    }
    let (done, total) = totals(&files);
    println!("total: {done}/{total} ({}%)", percent(done, total));

    let verdict = VerdictStore::new(&paths.verdict_path).read();
    println!("verdict: {}", describe_verdict(&verdict));
    Ok(exit_codes::OK)
}

fn cmd_verdict(root: &Path, action: VerdictAction) -> Result<i32> {
    let store = VerdictStore::new(ProjectPaths::new(root).verdict_path);
    let verdict = match action {
        VerdictAction::Approve { summary } => store.approve(&summary)?,
        VerdictAction::Deny { reason } => store.deny(&reason)?,
    };
    println!("recorded {} at {}", describe_verdict(&verdict), store.path().display());
    Ok(exit_codes::OK)
}

fn print_record(record: &IterationRecord) {
    println!(
        "[{:>3}] {:<16} {}",
        record.index,
        record.status.as_str(),
        record.details
    );
}

fn print_summary(result: &RunResult) {
    println!();
    if result.success {
        println!("approved and complete after {} iteration(s)", result.iterations_used);
    } else if let Some(err) = &result.error {
        println!("{err}");
    }
    println!("final denial streak: {}", result.final_denial_streak);
}

fn checklist_line(file: &ChecklistFile) -> String {
    format!(
        "{:<32} {:<24} {:>3}/{:<3} ({}%)",
        file.title,
        file.filename,
        file.done(),
        file.total(),
        file.percent()
    )
}

fn describe_verdict(verdict: &Verdict) -> String {
    let described = match verdict {
        Verdict::Approved { summary, .. } => format!("approved ({summary})"),
        Verdict::Denied { reason, .. } => format!("denied ({reason})"),
        Verdict::Absent => return "none".to_string(),
    };
    match verdict.timestamp() {
        Some(timestamp) => format!("{described} at {timestamp}"),
        None => described,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildloop::io::checklist::parse_checklist;

    #[test]
    fn parse_init_force() {
        let cli = Cli::parse_from(["buildloop", "init", "--force"]);
        assert!(matches!(cli.command, Command::Init { force: true }));
        assert_eq!(cli.project_dir, PathBuf::from("."));
    }

    #[test]
    fn parse_execute_overrides() {
        let cli = Cli::parse_from([
            "buildloop",
            "execute",
            "--project-dir",
            "/work/app",
            "--agent-dir",
            "/work/agent",
            "--max-iterations",
            "4",
            "--timeout",
            "60",
        ]);
        assert_eq!(cli.project_dir, PathBuf::from("/work/app"));
        match cli.command {
            Command::Execute {
                agent_dir,
                max_iterations,
                model,
                timeout,
            } => {
                assert_eq!(agent_dir, Some(PathBuf::from("/work/agent")));
                assert_eq!(max_iterations, Some(4));
                assert_eq!(model, None);
                assert_eq!(timeout, Some(60));
            }
            _ => panic!("expected execute"),
        }
    }

    #[test]
    fn parse_verdict_deny() {
        let cli = Cli::parse_from(["buildloop", "verdict", "deny", "--reason", "no tests"]);
        assert!(matches!(
            cli.command,
            Command::Verdict {
                action: VerdictAction::Deny { ref reason }
            } if reason == "no tests"
        ));
    }

    #[test]
    fn overrides_replace_config_values() {
        let overrides = ExecuteOverrides {
            max_iterations: Some(3),
            model: Some("sonnet".to_string()),
            ..ExecuteOverrides::default()
        };
        let cfg = overrides.apply(LoopConfig::default()).expect("apply");
        assert_eq!(cfg.max_iterations, 3);
        assert_eq!(cfg.model, "sonnet");
        assert_eq!(cfg.iteration_timeout_secs, 900);
    }

    #[test]
    fn zero_budget_override_is_rejected() {
        let overrides = ExecuteOverrides {
            max_iterations: Some(0),
            ..ExecuteOverrides::default()
        };
        assert!(overrides.apply(LoopConfig::default()).is_err());
    }

    #[test]
    fn agent_dir_is_required() {
        let err = resolve_agent_dir(Path::new("."), &LoopConfig::default()).unwrap_err();
        assert!(err.to_string().contains("--agent-dir"));

        let cfg = LoopConfig {
            agent_dir: Some(PathBuf::from("../agent")),
            ..LoopConfig::default()
        };
        assert_eq!(
            resolve_agent_dir(Path::new("/work/app"), &cfg).expect("resolve"),
            PathBuf::from("/work/app/../agent")
        );
    }

    #[test]
    fn checklist_line_names_the_file() {
        let file = parse_checklist(
            "01-auth.md",
            "01-auth",
            "# Auth\n- [x] Login\n- [ ] Logout\n",
        );
        let line = checklist_line(&file);
        assert!(line.starts_with("Auth "));
        assert!(line.contains("01-auth.md"));
        assert!(line.ends_with("1/2   (50%)"));
    }

    #[test]
    fn verdict_description_includes_timestamp() {
        let verdict = Verdict::Denied {
            reason: "no tests".to_string(),
            timestamp: Some("2026-01-01T00:00:00Z".to_string()),
        };
        assert_eq!(
            describe_verdict(&verdict),
            "denied (no tests) at 2026-01-01T00:00:00Z"
        );
        assert_eq!(describe_verdict(&Verdict::Absent), "none");
    }
}
