//! Canonical file locations for a project and its agent directory.

use std::path::{Path, PathBuf};

/// All paths the loop reads or writes inside a project root.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    pub root: PathBuf,
    /// Loop-owned state (`.buildloop/`).
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub verdict_schema_path: PathBuf,
    pub runs_dir: PathBuf,
    /// Written by the review tool, cleared by the controller.
    pub verdict_path: PathBuf,
    pub progress_path: PathBuf,
    pub agents_md_path: PathBuf,
    pub prds_dir: PathBuf,
    pub agents_dest: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(".buildloop");
        Self {
            config_path: state_dir.join("config.toml"),
            verdict_schema_path: state_dir.join("verdict.schema.json"),
            runs_dir: state_dir.join("runs"),
            state_dir,
            verdict_path: root.join("verdict.json"),
            progress_path: root.join("progress.txt"),
            agents_md_path: root.join("AGENTS.md"),
            prds_dir: root.join("prds"),
            agents_dest: root.join(".claude").join("agents"),
            root,
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(run_id)
    }

    pub fn iteration_dir(&self, run_id: &str, index: u32) -> PathBuf {
        self.run_dir(run_id).join(index.to_string())
    }
}

/// Instruction files supplied alongside the agent, outside the project.
#[derive(Debug, Clone)]
pub struct AgentLayout {
    /// Build instructions sent on every iteration. Required.
    pub build_prompt: PathBuf,
    /// Appended system prompt. Passed only when present.
    pub system_prompt: PathBuf,
    pub agents_source: PathBuf,
    pub agents_md_template: PathBuf,
}

impl AgentLayout {
    pub fn new(dir: &Path) -> Self {
        let config_dir = dir.join("config");
        Self {
            build_prompt: dir.join("prompts").join("build.md"),
            system_prompt: config_dir.join("orchestrator.md"),
            agents_source: config_dir.join("agents"),
            agents_md_template: dir.join("templates").join("agents-md-template.md"),
        }
    }

    pub fn system_prompt_if_present(&self) -> Option<PathBuf> {
        self.system_prompt
            .is_file()
            .then(|| self.system_prompt.clone())
    }
}
