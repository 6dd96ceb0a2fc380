//! Project scaffolding: `.buildloop/` state and first-run seeds.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info};

use super::config::{LoopConfig, write_config};
use super::ledger::{LEDGER_HEADER, ProgressLedger};
use super::paths::{AgentLayout, ProjectPaths};
use super::verdict_store::VERDICT_SCHEMA;

/// Options for `init_project`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite loop-owned files (including the progress ledger).
    pub force: bool,
}

/// Create `.buildloop/` with a default config, the verdict schema and the ledger.
///
/// Existing files are kept unless `options.force` is set.
pub fn init_project(root: &Path, options: &InitOptions) -> Result<ProjectPaths> {
    let paths = ProjectPaths::new(root);
    if paths.state_dir.exists() && !paths.state_dir.is_dir() {
        return Err(anyhow!(
            "buildloop init: {} exists but is not a directory",
            paths.state_dir.display()
        ));
    }
    fs::create_dir_all(&paths.runs_dir)
        .with_context(|| format!("create directory {}", paths.runs_dir.display()))?;

    if options.force || !paths.config_path.exists() {
        write_config(&paths.config_path, &LoopConfig::default())?;
    }
    write_if_missing_or_force(&paths.verdict_schema_path, VERDICT_SCHEMA, options.force)?;
    write_if_missing_or_force(&paths.progress_path, LEDGER_HEADER, options.force)?;
    Ok(paths)
}

/// Run-start preparation. Fails only on configuration errors.
///
/// - Ensures the progress ledger exists without truncating it.
/// - Seeds `AGENTS.md` from the agent template exactly once.
/// - Requires the build instructions to exist.
pub fn prepare_project(paths: &ProjectPaths, layout: &AgentLayout) -> Result<()> {
    if !paths.root.is_dir() {
        return Err(anyhow!(
            "project directory {} does not exist",
            paths.root.display()
        ));
    }
    if !layout.build_prompt.is_file() {
        return Err(anyhow!(
            "missing build instructions {}",
            layout.build_prompt.display()
        ));
    }
    ProgressLedger::new(&paths.progress_path).ensure()?;
    seed_agents_md(paths, layout)?;
    Ok(())
}

fn seed_agents_md(paths: &ProjectPaths, layout: &AgentLayout) -> Result<()> {
    if paths.agents_md_path.exists() || !layout.agents_md_template.is_file() {
        return Ok(());
    }
    info!(path = %paths.agents_md_path.display(), "seeding AGENTS.md from template");
    fs::copy(&layout.agents_md_template, &paths.agents_md_path).with_context(|| {
        format!(
            "copy {} to {}",
            layout.agents_md_template.display(),
            paths.agents_md_path.display()
        )
    })?;
    Ok(())
}

/// Copy `config/agents/*.md` into the project's `.claude/agents/`.
///
/// Returns the number of definitions copied.
pub fn sync_agent_definitions(paths: &ProjectPaths, layout: &AgentLayout) -> Result<usize> {
    if !layout.agents_source.is_dir() {
        return Ok(0);
    }
    fs::create_dir_all(&paths.agents_dest)
        .with_context(|| format!("create directory {}", paths.agents_dest.display()))?;
    let entries = fs::read_dir(&layout.agents_source)
        .with_context(|| format!("read {}", layout.agents_source.display()))?;
    let mut copied = 0;
    for entry in entries {
        let source = entry
            .with_context(|| format!("read entry in {}", layout.agents_source.display()))?
            .path();
        if !source.is_file() || source.extension().is_none_or(|ext| ext != "md") {
            continue;
        }
        let Some(name) = source.file_name() else {
            continue;
        };
        let dest = paths.agents_dest.join(name);
        fs::copy(&source, &dest)
            .with_context(|| format!("copy {} to {}", source.display(), dest.display()))?;
        copied += 1;
    }
    debug!(copied, "synced agent definitions");
    Ok(copied)
}

fn write_if_missing_or_force(path: &Path, contents: &str, force: bool) -> Result<()> {
    if !force && path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::load_config;

    fn agent_dir(root: &Path) -> AgentLayout {
        let layout = AgentLayout::new(&root.join("agent"));
        fs::create_dir_all(layout.build_prompt.parent().expect("parent")).expect("mkdir");
        fs::write(&layout.build_prompt, "Work through prds/.\n").expect("write build");
        layout
    }

    #[test]
    fn init_creates_expected_layout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");

        assert!(paths.runs_dir.is_dir());
        assert_eq!(
            load_config(&paths.config_path).expect("config"),
            LoopConfig::default()
        );
        assert_eq!(
            fs::read_to_string(&paths.verdict_schema_path).expect("schema"),
            VERDICT_SCHEMA
        );
        assert_eq!(
            fs::read_to_string(&paths.progress_path).expect("ledger"),
            LEDGER_HEADER
        );
    }

    #[test]
    fn init_keeps_existing_files_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_project(temp.path(), &InitOptions { force: false }).expect("init");
        fs::write(&paths.progress_path, "# Progress Log\n\nhistory\n").expect("write");
        fs::write(&paths.config_path, "max_iterations = 3\n").expect("write");

        init_project(temp.path(), &InitOptions { force: false }).expect("re-init");
        assert!(
            fs::read_to_string(&paths.progress_path)
                .expect("ledger")
                .contains("history")
        );
        assert_eq!(load_config(&paths.config_path).expect("config").max_iterations, 3);

        init_project(temp.path(), &InitOptions { force: true }).expect("force");
        assert_eq!(
            fs::read_to_string(&paths.progress_path).expect("ledger"),
            LEDGER_HEADER
        );
    }

    #[test]
    fn prepare_requires_build_instructions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let layout = AgentLayout::new(&temp.path().join("agent"));
        let err = prepare_project(&paths, &layout).unwrap_err();
        assert!(err.to_string().contains("missing build instructions"));
        assert!(!paths.progress_path.exists());
    }

    #[test]
    fn prepare_seeds_agents_md_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let layout = agent_dir(temp.path());
        fs::create_dir_all(layout.agents_md_template.parent().expect("parent")).expect("mkdir");
        fs::write(&layout.agents_md_template, "# Agents\n").expect("write template");

        prepare_project(&paths, &layout).expect("prepare");
        assert_eq!(
            fs::read_to_string(&paths.agents_md_path).expect("agents"),
            "# Agents\n"
        );

        fs::write(&paths.agents_md_path, "# Agents\n\n## Gotchas\n").expect("edit");
        prepare_project(&paths, &layout).expect("prepare again");
        assert!(
            fs::read_to_string(&paths.agents_md_path)
                .expect("agents")
                .contains("Gotchas")
        );
    }

    #[test]
    fn sync_copies_only_markdown_definitions() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = ProjectPaths::new(temp.path());
        let layout = agent_dir(temp.path());
        fs::create_dir_all(&layout.agents_source).expect("mkdir");
        fs::write(layout.agents_source.join("reviewer.md"), "reviewer").expect("write");
        fs::write(layout.agents_source.join("notes.txt"), "skip").expect("write");

        let copied = sync_agent_definitions(&paths, &layout).expect("sync");
        assert_eq!(copied, 1);
        assert!(paths.agents_dest.join("reviewer.md").is_file());
        assert!(!paths.agents_dest.join("notes.txt").exists());
    }
}
