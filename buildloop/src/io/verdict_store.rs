//! Single-slot verdict channel between the review tool and the controller.
//!
//! The review tool writes `verdict.json` during an iteration; the controller
//! clears it before the next one starts. Reads never fail: anything that is not
//! a well-formed verdict reads as [`Verdict::Absent`], so a crashed or partially
//! written file is never mistaken for a judgment.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::core::types::Verdict;

/// JSON Schema for the verdict artifact, also published for review tooling.
pub const VERDICT_SCHEMA: &str = include_str!("../../schemas/verdict.schema.json");

static VERDICT_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(VERDICT_SCHEMA).expect("verdict schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("verdict schema should compile")
});

/// On-disk shape written by the review tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct VerdictArtifact {
    approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,
}

impl From<VerdictArtifact> for Verdict {
    fn from(artifact: VerdictArtifact) -> Self {
        if artifact.approved {
            Verdict::Approved {
                summary: artifact.summary.unwrap_or_default(),
                timestamp: artifact.timestamp,
            }
        } else {
            Verdict::Denied {
                reason: artifact.reason.unwrap_or_default(),
                timestamp: artifact.timestamp,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerdictStore {
    path: PathBuf,
}

impl VerdictStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove any stale verdict. Succeeds when nothing is there.
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "cleared stale verdict");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("remove verdict {}", self.path.display()))
            }
        }
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn read(&self) -> Verdict {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no verdict recorded");
                return Verdict::Absent;
            }
            Err(err) => {
                warn!(err = %err, "verdict unreadable, treating as absent");
                return Verdict::Absent;
            }
        };
        parse_verdict(&raw).unwrap_or_else(|| {
            warn!("verdict malformed, treating as absent");
            Verdict::Absent
        })
    }

    pub fn approve(&self, summary: &str) -> Result<Verdict> {
        self.write(VerdictArtifact {
            approved: true,
            summary: Some(summary.to_string()),
            reason: None,
            timestamp: Some(now_rfc3339()),
        })
    }

    pub fn deny(&self, reason: &str) -> Result<Verdict> {
        self.write(VerdictArtifact {
            approved: false,
            summary: None,
            reason: Some(reason.to_string()),
            timestamp: Some(now_rfc3339()),
        })
    }

    fn write(&self, artifact: VerdictArtifact) -> Result<Verdict> {
        let mut buf = serde_json::to_string_pretty(&artifact).context("serialize verdict")?;
        buf.push('\n');
        super::write_atomic(&self.path, &buf)?;
        Ok(artifact.into())
    }
}

/// Parse verdict content; `None` for anything that does not match the schema.
pub fn parse_verdict(raw: &str) -> Option<Verdict> {
    let value: Value = serde_json::from_str(raw).ok()?;
    if !VERDICT_VALIDATOR.is_valid(&value) {
        return None;
    }
    let artifact: VerdictArtifact = serde_json::from_value(value).ok()?;
    Some(artifact.into())
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
