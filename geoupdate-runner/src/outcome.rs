//! Per-edition outcomes and their aggregation into one run result.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use geoupdate_core::EditionId;

use crate::error::{EditionError, RunError};

/// Terminal status of one edition's update task.
#[derive(Debug)]
pub enum RunOutcome {
    Updated,
    UpToDate,
    Failed(EditionError),
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Updated => "updated",
            RunOutcome::UpToDate => "up_to_date",
            RunOutcome::Failed(_) => "failed",
        }
    }
}

/// What happened to one edition during a run.
#[derive(Debug)]
pub struct EditionReport {
    pub edition_id: EditionId,
    pub outcome: RunOutcome,
    /// Local hash before the last attempt.
    pub old_hash: Option<String>,
    /// Installed hash after a successful update.
    pub new_hash: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub checked_at: DateTime<Utc>,
    pub attempts: u32,
}

impl EditionReport {
    pub(crate) fn failed(edition_id: EditionId, err: EditionError, attempts: u32) -> Self {
        Self {
            edition_id,
            outcome: RunOutcome::Failed(err),
            old_hash: None,
            new_hash: None,
            modified_at: None,
            checked_at: Utc::now(),
            attempts,
        }
    }

    fn to_json(&self) -> Value {
        let mut value = json!({
            "edition_id": self.edition_id,
            "status": self.outcome.label(),
            "checked_at": self.checked_at.timestamp(),
        });
        if let Some(old_hash) = &self.old_hash {
            value["old_hash"] = json!(old_hash);
        }
        let new_hash = self.new_hash.as_ref().or(self.old_hash.as_ref());
        if let Some(new_hash) = new_hash {
            value["new_hash"] = json!(new_hash);
        }
        if let Some(modified_at) = self.modified_at {
            value["modified_at"] = json!(modified_at.timestamp());
        }
        if let RunOutcome::Failed(err) = &self.outcome {
            value["error"] = json!(err.to_string());
        }
        value
    }
}

/// All edition reports of a run, sorted by edition identifier.
#[derive(Debug, Default)]
pub struct RunReport {
    reports: Vec<EditionReport>,
}

impl RunReport {
    pub fn new(mut reports: Vec<EditionReport>) -> Self {
        reports.sort_by(|a, b| a.edition_id.cmp(&b.edition_id));
        Self { reports }
    }

    pub fn reports(&self) -> &[EditionReport] {
        &self.reports
    }

    pub fn get(&self, edition: &EditionId) -> Option<&EditionReport> {
        self.reports.iter().find(|r| &r.edition_id == edition)
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, RunOutcome::Updated))
    }

    pub fn up_to_date(&self) -> usize {
        self.count(|o| matches!(o, RunOutcome::UpToDate))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, RunOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&RunOutcome) -> bool) -> usize {
        self.reports.iter().filter(|r| pred(&r.outcome)).count()
    }

    /// JSON array with one object per edition.
    pub fn to_json(&self) -> Value {
        Value::Array(self.reports.iter().map(EditionReport::to_json).collect())
    }

    /// `Ok` when no edition failed; otherwise one error naming every failure.
    pub fn into_result(self) -> Result<RunReport, RunError> {
        if self.failed() == 0 {
            return Ok(self);
        }
        let failures = self
            .reports
            .into_iter()
            .filter_map(|report| match report.outcome {
                RunOutcome::Failed(err) => Some((report.edition_id, err)),
                _ => None,
            })
            .collect();
        Err(RunError::EditionsFailed { failures })
    }
}
