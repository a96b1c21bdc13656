use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_SCALE_MIN: f64 = 0.0;
pub const DEFAULT_SCALE_MAX: f64 = 10.0;
pub const DEFAULT_MIN_REASON_LEN: usize = 10;

/// Workspace-level grading rules the planner validates against.
/// Loaded from the `setup.grading` settings section; these defaults are
/// the canonical 0-10 boleta scale.
#[derive(Debug, Clone, Copy)]
pub struct GradingPolicy {
    pub scale_min: f64,
    pub scale_max: f64,
    pub min_reason_len: usize,
}

impl Default for GradingPolicy {
    fn default() -> Self {
        GradingPolicy {
            scale_min: DEFAULT_SCALE_MIN,
            scale_max: DEFAULT_SCALE_MAX,
            min_reason_len: DEFAULT_MIN_REASON_LEN,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LineItem {
    pub student_id: String,
    pub numeric_grade: f64,
    pub notes: Option<String>,
}

/// One teacher's submission for a whole roster (group x subject x period).
/// Tenant and actor scope arrive as explicit fields on every request;
/// nothing is read from ambient state.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub school_id: String,
    pub group_id: String,
    pub subject_id: String,
    pub period_id: String,
    pub captured_by_staff_id: String,
    pub evaluation_type: String,
    pub permit_recalibration: bool,
    pub reason: Option<String>,
    pub lines: Vec<LineItem>,
}

impl BatchRequest {
    pub fn trimmed_reason(&self) -> &str {
        self.reason.as_deref().map(str::trim).unwrap_or("")
    }
}

/// Snapshot of a grade row that already exists for a tuple, as seen when
/// the plan was computed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistingGrade {
    pub record_id: String,
    pub numeric_grade: f64,
    pub notes: Option<String>,
}

/// Planned action for one line item. Invalid and UpdateBlocked lines are
/// terminal at plan time; Insert and UpdateAllowed can still turn into a
/// conflict at commit time.
#[derive(Debug, Clone, PartialEq)]
pub enum LineAction {
    Insert,
    UpdateAllowed {
        existing: ExistingGrade,
    },
    UpdateBlocked {
        existing: ExistingGrade,
        reason: String,
    },
    Invalid {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct LineDecision {
    pub student_id: String,
    pub action: LineAction,
}

/// Ordered, side-effect-free classification of a whole batch. Safe to
/// recompute any number of times for the same roster snapshot.
#[derive(Debug, Clone, Default)]
pub struct ResolutionPlan {
    pub decisions: Vec<LineDecision>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LineStatus {
    Inserted,
    Updated,
    BlockedByPolicy,
    BlockedByConflict,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LineOutcome {
    pub student_id: String,
    pub status: LineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// What actually happened at commit time, in submission order. Counts are
/// derived from committed outcomes, not from the pre-commit plan.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub inserted: usize,
    pub updated: usize,
    pub blocked_existing: usize,
    pub blocked_conflict: usize,
    pub errored: usize,
    pub outcomes: Vec<LineOutcome>,
}

impl BatchResult {
    pub fn push(&mut self, outcome: LineOutcome) {
        match outcome.status {
            LineStatus::Inserted => self.inserted += 1,
            LineStatus::Updated => self.updated += 1,
            LineStatus::BlockedByPolicy => self.blocked_existing += 1,
            LineStatus::BlockedByConflict => self.blocked_conflict += 1,
            LineStatus::Failed => self.errored += 1,
        }
        self.outcomes.push(outcome);
    }

    pub fn student_ids_with(&self, status: LineStatus) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| o.status == status)
            .map(|o| o.student_id.as_str())
            .collect()
    }
}

/// Infrastructure failures. Line-level problems (policy blocks, conflicts,
/// invalid input) are outcomes, never errors; anything surfacing here
/// aborts the whole batch and rolls the transaction back.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("grade storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}
