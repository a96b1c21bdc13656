//! Bulk grade capture: plan (pure classification) -> commit (one
//! transaction) -> audit (append-only, hash-chained). Concurrent captures
//! of the same tuple are resolved by the store's unique constraint; the
//! loser gets a classified conflict outcome, never silent data loss.

pub mod audit;
pub mod committer;
pub mod conflict;
pub mod planner;
pub mod store;
pub mod types;

pub use committer::commit;
pub use conflict::{ConflictClassifier, SqliteConflictClassifier};
pub use planner::plan;
pub use types::{
    BatchRequest, BatchResult, CaptureError, ExistingGrade, GradingPolicy, LineAction,
    LineDecision, LineItem, LineOutcome, LineStatus, ResolutionPlan,
};
