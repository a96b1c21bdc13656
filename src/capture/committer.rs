use rusqlite::Connection;
use tracing::{info, warn};

use super::audit::{self, AuditEntry};
use super::conflict::ConflictClassifier;
use super::store::{self, BatchScope, NewGrade};
use super::types::{
    BatchRequest, BatchResult, CaptureError, LineAction, LineOutcome, LineStatus, ResolutionPlan,
};

const CONFLICT_DETAIL: &str = "grade captured concurrently by another actor";

/// Executes a plan inside one transaction. Insert and UpdateAllowed lines
/// hit the store; a unique-constraint failure on either is re-labelled as
/// a conflict and the batch continues. Anything the classifier does not
/// recognize rolls the whole transaction back, so no partial commit is
/// ever visible. Outcomes keep submission order.
pub fn commit(
    conn: &Connection,
    plan: &ResolutionPlan,
    request: &BatchRequest,
    classifier: &dyn ConflictClassifier,
    correlation_id: &str,
) -> Result<BatchResult, CaptureError> {
    let tx = conn.unchecked_transaction()?;
    let scope = BatchScope {
        school_id: &request.school_id,
        group_id: &request.group_id,
        subject_id: &request.subject_id,
        period_id: &request.period_id,
    };
    let mut result = BatchResult::default();

    // Decisions are produced 1:1 from request lines, in order.
    for (decision, line) in plan.decisions.iter().zip(&request.lines) {
        let grade = NewGrade {
            student_id: &decision.student_id,
            numeric_grade: line.numeric_grade,
            notes: line.notes.as_deref(),
            evaluation_type: &request.evaluation_type,
            captured_by_staff_id: &request.captured_by_staff_id,
        };
        match &decision.action {
            LineAction::Insert => {
                let outcome = insert_line(&tx, scope, &grade, classifier, correlation_id);
                match outcome {
                    Ok(o) => result.push(o),
                    Err(e) => {
                        let _ = tx.rollback();
                        return Err(e);
                    }
                }
            }
            LineAction::UpdateAllowed { .. } => {
                let outcome =
                    update_line(&tx, scope, &grade, request, classifier, correlation_id);
                match outcome {
                    Ok(o) => result.push(o),
                    Err(e) => {
                        let _ = tx.rollback();
                        return Err(e);
                    }
                }
            }
            LineAction::UpdateBlocked { reason, .. } => {
                result.push(LineOutcome {
                    student_id: decision.student_id.clone(),
                    status: LineStatus::BlockedByPolicy,
                    detail: Some(reason.clone()),
                });
            }
            LineAction::Invalid { reason } => {
                result.push(LineOutcome {
                    student_id: decision.student_id.clone(),
                    status: LineStatus::Failed,
                    detail: Some(reason.clone()),
                });
            }
        }
    }

    tx.commit()?;
    info!(
        correlation_id,
        inserted = result.inserted,
        updated = result.updated,
        blocked_existing = result.blocked_existing,
        blocked_conflict = result.blocked_conflict,
        errored = result.errored,
        "grade batch committed"
    );
    Ok(result)
}

fn insert_line(
    tx: &Connection,
    scope: BatchScope,
    grade: &NewGrade,
    classifier: &dyn ConflictClassifier,
    correlation_id: &str,
) -> Result<LineOutcome, CaptureError> {
    match store::insert_grade(tx, scope, grade) {
        Ok(_) => Ok(LineOutcome {
            student_id: grade.student_id.to_string(),
            status: LineStatus::Inserted,
            detail: None,
        }),
        Err(e) if classifier.is_unique_violation(&e) => {
            warn!(
                correlation_id,
                student_id = grade.student_id,
                school_id = scope.school_id,
                group_id = scope.group_id,
                "insert lost a capture race"
            );
            Ok(LineOutcome {
                student_id: grade.student_id.to_string(),
                status: LineStatus::BlockedByConflict,
                detail: Some(CONFLICT_DETAIL.to_string()),
            })
        }
        Err(e) => Err(CaptureError::Storage(e)),
    }
}

fn update_line(
    tx: &Connection,
    scope: BatchScope,
    grade: &NewGrade,
    request: &BatchRequest,
    classifier: &dyn ConflictClassifier,
    correlation_id: &str,
) -> Result<LineOutcome, CaptureError> {
    // Authoritative "before" state, read inside the transaction. The
    // planner's snapshot may be stale by now.
    let Some(before) = store::read_current(tx, scope, grade.student_id)? else {
        // The row the plan saw is gone; capture as a fresh insert, with
        // the same race rules.
        return insert_line(tx, scope, grade, classifier, correlation_id);
    };

    store::update_grade(tx, &before.record_id, grade)?;
    audit::record(
        tx,
        &AuditEntry {
            school_id: scope.school_id,
            grade_record_id: &before.record_id,
            student_id: grade.student_id,
            subject_id: scope.subject_id,
            group_id: scope.group_id,
            period_id: scope.period_id,
            previous_grade: before.numeric_grade,
            new_grade: grade.numeric_grade,
            previous_notes: before.notes.as_deref(),
            new_notes: grade.notes,
            reason: request.trimmed_reason(),
            performed_by_staff_id: grade.captured_by_staff_id,
            correlation_id,
        },
    )?;
    Ok(LineOutcome {
        student_id: grade.student_id.to_string(),
        status: LineStatus::Updated,
        detail: None,
    })
}
