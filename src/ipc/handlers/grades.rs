use crate::capture::{
    self, audit,
    store::{self, BatchScope},
    BatchRequest, BatchResult, CaptureError, LineAction, LineItem, LineStatus, ResolutionPlan,
    SqliteConflictClassifier,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, parse_bool, required_str, row_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

use super::setup::load_grading_policy;

const BATCH_MAX_LINES: usize = 1000;

fn parse_batch_request(req: &Request) -> Result<BatchRequest, serde_json::Value> {
    let school_id = required_str(req, "schoolId")?;
    let group_id = required_str(req, "groupId")?;
    let subject_id = required_str(req, "subjectId")?;
    let period_id = required_str(req, "periodId")?;
    let captured_by_staff_id = required_str(req, "capturedByStaffId")?;
    let evaluation_type =
        optional_str(&req.params, "evaluationType").unwrap_or_else(|| "regular".to_string());
    let permit_recalibration = parse_bool(req.params.get("permitRecalibration"), false)
        .map_err(|m| err(&req.id, "bad_params", format!("permitRecalibration {}", m), None))?;
    let reason = optional_str(&req.params, "reason");

    let Some(lines_arr) = req.params.get("lines").and_then(|v| v.as_array()) else {
        return Err(err(&req.id, "bad_params", "missing lines[]", None));
    };
    if lines_arr.is_empty() {
        return Err(err(&req.id, "bad_params", "lines[] is empty", None));
    }
    if lines_arr.len() > BATCH_MAX_LINES {
        return Err(err(
            &req.id,
            "bad_params",
            format!(
                "batch exceeds max lines: {} > {}",
                lines_arr.len(),
                BATCH_MAX_LINES
            ),
            None,
        ));
    }

    let mut lines = Vec::with_capacity(lines_arr.len());
    for (i, raw) in lines_arr.iter().enumerate() {
        let Some(obj) = raw.as_object() else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("line at index {} must be an object", i),
                None,
            ));
        };
        let Some(student_id) = obj
            .get("studentId")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("line at index {} missing studentId", i),
                None,
            ));
        };
        let Some(numeric_grade) = obj.get("numericGrade").and_then(|v| v.as_f64()) else {
            return Err(err(
                &req.id,
                "bad_params",
                format!("line at index {} missing numericGrade", i),
                None,
            ));
        };
        let notes = obj
            .get("notes")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty());
        lines.push(LineItem {
            student_id,
            numeric_grade,
            notes,
        });
    }

    Ok(BatchRequest {
        school_id,
        group_id,
        subject_id,
        period_id,
        captured_by_staff_id,
        evaluation_type,
        permit_recalibration,
        reason,
        lines,
    })
}

/// The batch scope must name rows that exist and hang together in one
/// school before any planning happens.
fn check_scope(conn: &Connection, request: &BatchRequest) -> Result<(), HandlerErr> {
    let checks: [(&str, &str, &str); 4] = [
        (
            "SELECT 1 FROM school_groups WHERE id = ? AND school_id = ?",
            &request.group_id,
            "group not found in school",
        ),
        (
            "SELECT 1 FROM subjects WHERE id = ? AND school_id = ?",
            &request.subject_id,
            "subject not found in school",
        ),
        (
            "SELECT 1 FROM eval_periods WHERE id = ? AND school_id = ?",
            &request.period_id,
            "period not found in school",
        ),
        (
            "SELECT 1 FROM staff WHERE id = ? AND school_id = ?",
            &request.captured_by_staff_id,
            "staff member not found in school",
        ),
    ];
    for (sql, id, missing) in checks {
        if !row_exists(conn, sql, &[id, &request.school_id])? {
            return Err(HandlerErr {
                code: "not_found",
                message: missing.to_string(),
                details: None,
            });
        }
    }
    Ok(())
}

fn plan_for_request(
    conn: &Connection,
    request: &BatchRequest,
) -> Result<ResolutionPlan, HandlerErr> {
    let roster = store::roster_members(conn, &request.group_id, &request.period_id)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let existing = store::load_existing(
        conn,
        BatchScope {
            school_id: &request.school_id,
            group_id: &request.group_id,
            subject_id: &request.subject_id,
            period_id: &request.period_id,
        },
    )
    .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let policy = load_grading_policy(conn);
    Ok(capture::plan(&roster, &existing, request, &policy))
}

fn decision_json(plan: &ResolutionPlan) -> (Vec<serde_json::Value>, serde_json::Value) {
    let mut inserts = 0usize;
    let mut updates_allowed = 0usize;
    let mut updates_blocked = 0usize;
    let mut invalid = 0usize;
    let decisions: Vec<serde_json::Value> = plan
        .decisions
        .iter()
        .map(|d| match &d.action {
            LineAction::Insert => {
                inserts += 1;
                json!({ "studentId": &d.student_id, "action": "insert" })
            }
            LineAction::UpdateAllowed { existing } => {
                updates_allowed += 1;
                json!({
                    "studentId": &d.student_id,
                    "action": "updateAllowed",
                    "existingGrade": existing.numeric_grade,
                })
            }
            LineAction::UpdateBlocked { existing, reason } => {
                updates_blocked += 1;
                json!({
                    "studentId": &d.student_id,
                    "action": "updateBlocked",
                    "existingGrade": existing.numeric_grade,
                    "reason": reason,
                })
            }
            LineAction::Invalid { reason } => {
                invalid += 1;
                json!({
                    "studentId": &d.student_id,
                    "action": "invalid",
                    "reason": reason,
                })
            }
        })
        .collect();
    let summary = json!({
        "inserts": inserts,
        "updatesAllowed": updates_allowed,
        "updatesBlocked": updates_blocked,
        "invalid": invalid,
    });
    (decisions, summary)
}

fn result_json(result: &BatchResult, correlation_id: &str) -> serde_json::Value {
    json!({
        "inserted": result.inserted,
        "updated": result.updated,
        "blockedExisting": result.blocked_existing,
        "blockedConflict": result.blocked_conflict,
        "errored": result.errored,
        "insertedStudentIds": result.student_ids_with(LineStatus::Inserted),
        "updatedStudentIds": result.student_ids_with(LineStatus::Updated),
        "blockedStudentIds": result.student_ids_with(LineStatus::BlockedByPolicy),
        "conflictStudentIds": result.student_ids_with(LineStatus::BlockedByConflict),
        "erroredStudentIds": result.student_ids_with(LineStatus::Failed),
        "outcomes": &result.outcomes,
        "correlationId": correlation_id,
    })
}

fn handle_batch_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let request = match parse_batch_request(req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    if let Err(e) = check_scope(conn, &request) {
        return e.response(&req.id);
    }
    let plan = match plan_for_request(conn, &request) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };
    let (decisions, summary) = decision_json(&plan);
    ok(
        &req.id,
        json!({
            "decisions": decisions,
            "summary": summary,
            "correlationId": req.correlation(),
        }),
    )
}

fn handle_batch_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let request = match parse_batch_request(req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    if let Err(e) = check_scope(conn, &request) {
        return e.response(&req.id);
    }
    let plan = match plan_for_request(conn, &request) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };

    match capture::commit(
        conn,
        &plan,
        &request,
        &SqliteConflictClassifier,
        req.correlation(),
    ) {
        Ok(result) => ok(&req.id, result_json(&result, req.correlation())),
        Err(CaptureError::Storage(e)) => err(
            &req.id,
            "db_commit_failed",
            format!("batch rolled back, resubmit: {}", e),
            Some(json!({ "correlationId": req.correlation() })),
        ),
    }
}

fn handle_capture_one(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(numeric_grade) = req.params.get("numericGrade").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing numericGrade", None);
    };

    let mut request = match parse_single_scope(req) {
        Ok(r) => r,
        Err(e) => return e,
    };
    request.lines = vec![LineItem {
        student_id,
        numeric_grade,
        notes: optional_str(&req.params, "notes"),
    }];

    if let Err(e) = check_scope(conn, &request) {
        return e.response(&req.id);
    }
    let plan = match plan_for_request(conn, &request) {
        Ok(p) => p,
        Err(e) => return e.response(&req.id),
    };

    match capture::commit(
        conn,
        &plan,
        &request,
        &SqliteConflictClassifier,
        req.correlation(),
    ) {
        Ok(result) => {
            let Some(outcome) = result.outcomes.first() else {
                return err(&req.id, "db_commit_failed", "no outcome produced", None);
            };
            ok(
                &req.id,
                json!({
                    "studentId": &outcome.student_id,
                    "status": outcome.status,
                    "detail": &outcome.detail,
                    "correlationId": req.correlation(),
                }),
            )
        }
        Err(CaptureError::Storage(e)) => err(
            &req.id,
            "db_commit_failed",
            format!("capture rolled back, resubmit: {}", e),
            Some(json!({ "correlationId": req.correlation() })),
        ),
    }
}

fn parse_single_scope(req: &Request) -> Result<BatchRequest, serde_json::Value> {
    Ok(BatchRequest {
        school_id: required_str(req, "schoolId")?,
        group_id: required_str(req, "groupId")?,
        subject_id: required_str(req, "subjectId")?,
        period_id: required_str(req, "periodId")?,
        captured_by_staff_id: required_str(req, "capturedByStaffId")?,
        evaluation_type: optional_str(&req.params, "evaluationType")
            .unwrap_or_else(|| "regular".to_string()),
        permit_recalibration: parse_bool(req.params.get("permitRecalibration"), false)
            .map_err(|m| {
                err(&req.id, "bad_params", format!("permitRecalibration {}", m), None)
            })?,
        reason: optional_str(&req.params, "reason"),
        lines: Vec::new(),
    })
}

fn handle_list_for_group(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let grades = store::list_for_scope(
        conn,
        BatchScope {
            school_id: &school_id,
            group_id: &group_id,
            subject_id: &subject_id,
            period_id: &period_id,
        },
    );
    match grades {
        Ok(rows) => ok(&req.id, json!({ "grades": rows })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_audit_query(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let filter = audit::AuditQuery {
        school_id: optional_str(&req.params, "schoolId"),
        student_id: optional_str(&req.params, "studentId"),
        group_id: optional_str(&req.params, "groupId"),
        subject_id: optional_str(&req.params, "subjectId"),
        period_id: optional_str(&req.params, "periodId"),
        correlation_id: optional_str(&req.params, "correlationId"),
        performed_by_staff_id: optional_str(&req.params, "performedByStaffId"),
    };
    if filter.is_empty() {
        return err(
            &req.id,
            "bad_params",
            "provide at least one filter (schoolId, studentId, groupId, subjectId, periodId, correlationId, performedByStaffId)",
            None,
        );
    }
    match audit::query(conn, &filter) {
        Ok(entries) => ok(&req.id, json!({ "entries": entries })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_audit_verify(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match audit::verify_chain(conn, &school_id) {
        Ok(check) => ok(&req.id, serde_json::to_value(check).unwrap_or(json!({}))),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.batchPreview" => Some(handle_batch_preview(state, req)),
        "grades.batchSubmit" => Some(handle_batch_submit(state, req)),
        "grades.captureOne" => Some(handle_capture_one(state, req)),
        "grades.listForGroup" => Some(handle_list_for_group(state, req)),
        "audit.query" => Some(handle_audit_query(state, req)),
        "audit.verify" => Some(handle_audit_verify(state, req)),
        _ => None,
    }
}
