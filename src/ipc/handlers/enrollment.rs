use crate::capture::{ConflictClassifier, SqliteConflictClassifier};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use serde_json::json;

fn handle_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Group and student must belong to the same school.
    match row_exists(
        conn,
        "SELECT 1 FROM school_groups g JOIN students s ON s.school_id = g.school_id
         WHERE g.id = ? AND s.id = ?",
        &[&group_id, &student_id],
    ) {
        Ok(true) => {}
        Ok(false) => {
            return err(
                &req.id,
                "not_found",
                "group/student pair not found in one school",
                None,
            )
        }
        Err(e) => return e.response(&req.id),
    }
    match row_exists(conn, "SELECT 1 FROM eval_periods WHERE id = ?", &[&period_id]) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "period not found", None),
        Err(e) => return e.response(&req.id),
    }

    match conn.execute(
        "INSERT INTO group_enrollments(group_id, student_id, period_id, enrolled_at)
         VALUES(?, ?, ?, ?)",
        (&group_id, &student_id, &period_id, Utc::now().to_rfc3339()),
    ) {
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) if SqliteConflictClassifier.is_unique_violation(&e) => err(
            &req.id,
            "already_enrolled",
            "student is already enrolled in this group for the period",
            None,
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match conn.execute(
        "DELETE FROM group_enrollments WHERE group_id = ? AND student_id = ? AND period_id = ?",
        (&group_id, &student_id, &period_id),
    ) {
        Ok(0) => err(&req.id, "not_found", "enrollment not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let group_id = match required_str(req, "groupId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let period_id = match required_str(req, "periodId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT s.id, s.last_name, s.first_name, s.enrollment_no, s.active
         FROM group_enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.group_id = ? AND e.period_id = ?
         ORDER BY s.sort_order, s.last_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&group_id, &period_id], |r| {
            Ok(json!({
                "studentId": r.get::<_, String>(0)?,
                "lastName": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?,
                "enrollmentNo": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "enrollment.add" => Some(handle_add(state, req)),
        "enrollment.remove" => Some(handle_remove(state, req)),
        "enrollment.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
