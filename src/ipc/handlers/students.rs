use crate::capture::{ConflictClassifier, SqliteConflictClassifier};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let enrollment_no = optional_str(&req.params, "enrollmentNo");

    match row_exists(conn, "SELECT 1 FROM schools WHERE id = ?", &[&school_id]) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return e.response(&req.id),
    }

    let next_sort: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE school_id = ?",
            [&school_id],
            |r| r.get(0),
        )
        .unwrap_or(0);

    let student_id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO students(id, school_id, last_name, first_name, enrollment_no, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &school_id,
            &last_name,
            &first_name,
            &enrollment_no,
            next_sort,
            Utc::now().to_rfc3339(),
        ),
    ) {
        Ok(_) => ok(&req.id, json!({ "studentId": student_id })),
        Err(e) if SqliteConflictClassifier.is_unique_violation(&e) => err(
            &req.id,
            "duplicate_enrollment_no",
            "another student already holds this enrollment number",
            Some(json!({ "enrollmentNo": enrollment_no })),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, last_name, first_name, enrollment_no, active, sort_order
         FROM students WHERE school_id = ? ORDER BY sort_order, last_name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&school_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "lastName": r.get::<_, String>(1)?,
                "firstName": r.get::<_, String>(2)?,
                "enrollmentNo": r.get::<_, Option<String>>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
                "sortOrder": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = optional_str(&req.params, "lastName");
    let first_name = optional_str(&req.params, "firstName");
    // Absent means "leave as is", not "reset to active".
    let active: Option<i64> = match req.params.get("active") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_bool() {
            Some(b) => Some(if b { 1 } else { 0 }),
            None => return err(&req.id, "bad_params", "active must be boolean", None),
        },
    };

    let updated = conn.execute(
        "UPDATE students SET
            last_name = COALESCE(?, last_name),
            first_name = COALESCE(?, first_name),
            active = COALESCE(?, active),
            updated_at = ?
         WHERE id = ?",
        (
            &last_name,
            &first_name,
            active,
            Utc::now().to_rfc3339(),
            &student_id,
        ),
    );
    match updated {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_create(state, req)),
        "students.list" => Some(handle_list(state, req)),
        "students.update" => Some(handle_update(state, req)),
        _ => None,
    }
}
