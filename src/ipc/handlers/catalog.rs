use crate::capture::{ConflictClassifier, SqliteConflictClassifier};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use serde_json::json;
use uuid::Uuid;

fn parse_date(params: &serde_json::Value, key: &str) -> Result<Option<String>, String> {
    let Some(raw) = optional_str(params, key) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map(|_| Some(raw))
        .map_err(|_| format!("{} must be YYYY-MM-DD", key))
}

fn handle_subjects_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let short_code = optional_str(&req.params, "shortCode");

    match row_exists(conn, "SELECT 1 FROM schools WHERE id = ?", &[&school_id]) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return e.response(&req.id),
    }

    let subject_id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO subjects(id, school_id, name, short_code) VALUES(?, ?, ?, ?)",
        (&subject_id, &school_id, &name, &short_code),
    ) {
        Ok(_) => ok(&req.id, json!({ "subjectId": subject_id })),
        Err(e) if SqliteConflictClassifier.is_unique_violation(&e) => err(
            &req.id,
            "duplicate_subject_name",
            "a subject with this name already exists in the school",
            Some(json!({ "name": name })),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_subjects_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, name, short_code FROM subjects WHERE school_id = ? ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&school_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "shortCode": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(subjects) => ok(&req.id, json!({ "subjects": subjects })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_periods_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let starts_on = match parse_date(&req.params, "startsOn") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let ends_on = match parse_date(&req.params, "endsOn") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    if let (Some(s), Some(e)) = (&starts_on, &ends_on) {
        if e < s {
            return err(&req.id, "bad_params", "endsOn precedes startsOn", None);
        }
    }

    match row_exists(conn, "SELECT 1 FROM schools WHERE id = ?", &[&school_id]) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return e.response(&req.id),
    }

    let period_id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO eval_periods(id, school_id, name, starts_on, ends_on)
         VALUES(?, ?, ?, ?, ?)",
        (&period_id, &school_id, &name, &starts_on, &ends_on),
    ) {
        Ok(_) => ok(&req.id, json!({ "periodId": period_id })),
        Err(e) if SqliteConflictClassifier.is_unique_violation(&e) => err(
            &req.id,
            "duplicate_period_name",
            "a period with this name already exists in the school",
            Some(json!({ "name": name })),
        ),
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_periods_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, name, starts_on, ends_on FROM eval_periods
         WHERE school_id = ? ORDER BY starts_on, name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&school_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "startsOn": r.get::<_, Option<String>>(2)?,
                "endsOn": r.get::<_, Option<String>>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(periods) => ok(&req.id, json!({ "periods": periods })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "subjects.create" => Some(handle_subjects_create(state, req)),
        "subjects.list" => Some(handle_subjects_list(state, req)),
        "periods.create" => Some(handle_periods_create(state, req)),
        "periods.list" => Some(handle_periods_list(state, req)),
        _ => None,
    }
}
