use crate::capture::{ConflictClassifier, SqliteConflictClassifier};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, optional_str, required_str, row_exists};
use crate::ipc::types::{AppState, Request};
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
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade_level = optional_str(&req.params, "gradeLevel");

    match row_exists(conn, "SELECT 1 FROM schools WHERE id = ?", &[&school_id]) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "school not found", None),
        Err(e) => return e.response(&req.id),
    }

    let group_id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO school_groups(id, school_id, name, grade_level) VALUES(?, ?, ?, ?)",
        (&group_id, &school_id, &name, &grade_level),
    ) {
        Ok(_) => ok(&req.id, json!({ "groupId": group_id })),
        Err(e) if SqliteConflictClassifier.is_unique_violation(&e) => err(
            &req.id,
            "duplicate_group_name",
            "a group with this name already exists in the school",
            Some(json!({ "name": name })),
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
        "SELECT id, name, grade_level FROM school_groups
         WHERE school_id = ? ORDER BY name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&school_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "gradeLevel": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(groups) => ok(&req.id, json!({ "groups": groups })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "groups.create" => Some(handle_create(state, req)),
        "groups.list" => Some(handle_list(state, req)),
        _ => None,
    }
}
