use crate::capture::types::{
    GradingPolicy, DEFAULT_MIN_REASON_LEN, DEFAULT_SCALE_MAX, DEFAULT_SCALE_MIN,
};
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

pub const SETUP_GRADING_KEY: &str = "setup.grading";

/// Reads the workspace grading section, falling back to the canonical
/// 0-10 defaults for anything missing or malformed.
pub fn load_grading_policy(conn: &Connection) -> GradingPolicy {
    let obj = db::settings_get_json(conn, SETUP_GRADING_KEY)
        .ok()
        .flatten()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    let scale_min = obj
        .get("scaleMin")
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite())
        .unwrap_or(DEFAULT_SCALE_MIN);
    let scale_max = obj
        .get("scaleMax")
        .and_then(|v| v.as_f64())
        .filter(|v| v.is_finite() && *v > scale_min)
        .unwrap_or(DEFAULT_SCALE_MAX);
    let min_reason_len = obj
        .get("minReasonLen")
        .and_then(|v| v.as_u64())
        .filter(|v| *v >= 1)
        .map(|v| v as usize)
        .unwrap_or(DEFAULT_MIN_REASON_LEN);
    GradingPolicy {
        scale_min,
        scale_max,
        min_reason_len,
    }
}

fn policy_json(policy: &GradingPolicy) -> serde_json::Value {
    json!({
        "scaleMin": policy.scale_min,
        "scaleMax": policy.scale_max,
        "minReasonLen": policy.min_reason_len,
    })
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    ok(&req.id, policy_json(&load_grading_policy(conn)))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };

    let current = load_grading_policy(conn);
    let scale_min = req
        .params
        .get("scaleMin")
        .and_then(|v| v.as_f64())
        .unwrap_or(current.scale_min);
    let scale_max = req
        .params
        .get("scaleMax")
        .and_then(|v| v.as_f64())
        .unwrap_or(current.scale_max);
    let min_reason_len = req
        .params
        .get("minReasonLen")
        .and_then(|v| v.as_u64())
        .map(|v| v as usize)
        .unwrap_or(current.min_reason_len);

    if !scale_min.is_finite() || !scale_max.is_finite() || scale_max <= scale_min {
        return err(
            &req.id,
            "bad_params",
            "scaleMax must be greater than scaleMin",
            Some(json!({ "scaleMin": scale_min, "scaleMax": scale_max })),
        );
    }
    if min_reason_len < 1 {
        return err(&req.id, "bad_params", "minReasonLen must be >= 1", None);
    }

    let stored = json!({
        "scaleMin": scale_min,
        "scaleMax": scale_max,
        "minReasonLen": min_reason_len,
    });
    if let Err(e) = db::settings_set_json(conn, SETUP_GRADING_KEY, &stored) {
        return err(&req.id, "db_update_failed", format!("{e:?}"), None);
    }
    ok(&req.id, stored)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.grading.get" => Some(handle_get(state, req)),
        "setup.grading.update" => Some(handle_update(state, req)),
        _ => None,
    }
}
