use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
    /// Supplied by request-tracing middleware upstream; generated here
    /// when absent. Threaded unchanged through plan/commit/audit.
    #[serde(default, rename = "correlationId")]
    pub correlation_id: Option<String>,
}

impl Request {
    pub fn correlation(&self) -> &str {
        self.correlation_id.as_deref().unwrap_or("")
    }
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
