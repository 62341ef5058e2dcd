use std::collections::HashMap;
use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Bearer token -> signed-in principal. Lives for the process only.
    pub sessions: HashMap<String, Principal>,
}

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: i64,
    pub role: String,
}
