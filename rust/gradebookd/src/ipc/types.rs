use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::grading::GradingScales;

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
    /// Validated once at start-up and shared by every grading call.
    pub scales: GradingScales,
}

impl AppState {
    /// No workspace is open until `workspace.select` succeeds.
    pub fn new(scales: GradingScales) -> Self {
        Self {
            workspace: None,
            db: None,
            scales,
        }
    }
}
