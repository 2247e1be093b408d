use std::collections::HashMap;
use std::path::PathBuf;

use crate::policy::WeightDefaults;
use crate::record::ClassroomRecord;
use rusqlite::Connection;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub weight_defaults: WeightDefaults,
    /// Records open for editing, keyed by the handle returned from `records.open`.
    pub sessions: HashMap<String, ClassroomRecord>,
}
