use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GenerationRow {
    pub id: i64,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub image_count: i64,
    pub output_paths: String,
    pub status: String,
    pub duration_s: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GenerationInsert {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub image_count: i64,
    pub output_paths: Vec<String>,
    pub status: String,
    pub duration_s: f64,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AlignmentRow {
    pub id: i64,
    pub lyrics_path: String,
    pub audio_path: Option<String>,
    pub line_count: i64,
    pub aligned_lines: i64,
    pub null_lines: i64,
    pub attempts: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AlignmentInsert {
    pub lyrics_path: String,
    pub audio_path: Option<String>,
    pub line_count: i64,
    pub aligned_lines: i64,
    pub null_lines: i64,
    pub attempts: i64,
    pub status: String,
}
