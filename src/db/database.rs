use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use crate::db::models::{AlignmentInsert, AlignmentRow, GenerationInsert, GenerationRow};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn init(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS generations (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                provider TEXT NOT NULL,\
                model TEXT NOT NULL,\
                prompt TEXT NOT NULL,\
                image_count INTEGER NOT NULL,\
                output_paths TEXT NOT NULL,\
                status TEXT NOT NULL,\
                duration_s REAL NOT NULL,\
                created_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_generations_created_at ON generations(created_at);",
        )
        .execute(&pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_generations_provider ON generations(provider);",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS alignment_runs (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                lyrics_path TEXT NOT NULL,\
                audio_path TEXT,\
                line_count INTEGER NOT NULL,\
                aligned_lines INTEGER NOT NULL,\
                null_lines INTEGER NOT NULL,\
                attempts INTEGER NOT NULL,\
                status TEXT NOT NULL,\
                created_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_alignment_runs_created_at ON alignment_runs(created_at);",
        )
        .execute(&pool)
        .await?;

        info!("Database tables created successfully");

        Ok(Database { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn record_generation(&self, insert: GenerationInsert) -> Result<i64> {
        let output_paths = serde_json::to_string(&insert.output_paths)?;
        let result = sqlx::query(
            "INSERT INTO generations \
             (provider, model, prompt, image_count, output_paths, status, duration_s, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&insert.provider)
        .bind(&insert.model)
        .bind(&insert.prompt)
        .bind(insert.image_count)
        .bind(output_paths)
        .bind(&insert.status)
        .bind(insert.duration_s)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn recent_generations(&self, limit: i64) -> Result<Vec<GenerationRow>> {
        let rows = sqlx::query_as::<_, GenerationRow>(
            "SELECT id, provider, model, prompt, image_count, output_paths, status, duration_s, created_at \
             FROM generations ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    pub async fn record_alignment(&self, insert: AlignmentInsert) -> Result<i64> {
        let result = sqlx::query(
            "INSERT INTO alignment_runs \
             (lyrics_path, audio_path, line_count, aligned_lines, null_lines, attempts, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&insert.lyrics_path)
        .bind(&insert.audio_path)
        .bind(insert.line_count)
        .bind(insert.aligned_lines)
        .bind(insert.null_lines)
        .bind(insert.attempts)
        .bind(&insert.status)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn recent_alignments(&self, limit: i64) -> Result<Vec<AlignmentRow>> {
        let rows = sqlx::query_as::<_, AlignmentRow>(
            "SELECT id, lyrics_path, audio_path, line_count, aligned_lines, null_lines, attempts, status, created_at \
             FROM alignment_runs ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
