mod commands;
mod config;
mod db;
mod lyrics;
mod providers;
mod reference;
mod utils;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::commands::{AlignArgs, GenerateArgs};
use crate::config::CONFIG;
use crate::db::database::Database;

#[derive(Parser)]
#[command(name = "imageai", version, about = "AI image generation and lyric timing toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate images with a configured provider
    Generate {
        /// Text prompt describing the image
        prompt: String,
        /// Provider to use: gemini, openai, stability, local-sd
        #[arg(short, long)]
        provider: Option<String>,
        /// Aspect ratio, e.g. 16:9
        #[arg(short, long)]
        aspect: Option<String>,
        /// Output width in pixels (requires --height)
        #[arg(long)]
        width: Option<u32>,
        /// Output height in pixels (requires --width)
        #[arg(long)]
        height: Option<u32>,
        /// Named size preset, e.g. instagram-story or favicon-32
        #[arg(long)]
        preset: Option<String>,
        /// Negative prompt (stability and local-sd)
        #[arg(short, long)]
        negative: Option<String>,
        /// Number of images to generate
        #[arg(short, long, default_value_t = 1)]
        count: usize,
        /// Reference image URLs (gemini only)
        #[arg(long = "ref")]
        ref_images: Vec<String>,
        /// Directory to write images into
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
        /// Skip recording this run in the history database
        #[arg(long)]
        no_history: bool,
    },
    /// Align lyric lines to timestamps with the LLM
    Align {
        /// Lyrics file, one line per lyric line
        lyrics: PathBuf,
        /// Audio file to align against
        #[arg(long)]
        audio: Option<PathBuf>,
        /// Track duration in milliseconds
        #[arg(long)]
        duration_ms: Option<i64>,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Output format: json, lrc, srt
        #[arg(short, long, default_value = "json")]
        format: String,
        /// Maximum LLM attempts before giving up
        #[arg(long)]
        max_attempts: Option<usize>,
        /// Fall back to even spacing when the LLM fails (needs --duration-ms)
        #[arg(long)]
        fallback: bool,
        /// Produce word-level section timing instead of line timing
        #[arg(long)]
        word_level: bool,
        /// Skip recording this run in the history database
        #[arg(long)]
        no_history: bool,
    },
    /// Validate a timing document against the contract
    Validate {
        /// Timing JSON file to check
        file: PathBuf,
        /// Source lyrics file to cross-check text and line count
        #[arg(long)]
        lyrics: Option<PathBuf>,
        /// Track duration in milliseconds for bounds checks
        #[arg(long)]
        duration_ms: Option<i64>,
        /// Treat the file as a word-level section document
        #[arg(long)]
        word_level: bool,
    },
    /// Parse scene tags out of annotated lyrics
    Tags {
        /// Annotated lyrics file
        file: PathBuf,
        /// Write the tag-stripped lyrics here
        #[arg(long)]
        clean_out: Option<PathBuf>,
        /// Print the full parse as JSON
        #[arg(long)]
        json: bool,
    },
    /// Convert a timing document to LRC or SRT
    Export {
        /// Timing JSON file
        file: PathBuf,
        /// Output format: lrc, srt, json
        #[arg(short, long, default_value = "lrc")]
        format: String,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List reference image sizes
    Sizes {
        /// Size category: favicon, social
        #[arg(default_value = "social")]
        category: String,
        /// Restrict social sizes to one platform
        #[arg(long)]
        platform: Option<String>,
    },
    /// Show recent generation and alignment runs
    History {
        /// Maximum rows per table
        #[arg(short, long, default_value_t = 10)]
        limit: i64,
    },
    /// Report configuration, database health, and recent log lines
    Status,
}

/// History is best-effort for commands that do real work; a broken database
/// must not block generation or alignment.
async fn open_database_soft() -> Option<Database> {
    match Database::init(&CONFIG.database_url).await {
        Ok(db) => Some(db),
        Err(err) => {
            warn!("History database unavailable, continuing without it: {err}");
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guards = utils::logging::init_logging();

    match cli.command {
        Command::Generate {
            prompt,
            provider,
            aspect,
            width,
            height,
            preset,
            negative,
            count,
            ref_images,
            out_dir,
            no_history,
        } => {
            let db = if no_history {
                None
            } else {
                open_database_soft().await
            };
            commands::generate_handler(
                db.as_ref(),
                GenerateArgs {
                    prompt,
                    provider,
                    aspect,
                    width,
                    height,
                    preset,
                    negative,
                    count,
                    ref_images,
                    out_dir,
                    no_history,
                },
            )
            .await
        }
        Command::Align {
            lyrics,
            audio,
            duration_ms,
            out,
            format,
            max_attempts,
            fallback,
            word_level,
            no_history,
        } => {
            let db = if no_history {
                None
            } else {
                open_database_soft().await
            };
            commands::align_handler(
                db.as_ref(),
                AlignArgs {
                    lyrics,
                    audio,
                    duration_ms,
                    out,
                    format,
                    max_attempts,
                    fallback,
                    word_level,
                    no_history,
                },
            )
            .await
        }
        Command::Validate {
            file,
            lyrics,
            duration_ms,
            word_level,
        } => commands::validate_handler(&file, lyrics.as_deref(), duration_ms, word_level).await,
        Command::Tags {
            file,
            clean_out,
            json,
        } => commands::tags_handler(&file, clean_out.as_deref(), json).await,
        Command::Export { file, format, out } => {
            commands::export_handler(&file, &format, out.as_deref()).await
        }
        Command::Sizes { category, platform } => {
            commands::sizes_handler(&category, platform.as_deref())
        }
        Command::History { limit } => {
            let db = Database::init(&CONFIG.database_url).await?;
            commands::history_handler(&db, limit).await
        }
        Command::Status => {
            let db = open_database_soft().await;
            commands::status_handler(db.as_ref()).await
        }
    }
}
