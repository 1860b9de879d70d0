use std::env;
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub database_url: String,
    pub output_dir: PathBuf,
    pub default_provider: String,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_image_model: String,
    pub gemini_temperature: f32,
    pub gemini_top_k: i32,
    pub gemini_top_p: f32,
    pub gemini_max_output_tokens: i32,
    pub gemini_safety_settings: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_image_model: String,
    pub openai_image_quality: String,
    pub stability_api_key: String,
    pub stability_base_url: String,
    pub stability_output_format: String,
    pub sd_webui_url: String,
    pub sd_steps: i32,
    pub sd_cfg_scale: f32,
    pub align_max_attempts: usize,
    pub align_fallback_gap_ms: i64,
    pub provider_min_interval_seconds: u64,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_i32(name: &str, default: i32) -> i32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn normalize_database_url(value: String) -> String {
    if value.starts_with("sqlite+aiosqlite://") {
        return value.replacen("sqlite+aiosqlite://", "sqlite://", 1);
    }
    value
}

fn normalize_safety_settings(value: String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return "permissive".to_string();
    }

    let lowered = trimmed.to_lowercase();
    match lowered.as_str() {
        "permissive" | "off" | "none" => "permissive".to_string(),
        "standard" => "standard".to_string(),
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}'; defaulting to permissive.",
                value
            );
            "permissive".to_string()
        }
    }
}

fn normalize_provider(value: String) -> String {
    let lowered = value.trim().to_lowercase();
    match lowered.as_str() {
        "gemini" | "openai" | "stability" | "local-sd" => lowered,
        "dalle" | "dall-e" => "openai".to_string(),
        "sd" | "a1111" | "webui" => "local-sd".to_string(),
        _ => {
            warn!(
                "Unknown IMAGEAI_DEFAULT_PROVIDER value '{}'; defaulting to gemini.",
                value
            );
            "gemini".to_string()
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Ok(Config {
            log_level: env_string("LOG_LEVEL", "info").to_lowercase(),
            database_url: normalize_database_url(env_string(
                "DATABASE_URL",
                "sqlite://imageai.db?mode=rwc",
            )),
            output_dir: PathBuf::from(env_string("IMAGEAI_OUTPUT_DIR", "output")),
            default_provider: normalize_provider(env_string("IMAGEAI_DEFAULT_PROVIDER", "gemini")),
            gemini_api_key: env_string("GEMINI_API_KEY", ""),
            gemini_model: env_string("GEMINI_MODEL", "gemini-2.0-flash"),
            gemini_image_model: env_string("GEMINI_IMAGE_MODEL", "gemini-3-pro-image-preview"),
            gemini_temperature: env_f32("GEMINI_TEMPERATURE", 0.2),
            gemini_top_k: env_i32("GEMINI_TOP_K", 40),
            gemini_top_p: env_f32("GEMINI_TOP_P", 0.95),
            gemini_max_output_tokens: env_i32("GEMINI_MAX_OUTPUT_TOKENS", 8192),
            gemini_safety_settings: normalize_safety_settings(env_string(
                "GEMINI_SAFETY_SETTINGS",
                "permissive",
            )),
            openai_api_key: env_string("OPENAI_API_KEY", ""),
            openai_base_url: env_string("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            openai_image_model: env_string("OPENAI_IMAGE_MODEL", "dall-e-3"),
            openai_image_quality: env_string("OPENAI_IMAGE_QUALITY", "standard"),
            stability_api_key: env_string("STABILITY_API_KEY", ""),
            stability_base_url: env_string("STABILITY_BASE_URL", "https://api.stability.ai"),
            stability_output_format: env_string("STABILITY_OUTPUT_FORMAT", "png"),
            sd_webui_url: env_string("SD_WEBUI_URL", "http://127.0.0.1:7860"),
            sd_steps: env_i32("SD_STEPS", 28),
            sd_cfg_scale: env_f32("SD_CFG_SCALE", 7.0),
            align_max_attempts: env_usize("ALIGN_MAX_ATTEMPTS", 3).max(1),
            align_fallback_gap_ms: env_i64("ALIGN_FALLBACK_GAP_MS", 50).max(0),
            provider_min_interval_seconds: env_u64("PROVIDER_MIN_INTERVAL_SECONDS", 2),
        })
    }
}

pub const LINE_TIMING_SYSTEM_PROMPT: &str = r#"You are a lyric timestamp alignment engine. You receive song lyrics as numbered lines, and when available the song audio, and you must return the start and end time of every line.

OUTPUT CONTRACT (version 1.0, strict):
Return ONLY a single JSON object, no prose, no markdown fences, with exactly these top-level fields:
{
  "version": "1.0",
  "units": "ms",
  "line_count": <integer, number of input lines>,
  "lyrics": [
    { "line_index": <integer>, "start_ms": <integer or null>, "end_ms": <integer or null>, "text": "<the line text>" }
  ]
}

RULES:
1. Output exactly one entry per input line, in the original order. line_index is 1-based and must equal the input line number.
2. All timestamps are integer milliseconds from the start of the track.
3. For every aligned line: 0 <= start_ms < end_ms, and timestamps must increase from line to line (a line never starts before the previous one ends).
4. If you cannot align a line, set BOTH start_ms and end_ms to null. Never output a half-aligned line.
5. CRITICAL: "text" must reproduce the input line exactly, byte for byte. Never correct, translate, or re-punctuate the lyrics.
6. Blank input lines still get an entry (text is the empty string).
"#;

pub const WORD_TIMING_SYSTEM_PROMPT: &str = r#"You are a word-level lyric timing engine. You receive one song section at a time and return timing for every line and every word.

Return ONLY a single JSON object of this exact shape:
{
  "lines": [
    {
      "line": "<full line text>",
      "startTime": "MM:SS.mmm",
      "endTime": "MM:SS.mmm",
      "words": [
        { "word": "<word>", "startTime": "MM:SS.mmm", "endTime": "MM:SS.mmm" }
      ]
    }
  ]
}

RULES:
1. Every timestamp is a string of the form MM:SS.mmm with two-digit minutes and seconds and exactly three millisecond digits (minutes may exceed 59, there is no hour field).
2. For every line and every word, startTime must be strictly before endTime.
3. Word spans must lie inside their line span and appear in order.
4. Keep the lines in input order and do not merge, split, or reword them.
"#;
