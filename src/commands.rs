use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::config::CONFIG;
use crate::db::database::Database;
use crate::db::models::{AlignmentInsert, GenerationInsert};
use crate::lyrics::export::{to_lrc, to_srt};
use crate::lyrics::sections::{validate_section, SectionTiming};
use crate::lyrics::{
    align_lyrics, align_section_words, parse_annotated, split_lyric_lines, validate_contract,
    TimedLyrics,
};
use crate::providers::media::{
    detect_mime_type, download_media, extension_for_mime, kind_for_mime, MediaFile,
};
use crate::providers::{generate_image, ImageRequest, Provider};
use crate::reference::{
    find_icon, find_preset, preset_names, FAVICON_SIZES, SOCIAL_IMAGE_SIZES,
};
use crate::utils::logging::read_recent_log_lines;
use crate::utils::timing::start_command_timer;

#[derive(Debug, Clone, Default)]
pub struct GenerateArgs {
    pub prompt: String,
    pub provider: Option<String>,
    pub aspect: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub preset: Option<String>,
    pub negative: Option<String>,
    pub count: usize,
    pub ref_images: Vec<String>,
    pub out_dir: Option<PathBuf>,
    pub no_history: bool,
}

#[derive(Debug, Clone)]
pub struct AlignArgs {
    pub lyrics: PathBuf,
    pub audio: Option<PathBuf>,
    pub duration_ms: Option<i64>,
    pub out: Option<PathBuf>,
    pub format: String,
    pub max_attempts: Option<usize>,
    pub fallback: bool,
    pub word_level: bool,
    pub no_history: bool,
}

fn resolve_provider(value: Option<&str>) -> Result<Provider> {
    let name = value
        .map(|value| value.to_string())
        .unwrap_or_else(|| CONFIG.default_provider.clone());
    Provider::parse(&name)
        .ok_or_else(|| anyhow!("Unknown provider '{}' (gemini, openai, stability, local-sd)", name))
}

/// Applies `--preset` on top of explicit size/aspect flags. Explicit flags
/// win; the preset fills in whatever they left unset.
fn apply_preset(args: &mut GenerateArgs) -> Result<()> {
    let Some(name) = args.preset.clone() else {
        return Ok(());
    };

    if let Some(spec) = find_preset(&name) {
        if args.width.is_none() && args.height.is_none() {
            args.width = Some(spec.width);
            args.height = Some(spec.height);
        }
        if args.aspect.is_none() {
            args.aspect = Some(spec.aspect_ratio.to_string());
        }
        return Ok(());
    }

    if let Some(icon) = find_icon(&name) {
        if args.width.is_none() && args.height.is_none() {
            args.width = Some(icon.size);
            args.height = Some(icon.size);
        }
        if args.aspect.is_none() {
            args.aspect = Some("1:1".to_string());
        }
        return Ok(());
    }

    bail!(
        "Unknown preset '{}'. Known presets: {}, plus favicon names from `imageai sizes favicon`.",
        name,
        preset_names().join(", ")
    )
}

fn output_file_name(provider: Provider, index: usize, bytes: &[u8]) -> String {
    let mime = detect_mime_type(bytes).unwrap_or_else(|| "image/png".to_string());
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    format!(
        "{}-{}-{:02}.{}",
        provider.as_str(),
        stamp,
        index + 1,
        extension_for_mime(&mime)
    )
}

fn log_image_dimensions(path: &Path, bytes: &[u8]) {
    match image::load_from_memory(bytes) {
        Ok(decoded) => info!(
            "Wrote {} ({}x{}, {} bytes)",
            path.display(),
            decoded.width(),
            decoded.height(),
            bytes.len()
        ),
        Err(err) => warn!(
            "Wrote {} ({} bytes) but could not decode it as an image: {}",
            path.display(),
            bytes.len(),
            err
        ),
    }
}

pub async fn generate_handler(db: Option<&Database>, mut args: GenerateArgs) -> Result<()> {
    let provider = resolve_provider(args.provider.as_deref())?;
    apply_preset(&mut args)?;

    let mut timer = start_command_timer("generate", Some(args.prompt.clone()));

    let mut reference_images = Vec::new();
    for url in &args.ref_images {
        match download_media(url).await {
            Some(bytes) => reference_images.push(bytes),
            None => {
                timer.mark_status("error");
                timer.log_completed();
                bail!("Failed to download reference image {url}");
            }
        }
    }

    let size = match (args.width, args.height) {
        (Some(width), Some(height)) => Some((width, height)),
        (None, None) => None,
        _ => {
            timer.mark_status("error");
            timer.log_completed();
            bail!("--width and --height must be given together");
        }
    };

    let request = ImageRequest {
        prompt: args.prompt.clone(),
        negative_prompt: args.negative.clone(),
        aspect_ratio: args.aspect.clone(),
        size,
        count: args.count.max(1),
        reference_images,
    };

    let started = std::time::Instant::now();
    let images = match generate_image(provider, &request).await {
        Ok(images) => images,
        Err(err) => {
            timer.mark_status("error");
            timer.log_completed();
            record_generation(
                db,
                &args,
                provider,
                0,
                &[],
                "error",
                started.elapsed().as_secs_f64(),
            )
            .await;
            return Err(err.into());
        }
    };

    let out_dir = args
        .out_dir
        .clone()
        .unwrap_or_else(|| CONFIG.output_dir.clone());
    tokio::fs::create_dir_all(&out_dir)
        .await
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;

    let mut written = Vec::new();
    for (index, bytes) in images.iter().enumerate() {
        let path = out_dir.join(output_file_name(provider, index, bytes));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log_image_dimensions(&path, bytes);
        written.push(path.display().to_string());
    }

    timer.log_completed();
    record_generation(
        db,
        &args,
        provider,
        written.len() as i64,
        &written,
        "success",
        started.elapsed().as_secs_f64(),
    )
    .await;

    for path in &written {
        println!("{path}");
    }
    Ok(())
}

async fn record_generation(
    db: Option<&Database>,
    args: &GenerateArgs,
    provider: Provider,
    image_count: i64,
    output_paths: &[String],
    status: &str,
    duration_s: f64,
) {
    if args.no_history {
        return;
    }
    let Some(db) = db else {
        return;
    };
    let insert = GenerationInsert {
        provider: provider.as_str().to_string(),
        model: provider.default_model(),
        prompt: args.prompt.clone(),
        image_count,
        output_paths: output_paths.to_vec(),
        status: status.to_string(),
        duration_s,
    };
    if let Err(err) = db.record_generation(insert).await {
        warn!("Failed to record generation history: {err}");
    }
}

async fn load_audio_file(path: &Path) -> Result<MediaFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read audio file {}", path.display()))?;
    let mime_type = detect_mime_type(&bytes)
        .ok_or_else(|| anyhow!("Could not detect the audio type of {}", path.display()))?;
    let display_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    Ok(MediaFile::new(
        bytes,
        mime_type.clone(),
        kind_for_mime(&mime_type),
        display_name,
    ))
}

fn render_timing(doc: &TimedLyrics, format: &str) -> Result<String> {
    match format.trim().to_lowercase().as_str() {
        "json" => Ok(serde_json::to_string_pretty(doc)?),
        "lrc" => Ok(to_lrc(doc)),
        "srt" => Ok(to_srt(doc)),
        other => bail!("Unknown output format '{other}' (json, lrc, srt)"),
    }
}

async fn write_or_print(content: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            tokio::fs::write(path, content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote {}", path.display());
        }
        None => println!("{content}"),
    }
    Ok(())
}

pub async fn align_handler(db: Option<&Database>, args: AlignArgs) -> Result<()> {
    let raw = tokio::fs::read_to_string(&args.lyrics)
        .await
        .with_context(|| format!("Failed to read lyrics file {}", args.lyrics.display()))?;

    // Alignment always runs on clean lyrics; scene markers are authoring
    // metadata, not singable text.
    let parsed = parse_annotated(&raw);
    if parsed.tag_count() > 0 {
        info!(
            "Stripped {} scene tag(s) from the lyrics before alignment",
            parsed.tag_count()
        );
    }
    let lines = split_lyric_lines(&parsed.clean_text());
    if lines.is_empty() {
        bail!("Lyrics file {} is empty", args.lyrics.display());
    }

    let audio = match &args.audio {
        Some(path) => Some(load_audio_file(path).await?),
        None => None,
    };

    let mut timer = start_command_timer("align", Some(args.lyrics.display().to_string()));
    let max_attempts = args.max_attempts.unwrap_or(CONFIG.align_max_attempts);

    if args.word_level {
        if args.format.trim().to_lowercase() != "json" {
            bail!("Word-level timing only supports --format json");
        }
        let section = match align_section_words(&parsed.clean_text(), audio, max_attempts).await {
            Ok(section) => section,
            Err(err) => {
                timer.mark_status("error");
                timer.log_completed();
                record_alignment(db, &args, lines.len(), None).await;
                return Err(err);
            }
        };
        timer.log_completed();
        record_word_alignment(db, &args, &section).await;
        let rendered = serde_json::to_string_pretty(&section)?;
        write_or_print(&rendered, args.out.as_deref()).await?;
        info!("Timed {} line(s) at the word level", section.lines.len());
        return Ok(());
    }

    let outcome = match align_lyrics(
        &lines,
        audio,
        args.duration_ms,
        max_attempts,
        args.fallback,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(err) => {
            timer.mark_status("error");
            timer.log_completed();
            record_alignment(db, &args, lines.len(), None).await;
            return Err(err);
        }
    };

    if outcome.used_fallback {
        timer.mark_status("fallback");
    }
    timer.log_completed();
    record_alignment(db, &args, lines.len(), Some(&outcome)).await;

    let rendered = render_timing(&outcome.doc, &args.format)?;
    write_or_print(&rendered, args.out.as_deref()).await?;

    info!(
        "Aligned {}/{} lines in {} attempt(s){}",
        outcome.doc.aligned_line_count(),
        lines.len(),
        outcome.attempts,
        if outcome.used_fallback {
            " using the even-spacing fallback"
        } else {
            ""
        }
    );
    Ok(())
}

async fn record_alignment(
    db: Option<&Database>,
    args: &AlignArgs,
    line_count: usize,
    outcome: Option<&crate::lyrics::AlignmentOutcome>,
) {
    if args.no_history {
        return;
    }
    let Some(db) = db else {
        return;
    };
    let insert = match outcome {
        Some(outcome) => AlignmentInsert {
            lyrics_path: args.lyrics.display().to_string(),
            audio_path: args.audio.as_ref().map(|path| path.display().to_string()),
            line_count: line_count as i64,
            aligned_lines: outcome.doc.aligned_line_count() as i64,
            null_lines: outcome.doc.null_line_count() as i64,
            attempts: outcome.attempts as i64,
            status: if outcome.used_fallback {
                "fallback".to_string()
            } else {
                "success".to_string()
            },
        },
        None => AlignmentInsert {
            lyrics_path: args.lyrics.display().to_string(),
            audio_path: args.audio.as_ref().map(|path| path.display().to_string()),
            line_count: line_count as i64,
            aligned_lines: 0,
            null_lines: line_count as i64,
            attempts: 0,
            status: "error".to_string(),
        },
    };
    if let Err(err) = db.record_alignment(insert).await {
        warn!("Failed to record alignment history: {err}");
    }
}

async fn record_word_alignment(db: Option<&Database>, args: &AlignArgs, section: &SectionTiming) {
    if args.no_history {
        return;
    }
    let Some(db) = db else {
        return;
    };
    let insert = AlignmentInsert {
        lyrics_path: args.lyrics.display().to_string(),
        audio_path: args.audio.as_ref().map(|path| path.display().to_string()),
        line_count: section.lines.len() as i64,
        aligned_lines: section.lines.len() as i64,
        null_lines: 0,
        attempts: 1,
        status: "success".to_string(),
    };
    if let Err(err) = db.record_alignment(insert).await {
        warn!("Failed to record alignment history: {err}");
    }
}

pub async fn validate_handler(
    file: &Path,
    lyrics: Option<&Path>,
    duration_ms: Option<i64>,
    word_level: bool,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    if word_level {
        let section: SectionTiming = serde_json::from_str(&raw)
            .with_context(|| format!("{} does not match the word-level shape", file.display()))?;
        let violations = validate_section(&section);
        if violations.is_empty() {
            println!(
                "{} is a valid word-level timing document ({} lines)",
                file.display(),
                section.lines.len()
            );
            return Ok(());
        }
        for violation in &violations {
            println!("violation: {violation}");
        }
        bail!("{} contract violation(s)", violations.len());
    }

    let doc: TimedLyrics = serde_json::from_str(&raw)
        .with_context(|| format!("{} does not match the v1.0 contract shape", file.display()))?;

    let source_lines = match lyrics {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read lyrics file {}", path.display()))?;
            Some(split_lyric_lines(&parse_annotated(&raw).clean_text()))
        }
        None => None,
    };

    let violations = validate_contract(&doc, source_lines.as_deref(), duration_ms);
    if violations.is_empty() {
        println!(
            "{} is a valid v1.0 timing document ({}/{} lines aligned)",
            file.display(),
            doc.aligned_line_count(),
            doc.lyrics.len()
        );
        return Ok(());
    }

    for violation in &violations {
        println!("violation: {violation}");
    }
    bail!("{} contract violation(s)", violations.len())
}

pub async fn tags_handler(file: &Path, clean_out: Option<&Path>, as_json: bool) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let parsed = parse_annotated(&raw);

    if let Some(out) = clean_out {
        tokio::fs::write(out, parsed.clean_text())
            .await
            .with_context(|| format!("Failed to write {}", out.display()))?;
        info!("Wrote clean lyrics to {}", out.display());
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&parsed)?);
        return Ok(());
    }

    for line in &parsed.lines {
        if line.tags.is_empty() {
            continue;
        }
        let rendered: Vec<String> = line
            .tags
            .iter()
            .map(|tag| match &tag.value {
                Some(value) => format!("{}={}", tag.name, value),
                None => tag.name.clone(),
            })
            .collect();
        println!("line {}: {}", line.line_index, rendered.join(", "));
    }
    println!(
        "{} line(s), {} tag(s)",
        parsed.lines.len(),
        parsed.tag_count()
    );
    Ok(())
}

pub async fn export_handler(file: &Path, format: &str, out: Option<&Path>) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let doc: TimedLyrics = serde_json::from_str(&raw)
        .with_context(|| format!("{} does not match the v1.0 contract shape", file.display()))?;

    let violations = validate_contract(&doc, None, None);
    if !violations.is_empty() {
        for violation in &violations {
            error!("violation: {violation}");
        }
        bail!(
            "Refusing to export {}: {} contract violation(s)",
            file.display(),
            violations.len()
        );
    }

    let rendered = render_timing(&doc, format)?;
    write_or_print(&rendered, out).await
}

pub fn sizes_handler(category: &str, platform: Option<&str>) -> Result<()> {
    match category.trim().to_lowercase().as_str() {
        "favicon" => {
            for spec in FAVICON_SIZES {
                println!("{:<20} {:>4}x{:<4} {}", spec.name, spec.size, spec.size, spec.purpose);
            }
        }
        "social" => {
            for spec in SOCIAL_IMAGE_SIZES {
                if let Some(platform) = platform {
                    if !spec.platform.eq_ignore_ascii_case(platform.trim()) {
                        continue;
                    }
                }
                println!(
                    "{:<20} {:>4}x{:<4} aspect {}",
                    spec.preset_name(),
                    spec.width,
                    spec.height,
                    spec.aspect_ratio
                );
            }
        }
        other => bail!("Unknown size category '{other}' (favicon, social)"),
    }
    Ok(())
}

pub async fn history_handler(db: &Database, limit: i64) -> Result<()> {
    let generations = db.recent_generations(limit).await?;
    println!("Recent generations ({}):", generations.len());
    for row in generations {
        println!(
            "  [{}] {} {} \"{}\" -> {} image(s), {} ({:.1}s)",
            row.created_at.format("%Y-%m-%d %H:%M:%S"),
            row.provider,
            row.model,
            truncate(&row.prompt, 60),
            row.image_count,
            row.status,
            row.duration_s
        );
    }

    let alignments = db.recent_alignments(limit).await?;
    println!("Recent alignment runs ({}):", alignments.len());
    for row in alignments {
        println!(
            "  [{}] {} -> {}/{} aligned, {} attempt(s), {}",
            row.created_at.format("%Y-%m-%d %H:%M:%S"),
            row.lyrics_path,
            row.aligned_lines,
            row.line_count,
            row.attempts,
            row.status
        );
    }
    Ok(())
}

fn truncate(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}...")
}

fn bool_label(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

fn redact_sensitive_text(text: &str) -> String {
    let mut redacted = text.to_string();
    let secrets = [
        CONFIG.gemini_api_key.as_str(),
        CONFIG.openai_api_key.as_str(),
        CONFIG.stability_api_key.as_str(),
    ];

    for secret in secrets {
        let secret = secret.trim();
        if !secret.is_empty() {
            redacted = redacted.replace(secret, "[REDACTED]");
        }
    }

    redacted
}

fn append_log_tail(report: &mut String, base_name: &str, title: &str, max_lines: usize) {
    report.push_str(&format!("\n{title}\n"));
    match read_recent_log_lines(base_name, max_lines) {
        Ok(Some(tail)) => {
            report.push_str(&format!("source: {}\n", tail.path.display()));
            if tail.lines.is_empty() {
                report.push_str("(no lines available)\n");
            } else {
                for line in tail.lines {
                    let line = redact_sensitive_text(&line);
                    report.push_str(&line);
                    report.push('\n');
                }
            }
        }
        Ok(None) => {
            report.push_str("No matching log files found.\n");
        }
        Err(err) => {
            report.push_str(&format!("Failed to read log tail: {err}\n"));
        }
    }
}

pub async fn status_handler(db: Option<&Database>) -> Result<()> {
    let mut report = String::new();
    report.push_str("Status snapshot\n");
    report.push_str(&format!("time_utc: {}\n", Utc::now().to_rfc3339()));
    report.push_str(&format!("default_provider: {}\n", CONFIG.default_provider));
    report.push_str(&format!(
        "gemini_configured: {}\n",
        bool_label(!CONFIG.gemini_api_key.trim().is_empty())
    ));
    report.push_str(&format!(
        "openai_configured: {}\n",
        bool_label(!CONFIG.openai_api_key.trim().is_empty())
    ));
    report.push_str(&format!(
        "stability_configured: {}\n",
        bool_label(!CONFIG.stability_api_key.trim().is_empty())
    ));
    report.push_str(&format!("sd_webui_url: {}\n", CONFIG.sd_webui_url));
    report.push_str(&format!(
        "output_dir: {}\n",
        CONFIG.output_dir.display()
    ));

    match db {
        Some(db) => {
            let db_result = db.health_check().await;
            let db_status = if db_result.is_ok() { "ok" } else { "error" };
            report.push_str(&format!("db: {db_status}\n"));
            if let Some(err) = db_result.err() {
                report.push_str(&format!("db_error: {}\n", redact_sensitive_text(&err.to_string())));
            }
        }
        None => report.push_str("db: unavailable\n"),
    }

    append_log_tail(&mut report, "imageai.log", "Recent log lines:", 20);
    append_log_tail(&mut report, "timing.log", "Recent timing lines:", 10);

    println!("{report}");
    Ok(())
}
