use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::providers::media::{detect_mime_type, MediaFile, MediaKind};
use crate::providers::ImageGenerationError;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

#[derive(Debug, Clone, Default)]
pub struct GeminiImageConfig {
    pub aspect_ratio: Option<String>,
    pub image_size: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiFileInfo {
    name: String,
    uri: String,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiFileResponse {
    file: GeminiFileInfo,
}

const GEMINI_MAX_RETRY_ATTEMPTS: usize = 2;
const GEMINI_RETRY_BASE_DELAY_MS: u64 = 900;

fn redact_gemini_api_key(text: &str) -> String {
    let key = CONFIG.gemini_api_key.trim();
    if key.is_empty() {
        return text.to_string();
    }
    text.replace(key, "[redacted]")
}

fn gemini_should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn gemini_should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn gemini_retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(GEMINI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

fn build_safety_settings() -> Vec<Value> {
    let profile = CONFIG.gemini_safety_settings.as_str();
    let threshold = match profile {
        "standard" => "BLOCK_MEDIUM_AND_ABOVE",
        "permissive" => "OFF",
        _ => {
            warn!(
                "Unknown GEMINI_SAFETY_SETTINGS value '{}', using permissive defaults.",
                profile
            );
            "OFF"
        }
    };

    vec![
        json!({ "category": "HARM_CATEGORY_HARASSMENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": threshold }),
        json!({ "category": "HARM_CATEGORY_CIVIC_INTEGRITY", "threshold": threshold }),
    ]
}

fn build_image_config(config: Option<&GeminiImageConfig>) -> Option<Value> {
    let config = config?;
    let mut map = Map::new();

    if let Some(aspect_ratio) = config.aspect_ratio.as_deref() {
        let trimmed = aspect_ratio.trim();
        if !trimmed.is_empty() {
            map.insert("aspectRatio".to_string(), json!(trimmed));
        }
    }

    if let Some(image_size) = config.image_size.as_deref() {
        let trimmed = image_size.trim();
        if !trimmed.is_empty() {
            map.insert("imageSize".to_string(), json!(trimmed));
        }
    }

    if map.is_empty() {
        None
    } else {
        Some(Value::Object(map))
    }
}

fn truncate_for_log(value: &str, limit: usize) -> String {
    if value.chars().count() <= limit {
        return value.to_string();
    }
    let truncated: String = value.chars().take(limit).collect();
    format!("{truncated}... (truncated)")
}

fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else if let Some(file_data) = part.get("fileData") {
                let file_uri = file_data
                    .get("fileUri")
                    .and_then(|value| value.as_str())
                    .map(|value| truncate_for_log(value, 200));
                json!({ "fileData": { "fileUri": file_uri } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

fn summarize_gemini_payload(payload: &Value, system_prompt_label: Option<&str>) -> Value {
    let mut summary = Map::new();

    if payload.pointer("/systemInstruction").is_some() {
        let label = system_prompt_label.unwrap_or("inline_system_prompt");
        summary.insert(
            "systemInstruction".to_string(),
            Value::String(label.to_string()),
        );
    }

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let mut summarized_contents = Vec::new();
        for content in contents {
            let role = content
                .get("role")
                .and_then(|value| value.as_str())
                .unwrap_or("user");
            let parts = content
                .get("parts")
                .and_then(|value| value.as_array())
                .map(|parts| summarize_gemini_parts(parts))
                .unwrap_or_default();
            summarized_contents.push(json!({ "role": role, "parts": parts }));
        }
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }

    if let Some(safety) = payload
        .get("safetySettings")
        .and_then(|value| value.as_array())
    {
        summary.insert("safetySettingsCount".to_string(), json!(safety.len()));
    }

    Value::Object(summary)
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let mut text_parts = 0usize;
    let mut image_parts = 0usize;
    let mut text_preview = None;

    let candidates = response.candidates.as_deref().unwrap_or(&[]);
    for candidate in candidates {
        if let Some(content) = &candidate.content {
            if let Some(parts) = &content.parts {
                for part in parts {
                    match part {
                        GeminiPart::Text { text } => {
                            text_parts += 1;
                            if text_preview.is_none() && !text.trim().is_empty() {
                                text_preview = Some(truncate_for_log(text, 200));
                            }
                        }
                        GeminiPart::InlineData { inline_data } => {
                            if inline_data.mime_type.starts_with("image/") {
                                image_parts += 1;
                            }
                        }
                    }
                }
            }
        }
    }

    json!({
        "candidates": response.candidates.as_ref().map(|candidates| candidates.len()).unwrap_or(0),
        "textParts": text_parts,
        "imageParts": image_parts,
        "textPreview": text_preview
    })
}

pub(crate) fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn normalize_gemini_mime_type(mime_type: &str) -> String {
    let lowered = mime_type.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" => "image/jpeg".to_string(),
        "audio/mpeg" => "audio/mp3".to_string(),
        "audio/x-wav" => "audio/wav".to_string(),
        _ => lowered,
    }
}

fn gemini_supports_mime(kind: MediaKind, mime_type: &str) -> bool {
    match kind {
        MediaKind::Image => matches!(
            mime_type,
            "image/png" | "image/jpeg" | "image/webp" | "image/heic" | "image/heif"
        ),
        MediaKind::Audio => matches!(
            mime_type,
            "audio/wav" | "audio/mp3" | "audio/aiff" | "audio/aac" | "audio/ogg" | "audio/flac"
        ),
    }
}

fn gemini_mime_for_file(file: &MediaFile) -> Option<String> {
    let mut candidates = Vec::new();
    if !file.mime_type.trim().is_empty() {
        candidates.push(file.mime_type.clone());
    }
    if let Some(detected) = detect_mime_type(&file.bytes) {
        candidates.push(detected);
    }

    for candidate in candidates {
        let normalized = normalize_gemini_mime_type(&candidate);
        if gemini_supports_mime(file.kind, &normalized) {
            return Some(normalized);
        }
    }

    None
}

async fn upload_file_bytes(
    display_name: &str,
    mime_type: &str,
    bytes: &[u8],
) -> Result<GeminiFileInfo> {
    let client = get_http_client();
    let start_response = client
        .post("https://generativelanguage.googleapis.com/upload/v1beta/files")
        .header("x-goog-api-key", &CONFIG.gemini_api_key)
        .header("X-Goog-Upload-Protocol", "resumable")
        .header("X-Goog-Upload-Command", "start")
        .header(
            "X-Goog-Upload-Header-Content-Length",
            bytes.len().to_string(),
        )
        .header("X-Goog-Upload-Header-Content-Type", mime_type)
        .json(&json!({ "file": { "display_name": display_name } }))
        .send()
        .await?;

    if !start_response.status().is_success() {
        let status = start_response.status();
        let body = start_response.text().await.unwrap_or_default();
        let (message, body_summary) = summarize_error_body(&body);
        let detail = message.unwrap_or(body_summary);
        return Err(anyhow!(
            "Gemini file upload start failed with status {}: {}",
            status,
            detail
        ));
    }

    let upload_url = start_response
        .headers()
        .get("x-goog-upload-url")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| anyhow!("Gemini file upload did not return an upload URL"))?;

    let finalize_response = client
        .post(upload_url)
        .header("X-Goog-Upload-Command", "upload, finalize")
        .header("X-Goog-Upload-Offset", "0")
        .header("Content-Length", bytes.len().to_string())
        .body(bytes.to_vec())
        .send()
        .await?;

    if !finalize_response.status().is_success() {
        let status = finalize_response.status();
        let body = finalize_response.text().await.unwrap_or_default();
        let (message, body_summary) = summarize_error_body(&body);
        let detail = message.unwrap_or(body_summary);
        return Err(anyhow!(
            "Gemini file upload failed with status {}: {}",
            status,
            detail
        ));
    }

    let payload = finalize_response.json::<GeminiFileResponse>().await?;
    Ok(payload.file)
}

async fn get_file_metadata(name: &str) -> Result<GeminiFileInfo> {
    let name = name.trim();
    let name = name.strip_prefix("files/").unwrap_or(name);
    let client = get_http_client();
    let response = client
        .get(format!(
            "https://generativelanguage.googleapis.com/v1beta/files/{}",
            name
        ))
        .header("x-goog-api-key", &CONFIG.gemini_api_key)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (message, body_summary) = summarize_error_body(&body);
        let detail = message.unwrap_or(body_summary);
        return Err(anyhow!(
            "Gemini file metadata fetch failed with status {}: {}",
            status,
            detail
        ));
    }

    Ok(response.json::<GeminiFileResponse>().await?.file)
}

async fn wait_for_file_active(file: GeminiFileInfo) -> Result<GeminiFileInfo> {
    let name = file.name.clone();
    let mut latest = file;

    for _ in 0..15 {
        match latest.state.as_deref().unwrap_or("PROCESSING") {
            "ACTIVE" => return Ok(latest),
            "FAILED" => return Err(anyhow!("Gemini file processing failed for {}", latest.uri)),
            _ => {}
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
        latest = get_file_metadata(&name).await?;
    }

    Err(anyhow!(
        "Timed out waiting for Gemini file processing for {}",
        name
    ))
}

/// Uploads an audio file through the Files API and waits until it is ACTIVE,
/// returning the fileData URI to reference from generateContent.
async fn upload_audio_file(file: &MediaFile) -> Result<String> {
    if file.bytes.is_empty() {
        return Err(anyhow!("Audio file is empty"));
    }
    let display_name = file
        .display_name
        .clone()
        .unwrap_or_else(|| "alignment-audio".to_string());
    let mime_type = gemini_mime_for_file(file).ok_or_else(|| {
        anyhow!(
            "Unsupported audio mime type for Gemini: {}",
            file.mime_type
        )
    })?;

    let info = upload_file_bytes(&display_name, &mime_type, &file.bytes).await?;
    let info = wait_for_file_active(info).await?;
    if !info.uri.trim().is_empty() {
        Ok(info.uri)
    } else if !info.name.trim().is_empty() {
        Ok(format!(
            "https://generativelanguage.googleapis.com/files/{}",
            info.name.trim_start_matches("files/")
        ))
    } else {
        Err(anyhow!(
            "Gemini file upload response missing uri/name for {}",
            display_name
        ))
    }
}

fn build_inline_image_parts(user_content: &str, image_data_list: &[Vec<u8>]) -> Vec<Value> {
    let mut parts = vec![json!({ "text": user_content })];

    for image_data in image_data_list {
        let mime_type = detect_mime_type(image_data).unwrap_or_else(|| "image/png".to_string());
        let encoded = general_purpose::STANDARD.encode(image_data);
        parts.push(json!({
            "inlineData": {
                "mimeType": mime_type,
                "data": encoded
            }
        }));
    }

    parts
}

fn extract_text_from_response(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            if let Some(parts) = content.parts {
                for part in parts {
                    if let GeminiPart::Text { text } = part {
                        if !text.trim().is_empty() {
                            text_parts.push(text);
                        }
                    }
                }
            }
        }
    }
    text_parts.join("\n")
}

fn extract_images_from_response(response: GeminiResponse) -> Vec<Vec<u8>> {
    let mut images = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        if let Some(content) = candidate.content {
            if let Some(parts) = content.parts {
                for part in parts {
                    if let GeminiPart::InlineData { inline_data } = part {
                        if inline_data.mime_type.starts_with("image/") {
                            if let Ok(bytes) = general_purpose::STANDARD.decode(inline_data.data) {
                                images.push(bytes);
                            }
                        }
                    }
                }
            }
        }
    }
    images
}

async fn call_gemini_api(
    model: &str,
    payload: Value,
    system_prompt_label: Option<&str>,
) -> Result<GeminiResponse> {
    let client = get_http_client();
    let url = format!(
        "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
        model, CONFIG.gemini_api_key
    );

    if tracing::enabled!(tracing::Level::DEBUG) {
        let payload_summary = summarize_gemini_payload(&payload, system_prompt_label);
        debug!(target: "providers.gemini", model = model, payload = %payload_summary);
    }

    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let response = match client
            .post(&url)
            .timeout(Duration::from_secs(90))
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let err_text = redact_gemini_api_key(&err.to_string());
                let url = err.url().map(|url| redact_gemini_api_key(url.as_str()));
                let should_retry =
                    gemini_should_retry_error(&err) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                warn!(
                    "Gemini request failed to send: {} (timeout={}, connect={}, status={:?}, url={:?}, retrying={})",
                    err_text,
                    err.is_timeout(),
                    err.is_connect(),
                    err.status(),
                    url,
                    should_retry
                );
                if should_retry {
                    tokio::time::sleep(gemini_retry_delay(attempt)).await;
                    continue;
                }
                return Err(anyhow!("Gemini request failed: {}", err_text));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            let should_retry =
                gemini_should_retry_status(status) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
            warn!(
                "Gemini API error: status={}, body={}, retrying={}",
                status, body_summary, should_retry
            );
            if should_retry {
                tokio::time::sleep(gemini_retry_delay(attempt)).await;
                continue;
            }
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!(
                "Gemini request failed with status {}: {}",
                status,
                detail
            ));
        }

        let value = response.json::<GeminiResponse>().await?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            let response_summary = summarize_gemini_response(&value);
            debug!(target: "providers.gemini", model = model, response = %response_summary);
        }
        return Ok(value);
    }
}

/// Text-in, text-out Gemini call used by the lyric alignment pipeline. When an
/// audio file is supplied it is uploaded through the Files API and referenced
/// from the user turn so the model can hear the track it is aligning against.
pub async fn call_gemini_text(
    system_prompt: &str,
    user_content: &str,
    audio: Option<&MediaFile>,
    system_prompt_label: Option<&str>,
) -> Result<String> {
    let mut parts = Vec::new();

    if let Some(file) = audio {
        let uri = upload_audio_file(file).await?;
        parts.push(json!({ "fileData": { "fileUri": uri } }));
    }
    parts.push(json!({ "text": user_content }));

    let payload = json!({
        "systemInstruction": { "parts": [{ "text": system_prompt }] },
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": {
            "temperature": CONFIG.gemini_temperature,
            "topK": CONFIG.gemini_top_k,
            "topP": CONFIG.gemini_top_p,
            "maxOutputTokens": CONFIG.gemini_max_output_tokens,
        },
        "safetySettings": build_safety_settings(),
    });

    let model = &CONFIG.gemini_model;
    log_llm_timing("gemini", model, "call_gemini_text", None, || async {
        let response = call_gemini_api(model, payload, system_prompt_label).await?;
        Ok(extract_text_from_response(response))
    })
    .await
}

pub async fn generate_image_with_gemini(
    prompt: &str,
    reference_images: &[Vec<u8>],
    image_config: Option<GeminiImageConfig>,
) -> Result<Vec<Vec<u8>>, ImageGenerationError> {
    let base_instruction = if reference_images.is_empty() {
        "Generate an image based on the prompt. CRITICAL: response must be an image, NOT TEXT."
    } else {
        "Edit the images based on the prompt. CRITICAL: response must be an image, NOT TEXT."
    };

    let parts = build_inline_image_parts(prompt, reference_images);
    let mut generation_config = json!({
        "responseModalities": ["TEXT", "IMAGE"]
    });
    if let Some(image_config) = build_image_config(image_config.as_ref()) {
        if let Some(config_object) = generation_config.as_object_mut() {
            config_object.insert("imageConfig".to_string(), image_config);
        }
    }

    let payload = json!({
        "systemInstruction": { "parts": [{ "text": base_instruction }] },
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": generation_config,
        "safetySettings": build_safety_settings(),
    });

    let model = &CONFIG.gemini_image_model;
    let response = log_llm_timing("gemini", model, "generate_image", None, || async {
        call_gemini_api(model, payload, Some("image_generation_system_prompt")).await
    })
    .await
    .map_err(|err| ImageGenerationError(err.to_string()))?;

    let images = extract_images_from_response(response);
    if images.is_empty() {
        return Err(ImageGenerationError(format!(
            "No images returned by Gemini (model: {})",
            model
        )));
    }

    Ok(images)
}
