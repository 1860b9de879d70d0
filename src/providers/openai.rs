use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::providers::gemini::summarize_error_body;
use crate::providers::ImageGenerationError;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

const OPENAI_MAX_RETRY_ATTEMPTS: usize = 2;
const OPENAI_RETRY_BASE_DELAY_MS: u64 = 900;

// dall-e-3 accepts exactly these sizes and a single image per request.
const DALLE3_SIZES: [(u32, u32); 3] = [(1024, 1024), (1792, 1024), (1024, 1792)];

#[derive(Debug, Deserialize)]
struct OpenAiImageResponse {
    data: Vec<OpenAiImageDatum>,
}

#[derive(Debug, Deserialize)]
struct OpenAiImageDatum {
    b64_json: Option<String>,
    url: Option<String>,
    revised_prompt: Option<String>,
}

fn should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(OPENAI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

/// Snaps an arbitrary requested size to the nearest size the model accepts,
/// preferring orientation match over exact area.
pub fn snap_dalle_size(width: u32, height: u32) -> String {
    let requested_ratio = width as f64 / height.max(1) as f64;
    let (w, h) = DALLE3_SIZES
        .iter()
        .min_by(|a, b| {
            let ra = (a.0 as f64 / a.1 as f64 - requested_ratio).abs();
            let rb = (b.0 as f64 / b.1 as f64 - requested_ratio).abs();
            ra.partial_cmp(&rb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .copied()
        .unwrap_or((1024, 1024));
    format!("{}x{}", w, h)
}

fn summarize_payload(payload: &Value) -> String {
    let model = payload
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let size = payload
        .get("size")
        .and_then(|v| v.as_str())
        .unwrap_or("default");
    let prompt_len = payload
        .get("prompt")
        .and_then(|v| v.as_str())
        .map(|v| v.len())
        .unwrap_or(0);
    format!("model={}, size={}, prompt_len={}", model, size, prompt_len)
}

async fn post_image_request(payload: &Value) -> Result<OpenAiImageResponse> {
    let client = get_http_client();
    let url = format!("{}/images/generations", CONFIG.openai_base_url);

    debug!(target: "providers.openai", payload = %summarize_payload(payload));

    let mut attempt = 0usize;
    loop {
        attempt += 1;
        let response = match client
            .post(&url)
            .bearer_auth(&CONFIG.openai_api_key)
            .timeout(Duration::from_secs(120))
            .json(payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let should_retry = should_retry_error(&err) && attempt < OPENAI_MAX_RETRY_ATTEMPTS;
                warn!(
                    "OpenAI image request failed to send: {} (timeout={}, connect={}, retrying={})",
                    err,
                    err.is_timeout(),
                    err.is_connect(),
                    should_retry
                );
                if should_retry {
                    tokio::time::sleep(retry_delay(attempt)).await;
                    continue;
                }
                return Err(anyhow!("OpenAI image request failed: {}", err));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            let should_retry = should_retry_status(status) && attempt < OPENAI_MAX_RETRY_ATTEMPTS;
            warn!(
                "OpenAI API error: status={}, body={}, retrying={}",
                status, body_summary, should_retry
            );
            if should_retry {
                tokio::time::sleep(retry_delay(attempt)).await;
                continue;
            }
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!(
                "OpenAI image request failed with status {}: {}",
                status,
                detail
            ));
        }

        return Ok(response.json::<OpenAiImageResponse>().await?);
    }
}

pub async fn generate_image_with_openai(
    prompt: &str,
    size: Option<(u32, u32)>,
    count: usize,
) -> Result<Vec<Vec<u8>>, ImageGenerationError> {
    if CONFIG.openai_api_key.trim().is_empty() {
        return Err(ImageGenerationError(
            "OPENAI_API_KEY is not configured".to_string(),
        ));
    }

    let model = CONFIG.openai_image_model.as_str();
    let size_value = size
        .map(|(w, h)| snap_dalle_size(w, h))
        .unwrap_or_else(|| "1024x1024".to_string());

    // dall-e-3 rejects n > 1; issue sequential requests instead.
    let per_request = if model.starts_with("dall-e-3") { 1 } else { count.max(1) };
    let requests = if per_request == 1 { count.max(1) } else { 1 };

    let mut images = Vec::new();
    for _ in 0..requests {
        let payload = json!({
            "model": model,
            "prompt": prompt,
            "n": per_request,
            "size": size_value,
            "quality": CONFIG.openai_image_quality,
            "response_format": "b64_json",
        });

        let response = log_llm_timing("openai", model, "generate_image", None, || async {
            post_image_request(&payload).await
        })
        .await
        .map_err(|err| ImageGenerationError(err.to_string()))?;

        for datum in response.data {
            if let Some(revised) = datum.revised_prompt.as_deref() {
                debug!(target: "providers.openai", revised_prompt = %revised);
            }
            if let Some(encoded) = datum.b64_json {
                let bytes = general_purpose::STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|err| {
                        ImageGenerationError(format!("Invalid b64_json in response: {err}"))
                    })?;
                images.push(bytes);
            } else if let Some(url) = datum.url {
                if let Some(bytes) = crate::providers::media::download_media(&url).await {
                    images.push(bytes);
                } else {
                    warn!("Failed to download OpenAI image from returned url");
                }
            }
        }
    }

    if images.is_empty() {
        return Err(ImageGenerationError(format!(
            "No images returned by OpenAI (model: {})",
            model
        )));
    }

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snaps_to_square_for_square_requests() {
        assert_eq!(snap_dalle_size(512, 512), "1024x1024");
    }

    #[test]
    fn snaps_to_landscape_and_portrait() {
        assert_eq!(snap_dalle_size(1920, 1080), "1792x1024");
        assert_eq!(snap_dalle_size(1080, 1920), "1024x1792");
    }
}
