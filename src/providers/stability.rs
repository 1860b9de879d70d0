use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::providers::gemini::summarize_error_body;
use crate::providers::ImageGenerationError;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

const STABILITY_MAX_RETRY_ATTEMPTS: usize = 2;
const STABILITY_RETRY_BASE_DELAY_MS: u64 = 900;

const SUPPORTED_ASPECT_RATIOS: [&str; 9] = [
    "21:9", "16:9", "3:2", "5:4", "1:1", "4:5", "2:3", "9:16", "9:21",
];

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
    Duration::from_millis(STABILITY_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

fn normalize_aspect_ratio(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    if SUPPORTED_ASPECT_RATIOS.contains(&value) {
        Some(value.to_string())
    } else {
        warn!(
            "Aspect ratio '{}' is not supported by Stability; using the model default.",
            value
        );
        None
    }
}

fn build_form(prompt: &str, negative_prompt: Option<&str>, aspect_ratio: Option<&str>) -> Form {
    let mut form = Form::new()
        .part("prompt", Part::text(prompt.to_string()))
        .part(
            "output_format",
            Part::text(CONFIG.stability_output_format.clone()),
        );

    if let Some(negative) = negative_prompt {
        let negative = negative.trim();
        if !negative.is_empty() {
            form = form.part("negative_prompt", Part::text(negative.to_string()));
        }
    }

    if let Some(ratio) = normalize_aspect_ratio(aspect_ratio) {
        form = form.part("aspect_ratio", Part::text(ratio));
    }

    form
}

async fn post_generate(
    prompt: &str,
    negative_prompt: Option<&str>,
    aspect_ratio: Option<&str>,
) -> Result<Vec<u8>> {
    let client = get_http_client();
    let url = format!(
        "{}/v2beta/stable-image/generate/core",
        CONFIG.stability_base_url
    );

    debug!(
        target: "providers.stability",
        "prompt_len={}, aspect_ratio={:?}, output_format={}",
        prompt.len(),
        aspect_ratio,
        CONFIG.stability_output_format
    );

    let mut attempt = 0usize;
    loop {
        attempt += 1;
        // multipart forms are consumed by send(); rebuild per attempt.
        let form = build_form(prompt, negative_prompt, aspect_ratio);
        let response = match client
            .post(&url)
            .bearer_auth(&CONFIG.stability_api_key)
            .header("accept", "image/*")
            .timeout(Duration::from_secs(120))
            .multipart(form)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let should_retry =
                    should_retry_error(&err) && attempt < STABILITY_MAX_RETRY_ATTEMPTS;
                warn!(
                    "Stability request failed to send: {} (timeout={}, connect={}, retrying={})",
                    err,
                    err.is_timeout(),
                    err.is_connect(),
                    should_retry
                );
                if should_retry {
                    tokio::time::sleep(retry_delay(attempt)).await;
                    continue;
                }
                return Err(anyhow!("Stability request failed: {}", err));
            }
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let (message, body_summary) = summarize_error_body(&body);
            let should_retry = should_retry_status(status) && attempt < STABILITY_MAX_RETRY_ATTEMPTS;
            warn!(
                "Stability API error: status={}, body={}, retrying={}",
                status, body_summary, should_retry
            );
            if should_retry {
                tokio::time::sleep(retry_delay(attempt)).await;
                continue;
            }
            let detail = message.unwrap_or(body_summary);
            return Err(anyhow!(
                "Stability request failed with status {}: {}",
                status,
                detail
            ));
        }

        return Ok(response.bytes().await?.to_vec());
    }
}

pub async fn generate_image_with_stability(
    prompt: &str,
    negative_prompt: Option<&str>,
    aspect_ratio: Option<&str>,
    count: usize,
) -> Result<Vec<Vec<u8>>, ImageGenerationError> {
    if CONFIG.stability_api_key.trim().is_empty() {
        return Err(ImageGenerationError(
            "STABILITY_API_KEY is not configured".to_string(),
        ));
    }

    let mut images = Vec::new();
    for _ in 0..count.max(1) {
        let bytes = log_llm_timing("stability", "stable-image-core", "generate_image", None, || async {
            post_generate(prompt, negative_prompt, aspect_ratio).await
        })
        .await
        .map_err(|err| ImageGenerationError(err.to_string()))?;
        images.push(bytes);
    }

    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_through_supported_ratios() {
        assert_eq!(normalize_aspect_ratio(Some("16:9")).as_deref(), Some("16:9"));
    }

    #[test]
    fn drops_unsupported_ratios() {
        assert_eq!(normalize_aspect_ratio(Some("7:5")), None);
        assert_eq!(normalize_aspect_ratio(Some("")), None);
        assert_eq!(normalize_aspect_ratio(None), None);
    }
}
