use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::providers::gemini::summarize_error_body;
use crate::providers::ImageGenerationError;
use crate::utils::http::get_http_client;
use crate::utils::timing::log_llm_timing;

#[derive(Debug, Deserialize)]
struct Txt2ImgResponse {
    images: Vec<String>,
}

/// Client for a locally running AUTOMATIC1111 Stable Diffusion WebUI
/// (`--api` mode). No auth, no retry: the server is on localhost and a
/// failure means it is down or mid-model-load, which retrying won't fix.
pub async fn generate_image_with_local_sd(
    prompt: &str,
    negative_prompt: Option<&str>,
    size: Option<(u32, u32)>,
    count: usize,
) -> Result<Vec<Vec<u8>>, ImageGenerationError> {
    let (width, height) = size.unwrap_or((512, 512));
    let payload = json!({
        "prompt": prompt,
        "negative_prompt": negative_prompt.unwrap_or(""),
        "width": width,
        "height": height,
        "steps": CONFIG.sd_steps,
        "cfg_scale": CONFIG.sd_cfg_scale,
        "batch_size": count.max(1),
    });

    debug!(
        target: "providers.local_sd",
        "txt2img width={} height={} steps={} batch_size={}",
        width,
        height,
        CONFIG.sd_steps,
        count.max(1)
    );

    let response = log_llm_timing("local-sd", "txt2img", "generate_image", None, || async {
        post_txt2img(&payload).await
    })
    .await
    .map_err(|err| ImageGenerationError(err.to_string()))?;

    let mut images = Vec::new();
    for encoded in response.images {
        // WebUI may prefix payloads as data URLs depending on settings.
        let encoded = encoded
            .split_once(",")
            .map(|(_, rest)| rest)
            .unwrap_or(encoded.as_str());
        match general_purpose::STANDARD.decode(encoded.as_bytes()) {
            Ok(bytes) => images.push(bytes),
            Err(err) => warn!("Skipping undecodable SD image payload: {err}"),
        }
    }

    if images.is_empty() {
        return Err(ImageGenerationError(
            "No images returned by local Stable Diffusion".to_string(),
        ));
    }

    Ok(images)
}

async fn post_txt2img(payload: &serde_json::Value) -> Result<Txt2ImgResponse> {
    let client = get_http_client();
    let url = format!("{}/sdapi/v1/txt2img", CONFIG.sd_webui_url.trim_end_matches('/'));

    let response = client
        .post(&url)
        .timeout(Duration::from_secs(600))
        .json(payload)
        .send()
        .await
        .map_err(|err| {
            anyhow!(
                "Local Stable Diffusion is unreachable at {}: {} (is the WebUI running with --api?)",
                CONFIG.sd_webui_url,
                err
            )
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let (message, body_summary) = summarize_error_body(&body);
        let detail = message.unwrap_or(body_summary);
        return Err(anyhow!(
            "Local Stable Diffusion request failed with status {}: {}",
            status,
            detail
        ));
    }

    Ok(response.json::<Txt2ImgResponse>().await?)
}
