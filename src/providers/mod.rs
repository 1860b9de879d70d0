use std::collections::HashMap;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::info;

use crate::config::CONFIG;

pub mod gemini;
pub mod local_sd;
pub mod media;
pub mod openai;
pub mod stability;

pub use gemini::{call_gemini_text, generate_image_with_gemini, GeminiImageConfig};

#[derive(Debug, thiserror::Error)]
#[error("Image generation failed: {0}")]
pub struct ImageGenerationError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    OpenAi,
    Stability,
    LocalSd,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
            Provider::Stability => "stability",
            Provider::LocalSd => "local-sd",
        }
    }

    pub fn parse(value: &str) -> Option<Provider> {
        match value.trim().to_lowercase().as_str() {
            "gemini" => Some(Provider::Gemini),
            "openai" | "dalle" | "dall-e" => Some(Provider::OpenAi),
            "stability" => Some(Provider::Stability),
            "local-sd" | "sd" | "a1111" | "webui" => Some(Provider::LocalSd),
            _ => None,
        }
    }

    pub fn default_model(&self) -> String {
        match self {
            Provider::Gemini => CONFIG.gemini_image_model.clone(),
            Provider::OpenAi => CONFIG.openai_image_model.clone(),
            Provider::Stability => "stable-image-core".to_string(),
            Provider::LocalSd => "txt2img".to_string(),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub aspect_ratio: Option<String>,
    pub size: Option<(u32, u32)>,
    pub count: usize,
    pub reference_images: Vec<Vec<u8>>,
}

static LAST_REQUEST: Lazy<Mutex<HashMap<&'static str, Instant>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn pending_backoff(provider: Provider) -> Option<Duration> {
    let min_interval = Duration::from_secs(CONFIG.provider_min_interval_seconds);
    if min_interval.is_zero() {
        return None;
    }

    let limits = LAST_REQUEST.lock();
    let last = limits.get(provider.as_str())?;
    let elapsed = last.elapsed();
    if elapsed < min_interval {
        Some(min_interval - elapsed)
    } else {
        None
    }
}

/// Enforces the per-provider minimum request interval, sleeping out the
/// remainder before recording the new request.
pub async fn acquire_provider_slot(provider: Provider) {
    if let Some(delay) = pending_backoff(provider) {
        info!(
            "Throttling {} for {:.1}s before the next request",
            provider,
            delay.as_secs_f64()
        );
        tokio::time::sleep(delay).await;
    }
    LAST_REQUEST.lock().insert(provider.as_str(), Instant::now());
}

/// Repeats a provider call until `count` images are collected. Gemini returns
/// a model-chosen number of images per generateContent call, so one call is
/// not enough when the user asked for several.
async fn collect_images<F, Fut>(
    count: usize,
    mut call: F,
) -> Result<Vec<Vec<u8>>, ImageGenerationError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Vec<u8>>, ImageGenerationError>>,
{
    let count = count.max(1);
    let mut images = Vec::new();
    while images.len() < count {
        let batch = call().await?;
        if batch.is_empty() {
            break;
        }
        images.extend(batch);
    }
    images.truncate(count);
    Ok(images)
}

pub async fn generate_image(
    provider: Provider,
    request: &ImageRequest,
) -> Result<Vec<Vec<u8>>, ImageGenerationError> {
    if !request.reference_images.is_empty() && provider != Provider::Gemini {
        return Err(ImageGenerationError(format!(
            "Reference images are only supported by the gemini provider, not {}",
            provider
        )));
    }

    acquire_provider_slot(provider).await;

    match provider {
        Provider::Gemini => {
            let config = GeminiImageConfig {
                aspect_ratio: request.aspect_ratio.clone(),
                image_size: request
                    .size
                    .map(|(w, h)| format!("{}x{}", w, h)),
            };
            collect_images(request.count, || {
                gemini::generate_image_with_gemini(
                    &request.prompt,
                    &request.reference_images,
                    Some(config.clone()),
                )
            })
            .await
        }
        Provider::OpenAi => {
            openai::generate_image_with_openai(&request.prompt, request.size, request.count).await
        }
        Provider::Stability => {
            stability::generate_image_with_stability(
                &request.prompt,
                request.negative_prompt.as_deref(),
                request.aspect_ratio.as_deref(),
                request.count,
            )
            .await
        }
        Provider::LocalSd => {
            local_sd::generate_image_with_local_sd(
                &request.prompt,
                request.negative_prompt.as_deref(),
                request.size,
                request.count,
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_aliases() {
        assert_eq!(Provider::parse("DALL-E"), Some(Provider::OpenAi));
        assert_eq!(Provider::parse("a1111"), Some(Provider::LocalSd));
        assert_eq!(Provider::parse("midjourney"), None);
    }

    #[tokio::test]
    async fn non_gemini_providers_reject_reference_images() {
        let request = ImageRequest {
            prompt: "a logo".to_string(),
            reference_images: vec![vec![0u8; 4]],
            ..ImageRequest::default()
        };
        for provider in [Provider::OpenAi, Provider::Stability, Provider::LocalSd] {
            let err = generate_image(provider, &request).await.unwrap_err();
            assert!(err.to_string().contains("gemini"), "{provider}: {err}");
        }
    }

    #[tokio::test]
    async fn repeats_single_image_calls_until_count_is_met() {
        let calls = std::cell::Cell::new(0usize);
        let images = collect_images(3, || {
            calls.set(calls.get() + 1);
            async { Ok(vec![vec![0u8]]) }
        })
        .await
        .unwrap();
        assert_eq!(images.len(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn truncates_oversized_batches_to_the_requested_count() {
        let images = collect_images(3, || async { Ok(vec![vec![1u8], vec![2u8]]) })
            .await
            .unwrap();
        assert_eq!(images.len(), 3);
    }
}
