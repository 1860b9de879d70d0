use once_cell::sync::Lazy;
use reqwest::Client;
use std::time::Duration;

// Image endpoints can be slow to first byte; per-request timeouts tighten
// this where needed.
static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent(concat!("imageai/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(120))
        .build()
        .expect("Failed to build HTTP client")
});

pub fn get_http_client() -> &'static Client {
    &HTTP_CLIENT
}
