//! Push notifications to the desktop UI.
//!
//! Delivery is best-effort and at-most-once: every notification is sent from
//! its own detached task, failures are logged and never retried. The UI may
//! legitimately not be running.

use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::models::{BlockedEvent, ProxyStatus};

/// Request timeout for UI notifications.
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

const TOKEN_LEN: usize = 32;

/// Where the UI listens and the bearer token both sides share.
#[derive(Clone, PartialEq, Eq)]
pub struct UiLink {
    pub base_url: String,
    pub token: String,
}

impl std::fmt::Debug for UiLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiLink")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl UiLink {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    /// Creates a link with a fresh random token.
    pub fn generate(base_url: impl Into<String>) -> Self {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        Self::new(base_url, token)
    }

    /// Whether an `Authorization` header value carries this link's token.
    pub fn authorizes(&self, header: Option<&str>) -> bool {
        header
            .and_then(|value| value.strip_prefix("Bearer "))
            .is_some_and(|token| token == self.token)
    }
}

/// Sends fire-and-forget notifications to the UI.
#[derive(Debug, Clone)]
pub struct UiNotifier {
    client: Client,
    link: UiLink,
}

impl UiNotifier {
    pub fn new(link: UiLink) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(NOTIFY_TIMEOUT).build()?;
        Ok(Self { client, link })
    }

    pub fn link(&self) -> &UiLink {
        &self.link
    }

    /// Tells the UI a package was blocked.
    pub fn notify_blocked(&self, event: BlockedEvent) {
        self.post("/v1/blocked", event);
    }

    /// Tells the UI the proxy went up or down.
    pub fn notify_proxy_status(&self, running: bool) {
        self.post("/v1/proxy-status", ProxyStatus { running });
    }

    fn post<T>(&self, path: &'static str, body: T)
    where
        T: Serialize + Send + 'static,
    {
        let client = self.client.clone();
        let url = format!("{}{}", self.link.base_url, path);
        let token = self.link.token.clone();

        tokio::spawn(async move {
            let result = client
                .post(&url)
                .bearer_auth(token)
                .json(&body)
                .send()
                .await;

            match result {
                Ok(response) if response.status() == StatusCode::OK => {
                    debug!(%url, "UI notified");
                }
                Ok(response) => {
                    warn!(%url, status = %response.status(), "UI returned non-OK status");
                }
                Err(e) => {
                    warn!(%url, error = %e, "Failed to notify UI (UI may not be running)");
                }
            }
        });
    }
}
