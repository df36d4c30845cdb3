//! Outbound clients for the two upstream AI providers.
//!
//! - [`chat::ChatClient`] talks to an OpenAI-compatible chat-completions endpoint.
//! - [`image::ImageClient`] talks to a DashScope-style text-to-image endpoint and
//!   downloads the result.
//!
//! Both share the same plumbing: a bearer-authenticated JSON POST that checks
//! the status code and decodes the body, and one error type.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod chat;
pub mod image;

pub use chat::ChatClient;
pub use image::{GeneratedImage, ImageClient};

/// Speaker of a message in a provider conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// Everything that can go wrong talking to a provider.
///
/// None of these are retried; the caller turns them into a 500.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("invalid JSON from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no choices in response")]
    EmptyChoices,

    #[error("no image URL in response")]
    MissingImage,

    #[error("failed to save image to {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error bodies from upstream are echoed into our own error text; keep them short.
const MAX_ERROR_BODY: usize = 512;

/// Builds the shared outbound client.
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("deskrelay/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// POSTs `body` as JSON with bearer auth and decodes the JSON reply.
pub(crate) async fn post_json<B, T>(
    http: &Client,
    url: &str,
    api_key: &str,
    body: &B,
) -> Result<T, ProviderError>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let transport = |source| ProviderError::Transport {
        url: url.to_owned(),
        source,
    };

    let response = http
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(transport)?;

    let status = response.status();
    let raw = response.text().await.map_err(transport)?;
    debug!(url, status = status.as_u16(), body = %raw, "provider response");

    if !status.is_success() {
        return Err(ProviderError::Status {
            url: url.to_owned(),
            status: status.as_u16(),
            body: truncate(&raw, MAX_ERROR_BODY).to_owned(),
        });
    }

    serde_json::from_str(&raw).map_err(|source| ProviderError::Decode {
        url: url.to_owned(),
        source,
    })
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
