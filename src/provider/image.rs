//! Text-to-image client for the DashScope multimodal-generation API.
//!
//! A generation is two round trips: POST the prompt, then GET the image URL
//! from the reply and save the bytes under `output_dir` as
//! `generated_image_<unix-seconds>.png`.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use super::{ProviderError, Role, post_json};
use crate::config::Config;

#[derive(Debug, Serialize)]
pub struct ImageRequest<'a> {
    pub model: &'a str,
    pub input: ImageInput<'a>,
    pub parameters: ImageParameters<'a>,
}

#[derive(Debug, Serialize)]
pub struct ImageInput<'a> {
    pub messages: Vec<ImageMessage<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ImageMessage<'a> {
    pub role: Role,
    pub content: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
pub struct TextPart<'a> {
    pub text: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ImageParameters<'a> {
    /// `"<width>*<height>"`; omitted so the provider default applies when empty.
    #[serde(skip_serializing_if = "is_blank")]
    pub size: &'a str,
    pub watermark: bool,
    pub prompt_extend: bool,
}

fn is_blank(s: &&str) -> bool {
    s.is_empty()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImageResponse {
    pub output: ImageOutput,
    pub usage: ImageUsage,
    pub request_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImageOutput {
    pub choices: Vec<ImageChoice>,
    pub task_metric: TaskMetric,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImageChoice {
    pub finish_reason: String,
    pub message: ImageReply,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImageReply {
    pub role: String,
    pub content: Vec<ImagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImagePart {
    pub image: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "UPPERCASE")]
pub struct TaskMetric {
    pub failed: u32,
    pub succeeded: u32,
    pub total: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ImageUsage {
    pub width: u32,
    pub height: u32,
    pub image_count: u32,
}

impl ImageResponse {
    /// URL of the first image of the first choice.
    pub fn first_image_url(&self) -> Result<&str, ProviderError> {
        let choice = self
            .output
            .choices
            .first()
            .ok_or(ProviderError::EmptyChoices)?;
        match choice.message.content.first() {
            Some(part) if !part.image.is_empty() => Ok(&part.image),
            _ => Err(ProviderError::MissingImage),
        }
    }
}

/// Result of a successful generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    /// Where the provider hosts the image. This is what the client receives.
    pub url: String,
    /// Local copy.
    pub path: PathBuf,
}

#[derive(Clone)]
pub struct ImageClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    output_dir: PathBuf,
}

impl fmt::Debug for ImageClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

impl ImageClient {
    pub fn new(http: Client, config: &Config, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            http,
            endpoint: config.image_endpoint.clone(),
            api_key: config.image_api_key.clone(),
            model: config.image_model.clone(),
            output_dir: output_dir.into(),
        }
    }

    pub fn request<'a>(&'a self, prompt: &'a str, size: &'a str) -> ImageRequest<'a> {
        ImageRequest {
            model: &self.model,
            input: ImageInput {
                messages: vec![ImageMessage {
                    role: Role::User,
                    content: vec![TextPart { text: prompt }],
                }],
            },
            parameters: ImageParameters {
                size,
                watermark: true,
                prompt_extend: true,
            },
        }
    }

    /// Generates one image for `prompt` at `size` and saves a local copy.
    pub async fn generate(&self, prompt: &str, size: &str) -> Result<GeneratedImage, ProviderError> {
        info!(model = %self.model, size, "calling image provider");
        let response: ImageResponse =
            post_json(&self.http, &self.endpoint, &self.api_key, &self.request(prompt, size))
                .await?;

        let url = response.first_image_url()?.to_owned();
        info!(
            request_id = %response.request_id,
            width = response.usage.width,
            height = response.usage.height,
            succeeded = response.output.task_metric.succeeded,
            "image generated"
        );

        let path = self.download(&url).await?;
        info!(path = %path.display(), "image saved");
        Ok(GeneratedImage { url, path })
    }

    /// Fetches `url` and writes the bytes to a fresh file in `output_dir`.
    pub async fn download(&self, url: &str) -> Result<PathBuf, ProviderError> {
        let transport = |source| ProviderError::Transport {
            url: url.to_owned(),
            source,
        };

        let response = self.http.get(url).send().await.map_err(transport)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(ProviderError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
                body: String::new(),
            });
        }
        let bytes = response.bytes().await.map_err(transport)?;

        write_unique(&self.output_dir, chrono::Utc::now().timestamp(), &bytes).await
    }
}

/// File name for the `attempt`-th image saved during second `stamp`.
pub fn image_file_name(stamp: i64, attempt: u32) -> String {
    if attempt == 0 {
        format!("generated_image_{stamp}.png")
    } else {
        format!("generated_image_{stamp}_{attempt}.png")
    }
}

// `create_new` makes the name claim atomic, so two generations in the same
// second land in different files.
async fn write_unique(dir: &Path, stamp: i64, bytes: &[u8]) -> Result<PathBuf, ProviderError> {
    let mut attempt = 0;
    loop {
        let path = dir.join(image_file_name(stamp, attempt));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => return write_or_discard(&mut file, path, bytes).await,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(source) => return Err(ProviderError::Io { path, source }),
        }
    }
}

// Writes `bytes` to the freshly created `path`. A failed write removes the
// file so no truncated image is left behind.
async fn write_or_discard<W>(
    file: &mut W,
    path: PathBuf,
    bytes: &[u8],
) -> Result<PathBuf, ProviderError>
where
    W: AsyncWrite + Unpin,
{
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await
    }
    .await;

    match written {
        Ok(()) => Ok(path),
        Err(source) => {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "could not remove partial image");
            }
            Err(ProviderError::Io { path, source })
        }
    }
}
