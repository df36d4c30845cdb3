//! `POST /process`: classify the request, call the right provider, wrap the
//! result as `{"output": "..."}`.

use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::context::Context;
use crate::http::{Response, StatusCode};
use crate::intent::{Intent, classify, keyword_intent};
use crate::payload::{UserRequest, UserResponse};
use crate::provider::ProviderError;

/// Why a `/process` call failed. The `Display` text is the response body.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Error parsing request: {0}")]
    BadBody(#[from] serde_json::Error),

    #[error("Unknown request type: {0}")]
    UnknownType(i64),

    #[error("Error reading prompt file {}: {source}", path.display())]
    Prompt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Error calling LLM: {0}")]
    Chat(#[source] ProviderError),

    #[error("Error generating image: {0}")]
    Image(#[source] ProviderError),
}

impl ProcessError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadBody(_) | Self::UnknownType(_) => StatusCode::BadRequest,
            Self::Prompt { .. } | Self::Chat(_) | Self::Image(_) => {
                StatusCode::InternalServerError
            }
        }
    }
}

impl From<ProcessError> for Response {
    fn from(err: ProcessError) -> Self {
        Response::text(err.status(), err.to_string())
    }
}

/// Route handler.
pub async fn process(ctx: Context) -> Response {
    debug!(
        body = %String::from_utf8_lossy(ctx.request().body()),
        "raw request body"
    );

    let request: UserRequest = match ctx.json() {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "rejecting malformed request body");
            return ProcessError::from(e).into();
        }
    };

    match dispatch(ctx.state(), &request).await {
        Ok(output) => Response::json(StatusCode::Ok, &UserResponse::new(output)),
        Err(e) => {
            if e.status() == StatusCode::BadRequest {
                warn!(error = %e, "rejecting request");
            } else {
                error!(error = %e, "request failed");
            }
            e.into()
        }
    }
}

/// Classifies `request` and runs it against the matching provider,
/// returning the text that goes into `output`.
///
/// A `type` outside 0..=2 is still rescued by a keyword match. Without one
/// the request fails with [`ProcessError::UnknownType`] (400) instead of
/// succeeding with an empty `output`, so a client sending a bad code finds
/// out.
pub async fn dispatch(state: &AppState, request: &UserRequest) -> Result<String, ProcessError> {
    // Keywords override the requested type, even one we do not recognise.
    let intent = match request.requested_intent() {
        Some(requested) => classify(&request.input, requested),
        None => keyword_intent(&request.input).ok_or(ProcessError::UnknownType(request.kind))?,
    };
    info!(requested = request.kind, %intent, "classified request");

    match intent {
        Intent::Chat => state
            .chat
            .complete(&request.chat_message(), &request.prompt)
            .await
            .map_err(ProcessError::Chat),
        Intent::Organize => {
            let prompt = tokio::fs::read_to_string(&state.prompt_path)
                .await
                .map_err(|source| ProcessError::Prompt {
                    path: state.prompt_path.clone(),
                    source,
                })?;
            state
                .chat
                .complete(&request.chat_message(), &prompt)
                .await
                .map_err(ProcessError::Chat)
        }
        Intent::Image => state
            .image
            .generate(&request.input, &request.screen_resolution)
            .await
            .map(|image| image.url)
            .map_err(ProcessError::Image),
    }
}
