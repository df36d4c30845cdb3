//! Per-request context handed to middleware and handlers.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::app::AppState;
use crate::http::Request;

/// The request being served plus the state shared by every request.
pub struct Context {
    request: Request,
    state: Arc<AppState>,
}

impl Context {
    pub fn new(request: Request, state: Arc<AppState>) -> Self {
        Self { request, state }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Decodes the request body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        self.request.json()
    }
}
