//! Wiring: shared state and the route table.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{Config, Settings};
use crate::middleware::LoggerMiddleware;
use crate::provider::{ChatClient, ImageClient, build_http_client};
use crate::router::Router;

pub mod process;

pub use process::{ProcessError, dispatch, process};

/// State shared read-only by every request. Built once at startup.
#[derive(Debug)]
pub struct AppState {
    pub chat: ChatClient,
    pub image: ImageClient,
    pub prompt_path: PathBuf,
}

impl AppState {
    /// Builds both provider clients on one shared connection pool.
    pub fn new(config: &Config, settings: &Settings) -> Result<Self, reqwest::Error> {
        let http = build_http_client(settings.upstream_timeout)?;
        Ok(Self {
            chat: ChatClient::new(http.clone(), config),
            image: ImageClient::new(http, config, settings.image_dir.clone()),
            prompt_path: settings.prompt_path.clone(),
        })
    }
}

/// The relay's route table: `POST /process`, logged.
pub fn router(state: Arc<AppState>) -> Router {
    let mut router = Router::new(state);
    router.layer(LoggerMiddleware);
    router.post("/process", process);
    router
}

#[cfg(test)]
pub(crate) fn test_state() -> Arc<AppState> {
    let state = AppState::new(&Config::default(), &Settings::default())
        .expect("default http client builds");
    Arc::new(state)
}
