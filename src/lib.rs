//! # deskrelay
//!
//! An HTTP relay for a desktop assistant. A single endpoint, `POST /process`,
//! takes a user request, decides by keyword whether it is small talk, a
//! request to organize the desktop, or a request for a new wallpaper, and
//! forwards it to a chat-completion provider or a text-to-image provider.
//! The result always comes back as `{"output": "..."}`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use deskrelay::{app, config::{Config, Settings}, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load("config.json")?;
//!     let state = Arc::new(app::AppState::new(&config, &Settings::default())?);
//!     Server::bind("0.0.0.0:8080").await?.run(app::router(state)).await?;
//!     Ok(())
//! }
//! ```

// ── HTTP plumbing ─────────────────────────────────────────────────────────────
pub mod context;
pub mod http;
pub mod middleware;
pub mod router;
pub mod server;

// ── Relay ─────────────────────────────────────────────────────────────────────
pub mod app;
pub mod config;
pub mod intent;
pub mod payload;
pub mod provider;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{Config, Settings};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use intent::{Intent, classify};
pub use router::Router;
pub use server::{Server, ServerError};
