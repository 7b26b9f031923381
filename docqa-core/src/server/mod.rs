//! HTTP surface for the docqa service, built on axum.
//!
//! Exposes the question-answering endpoint plus a health route. Bearer
//! auth runs before any pipeline work; total LLM token usage is reported
//! in the `X-Token-Usage` response header.

mod auth;
mod routes;

pub use auth::ApiAuth;
pub use routes::{AppState, router};
