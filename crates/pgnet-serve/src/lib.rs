//! # pgnet-serve
//!
//! Hosts converted models over HTTP so a progressive loader can stream them.
//!
//! Provides:
//! - `/models/<name>/…`: `model.json`, `progressive.json` and `part-<i>.bin`
//! - `/v1/models`: every model directory under the root with its layout
//! - `/v1/models/<name>`: one model's layout
//! - `/health`: health check

pub mod api;
pub mod config;
pub mod health;
pub mod server;
pub mod state;

pub use config::ServeConfig;
pub use server::{build_router, serve};
pub use state::AppState;
