//! Model listing API types and handlers.

use std::path::PathBuf;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Layout of one hosted model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    /// `layers-model` or `graph-model`, when `model.json` says so.
    pub format: Option<String>,
    pub interface: Vec<u32>,
    pub layers: usize,
    pub files: Vec<String>,
    /// Size of each partition file, in step order.
    pub step_bytes: Vec<usize>,
    pub total_bytes: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelSummary>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("model '{0}' not found")]
    NotFound(String),

    #[error("model '{0}' is invalid: {1}")]
    InvalidModel(String, String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("background task failed: {0}")]
    Join(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidModel(..) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Io { .. } | ApiError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("{}", self);
        }
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

/// Run filesystem work off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Join(e.to_string()))?
}

pub async fn list_models(State(state): State<AppState>) -> Result<Json<ModelList>, ApiError> {
    let data = blocking(move || {
        let mut data = Vec::new();
        for name in state.model_names()? {
            match state.summary(&name) {
                Ok(summary) => data.push(summary),
                Err(e) => tracing::warn!("Skipping model '{}': {}", name, e),
            }
        }
        Ok(data)
    })
    .await?;

    Ok(Json(ModelList {
        object: "list".to_string(),
        data,
    }))
}

pub async fn get_model(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ModelSummary>, ApiError> {
    let summary = blocking(move || state.summary(&name)).await?;
    Ok(Json(summary))
}
