use crate::review::ReviewProcessor;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tracing::{error, info};

pub async fn readiness_probe() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Mutating webhook endpoint: mirrors the workload's images and answers with a JSON patch.
pub async fn clone_image(
    State(processor): State<Arc<ReviewProcessor>>,
    body: Bytes,
) -> Response {
    let response = processor.process(&body).await;
    let status = if response.malformed {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };

    match response.encode() {
        Ok(bytes) => {
            info!("Writing admission review response");
            (status, [(header::CONTENT_TYPE, "application/json")], bytes).into_response()
        }
        Err(e) => {
            error!(error = %e, "Failed to encode admission review response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub fn create_app(processor: Arc<ReviewProcessor>) -> Router {
    Router::new()
        .route("/readyz", get(readiness_probe))
        .route("/clone-image", post(clone_image))
        .with_state(processor)
}
