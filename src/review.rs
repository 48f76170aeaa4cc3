use crate::admission::{
    AdmissionRequest, DecodeError, REASON_INTERNAL_ERROR, ReviewResponse, decode_review,
};
use crate::mirror::MirrorTarget;
use crate::patch::{PatchError, build_patches};
use json_patch::{Patch, PatchOperation};
use crate::transfer::ImageTransfer;
use crate::workload::WorkloadKind;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

pub const ERR_INVALID_REVIEW: &str = "Invalid admission review request. Please check the logs.";
pub const ERR_CREATING_PATCH: &str =
    "Internal server error creating a patch. Please check the logs.";
pub const ERR_MARSHALLING_PATCH: &str =
    "Internal server error marshalling the patch. Please check the logs.";

#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Transfer(#[from] PatchError),

    #[error("image transfer did not finish within {0:?}")]
    Timeout(Duration),
}

/// Turns AdmissionReview bodies into responses, mirroring images on the way.
///
/// Holds only read-only configuration and the shared transfer client, so one
/// instance serves all concurrent requests.
pub struct ReviewProcessor {
    target: MirrorTarget,
    transfer: Arc<dyn ImageTransfer>,
    timeout: Duration,
}

impl ReviewProcessor {
    pub fn new(target: MirrorTarget, transfer: Arc<dyn ImageTransfer>, timeout: Duration) -> Self {
        Self {
            target,
            transfer,
            timeout,
        }
    }

    /// Never fails: every error becomes a denial, with the cause only in the logs.
    pub async fn process(&self, body: &[u8]) -> ReviewResponse {
        let request = match decode_review(body) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "Failed to validate review request");
                return ReviewResponse::deny("", 500, REASON_INTERNAL_ERROR, ERR_INVALID_REVIEW)
                    .mark_malformed();
            }
        };

        info!(
            uid = %request.uid,
            kind = %request.kind.kind,
            group = %request.kind.group,
            version = %request.kind.version,
            operation = %request.operation,
            namespace = request.namespace.as_deref().unwrap_or_default(),
            name = request.name.as_deref().unwrap_or_default(),
            "Review request received"
        );

        match self.mutate(&request).await {
            Ok(patches) if patches.is_empty() => {
                info!(uid = %request.uid, "No image needs mirroring, allowing unchanged");
                ReviewResponse::allow(request.uid, None)
            }
            Ok(patches) => match serde_json::to_vec(&Patch(patches)) {
                Ok(patch) => {
                    info!(uid = %request.uid, patch_bytes = patch.len(), "Applying patch");
                    ReviewResponse::allow(request.uid, Some(patch))
                }
                Err(e) => {
                    error!(uid = %request.uid, error = %e, "Failed to serialize patch");
                    ReviewResponse::deny(
                        request.uid,
                        500,
                        REASON_INTERNAL_ERROR,
                        ERR_MARSHALLING_PATCH,
                    )
                }
            },
            Err(e @ ReviewError::Decode(_)) => {
                error!(uid = %request.uid, error = %e, "Failed to decode admitted object");
                ReviewResponse::deny(request.uid, 500, REASON_INTERNAL_ERROR, ERR_INVALID_REVIEW)
                    .mark_malformed()
            }
            Err(e) => {
                error!(uid = %request.uid, error = %e, "Failed to mirror container images");
                ReviewResponse::deny(request.uid, 500, REASON_INTERNAL_ERROR, ERR_CREATING_PATCH)
            }
        }
    }

    async fn mutate(&self, request: &AdmissionRequest) -> Result<Vec<PatchOperation>, ReviewError> {
        let kind = WorkloadKind::from_kind(&request.kind.kind);
        if kind == WorkloadKind::Unsupported {
            warn!(
                uid = %request.uid,
                kind = %request.kind.kind,
                "Unhandled workload kind, allowing unchanged"
            );
            return Ok(Vec::new());
        }

        let Some(object) = &request.object else {
            info!(uid = %request.uid, "Request carries no object, allowing unchanged");
            return Ok(Vec::new());
        };

        let images = kind
            .container_images(object)
            .map_err(|source| DecodeError::Object {
                kind: request.kind.kind.clone(),
                source,
            })?;

        let patches = tokio::time::timeout(
            self.timeout,
            build_patches(self.transfer.as_ref(), &self.target, &images),
        )
        .await
        .map_err(|_| ReviewError::Timeout(self.timeout))??;

        Ok(patches)
    }
}
