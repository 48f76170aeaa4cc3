//! `admission.k8s.io/v1` AdmissionReview wire types.
//!
//! Only the fields the webhook reads or writes are modelled; unknown request
//! fields are ignored.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

pub const ADMISSION_REVIEW_KIND: &str = "AdmissionReview";
pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
pub const JSON_PATCH: &str = "JSONPatch";

pub const REASON_INTERNAL_ERROR: &str = "InternalError";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewRequest {
    #[serde(default)]
    pub request: Option<AdmissionRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionRequest {
    pub uid: String,
    pub kind: GroupVersionKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub object: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupVersionKind {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub version: String,
    pub kind: String,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed admission review: {0}")]
    Json(#[from] serde_json::Error),

    #[error("admission review has no request")]
    MissingRequest,

    #[error("malformed {kind} object: {source}")]
    Object {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Parses an AdmissionReview body and returns its request.
pub fn decode_review(body: &[u8]) -> Result<AdmissionRequest, DecodeError> {
    let review: AdmissionReviewRequest = serde_json::from_slice(body)?;
    review.request.ok_or(DecodeError::MissingRequest)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub code: u16,
    pub message: String,
    pub reason: String,
}

/// Outcome of one review before it is put on the wire.
///
/// Allowed responses never carry a status; denied ones always do and never carry a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewResponse {
    pub uid: String,
    pub allowed: bool,
    /// JSON encoded list of patch operations.
    pub patch: Option<Vec<u8>>,
    pub status: Option<Status>,
    /// The review itself could not be understood. Not part of the envelope;
    /// only the HTTP status reflects it.
    pub malformed: bool,
}

impl ReviewResponse {
    pub fn allow(uid: impl Into<String>, patch: Option<Vec<u8>>) -> Self {
        Self {
            uid: uid.into(),
            allowed: true,
            patch,
            status: None,
            malformed: false,
        }
    }

    pub fn deny(
        uid: impl Into<String>,
        code: u16,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            allowed: false,
            patch: None,
            status: Some(Status {
                code,
                message: message.into(),
                reason: reason.into(),
            }),
            malformed: false,
        }
    }

    pub fn mark_malformed(mut self) -> Self {
        self.malformed = true;
        self
    }

    pub fn into_review(self) -> AdmissionReviewResponse {
        let (patch, patch_type) = match self.patch {
            Some(patch) => (Some(STANDARD.encode(patch)), Some(JSON_PATCH.to_string())),
            None => (None, None),
        };
        let status = self
            .status
            .map(|s| WireStatus {
                code: s.code,
                message: s.message,
                reason: s.reason,
            })
            .unwrap_or_default();

        AdmissionReviewResponse {
            kind: ADMISSION_REVIEW_KIND.to_string(),
            api_version: ADMISSION_API_VERSION.to_string(),
            response: AdmissionResponse {
                uid: self.uid,
                allowed: self.allowed,
                patch,
                patch_type,
                status,
            },
        }
    }

    pub fn encode(self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.into_review())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionReviewResponse {
    pub kind: String,
    pub api_version: String,
    pub response: AdmissionResponse,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionResponse {
    pub uid: String,
    pub allowed: bool,
    /// Base64 of the JSON patch: `admission.k8s.io/v1` declares `patch` as `[]byte`,
    /// which the API server only accepts base64 encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_type: Option<String>,
    #[serde(default)]
    pub status: WireStatus,
}

/// Zero valued (`{}`) on allowed responses.
#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireStatus {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub code: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
}

fn is_zero(code: &u16) -> bool {
    *code == 0
}

#[cfg(test)]
impl AdmissionReviewResponse {
    /// Reverse of [`ReviewResponse::into_review`].
    pub(crate) fn into_review_response(self) -> ReviewResponse {
        let response = self.response;
        let status = (response.status != WireStatus::default()).then(|| Status {
            code: response.status.code,
            message: response.status.message,
            reason: response.status.reason,
        });
        ReviewResponse {
            uid: response.uid,
            allowed: response.allowed,
            patch: response
                .patch
                .map(|p| STANDARD.decode(p).expect("patch is base64")),
            status,
            malformed: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::replace_image;
    use json_patch::Patch;
    use serde_json::json;

    const UID: &str = "4584308f-b307-455b-ab11-5765b4548b71";

    #[test]
    fn test_decode_review_fixture() {
        let request =
            decode_review(include_bytes!("../tests/data/admission_review_deployment.json"))
                .expect("valid review");
        assert_eq!(request.uid, UID);
        assert_eq!(request.kind.kind, "Deployment");
        assert_eq!(request.kind.group, "apps");
        assert_eq!(request.name.as_deref(), Some("alpine"));
        assert_eq!(request.operation, "CREATE");
        assert!(request.object.is_some());
    }

    #[test]
    fn test_decode_review_errors() {
        assert!(matches!(decode_review(b"{not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            decode_review(br#"{"kind":"AdmissionReview","apiVersion":"admission.k8s.io/v1"}"#),
            Err(DecodeError::MissingRequest)
        ));
    }

    #[test]
    fn test_allowed_response_with_patch_wire_shape() {
        let patch =
            serde_json::to_vec(&Patch(vec![replace_image(0, "acme/alpine:3.12".to_string())]))
                .unwrap();
        let encoded = ReviewResponse::allow(UID, Some(patch.clone())).encode().unwrap();
        let wire: serde_json::Value = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(
            wire,
            json!({
                "kind": "AdmissionReview",
                "apiVersion": "admission.k8s.io/v1",
                "response": {
                    "uid": UID,
                    "allowed": true,
                    "patch": STANDARD.encode(&patch),
                    "patchType": "JSONPatch",
                    "status": {}
                }
            })
        );
    }

    #[test]
    fn test_allowed_response_without_patch_has_no_patch_type() {
        let encoded = ReviewResponse::allow(UID, None).encode().unwrap();
        let wire: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert!(wire["response"].get("patch").is_none());
        assert!(wire["response"].get("patchType").is_none());
        assert_eq!(wire["response"]["status"], json!({}));
    }

    #[test]
    fn test_denied_response_wire_shape() {
        let encoded = ReviewResponse::deny(UID, 500, REASON_INTERNAL_ERROR, "boom")
            .encode()
            .unwrap();
        let wire: serde_json::Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(
            wire["response"],
            json!({
                "uid": UID,
                "allowed": false,
                "status": {"code": 500, "message": "boom", "reason": "InternalError"}
            })
        );
    }

    #[test]
    fn test_malformed_flag_stays_off_the_wire() {
        let denied = ReviewResponse::deny("", 500, REASON_INTERNAL_ERROR, "bad review");
        let plain = denied.clone().encode().unwrap();
        let malformed = denied.mark_malformed().encode().unwrap();
        assert_eq!(plain, malformed);
    }

    #[test]
    fn test_response_survives_the_wire() {
        let ops = Patch(vec![
            replace_image(0, "quay.io/acme/alpine:3.12".to_string()),
            replace_image(2, "quay.io/acme/nginx:1.25".to_string()),
        ]);
        let sent = ReviewResponse::allow(UID, Some(serde_json::to_vec(&ops).unwrap()));

        let encoded = sent.clone().encode().unwrap();
        let wire: AdmissionReviewResponse = serde_json::from_slice(&encoded).unwrap();
        let decoded = wire.into_review_response();

        assert_eq!(decoded, sent);
        let decoded_ops: Patch =
            serde_json::from_slice(decoded.patch.as_deref().unwrap()).unwrap();
        assert_eq!(decoded_ops, ops);
    }
}
