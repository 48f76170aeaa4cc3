use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::PodSpec;
use serde::de::DeserializeOwned;

/// Workload kinds whose pod template containers get mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    DaemonSet,
    Unsupported,
}

impl WorkloadKind {
    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "Deployment" => WorkloadKind::Deployment,
            "DaemonSet" => WorkloadKind::DaemonSet,
            _ => WorkloadKind::Unsupported,
        }
    }

    /// Container images of the admitted object, in pod template order.
    ///
    /// Unsupported kinds yield no containers, so they are admitted unchanged.
    pub fn container_images(
        &self,
        object: &serde_json::Value,
    ) -> Result<Vec<Option<String>>, serde_json::Error> {
        match self {
            WorkloadKind::Deployment => images_of::<Deployment>(object),
            WorkloadKind::DaemonSet => images_of::<DaemonSet>(object),
            WorkloadKind::Unsupported => Ok(Vec::new()),
        }
    }
}

/// A workload resource that embeds a pod template.
pub trait Workload: DeserializeOwned {
    fn pod_spec(&self) -> Option<&PodSpec>;

    fn container_images(&self) -> Vec<Option<String>> {
        self.pod_spec()
            .map(|ps| ps.containers.iter().map(|c| c.image.clone()).collect())
            .unwrap_or_default()
    }
}

impl Workload for Deployment {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}

impl Workload for DaemonSet {
    fn pod_spec(&self) -> Option<&PodSpec> {
        self.spec.as_ref().and_then(|s| s.template.spec.as_ref())
    }
}

fn images_of<W: Workload>(
    object: &serde_json::Value,
) -> Result<Vec<Option<String>>, serde_json::Error> {
    let mut object = object.clone();
    // status is not needed here and arrives incomplete (`{}`) on CREATE
    if let Some(fields) = object.as_object_mut() {
        fields.remove("status");
    }
    let workload: W = serde_json::from_value(object)?;
    Ok(workload.container_images())
}
