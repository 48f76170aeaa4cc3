//! Naming of mirrored images and detection of images that already live in the mirror.

/// Registry host (possibly empty) and namespace that mirrored images are pushed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorTarget {
    registry: String,
    namespace: String,
}

impl MirrorTarget {
    pub fn new(registry: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            namespace: namespace.into(),
        }
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name `source` gets inside the mirror.
    ///
    /// Only the last path segment (`repo[:tag]`) of the source survives, so
    /// `docker.io/library/alpine:3.12` becomes `<registry>/<namespace>/alpine:3.12`.
    pub fn mirrored_image(&self, source: &str) -> String {
        let last_segment = source.rsplit('/').next().unwrap_or(source);
        if self.registry.is_empty() {
            format!("{}/{}", self.namespace, last_segment)
        } else {
            format!("{}/{}/{}", self.registry, self.namespace, last_segment)
        }
    }

    /// Whether `image` already points at the mirror and must be left alone.
    ///
    /// The namespace check is a plain substring match, not a path segment
    /// comparison: `quay.io/acme-tools/x` counts as mirrored for namespace `acme`.
    pub fn is_mirrored(&self, image: &str) -> bool {
        if self.registry.is_empty() {
            image.starts_with(&self.namespace)
        } else {
            image.starts_with(&self.registry) && image.contains(&self.namespace)
        }
    }
}
