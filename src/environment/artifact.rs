//! Per-problem image artifacts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EnvironmentError, PushError};
use crate::problem::ProblemSpec;

/// Tag every locally built artifact carries.
pub const ARTIFACT_TAG: &str = "latest";

/// A built image for one problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub problem_id: String,
    /// Full local reference, `<prefix>/<id>:<tag>`.
    pub image: String,
}

impl ArtifactRef {
    pub fn for_problem(local_prefix: &str, problem_id: &str) -> Self {
        let prefix = local_prefix.trim_end_matches('/');
        Self {
            problem_id: problem_id.to_string(),
            image: format!("{prefix}/{problem_id}:{ARTIFACT_TAG}"),
        }
    }
}

/// Builds and publishes problem images.
#[async_trait]
pub trait ArtifactPipeline: Send + Sync {
    /// Reference the artifact for `spec` has (or would have) locally.
    fn artifact_ref(&self, spec: &ProblemSpec) -> ArtifactRef;

    /// Builds the image for `spec` from the recipe.
    async fn build_artifact(&self, spec: &ProblemSpec) -> Result<ArtifactRef, EnvironmentError>;

    /// Re-tags the artifact under `remote_prefix` (when given) and pushes it.
    /// Returns the pushed reference.
    async fn push_artifact(&self, artifact: &ArtifactRef, remote_prefix: Option<&str>) -> Result<String, PushError>;
}

/// Replaces `local_prefix` in `image` with `remote_prefix`.
///
/// Images outside the local prefix are nested under the remote prefix.
pub fn substitute_prefix(image: &str, local_prefix: &str, remote_prefix: &str) -> String {
    let local = local_prefix.trim_end_matches('/');
    let remote = remote_prefix.trim_end_matches('/');
    match image.strip_prefix(local).and_then(|rest| rest.strip_prefix('/')) {
        Some(rest) if !local.is_empty() => format!("{remote}/{rest}"),
        _ => format!("{remote}/{image}"),
    }
}

/// Splits `repo[:tag]` into repository and tag, defaulting the tag.
pub fn split_image_ref(image: &str) -> (&str, &str) {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, ARTIFACT_TAG),
    }
}
