//! Deploy provider trait definition

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shipflow_core::ResolvedService;
use std::fmt;

/// Identifier of a locally built image (engine-specific, e.g. `sha256:…`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageId(pub String);

impl ImageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Deploy provider abstraction trait
///
/// The executor only orchestrates calls to this trait. Implementations talk
/// to a container engine and a deployment API. Every method may be called
/// concurrently for different services.
#[async_trait]
pub trait DeployProvider: Send + Sync {
    /// Returns the provider name (e.g., "command", "dry-run")
    fn name(&self) -> &str;

    /// Build the service image from its build context
    async fn build(&self, service: &ResolvedService) -> Result<ImageId>;

    /// Tag a built image with the target reference
    async fn tag(&self, image: &ImageId, reference: &str) -> Result<()>;

    /// Push a tagged reference to its registry
    async fn push(&self, reference: &str) -> Result<()>;

    /// Deploy the service using `service.image` and its resolved environment
    async fn deploy(&self, service: &ResolvedService) -> Result<()>;

    /// Undo a successful deploy of the service
    ///
    /// Providers that cannot roll back keep the default, which does nothing.
    async fn rollback(&self, service: &ResolvedService) -> Result<()> {
        tracing::debug!(
            provider = self.name(),
            service = %service.name,
            "Provider has no rollback support"
        );
        Ok(())
    }
}
