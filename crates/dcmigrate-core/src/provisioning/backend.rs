//! Provisioning backend trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::config::ProvisioningConfig;
use crate::error::Result;

/// Identifier the backend assigns to a submitted stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StackId(pub String);

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum InfrastructureDeploymentStatus {
    InProgress,
    Complete,
    Failed { reason: String },
}

/// An infrastructure-as-code service that creates stacks from templates.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Submits a stack creation request and returns its identifier without
    /// waiting for the stack to come up.
    async fn create_stack(&self, config: &ProvisioningConfig) -> Result<StackId>;

    async fn stack_status(&self, stack_id: &StackId) -> Result<InfrastructureDeploymentStatus>;
}
