//! Infrastructure provisioning contracts.

pub mod backend;
pub mod config;

pub use backend::{InfrastructureDeploymentStatus, ProvisioningBackend, StackId};
pub use config::{ParameterValue, ProvisioningConfig};
