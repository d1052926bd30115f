//! Node registry

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),
}

/// Read-only view of which nodes are currently registered
pub trait NodeRegistry: Send + Sync {
    fn node_names(&self) -> Result<Vec<String>, RegistryError>;
}
