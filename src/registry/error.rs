//! Registry error types
//!
//! Error types for client registry operations.

use super::entry::ClientId;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Message from a connection that never joined (or already left)
    UnknownSender(u64),
    /// Client not registered
    ClientNotFound(ClientId),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::UnknownSender(session_id) => {
                write!(f, "Unknown sender: session {}", session_id)
            }
            RegistryError::ClientNotFound(id) => write!(f, "Client not found: {}", id),
        }
    }
}

impl std::error::Error for RegistryError {}
