//! Common error types shared across crates.

use thiserror::Error;

/// Top-level provisioning error type.
///
/// Variants map to process exit codes returned by the CLI:
/// - [`ProvisionError::Validation`] → 2
/// - [`ProvisionError::IdentityResolution`] → 3
/// - [`ProvisionError::Authorization`] → 4
/// - [`ProvisionError::Conflict`] → 5
/// - [`ProvisionError::NotFound`] → 6
/// - [`ProvisionError::Aws`] → 1
/// - [`ProvisionError::Internal`] → 1
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// An input value is out of range or malformed. Raised before any AWS call.
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// The account, partition, or region could not be resolved from the
    /// ambient credentials.
    #[error("caller identity could not be resolved: {0}")]
    IdentityResolution(String),

    /// The credentials lack permission for a KMS operation.
    #[error("not authorised: {0}")]
    Authorization(String),

    /// The alias is bound to a key this tool does not manage.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The alias or key does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Any other AWS API failure.
    #[error("aws error: {0}")]
    Aws(String),

    /// An unexpected local failure, e.g. the policy could not be serialised.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProvisionError {
    /// Returns the process exit code that should be used for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ProvisionError::Validation(_) => 2,
            ProvisionError::IdentityResolution(_) => 3,
            ProvisionError::Authorization(_) => 4,
            ProvisionError::Conflict(_) => 5,
            ProvisionError::NotFound(_) => 6,
            ProvisionError::Aws(_) | ProvisionError::Internal(_) => 1,
        }
    }
}
