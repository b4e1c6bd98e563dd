//! AWS SDK wiring for KMS and STS.
//!
//! The reconciler only sees the [`KmsApi`] and [`IdentityApi`] traits; the
//! SDK-backed implementations live here together with the client bundle that
//! resolves credentials and region once per run.

pub mod clients;
pub mod identity;
pub mod kms;

#[cfg(test)]
pub mod fake;

pub use clients::AwsClients;
pub use identity::resolve_caller_context;
pub use kms::{KmsApi, KmsError};
