//! Common types, key policy model, and errors shared across `dnssec-kms` crates.

pub mod context;
pub mod error;
pub mod policy;
pub mod resources;

pub use context::CallerContext;
pub use error::ProvisionError;
pub use policy::{build_key_policy, PolicyDocument, PolicyStatement};
pub use resources::{AliasRecord, KeyRecord, KeyState, ModuleOutputs, TagDiff};
