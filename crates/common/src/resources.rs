//! Records describing the reconciled key and alias, and the outputs projected
//! from them.
//!
//! These types are printed as JSON on stdout and are the only contract
//! downstream tooling should rely on.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Key spec of every key this tool creates. Never updated in place.
pub const KEY_SPEC: &str = "ECC_NIST_P256";

/// Key usage of every key this tool creates. Never updated in place.
pub const KEY_USAGE: &str = "SIGN_VERIFY";

/// Lifecycle state of a KMS key, reduced to what reconciliation cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyState {
    Enabled,
    Disabled,
    PendingDeletion,
    /// Any other state (`Creating`, `Unavailable`, ...), kept verbatim.
    Other(String),
}

impl From<&str> for KeyState {
    fn from(s: &str) -> Self {
        match s {
            "Enabled" => KeyState::Enabled,
            "Disabled" => KeyState::Disabled,
            "PendingDeletion" => KeyState::PendingDeletion,
            other => KeyState::Other(other.to_owned()),
        }
    }
}

/// A KMS key as observed (or just created).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    pub key_id: String,
    pub arn: String,
    pub description: String,
    pub key_spec: String,
    pub key_usage: String,
    /// `"CUSTOMER"` or `"AWS"`.
    pub key_manager: String,
    pub state: KeyState,
}

impl KeyRecord {
    /// Whether this key has the fixed shape of a DNSSEC signing key that this
    /// tool is allowed to adopt and update.
    pub fn is_manageable(&self) -> bool {
        self.key_manager == "CUSTOMER" && self.key_spec == KEY_SPEC && self.key_usage == KEY_USAGE
    }
}

/// A KMS alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    /// Alias name including the `alias/` prefix.
    pub name: String,
    pub arn: String,
    /// Id of the key the alias resolves to.
    pub target_key_id: String,
}

/// Identifiers published after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleOutputs {
    pub aws_kms_alias_arn: String,
    pub aws_kms_alias_name: String,
    pub aws_kms_key_arn: String,
}

impl ModuleOutputs {
    /// Project outputs straight from the reconciled records.
    pub fn project(key: &KeyRecord, alias: &AliasRecord) -> Self {
        Self {
            aws_kms_alias_arn: alias.arn.clone(),
            aws_kms_alias_name: alias.name.clone(),
            aws_kms_key_arn: key.arn.clone(),
        }
    }
}

/// Tag differences between the desired and observed tag sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagDiff {
    /// Tags to add or overwrite.
    pub upsert: BTreeMap<String, String>,
    /// Tag keys to remove.
    pub remove: Vec<String>,
}

impl TagDiff {
    /// Compute the changes needed to turn `actual` into `desired`.
    pub fn between(desired: &BTreeMap<String, String>, actual: &BTreeMap<String, String>) -> Self {
        let upsert = desired
            .iter()
            .filter(|(k, v)| actual.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let remove = actual
            .keys()
            .filter(|k| !desired.contains_key(*k))
            .cloned()
            .collect();
        Self { upsert, remove }
    }

    pub fn is_empty(&self) -> bool {
        self.upsert.is_empty() && self.remove.is_empty()
    }
}
