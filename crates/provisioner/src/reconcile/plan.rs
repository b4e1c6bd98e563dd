//! Desired vs. observed state, and the pure diff that turns them into a
//! [`Plan`].

use std::collections::BTreeMap;

use common::resources::{KEY_SPEC, KEY_USAGE};
use common::{
    build_key_policy, AliasRecord, CallerContext, KeyRecord, KeyState, PolicyDocument,
    ProvisionError, TagDiff,
};
use serde::Serialize;

use crate::config::ModuleConfig;

/// What the key and alias should look like after a successful apply.
#[derive(Debug, Clone)]
pub struct DesiredState {
    pub name: String,
    pub description: String,
    pub tags: BTreeMap<String, String>,
    pub policy: PolicyDocument,
    pub context: CallerContext,
}

impl DesiredState {
    /// Combine validated inputs with the caller context and render the key policy.
    pub fn new(cfg: &ModuleConfig, context: CallerContext) -> Self {
        Self {
            name: cfg.name.clone(),
            description: cfg.description.clone(),
            tags: cfg.tags.clone(),
            policy: build_key_policy(&context),
            context,
        }
    }

    /// ARN the alias has (or will have once created).
    pub fn alias_arn(&self) -> String {
        self.context.kms_arn(&self.name)
    }
}

/// A key found behind the alias, with the attributes that can drift.
#[derive(Debug, Clone)]
pub struct ObservedKey {
    pub record: KeyRecord,
    /// Stored policy JSON; empty for keys pending deletion.
    pub policy: String,
    pub tags: BTreeMap<String, String>,
}

/// What currently exists under the alias name.
#[derive(Debug, Clone)]
pub enum Observed {
    /// No alias with this name.
    Absent,
    /// The alias exists. `key` is `None` if its target no longer exists.
    Bound {
        alias: AliasRecord,
        key: Option<ObservedKey>,
    },
}

/// One step of a plan. Steps are applied in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Change {
    CreateKey {
        description: String,
        key_spec: String,
        key_usage: String,
    },
    /// Create a fresh key in place of one that is gone or pending deletion.
    ReplaceKey { old_key_id: String, reason: String },
    EnableKey { key_id: String },
    UpdateDescription {
        key_id: String,
        from: String,
        to: String,
    },
    UpdatePolicy { key_id: String },
    UpdateTags { key_id: String, diff: TagDiff },
    CreateAlias { name: String, arn: String },
    /// Point the alias at the key created by a preceding `ReplaceKey`.
    RetargetAlias { name: String, from_key_id: String },
}

impl Change {
    /// Whether this change produces a new key.
    pub fn creates_key(&self) -> bool {
        matches!(self, Change::CreateKey { .. } | Change::ReplaceKey { .. })
    }
}

/// The ordered changes needed to reach the desired state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub alias_name: String,
    pub changes: Vec<Change>,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

fn create_key(desired: &DesiredState) -> Change {
    Change::CreateKey {
        description: desired.description.clone(),
        key_spec: KEY_SPEC.into(),
        key_usage: KEY_USAGE.into(),
    }
}

fn replace(alias: &AliasRecord, reason: &str) -> Vec<Change> {
    vec![
        Change::ReplaceKey {
            old_key_id: alias.target_key_id.clone(),
            reason: reason.to_owned(),
        },
        Change::RetargetAlias {
            name: alias.name.clone(),
            from_key_id: alias.target_key_id.clone(),
        },
    ]
}

/// Compute the plan that takes `observed` to `desired`.
///
/// # Errors
///
/// Returns [`ProvisionError::Conflict`] if the alias resolves to a key that
/// does not have the fixed DNSSEC key shape, or that is in a state this tool
/// cannot act on. Such conflicts are never resolved automatically.
pub fn diff(desired: &DesiredState, observed: &Observed) -> Result<Plan, ProvisionError> {
    let changes = match observed {
        Observed::Absent => vec![
            create_key(desired),
            Change::CreateAlias {
                name: desired.name.clone(),
                arn: desired.alias_arn(),
            },
        ],
        Observed::Bound { alias, key: None } => replace(alias, "target key no longer exists"),
        Observed::Bound {
            alias,
            key: Some(key),
        } => {
            let rec = &key.record;
            if !rec.is_manageable() {
                return Err(ProvisionError::Conflict(format!(
                    "{} is bound to key {} ({}/{}, managed by {}), not a {KEY_SPEC}/{KEY_USAGE} customer key",
                    alias.name, rec.key_id, rec.key_spec, rec.key_usage, rec.key_manager
                )));
            }

            let mut changes = Vec::new();
            match &rec.state {
                KeyState::PendingDeletion => {
                    return Ok(Plan {
                        alias_name: desired.name.clone(),
                        changes: replace(alias, "target key is pending deletion"),
                    })
                }
                KeyState::Other(state) => {
                    return Err(ProvisionError::Conflict(format!(
                        "{} is bound to key {} in state {state}",
                        alias.name, rec.key_id
                    )))
                }
                KeyState::Disabled => changes.push(Change::EnableKey {
                    key_id: rec.key_id.clone(),
                }),
                KeyState::Enabled => {}
            }

            if rec.description != desired.description {
                changes.push(Change::UpdateDescription {
                    key_id: rec.key_id.clone(),
                    from: rec.description.clone(),
                    to: desired.description.clone(),
                });
            }
            if !desired.policy.matches_json(&key.policy) {
                changes.push(Change::UpdatePolicy {
                    key_id: rec.key_id.clone(),
                });
            }
            let tags = TagDiff::between(&desired.tags, &key.tags);
            if !tags.is_empty() {
                changes.push(Change::UpdateTags {
                    key_id: rec.key_id.clone(),
                    diff: tags,
                });
            }
            changes
        }
    };

    Ok(Plan {
        alias_name: desired.name.clone(),
        changes,
    })
}
