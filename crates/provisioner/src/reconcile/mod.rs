//! Ensure-key / ensure-alias reconciliation.
//!
//! # Lifecycle
//!
//! 1. [`observe`] finds the current key through the alias name.
//! 2. [`plan::diff`] compares it with the [`DesiredState`] and yields a [`Plan`].
//! 3. [`apply`] executes the plan in dependency order: a key always exists
//!    before an alias is created or retargeted at it.
//! 4. [`destroy`] removes the alias, then schedules the key for deletion.
//!
//! # Invariants
//!
//! - After [`apply`] returns, the alias resolves to the key whose ARN is
//!   reported in the outputs.
//! - Key spec and usage are never changed in place.
//! - Applying twice with the same inputs issues no mutating call the second time.

pub mod plan;

pub use plan::{Change, DesiredState, Observed, ObservedKey, Plan};

use common::{AliasRecord, KeyRecord, KeyState, ModuleOutputs, ProvisionError};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::aws::{KmsApi, KmsError};
use crate::config::MIN_DELETION_WINDOW_DAYS;

/// Result of a successful [`apply`].
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    pub outputs: ModuleOutputs,
    pub changes: Vec<Change>,
}

/// Result of [`destroy`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DestroyReport {
    pub alias_deleted: Option<String>,
    pub key_scheduled_for_deletion: Option<String>,
    pub pending_window_in_days: Option<i32>,
}

/// Read the alias and the key behind it.
///
/// # Errors
///
/// Propagates KMS failures other than the target key being absent.
pub async fn observe(kms: &dyn KmsApi, name: &str) -> Result<Observed, ProvisionError> {
    let Some(alias) = kms.describe_alias(name).await? else {
        return Ok(Observed::Absent);
    };
    if alias.target_key_id.is_empty() {
        return Ok(Observed::Bound { alias, key: None });
    }

    let record = match kms.describe_key(&alias.target_key_id).await {
        Ok(r) => r,
        Err(KmsError::NotFound(_)) => return Ok(Observed::Bound { alias, key: None }),
        Err(e) => return Err(e.into()),
    };

    // Policy and tags are unreadable on pending-deletion keys and irrelevant
    // for foreign keys; the diff rejects or replaces those anyway.
    let (policy, tags) = if record.is_manageable() && record.state != KeyState::PendingDeletion {
        (
            kms.get_key_policy(&record.key_id).await?,
            kms.list_tags(&record.key_id).await?,
        )
    } else {
        (String::new(), Default::default())
    };

    Ok(Observed::Bound {
        alias,
        key: Some(ObservedKey {
            record,
            policy,
            tags,
        }),
    })
}

/// Compute the plan without changing anything.
#[instrument(skip_all, fields(alias = %desired.name))]
pub async fn plan(kms: &dyn KmsApi, desired: &DesiredState) -> Result<Plan, ProvisionError> {
    let observed = observe(kms, &desired.name).await?;
    let plan = plan::diff(desired, &observed)?;
    debug!(
        changes = plan.changes.len(),
        creates_key = plan.changes.iter().any(Change::creates_key),
        "plan computed"
    );
    Ok(plan)
}

/// Reconcile the key and alias with `desired` and return the outputs.
///
/// # Errors
///
/// Returns the first KMS failure. Steps already applied are kept and a rerun
/// picks up from the resulting state, with one exception: if the alias cannot
/// be created or retargeted, a key created by this run is scheduled for
/// deletion so that the rerun does not leave it orphaned next to a new one.
#[instrument(skip_all, fields(alias = %desired.name))]
pub async fn apply(kms: &dyn KmsApi, desired: &DesiredState) -> Result<ApplyReport, ProvisionError> {
    let observed = observe(kms, &desired.name).await?;
    let plan = plan::diff(desired, &observed)?;

    let (mut alias, mut key) = match observed {
        Observed::Bound { alias, key } => (Some(alias), key.map(|k| k.record)),
        Observed::Absent => (None, None),
    };

    if plan.is_noop() {
        info!("key and alias already up to date");
    }

    let policy = desired.policy.to_json().map_err(|e| {
        ProvisionError::Internal(format!("failed to serialise key policy: {e}"))
    })?;
    let mut created: Option<String> = None;
    for change in &plan.changes {
        match change {
            Change::CreateKey { .. } | Change::ReplaceKey { .. } => {
                let new_key = kms
                    .create_key(&desired.description, &policy, &desired.tags)
                    .await?;
                info!(key_id = %new_key.key_id, "key created");
                created = Some(new_key.key_id.clone());
                key = Some(new_key);
            }
            Change::EnableKey { key_id } => {
                kms.enable_key(key_id).await?;
                info!(%key_id, "key enabled");
            }
            Change::UpdateDescription { key_id, to, .. } => {
                kms.update_key_description(key_id, to).await?;
                if let Some(k) = key.as_mut() {
                    k.description = to.clone();
                }
                info!(%key_id, "description updated");
            }
            Change::UpdatePolicy { key_id } => {
                kms.put_key_policy(key_id, &policy).await?;
                info!(%key_id, "key policy updated");
            }
            Change::UpdateTags { key_id, diff } => {
                if !diff.remove.is_empty() {
                    kms.untag_resource(key_id, &diff.remove).await?;
                }
                if !diff.upsert.is_empty() {
                    kms.tag_resource(key_id, &diff.upsert).await?;
                }
                info!(%key_id, added = diff.upsert.len(), removed = diff.remove.len(), "tags updated");
            }
            Change::CreateAlias { name, .. } => {
                let target = require_key(&key)?;
                if let Err(e) = kms.create_alias(name, &target.key_id).await {
                    return Err(discard_created_key(kms, created.as_deref(), e.into()).await);
                }
                info!(alias = %name, key_id = %target.key_id, "alias created");
                alias = kms.describe_alias(name).await?;
            }
            Change::RetargetAlias { name, from_key_id } => {
                let target = require_key(&key)?;
                if let Err(e) = kms.update_alias(name, &target.key_id).await {
                    return Err(discard_created_key(kms, created.as_deref(), e.into()).await);
                }
                info!(alias = %name, from = %from_key_id, to = %target.key_id, "alias retargeted");
                alias = kms.describe_alias(name).await?;
            }
        }
    }

    let key = require_key(&key)?;
    let alias = alias.ok_or_else(|| {
        ProvisionError::Aws(format!("{} not visible after apply", desired.name))
    })?;
    if alias.target_key_id != key.key_id {
        return Err(ProvisionError::Aws(format!(
            "{} resolves to {} instead of {}",
            alias.name, alias.target_key_id, key.key_id
        )));
    }

    Ok(ApplyReport {
        outputs: ModuleOutputs::project(key, &alias),
        changes: plan.changes,
    })
}

/// Schedule deletion of a key this run created and return `err` unchanged.
async fn discard_created_key(
    kms: &dyn KmsApi,
    key_id: Option<&str>,
    err: ProvisionError,
) -> ProvisionError {
    let Some(key_id) = key_id else {
        return err;
    };
    match kms.schedule_key_deletion(key_id, MIN_DELETION_WINDOW_DAYS).await {
        Ok(()) => warn!(
            %key_id,
            window_days = MIN_DELETION_WINDOW_DAYS,
            error = %err,
            "alias step failed; new key scheduled for deletion"
        ),
        Err(e) => warn!(
            %key_id,
            error = %e,
            "alias step failed and the new key could not be scheduled for deletion"
        ),
    }
    err
}

fn require_key(key: &Option<KeyRecord>) -> Result<&KeyRecord, ProvisionError> {
    key.as_ref()
        .ok_or_else(|| ProvisionError::Aws("no key available for alias".into()))
}

/// Read the current outputs without changing anything.
///
/// # Errors
///
/// Returns [`ProvisionError::NotFound`] if the alias or its key is absent, or
/// if the key is pending deletion or otherwise unusable, and
/// [`ProvisionError::Conflict`] if the alias points at a key this tool does
/// not manage.
pub async fn outputs(kms: &dyn KmsApi, name: &str) -> Result<ModuleOutputs, ProvisionError> {
    let alias = current_alias(kms, name).await?;
    let key = kms.describe_key(&alias.target_key_id).await?;
    if !key.is_manageable() {
        return Err(ProvisionError::Conflict(format!(
            "{name} is bound to key {} which this tool does not manage",
            key.key_id
        )));
    }
    match &key.state {
        KeyState::Enabled | KeyState::Disabled => Ok(ModuleOutputs::project(&key, &alias)),
        state => Err(ProvisionError::NotFound(format!(
            "key {} behind {name} is {state:?}",
            key.key_id
        ))),
    }
}

async fn current_alias(kms: &dyn KmsApi, name: &str) -> Result<AliasRecord, ProvisionError> {
    kms.describe_alias(name)
        .await?
        .ok_or_else(|| ProvisionError::NotFound(format!("{name} does not exist")))
}

/// Delete the alias and schedule its key for deletion after `window_days`.
///
/// A missing alias is a no-op. A key already pending deletion is left as is.
///
/// # Errors
///
/// Returns [`ProvisionError::Conflict`] without deleting anything if the
/// alias points at a key this tool does not manage.
#[instrument(skip(kms))]
pub async fn destroy(
    kms: &dyn KmsApi,
    name: &str,
    window_days: i32,
) -> Result<DestroyReport, ProvisionError> {
    let Observed::Bound { alias, key } = observe(kms, name).await? else {
        info!("alias absent; nothing to destroy");
        return Ok(DestroyReport::default());
    };

    if let Some(k) = &key {
        if !k.record.is_manageable() {
            return Err(ProvisionError::Conflict(format!(
                "{name} is bound to key {} which this tool does not manage",
                k.record.key_id
            )));
        }
    }

    kms.delete_alias(name).await?;
    info!("alias deleted");
    let mut report = DestroyReport {
        alias_deleted: Some(alias.name),
        ..Default::default()
    };

    match key.map(|k| k.record) {
        Some(rec) if rec.state != KeyState::PendingDeletion => {
            kms.schedule_key_deletion(&rec.key_id, window_days).await?;
            info!(key_id = %rec.key_id, window_days, "key scheduled for deletion");
            report.key_scheduled_for_deletion = Some(rec.arn);
            report.pending_window_in_days = Some(window_days);
        }
        Some(rec) => warn!(key_id = %rec.key_id, "key already pending deletion"),
        None => warn!("alias had no live target key"),
    }

    Ok(report)
}
