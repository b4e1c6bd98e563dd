//! [`KmsApi`]: the KMS calls the reconciler depends on, and [`SdkKms`], the
//! implementation over `aws_sdk_kms::Client`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kms::types::{KeyMetadata, KeySpec, KeyUsageType, Tag};
use common::resources::{KEY_SPEC, KEY_USAGE};
use common::{AliasRecord, KeyRecord, KeyState, ProvisionError};
use thiserror::Error;

/// Name of the only key policy KMS supports.
const DEFAULT_POLICY_NAME: &str = "default";

/// Errors produced by the KMS layer, classified by AWS error code.
#[derive(Debug, Error)]
pub enum KmsError {
    /// The key or alias does not exist (`NotFoundException`).
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller lacks permission (`AccessDeniedException`).
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The alias name is already taken (`AlreadyExistsException`).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Any other failure, including malformed responses.
    #[error("{0}")]
    Other(String),
}

impl From<KmsError> for ProvisionError {
    fn from(e: KmsError) -> Self {
        match e {
            KmsError::NotFound(m) => ProvisionError::NotFound(m),
            KmsError::AccessDenied(m) => ProvisionError::Authorization(m),
            KmsError::AlreadyExists(m) => ProvisionError::Conflict(m),
            KmsError::Other(m) => ProvisionError::Aws(m),
        }
    }
}

fn classify<E, R>(err: SdkError<E, R>) -> KmsError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().map(str::to_owned);
    let message = DisplayErrorContext(&err).to_string();
    match code.as_deref() {
        Some("NotFoundException") => KmsError::NotFound(message),
        Some("AccessDeniedException") => KmsError::AccessDenied(message),
        Some("AlreadyExistsException") => KmsError::AlreadyExists(message),
        _ => KmsError::Other(message),
    }
}

/// KMS operations used to reconcile the signing key and its alias.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KmsApi: Send + Sync {
    /// Look up an alias by name. `Ok(None)` if it does not exist.
    async fn describe_alias(&self, name: &str) -> Result<Option<AliasRecord>, KmsError>;

    /// Describe a key by id, ARN, or alias name.
    async fn describe_key(&self, key_id: &str) -> Result<KeyRecord, KmsError>;

    /// Create an `ECC_NIST_P256` / `SIGN_VERIFY` key with policy and tags attached.
    async fn create_key(
        &self,
        description: &str,
        policy: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<KeyRecord, KmsError>;

    /// Fetch the key's default policy document as JSON text.
    async fn get_key_policy(&self, key_id: &str) -> Result<String, KmsError>;

    async fn put_key_policy(&self, key_id: &str, policy: &str) -> Result<(), KmsError>;

    async fn update_key_description(&self, key_id: &str, description: &str)
        -> Result<(), KmsError>;

    async fn enable_key(&self, key_id: &str) -> Result<(), KmsError>;

    async fn list_tags(&self, key_id: &str) -> Result<BTreeMap<String, String>, KmsError>;

    async fn tag_resource(
        &self,
        key_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), KmsError>;

    async fn untag_resource(&self, key_id: &str, keys: &[String]) -> Result<(), KmsError>;

    async fn create_alias(&self, name: &str, key_id: &str) -> Result<(), KmsError>;

    /// Point an existing alias at a different key.
    async fn update_alias(&self, name: &str, key_id: &str) -> Result<(), KmsError>;

    async fn delete_alias(&self, name: &str) -> Result<(), KmsError>;

    async fn schedule_key_deletion(&self, key_id: &str, window_days: i32)
        -> Result<(), KmsError>;
}

/// [`KmsApi`] backed by the AWS SDK.
#[derive(Clone, Debug)]
pub struct SdkKms {
    client: aws_sdk_kms::Client,
}

impl SdkKms {
    pub fn new(client: aws_sdk_kms::Client) -> Self {
        Self { client }
    }
}

fn key_record(meta: &KeyMetadata) -> Result<KeyRecord, KmsError> {
    let arn = meta
        .arn()
        .ok_or_else(|| KmsError::Other(format!("key {} has no ARN", meta.key_id())))?;
    Ok(KeyRecord {
        key_id: meta.key_id().to_owned(),
        arn: arn.to_owned(),
        description: meta.description().unwrap_or_default().to_owned(),
        key_spec: meta.key_spec().map(|s| s.as_str()).unwrap_or_default().to_owned(),
        key_usage: meta.key_usage().map(|u| u.as_str()).unwrap_or_default().to_owned(),
        key_manager: meta.key_manager().map(|m| m.as_str()).unwrap_or_default().to_owned(),
        state: meta
            .key_state()
            .map(|s| KeyState::from(s.as_str()))
            .unwrap_or_else(|| KeyState::Other("Unknown".into())),
    })
}

fn sdk_tags(tags: &BTreeMap<String, String>) -> Result<Vec<Tag>, KmsError> {
    tags.iter()
        .map(|(k, v)| {
            Tag::builder()
                .tag_key(k)
                .tag_value(v)
                .build()
                .map_err(|e| KmsError::Other(format!("invalid tag {k:?}: {e}")))
        })
        .collect()
}

#[async_trait]
impl KmsApi for SdkKms {
    async fn describe_alias(&self, name: &str) -> Result<Option<AliasRecord>, KmsError> {
        // ListAliases has no name filter; walk the pages.
        let mut marker: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_aliases()
                .set_marker(marker.take())
                .send()
                .await
                .map_err(classify)?;

            if let Some(entry) = resp.aliases().iter().find(|a| a.alias_name() == Some(name)) {
                return Ok(Some(AliasRecord {
                    name: name.to_owned(),
                    arn: entry.alias_arn().unwrap_or_default().to_owned(),
                    target_key_id: entry.target_key_id().unwrap_or_default().to_owned(),
                }));
            }

            match resp.next_marker() {
                Some(next) if resp.truncated() => marker = Some(next.to_owned()),
                _ => return Ok(None),
            }
        }
    }

    async fn describe_key(&self, key_id: &str) -> Result<KeyRecord, KmsError> {
        let resp = self
            .client
            .describe_key()
            .key_id(key_id)
            .send()
            .await
            .map_err(classify)?;
        let meta = resp
            .key_metadata()
            .ok_or_else(|| KmsError::Other("DescribeKey response contained no metadata".into()))?;
        key_record(meta)
    }

    async fn create_key(
        &self,
        description: &str,
        policy: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<KeyRecord, KmsError> {
        let resp = self
            .client
            .create_key()
            .description(description)
            .key_spec(KeySpec::from(KEY_SPEC))
            .key_usage(KeyUsageType::from(KEY_USAGE))
            .policy(policy)
            .bypass_policy_lockout_safety_check(false)
            .set_tags(Some(sdk_tags(tags)?))
            .send()
            .await
            .map_err(classify)?;
        let meta = resp
            .key_metadata()
            .ok_or_else(|| KmsError::Other("CreateKey response contained no metadata".into()))?;
        key_record(meta)
    }

    async fn get_key_policy(&self, key_id: &str) -> Result<String, KmsError> {
        let resp = self
            .client
            .get_key_policy()
            .key_id(key_id)
            .policy_name(DEFAULT_POLICY_NAME)
            .send()
            .await
            .map_err(classify)?;
        Ok(resp.policy().unwrap_or_default().to_owned())
    }

    async fn put_key_policy(&self, key_id: &str, policy: &str) -> Result<(), KmsError> {
        self.client
            .put_key_policy()
            .key_id(key_id)
            .policy_name(DEFAULT_POLICY_NAME)
            .policy(policy)
            .bypass_policy_lockout_safety_check(false)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn update_key_description(
        &self,
        key_id: &str,
        description: &str,
    ) -> Result<(), KmsError> {
        self.client
            .update_key_description()
            .key_id(key_id)
            .description(description)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn enable_key(&self, key_id: &str) -> Result<(), KmsError> {
        self.client
            .enable_key()
            .key_id(key_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn list_tags(&self, key_id: &str) -> Result<BTreeMap<String, String>, KmsError> {
        let mut tags = BTreeMap::new();
        let mut marker: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_resource_tags()
                .key_id(key_id)
                .set_marker(marker.take())
                .send()
                .await
                .map_err(classify)?;

            for tag in resp.tags() {
                tags.insert(tag.tag_key().to_owned(), tag.tag_value().to_owned());
            }

            match resp.next_marker() {
                Some(next) if resp.truncated() => marker = Some(next.to_owned()),
                _ => return Ok(tags),
            }
        }
    }

    async fn tag_resource(
        &self,
        key_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), KmsError> {
        self.client
            .tag_resource()
            .key_id(key_id)
            .set_tags(Some(sdk_tags(tags)?))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn untag_resource(&self, key_id: &str, keys: &[String]) -> Result<(), KmsError> {
        self.client
            .untag_resource()
            .key_id(key_id)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create_alias(&self, name: &str, key_id: &str) -> Result<(), KmsError> {
        self.client
            .create_alias()
            .alias_name(name)
            .target_key_id(key_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn update_alias(&self, name: &str, key_id: &str) -> Result<(), KmsError> {
        self.client
            .update_alias()
            .alias_name(name)
            .target_key_id(key_id)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_alias(&self, name: &str) -> Result<(), KmsError> {
        self.client
            .delete_alias()
            .alias_name(name)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn schedule_key_deletion(
        &self,
        key_id: &str,
        window_days: i32,
    ) -> Result<(), KmsError> {
        self.client
            .schedule_key_deletion()
            .key_id(key_id)
            .pending_window_in_days(window_days)
            .send()
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping() {
        assert!(matches!(
            ProvisionError::from(KmsError::AccessDenied("x".into())),
            ProvisionError::Authorization(_)
        ));
        assert!(matches!(
            ProvisionError::from(KmsError::AlreadyExists("x".into())),
            ProvisionError::Conflict(_)
        ));
        assert!(matches!(
            ProvisionError::from(KmsError::NotFound("x".into())),
            ProvisionError::NotFound(_)
        ));
        assert!(matches!(
            ProvisionError::from(KmsError::Other("x".into())),
            ProvisionError::Aws(_)
        ));
    }

    #[test]
    fn metadata_maps_to_record() {
        let meta = KeyMetadata::builder()
            .key_id("1234abcd")
            .arn("arn:aws:kms:us-east-1:123456789012:key/1234abcd")
            .description("test key")
            .key_spec(KeySpec::EccNistP256)
            .key_usage(KeyUsageType::SignVerify)
            .key_manager(aws_sdk_kms::types::KeyManagerType::Customer)
            .key_state(aws_sdk_kms::types::KeyState::PendingDeletion)
            .build()
            .unwrap();
        let rec = key_record(&meta).unwrap();
        assert_eq!(rec.key_id, "1234abcd");
        assert_eq!(rec.key_spec, KEY_SPEC);
        assert_eq!(rec.key_usage, KEY_USAGE);
        assert!(rec.is_manageable());
        assert_eq!(rec.state, KeyState::PendingDeletion);
    }

    #[test]
    fn tags_convert_in_key_order() {
        let tags = BTreeMap::from([
            ("team".to_string(), "dns".to_string()),
            ("env".to_string(), "dev".to_string()),
        ]);
        let sdk = sdk_tags(&tags).unwrap();
        assert_eq!(sdk.len(), 2);
        assert_eq!(sdk[0].tag_key(), "env");
        assert_eq!(sdk[1].tag_value(), "dns");
    }
}
