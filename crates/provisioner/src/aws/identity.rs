//! Caller identity lookup: account id and partition from STS, region from the
//! loaded SDK configuration.

use async_trait::async_trait;
use aws_sdk_sts::error::DisplayErrorContext;
use common::context::{partition_for_region, partition_from_arn};
use common::{CallerContext, ProvisionError};
use tracing::{debug, warn};

/// Route 53 only signs with keys that live in this region.
pub const DNSSEC_KEY_REGION: &str = "us-east-1";

/// Who the ambient credentials belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub account: String,
    pub arn: String,
}

/// Source of the caller identity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityApi: Send + Sync {
    async fn caller_identity(&self) -> Result<CallerIdentity, ProvisionError>;
}

/// [`IdentityApi`] backed by STS `GetCallerIdentity`.
#[derive(Clone, Debug)]
pub struct SdkIdentity {
    client: aws_sdk_sts::Client,
}

impl SdkIdentity {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityApi for SdkIdentity {
    async fn caller_identity(&self) -> Result<CallerIdentity, ProvisionError> {
        let resp = self
            .client
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| ProvisionError::IdentityResolution(DisplayErrorContext(&e).to_string()))?;

        let account = resp.account().ok_or_else(|| {
            ProvisionError::IdentityResolution("GetCallerIdentity returned no account".into())
        })?;
        let arn = resp.arn().ok_or_else(|| {
            ProvisionError::IdentityResolution("GetCallerIdentity returned no ARN".into())
        })?;

        Ok(CallerIdentity {
            account: account.to_owned(),
            arn: arn.to_owned(),
        })
    }
}

/// Resolve the [`CallerContext`] for this run.
///
/// # Errors
///
/// Returns [`ProvisionError::IdentityResolution`] if no region is configured
/// or the identity lookup fails.
pub async fn resolve_caller_context(
    identity: &dyn IdentityApi,
    region: Option<&str>,
) -> Result<CallerContext, ProvisionError> {
    let region = region
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ProvisionError::IdentityResolution("no AWS region configured".into()))?;

    let caller = identity.caller_identity().await?;
    let partition = partition_from_arn(&caller.arn)
        .unwrap_or_else(|| partition_for_region(region))
        .to_owned();

    if region != DNSSEC_KEY_REGION {
        warn!(
            region,
            expected = DNSSEC_KEY_REGION,
            "Route 53 DNSSEC only uses signing keys in {DNSSEC_KEY_REGION}"
        );
    }

    let ctx = CallerContext {
        account_id: caller.account,
        partition,
        region: region.to_owned(),
    };
    debug!(account_id = %ctx.account_id, partition = %ctx.partition, "caller resolved");
    Ok(ctx)
}
