//! AWS SDK client bundle for KMS and STS.

use anyhow::Result;
use aws_config::BehaviorVersion;

use super::identity::SdkIdentity;
use super::kms::SdkKms;

/// Bundle of AWS SDK clients sharing one resolved [`aws_config::SdkConfig`],
/// so credentials and region are resolved once and reused.
#[derive(Clone, Debug)]
pub struct AwsClients {
    /// KMS client used to reconcile the key and alias.
    pub kms: SdkKms,
    /// STS client used to resolve the caller account.
    pub identity: SdkIdentity,
    /// Region from the default provider chain, if any.
    pub region: Option<String>,
}

impl AwsClients {
    /// Initialise the SDK clients from the standard credential and region
    /// provider chains.
    ///
    /// `endpoint_url`, when set, overrides the endpoint of both services
    /// (e.g. a LocalStack URL).
    ///
    /// # Errors
    ///
    /// Returns an error if the SDK config cannot be loaded.
    pub async fn init(endpoint_url: Option<&str>) -> Result<Self> {
        let config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        let region = config.region().map(|r| r.to_string());

        let mut kms = aws_sdk_kms::config::Builder::from(&config);
        let mut sts = aws_sdk_sts::config::Builder::from(&config);
        if let Some(url) = endpoint_url {
            kms = kms.endpoint_url(url);
            sts = sts.endpoint_url(url);
        }

        Ok(Self {
            kms: SdkKms::new(aws_sdk_kms::Client::from_conf(kms.build())),
            identity: SdkIdentity::new(aws_sdk_sts::Client::from_conf(sts.build())),
            region,
        })
    }
}
