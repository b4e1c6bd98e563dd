//! [`CallerContext`]: the account, partition, and region the provisioner runs as.

use serde::{Deserialize, Serialize};

/// Identity of the invoking credentials, resolved once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    /// 12-digit AWS account id.
    pub account_id: String,
    /// ARN partition, e.g. `"aws"` or `"aws-cn"`.
    pub partition: String,
    /// Region the KMS key lives in.
    pub region: String,
}

impl CallerContext {
    /// ARN of the account root principal, `arn:<partition>:iam::<account>:root`.
    pub fn root_principal_arn(&self) -> String {
        format!("arn:{}:iam::{}:root", self.partition, self.account_id)
    }

    /// ARN of a KMS resource in this account and region.
    ///
    /// `resource` is either `key/<id>` or an alias name (`alias/<name>`).
    pub fn kms_arn(&self, resource: &str) -> String {
        format!(
            "arn:{}:kms:{}:{}:{}",
            self.partition, self.region, self.account_id, resource
        )
    }
}

/// Extract the partition segment from an ARN (`arn:<partition>:...`).
pub fn partition_from_arn(arn: &str) -> Option<&str> {
    let mut parts = arn.splitn(3, ':');
    match (parts.next(), parts.next()) {
        (Some("arn"), Some(p)) if !p.is_empty() => Some(p),
        _ => None,
    }
}

/// Derive the partition from a region name.
pub fn partition_for_region(region: &str) -> &'static str {
    if region.starts_with("cn-") {
        "aws-cn"
    } else if region.starts_with("us-gov-") {
        "aws-us-gov"
    } else if region.starts_with("us-isob-") {
        "aws-iso-b"
    } else if region.starts_with("us-iso-") {
        "aws-iso"
    } else {
        "aws"
    }
}
