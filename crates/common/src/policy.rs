//! Key policy document model and the DNSSEC signing policy builder.
//!
//! The document serialises to IAM policy JSON so it can be passed verbatim to
//! `CreateKey` / `PutKeyPolicy`. Parsing is lenient in the places IAM itself
//! is lenient (a single string where a list is allowed) so that a policy read
//! back from KMS compares equal to the one that was written.
//!
//! # Statements
//!
//! | Sid | Principal | Actions |
//! |-----|-----------|---------|
//! | [`SID_DNSSEC_SERVICE`] | Route 53 DNSSEC service | `DescribeKey`, `GetPublicKey`, `Sign` |
//! | [`SID_DNSSEC_GRANT`] | Route 53 DNSSEC service | `CreateGrant` (AWS resources only) |
//! | [`SID_ACCOUNT_ROOT`] | account root | `kms:*` |

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::context::CallerContext;

/// IAM policy language version.
pub const POLICY_VERSION: &str = "2012-10-17";

/// Service principals Route 53 uses when signing with a customer key.
pub const DNSSEC_SERVICE_PRINCIPALS: &[&str] = &["dnssec-route53.amazonaws.com"];

pub const SID_DNSSEC_SERVICE: &str = "Allow Route 53 DNSSEC Service";
pub const SID_DNSSEC_GRANT: &str = "Allow Route 53 DNSSEC to CreateGrant";
pub const SID_ACCOUNT_ROOT: &str = "Enable IAM User Permissions";

/// Statement effect. Only `Allow` is ever emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

/// A full key policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statements: Vec<PolicyStatement>,
}

/// One policy statement.
///
/// `principals` maps the principal type (`"Service"`, `"AWS"`) to its
/// identifiers. `conditions` maps a condition operator (e.g. `"Bool"`) to
/// `variable → values`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatement {
    #[serde(rename = "Sid")]
    pub sid: String,
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Principal", deserialize_with = "principal_map")]
    pub principals: BTreeMap<String, Vec<String>>,
    #[serde(rename = "Action", deserialize_with = "one_or_many")]
    pub actions: Vec<String>,
    #[serde(rename = "Resource", deserialize_with = "one_or_many")]
    pub resources: Vec<String>,
    #[serde(
        rename = "Condition",
        default,
        skip_serializing_if = "BTreeMap::is_empty",
        deserialize_with = "condition_map"
    )]
    pub conditions: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl PolicyStatement {
    fn allow(sid: &str, principal_type: &str, identifiers: Vec<String>, actions: &[&str]) -> Self {
        let mut principals = BTreeMap::new();
        principals.insert(principal_type.to_owned(), identifiers);
        Self {
            sid: sid.to_owned(),
            effect: Effect::Allow,
            principals,
            actions: actions.iter().map(|a| (*a).to_owned()).collect(),
            resources: vec!["*".to_owned()],
            conditions: BTreeMap::new(),
        }
    }

    fn with_condition(mut self, test: &str, variable: &str, values: &[&str]) -> Self {
        self.conditions.entry(test.to_owned()).or_default().insert(
            variable.to_owned(),
            values.iter().map(|v| (*v).to_owned()).collect(),
        );
        self
    }

    fn canonicalize(&mut self) {
        self.actions.sort();
        self.actions.dedup();
        self.resources.sort();
        for ids in self.principals.values_mut() {
            ids.sort();
        }
        for vars in self.conditions.values_mut() {
            for values in vars.values_mut() {
                values.sort();
            }
        }
    }
}

impl PolicyDocument {
    /// Compact JSON form, as sent to KMS.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a policy as returned by `GetKeyPolicy`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Returns `true` if `other` grants exactly the same statements, ignoring
    /// ordering inside lists and JSON formatting.
    pub fn is_equivalent(&self, other: &PolicyDocument) -> bool {
        self.canonical() == other.canonical()
    }

    /// Returns `true` if the stored policy text is equivalent to this document.
    /// Unparseable text is never equivalent.
    pub fn matches_json(&self, json: &str) -> bool {
        Self::from_json(json)
            .map(|other| self.is_equivalent(&other))
            .unwrap_or(false)
    }

    fn canonical(&self) -> Self {
        let mut doc = self.clone();
        for s in &mut doc.statements {
            s.canonicalize();
        }
        doc.statements.sort_by(|a, b| a.sid.cmp(&b.sid));
        doc
    }
}

/// Build the key policy for a DNSSEC signing key owned by `ctx`'s account.
///
/// The account-root statement keeps the key administrable by IAM even if the
/// service statements are later narrowed.
pub fn build_key_policy(ctx: &CallerContext) -> PolicyDocument {
    let services: Vec<String> = DNSSEC_SERVICE_PRINCIPALS
        .iter()
        .map(|p| (*p).to_owned())
        .collect();

    PolicyDocument {
        version: POLICY_VERSION.to_owned(),
        statements: vec![
            PolicyStatement::allow(
                SID_DNSSEC_SERVICE,
                "Service",
                services.clone(),
                &["kms:DescribeKey", "kms:GetPublicKey", "kms:Sign"],
            ),
            PolicyStatement::allow(SID_DNSSEC_GRANT, "Service", services, &["kms:CreateGrant"])
                .with_condition("Bool", "kms:GrantIsForAWSResource", &["true"]),
            PolicyStatement::allow(
                SID_ACCOUNT_ROOT,
                "AWS",
                vec![ctx.root_principal_arn()],
                &["kms:*"],
            ),
        ],
    }
}

// ---------------------------------------------------------------------------
// Lenient IAM list parsing
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Vec<String> {
    fn from(v: OneOrMany) -> Self {
        match v {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

fn one_or_many<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
    OneOrMany::deserialize(d).map(Into::into)
}

fn principal_map<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<BTreeMap<String, Vec<String>>, D::Error> {
    let raw = BTreeMap::<String, OneOrMany>::deserialize(d)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.into())).collect())
}

fn condition_map<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<BTreeMap<String, BTreeMap<String, Vec<String>>>, D::Error> {
    let raw = BTreeMap::<String, BTreeMap<String, OneOrMany>>::deserialize(d)?;
    Ok(raw
        .into_iter()
        .map(|(test, vars)| (test, vars.into_iter().map(|(k, v)| (k, v.into())).collect()))
        .collect())
}
