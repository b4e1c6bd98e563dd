//! Configuration loading and validation for the provisioner.
//!
//! Values are layered: built-in defaults, then an optional JSON file, then
//! `DNSSEC_KMS_*` environment variables. Nested keys use `__`, so a tag is
//! set with e.g. `DNSSEC_KMS_TAGS__ENV=dev` (the key arrives lowercased).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use common::ProvisionError;
use serde::Deserialize;

/// Prefix every alias name must carry.
pub const ALIAS_PREFIX: &str = "alias/";

/// Alias prefix reserved for AWS managed keys.
const RESERVED_ALIAS_PREFIX: &str = "alias/aws/";

/// Longest alias name KMS accepts, prefix included.
pub const MAX_ALIAS_LEN: usize = 256;

/// Bounds of the KMS pending-deletion window, inclusive.
pub const MIN_DELETION_WINDOW_DAYS: i32 = 7;
pub const MAX_DELETION_WINDOW_DAYS: i32 = 30;

const ENV_PREFIX: &str = "DNSSEC_KMS";

/// Validated module inputs plus runtime settings.
///
/// Unknown keys are rejected so that a misspelled input never silently
/// falls back to its default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    /// Description attached to the KMS key.
    #[serde(default = "default_description")]
    pub description: String,

    /// Days KMS waits before deleting a key scheduled for deletion.
    #[serde(default = "default_deletion_window")]
    pub key_deletion_window_in_days: i32,

    /// Alias name, including the `alias/` prefix.
    #[serde(default = "default_name")]
    pub name: String,

    /// Tags applied to the key.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Endpoint override for KMS and STS, e.g. a LocalStack URL.
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_description() -> String {
    "A KMS key used to encrypt DNS requests.".into()
}
fn default_deletion_window() -> i32 {
    30
}
fn default_name() -> String {
    "alias/dnssec".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl ModuleConfig {
    /// Load and validate configuration from an optional JSON file and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a value cannot be parsed,
    /// or validation fails ([`ProvisionError::Validation`]).
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        );
        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let cfg = builder
            .build()
            .context("failed to build configuration")?;

        let c: ModuleConfig = cfg
            .try_deserialize()
            .map_err(|e| ProvisionError::Validation(e.to_string()))?;

        c.validate()?;
        Ok(c)
    }

    /// Validate the module inputs, returning the first violation.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<(), ProvisionError> {
        let window = self.key_deletion_window_in_days;
        if !(MIN_DELETION_WINDOW_DAYS..=MAX_DELETION_WINDOW_DAYS).contains(&window) {
            return Err(ProvisionError::Validation(format!(
                "key_deletion_window_in_days must be between {MIN_DELETION_WINDOW_DAYS} and \
                 {MAX_DELETION_WINDOW_DAYS}, got {window}"
            )));
        }
        match self.name.strip_prefix(ALIAS_PREFIX) {
            Some(suffix) if !suffix.is_empty() => {}
            _ => {
                return Err(ProvisionError::Validation(format!(
                    "name must start with \"{ALIAS_PREFIX}\" followed by a name, got {:?}",
                    self.name
                )))
            }
        }
        if self.name.len() > MAX_ALIAS_LEN {
            return Err(ProvisionError::Validation(format!(
                "name must be at most {MAX_ALIAS_LEN} characters, got {}",
                self.name.len()
            )));
        }
        if let Some(bad) = self
            .name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-')))
        {
            return Err(ProvisionError::Validation(format!(
                "name may only contain letters, digits, '/', '_' and '-', found {bad:?} in {:?}",
                self.name
            )));
        }
        if self.name.starts_with(RESERVED_ALIAS_PREFIX) {
            return Err(ProvisionError::Validation(format!(
                "name must not use the reserved prefix \"{RESERVED_ALIAS_PREFIX}\""
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ModuleConfig {
        ModuleConfig {
            description: default_description(),
            key_deletion_window_in_days: default_deletion_window(),
            name: default_name(),
            tags: BTreeMap::new(),
            log_level: default_log_level(),
            endpoint_url: None,
        }
    }

    fn from_json(json: &str) -> Result<ModuleConfig> {
        ModuleConfig::from_builder(
            config::Config::builder()
                .add_source(config::File::from_str(json, config::FileFormat::Json)),
        )
    }

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_description(), "A KMS key used to encrypt DNS requests.");
        assert_eq!(default_deletion_window(), 30);
        assert_eq!(default_name(), "alias/dnssec");
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn empty_source_yields_defaults() {
        let cfg = from_json("{}").unwrap();
        assert_eq!(cfg.name, "alias/dnssec");
        assert_eq!(cfg.key_deletion_window_in_days, 30);
        assert!(cfg.tags.is_empty());
        assert!(cfg.endpoint_url.is_none());
    }

    #[test]
    fn file_values_are_read() {
        let cfg = from_json(
            r#"{
                "description": "test key",
                "key_deletion_window_in_days": 7,
                "name": "alias/test",
                "tags": {"env": "dev"}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.description, "test key");
        assert_eq!(cfg.key_deletion_window_in_days, 7);
        assert_eq!(cfg.name, "alias/test");
        assert_eq!(cfg.tags["env"], "dev");
    }

    #[test]
    fn load_surfaces_validation_error() {
        let err = from_json(r#"{"name": "dnssec"}"#).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Validation(_))
        ));
    }

    #[test]
    fn deletion_window_boundaries() {
        for (days, ok) in [(6, false), (7, true), (30, true), (31, false)] {
            let cfg = ModuleConfig {
                key_deletion_window_in_days: days,
                ..valid()
            };
            assert_eq!(cfg.validate().is_ok(), ok, "window {days}");
        }
    }

    #[test]
    fn name_must_carry_alias_prefix() {
        let cfg = ModuleConfig {
            name: "dnssec".into(),
            ..valid()
        };
        assert!(cfg.validate().is_err());

        let cfg = ModuleConfig {
            name: "alias/dnssec".into(),
            ..valid()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn name_rejects_characters_kms_refuses() {
        for name in ["alias/my dnssec key!", "alias/dns.sec", "alias/zoné"] {
            let cfg = ModuleConfig {
                name: name.into(),
                ..valid()
            };
            assert!(
                matches!(cfg.validate(), Err(ProvisionError::Validation(_))),
                "{name}"
            );
        }
        let cfg = ModuleConfig {
            name: "alias/dnssec/example_com-1".into(),
            ..valid()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn name_length_is_bounded() {
        let at_limit = format!("{ALIAS_PREFIX}{}", "a".repeat(MAX_ALIAS_LEN - ALIAS_PREFIX.len()));
        let cfg = ModuleConfig {
            name: at_limit.clone(),
            ..valid()
        };
        assert!(cfg.validate().is_ok());

        let cfg = ModuleConfig {
            name: format!("{at_limit}a"),
            ..valid()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn mistyped_value_is_validation_error() {
        let err = from_json(r#"{"key_deletion_window_in_days": "thirty"}"#).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Validation(_))
        ));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = from_json(r#"{"key_deletion_window": 7}"#).unwrap_err();
        match err.downcast_ref::<ProvisionError>() {
            Some(ProvisionError::Validation(msg)) => assert!(msg.contains("key_deletion_window")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn name_rejects_bare_prefix_and_reserved_namespace() {
        for name in ["alias/", "alias/aws/route53"] {
            let cfg = ModuleConfig {
                name: name.into(),
                ..valid()
            };
            assert!(cfg.validate().is_err(), "{name}");
        }
    }
}
