//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::lifecycle::{DestroyPolicy, KeyDeliveryProfile, NodeSpec, ReadyPolicy};
use crate::provider::CreateParams;
use crate::session::SessionOptions;

/// Node provisioning configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "BURAN")]
pub struct NodeConfig {
    /// Prefix for generated instance names; a UUID is appended per node.
    #[ortho_config(default = "buran-node-".to_owned())]
    pub name_prefix: String,
    /// User account used for SSH access.
    #[ortho_config(default = "admin".to_owned())]
    pub user: String,
    /// Boot image identifier. This value is required.
    pub image: String,
    /// Instance size identifier; the provider's first catalog entry is used
    /// when unset.
    pub size: Option<String>,
    /// Key delivery profile: `metadata` or `imported-key-pair`.
    #[ortho_config(default = "metadata".to_owned())]
    pub key_delivery: String,
    /// Security group names forwarded to the provider; the environment
    /// layer accepts a comma-separated value.
    pub security_groups: Option<Vec<String>>,
    /// Maximum destroy reconciliation polls before giving up.
    #[ortho_config(default = 60)]
    pub destroy_poll_attempts: u32,
    /// Seconds between destroy reconciliation polls.
    #[ortho_config(default = 3)]
    pub destroy_poll_interval_secs: u64,
    /// Seconds to wait before the rollback destroy after a failed create.
    #[ortho_config(default = 3)]
    pub rollback_delay_secs: u64,
    /// Maximum SSH readiness probe attempts.
    #[ortho_config(default = 10)]
    pub ready_max_attempts: u32,
    /// Delay in seconds after the first failed readiness probe.
    #[ortho_config(default = 1)]
    pub ready_initial_delay_secs: u64,
    /// Integer backoff multiplier applied between readiness probes.
    #[ortho_config(default = 2)]
    pub ready_backoff_multiplier: u32,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// TCP port the remote sshd listens on.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

impl NodeConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to [{}] in buran.toml",
                metadata.description, metadata.env_var, metadata.toml_key, metadata.section
            )));
        }
        Ok(())
    }

    /// Loads configuration using the `ortho-config` derive. Values merge
    /// defaults, configuration files, environment variables, and CLI flags in
    /// that order of precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the loader fails to merge sources.
    pub fn load_from_sources() -> Result<Self, ConfigError> {
        Self::load().map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("buran")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds a [`NodeSpec`] from the configured defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn as_spec(&self) -> Result<NodeSpec, ConfigError> {
        self.validate()?;
        let params = CreateParams {
            security_groups: self.security_group_names(),
            ..CreateParams::default()
        };
        let mut builder = NodeSpec::builder()
            .name_prefix(&self.name_prefix)
            .user(&self.user)
            .image_identifier(&self.image)
            .params(params);
        if let Some(size) = &self.size {
            builder = builder.size_identifier(size);
        }
        builder
            .build()
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Parses the configured key delivery profile.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the spelling is not recognised.
    pub fn profile(&self) -> Result<KeyDeliveryProfile, ConfigError> {
        self.key_delivery.parse().map_err(ConfigError::Parse)
    }

    /// Returns the destroy reconciliation policy.
    #[must_use]
    pub const fn destroy_policy(&self) -> DestroyPolicy {
        DestroyPolicy {
            max_polls: self.destroy_poll_attempts,
            interval: Duration::from_secs(self.destroy_poll_interval_secs),
        }
    }

    /// Returns the SSH readiness probe policy.
    #[must_use]
    pub const fn ready_policy(&self) -> ReadyPolicy {
        ReadyPolicy {
            max_attempts: self.ready_max_attempts,
            initial_delay: Duration::from_secs(self.ready_initial_delay_secs),
            backoff_multiplier: self.ready_backoff_multiplier,
        }
    }

    /// Returns the pause before a rollback destroy.
    #[must_use]
    pub const fn rollback_delay(&self) -> Duration {
        Duration::from_secs(self.rollback_delay_secs)
    }

    /// Returns the SSH client options for remote sessions.
    #[must_use]
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            ssh_bin: self.ssh_bin.clone(),
            scp_bin: self.scp_bin.clone(),
            port: self.ssh_port,
        }
    }

    /// Loader layers may leave whitespace or empty entries behind; the
    /// lifecycle boundary takes a clean list.
    fn security_group_names(&self) -> Vec<String> {
        self.security_groups
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|group| group.trim())
            .filter(|group| !group.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Parse`] when the key delivery profile is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.image,
            &FieldMetadata::new("boot image", "BURAN_IMAGE", "image", "node"),
        )?;
        Self::require_field(
            &self.name_prefix,
            &FieldMetadata::new(
                "node name prefix",
                "BURAN_NAME_PREFIX",
                "name_prefix",
                "node",
            ),
        )?;
        Self::require_field(
            &self.user,
            &FieldMetadata::new("SSH user", "BURAN_USER", "user", "node"),
        )?;
        self.profile().map(|_| ())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{ImageSource, SizeSource};
    use crate::test_support::EnvGuard;

    fn fixture_config() -> NodeConfig {
        NodeConfig {
            name_prefix: String::from("test-node-"),
            user: String::from("centos"),
            image: String::from("debian-12"),
            size: None,
            key_delivery: String::from("metadata"),
            security_groups: None,
            destroy_poll_attempts: 60,
            destroy_poll_interval_secs: 3,
            rollback_delay_secs: 3,
            ready_max_attempts: 10,
            ready_initial_delay_secs: 1,
            ready_backoff_multiplier: 2,
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            ssh_port: 22,
        }
    }

    #[tokio::test]
    async fn environment_values_merge_over_defaults() {
        let _guard = EnvGuard::set_vars(&[
            ("BURAN_IMAGE", "debian-12"),
            ("BURAN_USER", "centos"),
            ("BURAN_SECURITY_GROUPS", "web,ssh"),
        ])
        .await;

        let cfg = NodeConfig::load_without_cli_args().expect("config should load");

        assert_eq!(cfg.image, "debian-12");
        assert_eq!(cfg.user, "centos");
        assert_eq!(cfg.name_prefix, "buran-node-");
        assert_eq!(cfg.destroy_poll_attempts, 60);
        // The env layer splits the comma-separated value into a list.
        assert_eq!(
            cfg.security_groups,
            Some(vec![String::from("web"), String::from("ssh")])
        );
    }

    #[tokio::test]
    async fn a_comma_separated_env_value_reaches_the_spec_as_a_list() {
        let _guard = EnvGuard::set_vars(&[
            ("BURAN_IMAGE", "debian-12"),
            ("BURAN_SECURITY_GROUPS", "web,ssh"),
        ])
        .await;

        let cfg = NodeConfig::load_without_cli_args().expect("config should load");
        let spec = cfg.as_spec().expect("spec should build");

        assert_eq!(spec.params.security_groups, vec![
            String::from("web"),
            String::from("ssh"),
        ]);
    }

    #[test]
    fn a_blank_image_is_rejected_with_guidance() {
        let mut cfg = fixture_config();
        cfg.image = String::from("  ");

        let err = cfg.as_spec().expect_err("blank image should fail");

        assert!(matches!(
            err,
            ConfigError::MissingField(message) if message.contains("BURAN_IMAGE")
        ));
    }

    #[test]
    fn an_unknown_key_delivery_spelling_is_rejected() {
        let mut cfg = fixture_config();
        cfg.key_delivery = String::from("smoke-signals");

        let err = cfg.validate().expect_err("nonsense profile should fail");

        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn security_group_entries_are_trimmed_and_empties_dropped() {
        let mut cfg = fixture_config();
        cfg.security_groups = Some(vec![
            String::from("web"),
            String::from(" ssh"),
            String::new(),
            String::from("builders "),
        ]);

        let spec = cfg.as_spec().expect("spec should build");

        assert_eq!(spec.params.security_groups, vec![
            String::from("web"),
            String::from("ssh"),
            String::from("builders"),
        ]);
    }

    #[test]
    fn the_spec_carries_identifiers_for_later_resolution() {
        let mut cfg = fixture_config();
        cfg.size = Some(String::from("size-2"));

        let spec = cfg.as_spec().expect("spec should build");

        assert_eq!(
            spec.image,
            ImageSource::Identifier(String::from("debian-12"))
        );
        assert_eq!(spec.size, SizeSource::Identifier(String::from("size-2")));
    }

    #[test]
    fn an_unset_size_defers_to_the_provider_catalog() {
        let spec = fixture_config().as_spec().expect("spec should build");

        assert_eq!(spec.size, SizeSource::ProviderDefault);
    }

    #[test]
    fn policies_map_directly_from_the_raw_numbers() {
        let cfg = fixture_config();

        assert_eq!(cfg.destroy_policy(), DestroyPolicy {
            max_polls: 60,
            interval: Duration::from_secs(3),
        });
        assert_eq!(cfg.ready_policy(), ReadyPolicy {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2,
        });
        assert_eq!(cfg.rollback_delay(), Duration::from_secs(3));
    }
}
