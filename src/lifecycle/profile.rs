//! Provider key-delivery profiles.
//!
//! Providers differ in how a node learns its SSH key: some read it from
//! instance metadata at boot, others require the key pair to be registered
//! ahead of creation and referenced by name. The profile is a tagged
//! variant selected at construction; it hooks into `create` (parameter
//! preparation) and `destroy` (post-termination cleanup).

use std::str::FromStr;

/// How the public key reaches the provisioned node.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum KeyDeliveryProfile {
    /// The public key is injected as an `ssh-keys` metadata entry and the
    /// provider bootstraps it on first boot.
    #[default]
    MetadataKeys,
    /// The key pair is imported to the provider by name before creation and
    /// referenced in the create call. Also defaults the root block device to
    /// delete-on-termination, and removes a generated key pair again after
    /// teardown.
    ImportedKeyPair,
}

impl FromStr for KeyDeliveryProfile {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "metadata" | "metadata-keys" => Ok(Self::MetadataKeys),
            "imported" | "imported-key-pair" => Ok(Self::ImportedKeyPair),
            other => Err(format!(
                "unknown key delivery profile '{other}' (expected 'metadata' or 'imported-key-pair')"
            )),
        }
    }
}
