//! SSH key pair material for node access.
//!
//! A node either receives a caller-supplied key pair or generates a
//! 2048-bit RSA pair on first use. Generated material lives only in memory;
//! nothing is written to disk until a remote session needs an identity file.

use rand_core::OsRng;
use ssh_key::private::{KeypairData, RsaKeypair};
use ssh_key::{HashAlg, LineEnding, PrivateKey};
use thiserror::Error;

/// RSA modulus size for generated key pairs.
const RSA_BITS: usize = 2048;

/// Errors raised while generating or encoding key material.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum KeyError {
    /// Key generation or encoding failed. Unrecoverable; surfaced as a fatal
    /// configuration problem by callers.
    #[error("key pair generation failed: {0}")]
    Generation(String),
}

/// An SSH key pair usable both for provider registration and SSH auth.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KeyPair {
    /// Name under which the pair is registered with a provider.
    pub name: String,
    /// Public key in OpenSSH line format (`ssh-rsa <base64> <user>`).
    pub public_key: String,
    /// SHA-256 fingerprint of the public key.
    pub fingerprint: String,
    /// Private key in OpenSSH PEM format.
    pub private_key: String,
    generated: bool,
}

impl KeyPair {
    /// Wraps caller-supplied key material.
    ///
    /// Supplied pairs are never regenerated and never deleted from the
    /// provider on teardown.
    #[must_use]
    pub fn supplied(
        name: impl Into<String>,
        public_key: impl Into<String>,
        fingerprint: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            public_key: public_key.into(),
            fingerprint: fingerprint.into(),
            private_key: private_key.into(),
            generated: false,
        }
    }

    /// Generates a fresh 2048-bit RSA pair named `key-pair-<node_name>`.
    ///
    /// The public line carries `user` as its comment so providers that
    /// bootstrap keys from metadata attribute it to the right account.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::Generation`] when the RNG or encoder fails.
    pub fn generate(node_name: &str, user: &str) -> Result<Self, KeyError> {
        let keypair = RsaKeypair::random(&mut OsRng, RSA_BITS)
            .map_err(|err| KeyError::Generation(err.to_string()))?;
        let private = PrivateKey::new(KeypairData::Rsa(keypair), user)
            .map_err(|err| KeyError::Generation(err.to_string()))?;

        let public = private.public_key();
        let public_line = public
            .to_openssh()
            .map_err(|err| KeyError::Generation(err.to_string()))?;
        let fingerprint = public.fingerprint(HashAlg::Sha256).to_string();
        let private_pem = private
            .to_openssh(LineEnding::LF)
            .map_err(|err| KeyError::Generation(err.to_string()))?;

        Ok(Self {
            name: format!("key-pair-{node_name}"),
            public_key: public_line,
            fingerprint,
            private_key: private_pem.to_string(),
            generated: true,
        })
    }

    /// Returns `true` when this pair was generated rather than supplied.
    #[must_use]
    pub const fn is_generated(&self) -> bool {
        self.generated
    }
}

#[cfg(test)]
mod tests;
