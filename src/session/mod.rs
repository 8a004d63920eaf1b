//! Remote execution channel to a provisioned node.
//!
//! A [`RemoteSession`] wraps the system `ssh` and `scp` clients with the
//! options ephemeral hosts need (batch mode, no host key pinning) and an
//! identity file materialised from in-memory key material. Sessions are
//! derived from a lifecycle's resolved address and credentials; they own no
//! provider resources.

use std::ffi::OsString;
use std::io::Write;

use camino::Utf8Path;
use shell_escape::unix::escape;
use tempfile::NamedTempFile;
use thiserror::Error;

mod types;

pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner, RemoteCommandOutput};

/// Default SSH port.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Errors raised while establishing or using a remote session.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SessionError {
    /// Raised when the private key cannot be written to an identity file.
    #[error("failed to materialise identity file: {message}")]
    Identity {
        /// Operating system error string.
        message: String,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a file transfer completes with a non-zero exit code.
    #[error("{program} exited with status {status_text}: {stderr}")]
    TransferFailure {
        /// Command name used for the transfer.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
    /// Raised when the local source for a transfer does not exist.
    #[error("transfer source missing: {path}")]
    MissingSource {
        /// Path that was expected to exist locally.
        path: String,
    },
}

/// Client binary and port settings for a session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SessionOptions {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    pub scp_bin: String,
    /// TCP port the remote sshd listens on.
    pub port: u16,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            scp_bin: String::from("scp"),
            port: DEFAULT_SSH_PORT,
        }
    }
}

/// Command and file-transfer channel to a single remote host.
#[derive(Debug)]
pub struct RemoteSession<R: CommandRunner = ProcessCommandRunner> {
    address: String,
    user: String,
    options: SessionOptions,
    identity: NamedTempFile,
    runner: R,
}

impl<R: CommandRunner> RemoteSession<R> {
    /// Creates a session from a reachable address, user, and private key.
    ///
    /// The private key is written to a temporary identity file restricted to
    /// the current user; the file lives as long as the session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Identity`] when the identity file cannot be
    /// created or written.
    pub fn new(
        address: impl Into<String>,
        user: impl Into<String>,
        private_key: &str,
        options: SessionOptions,
        runner: R,
    ) -> Result<Self, SessionError> {
        let identity = write_identity_file(private_key)?;
        Ok(Self {
            address: address.into(),
            user: user.into(),
            options,
            identity,
            runner,
        })
    }

    /// Returns the address this session connects to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Executes `command` on the remote host, preserving the remote exit
    /// code. A non-zero remote exit is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Spawn`] when the SSH client cannot be started.
    pub fn run(&self, command: &str) -> Result<RemoteCommandOutput, SessionError> {
        let mut args = self.common_options(false);
        args.push(OsString::from(format!("{}@{}", self.user, self.address)));
        args.push(OsString::from(command));

        let output = self.runner.run(&self.options.ssh_bin, &args)?;
        Ok(RemoteCommandOutput {
            exit_code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Copies a local file or directory to `remote_dest` via `scp`.
    ///
    /// `scp` is used instead of an in-process SFTP client; the remote
    /// destination is shell-escaped because scp passes it through the remote
    /// shell.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MissingSource`] when `local_source` does not
    /// exist, [`SessionError::Spawn`] when scp cannot be started, or
    /// [`SessionError::TransferFailure`] on a non-zero scp exit.
    pub fn put(&self, local_source: &Utf8Path, remote_dest: &str) -> Result<(), SessionError> {
        if !local_source.exists() {
            return Err(SessionError::MissingSource {
                path: local_source.to_string(),
            });
        }

        let mut args = self.common_options(true);
        if local_source.is_dir() {
            args.push(OsString::from("-r"));
        }
        args.push(OsString::from(local_source.as_str()));
        let escaped_dest = escape(remote_dest.into());
        args.push(OsString::from(format!(
            "{}@{}:{}",
            self.user, self.address, escaped_dest
        )));

        let output = self.runner.run(&self.options.scp_bin, &args)?;
        if output.is_success() {
            return Ok(());
        }

        let status_text = output
            .code
            .map_or_else(|| String::from("unknown"), |code| code.to_string());
        Err(SessionError::TransferFailure {
            program: self.options.scp_bin.clone(),
            status: output.code,
            status_text,
            stderr: output.stderr,
        })
    }

    /// Shared client options; `scp` spells the port flag `-P` where `ssh`
    /// uses `-p`.
    fn common_options(&self, scp: bool) -> Vec<OsString> {
        let port_flag = if scp { "-P" } else { "-p" };
        vec![
            OsString::from(port_flag),
            OsString::from(self.options.port.to_string()),
            OsString::from("-i"),
            OsString::from(self.identity.path()),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from("StrictHostKeyChecking=no"),
            OsString::from("-o"),
            OsString::from("UserKnownHostsFile=/dev/null"),
        ]
    }
}

fn write_identity_file(private_key: &str) -> Result<NamedTempFile, SessionError> {
    let mut file = NamedTempFile::new().map_err(|err| SessionError::Identity {
        message: err.to_string(),
    })?;
    file.write_all(private_key.as_bytes())
        .map_err(|err| SessionError::Identity {
            message: err.to_string(),
        })?;
    file.flush().map_err(|err| SessionError::Identity {
        message: err.to_string(),
    })?;

    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), Permissions::from_mode(0o600)).map_err(|err| {
            SessionError::Identity {
                message: err.to_string(),
            }
        })?;
    }

    Ok(file)
}
