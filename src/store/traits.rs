//! Collaborator interfaces consumed by the store.
//!
//! The store never talks to the mail-server process or hashes credentials
//! itself; both are implemented elsewhere and injected through these
//! traits.

use crate::Result;

/// Output of a command executed against the managed mail-server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Process exit code; zero means success.
    pub returncode: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

/// Executes a command against a managed mail-server instance.
///
/// The `target` is the tenant scope (container name); the implementation
/// resolves it to a concrete endpoint. Timeouts belong to the
/// implementation, not to the store.
pub trait CommandRunner: Send + Sync {
    /// Runs `command` against `target` and returns its output.
    ///
    /// # Errors
    ///
    /// Returns an error when the command could not be dispatched at all;
    /// a dispatched command that failed reports through
    /// [`ExecOutput::returncode`].
    fn exec(&self, command: &str, target: &str) -> Result<ExecOutput>;
}

/// A salted credential hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaltHash {
    /// The salt, hex-encoded.
    pub salt: String,
    /// The derived hash, hex-encoded.
    pub hash: String,
}

/// Hashes and verifies credentials.
pub trait CredentialHasher: Send + Sync {
    /// Hashes `password`, generating a fresh salt when none is given.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying primitive fails.
    fn hash(&self, password: &str, salt: Option<&str>) -> Result<SaltHash>;

    /// Verifies `password` against a stored salt and hash by recomputing
    /// the hash with the stored salt.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying primitive fails.
    fn verify(&self, password: &str, stored: &SaltHash) -> Result<bool> {
        let computed = self.hash(password, Some(&stored.salt))?;
        Ok(computed.hash == stored.hash)
    }
}
