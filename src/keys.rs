//! Session keypair provisioning
//!
//! Loads a caller-supplied OpenSSH private key, or generates an ephemeral RSA
//! key whose private half lives in an owner-only temporary file for as long
//! as the [`Keypair`] is alive.

use std::io::Write;
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rsa::{BigUint, RsaPrivateKey};
use ssh_key::private::{KeypairData, RsaKeypair};
use ssh_key::{LineEnding, PrivateKey, PublicKey};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{EicSshError, Result};

/// RSA modulus size for generated keys
pub const KEY_BITS: usize = 2048;

/// RSA public exponent for generated keys
pub const KEY_EXPONENT: u32 = 65537;

const TEMP_KEY_PREFIX: &str = "eic-ssh-";

/// Where the private half of a [`Keypair`] lives on disk
enum KeyFile {
    /// Caller-owned file, never written or removed
    Supplied(PathBuf),

    /// Generated file, removed when dropped
    Temporary(NamedTempFile),
}

/// The keypair used by one session
pub struct Keypair {
    private_key: PrivateKey,
    public_key: String,
    file: KeyFile,
}

impl Keypair {
    /// The in-memory private key
    pub fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    /// Public key in `algorithm base64blob` form, as sent to the push API
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Path of the private key file handed to the transport
    pub fn private_key_file(&self) -> &Path {
        match &self.file {
            KeyFile::Supplied(path) => path,
            KeyFile::Temporary(file) => file.path(),
        }
    }

    /// Whether this keypair was generated for the session
    pub fn is_generated(&self) -> bool {
        matches!(self.file, KeyFile::Temporary(_))
    }

    /// Release the keypair, deleting the key file if it was generated.
    ///
    /// Dropping a `Keypair` also deletes a generated file, but swallows
    /// errors; this reports them.
    pub fn discard(self) -> Result<()> {
        match self.file {
            KeyFile::Supplied(_) => Ok(()),
            KeyFile::Temporary(file) => {
                let path = file.path().to_path_buf();
                file.close()?;
                debug!("Removed temporary key {}", path.display());
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key)
            .field("private_key_file", &self.private_key_file())
            .field("generated", &self.is_generated())
            .finish_non_exhaustive()
    }
}

/// Obtain the session keypair.
///
/// Loads `explicit_private_key_path` when given, otherwise generates a new
/// key and writes it to a temporary file.
pub fn obtain_keypair(explicit_private_key_path: Option<&Path>) -> Result<Keypair> {
    match explicit_private_key_path {
        Some(path) => {
            debug!("Using supplied private key file {}", path.display());
            load_keypair(path)
        }
        None => {
            debug!("No private key file supplied, generating one");
            generate_keypair()
        }
    }
}

/// Load an unencrypted OpenSSH private key from `path`
pub fn load_keypair(path: &Path) -> Result<Keypair> {
    let content = std::fs::read_to_string(path).map_err(|e| EicSshError::key_load(path, e))?;

    let private_key =
        PrivateKey::from_openssh(&content).map_err(|e| EicSshError::key_load(path, e))?;

    if private_key.is_encrypted() {
        return Err(EicSshError::key_load(
            path,
            "passphrase-protected keys are not supported",
        ));
    }

    let public_key = public_key_openssh(&private_key).map_err(|e| EicSshError::key_load(path, e))?;

    Ok(Keypair {
        private_key,
        public_key,
        file: KeyFile::Supplied(path.to_path_buf()),
    })
}

/// Generate a fresh RSA key and persist it to an owner-only temporary file
pub fn generate_keypair() -> Result<Keypair> {
    let exponent = BigUint::from(KEY_EXPONENT);
    let rsa_key = RsaPrivateKey::new_with_exp(&mut OsRng, KEY_BITS, &exponent)
        .map_err(EicSshError::key_generation)?;
    let rsa_keypair = RsaKeypair::try_from(rsa_key).map_err(EicSshError::key_generation)?;
    let private_key =
        PrivateKey::new(KeypairData::Rsa(rsa_keypair), "").map_err(EicSshError::key_generation)?;

    let encoded = private_key
        .to_openssh(LineEnding::LF)
        .map_err(EicSshError::key_generation)?;

    let mut file = tempfile::Builder::new()
        .prefix(TEMP_KEY_PREFIX)
        .tempfile()
        .map_err(EicSshError::key_generation)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
            .map_err(EicSshError::key_generation)?;
    }

    file.write_all(encoded.as_bytes())
        .and_then(|_| file.as_file().sync_all())
        .map_err(EicSshError::key_generation)?;

    let public_key = public_key_openssh(&private_key).map_err(EicSshError::key_generation)?;

    info!("Generated temporary key at {}", file.path().display());

    Ok(Keypair {
        private_key,
        public_key,
        file: KeyFile::Temporary(file),
    })
}

/// Format the public half of `private_key` as a single OpenSSH line
/// without a comment
pub fn public_key_openssh(private_key: &PrivateKey) -> ssh_key::Result<String> {
    PublicKey::new(private_key.public_key().key_data().clone(), "").to_openssh()
}
