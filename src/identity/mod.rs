//! IdentityStore (spec §4.9): the relay's own Ed25519 keypair, used to
//! identify this node independently of any Nostr (secp256k1) key material.

use crate::common::consts::IDENTITY_KEY_PATH;
use crate::common::error::{Error, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct IdentityStore {
    signing_key: Option<SigningKey>,
    public_key: VerifyingKey,
}

impl IdentityStore {
    /// Loads the keypair from `~/.shugur/relay_id.key`, generating and
    /// atomically writing a new one (mode 0600) if absent. If `explicit_pubkey`
    /// is set, it is used verbatim and no private key is required.
    pub fn load(explicit_pubkey: Option<&str>) -> Result<Self> {
        if let Some(hex_pubkey) = explicit_pubkey {
            let bytes = hex::decode(hex_pubkey)?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| Error::custom("explicit public_key must be 32 bytes (64 hex chars)"))?;
            let public_key = VerifyingKey::from_bytes(&arr).map_err(Error::Ed25519Error)?;
            return Ok(Self { signing_key: None, public_key });
        }

        let path = key_path()?;
        if let Some(existing) = try_read(&path)? {
            let public_key = existing.verifying_key();
            return Ok(Self { signing_key: Some(existing), public_key });
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        write_atomically(&path, &signing_key)?;
        let public_key = signing_key.verifying_key();
        Ok(Self { signing_key: Some(signing_key), public_key })
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key.as_bytes())
    }

    /// Signs `message` with the loaded private key. Returns `None` when only
    /// an explicit public key was configured (the relay can still issue
    /// AUTH challenges but cannot sign responses on its own behalf).
    pub fn sign(&self, message: &[u8]) -> Option<[u8; 64]> {
        use ed25519_dalek::Signer;
        self.signing_key.as_ref().map(|k| k.sign(message).to_bytes())
    }
}

fn key_path() -> Result<PathBuf> {
    let home = std::env::var_os("HOME").ok_or_else(|| Error::custom("HOME is not set"))?;
    Ok(PathBuf::from(home).join(IDENTITY_KEY_PATH))
}

fn try_read(path: &Path) -> Result<Option<SigningKey>> {
    if !path.exists() {
        return Ok(None);
    }
    let hex_contents = std::fs::read_to_string(path)?;
    let bytes = hex::decode(hex_contents.trim())?;
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::custom("identity key file is corrupt (expected 32 bytes)"))?;
    Ok(Some(SigningKey::from_bytes(&arr)))
}

fn write_atomically(path: &Path, key: &SigningKey) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(hex::encode(key.to_bytes()).as_bytes())?;
        file.sync_all()?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_pubkey_skips_private_key() {
        let key = SigningKey::generate(&mut OsRng);
        let pubkey_hex = hex::encode(key.verifying_key().as_bytes());
        let store = IdentityStore::load(Some(&pubkey_hex)).unwrap();
        assert_eq!(store.public_key_hex(), pubkey_hex);
        assert!(store.sign(b"anything").is_none());
    }

    #[test]
    fn rejects_malformed_explicit_pubkey() {
        assert!(IdentityStore::load(Some("not-hex")).is_err());
        assert!(IdentityStore::load(Some("aabb")).is_err());
    }
}
