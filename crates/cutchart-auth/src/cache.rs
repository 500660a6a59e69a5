//! Encrypted credential cache
//!
//! Stores opaque blobs under namespace keys in a single JSON document on
//! disk. Each value is sealed on its own with AES-256-GCM, using the key name
//! as associated data so a blob copied under another key fails to open.
//!
//! Every operation re-reads the file and every mutation rewrites it whole:
//! temp file in the same directory, fsync, 0600, rename over the target,
//! fsync the directory. Nothing is held open between operations, so two
//! back-to-back processes see each other's writes (last writer wins).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::Secret;
use rand::RngExt;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::BoxFuture;
use crate::error::{Error, Result};

const ENCRYPTED_PREFIX: &str = "enc:v1:";
const PLAINTEXT_PREFIX: &str = "plain:";
const NONCE_BYTES: usize = 12;
const KEY_CONTEXT: &[u8] = b"cc-cli-credential-cache-v1";

/// Key/value persistence for opaque credential blobs.
///
/// Every failure to open, decrypt, or write the backing store is
/// `CacheUnavailable`; none are retried or papered over.
pub trait CredentialCache: Send + Sync {
    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;

    /// Overwrite the value under `key`. Durable once the future resolves.
    fn put<'a>(&'a self, key: &'a str, value: &'a [u8]) -> BoxFuture<'a, Result<()>>;

    /// Remove the value under `key`. The backing file stays; clearing an
    /// absent key succeeds.
    fn clear<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// How values are sealed at rest.
pub enum Sealing {
    Encrypted(Secret<[u8; 32]>),
    /// Only reachable through an explicit opt-in.
    Plaintext,
}

impl Sealing {
    /// Resolve sealing from the operator-supplied password and salt.
    ///
    /// Both present: encrypted. Either missing: an error, unless the caller
    /// opted into plaintext, which is logged.
    pub fn from_secrets(
        password: Option<&Secret<String>>,
        salt: Option<&Secret<String>>,
        allow_plaintext: bool,
    ) -> Result<Self> {
        let password = password.filter(|p| !p.is_blank());
        let salt = salt.filter(|s| !s.is_blank());
        match (password, salt) {
            (Some(password), Some(salt)) => Ok(Self::Encrypted(derive_key(password, salt))),
            _ if allow_plaintext => {
                warn!("credential cache encryption disabled by configuration, tokens will be stored unencrypted");
                Ok(Self::Plaintext)
            }
            (None, _) => Err(Error::CacheUnavailable(
                "storage password is not configured".into(),
            )),
            (_, None) => Err(Error::CacheUnavailable(
                "storage salt is not configured".into(),
            )),
        }
    }

    fn seal(&self, key: &str, value: &[u8]) -> Result<String> {
        match self {
            Sealing::Plaintext => Ok(format!("{PLAINTEXT_PREFIX}{}", STANDARD.encode(value))),
            Sealing::Encrypted(material) => {
                let cipher = Aes256Gcm::new_from_slice(material.expose())
                    .map_err(|_| Error::CacheUnavailable("invalid cache key length".into()))?;
                let mut nonce = [0u8; NONCE_BYTES];
                rand::rng().fill(&mut nonce[..]);
                let ciphertext = cipher
                    .encrypt(
                        Nonce::from_slice(&nonce),
                        Payload {
                            msg: value,
                            aad: key.as_bytes(),
                        },
                    )
                    .map_err(|_| Error::CacheUnavailable("encrypting cache entry failed".into()))?;

                let mut sealed = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
                sealed.extend_from_slice(&nonce);
                sealed.extend_from_slice(&ciphertext);
                Ok(format!("{ENCRYPTED_PREFIX}{}", STANDARD.encode(sealed)))
            }
        }
    }

    fn open(&self, key: &str, stored: &str) -> Result<Vec<u8>> {
        match self {
            Sealing::Plaintext => {
                let encoded = stored.strip_prefix(PLAINTEXT_PREFIX).ok_or_else(|| {
                    Error::CacheUnavailable(format!(
                        "entry {key} is encrypted but no storage password is configured"
                    ))
                })?;
                STANDARD
                    .decode(encoded)
                    .map_err(|e| Error::CacheUnavailable(format!("decoding entry {key}: {e}")))
            }
            Sealing::Encrypted(material) => {
                // Refuse to read plaintext entries once encryption is configured
                let encoded = stored.strip_prefix(ENCRYPTED_PREFIX).ok_or_else(|| {
                    Error::CacheUnavailable(format!("entry {key} is not encrypted"))
                })?;
                let raw = STANDARD
                    .decode(encoded)
                    .map_err(|e| Error::CacheUnavailable(format!("decoding entry {key}: {e}")))?;
                if raw.len() <= NONCE_BYTES {
                    return Err(Error::CacheUnavailable(format!("entry {key} is truncated")));
                }
                let (nonce, ciphertext) = raw.split_at(NONCE_BYTES);
                let cipher = Aes256Gcm::new_from_slice(material.expose())
                    .map_err(|_| Error::CacheUnavailable("invalid cache key length".into()))?;
                cipher
                    .decrypt(
                        Nonce::from_slice(nonce),
                        Payload {
                            msg: ciphertext,
                            aad: key.as_bytes(),
                        },
                    )
                    .map_err(|_| {
                        Error::CacheUnavailable(format!(
                            "decrypting entry {key} failed (wrong storage password or salt?)"
                        ))
                    })
            }
        }
    }
}

/// `SHA-256(context || salt || 0x00 || password)`
fn derive_key(password: &Secret<String>, salt: &Secret<String>) -> Secret<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(KEY_CONTEXT);
    hasher.update(salt.expose().as_bytes());
    hasher.update([0u8]);
    hasher.update(password.expose().as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&hasher.finalize());
    Secret::new(key)
}

/// File-backed cache holding every namespace in one document.
pub struct FileCache {
    path: PathBuf,
    sealing: Sealing,
}

impl FileCache {
    pub fn new(path: PathBuf, sealing: Sealing) -> Self {
        Self { path, sealing }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the on-disk document. A missing file is an empty cache.
    async fn read_document(&self) -> Result<BTreeMap<String, String>> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "credential cache not found, treating as empty");
                return Ok(BTreeMap::new());
            }
            Err(e) => {
                return Err(Error::CacheUnavailable(format!(
                    "reading {}: {e}",
                    self.path.display()
                )));
            }
        };
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).map_err(|e| {
            Error::CacheUnavailable(format!("parsing {}: {e}", self.path.display()))
        })
    }

    async fn load_value(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let document = self.read_document().await?;
        document
            .get(key)
            .map(|stored| self.sealing.open(key, stored))
            .transpose()
    }

    async fn store_value(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut document = self.read_document().await?;
        document.insert(key.to_string(), self.sealing.seal(key, value)?);
        write_atomic(&self.path, &document).await?;
        debug!(key, "cache entry written");
        Ok(())
    }

    async fn remove_value(&self, key: &str) -> Result<()> {
        let mut document = self.read_document().await?;
        document.remove(key);
        write_atomic(&self.path, &document).await?;
        debug!(key, "cache entry cleared");
        Ok(())
    }
}

impl CredentialCache for FileCache {
    fn exists<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.read_document().await?.contains_key(key)) })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(self.load_value(key))
    }

    fn put<'a>(&'a self, key: &'a str, value: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.store_value(key, value))
    }

    fn clear<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.remove_value(key))
    }
}

/// Staged temp file, removed on drop unless the rename consumed it. Drop
/// also covers a write abandoned mid-way by cancellation.
struct StagedFile {
    path: PathBuf,
    committed: bool,
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Write the document atomically and durably.
async fn write_atomic(path: &Path, document: &BTreeMap<String, String>) -> Result<()> {
    let io_err = |what: &str, e: std::io::Error| Error::CacheUnavailable(format!("{what}: {e}"));

    let json = serde_json::to_string_pretty(document)
        .map_err(|e| Error::CacheUnavailable(format!("serializing cache: {e}")))?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| io_err("creating cache directory", e))?;

    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    // Declared before the handle so the handle closes first on early return
    let mut staged = StagedFile {
        path: tmp_path,
        committed: false,
    };
    let mut file = tokio::fs::File::create(&staged.path)
        .await
        .map_err(|e| io_err("creating temp cache file", e))?;
    file.write_all(json.as_bytes())
        .await
        .map_err(|e| io_err("writing temp cache file", e))?;
    file.sync_all()
        .await
        .map_err(|e| io_err("flushing temp cache file", e))?;
    drop(file);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&staged.path, perms)
            .await
            .map_err(|e| io_err("setting cache file permissions", e))?;
    }

    tokio::fs::rename(&staged.path, path)
        .await
        .map_err(|e| io_err("replacing cache file", e))?;
    staged.committed = true;

    // Make the rename itself durable
    #[cfg(unix)]
    {
        let dir_handle = tokio::fs::File::open(dir)
            .await
            .map_err(|e| io_err("opening cache directory", e))?;
        dir_handle
            .sync_all()
            .await
            .map_err(|e| io_err("flushing cache directory", e))?;
    }

    debug!(path = %path.display(), "persisted credential cache");
    Ok(())
}
