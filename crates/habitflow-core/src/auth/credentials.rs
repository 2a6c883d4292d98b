use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::UNIX_EPOCH;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::session::TokenPair;

/// Keychain service name, also the namespace of the stored record
pub const SERVICE_NAME: &str = "habitflow";

/// Keychain account holding the serialized session record
const KEYRING_USER: &str = "session";

/// Credential file name inside the data directory
const CREDENTIALS_FILE: &str = "credentials.json";

/// Durable storage for the session: the token pair and the user id.
///
/// Every write is committed before the call returns. The pair is always
/// written as a unit, never one token at a time.
pub trait CredentialStore: Send + Sync {
    /// Persist both tokens together
    fn save(&self, pair: &TokenPair) -> Result<()>;

    /// Last saved pair, or `None` if never saved or cleared
    fn load(&self) -> Result<Option<TokenPair>>;

    fn save_user_id(&self, user_id: &str) -> Result<()>;

    fn load_user_id(&self) -> Result<Option<String>>;

    /// Remove the pair and the user id in one step
    fn clear(&self) -> Result<()>;
}

/// The single record both backends persist.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialRecord {
    #[serde(default)]
    tokens: Option<TokenPair>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl CredentialRecord {
    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

fn lock(mutex: &Mutex<()>) -> Result<MutexGuard<'_, ()>> {
    mutex
        .lock()
        .map_err(|_| anyhow!("Credential store lock poisoned"))
}

// ============================================================================
// File backend
// ============================================================================

/// Stores the session as a JSON file, replaced atomically on every write.
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Create a store keeping its record in `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join(CREDENTIALS_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<CredentialRecord> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(CredentialRecord::default())
            }
            Err(e) => return Err(e).context("Failed to read credential file"),
        };
        serde_json::from_str(&contents).context("Failed to parse credential file")
    }

    fn update(&self, apply: impl FnOnce(&mut CredentialRecord)) -> Result<()> {
        let _guard = lock(&self.write_lock)?;
        let mut record = self.read()?;
        apply(&mut record);
        record.touch();
        let contents = serde_json::to_string_pretty(&record)?;
        atomic_write(&self.path, contents.as_bytes())
            .with_context(|| format!("Failed to write {}", self.path.display()))
    }
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, pair: &TokenPair) -> Result<()> {
        self.update(|record| record.tokens = Some(pair.clone()))?;
        debug!(path = %self.path.display(), "Token pair saved");
        Ok(())
    }

    fn load(&self) -> Result<Option<TokenPair>> {
        Ok(self.read()?.tokens)
    }

    fn save_user_id(&self, user_id: &str) -> Result<()> {
        self.update(|record| record.user_id = Some(user_id.to_string()))
    }

    fn load_user_id(&self) -> Result<Option<String>> {
        Ok(self.read()?.user_id)
    }

    fn clear(&self) -> Result<()> {
        let _guard = lock(&self.write_lock)?;
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("Failed to delete credential file"),
        }
        sync_parent(&self.path);
        debug!(path = %self.path.display(), "Credentials cleared");
        Ok(())
    }
}

/// Write to a sibling temp file, fsync it, then rename over `path`.
/// A crash at any point leaves either the old or the new contents.
fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(CREDENTIALS_FILE);
    let tmp_path = dir.join(format!(
        ".{}.tmp.{}",
        file_name,
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));

    let result = (|| -> io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        sync_parent(path);
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn sync_parent(path: &Path) {
    if let Some(dir) = path.parent() {
        if let Ok(dir) = fs::File::open(dir) {
            let _ = dir.sync_all();
        }
    }
}

// ============================================================================
// OS keychain backend
// ============================================================================

/// Stores the session record as a single OS keychain entry.
pub struct KeyringCredentialStore {
    entry: Entry,
    write_lock: Mutex<()>,
}

impl KeyringCredentialStore {
    pub fn new() -> Result<Self> {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: &str) -> Result<Self> {
        let entry =
            Entry::new(service, KEYRING_USER).context("Failed to create keyring entry")?;
        Ok(Self::from_entry(entry))
    }

    fn from_entry(entry: Entry) -> Self {
        Self {
            entry,
            write_lock: Mutex::new(()),
        }
    }

    fn read(&self) -> Result<CredentialRecord> {
        match self.entry.get_password() {
            Ok(contents) => {
                serde_json::from_str(&contents).context("Failed to parse keychain record")
            }
            Err(keyring::Error::NoEntry) => Ok(CredentialRecord::default()),
            Err(e) => Err(e).context("Failed to read credentials from keychain"),
        }
    }

    fn update(&self, apply: impl FnOnce(&mut CredentialRecord)) -> Result<()> {
        let _guard = lock(&self.write_lock)?;
        let mut record = self.read()?;
        apply(&mut record);
        record.touch();
        let contents = serde_json::to_string(&record)?;
        self.entry
            .set_password(&contents)
            .context("Failed to store credentials in keychain")
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save(&self, pair: &TokenPair) -> Result<()> {
        self.update(|record| record.tokens = Some(pair.clone()))
    }

    fn load(&self) -> Result<Option<TokenPair>> {
        Ok(self.read()?.tokens)
    }

    fn save_user_id(&self, user_id: &str) -> Result<()> {
        self.update(|record| record.user_id = Some(user_id.to_string()))
    }

    fn load_user_id(&self) -> Result<Option<String>> {
        Ok(self.read()?.user_id)
    }

    fn clear(&self) -> Result<()> {
        let _guard = lock(&self.write_lock)?;
        match self.entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete credential from keychain"),
        }
    }
}
