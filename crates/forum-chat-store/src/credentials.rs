//! Credential pair holders.
//!
//! [`MemoryCredentials`] lives for the process; [`FileCredentials`] also
//! persists the pair as JSON so a restart resumes the session. The pair is
//! the only client state that survives a restart.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use directories::ProjectDirs;
use tracing::{info, warn};

use forum_chat_shared::constants::{APP_NAME, CREDENTIALS_FILE};
use forum_chat_shared::{CredentialPair, CredentialProvider};

use crate::error::{Result, StoreError};

/// In-memory credential pair.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    pair: RwLock<Option<CredentialPair>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pair(pair: CredentialPair) -> Self {
        Self {
            pair: RwLock::new(Some(pair)),
        }
    }
}

impl CredentialProvider for MemoryCredentials {
    fn get(&self) -> Option<CredentialPair> {
        self.pair.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set(&self, pair: CredentialPair) {
        *self.pair.write().unwrap_or_else(|e| e.into_inner()) = Some(pair);
    }

    fn clear(&self) {
        *self.pair.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Credential pair mirrored to a JSON file.
///
/// The in-memory copy is authoritative; write failures are logged and the
/// session continues with the in-memory pair.
#[derive(Debug)]
pub struct FileCredentials {
    path: PathBuf,
    cache: MemoryCredentials,
}

impl FileCredentials {
    /// Open the credentials file in the platform data directory:
    /// - Linux:   `~/.local/share/forum-chat/credentials.json`
    /// - macOS:   `~/Library/Application Support/com.forum-chat.forum-chat/credentials.json`
    /// - Windows: `{FOLDERID_RoamingAppData}\forum-chat\forum-chat\data\credentials.json`
    pub fn open_default() -> Result<Self> {
        Self::open_at(&default_path()?)
    }

    /// Open (or prepare) a credentials file at an explicit path.
    ///
    /// A missing file means logged out. An unreadable or corrupt file is
    /// treated the same way and removed.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let cache = match read_pair(path) {
            Ok(Some(pair)) => {
                info!(path = %path.display(), "Loaded stored credentials");
                MemoryCredentials::with_pair(pair)
            }
            Ok(None) => MemoryCredentials::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding unreadable credentials");
                let _ = std::fs::remove_file(path);
                MemoryCredentials::new()
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            cache,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, pair: &CredentialPair) -> Result<()> {
        let json = serde_json::to_vec_pretty(pair)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        restrict_permissions(&tmp)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl CredentialProvider for FileCredentials {
    fn get(&self) -> Option<CredentialPair> {
        self.cache.get()
    }

    fn set(&self, pair: CredentialPair) {
        if let Err(e) = self.persist(&pair) {
            warn!(path = %self.path.display(), error = %e, "Failed to persist credentials");
        }
        self.cache.set(pair);
    }

    fn clear(&self) {
        self.cache.clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove credentials file");
            }
        }
    }
}

/// Default credentials path inside the platform data directory.
pub fn default_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("com", APP_NAME, APP_NAME).ok_or(StoreError::NoDataDir)?;
    Ok(dirs.data_dir().join(CREDENTIALS_FILE))
}

fn read_pair(path: &Path) -> Result<Option<CredentialPair>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_lifecycle() {
        let creds = MemoryCredentials::new();
        assert!(creds.get().is_none());

        creds.set(CredentialPair::new("a1", "r1"));
        assert_eq!(creds.access_token().as_deref(), Some("a1"));

        creds.clear();
        assert!(creds.get().is_none());
    }

    #[test]
    fn test_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("credentials.json");

        let creds = FileCredentials::open_at(&path).unwrap();
        assert!(creds.get().is_none());
        creds.set(CredentialPair::new("a1", "r1"));

        let reopened = FileCredentials::open_at(&path).unwrap();
        assert_eq!(reopened.get(), Some(CredentialPair::new("a1", "r1")));

        reopened.clear();
        assert!(!path.exists());
        assert!(FileCredentials::open_at(&path).unwrap().get().is_none());
    }

    #[test]
    fn test_corrupt_file_means_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, b"{\"access_token\": ").unwrap();

        let creds = FileCredentials::open_at(&path).unwrap();
        assert!(creds.get().is_none());
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        FileCredentials::open_at(&path)
            .unwrap()
            .set(CredentialPair::new("a", "r"));

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
