//! Backend credential generation and storage
//!
//! The credential file is JSON `{username, password, created_at}`, created
//! with mode 0600. A directory created to hold it gets mode 0700; an
//! existing directory keeps its permissions. The file lives outside any
//! repository and is never logged.

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ContainerError;
use crate::Result;

/// Random bytes in a generated password (256 bits).
const PASSWORD_BYTES: usize = 32;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub username: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl Credential {
    /// Fresh credential with a hex-encoded random password.
    pub fn generate(username: impl Into<String>) -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; PASSWORD_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self {
            username: username.into(),
            password: hex::encode(bytes),
            created_at: Utc::now(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            ContainerError::Credentials(format!("cannot read {}: {}", path.display(), e))
        })?;
        let credential: Credential = serde_json::from_slice(&data)?;
        Ok(credential)
    }

    /// Write atomically: temp file (0600) in the same directory, then rename.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                restrict_dir(dir)?;
            }
        }

        let tmp = path.with_extension("tmp");
        let _ = std::fs::remove_file(&tmp);
        {
            let mut file = open_private(&tmp)?;
            file.write_all(&serde_json::to_vec_pretty(self)?)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, path)?;
        restrict_file(path)?;

        debug!(path = %path.display(), "Credential persisted");
        Ok(())
    }
}

#[cfg(unix)]
fn open_private(path: &Path) -> Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    Ok(std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> Result<std::fs::File> {
    Ok(std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?)
}

#[cfg(unix)]
fn restrict_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_file(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn restrict_dir(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generated_password_is_64_hex_chars() {
        let a = Credential::generate("root");
        let b = Credential::generate("root");
        assert_eq!(a.password.len(), 64);
        assert!(a.password.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.password, b.password);
    }

    #[test]
    fn test_persist_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("credentials");
        let credential = Credential::generate("root");

        credential.persist(&path).unwrap();
        assert_eq!(Credential::load(&path).unwrap(), credential);

        // Overwrite keeps working
        let replacement = Credential::generate("root");
        replacement.persist(&path).unwrap();
        assert_eq!(Credential::load(&path).unwrap(), replacement);
    }

    #[cfg(unix)]
    #[test]
    fn test_persisted_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join("credentials");
        Credential::generate("root").persist(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_created_directory_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let state = dir.path().join("state");
        Credential::generate("root").persist(&state.join("credentials")).unwrap();

        let mode = std::fs::metadata(&state).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[cfg(unix)]
    #[test]
    fn test_existing_directory_keeps_its_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let shared = dir.path().join("work");
        std::fs::create_dir(&shared).unwrap();
        std::fs::set_permissions(&shared, std::fs::Permissions::from_mode(0o755)).unwrap();

        let path = shared.join("creds.json");
        Credential::generate("root").persist(&path).unwrap();

        let dir_mode = std::fs::metadata(&shared).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o755);
        let file_mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(file_mode & 0o777, 0o600);
    }

    #[test]
    fn test_debug_redacts_password() {
        let credential = Credential::generate("root");
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains(&credential.password));
    }

    #[test]
    fn test_missing_file_is_credentials_error() {
        let dir = tempdir().unwrap();
        let err = Credential::load(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ContainerError::Credentials(_)));
    }
}
