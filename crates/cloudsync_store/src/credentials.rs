//! Credential lookup for authenticating replication peers.
//!
//! Passwords are never stored. A record holds the hex SHA-256 of the
//! password followed by the salt (or of the password alone for unsalted
//! records). Both endpoints compute the same hash, which then seeds the
//! session key.

use parking_lot::RwLock;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write;

/// Stored credentials of one user.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    /// User name.
    pub username: String,
    /// Hex-encoded password hash.
    pub password_hash: String,
    /// Salt mixed into the hash, if any.
    pub salt: Option<String>,
}

impl CredentialRecord {
    /// Creates a record from a plaintext password.
    pub fn from_password(username: impl Into<String>, password: &str, salt: Option<String>) -> Self {
        let password_hash = password_hash(password, salt.as_deref());
        Self {
            username: username.into(),
            password_hash,
            salt,
        }
    }
}

impl std::fmt::Debug for CredentialRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRecord")
            .field("username", &self.username)
            .field("password_hash", &"[REDACTED]")
            .field("salt", &self.salt)
            .finish()
    }
}

/// Computes the password hash shared by both endpoints.
///
/// With a salt this is `hex(SHA-256(password || salt))`, otherwise the
/// simple hash `hex(SHA-256(password))`.
pub fn password_hash(password: &str, salt: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    if let Some(salt) = salt {
        hasher.update(salt.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        })
}

/// Looks up users by name.
pub trait CredentialStore: Send + Sync {
    /// Returns the credential record of `username`, if the user exists.
    fn authenticate(&self, username: &str) -> Option<CredentialRecord>;
}

/// Credential store held in memory.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<String, CredentialRecord>>,
}

impl MemoryCredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user with a freshly generated random salt.
    pub fn add_user(&self, username: &str, password: &str) {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = salt.iter().fold(String::with_capacity(32), |mut out, b| {
            let _ = write!(out, "{b:02x}");
            out
        });
        self.insert(CredentialRecord::from_password(username, password, Some(salt)));
    }

    /// Adds a user whose hash carries no salt.
    pub fn add_unsalted_user(&self, username: &str, password: &str) {
        self.insert(CredentialRecord::from_password(username, password, None));
    }

    /// Inserts or replaces a record.
    pub fn insert(&self, record: CredentialRecord) {
        self.users.write().insert(record.username.clone(), record);
    }

    /// Returns the number of users.
    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    /// Returns true if no users are registered.
    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn authenticate(&self, username: &str) -> Option<CredentialRecord> {
        self.users.read().get(username).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_salted() {
        let a = password_hash("secret", Some("salt"));
        let b = password_hash("secret", Some("salt"));
        let c = password_hash("secret", Some("pepper"));
        let d = password_hash("secret", None);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn known_simple_hash() {
        // SHA-256("abc")
        assert_eq!(
            password_hash("abc", None),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn lookup_users() {
        let store = MemoryCredentialStore::new();
        assert!(store.is_empty());

        store.add_user("admin", "admin");
        store.add_unsalted_user("legacy", "pw");
        assert_eq!(store.len(), 2);

        let admin = store.authenticate("admin").unwrap();
        let salt = admin.salt.clone().unwrap();
        assert_eq!(salt.len(), 32);
        assert_eq!(admin.password_hash, password_hash("admin", Some(&salt)));

        let legacy = store.authenticate("legacy").unwrap();
        assert!(legacy.salt.is_none());
        assert_eq!(legacy.password_hash, password_hash("pw", None));

        assert!(store.authenticate("nobody").is_none());
    }

    #[test]
    fn debug_redacts_hash() {
        let record = CredentialRecord::from_password("admin", "secret", None);
        let shown = format!("{record:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains(&record.password_hash));
    }
}
