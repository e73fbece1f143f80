//! Session keys and frame encryption.
//!
//! Every frame body is sealed with AES-GCM. Both ends start on the
//! bootstrap key (SHA-256 of a public constant) and switch to a session
//! key derived from the user's password hash once authentication
//! succeeds.
//!
//! ## Nonces
//!
//! Nonces never travel on the wire. Each direction keeps a frame counter
//! and both ends construct the same 12-byte nonce:
//!
//! ```text
//! [ epoch (4) | direction (1) | zeros (3) | counter (4) ]
//! ```
//!
//! Re-keying increments the epoch and resets the counter, so a
//! (key, nonce) pair is never reused.

use crate::error::{CloudError, CloudResult};
use aes_gcm::{aead::Aead, Aes128Gcm, Aes256Gcm, KeyInit, Nonce};
use cloudsync_protocol::{BOOTSTRAP_SECRET, MAX_KEY_BITS, MIN_KEY_BITS};
use hkdf::Hkdf;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

const SESSION_KEY_INFO: &[u8] = b"cloudsync-session-key-v1";
const KEY_CHECK_PLAINTEXT: &[u8] = b"cloudsync-key-check-v1";
const KEY_CHECK_DIRECTION: u8 = 0xFF;

/// Direction a frame travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server (0x00).
    ClientToServer,
    /// Server to client (0x01).
    ServerToClient,
}

impl Direction {
    /// Byte placed in the nonce.
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::ClientToServer => 0x00,
            Direction::ServerToClient => 0x01,
        }
    }
}

/// Which end of a connection this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The dialing side.
    Client,
    /// The accepting side.
    Server,
}

impl Role {
    /// Direction of frames this end writes.
    pub fn outbound(self) -> Direction {
        match self {
            Role::Client => Direction::ClientToServer,
            Role::Server => Direction::ServerToClient,
        }
    }

    /// Direction of frames this end reads.
    pub fn inbound(self) -> Direction {
        match self {
            Role::Client => Direction::ServerToClient,
            Role::Server => Direction::ClientToServer,
        }
    }
}

/// Builds the nonce for one frame.
pub fn construct_nonce(epoch: u32, direction: u8, counter: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[0..4].copy_from_slice(&epoch.to_be_bytes());
    nonce[4] = direction;
    nonce[8..12].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// Picks the session key size for a client offer.
///
/// The weaker of the two maxima wins and is normalised down to 128 or
/// 256 bits. Offers below 128 bits are refused.
pub fn negotiate_key_bits(client_max: u32, server_max: u32) -> Option<u32> {
    let bits = client_max.min(server_max);
    if bits >= MAX_KEY_BITS {
        Some(MAX_KEY_BITS)
    } else if bits >= MIN_KEY_BITS {
        Some(MIN_KEY_BITS)
    } else {
        None
    }
}

/// Symmetric key for one connection phase.
///
/// Zeroized on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    bytes: Vec<u8>,
}

impl SessionKey {
    /// The key both ends use until authentication completes.
    pub fn bootstrap() -> Self {
        Self {
            bytes: Sha256::digest(BOOTSTRAP_SECRET).to_vec(),
        }
    }

    /// Derives a session key from a hex password hash.
    ///
    /// # Errors
    ///
    /// Returns an error if `key_bits` is neither 128 nor 256.
    pub fn derive(password_hash: &str, key_bits: u32) -> CloudResult<Self> {
        if key_bits != MIN_KEY_BITS && key_bits != MAX_KEY_BITS {
            return Err(CloudError::Protocol(format!(
                "unsupported key size: {key_bits} bits"
            )));
        }
        let hk = Hkdf::<Sha256>::new(None, password_hash.as_bytes());
        let mut bytes = vec![0u8; (key_bits / 8) as usize];
        hk.expand(SESSION_KEY_INFO, &mut bytes)
            .map_err(|_| CloudError::Protocol("session key derivation failed".into()))?;
        Ok(Self { bytes })
    }

    /// Key size in bits.
    pub fn key_bits(&self) -> u32 {
        (self.bytes.len() * 8) as u32
    }

    /// Encrypts the verification constant under this key.
    ///
    /// # Errors
    ///
    /// Returns an error if encryption fails.
    pub fn key_check(&self) -> CloudResult<Vec<u8>> {
        let cipher = AeadCipher::new(self)?;
        cipher.seal(&construct_nonce(0, KEY_CHECK_DIRECTION, 0), KEY_CHECK_PLAINTEXT)
    }

    /// Returns true if `check` was produced by [`key_check`](Self::key_check)
    /// under the same key.
    pub fn verify_key_check(&self, check: &[u8]) -> bool {
        AeadCipher::new(self)
            .and_then(|cipher| cipher.open(&construct_nonce(0, KEY_CHECK_DIRECTION, 0), check))
            .map(|plain| plain == KEY_CHECK_PLAINTEXT)
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bits", &self.key_bits())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

enum AeadCipher {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl AeadCipher {
    fn new(key: &SessionKey) -> CloudResult<Self> {
        let invalid = |_| CloudError::Protocol("invalid key length".into());
        match key.bytes.len() {
            16 => Ok(Self::Aes128(Box::new(
                Aes128Gcm::new_from_slice(&key.bytes).map_err(invalid)?,
            ))),
            32 => Ok(Self::Aes256(Box::new(
                Aes256Gcm::new_from_slice(&key.bytes).map_err(invalid)?,
            ))),
            n => Err(CloudError::Protocol(format!("invalid key length: {n} bytes"))),
        }
    }

    fn seal(&self, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> CloudResult<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let sealed = match self {
            AeadCipher::Aes128(c) => c.encrypt(nonce, plaintext),
            AeadCipher::Aes256(c) => c.encrypt(nonce, plaintext),
        };
        sealed.map_err(|_| CloudError::transmission("frame encryption failed"))
    }

    fn open(&self, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> CloudResult<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let opened = match self {
            AeadCipher::Aes128(c) => c.decrypt(nonce, ciphertext),
            AeadCipher::Aes256(c) => c.decrypt(nonce, ciphertext),
        };
        opened.map_err(|_| CloudError::authentication("frame failed to decrypt"))
    }
}

/// Seals or opens the frames of one direction of a connection.
pub struct FrameCipher {
    cipher: AeadCipher,
    direction: Direction,
    epoch: u32,
    counter: u64,
}

impl FrameCipher {
    /// Creates a cipher on the bootstrap key.
    pub fn bootstrap(direction: Direction) -> CloudResult<Self> {
        Ok(Self {
            cipher: AeadCipher::new(&SessionKey::bootstrap())?,
            direction,
            epoch: 0,
            counter: 0,
        })
    }

    /// Switches to a new key, starting a new epoch.
    pub fn rekey(&mut self, key: &SessionKey) -> CloudResult<()> {
        self.cipher = AeadCipher::new(key)?;
        self.epoch = self.epoch.wrapping_add(1);
        self.counter = 0;
        Ok(())
    }

    /// Current key epoch.
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    fn next_nonce(&mut self) -> CloudResult<[u8; NONCE_SIZE]> {
        let counter = u32::try_from(self.counter)
            .map_err(|_| CloudError::transmission("nonce space exhausted"))?;
        self.counter += 1;
        Ok(construct_nonce(self.epoch, self.direction.as_byte(), counter))
    }

    /// Encrypts the next frame body.
    ///
    /// # Errors
    ///
    /// Returns an error if the nonce space of this epoch is exhausted.
    pub fn seal(&mut self, plaintext: &[u8]) -> CloudResult<Vec<u8>> {
        let nonce = self.next_nonce()?;
        self.cipher.seal(&nonce, plaintext)
    }

    /// Decrypts the next frame body.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError::AuthenticationFailed`] if the frame was not
    /// sealed with the matching key and position.
    pub fn open(&mut self, ciphertext: &[u8]) -> CloudResult<Vec<u8>> {
        let nonce = self.next_nonce()?;
        self.cipher.open(&nonce, ciphertext)
    }
}

impl std::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCipher")
            .field("direction", &self.direction)
            .field("epoch", &self.epoch)
            .field("counter", &self.counter)
            .finish()
    }
}

/// Session keys a [`KeyCache`] holds by default.
pub const DEFAULT_KEY_CACHE_CAPACITY: usize = 64;

#[derive(Debug, Default)]
struct CachedKeys {
    keys: HashMap<(String, u32), SessionKey>,
    order: VecDeque<(String, u32)>,
}

/// Memoised session key derivations for accepted sessions.
///
/// Holds at most `capacity` keys; the oldest derivation is evicted first.
#[derive(Debug)]
pub struct KeyCache {
    inner: Mutex<CachedKeys>,
    capacity: usize,
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_KEY_CACHE_CAPACITY)
    }
}

impl KeyCache {
    /// Creates an empty cache with the default capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty cache holding at most `capacity` keys (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CachedKeys::default()),
            capacity: capacity.max(1),
        }
    }

    /// Returns the session key for a password hash, deriving it once.
    ///
    /// # Errors
    ///
    /// Returns an error if `key_bits` is unsupported.
    pub fn session_key(&self, password_hash: &str, key_bits: u32) -> CloudResult<SessionKey> {
        let cache_key = (password_hash.to_string(), key_bits);
        if let Some(key) = self.inner.lock().keys.get(&cache_key) {
            return Ok(key.clone());
        }
        let key = SessionKey::derive(password_hash, key_bits)?;

        let mut inner = self.inner.lock();
        if !inner.keys.contains_key(&cache_key) {
            while inner.keys.len() >= self.capacity {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.keys.remove(&oldest);
                    }
                    None => break,
                }
            }
            inner.order.push_back(cache_key.clone());
            inner.keys.insert(cache_key, key.clone());
        }
        Ok(key)
    }

    /// Most keys held at once.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached keys.
    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_layout() {
        let nonce = construct_nonce(2, 0x01, 5);
        assert_eq!(&nonce[0..4], &[0, 0, 0, 2]);
        assert_eq!(nonce[4], 0x01);
        assert_eq!(&nonce[5..8], &[0, 0, 0]);
        assert_eq!(&nonce[8..12], &[0, 0, 0, 5]);
    }

    #[test]
    fn negotiation() {
        assert_eq!(negotiate_key_bits(256, 256), Some(256));
        assert_eq!(negotiate_key_bits(512, 256), Some(256));
        assert_eq!(negotiate_key_bits(256, 128), Some(128));
        assert_eq!(negotiate_key_bits(192, 256), Some(128));
        assert_eq!(negotiate_key_bits(64, 256), None);
    }

    #[test]
    fn derivation_is_deterministic_and_truncated() {
        let a = SessionKey::derive("abc123", 256).unwrap();
        let b = SessionKey::derive("abc123", 256).unwrap();
        let short = SessionKey::derive("abc123", 128).unwrap();
        let other = SessionKey::derive("abc124", 256).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, other);
        assert_eq!(a.key_bits(), 256);
        assert_eq!(short.key_bits(), 128);
        assert_eq!(&a.bytes[..16], &short.bytes[..]);
        assert!(SessionKey::derive("abc123", 64).is_err());
    }

    #[test]
    fn key_check_detects_wrong_key() {
        let right = SessionKey::derive("right", 256).unwrap();
        let wrong = SessionKey::derive("wrong", 256).unwrap();
        let check = right.key_check().unwrap();

        assert!(right.verify_key_check(&check));
        assert!(!wrong.verify_key_check(&check));
        assert!(!right.verify_key_check(b"garbage"));
    }

    #[test]
    fn ciphers_stay_in_step() {
        let mut writer = FrameCipher::bootstrap(Direction::ClientToServer).unwrap();
        let mut reader = FrameCipher::bootstrap(Direction::ClientToServer).unwrap();

        for i in 0..3u8 {
            let sealed = writer.seal(&[i; 10]).unwrap();
            assert_eq!(reader.open(&sealed).unwrap(), vec![i; 10]);
        }

        let key = SessionKey::derive("hash", 128).unwrap();
        writer.rekey(&key).unwrap();
        reader.rekey(&key).unwrap();
        assert_eq!(writer.epoch(), 1);

        let sealed = writer.seal(b"after rekey").unwrap();
        assert_eq!(reader.open(&sealed).unwrap(), b"after rekey");
    }

    #[test]
    fn replayed_frame_fails() {
        let mut writer = FrameCipher::bootstrap(Direction::ServerToClient).unwrap();
        let mut reader = FrameCipher::bootstrap(Direction::ServerToClient).unwrap();

        let sealed = writer.seal(b"once").unwrap();
        reader.open(&sealed).unwrap();
        let err = reader.open(&sealed).unwrap_err();
        assert!(matches!(err, CloudError::AuthenticationFailed(_)));
    }

    #[test]
    fn directions_do_not_mix() {
        let mut writer = FrameCipher::bootstrap(Direction::ClientToServer).unwrap();
        let mut reader = FrameCipher::bootstrap(Direction::ServerToClient).unwrap();
        let sealed = writer.seal(b"hello").unwrap();
        assert!(reader.open(&sealed).is_err());
    }

    #[test]
    fn key_cache_memoises() {
        let cache = KeyCache::new();
        assert!(cache.is_empty());

        let a = cache.session_key("hash", 256).unwrap();
        let b = cache.session_key("hash", 256).unwrap();
        cache.session_key("hash", 128).unwrap();

        assert_eq!(a, b);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn key_cache_evicts_oldest() {
        let cache = KeyCache::with_capacity(2);
        let first = cache.session_key("first", 256).unwrap();
        cache.session_key("second", 256).unwrap();
        cache.session_key("third", 256).unwrap();
        assert_eq!(cache.len(), 2);

        for n in 0..100 {
            cache.session_key(&format!("user-{n}"), 128).unwrap();
        }
        assert_eq!(cache.len(), cache.capacity());

        // Evicted keys are derived again and still match.
        assert_eq!(cache.session_key("first", 256).unwrap(), first);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn debug_redacts_key() {
        let key = SessionKey::bootstrap();
        let shown = format!("{key:?}");
        assert!(shown.contains("REDACTED"));
        assert!(shown.contains("256"));
    }
}
