//! Signed identity verification for the Pulse realtime layer.
//!
//! Sessions are issued elsewhere (by the HTTP application) as a cookie named
//! [`SESSION_COOKIE`] whose value is `"<userId>.<signature>"`. The signature
//! is an HMAC over `userId` produced with a rotating keyring: the first key
//! signs, any key may verify, so existing sessions survive key rotation.
//!
//! Verification never fails hard. A missing, malformed, or badly signed
//! cookie degrades to "not signed in" — the caller decides what an
//! unauthenticated connection is allowed to do.

use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Name of the session cookie carrying the composite identity token.
pub const SESSION_COOKIE: &str = "session";

/// Errors that can occur when constructing a [`Keyring`].
#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    /// The supplied key list contained no usable keys.
    #[error("keyring requires at least one non-empty key")]
    NoKeys,
}

/// An ordered list of secret keys supporting multi-key signature
/// verification for rotation.
#[derive(Clone)]
pub struct Keyring {
    keys: Vec<Vec<u8>>,
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("Keyring")
            .field("keys", &self.keys.len())
            .finish()
    }
}

impl Keyring {
    /// Builds a keyring from an ordered key list. The first key signs; any
    /// key verifies.
    ///
    /// # Errors
    ///
    /// Returns [`KeyringError::NoKeys`] if the list is empty.
    pub fn from_keys<I, K>(keys: I) -> Result<Self, KeyringError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<[u8]>,
    {
        let keys: Vec<Vec<u8>> = keys
            .into_iter()
            .map(|k| k.as_ref().to_vec())
            .filter(|k| !k.is_empty())
            .collect();
        if keys.is_empty() {
            return Err(KeyringError::NoKeys);
        }
        Ok(Self { keys })
    }

    /// Builds a keyring from a comma-separated key list, as supplied via the
    /// environment. Whitespace around keys is trimmed; empty segments are
    /// skipped.
    pub fn from_env_list(list: &str) -> Result<Self, KeyringError> {
        Self::from_keys(list.split(',').map(str::trim).filter(|k| !k.is_empty()))
    }

    /// Number of keys in the ring.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the ring is empty. Always false for a constructed ring.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    fn mac_for(key: &[u8], data: &str) -> Hmac<Sha256> {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(data.as_bytes());
        mac
    }

    /// Signs `data` with the first (current) key. Returns the signature as
    /// URL-safe unpadded base64.
    pub fn sign(&self, data: &str) -> String {
        let digest = Self::mac_for(&self.keys[0], data).finalize().into_bytes();
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
    }

    /// Verifies `signature` over `data` against every key in the ring.
    pub fn verify(&self, data: &str, signature: &str) -> bool {
        self.index(data, signature).is_some()
    }

    /// Returns the position of the key that produced `signature`, or `None`
    /// if no key matches. Index 0 means the signature is current; a higher
    /// index means it was produced before a rotation.
    pub fn index(&self, data: &str, signature: &str) -> Option<usize> {
        let provided = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signature.as_bytes())
            .ok()?;
        self.keys.iter().position(|key| {
            // verify_slice is constant-time.
            Self::mac_for(key, data).verify_slice(&provided).is_ok()
        })
    }
}

/// Joins a value and its signature into the composite cookie form
/// `"<value>.<signature>"`.
pub fn compose_value(value: &str, signature: &str) -> String {
    format!("{}.{}", value, signature)
}

/// Splits a composite cookie value into its two `.`-separated parts.
///
/// Returns `None` when the value does not consist of exactly two non-empty
/// parts.
pub fn decompose_value(composite: &str) -> Option<(&str, &str)> {
    let (value, signature) = composite.split_once('.')?;
    if value.is_empty() || signature.is_empty() || signature.contains('.') {
        return None;
    }
    Some((value, signature))
}

/// Outcome of extracting an identity from a cookie header.
///
/// `user_id` is `None` only when no session value was present at all. A
/// present but malformed or badly signed value carries the parsed (possibly
/// garbage) id with `signature_valid = false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// The raw user id string from the cookie, if any value was present.
    pub user_id: Option<String>,
    /// Whether the signature verified against the keyring.
    pub signature_valid: bool,
}

impl SessionIdentity {
    fn absent() -> Self {
        Self {
            user_id: None,
            signature_valid: false,
        }
    }
}

/// Parses a raw `Cookie:` header into name/value pairs and returns the value
/// of the cookie named `name`, if present.
fn cookie_value<'a>(raw: &'a str, name: &str) -> Option<&'a str> {
    raw.split(';').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k.trim() == name).then(|| v.trim())
    })
}

/// Extracts the signed identity from a raw `Cookie:` header.
///
/// Never errors: anything short of a well-formed, correctly signed session
/// value degrades to "not signed in".
pub fn identity_from_cookie_header(raw: &str, keyring: &Keyring) -> SessionIdentity {
    let Some(session_value) = cookie_value(raw, SESSION_COOKIE) else {
        return SessionIdentity::absent();
    };
    if session_value.is_empty() {
        return SessionIdentity::absent();
    }

    let Some((user_id, signature)) = decompose_value(session_value) else {
        // Value present but not in "<id>.<sig>" form: keep what we parsed,
        // mark the signature incorrect.
        return SessionIdentity {
            user_id: Some(session_value.to_string()),
            signature_valid: false,
        };
    };

    SessionIdentity {
        user_id: Some(user_id.to_string()),
        signature_valid: keyring.verify(user_id, signature),
    }
}
