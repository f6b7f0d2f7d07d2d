//! Public type definitions for the pgpworkbench library.
//!
//! This module contains the read-only views produced by the key inspector
//! and the verification outcome surfaced by the verify workflow.

use chrono::{DateTime, Utc};
use serde::Serialize;
use zeroize::Zeroize;

use crate::config::Config;
use crate::session::Wipe;

/// Whether a key block carries public or secret material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// Public key (certificate)
    Public,
    /// Private key (contains secret components)
    Private,
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyKind::Public => write!(f, "public"),
            KeyKind::Private => write!(f, "private"),
        }
    }
}

/// A usage a key or subkey is authorized for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Certify other keys and user IDs
    Certify,
    /// Sign data
    Sign,
    /// Encrypt communications or storage
    Encrypt,
    /// Authenticate
    Authenticate,
}

impl Capability {
    /// All capabilities, in display order.
    pub const ALL: [Capability; 4] = [
        Capability::Certify,
        Capability::Sign,
        Capability::Encrypt,
        Capability::Authenticate,
    ];

    /// The string tag for this capability.
    pub fn tag(&self) -> &'static str {
        match self {
            Capability::Certify => "certify",
            Capability::Sign => "sign",
            Capability::Encrypt => "encrypt",
            Capability::Authenticate => "authenticate",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Capability::Certify => 1,
            Capability::Sign => 2,
            Capability::Encrypt => 4,
            Capability::Authenticate => 8,
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A set of [`Capability`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities {
    mask: u8,
}

impl Capabilities {
    /// The empty set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a set from a bitmask (1=certify, 2=sign, 4=encrypt, 8=authenticate).
    pub fn from_bitmask(mask: u8) -> Self {
        Self { mask: mask & 0x0F }
    }

    /// Convert to bitmask representation.
    pub fn to_bitmask(&self) -> u8 {
        self.mask
    }

    /// Add a capability.
    pub fn insert(&mut self, capability: Capability) {
        self.mask |= capability.bit();
    }

    /// Add every capability of `other`.
    pub fn extend(&mut self, other: Capabilities) {
        self.mask |= other.mask;
    }

    /// Whether the set contains `capability`.
    pub fn contains(&self, capability: Capability) -> bool {
        self.mask & capability.bit() != 0
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    /// Iterate in display order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }

    /// The string tags of the contained capabilities.
    pub fn tags(&self) -> Vec<&'static str> {
        self.iter().map(|c| c.tag()).collect()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        let mut caps = Capabilities::empty();
        for c in iter {
            caps.insert(c);
        }
        caps
    }
}

impl Serialize for Capabilities {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// Information about a subkey.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubkeyInfo {
    /// Key ID (lowercase hex, 16 characters for v4 keys)
    pub key_id: String,
    /// Full fingerprint (lowercase hex, no separators)
    pub fingerprint: String,
    /// Algorithm name (e.g., "RSA", "EdDSA", "ECDH")
    pub algorithm: String,
    /// Curve name for elliptic-curve keys
    pub curve: Option<String>,
    /// Key size in bits for RSA/DSA/Elgamal keys
    pub bit_size: Option<u32>,
    /// When the subkey was created
    pub created: DateTime<Utc>,
    /// When the subkey expires (None if never)
    pub expiration_date: Option<DateTime<Utc>>,
    /// Usages bound to this subkey by non-revoked binding signatures
    pub capabilities: Capabilities,
    /// Whether this subkey has been revoked
    pub is_revoked: bool,
}

/// Derived, read-only view of a parsed key.
///
/// A `KeyInfo` is never mutated after the inspector produces it; inspecting
/// the same text again yields a fresh, equal value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyInfo {
    /// Public or private, from the armor label
    #[serde(rename = "type")]
    pub kind: KeyKind,
    /// Primary key ID (lowercase hex)
    pub key_id: String,
    /// Primary key fingerprint (lowercase hex, no separators)
    pub fingerprint: String,
    /// Algorithm name of the primary key
    pub algorithm: String,
    /// Curve name for elliptic-curve keys
    pub curve: Option<String>,
    /// Key size in bits for RSA/DSA/Elgamal keys
    pub bit_size: Option<u32>,
    /// Creation time of the primary key
    pub created: DateTime<Utc>,
    /// Expiration of the primary key (None if it never expires)
    pub expiration_date: Option<DateTime<Utc>>,
    /// Whether the secret material is passphrase-protected (private keys only)
    pub is_encrypted: bool,
    /// Whether the primary key carries a key revocation
    pub is_revoked: bool,
    /// User IDs in the key's own order
    pub user_ids: Vec<String>,
    /// Usages bound to the primary key
    pub capabilities: Capabilities,
    /// Subkeys in the key's own order
    pub subkeys: Vec<SubkeyInfo>,
}

impl KeyInfo {
    /// Whether this is a private key.
    pub fn is_private(&self) -> bool {
        self.kind == KeyKind::Private
    }

    /// Whether using this key requires a passphrase.
    pub fn needs_passphrase(&self) -> bool {
        self.is_private() && self.is_encrypted
    }

    /// The first user ID, if any.
    pub fn primary_user_id(&self) -> Option<&str> {
        self.user_ids.first().map(String::as_str)
    }

    /// Whether the primary key or any non-revoked subkey can encrypt.
    pub fn can_encrypt(&self) -> bool {
        self.capabilities.contains(Capability::Encrypt)
            || self
                .subkeys
                .iter()
                .any(|s| !s.is_revoked && s.capabilities.contains(Capability::Encrypt))
    }

    /// Whether the primary key or any non-revoked subkey can sign.
    pub fn can_sign(&self) -> bool {
        self.capabilities.contains(Capability::Sign)
            || self
                .subkeys
                .iter()
                .any(|s| !s.is_revoked && s.capabilities.contains(Capability::Sign))
    }

    /// Whole days until the primary key expires, negative once expired.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expiration_date
            .map(|exp| exp.signed_duration_since(now).num_days())
    }

    /// Classify the primary key's expiration relative to `now`.
    pub fn expiry_status(&self, now: DateTime<Utc>, config: &Config) -> ExpiryStatus {
        let Some(expiration) = self.expiration_date else {
            return ExpiryStatus::Never;
        };
        if expiration <= now {
            return ExpiryStatus::Expired;
        }
        let days = expiration.signed_duration_since(now).num_days();
        if days <= config.expiring_week_days {
            ExpiryStatus::ExpiringThisWeek { days }
        } else if days <= config.expiring_soon_days {
            ExpiryStatus::ExpiringSoon { days }
        } else {
            ExpiryStatus::Valid
        }
    }
}

/// Expiration state of a key relative to a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ExpiryStatus {
    /// The key has no expiration
    Never,
    /// Expires later than the "soon" threshold
    Valid,
    /// Expires within the "soon" threshold
    ExpiringSoon {
        /// Whole days left
        days: i64,
    },
    /// Expires within the "week" threshold
    ExpiringThisWeek {
        /// Whole days left
        days: i64,
    },
    /// Already expired
    Expired,
}

/// Outcome of a signature verification.
///
/// `valid == false` is a normal outcome (tampered message, wrong key), not
/// a workflow failure.
#[derive(Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Whether the signature checked out against the given key
    pub valid: bool,
    /// Identity of the signer (first user ID of the verifying key)
    pub signed_by: Option<String>,
    /// Signature creation time
    pub signed_at: Option<DateTime<Utc>>,
    /// The signed content, for cleartext and inline-signed messages.
    ///
    /// Line endings are LF. Cleartext content has trailing spaces and tabs
    /// removed from each line, as the signature covers it without them.
    /// Inline-signed content that is not UTF-8 is left out.
    pub message: Option<String>,
    /// Why the signature did not verify
    pub error: Option<String>,
}

impl VerificationResult {
    /// A failed verification with an explanation.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(reason.into()),
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for VerificationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationResult")
            .field("valid", &self.valid)
            .field("signed_by", &self.signed_by)
            .field("signed_at", &self.signed_at)
            .field("message", &self.message.as_ref().map(|_| "[REDACTED]"))
            .field("error", &self.error)
            .finish()
    }
}

impl Wipe for VerificationResult {
    fn wipe(&mut self) {
        if let Some(message) = self.message.as_mut() {
            message.zeroize();
        }
        *self = VerificationResult::default();
    }
}

/// The operation a workflow performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Encrypt to recipients' public keys
    Encrypt,
    /// Decrypt with a private key
    Decrypt,
    /// Sign with a private key
    Sign,
    /// Verify with a public key
    Verify,
    /// Inspect a key
    Inspect,
}

impl OperationKind {
    /// The key kind this operation's key field expects, if restricted.
    pub fn expected_key(&self) -> Option<KeyKind> {
        match self {
            OperationKind::Encrypt | OperationKind::Verify => Some(KeyKind::Public),
            OperationKind::Decrypt | OperationKind::Sign => Some(KeyKind::Private),
            OperationKind::Inspect => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperationKind::Encrypt => write!(f, "encrypt"),
            OperationKind::Decrypt => write!(f, "decrypt"),
            OperationKind::Sign => write!(f, "sign"),
            OperationKind::Verify => write!(f, "verify"),
            OperationKind::Inspect => write!(f, "inspect"),
        }
    }
}
