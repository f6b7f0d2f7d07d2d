//! Structured key material returned by a crypto backend's `parse_key`.
//!
//! This is the raw packet-level view: every self-signature is kept, in
//! packet order, with the subpackets the key inspector needs. Deciding
//! which signature wins, what is revoked and when a key expires is the
//! inspector's job, not the backend's.

use chrono::{DateTime, Utc};

use crate::types::Capabilities;

/// The role a signature plays on a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureKind {
    /// User ID certification (0x10-0x13) issued by the key itself
    Certification,
    /// Direct-key signature (0x1F)
    DirectKey,
    /// Subkey binding signature (0x18)
    SubkeyBinding,
    /// Key revocation (0x20)
    KeyRevocation,
    /// Subkey revocation (0x28)
    SubkeyRevocation,
    /// Certification revocation (0x30)
    CertificationRevocation,
    /// Anything else; ignored by the inspector
    Other,
}

/// One self-signature with the subpackets the inspector reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRecord {
    /// Role of the signature
    pub kind: SignatureKind,
    /// Signature creation time, if the subpacket is present
    pub created: Option<DateTime<Utc>>,
    /// Key usage flags subpacket, if present
    pub key_flags: Option<Capabilities>,
    /// Key expiration subpacket in seconds after key creation; `Some(0)`
    /// and `None` both mean the key does not expire
    pub key_validity_secs: Option<u64>,
    /// Whether the signature verified against the primary key
    pub valid: bool,
}

/// Identity of one key component (primary key or subkey).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyComponent {
    /// Raw fingerprint bytes (20 for v4, 32 for v6)
    pub fingerprint: Vec<u8>,
    /// Raw key ID bytes (8)
    pub key_id: Vec<u8>,
    /// Algorithm name
    pub algorithm: String,
    /// Curve name for elliptic-curve algorithms
    pub curve: Option<String>,
    /// Bit size for RSA/DSA/Elgamal
    pub bit_size: Option<u32>,
    /// Creation time from the key packet
    pub created: DateTime<Utc>,
}

/// A user ID and the self-signatures over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMaterial {
    /// The user ID string (lossy UTF-8)
    pub id: String,
    /// Certifications and certification revocations, in packet order
    pub signatures: Vec<SignatureRecord>,
}

/// A subkey and its binding/revocation signatures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubkeyMaterial {
    /// The subkey itself
    pub component: KeyComponent,
    /// Binding and revocation signatures, in packet order
    pub signatures: Vec<SignatureRecord>,
}

/// A parsed key as reported by a crypto backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    /// Whether the parsed block contained secret key packets
    pub is_secret: bool,
    /// Whether the primary secret material is encrypted with a passphrase
    pub secret_encrypted: bool,
    /// The primary key
    pub primary: KeyComponent,
    /// Direct-key signatures and key revocations, in packet order
    pub direct_signatures: Vec<SignatureRecord>,
    /// User IDs, in packet order
    pub users: Vec<UserMaterial>,
    /// Subkeys, in packet order
    pub subkeys: Vec<SubkeyMaterial>,
}
